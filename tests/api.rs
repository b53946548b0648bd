//! JSON API over a live dashboard view.

mod common;

use std::sync::Arc;

use serde_json::{json, Value};

use common::*;
use rackwatch::api::{self, ApiState};
use rackwatch::conditions::CalibrationEstimator;
use rackwatch::{ActorIdentity, MemoryCache, ViewPhase};

async fn serve_dashboard(backend: Arc<ScriptedBackend>) -> (String, Arc<rackwatch::ViewHandle>) {
    let reconciler = reconciler(backend, Arc::new(MemoryCache::new()));
    let view = Arc::new(reconciler.open_dashboard().unwrap());
    let mut status = view.watch_status();
    wait_status(&mut status, |s| s.phase == ViewPhase::Reconciled).await;

    let state = ApiState {
        view: view.clone(),
        actor: ActorIdentity::owner(EMAIL),
        actions: reconciler.actions().clone(),
        estimator: Arc::new(CalibrationEstimator::stock()),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, api::router(state)).await.unwrap();
    });
    (format!("http://{}", addr), view)
}

async fn get_json(url: &str) -> Value {
    reqwest::get(url).await.unwrap().json().await.unwrap()
}

#[tokio::test]
async fn dashboard_lists_readings_with_tones() {
    let backend = Arc::new(ScriptedBackend::new().with_snapshot(vec![reading("1", "1", 4.0)]));
    let _feed = backend.add_feed();
    let (base, _view) = serve_dashboard(backend).await;

    let body = get_json(&format!("{}/api", base)).await;

    assert_eq!(body["actor"]["email"], EMAIL);
    assert_eq!(body["status"]["phase"], "Reconciled");
    assert_eq!(body["readings"].as_array().unwrap().len(), 1);
    assert_eq!(body["readings"][0]["container_id"], "1");
    assert_eq!(body["readings"][0]["tone"], "success");
}

#[tokio::test]
async fn rack_page_carries_history_and_a_suggestion() {
    let backend = Arc::new(ScriptedBackend::new());
    let feed = backend.add_feed();
    let (base, view) = serve_dashboard(backend).await;

    feed.send(frame("1", "2", 5.0)).await.unwrap();
    feed.send(frame("1", "2", 6.0)).await.unwrap();
    let readings = view.readings();
    eventually(|| readings.history("1", "2").len() == 2).await;

    let body = get_json(&format!("{}/api/rack/1/2", base)).await;
    assert_eq!(body["latest"]["temperature"], 6.0);
    assert_eq!(body["history"].as_array().unwrap().len(), 2);
    assert!(body["suggested"]["temperature"].is_number());

    let empty = get_json(&format!("{}/api/rack/9/9", base)).await;
    assert!(empty["latest"].is_null());
    assert!(empty["suggested"].is_null());
}

#[tokio::test]
async fn managed_set_edits_go_through_the_view() {
    let backend = Arc::new(ScriptedBackend::new());
    let _feed = backend.add_feed();
    let (base, view) = serve_dashboard(backend.clone()).await;
    let client = reqwest::Client::new();

    let added: Value = client
        .post(format!("{}/api/containers", base))
        .json(&json!({ "ids": ["4", "5"] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(added["changed"], true);
    assert_eq!(added["containers"], json!({ "4": [], "5": [] }));

    let rack: Value = client
        .post(format!("{}/api/containers/4/racks", base))
        .json(&json!({ "rack_id": "2" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rack["containers"]["4"], json!(["2"]));

    let removed: Value = client
        .delete(format!("{}/api/containers", base))
        .json(&json!({ "ids": ["5"] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(removed["containers"], json!({ "4": ["2"] }));

    let again: Value = client
        .delete(format!("{}/api/containers/4/racks/2", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again["containers"], json!({ "4": [] }));

    assert_eq!(view.managed().unwrap().current(), managed(&[("4", &[])]));
    eventually(|| backend.pushes().len() >= 1).await;

    let actions = get_json(&format!("{}/api/actions", base)).await;
    assert_eq!(
        actions,
        json!([
            "Added containers 4, 5",
            "Added rack 2 to container 4",
            "Removed containers 5",
            "Removed rack 2 from container 4",
        ])
    );
}
