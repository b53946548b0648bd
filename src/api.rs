//! ==============================================================================
//! api.rs - json api over an open dashboard view
//! ==============================================================================
//!
//! purpose:
//!     lets whatever renders the dashboard read the reconciled state and ask
//!     for managed-set changes. all mutations go through the view, so the
//!     reconciler stays the only writer.
//!
//! routes:
//!     GET    /api                                   readings, managed set, status
//!     GET    /api/rack/:container/:rack             one rack + chart + suggestion
//!     POST   /api/containers                        {"ids": [...]}
//!     DELETE /api/containers                        {"ids": [...]}
//!     POST   /api/containers/:container/racks       {"rack_id": "..."}
//!     DELETE /api/containers/:container/racks/:rack
//!     GET    /api/actions                           action log of the acting identity
//!
//! ==============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::actor::{ActionLog, ActorIdentity};
use crate::conditions::{ConditionEstimator, SuggestedConditions};
use crate::domain::{ChartPoint, SensorReading, Tone};
use crate::reconciler::{ViewHandle, ViewStatus};
use crate::store::managed::ManagedSet;

#[derive(Clone)]
pub struct ApiState {
    pub view: Arc<ViewHandle>,
    pub actor: ActorIdentity,
    pub actions: ActionLog,
    pub estimator: Arc<dyn ConditionEstimator>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api", get(dashboard_handler))
        .route("/api/rack/:container/:rack", get(rack_handler))
        .route(
            "/api/containers",
            post(add_containers_handler).delete(remove_containers_handler),
        )
        .route("/api/containers/:container/racks", post(add_rack_handler))
        .route(
            "/api/containers/:container/racks/:rack",
            delete(remove_rack_handler),
        )
        .route("/api/actions", get(actions_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(bind: &str, state: ApiState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ==============================================================================
// payloads
// ==============================================================================

#[derive(Serialize)]
pub struct ReadingView {
    #[serde(flatten)]
    pub reading: SensorReading,
    pub tone: Tone,
}

impl From<SensorReading> for ReadingView {
    fn from(reading: SensorReading) -> Self {
        let tone = reading.status.tone();
        Self { reading, tone }
    }
}

#[derive(Serialize)]
pub struct DashboardResponse {
    pub actor: ActorIdentity,
    pub status: ViewStatus,
    pub readings: Vec<ReadingView>,
    pub containers: ManagedSet,
}

#[derive(Serialize)]
pub struct RackResponse {
    pub container_id: String,
    pub rack_id: String,
    /// `None` while waiting for the first reading
    pub latest: Option<ReadingView>,
    pub history: Vec<ChartPoint>,
    pub suggested: Option<SuggestedConditions>,
    pub status: ViewStatus,
}

#[derive(Deserialize)]
pub struct ContainerIds {
    pub ids: Vec<String>,
}

#[derive(Deserialize)]
pub struct NewRack {
    pub rack_id: String,
}

#[derive(Serialize)]
pub struct MutationResponse {
    pub changed: bool,
    pub containers: ManagedSet,
}

// ==============================================================================
// handlers
// ==============================================================================

async fn dashboard_handler(State(state): State<ApiState>) -> Json<DashboardResponse> {
    Json(DashboardResponse {
        actor: state.actor.clone(),
        status: state.view.status(),
        readings: state
            .view
            .readings()
            .readings()
            .into_iter()
            .map(ReadingView::from)
            .collect(),
        containers: managed_now(&state),
    })
}

async fn rack_handler(
    State(state): State<ApiState>,
    Path((container, rack)): Path<(String, String)>,
) -> Json<RackResponse> {
    let readings = state.view.readings();
    let latest = readings.get(&container, &rack);
    let suggested = latest
        .as_ref()
        .map(|r| state.estimator.suggest(&r.food_kind, r.methane_level));

    Json(RackResponse {
        history: readings.history(&container, &rack),
        container_id: container,
        rack_id: rack,
        latest: latest.map(ReadingView::from),
        suggested,
        status: state.view.status(),
    })
}

async fn add_containers_handler(
    State(state): State<ApiState>,
    Json(body): Json<ContainerIds>,
) -> Json<MutationResponse> {
    let changed = state.view.add_containers(&body.ids);
    mutation(&state, changed)
}

async fn remove_containers_handler(
    State(state): State<ApiState>,
    Json(body): Json<ContainerIds>,
) -> Json<MutationResponse> {
    let changed = state.view.remove_containers(&body.ids);
    mutation(&state, changed)
}

async fn add_rack_handler(
    State(state): State<ApiState>,
    Path(container): Path<String>,
    Json(body): Json<NewRack>,
) -> Json<MutationResponse> {
    let changed = state.view.add_rack(&container, &body.rack_id);
    mutation(&state, changed)
}

async fn remove_rack_handler(
    State(state): State<ApiState>,
    Path((container, rack)): Path<(String, String)>,
) -> Json<MutationResponse> {
    let changed = state.view.remove_rack(&container, &rack);
    mutation(&state, changed)
}

async fn actions_handler(State(state): State<ApiState>) -> Json<Vec<String>> {
    Json(state.actions.entries(&state.actor.email))
}

fn managed_now(state: &ApiState) -> ManagedSet {
    state
        .view
        .managed()
        .map(|m| m.current())
        .unwrap_or_default()
}

fn mutation(state: &ApiState, changed: bool) -> Json<MutationResponse> {
    Json(MutationResponse {
        changed,
        containers: managed_now(state),
    })
}
