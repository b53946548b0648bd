//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, watch, Notify};

use rackwatch::error::Result;
use rackwatch::{
    ActorContext, ActorIdentity, LocalCache, ManagedSet, MemoryCache, PushFeed, Reconciler,
    ReconcilerSettings, SensorReading, SyncError, TelemetryBackend, ViewScope, ViewStatus,
};

pub const EMAIL: &str = "owner@example.com";

// ============================================================================
// Scripted origin
// ============================================================================

/// A `TelemetryBackend` whose answers are set up by the test.
///
/// Snapshots and the managed fetch can be held back behind a gate so the
/// test decides when they resolve. Every push is recorded once it lands,
/// after any delay queued for it.
#[derive(Default)]
pub struct ScriptedBackend {
    snapshot: Mutex<Option<Vec<SensorReading>>>,
    snapshot_gate: Option<Arc<Notify>>,
    feeds: Mutex<VecDeque<PushFeed>>,
    managed: Mutex<Option<ManagedSet>>,
    managed_gate: Option<Arc<Notify>>,
    push_delays: Mutex<VecDeque<Duration>>,
    pushes: Mutex<Vec<(String, ManagedSet)>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            snapshot: Mutex::new(Some(Vec::new())),
            managed: Mutex::new(Some(ManagedSet::new())),
            ..Self::default()
        }
    }

    pub fn with_snapshot(self, readings: Vec<SensorReading>) -> Self {
        *self.snapshot.lock().unwrap() = Some(readings);
        self
    }

    /// snapshot requests answer HTTP 500
    pub fn failing_snapshot(self) -> Self {
        *self.snapshot.lock().unwrap() = None;
        self
    }

    pub fn with_remote_managed(self, set: ManagedSet) -> Self {
        *self.managed.lock().unwrap() = Some(set);
        self
    }

    /// managed-set fetches answer HTTP 500
    pub fn failing_managed(self) -> Self {
        *self.managed.lock().unwrap() = None;
        self
    }

    /// hold snapshots until the returned gate is notified
    pub fn gated_snapshot(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.snapshot_gate = Some(gate.clone());
        (self, gate)
    }

    /// hold the managed fetch until the returned gate is notified
    pub fn gated_managed(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.managed_gate = Some(gate.clone());
        (self, gate)
    }

    /// the n-th push takes the n-th delay to land
    pub fn with_push_delays(self, delays: &[Duration]) -> Self {
        self.push_delays.lock().unwrap().extend(delays.iter().copied());
        self
    }

    /// queue a feed for the next `subscribe`; with none queued it fails
    pub fn add_feed(&self) -> mpsc::Sender<String> {
        let (tx, feed) = PushFeed::channel();
        self.feeds.lock().unwrap().push_back(feed);
        tx
    }

    pub fn pushes(&self) -> Vec<(String, ManagedSet)> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetryBackend for ScriptedBackend {
    async fn fetch_snapshot(&self, _scope: &ViewScope) -> Result<Vec<SensorReading>> {
        if let Some(gate) = &self.snapshot_gate {
            gate.notified().await;
        }
        let snapshot = self.snapshot.lock().unwrap().clone();
        snapshot.ok_or(SyncError::Status {
            endpoint: "/data".to_string(),
            status: 500,
        })
    }

    async fn subscribe(&self) -> Result<PushFeed> {
        self.feeds.lock().unwrap().pop_front().ok_or(SyncError::Status {
            endpoint: "/subscribe".to_string(),
            status: 503,
        })
    }

    async fn fetch_managed(&self, _email: &str) -> Result<ManagedSet> {
        if let Some(gate) = &self.managed_gate {
            gate.notified().await;
        }
        let managed = self.managed.lock().unwrap().clone();
        managed.ok_or(SyncError::Status {
            endpoint: "/containers_managed".to_string(),
            status: 500,
        })
    }

    async fn push_managed(&self, email: &str, set: &ManagedSet) -> Result<()> {
        let delay = self.push_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.pushes
            .lock()
            .unwrap()
            .push((email.to_string(), set.clone()));
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn settings() -> ReconcilerSettings {
    ReconcilerSettings {
        stale_after: Duration::from_secs(30),
        ..ReconcilerSettings::default()
    }
}

/// A reconciler acting as `EMAIL`.
pub fn reconciler(backend: Arc<ScriptedBackend>, cache: Arc<MemoryCache>) -> Reconciler {
    let actors = ActorContext::new();
    actors.set_actor(ActorIdentity::owner(EMAIL));
    Reconciler::new(backend, cache, actors, settings())
}

pub fn seeded_cache(set: ManagedSet) -> Arc<MemoryCache> {
    let cache = MemoryCache::new();
    cache.store(EMAIL, &set).unwrap();
    Arc::new(cache)
}

pub fn frame(container: &str, rack: &str, temperature: f64) -> String {
    json!({
        "container_id": container,
        "rack_id": rack,
        "fruit": "Spinach",
        "temperature": temperature,
        "humidity": 80.0,
        "methane": 12.0,
        "status": "Nominal",
        "timestamp": "2024-05-01T12:00:00Z",
    })
    .to_string()
}

pub fn reading(container: &str, rack: &str, temperature: f64) -> SensorReading {
    SensorReading::from_frame(&frame(container, rack, temperature)).unwrap()
}

pub fn managed(entries: &[(&str, &[&str])]) -> ManagedSet {
    entries
        .iter()
        .map(|(c, racks)| (c.to_string(), racks.iter().map(|r| r.to_string())))
        .collect()
}

/// Wait (bounded) until the view status satisfies `pred`.
pub async fn wait_status(
    rx: &mut watch::Receiver<ViewStatus>,
    pred: impl FnMut(&ViewStatus) -> bool,
) -> ViewStatus {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("timed out waiting for view status")
        .expect("status channel closed")
        .clone()
}

/// Poll `cond` until it holds or a few seconds pass.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

/// Let spawned tasks run without advancing towards any watchdog.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
