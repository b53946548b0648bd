//! ==============================================================================
//! reconciler.rs - per-view sync of readings and managed sets
//! ==============================================================================
//!
//! purpose:
//!     opens a view (dashboard or single rack) and keeps its stores current:
//!     - seeds the ReadingStore from a one-shot snapshot
//!     - applies push-feed readings as they arrive (last arrival wins)
//!     - flags "no new data" when the feed goes quiet
//!     - dashboards only: merges the local and remote managed set, then
//!       writes every new state back to the cache and the origin
//!
//! relationships:
//!     - reads: actor.rs (email scoping every remote call)
//!     - drives: store/reading.rs, store/managed.rs
//!     - talks to: remote.rs (TelemetryBackend), cache.rs (LocalCache)
//!
//! lifecycle:
//!
//!     Idle ──open──▶ FetchingSnapshot ──snapshot + feed──▶ Subscribed
//!                                                             │
//!                           managed set merged (dashboards) ──┤
//!                                                             ▼
//!                          Disconnected ◀──feed lost── Reconciled
//!
//!     there is no reconnect: a lost feed stays Disconnected until the view
//!     is closed and opened again.
//!
//!     the snapshot request and the feed subscription run concurrently, so a
//!     feed reading can land before the snapshot does. both go through the
//!     same last-arrival-wins upsert.
//!
//! ==============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::actor::{ActionLog, ActorContext};
use crate::cache::LocalCache;
use crate::config::MonitorConfig;
use crate::domain::{SensorReading, ViewScope};
use crate::error::Result;
use crate::remote::{PushFeed, TelemetryBackend};
use crate::store::managed::{
    merge, ManagedSet, ManagedSetChanges, ManagedSetReader, ManagedSetStore, RackListPolicy,
};
use crate::store::reading::{self, ReadingReader, ReadingWriter};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ViewPhase {
    Idle,
    FetchingSnapshot,
    Subscribed,
    Reconciled,
    Disconnected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// what a view shows besides its data
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ViewStatus {
    pub phase: ViewPhase,
    pub connection: ConnectionStatus,
    /// the feed has been quiet for a full watchdog period
    pub no_new_data: bool,
    pub snapshot_settled: bool,
    pub managed_settled: bool,
}

impl ViewStatus {
    fn new(needs_managed: bool) -> Self {
        Self {
            phase: ViewPhase::Idle,
            connection: ConnectionStatus::Connecting,
            no_new_data: false,
            snapshot_settled: false,
            managed_settled: !needs_managed,
        }
    }

    fn refresh(&mut self) {
        self.phase = if self.connection == ConnectionStatus::Disconnected {
            ViewPhase::Disconnected
        } else if !self.snapshot_settled || self.connection == ConnectionStatus::Connecting {
            ViewPhase::FetchingSnapshot
        } else if !self.managed_settled {
            ViewPhase::Subscribed
        } else {
            ViewPhase::Reconciled
        };
    }
}

type StatusTx = Arc<watch::Sender<ViewStatus>>;

fn update_status(tx: &StatusTx, change: impl FnOnce(&mut ViewStatus)) {
    tx.send_if_modified(|status| {
        let before = status.clone();
        change(status);
        status.refresh();
        *status != before
    });
}

/// knobs the reconciler takes from configuration
#[derive(Clone, Debug)]
pub struct ReconcilerSettings {
    pub stale_after: Duration,
    pub history_capacity: usize,
    pub rack_policy: RackListPolicy,
    /// log every accepted reading at info
    pub log_readings: bool,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(30),
            history_capacity: 100,
            rack_policy: RackListPolicy::Sequence,
            log_readings: false,
        }
    }
}

impl From<&MonitorConfig> for ReconcilerSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            stale_after: config.watchdog.stale_after(),
            history_capacity: config.history.capacity,
            rack_policy: config.racks.policy(),
            log_readings: config.logging.show_sensor_data,
        }
    }
}

// ==============================================================================
// reconciler
// ==============================================================================

/// opens views; one instance is shared by the whole host
#[derive(Clone)]
pub struct Reconciler {
    backend: Arc<dyn TelemetryBackend>,
    cache: Arc<dyn LocalCache>,
    actors: ActorContext,
    actions: ActionLog,
    settings: ReconcilerSettings,
}

impl Reconciler {
    pub fn new(
        backend: Arc<dyn TelemetryBackend>,
        cache: Arc<dyn LocalCache>,
        actors: ActorContext,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            backend,
            cache,
            actors,
            actions: ActionLog::new(),
            settings,
        }
    }

    pub fn actors(&self) -> &ActorContext {
        &self.actors
    }

    pub fn actions(&self) -> &ActionLog {
        &self.actions
    }

    /// open the dashboard for the acting identity
    ///
    /// must be called from inside a tokio runtime.
    pub fn open_dashboard(&self) -> Result<ViewHandle> {
        let actor = self.actors.require_actor()?;
        let scope = ViewScope::Dashboard {
            email: actor.email.clone(),
        };

        let cached = match self.cache.load(&actor.email) {
            Ok(set) => Some(set.unwrap_or_default()),
            Err(e) => {
                tracing::warn!("[MANAGED] ignoring unreadable local cache: {}", e);
                None
            }
        };
        let seed = cached.clone().unwrap_or_default();
        let store = Arc::new(ManagedSetStore::new(seed, self.settings.rack_policy));
        // subscribe before anything can mutate, so no change is missed
        let changes = store.changes();
        let write_back = Arc::new(WriteBack::new(
            actor.email.clone(),
            self.backend.clone(),
            self.cache.clone(),
            cached,
        ));

        let mut view = self.spawn_view(scope, true);
        let task = tokio::spawn(run_managed_sync(
            store.clone(),
            changes,
            write_back.clone(),
            view.status_tx.clone(),
        ));
        view.managed = Some(ManagedSide {
            store,
            write_back,
            task: Mutex::new(Some(task)),
        });
        Ok(view)
    }

    /// open a single rack page for the acting identity
    pub fn open_rack(&self, container_id: &str, rack_id: &str) -> Result<ViewHandle> {
        let actor = self.actors.require_actor()?;
        let scope = ViewScope::Rack {
            email: actor.email,
            container_id: container_id.to_string(),
            rack_id: rack_id.to_string(),
        };
        Ok(self.spawn_view(scope, false))
    }

    fn spawn_view(&self, scope: ViewScope, needs_managed: bool) -> ViewHandle {
        let (writer, readings) = reading::shared(self.settings.history_capacity);
        let (status_tx, status) = watch::channel(ViewStatus::new(needs_managed));
        let status_tx = Arc::new(status_tx);
        update_status(&status_tx, |_| {});

        tracing::info!("[VIEW] opening {:?}", scope);
        let feed_task = tokio::spawn(run_feed_loop(
            scope.clone(),
            self.backend.clone(),
            writer.clone(),
            status_tx.clone(),
            self.settings.clone(),
        ));

        ViewHandle {
            scope,
            writer,
            readings,
            managed: None,
            status,
            status_tx,
            tasks: Mutex::new(vec![feed_task]),
            actions: self.actions.clone(),
            closed: AtomicBool::new(false),
        }
    }
}

// ==============================================================================
// reading side: snapshot + feed + watchdog on one task
// ==============================================================================

async fn run_feed_loop(
    scope: ViewScope,
    backend: Arc<dyn TelemetryBackend>,
    writer: ReadingWriter,
    status: StatusTx,
    settings: ReconcilerSettings,
) {
    let mut snapshot = backend.fetch_snapshot(&scope);
    let mut opening = backend.subscribe();
    let mut snapshot_pending = true;
    let mut opening_pending = true;
    let mut feed: Option<PushFeed> = None;

    let watchdog = tokio::time::sleep(settings.stale_after);
    tokio::pin!(watchdog);
    let mut watchdog_armed = false;

    loop {
        tokio::select! {
            result = &mut snapshot, if snapshot_pending => {
                snapshot_pending = false;
                match result {
                    Ok(readings) => {
                        let mut seeded = 0;
                        for r in readings {
                            if scope.admits(&r) && writer.upsert(r) {
                                seeded += 1;
                            }
                        }
                        tracing::info!(
                            "[SNAPSHOT] seeded {} readings for {}",
                            seeded,
                            scope.email()
                        );
                    }
                    Err(e) => {
                        tracing::warn!("[SNAPSHOT] fetch failed, no seed this cycle: {}", e);
                    }
                }
                update_status(&status, |s| s.snapshot_settled = true);
            }

            result = &mut opening, if opening_pending => {
                opening_pending = false;
                match result {
                    Ok(f) => {
                        tracing::info!("[FEED] subscribed");
                        feed = Some(f);
                        watchdog.as_mut().reset(Instant::now() + settings.stale_after);
                        watchdog_armed = true;
                        update_status(&status, |s| s.connection = ConnectionStatus::Connected);
                    }
                    Err(e) => {
                        tracing::warn!("[FEED] could not subscribe: {}", e);
                        update_status(&status, |s| s.connection = ConnectionStatus::Disconnected);
                    }
                }
            }

            frame = next_frame(&mut feed), if feed.is_some() => {
                let Some(frame) = frame else {
                    tracing::warn!("[FEED] channel dropped, view is disconnected");
                    feed = None;
                    watchdog_armed = false;
                    update_status(&status, |s| s.connection = ConnectionStatus::Disconnected);
                    continue;
                };
                let Some(reading) = SensorReading::from_frame(&frame) else {
                    tracing::debug!("[FEED] discarded malformed frame");
                    continue;
                };
                if !scope.admits(&reading) {
                    continue;
                }
                if settings.log_readings {
                    tracing::info!(
                        "[FEED] container {} rack {}: {:.1}°C | {:.1}% | CH4 {:.1}",
                        reading.container_id,
                        reading.rack_id,
                        reading.temperature,
                        reading.humidity,
                        reading.methane_level
                    );
                }
                if writer.upsert(reading) {
                    watchdog.as_mut().reset(Instant::now() + settings.stale_after);
                    watchdog_armed = true;
                    update_status(&status, |s| s.no_new_data = false);
                }
            }

            () = &mut watchdog, if watchdog_armed => {
                watchdog_armed = false;
                tracing::warn!(
                    "[WATCHDOG] no new data for {}s on {}",
                    settings.stale_after.as_secs(),
                    scope.email()
                );
                update_status(&status, |s| s.no_new_data = true);
            }

            else => break,
        }
    }
}

async fn next_frame(feed: &mut Option<PushFeed>) -> Option<String> {
    match feed {
        Some(f) => f.recv().await,
        None => std::future::pending().await,
    }
}

// ==============================================================================
// managed-set side: merge once, then write back every new state
// ==============================================================================

struct ManagedSide {
    store: Arc<ManagedSetStore>,
    write_back: Arc<WriteBack>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct WriteBack {
    email: String,
    backend: Arc<dyn TelemetryBackend>,
    cache: Arc<dyn LocalCache>,
    marks: Mutex<Marks>,
}

/// what each side is known to hold
struct Marks {
    /// last state written to the local cache; `None` forces the next write
    cached: Option<ManagedSet>,
    /// last state sent to the origin; `None` until the merge settles
    pushed: Option<ManagedSet>,
    /// the view closed before the merge settled
    abandoned: bool,
}

impl WriteBack {
    fn new(
        email: String,
        backend: Arc<dyn TelemetryBackend>,
        cache: Arc<dyn LocalCache>,
        cached: Option<ManagedSet>,
    ) -> Self {
        Self {
            email,
            backend,
            cache,
            marks: Mutex::new(Marks {
                cached,
                pushed: None,
                abandoned: false,
            }),
        }
    }

    fn marks(&self) -> std::sync::MutexGuard<'_, Marks> {
        self.marks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// `baseline` is what the origin holds from now on; false once abandoned
    fn settle(&self, baseline: ManagedSet) -> bool {
        let mut marks = self.marks();
        if marks.abandoned {
            return false;
        }
        marks.pushed = Some(baseline);
        true
    }

    /// stop a merge that has not settled yet; true when it already had
    fn abandon(&self) -> bool {
        let mut marks = self.marks();
        if marks.pushed.is_some() {
            return true;
        }
        marks.abandoned = true;
        false
    }

    /// write the store's latest state to the cache unless it is already there
    ///
    /// the store is read under the marks lock, so a later caller never
    /// overwrites a newer state with an older one.
    fn cache_latest(&self, store: &ManagedSetStore) -> ManagedSet {
        let mut marks = self.marks();
        let current = store.current();
        if marks.cached.as_ref() != Some(&current) {
            if let Err(e) = self.cache.store(&self.email, &current) {
                tracing::warn!("[WRITE-BACK] local cache write failed: {}", e);
            }
            marks.cached = Some(current.clone());
        }
        current
    }

    /// send `current` to the origin unless it already has it
    ///
    /// only the write-back task calls this, one push at a time, so pushes
    /// reach the origin in the order the states were made.
    async fn push_if_changed(&self, current: &ManagedSet) {
        {
            let mut marks = self.marks();
            match marks.pushed.as_ref() {
                None => return,
                Some(prev) if prev == current => return,
                Some(_) => marks.pushed = Some(current.clone()),
            }
        }
        // a failed push is not retried; the local state stays authoritative
        match self.backend.push_managed(&self.email, current).await {
            Ok(()) => tracing::debug!(
                "[WRITE-BACK] pushed {} containers for {}",
                current.len(),
                self.email
            ),
            Err(e) => tracing::warn!("[WRITE-BACK] push failed: {}", e),
        }
    }
}

async fn run_managed_sync(
    store: Arc<ManagedSetStore>,
    mut changes: ManagedSetChanges,
    write_back: Arc<WriteBack>,
    status: StatusTx,
) {
    let baseline = match write_back.backend.fetch_managed(&write_back.email).await {
        Ok(remote) => {
            // whatever the user changed while the fetch was out counts as local
            let merged = merge(&remote, &store.current());
            tracing::info!(
                "[MANAGED] merged {} remote + local into {} containers",
                remote.len(),
                merged.len()
            );
            store.replace(merged);
            remote
        }
        Err(e) => {
            tracing::warn!("[MANAGED] remote fetch failed, keeping local set: {}", e);
            store.current()
        }
    };
    if !write_back.settle(baseline) {
        return;
    }
    let mut open = store.is_open();
    let mut current = write_back.cache_latest(&store);
    update_status(&status, |s| s.managed_settled = true);

    // states made while a push is out coalesce into the next one
    loop {
        write_back.push_if_changed(&current).await;
        if !open || changes.next().await.is_none() {
            break;
        }
        open = store.is_open();
        current = write_back.cache_latest(&store);
    }
    tracing::debug!("[WRITE-BACK] stopped for {}", write_back.email);
}

// ==============================================================================
// view handle
// ==============================================================================

/// everything one open view owns
///
/// closing (or dropping) the handle stops the feed, the watchdog and any
/// in-flight snapshot; nothing from this view touches its stores afterwards.
/// a settled write-back task is left to push the final managed state.
pub struct ViewHandle {
    scope: ViewScope,
    writer: ReadingWriter,
    readings: ReadingReader,
    managed: Option<ManagedSide>,
    status: watch::Receiver<ViewStatus>,
    status_tx: StatusTx,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    actions: ActionLog,
    closed: AtomicBool,
}

impl ViewHandle {
    pub fn scope(&self) -> &ViewScope {
        &self.scope
    }

    pub fn readings(&self) -> ReadingReader {
        self.readings.clone()
    }

    /// `None` for rack views
    pub fn managed(&self) -> Option<ManagedSetReader> {
        self.managed.as_ref().map(|m| m.store.reader())
    }

    pub fn status(&self) -> ViewStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ViewStatus> {
        self.status.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn add_containers<S: AsRef<str>>(&self, ids: &[S]) -> bool {
        let changed = self.with_managed(|store| store.add_containers(ids));
        if changed {
            let ids: Vec<&str> = ids.iter().map(|id| id.as_ref()).collect();
            self.record(format!("Added containers {}", ids.join(", ")));
        }
        changed
    }

    pub fn remove_containers<S: AsRef<str>>(&self, ids: &[S]) -> bool {
        let changed = self.with_managed(|store| store.remove_containers(ids));
        if changed {
            let ids: Vec<&str> = ids.iter().map(|id| id.as_ref()).collect();
            self.record(format!("Removed containers {}", ids.join(", ")));
        }
        changed
    }

    pub fn add_rack(&self, container_id: &str, rack_id: &str) -> bool {
        let changed = self.with_managed(|store| store.add_rack(container_id, rack_id));
        if changed {
            self.record(format!("Added rack {} to container {}", rack_id, container_id));
        }
        changed
    }

    pub fn remove_rack(&self, container_id: &str, rack_id: &str) -> bool {
        let changed = self.with_managed(|store| store.remove_rack(container_id, rack_id));
        if changed {
            self.record(format!("Removed rack {} from container {}", rack_id, container_id));
        }
        changed
    }

    fn with_managed(&self, mutate: impl FnOnce(&ManagedSetStore) -> bool) -> bool {
        match &self.managed {
            Some(side) if !self.is_closed() => mutate(&side.store),
            _ => false,
        }
    }

    fn record(&self, message: String) {
        self.actions.record(self.scope.email(), message);
    }

    /// tear the view down; idempotent
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // gate the stores first so nothing lands once close() returns
        self.writer.close();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.abort();
        }
        if let Some(side) = &self.managed {
            side.store.close();
            // a mutation made in the same turn as close still reaches the cache
            side.write_back.cache_latest(&side.store);
            let task = side.task.lock().unwrap_or_else(|e| e.into_inner()).take();
            if !side.write_back.abandon() {
                // nothing goes to the origin before the merge
                if let Some(task) = task {
                    task.abort();
                }
            }
            // once settled, the task pushes the final state and exits on its own
        }
        update_status(&self.status_tx, |s| s.connection = ConnectionStatus::Disconnected);
        tracing::info!("[VIEW] closed {:?}", self.scope);
    }
}

impl Drop for ViewHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_follows_flags() {
        let mut s = ViewStatus::new(true);
        s.refresh();
        assert_eq!(s.phase, ViewPhase::FetchingSnapshot);

        s.snapshot_settled = true;
        s.connection = ConnectionStatus::Connected;
        s.refresh();
        assert_eq!(s.phase, ViewPhase::Subscribed);

        s.managed_settled = true;
        s.refresh();
        assert_eq!(s.phase, ViewPhase::Reconciled);

        // staleness is not a connectivity state
        s.no_new_data = true;
        s.refresh();
        assert_eq!(s.phase, ViewPhase::Reconciled);

        s.connection = ConnectionStatus::Disconnected;
        s.refresh();
        assert_eq!(s.phase, ViewPhase::Disconnected);
    }

    #[test]
    fn rack_views_skip_the_managed_stage() {
        let mut s = ViewStatus::new(false);
        s.snapshot_settled = true;
        s.connection = ConnectionStatus::Connected;
        s.refresh();
        assert_eq!(s.phase, ViewPhase::Reconciled);
    }

    #[test]
    fn status_updates_only_notify_on_change() {
        let (tx, mut rx) = watch::channel(ViewStatus::new(false));
        let tx = Arc::new(tx);
        update_status(&tx, |_| {});
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        update_status(&tx, |_| {});
        assert!(!rx.has_changed().unwrap());
    }
}
