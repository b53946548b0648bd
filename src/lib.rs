//! ==============================================================================
//! rackwatch - live telemetry reconciliation for storage containers and racks
//! ==============================================================================
//!
//! keeps a view's picture of its containers current from two unordered
//! sources (a one-shot snapshot and a push feed), flags when the feed goes
//! quiet, and keeps the acting identity's managed containers/racks in step
//! between a local cache and the origin.
//!
//! modules:
//!     - domain: SensorReading, ViewScope, wire decoding
//!     - store: ReadingStore, ManagedSetStore (+ reader handles)
//!     - actor: ActorContext, ActionLog
//!     - cache: LocalCache (file / memory)
//!     - remote: TelemetryBackend, HttpBackend, PushFeed
//!     - reconciler: Reconciler, ViewHandle, ViewStatus
//!     - conditions: suggested storage conditions
//!     - config: rackwatch.toml
//!     - api: json api for the host binary
//!
//! ==============================================================================

pub mod actor;
pub mod api;
pub mod cache;
pub mod conditions;
pub mod config;
pub mod domain;
pub mod error;
pub mod reconciler;
pub mod remote;
pub mod store;

pub use actor::{ActionLog, ActorContext, ActorIdentity, ActorRole};
pub use cache::{FileCache, LocalCache, MemoryCache};
pub use domain::{ReadingKey, SensorReading, SpoilageStatus, Tone, ViewScope};
pub use error::SyncError;
pub use reconciler::{
    ConnectionStatus, Reconciler, ReconcilerSettings, ViewHandle, ViewPhase, ViewStatus,
};
pub use remote::{FeedTransport, HttpBackend, PushFeed, TelemetryBackend};
pub use store::managed::{merge, ManagedSet, RackListPolicy};
