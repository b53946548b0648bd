//! ==============================================================================
//! error.rs - library error type
//! ==============================================================================
//!
//! purpose:
//!     one error enum for everything that crosses a remote or disk boundary.
//!     the reconciler never hands these to readers; it logs them and keeps
//!     the last-known-good state.
//!
//! ==============================================================================

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// request never produced a response (connect, timeout, body read)
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// push-feed socket failed to open
    #[error("feed socket failure: {0}")]
    Feed(Box<tokio_tungstenite::tungstenite::Error>),

    /// origin answered with a non-success code
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },

    /// payload was not the shape we expected
    #[error("could not decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache i/o at {path}: {source}")]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache blob at {path} is corrupt: {source}")]
    CacheFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no acting identity selected")]
    NoActor,
}

pub type Result<T> = std::result::Result<T, SyncError>;
