//! ==============================================================================
//! actor.rs - who is acting right now
//! ==============================================================================
//!
//! purpose:
//!     a single last-write-wins slot naming the acting identity (the account
//!     owner, or a member acting on an owner's behalf). every managed-set
//!     call the reconciler makes is scoped by the identity's email.
//!
//!     also carries the per-identity action log that dashboard mutations
//!     append to.
//!
//! relationships:
//!     - read by: reconciler.rs (scope for remote calls)
//!     - written by: main.rs (account selection)
//!
//! ==============================================================================

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::cache::LocalCache;
use crate::error::{Result, SyncError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Owner,
    #[serde(alias = "delegated", alias = "delegatedmember")]
    Member,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorIdentity {
    pub role: ActorRole,
    pub display_name: String,
    pub email: String,
}

impl ActorIdentity {
    pub fn owner(email: impl Into<String>) -> Self {
        let email = email.into();
        Self {
            role: ActorRole::Owner,
            display_name: email.clone(),
            email,
        }
    }

    pub fn member(display_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            role: ActorRole::Member,
            display_name: display_name.into(),
            email: email.into(),
        }
    }
}

/// shared slot holding the acting identity
///
/// no history and no authorization check: whoever wrote last is acting.
#[derive(Clone, Debug, Default)]
pub struct ActorContext {
    slot: Arc<RwLock<Option<ActorIdentity>>>,
}

impl ActorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_actor(&self, identity: ActorIdentity) {
        tracing::info!(
            "[ACTOR] acting as {} <{}> ({:?})",
            identity.display_name,
            identity.email,
            identity.role
        );
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = Some(identity);
    }

    /// switch accounts: the previous identity's cached managed set is dropped
    pub fn select(&self, identity: ActorIdentity, cache: &dyn LocalCache) {
        if let Err(e) = cache.clear() {
            tracing::warn!("[ACTOR] could not clear managed-set cache: {}", e);
        }
        self.set_actor(identity);
    }

    pub fn get_actor(&self) -> Option<ActorIdentity> {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn require_actor(&self) -> Result<ActorIdentity> {
        self.get_actor().ok_or(SyncError::NoActor)
    }
}

// ==============================================================================
// action log
// ==============================================================================

/// per-identity list of what was done, oldest first
#[derive(Clone, Debug, Default)]
pub struct ActionLog {
    entries: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, email: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("[ACTION] {}: {}", email, message);
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(email.to_string())
            .or_default()
            .push(message);
    }

    pub fn entries(&self, email: &str) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(email)
            .cloned()
            .unwrap_or_default()
    }
}
