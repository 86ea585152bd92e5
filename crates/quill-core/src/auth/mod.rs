//! Caller identity handed to the remote client.
//!
//! The engine never validates credentials; it only forwards the bearer token.

use std::fmt;
use std::sync::{Arc, RwLock};

use crate::models::OwnerId;

/// Owner plus the opaque bearer credential used for remote calls
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub owner: OwnerId,
    access_token: String,
}

impl Identity {
    #[must_use]
    pub fn new(owner: OwnerId, access_token: impl Into<String>) -> Self {
        Self {
            owner,
            access_token: access_token.into(),
        }
    }

    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Identity")
            .field("owner", &self.owner)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Identity shared between the remote client and whoever refreshes tokens
#[derive(Clone, Debug)]
pub struct SharedIdentity(Arc<RwLock<Identity>>);

impl SharedIdentity {
    #[must_use]
    pub fn new(identity: Identity) -> Self {
        Self(Arc::new(RwLock::new(identity)))
    }

    #[must_use]
    pub fn owner(&self) -> OwnerId {
        self.snapshot().owner
    }

    /// Current bearer token
    #[must_use]
    pub fn bearer(&self) -> String {
        self.snapshot().access_token
    }

    /// Swap in a refreshed token; later requests use it
    pub fn replace_token(&self, access_token: impl Into<String>) {
        let mut guard = self
            .0
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.access_token = access_token.into();
    }

    fn snapshot(&self) -> Identity {
        self.0
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}
