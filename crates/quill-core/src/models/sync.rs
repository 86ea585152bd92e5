//! Sync bookkeeping models: owners, statuses, scopes, and cursors

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::LabelId;

/// Opaque identity of the user owning notes and labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for OwnerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Replication state of a locally stored entity.
///
/// An entity that the remote store has acknowledged once never returns to
/// `PendingCreate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Synced,
    PendingCreate,
    PendingUpdate,
    PendingDelete,
}

/// What a local delete does to a row, decided by its current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteTransition {
    /// Never reached the remote store; drop the row entirely.
    Purge,
    /// Keep a tombstone and queue the delete.
    Tombstone,
}

impl SyncStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::PendingCreate => "pending_create",
            Self::PendingUpdate => "pending_update",
            Self::PendingDelete => "pending_delete",
        }
    }

    /// Whether the entity has local changes the remote store has not seen.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        !matches!(self, Self::Synced)
    }

    /// Status after a local edit that has not been acknowledged remotely.
    ///
    /// Edits to a never-pushed entity collapse into its pending create.
    #[must_use]
    pub const fn after_local_update(self) -> Self {
        match self {
            Self::PendingCreate => Self::PendingCreate,
            Self::Synced | Self::PendingUpdate | Self::PendingDelete => Self::PendingUpdate,
        }
    }

    #[must_use]
    pub const fn on_delete(self) -> DeleteTransition {
        match self {
            Self::PendingCreate => DeleteTransition::Purge,
            Self::Synced | Self::PendingUpdate | Self::PendingDelete => DeleteTransition::Tombstone,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(Self::Synced),
            "pending_create" => Ok(Self::PendingCreate),
            "pending_update" => Ok(Self::PendingUpdate),
            "pending_delete" => Ok(Self::PendingDelete),
            other => Err(format!("unknown sync status '{other}'")),
        }
    }
}

/// Partition of the change feed a cursor tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncScope {
    #[default]
    Global,
    Label(LabelId),
}

impl SyncScope {
    /// Stable key used to persist the scope, `global` or `label:<uuid>`.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Global => "global".to_string(),
            Self::Label(id) => format!("label:{id}"),
        }
    }

    #[must_use]
    pub const fn label_id(&self) -> Option<LabelId> {
        match self {
            Self::Global => None,
            Self::Label(id) => Some(*id),
        }
    }
}

impl From<Option<LabelId>> for SyncScope {
    fn from(value: Option<LabelId>) -> Self {
        value.map_or(Self::Global, Self::Label)
    }
}

impl fmt::Display for SyncScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl FromStr for SyncScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "global" {
            return Ok(Self::Global);
        }
        let Some(raw) = s.strip_prefix("label:") else {
            return Err(format!("unknown sync scope '{s}'"));
        };
        raw.parse()
            .map(Self::Label)
            .map_err(|error| format!("invalid label scope '{s}': {error}"))
    }
}

impl Serialize for SyncScope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key())
    }
}

impl<'de> Deserialize<'de> for SyncScope {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Local position in the change feed for one (owner, scope).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub owner: OwnerId,
    pub scope: SyncScope,
    /// Newest remote modification time seen in a pulled change set (Unix ms)
    pub last_change_at: Option<i64>,
    /// Start time of the last completed sync run (Unix ms)
    pub last_synced_at: Option<i64>,
}

impl SyncCursor {
    /// A cursor that has never been advanced.
    #[must_use]
    pub const fn empty(owner: OwnerId, scope: SyncScope) -> Self {
        Self {
            owner,
            scope,
            last_change_at: None,
            last_synced_at: None,
        }
    }
}
