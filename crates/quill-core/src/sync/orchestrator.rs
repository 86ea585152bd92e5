//! One sync run: pull, merge, push, cursor advance

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use super::push::{bounded, push_label, push_note, PushOutcome};
use crate::clock::{Clock, SystemClock};
use crate::config::SyncSettings;
use crate::error::{Error, Result};
use crate::models::{ChangeSet, OwnerId, SyncCursor, SyncScope};
use crate::remote::RemoteStore;
use crate::services::ReplicaService;

/// Overall result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Pulled and pushed everything
    Success,
    /// Pulled, but some pending entities are still pending
    Partial,
    /// Could not reach the remote store; nothing changed locally
    Failure,
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failure => "failure",
        })
    }
}

/// An entity left pending by a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushFailure {
    /// `note` or `label`
    pub kind: &'static str,
    pub id: String,
    pub message: String,
}

/// What a run did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub owner: OwnerId,
    pub scope: SyncScope,
    pub outcome: SyncOutcome,
    /// Run start (Unix ms); becomes the scope's last-sync time
    pub started_at: i64,
    pub pulled_labels: usize,
    pub pulled_notes: usize,
    /// Pulled records skipped because the local row had unpushed edits
    pub kept_pending: usize,
    pub pushed: usize,
    /// Notes held back until their labels reach the remote store
    pub deferred: usize,
    pub failures: Vec<PushFailure>,
    pub rejections: Vec<PushFailure>,
    /// Cursor written at the end of the run; `None` when the run failed
    pub cursor: Option<SyncCursor>,
    /// Why the run failed, when it did
    pub error: Option<String>,
}

impl SyncReport {
    pub(crate) fn new(owner: &OwnerId, scope: SyncScope, started_at: i64) -> Self {
        Self {
            owner: owner.clone(),
            scope,
            outcome: SyncOutcome::Success,
            started_at,
            pulled_labels: 0,
            pulled_notes: 0,
            kept_pending: 0,
            pushed: 0,
            deferred: 0,
            failures: Vec::new(),
            rejections: Vec::new(),
            cursor: None,
            error: None,
        }
    }

    fn record(&mut self, kind: &'static str, id: String, outcome: PushOutcome) {
        match outcome {
            PushOutcome::Acknowledged | PushOutcome::Superseded => self.pushed += 1,
            PushOutcome::Deferred => self.deferred += 1,
            PushOutcome::Failed(error) => self.failures.push(PushFailure {
                kind,
                id,
                message: error.to_string(),
            }),
            PushOutcome::Rejected(message) => {
                self.rejections.push(PushFailure { kind, id, message });
            }
        }
    }

    /// Nothing was left pending by this run
    const fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.rejections.is_empty() && self.deferred == 0
    }
}

/// Drives sync runs against one remote store, at most one per owner at a time
#[derive(Clone)]
pub struct SyncOrchestrator {
    replica: ReplicaService,
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
    in_flight: Arc<Mutex<HashSet<OwnerId>>>,
}

/// Releases the per-owner run slot when dropped
struct RunGuard {
    owner: OwnerId,
    in_flight: Arc<Mutex<HashSet<OwnerId>>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.owner);
    }
}

impl SyncOrchestrator {
    pub fn new(replica: ReplicaService, remote: Arc<dyn RemoteStore>, settings: SyncSettings) -> Self {
        Self {
            replica,
            remote,
            clock: Arc::new(SystemClock),
            settings,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Replace the clock used for run-start times
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub const fn replica(&self) -> &ReplicaService {
        &self.replica
    }

    #[must_use]
    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Whether a run for `owner` is in flight
    #[must_use]
    pub fn is_running(&self, owner: &OwnerId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(owner)
    }

    fn claim(&self, owner: &OwnerId) -> Result<RunGuard> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(owner.clone()) {
            return Err(Error::SyncInProgress(owner.clone()));
        }
        Ok(RunGuard {
            owner: owner.clone(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Sync everything the owner has
    pub async fn run_sync(&self, owner: &OwnerId) -> Result<SyncReport> {
        self.run_sync_scope(owner, SyncScope::Global).await
    }

    /// Pull one scope, push the whole pending queue, advance that scope's cursor.
    ///
    /// Fails with [`Error::SyncInProgress`] while another run for the owner is active,
    /// and with storage errors; remote failures are reported in the [`SyncReport`].
    pub async fn run_sync_scope(&self, owner: &OwnerId, scope: SyncScope) -> Result<SyncReport> {
        let _guard = self.claim(owner)?;
        let started_at = self.clock.now_millis();
        let mut report = SyncReport::new(owner, scope, started_at);
        tracing::info!(owner = %owner, scope = %scope, started_at, "Sync run started");

        // Pull
        let cursor = self.replica.cursor(owner, &scope).await?;
        let since = cursor.and_then(|cursor| cursor.last_change_at);
        let limit = self.settings.call_timeout;
        let pulled = match since {
            None => bounded(limit, self.remote.full_snapshot(owner, &scope)).await,
            Some(since) => bounded(limit, self.remote.changes_since(owner, &scope, since)).await,
        };
        let changes: ChangeSet = match pulled {
            Ok(changes) => changes,
            Err(error) => {
                tracing::warn!(owner = %owner, scope = %scope, error = %error, "Pull failed; run aborted");
                report.outcome = SyncOutcome::Failure;
                report.error = Some(error.to_string());
                return Ok(report);
            }
        };
        tracing::debug!(
            owner = %owner,
            since = ?since,
            labels = changes.labels.len(),
            notes = changes.notes.len(),
            cursor = changes.cursor,
            "Pulled changes"
        );

        // Merge
        let applied = self
            .replica
            .apply_change_set(owner, &changes, self.settings.pull_policy)
            .await?;
        report.pulled_labels = applied.labels_applied;
        report.pulled_notes = applied.notes_applied;
        report.kept_pending = applied.kept_pending;

        // Push: labels first, notes may reference them
        for label in self.replica.pending_labels(owner).await? {
            let outcome = push_label(
                &self.replica,
                self.remote.as_ref(),
                owner,
                &label,
                self.settings.call_timeout,
            )
            .await?;
            report.record("label", label.id.to_string(), outcome);
        }
        for note in self.replica.pending_notes(owner).await? {
            let outcome = push_note(
                &self.replica,
                self.remote.as_ref(),
                owner,
                &note,
                self.settings.call_timeout,
            )
            .await?;
            report.record("note", note.id.to_string(), outcome);
        }

        // Cursor advance
        let cursor = self
            .replica
            .advance_cursor(owner, &scope, Some(changes.cursor), started_at)
            .await?;
        report.cursor = Some(cursor);
        report.outcome = if report.is_clean() {
            SyncOutcome::Success
        } else {
            SyncOutcome::Partial
        };

        tracing::info!(
            owner = %owner,
            scope = %scope,
            outcome = %report.outcome,
            pulled_notes = report.pulled_notes,
            pulled_labels = report.pulled_labels,
            pushed = report.pushed,
            failed = report.failures.len(),
            rejected = report.rejections.len(),
            deferred = report.deferred,
            "Sync run finished"
        );
        Ok(report)
    }
}
