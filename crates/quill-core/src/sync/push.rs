//! Pushing one pending entity to the remote store.
//!
//! Shared by the orchestrator's queue flush and the immediate online write path.

use std::future::Future;
use std::time::Duration;

use crate::models::{
    CreateLabelRequest, CreateNoteRequest, Label, Note, OwnerId, SyncStatus, UpdateLabelRequest,
    UpdateNoteRequest,
};
use crate::remote::{RemoteError, RemoteResult, RemoteStore};
use crate::services::ReplicaService;
use crate::Result;

/// Result of pushing a single entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Remote accepted the pushed version and the local row is synced
    Acknowledged,
    /// Remote accepted it, but the local row changed meanwhile and stays pending
    Superseded,
    /// Left pending for the next cycle
    Failed(RemoteError),
    /// Remote refused the entity; parked until the next local edit
    Rejected(String),
    /// References a label that has not reached the remote store yet
    Deferred,
}

impl PushOutcome {
    #[must_use]
    pub const fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Acknowledged | Self::Superseded)
    }
}

/// Bound a remote call; running out of time is a transient failure
pub(crate) async fn bounded<T>(limit: Duration, call: impl Future<Output = RemoteResult<T>>) -> RemoteResult<T> {
    tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
        Err(RemoteError::Transient(format!(
            "remote call timed out after {}ms",
            limit.as_millis()
        )))
    })
}

/// Push a note according to its sync status.
///
/// Only local storage failures are returned as errors.
pub async fn push_note(
    replica: &ReplicaService,
    remote: &dyn RemoteStore,
    owner: &OwnerId,
    note: &Note,
    timeout: Duration,
) -> Result<PushOutcome> {
    if matches!(
        note.sync_status,
        SyncStatus::PendingCreate | SyncStatus::PendingUpdate
    ) {
        for label_id in &note.label_ids {
            let unsynced = replica
                .get_label(label_id)
                .await?
                .is_some_and(|label| label.sync_status == SyncStatus::PendingCreate);
            if unsynced {
                tracing::debug!(note_id = %note.id, label_id = %label_id, "Deferring note until its label is pushed");
                return Ok(PushOutcome::Deferred);
            }
        }
    }

    let result = match note.sync_status {
        SyncStatus::Synced => return Ok(PushOutcome::Acknowledged),
        SyncStatus::PendingCreate => {
            bounded(timeout, remote.create_note(owner, &CreateNoteRequest::from(note)))
                .await
                .map(drop)
        }
        SyncStatus::PendingUpdate => {
            match bounded(
                timeout,
                remote.update_note(owner, &note.id, &UpdateNoteRequest::from(note)),
            )
            .await
            {
                // Purged remotely; the local edit brings it back
                Err(RemoteError::NotFound(_)) => {
                    tracing::info!(note_id = %note.id, "Recreating note missing from remote store");
                    bounded(timeout, remote.create_note(owner, &CreateNoteRequest::from(note)))
                        .await
                        .map(drop)
                }
                other => other.map(drop),
            }
        }
        SyncStatus::PendingDelete => {
            match bounded(timeout, remote.delete_note(owner, &note.id)).await {
                Err(RemoteError::NotFound(_)) => Ok(()),
                other => other.map(drop),
            }
        }
    };

    match result {
        Ok(()) => {
            if replica.mark_note_synced(&note.id, note.updated_at).await? {
                tracing::debug!(note_id = %note.id, status = %note.sync_status, "Pushed note");
                Ok(PushOutcome::Acknowledged)
            } else {
                tracing::debug!(note_id = %note.id, "Note changed during push; staying pending");
                Ok(PushOutcome::Superseded)
            }
        }
        Err(RemoteError::Rejected(message)) => {
            tracing::warn!(note_id = %note.id, error = %message, "Remote rejected note");
            replica
                .record_note_rejection(&note.id, note.updated_at, &message)
                .await?;
            Ok(PushOutcome::Rejected(message))
        }
        Err(error) => {
            tracing::warn!(note_id = %note.id, error = %error, "Note push failed");
            Ok(PushOutcome::Failed(error))
        }
    }
}

/// Push a label according to its sync status.
pub async fn push_label(
    replica: &ReplicaService,
    remote: &dyn RemoteStore,
    owner: &OwnerId,
    label: &Label,
    timeout: Duration,
) -> Result<PushOutcome> {
    let result = match label.sync_status {
        SyncStatus::Synced => return Ok(PushOutcome::Acknowledged),
        SyncStatus::PendingCreate => {
            bounded(timeout, remote.create_label(owner, &CreateLabelRequest::from(label)))
                .await
                .map(drop)
        }
        SyncStatus::PendingUpdate => {
            match bounded(
                timeout,
                remote.update_label(owner, &label.id, &UpdateLabelRequest::from(label)),
            )
            .await
            {
                Err(RemoteError::NotFound(_)) => Err(RemoteError::Rejected(
                    "label was deleted on another device".to_string(),
                )),
                other => other.map(drop),
            }
        }
        SyncStatus::PendingDelete => {
            match bounded(timeout, remote.delete_label(owner, &label.id)).await {
                Err(RemoteError::NotFound(_)) => Ok(()),
                other => other.map(drop),
            }
        }
    };

    match result {
        Ok(()) => {
            if replica.mark_label_synced(&label.id, label.updated_at).await? {
                tracing::debug!(label_id = %label.id, status = %label.sync_status, "Pushed label");
                Ok(PushOutcome::Acknowledged)
            } else {
                Ok(PushOutcome::Superseded)
            }
        }
        Err(RemoteError::Rejected(message)) => {
            tracing::warn!(label_id = %label.id, error = %message, "Remote rejected label");
            replica
                .record_label_rejection(&label.id, label.updated_at, &message)
                .await?;
            Ok(PushOutcome::Rejected(message))
        }
        Err(error) => {
            tracing::warn!(label_id = %label.id, error = %error, "Label push failed");
            Ok(PushOutcome::Failed(error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::AuthorityStore;
    use crate::models::{LabelDraft, NoteDraft, NotePatch};
    use crate::remote::EmbeddedRemote;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn owner() -> OwnerId {
        OwnerId::new("user-1")
    }

    fn draft(body: &str) -> NoteDraft {
        NoteDraft {
            title: None,
            body: Some(body.to_string()),
            label_ids: Vec::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_remote_call_becomes_transient() {
        let stalled = bounded(
            Duration::from_millis(250),
            std::future::pending::<RemoteResult<()>>(),
        )
        .await;
        let Err(error) = stalled else {
            panic!("a stalled call should time out");
        };
        assert!(matches!(error, RemoteError::Transient(ref message) if message.contains("250ms")));
        assert!(error.is_retryable());

        let answered = bounded(TIMEOUT, async { Ok::<_, RemoteError>(7) }).await;
        assert!(matches!(answered, Ok(7)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_then_update_then_delete() {
        let replica = ReplicaService::open_in_memory().unwrap();
        let remote = EmbeddedRemote::new(AuthorityStore::open_in_memory().unwrap());

        let note = replica.create_note(&owner(), draft("first")).await.unwrap();
        let outcome = push_note(&replica, &remote, &owner(), &note, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(outcome, PushOutcome::Acknowledged);

        let edited = replica
            .update_note(
                &note.id,
                &NotePatch {
                    body: Some("second".to_string()),
                    ..NotePatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.sync_status, SyncStatus::PendingUpdate);
        push_note(&replica, &remote, &owner(), &edited, TIMEOUT)
            .await
            .unwrap();
        let stored = remote.get_note(&owner(), &note.id).await.unwrap();
        assert_eq!(stored.body.as_deref(), Some("second"));

        let crate::db::DeleteOutcome::Tombstoned(tombstone) =
            replica.delete_note(&note.id).await.unwrap()
        else {
            panic!("synced note should leave a tombstone");
        };
        push_note(&replica, &remote, &owner(), &tombstone, TIMEOUT)
            .await
            .unwrap();
        assert!(remote.get_note(&owner(), &note.id).await.unwrap().is_deleted);
        let local = replica.get_note(&note.id).await.unwrap().unwrap();
        assert_eq!(local.sync_status, SyncStatus::Synced);
        assert!(local.is_deleted);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn notes_wait_for_their_labels() {
        let replica = ReplicaService::open_in_memory().unwrap();
        let remote = EmbeddedRemote::new(AuthorityStore::open_in_memory().unwrap());
        let label = replica
            .create_label(
                &owner(),
                LabelDraft {
                    name: "Work".to_string(),
                    color: None,
                },
            )
            .await
            .unwrap();
        let note = replica
            .create_note(
                &owner(),
                NoteDraft {
                    label_ids: vec![label.id],
                    ..draft("report")
                },
            )
            .await
            .unwrap();

        let outcome = push_note(&replica, &remote, &owner(), &note, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(outcome, PushOutcome::Deferred);

        push_label(&replica, &remote, &owner(), &label, TIMEOUT)
            .await
            .unwrap();
        let outcome = push_note(&replica, &remote, &owner(), &note, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(outcome, PushOutcome::Acknowledged);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tombstone_is_not_held_back_by_an_unpushed_label() {
        let replica = ReplicaService::open_in_memory().unwrap();
        let remote = EmbeddedRemote::new(AuthorityStore::open_in_memory().unwrap());
        let note = replica.create_note(&owner(), draft("errands")).await.unwrap();
        push_note(&replica, &remote, &owner(), &note, TIMEOUT)
            .await
            .unwrap();

        let label = replica
            .create_label(
                &owner(),
                LabelDraft {
                    name: "Someday".to_string(),
                    color: None,
                },
            )
            .await
            .unwrap();
        replica
            .update_note(
                &note.id,
                &NotePatch {
                    label_ids: Some(vec![label.id]),
                    ..NotePatch::default()
                },
            )
            .await
            .unwrap();
        let crate::db::DeleteOutcome::Tombstoned(tombstone) =
            replica.delete_note(&note.id).await.unwrap()
        else {
            panic!("synced note should leave a tombstone");
        };
        assert_eq!(tombstone.label_ids, vec![label.id]);

        let outcome = push_note(&replica, &remote, &owner(), &tombstone, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(outcome, PushOutcome::Acknowledged);
        assert!(remote.get_note(&owner(), &note.id).await.unwrap().is_deleted);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_label_name_is_parked() {
        let replica = ReplicaService::open_in_memory().unwrap();
        let remote = EmbeddedRemote::new(AuthorityStore::open_in_memory().unwrap());
        remote
            .create_label(
                &owner(),
                &CreateLabelRequest {
                    id: None,
                    name: "Work".to_string(),
                    color: None,
                },
            )
            .await
            .unwrap();
        let label = replica
            .create_label(
                &owner(),
                LabelDraft {
                    name: "work".to_string(),
                    color: None,
                },
            )
            .await
            .unwrap();

        let outcome = push_label(&replica, &remote, &owner(), &label, TIMEOUT)
            .await
            .unwrap();
        assert!(matches!(outcome, PushOutcome::Rejected(_)));
        assert!(replica.pending_labels(&owner()).await.unwrap().is_empty());
        assert_eq!(replica.rejected_labels(&owner()).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deleting_a_note_missing_remotely_counts_as_pushed() {
        let replica = ReplicaService::open_in_memory().unwrap();
        let remote = EmbeddedRemote::new(AuthorityStore::open_in_memory().unwrap());
        let note = replica.create_note(&owner(), draft("gone")).await.unwrap();
        push_note(&replica, &remote, &owner(), &note, TIMEOUT)
            .await
            .unwrap();
        remote
            .store()
            .lock()
            .await
            .purge_note(&owner(), &note.id)
            .unwrap();

        let crate::db::DeleteOutcome::Tombstoned(tombstone) =
            replica.delete_note(&note.id).await.unwrap()
        else {
            panic!("synced note should leave a tombstone");
        };
        let outcome = push_note(&replica, &remote, &owner(), &tombstone, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(outcome, PushOutcome::Acknowledged);
    }
}
