//! Change feed: "everything changed after T" per owner and scope

use std::collections::BTreeSet;

use rusqlite::params;

use super::{AuthorityError, AuthorityResult, AuthorityStore, LABEL_COLUMNS, NOTE_COLUMNS};
use crate::models::{ChangeSet, LabelId, LabelRecord, NoteRecord, OwnerId, SyncScope};

impl AuthorityStore {
    /// Entities of `scope` modified strictly after `since`, tombstones included,
    /// ascending by modification time.
    pub fn changes_since(
        &self,
        owner: &OwnerId,
        scope: &SyncScope,
        since: i64,
    ) -> AuthorityResult<ChangeSet> {
        let (labels, notes) = match scope {
            SyncScope::Global => {
                let labels = self.query_labels(
                    &format!(
                        "SELECT {LABEL_COLUMNS} FROM labels
                         WHERE owner_id = ? AND updated_at > ?
                         ORDER BY updated_at ASC, id ASC"
                    ),
                    params![owner.as_str(), since],
                )?;
                let notes = self.query_notes(
                    &format!(
                        "SELECT {NOTE_COLUMNS} FROM notes
                         WHERE owner_id = ? AND updated_at > ?
                         ORDER BY updated_at ASC, id ASC"
                    ),
                    params![owner.as_str(), since],
                )?;
                (labels, notes)
            }
            SyncScope::Label(label_id) => {
                let scope_label = self.require_label(owner, label_id)?;
                let notes = self.query_notes(
                    &format!(
                        "SELECT {NOTE_COLUMNS} FROM notes n
                         WHERE n.owner_id = ? AND n.updated_at > ?
                           AND EXISTS (SELECT 1 FROM note_labels nl
                                       WHERE nl.note_id = n.id AND nl.label_id = ?)
                         ORDER BY n.updated_at ASC, n.id ASC"
                    ),
                    params![owner.as_str(), since, label_id.as_str()],
                )?;
                let include_scope_label = scope_label.updated_at > since;
                let labels = self.labels_for(owner, &notes, include_scope_label.then_some(scope_label))?;
                (labels, notes)
            }
        };

        let cursor = labels
            .iter()
            .map(|label| label.updated_at)
            .chain(notes.iter().map(|note| note.updated_at))
            .max()
            .unwrap_or(since)
            .max(since);

        tracing::debug!(
            owner = %owner,
            scope = %scope,
            since,
            labels = labels.len(),
            notes = notes.len(),
            "Served change feed"
        );
        Ok(ChangeSet {
            scope: *scope,
            labels,
            notes,
            cursor,
        })
    }

    /// Every live entity of `scope`, for a device that has never synced it
    pub fn full_snapshot(&self, owner: &OwnerId, scope: &SyncScope) -> AuthorityResult<ChangeSet> {
        let (labels, notes) = match scope {
            SyncScope::Global => {
                let labels = self.query_labels(
                    &format!(
                        "SELECT {LABEL_COLUMNS} FROM labels
                         WHERE owner_id = ? AND is_deleted = 0
                         ORDER BY updated_at ASC, id ASC"
                    ),
                    params![owner.as_str()],
                )?;
                let notes = self.query_notes(
                    &format!(
                        "SELECT {NOTE_COLUMNS} FROM notes
                         WHERE owner_id = ? AND is_deleted = 0
                         ORDER BY updated_at ASC, id ASC"
                    ),
                    params![owner.as_str()],
                )?;
                (labels, notes)
            }
            SyncScope::Label(label_id) => {
                let scope_label = self.require_label(owner, label_id)?;
                let notes = self.query_notes(
                    &format!(
                        "SELECT {NOTE_COLUMNS} FROM notes n
                         WHERE n.owner_id = ? AND n.is_deleted = 0
                           AND EXISTS (SELECT 1 FROM note_labels nl
                                       WHERE nl.note_id = n.id AND nl.label_id = ?)
                         ORDER BY n.updated_at ASC, n.id ASC"
                    ),
                    params![owner.as_str(), label_id.as_str()],
                )?;
                let scope_label = (!scope_label.is_deleted).then_some(scope_label);
                let labels = self.labels_for(owner, &notes, scope_label)?;
                (labels, notes)
            }
        };

        let cursor = self.current_cursor(owner, scope)?;
        tracing::debug!(
            owner = %owner,
            scope = %scope,
            labels = labels.len(),
            notes = notes.len(),
            "Served full snapshot"
        );
        Ok(ChangeSet {
            scope: *scope,
            labels,
            notes,
            cursor,
        })
    }

    /// Newest modification time in `scope`.
    ///
    /// Stored per (owner, scope) on first read and only ever moved forward.
    pub fn current_cursor(&self, owner: &OwnerId, scope: &SyncScope) -> AuthorityResult<i64> {
        let latest: i64 = match scope {
            SyncScope::Global => self.conn.query_row(
                "SELECT MAX(
                    COALESCE((SELECT MAX(updated_at) FROM labels WHERE owner_id = ?1), 0),
                    COALESCE((SELECT MAX(updated_at) FROM notes WHERE owner_id = ?1), 0))",
                params![owner.as_str()],
                |row| row.get(0),
            )?,
            SyncScope::Label(label_id) => {
                let scope_label = self.require_label(owner, label_id)?;
                let notes_latest: Option<i64> = self.conn.query_row(
                    "SELECT MAX(n.updated_at) FROM notes n
                     JOIN note_labels nl ON nl.note_id = n.id
                     WHERE n.owner_id = ? AND nl.label_id = ?",
                    params![owner.as_str(), label_id.as_str()],
                    |row| row.get(0),
                )?;
                notes_latest.unwrap_or(0).max(scope_label.updated_at)
            }
        };

        self.conn.execute(
            "INSERT INTO feed_cursors (owner_id, scope, last_change_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(owner_id, scope) DO UPDATE SET
                last_change_at = MAX(feed_cursors.last_change_at, excluded.last_change_at)",
            params![owner.as_str(), scope.key(), latest],
        )?;
        let stored = self.conn.query_row(
            "SELECT last_change_at FROM feed_cursors WHERE owner_id = ? AND scope = ?",
            params![owner.as_str(), scope.key()],
            |row| row.get(0),
        )?;
        Ok(stored)
    }

    /// Labels referenced by `notes` plus the scope label, ascending by modification time
    fn labels_for(
        &self,
        owner: &OwnerId,
        notes: &[NoteRecord],
        scope_label: Option<LabelRecord>,
    ) -> AuthorityResult<Vec<LabelRecord>> {
        let referenced: BTreeSet<LabelId> = notes
            .iter()
            .flat_map(|note| note.label_ids.iter().copied())
            .collect();

        let mut labels = Vec::with_capacity(referenced.len() + 1);
        let scope_id = scope_label.as_ref().map(|label| label.id);
        if let Some(label) = scope_label {
            labels.push(label);
        }
        for label_id in referenced {
            if Some(label_id) == scope_id {
                continue;
            }
            match self.require_label(owner, &label_id) {
                Ok(label) => labels.push(label),
                Err(AuthorityError::NotFound(_)) => {
                    tracing::warn!(label_id = %label_id, "Linked label vanished while serving feed");
                }
                Err(error) => return Err(error),
            }
        }
        labels.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{CreateLabelRequest, CreateNoteRequest, NoteId};
    use pretty_assertions::assert_eq;

    fn owner() -> OwnerId {
        OwnerId::new("user-1")
    }

    fn note(store: &AuthorityStore, body: &str, labels: Vec<LabelId>) -> NoteRecord {
        store
            .create_note(
                &owner(),
                CreateNoteRequest {
                    id: Some(NoteId::new()),
                    title: None,
                    body: Some(body.to_string()),
                    label_ids: labels,
                },
            )
            .unwrap()
    }

    fn label(store: &AuthorityStore, name: &str) -> LabelRecord {
        store
            .create_label(
                &owner(),
                CreateLabelRequest {
                    id: None,
                    name: name.to_string(),
                    color: None,
                },
            )
            .unwrap()
    }

    #[test]
    fn changes_are_strictly_after_since_and_ascending() {
        let clock = Arc::new(ManualClock::new(100));
        let store = AuthorityStore::open_in_memory()
            .unwrap()
            .with_clock(clock.clone());
        let first = note(&store, "first", Vec::new());
        clock.set(200);
        let second = note(&store, "second", Vec::new());
        clock.set(300);
        let third = note(&store, "third", Vec::new());

        let changes = store
            .changes_since(&owner(), &SyncScope::Global, 200)
            .unwrap();
        let ids: Vec<_> = changes.notes.iter().map(|note| note.id).collect();
        assert_eq!(ids, vec![third.id]);
        assert_eq!(changes.cursor, 300);

        let all = store.changes_since(&owner(), &SyncScope::Global, 0).unwrap();
        let ids: Vec<_> = all.notes.iter().map(|note| note.id).collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
    }

    #[test]
    fn write_in_the_same_millisecond_as_a_read_is_still_delivered() {
        let clock = Arc::new(ManualClock::new(100));
        let store = AuthorityStore::open_in_memory()
            .unwrap()
            .with_clock(clock.clone());
        note(&store, "first", Vec::new());
        let first = store.changes_since(&owner(), &SyncScope::Global, 0).unwrap();
        assert_eq!(first.cursor, 100);

        let late = note(&store, "same tick", Vec::new());
        assert!(late.updated_at > first.cursor);
        let second = store
            .changes_since(&owner(), &SyncScope::Global, first.cursor)
            .unwrap();
        let ids: Vec<_> = second.notes.iter().map(|note| note.id).collect();
        assert_eq!(ids, vec![late.id]);
    }

    #[test]
    fn write_after_purge_lands_above_the_stored_cursor() {
        let clock = Arc::new(ManualClock::new(500));
        let store = AuthorityStore::open_in_memory()
            .unwrap()
            .with_clock(clock.clone());
        let doomed = note(&store, "short lived", Vec::new());
        let cursor = store.current_cursor(&owner(), &SyncScope::Global).unwrap();
        store.purge_note(&owner(), &doomed.id).unwrap();
        clock.set(10);

        let fresh = note(&store, "after purge", Vec::new());
        let changes = store
            .changes_since(&owner(), &SyncScope::Global, cursor)
            .unwrap();
        assert_eq!(changes.notes.len(), 1);
        assert_eq!(changes.notes[0].id, fresh.id);
    }

    #[test]
    fn tombstones_are_in_the_feed_but_not_the_snapshot() {
        let clock = Arc::new(ManualClock::new(100));
        let store = AuthorityStore::open_in_memory()
            .unwrap()
            .with_clock(clock.clone());
        let doomed = note(&store, "doomed", Vec::new());
        clock.set(200);
        store.delete_note(&owner(), &doomed.id).unwrap();

        let changes = store
            .changes_since(&owner(), &SyncScope::Global, 100)
            .unwrap();
        assert_eq!(changes.notes.len(), 1);
        assert!(changes.notes[0].is_deleted);

        let snapshot = store.full_snapshot(&owner(), &SyncScope::Global).unwrap();
        assert!(snapshot.notes.is_empty());
        assert_eq!(snapshot.cursor, 200);
    }

    #[test]
    fn label_scope_carries_referenced_labels() {
        let store = AuthorityStore::open_in_memory().unwrap();
        let work = label(&store, "Work");
        let urgent = label(&store, "Urgent");
        let tagged = note(&store, "report", vec![work.id, urgent.id]);
        note(&store, "unrelated", Vec::new());

        let scope = SyncScope::Label(work.id);
        let changes = store.changes_since(&owner(), &scope, 0).unwrap();
        assert_eq!(changes.notes.len(), 1);
        assert_eq!(changes.notes[0].id, tagged.id);
        let mut label_ids: Vec<_> = changes.labels.iter().map(|label| label.id).collect();
        label_ids.sort();
        let mut expected = vec![work.id, urgent.id];
        expected.sort();
        assert_eq!(label_ids, expected);

        let snapshot = store.full_snapshot(&owner(), &scope).unwrap();
        assert_eq!(snapshot.notes.len(), 1);
    }

    #[test]
    fn unknown_label_scope_is_not_found() {
        let store = AuthorityStore::open_in_memory().unwrap();
        let result = store.changes_since(&owner(), &SyncScope::Label(LabelId::new()), 0);
        assert!(matches!(result, Err(AuthorityError::NotFound(_))));
    }

    #[test]
    fn current_cursor_never_moves_backwards() {
        let clock = Arc::new(ManualClock::new(500));
        let store = AuthorityStore::open_in_memory()
            .unwrap()
            .with_clock(clock.clone());
        assert_eq!(store.current_cursor(&owner(), &SyncScope::Global).unwrap(), 0);

        let doomed = note(&store, "short lived", Vec::new());
        assert_eq!(
            store.current_cursor(&owner(), &SyncScope::Global).unwrap(),
            500
        );

        // Purging the newest note lowers MAX(updated_at), but not the stored cursor
        store.purge_note(&owner(), &doomed.id).unwrap();
        assert_eq!(
            store.current_cursor(&owner(), &SyncScope::Global).unwrap(),
            500
        );
    }
}
