use std::collections::HashMap;

use quill_core::models::{NoteDraft, NoteQuery, SyncScope};
use quill_core::sync::{PushFailure, SyncOutcome, SyncReport};
use quill_core::{Note, OwnerId, SyncStatus};
use tempfile::TempDir;

use crate::commands::common::{
    format_note_lines, format_relative_time, label_names, normalize_note_identifier,
    normalize_search_query, note_preview, resolve_labels, sync_marker, Session, LOCAL_OWNER,
};
use crate::commands::config::{apply_profile_init, ProfileInit};
use crate::commands::note::{run_add, run_delete, run_edit, run_restore};
use crate::commands::sync::{format_report_lines, run_sync, run_sync_status};
use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;

fn local_session() -> (TempDir, Session) {
    let dir = TempDir::new().unwrap();
    let session = Session::local(&dir.path().join("replica.db"), OwnerId::new(LOCAL_OWNER)).unwrap();
    (dir, session)
}

fn draft_note(title: Option<&str>, body: Option<&str>) -> Note {
    Note::new(
        OwnerId::new("tester"),
        NoteDraft {
            title: title.map(str::to_string),
            body: body.map(str::to_string),
            label_ids: Vec::new(),
        },
    )
}

fn report(outcome: SyncOutcome) -> SyncReport {
    SyncReport {
        owner: OwnerId::new("tester"),
        scope: SyncScope::Global,
        outcome,
        started_at: 0,
        pulled_labels: 1,
        pulled_notes: 3,
        kept_pending: 0,
        pushed: 2,
        deferred: 0,
        failures: Vec::new(),
        rejections: Vec::new(),
        cursor: None,
        error: None,
    }
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    assert_eq!(format_relative_time(now - 3 * 24 * 60 * 60_000, now), "3d ago");
    assert_eq!(format_relative_time(now - 14 * 24 * 60 * 60_000, now), "2w ago");
}

#[test]
fn format_relative_time_clamps_future_timestamps() {
    assert_eq!(format_relative_time(2_000, 1_000), "just now");
}

#[test]
fn note_preview_prefers_title() {
    let note = draft_note(Some("Groceries"), Some("milk\neggs"));
    assert_eq!(note_preview(&note, 40), "Groceries");
}

#[test]
fn note_preview_uses_first_body_line_and_truncates() {
    let note = draft_note(None, Some("a   very long first line of text\nsecond"));
    assert_eq!(note_preview(&note, 12), "a very lo...");
    assert_eq!(note_preview(&note, 80), "a very long first line of text");
}

#[test]
fn sync_marker_flags_pending_and_rejected() {
    assert_eq!(sync_marker(SyncStatus::Synced, false), ' ');
    assert_eq!(sync_marker(SyncStatus::PendingUpdate, false), '*');
    assert_eq!(sync_marker(SyncStatus::PendingCreate, true), '!');
}

#[test]
fn format_note_lines_lists_label_names_sorted() {
    let mut note = draft_note(Some("Plan"), None);
    let work = quill_core::LabelId::new();
    let alpha = quill_core::LabelId::new();
    note.label_ids = vec![work, alpha];
    let names = HashMap::from([(work, "work".to_string()), (alpha, "Alpha".to_string())]);

    let lines = format_note_lines(&[note], &names);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains(" * Plan"));
    assert!(lines[0].ends_with("#Alpha #work"));
}

#[test]
fn normalize_search_query_rejects_blank() {
    assert_eq!(normalize_search_query("  rust ").unwrap(), "rust");
    assert!(matches!(
        normalize_search_query(" \t "),
        Err(CliError::EmptySearchQuery)
    ));
}

#[test]
fn normalize_note_identifier_rejects_blank() {
    assert_eq!(normalize_note_identifier(" 0190ab ").unwrap(), "0190ab");
    assert!(matches!(
        normalize_note_identifier(""),
        Err(CliError::EmptyNoteId)
    ));
}

#[test]
fn report_lines_summarize_successful_run() {
    let lines = format_report_lines(&report(SyncOutcome::Success));
    assert_eq!(lines[0], "Sync completed");
    assert_eq!(lines[1], "  pulled 3 notes, 1 labels; pushed 2");
    assert_eq!(lines.len(), 2);
}

#[test]
fn report_lines_list_failures_and_rejections() {
    let mut partial = report(SyncOutcome::Partial);
    partial.deferred = 1;
    partial.failures.push(PushFailure {
        kind: "note",
        id: "n1".to_string(),
        message: "timed out".to_string(),
    });
    partial.rejections.push(PushFailure {
        kind: "label",
        id: "l1".to_string(),
        message: "name taken".to_string(),
    });

    let lines = format_report_lines(&partial);
    assert_eq!(lines[0], "Sync completed with pending changes");
    assert!(lines.contains(&"  1 notes wait for their labels to sync".to_string()));
    assert!(lines.contains(&"  retry later: note n1 (timed out)".to_string()));
    assert!(lines
        .iter()
        .any(|line| line.starts_with("  rejected: label l1 (name taken)")));
}

#[test]
fn report_lines_for_failure_show_only_the_error() {
    let mut failed = report(SyncOutcome::Failure);
    failed.error = Some("connection refused".to_string());
    assert_eq!(
        format_report_lines(&failed),
        vec!["Sync failed: connection refused".to_string()]
    );
}

#[test]
fn profile_init_prefers_explicit_then_env_then_existing() {
    let mut config = CliProfilesConfig::default();
    config.profiles.insert(
        "work".to_string(),
        CliProfile {
            api_base_url: Some("https://old.example.com".to_string()),
            owner_id: Some("old-owner".to_string()),
            access_token: Some("old-token".to_string()),
        },
    );
    let env = HashMap::from([("QUILL_OWNER_ID".to_string(), "env-owner".to_string())]);

    apply_profile_init(
        &mut config,
        "work",
        ProfileInit {
            api_url: Some(" https://api.example.com/ ".to_string()),
            ..ProfileInit::default()
        },
        |name| env.get(name).cloned(),
        true,
    )
    .unwrap();

    let profile = config.profile("work").unwrap();
    assert_eq!(
        profile.api_base_url.as_deref(),
        Some("https://api.example.com")
    );
    assert_eq!(profile.owner_id.as_deref(), Some("env-owner"));
    assert_eq!(profile.access_token.as_deref(), Some("old-token"));
    assert_eq!(config.active_profile.as_deref(), Some("work"));
}

#[test]
fn profile_init_rejects_non_http_url() {
    let mut config = CliProfilesConfig::default();
    let result = apply_profile_init(
        &mut config,
        "default",
        ProfileInit {
            api_url: Some("api.example.com".to_string()),
            ..ProfileInit::default()
        },
        |_| None,
        false,
    );
    assert!(matches!(result, Err(CliError::Config(_))));
    assert!(config.active_profile.is_none());
}

#[tokio::test]
async fn add_edit_and_label_notes_locally() {
    let (_dir, session) = local_session();
    session
        .notes
        .create_label(quill_core::models::LabelDraft {
            name: "work".to_string(),
            color: None,
        })
        .await
        .unwrap();

    run_add(
        &session,
        &["ship".to_string(), "it".to_string()],
        Some("Release".to_string()),
        &["work".to_string()],
    )
    .await
    .unwrap();

    let notes = session.notes.list_notes(&NoteQuery::default()).await.unwrap();
    assert_eq!(notes.len(), 1);
    let note = &notes[0];
    assert_eq!(note.title.as_deref(), Some("Release"));
    assert_eq!(note.body.as_deref(), Some("ship it"));
    assert_eq!(note.sync_status, SyncStatus::PendingCreate);
    let names = label_names(&session).await.unwrap();
    assert_eq!(names.get(&note.label_ids[0]).map(String::as_str), Some("work"));

    let prefix = note.id.to_string()[..8].to_string();
    run_edit(&session, &prefix, None, Some("shipped".to_string()), &[], true)
        .await
        .unwrap();
    let edited = session.notes.get_note(&note.id).await.unwrap();
    assert_eq!(edited.body.as_deref(), Some("shipped"));
    assert!(edited.label_ids.is_empty());
    assert_eq!(edited.title.as_deref(), Some("Release"));
}

#[tokio::test]
async fn edit_without_changes_is_rejected() {
    let (_dir, session) = local_session();
    let result = run_edit(&session, "0190", None, None, &[], false).await;
    assert!(matches!(result, Err(CliError::NothingToEdit)));
}

#[tokio::test]
async fn unknown_label_fails_resolution() {
    let (_dir, session) = local_session();
    let result = resolve_labels(&session, &["missing".to_string()]).await;
    assert!(matches!(
        result,
        Err(CliError::Core(quill_core::Error::NotFound(_)))
    ));
}

#[tokio::test]
async fn deleting_a_never_synced_note_discards_it() {
    let (_dir, session) = local_session();
    let note = session
        .notes
        .create_note(NoteDraft {
            title: None,
            body: Some("scratch".to_string()),
            label_ids: Vec::new(),
        })
        .await
        .unwrap();

    run_delete(&session, &note.id.to_string()).await.unwrap();

    assert!(session.notes.list_deleted_notes(10).await.unwrap().is_empty());
    assert!(session.notes.get_note(&note.id).await.is_err());
}

#[tokio::test]
async fn restore_requires_a_full_note_id() {
    let (_dir, session) = local_session();
    let result = run_restore(&session, "0190ab").await;
    assert!(matches!(result, Err(CliError::FullNoteIdRequired(raw)) if raw == "0190ab"));
}

#[tokio::test]
async fn sync_without_profile_is_not_configured() {
    let (_dir, session) = local_session();
    let result = run_sync(&session, None).await;
    assert!(matches!(result, Err(CliError::SyncNotConfigured)));
}

#[tokio::test]
async fn status_works_without_a_remote() {
    let (_dir, session) = local_session();
    session
        .notes
        .create_note(NoteDraft {
            title: Some("offline".to_string()),
            body: None,
            label_ids: Vec::new(),
        })
        .await
        .unwrap();

    run_sync_status(&session, true).await.unwrap();
    let summary = session
        .replica()
        .status_summary(session.owner())
        .await
        .unwrap();
    assert_eq!(summary.notes.pending_create, 1);
    assert!(summary.cursors.is_empty());
}
