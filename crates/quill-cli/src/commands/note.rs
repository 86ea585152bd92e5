use quill_core::db::DeleteOutcome;
use quill_core::models::{NoteDraft, NotePatch, NoteQuery};
use quill_core::{Note, NoteId};

use crate::commands::common::{
    format_note_lines, format_sync_timestamp, label_names, normalize_note_identifier,
    normalize_search_query, note_to_list_item, resolve_body, resolve_labels, NoteListItem,
    Session,
};
use crate::error::CliError;

pub async fn run_add(
    session: &Session,
    body_parts: &[String],
    title: Option<String>,
    labels: &[String],
) -> Result<(), CliError> {
    let body = resolve_body(body_parts)?;
    if body.is_none() && title.as_deref().map_or(true, |title| title.trim().is_empty()) {
        return Err(CliError::EmptyContent);
    }
    let label_ids = resolve_labels(session, labels).await?;

    let note = session
        .notes
        .create_note(NoteDraft {
            title,
            body,
            label_ids,
        })
        .await?;
    println!("{}", note.id);
    Ok(())
}

pub async fn run_list(
    session: &Session,
    limit: usize,
    label: Option<&str>,
    as_json: bool,
) -> Result<(), CliError> {
    let label = match label {
        Some(raw) => Some(session.notes.resolve_label(raw).await?.id),
        None => None,
    };
    let notes = session
        .notes
        .list_notes(&NoteQuery {
            label,
            limit,
            ..NoteQuery::default()
        })
        .await?;
    print_notes(session, &notes, as_json).await
}

pub async fn run_search(
    session: &Session,
    query: &str,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let query = normalize_search_query(query)?;
    let notes = session.notes.search_notes(&query, limit).await?;
    print_notes(session, &notes, as_json).await
}

pub async fn run_trash(session: &Session, limit: usize, as_json: bool) -> Result<(), CliError> {
    let notes = session.notes.list_deleted_notes(limit).await?;
    if notes.is_empty() && !as_json {
        println!("Trash is empty.");
        return Ok(());
    }
    print_notes(session, &notes, as_json).await
}

pub async fn run_show(session: &Session, id: &str, as_json: bool) -> Result<(), CliError> {
    let id = session
        .notes
        .resolve_note_id(&normalize_note_identifier(id)?)
        .await?;
    let note = session.notes.get_note(&id).await?;
    let names = label_names(session).await?;
    let item = note_to_list_item(&note, &names);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&item)?);
        return Ok(());
    }

    println!("id:       {}", item.id);
    if let Some(title) = &item.title {
        println!("title:    {title}");
    }
    if !item.labels.is_empty() {
        println!("labels:   {}", item.labels.join(", "));
    }
    println!("status:   {}", note.sync_status);
    if let Some(error) = &item.push_error {
        println!("rejected: {error}");
    }
    println!("updated:  {}", format_sync_timestamp(item.updated_at));
    if let Some(body) = &item.body {
        println!();
        println!("{body}");
    }
    Ok(())
}

pub async fn run_edit(
    session: &Session,
    id: &str,
    title: Option<String>,
    body: Option<String>,
    labels: &[String],
    clear_labels: bool,
) -> Result<(), CliError> {
    let label_ids = if clear_labels {
        Some(Vec::new())
    } else if labels.is_empty() {
        None
    } else {
        Some(resolve_labels(session, labels).await?)
    };
    let patch = NotePatch {
        title,
        body,
        label_ids,
    };
    if patch.is_empty() {
        return Err(CliError::NothingToEdit);
    }

    let id = session
        .notes
        .resolve_note_id(&normalize_note_identifier(id)?)
        .await?;
    let note = session.notes.update_note(&id, &patch).await?;
    println!("{}", note.id);
    Ok(())
}

pub async fn run_delete(session: &Session, id: &str) -> Result<(), CliError> {
    let id = session
        .notes
        .resolve_note_id(&normalize_note_identifier(id)?)
        .await?;
    match session.notes.delete_note(&id).await? {
        DeleteOutcome::Purged => println!("Deleted note {id} (never synced)"),
        DeleteOutcome::Tombstoned(_) => println!("Deleted note {id}"),
    }
    Ok(())
}

pub async fn run_restore(session: &Session, id: &str) -> Result<(), CliError> {
    // Prefix lookup only covers live notes
    let id = parse_full_note_id(id)?;
    let note = session.notes.restore_note(&id).await?;
    println!("{}", note.id);
    Ok(())
}

pub async fn run_purge(session: &Session, id: &str) -> Result<(), CliError> {
    let id = parse_full_note_id(id)?;
    session.notes.purge_note(&id).await?;
    println!("Purged note {id} from this device");
    Ok(())
}

fn parse_full_note_id(raw: &str) -> Result<NoteId, CliError> {
    let raw = normalize_note_identifier(raw)?;
    raw.parse()
        .map_err(|_| CliError::FullNoteIdRequired(raw.clone()))
}

async fn print_notes(session: &Session, notes: &[Note], as_json: bool) -> Result<(), CliError> {
    let names = label_names(session).await?;
    if as_json {
        let json_items = notes
            .iter()
            .map(|note| note_to_list_item(note, &names))
            .collect::<Vec<NoteListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_note_lines(notes, &names) {
            println!("{line}");
        }
    }
    Ok(())
}
