use quill_core::db::DeleteOutcome;
use quill_core::models::{LabelDraft, LabelPatch};

use crate::cli::LabelCommands;
use crate::commands::common::{format_label_lines, Session};
use crate::error::CliError;

pub async fn run_label(session: &Session, command: LabelCommands) -> Result<(), CliError> {
    match command {
        LabelCommands::Add { name, color } => {
            let label = session
                .notes
                .create_label(LabelDraft { name, color })
                .await?;
            println!("{}", label.id);
        }
        LabelCommands::List { json } => {
            let labels = session.notes.list_labels().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&labels)?);
            } else if labels.is_empty() {
                println!("No labels yet.");
            } else {
                for line in format_label_lines(&labels) {
                    println!("{line}");
                }
            }
        }
        LabelCommands::Edit { label, name, color } => {
            if name.is_none() && color.is_none() {
                return Err(CliError::NothingToEdit);
            }
            let current = session.notes.resolve_label(&label).await?;
            let updated = session
                .notes
                .update_label(&current.id, &LabelPatch { name, color })
                .await?;
            println!("{}", updated.id);
        }
        LabelCommands::Delete { label } => {
            let current = session.notes.resolve_label(&label).await?;
            match session.notes.delete_label(&current.id).await? {
                DeleteOutcome::Purged => {
                    println!("Deleted label '{}' (never synced)", current.name);
                }
                DeleteOutcome::Tombstoned(_) => println!("Deleted label '{}'", current.name),
            }
        }
    }
    Ok(())
}
