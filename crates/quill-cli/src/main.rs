//! Quill CLI - offline-first notes from the terminal
//!
//! Every command works against the local replica; `quill sync` reconciles it
//! with the API when a profile is configured.

mod cli;
mod commands;
mod config_profiles;
mod error;

#[cfg(test)]
mod tests;

use clap::{CommandFactory, Parser};

use crate::cli::{Cli, Commands, SyncCommands};
use crate::commands::common::{open_session, resolve_db_path};
use crate::commands::config::run_config;
use crate::commands::label::run_label;
use crate::commands::note::{
    run_add, run_delete, run_edit, run_list, run_purge, run_restore, run_search, run_show,
    run_trash,
};
use crate::commands::sync::{run_sync, run_sync_daemon, run_sync_status};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quill=info".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();

    let command = match cli.command {
        Some(Commands::Config { command }) => {
            return run_config(command, cli.profile.as_deref());
        }
        other => other,
    };

    let db_path = resolve_db_path(cli.db_path)?;
    let session = open_session(&db_path, cli.profile.as_deref())?;

    match command {
        Some(Commands::Add {
            body,
            title,
            labels,
        }) => run_add(&session, &body, title, &labels).await?,
        Some(Commands::List { limit, label, json }) => {
            run_list(&session, limit, label.as_deref(), json).await?;
        }
        Some(Commands::Search { query, limit, json }) => {
            run_search(&session, &query, limit, json).await?;
        }
        Some(Commands::Show { id, json }) => run_show(&session, &id, json).await?,
        Some(Commands::Edit {
            id,
            title,
            body,
            labels,
            clear_labels,
        }) => run_edit(&session, &id, title, body, &labels, clear_labels).await?,
        Some(Commands::Delete { id }) => run_delete(&session, &id).await?,
        Some(Commands::Restore { id }) => run_restore(&session, &id).await?,
        Some(Commands::Trash { limit, json }) => run_trash(&session, limit, json).await?,
        Some(Commands::Purge { id }) => run_purge(&session, &id).await?,
        Some(Commands::Label { command }) => run_label(&session, command).await?,
        Some(Commands::Sync { command, label }) => match command {
            None => run_sync(&session, label.as_deref()).await?,
            Some(SyncCommands::Status { json }) => run_sync_status(&session, json).await?,
            Some(SyncCommands::Daemon) => run_sync_daemon(&session).await?,
        },
        // Handled before the replica is opened
        Some(Commands::Config { .. }) => {}
        None => {
            // Quick capture mode: quill "my thought"
            if cli.note.is_empty() {
                Cli::command().print_help().map_err(CliError::Io)?;
                println!();
            } else {
                run_add(&session, &cli.note, None, &[]).await?;
            }
        }
    }

    Ok(())
}
