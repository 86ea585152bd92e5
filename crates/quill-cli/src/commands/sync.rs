use std::sync::Arc;
use std::time::Duration;

use quill_core::connectivity::{Connectivity, ConnectivityFlag};
use quill_core::models::SyncScope;
use quill_core::services::StatusSummary;
use quill_core::sync::{Scheduler, SyncOrchestrator, SyncOutcome, SyncReport, TriggerOutcome};
use serde::Serialize;

use crate::commands::common::{format_sync_timestamp, Session};
use crate::error::CliError;

const DAEMON_STATUS_INTERVAL: Duration = Duration::from_secs(5);

fn orchestrator(session: &Session) -> Result<SyncOrchestrator, CliError> {
    let remote = session.require_remote()?;
    Ok(SyncOrchestrator::new(
        session.replica().clone(),
        remote,
        session.settings.clone(),
    ))
}

pub async fn run_sync(session: &Session, label: Option<&str>) -> Result<(), CliError> {
    let orchestrator = orchestrator(session)?;
    let scope = match label {
        Some(raw) => SyncScope::Label(session.notes.resolve_label(raw).await?.id),
        None => SyncScope::Global,
    };

    let report = orchestrator.run_sync_scope(session.owner(), scope).await?;
    for line in format_report_lines(&report) {
        println!("{line}");
    }
    match report.outcome {
        SyncOutcome::Failure => Err(CliError::SyncFailed(
            report.error.unwrap_or_else(|| "remote unavailable".to_string()),
        )),
        SyncOutcome::Success | SyncOutcome::Partial => Ok(()),
    }
}

pub fn format_report_lines(report: &SyncReport) -> Vec<String> {
    let mut lines = Vec::new();
    match report.outcome {
        SyncOutcome::Failure => {
            lines.push(format!(
                "Sync failed: {}",
                report.error.as_deref().unwrap_or("remote unavailable")
            ));
            return lines;
        }
        SyncOutcome::Success => lines.push("Sync completed".to_string()),
        SyncOutcome::Partial => lines.push("Sync completed with pending changes".to_string()),
    }
    lines.push(format!(
        "  pulled {} notes, {} labels; pushed {}",
        report.pulled_notes, report.pulled_labels, report.pushed
    ));
    if report.kept_pending > 0 {
        lines.push(format!(
            "  kept {} local edits over remote versions",
            report.kept_pending
        ));
    }
    if report.deferred > 0 {
        lines.push(format!(
            "  {} notes wait for their labels to sync",
            report.deferred
        ));
    }
    for failure in &report.failures {
        lines.push(format!(
            "  retry later: {} {} ({})",
            failure.kind, failure.id, failure.message
        ));
    }
    for rejection in &report.rejections {
        lines.push(format!(
            "  rejected: {} {} ({}); edit it to try again",
            rejection.kind, rejection.id, rejection.message
        ));
    }
    lines
}

#[derive(Debug, Serialize)]
struct StatusOutput<'a> {
    profile: &'a str,
    owner: &'a str,
    remote_configured: bool,
    online: Option<bool>,
    summary: &'a StatusSummary,
}

pub async fn run_sync_status(session: &Session, as_json: bool) -> Result<(), CliError> {
    let summary = session.replica().status_summary(session.owner()).await?;
    let online = match &session.connectivity {
        Some(connectivity) => Some(connectivity.is_online().await),
        None => None,
    };

    if as_json {
        let output = StatusOutput {
            profile: &session.profile_name,
            owner: session.owner().as_str(),
            remote_configured: session.remote.is_some(),
            online,
            summary: &summary,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("profile:  {}", session.profile_name);
    println!("owner:    {}", session.owner());
    println!(
        "remote:   {}",
        match online {
            Some(true) => "online",
            Some(false) => "offline",
            None => "not configured",
        }
    );
    println!(
        "notes:    {} to create, {} to update, {} to delete, {} rejected",
        summary.notes.pending_create,
        summary.notes.pending_update,
        summary.notes.pending_delete,
        summary.notes.rejected
    );
    println!(
        "labels:   {} to create, {} to update, {} to delete, {} rejected",
        summary.labels.pending_create,
        summary.labels.pending_update,
        summary.labels.pending_delete,
        summary.labels.rejected
    );
    if summary.cursors.is_empty() {
        println!("never synced");
    }
    for cursor in &summary.cursors {
        let last = cursor
            .last_synced_at
            .map_or_else(|| "never".to_string(), format_sync_timestamp);
        println!("synced:   {} at {last}", cursor.scope);
    }

    for note in session.replica().rejected_notes(session.owner()).await? {
        println!(
            "rejected note {}: {}",
            note.id,
            note.push_error.unwrap_or_default()
        );
    }
    for label in session.replica().rejected_labels(session.owner()).await? {
        println!(
            "rejected label '{}': {}",
            label.name,
            label.push_error.unwrap_or_default()
        );
    }
    Ok(())
}

/// Run the scheduler until Ctrl-C
pub async fn run_sync_daemon(session: &Session) -> Result<(), CliError> {
    let orchestrator = orchestrator(session)?;
    let connectivity: Arc<dyn Connectivity> = session
        .connectivity
        .clone()
        .unwrap_or_else(|| Arc::new(ConnectivityFlag::new(true)));
    let handle = Scheduler::new(
        Arc::new(orchestrator),
        session.owner().clone(),
        connectivity,
        session.settings.backoff(),
    )
    .spawn();

    match handle.trigger().await {
        TriggerOutcome::Offline => println!("Offline; waiting for the network"),
        TriggerOutcome::Started | TriggerOutcome::Coalesced | TriggerOutcome::Stopped => {}
    }
    println!(
        "Syncing every {}s; press Ctrl-C to stop",
        session.settings.period.as_secs()
    );

    let mut ticker = tokio::time::interval(DAEMON_STATUS_INTERVAL);
    let mut seen_runs = 0;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            _ = ticker.tick() => {
                let status = handle.status();
                if status.runs != seen_runs {
                    seen_runs = status.runs;
                    let outcome = status
                        .last_outcome
                        .map_or_else(|| "error".to_string(), |outcome| outcome.to_string());
                    match status.last_error {
                        Some(error) => println!("run {}: {outcome} ({error})", status.runs),
                        None => println!("run {}: {outcome}", status.runs),
                    }
                }
            }
        }
    }

    println!("Stopping...");
    handle.shutdown().await;
    Ok(())
}
