//! Background task that decides when sync runs happen.
//!
//! One task per owner. It wakes on a manual trigger or when the backoff delay
//! elapses, and runs at most one sync at a time.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use super::orchestrator::{SyncOrchestrator, SyncOutcome, SyncReport};
use super::BackoffPolicy;
use crate::connectivity::Connectivity;
use crate::error::{Error, Result};
use crate::models::OwnerId;
use crate::util::now_millis;

/// Something that can perform a sync run for an owner
#[async_trait]
pub trait SyncRunner: Send + Sync {
    async fn run(&self, owner: &OwnerId) -> Result<SyncReport>;
}

#[async_trait]
impl SyncRunner for SyncOrchestrator {
    async fn run(&self, owner: &OwnerId) -> Result<SyncReport> {
        self.run_sync(owner).await
    }
}

#[derive(Debug)]
enum SchedulerCommand {
    TriggerNow,
    Shutdown,
}

/// Answer to a manual trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// A run will start right away
    Started,
    /// A run is already in flight or queued; this trigger folds into it
    Coalesced,
    /// Network unavailable; nothing was scheduled
    Offline,
    /// The scheduler has shut down
    Stopped,
}

/// Snapshot of the scheduler state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub last_outcome: Option<SyncOutcome>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    /// Wall-clock end of the last run (Unix ms)
    pub last_run_at: Option<i64>,
    pub runs: u64,
}

/// Periodic and manual sync driver for one owner
pub struct Scheduler {
    runner: Arc<dyn SyncRunner>,
    owner: OwnerId,
    connectivity: Arc<dyn Connectivity>,
    backoff: BackoffPolicy,
}

impl Scheduler {
    pub fn new(
        runner: Arc<dyn SyncRunner>,
        owner: OwnerId,
        connectivity: Arc<dyn Connectivity>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            runner,
            owner,
            connectivity,
            backoff,
        }
    }

    /// Start the background task; the first periodic run happens after one period
    pub fn spawn(self) -> SchedulerHandle {
        // Capacity 1: a second trigger while one is queued is coalesced
        let (tx, rx) = mpsc::channel(1);
        let status = Arc::new(Mutex::new(SchedulerStatus::default()));
        let connectivity = Arc::clone(&self.connectivity);
        let task = tokio::spawn(self.run_loop(rx, Arc::clone(&status)));
        SchedulerHandle {
            commands: tx,
            status,
            connectivity,
            task,
        }
    }

    async fn run_loop(
        self,
        mut commands: mpsc::Receiver<SchedulerCommand>,
        status: Arc<Mutex<SchedulerStatus>>,
    ) {
        tracing::info!(owner = %self.owner, period_secs = self.backoff.period.as_secs(), "Sync scheduler started");
        loop {
            let failures = lock(&status).consecutive_failures;
            let delay = self.backoff.delay_after(failures);

            let manual = tokio::select! {
                command = commands.recv() => match command {
                    Some(SchedulerCommand::TriggerNow) => true,
                    Some(SchedulerCommand::Shutdown) | None => break,
                },
                () = tokio::time::sleep(delay) => false,
            };

            if !manual && !self.connectivity.is_online().await {
                tracing::debug!(owner = %self.owner, "Skipping periodic sync while offline");
                continue;
            }

            self.run_once(&status, manual).await;

            // Triggers that arrived during the run fold into it
            let mut stop = false;
            while let Ok(command) = commands.try_recv() {
                match command {
                    SchedulerCommand::TriggerNow => {
                        tracing::debug!(owner = %self.owner, "Coalesced sync trigger");
                    }
                    SchedulerCommand::Shutdown => stop = true,
                }
            }
            if stop {
                break;
            }
        }
        tracing::info!(owner = %self.owner, "Sync scheduler stopped");
    }

    async fn run_once(&self, status: &Mutex<SchedulerStatus>, manual: bool) {
        lock(status).running = true;
        tracing::debug!(owner = %self.owner, manual, "Scheduler starting sync run");
        let result = self.runner.run(&self.owner).await;

        let mut status = lock(status);
        status.running = false;
        match result {
            Ok(report) => {
                status.runs += 1;
                status.last_outcome = Some(report.outcome);
                status.last_run_at = Some(now_millis());
                if report.outcome == SyncOutcome::Failure {
                    status.consecutive_failures = status.consecutive_failures.saturating_add(1);
                    status.last_error = report.error;
                } else {
                    status.consecutive_failures = 0;
                    status.last_error = None;
                }
            }
            Err(Error::SyncInProgress(_)) => {
                tracing::debug!(owner = %self.owner, "Run already in flight elsewhere; skipped");
            }
            Err(error) => {
                tracing::error!(owner = %self.owner, error = %error, "Sync run failed");
                status.runs += 1;
                status.last_outcome = Some(SyncOutcome::Failure);
                status.last_run_at = Some(now_millis());
                status.consecutive_failures = status.consecutive_failures.saturating_add(1);
                status.last_error = Some(error.to_string());
            }
        }
    }
}

fn lock(status: &Mutex<SchedulerStatus>) -> std::sync::MutexGuard<'_, SchedulerStatus> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Control handle for a spawned [`Scheduler`]
pub struct SchedulerHandle {
    commands: mpsc::Sender<SchedulerCommand>,
    status: Arc<Mutex<SchedulerStatus>>,
    connectivity: Arc<dyn Connectivity>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Ask for a run now
    pub async fn trigger(&self) -> TriggerOutcome {
        if !self.connectivity.is_online().await {
            return TriggerOutcome::Offline;
        }
        if lock(&self.status).running {
            return TriggerOutcome::Coalesced;
        }
        match self.commands.try_send(SchedulerCommand::TriggerNow) {
            Ok(()) => TriggerOutcome::Started,
            Err(TrySendError::Full(_)) => TriggerOutcome::Coalesced,
            Err(TrySendError::Closed(_)) => TriggerOutcome::Stopped,
        }
    }

    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        lock(&self.status).clone()
    }

    /// Stop the task. A run in flight finishes first.
    pub async fn shutdown(self) {
        // Only fails when the task is already gone
        let _ = self.commands.send(SchedulerCommand::Shutdown).await;
        if let Err(error) = self.task.await {
            tracing::error!(error = %error, "Sync scheduler task panicked");
        }
    }
}
