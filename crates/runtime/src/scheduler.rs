//! Background tasks that fire digest runs from time-based triggers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use recap_config::ScheduleConfig;
use recap_digest::{CronTrigger, DigestError, Orchestrator, RunMode, Trigger};

/// A trigger bound to the run it fires.
pub struct ScheduledJob {
    pub name: String,
    pub trigger: Box<dyn Trigger>,
    pub mode: RunMode,
}

impl ScheduledJob {
    pub fn new(name: impl Into<String>, trigger: Box<dyn Trigger>, mode: RunMode) -> Self {
        Self {
            name: name.into(),
            trigger,
            mode,
        }
    }
}

/// Build the configured jobs: `periodic` fires fixed-window runs and
/// `weekly` fires cursor-based runs.  A blank expression disables its job.
pub fn jobs_from_config(config: &ScheduleConfig, timezone: Tz) -> Result<Vec<ScheduledJob>> {
    let mut jobs = Vec::new();
    if !config.periodic.trim().is_empty() {
        let trigger = CronTrigger::parse(&config.periodic, timezone)
            .context("invalid [schedule] periodic expression")?;
        jobs.push(ScheduledJob::new("periodic", Box::new(trigger), RunMode::Window));
    }
    if !config.weekly.trim().is_empty() {
        let trigger = CronTrigger::parse(&config.weekly, timezone)
            .context("invalid [schedule] weekly expression")?;
        jobs.push(ScheduledJob::new("weekly", Box::new(trigger), RunMode::scheduled()));
    }
    Ok(jobs)
}

/// Owns the spawned job tasks and their shared shutdown signal.
///
/// Shutdown is only observed while a job is waiting for its next fire time;
/// a run already in progress completes first.
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            orchestrator,
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    pub fn job_count(&self) -> usize {
        self.handles.len()
    }

    pub fn spawn(&mut self, job: ScheduledJob) {
        info!(job = %job.name, trigger = %job.trigger.describe(), mode = %job.mode, "scheduling digest job");
        let name = job.name.clone();
        let handle = spawn_job(job, self.orchestrator.clone(), &self.shutdown_tx);
        self.handles.push((name, handle));
    }

    /// Signal every job to stop and wait for them to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for (name, handle) in self.handles {
            if let Err(err) = handle.await {
                warn!(?err, job = %name, "scheduled job task ended abnormally");
            }
        }
        info!("scheduler stopped");
    }
}

fn spawn_job(
    job: ScheduledJob,
    orchestrator: Arc<Orchestrator>,
    shutdown_tx: &watch::Sender<bool>,
) -> JoinHandle<()> {
    let mut rx = shutdown_tx.subscribe();
    tokio::spawn(async move {
        let mut last_fire: Option<DateTime<Utc>> = None;
        loop {
            if *rx.borrow() {
                break;
            }

            let now = Utc::now();
            // Never ask for a slot at or before the one just fired.
            let after = last_fire.map_or(now, |fired| fired.max(now));
            let Some(next) = job.trigger.next_fire_after(after) else {
                info!(job = %job.name, "trigger exhausted, job finished");
                break;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = rx.changed() => {
                    if changed.is_err() || *rx.borrow() { break; }
                    continue;
                }
            }
            last_fire = Some(next);

            info!(job = %job.name, fire_time = %next, "scheduled digest run firing");
            match orchestrator.run(&job.mode).await {
                Ok(report) => info!(
                    job = %job.name,
                    messages = report.digest.stats.message_count,
                    insufficient = report.digest.insufficient,
                    published = report.published,
                    "scheduled digest run complete"
                ),
                Err(DigestError::RunInProgress(cursor)) => {
                    info!(job = %job.name, %cursor, "previous run still in progress, skipping this fire");
                }
                Err(err) => warn!(?err, job = %job.name, "scheduled digest run failed"),
            }
        }
    })
}
