//! Cron-driven job loops
//!
//! One task per job: daily execution, weekly execution, reconciliation.
//! Each task sleeps until its next fire time, runs the job to completion and
//! only then computes the following fire time, so a job never overlaps itself.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ScheduleConfig;
use crate::execution::PaymentExecutor;
use crate::reconciler::EventReconciler;
use crate::utils::Cadence;

use super::schedule::{CronSchedule, ScheduleError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Execute(Cadence),
    Reconcile,
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Job::Execute(cadence) => write!(f, "{} execution", cadence),
            Job::Reconcile => write!(f, "reconciliation"),
        }
    }
}

pub struct Scheduler {
    config: ScheduleConfig,
    executor: Arc<PaymentExecutor>,
    reconciler: Arc<EventReconciler>,
}

impl Scheduler {
    pub fn new(config: ScheduleConfig, executor: Arc<PaymentExecutor>, reconciler: Arc<EventReconciler>) -> Self {
        Self {
            config,
            executor,
            reconciler,
        }
    }

    /// Spawn the job loops. They run until `shutdown` flips to true or its
    /// sender is dropped. Returns no handles when scheduling is disabled.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Result<Vec<JoinHandle<()>>, ScheduleError> {
        if !self.config.enabled {
            info!("Scheduler disabled, no jobs registered");
            return Ok(Vec::new());
        }

        let jobs = [
            (Job::Execute(Cadence::Daily), CronSchedule::parse(&self.config.daily)?),
            (Job::Execute(Cadence::Weekly), CronSchedule::parse(&self.config.weekly)?),
            (Job::Reconcile, CronSchedule::parse(&self.config.reconcile)?),
        ];

        let handles = jobs
            .into_iter()
            .map(|(job, schedule)| {
                info!("Registered {} job on '{}'", job, schedule.expression());
                let executor = self.executor.clone();
                let reconciler = self.reconciler.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    job_loop(job, schedule, executor, reconciler, shutdown).await;
                })
            })
            .collect();

        Ok(handles)
    }
}

async fn job_loop(
    job: Job,
    schedule: CronSchedule,
    executor: Arc<PaymentExecutor>,
    reconciler: Arc<EventReconciler>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let Some(wait) = schedule.until_next(Utc::now()) else {
            warn!("'{}' never fires again, stopping {} job", schedule.expression(), job);
            break;
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        run_job(job, &executor, &reconciler).await;
    }

    info!("{} job stopped", job);
}

async fn run_job(job: Job, executor: &PaymentExecutor, reconciler: &EventReconciler) {
    match job {
        Job::Execute(cadence) => match executor.run_cycle(cadence).await {
            Ok(report) => info!(
                "{} cycle: attempted={} committed={} duplicates={} skipped={} failed={}",
                cadence,
                report.attempted,
                report.committed.len(),
                report.duplicates.len(),
                report.skipped.len(),
                report.failures.len()
            ),
            Err(e) => error!("{} cycle aborted: {}", cadence, e),
        },
        Job::Reconcile => {
            if let Err(e) = reconciler.reconcile().await {
                error!("Reconciliation sweep failed: {}", e);
            }
        }
    }
}
