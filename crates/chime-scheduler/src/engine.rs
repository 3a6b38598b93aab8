use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::{
    error::{Result, SchedulerError},
    job::{Job, RunOutcome, SchedulerContext, StopOutcome},
    store::heartbeat_key,
};

/// Drives every registered job once per tick until shutdown.
pub struct SchedulerEngine {
    ctx: SchedulerContext,
    jobs: Vec<Job>,
    tick_every: Duration,
    heartbeat: bool,
    instance: String,
}

impl SchedulerEngine {
    pub fn new(ctx: SchedulerContext) -> Self {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        Self {
            ctx,
            jobs: Vec::new(),
            tick_every: Duration::from_secs(1),
            heartbeat: true,
            instance: format!("{host}#{}", std::process::id()),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick_every = tick;
        self
    }

    pub fn with_heartbeat(mut self, enabled: bool) -> Self {
        self.heartbeat = enabled;
        self
    }

    /// `host#pid` of this scheduler process, as used in the heartbeat key.
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Add a job. Two jobs with the same identity in one process are rejected.
    pub fn register(&mut self, job: Job) -> Result<()> {
        if self.jobs.iter().any(|j| j.id() == job.id()) {
            return Err(SchedulerError::InvalidJob(format!(
                "duplicate job id: {}",
                job.id()
            )));
        }
        info!(job = %job, "job registered");
        self.jobs.push(job);
        Ok(())
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn job_mut(&mut self, id: &str) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id() == id)
    }

    /// Offer `now` to every job. Returns how many were started.
    ///
    /// A failing job is logged and does not prevent the others from running.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> usize {
        let mut started = 0;
        for job in &mut self.jobs {
            match job.run(now).await {
                Ok(RunOutcome::Started) => started += 1,
                Ok(_) => {}
                Err(e) => error!(job = %job, error = %e, "job run failed"),
            }
        }

        if self.heartbeat {
            let key = heartbeat_key(&self.instance);
            if let Err(e) = self.ctx.store.set(&key, &now.timestamp().to_string()).await {
                warn!(error = %e, "heartbeat write failed");
            }
        }
        started
    }

    /// Stop every in-flight body, concurrently.
    pub async fn stop_all(&mut self) -> Vec<StopOutcome> {
        join_all(self.jobs.iter_mut().map(Job::stop)).await
    }

    /// Main loop. Ticks until `shutdown` broadcasts `true`, then stops all jobs.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(instance = %self.instance, jobs = self.jobs.len(), "scheduler engine started");

        let mut interval = tokio::time::interval(self.tick_every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }

        let killed = self
            .stop_all()
            .await
            .into_iter()
            .filter(|o| *o == StopOutcome::Killed)
            .count();
        if killed > 0 {
            warn!(count = killed, "jobs killed during shutdown");
        }

        if self.heartbeat {
            if let Err(e) = self.ctx.store.delete(&heartbeat_key(&self.instance)).await {
                warn!(error = %e, "failed to clear heartbeat");
            }
        }
        info!("scheduler engine stopped");
    }
}
