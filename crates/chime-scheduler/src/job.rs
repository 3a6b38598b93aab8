use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use chime_core::{AtSpec, EverySpec, SchedulerConfig};

use crate::at::Window;
use crate::error::{Result, SchedulerError};
use crate::every::Every;
use crate::store::{disabled_key, last_ran_key, lock_key, DistributedLock, SharedStore};

/// Extra gate evaluated on every tick, e.g. a business-hours check.
pub type Predicate = Arc<dyn Fn(DateTime<Tz>) -> bool + Send + Sync>;

/// The job's work. Receives a token that is cancelled when the job is stopped.
///
/// Bodies should reach `.await` points regularly. A body that blocks can't be
/// aborted, and the job reports itself running until the body returns.
pub type JobBody = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, ()> + Send + Sync>;

pub const DEFAULT_STOP_TIMEOUT: Duration =
    Duration::from_secs(chime_core::config::DEFAULT_STOP_TIMEOUT_SECS);

/// Scheduler-wide settings and backends shared by every job of a process.
#[derive(Clone)]
pub struct SchedulerContext {
    pub store: Arc<dyn SharedStore>,
    pub lock: Arc<dyn DistributedLock>,
    pub timezone: Tz,
    pub grace: Duration,
    pub long_running_timeout: Duration,
}

impl SchedulerContext {
    /// Context with the default timezone (UTC), grace and lock expiry.
    pub fn new(store: Arc<dyn SharedStore>, lock: Arc<dyn DistributedLock>) -> Self {
        let defaults = SchedulerConfig::default();
        Self {
            store,
            lock,
            timezone: chrono_tz::UTC,
            grace: defaults.grace(),
            long_running_timeout: defaults.long_running_timeout(),
        }
    }

    pub fn from_config(
        config: &SchedulerConfig,
        store: Arc<dyn SharedStore>,
        lock: Arc<dyn DistributedLock>,
    ) -> chime_core::Result<Self> {
        Ok(Self {
            store,
            lock,
            timezone: config.tz()?,
            grace: config.grace(),
            long_running_timeout: config.long_running_timeout(),
        })
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_long_running_timeout(mut self, timeout: Duration) -> Self {
        self.long_running_timeout = timeout;
        self
    }
}

/// What a call to [`Job::run`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Interval, window or predicate said no (checked against the cached last run).
    Ineligible,
    /// A previous run of this job is still going in this process.
    AlreadyRunning,
    /// Another process holds the run lock.
    Contended,
    /// Another process ran the job since our cache was filled.
    Skipped,
    /// The job is disabled in the shared store.
    Disabled,
    /// The run was recorded and the body launched.
    Started,
}

/// What a call to [`Job::stop`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    NotRunning,
    /// The body finished within the stop timeout.
    Finished,
    /// The body ignored cancellation and was aborted.
    Killed,
}

/// Point-in-time view of a job, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: String,
    pub name: String,
    pub category: Option<String>,
    pub every: Option<String>,
    pub at: Option<String>,
    pub last_ran: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub disabled: bool,
    pub running: bool,
}

struct RunHandle {
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Declarative description of a job, turned into a [`Job`] by [`JobBuilder::build`].
pub struct JobBuilder {
    name: String,
    category: Option<String>,
    every: Option<EverySpec>,
    at: Option<AtSpec>,
    only_if: Option<Predicate>,
    body: Option<JobBody>,
    stop_timeout: Duration,
}

impl JobBuilder {
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn every(mut self, every: impl Into<EverySpec>) -> Self {
        self.every = Some(every.into());
        self
    }

    pub fn at(mut self, at: impl Into<AtSpec>) -> Self {
        self.at = Some(at.into());
        self
    }

    pub fn only_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(DateTime<Tz>) -> bool + Send + Sync + 'static,
    {
        self.only_if = Some(Arc::new(predicate));
        self
    }

    pub fn body<F, Fut>(mut self, body: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let body: JobBody = Arc::new(move |cancel: CancellationToken| -> BoxFuture<'static, ()> {
            Box::pin(body(cancel))
        });
        self.body = Some(body);
        self
    }

    /// How long [`Job::stop`] waits for the body before aborting it.
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Parse the specs and load the last run time from the shared store.
    ///
    /// Malformed `every`/`at` values fail here, never at run time.
    pub async fn build(self, ctx: &SchedulerContext) -> Result<Job> {
        if self.name.trim().is_empty() {
            return Err(SchedulerError::InvalidJob("job name is empty".to_string()));
        }
        let every = Every::parse(self.every.as_ref())?;
        let at = Window::parse(self.at.as_ref(), ctx.grace)?;

        let id = match &self.category {
            Some(category) => format!("{category}.{}", self.name),
            None => self.name.clone(),
        };

        if at.is_some() && every.is_none() {
            warn!(job = %id, "job has `at` but no `every`; could run far more often than expected");
        }

        let mut job = Job {
            id,
            name: self.name,
            category: self.category,
            every,
            at,
            only_if: self.only_if,
            body: self.body,
            store: Arc::clone(&ctx.store),
            lock: Arc::clone(&ctx.lock),
            timezone: ctx.timezone,
            long_running_timeout: ctx.long_running_timeout,
            stop_timeout: self.stop_timeout,
            last_ran: None,
            handle: None,
        };
        job.refresh_last_ran().await?;
        Ok(job)
    }
}

/// A named recurring job.
///
/// The driver calls [`Job::run`] on every tick; the job decides whether now
/// is a valid moment, takes the fleet-wide lock, records the run and launches
/// its body on a separate task.
pub struct Job {
    id: String,
    name: String,
    category: Option<String>,
    every: Option<Every>,
    at: Option<Window>,
    only_if: Option<Predicate>,
    body: Option<JobBody>,
    store: Arc<dyn SharedStore>,
    lock: Arc<dyn DistributedLock>,
    timezone: Tz,
    long_running_timeout: Duration,
    stop_timeout: Duration,
    last_ran: Option<DateTime<Utc>>,
    handle: Option<RunHandle>,
}

impl Job {
    pub fn builder(name: impl Into<String>) -> JobBuilder {
        JobBuilder {
            name: name.into(),
            category: None,
            every: None,
            at: None,
            only_if: None,
            body: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// `category.name`, or `name` when uncategorised.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// Last run as of the most recent refresh.
    pub fn last_ran(&self) -> Option<DateTime<Utc>> {
        self.last_ran
    }

    /// Run the job if `now` is a valid moment for it.
    ///
    /// The last run is re-read from the store before the first check, then
    /// again under the run lock, so at most one process accepts a given run
    /// and a cleared record takes effect on the next tick. The lock covers
    /// the check and the state write, not the body.
    pub async fn run(&mut self, now: DateTime<Utc>) -> Result<RunOutcome> {
        self.refresh_last_ran().await?;
        if !self.should_run(now) {
            return Ok(RunOutcome::Ineligible);
        }

        if self.running() {
            info!(job = %self, "already running");
            return Ok(RunOutcome::AlreadyRunning);
        }

        let key = lock_key(&self.id);
        let Some(token) = self.lock.try_acquire(&key, self.long_running_timeout).await? else {
            info!(job = %self, "unable to acquire exclusive run lock");
            return Ok(RunOutcome::Contended);
        };

        let outcome = self.run_locked(now).await;

        if let Err(e) = self.lock.release(token).await {
            warn!(job = %self, error = %e, "failed to release run lock; it will expire");
        }
        outcome
    }

    async fn run_locked(&mut self, now: DateTime<Utc>) -> Result<RunOutcome> {
        self.refresh_last_ran().await?;

        if !self.should_run(now) {
            return Ok(RunOutcome::Skipped);
        }

        if self.disabled().await? {
            info!(job = %self, "disabled");
            return Ok(RunOutcome::Disabled);
        }

        info!(job = %self, "running");
        self.ran(now).await?;
        self.spawn_body();
        Ok(RunOutcome::Started)
    }

    /// Interval, window and predicate, all evaluated in the scheduler timezone.
    fn should_run(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.timezone);

        let every_ok = match (&self.every, self.last_ran) {
            (Some(every), Some(last)) => every
                .next_at(last.with_timezone(&self.timezone))
                .is_some_and(|next| next <= local),
            _ => true,
        };
        let at_ok = self.at.as_ref().map_or(true, |w| w.allows(local));
        let if_ok = self.only_if.as_ref().map_or(true, |f| f(local));

        every_ok && at_ok && if_ok
    }

    fn spawn_body(&mut self) {
        let Some(body) = self.body.clone() else {
            return;
        };
        let cancel = CancellationToken::new();
        let task = tokio::spawn(body(cancel.clone()));
        self.handle = Some(RunHandle { task, cancel });
    }

    async fn ran(&mut self, now: DateTime<Utc>) -> Result<()> {
        let secs = now.timestamp();
        self.store
            .set(&last_ran_key(&self.id), &secs.to_string())
            .await?;
        self.last_ran = DateTime::from_timestamp(secs, 0);
        Ok(())
    }

    /// Whether this process has a body of this job in flight.
    pub fn running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished())
    }

    /// Stop an in-flight body: cancel, wait up to the stop timeout, then abort.
    ///
    /// An aborted body stays tracked until its task has actually finished, so
    /// a body stuck in blocking code still counts as running.
    ///
    /// Safe to call from a shutdown handler; log lines are emitted from their
    /// own tasks rather than inline.
    pub async fn stop(&mut self) -> StopOutcome {
        let Some(mut handle) = self.handle.take() else {
            return StopOutcome::NotRunning;
        };
        if handle.task.is_finished() {
            return StopOutcome::NotRunning;
        }

        let job = self.id.clone();
        tokio::spawn(async move { info!(%job, "stopping") });

        handle.cancel.cancel();
        match tokio::time::timeout(self.stop_timeout, &mut handle.task).await {
            Ok(_) => StopOutcome::Finished,
            Err(_) => {
                handle.task.abort();
                let job = self.id.clone();
                let timeout_secs = self.stop_timeout.as_secs_f64();
                tokio::spawn(async move { error!(%job, timeout_secs, "killing job due to stop") });
                self.handle = Some(handle);
                StopOutcome::Killed
            }
        }
    }

    /// Reload the last run time from the shared store.
    pub async fn refresh_last_ran(&mut self) -> Result<Option<DateTime<Utc>>> {
        let raw = self.store.get(&last_ran_key(&self.id)).await?;
        self.last_ran = match raw {
            Some(value) => {
                let parsed = value
                    .trim()
                    .parse::<i64>()
                    .ok()
                    .and_then(|secs| DateTime::from_timestamp(secs, 0));
                if parsed.is_none() {
                    warn!(job = %self.id, %value, "ignoring unparseable last run");
                }
                parsed
            }
            None => None,
        };
        Ok(self.last_ran)
    }

    pub async fn disable(&self) -> Result<()> {
        self.store.set(&disabled_key(&self.id), "true").await
    }

    pub async fn enable(&self) -> Result<()> {
        self.store.delete(&disabled_key(&self.id)).await
    }

    pub async fn disabled(&self) -> Result<bool> {
        Ok(self.store.get(&disabled_key(&self.id)).await?.is_some())
    }

    /// Forget the last run, making the job due on the next eligible tick.
    pub async fn clear(&mut self) -> Result<()> {
        self.store.delete(&last_ran_key(&self.id)).await?;
        self.last_ran = None;
        Ok(())
    }

    /// Earliest instant at or after `now` when the job could next run,
    /// ignoring the predicate. `None` if it never becomes due again.
    pub fn next_run_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = now.with_timezone(&self.timezone);
        let due = match (&self.every, self.last_ran) {
            (Some(every), Some(last)) => every
                .next_at(last.with_timezone(&self.timezone))?
                .max(local),
            _ => local,
        };
        let next = match &self.at {
            Some(window) => window.next_at(due).max(due),
            None => due,
        };
        Some(next.with_timezone(&Utc))
    }

    pub async fn status(&self, now: DateTime<Utc>) -> Result<JobStatus> {
        Ok(JobStatus {
            id: self.id.clone(),
            name: self.name.clone(),
            category: self.category.clone(),
            every: self.every.as_ref().map(ToString::to_string),
            at: self.at.as_ref().map(ToString::to_string),
            last_ran: self.last_ran,
            next_run: self.next_run_at(now),
            disabled: self.disabled().await?,
            running: self.running(),
        })
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("every", &self.every)
            .field("at", &self.at)
            .field("last_ran", &self.last_ran)
            .field("running", &self.running())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::TimeZone;

    fn ctx() -> SchedulerContext {
        let store = Arc::new(MemoryStore::new());
        SchedulerContext::new(store.clone(), store)
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[tokio::test]
    async fn display_joins_category_and_name() {
        let ctx = ctx();
        let plain = Job::builder("ping").build(&ctx).await.unwrap();
        assert_eq!(plain.to_string(), "ping");

        let grouped = Job::builder("rollup").category("billing").build(&ctx).await.unwrap();
        assert_eq!(grouped.to_string(), "billing.rollup");
        assert_eq!(grouped.id(), "billing.rollup");
        assert_eq!(grouped.category(), Some("billing"));
    }

    #[tokio::test]
    async fn bad_specs_fail_at_build() {
        let ctx = ctx();
        let err = Job::builder("j").every("fortnight").build(&ctx).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Parse(_)));

        let err = Job::builder("j").every("day").at("25:00").build(&ctx).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Parse(_)));

        let err = Job::builder("  ").build(&ctx).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidJob(_)));
    }

    #[tokio::test]
    async fn window_without_interval_still_builds() {
        let mut job = Job::builder("chatty").at("10:00").build(&ctx()).await.unwrap();
        assert_eq!(job.run(at(2023, 1, 1, 10, 0)).await.unwrap(), RunOutcome::Started);
        // Nothing but the window gates it, so the next tick inside it runs again.
        assert_eq!(job.run(at(2023, 1, 1, 10, 0)).await.unwrap(), RunOutcome::Started);
    }

    #[tokio::test]
    async fn predicate_gates_runs() {
        use chrono::{Datelike, Weekday};
        let mut job = Job::builder("weekdays")
            .every("day")
            .only_if(|t| !matches!(t.weekday(), Weekday::Sat | Weekday::Sun))
            .build(&ctx())
            .await
            .unwrap();
        // 2023-01-01 is a Sunday.
        assert_eq!(job.run(at(2023, 1, 1, 12, 0)).await.unwrap(), RunOutcome::Ineligible);
        assert_eq!(job.last_ran(), None);
        assert_eq!(job.run(at(2023, 1, 2, 12, 0)).await.unwrap(), RunOutcome::Started);
    }

    #[tokio::test]
    async fn clear_forgets_last_run() {
        let mut job = Job::builder("daily").every("day").build(&ctx()).await.unwrap();
        assert_eq!(job.run(at(2023, 1, 1, 0, 0)).await.unwrap(), RunOutcome::Started);
        assert_eq!(job.run(at(2023, 1, 1, 1, 0)).await.unwrap(), RunOutcome::Ineligible);

        job.clear().await.unwrap();
        assert_eq!(job.last_ran(), None);
        assert_eq!(job.run(at(2023, 1, 1, 1, 0)).await.unwrap(), RunOutcome::Started);
    }

    #[tokio::test]
    async fn next_run_combines_interval_and_window() {
        let mut job = Job::builder("nightly")
            .every("day")
            .at("03:00")
            .build(&ctx().with_grace(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(job.next_run_at(at(2023, 1, 1, 2, 0)), Some(at(2023, 1, 1, 3, 0)));

        assert_eq!(job.run(at(2023, 1, 1, 3, 0)).await.unwrap(), RunOutcome::Started);
        assert_eq!(job.next_run_at(at(2023, 1, 1, 3, 5)), Some(at(2023, 1, 2, 3, 0)));

        let status = job.status(at(2023, 1, 1, 3, 5)).await.unwrap();
        assert_eq!(status.every.as_deref(), Some("day"));
        assert_eq!(status.at.as_deref(), Some("03:00"));
        assert_eq!(status.last_ran, Some(at(2023, 1, 1, 3, 0)));
        assert!(!status.disabled);
    }

    #[tokio::test]
    async fn unparseable_last_run_is_ignored() {
        let ctx = ctx();
        ctx.store.set(&last_ran_key("odd"), "yesterday").await.unwrap();
        let job = Job::builder("odd").every("day").build(&ctx).await.unwrap();
        assert_eq!(job.last_ran(), None);
    }

    #[tokio::test]
    async fn stop_without_run_is_noop() {
        let mut job = Job::builder("idle").build(&ctx()).await.unwrap();
        assert!(!job.running());
        assert_eq!(job.stop().await, StopOutcome::NotRunning);
    }
}
