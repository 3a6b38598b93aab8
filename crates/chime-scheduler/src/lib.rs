//! `chime-scheduler` — recurring jobs that run once per period across a fleet.
//!
//! # Overview
//!
//! Each [`Job`] is offered the current time on every tick by the
//! [`SchedulerEngine`]. A job runs when its interval has elapsed since the
//! last recorded run, its time-of-day window is open and its predicate (if
//! any) agrees. The decision is re-checked under a distributed lock against
//! the shared store, so any number of scheduler processes can drive the same
//! job set and each run is accepted exactly once.
//!
//! # Specs
//!
//! | `every`        | Period                          |
//! |----------------|---------------------------------|
//! | integer        | that many seconds               |
//! | `day` / `week` | 1 / 7 calendar days             |
//! | `month`        | 1 calendar month                |
//! | `semiannual`   | 6 calendar months               |
//! | `year`         | 12 calendar months              |
//! | `decade`       | 120 calendar months             |
//!
//! | `at`           | Window                          |
//! |----------------|---------------------------------|
//! | `10:30`        | daily at 10:30                  |
//! | `**:15`        | hourly at minute 15             |
//! | `11:**`        | every minute of 11h             |
//! | `mon 09:00`    | Mondays at 09:00                |
//! | `[a, b, …]`    | whenever any of the patterns is |
//!
//! # Backends
//!
//! [`memory::MemoryStore`] for tests and single-process use;
//! [`redis_store::RedisStore`] for a fleet.

pub mod at;
pub mod engine;
pub mod error;
pub mod every;
mod local;
pub mod job;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use at::{At, Window};
pub use engine::SchedulerEngine;
pub use error::{ParseError, Result, SchedulerError};
pub use every::{Every, Period};
pub use job::{
    Job, JobBody, JobBuilder, JobStatus, Predicate, RunOutcome, SchedulerContext, StopOutcome,
};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use store::{DistributedLock, LockToken, SharedStore};
