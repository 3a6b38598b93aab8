//! `chime-core` — configuration and shared definitions for the chime scheduler.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ChimeConfig, JobDefinition, RedisConfig, SchedulerConfig};
pub use error::{ChimeError, Result};
pub use types::{AtSpec, EverySpec};
