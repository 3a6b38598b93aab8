use std::time::Duration;

use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{ChimeError, Result};
use crate::types::{AtSpec, EverySpec};

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_GRACE_SECS: u64 = 15 * 60;
pub const DEFAULT_LONG_RUNNING_TIMEOUT_SECS: u64 = 12 * 60 * 60;
pub const DEFAULT_TICK_MS: u64 = 1_000;
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 5;

/// Top-level config (chime.toml + CHIME_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChimeConfig {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub jobs: Vec<JobDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

/// Settings shared by every job registered with one scheduler process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA timezone that `at` windows and calendar periods are evaluated in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// How late a window may still fire, to absorb tick jitter and restarts.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    /// Age after which a held run lock is presumed abandoned. Must exceed the
    /// longest expected critical section.
    #[serde(default = "default_long_running_timeout_secs")]
    pub long_running_timeout_secs: u64,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Publish a per-process heartbeat key every tick.
    #[serde(default = "bool_true")]
    pub heartbeat: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            grace_secs: DEFAULT_GRACE_SECS,
            long_running_timeout_secs: DEFAULT_LONG_RUNNING_TIMEOUT_SECS,
            tick_ms: DEFAULT_TICK_MS,
            heartbeat: true,
        }
    }
}

impl SchedulerConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| ChimeError::Config(format!("invalid timezone {:?}: {e}", self.timezone)))
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    pub fn long_running_timeout(&self) -> Duration {
        Duration::from_secs(self.long_running_timeout_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

/// A declarative job entry from `[[jobs]]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    pub category: Option<String>,
    pub every: Option<EverySpec>,
    pub at: Option<AtSpec>,
    /// Shell command executed via `sh -c` on every accepted run.
    pub command: String,
    /// Seconds a stopping job gets to exit before it is killed.
    #[serde(default = "default_stop_timeout_secs")]
    pub timeout_secs: u64,
}

impl JobDefinition {
    /// `category.name`, or just `name` without a category.
    pub fn id(&self) -> String {
        match &self.category {
            Some(c) => format!("{c}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_redis_url() -> String {
    DEFAULT_REDIS_URL.to_string()
}
fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}
fn default_grace_secs() -> u64 {
    DEFAULT_GRACE_SECS
}
fn default_long_running_timeout_secs() -> u64 {
    DEFAULT_LONG_RUNNING_TIMEOUT_SECS
}
fn default_tick_ms() -> u64 {
    DEFAULT_TICK_MS
}
fn default_stop_timeout_secs() -> u64 {
    DEFAULT_STOP_TIMEOUT_SECS
}

impl ChimeConfig {
    /// Load config from a TOML file with CHIME_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. `CHIME_CONFIG` env var
    ///   3. ~/.chime/chime.toml
    ///
    /// Nested keys use a double underscore, e.g. `CHIME_SCHEDULER__TIMEZONE`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("CHIME_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        Self::extract(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("CHIME_").split("__")),
        )
    }

    /// Parse config from an in-memory TOML document (no env overrides).
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::extract(Figment::new().merge(Toml::string(toml)))
    }

    /// Look up a job definition by its `category.name` id.
    pub fn job(&self, id: &str) -> Result<&JobDefinition> {
        self.jobs
            .iter()
            .find(|j| j.id() == id)
            .ok_or_else(|| ChimeError::JobNotFound { id: id.to_string() })
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: ChimeConfig = figment
            .extract()
            .map_err(|e| ChimeError::Config(e.to_string()))?;
        config.scheduler.tz()?;
        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.chime/chime.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = ChimeConfig::from_toml_str("").unwrap();
        assert_eq!(config.redis.url, DEFAULT_REDIS_URL);
        assert_eq!(config.scheduler.timezone, "UTC");
        assert_eq!(config.scheduler.grace(), Duration::from_secs(900));
        assert_eq!(
            config.scheduler.long_running_timeout(),
            Duration::from_secs(43_200)
        );
        assert!(config.scheduler.heartbeat);
        assert!(config.jobs.is_empty());
    }

    #[test]
    fn parses_jobs_table() {
        let config = ChimeConfig::from_toml_str(
            r#"
            [scheduler]
            timezone = "Europe/Berlin"

            [[jobs]]
            name = "rollup"
            category = "billing"
            every = "day"
            at = "03:00"
            command = "echo rollup"

            [[jobs]]
            name = "ping"
            every = 30
            command = "echo ping"
            timeout_secs = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.tz().unwrap(), chrono_tz::Europe::Berlin);
        assert_eq!(config.jobs.len(), 2);

        let rollup = config.job("billing.rollup").unwrap();
        assert_eq!(rollup.every, Some(EverySpec::keyword("day")));
        assert_eq!(rollup.at, Some(AtSpec::from("03:00")));
        assert_eq!(rollup.timeout_secs, DEFAULT_STOP_TIMEOUT_SECS);

        let ping = config.job("ping").unwrap();
        assert_eq!(ping.every, Some(EverySpec::seconds(30)));
        assert_eq!(ping.timeout_secs, 1);
    }

    #[test]
    fn rejects_unknown_timezone() {
        let err = ChimeConfig::from_toml_str("[scheduler]\ntimezone = \"Mars/Olympus\"\n")
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn unknown_job_id_is_not_found() {
        let config = ChimeConfig::from_toml_str("").unwrap();
        assert!(matches!(
            config.job("nope"),
            Err(ChimeError::JobNotFound { .. })
        ));
    }
}
