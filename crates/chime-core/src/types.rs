use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Raw recurrence period as written in a job definition.
///
/// Numbers are taken as seconds; strings are keywords (`"day"`, `"month"`…)
/// resolved later by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EverySpec {
    Raw(Duration),
    Keyword(String),
}

impl EverySpec {
    pub fn seconds(secs: u64) -> Self {
        EverySpec::Raw(Duration::from_secs(secs))
    }

    pub fn keyword(name: impl Into<String>) -> Self {
        EverySpec::Keyword(name.into())
    }
}

impl From<Duration> for EverySpec {
    fn from(d: Duration) -> Self {
        EverySpec::Raw(d)
    }
}

impl From<&str> for EverySpec {
    fn from(s: &str) -> Self {
        EverySpec::Keyword(s.to_string())
    }
}

impl std::fmt::Display for EverySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EverySpec::Raw(d) => write!(f, "{}s", d.as_secs()),
            EverySpec::Keyword(k) => write!(f, "{k}"),
        }
    }
}

#[derive(Deserialize, Serialize)]
#[serde(untagged)]
enum EveryRepr {
    Seconds(u64),
    Keyword(String),
}

impl Serialize for EverySpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            EverySpec::Raw(d) => EveryRepr::Seconds(d.as_secs()).serialize(serializer),
            EverySpec::Keyword(k) => EveryRepr::Keyword(k.clone()).serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for EverySpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match EveryRepr::deserialize(deserializer)? {
            EveryRepr::Seconds(secs) => EverySpec::seconds(secs),
            EveryRepr::Keyword(k) => EverySpec::Keyword(k),
        })
    }
}

/// Raw time-of-day window: one pattern (`"10:30"`, `"mon 09:00"`) or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AtSpec {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for AtSpec {
    fn from(s: &str) -> Self {
        AtSpec::One(s.to_string())
    }
}

impl From<Vec<&str>> for AtSpec {
    fn from(v: Vec<&str>) -> Self {
        AtSpec::Many(v.into_iter().map(String::from).collect())
    }
}

impl std::fmt::Display for AtSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AtSpec::One(s) => write!(f, "{s}"),
            AtSpec::Many(v) => write!(f, "{}", v.join(", ")),
        }
    }
}
