//! Time-of-day windows (`at = "10:30"`, `at = "mon 09:00"`, `at = "**:15"`).

use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveTime, TimeDelta, Timelike, Weekday};
use chrono_tz::Tz;

use chime_core::AtSpec;

use crate::error::ParseError;
use crate::local::resolve_local;

fn is_wild(c: char) -> bool {
    c == '*' || c.eq_ignore_ascii_case(&'x')
}

fn weekday(name: &str) -> Option<Weekday> {
    match name {
        "sun" | "sunday" => Some(Weekday::Sun),
        "mon" | "monday" => Some(Weekday::Mon),
        "tue" | "tues" | "tuesday" => Some(Weekday::Tue),
        "wed" | "weds" | "wednesday" => Some(Weekday::Wed),
        "thu" | "thur" | "thurs" | "thursday" => Some(Weekday::Thu),
        "fri" | "friday" => Some(Weekday::Fri),
        "sat" | "saturday" => Some(Weekday::Sat),
        _ => None,
    }
}

/// A single window pattern. `None` fields are wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct At {
    minute: Option<u32>,
    hour: Option<u32>,
    wday: Option<Weekday>,
    grace: TimeDelta,
}

impl At {
    pub fn parse(input: &str, grace: Duration) -> Result<Self, ParseError> {
        let fail = || ParseError::At(input.to_string());
        let grace = TimeDelta::from_std(grace).map_err(|_| fail())?;
        let trimmed = input.trim();

        if let Some((day, rest)) = trimmed.split_once(char::is_whitespace) {
            if !day.chars().all(char::is_alphabetic) {
                return Err(fail());
            }
            let wday = weekday(&day.to_lowercase()).ok_or_else(fail)?;
            let mut at = Self::parse_time(rest.trim()).ok_or_else(fail)?;
            at.wday = Some(wday);
            at.grace = grace;
            return Ok(at);
        }

        let mut at = Self::parse_time(trimmed).ok_or_else(fail)?;
        at.grace = grace;
        Ok(at)
    }

    /// `H:MM`, `HH:MM`, with `*`/`x` wildcards in either field.
    fn parse_time(s: &str) -> Option<Self> {
        let (hour, minute) = s.split_once(':')?;
        let valid = |c: char| c.is_ascii_digit() || is_wild(c);
        if hour.len() > 2 || minute.len() != 2 || !hour.chars().chain(minute.chars()).all(valid) {
            return None;
        }

        let hour = if hour.is_empty() || hour.chars().any(is_wild) {
            None
        } else {
            Some(hour.parse::<u32>().ok().filter(|h| *h < 24)?)
        };
        let minute = if minute.chars().any(is_wild) {
            None
        } else {
            Some(minute.parse::<u32>().ok().filter(|m| *m < 60)?)
        };

        Some(Self {
            minute,
            hour,
            wday: None,
            grace: TimeDelta::zero(),
        })
    }

    /// Next instant this pattern permits a run, relative to `now`.
    ///
    /// A result at or before `now` means the window is currently open.
    pub fn next_at(&self, now: DateTime<Tz>) -> DateTime<Tz> {
        let local = now.naive_local();
        let midnight = local.date().and_time(NaiveTime::MIN);
        let at_hour = |h: u32| midnight + TimeDelta::hours(i64::from(h));
        let floor = at_hour(local.hour()) + TimeDelta::minutes(i64::from(local.minute()));

        let pinned = match (self.hour, self.minute) {
            (Some(h), Some(m)) => at_hour(h) + TimeDelta::minutes(i64::from(m)),
            (None, Some(m)) => at_hour(local.hour()) + TimeDelta::minutes(i64::from(m)),
            (Some(h), None) if h != local.hour() => at_hour(h),
            _ => floor,
        };

        let candidate = match self.wday {
            Some(wday) => {
                let shift = i64::from(wday.num_days_from_sunday())
                    - i64::from(local.weekday().num_days_from_sunday());
                pinned + TimeDelta::days(shift)
            }
            None => pinned,
        };

        // A grace reaching past the start of the calendar has no lower bound.
        let missed = floor
            .checked_sub_signed(self.grace)
            .is_some_and(|earliest| candidate < earliest);
        let next = if missed {
            candidate
                + match (self.wday, self.hour) {
                    (Some(_), _) => TimeDelta::weeks(1),
                    (None, Some(_)) => TimeDelta::days(1),
                    (None, None) => TimeDelta::hours(1),
                }
        } else {
            candidate
        };

        resolve_local(&now.timezone(), next)
    }
}

impl std::fmt::Display for At {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(wday) = self.wday {
            write!(f, "{wday} ")?;
        }
        match self.hour {
            Some(h) => write!(f, "{h:02}:")?,
            None => write!(f, "**:")?,
        }
        match self.minute {
            Some(m) => write!(f, "{m:02}"),
            None => write!(f, "**"),
        }
    }
}

/// One or more `At` patterns; open whenever any of them is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Window {
    One(At),
    Any(Vec<At>),
}

impl Window {
    /// Parse an optional spec. `None` means the job is not restricted by time of day.
    pub fn parse(spec: Option<&AtSpec>, grace: Duration) -> Result<Option<Self>, ParseError> {
        let Some(spec) = spec else {
            return Ok(None);
        };
        let window = match spec {
            AtSpec::One(s) => Window::One(At::parse(s, grace)?),
            AtSpec::Many(list) if list.is_empty() => {
                return Err(ParseError::At("[]".to_string()));
            }
            AtSpec::Many(list) => Window::Any(
                list.iter()
                    .map(|s| At::parse(s, grace))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        };
        Ok(Some(window))
    }

    pub fn next_at(&self, now: DateTime<Tz>) -> DateTime<Tz> {
        match self {
            Window::One(at) => at.next_at(now),
            Window::Any(ats) => ats
                .iter()
                .map(|at| at.next_at(now))
                .min()
                .unwrap_or(now),
        }
    }

    /// Whether the window is open at `now`.
    pub fn allows(&self, now: DateTime<Tz>) -> bool {
        self.next_at(now) <= now
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Window::One(at) => write!(f, "{at}"),
            Window::Any(ats) => {
                let parts: Vec<String> = ats.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(", "))
            }
        }
    }
}
