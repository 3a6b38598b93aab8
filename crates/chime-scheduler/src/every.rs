use chrono::{DateTime, Days, Months, TimeDelta};
use chrono_tz::Tz;

use chime_core::EverySpec;

use crate::error::ParseError;
use crate::local::resolve_local;

/// Resolved recurrence period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    /// Exact elapsed time, independent of the calendar.
    Exact(TimeDelta),
    /// Calendar days: wall-clock time is kept across DST changes.
    Days(u64),
    /// Calendar months: the day is clamped to the end of shorter months.
    Months(u32),
}

/// How often a job may run, anchored to its last recorded run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Every {
    period: Period,
    spec: EverySpec,
}

fn keyword_period(keyword: &str) -> Option<Period> {
    match keyword {
        "day" => Some(Period::Days(1)),
        "week" => Some(Period::Days(7)),
        "month" => Some(Period::Months(1)),
        "semiannual" => Some(Period::Months(6)),
        "year" => Some(Period::Months(12)),
        "decade" => Some(Period::Months(120)),
        _ => None,
    }
}

impl Every {
    /// Parse an optional spec. `None` means the job has no interval.
    pub fn parse(spec: Option<&EverySpec>) -> Result<Option<Self>, ParseError> {
        spec.map(Self::from_spec).transpose()
    }

    pub fn from_spec(spec: &EverySpec) -> Result<Self, ParseError> {
        let period = match spec {
            EverySpec::Raw(d) => TimeDelta::from_std(*d)
                .map(Period::Exact)
                .map_err(|_| ParseError::Every(spec.to_string()))?,
            EverySpec::Keyword(k) => keyword_period(&k.trim().to_lowercase())
                .ok_or_else(|| ParseError::Every(k.clone()))?,
        };
        Ok(Self {
            period,
            spec: spec.clone(),
        })
    }

    pub fn period(&self) -> Period {
        self.period
    }

    /// Earliest instant the job may run again after running at `last`.
    ///
    /// `None` when that instant is past the end of the representable calendar,
    /// i.e. the job never becomes due again.
    pub fn next_at(&self, last: DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = last.timezone();
        match self.period {
            Period::Exact(delta) => last.checked_add_signed(delta),
            Period::Days(n) => last
                .naive_local()
                .checked_add_days(Days::new(n))
                .map(|naive| resolve_local(&tz, naive)),
            Period::Months(n) => last
                .naive_local()
                .checked_add_months(Months::new(n))
                .map(|naive| resolve_local(&tz, naive)),
        }
    }
}

impl std::fmt::Display for Every {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Tz> {
        chrono_tz::UTC.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn every(keyword: &str) -> Every {
        Every::from_spec(&EverySpec::keyword(keyword)).unwrap()
    }

    #[test]
    fn day_and_week_keywords() {
        assert_eq!(every("day").next_at(utc(2023, 1, 1, 0, 0)), Some(utc(2023, 1, 2, 0, 0)));
        assert_eq!(every("week").next_at(utc(2023, 1, 1, 0, 0)), Some(utc(2023, 1, 8, 0, 0)));
    }

    #[test]
    fn month_keywords_use_calendar_arithmetic() {
        let next = |e: &str, from| every(e).next_at(from).unwrap();
        assert_eq!(next("month", utc(2023, 1, 31, 12, 0)), utc(2023, 2, 28, 12, 0));
        assert_eq!(next("month", utc(2024, 1, 31, 12, 0)), utc(2024, 2, 29, 12, 0));
        assert_eq!(next("semiannual", utc(2023, 8, 31, 0, 0)), utc(2024, 2, 29, 0, 0));
        assert_eq!(next("year", utc(2024, 2, 29, 0, 0)), utc(2025, 2, 28, 0, 0));
        assert_eq!(next("decade", utc(2023, 1, 1, 0, 0)), utc(2033, 1, 1, 0, 0));
    }

    #[test]
    fn day_keeps_wall_clock_across_dst() {
        let berlin = chrono_tz::Europe::Berlin;
        // 2023-03-26 is the spring-forward day in Berlin.
        let before = berlin.with_ymd_and_hms(2023, 3, 25, 9, 0, 0).unwrap();
        let next = every("day").next_at(before).unwrap();
        assert_eq!(next, berlin.with_ymd_and_hms(2023, 3, 26, 9, 0, 0).unwrap());
        assert_eq!((next - before).num_hours(), 23);
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(every("DAY").period(), Period::Days(1));
        assert_eq!(every("Decade").period(), Period::Months(120));
    }

    #[test]
    fn raw_duration_is_used_verbatim() {
        let e = Every::from_spec(&EverySpec::Raw(Duration::from_secs(90))).unwrap();
        assert_eq!(
            e.next_at(utc(2023, 1, 1, 0, 0)),
            Some(utc(2023, 1, 1, 0, 1) + TimeDelta::seconds(30))
        );
    }

    #[test]
    fn period_past_the_calendar_is_never_due() {
        let huge = Every::from_spec(&EverySpec::Raw(Duration::from_secs(10_000_000_000_000))).unwrap();
        assert_eq!(huge.next_at(utc(2023, 1, 1, 0, 0)), None);
    }

    #[test]
    fn unknown_keywords_fail() {
        for bad in ["fortnight", "60", "", "days"] {
            let err = Every::from_spec(&EverySpec::keyword(bad)).unwrap_err();
            assert_eq!(err, ParseError::Every(bad.to_string()));
        }
    }

    #[test]
    fn absent_spec_is_none() {
        assert_eq!(Every::parse(None).unwrap(), None);
    }
}
