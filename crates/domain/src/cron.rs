//! Pure cron occurrence evaluation in named IANA timezones.

use capstan_core::AppError;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use thiserror::Error;

/// Failure while parsing a cron specification.
#[derive(Debug, Error)]
pub enum CronError {
    /// Expression could not be parsed.
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron {
        /// Offending expression.
        expression: String,
        /// Parser failure detail.
        reason: String,
    },

    /// Timezone is not a known IANA zone.
    #[error("invalid timezone '{timezone}'")]
    InvalidTimezone {
        /// Offending timezone name.
        timezone: String,
    },
}

impl From<CronError> for AppError {
    fn from(error: CronError) -> Self {
        AppError::Validation(error.to_string())
    }
}

/// A parsed cron expression bound to an IANA timezone.
///
/// Occurrences are evaluated in the named zone and always reported in UTC.
/// Six-field expressions run at second granularity; five-field expressions at
/// minute granularity.
#[derive(Debug, Clone)]
pub struct CronSpec {
    schedule: Schedule,
    timezone: Tz,
}

impl CronSpec {
    /// Parses an expression and timezone pair.
    pub fn parse(expression: &str, timezone: &str) -> Result<Self, CronError> {
        let expression = expression.trim();
        let normalized = normalize_expression(expression)?;

        let schedule =
            Schedule::from_str(normalized.as_str()).map_err(|error| CronError::InvalidCron {
                expression: expression.to_owned(),
                reason: error.to_string(),
            })?;

        let timezone = timezone
            .trim()
            .parse::<Tz>()
            .map_err(|_| CronError::InvalidTimezone {
                timezone: timezone.to_owned(),
            })?;

        Ok(Self { schedule, timezone })
    }

    /// Returns the first occurrence strictly after `after`, in UTC.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.timezone))
            .next()
            .map(|occurrence| occurrence.with_timezone(&Utc))
    }

    /// Returns ascending occurrences starting at `from` (inclusive when `from`
    /// is itself an occurrence). The iterator is unbounded.
    pub fn occurrences_from(
        &self,
        from: DateTime<Utc>,
    ) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        let exclusive_start = (from - Duration::milliseconds(1)).with_timezone(&self.timezone);
        self.schedule
            .after(&exclusive_start)
            .map(|occurrence| occurrence.with_timezone(&Utc))
    }

    /// Returns ascending occurrences within `[from, to]`.
    #[must_use]
    pub fn occurrences_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        self.occurrences_from(from)
            .take_while(|occurrence| *occurrence <= to)
            .collect()
    }
}

/// The `cron` crate expects a seconds field; standard five-field expressions
/// get a literal `0` prepended so they keep minute granularity.
fn normalize_expression(expression: &str) -> Result<String, CronError> {
    if expression.starts_with('@') {
        return Ok(expression.to_owned());
    }

    match expression.split_whitespace().count() {
        5 => Ok(format!("0 {expression}")),
        6 | 7 => Ok(expression.to_owned()),
        count => Err(CronError::InvalidCron {
            expression: expression.to_owned(),
            reason: format!("expected 5, 6, or 7 fields, got {count}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{CronError, CronSpec};
    use chrono::{DateTime, TimeZone, Utc};

    fn utc(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
    ) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
            .single()
            .unwrap_or_default()
    }

    #[test]
    fn six_field_expressions_run_at_second_granularity() {
        let spec = CronSpec::parse("*/30 * * * * *", "UTC");
        assert!(spec.is_ok());
        let spec = spec.unwrap_or_else(|_| unreachable!());

        let occurrences: Vec<_> = spec
            .occurrences_from(utc(2024, 1, 1, 0, 0, 0))
            .take(3)
            .collect();

        assert_eq!(
            occurrences,
            vec![
                utc(2024, 1, 1, 0, 0, 0),
                utc(2024, 1, 1, 0, 0, 30),
                utc(2024, 1, 1, 0, 1, 0),
            ]
        );
    }

    #[test]
    fn five_field_expressions_run_at_minute_granularity() {
        let spec = CronSpec::parse("*/5 * * * *", "UTC");
        assert!(spec.is_ok());
        let spec = spec.unwrap_or_else(|_| unreachable!());

        let occurrences: Vec<_> = spec
            .occurrences_from(utc(2024, 1, 1, 0, 0, 0))
            .take(2)
            .collect();

        assert_eq!(
            occurrences,
            vec![utc(2024, 1, 1, 0, 0, 0), utc(2024, 1, 1, 0, 5, 0)]
        );
    }

    #[test]
    fn next_after_is_strictly_exclusive() {
        let spec = CronSpec::parse("*/30 * * * * *", "UTC");
        assert!(spec.is_ok());
        let spec = spec.unwrap_or_else(|_| unreachable!());

        assert_eq!(
            spec.next_after(utc(2024, 1, 1, 0, 4, 30)),
            Some(utc(2024, 1, 1, 0, 5, 0))
        );
        assert_eq!(
            spec.next_after(utc(2024, 1, 1, 0, 5, 10)),
            Some(utc(2024, 1, 1, 0, 5, 30))
        );
    }

    #[test]
    fn occurrences_between_bounds_are_inclusive() {
        let spec = CronSpec::parse("*/30 * * * * *", "UTC");
        assert!(spec.is_ok());
        let spec = spec.unwrap_or_else(|_| unreachable!());

        let occurrences =
            spec.occurrences_between(utc(2024, 1, 1, 0, 0, 0), utc(2024, 1, 1, 0, 1, 0));

        assert_eq!(
            occurrences,
            vec![
                utc(2024, 1, 1, 0, 0, 0),
                utc(2024, 1, 1, 0, 0, 30),
                utc(2024, 1, 1, 0, 1, 0),
            ]
        );
    }

    #[test]
    fn evaluates_in_named_zone_and_reports_utc() {
        // 09:00 local in New York is 14:00 UTC while EST is in effect.
        let spec = CronSpec::parse("0 0 9 * * *", "America/New_York");
        assert!(spec.is_ok());
        let spec = spec.unwrap_or_else(|_| unreachable!());

        assert_eq!(
            spec.next_after(utc(2024, 1, 15, 0, 0, 0)),
            Some(utc(2024, 1, 15, 14, 0, 0))
        );
    }

    // Pins the library behavior for local times skipped by spring-forward:
    // the occurrence on the gap day is dropped and ordering stays strictly
    // ascending in UTC.
    #[test]
    fn handles_spring_forward_gap() {
        let spec = CronSpec::parse("0 30 2 * * *", "America/New_York");
        assert!(spec.is_ok());
        let spec = spec.unwrap_or_else(|_| unreachable!());

        let occurrences =
            spec.occurrences_between(utc(2024, 3, 9, 0, 0, 0), utc(2024, 3, 12, 0, 0, 0));

        // 02:30 EST on Mar 9 and 02:30 EDT on Mar 11 must both be present.
        assert!(occurrences.contains(&utc(2024, 3, 9, 7, 30, 0)));
        assert!(occurrences.contains(&utc(2024, 3, 11, 6, 30, 0)));
        for pair in occurrences.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn rejects_malformed_expressions() {
        let result = CronSpec::parse("not a cron", "UTC");
        assert!(matches!(result, Err(CronError::InvalidCron { .. })));

        let result = CronSpec::parse("* * * *", "UTC");
        assert!(matches!(result, Err(CronError::InvalidCron { .. })));
    }

    #[test]
    fn rejects_unknown_timezones() {
        let result = CronSpec::parse("*/5 * * * *", "Mars/Olympus_Mons");
        assert!(matches!(result, Err(CronError::InvalidTimezone { .. })));
    }
}
