use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use meshrelay_core::{ScheduleKind, Timestamp};

use crate::error::{Result, SchedulerError};

/// Computes the next UTC fire instant for `kind` strictly after `from`, in
/// `timezone` for cron expressions (§4.5 step 2). Returns `None` when the
/// schedule is exhausted — a `once` task whose instant has already passed.
pub fn compute_next_run(kind: &ScheduleKind, from: DateTime<Utc>, timezone: &str) -> Result<Option<Timestamp>> {
    match kind {
        ScheduleKind::Once { at } => {
            let at_dt = parse_timestamp(at)?;
            if at_dt > from {
                Ok(Some(at.clone()))
            } else {
                Ok(None)
            }
        }

        ScheduleKind::Interval { ms } => {
            let next = from + chrono::Duration::milliseconds(*ms);
            Ok(Some(Timestamp(next.to_rfc3339())))
        }

        ScheduleKind::Cron { expression } => {
            let tz: Tz = timezone
                .parse()
                .map_err(|_| SchedulerError::UnknownTimezone(timezone.to_string()))?;
            let normalized = normalize_cron_expression(expression);
            let schedule = CronSchedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
                expression: expression.clone(),
                reason: e.to_string(),
            })?;
            let from_tz = from.with_timezone(&tz);
            let next = schedule.after(&from_tz).next();
            Ok(next.map(|dt| Timestamp(dt.with_timezone(&Utc).to_rfc3339())))
        }
    }
}

/// The `cron` crate requires a leading seconds field (6 or 7 fields), but
/// §8's canonical task expressions are 5-field POSIX cron (`*/5 * * * *`).
/// Prepend a `0` seconds field when the expression has exactly 5
/// whitespace-separated fields; leave 6-/7-field expressions untouched.
fn normalize_cron_expression(expression: &str) -> String {
    if expression.split_whitespace().count() == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}

fn parse_timestamp(ts: &Timestamp) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts.as_str())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SchedulerError::InvalidCron {
            expression: ts.as_str().to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_fires_only_while_in_future() {
        let now = Utc::now();
        let future = Timestamp((now + chrono::Duration::hours(1)).to_rfc3339());
        let past = Timestamp((now - chrono::Duration::hours(1)).to_rfc3339());

        let kind = ScheduleKind::Once { at: future.clone() };
        assert_eq!(compute_next_run(&kind, now, "UTC").unwrap(), Some(future));

        let kind = ScheduleKind::Once { at: past };
        assert_eq!(compute_next_run(&kind, now, "UTC").unwrap(), None);
    }

    #[test]
    fn interval_adds_milliseconds() {
        let now = Utc::now();
        let kind = ScheduleKind::Interval { ms: 60_000 };
        let next = compute_next_run(&kind, now, "UTC").unwrap().unwrap();
        let next_dt = parse_timestamp(&next).unwrap();
        assert!(next_dt >= now + chrono::Duration::milliseconds(59_000));
    }

    #[test]
    fn cron_computes_next_fire_strictly_after_now() {
        let now = Utc::now();
        let kind = ScheduleKind::Cron { expression: "0 * * * * *".to_string() };
        let next = compute_next_run(&kind, now, "UTC").unwrap().unwrap();
        let next_dt = parse_timestamp(&next).unwrap();
        assert!(next_dt > now);
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let now = Utc::now();
        let kind = ScheduleKind::Cron { expression: "0 * * * * *".to_string() };
        let err = compute_next_run(&kind, now, "Not/A_Zone").unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownTimezone(_)));
    }

    #[test]
    fn five_field_posix_cron_is_accepted() {
        let now = Utc::now();
        let kind = ScheduleKind::Cron { expression: "*/5 * * * *".to_string() };
        let next = compute_next_run(&kind, now, "UTC").unwrap().unwrap();
        let next_dt = parse_timestamp(&next).unwrap();
        assert!(next_dt > now);
        assert!(next_dt <= now + chrono::Duration::minutes(5));
    }

    #[test]
    fn bad_cron_expression_is_rejected() {
        let now = Utc::now();
        let kind = ScheduleKind::Cron { expression: "not a cron expr".to_string() };
        let err = compute_next_run(&kind, now, "UTC").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidCron { .. }));
    }
}
