//! Recurrence calculator — pure schedule arithmetic.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use nudgebot_core::types::Recurrence;

/// Compute the next occurrence after `last` for a recurrence policy.
///
/// Monthly advances one calendar month and preserves the day-of-month;
/// when the target month is shorter, the day clamps to its last valid day
/// (Jan 31 → Feb 28, or Feb 29 in leap years). A non-positive interval
/// yields `None`, which callers treat as "no recurrence".
pub fn next_occurrence(last: DateTime<Utc>, policy: &Recurrence) -> Option<DateTime<Utc>> {
    match policy {
        Recurrence::Daily => Some(last + Duration::days(1)),
        Recurrence::Weekly => Some(last + Duration::days(7)),
        Recurrence::Interval { days } if *days > 0 => Some(last + Duration::days(*days)),
        Recurrence::Interval { .. } => None,
        Recurrence::Monthly => add_month_clamped(last),
    }
}

fn add_month_clamped(last: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if last.month() == 12 {
        (last.year() + 1, 1)
    } else {
        (last.year(), last.month() + 1)
    };
    let day = last.day().min(days_in_month(year, month));
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(DateTime::from_naive_utc_and_offset(
        date.and_time(last.time()),
        Utc,
    ))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_daily_is_24h() {
        let last = at(2026, 3, 10, 10, 0);
        assert_eq!(
            next_occurrence(last, &Recurrence::Daily),
            Some(last + Duration::hours(24))
        );
    }

    #[test]
    fn test_weekly_is_7_days() {
        let last = at(2026, 3, 10, 10, 0);
        assert_eq!(
            next_occurrence(last, &Recurrence::Weekly),
            Some(last + Duration::days(7))
        );
    }

    #[test]
    fn test_interval_3_is_72h() {
        let last = at(2026, 3, 10, 10, 0);
        assert_eq!(
            next_occurrence(last, &Recurrence::Interval { days: 3 }),
            Some(last + Duration::hours(72))
        );
    }

    #[test]
    fn test_interval_non_positive_is_none() {
        let last = at(2026, 3, 10, 10, 0);
        assert_eq!(next_occurrence(last, &Recurrence::Interval { days: 0 }), None);
        assert_eq!(next_occurrence(last, &Recurrence::Interval { days: -2 }), None);
    }

    #[test]
    fn test_monthly_plain() {
        assert_eq!(
            next_occurrence(at(2026, 3, 15, 9, 30), &Recurrence::Monthly),
            Some(at(2026, 4, 15, 9, 30))
        );
    }

    #[test]
    fn test_monthly_clamps_to_short_month() {
        // Jan 31 → Feb 28 in a non-leap year.
        assert_eq!(
            next_occurrence(at(2026, 1, 31, 10, 0), &Recurrence::Monthly),
            Some(at(2026, 2, 28, 10, 0))
        );
        // Mar 31 → Apr 30.
        assert_eq!(
            next_occurrence(at(2026, 3, 31, 10, 0), &Recurrence::Monthly),
            Some(at(2026, 4, 30, 10, 0))
        );
    }

    #[test]
    fn test_monthly_leap_february() {
        assert_eq!(
            next_occurrence(at(2024, 1, 31, 10, 0), &Recurrence::Monthly),
            Some(at(2024, 2, 29, 10, 0))
        );
    }

    #[test]
    fn test_monthly_december_wraps_year() {
        assert_eq!(
            next_occurrence(at(2026, 12, 31, 23, 59), &Recurrence::Monthly),
            Some(at(2027, 1, 31, 23, 59))
        );
    }
}
