//! Calendar-day helpers for a fixed UTC offset

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};

fn fixed_offset(offset_minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(offset_minutes * 60).unwrap_or_else(|| Utc.fix())
}

/// Calendar date of `now` for a user `offset_minutes` east of UTC
pub fn local_date(now: DateTime<Utc>, offset_minutes: i32) -> NaiveDate {
    now.with_timezone(&fixed_offset(offset_minutes)).date_naive()
}

/// UTC instant at which the local day containing `now` began
pub fn start_of_day(now: DateTime<Utc>, offset_minutes: i32) -> DateTime<Utc> {
    let midnight = local_date(now, offset_minutes)
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default();
    let utc = midnight - Duration::seconds(fixed_offset(offset_minutes).local_minus_utc() as i64);
    DateTime::<Utc>::from_naive_utc_and_offset(utc, Utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_local_date_crosses_midnight() {
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 22, 30, 0).unwrap();
        assert_eq!(local_date(now, 0), NaiveDate::from_ymd_opt(2026, 3, 9).unwrap());
        assert_eq!(local_date(now, 120), NaiveDate::from_ymd_opt(2026, 3, 10).unwrap());
        assert_eq!(local_date(now, -23 * 60), NaiveDate::from_ymd_opt(2026, 3, 8).unwrap());
    }

    #[test]
    fn test_start_of_day() {
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 22, 30, 0).unwrap();
        assert_eq!(
            start_of_day(now, 0),
            Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap()
        );
        // Local day 2026-03-10 at +02:00 began at 22:00 UTC on the 9th
        assert_eq!(
            start_of_day(now, 120),
            Utc.with_ymd_and_hms(2026, 3, 9, 22, 0, 0).unwrap()
        );
    }
}
