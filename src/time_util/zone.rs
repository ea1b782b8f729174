use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// The UTC time of day matching the wall-clock `local` time in `tz`, on the local date of `reference`.
///
/// Ambiguous wall-clock times (autumn fall-back) resolve to the earliest instant.
/// Wall-clock times skipped by a spring-forward gap resolve to the same wall clock an hour later.
pub fn local_to_utc_time(local: NaiveTime, reference: DateTime<Utc>, tz: &Tz) -> NaiveTime {
    let naive = reference.with_timezone(tz).date_naive().and_time(local);
    let resolved = tz
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest());
    match resolved {
        Some(resolved) => resolved.with_timezone(&Utc).time(),
        None => local,
    }
}

/// The wall-clock time in `tz` of the UTC time of day `utc_time`, on the UTC date of `reference`.
pub fn utc_to_local_time(utc_time: NaiveTime, reference: DateTime<Utc>, tz: &Tz) -> NaiveTime {
    Utc.from_utc_datetime(&reference.date_naive().and_time(utc_time))
        .with_timezone(tz)
        .time()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_util::test_utils::{time, utc};
    use chrono_tz::Europe::London;

    #[test]
    fn follows_daylight_saving() {
        let winter = utc(2024, 1, 15, 12, 0, 0);
        let summer = utc(2024, 7, 15, 12, 0, 0);
        assert_eq!(local_to_utc_time(time(6, 30, 0), winter, &London), time(6, 30, 0));
        assert_eq!(local_to_utc_time(time(6, 30, 0), summer, &London), time(5, 30, 0));

        assert_eq!(utc_to_local_time(time(5, 30, 0), summer, &London), time(6, 30, 0));
        assert_eq!(utc_to_local_time(time(6, 30, 0), winter, &London), time(6, 30, 0));
    }

    #[test]
    fn spring_forward_gap() {
        // 01:30 does not exist in London on the morning clocks go forward.
        let change_day = utc(2024, 3, 31, 0, 10, 0);
        assert_eq!(local_to_utc_time(time(1, 30, 0), change_day, &London), time(1, 30, 0));
    }

    #[test]
    fn fall_back_ambiguous() {
        // 01:30 happens twice, pick the first (still BST).
        let change_day = utc(2024, 10, 27, 0, 10, 0);
        assert_eq!(local_to_utc_time(time(1, 30, 0), change_day, &London), time(0, 30, 0));
    }
}
