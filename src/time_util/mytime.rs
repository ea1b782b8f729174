use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;

pub trait TimeProvider: Send + Sync {
    fn get_utc_time(&self) -> DateTime<Utc>;

    fn get_local_time(&self, tz: &Tz) -> DateTime<Tz> {
        tz.from_utc_datetime(&self.get_utc_time().naive_utc())
    }
}

#[derive(Default)]
pub struct RealTimeProvider {}

impl TimeProvider for RealTimeProvider {
    fn get_utc_time(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Shared between the test and the loop under test.
#[derive(Debug)]
pub struct DummyTimeProvider {
    utc_time: Mutex<DateTime<Utc>>,
}

impl DummyTimeProvider {
    pub fn new(utc_time: DateTime<Utc>) -> Self {
        Self {
            utc_time: Mutex::new(utc_time),
        }
    }

    /// Move the time returned by this dummy time provider forward by the given duration
    pub fn advance(&self, duration: Duration) {
        *self.utc_time.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) += duration;
    }
}

impl TimeProvider for DummyTimeProvider {
    fn get_utc_time(&self) -> DateTime<Utc> {
        *self.utc_time.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_util::test_utils::{date, time};

    #[test]
    fn dummy_advances() {
        let start = Utc.from_utc_datetime(&date(2023, 6, 10).and_time(time(10, 0, 0)));
        let provider = DummyTimeProvider::new(start);
        provider.advance(Duration::minutes(90));
        assert_eq!(provider.get_utc_time(), start + Duration::minutes(90));

        let local = provider.get_local_time(&chrono_tz::Europe::London);
        assert_eq!(local.format("%H:%M").to_string(), "12:30", "BST is UTC+1");
    }
}
