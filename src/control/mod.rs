use backtrace::Backtrace;
use std::fmt::{Display, Formatter};

pub mod engine;
pub mod hysteresis;
pub mod sanity;
pub mod trend;

/// Whether the heater is (or should be) energized.
/// Makes code more understandable and implements display.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct HeatingState(bool);

impl HeatingState {
    pub const OFF: HeatingState = HeatingState::new(false);
    pub const ON: HeatingState = HeatingState::new(true);

    pub const fn new(on: bool) -> Self {
        Self(on)
    }

    pub fn is_on(&self) -> bool {
        self.0
    }

    pub fn is_off(&self) -> bool {
        !self.is_on()
    }
}

impl Display for HeatingState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", if self.is_on() { "on" } else { "off" })
    }
}

/// A broken invariant inside the control code, as opposed to a flaky device.
#[derive(Debug)]
pub struct HeatingFailure {
    description: String,
    trace: Backtrace,
    line_num: u32,
    file_name: String,
}

impl HeatingFailure {
    pub fn new(description: String, trace: Backtrace, line_num: u32, file_name: String) -> Self {
        HeatingFailure {
            description,
            trace,
            line_num,
            file_name,
        }
    }

    pub fn get_description(&self) -> &str {
        &self.description
    }
}

impl Display for HeatingFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "HeatingFailure occured: '{}'", self.description)?;
        writeln!(f, "At: Line {} in {}", self.line_num, self.file_name)?;
        writeln!(f, "Trace:{:?}", self.trace)
    }
}

#[macro_export]
macro_rules! heating_fail {
    ($msg:expr) => {{
        let trace = backtrace::Backtrace::new();
        $crate::control::HeatingFailure::new($msg.to_string(), trace, line!(), file!().to_owned())
    }};
}

/// Counts consecutive failures and says when to escalate, once every `threshold` in a row.
#[derive(Debug)]
pub struct ErrorCounter {
    consecutive: u32,
    threshold: u32,
}

impl ErrorCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive: 0,
            threshold: threshold.max(1),
        }
    }

    /// True when the threshold has just been reached. The count then starts over.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive += 1;
        if self.consecutive >= self.threshold {
            self.consecutive = 0;
            return true;
        }
        false
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn get_threshold(&self) -> u32 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn escalates_once_per_threshold() {
        let mut counter = ErrorCounter::new(3);
        let escalations: Vec<bool> = (0..7).map(|_| counter.record_failure()).collect();
        assert_eq!(escalations, vec![false, false, true, false, false, true, false]);

        counter.record_success();
        assert!(!counter.record_failure());
        assert!(!counter.record_failure());
        assert!(counter.record_failure());
    }

    #[test_log::test]
    fn failure_describes_itself() {
        let failure = heating_fail!("Controller used before target set");
        assert_eq!(failure.get_description(), "Controller used before target set");
        assert!(failure.to_string().contains("mod.rs"));
    }
}
