use std::time::Duration;

use crate::config::SanityConfig;
use crate::control::engine::{HeatingRequest, RequestKind};
use crate::schedule::periodic::format_duration;

/// Reject values outside the configured bounds, with a reason a user can act on.
pub fn check_bounds(
    bounds: &SanityConfig,
    target: Option<f64>,
    hysteresis: f64,
    duration: Option<Duration>,
) -> Result<(), String> {
    if let Some(target) = target {
        if !(bounds.min_temperature..=bounds.max_temperature).contains(&target) {
            return Err(format!(
                "Temperature {:.1}°C is outside {:.1}..{:.1}°C",
                target, bounds.min_temperature, bounds.max_temperature
            ));
        }
    }
    if !(bounds.min_hysteresis..=bounds.max_hysteresis).contains(&hysteresis) {
        return Err(format!(
            "Hysteresis {:.2} is outside {:.2}..{:.2}",
            hysteresis, bounds.min_hysteresis, bounds.max_hysteresis
        ));
    }
    if let Some(duration) = duration {
        if duration < bounds.min_duration || duration > bounds.max_duration {
            return Err(format!(
                "Duration {} is outside {}..{}",
                describe(duration),
                describe(bounds.min_duration),
                describe(bounds.max_duration)
            ));
        }
    }
    Ok(())
}

pub fn check_request(bounds: &SanityConfig, request: &HeatingRequest) -> Result<(), String> {
    if request.get_kind() == RequestKind::Scheduled && request.get_duration().is_none() {
        return Err("Scheduled heating needs a duration".to_owned());
    }
    check_bounds(bounds, request.get_target(), request.get_hysteresis(), request.get_duration())
}

fn describe(duration: Duration) -> String {
    chrono::Duration::from_std(duration)
        .map(format_duration)
        .unwrap_or_else(|_| format!("{:?}", duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn bounds() {
        let bounds = SanityConfig::default();
        let half_hour = Some(Duration::from_secs(1800));
        assert!(check_bounds(&bounds, Some(21.0), 0.5, half_hour).is_ok());
        assert!(check_bounds(&bounds, None, 0.5, None).is_ok());

        for target in [4.9, 30.1, f64::NAN] {
            let reason = check_bounds(&bounds, Some(target), 0.5, half_hour).unwrap_err();
            assert!(reason.contains("Temperature"), "{}", reason);
        }
        for hysteresis in [0.05, 5.5] {
            assert!(check_bounds(&bounds, Some(21.0), hysteresis, half_hour).is_err());
        }
        for duration in [Duration::from_secs(14 * 60), Duration::from_secs(12 * 3600 + 1)] {
            let reason = check_bounds(&bounds, Some(21.0), 0.5, Some(duration)).unwrap_err();
            assert!(reason.contains("0:15:00..12:00:00"), "{}", reason);
        }
    }
}
