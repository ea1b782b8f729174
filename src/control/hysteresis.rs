use crate::control::{HeatingFailure, HeatingState};
use crate::heating_fail;

/// Bang-bang control around a target with a dead band of `band` either side.
/// Inside the band the previous decision sticks, so the relay doesn't chatter.
#[derive(Debug, Clone, PartialEq)]
pub struct HysteresisController {
    desired: Option<f64>,
    band: f64,
    last_decision: Option<HeatingState>,
}

impl HysteresisController {
    pub fn new(band: f64) -> Self {
        Self {
            desired: None,
            band: band.abs(),
            last_decision: None,
        }
    }

    pub fn with_target(desired: f64, band: f64) -> Self {
        let mut controller = Self::new(band);
        controller.set_desired(desired);
        controller
    }

    pub fn set_desired(&mut self, desired: f64) {
        self.desired = Some(desired);
    }

    pub fn last_decision(&self) -> Option<HeatingState> {
        self.last_decision
    }

    pub fn update(&mut self, measured: f64) -> Result<HeatingState, HeatingFailure> {
        let Some(desired) = self.desired else {
            return Err(heating_fail!("Hysteresis controller updated before a target was set"));
        };

        let decision = if measured < desired - self.band {
            HeatingState::ON
        } else if measured > desired + self.band {
            HeatingState::OFF
        } else {
            self.last_decision.unwrap_or(HeatingState::OFF)
        };

        self.last_decision = Some(decision);
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decisions(controller: &mut HysteresisController, measurements: &[f64]) -> Vec<HeatingState> {
        measurements
            .iter()
            .map(|m| controller.update(*m).expect("Target is set"))
            .collect()
    }

    #[test_log::test]
    fn no_chatter_inside_band() {
        let mut controller = HysteresisController::with_target(21.0, 0.5);
        let on = HeatingState::ON;
        let off = HeatingState::OFF;
        assert_eq!(
            decisions(&mut controller, &[20.0, 20.7, 21.0, 21.3, 21.6, 20.8]),
            vec![on, on, on, on, off, off]
        );
        assert_eq!(decisions(&mut controller, &[20.5, 20.4]), vec![off, on], "Band edges are inclusive");
    }

    #[test_log::test]
    fn starts_off_inside_band() {
        let mut controller = HysteresisController::with_target(21.0, 0.5);
        assert_eq!(controller.update(21.2).unwrap(), HeatingState::OFF);
        assert_eq!(controller.last_decision(), Some(HeatingState::OFF));
    }

    #[test_log::test]
    fn zero_band() {
        let mut controller = HysteresisController::with_target(20.0, 0.0);
        assert_eq!(decisions(&mut controller, &[19.9, 20.0, 20.1, 20.0]), vec![
            HeatingState::ON,
            HeatingState::ON,
            HeatingState::OFF,
            HeatingState::OFF
        ]);
    }

    #[test_log::test]
    fn needs_target() {
        let mut controller = HysteresisController::new(0.5);
        let failure = controller.update(20.0).expect_err("Should refuse to decide without a target");
        assert!(failure.get_description().contains("before a target"));
        assert_eq!(controller.last_decision(), None);

        controller.set_desired(22.0);
        assert_eq!(controller.update(20.0).unwrap(), HeatingState::ON);
    }
}
