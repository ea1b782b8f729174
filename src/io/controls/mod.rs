use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use itertools::Itertools;

use crate::control::HeatingState;

#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorError {
    message: String,
}

impl ActuatorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for ActuatorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// The heater relay(s). Implementations must bound their own I/O time,
/// the engine awaits these calls from inside its control loop.
#[async_trait]
pub trait HeatingActuator: Send + Sync {
    /// On success, a human readable description of what was done.
    async fn turn_on(&self) -> Result<String, ActuatorError>;

    async fn turn_off(&self) -> Result<String, ActuatorError>;

    async fn query_heating_state(&self) -> RelayStates;

    async fn set_heating(&self, state: HeatingState) -> Result<String, ActuatorError> {
        if state.is_on() {
            self.turn_on().await
        } else {
            self.turn_off().await
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub name: String,
    /// None if the device could not be reached.
    pub is_on: Option<bool>,
}

impl DeviceState {
    pub fn new(name: &str, is_on: Option<bool>) -> Self {
        Self {
            name: name.to_owned(),
            is_on,
        }
    }
}

/// Physical relays wired OR-fashion to a single heater.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RelayStates {
    devices: Vec<DeviceState>,
}

impl RelayStates {
    pub fn new(devices: Vec<DeviceState>) -> Self {
        Self { devices }
    }

    /// On if any relay is on, off only if every relay is known to be off.
    pub fn heating_state(&self) -> Option<HeatingState> {
        if self.devices.iter().any(|device| device.is_on == Some(true)) {
            return Some(HeatingState::ON);
        }
        if !self.devices.is_empty() && self.devices.iter().all(|device| device.is_on == Some(false)) {
            return Some(HeatingState::OFF);
        }
        None
    }
}

impl Display for RelayStates {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let devices = self
            .devices
            .iter()
            .map(|device| match device.is_on {
                Some(true) => format!("{}: on", device.name),
                Some(false) => format!("{}: off", device.name),
                None => format!("{}: unreachable", device.name),
            })
            .join(", ");
        write!(f, "[{}]", devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn relays_are_or_wired() {
        let states = RelayStates::new(vec![DeviceState::new("a", Some(false)), DeviceState::new("b", Some(true))]);
        assert_eq!(states.heating_state(), Some(HeatingState::ON));

        let states = RelayStates::new(vec![DeviceState::new("a", Some(false)), DeviceState::new("b", None)]);
        assert_eq!(states.heating_state(), None);

        let states = RelayStates::new(vec![DeviceState::new("a", None), DeviceState::new("b", Some(true))]);
        assert_eq!(states.heating_state(), Some(HeatingState::ON), "One known relay on is enough");

        let states = RelayStates::new(vec![DeviceState::new("a", Some(false)), DeviceState::new("b", Some(false))]);
        assert_eq!(states.heating_state(), Some(HeatingState::OFF));
        assert_eq!(states.to_string(), "[a: off, b: off]");

        assert_eq!(RelayStates::default().heating_state(), None);
    }
}
