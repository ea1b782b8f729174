use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;

pub mod dummy;

#[derive(Debug, PartialEq, Eq, Hash, Clone, Deserialize)]
#[serde(from = "String")]
pub enum Sensor {
    LivingRoom,
    Bedroom,
    Kitchen,
    Bathroom,
    Hallway,
    Outside,
    Other(SensorId),
}

impl Display for Sensor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Sensor::LivingRoom => "living_room",
            Sensor::Bedroom => "bedroom",
            Sensor::Kitchen => "kitchen",
            Sensor::Bathroom => "bathroom",
            Sensor::Hallway => "hallway",
            Sensor::Outside => "outside",
            Sensor::Other(id) => return write!(f, "{}", id),
        };
        write!(f, "{}", name)
    }
}

impl From<String> for Sensor {
    fn from(s: String) -> Self {
        let lower = s.to_ascii_lowercase();
        match lower.as_str() {
            "living_room" => Sensor::LivingRoom,
            "bedroom" => Sensor::Bedroom,
            "kitchen" => Sensor::Kitchen,
            "bathroom" => Sensor::Bathroom,
            "hallway" => Sensor::Hallway,
            "outside" => Sensor::Outside,
            _ => Sensor::Other(SensorId::new(lower)),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct SensorId {
    id: String,
}

impl SensorId {
    /// If looking to construct a sensor, use Sensor::from()
    fn new(id: String) -> SensorId {
        SensorId {
            id: id.to_ascii_lowercase(),
        }
    }
}

impl Display for SensorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

#[async_trait]
pub trait TemperatureManager: Send + Sync {
    async fn retrieve_temperatures(&self) -> Result<HashMap<Sensor, f32>, String>;
}

/// Picks the single reading that drives the heating: the first sensor in
/// preference order that currently has a value.
pub struct ReferenceTemperature {
    manager: Box<dyn TemperatureManager>,
    preference: Vec<Sensor>,
}

impl ReferenceTemperature {
    pub fn new(manager: impl TemperatureManager + 'static, preference: Vec<Sensor>) -> Self {
        Self {
            manager: Box::new(manager),
            preference,
        }
    }

    pub async fn query_temperature_for_heating(&self) -> Result<f32, String> {
        let temps = self.manager.retrieve_temperatures().await?;
        for sensor in &self.preference {
            match temps.get(sensor) {
                Some(temp) => {
                    debug!("Reference temperature {:.2} from {}", temp, sensor);
                    return Ok(*temp);
                }
                None => warn!("Preferred sensor {} has no reading, falling back", sensor),
            }
        }
        Err(format!("None of the sensors {:?} have a reading", self.preference.iter().map(|s| s.to_string()).collect::<Vec<_>>()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::dummy::DummyIO;
    use crate::io::temperatures::dummy::{Dummy, ModifyState};
    use crate::io::temperatures::Sensor::Other;

    #[test_log::test]
    fn sanity() {
        let sensors = [Sensor::LivingRoom, Sensor::Bedroom,
            Sensor::Kitchen, Sensor::Bathroom,
            Sensor::Hallway, Sensor::Outside,
            Other(SensorId::new("loft".to_owned()))];
        for sensor in sensors {
            let same_sensor = sensor.to_string().into();
            assert_eq!(sensor, same_sensor, "Expected sensor '{}' to transform back into itself.", sensor.to_string());
        }
    }

    #[tokio::test]
    async fn falls_back_through_preference() {
        let (temps, handle) = Dummy::create(&());
        let reference = ReferenceTemperature::new(temps, vec![Sensor::LivingRoom, Sensor::Bedroom, Sensor::Kitchen]);

        assert!(reference.query_temperature_for_heating().await.is_err(), "No readings yet");

        handle.send(ModifyState::SetTemp(Sensor::Kitchen, 17.0)).unwrap();
        assert_eq!(reference.query_temperature_for_heating().await, Ok(17.0));

        handle.send(ModifyState::SetTemp(Sensor::Bedroom, 18.5)).unwrap();
        assert_eq!(reference.query_temperature_for_heating().await, Ok(18.5));

        handle.send(ModifyState::SetTemp(Sensor::LivingRoom, 20.0)).unwrap();
        assert_eq!(reference.query_temperature_for_heating().await, Ok(20.0));

        handle.send(ModifyState::Fail("hub offline".to_owned())).unwrap();
        assert_eq!(reference.query_temperature_for_heating().await, Err("hub offline".to_owned()));
    }
}
