use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::io;
use crate::io::dummy::DummyIO;
use crate::io::temperatures::{Sensor, TemperatureManager};

pub enum ModifyState {
    SetTemp(Sensor, f32),
    /// Fail every retrieval until temperatures are set again.
    Fail(String),
}

pub struct Dummy {
    receiver: Mutex<Receiver<ModifyState>>,
    temps: Mutex<Result<HashMap<Sensor, f32>, String>>,
}

#[async_trait]
impl TemperatureManager for Dummy {
    async fn retrieve_temperatures(&self) -> Result<HashMap<Sensor, f32>, String> {
        self.update_state();
        self.temps.lock().map_err(|_| "Dummy temperatures poisoned".to_owned())?.clone()
    }
}

impl DummyIO for Dummy {
    type MessageType = ModifyState;
    type Config = ();

    fn new(receiver: Receiver<Self::MessageType>, _config: &Self::Config) -> Self {
        Dummy {
            receiver: Mutex::new(receiver),
            temps: Mutex::new(Ok(HashMap::new())),
        }
    }
}

impl Dummy {
    fn update_state(&self) {
        let (Ok(receiver), Ok(mut temps)) = (self.receiver.lock(), self.temps.lock()) else {
            return;
        };
        io::dummy::read_all(&receiver, |message| match message {
            ModifyState::SetTemp(sensor, temp) => {
                let mut current = temps.clone().unwrap_or_default();
                current.insert(sensor, temp);
                *temps = Ok(current);
            }
            ModifyState::Fail(reason) => *temps = Err(reason),
        });
    }
}
