use std::sync::mpsc;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use log::debug;

use crate::control::HeatingState;
use crate::io::broadcast::{BroadcastLevel, Broadcaster};
use crate::io::controls::{ActuatorError, DeviceState, HeatingActuator, RelayStates};

pub trait DummyIO {
    type MessageType;
    type Config;

    fn create(config: &Self::Config) -> (Self, Sender<Self::MessageType>)
    where
        Self: Sized,
    {
        let (sender, receiver) = mpsc::channel();
        let dummy_obj = Self::new(receiver, config);
        (dummy_obj, sender)
    }

    fn new(receiver: Receiver<Self::MessageType>, config: &Self::Config) -> Self;
}

pub fn read_all<T, F>(receiver: &Receiver<T>, mut on_value: F)
where
    F: FnMut(T),
{
    loop {
        match receiver.try_recv() {
            Ok(x) => on_value(x),
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => break,
        }
    }
}

pub enum RelayModify {
    /// Relays keep reporting this state whatever they are told.
    Stuck(Option<bool>),
    /// Reject every command.
    FailCommands(bool),
    /// Turning off never completes.
    HangOnTurnOff(bool),
}

/// Two relays that follow commands and remember every command given.
pub struct DummyRelays {
    receiver: Mutex<Receiver<RelayModify>>,
    state: Mutex<DummyRelayState>,
    commands: Arc<Mutex<Vec<HeatingState>>>,
}

#[derive(Default)]
struct DummyRelayState {
    on: bool,
    stuck: Option<Option<bool>>,
    fail_commands: bool,
    hang_on_turn_off: bool,
}

impl DummyIO for DummyRelays {
    type MessageType = RelayModify;
    type Config = ();

    fn new(receiver: Receiver<Self::MessageType>, _config: &Self::Config) -> Self {
        Self {
            receiver: Mutex::new(receiver),
            state: Mutex::new(DummyRelayState::default()),
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl DummyRelays {
    /// Every command given so far, including ones that were made to fail.
    pub fn command_log(&self) -> Arc<Mutex<Vec<HeatingState>>> {
        self.commands.clone()
    }

    fn current_state(&self) -> Option<MutexGuard<'_, DummyRelayState>> {
        let mut state = self.state.lock().ok()?;
        if let Ok(receiver) = self.receiver.lock() {
            read_all(&receiver, |message| match message {
                RelayModify::Stuck(stuck) => state.stuck = Some(stuck),
                RelayModify::FailCommands(fail) => state.fail_commands = fail,
                RelayModify::HangOnTurnOff(hang) => state.hang_on_turn_off = hang,
            });
        }
        Some(state)
    }

    fn command(&self, heating: HeatingState) -> Result<String, ActuatorError> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(heating);
        }
        let mut state = self.current_state().ok_or_else(|| ActuatorError::new("Dummy relays poisoned"))?;
        if state.fail_commands {
            return Err(ActuatorError::new("Relay did not respond"));
        }
        debug!("Set dummy relays {}", heating);
        state.on = heating.is_on();
        Ok(format!("Relays {}", heating))
    }
}

#[async_trait]
impl HeatingActuator for DummyRelays {
    async fn turn_on(&self) -> Result<String, ActuatorError> {
        self.command(HeatingState::ON)
    }

    async fn turn_off(&self) -> Result<String, ActuatorError> {
        let hang = self.current_state().is_some_and(|state| state.hang_on_turn_off);
        if hang {
            debug!("Dummy relays hanging on turn off");
            std::future::pending::<()>().await;
        }
        self.command(HeatingState::OFF)
    }

    async fn query_heating_state(&self) -> RelayStates {
        let Some(state) = self.current_state() else {
            return RelayStates::default();
        };
        let reported = state.stuck.unwrap_or(Some(state.on));
        RelayStates::new(vec![
            DeviceState::new("relay_1", reported),
            DeviceState::new("relay_2", reported.map(|_| false)),
        ])
    }
}

/// Keeps every broadcast for inspection.
#[derive(Default)]
pub struct RecordingBroadcaster {
    messages: Mutex<Vec<(BroadcastLevel, String)>>,
}

impl RecordingBroadcaster {
    pub fn messages(&self) -> Vec<(BroadcastLevel, String)> {
        self.messages.lock().map(|messages| messages.clone()).unwrap_or_default()
    }

    pub fn count(&self, level: BroadcastLevel, containing: &str) -> usize {
        self.messages()
            .iter()
            .filter(|(l, text)| *l == level && text.contains(containing))
            .count()
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn broadcast(&self, level: BroadcastLevel, text: &str) {
        debug!("Broadcast ({}): {}", level, text);
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((level, text.to_owned()));
        }
    }
}
