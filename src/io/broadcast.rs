use log::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum BroadcastLevel {
    Info,
    Warning,
    Error,
}

/// Where user facing notices go (chat, push notifications, ...).
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, level: BroadcastLevel, text: &str);
}

/// Sends every notice to the log.
#[derive(Default)]
pub struct LogBroadcaster {}

impl Broadcaster for LogBroadcaster {
    fn broadcast(&self, level: BroadcastLevel, text: &str) {
        match level {
            BroadcastLevel::Info => info!(target: "broadcast", "{}", text),
            BroadcastLevel::Warning => warn!(target: "broadcast", "{}", text),
            BroadcastLevel::Error => error!(target: "broadcast", "{}", text),
        }
    }
}
