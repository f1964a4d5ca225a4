//! Change notifications
//!
//! Every subscriber owns an unbounded channel, so a slow consumer never
//! stalls the dispatcher or the poller. Order is kept per stream.

use super::error::CommandFailure;
use super::info::DeviceInfo;
use super::settings::DeviceSettings;
use super::state::StateChange;
use super::status::IoStatus;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Notifications raised by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    InfoChanged(DeviceInfo),
    SettingsChanged(DeviceSettings),
    IoStatusChanged(Arc<IoStatus>),
    CommandFailed(CommandFailure),
}

impl From<StateChange> for DeviceEvent {
    fn from(change: StateChange) -> Self {
        match change {
            StateChange::Info(info) => DeviceEvent::InfoChanged(info),
            StateChange::Settings(settings) => DeviceEvent::SettingsChanged(settings),
            StateChange::IoStatus(status) => DeviceEvent::IoStatusChanged(status),
        }
    }
}

/// Fan-out of device events to any number of subscribers
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<DeviceEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber; it sees every event published afterwards
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DeviceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver to every live subscriber, dropping the ones that hung up
    pub fn publish(&self, event: DeviceEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
