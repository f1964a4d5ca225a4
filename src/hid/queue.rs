//! Pending command FIFO
//!
//! Many producers push without blocking; the dispatcher is the only consumer.

use super::commands::Command;
use super::protocol::CommandCode;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Default)]
pub struct CommandQueue {
    pending: Mutex<VecDeque<Command>>,
    available: Condvar,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, command: Command) {
        self.pending.lock().push_back(command);
        self.available.notify_one();
    }

    /// Push several commands so no other producer can interleave with them
    pub fn push_all(&self, commands: impl IntoIterator<Item = Command>) {
        let mut pending = self.pending.lock();
        pending.extend(commands);
        drop(pending);
        self.available.notify_one();
    }

    /// Push unless a command with the same code is already waiting
    pub fn push_unique(&self, command: Command) -> bool {
        let mut pending = self.pending.lock();
        if pending.iter().any(|c| c.code == command.code) {
            return false;
        }
        pending.push_back(command);
        drop(pending);
        self.available.notify_one();
        true
    }

    /// Take the next command without waiting
    pub fn try_pop(&self) -> Option<Command> {
        self.pending.lock().pop_front()
    }

    /// Wait up to `timeout` for the next command
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Command> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            self.available.wait_for(&mut pending, timeout);
        }
        pending.pop_front()
    }

    pub fn contains(&self, code: CommandCode) -> bool {
        self.pending.lock().iter().any(|c| c.code == code)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Drop everything still waiting
    pub fn clear(&self) -> usize {
        let mut pending = self.pending.lock();
        let dropped = pending.len();
        pending.clear();
        dropped
    }

    /// Wake a consumer blocked in `pop_timeout`
    pub fn wake(&self) {
        self.available.notify_all();
    }

    /// Codes currently waiting, oldest first
    pub fn codes(&self) -> Vec<CommandCode> {
        self.pending.lock().iter().map(|c| c.code).collect()
    }
}
