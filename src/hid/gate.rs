//! Turn-taking between the dispatcher and the presence poller
//!
//! Two busy signals guard the transport. The dispatcher waits for the poller
//! to finish its discovery step, then holds its own signal for a whole
//! write-and-read transaction. The poller waits for the dispatcher, then
//! holds its signal for the discovery call only.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct GateState {
    poller_busy: bool,
    dispatcher_busy: bool,
}

#[derive(Debug, Default)]
pub struct TransportGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl TransportGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the poller to step aside, then raise dispatcher-busy
    pub fn dispatcher_turn(&self) -> DispatcherTurn<'_> {
        let mut state = self.state.lock();
        while state.poller_busy {
            self.changed.wait(&mut state);
        }
        state.dispatcher_busy = true;
        DispatcherTurn { gate: self }
    }

    /// Wait for the dispatcher to step aside, then raise poller-busy
    pub fn poller_turn(&self) -> PollerTurn<'_> {
        let mut state = self.state.lock();
        while state.dispatcher_busy {
            self.changed.wait(&mut state);
        }
        state.poller_busy = true;
        PollerTurn { gate: self }
    }

    pub fn is_dispatcher_busy(&self) -> bool {
        self.state.lock().dispatcher_busy
    }

    pub fn is_poller_busy(&self) -> bool {
        self.state.lock().poller_busy
    }

    fn release(&self, dispatcher: bool) {
        let mut state = self.state.lock();
        if dispatcher {
            state.dispatcher_busy = false;
        } else {
            state.poller_busy = false;
        }
        drop(state);
        self.changed.notify_all();
    }
}

/// Dispatcher-busy, lowered on drop
pub struct DispatcherTurn<'a> {
    gate: &'a TransportGate,
}

impl Drop for DispatcherTurn<'_> {
    fn drop(&mut self) {
        self.gate.release(true);
    }
}

/// Poller-busy, lowered on drop
pub struct PollerTurn<'a> {
    gate: &'a TransportGate,
}

impl Drop for PollerTurn<'_> {
    fn drop(&mut self) {
        self.gate.release(false);
    }
}
