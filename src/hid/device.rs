//! Command engine: dispatcher, presence poller and the public command surface
//!
//! Public calls validate against the last known device state and push onto
//! the command queue. The dispatcher thread is the only code that writes to
//! or reads from the device; the poller thread only re-enumerates, taking
//! turns with the dispatcher through the transport gate.

use super::commands::{
    self, build_api_frame, build_change_slot, build_script_upload, Command, MAX_SCRIPT_SIZE,
    MIN_SCRIPT_SIZE,
};
use super::gate::TransportGate;
use super::output::ApiPayload;
use super::protocol::{CommandCode, FRAME_SIZE};
use super::queue::CommandQueue;
use super::transport::{DeviceFilter, DeviceLink, HidApiTransport, Personality, Transport, TransportError};
use crate::core::config::{Config, EngineConfig};
use crate::core::error::{CommandFailure, CommandFamily, FailureReason, SubmitError};
use crate::core::events::{DeviceEvent, EventBus};
use crate::core::info::{DeviceInfo, DeviceState};
use crate::core::settings::DeviceSettings;
use crate::core::state::StateStore;
use crate::core::status::IoStatus;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Extra reads spent looking for a response that echoes the issued code
const MAX_ALIGNMENT_READS: usize = 10;

/// How long the dispatcher waits on an empty queue before re-checking the stop flag
const DISPATCHER_IDLE_WAIT: Duration = Duration::from_millis(100);

enum ReadOutcome {
    Complete,
    /// An expected report never arrived
    Missing,
    /// Reports arrived but none echoed the issued code
    Misaligned,
}

struct Shared<T: Transport> {
    config: EngineConfig,
    /// Uncontended in practice; the gate decides whose turn it is
    link: Mutex<DeviceLink<T>>,
    queue: CommandQueue,
    gate: TransportGate,
    state: RwLock<StateStore>,
    events: EventBus,
    stop: AtomicBool,
    /// Personality seen by the last presence poll
    presence: Mutex<Option<Personality>>,
    /// When the last API frame went out on the primary code
    last_primary_frame: Mutex<Option<Instant>>,
}

impl<T: Transport> Shared<T> {
    fn fail(&self, reason: FailureReason, code: CommandCode) {
        let failure = CommandFailure::new(reason, code);
        debug!("Command failed: {}", failure);
        self.events.publish(DeviceEvent::CommandFailed(failure));
    }

    fn publish_info(&self, info: DeviceInfo) {
        self.events.publish(DeviceEvent::InfoChanged(info));
    }

    /// Decode one inbound report and notify on any change
    fn handle_report(&self, report: &[u8]) {
        let change = self.state.write().decode(report);
        match change {
            Some(change) => self.events.publish(change.into()),
            None => debug!("Ignoring unrecognized report 0x{:02X}", report.first().copied().unwrap_or(0)),
        }
    }

    fn read_one(&self, link: &mut DeviceLink<T>) -> Option<Vec<u8>> {
        match link.read(self.config.read_timeout()) {
            Ok(report) => report,
            Err(e) => {
                warn!("HID read error: {}", e);
                None
            }
        }
    }

    fn read_responses(&self, link: &mut DeviceLink<T>, cmd: &Command) -> ReadOutcome {
        let expected = cmd.code.as_byte();

        for _ in 0..cmd.expected_reads {
            let Some(mut report) = self.read_one(link) else {
                return ReadOutcome::Missing;
            };
            self.handle_report(&report);

            if !cmd.code.requires_alignment() {
                continue;
            }

            let mut attempts = 0;
            while report.first() != Some(&expected) {
                if attempts == MAX_ALIGNMENT_READS {
                    return ReadOutcome::Misaligned;
                }
                attempts += 1;
                match self.read_one(link) {
                    Some(next) => {
                        self.handle_report(&next);
                        report = next;
                    }
                    None => return ReadOutcome::Missing,
                }
            }
        }
        ReadOutcome::Complete
    }

    /// Run one command to completion
    fn execute(&self, mut cmd: Command) {
        let code = cmd.code;

        if !self.link.lock().is_connected() {
            self.fail(FailureReason::DeviceNotConnected, code);
            return;
        }

        let _turn = self.gate.dispatcher_turn();
        let mut link = self.link.lock();

        let frame = cmd.encode();
        match link.write(frame.as_bytes()) {
            Ok(written) if written == FRAME_SIZE => {}
            Ok(written) => {
                warn!("Short write for {:?}: {} of {} bytes", code, written, FRAME_SIZE);
                self.fail(FailureReason::FailedToSendCommand, code);
                return;
            }
            Err(e) => {
                warn!("Failed to send {:?}: {}", code, e);
                self.fail(FailureReason::FailedToSendCommand, code);
                return;
            }
        }

        match self.read_responses(&mut link, &cmd) {
            ReadOutcome::Complete => {}
            ReadOutcome::Missing => {
                warn!("No response to {:?}", code);
                self.fail(FailureReason::FailedToReadResult, code);
            }
            ReadOutcome::Misaligned if cmd.retried => {
                warn!("Response to {:?} still misaligned after retry", code);
                self.fail(FailureReason::FailedToReadResult, code);
            }
            ReadOutcome::Misaligned => {
                debug!("Response to {:?} misaligned, re-queueing once", code);
                cmd.retried = true;
                self.queue.push(cmd);
            }
        }

        match code {
            CommandCode::ExitApiMode => {
                self.flush(&mut link);
                thread::sleep(self.config.exit_settle());
                self.flush(&mut link);
                let info = {
                    let mut state = self.state.write();
                    if state.info().state == DeviceState::ApiMode {
                        state.set_state(DeviceState::Connected)
                    } else {
                        state.info()
                    }
                };
                self.publish_info(info);
            }
            CommandCode::EnterApiMode => {
                let info = self.state.write().set_state(DeviceState::ApiMode);
                self.publish_info(info);
            }
            _ => {}
        }
    }

    fn flush(&self, link: &mut DeviceLink<T>) {
        if let Err(e) = link.flush_input() {
            warn!("Failed to flush HID input: {}", e);
        }
    }

    /// One presence probe plus transition handling
    fn poll_once(&self) -> Option<Personality> {
        let current = {
            let _turn = self.gate.poller_turn();
            self.link.lock().refresh(DeviceFilter::Normal)
        };

        {
            let mut last = self.presence.lock();
            if *last == current {
                return current;
            }
            *last = current;
        }

        let info = match current {
            Some(Personality::Normal) => {
                info!("Appliance connected, refreshing identity");
                let info = self.state.write().reset_info(DeviceInfo::updating());
                self.queue.push_all([
                    commands::build_exit_api_mode(),
                    commands::build_get_firmware(),
                    commands::build_get_serial(),
                ]);
                info
            }
            Some(Personality::Bootloader) => {
                info!("Appliance in bootloader mode");
                self.state.write().reset_info(DeviceInfo::updating())
            }
            None => {
                info!("Appliance disconnected");
                self.state.write().reset_info(DeviceInfo::disconnected())
            }
        };
        self.publish_info(info);
        current
    }

    fn dispatcher_loop(&self) {
        info!("Dispatcher thread started");
        while !self.stop.load(Ordering::Relaxed) {
            let Some(cmd) = self.queue.pop_timeout(DISPATCHER_IDLE_WAIT) else {
                continue;
            };
            let code = cmd.code;
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| self.execute(cmd))) {
                warn!("Dispatcher fault running {:?}: {}", code, panic_message(&*panic));
                self.fail(FailureReason::FailedToSendCommand, code);
            }
        }
        info!("Dispatcher thread stopped");
    }

    fn poller_loop(&self) {
        info!("Presence poller thread started");
        while !self.stop.load(Ordering::Relaxed) {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| self.poll_once())) {
                warn!("Presence poll fault: {}", panic_message(&*panic));
            }
            thread::sleep(self.config.poll_interval());
        }
        info!("Presence poller thread stopped");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

/// Host-side client for one remapping appliance
pub struct CronusDevice<T: Transport + 'static> {
    shared: Arc<Shared<T>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl CronusDevice<HidApiTransport> {
    /// Engine over the system HID stack
    pub fn with_hidapi(config: &Config) -> Result<Self, TransportError> {
        let transport = HidApiTransport::new(config.hid.clone())?;
        Ok(Self::new(transport, config.engine.clone()))
    }
}

impl<T: Transport + 'static> CronusDevice<T> {
    /// Create an idle engine; call `start` to spawn the background threads
    pub fn new(transport: T, config: EngineConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                link: Mutex::new(DeviceLink::new(transport)),
                queue: CommandQueue::new(),
                gate: TransportGate::new(),
                state: RwLock::new(StateStore::new()),
                events: EventBus::new(),
                stop: AtomicBool::new(false),
                presence: Mutex::new(None),
                last_primary_frame: Mutex::new(None),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the dispatcher and presence poller
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }
        self.shared.stop.store(false, Ordering::Relaxed);

        let dispatcher = Arc::clone(&self.shared);
        workers.push(thread::spawn(move || dispatcher.dispatcher_loop()));

        let poller = Arc::clone(&self.shared);
        workers.push(thread::spawn(move || poller.poller_loop()));
    }

    /// Stop both loops, drop queued commands and close the device
    pub fn stop(&self) {
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        self.shared.stop.store(true, Ordering::Relaxed);
        self.shared.queue.wake();
        for handle in workers {
            if handle.join().is_err() {
                warn!("Engine thread panicked");
            }
        }

        let dropped = self.shared.queue.clear();
        if dropped > 0 {
            debug!("Dropped {} queued commands on stop", dropped);
        }
        self.shared.link.lock().close();

        // a later start must see the device as a fresh arrival
        *self.shared.presence.lock() = None;
        let previous = self.device_info();
        if previous != DeviceInfo::disconnected() {
            let info = self.shared.state.write().reset_info(DeviceInfo::disconnected());
            self.shared.publish_info(info);
        }
    }

    pub fn is_running(&self) -> bool {
        !self.workers.lock().is_empty()
    }

    /// Register a subscriber for every future notification
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DeviceEvent> {
        self.shared.events.subscribe()
    }

    pub fn device_info(&self) -> DeviceInfo {
        self.shared.state.read().info()
    }

    pub fn settings(&self) -> Option<DeviceSettings> {
        self.shared.state.read().settings()
    }

    pub fn io_status(&self) -> Option<Arc<IoStatus>> {
        self.shared.state.read().io_status()
    }

    /// Codes of the commands still waiting, oldest first
    pub fn pending_commands(&self) -> Vec<CommandCode> {
        self.shared.queue.codes()
    }

    /// Run one presence probe on the calling thread
    pub fn poll_presence(&self) -> Option<Personality> {
        self.shared.poll_once()
    }

    /// Execute the next queued command on the calling thread
    pub fn dispatch_next(&self) -> bool {
        match self.shared.queue.try_pop() {
            Some(cmd) => {
                self.shared.execute(cmd);
                true
            }
            None => false,
        }
    }

    /// Execute queued commands on the calling thread until the queue is empty
    pub fn dispatch_pending(&self) -> usize {
        let mut executed = 0;
        while self.dispatch_next() {
            executed += 1;
        }
        executed
    }

    fn reject(&self, reason: FailureReason, command: CommandFamily) -> SubmitError {
        let failure = CommandFailure::new(reason, command);
        debug!("Rejected: {}", failure);
        self.shared.events.publish(DeviceEvent::CommandFailed(failure));
        SubmitError::Rejected(failure)
    }

    fn require_connected(&self, command: CommandFamily) -> Result<(), SubmitError> {
        if self.device_info().is_connected() {
            Ok(())
        } else {
            Err(self.reject(FailureReason::DeviceNotConnected, command))
        }
    }

    /// Poll live I/O state; a poll already waiting absorbs this one
    pub fn request_io_status(&self) -> Result<(), SubmitError> {
        self.require_connected(CommandFamily::RequestIoStatus)?;
        self.shared.queue.push_unique(commands::build_request_io_status());
        Ok(())
    }

    /// Upload compiled script bytecode (2 to 4096 bytes)
    pub fn load_script(&self, bytecode: &[u8]) -> Result<(), SubmitError> {
        self.require_connected(CommandFamily::LoadScript)?;
        if !(MIN_SCRIPT_SIZE..=MAX_SCRIPT_SIZE).contains(&bytecode.len()) {
            return Err(SubmitError::ScriptLength(bytecode.len() as u64));
        }
        let fragments = build_script_upload(bytecode);
        debug!("Queueing script of {} bytes in {} fragments", bytecode.len(), fragments.len());
        self.shared.queue.push_all(fragments);
        Ok(())
    }

    /// Upload a compiled script from disk
    pub fn load_script_file(&self, path: &Path) -> Result<(), SubmitError> {
        let len = std::fs::metadata(path).map_err(SubmitError::ScriptFile)?.len();
        if len < MIN_SCRIPT_SIZE as u64 || len > MAX_SCRIPT_SIZE as u64 {
            return Err(SubmitError::ScriptLength(len));
        }
        let bytecode = std::fs::read(path).map_err(SubmitError::ScriptFile)?;
        self.load_script(&bytecode)
    }

    pub fn unload_script(&self) {
        self.shared.queue.push(commands::build_unload_script());
    }

    /// Switch to API mode; a no-op when already there
    pub fn enter_api_mode(&self) -> Result<(), SubmitError> {
        match self.device_info().state {
            DeviceState::Connected => {
                self.shared.queue.push(commands::build_enter_api_mode());
                Ok(())
            }
            DeviceState::ApiMode => Ok(()),
            _ => Err(self.reject(FailureReason::DeviceNotConnected, CommandFamily::EnterApiMode)),
        }
    }

    /// Leave API mode; a no-op when already out of it
    pub fn exit_api_mode(&self) -> Result<(), SubmitError> {
        match self.device_info().state {
            DeviceState::ApiMode => {
                self.shared.queue.push(commands::build_exit_api_mode());
                Ok(())
            }
            DeviceState::Connected => Ok(()),
            _ => Err(self.reject(FailureReason::DeviceNotConnected, CommandFamily::ExitApiMode)),
        }
    }

    pub fn request_settings(&self) -> Result<(), SubmitError> {
        self.require_connected(CommandFamily::RequestSettings)?;
        self.shared.queue.push(commands::build_get_settings());
        Ok(())
    }

    pub fn save_settings(&self, settings: &DeviceSettings) -> Result<(), SubmitError> {
        self.require_connected(CommandFamily::SaveSettings)?;
        self.shared
            .queue
            .push(commands::build_set_settings(settings.to_block()));
        Ok(())
    }

    /// Advance to the next slot (select then confirm)
    pub fn change_slot(&self) -> Result<(), SubmitError> {
        self.require_connected(CommandFamily::ChangeSlot)?;
        self.shared.queue.push_all(build_change_slot());
        Ok(())
    }

    /// Queue an output frame.
    ///
    /// Frames sent within the minimum interval of the last primary frame go
    /// out on the secondary code instead of being dropped.
    pub fn send_api_frame<P: ApiPayload>(&self, frame: &P) -> Result<(), SubmitError> {
        if !self.device_info().is_api_mode() {
            return Err(self.reject(FailureReason::NeedApiMode, CommandFamily::ApiFrame));
        }

        let primary = {
            let mut last = self.shared.last_primary_frame.lock();
            let now = Instant::now();
            match *last {
                Some(sent) if now.duration_since(sent) < self.shared.config.api_frame_interval() => {
                    false
                }
                _ => {
                    *last = Some(now);
                    true
                }
            }
        };

        self.shared.queue.push(build_api_frame(frame.to_payload(), primary));
        Ok(())
    }

    pub fn turn_off_controller(&self) {
        self.shared.queue.push(commands::build_turn_off_controller());
    }
}

impl<T: Transport + 'static> Drop for CronusDevice<T> {
    fn drop(&mut self) {
        self.stop();
    }
}
