//! In-memory appliance for running the engine without hardware
//!
//! `MockAppliance` is the device side: it answers the vendor commands with
//! the same report layouts the real appliance uses. `MockTransport` is the
//! host side handed to the engine. Both share one state, so a test can keep
//! the appliance to plug, unplug and inspect while the engine owns the
//! transport.

use super::protocol::{
    CommandCode, FRAME_SIZE, HEADER_SIZE, INPUT_REPORT_CODE, INPUT_REPORT_LEN, OUTPUT_REPORT_CODE,
    OUTPUT_REPORT_LEN, REPORT_SIZE, SCRIPT_FRAGMENT_SIZE, SETTINGS_REPORT_LEN,
};
use super::transport::{Connection, DeviceFilter, DeviceHandle, Personality, Transport, TransportError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Stray reports sent back per command while misaligned
const MISALIGNED_BURST: usize = 11;

const EXTENDED_PAYLOAD_HEADER: [u8; 2] = [0xFF, 0x01];

struct ApplianceState {
    present: Option<Personality>,
    /// Bumped on every plug so a replugged device gets a fresh path
    generation: u32,
    fail_writes: bool,
    short_writes: bool,
    panic_on_write: bool,
    panic_on_discover: bool,
    misaligned: bool,
    silent: bool,
    firmware: (u8, u8, u8),
    serial_raw: u8,
    settings: [u8; 11],
    api_mode: bool,
    slot: u8,
    controller: u8,
    outputs: [u8; 36],
    script_buf: Vec<u8>,
    loaded_script: Option<Vec<u8>>,
    pending: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    opens: usize,
    flushes: usize,
}

impl Default for ApplianceState {
    fn default() -> Self {
        Self {
            present: None,
            generation: 0,
            fail_writes: false,
            short_writes: false,
            panic_on_write: false,
            panic_on_discover: false,
            misaligned: false,
            silent: false,
            // 16/1.6 = 10, 8/1.6 = 5
            firmware: (16, 8, 0),
            serial_raw: 8,
            settings: [0; 11],
            api_mode: false,
            slot: 1,
            controller: 0x40,
            outputs: [0; 36],
            script_buf: Vec::new(),
            loaded_script: None,
            pending: VecDeque::new(),
            written: Vec::new(),
            opens: 0,
            flushes: 0,
        }
    }
}

impl ApplianceState {
    fn path(&self) -> String {
        format!("mock://appliance/{}", self.generation)
    }

    fn respond(&mut self, frame: &[u8]) {
        let Some(code) = frame.get(1).copied().and_then(CommandCode::from_byte) else {
            return;
        };
        let payload = frame.get(HEADER_SIZE..).unwrap_or(&[]);

        match code {
            CommandCode::GetFirmware | CommandCode::GetSerial | CommandCode::GetSettings
                if self.misaligned =>
            {
                for _ in 0..MISALIGNED_BURST {
                    let report = self.input_report();
                    self.pending.push_back(report);
                }
            }
            CommandCode::GetFirmware => {
                let (major_raw, minor_raw, mode) = self.firmware;
                let mut report = header(code.as_byte(), 8);
                report[4] = minor_raw;
                report[6] = major_raw;
                report[7] = mode;
                self.pending.push_back(report);
            }
            CommandCode::GetSerial => {
                let mut report = header(code.as_byte(), 30);
                report[29] = self.serial_raw;
                self.pending.push_back(report);
            }
            CommandCode::GetSettings => {
                let mut report = header(code.as_byte(), SETTINGS_REPORT_LEN);
                report[4..15].copy_from_slice(&self.settings);
                self.pending.push_back(report);
            }
            CommandCode::SetSettings => {
                if let Some(block) = payload.get(..11) {
                    self.settings.copy_from_slice(block);
                }
            }
            CommandCode::RequestIoStatus => self.push_status(),
            CommandCode::ApiMode | CommandCode::ApiModeContinuation => {
                if payload.starts_with(&EXTENDED_PAYLOAD_HEADER) {
                    self.outputs.copy_from_slice(&payload[16..52]);
                    if payload[15] == 1 {
                        self.controller = 0;
                    }
                } else {
                    self.outputs[..30].copy_from_slice(&payload[..30]);
                }
                self.push_status();
            }
            CommandCode::EnterApiMode => self.api_mode = true,
            CommandCode::ExitApiMode => self.api_mode = false,
            CommandCode::RunScript => {
                let total = usize::from(u16::from_le_bytes([frame[2], frame[3]]));
                let remaining = total.saturating_sub(self.script_buf.len());
                let take = remaining.min(SCRIPT_FRAGMENT_SIZE);
                self.script_buf.extend_from_slice(&payload[..take]);
                if frame[4] == 1 {
                    self.loaded_script = Some(std::mem::take(&mut self.script_buf));
                }
            }
            CommandCode::UnloadScript => self.loaded_script = None,
            CommandCode::ChangeSlotStep1 => {}
            CommandCode::ChangeSlotStep2 => self.slot = self.slot % 9 + 1,
            CommandCode::TurnOffController => self.controller = 0,
        }
    }

    fn push_status(&mut self) {
        let input = self.input_report();
        let output = self.output_report();
        self.pending.push_back(input);
        self.pending.push_back(output);
    }

    fn input_report(&self) -> Vec<u8> {
        let mut report = header(INPUT_REPORT_CODE, INPUT_REPORT_LEN);
        report[4..6].copy_from_slice(&250u16.to_le_bytes());
        report[6] = self.slot;
        report[7] = self.controller;
        report[8] = 3;
        report[9] = 1;
        report[17] = 8;
        report[48..50].copy_from_slice(&1000i16.to_le_bytes());
        report
    }

    fn output_report(&self) -> Vec<u8> {
        let mut report = header(OUTPUT_REPORT_CODE, OUTPUT_REPORT_LEN);
        report[4..39].copy_from_slice(&self.outputs[..35]);
        report
    }
}

fn header(code: u8, len: u8) -> Vec<u8> {
    let mut report = vec![0u8; REPORT_SIZE];
    report[0] = code;
    report[1] = len;
    report[3] = 1;
    report
}

/// Device side of the simulation
#[derive(Clone, Default)]
pub struct MockAppliance {
    state: Arc<Mutex<ApplianceState>>,
}

impl MockAppliance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host side, to hand to the engine
    pub fn transport(&self) -> MockTransport {
        MockTransport {
            state: Arc::clone(&self.state),
        }
    }

    pub fn plug(&self, personality: Personality) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.present = Some(personality);
        state.api_mode = false;
        state.pending.clear();
    }

    pub fn unplug(&self) {
        let mut state = self.state.lock();
        state.present = None;
        state.pending.clear();
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Report every write as only partly sent
    pub fn set_short_writes(&self, short: bool) {
        self.state.lock().short_writes = short;
    }

    /// Panic inside the next write, as a faulty driver would
    pub fn panic_next_write(&self) {
        self.state.lock().panic_on_write = true;
    }

    /// Panic inside the next discovery call
    pub fn panic_next_discover(&self) {
        self.state.lock().panic_on_discover = true;
    }

    /// Answer identity and settings requests with unrelated status reports
    pub fn set_misaligned(&self, misaligned: bool) {
        self.state.lock().misaligned = misaligned;
    }

    /// Accept writes but never answer
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }

    pub fn set_firmware(&self, major_raw: u8, minor_raw: u8, mode: u8) {
        self.state.lock().firmware = (major_raw, minor_raw, mode);
    }

    pub fn set_serial(&self, serial_raw: u8) {
        self.state.lock().serial_raw = serial_raw;
    }

    pub fn set_settings(&self, block: [u8; 11]) {
        self.state.lock().settings = block;
    }

    pub fn settings(&self) -> [u8; 11] {
        self.state.lock().settings
    }

    /// Queue an arbitrary report for the host to read
    pub fn push_report(&self, report: Vec<u8>) {
        self.state.lock().pending.push_back(report);
    }

    pub fn is_api_mode(&self) -> bool {
        self.state.lock().api_mode
    }

    pub fn slot(&self) -> u8 {
        self.state.lock().slot
    }

    pub fn controller(&self) -> u8 {
        self.state.lock().controller
    }

    pub fn loaded_script(&self) -> Option<Vec<u8>> {
        self.state.lock().loaded_script.clone()
    }

    /// Every frame the host wrote, oldest first
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().written.clone()
    }

    /// Command byte of every frame the host wrote
    pub fn written_codes(&self) -> Vec<u8> {
        self.state.lock().written.iter().map(|f| f[1]).collect()
    }

    pub fn clear_written(&self) {
        self.state.lock().written.clear();
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opens
    }

    pub fn flush_count(&self) -> usize {
        self.state.lock().flushes
    }
}

/// Host side of the simulation
pub struct MockTransport {
    state: Arc<Mutex<ApplianceState>>,
}

impl Transport for MockTransport {
    type Connection = MockConnection;

    fn discover(&mut self, filter: DeviceFilter) -> Result<Vec<DeviceHandle>, TransportError> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.panic_on_discover) {
            drop(state);
            panic!("mock discovery fault");
        }
        let handles = state
            .present
            .filter(|p| filter.matches(*p))
            .map(|personality| DeviceHandle {
                path: state.path(),
                personality,
                product: Some("Mock Appliance".to_string()),
                serial: None,
            })
            .into_iter()
            .collect();
        Ok(handles)
    }

    fn open(&mut self, handle: &DeviceHandle) -> Result<MockConnection, TransportError> {
        let mut state = self.state.lock();
        if state.present.is_none() || state.path() != handle.path {
            return Err(TransportError::NotFound);
        }
        state.opens += 1;
        Ok(MockConnection {
            state: Arc::clone(&self.state),
            path: handle.path.clone(),
        })
    }
}

pub struct MockConnection {
    state: Arc<Mutex<ApplianceState>>,
    path: String,
}

impl MockConnection {
    fn check_open(&self, state: &ApplianceState) -> Result<(), TransportError> {
        if state.present.is_some() && state.path() == self.path {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }
}

impl Connection for MockConnection {
    fn read(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let mut state = self.state.lock();
        self.check_open(&state)?;
        Ok(state.pending.pop_front())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.state.lock();
        self.check_open(&state)?;
        if std::mem::take(&mut state.panic_on_write) {
            drop(state);
            panic!("mock write fault");
        }
        if state.fail_writes {
            return Err(TransportError::WriteRejected);
        }
        if state.short_writes {
            state.written.push(data.to_vec());
            return Ok(data.len() / 2);
        }
        state.written.push(data.to_vec());
        if !state.silent && data.len() == FRAME_SIZE {
            state.respond(data);
        }
        Ok(data.len())
    }

    fn flush_input(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        self.check_open(&state)?;
        state.pending.clear();
        state.flushes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hid::commands::{build_get_firmware, build_script_upload};

    fn open(appliance: &MockAppliance) -> MockConnection {
        let mut transport = appliance.transport();
        let handles = transport.discover(DeviceFilter::Normal).unwrap();
        transport.open(&handles[0]).unwrap()
    }

    #[test]
    fn test_firmware_answer() {
        let appliance = MockAppliance::new();
        appliance.plug(Personality::Normal);
        let mut conn = open(&appliance);

        conn.write(build_get_firmware().encode().as_bytes()).unwrap();
        let report = conn.read(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(report[0], 0xF0);
        assert_eq!(report[6], 16);
        assert!(conn.read(Duration::from_millis(10)).unwrap().is_none());
    }

    #[test]
    fn test_script_reassembled() {
        let appliance = MockAppliance::new();
        appliance.plug(Personality::Normal);
        let mut conn = open(&appliance);

        let script: Vec<u8> = (0..130u8).collect();
        for cmd in build_script_upload(&script) {
            conn.write(cmd.encode().as_bytes()).unwrap();
        }
        assert_eq!(appliance.loaded_script(), Some(script));
    }

    #[test]
    fn test_connection_closed_after_unplug() {
        let appliance = MockAppliance::new();
        appliance.plug(Personality::Normal);
        let mut conn = open(&appliance);
        appliance.unplug();
        assert!(matches!(conn.read(Duration::ZERO), Err(TransportError::Closed)));
    }

    #[test]
    fn test_fail_writes() {
        let appliance = MockAppliance::new();
        appliance.plug(Personality::Normal);
        let mut conn = open(&appliance);
        appliance.set_fail_writes(true);
        assert!(matches!(
            conn.write(&[0u8; FRAME_SIZE]),
            Err(TransportError::WriteRejected)
        ));
        assert!(appliance.written().is_empty());
    }
}
