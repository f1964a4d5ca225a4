//! Live I/O status snapshots
//!
//! A snapshot is rebuilt from either an input-side or an output-side status
//! report. Fields the report does not carry are copied forward from the
//! previous snapshot.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Slots in an input buffer (the report carries the first 29)
pub const INPUT_SLOTS: usize = 30;

/// Input values carried by an input report
pub const INPUT_VALUES_CARRIED: usize = 29;

/// Slots in an output buffer: 30 outputs plus 6 trace values
pub const OUTPUT_SLOTS: usize = 36;

/// Output values carried by an output report
pub const OUTPUT_VALUES_CARRIED: usize = 35;

/// First trace slot in an output buffer
pub const TRACE_OFFSET: usize = 30;

/// Number of trace slots
pub const TRACE_SLOTS: usize = OUTPUT_SLOTS - TRACE_OFFSET;

const CPU_EMA_WEIGHT: f64 = 0.1;

/// Console the appliance is emulating a controller for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConsoleType {
    #[default]
    None,
    Ps3,
    Xb360,
    Ps4,
    Xb1,
    /// Wheel output flag on its own
    Wheel,
    Ps3Wheel,
    Xb360Wheel,
    Ps4Wheel,
    Xb1Wheel,
    Other(u8),
}

impl ConsoleType {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => ConsoleType::None,
            1 => ConsoleType::Ps3,
            2 => ConsoleType::Xb360,
            3 => ConsoleType::Ps4,
            4 => ConsoleType::Xb1,
            8 => ConsoleType::Wheel,
            9 => ConsoleType::Ps3Wheel,
            10 => ConsoleType::Xb360Wheel,
            11 => ConsoleType::Ps4Wheel,
            12 => ConsoleType::Xb1Wheel,
            other => ConsoleType::Other(other),
        }
    }

    /// Display name; wheel compounds fold to their base console
    pub fn name(&self) -> &'static str {
        match self {
            ConsoleType::Ps3 | ConsoleType::Ps3Wheel => "PS3",
            ConsoleType::Xb360 | ConsoleType::Xb360Wheel => "XB360",
            ConsoleType::Ps4 | ConsoleType::Ps4Wheel => "PS4",
            ConsoleType::Xb1 | ConsoleType::Xb1Wheel => "XB1",
            _ => "None",
        }
    }
}

/// Controller plugged into the appliance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ControllerType {
    #[default]
    None,
    Ps3,
    Xb360,
    Wii,
    WiiNunchuk,
    WiiClassicPro,
    Ps4,
    Xb1,
    G25,
    G27,
    Other(u8),
}

impl ControllerType {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => ControllerType::None,
            0x10 => ControllerType::Ps3,
            0x20 => ControllerType::Xb360,
            0x30 => ControllerType::Wii,
            0x31 => ControllerType::WiiNunchuk,
            0x32 => ControllerType::WiiClassicPro,
            0x40 => ControllerType::Ps4,
            0x50 => ControllerType::Xb1,
            0x69 => ControllerType::G25,
            0x6B => ControllerType::G27,
            other => ControllerType::Other(other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControllerType::None => "None",
            ControllerType::Ps3 => "PS3",
            ControllerType::Xb360 => "XB360",
            ControllerType::Wii | ControllerType::WiiNunchuk | ControllerType::WiiClassicPro => "WII",
            ControllerType::Ps4 => "PS4",
            ControllerType::Xb1 => "XB1",
            ControllerType::G25 => "G25",
            ControllerType::G27 => "G27",
            ControllerType::Other(_) => "Unknown",
        }
    }
}

/// Player LED state, shared by status reports and output frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LedState {
    #[default]
    Off,
    On,
    Blink,
    BlinkSlow,
    Other(u8),
}

impl LedState {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => LedState::Off,
            1 => LedState::On,
            2 => LedState::Blink,
            3 => LedState::BlinkSlow,
            other => LedState::Other(other),
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            LedState::Off => 0,
            LedState::On => 1,
            LedState::Blink => 2,
            LedState::BlinkSlow => 3,
            LedState::Other(raw) => *raw,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LedState::Off => "Off",
            LedState::On => "On",
            LedState::Blink => "Blink",
            LedState::BlinkSlow => "Slow Blink",
            LedState::Other(_) => "",
        }
    }
}

/// Controller input values, as seen by the appliance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputBuffer {
    values: Vec<i8>,
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self {
            values: vec![0; INPUT_SLOTS],
        }
    }
}

impl InputBuffer {
    /// Build from raw report bytes, reinterpreting each as a signed value
    pub fn from_raw(raw: &[u8]) -> Self {
        let mut buffer = Self::default();
        for (slot, &byte) in buffer.values.iter_mut().zip(raw.iter()) {
            *slot = byte as i8;
        }
        buffer
    }

    pub fn get(&self, index: usize) -> Option<i8> {
        self.values.get(index).copied()
    }

    pub fn values(&self) -> &[i8] {
        &self.values
    }
}

/// Console output values plus trace slots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputBuffer {
    values: Vec<i8>,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self {
            values: vec![0; OUTPUT_SLOTS],
        }
    }
}

impl OutputBuffer {
    pub fn from_raw(raw: &[u8]) -> Self {
        let mut buffer = Self::default();
        for (slot, &byte) in buffer.values.iter_mut().zip(raw.iter()) {
            *slot = byte as i8;
        }
        buffer
    }

    pub fn get(&self, index: usize) -> Option<i8> {
        self.values.get(index).copied()
    }

    /// Trace value `index` (0-5)
    pub fn trace(&self, index: usize) -> Option<i8> {
        if index < TRACE_SLOTS {
            self.get(TRACE_OFFSET + index)
        } else {
            None
        }
    }

    pub fn outputs(&self) -> &[i8] {
        &self.values[..TRACE_OFFSET]
    }

    pub fn values(&self) -> &[i8] {
        &self.values
    }
}

/// Raw rumble motor bytes (0-255)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RumbleLevels {
    pub a: u8,
    pub b: u8,
    pub rt: u8,
    pub lt: u8,
}

/// Rumble byte as a truncated percentage
pub fn rumble_percent(raw: u8) -> u8 {
    (f64::from(raw) / 2.55) as u8
}

/// Immutable I/O status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoStatus {
    pub inputs: InputBuffer,
    pub outputs: OutputBuffer,
    pub slot: u8,
    pub controller: ControllerType,
    pub console: ConsoleType,
    pub leds: [LedState; 4],
    pub rumble: RumbleLevels,
    /// Battery byte; above 10 means charging
    pub battery_raw: u8,
    /// Smoothed CPU load estimate
    pub cpu_load_ema: f64,
    /// CPU load percentage as reported to callers
    pub cpu_load: u16,
    /// When this snapshot was received
    pub timestamp: DateTime<Local>,
}

impl Default for IoStatus {
    fn default() -> Self {
        Self {
            inputs: InputBuffer::default(),
            outputs: OutputBuffer::default(),
            slot: 0,
            controller: ControllerType::None,
            console: ConsoleType::None,
            leds: [LedState::Off; 4],
            rumble: RumbleLevels::default(),
            battery_raw: 0,
            cpu_load_ema: 0.0,
            cpu_load: 0,
            timestamp: Local::now(),
        }
    }
}

/// Fold one raw sample into the CPU load average
pub fn cpu_load_ema(previous: f64, sample: f64) -> f64 {
    previous * (1.0 - CPU_EMA_WEIGHT) + CPU_EMA_WEIGHT * sample
}

impl IoStatus {
    /// Decode an input-side report (code 1, length 46).
    ///
    /// Output values are carried over from `previous`.
    pub fn from_input_report(report: &[u8], previous: Option<&IoStatus>) -> Self {
        let byte = |i: usize| report.get(i).copied().unwrap_or(0);
        let inputs = InputBuffer::from_raw(report.get(18..18 + INPUT_VALUES_CARRIED).unwrap_or(&[]));

        let ticks = u16::from_le_bytes([byte(4), byte(5)]);
        let freq = i16::from_le_bytes([byte(48), byte(49)]).max(1);
        let sample = ((i32::from(ticks) * 100) / i32::from(freq)) as i16;
        let prev_ema = previous.map(|p| p.cpu_load_ema).unwrap_or(0.0);
        let ema = cpu_load_ema(prev_ema, f64::from(sample));

        Self {
            inputs,
            outputs: previous.map(|p| p.outputs.clone()).unwrap_or_default(),
            slot: byte(6),
            controller: ControllerType::from_byte(byte(7)),
            console: ConsoleType::from_byte(byte(8)),
            leds: [
                LedState::from_byte(byte(9)),
                LedState::from_byte(byte(10)),
                LedState::from_byte(byte(11)),
                LedState::from_byte(byte(12)),
            ],
            rumble: RumbleLevels {
                a: byte(13),
                b: byte(14),
                rt: byte(15),
                lt: byte(16),
            },
            battery_raw: byte(17),
            cpu_load_ema: ema,
            cpu_load: ema as u16,
            timestamp: Local::now(),
        }
    }

    /// Decode an output-side report (code 2, length 36).
    ///
    /// Everything except the output values is copied from `previous`.
    pub fn from_output_report(report: &[u8], previous: Option<&IoStatus>) -> Self {
        let outputs = OutputBuffer::from_raw(report.get(4..4 + OUTPUT_VALUES_CARRIED).unwrap_or(&[]));
        let base = previous.cloned().unwrap_or_default();
        Self {
            outputs,
            timestamp: Local::now(),
            ..base
        }
    }

    pub fn console_name(&self) -> &'static str {
        self.console.name()
    }

    pub fn controller_name(&self) -> &'static str {
        self.controller.name()
    }

    pub fn battery_percent(&self) -> u16 {
        u16::from(self.battery_raw) * 10
    }

    pub fn is_charging(&self) -> bool {
        self.battery_raw > 10
    }

    /// Battery as shown to users: a percentage or "Charging"
    pub fn battery_label(&self) -> String {
        if self.is_charging() {
            "Charging".to_string()
        } else {
            format!("{}%", self.battery_percent())
        }
    }

    /// Rumble percentages in (A, B, RT, LT) order
    pub fn rumble_percentages(&self) -> [u8; 4] {
        [
            rumble_percent(self.rumble.a),
            rumble_percent(self.rumble.b),
            rumble_percent(self.rumble.rt),
            rumble_percent(self.rumble.lt),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input_report() -> Vec<u8> {
        let mut report = vec![0u8; 64];
        report[0] = 1;
        report[1] = 46;
        report[3] = 1;
        report[4..6].copy_from_slice(&500u16.to_le_bytes());
        report[6] = 3;
        report[7] = 0x40;
        report[8] = 11;
        report[9] = 1;
        report[10] = 2;
        report[13] = 255;
        report[15] = 128;
        report[17] = 7;
        report[18] = 100;
        report[19] = 0x9C; // -100
        report[46] = 5;
        report[48..50].copy_from_slice(&1000i16.to_le_bytes());
        report
    }

    #[test]
    fn test_input_report_fields() {
        let status = IoStatus::from_input_report(&input_report(), None);
        assert_eq!(status.slot, 3);
        assert_eq!(status.controller, ControllerType::Ps4);
        assert_eq!(status.console, ConsoleType::Ps4Wheel);
        assert_eq!(status.console_name(), "PS4");
        assert_eq!(status.leds[0], LedState::On);
        assert_eq!(status.leds[1], LedState::Blink);
        assert_eq!(status.rumble.a, 255);
        assert_eq!(status.rumble.rt, 128);
        assert_eq!(status.inputs.get(0), Some(100));
        assert_eq!(status.inputs.get(1), Some(-100));
        assert_eq!(status.inputs.get(28), Some(5));
        assert_eq!(status.inputs.get(29), Some(0));
        assert_eq!(status.battery_percent(), 70);
        assert!(!status.is_charging());
    }

    #[test]
    fn test_cpu_load_ema_from_reports() {
        // 500 ticks * 100 / 1000 = 50
        let first = IoStatus::from_input_report(&input_report(), None);
        assert!((first.cpu_load_ema - 5.0).abs() < 1e-9);
        assert_eq!(first.cpu_load, 5);

        let second = IoStatus::from_input_report(&input_report(), Some(&first));
        assert!((second.cpu_load_ema - 9.5).abs() < 1e-9);
        assert_eq!(second.cpu_load, 9);
    }

    #[test]
    fn test_zero_frequency_floored() {
        let mut report = input_report();
        report[48] = 0;
        report[49] = 0;
        report[4..6].copy_from_slice(&3u16.to_le_bytes());
        let status = IoStatus::from_input_report(&report, None);
        assert!((status.cpu_load_ema - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_ema_bounded_and_converges() {
        let mut ema = 20.0;
        for _ in 0..200 {
            let next = cpu_load_ema(ema, 80.0);
            assert!(next >= ema && next <= 80.0);
            ema = next;
        }
        assert!((ema - 80.0).abs() < 0.01);

        let down = cpu_load_ema(50.0, 10.0);
        assert!(down <= 50.0 && down >= 10.0);
    }

    #[test]
    fn test_output_report_preserves_other_fields() {
        let input = IoStatus::from_input_report(&input_report(), None);

        let mut report = vec![0u8; 64];
        report[0] = 2;
        report[1] = 36;
        report[3] = 1;
        report[4] = 0x9C;
        report[4 + 30] = 0xFF;
        report[4 + 34] = 42;
        let status = IoStatus::from_output_report(&report, Some(&input));

        assert_eq!(status.outputs.get(0), Some(-100));
        assert_eq!(status.outputs.trace(0), Some(-1));
        assert_eq!(status.outputs.trace(4), Some(42));
        assert_eq!(status.outputs.trace(5), Some(0));
        assert_eq!(status.outputs.trace(6), None);
        assert_eq!(status.inputs, input.inputs);
        assert_eq!(status.slot, input.slot);
        assert_eq!(status.leds, input.leds);
        assert_eq!(status.cpu_load, input.cpu_load);
        assert_eq!(status.battery_raw, input.battery_raw);
    }

    #[test]
    fn test_input_report_preserves_outputs() {
        let mut report = vec![0u8; 64];
        report[0] = 2;
        report[1] = 36;
        report[3] = 1;
        report[10] = 77;
        let output = IoStatus::from_output_report(&report, None);
        let status = IoStatus::from_input_report(&input_report(), Some(&output));
        assert_eq!(status.outputs.get(6), Some(77));
    }

    #[test]
    fn test_presentation_helpers() {
        let status = IoStatus {
            battery_raw: 11,
            rumble: RumbleLevels {
                a: 255,
                b: 0,
                rt: 128,
                lt: 3,
            },
            controller: ControllerType::Other(0x77),
            ..Default::default()
        };
        assert!(status.is_charging());
        assert_eq!(status.battery_label(), "Charging");
        assert_eq!(status.rumble_percentages(), [100, 0, 50, 1]);
        assert_eq!(status.controller_name(), "Unknown");
        assert_eq!(status.controller, ControllerType::Other(0x77));
        assert_eq!(ControllerType::from_byte(0x31).name(), "WII");
        assert_eq!(LedState::BlinkSlow.name(), "Slow Blink");
    }
}
