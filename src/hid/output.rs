//! API-mode output frame builders
//!
//! `CmCommand` carries plain output values. `CmCommandEx` adds player LEDs,
//! rumble motors and one-shot actions, tracking which groups changed since
//! the builder was created.

use crate::core::status::LedState;

/// Output slots in a plain frame
pub const CM_COMMAND_SLOTS: usize = 30;

/// Output slots in an extended frame (30 outputs + 6 trace values)
pub const CM_COMMAND_EX_SLOTS: usize = 36;

/// Size of an extended API-mode payload
pub const API_PAYLOAD_SIZE: usize = 52;

/// Values a single output can take
pub const OUTPUT_MIN: i32 = -100;
pub const OUTPUT_MAX: i32 = 100;

const PAYLOAD_HEADER: [u8; 2] = [0xFF, 0x01];
const OUTPUTS_OFFSET: usize = 16;

/// Anything that can be sent as an API-mode frame
pub trait ApiPayload {
    /// Serialize the frame payload
    fn to_payload(&self) -> Vec<u8>;
}

fn clamp_output(value: i32) -> u8 {
    value.clamp(OUTPUT_MIN, OUTPUT_MAX) as i8 as u8
}

/// Rumble percentage to motor byte
fn rumble_from_percent(percent: i32) -> i32 {
    (f64::from(percent) * 2.55).ceil() as i32
}

/// Motor byte back to the percentage it was set from
fn rumble_to_percent(raw: i32) -> i32 {
    (f64::from(raw) / 2.55).ceil() as i32
}

/// Plain output frame: 30 values clamped to [-100, 100]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmCommand {
    outputs: [i32; CM_COMMAND_SLOTS],
}

impl Default for CmCommand {
    fn default() -> Self {
        Self {
            outputs: [0; CM_COMMAND_SLOTS],
        }
    }
}

impl CmCommand {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list of values; extra values are ignored
    pub fn from_values(values: &[i32]) -> Self {
        let mut cmd = Self::new();
        for (slot, &value) in cmd.outputs.iter_mut().zip(values) {
            *slot = value;
        }
        cmd
    }

    pub fn set(&mut self, index: usize, value: i32) {
        if let Some(slot) = self.outputs.get_mut(index) {
            *slot = value;
        }
    }

    pub fn get(&self, index: usize) -> Option<i32> {
        self.outputs.get(index).copied()
    }
}

impl ApiPayload for CmCommand {
    fn to_payload(&self) -> Vec<u8> {
        self.outputs.iter().map(|&v| clamp_output(v)).collect()
    }
}

/// Extended output frame with LED, rumble and one-shot state
#[derive(Debug, PartialEq, Eq)]
pub struct CmCommandEx {
    outputs: [i32; CM_COMMAND_EX_SLOTS],
    leds: [LedState; 4],
    leds_changed: bool,
    /// Raw motor bytes in (A, B, LT, RT) order
    rumble: [i32; 4],
    rumble_changed: bool,
    block_rumble: bool,
    reset_rumble: bool,
    /// Return all player LEDs to device control
    pub reset_leds: bool,
    /// Power the controller down when this frame is applied
    pub turn_off_controller: bool,
}

/// Rumble motor selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RumbleMotor {
    A = 0,
    B = 1,
    Lt = 2,
    Rt = 3,
}

impl Default for CmCommandEx {
    fn default() -> Self {
        Self {
            outputs: [0; CM_COMMAND_EX_SLOTS],
            leds: [LedState::On, LedState::Off, LedState::Off, LedState::Off],
            leds_changed: false,
            rumble: [0; 4],
            rumble_changed: false,
            block_rumble: false,
            reset_rumble: false,
            reset_leds: false,
            turn_off_controller: false,
        }
    }
}

impl CmCommandEx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: &[i32]) -> Self {
        let mut cmd = Self::new();
        for (slot, &value) in cmd.outputs.iter_mut().zip(values) {
            *slot = value;
        }
        cmd
    }

    pub fn set(&mut self, index: usize, value: i32) {
        if let Some(slot) = self.outputs.get_mut(index) {
            *slot = value;
        }
    }

    pub fn get(&self, index: usize) -> Option<i32> {
        self.outputs.get(index).copied()
    }

    /// Player LED `index` (0-3)
    pub fn led(&self, index: usize) -> Option<LedState> {
        self.leds.get(index).copied()
    }

    /// Marks the LED group dirty only on an actual change
    pub fn set_led(&mut self, index: usize, state: LedState) {
        if let Some(led) = self.leds.get_mut(index) {
            if *led != state {
                self.leds_changed = true;
            }
            *led = state;
        }
    }

    pub fn leds_changed(&self) -> bool {
        self.leds_changed
    }

    /// Raw motor byte as it will be sent
    pub fn rumble_raw(&self, motor: RumbleMotor) -> i32 {
        self.rumble[motor as usize]
    }

    /// Set a motor from a percentage.
    ///
    /// The change check compares against the percentage recovered from the
    /// stored byte; a difference marks rumble dirty and lifts the block.
    pub fn set_rumble(&mut self, motor: RumbleMotor, percent: i32) {
        let slot = &mut self.rumble[motor as usize];
        if rumble_to_percent(*slot) != percent {
            self.rumble_changed = true;
            self.block_rumble = false;
        }
        *slot = rumble_from_percent(percent);
    }

    pub fn rumble_changed(&self) -> bool {
        self.rumble_changed
    }

    pub fn block_rumble(&self) -> bool {
        self.block_rumble
    }

    pub fn set_block_rumble(&mut self, block: bool) {
        self.block_rumble = block;
        self.rumble_changed = true;
    }

    pub fn reset_rumble(&self) -> bool {
        self.reset_rumble
    }

    /// Setting the flag zeroes all motors and marks rumble dirty
    pub fn set_reset_rumble(&mut self, reset: bool) {
        self.reset_rumble = reset;
        if reset {
            self.rumble = [0; 4];
            self.rumble_changed = true;
        }
    }

    /// Copy that carries outputs, LEDs, rumble and the block flag forward.
    ///
    /// One-shot actions and dirty flags start cleared on the copy.
    pub fn persistent_copy(&self) -> Self {
        Self {
            outputs: self.outputs,
            leds: self.leds,
            rumble: self.rumble,
            block_rumble: self.block_rumble,
            ..Self::default()
        }
    }
}

impl ApiPayload for CmCommandEx {
    fn to_payload(&self) -> Vec<u8> {
        let mut payload = vec![0u8; API_PAYLOAD_SIZE];
        payload[..2].copy_from_slice(&PAYLOAD_HEADER);
        payload[2] = u8::from(self.leds_changed);
        for (i, led) in self.leds.iter().enumerate() {
            payload[3 + i] = led.as_byte();
        }
        payload[7] = u8::from(self.reset_leds);
        payload[8] = u8::from(self.rumble_changed);
        for (i, &raw) in self.rumble.iter().enumerate() {
            payload[9 + i] = raw.clamp(0, 255) as u8;
        }
        payload[13] = u8::from(self.reset_rumble);
        payload[14] = u8::from(self.block_rumble);
        payload[15] = u8::from(self.turn_off_controller);

        for (i, &value) in self.outputs.iter().enumerate() {
            payload[OUTPUTS_OFFSET + i] = if i < CM_COMMAND_SLOTS {
                clamp_output(value)
            } else {
                // trace slots go out as raw bytes
                value as u8
            };
        }
        payload
    }
}
