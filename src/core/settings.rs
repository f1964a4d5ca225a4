//! Device settings block
//!
//! The appliance stores its configuration in an 11-byte block read with
//! GetSettings and written with SetSettings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Size of the encoded settings block
pub const SETTINGS_BLOCK_SIZE: usize = 11;

/// Console output protocol selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum OutputProtocol {
    /// Detect the connected console
    #[default]
    Automatic = 0,
    Ps3 = 1,
    Xb360 = 2,
    Ps4 = 3,
    Xb1 = 4,
}

impl OutputProtocol {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => OutputProtocol::Ps3,
            2 => OutputProtocol::Xb360,
            3 => OutputProtocol::Ps4,
            4 => OutputProtocol::Xb1,
            _ => OutputProtocol::Automatic,
        }
    }
}

/// Bluetooth rumble handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum BtRumble {
    #[default]
    FullSpeed = 0,
    FlowControl = 1,
    FlowControlPlus = 2,
    Disabled = 3,
}

impl BtRumble {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => BtRumble::FlowControl,
            2 => BtRumble::FlowControlPlus,
            3 => BtRumble::Disabled,
            _ => BtRumble::FullSpeed,
        }
    }
}

/// Controller idle timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum IdleTimeout {
    #[default]
    Disabled = 0,
    Minutes5 = 5,
    Minutes10 = 10,
    Minutes15 = 15,
    Minutes20 = 20,
    Minutes30 = 30,
    Minutes60 = 60,
}

impl IdleTimeout {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            5 => IdleTimeout::Minutes5,
            10 => IdleTimeout::Minutes10,
            15 => IdleTimeout::Minutes15,
            20 => IdleTimeout::Minutes20,
            30 => IdleTimeout::Minutes30,
            60 => IdleTimeout::Minutes60,
            _ => IdleTimeout::Disabled,
        }
    }
}

/// Backlight color, the low 3 bits of the backlight byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum BacklightColor {
    #[default]
    Disabled = 0,
    Blue = 1,
    Green = 2,
    Cyan = 3,
    Red = 4,
    Magenta = 5,
    Yellow = 6,
    /// Reserved compound value; a bare white backlight is written as disabled
    White = 7,
}

impl BacklightColor {
    pub fn from_bits(bits: u8) -> Self {
        match bits & BACKLIGHT_COLOR_MASK {
            1 => BacklightColor::Blue,
            2 => BacklightColor::Green,
            3 => BacklightColor::Cyan,
            4 => BacklightColor::Red,
            5 => BacklightColor::Magenta,
            6 => BacklightColor::Yellow,
            7 => BacklightColor::White,
            _ => BacklightColor::Disabled,
        }
    }
}

const BACKLIGHT_COLOR_MASK: u8 = 0x07;
const BACKLIGHT_STRICT_LEDS: u8 = 0x40;
const BACKLIGHT_MIMIC_LEDS: u8 = 0x80;

/// Backlight byte: color plus two player-LED behaviour bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Backlight {
    pub color: BacklightColor,
    /// Follow the controller's player LEDs strictly
    pub strict_player_leds: bool,
    /// Mimic the controller's player LEDs
    pub mimic_player_leds: bool,
}

impl Backlight {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            color: BacklightColor::from_bits(byte),
            strict_player_leds: byte & BACKLIGHT_STRICT_LEDS != 0,
            mimic_player_leds: byte & BACKLIGHT_MIMIC_LEDS != 0,
        }
    }

    pub fn to_byte(&self) -> u8 {
        let mut b = self.color as u8;
        if self.strict_player_leds {
            b |= BACKLIGHT_STRICT_LEDS;
        }
        if self.mimic_player_leds {
            b |= BACKLIGHT_MIMIC_LEDS;
        }
        b
    }

    /// The value actually written to the device
    pub fn normalized(&self) -> Self {
        if self.to_byte() == BacklightColor::White as u8 {
            Backlight::default()
        } else {
            *self
        }
    }
}

const SPEEDUP_INFRAME_OUT: u8 = 0x01;
const SPEEDUP_INFRAME_IN: u8 = 0x02;
const SPEEDUP_ONE_MS_RESPONSE: u8 = 0x04;
const SPEEDUP_DS4_BT_BOOST: u8 = 0x08;

/// Four independent latency speed-up flags packed into one byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpeedUp {
    pub inframe_out: bool,
    pub inframe_in: bool,
    pub one_ms_response: bool,
    pub ds4_bt_boost: bool,
}

impl SpeedUp {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            inframe_out: byte & SPEEDUP_INFRAME_OUT != 0,
            inframe_in: byte & SPEEDUP_INFRAME_IN != 0,
            one_ms_response: byte & SPEEDUP_ONE_MS_RESPONSE != 0,
            ds4_bt_boost: byte & SPEEDUP_DS4_BT_BOOST != 0,
        }
    }

    pub fn to_byte(&self) -> u8 {
        let mut b = 0;
        if self.inframe_out {
            b |= SPEEDUP_INFRAME_OUT;
        }
        if self.inframe_in {
            b |= SPEEDUP_INFRAME_IN;
        }
        if self.one_ms_response {
            b |= SPEEDUP_ONE_MS_RESPONSE;
        }
        if self.ds4_bt_boost {
            b |= SPEEDUP_DS4_BT_BOOST;
        }
        b
    }
}

/// Persistent appliance configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub output_protocol: OutputProtocol,
    /// Bluetooth searching for PS4/Wii controllers
    pub bt_searching: bool,
    pub remote_control_slot: bool,
    /// Alternate remote-control slot mapping; only meaningful with `remote_control_slot`
    pub remote_control_slot_g8: bool,
    pub slot_recall: bool,
    pub ds3_auto_pair: bool,
    pub bt_rumble: BtRumble,
    pub speed_up: SpeedUp,
    pub backlight: Backlight,
    pub ds4_lightbar_brightness: u8,
    pub partial_ds4_crossover: bool,
    pub idle_timeout: IdleTimeout,
}

impl DeviceSettings {
    /// Decode the 11-byte block carried by a settings response
    pub fn from_block(block: &[u8; SETTINGS_BLOCK_SIZE]) -> Self {
        Self {
            output_protocol: OutputProtocol::from_byte(block[0]),
            bt_searching: block[1] == 1,
            remote_control_slot: block[2] == 1 || block[2] == 8,
            remote_control_slot_g8: block[2] == 8,
            slot_recall: block[3] == 1,
            ds3_auto_pair: block[4] == 1,
            bt_rumble: BtRumble::from_byte(block[5]),
            speed_up: SpeedUp::from_byte(block[6]),
            backlight: Backlight::from_byte(block[7]),
            ds4_lightbar_brightness: block[8],
            partial_ds4_crossover: block[9] == 1,
            idle_timeout: IdleTimeout::from_byte(block[10]),
        }
    }

    /// Encode for SetSettings; a bare white backlight is written as disabled
    pub fn to_block(&self) -> [u8; SETTINGS_BLOCK_SIZE] {
        let remote = match (self.remote_control_slot, self.remote_control_slot_g8) {
            (true, true) => 8,
            (true, false) => 1,
            (false, _) => 0,
        };
        [
            self.output_protocol as u8,
            u8::from(self.bt_searching),
            remote,
            u8::from(self.slot_recall),
            u8::from(self.ds3_auto_pair),
            self.bt_rumble as u8,
            self.speed_up.to_byte(),
            self.backlight.normalized().to_byte(),
            self.ds4_lightbar_brightness,
            u8::from(self.partial_ds4_crossover),
            self.idle_timeout as u8,
        ]
    }

    /// Load a settings preset from a TOML file
    pub fn load_preset(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings preset: {:?}", path))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings preset: {:?}", path))
    }

    /// Save settings as a TOML preset
    pub fn save_preset(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write settings preset: {:?}", path))
    }
}
