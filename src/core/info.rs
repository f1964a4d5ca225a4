//! Device identity and connection state

use serde::{Deserialize, Serialize};

/// Connection state as seen by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceState {
    #[default]
    Disconnected,
    Connected,
    /// Accepting programmatic output frames
    ApiMode,
    /// Present, identity refresh in progress
    Updating,
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceState::Disconnected => write!(f, "disconnected"),
            DeviceState::Connected => write!(f, "connected"),
            DeviceState::ApiMode => write!(f, "api-mode"),
            DeviceState::Updating => write!(f, "updating"),
        }
    }
}

/// Firmware edition reported alongside the version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OperationalMode {
    #[default]
    Unknown,
    Standard,
    TournamentEdition,
    WheelEdition,
}

impl OperationalMode {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0xFF => OperationalMode::TournamentEdition,
            0x01 => OperationalMode::WheelEdition,
            _ => OperationalMode::Standard,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Identity of the attached appliance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub state: DeviceState,
    pub firmware: Option<FirmwareVersion>,
    pub mode: OperationalMode,
    pub hub_compatible: bool,
    /// Revision derived from the serial response; 0 until one arrives
    #[serde(skip)]
    pub(crate) serial_minor: u8,
}

impl DeviceInfo {
    /// Fresh value used whenever the device goes away
    pub fn disconnected() -> Self {
        Self::default()
    }

    /// Fresh value used when a device appears and identity is being re-read
    pub fn updating() -> Self {
        Self {
            state: DeviceState::Updating,
            ..Self::default()
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == DeviceState::Connected
    }

    pub fn is_api_mode(&self) -> bool {
        self.state == DeviceState::ApiMode
    }

    /// Present and identified, in either normal or API mode
    pub fn is_ready(&self) -> bool {
        matches!(self.state, DeviceState::Connected | DeviceState::ApiMode)
    }
}
