//! Last-known device state
//!
//! The dispatcher is the only writer. Readers take cloned snapshots, so a
//! reader may see a slightly stale value but never a torn one.

use super::info::{DeviceInfo, DeviceState, FirmwareVersion, OperationalMode};
use super::settings::DeviceSettings;
use super::status::IoStatus;
use crate::hid::protocol::{scale_version, Response};
use std::sync::Arc;

/// Serial revision used when the device reports zero
const SERIAL_WRAP_SENTINEL: u8 = 255;

/// What a decoded response changed
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    Info(DeviceInfo),
    Settings(DeviceSettings),
    IoStatus(Arc<IoStatus>),
}

/// Owner of the current DeviceInfo, DeviceSettings and IoStatus
#[derive(Debug, Default)]
pub struct StateStore {
    info: DeviceInfo,
    settings: Option<DeviceSettings>,
    io_status: Option<Arc<IoStatus>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&self) -> DeviceInfo {
        self.info
    }

    pub fn settings(&self) -> Option<DeviceSettings> {
        self.settings
    }

    pub fn io_status(&self) -> Option<Arc<IoStatus>> {
        self.io_status.clone()
    }

    /// Replace the device info wholesale
    pub fn reset_info(&mut self, info: DeviceInfo) -> DeviceInfo {
        self.info = info;
        self.info
    }

    /// Change only the connection state
    pub fn set_state(&mut self, state: DeviceState) -> DeviceInfo {
        self.info.state = state;
        self.info
    }

    /// Fold a decoded response into the store
    pub fn apply(&mut self, response: Response) -> StateChange {
        match response {
            Response::Firmware {
                major_raw,
                minor_raw,
                mode,
            } => {
                let major = scale_version(major_raw);
                let minor = scale_version(minor_raw);
                let serial_known = self.info.serial_minor != 0;
                let hub_compatible = if serial_known {
                    self.info.serial_minor == major
                } else {
                    self.info.hub_compatible
                };
                self.info = DeviceInfo {
                    state: if serial_known {
                        DeviceState::Connected
                    } else {
                        DeviceState::Updating
                    },
                    firmware: Some(FirmwareVersion { major, minor }),
                    mode: OperationalMode::from_byte(mode),
                    hub_compatible,
                    serial_minor: 0,
                };
                StateChange::Info(self.info)
            }
            Response::Serial { revision_raw } => {
                let mut revision = scale_version(revision_raw);
                if revision == 0 {
                    revision = SERIAL_WRAP_SENTINEL;
                }
                match self.info.firmware {
                    Some(fw) => {
                        self.info.hub_compatible = fw.minor == revision;
                        self.info.state = DeviceState::Connected;
                        self.info.serial_minor = 0;
                    }
                    None => {
                        self.info.hub_compatible = false;
                        self.info.state = DeviceState::Updating;
                        self.info.serial_minor = revision;
                    }
                }
                StateChange::Info(self.info)
            }
            Response::Settings(block) => {
                let settings = DeviceSettings::from_block(&block);
                self.settings = Some(settings);
                StateChange::Settings(settings)
            }
            Response::InputStatus(report) => {
                let status = Arc::new(IoStatus::from_input_report(
                    &report,
                    self.io_status.as_deref(),
                ));
                self.io_status = Some(Arc::clone(&status));
                StateChange::IoStatus(status)
            }
            Response::OutputStatus(report) => {
                let status = Arc::new(IoStatus::from_output_report(
                    &report,
                    self.io_status.as_deref(),
                ));
                self.io_status = Some(Arc::clone(&status));
                StateChange::IoStatus(status)
            }
        }
    }

    /// Classify and apply a raw report; unknown reports change nothing
    pub fn decode(&mut self, report: &[u8]) -> Option<StateChange> {
        Response::parse(report).map(|response| self.apply(response))
    }
}
