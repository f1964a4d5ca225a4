//! CronusLink
//!
//! Host-side client for the CronusMAX USB-HID controller remapping appliance.
//!
//! # Features
//! - Detects the appliance and its bootloader personality, tracks hot-plug
//! - Queues commands to a single dispatcher thread with read alignment
//! - Reads and writes the persistent settings block, with TOML presets
//! - Uploads and unloads compiled scripts, changes slot, turns off controllers
//! - Drives the controller from the host in API mode
//! - Decodes input/output status reports into typed snapshots
//! - Publishes changes to any number of async subscribers

pub mod core;
pub mod hid;

pub use core::config::Config;
pub use core::error::{CommandFailure, CommandFamily, FailureReason, SubmitError};
pub use core::events::DeviceEvent;
pub use core::info::{DeviceInfo, DeviceState, FirmwareVersion, OperationalMode};
pub use core::settings::DeviceSettings;
pub use core::status::IoStatus;
pub use hid::{CronusDevice, MockAppliance, MockTransport};
