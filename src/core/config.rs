//! Configuration management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// USB identity of one device personality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// HID Usage Page
    pub usage_page: u16,
    /// HID Usage ID
    pub usage: u16,
}

/// HID device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HidConfig {
    /// Runtime personality
    #[serde(default = "default_normal_identity")]
    pub normal: DeviceIdentity,
    /// Firmware-update personality
    #[serde(default = "default_bootloader_identity")]
    pub bootloader: DeviceIdentity,
}

fn default_normal_identity() -> DeviceIdentity {
    DeviceIdentity {
        vendor_id: 0x2008,
        product_id: 0x0001,
        usage_page: 0xFFAB,
        usage: 0x0200,
    }
}

fn default_bootloader_identity() -> DeviceIdentity {
    DeviceIdentity {
        vendor_id: 0x2508,
        product_id: 0x8001,
        usage_page: 0xFF9C,
        usage: 0x001C,
    }
}

impl Default for HidConfig {
    fn default() -> Self {
        Self {
            normal: default_normal_identity(),
            bootloader: default_bootloader_identity(),
        }
    }
}

/// Engine timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-read timeout in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// Presence poll cadence in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Minimum spacing between primary API frames in microseconds
    #[serde(default = "default_api_frame_interval")]
    pub api_frame_interval_us: u64,
    /// Pause between the two input flushes after leaving API mode
    #[serde(default = "default_exit_settle")]
    pub exit_settle_ms: u64,
}

fn default_read_timeout() -> u64 {
    1000
}
fn default_poll_interval() -> u64 {
    100
}
fn default_api_frame_interval() -> u64 {
    1220
}
fn default_exit_settle() -> u64 {
    50
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_read_timeout(),
            poll_interval_ms: default_poll_interval(),
            api_frame_interval_us: default_api_frame_interval(),
            exit_settle_ms: default_exit_settle(),
        }
    }
}

impl EngineConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn api_frame_interval(&self) -> Duration {
        Duration::from_micros(self.api_frame_interval_us)
    }

    pub fn exit_settle(&self) -> Duration {
        Duration::from_millis(self.exit_settle_ms)
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HID device configuration
    #[serde(default)]
    pub hid: HidConfig,
    /// Engine timing
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a file, falling back to defaults when absent
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to a file
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create parent directories if needed
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "cronuslink", "CronusLink")
            .context("Failed to determine config directory")?;
        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Get the default configuration embedded in the binary
    pub fn default_config_str() -> &'static str {
        include_str!("../../config/default.toml")
    }
}
