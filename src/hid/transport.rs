//! Transport contract and the hidapi-backed implementation
//!
//! The engine only ever talks to a `Transport` through a `DeviceLink`, which
//! owns the single open connection and closes it deterministically whenever
//! the device goes away or the link is dropped.

use super::protocol::REPORT_SIZE;
use crate::core::config::{DeviceIdentity, HidConfig};
use hidapi::{HidApi, HidDevice};
use serde::{Deserialize, Serialize};
use std::ffi::CString;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Upper bound on reports discarded by a single flush
const MAX_FLUSH_REPORTS: usize = 256;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),
    #[error("invalid device path: {0}")]
    InvalidPath(String),
    #[error("device not found")]
    NotFound,
    #[error("device closed")]
    Closed,
    #[error("write rejected by device")]
    WriteRejected,
}

/// The two identities the appliance enumerates as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Personality {
    /// Runtime firmware
    Normal,
    /// Firmware-update mode
    Bootloader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFilter {
    Normal,
    Bootloader,
    Any,
}

impl DeviceFilter {
    pub fn matches(&self, personality: Personality) -> bool {
        match self {
            DeviceFilter::Normal => personality == Personality::Normal,
            DeviceFilter::Bootloader => personality == Personality::Bootloader,
            DeviceFilter::Any => true,
        }
    }
}

/// An enumerated endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    /// Platform path used to open the endpoint
    pub path: String,
    pub personality: Personality,
    pub product: Option<String>,
    pub serial: Option<String>,
}

/// An open, exclusive endpoint
pub trait Connection: Send {
    /// Read one report; `None` on timeout
    fn read(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Discard reports already waiting on the input side
    fn flush_input(&mut self) -> Result<(), TransportError>;

    fn close(self)
    where
        Self: Sized,
    {
        drop(self);
    }
}

/// Device discovery plus connection factory
pub trait Transport: Send {
    type Connection: Connection;

    fn discover(&mut self, filter: DeviceFilter) -> Result<Vec<DeviceHandle>, TransportError>;

    fn open(&mut self, handle: &DeviceHandle) -> Result<Self::Connection, TransportError>;
}

/// A transport plus at most one open connection
pub struct DeviceLink<T: Transport> {
    transport: T,
    current: Option<(DeviceHandle, T::Connection)>,
}

impl<T: Transport> DeviceLink<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            current: None,
        }
    }

    /// Re-enumerate and reconcile the open connection with what is attached.
    ///
    /// A connection whose endpoint is still listed is kept; otherwise it is
    /// closed and the first matching endpoint is opened. Returns the
    /// personality now connected, if any.
    pub fn refresh(&mut self, filter: DeviceFilter) -> Option<Personality> {
        let handles = match self.transport.discover(filter) {
            Ok(handles) => handles,
            Err(e) => {
                warn!("Device discovery failed: {}", e);
                return self.personality();
            }
        };

        if let Some((ref current, _)) = self.current {
            if handles.iter().any(|h| h.path == current.path) {
                return Some(current.personality);
            }
            info!("Device {} no longer present", current.path);
            self.close();
        }

        let handle = handles.into_iter().next()?;
        match self.transport.open(&handle) {
            Ok(conn) => {
                info!(
                    "Opened {:?} device: {}",
                    handle.personality,
                    handle.product.as_deref().unwrap_or("Unknown")
                );
                let personality = handle.personality;
                self.current = Some((handle, conn));
                Some(personality)
            }
            Err(e) => {
                debug!("Failed to open device {}: {}", handle.path, e);
                None
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.current.is_some()
    }

    pub fn personality(&self) -> Option<Personality> {
        self.current.as_ref().map(|(handle, _)| handle.personality)
    }

    pub fn handle(&self) -> Option<&DeviceHandle> {
        self.current.as_ref().map(|(handle, _)| handle)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let (_, conn) = self.current.as_mut().ok_or(TransportError::Closed)?;
        conn.write(data)
    }

    pub fn read(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let (_, conn) = self.current.as_mut().ok_or(TransportError::Closed)?;
        conn.read(timeout)
    }

    pub fn flush_input(&mut self) -> Result<(), TransportError> {
        let (_, conn) = self.current.as_mut().ok_or(TransportError::Closed)?;
        conn.flush_input()
    }

    /// Close the open connection, if any
    pub fn close(&mut self) {
        if let Some((handle, conn)) = self.current.take() {
            conn.close();
            debug!("Closed device {}", handle.path);
        }
    }
}

impl<T: Transport> Drop for DeviceLink<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Transport over the system HID stack
pub struct HidApiTransport {
    api: HidApi,
    config: HidConfig,
}

impl HidApiTransport {
    pub fn new(config: HidConfig) -> Result<Self, TransportError> {
        let api = HidApi::new()?;
        Ok(Self { api, config })
    }

    fn classify(&self, info: &hidapi::DeviceInfo) -> Option<Personality> {
        let matches = |id: &DeviceIdentity| {
            info.vendor_id() == id.vendor_id
                && info.product_id() == id.product_id
                && info.usage_page() == id.usage_page
                && info.usage() == id.usage
        };
        if matches(&self.config.normal) {
            Some(Personality::Normal)
        } else if matches(&self.config.bootloader) {
            Some(Personality::Bootloader)
        } else {
            None
        }
    }
}

impl Transport for HidApiTransport {
    type Connection = HidConnection;

    fn discover(&mut self, filter: DeviceFilter) -> Result<Vec<DeviceHandle>, TransportError> {
        self.api.refresh_devices()?;

        let handles = self
            .api
            .device_list()
            .filter_map(|info| {
                let personality = self.classify(info)?;
                if !filter.matches(personality) {
                    return None;
                }
                Some(DeviceHandle {
                    path: info.path().to_string_lossy().into_owned(),
                    personality,
                    product: info.product_string().map(str::to_string),
                    serial: info.serial_number().map(str::to_string),
                })
            })
            .collect();
        Ok(handles)
    }

    fn open(&mut self, handle: &DeviceHandle) -> Result<HidConnection, TransportError> {
        let path = CString::new(handle.path.clone())
            .map_err(|_| TransportError::InvalidPath(handle.path.clone()))?;
        let device = self.api.open_path(&path)?;
        device.set_blocking_mode(false)?;
        Ok(HidConnection { device })
    }
}

/// An open hidapi endpoint; closed when dropped
pub struct HidConnection {
    device: HidDevice,
}

impl Connection for HidConnection {
    fn read(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let mut buffer = [0u8; REPORT_SIZE];
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;
        match self.device.read_timeout(&mut buffer, timeout_ms)? {
            0 => Ok(None),
            n => Ok(Some(buffer[..n].to_vec())),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let written = self.device.write(data)?;
        debug!("Wrote {} bytes to HID device", written);
        Ok(written)
    }

    fn flush_input(&mut self) -> Result<(), TransportError> {
        let mut buffer = [0u8; REPORT_SIZE];
        for _ in 0..MAX_FLUSH_REPORTS {
            if self.device.read_timeout(&mut buffer, 0)? == 0 {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hid::mock::MockAppliance;

    #[test]
    fn test_filter_matches() {
        assert!(DeviceFilter::Normal.matches(Personality::Normal));
        assert!(!DeviceFilter::Normal.matches(Personality::Bootloader));
        assert!(DeviceFilter::Bootloader.matches(Personality::Bootloader));
        assert!(DeviceFilter::Any.matches(Personality::Normal));
        assert!(DeviceFilter::Any.matches(Personality::Bootloader));
    }

    #[test]
    fn test_link_opens_and_keeps_device() {
        let appliance = MockAppliance::new();
        let mut link = DeviceLink::new(appliance.transport());
        assert_eq!(link.refresh(DeviceFilter::Normal), None);
        assert!(!link.is_connected());

        appliance.plug(Personality::Normal);
        assert_eq!(link.refresh(DeviceFilter::Normal), Some(Personality::Normal));
        let path = link.handle().map(|h| h.path.clone());
        assert_eq!(link.refresh(DeviceFilter::Normal), Some(Personality::Normal));
        assert_eq!(link.handle().map(|h| h.path.clone()), path);
        assert_eq!(appliance.open_count(), 1);
    }

    #[test]
    fn test_link_closes_on_unplug() {
        let appliance = MockAppliance::new();
        appliance.plug(Personality::Normal);
        let mut link = DeviceLink::new(appliance.transport());
        link.refresh(DeviceFilter::Normal);

        appliance.unplug();
        assert_eq!(link.refresh(DeviceFilter::Normal), None);
        assert!(!link.is_connected());
        assert!(matches!(link.write(&[0u8; 65]), Err(TransportError::Closed)));
    }

    #[test]
    fn test_link_ignores_other_personality() {
        let appliance = MockAppliance::new();
        appliance.plug(Personality::Bootloader);
        let mut link = DeviceLink::new(appliance.transport());
        assert_eq!(link.refresh(DeviceFilter::Normal), None);
        assert_eq!(link.refresh(DeviceFilter::Any), Some(Personality::Bootloader));
    }

    #[test]
    fn test_link_reopens_after_replug() {
        let appliance = MockAppliance::new();
        appliance.plug(Personality::Normal);
        let mut link = DeviceLink::new(appliance.transport());
        link.refresh(DeviceFilter::Normal);
        let first = link.handle().map(|h| h.path.clone());

        appliance.unplug();
        appliance.plug(Personality::Normal);
        assert_eq!(link.refresh(DeviceFilter::Normal), Some(Personality::Normal));
        assert_ne!(link.handle().map(|h| h.path.clone()), first);
        assert_eq!(appliance.open_count(), 2);
    }
}
