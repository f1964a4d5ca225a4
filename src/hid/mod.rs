//! HID module - wire protocol, transport and the command engine

pub mod commands;
pub mod device;
pub mod gate;
pub mod mock;
pub mod output;
pub mod protocol;
pub mod queue;
pub mod transport;

pub use device::CronusDevice;
pub use mock::{MockAppliance, MockTransport};
pub use output::{ApiPayload, CmCommand, CmCommandEx, RumbleMotor};
pub use protocol::{CommandCode, OutFrame, Response};
pub use transport::{
    Connection, DeviceFilter, DeviceHandle, DeviceLink, HidApiTransport, Personality, Transport,
    TransportError,
};
