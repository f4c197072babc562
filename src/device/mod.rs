#[cfg(feature = "desktop")]
pub mod commands;
pub mod link;
#[cfg(feature = "serial")]
pub mod serial;
pub mod state;

pub use link::{DeviceLink, SerialTransport};
#[cfg(feature = "serial")]
pub use serial::SerialPortTransport;
pub use state::{DeviceConnection, DeviceSnapshot, PortCatalog, PortDescriptor};
