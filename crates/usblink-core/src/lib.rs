//! Core of the host-side USB link transport.
//!
//! This crate owns the descriptor model, endpoint classification, device discovery and the
//! packetised transfer engine. The USB access library itself sits behind the
//! [`UsbBackend`] family of traits so the same logic runs against real hardware and the
//! in-memory [`mock`] backend.

pub mod backend;
pub mod descriptor;
pub mod device;
pub mod discovery;
pub mod endpoint;
pub mod engine;
mod error;
pub mod handle;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod path;
pub mod session;

pub use backend::{UsbBackend, UsbDevice, UsbDeviceHandle};
pub use descriptor::{
    ConfigurationDescriptor, DeviceDescriptor, Direction, EndpointDescriptor, Interface,
    InterfaceDescriptor, StringTable, TransferType, parse_configuration,
};
pub use device::{Device, DeviceFilter, DeviceList};
pub use discovery::{CandidatePolicy, EmptyStringPolicy};
pub use endpoint::{Endpoint, load_endpoint_list};
pub use error::{PacketError, PacketResult, UsbError, UsbErrorKind, UsbResult};
pub use handle::{DEFAULT_TIMEOUT, DeviceHandle};
pub use path::{LinkPath, PathFormatError, build_path, parse_path};
pub use session::Session;
