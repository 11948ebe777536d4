use crate::{
    PacketResult, UsbResult,
    descriptor::{ConfigurationDescriptor, DeviceDescriptor},
};
use std::time::Duration;

/// Abstracts the USB access library that owns the host context.
///
/// Every call to [`UsbBackend::devices`] produces a fresh enumeration snapshot. The
/// snapshot is released when the last device it produced is dropped.
pub trait UsbBackend {
    type Device: UsbDevice;

    /// Enumerate attached devices in native order.
    fn devices(&self) -> UsbResult<Vec<Self::Device>>;
}

/// Opaque reference to one enumerated device.
pub trait UsbDevice: Clone {
    type Handle: UsbDeviceHandle;

    fn device_descriptor(&self) -> UsbResult<DeviceDescriptor>;

    /// Fetch and convert the active configuration. The native copy is released before returning.
    fn active_config_descriptor(&self) -> UsbResult<ConfigurationDescriptor>;

    /// Fetch and convert the configuration at `index`. The native copy is released before returning.
    fn config_descriptor(&self, index: u8) -> UsbResult<ConfigurationDescriptor>;

    fn bus_number(&self) -> u8;

    fn address(&self) -> u8;

    fn port_number(&self) -> u8;

    fn port_numbers(&self) -> UsbResult<Vec<u8>>;

    fn open(&self) -> UsbResult<Self::Handle>;
}

/// Opened connection to a device. Dropping the handle closes it.
///
/// Packet primitives take the endpoint address with its direction bit and move at most
/// `buf.len()` bytes in one synchronous transfer.
pub trait UsbDeviceHandle {
    fn read_string_ascii(&self, index: u8) -> UsbResult<String>;

    fn active_configuration(&self) -> UsbResult<u8>;

    fn set_active_configuration(&mut self, configuration: u8) -> UsbResult<()>;

    fn claim_interface(&mut self, interface: u8) -> UsbResult<()>;

    fn release_interface(&mut self, interface: u8) -> UsbResult<()>;

    fn set_alternate_setting(&mut self, interface: u8, setting: u8) -> UsbResult<()>;

    fn clear_halt(&mut self, endpoint: u8) -> UsbResult<()>;

    fn reset(&mut self) -> UsbResult<()>;

    fn kernel_driver_active(&self, interface: u8) -> UsbResult<bool>;

    fn detach_kernel_driver(&mut self, interface: u8) -> UsbResult<()>;

    fn attach_kernel_driver(&mut self, interface: u8) -> UsbResult<()>;

    fn set_auto_detach_kernel_driver(&mut self, enable: bool) -> UsbResult<()>;

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> PacketResult;

    fn write_bulk(&self, endpoint: u8, buf: &[u8], timeout: Duration) -> PacketResult;

    fn read_interrupt(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> PacketResult;

    fn write_interrupt(&self, endpoint: u8, buf: &[u8], timeout: Duration) -> PacketResult;
}
