use crate::{
    UsbError, UsbErrorKind, UsbResult,
    backend::UsbDeviceHandle,
    descriptor::ConfigurationDescriptor,
    endpoint::{Endpoint, load_endpoint_list},
    engine::{self, ReadBuffer},
};
use std::time::Duration;
use tracing::{debug, warn};

/// Default per-transfer timeout for a freshly opened handle.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10);

/// An opened device with one claimed interface.
///
/// The interface stays claimed for the life of the handle. Dropping the handle releases
/// the interface and then closes the native connection, on every exit path.
#[derive(Debug)]
pub struct DeviceHandle<H: UsbDeviceHandle> {
    native: H,
    interface: u8,
    endpoints: Vec<Endpoint>,
    read_buffers: Vec<ReadBuffer>,
    timeout: Duration,
}

impl<H: UsbDeviceHandle> DeviceHandle<H> {
    /// Load the endpoint table for `interface` from `config`, then claim the interface.
    ///
    /// On failure `native` is dropped, closing the connection.
    pub fn claim(mut native: H, config: &ConfigurationDescriptor, interface: u8) -> UsbResult<Self> {
        let endpoints = load_endpoint_list(config, interface);
        native.claim_interface(interface).map_err(|err| {
            err.reclassify(UsbErrorKind::Open, &format!("claim interface {interface}"))
        })?;
        debug!(interface, endpoints = endpoints.len(), "interface claimed");
        Ok(Self {
            native,
            interface,
            endpoints,
            read_buffers: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn interface(&self) -> u8 {
        self.interface
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Endpoint with the given address, compared without the direction bit.
    pub fn find_endpoint(&self, address: u8) -> Option<&Endpoint> {
        self.endpoints.iter().find(|ep| ep.matches_address(address))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn native(&self) -> &H {
        &self.native
    }

    /// Read up to `buf.len()` bytes from the IN side of endpoint `address`.
    ///
    /// Returns fewer bytes, possibly zero, when the device has nothing more to send before
    /// the timeout. Leftover bytes of a partially consumed packet are kept for the next read.
    pub fn read(&mut self, address: u8, buf: &mut [u8]) -> UsbResult<usize> {
        let endpoint = self.endpoint_for(address)?;
        let index = match self
            .read_buffers
            .iter()
            .position(|buffer| buffer.address() == endpoint.address())
        {
            Some(index) => index,
            None => {
                self.read_buffers.push(ReadBuffer::new(endpoint.address()));
                self.read_buffers.len() - 1
            }
        };
        engine::read_buffered(
            &self.native,
            &endpoint,
            &mut self.read_buffers[index],
            buf,
            self.timeout,
        )
    }

    /// Write all of `buf` to the OUT side of endpoint `address`.
    pub fn write(&mut self, address: u8, buf: &[u8]) -> UsbResult<usize> {
        let endpoint = self.endpoint_for(address)?;
        engine::write_all(&self.native, &endpoint, buf, self.timeout)
    }

    /// Number of read-ahead bytes held for endpoint `address`.
    pub fn buffered(&self, address: u8) -> usize {
        self.read_buffers
            .iter()
            .find(|buffer| buffer.address() == address & 0x7F)
            .map_or(0, ReadBuffer::len)
    }

    /// Drop any read-ahead bytes held for endpoint `address`.
    pub fn discard_buffered(&mut self, address: u8) {
        if let Some(buffer) = self
            .read_buffers
            .iter_mut()
            .find(|buffer| buffer.address() == address & 0x7F)
        {
            buffer.clear();
        }
    }

    pub fn active_configuration(&self) -> UsbResult<u8> {
        self.native.active_configuration()
    }

    pub fn set_active_configuration(&mut self, configuration: u8) -> UsbResult<()> {
        self.native.set_active_configuration(configuration)
    }

    pub fn set_alternate_setting(&mut self, setting: u8) -> UsbResult<()> {
        self.native.set_alternate_setting(self.interface, setting)
    }

    pub fn clear_halt(&mut self, address: u8) -> UsbResult<()> {
        self.native.clear_halt(address)
    }

    pub fn reset(&mut self) -> UsbResult<()> {
        self.native.reset()
    }

    pub fn kernel_driver_active(&self, interface: u8) -> UsbResult<bool> {
        self.native.kernel_driver_active(interface)
    }

    pub fn detach_kernel_driver(&mut self, interface: u8) -> UsbResult<()> {
        self.native.detach_kernel_driver(interface)
    }

    pub fn attach_kernel_driver(&mut self, interface: u8) -> UsbResult<()> {
        self.native.attach_kernel_driver(interface)
    }

    pub fn set_auto_detach_kernel_driver(&mut self, enable: bool) -> UsbResult<()> {
        self.native.set_auto_detach_kernel_driver(enable)
    }

    fn endpoint_for(&self, address: u8) -> UsbResult<Endpoint> {
        self.find_endpoint(address).copied().ok_or_else(|| {
            UsbError::with_message(
                UsbErrorKind::UnsupportedTransferType,
                format!(
                    "endpoint 0x{:02x} is not part of interface {}",
                    address & 0x7F,
                    self.interface
                ),
            )
        })
    }
}

impl<H: UsbDeviceHandle> Drop for DeviceHandle<H> {
    fn drop(&mut self) {
        if let Err(err) = self.native.release_interface(self.interface) {
            warn!(interface = self.interface, %err, "failed to release interface");
        } else {
            debug!(interface = self.interface, "interface released");
        }
    }
}
