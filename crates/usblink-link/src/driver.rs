use crate::LinkConfig;
use std::{thread, time::Duration};
use tracing::{debug, trace};
use usblink_core::{
    Device, DeviceFilter, DeviceHandle, LinkPath, Session, TransferType, UsbBackend, UsbDevice,
    UsbError, UsbErrorKind, UsbResult,
};

type NativeHandle<B> = <<B as UsbBackend>::Device as UsbDevice>::Handle;

/// An open link: a claimed interface and the bulk endpoint carrying the byte stream.
///
/// Dropping the driver (or calling [`LinkDriver::close`]) releases the interface and then
/// closes the device.
pub struct LinkDriver<B: UsbBackend> {
    handle: DeviceHandle<NativeHandle<B>>,
    path: LinkPath,
    endpoint: u8,
    flush_timeout: Duration,
}

impl<B: UsbBackend> LinkDriver<B> {
    /// Open the link named by `path`.
    ///
    /// The device is looked up in the session's current list first. A miss, or a failure
    /// to open the device found there, reloads the list once and tries again.
    pub fn open(session: &mut Session<B>, path: &str, config: &LinkConfig) -> UsbResult<Self> {
        let path: LinkPath = path.parse()?;
        let filter = DeviceFilter::all()
            .with_vendor_id(path.vendor_id)
            .with_product_id(path.product_id);

        let device = match find_cached(session, &path) {
            Some(device) => device,
            None => {
                debug!(%path, "link device not in cached list; reloading");
                reload_and_find(session, &filter, &path)?
            }
        };

        let mut handle = match device.open_handle(Some(config.configuration), path.interface_number)
        {
            Ok(handle) => handle,
            Err(err) => {
                drop(device);
                debug!(%path, %err, "link open failed; reloading device list");
                reload_and_find(session, &filter, &path)?
                    .open_handle(Some(config.configuration), path.interface_number)?
            }
        };
        handle.set_timeout(config.timeout);

        let endpoint = handle
            .endpoints()
            .iter()
            .filter(|ep| ep.transfer_type() == TransferType::Bulk)
            .last()
            .map(|ep| ep.address())
            .ok_or_else(|| {
                UsbError::with_message(
                    UsbErrorKind::NotFound,
                    format!("interface {} has no bulk endpoint", path.interface_number),
                )
            })?;

        debug!(
            %path,
            interface = path.interface_number,
            endpoint,
            timeout_ms = config.timeout.as_millis() as u64,
            "link opened"
        );
        Ok(Self {
            handle,
            path,
            endpoint,
            flush_timeout: config.flush_timeout,
        })
    }

    pub fn path(&self) -> &LinkPath {
        &self.path
    }

    /// 7-bit address of the bulk endpoint used in both directions.
    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }

    pub fn handle(&self) -> &DeviceHandle<NativeHandle<B>> {
        &self.handle
    }

    pub fn handle_mut(&mut self) -> &mut DeviceHandle<NativeHandle<B>> {
        &mut self.handle
    }

    /// Read up to `buf.len()` bytes. Zero means nothing arrived before the timeout.
    pub fn read(&mut self, buf: &mut [u8]) -> UsbResult<usize> {
        self.handle.read(self.endpoint, buf)
    }

    pub fn write(&mut self, buf: &[u8]) -> UsbResult<usize> {
        self.handle.write(self.endpoint, buf)
    }

    /// Discard pending input, one byte at a time, until the device goes quiet.
    ///
    /// Returns the number of bytes discarded. The handle timeout is restored afterwards.
    pub fn flush(&mut self) -> usize {
        let timeout = self.handle.timeout();
        self.handle.set_timeout(self.flush_timeout);

        let mut byte = [0u8; 1];
        let mut discarded = 0;
        loop {
            match self.handle.read(self.endpoint, &mut byte) {
                Ok(1) => discarded += 1,
                Ok(_) => break,
                Err(err) => {
                    trace!(%err, "flush stopped");
                    break;
                }
            }
        }

        self.handle.set_timeout(timeout);
        if discarded > 0 {
            debug!(path = %self.path, discarded, "flushed stale input");
        }
        discarded
    }

    /// Check that the device still answers. A vanished device reports `Disconnected`.
    pub fn status(&self) -> UsbResult<()> {
        self.handle
            .active_configuration()
            .map(|_| ())
            .map_err(|err| err.reclassify(UsbErrorKind::Transfer, "link status"))
    }

    /// Release the interface and close the device.
    pub fn close(self) {
        debug!(path = %self.path, "link closed");
    }
}

/// Sleep for `milliseconds`. Waits under 2 ms return immediately.
pub fn wait(milliseconds: u32) {
    if milliseconds < 2 {
        return;
    }
    thread::sleep(Duration::from_millis(u64::from(milliseconds)));
}

fn find_cached<B: UsbBackend>(session: &Session<B>, path: &LinkPath) -> Option<Device<B::Device>> {
    session
        .device_list()
        .find(path.vendor_id, path.product_id, path.serial())
        .cloned()
}

fn reload_and_find<B: UsbBackend>(
    session: &mut Session<B>,
    filter: &DeviceFilter,
    path: &LinkPath,
) -> UsbResult<Device<B::Device>> {
    session
        .refresh(filter)?
        .find(path.vendor_id, path.product_id, path.serial())
        .cloned()
        .ok_or_else(|| UsbError::with_message(UsbErrorKind::NotFound, format!("no device for {path}")))
}
