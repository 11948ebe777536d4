use crate::{
    UsbError, UsbErrorKind, UsbResult,
    backend::{UsbBackend, UsbDevice},
    device::{Device, DeviceFilter, DeviceList},
};
use tracing::{debug, warn};

/// Owns the access-library context and the most recent device enumeration.
///
/// Refreshing the list always releases the previous enumeration before requesting a new
/// one. Closing is idempotent and also happens on drop.
pub struct Session<B: UsbBackend> {
    devices: DeviceList<B::Device>,
    backend: Option<B>,
}

impl<B: UsbBackend> Session<B> {
    pub fn new(backend: B) -> Self {
        Self {
            devices: DeviceList::default(),
            backend: Some(backend),
        }
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend(&self) -> Option<&B> {
        self.backend.as_ref()
    }

    /// Devices from the last [`Session::refresh`], empty before the first one.
    pub fn device_list(&self) -> &DeviceList<B::Device> {
        &self.devices
    }

    /// Replace the cached enumeration with a fresh one narrowed by `filter`.
    pub fn refresh(&mut self, filter: &DeviceFilter) -> UsbResult<&DeviceList<B::Device>> {
        let backend = self.backend.as_ref().ok_or_else(|| {
            UsbError::with_message(UsbErrorKind::Discovery, "session is closed")
        })?;

        self.devices = DeviceList::default();
        let natives = backend
            .devices()
            .map_err(|err| err.reclassify(UsbErrorKind::Discovery, "enumerate devices"))?;

        let mut devices = Vec::with_capacity(natives.len());
        for native in natives {
            if !filter.is_all() {
                match native.device_descriptor() {
                    Ok(desc) if filter.matches(&desc) => {}
                    Ok(_) => continue,
                    Err(err) => {
                        warn!(
                            bus = native.bus_number(),
                            address = native.address(),
                            %err,
                            "skipping device with unreadable descriptor"
                        );
                        continue;
                    }
                }
            }
            devices.push(Device::new(native));
        }
        debug!(
            count = devices.len(),
            vendor_id = filter.vendor_id,
            product_id = filter.product_id,
            "device list refreshed"
        );
        self.devices = DeviceList::from(devices);
        Ok(&self.devices)
    }

    /// Release the cached enumeration and the context. Safe to call more than once.
    pub fn close(&mut self) {
        self.devices = DeviceList::default();
        if self.backend.take().is_some() {
            debug!("session closed");
        }
    }
}

impl<B: UsbBackend> Drop for Session<B> {
    fn drop(&mut self) {
        self.close();
    }
}
