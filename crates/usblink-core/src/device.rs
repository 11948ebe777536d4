use crate::{
    UsbErrorKind, UsbResult,
    backend::{UsbDevice, UsbDeviceHandle},
    descriptor::{ConfigurationDescriptor, DeviceDescriptor, StringTable},
    handle::DeviceHandle,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Coarse enumeration filter. A zero field means "don't care".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    pub vendor_id: u16,
    pub product_id: u16,
    pub class: u8,
    pub sub_class: u8,
}

impl DeviceFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_vendor_id(mut self, vendor_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self
    }

    pub fn with_product_id(mut self, product_id: u16) -> Self {
        self.product_id = product_id;
        self
    }

    pub fn with_class(mut self, class: u8) -> Self {
        self.class = class;
        self
    }

    pub fn with_sub_class(mut self, sub_class: u8) -> Self {
        self.sub_class = sub_class;
        self
    }

    pub fn is_all(&self) -> bool {
        *self == Self::all()
    }

    /// Check each constrained field in turn, stopping at the first mismatch.
    pub fn matches(&self, descriptor: &DeviceDescriptor) -> bool {
        if self.vendor_id != 0 && descriptor.vendor_id != self.vendor_id {
            return false;
        }
        if self.product_id != 0 && descriptor.product_id != self.product_id {
            return false;
        }
        if self.class != 0 && descriptor.class_code != self.class {
            return false;
        }
        self.sub_class == 0 || descriptor.sub_class_code == self.sub_class
    }
}

/// An enumerated device plus the string table read from it at construction.
#[derive(Clone, Debug)]
pub struct Device<D> {
    native: D,
    strings: Arc<StringTable>,
}

impl<D: UsbDevice> Device<D> {
    /// Wrap `native`, opening it transiently to fetch its string descriptors.
    ///
    /// A device that cannot be opened (permissions, driver ownership) gets an empty table.
    pub fn new(native: D) -> Self {
        let strings = match native.open() {
            Ok(handle) => StringTable::fetch(|index| handle.read_string_ascii(index)),
            Err(err) => {
                debug!(
                    bus = native.bus_number(),
                    address = native.address(),
                    %err,
                    "device not readable; skipping string descriptors"
                );
                StringTable::default()
            }
        };
        Self::with_strings(native, strings)
    }

    pub fn with_strings(native: D, strings: StringTable) -> Self {
        Self {
            native,
            strings: Arc::new(strings),
        }
    }

    pub fn native(&self) -> &D {
        &self.native
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    pub fn device_descriptor(&self) -> UsbResult<DeviceDescriptor> {
        self.native.device_descriptor()
    }

    /// Serial number string, or an empty string when the device reports none.
    pub fn serial_number(&self) -> UsbResult<String> {
        let desc = self.device_descriptor()?;
        Ok(desc.serial_number_string(&self.strings).to_string())
    }

    /// Fetch the active configuration. Every call reads a fresh copy from the access library.
    pub fn active_configuration(&self) -> UsbResult<ConfigurationDescriptor> {
        self.native.active_config_descriptor()
    }

    pub fn configuration(&self, index: u8) -> UsbResult<ConfigurationDescriptor> {
        self.native.config_descriptor(index)
    }

    pub fn configurations(&self) -> UsbResult<Vec<ConfigurationDescriptor>> {
        let count = self.device_descriptor()?.num_configurations;
        (0..count).map(|index| self.configuration(index)).collect()
    }

    pub fn bus_number(&self) -> u8 {
        self.native.bus_number()
    }

    pub fn address(&self) -> u8 {
        self.native.address()
    }

    pub fn port_number(&self) -> u8 {
        self.native.port_number()
    }

    /// Port chain from the root hub; empty when the platform cannot report it.
    pub fn port_numbers(&self) -> Vec<u8> {
        self.native.port_numbers().unwrap_or_else(|err| {
            debug!(%err, "port numbers unavailable");
            Vec::new()
        })
    }

    /// Open the device, optionally select `configuration`, and claim `interface`.
    ///
    /// The endpoint table is loaded from the active configuration before the claim. Any
    /// failure closes the native handle before returning.
    pub fn open_handle(
        &self,
        configuration: Option<u8>,
        interface: u8,
    ) -> UsbResult<DeviceHandle<D::Handle>> {
        let mut native = self
            .native
            .open()
            .map_err(|err| err.reclassify(UsbErrorKind::Open, "open device"))?;
        if let Some(configuration) = configuration {
            native.set_active_configuration(configuration).map_err(|err| {
                err.reclassify(
                    UsbErrorKind::Open,
                    &format!("set configuration {configuration}"),
                )
            })?;
        }
        let config = self
            .active_configuration()
            .map_err(|err| err.reclassify(UsbErrorKind::Open, "read active configuration"))?;
        DeviceHandle::claim(native, &config, interface)
    }
}

/// Devices from one enumeration pass, in native order.
#[derive(Clone, Debug)]
pub struct DeviceList<D> {
    devices: Vec<Device<D>>,
}

impl<D> Default for DeviceList<D> {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
        }
    }
}

impl<D> From<Vec<Device<D>>> for DeviceList<D> {
    fn from(devices: Vec<Device<D>>) -> Self {
        Self { devices }
    }
}

impl<D> DeviceList<D> {
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Device<D>> {
        self.devices.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Device<D>> {
        self.devices.iter()
    }
}

impl<D: UsbDevice> DeviceList<D> {
    /// First device matching `vendor_id` and `product_id` and, when `serial_number` is
    /// non-empty, whose serial number string matches it exactly.
    pub fn find(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial_number: Option<&str>,
    ) -> Option<&Device<D>> {
        let serial_number = serial_number.filter(|serial| !serial.is_empty());
        self.devices.iter().find(|device| {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(err) => {
                    warn!(%err, "skipping device with unreadable descriptor");
                    return false;
                }
            };
            if desc.vendor_id != vendor_id || desc.product_id != product_id {
                return false;
            }
            match serial_number {
                Some(serial) => desc.serial_number_string(device.strings()) == serial,
                None => true,
            }
        })
    }
}

impl<'a, D> IntoIterator for &'a DeviceList<D> {
    type Item = &'a Device<D>;
    type IntoIter = std::slice::Iter<'a, Device<D>>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(vendor_id: u16, product_id: u16, class_code: u8) -> DeviceDescriptor {
        DeviceDescriptor {
            vendor_id,
            product_id,
            class_code,
            ..Default::default()
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = DeviceFilter::all();
        assert!(filter.is_all());
        assert!(filter.matches(&descriptor(0x1234, 0x5678, 0xFF)));
    }

    #[test]
    fn filter_checks_each_constrained_field() {
        let filter = DeviceFilter::all()
            .with_vendor_id(0x20A0)
            .with_product_id(0x41D5);
        assert!(!filter.is_all());
        assert!(filter.matches(&descriptor(0x20A0, 0x41D5, 0)));
        assert!(!filter.matches(&descriptor(0x20A0, 0x0001, 0)));
        assert!(!filter.matches(&descriptor(0x1234, 0x41D5, 0)));

        let class = DeviceFilter::all().with_class(0xEF).with_sub_class(0x02);
        assert!(!class.matches(&descriptor(1, 1, 0xEF)));
        assert!(class.matches(&DeviceDescriptor {
            class_code: 0xEF,
            sub_class_code: 0x02,
            ..Default::default()
        }));
    }
}
