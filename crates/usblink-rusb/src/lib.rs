//! [`UsbBackend`] implementation on top of libusb through `rusb`.

use rusb::{Context, SyncType, TransferType, UsageType, UsbContext, Version};
use std::time::Duration;
use tracing::{debug, trace};
use usblink_core::{
    ConfigurationDescriptor, DeviceDescriptor, EndpointDescriptor, Interface,
    InterfaceDescriptor, PacketError, PacketResult, Session, UsbBackend, UsbDevice,
    UsbDeviceHandle, UsbError, UsbErrorKind, UsbResult,
};

/// libusb context owning every enumeration made through it.
#[derive(Clone, Debug)]
pub struct RusbBackend {
    context: Context,
}

impl RusbBackend {
    pub fn new() -> UsbResult<Self> {
        let context = Context::new().map_err(|err| {
            map_rusb_error("create libusb context", UsbErrorKind::Discovery, err)
        })?;
        Ok(Self { context })
    }

    pub fn context(&self) -> &Context {
        &self.context
    }
}

/// Create a libusb context and wrap it in a [`Session`].
pub fn open_session() -> UsbResult<Session<RusbBackend>> {
    Ok(Session::new(RusbBackend::new()?))
}

impl UsbBackend for RusbBackend {
    type Device = RusbDevice;

    fn devices(&self) -> UsbResult<Vec<RusbDevice>> {
        let list = self
            .context
            .devices()
            .map_err(|err| map_rusb_error("list devices", UsbErrorKind::Discovery, err))?;
        trace!(count = list.len(), "rusb: enumerated devices");
        Ok(list.iter().map(RusbDevice).collect())
    }
}

/// Reference-counted libusb device.
#[derive(Clone, Debug)]
pub struct RusbDevice(rusb::Device<Context>);

impl RusbDevice {
    pub fn inner(&self) -> &rusb::Device<Context> {
        &self.0
    }
}

impl UsbDevice for RusbDevice {
    type Handle = RusbHandle;

    fn device_descriptor(&self) -> UsbResult<DeviceDescriptor> {
        let desc = self
            .0
            .device_descriptor()
            .map_err(|err| map_rusb_error("read device descriptor", UsbErrorKind::Discovery, err))?;
        Ok(DeviceDescriptor {
            usb_version: version_to_bcd(desc.usb_version()),
            class_code: desc.class_code(),
            sub_class_code: desc.sub_class_code(),
            protocol_code: desc.protocol_code(),
            max_packet_size: desc.max_packet_size(),
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
            device_version: version_to_bcd(desc.device_version()),
            manufacturer_string_index: desc.manufacturer_string_index().unwrap_or(0),
            product_string_index: desc.product_string_index().unwrap_or(0),
            serial_number_string_index: desc.serial_number_string_index().unwrap_or(0),
            num_configurations: desc.num_configurations(),
        })
    }

    fn active_config_descriptor(&self) -> UsbResult<ConfigurationDescriptor> {
        let config = self.0.active_config_descriptor().map_err(|err| {
            map_rusb_error("read active configuration", UsbErrorKind::Discovery, err)
        })?;
        Ok(convert_configuration(&config))
    }

    fn config_descriptor(&self, index: u8) -> UsbResult<ConfigurationDescriptor> {
        let config = self.0.config_descriptor(index).map_err(|err| {
            map_rusb_error(
                &format!("read configuration {index}"),
                UsbErrorKind::Discovery,
                err,
            )
        })?;
        Ok(convert_configuration(&config))
    }

    fn bus_number(&self) -> u8 {
        self.0.bus_number()
    }

    fn address(&self) -> u8 {
        self.0.address()
    }

    fn port_number(&self) -> u8 {
        self.0.port_number()
    }

    fn port_numbers(&self) -> UsbResult<Vec<u8>> {
        self.0
            .port_numbers()
            .map_err(|err| map_rusb_error("read port numbers", UsbErrorKind::Discovery, err))
    }

    fn open(&self) -> UsbResult<RusbHandle> {
        let handle = self
            .0
            .open()
            .map_err(|err| map_rusb_error("open device", UsbErrorKind::Open, err))?;
        if let Err(err) = handle.set_auto_detach_kernel_driver(true) {
            debug!(%err, "rusb: failed to enable kernel driver auto-detach; continuing");
        }
        Ok(RusbHandle(handle))
    }
}

/// Open libusb device handle. libusb closes it on drop.
#[derive(Debug)]
pub struct RusbHandle(rusb::DeviceHandle<Context>);

impl RusbHandle {
    pub fn inner(&self) -> &rusb::DeviceHandle<Context> {
        &self.0
    }
}

impl UsbDeviceHandle for RusbHandle {
    fn read_string_ascii(&self, index: u8) -> UsbResult<String> {
        self.0
            .read_string_descriptor_ascii(index)
            .map_err(|err| map_rusb_error("read string descriptor", UsbErrorKind::Transfer, err))
    }

    fn active_configuration(&self) -> UsbResult<u8> {
        self.0
            .active_configuration()
            .map_err(|err| map_rusb_error("read configuration", UsbErrorKind::Transfer, err))
    }

    fn set_active_configuration(&mut self, configuration: u8) -> UsbResult<()> {
        self.0
            .set_active_configuration(configuration)
            .map_err(|err| map_rusb_error("set configuration", UsbErrorKind::Open, err))
    }

    fn claim_interface(&mut self, interface: u8) -> UsbResult<()> {
        self.0
            .claim_interface(interface)
            .map_err(|err| map_rusb_error("claim usb interface", UsbErrorKind::Open, err))
    }

    fn release_interface(&mut self, interface: u8) -> UsbResult<()> {
        self.0
            .release_interface(interface)
            .map_err(|err| map_rusb_error("release usb interface", UsbErrorKind::Transfer, err))
    }

    fn set_alternate_setting(&mut self, interface: u8, setting: u8) -> UsbResult<()> {
        self.0
            .set_alternate_setting(interface, setting)
            .map_err(|err| map_rusb_error("set alternate setting", UsbErrorKind::Transfer, err))
    }

    fn clear_halt(&mut self, endpoint: u8) -> UsbResult<()> {
        self.0
            .clear_halt(endpoint)
            .map_err(|err| map_rusb_error("clear halt", UsbErrorKind::Transfer, err))
    }

    fn reset(&mut self) -> UsbResult<()> {
        self.0
            .reset()
            .map_err(|err| map_rusb_error("reset device", UsbErrorKind::Transfer, err))
    }

    fn kernel_driver_active(&self, interface: u8) -> UsbResult<bool> {
        self.0
            .kernel_driver_active(interface)
            .map_err(|err| map_rusb_error("query kernel driver", UsbErrorKind::Transfer, err))
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> UsbResult<()> {
        self.0
            .detach_kernel_driver(interface)
            .map_err(|err| map_rusb_error("detach kernel driver", UsbErrorKind::Open, err))
    }

    fn attach_kernel_driver(&mut self, interface: u8) -> UsbResult<()> {
        self.0
            .attach_kernel_driver(interface)
            .map_err(|err| map_rusb_error("attach kernel driver", UsbErrorKind::Transfer, err))
    }

    fn set_auto_detach_kernel_driver(&mut self, enable: bool) -> UsbResult<()> {
        self.0
            .set_auto_detach_kernel_driver(enable)
            .map_err(|err| map_rusb_error("set kernel driver auto-detach", UsbErrorKind::Open, err))
    }

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> PacketResult {
        self.0
            .read_bulk(endpoint, buf, timeout)
            .map_err(|err| packet_error("bulk-in", err))
    }

    fn write_bulk(&self, endpoint: u8, buf: &[u8], timeout: Duration) -> PacketResult {
        self.0
            .write_bulk(endpoint, buf, timeout)
            .map_err(|err| packet_error("bulk-out", err))
    }

    fn read_interrupt(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> PacketResult {
        self.0
            .read_interrupt(endpoint, buf, timeout)
            .map_err(|err| packet_error("interrupt-in", err))
    }

    fn write_interrupt(&self, endpoint: u8, buf: &[u8], timeout: Duration) -> PacketResult {
        self.0
            .write_interrupt(endpoint, buf, timeout)
            .map_err(|err| packet_error("interrupt-out", err))
    }
}

// rusb returns `Ok(transferred)` for a timeout that moved data; only empty timeouts land here.
fn packet_error(op: &str, err: rusb::Error) -> PacketError {
    match err {
        rusb::Error::Timeout => PacketError::Timeout { transferred: 0 },
        err => PacketError::Failed(map_rusb_error(op, UsbErrorKind::Transfer, err)),
    }
}

/// Translate a libusb error, using `fallback` for failures that only have meaning in context.
fn map_rusb_error(op: &str, fallback: UsbErrorKind, err: rusb::Error) -> UsbError {
    let kind = match err {
        rusb::Error::Timeout => UsbErrorKind::Timeout,
        rusb::Error::NoDevice => UsbErrorKind::Disconnected,
        rusb::Error::NotFound => UsbErrorKind::NotFound,
        rusb::Error::Pipe | rusb::Error::Overflow | rusb::Error::Io => UsbErrorKind::Transfer,
        _ => fallback,
    };
    UsbError::with_message(kind, format!("{op}: {err}"))
}

fn version_to_bcd(version: Version) -> u16 {
    let major = u16::from(version.major());
    ((major / 10) << 12)
        | ((major % 10) << 8)
        | (u16::from(version.minor() & 0x0F) << 4)
        | u16::from(version.sub_minor() & 0x0F)
}

fn convert_configuration(config: &rusb::ConfigDescriptor) -> ConfigurationDescriptor {
    let mut attributes = 0x80;
    if config.self_powered() {
        attributes |= 0x40;
    }
    if config.remote_wakeup() {
        attributes |= 0x20;
    }

    let interfaces = config
        .interfaces()
        .map(|iface| Interface {
            alternate_settings: iface.descriptors().map(|desc| convert_interface(&desc)).collect(),
        })
        .collect();

    ConfigurationDescriptor {
        total_length: config.total_length(),
        num_interfaces: config.num_interfaces(),
        configuration_value: config.number(),
        configuration_string_index: config.description_string_index().unwrap_or(0),
        attributes,
        max_power: (config.max_power() / 2).min(u16::from(u8::MAX)) as u8,
        extra: config.extra().to_vec(),
        interfaces,
    }
}

fn convert_interface(desc: &rusb::InterfaceDescriptor<'_>) -> InterfaceDescriptor {
    InterfaceDescriptor {
        interface_number: desc.interface_number(),
        alternate_setting: desc.setting_number(),
        class_code: desc.class_code(),
        sub_class_code: desc.sub_class_code(),
        protocol_code: desc.protocol_code(),
        interface_string_index: desc.description_string_index().unwrap_or(0),
        extra: desc.extra().to_vec(),
        endpoints: desc
            .endpoint_descriptors()
            .map(|ep| EndpointDescriptor {
                address: ep.address(),
                attributes: endpoint_attributes(ep.transfer_type(), ep.sync_type(), ep.usage_type()),
                max_packet_size: ep.max_packet_size(),
                interval: ep.interval(),
                refresh: ep.refresh(),
                synch_address: ep.synch_address(),
                extra: endpoint_extra(ep.extra()),
            })
            .collect(),
    }
}

// libusb leaves the endpoint trailer null when the device sends none.
fn endpoint_extra(extra: Option<&[u8]>) -> Vec<u8> {
    extra.map(<[u8]>::to_vec).unwrap_or_default()
}

/// Rebuild bmAttributes from the decoded fields rusb exposes.
fn endpoint_attributes(transfer: TransferType, sync: SyncType, usage: UsageType) -> u8 {
    let transfer = match transfer {
        TransferType::Control => 0,
        TransferType::Isochronous => 1,
        TransferType::Bulk => 2,
        TransferType::Interrupt => 3,
    };
    let sync = match sync {
        SyncType::NoSync => 0,
        SyncType::Asynchronous => 1,
        SyncType::Adaptive => 2,
        SyncType::Synchronous => 3,
    };
    let usage = match usage {
        UsageType::Data => 0,
        UsageType::Feedback => 1,
        UsageType::FeedbackData => 2,
        UsageType::Reserved => 3,
    };
    transfer | (sync << 2) | (usage << 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_convert_to_bcd() {
        assert_eq!(version_to_bcd(Version(2, 0, 0)), 0x0200);
        assert_eq!(version_to_bcd(Version(2, 1, 0)), 0x0210);
        assert_eq!(version_to_bcd(Version(1, 1, 0)), 0x0110);
        assert_eq!(version_to_bcd(Version(3, 2, 0)), 0x0320);
    }

    #[test]
    fn attributes_round_trip_through_core_classification() {
        let attributes =
            endpoint_attributes(TransferType::Isochronous, SyncType::Adaptive, UsageType::Feedback);
        assert_eq!(attributes, 0x19);
        assert_eq!(
            usblink_core::TransferType::from_attributes(attributes),
            usblink_core::TransferType::Isochronous
        );
        assert_eq!(
            endpoint_attributes(TransferType::Bulk, SyncType::NoSync, UsageType::Data),
            0x02
        );
    }

    #[test]
    fn endpoint_trailer_is_copied_when_present() {
        let audio_sync = [0x07, 0x25, 0x01, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(endpoint_extra(Some(&audio_sync)), audio_sync.to_vec());
        assert!(endpoint_extra(None).is_empty());
    }

    #[test]
    fn rusb_errors_map_to_link_kinds() {
        assert_eq!(
            map_rusb_error("x", UsbErrorKind::Open, rusb::Error::NoDevice).kind(),
            UsbErrorKind::Disconnected
        );
        assert_eq!(
            map_rusb_error("x", UsbErrorKind::Open, rusb::Error::Busy).kind(),
            UsbErrorKind::Open
        );
        assert_eq!(
            packet_error("bulk-in", rusb::Error::Timeout),
            PacketError::Timeout { transferred: 0 }
        );
        assert!(matches!(
            packet_error("bulk-in", rusb::Error::Pipe),
            PacketError::Failed(err) if err.kind() == UsbErrorKind::Transfer
        ));
    }
}
