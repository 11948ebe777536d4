//! Read-only views over the descriptor records reported by the access library.
//!
//! Descriptors are plain owned data. Anything that resolves a string index takes the
//! owning device's [`StringTable`] explicitly, so a descriptor never borrows from the
//! device it came from and can be moved or cloned freely.

use crate::{UsbError, UsbErrorKind, UsbResult};
use byteorder::{ByteOrder, LittleEndian};
use tracing::trace;

const DESCRIPTOR_TYPE_CONFIGURATION: u8 = 0x02;
const DESCRIPTOR_TYPE_INTERFACE: u8 = 0x04;
const DESCRIPTOR_TYPE_ENDPOINT: u8 = 0x05;

const CONFIGURATION_LEN: usize = 9;
const INTERFACE_LEN: usize = 9;
const ENDPOINT_LEN: usize = 7;
const AUDIO_ENDPOINT_LEN: usize = 9;

const NULL_STRING: &str = "(null)";

/// USB transfer type encoded in bits 0-1 of an endpoint's attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
    /// Placeholder for an unclassified endpoint; never valid for transfers.
    None,
}

impl TransferType {
    pub fn from_attributes(attributes: u8) -> Self {
        match attributes & 0x03 {
            0 => TransferType::Control,
            1 => TransferType::Isochronous,
            2 => TransferType::Bulk,
            3 => TransferType::Interrupt,
            _ => TransferType::None,
        }
    }
}

/// Data direction of an endpoint, from the host's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
}

/// Indexed string descriptors fetched once per device.
///
/// Index 0 is reserved by USB for the language table, so a loaded table stores a
/// placeholder there and real strings start at index 1.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StringTable {
    entries: Vec<String>,
}

impl StringTable {
    /// Build a table from the strings at indices 1, 2, ... in order.
    pub fn new<I, S>(strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entries = vec![NULL_STRING.to_string()];
        entries.extend(strings.into_iter().map(Into::into));
        Self { entries }
    }

    /// Fetch strings in ascending index order until the first failed or empty read.
    pub fn fetch<F>(mut read: F) -> Self
    where
        F: FnMut(u8) -> UsbResult<String>,
    {
        let mut strings = Vec::with_capacity(16);
        for index in 1..=u8::MAX {
            match read(index) {
                Ok(value) if !value.is_empty() => strings.push(value),
                Ok(_) => break,
                Err(err) => {
                    trace!(index, %err, "string descriptor fetch stopped");
                    break;
                }
            }
        }
        Self::new(strings)
    }

    /// String at `index`; index 0 and indices past the end resolve to `None`.
    pub fn get(&self, index: u8) -> Option<&str> {
        if index == 0 {
            return None;
        }
        self.entries.get(index as usize).map(String::as_str)
    }

    /// Resolve `index`, yielding an empty string when it is unset or unknown.
    pub fn resolve(&self, index: u8) -> &str {
        self.get(index).unwrap_or("")
    }

    /// Real strings, skipping the index-0 placeholder.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().skip(1).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if any string contains `marker`, ignoring ASCII case.
    pub fn contains_ignore_case(&self, marker: &str) -> bool {
        self.iter().any(|entry| contains_ignore_case(entry, marker))
    }
}

pub(crate) fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack
        .to_ascii_lowercase()
        .contains(&needle.to_ascii_lowercase())
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// bcdUSB
    pub usb_version: u16,
    pub class_code: u8,
    pub sub_class_code: u8,
    pub protocol_code: u8,
    /// Maximum packet size of the default control endpoint.
    pub max_packet_size: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    /// bcdDevice
    pub device_version: u16,
    pub manufacturer_string_index: u8,
    pub product_string_index: u8,
    pub serial_number_string_index: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    pub fn manufacturer_string<'a>(&self, strings: &'a StringTable) -> &'a str {
        strings.resolve(self.manufacturer_string_index)
    }

    pub fn product_string<'a>(&self, strings: &'a StringTable) -> &'a str {
        strings.resolve(self.product_string_index)
    }

    pub fn serial_number_string<'a>(&self, strings: &'a StringTable) -> &'a str {
        strings.resolve(self.serial_number_string_index)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigurationDescriptor {
    pub total_length: u16,
    pub num_interfaces: u8,
    pub configuration_value: u8,
    pub configuration_string_index: u8,
    pub attributes: u8,
    /// Raw bMaxPower, in 2 mA units.
    pub max_power: u8,
    pub extra: Vec<u8>,
    pub interfaces: Vec<Interface>,
}

impl ConfigurationDescriptor {
    pub fn configuration_string<'a>(&self, strings: &'a StringTable) -> &'a str {
        strings.resolve(self.configuration_string_index)
    }

    pub fn self_powered(&self) -> bool {
        self.attributes & 0x40 != 0
    }

    pub fn remote_wakeup(&self) -> bool {
        self.attributes & 0x20 != 0
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.iter()
    }
}

/// All alternate settings sharing one interface number.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Interface {
    pub alternate_settings: Vec<InterfaceDescriptor>,
}

impl Interface {
    /// Interface number shared by the alternate settings, if any are present.
    pub fn number(&self) -> Option<u8> {
        self.alternate_settings.first().map(|desc| desc.interface_number)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &InterfaceDescriptor> {
        self.alternate_settings.iter()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub class_code: u8,
    pub sub_class_code: u8,
    pub protocol_code: u8,
    pub interface_string_index: u8,
    pub extra: Vec<u8>,
    pub endpoints: Vec<EndpointDescriptor>,
}

impl InterfaceDescriptor {
    pub fn num_endpoints(&self) -> usize {
        self.endpoints.len()
    }

    pub fn interface_string<'a>(&self, strings: &'a StringTable) -> &'a str {
        strings.resolve(self.interface_string_index)
    }

    pub fn endpoint_descriptors(&self) -> impl Iterator<Item = &EndpointDescriptor> {
        self.endpoints.iter()
    }

    /// True if the setting owns at least one bulk IN and one bulk OUT endpoint.
    pub fn has_bulk_pair(&self) -> bool {
        let bulk = |direction: Direction| {
            self.endpoints
                .iter()
                .any(|ep| ep.transfer_type() == TransferType::Bulk && ep.direction() == direction)
        };
        bulk(Direction::In) && bulk(Direction::Out)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Raw bEndpointAddress, direction bit included.
    pub address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
    /// Isochronous audio endpoints only.
    pub refresh: u8,
    /// Isochronous audio endpoints only.
    pub synch_address: u8,
    pub extra: Vec<u8>,
}

impl EndpointDescriptor {
    pub fn number(&self) -> u8 {
        self.address & 0x0F
    }

    pub fn direction(&self) -> Direction {
        if self.address & 0x80 == 0 {
            Direction::Out
        } else {
            Direction::In
        }
    }

    pub fn transfer_type(&self) -> TransferType {
        TransferType::from_attributes(self.attributes)
    }
}

/// Parse a raw configuration descriptor blob as returned by GET_DESCRIPTOR.
///
/// Alternate settings are grouped by interface number in order of first appearance.
/// Class-specific records are kept as `extra` bytes on the record that precedes them.
pub fn parse_configuration(bytes: &[u8]) -> UsbResult<ConfigurationDescriptor> {
    let header = record(bytes, 0)?;
    if header.len() < CONFIGURATION_LEN || header[1] != DESCRIPTOR_TYPE_CONFIGURATION {
        return Err(bad_descriptor("blob does not start with a configuration record"));
    }
    let mut config = ConfigurationDescriptor {
        total_length: LittleEndian::read_u16(&header[2..4]),
        num_interfaces: header[4],
        configuration_value: header[5],
        configuration_string_index: header[6],
        attributes: header[7],
        max_power: header[8],
        extra: Vec::new(),
        interfaces: Vec::new(),
    };

    let end = (config.total_length as usize).min(bytes.len());
    let mut offset = header.len();
    while offset < end {
        let rec = record(&bytes[..end], offset)?;
        offset += rec.len();
        match rec[1] {
            DESCRIPTOR_TYPE_INTERFACE if rec.len() >= INTERFACE_LEN => {
                let desc = InterfaceDescriptor {
                    interface_number: rec[2],
                    alternate_setting: rec[3],
                    class_code: rec[5],
                    sub_class_code: rec[6],
                    protocol_code: rec[7],
                    interface_string_index: rec[8],
                    extra: Vec::new(),
                    endpoints: Vec::with_capacity(rec[4] as usize),
                };
                match config
                    .interfaces
                    .iter_mut()
                    .find(|iface| iface.number() == Some(desc.interface_number))
                {
                    Some(iface) => iface.alternate_settings.push(desc),
                    None => config.interfaces.push(Interface {
                        alternate_settings: vec![desc],
                    }),
                }
            }
            DESCRIPTOR_TYPE_ENDPOINT if rec.len() >= ENDPOINT_LEN => {
                let (refresh, synch_address) = if rec.len() >= AUDIO_ENDPOINT_LEN {
                    (rec[7], rec[8])
                } else {
                    (0, 0)
                };
                let ep = EndpointDescriptor {
                    address: rec[2],
                    attributes: rec[3],
                    max_packet_size: LittleEndian::read_u16(&rec[4..6]),
                    interval: rec[6],
                    refresh,
                    synch_address,
                    extra: Vec::new(),
                };
                last_setting(&mut config)
                    .ok_or_else(|| bad_descriptor("endpoint record before any interface"))?
                    .endpoints
                    .push(ep);
            }
            _ => append_extra(&mut config, rec),
        }
    }
    Ok(config)
}

fn record(bytes: &[u8], offset: usize) -> UsbResult<&[u8]> {
    let len = *bytes
        .get(offset)
        .ok_or_else(|| bad_descriptor(format!("truncated record at offset {offset}")))?
        as usize;
    if len < 2 || offset + len > bytes.len() {
        return Err(bad_descriptor(format!(
            "invalid record length {len} at offset {offset}"
        )));
    }
    Ok(&bytes[offset..offset + len])
}

fn last_setting(config: &mut ConfigurationDescriptor) -> Option<&mut InterfaceDescriptor> {
    config
        .interfaces
        .last_mut()
        .and_then(|iface| iface.alternate_settings.last_mut())
}

fn append_extra(config: &mut ConfigurationDescriptor, rec: &[u8]) {
    match last_setting(config) {
        Some(setting) => match setting.endpoints.last_mut() {
            Some(ep) => ep.extra.extend_from_slice(rec),
            None => setting.extra.extend_from_slice(rec),
        },
        None => config.extra.extend_from_slice(rec),
    }
}

fn bad_descriptor(message: impl Into<String>) -> UsbError {
    UsbError::with_message(UsbErrorKind::Discovery, message)
}
