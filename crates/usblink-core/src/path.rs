//! Canonical `/usb/VVVV/PPPP/II/SERIAL` device paths.

use crate::{UsbError, UsbErrorKind, UsbResult, backend::UsbDevice, device::Device};
use std::{fmt, str::FromStr};

const PATH_ROOT: &str = "usb";

/// Errors surfaced while parsing a device path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathFormatError {
    /// The path does not start with `/usb/`.
    InvalidPrefix,
    /// A required field is absent or empty.
    MissingField(&'static str),
    /// A numeric field is not exactly its fixed number of hex digits.
    InvalidField { field: &'static str, value: String },
}

impl fmt::Display for PathFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathFormatError::InvalidPrefix => write!(f, "path does not start with /{PATH_ROOT}/"),
            PathFormatError::MissingField(field) => write!(f, "missing {field}"),
            PathFormatError::InvalidField { field, value } => {
                write!(f, "invalid {field} {value:?}")
            }
        }
    }
}

impl std::error::Error for PathFormatError {}

impl From<PathFormatError> for UsbError {
    fn from(err: PathFormatError) -> Self {
        UsbError::with_message(UsbErrorKind::PathFormat, err.to_string())
    }
}

/// Structured identity of one interface on one device.
///
/// Paths compare field by field, so hex digit case in the textual form never matters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct LinkPath {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface_number: u8,
    pub serial_number: String,
}

impl LinkPath {
    pub fn new(
        vendor_id: u16,
        product_id: u16,
        interface_number: u8,
        serial_number: impl Into<String>,
    ) -> Self {
        Self {
            vendor_id,
            product_id,
            interface_number,
            serial_number: serial_number.into(),
        }
    }

    /// Path for `interface_number` on `device`, using its descriptor and serial string.
    pub fn for_device<D: UsbDevice>(device: &Device<D>, interface_number: u8) -> UsbResult<Self> {
        let desc = device.device_descriptor()?;
        Ok(Self::new(
            desc.vendor_id,
            desc.product_id,
            interface_number,
            desc.serial_number_string(device.strings()),
        ))
    }

    /// Serial number, or `None` when the path does not pin one.
    pub fn serial(&self) -> Option<&str> {
        Some(self.serial_number.as_str()).filter(|serial| !serial.is_empty())
    }
}

impl fmt::Display for LinkPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/{PATH_ROOT}/{:04X}/{:04X}/{:02X}/{}",
            self.vendor_id, self.product_id, self.interface_number, self.serial_number
        )
    }
}

impl FromStr for LinkPath {
    type Err = PathFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.splitn(6, '/');
        if fields.next() != Some("") || fields.next() != Some(PATH_ROOT) {
            return Err(PathFormatError::InvalidPrefix);
        }
        let vendor_id = hex_field(fields.next(), "vendor id", 4, u16::from_str_radix)?;
        let product_id = hex_field(fields.next(), "product id", 4, u16::from_str_radix)?;
        let interface_number = hex_field(fields.next(), "interface number", 2, u8::from_str_radix)?;
        let serial_number = fields.next().unwrap_or_default().to_string();
        Ok(Self {
            vendor_id,
            product_id,
            interface_number,
            serial_number,
        })
    }
}

fn hex_field<T, E>(
    field: Option<&str>,
    name: &'static str,
    digits: usize,
    parse: fn(&str, u32) -> Result<T, E>,
) -> Result<T, PathFormatError> {
    let value = field
        .filter(|value| !value.is_empty())
        .ok_or(PathFormatError::MissingField(name))?;
    let invalid = || PathFormatError::InvalidField {
        field: name,
        value: value.to_string(),
    };
    if value.len() != digits || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    parse(value, 16).map_err(|_| invalid())
}

/// Format the canonical path for a device interface.
pub fn build_path(
    vendor_id: u16,
    product_id: u16,
    interface_number: u8,
    serial_number: &str,
) -> String {
    LinkPath::new(vendor_id, product_id, interface_number, serial_number).to_string()
}

/// Parse a canonical path back into its four fields.
pub fn parse_path(path: &str) -> Result<LinkPath, PathFormatError> {
    path.parse()
}
