//! Identification of link-capable devices and interfaces.

use crate::{
    backend::UsbDevice,
    descriptor::{InterfaceDescriptor, StringTable, contains_ignore_case},
    device::Device,
};

/// What a device with no readable string descriptors counts as.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EmptyStringPolicy {
    /// Treat the device as a candidate and let the interface check decide.
    #[default]
    Accept,
    Reject,
}

/// Markers identifying a link device and its link interface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidatePolicy {
    /// Substring searched case-insensitively in string descriptors.
    pub marker: String,
    pub interface_class: u8,
    pub interface_sub_class: u8,
    pub interface_protocol: u8,
    pub empty_strings: EmptyStringPolicy,
}

impl Default for CandidatePolicy {
    fn default() -> Self {
        Self {
            marker: "stratify".to_string(),
            interface_class: 0xFF,
            interface_sub_class: 0x50,
            interface_protocol: 0x51,
            empty_strings: EmptyStringPolicy::Accept,
        }
    }
}

impl CandidatePolicy {
    /// True if any of the device's strings contains the marker.
    ///
    /// A device without strings falls back to [`CandidatePolicy::empty_strings`].
    pub fn is_device_candidate<D: UsbDevice>(&self, device: &Device<D>) -> bool {
        self.strings_match(device.strings())
    }

    pub fn strings_match(&self, strings: &StringTable) -> bool {
        if strings.is_empty() {
            return self.empty_strings == EmptyStringPolicy::Accept;
        }
        strings.contains_ignore_case(&self.marker)
    }

    /// True if the interface carries the vendor class triple or its string contains the marker.
    pub fn is_interface_candidate(
        &self,
        interface: &InterfaceDescriptor,
        strings: &StringTable,
    ) -> bool {
        if interface.class_code == self.interface_class
            && interface.sub_class_code == self.interface_sub_class
            && interface.protocol_code == self.interface_protocol
        {
            return true;
        }
        contains_ignore_case(interface.interface_string(strings), &self.marker)
    }
}
