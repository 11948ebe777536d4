use crate::descriptor::{ConfigurationDescriptor, EndpointDescriptor, TransferType};

const DIRECTION_IN: u8 = 0x80;
const ADDRESS_MASK: u8 = 0x7F;

/// Transfer-facing view of an endpoint, independent of the descriptor it came from.
///
/// The stored address never carries the direction bit; the direction-specific address
/// is rebuilt with [`Endpoint::read_address`] or [`Endpoint::write_address`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Endpoint {
    transfer_type: TransferType,
    address: u8,
    interface: u8,
    max_packet_size: u16,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            transfer_type: TransferType::None,
            address: 0,
            interface: 0,
            max_packet_size: 0,
        }
    }
}

impl Endpoint {
    pub fn new(transfer_type: TransferType, address: u8, max_packet_size: u16) -> Self {
        Self {
            transfer_type,
            address: address & ADDRESS_MASK,
            interface: 0,
            max_packet_size,
        }
    }

    /// Classify `descriptor` as an endpoint of `interface`.
    pub fn classify(descriptor: &EndpointDescriptor, interface: u8) -> Self {
        Self::new(
            descriptor.transfer_type(),
            descriptor.address,
            descriptor.max_packet_size,
        )
        .with_interface(interface)
    }

    pub fn with_interface(mut self, interface: u8) -> Self {
        self.interface = interface;
        self
    }

    pub fn is_valid(&self) -> bool {
        self.transfer_type != TransferType::None
    }

    pub fn transfer_type(&self) -> TransferType {
        self.transfer_type
    }

    /// 7-bit endpoint address with the direction bit cleared.
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn read_address(&self) -> u8 {
        self.address | DIRECTION_IN
    }

    pub fn write_address(&self) -> u8 {
        self.address & ADDRESS_MASK
    }

    pub fn interface(&self) -> u8 {
        self.interface
    }

    pub fn max_packet_size(&self) -> u16 {
        self.max_packet_size
    }

    /// Endpoints match by 7-bit address only; direction is ignored.
    pub fn matches_address(&self, address: u8) -> bool {
        self.address == address & ADDRESS_MASK
    }
}

/// Collect the endpoints of every alternate setting of `interface` in `config`.
pub fn load_endpoint_list(config: &ConfigurationDescriptor, interface: u8) -> Vec<Endpoint> {
    config
        .interfaces()
        .flat_map(|iface| iface.descriptors())
        .filter(|setting| setting.interface_number == interface)
        .flat_map(|setting| {
            setting
                .endpoint_descriptors()
                .map(move |ep| Endpoint::classify(ep, setting.interface_number))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Interface, InterfaceDescriptor};

    fn endpoint(address: u8, attributes: u8, max_packet_size: u16) -> EndpointDescriptor {
        EndpointDescriptor {
            address,
            attributes,
            max_packet_size,
            ..Default::default()
        }
    }

    #[test]
    fn classify_strips_direction_bit() {
        for raw in 0..=u8::MAX {
            let ep = Endpoint::classify(&endpoint(raw, 0x02, 64), 0);
            assert_eq!(ep.address() & 0x80, 0);
            assert_eq!(ep.read_address(), ep.address() | 0x80);
            assert_eq!(ep.write_address(), ep.address() & 0x7F);
        }
    }

    #[test]
    fn transfer_type_ignores_upper_attribute_bits() {
        for upper in 0..64u8 {
            let base = upper << 2;
            assert_eq!(
                Endpoint::classify(&endpoint(0x81, base, 8), 0).transfer_type(),
                TransferType::Control
            );
            assert_eq!(
                Endpoint::classify(&endpoint(0x81, base | 1, 8), 0).transfer_type(),
                TransferType::Isochronous
            );
            assert_eq!(
                Endpoint::classify(&endpoint(0x81, base | 2, 8), 0).transfer_type(),
                TransferType::Bulk
            );
            assert_eq!(
                Endpoint::classify(&endpoint(0x81, base | 3, 8), 0).transfer_type(),
                TransferType::Interrupt
            );
        }
        assert_eq!(TransferType::from_attributes(0x22), TransferType::Bulk);
    }

    #[test]
    fn default_endpoint_is_invalid() {
        let ep = Endpoint::default();
        assert!(!ep.is_valid());
        assert_eq!(ep.transfer_type(), TransferType::None);
    }

    #[test]
    fn endpoints_match_without_direction() {
        let ep = Endpoint::classify(&endpoint(0x82, 0x02, 512), 1);
        assert!(ep.matches_address(0x02));
        assert!(ep.matches_address(0x82));
        assert!(!ep.matches_address(0x01));
        assert_eq!(ep.interface(), 1);
    }

    #[test]
    fn endpoint_list_collects_all_alternate_settings() {
        let setting = |interface_number, alternate_setting, endpoints| InterfaceDescriptor {
            interface_number,
            alternate_setting,
            endpoints,
            ..Default::default()
        };
        let config = ConfigurationDescriptor {
            interfaces: vec![
                Interface {
                    alternate_settings: vec![setting(0, 0, vec![endpoint(0x83, 0x03, 16)])],
                },
                Interface {
                    alternate_settings: vec![
                        setting(1, 0, vec![endpoint(0x81, 0x02, 64)]),
                        setting(1, 1, vec![endpoint(0x02, 0x02, 64)]),
                    ],
                },
            ],
            ..Default::default()
        };

        let list = load_endpoint_list(&config, 1);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].address(), 0x01);
        assert_eq!(list[1].address(), 0x02);
        assert!(list.iter().all(|ep| ep.interface() == 1));
        assert!(load_endpoint_list(&config, 7).is_empty());
    }
}
