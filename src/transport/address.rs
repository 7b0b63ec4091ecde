use log::trace;

use crate::config::{
    masked_value, AddressField, CanAddressing, IsoTpConfig, MappedAddresses, PduAddressing,
};
use crate::link::can::id_mask;
use crate::link::{LinkFrame, LinkType};
use crate::types::AddressPair;

/// Addresses found for one frame and the number of prefix bytes they occupy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub addresses: AddressPair,
    pub prefix_len: usize,
}

impl Resolution {
    fn unresolved(prefix_len: usize) -> Self {
        Self {
            addresses: AddressPair::none(),
            prefix_len,
        }
    }
}

/// How the addresses of a frame are encoded, selected by link type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressScheme {
    /// Normal addressing: nothing in the payload
    Normal,
    /// One address byte in front of the PCI
    Extended,
    /// Addresses carried in the bits of a CAN identifier
    CanIdMapping { extended: bool, can_id: u32 },
    /// Source then target field of `width` bytes each (FlexRay, I-PduM)
    SourceTarget { width: usize },
    /// Per-PDU table entry (PDU-Transport)
    PduTransport(PduAddressing),
}

impl AddressScheme {
    pub fn for_frame(frame: &LinkFrame, config: &IsoTpConfig) -> Self {
        match frame.link_type {
            LinkType::FlexRay => AddressScheme::SourceTarget {
                width: config.flexray_addressing.bytes(),
            },
            LinkType::Ipdum if config.ipdum_addressing.bytes() > 0 => {
                AddressScheme::SourceTarget {
                    width: config.ipdum_addressing.bytes(),
                }
            }
            LinkType::PduTransport => AddressScheme::PduTransport(
                config
                    .find_pdu_transport(frame.id)
                    .map(|entry| entry.addressing)
                    .unwrap_or(PduAddressing::None),
            ),
            LinkType::Lin => AddressScheme::Extended,
            _ if config.addressing == CanAddressing::Extended => AddressScheme::Extended,
            LinkType::Can | LinkType::CanFd => AddressScheme::CanIdMapping {
                extended: frame.is_extended(),
                can_id: frame.id & id_mask(frame.is_extended()),
            },
            _ => AddressScheme::Normal,
        }
    }

    pub fn resolve(&self, data: &[u8], config: &IsoTpConfig) -> Resolution {
        match *self {
            AddressScheme::Normal => Resolution::unresolved(0),
            AddressScheme::Extended => match read_be(data, 0, 1) {
                Some(address) => Resolution {
                    addresses: AddressPair::single(address),
                    prefix_len: 1,
                },
                None => Resolution::unresolved(1),
            },
            AddressScheme::CanIdMapping { extended, can_id } => Resolution {
                addresses: resolve_can_id(config, extended, can_id),
                prefix_len: 0,
            },
            AddressScheme::SourceTarget { width } => {
                match (read_be(data, 0, width), read_be(data, width, width)) {
                    (Some(source), Some(target)) => Resolution {
                        addresses: AddressPair::pair(source, target),
                        prefix_len: 2 * width,
                    },
                    _ => Resolution::unresolved(2 * width),
                }
            }
            AddressScheme::PduTransport(addressing) => resolve_pdu(data, addressing),
        }
    }
}

/// Resolves the addresses of `frame` under `config`. Never fails: anything
/// that cannot be resolved yields validity 0 and sentinel addresses.
pub fn resolve(frame: &LinkFrame, config: &IsoTpConfig) -> Resolution {
    let scheme = AddressScheme::for_frame(frame, config);
    let resolution = scheme.resolve(&frame.data, config);
    trace!(
        "{} id {:#x}: {:?} -> {} (prefix {})",
        frame.link_type,
        frame.id,
        scheme,
        resolution.addresses,
        resolution.prefix_len
    );
    resolution
}

fn resolve_can_id(config: &IsoTpConfig, extended: bool, can_id: u32) -> AddressPair {
    match config.find_can_mapping(extended, can_id).map(|m| m.addresses) {
        Some(MappedAddresses::Ecu { mask }) => AddressPair::single(masked_value(can_id, mask)),
        Some(MappedAddresses::SourceTarget {
            source_mask,
            target_mask,
        }) => AddressPair::pair(
            masked_value(can_id, source_mask),
            masked_value(can_id, target_mask),
        ),
        None => AddressPair::none(),
    }
}

fn resolve_pdu(data: &[u8], addressing: PduAddressing) -> Resolution {
    match addressing {
        PduAddressing::None => Resolution::unresolved(0),
        PduAddressing::Single(field) => {
            let (address, used) = read_field(data, 0, field);
            match address {
                Some(address) => Resolution {
                    addresses: AddressPair::single(address),
                    prefix_len: used,
                },
                None => Resolution::unresolved(used),
            }
        }
        PduAddressing::Pair { source, target } => {
            let (source, source_len) = read_field(data, 0, source);
            let (target, target_len) = read_field(data, source_len, target);
            let prefix_len = source_len + target_len;
            match (source, target) {
                (Some(source), Some(target)) => Resolution {
                    addresses: AddressPair::pair(source, target),
                    prefix_len,
                },
                _ => Resolution::unresolved(prefix_len),
            }
        }
    }
}

fn read_field(data: &[u8], offset: usize, field: AddressField) -> (Option<u32>, usize) {
    match field {
        AddressField::Fixed(value) => (Some(value), 0),
        AddressField::Encoded(width) => {
            let width = width.bytes();
            (read_be(data, offset, width), width)
        }
    }
}

fn read_be(data: &[u8], offset: usize, width: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + width)?;
    Some(bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32))
}
