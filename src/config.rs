//! Analyzer configuration.
//!
//! The configuration mirrors the user-facing preferences of an ISO-TP
//! analyzer: addressing modes per link, allow-listed identifiers, the CAN id
//! mapping table and the PDU-Transport table. Tables are validated row by row
//! when they are built or deserialized, so an [`IsoTpConfig`] value that
//! exists is always internally consistent.
//!
//! ```rust
//! use libisotp::config::{ConfigStore, IsoTpConfig};
//!
//! let mut store = ConfigStore::default();
//! store
//!     .load_json(r#"{ "addressing": "extended", "can_ids": "0x7e0-0x7ef" }"#)
//!     .unwrap();
//! assert!(store.current().can_ids.contains(0x7E8));
//!
//! // A broken document leaves the previous configuration active
//! assert!(store.load_json(r#"{ "window": "eight" }"#).is_err());
//! assert!(store.current().can_ids.contains(0x7E8));
//! ```

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{IsoTpError, Result};
use crate::link::can::{id_mask, CAN_EFF_MASK, CAN_SFF_MASK};
use crate::link::LinkType;
use crate::types::{Config, ADDR_INVALID};

/// Default tolerance of the reassembly window, in fragments
pub const DEFAULT_WINDOW: u16 = 8;

/// Addressing of CAN and LIN payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanAddressing {
    /// No address byte in the payload
    #[default]
    Normal,
    /// One address byte precedes the PCI
    Extended,
}

/// Width of an address field carried in the payload prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AddressWidth {
    #[default]
    Zero,
    One,
    Two,
}

impl AddressWidth {
    pub fn bytes(&self) -> usize {
        match self {
            AddressWidth::Zero => 0,
            AddressWidth::One => 1,
            AddressWidth::Two => 2,
        }
    }
}

impl TryFrom<u8> for AddressWidth {
    type Error = IsoTpError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(AddressWidth::Zero),
            1 => Ok(AddressWidth::One),
            2 => Ok(AddressWidth::Two),
            other => Err(IsoTpError::Config(format!(
                "address size must be 0, 1 or 2 bytes, got {}",
                other
            ))),
        }
    }
}

impl From<AddressWidth> for u8 {
    fn from(width: AddressWidth) -> Self {
        width.bytes() as u8
    }
}

/// Inclusive identifier range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub start: u32,
    pub end: u32,
}

impl IdRange {
    pub fn contains(&self, id: u32) -> bool {
        id >= self.start && id <= self.end
    }
}

/// Set of identifier ranges written as `"0x7e0-0x7ef,0x7df"`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdRangeSet {
    ranges: Vec<IdRange>,
}

impl IdRangeSet {
    pub fn new(ranges: Vec<IdRange>) -> Self {
        Self { ranges }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.ranges.iter().any(|range| range.contains(id))
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[IdRange] {
        &self.ranges
    }

    /// Highest id mentioned by any range
    pub fn max_id(&self) -> Option<u32> {
        self.ranges.iter().map(|range| range.end).max()
    }
}

fn parse_id(text: &str) -> Option<u32> {
    let text = text.trim();
    match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

impl FromStr for IdRangeSet {
    type Err = IsoTpError;

    fn from_str(s: &str) -> Result<Self> {
        let mut ranges = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let bad = || IsoTpError::InvalidRange(part.to_string());
            let range = match part.split_once('-') {
                Some((start, end)) => IdRange {
                    start: parse_id(start).ok_or_else(bad)?,
                    end: parse_id(end).ok_or_else(bad)?,
                },
                None => {
                    let id = parse_id(part).ok_or_else(bad)?;
                    IdRange { start: id, end: id }
                }
            };
            if range.start > range.end {
                return Err(bad());
            }
            ranges.push(range);
        }
        Ok(Self { ranges })
    }
}

impl TryFrom<String> for IdRangeSet {
    type Error = IsoTpError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<IdRangeSet> for String {
    fn from(set: IdRangeSet) -> Self {
        set.to_string()
    }
}

impl fmt::Display for IdRangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if range.start == range.end {
                write!(f, "{:#x}", range.start)?;
            } else {
                write!(f, "{:#x}-{:#x}", range.start, range.end)?;
            }
        }
        Ok(())
    }
}

/// Value of the bits selected by `mask`, shifted down to bit 0
pub fn masked_value(value: u32, mask: u32) -> u32 {
    if mask == 0 {
        return 0;
    }
    (value & mask) >> mask.trailing_zeros()
}

/// One row of the CAN id mapping table as it is written by the user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanIdMappingRow {
    pub extended_address: bool,
    pub can_id: u32,
    pub can_id_mask: u32,
    pub source_addr_mask: u32,
    pub target_addr_mask: u32,
    pub ecu_addr_mask: u32,
}

/// Addresses a CAN id mapping extracts from the identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappedAddresses {
    Ecu { mask: u32 },
    SourceTarget { source_mask: u32, target_mask: u32 },
}

/// Validated CAN id mapping rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CanIdMappingRow", into = "CanIdMappingRow")]
pub struct CanIdMapping {
    pub extended: bool,
    pub can_id: u32,
    pub can_id_mask: u32,
    pub addresses: MappedAddresses,
}

impl CanIdMapping {
    pub fn matches(&self, extended: bool, can_id: u32) -> bool {
        self.extended == extended
            && (self.can_id & self.can_id_mask) == (can_id & self.can_id_mask)
    }
}

impl TryFrom<CanIdMappingRow> for CanIdMapping {
    type Error = IsoTpError;

    fn try_from(row: CanIdMappingRow) -> Result<Self> {
        let source = row.source_addr_mask;
        let target = row.target_addr_mask;
        let ecu = row.ecu_addr_mask;

        if source == 0 && target == 0 && ecu == 0 {
            return Err(IsoTpError::Config(
                "define the ECU address mask or the source/target address masks".into(),
            ));
        }
        if (source != 0 || target != 0) && ecu != 0 {
            return Err(IsoTpError::Config(
                "use either the source/target address masks or the ECU address mask, not both"
                    .into(),
            ));
        }
        if (source == 0 || target == 0) && ecu == 0 {
            return Err(IsoTpError::Config(
                "source and target address masks can only be used in combination".into(),
            ));
        }

        let (width, bits) = if row.extended_address {
            (id_mask(true), "extended ids (29bit)")
        } else {
            (id_mask(false), "standard ids (11bit)")
        };
        for (name, mask) in [("source", source), ("target", target), ("ECU", ecu)] {
            if mask & !width != 0 {
                return Err(IsoTpError::Config(format!(
                    "{} address mask {:#x} covers bits not allowed for {}",
                    name, mask, bits
                )));
            }
        }

        let addresses = if ecu != 0 {
            MappedAddresses::Ecu { mask: ecu }
        } else {
            MappedAddresses::SourceTarget {
                source_mask: source,
                target_mask: target,
            }
        };

        Ok(Self {
            extended: row.extended_address,
            can_id: row.can_id,
            can_id_mask: row.can_id_mask,
            addresses,
        })
    }
}

impl From<CanIdMapping> for CanIdMappingRow {
    fn from(mapping: CanIdMapping) -> Self {
        let mut row = CanIdMappingRow {
            extended_address: mapping.extended,
            can_id: mapping.can_id,
            can_id_mask: mapping.can_id_mask,
            ..Default::default()
        };
        match mapping.addresses {
            MappedAddresses::Ecu { mask } => row.ecu_addr_mask = mask,
            MappedAddresses::SourceTarget {
                source_mask,
                target_mask,
            } => {
                row.source_addr_mask = source_mask;
                row.target_addr_mask = target_mask;
            }
        }
        row
    }
}

/// One row of the PDU-Transport table as it is written by the user.
///
/// A size of 0 and a missing fixed value both mean "not configured";
/// a fixed value of `0xffffffff` is treated as missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PduTransportRow {
    pub pdu_id: u32,
    pub source_address_size: u8,
    pub source_address_fixed: Option<u32>,
    pub target_address_size: u8,
    pub target_address_fixed: Option<u32>,
    pub ecu_address_size: u8,
    pub ecu_address_fixed: Option<u32>,
}

/// Where one address of a PDU-Transport frame comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressField {
    /// Big-endian value of the given width read from the payload prefix
    Encoded(AddressWidth),
    Fixed(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduAddressing {
    None,
    Single(AddressField),
    Pair {
        source: AddressField,
        target: AddressField,
    },
}

/// Validated PDU-Transport table row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PduTransportRow", into = "PduTransportRow")]
pub struct PduTransportEntry {
    pub pdu_id: u32,
    pub addressing: PduAddressing,
}

fn address_field(name: &str, size: u8, fixed: Option<u32>) -> Result<Option<AddressField>> {
    let fixed = fixed.filter(|value| *value != ADDR_INVALID);
    match (size, fixed) {
        (0, None) => Ok(None),
        (0, Some(value)) => Ok(Some(AddressField::Fixed(value))),
        (size, None) => Ok(Some(AddressField::Encoded(AddressWidth::try_from(size)?))),
        (_, Some(_)) => Err(IsoTpError::Config(format!(
            "set either the size of the {} address or a fixed value, not both",
            name
        ))),
    }
}

impl TryFrom<PduTransportRow> for PduTransportEntry {
    type Error = IsoTpError;

    fn try_from(row: PduTransportRow) -> Result<Self> {
        let source = address_field("source", row.source_address_size, row.source_address_fixed)?;
        let target = address_field("target", row.target_address_size, row.target_address_fixed)?;
        let ecu = address_field("ecu", row.ecu_address_size, row.ecu_address_fixed)?;

        let addressing = match (ecu, source, target) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(IsoTpError::Config(format!(
                    "PDU {:#x}: an ecu address cannot be combined with a source or target address",
                    row.pdu_id
                )))
            }
            (Some(ecu), None, None) => PduAddressing::Single(ecu),
            (None, Some(source), Some(target)) => PduAddressing::Pair { source, target },
            (None, None, None) => PduAddressing::None,
            (None, _, _) => {
                return Err(IsoTpError::Config(format!(
                    "PDU {:#x}: source and target address must be configured together",
                    row.pdu_id
                )))
            }
        };

        Ok(Self {
            pdu_id: row.pdu_id,
            addressing,
        })
    }
}

fn write_field(field: AddressField, size: &mut u8, fixed: &mut Option<u32>) {
    match field {
        AddressField::Encoded(width) => *size = width.into(),
        AddressField::Fixed(value) => *fixed = Some(value),
    }
}

impl From<PduTransportEntry> for PduTransportRow {
    fn from(entry: PduTransportEntry) -> Self {
        let mut row = PduTransportRow {
            pdu_id: entry.pdu_id,
            ..Default::default()
        };
        match entry.addressing {
            PduAddressing::None => {}
            PduAddressing::Single(field) => {
                write_field(field, &mut row.ecu_address_size, &mut row.ecu_address_fixed)
            }
            PduAddressing::Pair { source, target } => {
                write_field(
                    source,
                    &mut row.source_address_size,
                    &mut row.source_address_fixed,
                );
                write_field(
                    target,
                    &mut row.target_address_size,
                    &mut row.target_address_fixed,
                );
            }
        }
        row
    }
}

/// ISO-TP analyzer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IsoTpConfig {
    /// Addressing of CAN and CAN-FD payloads (LIN is always extended)
    pub addressing: CanAddressing,
    /// Fragments a consecutive frame may run ahead of the highest one seen
    pub window: u16,
    /// Standard CAN ids handled by the analyzer
    pub can_ids: IdRangeSet,
    /// Extended CAN ids handled by the analyzer
    pub can_extended_ids: IdRangeSet,
    /// Ordered rules deriving addresses from CAN ids; first match wins
    pub can_id_mappings: Vec<CanIdMapping>,
    /// Handle LIN diagnostic frames 0x3C and 0x3D
    pub lin_diag: bool,
    pub flexray_addressing: AddressWidth,
    /// Bytes after the addresses used by first and consecutive frames (0 = whole slot)
    pub flexray_segment_size_limit: u32,
    pub ipdum_pdu_ids: IdRangeSet,
    pub ipdum_addressing: AddressWidth,
    pub pdu_transport: Vec<PduTransportEntry>,
}

impl Default for IsoTpConfig {
    fn default() -> Self {
        Self {
            addressing: CanAddressing::Normal,
            window: DEFAULT_WINDOW,
            can_ids: IdRangeSet::default(),
            can_extended_ids: IdRangeSet::default(),
            can_id_mappings: Vec::new(),
            lin_diag: true,
            flexray_addressing: AddressWidth::One,
            flexray_segment_size_limit: 0,
            ipdum_pdu_ids: IdRangeSet::default(),
            ipdum_addressing: AddressWidth::Zero,
            pdu_transport: Vec::new(),
        }
    }
}

impl Config for IsoTpConfig {
    fn validate(&self) -> Result<()> {
        if let Some(max) = self.can_ids.max_id() {
            if max > CAN_SFF_MASK {
                return Err(IsoTpError::Config(format!(
                    "standard CAN id {:#x} exceeds {:#x}",
                    max, CAN_SFF_MASK
                )));
            }
        }
        if let Some(max) = self.can_extended_ids.max_id() {
            if max > CAN_EFF_MASK {
                return Err(IsoTpError::Config(format!(
                    "extended CAN id {:#x} exceeds {:#x}",
                    max, CAN_EFF_MASK
                )));
            }
        }
        if self.flexray_addressing == AddressWidth::Zero {
            return Err(IsoTpError::Config(
                "FlexRay addressing must be 1 or 2 bytes".into(),
            ));
        }
        let mut seen = HashSet::new();
        for (row, entry) in self.pdu_transport.iter().enumerate() {
            if !seen.insert(entry.pdu_id) {
                return Err(IsoTpError::ConfigRow {
                    row,
                    reason: format!("PDU {:#x} is configured more than once", entry.pdu_id),
                });
            }
        }
        Ok(())
    }
}

impl IsoTpConfig {
    /// Parses and validates a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: IsoTpConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// First mapping rule matching the identifier
    pub fn find_can_mapping(&self, extended: bool, can_id: u32) -> Option<&CanIdMapping> {
        self.can_id_mappings
            .iter()
            .find(|mapping| mapping.matches(extended, can_id))
    }

    pub fn find_pdu_transport(&self, pdu_id: u32) -> Option<&PduTransportEntry> {
        self.pdu_transport
            .iter()
            .find(|entry| entry.pdu_id == pdu_id)
    }

    /// Segment size cutoff applying to first and consecutive frames of the link
    pub fn segment_limit(&self, link_type: LinkType) -> Option<usize> {
        match link_type {
            LinkType::FlexRay if self.flexray_segment_size_limit != 0 => {
                Some(self.flexray_segment_size_limit as usize)
            }
            _ => None,
        }
    }
}

/// Holds the active configuration and swaps it only for validated replacements
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    current: Arc<IsoTpConfig>,
}

impl ConfigStore {
    pub fn new(config: IsoTpConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            current: Arc::new(config),
        })
    }

    /// Snapshot of the active configuration
    pub fn current(&self) -> Arc<IsoTpConfig> {
        Arc::clone(&self.current)
    }

    pub fn replace(&mut self, config: IsoTpConfig) -> Result<Arc<IsoTpConfig>> {
        if let Err(e) = config.validate() {
            warn!("Rejected configuration, keeping previous one: {}", e);
            return Err(e);
        }
        self.current = Arc::new(config);
        info!("ISO-TP configuration reloaded");
        Ok(self.current())
    }

    pub fn load_json(&mut self, json: &str) -> Result<Arc<IsoTpConfig>> {
        let config: IsoTpConfig = match serde_json::from_str(json) {
            Ok(config) => config,
            Err(e) => {
                warn!("Rejected configuration, keeping previous one: {}", e);
                return Err(e.into());
            }
        };
        self.replace(config)
    }
}
