use std::fmt;

/// Raw link identifier (CAN arbitration id, LIN frame id, FlexRay slot/cycle/channel, PDU id)
pub type LinkId = u32;

/// Position of a frame in the analyzed stream
pub type FrameIndex = u32;

/// Monotonic identifier of a segmented message within one session
pub type SequenceId = u32;

/// Address value meaning "not resolved"
pub const ADDR_INVALID: u32 = 0xFFFF_FFFF;

/// Logical source/target addresses carried by one frame.
///
/// `valid` counts how many distinct addresses were resolved: 0 (none),
/// 1 (a single ECU address, mirrored into source and target) or 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressPair {
    pub source: u32,
    pub target: u32,
    valid: u8,
}

impl AddressPair {
    pub const fn none() -> Self {
        Self {
            source: ADDR_INVALID,
            target: ADDR_INVALID,
            valid: 0,
        }
    }

    pub const fn single(address: u32) -> Self {
        Self {
            source: address,
            target: address,
            valid: 1,
        }
    }

    pub const fn pair(source: u32, target: u32) -> Self {
        Self {
            source,
            target,
            valid: 2,
        }
    }

    /// Number of addresses resolved (0, 1 or 2)
    pub fn valid_count(&self) -> u8 {
        self.valid
    }

    pub fn is_resolved(&self) -> bool {
        self.valid > 0
    }
}

impl Default for AddressPair {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for AddressPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.valid {
            0 => write!(f, "unresolved"),
            1 => write!(f, "{:#x}", self.source),
            _ => write!(f, "{:#x} -> {:#x}", self.source, self.target),
        }
    }
}

/// Configuration trait that must be implemented by all configuration records
pub trait Config: Send + Sync {
    fn validate(&self) -> crate::error::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_pair_uses_sentinel() {
        let pair = AddressPair::default();
        assert_eq!(pair.valid_count(), 0);
        assert_eq!(pair.source, ADDR_INVALID);
        assert_eq!(pair.target, ADDR_INVALID);
        assert!(!pair.is_resolved());
    }

    #[test]
    fn single_address_is_mirrored() {
        let pair = AddressPair::single(0x33);
        assert_eq!(pair.valid_count(), 1);
        assert_eq!(pair.source, pair.target);
        assert_eq!(pair.to_string(), "0x33");
    }

    #[test]
    fn pair_display() {
        assert_eq!(AddressPair::pair(0xF1, 0x10).to_string(), "0xf1 -> 0x10");
    }
}
