use bitflags::bitflags;

/// Identifier bits of an 11-bit (standard) CAN id
pub const CAN_SFF_MASK: u32 = 0x0000_07FF;
/// Identifier bits of a 29-bit (extended) CAN id
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;
/// Classic CAN payload limit; longer frames can only be CAN-FD
pub const CAN_MAX_DLEN: usize = 8;
/// CAN-FD payload limit
pub const CANFD_MAX_DLEN: usize = 64;

bitflags! {
    /// Flag bits carried in the upper bits of a SocketCAN-style raw identifier
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CanIdFlags: u32 {
        const EXTENDED = 0x8000_0000;
        const REMOTE = 0x4000_0000;
        const ERROR = 0x2000_0000;
    }
}

impl CanIdFlags {
    /// Error and remote frames never carry ISO-TP data
    pub fn is_data_frame(&self) -> bool {
        !self.intersects(CanIdFlags::REMOTE | CanIdFlags::ERROR)
    }

    pub fn is_extended(&self) -> bool {
        self.contains(CanIdFlags::EXTENDED)
    }
}

/// Splits a raw identifier into its flag bits and the id masked to its width.
pub fn split_raw_id(raw: u32) -> (u32, CanIdFlags) {
    let flags = CanIdFlags::from_bits_truncate(raw);
    let id = if flags.is_extended() {
        raw & CAN_EFF_MASK
    } else {
        raw & CAN_SFF_MASK
    };
    (id, flags)
}

/// Width mask for a standard or extended identifier
pub fn id_mask(extended: bool) -> u32 {
    if extended {
        CAN_EFF_MASK
    } else {
        CAN_SFF_MASK
    }
}
