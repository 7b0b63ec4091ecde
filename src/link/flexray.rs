/// Cycle counter bits of a composed identifier
pub const CYCLE_MASK: u32 = 0x0000_FF00;

/// Packs slot, cycle and channel into a single identifier.
pub fn compose_id(slot: u16, cycle: u8, channel: u8) -> u32 {
    ((slot as u32) << 16) | ((cycle as u32) << 8) | channel as u32
}

/// Inverse of [`compose_id`]: (slot, cycle, channel)
pub fn split_id(id: u32) -> (u16, u8, u8) {
    ((id >> 16) as u16, (id >> 8) as u8, id as u8)
}

/// Identifier without the cycle counter.
///
/// A FlexRay TP message keeps its slot and channel while its frames go out
/// in successive cycles.
pub fn channel_id(id: u32) -> u32 {
    id & !CYCLE_MASK
}
