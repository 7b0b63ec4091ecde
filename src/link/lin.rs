use crate::error::{IsoTpError, Result};

pub const LIN_ID_MASK: u8 = 0x3F;
pub const LIN_P0_FLAG: u8 = 6;
pub const LIN_P1_FLAG: u8 = 7;

/// Master request frame reserved for diagnostics
pub const LIN_DIAG_MASTER_REQUEST_FRAME: u32 = 0x3C;
/// Slave response frame reserved for diagnostics
pub const LIN_DIAG_SLAVE_RESPONSE_FRAME: u32 = 0x3D;

/// Returns the frame id carried by a protected identifier after checking both parity bits.
pub fn frame_id_from_pid(pid: u8) -> Result<u8> {
    let id = pid & LIN_ID_MASK;
    if protected_id(id) != pid {
        return Err(IsoTpError::LinParity(pid));
    }
    Ok(id)
}

/// Adds the P0/P1 parity bits to a 6-bit frame id
pub fn protected_id(id: u8) -> u8 {
    let id = id & LIN_ID_MASK;
    id | calculate_parity(id)
}

pub fn is_diagnostic_frame(id: u32) -> bool {
    id == LIN_DIAG_MASTER_REQUEST_FRAME || id == LIN_DIAG_SLAVE_RESPONSE_FRAME
}

fn calculate_parity(id: u8) -> u8 {
    let p0 = (id ^ (id >> 1) ^ (id >> 2) ^ (id >> 4)) & 1;
    let p1 = !((id >> 1) ^ (id >> 3) ^ (id >> 4) ^ (id >> 5)) & 1;
    (p0 << LIN_P0_FLAG) | (p1 << LIN_P1_FLAG)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_pids() {
        // Values from the LIN 2.x specification
        assert_eq!(protected_id(0x3C), 0x3C);
        assert_eq!(protected_id(0x3D), 0x7D);
        assert_eq!(frame_id_from_pid(0x7D).unwrap(), 0x3D);
    }

    #[test]
    fn bad_parity_is_rejected() {
        assert!(matches!(
            frame_id_from_pid(0xBD),
            Err(IsoTpError::LinParity(0xBD))
        ));
    }
}
