use thiserror::Error;

#[derive(Debug, Error)]
pub enum IsoTpError {
    // Frame classification errors
    #[error("bad message type value {0} (expected <= 7)")]
    BadMessageType(u8),
    #[error("frame truncated: {field} needs {needed} bytes, {available} available")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    // Reassembly errors
    #[error("message {sequence} exceeds 4096 segments (sequence number {low_id:#x} wrapped 255 times)")]
    FragmentOverflow { sequence: u32, low_id: u8 },

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),
    #[error("configuration row {row}: {reason}")]
    ConfigRow { row: usize, reason: String },
    #[error("invalid id range `{0}`")]
    InvalidRange(String),
    #[error("invalid configuration document: {0}")]
    Json(#[from] serde_json::Error),

    // Link errors
    #[error("LIN protected identifier {0:#04x} has bad parity")]
    LinParity(u8),
}

impl IsoTpError {
    /// True for errors that mark a single frame as protocol-invalid.
    pub fn is_malformed_frame(&self) -> bool {
        matches!(
            self,
            IsoTpError::BadMessageType(_) | IsoTpError::Truncated { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, IsoTpError>;
