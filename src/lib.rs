// Protocol modules
pub mod application; // Payload hand-off to next-level decoders
pub mod link; // CAN, CAN-FD, LIN, FlexRay and AUTOSAR PDU frames
pub mod session; // Per-analysis pipeline state
pub mod transport; // ISO-TP addressing, classification and reassembly

// Re-exports for convenience
pub use application::{DecoderKey, DispatchTarget, Dispatcher, PayloadDecoder, ReassembledMessage};
pub use config::{ConfigStore, IsoTpConfig};
pub use error::{IsoTpError, Result};
pub use link::{LinkFrame, LinkType};
pub use session::{FrameReport, Session, SessionStatistics};

// Common types and configuration
pub mod config;
pub mod error;
pub mod types;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
