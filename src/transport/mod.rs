//! ISO 15765-2 transport layer analysis.
//!
//! This module turns link frames into ISO-TP messages:
//! - [`address`] - logical source/target addresses in front of or alongside the PCI
//! - [`pci`] - protocol control information (frame type, lengths, flow control)
//! - [`reassembly`] - segmented message tracking with sequence number expansion
//! - [`fragments`] - fragment buffering and payload rebuilding
//!
//! ## Frame types
//! - Single Frame (SF), including the CAN-FD escape and the FlexRay SF-E
//! - First Frame (FF), including the 32-bit length escape and the FlexRay FF-E
//! - Consecutive Frame (CF) and the FlexRay CF2
//! - Flow Control (FC) and the FlexRay acknowledgment frame
//!
//! ## Reassembly
//! - Consecutive frames are bound to the first frame received on the same link
//! - 4-bit sequence numbers are expanded with per-value wrap counters
//! - A fragment running more than `window` ahead of the highest one seen fails the message
//! - The final fragment is trimmed to the declared length
//!
//! # Examples
//!
//! ```rust
//! use bytes::Bytes;
//! use libisotp::config::IsoTpConfig;
//! use libisotp::link::LinkFrame;
//! use libisotp::transport::{address, pci, ReassemblyEngine, ReassemblyOutcome, Segment};
//!
//! let config = IsoTpConfig::default();
//! let mut engine = ReassemblyEngine::new(config.window);
//!
//! let ff = LinkFrame::can(0x7E8, vec![0x10, 0x08, 1, 2, 3, 4, 5, 6]);
//! let cf = LinkFrame::can(0x7E8, vec![0x21, 7, 8, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA]);
//!
//! for (index, frame) in [ff, cf].iter().enumerate() {
//!     let prefix = address::resolve(frame, &config).prefix_len;
//!     let classified = pci::classify(frame, prefix, None).unwrap();
//!     let segment = match classified.control {
//!         pci::ControlInfo::First { frame_length } => Segment::First { declared_len: frame_length },
//!         pci::ControlInfo::Consecutive { sequence } => Segment::Consecutive { sequence },
//!         _ => unreachable!(),
//!     };
//!     let payload = frame
//!         .data
//!         .slice(classified.payload_offset..classified.payload_offset + classified.payload_len);
//!     let outcome = engine
//!         .push(index as u32, frame.identity(), segment, payload)
//!         .unwrap();
//!     if let ReassemblyOutcome::Completed { payload, .. } = outcome {
//!         assert_eq!(payload, Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8]));
//!     }
//! }
//! ```

pub mod address;
pub mod fragments;
pub mod pci;
pub mod reassembly;

pub use address::{AddressScheme, Resolution};
pub use fragments::{FragmentKey, FragmentTable, Reassembled};
pub use pci::{Ack, Classified, ControlInfo, FlowStatus, MessageType, SeparationTime};
pub use reassembly::{
    AssemblyState, FragmentStatus, FrameAssignment, MessageSequence, ReassemblyEngine,
    ReassemblyOutcome, Segment,
};
