//! Link-layer frames handed to the ISO-TP analyzer.
//!
//! This module describes the frames delivered by the upstream link decoders:
//! - Classic CAN and CAN-FD (11-bit and 29-bit identifiers)
//! - LIN (diagnostic frames 0x3C/0x3D)
//! - FlexRay TP (slot, cycle and channel folded into one identifier)
//! - AUTOSAR I-PduM and PDU-Transport (PDU ids)
//!
//! Frames arrive fully captured; this crate does no bit timing, arbitration
//! or framing. A [`LinkFrame`] only carries what the transport layer needs:
//! the link type, the identifier, the payload bytes and the length the link
//! reported for the frame.
//!
//! # Examples
//!
//! ```rust
//! use libisotp::link::{LinkFrame, LinkType};
//!
//! let frame = LinkFrame::can(0x7E0, vec![0x02, 0x10, 0x03]);
//! assert_eq!(frame.link_type, LinkType::Can);
//! assert_eq!(frame.reported_len, 3);
//!
//! let fr = LinkFrame::flexray(0x42, 0, 1, vec![0x00; 16]);
//! assert_eq!(fr.id, 0x0042_0001);
//! ```

pub mod can;
pub mod flexray;
pub mod lin;

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::LinkId;
pub use can::CanIdFlags;

/// Link carrying the ISO-TP traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Can,
    CanFd,
    Lin,
    FlexRay,
    Ipdum,
    PduTransport,
}

impl LinkType {
    pub fn is_can(&self) -> bool {
        matches!(self, LinkType::Can | LinkType::CanFd)
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkType::Can => "CAN",
            LinkType::CanFd => "CAN-FD",
            LinkType::Lin => "LIN",
            LinkType::FlexRay => "FlexRay",
            LinkType::Ipdum => "I-PduM",
            LinkType::PduTransport => "PDU-Transport",
        };
        f.write_str(name)
    }
}

/// Identity of the link channel a segmented message travels on.
///
/// Consecutive frames are bound to the open message of the same identity.
/// For FlexRay the identity leaves out the cycle counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkIdentity {
    pub link_type: LinkType,
    pub id: LinkId,
    pub extended: bool,
}

/// One frame delivered by a link decoder
#[derive(Debug, Clone)]
pub struct LinkFrame {
    pub link_type: LinkType,
    pub id: LinkId,
    pub flags: CanIdFlags,
    pub data: Bytes,
    pub reported_len: usize,
}

impl LinkFrame {
    fn with_link(link_type: LinkType, id: LinkId, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            link_type,
            id,
            flags: CanIdFlags::empty(),
            reported_len: data.len(),
            data,
        }
    }

    /// Classic CAN frame with an 11-bit identifier
    pub fn can(id: u32, data: impl Into<Bytes>) -> Self {
        Self::with_link(LinkType::Can, id & can::CAN_SFF_MASK, data)
    }

    /// Classic CAN frame with a 29-bit identifier
    pub fn can_extended(id: u32, data: impl Into<Bytes>) -> Self {
        let mut frame = Self::with_link(LinkType::Can, id & can::CAN_EFF_MASK, data);
        frame.flags = CanIdFlags::EXTENDED;
        frame
    }

    /// CAN-FD frame with an 11-bit identifier
    pub fn can_fd(id: u32, data: impl Into<Bytes>) -> Self {
        let mut frame = Self::can(id, data);
        frame.link_type = LinkType::CanFd;
        frame
    }

    /// CAN or CAN-FD frame from a SocketCAN-style raw id (flags in the top three bits)
    pub fn from_raw_can(raw_id: u32, data: impl Into<Bytes>, fd: bool) -> Self {
        let (id, flags) = can::split_raw_id(raw_id);
        let link_type = if fd { LinkType::CanFd } else { LinkType::Can };
        let mut frame = Self::with_link(link_type, id, data);
        frame.flags = flags;
        frame
    }

    /// LIN frame addressed by its 6-bit frame id
    pub fn lin(frame_id: u8, data: impl Into<Bytes>) -> Self {
        Self::with_link(
            LinkType::Lin,
            (frame_id & lin::LIN_ID_MASK) as u32,
            data,
        )
    }

    /// LIN frame addressed by its protected identifier (parity checked)
    pub fn lin_protected(pid: u8, data: impl Into<Bytes>) -> Result<Self> {
        let id = lin::frame_id_from_pid(pid)?;
        Ok(Self::lin(id, data))
    }

    pub fn flexray(slot: u16, cycle: u8, channel: u8, data: impl Into<Bytes>) -> Self {
        Self::with_link(
            LinkType::FlexRay,
            flexray::compose_id(slot, cycle, channel),
            data,
        )
    }

    pub fn ipdum(pdu_id: u32, data: impl Into<Bytes>) -> Self {
        Self::with_link(LinkType::Ipdum, pdu_id, data)
    }

    pub fn pdu_transport(pdu_id: u32, data: impl Into<Bytes>) -> Self {
        Self::with_link(LinkType::PduTransport, pdu_id, data)
    }

    /// Overrides the length reported by the link (e.g. the CAN DLC-derived length)
    pub fn with_reported_len(mut self, len: usize) -> Self {
        self.reported_len = len;
        self
    }

    pub fn is_extended(&self) -> bool {
        self.flags.is_extended()
    }

    /// Error and remote CAN frames are not for us
    pub fn is_data_frame(&self) -> bool {
        self.flags.is_data_frame()
    }

    pub fn identity(&self) -> LinkIdentity {
        let id = match self.link_type {
            LinkType::FlexRay => flexray::channel_id(self.id),
            _ => self.id,
        };
        LinkIdentity {
            link_type: self.link_type,
            id,
            extended: self.is_extended(),
        }
    }
}
