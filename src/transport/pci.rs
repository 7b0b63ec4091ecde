use std::fmt;
use std::time::Duration;

use crate::error::{IsoTpError, Result};
use crate::link::can::CAN_MAX_DLEN;
use crate::link::LinkFrame;

const MESSAGE_TYPE_MASK: u8 = 0xF0;
const LOW_NIBBLE_MASK: u8 = 0x0F;
const FF_ESCAPE: u16 = 0x1000;
const FF_LENGTH_MASK: u16 = 0x0FFF;

const PCI_LEN: usize = 1;
const SF_ESCAPE_PCI_LEN: usize = 2;
const FF_PCI_LEN: usize = 2;
const FF_ESCAPE_PCI_LEN: usize = 6;
const FF_EXT_PCI_LEN: usize = 5;
const FC_LEN: usize = 3;
const ACK_LEN: usize = 4;

/// ISO-TP message types, including the AUTOSAR FlexRay TP extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    SingleFrame = 0,
    FirstFrame = 1,
    ConsecutiveFrame = 2,
    FlowControl = 3,
    SingleFrameExt = 4,
    FirstFrameExt = 5,
    ConsecutiveFrame2 = 6,
    AckFrame = 7,
}

impl MessageType {
    pub fn from_pci(pci: u8) -> Result<Self> {
        match (pci & MESSAGE_TYPE_MASK) >> 4 {
            0 => Ok(MessageType::SingleFrame),
            1 => Ok(MessageType::FirstFrame),
            2 => Ok(MessageType::ConsecutiveFrame),
            3 => Ok(MessageType::FlowControl),
            4 => Ok(MessageType::SingleFrameExt),
            5 => Ok(MessageType::FirstFrameExt),
            6 => Ok(MessageType::ConsecutiveFrame2),
            7 => Ok(MessageType::AckFrame),
            other => Err(IsoTpError::BadMessageType(other)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MessageType::SingleFrame => "Single Frame",
            MessageType::FirstFrame => "First Frame",
            MessageType::ConsecutiveFrame => "Consecutive Frame",
            MessageType::FlowControl => "Flow control",
            MessageType::SingleFrameExt => "Single Frame Ext",
            MessageType::FirstFrameExt => "First Frame Ext",
            MessageType::ConsecutiveFrame2 => "Consecutive Frame 2",
            MessageType::AckFrame => "Ack Frame",
        }
    }

    pub fn is_segmented(&self) -> bool {
        matches!(
            self,
            MessageType::FirstFrame
                | MessageType::FirstFrameExt
                | MessageType::ConsecutiveFrame
                | MessageType::ConsecutiveFrame2
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Flow status nibble of a flow control frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    ContinueToSend,
    Wait,
    Overflow,
    Reserved(u8),
}

impl From<u8> for FlowStatus {
    fn from(value: u8) -> Self {
        match value & LOW_NIBBLE_MASK {
            0 => FlowStatus::ContinueToSend,
            1 => FlowStatus::Wait,
            2 => FlowStatus::Overflow,
            other => FlowStatus::Reserved(other),
        }
    }
}

/// Minimum separation time requested by the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeparationTime {
    Millis(u8),
    Micros(u16),
}

impl SeparationTime {
    /// 0xF1..=0xF9 encode 100..=900 µs, every other value is milliseconds
    pub fn from_byte(value: u8) -> Self {
        match value {
            0xF1..=0xF9 => SeparationTime::Micros((value - 0xF0) as u16 * 100),
            ms => SeparationTime::Millis(ms),
        }
    }

    pub fn as_duration(&self) -> Duration {
        match *self {
            SeparationTime::Millis(ms) => Duration::from_millis(ms as u64),
            SeparationTime::Micros(us) => Duration::from_micros(us as u64),
        }
    }
}

impl fmt::Display for SeparationTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeparationTime::Millis(ms) => write!(f, "{} ms", ms),
            SeparationTime::Micros(us) => write!(f, "{} µs", us),
        }
    }
}

/// AUTOSAR FlexRay TP acknowledgment trailer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub code: u8,
    pub sequence: u8,
}

/// Decoded protocol control information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlInfo {
    Single {
        data_length: usize,
    },
    First {
        frame_length: u32,
    },
    Consecutive {
        sequence: u8,
    },
    FlowControl {
        status: FlowStatus,
        block_size: u8,
        separation_time: SeparationTime,
        ack: Option<Ack>,
    },
}

/// A classified frame: its control information and where its payload lies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified {
    pub message_type: MessageType,
    pub control: ControlInfo,
    pub payload_offset: usize,
    pub payload_len: usize,
}

impl Classified {
    pub fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.payload_offset..self.payload_offset + self.payload_len]
    }
}

fn byte_at(data: &[u8], offset: usize, field: &'static str) -> Result<u8> {
    data.get(offset).copied().ok_or(IsoTpError::Truncated {
        field,
        needed: offset + 1,
        available: data.len(),
    })
}

fn bytes_at<const N: usize>(data: &[u8], offset: usize, field: &'static str) -> Result<[u8; N]> {
    data.get(offset..offset + N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(IsoTpError::Truncated {
            field,
            needed: offset + N,
            available: data.len(),
        })
}

fn ensure_payload(data: &[u8], offset: usize, len: usize) -> Result<()> {
    if offset + len > data.len() {
        return Err(IsoTpError::Truncated {
            field: "payload",
            needed: offset + len,
            available: data.len(),
        });
    }
    Ok(())
}

/// Payload after `offset`, clamped to the segment size limit if one applies
fn segment_len(data: &[u8], prefix_len: usize, offset: usize, limit: Option<usize>) -> usize {
    let len = data.len().saturating_sub(offset);
    match limit {
        Some(limit) => len.min(limit.saturating_sub(offset - prefix_len)),
        None => len,
    }
}

/// Classifies the frame whose PCI starts at `prefix_len`.
///
/// `segment_limit` is the configured FlexRay segment size cutoff; it clamps
/// the payload of first and consecutive frames so trailing slot padding is
/// not taken as data.
pub fn classify(frame: &LinkFrame, prefix_len: usize, segment_limit: Option<usize>) -> Result<Classified> {
    let data = &frame.data[..];
    let pci = byte_at(data, prefix_len, "PCI")?;
    let message_type = MessageType::from_pci(pci)?;

    let (control, payload_offset, payload_len) = match message_type {
        MessageType::SingleFrame => {
            let low = pci & LOW_NIBBLE_MASK;
            if frame.reported_len > CAN_MAX_DLEN && low == 0 {
                // CAN-FD escape: length in the following byte
                let len = byte_at(data, prefix_len + 1, "single frame length")? as usize;
                let offset = prefix_len + SF_ESCAPE_PCI_LEN;
                ensure_payload(data, offset, len)?;
                (ControlInfo::Single { data_length: len }, offset, len)
            } else {
                let len = low as usize;
                let offset = prefix_len + PCI_LEN;
                ensure_payload(data, offset, len)?;
                (ControlInfo::Single { data_length: len }, offset, len)
            }
        }
        MessageType::SingleFrameExt => {
            let len = byte_at(data, prefix_len + 1, "single frame length")? as usize;
            let offset = prefix_len + SF_ESCAPE_PCI_LEN;
            ensure_payload(data, offset, len)?;
            (ControlInfo::Single { data_length: len }, offset, len)
        }
        MessageType::FirstFrame => {
            let word = u16::from_be_bytes(bytes_at::<2>(data, prefix_len, "first frame length")?);
            let (frame_length, offset) = if word == FF_ESCAPE {
                let len = u32::from_be_bytes(bytes_at::<4>(
                    data,
                    prefix_len + FF_PCI_LEN,
                    "first frame escaped length",
                )?);
                (len, prefix_len + FF_ESCAPE_PCI_LEN)
            } else {
                ((word & FF_LENGTH_MASK) as u32, prefix_len + FF_PCI_LEN)
            };
            let len = segment_len(data, prefix_len, offset, segment_limit);
            (ControlInfo::First { frame_length }, offset, len)
        }
        MessageType::FirstFrameExt => {
            let frame_length = u32::from_be_bytes(bytes_at::<4>(
                data,
                prefix_len + PCI_LEN,
                "first frame length",
            )?);
            let offset = prefix_len + FF_EXT_PCI_LEN;
            let len = segment_len(data, prefix_len, offset, segment_limit);
            (ControlInfo::First { frame_length }, offset, len)
        }
        MessageType::ConsecutiveFrame | MessageType::ConsecutiveFrame2 => {
            let offset = prefix_len + PCI_LEN;
            let len = segment_len(data, prefix_len, offset, segment_limit);
            (
                ControlInfo::Consecutive {
                    sequence: pci & LOW_NIBBLE_MASK,
                },
                offset,
                len,
            )
        }
        MessageType::FlowControl | MessageType::AckFrame => {
            let block_size = byte_at(data, prefix_len + 1, "block size")?;
            let st_min = byte_at(data, prefix_len + 2, "separation time")?;
            let (ack, offset) = if message_type == MessageType::AckFrame {
                let trailer = byte_at(data, prefix_len + FC_LEN, "acknowledgment")?;
                let ack = Ack {
                    code: trailer >> 4,
                    sequence: trailer & LOW_NIBBLE_MASK,
                };
                (Some(ack), prefix_len + ACK_LEN)
            } else {
                (None, prefix_len + FC_LEN)
            };
            (
                ControlInfo::FlowControl {
                    status: FlowStatus::from(pci),
                    block_size,
                    separation_time: SeparationTime::from_byte(st_min),
                    ack,
                },
                offset,
                0,
            )
        }
    };

    Ok(Classified {
        message_type,
        control,
        payload_offset,
        payload_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn can(data: &[u8]) -> LinkFrame {
        LinkFrame::can(0x7E0, data.to_vec())
    }

    #[test]
    fn test_single_frame_classic() {
        for len in 1..=7u8 {
            let mut data = vec![len];
            data.extend(std::iter::repeat(0xAA).take(7));
            let classified = classify(&can(&data), 0, None).unwrap();
            assert_eq!(classified.message_type, MessageType::SingleFrame);
            assert_eq!(classified.payload_offset, 1);
            assert_eq!(classified.payload_len, len as usize);
        }
    }

    #[test]
    fn test_single_frame_can_fd_escape() {
        let mut data = vec![0x00, 20];
        data.extend(0..30u8);
        let frame = LinkFrame::can_fd(0x7E0, data);
        let classified = classify(&frame, 0, None).unwrap();
        assert_eq!(classified.control, ControlInfo::Single { data_length: 20 });
        assert_eq!(classified.payload_offset, 2);
        assert_eq!(classified.payload(&frame.data), &(0..20u8).collect::<Vec<_>>()[..]);
    }

    #[test]
    fn test_single_frame_zero_length_on_classic_can() {
        let classified = classify(&can(&[0x00, 0x55]), 0, None).unwrap();
        assert_eq!(classified.payload_len, 0);
        assert_eq!(classified.payload_offset, 1);
    }

    #[test]
    fn test_single_frame_ext_after_address() {
        let frame = LinkFrame::flexray(1, 0, 0, vec![0x0A, 0x0B, 0x40, 0x03, 1, 2, 3, 0]);
        let classified = classify(&frame, 2, None).unwrap();
        assert_eq!(classified.message_type, MessageType::SingleFrameExt);
        assert_eq!(classified.payload(&frame.data), &[1, 2, 3]);
    }

    #[test]
    fn test_first_frame_lengths() {
        let classified = classify(&can(&[0x1F, 0xA0, 1, 2, 3, 4, 5, 6]), 0, None).unwrap();
        assert_eq!(classified.control, ControlInfo::First { frame_length: 4000 });
        assert_eq!(classified.payload_offset, 2);
        assert_eq!(classified.payload_len, 6);

        let frame = LinkFrame::can_fd(0x7E0, vec![0x10, 0x00, 0x00, 0x01, 0x00, 0x00, 9, 9]);
        let classified = classify(&frame, 0, None).unwrap();
        assert_eq!(classified.control, ControlInfo::First { frame_length: 65536 });
        assert_eq!(classified.payload_offset, 6);
        assert_eq!(classified.payload_len, 2);
    }

    #[test]
    fn test_first_frame_ext() {
        let frame = can(&[0x50, 0x00, 0x00, 0x10, 0x00, 0xEE, 0xEE, 0xEE]);
        let classified = classify(&frame, 0, None).unwrap();
        assert_eq!(classified.control, ControlInfo::First { frame_length: 4096 });
        assert_eq!(classified.payload_offset, 5);
        assert_eq!(classified.payload_len, 3);
    }

    #[test]
    fn test_consecutive_frames() {
        let classified = classify(&can(&[0x2F, 1, 2, 3]), 0, None).unwrap();
        assert_eq!(classified.control, ControlInfo::Consecutive { sequence: 0x0F });
        assert_eq!(classified.payload_len, 3);

        let classified = classify(&can(&[0x63, 1]), 0, None).unwrap();
        assert_eq!(classified.message_type, MessageType::ConsecutiveFrame2);
        assert_eq!(classified.control, ControlInfo::Consecutive { sequence: 3 });
    }

    #[test]
    fn test_flow_control() {
        let classified = classify(&can(&[0x30, 0x08, 0x0A]), 0, None).unwrap();
        match classified.control {
            ControlInfo::FlowControl {
                status,
                block_size,
                separation_time,
                ack,
            } => {
                assert_eq!(status, FlowStatus::ContinueToSend);
                assert_eq!(block_size, 8);
                assert_eq!(separation_time, SeparationTime::Millis(10));
                assert_eq!(separation_time.as_duration(), Duration::from_millis(10));
                assert!(ack.is_none());
            }
            other => panic!("unexpected control info {:?}", other),
        }
        assert_eq!(classified.payload_len, 0);
    }

    #[test]
    fn test_ack_frame() {
        let classified = classify(&can(&[0x72, 0x00, 0xF5, 0x35]), 0, None).unwrap();
        assert_eq!(
            classified.control,
            ControlInfo::FlowControl {
                status: FlowStatus::Overflow,
                block_size: 0,
                separation_time: SeparationTime::Micros(500),
                ack: Some(Ack {
                    code: 3,
                    sequence: 5
                }),
            }
        );
        assert_eq!(classified.payload_offset, 4);
    }

    #[test]
    fn test_separation_time() {
        assert_eq!(SeparationTime::from_byte(0xF5).as_duration(), Duration::from_micros(500));
        assert_eq!(SeparationTime::from_byte(0x0A).as_duration(), Duration::from_millis(10));
        assert_eq!(SeparationTime::from_byte(0xF0), SeparationTime::Millis(0xF0));
        assert_eq!(SeparationTime::from_byte(0xFA), SeparationTime::Millis(0xFA));
        assert_eq!(SeparationTime::from_byte(0xF1).to_string(), "100 µs");
    }

    #[test]
    fn test_segment_limit_clamps_payload() {
        let mut data = vec![0x01, 0x02, 0x10, 0x40];
        data.extend(std::iter::repeat(0xCC).take(28));
        let frame = LinkFrame::flexray(5, 0, 0, data);

        let classified = classify(&frame, 2, Some(8)).unwrap();
        assert_eq!(classified.payload_offset, 4);
        assert_eq!(classified.payload_len, 6);

        let cf = LinkFrame::flexray(5, 0, 0, vec![0x01, 0x02, 0x21, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        let classified = classify(&cf, 2, Some(8)).unwrap();
        assert_eq!(classified.payload_len, 7);

        // limit smaller than the PCI itself
        let classified = classify(&frame, 2, Some(1)).unwrap();
        assert_eq!(classified.payload_len, 0);
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(
            classify(&can(&[0x80, 0x00]), 0, None),
            Err(IsoTpError::BadMessageType(8))
        ));
        assert!(matches!(
            classify(&can(&[]), 0, None),
            Err(IsoTpError::Truncated { field: "PCI", .. })
        ));
        assert!(classify(&can(&[0x05, 1, 2]), 0, None).unwrap_err().is_malformed_frame());
        assert!(classify(&can(&[0x10]), 0, None).is_err());
        assert!(classify(&can(&[0x10, 0x00, 0x00]), 0, None).is_err());
        assert!(classify(&can(&[0x30, 0x00]), 0, None).is_err());
        assert!(classify(&can(&[0x70, 0x00, 0x00]), 0, None).is_err());
        // address byte present but nothing after it
        assert!(classify(&can(&[0xF1]), 1, None).is_err());
    }
}
