//! Per-analysis pipeline state.
//!
//! A [`Session`] runs every accepted frame through address resolution,
//! classification, reassembly and dispatch. It owns all mutable state of one
//! analysis; independent sessions share nothing but the configuration
//! snapshot they were given.

use std::sync::Arc;

use bytes::Bytes;
use log::{trace, warn};

use crate::application::{DispatchTarget, Dispatcher, ReassembledMessage};
use crate::config::IsoTpConfig;
use crate::error::{IsoTpError, Result};
use crate::link::lin::is_diagnostic_frame;
use crate::link::{LinkFrame, LinkIdentity, LinkType};
use crate::transport::pci::{self, Classified, ControlInfo, MessageType};
use crate::transport::reassembly::{ReassemblyEngine, ReassemblyOutcome, Segment};
use crate::transport::{address, Resolution};
use crate::types::{AddressPair, FrameIndex};

/// Frame and message counters of a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatistics {
    pub frames_processed: u64,
    pub single_frames: u64,
    pub first_frames: u64,
    pub consecutive_frames: u64,
    pub flow_control_frames: u64,
    pub ack_frames: u64,
    /// Frames with a bad message type or too short for their fields
    pub malformed_frames: u64,
    /// Consecutive frames without an open message on their link
    pub orphaned_frames: u64,
    pub messages_completed: u64,
    /// Messages that reached their length with fragments missing
    pub messages_incomplete: u64,
    /// Messages failed by a window violation or fragment overflow
    pub messages_errored: u64,
    /// Fragments of already failed messages
    pub fragments_ignored: u64,
    pub dispatched_to_decoder: u64,
    pub dispatched_to_data: u64,
}

impl SessionStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn record_frame(&mut self, message_type: MessageType) {
        match message_type {
            MessageType::SingleFrame | MessageType::SingleFrameExt => self.single_frames += 1,
            MessageType::FirstFrame | MessageType::FirstFrameExt => self.first_frames += 1,
            MessageType::ConsecutiveFrame | MessageType::ConsecutiveFrame2 => {
                self.consecutive_frames += 1
            }
            MessageType::FlowControl => self.flow_control_frames += 1,
            MessageType::AckFrame => self.ack_frames += 1,
        }
    }

    fn record_outcome(&mut self, outcome: &ReassemblyOutcome) {
        match outcome {
            ReassemblyOutcome::Orphaned => self.orphaned_frames += 1,
            ReassemblyOutcome::Buffered(_) => {}
            ReassemblyOutcome::Completed { .. } => self.messages_completed += 1,
            ReassemblyOutcome::Incomplete(_) => self.messages_incomplete += 1,
            ReassemblyOutcome::Errored(_) => self.messages_errored += 1,
            ReassemblyOutcome::Discarded(_) => self.fragments_ignored += 1,
        }
    }

    fn record_dispatch(&mut self, target: &DispatchTarget) {
        match target {
            DispatchTarget::Decoder(_) => self.dispatched_to_decoder += 1,
            DispatchTarget::Data => self.dispatched_to_data += 1,
        }
    }
}

/// Everything the analyzer found out about one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameReport {
    pub index: FrameIndex,
    pub link: LinkIdentity,
    pub addresses: AddressPair,
    /// Bytes taken by the addresses in front of the PCI
    pub prefix_len: usize,
    pub classified: Classified,
    /// Payload carried by this frame alone
    pub segment: Bytes,
    /// Set for first and consecutive frames
    pub reassembly: Option<ReassemblyOutcome>,
    /// Set when a complete payload was handed on
    pub dispatched: Option<DispatchTarget>,
}

impl FrameReport {
    pub fn message_type(&self) -> MessageType {
        self.classified.message_type
    }

    pub fn is_complete(&self) -> bool {
        self.dispatched.is_some()
    }
}

/// ISO-TP analysis context
#[derive(Debug)]
pub struct Session {
    config: Arc<IsoTpConfig>,
    engine: ReassemblyEngine,
    dispatcher: Dispatcher,
    statistics: SessionStatistics,
}

impl Session {
    pub fn new(config: Arc<IsoTpConfig>, dispatcher: Dispatcher) -> Self {
        Self {
            engine: ReassemblyEngine::new(config.window),
            config,
            dispatcher,
            statistics: SessionStatistics::new(),
        }
    }

    pub fn config(&self) -> &Arc<IsoTpConfig> {
        &self.config
    }

    /// Switches to a new configuration snapshot for the frames that follow
    pub fn reconfigure(&mut self, config: Arc<IsoTpConfig>) {
        self.engine.set_window(config.window);
        self.config = config;
    }

    /// Starts a new analysis: messages, bindings, counters and collected data are dropped
    pub fn reset(&mut self) {
        self.engine.reset();
        self.statistics.clear();
        self.dispatcher.sink_mut().take();
    }

    pub fn statistics(&self) -> &SessionStatistics {
        &self.statistics
    }

    pub fn engine(&self) -> &ReassemblyEngine {
        &self.engine
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// Whether the configuration selects this frame for ISO-TP analysis
    pub fn accepts(&self, frame: &LinkFrame) -> bool {
        let config = &self.config;
        match frame.link_type {
            LinkType::Can | LinkType::CanFd => {
                if !frame.is_data_frame() {
                    return false;
                }
                if frame.is_extended() {
                    config.can_extended_ids.contains(frame.id)
                } else {
                    config.can_ids.contains(frame.id)
                }
            }
            LinkType::Lin => config.lin_diag && is_diagnostic_frame(frame.id),
            LinkType::FlexRay => true,
            LinkType::Ipdum => config.ipdum_pdu_ids.contains(frame.id),
            LinkType::PduTransport => config.find_pdu_transport(frame.id).is_some(),
        }
    }

    /// Analyzes the frame at position `index` of the stream.
    ///
    /// Returns `Ok(None)` for frames the configuration does not select.
    /// Processing the same index again reproduces the first result without
    /// touching the reassembly state.
    pub fn process(&mut self, index: FrameIndex, frame: &LinkFrame) -> Result<Option<FrameReport>> {
        if !self.accepts(frame) {
            trace!("Frame {} ({} {:#x}) not selected", index, frame.link_type, frame.id);
            return Ok(None);
        }
        self.statistics.frames_processed += 1;

        let config = Arc::clone(&self.config);
        let Resolution {
            addresses,
            prefix_len,
        } = address::resolve(frame, &config);
        let classified = match pci::classify(frame, prefix_len, config.segment_limit(frame.link_type)) {
            Ok(classified) => classified,
            Err(e) => {
                warn!("Frame {} ({} {:#x}) malformed: {}", index, frame.link_type, frame.id, e);
                self.statistics.malformed_frames += 1;
                return Err(e);
            }
        };
        self.statistics.record_frame(classified.message_type);
        trace!(
            "Frame {}: {} from {} ({} payload bytes)",
            index,
            classified.message_type,
            addresses,
            classified.payload_len
        );

        let segment = frame.data.slice(
            classified.payload_offset..classified.payload_offset + classified.payload_len,
        );
        let message = |payload: Bytes, declared_len: u32, sequence| ReassembledMessage {
            payload,
            addresses,
            link_type: frame.link_type,
            id: frame.id,
            declared_len,
            sequence,
        };

        let (reassembly, complete) = match classified.control {
            ControlInfo::Single { data_length } => {
                (None, Some(message(segment.clone(), data_length as u32, None)))
            }
            ControlInfo::First { frame_length } => {
                let outcome = self.reassemble(
                    index,
                    frame,
                    Segment::First {
                        declared_len: frame_length,
                    },
                    segment.clone(),
                )?;
                (Some(outcome), None)
            }
            ControlInfo::Consecutive { sequence } => {
                let outcome =
                    self.reassemble(index, frame, Segment::Consecutive { sequence }, segment.clone())?;
                (Some(outcome), None)
            }
            ControlInfo::FlowControl { .. } => (None, None),
        };
        let complete = complete.or_else(|| match &reassembly {
            Some(ReassemblyOutcome::Completed {
                assignment,
                payload,
                declared_len,
            }) => Some(message(payload.clone(), *declared_len, Some(assignment.sequence))),
            _ => None,
        });

        let dispatched = complete.map(|message| {
            let target = self.dispatcher.dispatch(message);
            self.statistics.record_dispatch(&target);
            target
        });

        Ok(Some(FrameReport {
            index,
            link: frame.identity(),
            addresses,
            prefix_len,
            classified,
            segment,
            reassembly,
            dispatched,
        }))
    }

    fn reassemble(
        &mut self,
        index: FrameIndex,
        frame: &LinkFrame,
        segment: Segment,
        payload: Bytes,
    ) -> Result<ReassemblyOutcome> {
        match self.engine.push(index, frame.identity(), segment, payload) {
            Ok(outcome) => {
                self.statistics.record_outcome(&outcome);
                Ok(outcome)
            }
            Err(e @ IsoTpError::FragmentOverflow { .. }) => {
                self.statistics.messages_errored += 1;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{DecoderKey, PayloadDecoder};
    use crate::config::IdRangeSet;

    fn config() -> Arc<IsoTpConfig> {
        Arc::new(IsoTpConfig {
            can_ids: "0x7e0-0x7ef".parse::<IdRangeSet>().unwrap(),
            can_extended_ids: "0x18da0000-0x18daffff".parse::<IdRangeSet>().unwrap(),
            ipdum_pdu_ids: "0x100-0x1ff".parse::<IdRangeSet>().unwrap(),
            ..Default::default()
        })
    }

    struct Accepting;

    impl PayloadDecoder for Accepting {
        fn name(&self) -> &str {
            "accepting"
        }

        fn decode(&mut self, _message: &ReassembledMessage) -> bool {
            true
        }
    }

    #[test]
    fn test_accepts_allow_lists() {
        let session = Session::new(config(), Dispatcher::new());
        assert!(session.accepts(&LinkFrame::can(0x7E8, vec![0x01, 0x3E])));
        assert!(!session.accepts(&LinkFrame::can(0x123, vec![0x01, 0x3E])));
        assert!(session.accepts(&LinkFrame::can_extended(0x18DA_F110, vec![0x01, 0x3E])));
        assert!(!session.accepts(&LinkFrame::can_extended(0x7E8, vec![0x01, 0x3E])));
        assert!(!session.accepts(&LinkFrame::from_raw_can(0x4000_07E8, Vec::new(), false)));
        assert!(session.accepts(&LinkFrame::lin(0x3C, vec![0x7F, 0x01, 0x3E])));
        assert!(!session.accepts(&LinkFrame::lin(0x10, vec![0x7F, 0x01, 0x3E])));
        assert!(session.accepts(&LinkFrame::flexray(9, 0, 0, vec![0; 8])));
        assert!(session.accepts(&LinkFrame::ipdum(0x150, vec![0x01, 0xAA])));
        assert!(!session.accepts(&LinkFrame::ipdum(0x250, vec![0x01, 0xAA])));
        assert!(!session.accepts(&LinkFrame::pdu_transport(1, vec![0x01, 0xAA])));
    }

    #[test]
    fn test_lin_diag_disabled() {
        let config = Arc::new(IsoTpConfig {
            lin_diag: false,
            ..Default::default()
        });
        let session = Session::new(config, Dispatcher::new());
        assert!(!session.accepts(&LinkFrame::lin(0x3D, vec![0x7F, 0x01, 0x7E])));
    }

    #[test]
    fn test_single_frame_dispatch() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(DecoderKey::Link(LinkType::Can), Box::new(Accepting));
        let mut session = Session::new(config(), dispatcher);

        let report = session
            .process(0, &LinkFrame::can(0x7E0, vec![0x02, 0x10, 0x03, 0x55, 0x55, 0x55, 0x55, 0x55]))
            .unwrap()
            .unwrap();
        assert_eq!(report.message_type(), MessageType::SingleFrame);
        assert_eq!(&report.segment[..], &[0x10, 0x03]);
        assert!(report.reassembly.is_none());
        assert_eq!(report.dispatched, Some(DispatchTarget::Decoder("accepting".into())));
        assert_eq!(session.statistics().single_frames, 1);
        assert_eq!(session.statistics().dispatched_to_decoder, 1);
    }

    #[test]
    fn test_unselected_frame() {
        let mut session = Session::new(config(), Dispatcher::new());
        assert!(session
            .process(0, &LinkFrame::can(0x100, vec![0x02, 0x10, 0x03]))
            .unwrap()
            .is_none());
        assert_eq!(session.statistics().frames_processed, 0);
    }

    #[test]
    fn test_malformed_frame_is_counted() {
        let mut session = Session::new(config(), Dispatcher::new());
        let err = session
            .process(0, &LinkFrame::can(0x7E0, vec![0x90, 0x00]))
            .unwrap_err();
        assert!(err.is_malformed_frame());
        assert_eq!(session.statistics().malformed_frames, 1);

        // the session carries on
        assert!(session
            .process(1, &LinkFrame::can(0x7E0, vec![0x01, 0x3E]))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_flow_control_is_not_dispatched() {
        let mut session = Session::new(config(), Dispatcher::new());
        let report = session
            .process(0, &LinkFrame::can(0x7E0, vec![0x30, 0x00, 0xF3]))
            .unwrap()
            .unwrap();
        assert!(report.dispatched.is_none());
        assert!(report.segment.is_empty());
        assert_eq!(session.statistics().flow_control_frames, 1);
        assert!(session.dispatcher().sink().is_empty());
    }

    #[test]
    fn test_reconfigure_and_reset() {
        let mut session = Session::new(config(), Dispatcher::new());
        session
            .process(0, &LinkFrame::can(0x7E0, vec![0x10, 0x14, 1, 2, 3, 4, 5, 6]))
            .unwrap();

        let mut narrower = (**session.config()).clone();
        narrower.window = 2;
        session.reconfigure(Arc::new(narrower));
        assert_eq!(session.engine().window(), 2);

        let report = session
            .process(1, &LinkFrame::can(0x7E0, vec![0x24, 0, 0, 0, 0, 0, 0, 0]))
            .unwrap()
            .unwrap();
        assert!(matches!(report.reassembly, Some(ReassemblyOutcome::Errored(_))));
        assert_eq!(session.statistics().messages_errored, 1);

        session.reset();
        assert_eq!(session.statistics(), &SessionStatistics::default());
        assert!(!session.engine().is_visited(0));
    }
}
