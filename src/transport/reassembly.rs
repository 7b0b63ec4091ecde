use std::collections::HashMap;

use bytes::Bytes;
use log::{debug, error, trace, warn};

use crate::error::{IsoTpError, Result};
use crate::link::LinkIdentity;
use crate::transport::fragments::{FragmentKey, FragmentTable};
use crate::types::{FrameIndex, SequenceId};

/// Sequence numbers are a 4-bit counter
const SEQUENCE_MODULUS: u32 = 16;

/// Wraps one sequence value can take before its counter overflows
const MAX_WRAPS: u32 = u8::MAX as u32 + 1;

/// Lifecycle of a segmented message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    Open,
    Complete,
    Errored,
}

/// Reassembly bookkeeping of one segmented message.
///
/// Created by a first frame, advanced by the consecutive frames bound to it
/// and frozen once it is complete or errored.
#[derive(Debug, Clone)]
pub struct MessageSequence {
    pub id: SequenceId,
    pub link: LinkIdentity,
    pub first_frame: FrameIndex,
    pub expected_len: u32,
    accumulated: u64,
    max_seen: u32,
    wrap: [u8; SEQUENCE_MODULUS as usize],
    state: AssemblyState,
}

impl MessageSequence {
    fn new(id: SequenceId, link: LinkIdentity, first_frame: FrameIndex, expected_len: u32) -> Self {
        Self {
            id,
            link,
            first_frame,
            expected_len,
            accumulated: 0,
            max_seen: 0,
            wrap: [0; SEQUENCE_MODULUS as usize],
            state: AssemblyState::Open,
        }
    }

    pub fn state(&self) -> AssemblyState {
        self.state
    }

    /// Bytes taken into the message so far
    pub fn accumulated(&self) -> u64 {
        self.accumulated
    }

    /// Highest expanded fragment id accepted so far
    pub fn max_seen(&self) -> u32 {
        self.max_seen
    }

    /// Expands a 4-bit sequence number using the wrap counter of that value.
    ///
    /// On overflow the counter is left at its maximum.
    fn expand(&mut self, low: u8) -> Result<u32> {
        let slot = (low as u32 % SEQUENCE_MODULUS) as usize;
        let wraps = self.wrap[slot];
        self.wrap[slot] = wraps.checked_add(1).ok_or(IsoTpError::FragmentOverflow {
            sequence: self.id,
            low_id: low,
        })?;
        Ok(low as u32 % SEQUENCE_MODULUS + SEQUENCE_MODULUS * wraps as u32)
    }

    fn fail(&mut self) {
        self.state = AssemblyState::Errored;
    }
}

/// What happened to a fragment when it was first seen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentStatus {
    /// Taken into the message
    Accepted,
    /// Put the message into the errored state
    Rejected,
    /// Wrapped its sequence value past the counter limit
    Overflow,
    /// Arrived after the message had failed
    Ignored,
}

/// Binding of one frame to its message, fixed on the first pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameAssignment {
    pub sequence: SequenceId,
    /// Expanded fragment id (first frame is 0). An overflowing fragment
    /// records the id it would have had, `low + 16 * 256`.
    pub fragment: u32,
    /// Bytes this frame contributes, after trimming the final fragment
    pub len: usize,
    /// This frame reached the declared length
    pub last: bool,
    pub status: FragmentStatus,
}

/// Result of feeding a first or consecutive frame to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyOutcome {
    /// Consecutive frame with no open message on its link
    Orphaned,
    /// Fragment stored, message not complete yet
    Buffered(FrameAssignment),
    /// This frame completed the message
    Completed {
        assignment: FrameAssignment,
        payload: Bytes,
        declared_len: u32,
    },
    /// The declared length was reached but fragments are missing
    Incomplete(FrameAssignment),
    /// The fragment put the message out of its window
    Errored(FrameAssignment),
    /// The message had already failed
    Discarded(FrameAssignment),
}

impl ReassemblyOutcome {
    pub fn assignment(&self) -> Option<&FrameAssignment> {
        match self {
            ReassemblyOutcome::Orphaned => None,
            ReassemblyOutcome::Buffered(assignment)
            | ReassemblyOutcome::Incomplete(assignment)
            | ReassemblyOutcome::Errored(assignment)
            | ReassemblyOutcome::Discarded(assignment) => Some(assignment),
            ReassemblyOutcome::Completed { assignment, .. } => Some(assignment),
        }
    }
}

/// A segmented-message fragment handed to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    First { declared_len: u32 },
    Consecutive { sequence: u8 },
}

/// Tracks open messages, expands sequence numbers and rebuilds payloads.
///
/// Frames are identified by their index in the analyzed stream. The first
/// time an index is seen its fragment mutates the engine and the resulting
/// [`FrameAssignment`] is recorded; feeding the same index again only reads
/// that record, so a stream can be walked any number of times.
#[derive(Debug)]
pub struct ReassemblyEngine {
    window: u16,
    next_id: SequenceId,
    sequences: HashMap<SequenceId, MessageSequence>,
    bindings: HashMap<LinkIdentity, SequenceId>,
    assignments: HashMap<FrameIndex, Option<FrameAssignment>>,
    fragments: FragmentTable,
}

impl ReassemblyEngine {
    pub fn new(window: u16) -> Self {
        Self {
            window,
            next_id: 1,
            sequences: HashMap::new(),
            bindings: HashMap::new(),
            assignments: HashMap::new(),
            fragments: FragmentTable::new(),
        }
    }

    pub fn window(&self) -> u16 {
        self.window
    }

    /// Applies to fragments seen from now on
    pub fn set_window(&mut self, window: u16) {
        self.window = window;
    }

    pub fn sequence(&self, id: SequenceId) -> Option<&MessageSequence> {
        self.sequences.get(&id)
    }

    /// Message currently receiving consecutive frames on a link
    pub fn bound_sequence(&self, link: &LinkIdentity) -> Option<&MessageSequence> {
        self.bindings.get(link).and_then(|id| self.sequences.get(id))
    }

    pub fn assignment(&self, index: FrameIndex) -> Option<&FrameAssignment> {
        self.assignments.get(&index).and_then(Option::as_ref)
    }

    pub fn is_visited(&self, index: FrameIndex) -> bool {
        self.assignments.contains_key(&index)
    }

    pub fn fragments(&self) -> &FragmentTable {
        &self.fragments
    }

    /// Feeds one fragment; `payload` is the segment carried by the frame.
    pub fn push(
        &mut self,
        index: FrameIndex,
        link: LinkIdentity,
        segment: Segment,
        payload: Bytes,
    ) -> Result<ReassemblyOutcome> {
        if let Some(recorded) = self.assignments.get(&index).copied() {
            return self.replay(index, recorded);
        }

        let sequence = match segment {
            Segment::First { declared_len } => self.open(index, link, declared_len),
            Segment::Consecutive { .. } => match self.bindings.get(&link) {
                Some(&id) => id,
                None => {
                    trace!("Orphan consecutive frame {} on {:?}", index, link);
                    self.assignments.insert(index, None);
                    return Ok(ReassemblyOutcome::Orphaned);
                }
            },
        };
        let low = match segment {
            Segment::First { .. } => 0,
            Segment::Consecutive { sequence } => sequence,
        };
        self.accept(index, sequence, low, payload)
    }

    fn open(&mut self, index: FrameIndex, link: LinkIdentity, declared_len: u32) -> SequenceId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);

        if let Some(previous) = self.bindings.insert(link, id) {
            if let Some(seq) = self
                .sequences
                .get_mut(&previous)
                .filter(|seq| seq.state == AssemblyState::Open)
            {
                seq.fail();
                let dropped = self.fragments.discard(previous);
                debug!(
                    "Message {} superseded by {} before completion, {} fragments dropped",
                    previous, id, dropped
                );
            }
        }
        debug!(
            "Message {} opened by frame {} ({} bytes declared)",
            id, index, declared_len
        );
        self.sequences
            .insert(id, MessageSequence::new(id, link, index, declared_len));
        id
    }

    fn accept(
        &mut self,
        index: FrameIndex,
        id: SequenceId,
        low: u8,
        payload: Bytes,
    ) -> Result<ReassemblyOutcome> {
        let window = self.window as u32;
        let seq = match self.sequences.get_mut(&id) {
            Some(seq) => seq,
            None => {
                self.assignments.insert(index, None);
                return Ok(ReassemblyOutcome::Orphaned);
            }
        };

        let mut assignment = FrameAssignment {
            sequence: id,
            fragment: low as u32,
            len: payload.len(),
            last: false,
            status: FragmentStatus::Ignored,
        };

        if seq.state == AssemblyState::Errored {
            trace!("Fragment of failed message {} ignored", id);
            self.assignments.insert(index, Some(assignment));
            return Ok(ReassemblyOutcome::Discarded(assignment));
        }

        let fragment = match seq.expand(low) {
            Ok(fragment) => fragment,
            Err(e) => {
                error!("{}", e);
                seq.fail();
                assignment.fragment = low as u32 % SEQUENCE_MODULUS + SEQUENCE_MODULUS * MAX_WRAPS;
                assignment.status = FragmentStatus::Overflow;
                self.assignments.insert(index, Some(assignment));
                self.fragments.discard(id);
                return Err(e);
            }
        };
        assignment.fragment = fragment;

        if fragment > seq.max_seen.saturating_add(window) {
            warn!(
                "Message {}: fragment {} outside window (highest {}, window {})",
                id, fragment, seq.max_seen, window
            );
            seq.fail();
            assignment.status = FragmentStatus::Rejected;
            self.assignments.insert(index, Some(assignment));
            self.fragments.discard(id);
            return Ok(ReassemblyOutcome::Errored(assignment));
        }
        seq.max_seen = seq.max_seen.max(fragment);

        let mut len = payload.len();
        seq.accumulated += len as u64;
        if seq.accumulated >= seq.expected_len as u64 {
            let excess = (seq.accumulated - seq.expected_len as u64) as usize;
            len -= excess.min(len);
            seq.accumulated = seq.expected_len as u64;
            seq.state = AssemblyState::Complete;
            assignment.last = true;
        }
        assignment.len = len;
        assignment.status = FragmentStatus::Accepted;
        let declared_len = seq.expected_len;
        let link = seq.link;

        if assignment.last && self.bindings.get(&link) == Some(&id) {
            self.bindings.remove(&link);
        }
        self.assignments.insert(index, Some(assignment));

        let key = FragmentKey::new(id, fragment);
        match self
            .fragments
            .add(key, index, payload.slice(..len), !assignment.last)
        {
            Some(reassembled) => {
                debug!(
                    "Message {} complete in frame {} ({} bytes)",
                    id,
                    index,
                    reassembled.payload.len()
                );
                Ok(ReassemblyOutcome::Completed {
                    assignment,
                    payload: reassembled.payload.clone(),
                    declared_len,
                })
            }
            None if assignment.last => {
                warn!(
                    "Message {} reached {} bytes with fragments missing: {:?}",
                    id,
                    declared_len,
                    self.fragments.missing(id)
                );
                Ok(ReassemblyOutcome::Incomplete(assignment))
            }
            None => Ok(ReassemblyOutcome::Buffered(assignment)),
        }
    }

    fn replay(
        &self,
        index: FrameIndex,
        recorded: Option<FrameAssignment>,
    ) -> Result<ReassemblyOutcome> {
        let assignment = match recorded {
            Some(assignment) => assignment,
            None => return Ok(ReassemblyOutcome::Orphaned),
        };
        match assignment.status {
            FragmentStatus::Rejected => return Ok(ReassemblyOutcome::Errored(assignment)),
            FragmentStatus::Ignored => return Ok(ReassemblyOutcome::Discarded(assignment)),
            FragmentStatus::Overflow => {
                return Err(IsoTpError::FragmentOverflow {
                    sequence: assignment.sequence,
                    low_id: (assignment.fragment % SEQUENCE_MODULUS) as u8,
                })
            }
            FragmentStatus::Accepted => {}
        }
        let outcome = match self.fragments.reassembled(assignment.sequence) {
            Some(reassembled) if reassembled.reassembled_in == index => {
                ReassemblyOutcome::Completed {
                    assignment,
                    payload: reassembled.payload.clone(),
                    declared_len: self
                        .sequences
                        .get(&assignment.sequence)
                        .map_or(reassembled.payload.len() as u32, |seq| seq.expected_len),
                }
            }
            _ if assignment.last => ReassemblyOutcome::Incomplete(assignment),
            _ => ReassemblyOutcome::Buffered(assignment),
        };
        Ok(outcome)
    }

    /// Forgets every message, binding and recorded assignment
    pub fn reset(&mut self) {
        self.next_id = 1;
        self.sequences.clear();
        self.bindings.clear();
        self.assignments.clear();
        self.fragments.clear();
    }
}

impl Default for ReassemblyEngine {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_WINDOW)
    }
}
