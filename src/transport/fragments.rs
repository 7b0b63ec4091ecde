//! Fragment buffering and reassembly.
//!
//! Fragments are stored per message under their expanded fragment id, so
//! they may arrive out of order. A message is rebuilt once its terminal
//! fragment is known and every id from 0 up to it is present. The result is
//! kept together with the frame it was completed in, so that looking it up
//! again returns the same bytes.

use std::collections::{BTreeMap, HashMap};

use bytes::{Bytes, BytesMut};
use log::trace;

use crate::types::{FrameIndex, SequenceId};

/// Location of one fragment: its message and its expanded fragment id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentKey {
    pub sequence: SequenceId,
    pub fragment: u32,
}

impl FragmentKey {
    pub fn new(sequence: SequenceId, fragment: u32) -> Self {
        Self { sequence, fragment }
    }
}

/// A message rebuilt from its fragments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassembled {
    pub payload: Bytes,
    /// Frame whose fragment completed the message
    pub reassembled_in: FrameIndex,
    pub fragment_count: usize,
}

#[derive(Debug, Default)]
struct PendingMessage {
    fragments: BTreeMap<u32, Bytes>,
    last: Option<u32>,
}

impl PendingMessage {
    fn is_complete(&self) -> bool {
        match self.last {
            Some(last) => (0..=last).all(|id| self.fragments.contains_key(&id)),
            None => false,
        }
    }

    fn concatenate(&self) -> Bytes {
        let total = self.fragments.values().map(Bytes::len).sum();
        let mut payload = BytesMut::with_capacity(total);
        for fragment in self.fragments.values() {
            payload.extend_from_slice(fragment);
        }
        payload.freeze()
    }
}

/// Fragment buffer for every open message of a session
#[derive(Debug, Default)]
pub struct FragmentTable {
    pending: HashMap<SequenceId, PendingMessage>,
    reassembled: HashMap<SequenceId, Reassembled>,
}

impl FragmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a fragment; `more` is false for the terminal fragment.
    ///
    /// Returns the rebuilt message when this fragment completes it. A
    /// fragment id that is already present keeps its first copy.
    pub fn add(
        &mut self,
        key: FragmentKey,
        frame_index: FrameIndex,
        data: Bytes,
        more: bool,
    ) -> Option<&Reassembled> {
        if self.reassembled.contains_key(&key.sequence) {
            trace!(
                "Fragment {} of message {} arrived after reassembly",
                key.fragment,
                key.sequence
            );
            return None;
        }

        let pending = self.pending.entry(key.sequence).or_default();
        if pending.fragments.contains_key(&key.fragment) {
            trace!(
                "Duplicate fragment {} of message {} ignored",
                key.fragment,
                key.sequence
            );
        } else {
            pending.fragments.insert(key.fragment, data);
        }
        if !more {
            pending.last = Some(key.fragment);
        }
        if !pending.is_complete() {
            return None;
        }

        let pending = self.pending.remove(&key.sequence)?;
        let reassembled = Reassembled {
            payload: pending.concatenate(),
            reassembled_in: frame_index,
            fragment_count: pending.fragments.len(),
        };
        trace!(
            "Message {} reassembled in frame {} from {} fragments",
            key.sequence,
            frame_index,
            reassembled.fragment_count
        );
        self.reassembled.insert(key.sequence, reassembled);
        self.reassembled.get(&key.sequence)
    }

    pub fn reassembled(&self, sequence: SequenceId) -> Option<&Reassembled> {
        self.reassembled.get(&sequence)
    }

    /// Number of fragments buffered for a message still being assembled
    pub fn buffered(&self, sequence: SequenceId) -> usize {
        self.pending
            .get(&sequence)
            .map(|pending| pending.fragments.len())
            .unwrap_or(0)
    }

    /// Fragment ids still missing below the terminal (or highest buffered) fragment
    pub fn missing(&self, sequence: SequenceId) -> Vec<u32> {
        match self.pending.get(&sequence) {
            Some(pending) => {
                let upper = pending
                    .last
                    .or_else(|| pending.fragments.keys().next_back().copied())
                    .unwrap_or(0);
                (0..=upper)
                    .filter(|id| !pending.fragments.contains_key(id))
                    .collect()
            }
            None => Vec::new(),
        }
    }

    /// Drops the buffered fragments of a message
    pub fn discard(&mut self, sequence: SequenceId) -> usize {
        self.pending
            .remove(&sequence)
            .map(|pending| pending.fragments.len())
            .unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.reassembled.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(data: &[u8]) -> Bytes {
        Bytes::copy_from_slice(data)
    }

    #[test]
    fn test_in_order_reassembly() {
        let mut table = FragmentTable::new();
        assert!(table.add(FragmentKey::new(1, 0), 10, bytes(&[1, 2]), true).is_none());
        assert!(table.add(FragmentKey::new(1, 1), 11, bytes(&[3, 4]), true).is_none());
        let done = table
            .add(FragmentKey::new(1, 2), 12, bytes(&[5]), false)
            .cloned()
            .unwrap();
        assert_eq!(&done.payload[..], &[1, 2, 3, 4, 5]);
        assert_eq!(done.reassembled_in, 12);
        assert_eq!(done.fragment_count, 3);
        assert_eq!(table.buffered(1), 0);
        assert_eq!(table.reassembled(1), Some(&done));
    }

    #[test]
    fn test_out_of_order_reassembly() {
        let mut table = FragmentTable::new();
        table.add(FragmentKey::new(7, 0), 1, bytes(&[0xA0]), true);
        assert!(table.add(FragmentKey::new(7, 2), 2, bytes(&[0xA2]), false).is_none());
        assert_eq!(table.missing(7), vec![1]);
        let done = table.add(FragmentKey::new(7, 1), 3, bytes(&[0xA1]), true).unwrap();
        assert_eq!(&done.payload[..], &[0xA0, 0xA1, 0xA2]);
        assert_eq!(done.reassembled_in, 3);
    }

    #[test]
    fn test_duplicate_keeps_first_copy() {
        let mut table = FragmentTable::new();
        table.add(FragmentKey::new(2, 0), 1, bytes(&[1]), true);
        table.add(FragmentKey::new(2, 0), 2, bytes(&[9]), true);
        assert_eq!(table.buffered(2), 1);
        let done = table.add(FragmentKey::new(2, 1), 3, bytes(&[2]), false).unwrap();
        assert_eq!(&done.payload[..], &[1, 2]);
    }

    #[test]
    fn test_sequences_are_independent() {
        let mut table = FragmentTable::new();
        table.add(FragmentKey::new(1, 0), 1, bytes(&[1]), true);
        table.add(FragmentKey::new(2, 0), 2, bytes(&[2]), true);
        assert_eq!(table.discard(1), 1);
        assert_eq!(table.buffered(2), 1);
        let done = table.add(FragmentKey::new(2, 1), 3, bytes(&[3]), false).unwrap();
        assert_eq!(&done.payload[..], &[2, 3]);
        assert!(table.reassembled(1).is_none());
    }

    #[test]
    fn test_late_fragment_is_ignored() {
        let mut table = FragmentTable::new();
        table.add(FragmentKey::new(1, 0), 1, bytes(&[1]), false);
        assert!(table.add(FragmentKey::new(1, 1), 2, bytes(&[2]), false).is_none());
        assert_eq!(&table.reassembled(1).unwrap().payload[..], &[1]);

        table.clear();
        assert!(table.reassembled(1).is_none());
    }
}
