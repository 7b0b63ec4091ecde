//! Hand-off of ISO-TP payloads to next-level decoders.
//!
//! Single frames and completely reassembled messages are passed on as a
//! [`ReassembledMessage`]. The [`Dispatcher`] selects a decoder:
//! - AUTOSAR PDU-Transport and I-PduM payloads first try a decoder registered
//!   for their PDU id
//! - otherwise the decoder registered for the link type is used
//!
//! A payload no decoder accepts is collected by the [`DataSink`] as raw data.
//!
//! # Examples
//!
//! ```rust
//! use bytes::Bytes;
//! use libisotp::application::{
//!     DecoderKey, DispatchTarget, Dispatcher, PayloadDecoder, ReassembledMessage,
//! };
//! use libisotp::link::LinkType;
//! use libisotp::types::AddressPair;
//!
//! struct Uds;
//!
//! impl PayloadDecoder for Uds {
//!     fn name(&self) -> &str {
//!         "uds"
//!     }
//!
//!     fn decode(&mut self, message: &ReassembledMessage) -> bool {
//!         // accept positive responses only
//!         message.payload.first().map_or(false, |sid| sid & 0x40 != 0)
//!     }
//! }
//!
//! let mut dispatcher = Dispatcher::new();
//! dispatcher.register(DecoderKey::Link(LinkType::Can), Box::new(Uds));
//!
//! let message = ReassembledMessage {
//!     payload: Bytes::from_static(&[0x50, 0x03]),
//!     addresses: AddressPair::none(),
//!     link_type: LinkType::Can,
//!     id: 0x7E8,
//!     declared_len: 2,
//!     sequence: None,
//! };
//! assert_eq!(dispatcher.dispatch(message), DispatchTarget::Decoder("uds".into()));
//! ```

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use log::trace;

use crate::link::LinkType;
use crate::types::{AddressPair, LinkId, SequenceId};

/// A complete ISO-TP payload and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassembledMessage {
    pub payload: Bytes,
    pub addresses: AddressPair,
    pub link_type: LinkType,
    pub id: LinkId,
    /// Length announced by the single or first frame
    pub declared_len: u32,
    /// Set for messages rebuilt from several frames
    pub sequence: Option<SequenceId>,
}

impl ReassembledMessage {
    pub fn is_segmented(&self) -> bool {
        self.sequence.is_some()
    }
}

/// Next-level decoder of ISO-TP payloads
pub trait PayloadDecoder: Send {
    fn name(&self) -> &str;

    /// Returns false if the payload is not for this decoder
    fn decode(&mut self, message: &ReassembledMessage) -> bool;
}

/// Registration key of a decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecoderKey {
    /// Default decoder of a link type
    Link(LinkType),
    /// Decoder of one AUTOSAR PDU id
    Pdu(u32),
}

/// Where a payload ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchTarget {
    Decoder(String),
    Data,
}

impl fmt::Display for DispatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchTarget::Decoder(name) => f.write_str(name),
            DispatchTarget::Data => f.write_str("data"),
        }
    }
}

/// Collects payloads no decoder accepted.
///
/// Nothing is dropped on its own. Every pass over a stream hands its complete
/// messages on again, so callers that walk a stream more than once should
/// [`take`](DataSink::take) the collected messages between passes.
#[derive(Debug, Default)]
pub struct DataSink {
    messages: Vec<ReassembledMessage>,
}

impl DataSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ReassembledMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ReassembledMessage] {
        &self.messages
    }

    /// Removes and returns everything collected so far
    pub fn take(&mut self) -> Vec<ReassembledMessage> {
        std::mem::take(&mut self.messages)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Routes complete payloads to registered decoders
#[derive(Default)]
pub struct Dispatcher {
    decoders: HashMap<DecoderKey, Box<dyn PayloadDecoder>>,
    sink: DataSink,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let decoders: Vec<_> = self
            .decoders
            .iter()
            .map(|(key, decoder)| (*key, decoder.name().to_string()))
            .collect();
        f.debug_struct("Dispatcher")
            .field("decoders", &decoders)
            .field("sink", &self.sink)
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a decoder, returning the one it replaces
    pub fn register(
        &mut self,
        key: DecoderKey,
        decoder: Box<dyn PayloadDecoder>,
    ) -> Option<Box<dyn PayloadDecoder>> {
        self.decoders.insert(key, decoder)
    }

    pub fn unregister(&mut self, key: &DecoderKey) -> Option<Box<dyn PayloadDecoder>> {
        self.decoders.remove(key)
    }

    /// Keys tried for a payload, most specific first
    fn candidates(message: &ReassembledMessage) -> Vec<DecoderKey> {
        match message.link_type {
            LinkType::PduTransport | LinkType::Ipdum => vec![
                DecoderKey::Pdu(message.id),
                DecoderKey::Link(message.link_type),
            ],
            link_type => vec![DecoderKey::Link(link_type)],
        }
    }

    /// Hands the payload to the first decoder accepting it, else to the data sink
    pub fn dispatch(&mut self, message: ReassembledMessage) -> DispatchTarget {
        for key in Self::candidates(&message) {
            if let Some(decoder) = self.decoders.get_mut(&key) {
                if decoder.decode(&message) {
                    trace!("Payload of {} {:#x} decoded by {}", message.link_type, message.id, decoder.name());
                    return DispatchTarget::Decoder(decoder.name().to_string());
                }
                trace!("{} declined payload of {} {:#x}", decoder.name(), message.link_type, message.id);
            }
        }
        self.sink.push(message);
        DispatchTarget::Data
    }

    pub fn sink(&self) -> &DataSink {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut DataSink {
        &mut self.sink
    }
}

#[cfg(test)]
mod tests;
