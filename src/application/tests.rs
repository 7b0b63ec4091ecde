use super::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

struct CountingDecoder {
    name: &'static str,
    accept: bool,
    calls: Arc<AtomicU32>,
}

impl CountingDecoder {
    fn new(name: &'static str, accept: bool) -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Self {
                name,
                accept,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl PayloadDecoder for CountingDecoder {
    fn name(&self) -> &str {
        self.name
    }

    fn decode(&mut self, _message: &ReassembledMessage) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.accept
    }
}

fn message(link_type: LinkType, id: u32) -> ReassembledMessage {
    ReassembledMessage {
        payload: Bytes::from_static(&[0x62, 0xF1, 0x90]),
        addresses: AddressPair::single(0x10),
        link_type,
        id,
        declared_len: 3,
        sequence: None,
    }
}

#[test]
fn test_missing_decoder_goes_to_data() {
    let mut dispatcher = Dispatcher::new();
    let target = dispatcher.dispatch(message(LinkType::Can, 0x7E8));
    assert_eq!(target, DispatchTarget::Data);
    assert_eq!(dispatcher.sink().len(), 1);
    assert_eq!(dispatcher.sink().messages()[0].id, 0x7E8);
}

#[test]
fn test_link_decoder() {
    let mut dispatcher = Dispatcher::new();
    let (decoder, calls) = CountingDecoder::new("uds", true);
    dispatcher.register(DecoderKey::Link(LinkType::Can), Box::new(decoder));

    let target = dispatcher.dispatch(message(LinkType::Can, 0x7E8));
    assert_eq!(target, DispatchTarget::Decoder("uds".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(dispatcher.sink().is_empty());

    // CAN-FD has its own key
    assert_eq!(dispatcher.dispatch(message(LinkType::CanFd, 0x7E8)), DispatchTarget::Data);
}

#[test]
fn test_declining_decoder_falls_back_to_data() {
    let mut dispatcher = Dispatcher::new();
    let (decoder, calls) = CountingDecoder::new("picky", false);
    dispatcher.register(DecoderKey::Link(LinkType::Lin), Box::new(decoder));

    assert_eq!(dispatcher.dispatch(message(LinkType::Lin, 0x3D)), DispatchTarget::Data);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.sink_mut().take().len(), 1);
    assert!(dispatcher.sink().is_empty());
}

#[test]
fn test_pdu_decoder_takes_precedence() {
    let mut dispatcher = Dispatcher::new();
    let (pdu_decoder, pdu_calls) = CountingDecoder::new("pdu-42", true);
    let (link_decoder, link_calls) = CountingDecoder::new("pdu-default", true);
    dispatcher.register(DecoderKey::Pdu(42), Box::new(pdu_decoder));
    dispatcher.register(DecoderKey::Link(LinkType::PduTransport), Box::new(link_decoder));

    assert_eq!(
        dispatcher.dispatch(message(LinkType::PduTransport, 42)),
        DispatchTarget::Decoder("pdu-42".to_string())
    );
    assert_eq!(
        dispatcher.dispatch(message(LinkType::PduTransport, 43)),
        DispatchTarget::Decoder("pdu-default".to_string())
    );
    assert_eq!(pdu_calls.load(Ordering::SeqCst), 1);
    assert_eq!(link_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_pdu_decoder_declines_then_link_default() {
    let mut dispatcher = Dispatcher::new();
    let (pdu_decoder, _) = CountingDecoder::new("pdu-7", false);
    let (link_decoder, _) = CountingDecoder::new("ipdum-default", true);
    dispatcher.register(DecoderKey::Pdu(7), Box::new(pdu_decoder));
    dispatcher.register(DecoderKey::Link(LinkType::Ipdum), Box::new(link_decoder));

    assert_eq!(
        dispatcher.dispatch(message(LinkType::Ipdum, 7)),
        DispatchTarget::Decoder("ipdum-default".to_string())
    );
}

#[test]
fn test_pdu_keys_ignored_for_can() {
    let mut dispatcher = Dispatcher::new();
    let (decoder, calls) = CountingDecoder::new("pdu-0x7e8", true);
    dispatcher.register(DecoderKey::Pdu(0x7E8), Box::new(decoder));

    assert_eq!(dispatcher.dispatch(message(LinkType::Can, 0x7E8)), DispatchTarget::Data);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_register_replaces_and_unregister() {
    let mut dispatcher = Dispatcher::new();
    let key = DecoderKey::Link(LinkType::FlexRay);
    let (first, _) = CountingDecoder::new("first", true);
    let (second, _) = CountingDecoder::new("second", true);
    assert!(dispatcher.register(key, Box::new(first)).is_none());
    let replaced = dispatcher.register(key, Box::new(second)).unwrap();
    assert_eq!(replaced.name(), "first");

    assert_eq!(dispatcher.unregister(&key).unwrap().name(), "second");
    assert_eq!(dispatcher.dispatch(message(LinkType::FlexRay, 1)), DispatchTarget::Data);
    assert_eq!(DispatchTarget::Data.to_string(), "data");
}
