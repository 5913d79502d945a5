use proptest::collection::vec;
use proptest::prelude::*;
use tandem_protocol::{
    decode, encode, encode_into, FrameDecoder, FramingError, MessageId, RemoteFault, Request,
    Response, RpcMessage,
};
use uuid::Uuid;

fn message_id() -> impl Strategy<Value = MessageId> {
    any::<u128>().prop_map(|bits| MessageId::from_uuid(Uuid::from_u128(bits)))
}

fn name() -> impl Strategy<Value = String> {
    prop_oneof![
        "[A-Za-z][A-Za-z0-9_.]{0,40}",
        // Exercise multi-byte length prefixes and non-ASCII text.
        "\\PC{120,200}",
    ]
}

fn buffer() -> impl Strategy<Value = Vec<u8>> {
    vec(any::<u8>(), 0..300)
}

fn request() -> impl Strategy<Value = RpcMessage> {
    (name(), name(), message_id(), vec(buffer(), 0..6)).prop_map(
        |(service, method, id, args)| RpcMessage::Request(Request::new(service, method, id, args)),
    )
}

fn response() -> impl Strategy<Value = RpcMessage> {
    (
        name(),
        name(),
        message_id(),
        proptest::option::of(buffer()),
        proptest::option::of(".{0,80}"),
    )
        .prop_map(|(service_name, method_name, message_id, payload, fault)| {
            RpcMessage::Response(Response {
                service_name,
                method_name,
                message_id,
                payload,
                fault: fault.map(RemoteFault::new),
            })
        })
}

fn message() -> impl Strategy<Value = RpcMessage> {
    prop_oneof![request(), response(), Just(RpcMessage::KeepAlive)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn decode_inverts_encode(msg in message()) {
        let bytes = encode(&msg).unwrap();
        prop_assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn stream_split_anywhere_yields_same_messages(
        messages in vec(message(), 1..8),
        chunk in 1usize..64,
    ) {
        let mut stream = Vec::new();
        for m in &messages {
            encode_into(m, &mut stream).unwrap();
        }

        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();
        for piece in stream.chunks(chunk) {
            decoder.extend(piece);
            decoded.extend(decoder.drain_messages().unwrap());
        }

        prop_assert_eq!(decoded, messages);
        prop_assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn every_strict_prefix_is_incomplete(msg in message()) {
        let bytes = encode(&msg).unwrap();
        for cut in 0..bytes.len() {
            let err = decode(&bytes[..cut]).unwrap_err();
            prop_assert!(err.is_incomplete(), "cut at {}: {:?}", cut, err);
        }
    }

    #[test]
    fn arbitrary_bytes_never_panic(bytes in vec(any::<u8>(), 0..512)) {
        let mut decoder = FrameDecoder::with_max_frame_len(1024);
        decoder.extend(&bytes);
        while let Ok(Some(_)) = decoder.next_message() {}
        let _ = decode(&bytes);
    }
}

#[test]
fn corrupt_type_byte_is_rejected() {
    let request = RpcMessage::Request(Request::new("Svc", "Call", MessageId::new(), vec![]));
    let mut bytes = encode(&request).unwrap();
    bytes[4] = 0x7f;
    assert_eq!(decode(&bytes), Err(FramingError::UnknownMessageType(0x7f)));
}
