//! Wire frame round-trip and compatibility tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use bytes::{BufMut, Bytes, BytesMut};

use herald_core::codec::{decode_envelope, encode_envelope, WIRE_MAGIC, WIRE_VERSION};
use herald_core::compress::Algorithm;
use herald_core::{Envelope, Route};

fn full_envelope() -> Envelope<Bytes> {
    Envelope::new(
        "chat.msg",
        Route::multicast(["alice", "bob"])
            .excluding(["mallory"])
            .with_priority(200)
            .with_expiry_ms(1_999_999)
            .with_ack(),
        Bytes::from_static(b"hello world"),
    )
    .from_sender("carol")
    .with_tag("region", "eu")
    .with_tag("shard", "7")
}

#[test]
fn round_trip_full_envelope() {
    let env = full_envelope();
    let frame = encode_envelope(&env, Algorithm::Fast);

    let (back, algo) = decode_envelope(frame).expect("decode");
    assert_eq!(algo, Algorithm::Fast);
    assert_eq!(back.id(), env.id());
    assert_eq!(back.msg_type, "chat.msg");
    assert_eq!(back.sender.as_deref(), Some("carol"));
    assert_eq!(back.created_at_ms, env.created_at_ms);
    assert_eq!(back.tags.get("region").map(String::as_str), Some("eu"));
    assert_eq!(back.tags.get("shard").map(String::as_str), Some("7"));
    assert_eq!(back.payload(), Some(&Bytes::from_static(b"hello world")));

    assert_eq!(back.route.kind, env.route.kind);
    assert_eq!(back.route.targets, vec!["alice", "bob"]);
    assert_eq!(back.route.exclude, vec!["mallory"]);
    assert_eq!(back.route.priority, 200);
    assert_eq!(back.route.expires_at_ms, Some(1_999_999));
    assert!(back.route.require_ack);
    assert_eq!(back.route.hop_limit, env.route.hop_limit);
}

#[test]
fn round_trip_minimal_envelope() {
    let env: Envelope<Bytes> = Envelope::with_id("m-1", "ping", Route::broadcast(), None);
    let frame = encode_envelope(&env, Algorithm::None);

    let (back, algo) = decode_envelope(frame).expect("decode");
    assert_eq!(algo, Algorithm::None);
    assert_eq!(back.id(), "m-1");
    assert!(back.payload().is_none());
    assert!(back.sender.is_none());
    assert!(back.tags.is_empty());
    assert!(!back.route.require_ack);
}

#[test]
fn unknown_fields_are_skipped() {
    // A frame from a newer router may carry indexes this version has never
    // heard of; they must be ignored, not rejected.
    let env = full_envelope();
    let mut frame = BytesMut::from(encode_envelope(&env, Algorithm::None).as_ref());
    frame.put_u8(200); // unassigned index
    frame.put_u32_le(3);
    frame.put_slice(b"xyz");

    let (back, _) = decode_envelope(frame.freeze()).expect("decode with unknown field");
    assert_eq!(back.id(), env.id());
    assert_eq!(back.route.targets, env.route.targets);
}

#[test]
fn bad_magic_is_rejected() {
    let mut frame = BytesMut::from(encode_envelope(&full_envelope(), Algorithm::None).as_ref());
    frame[0] = WIRE_MAGIC.wrapping_add(1);
    let err = decode_envelope(frame.freeze()).expect_err("must fail");
    assert_eq!(err.code().as_str(), "DECODE");
}

#[test]
fn future_version_is_rejected() {
    let mut frame = BytesMut::from(encode_envelope(&full_envelope(), Algorithm::None).as_ref());
    frame[1] = WIRE_VERSION + 1;
    let err = decode_envelope(frame.freeze()).expect_err("must fail");
    assert_eq!(err.code().as_str(), "UNSUPPORTED_VERSION");
}

#[test]
fn truncated_frame_is_rejected() {
    let frame = encode_envelope(&full_envelope(), Algorithm::None);
    let cut = frame.slice(0..frame.len() - 4);
    let err = decode_envelope(cut).expect_err("must fail");
    assert_eq!(err.code().as_str(), "DECODE");
}

#[test]
fn missing_route_is_rejected() {
    let mut frame = BytesMut::new();
    frame.put_u8(WIRE_MAGIC);
    frame.put_u8(WIRE_VERSION);
    frame.put_u8(1); // id field
    frame.put_u32_le(3);
    frame.put_slice(b"m-2");
    frame.put_u8(2); // msg_type field
    frame.put_u32_le(4);
    frame.put_slice(b"ping");

    let err = decode_envelope(frame.freeze()).expect_err("must fail");
    assert_eq!(err.code().as_str(), "DECODE");
    assert!(err.to_string().contains("route"));
}

#[test]
fn empty_id_is_rejected() {
    let env: Envelope<Bytes> = Envelope::with_id("", "ping", Route::broadcast(), None);
    let frame = encode_envelope(&env, Algorithm::None);
    let err = decode_envelope(frame).expect_err("must fail");
    assert_eq!(err.code().as_str(), "DECODE");
}
