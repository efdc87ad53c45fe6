//! Wire format stability tests.
//!
//! Each test packs a hand-built instance and asserts the exact bytes (as a
//! hex string), then parses those bytes back and checks the decoded fields.
//! If the wire format drifts, these fail first.

use std::sync::Arc;

use bytes::Bytes;
use satchel::{
    BitKind, BitRecord, CodecErrorKind, FieldKind, Instance, IntWidth, LengthCodec, Primitive,
    ProviderRef, Structure, Value,
};

fn to_hex(wire: &Bytes) -> String {
    hex::encode(wire)
}

#[test]
fn length_prefixed_echo() {
    let echo = Structure::builder("echo")
        .slot("frame_type", FieldKind::Primitive(Primitive::U8))
        .slot("len", FieldKind::length(Primitive::U16_BE))
        .slot("payload", FieldKind::payload("len"))
        .build()
        .expect("valid structure");

    let msg = Instance::new().with("frame_type", 0x10u64).with("payload", &b"hi"[..]);

    let wire = echo.pack(&msg).expect("should pack");
    assert_eq!(to_hex(&wire), "1000026869");

    let decoded = echo.unpack(&wire).expect("should unpack");
    assert_eq!(decoded.uint("frame_type"), Some(0x10));
    assert_eq!(decoded.uint("len"), Some(2));
    assert_eq!(decoded.bytes("payload").map(|b| b.as_ref()), Some(&b"hi"[..]));
}

#[test]
fn bit_record_field() {
    let record = BitRecord::new(
        IntWidth::W16,
        [
            ("a", BitKind::Num(4)),
            ("b", BitKind::Num(3)),
            ("c_flag", BitKind::Flag),
            ("d", BitKind::Num(8)),
        ],
    )
    .expect("valid record");
    let shape = Structure::builder("flags_frame")
        .slot("flags", FieldKind::Bits(record))
        .build()
        .expect("valid structure");

    let flags = Instance::new()
        .with("a", 0xAu64)
        .with("b", 0x5u64)
        .with("c_flag", true)
        .with("d", 0x7Fu64);
    let msg = Instance::new().with("flags", flags);

    let wire = shape.pack(&msg).expect("should pack");
    assert_eq!(to_hex(&wire), "ab7f");

    let decoded = shape.unpack(&wire).expect("should unpack");
    let flags = decoded.child("flags").expect("bit record decodes to a child instance");
    assert_eq!(flags.uint("a"), Some(0xA));
    assert_eq!(flags.uint("b"), Some(0x5));
    assert_eq!(flags.boolean("c_flag"), Some(true));
    assert_eq!(flags.uint("d"), Some(0x7F));
}

fn magic_dispatch_shape() -> Structure {
    let arm_a = Arc::new(
        Structure::builder("a")
            .slot("x", FieldKind::Primitive(Primitive::U16_BE))
            .build()
            .expect("valid arm"),
    );
    let arm_b = Arc::new(
        Structure::builder("b")
            .slot("y", FieldKind::Primitive(Primitive::U8))
            .slot("z", FieldKind::Primitive(Primitive::U8))
            .build()
            .expect("valid arm"),
    );
    Structure::builder("dispatched")
        .slot("magic", FieldKind::magic(&b"\xAA\x55"[..]))
        .slot("frame_type", FieldKind::Dispatch(Primitive::U8))
        .slot("body", FieldKind::target("frame_type", [(1, arm_a), (2, arm_b)]))
        .build()
        .expect("valid structure")
}

#[test]
fn magic_and_dispatch() {
    let shape = magic_dispatch_shape();

    let decoded = shape.unpack(&[0xAA, 0x55, 0x01, 0x00, 0x2A]).expect("should unpack");
    assert_eq!(decoded.uint("frame_type"), Some(1));
    let body = decoded.child("body").expect("dispatched body");
    assert_eq!(body.uint("x"), Some(42));

    let msg = Instance::new()
        .with("frame_type", 1u64)
        .with("body", Instance::new().with("x", 42u64));
    let wire = shape.pack(&msg).expect("should pack");
    assert_eq!(to_hex(&wire), "aa5501002a");
}

#[test]
fn unknown_dispatch_key() {
    let shape = magic_dispatch_shape();
    let err = shape.unpack(&[0xAA, 0x55, 0x07, 0x00, 0x2A]).unwrap_err();
    assert_eq!(err.kind(), &CodecErrorKind::UnknownDispatch { key: 7 });
    assert_eq!(err.path().to_string(), "body");
    assert_eq!(err.offset(), 3);
}

#[test]
fn greedy_payload_with_fixed_trailer() {
    let shape = Structure::builder("tailed")
        .slot("hdr", FieldKind::Primitive(Primitive::U8))
        .slot("tail", FieldKind::payload_greedy())
        .slot("trailer", FieldKind::Primitive(Primitive::U16_BE))
        .build()
        .expect("valid structure");

    let decoded = shape
        .unpack(&[0x01, 0xDE, 0xAD, 0xBE, 0xEF, 0x12, 0x34])
        .expect("should unpack");
    assert_eq!(decoded.uint("hdr"), Some(1));
    assert_eq!(
        decoded.bytes("tail").map(|b| b.as_ref()),
        Some(&[0xDE, 0xAD, 0xBE, 0xEF][..])
    );
    assert_eq!(decoded.uint("trailer"), Some(0x1234));

    // Too short to cover the fixed suffix after the greedy slot.
    let err = shape.unpack(&[0x01, 0xDE]).unwrap_err();
    assert_eq!(err.kind(), &CodecErrorKind::GreedyUnderflow { needed: 2, available: 1 });
    assert_eq!(err.path().to_string(), "tail");
}

#[test]
fn field_array_by_count() {
    let element = Arc::new(
        Structure::builder("pair")
            .slot("a", FieldKind::Primitive(Primitive::U8))
            .slot("b", FieldKind::Primitive(Primitive::U8))
            .build()
            .expect("valid element"),
    );
    let shape = Structure::builder("counted")
        .slot("n", FieldKind::length(Primitive::U8))
        .slot(
            "arr",
            FieldKind::Array {
                element,
                sizing: satchel::ArraySizing::Count(ProviderRef::slot("n")),
            },
        )
        .build()
        .expect("valid structure");

    let msg = Instance::new().with(
        "arr",
        Value::Array(vec![
            Value::Struct(Instance::new().with("a", 1u64).with("b", 2u64)),
            Value::Struct(Instance::new().with("a", 3u64).with("b", 4u64)),
        ]),
    );

    let wire = shape.pack(&msg).expect("should pack");
    assert_eq!(to_hex(&wire), "0201020304");

    let decoded = shape.unpack(&wire).expect("should unpack");
    assert_eq!(decoded.uint("n"), Some(2));
    let items = decoded.array("arr").expect("array decodes");
    assert_eq!(items.len(), 2);
    assert_eq!(items[1].as_struct().and_then(|e| e.uint("b")), Some(4));
}

#[test]
fn field_array_by_bytes_with_empty_region() {
    let element = Arc::new(
        Structure::builder("pair")
            .slot("a", FieldKind::Primitive(Primitive::U8))
            .slot("b", FieldKind::Primitive(Primitive::U8))
            .build()
            .expect("valid element"),
    );
    let shape = Structure::builder("measured")
        .slot("len", FieldKind::length(Primitive::U8))
        .slot(
            "arr",
            FieldKind::Array {
                element,
                sizing: satchel::ArraySizing::Bytes(ProviderRef::slot("len")),
            },
        )
        .build()
        .expect("valid structure");

    let decoded = shape.unpack(&[0x00]).expect("zero-length region is an empty array");
    assert_eq!(decoded.array("arr").map(<[Value]>::len), Some(0));

    // A 3-byte region ends mid-element.
    let err = shape.unpack(&[0x03, 0x01, 0x02, 0x03]).unwrap_err();
    assert_eq!(err.kind(), &CodecErrorKind::ArrayElementUnderflow { remaining: 1 });
    assert_eq!(err.path().to_string(), "arr");
}

#[test]
fn length_multiplier_transform() {
    // Length stored in 16-bit words.
    let shape = Structure::builder("worded")
        .slot("len", FieldKind::length_with(Primitive::U8, LengthCodec::multiplier(2)))
        .slot("payload", FieldKind::payload("len"))
        .build()
        .expect("valid structure");

    let msg = Instance::new().with("payload", &b"\x01\x02\x03\x04"[..]);
    let wire = shape.pack(&msg).expect("should pack");
    assert_eq!(to_hex(&wire), "0201020304");

    let decoded = shape.unpack(&wire).expect("should unpack");
    assert_eq!(decoded.uint("len"), Some(2), "stored value is in words");
    assert_eq!(decoded.bytes("payload").map(Bytes::len), Some(4));

    // An odd payload cannot be expressed in whole words.
    let odd = Instance::new().with("payload", &b"\x01\x02\x03"[..]);
    let err = shape.pack(&odd).unwrap_err();
    assert_eq!(err.kind(), &CodecErrorKind::LengthInconsistency { declared: 2, actual: 3 });
    assert_eq!(err.path().to_string(), "len");
}

#[test]
fn bit_slot_as_length_provider() {
    let header = BitRecord::new(
        IntWidth::W8,
        [("version", BitKind::Num(4)), ("len", BitKind::Num(4))],
    )
    .expect("valid record");
    let shape = Structure::builder("nibble_framed")
        .slot("hdr", FieldKind::Bits(header))
        .slot("payload", FieldKind::Payload { length: Some(ProviderRef::bit("hdr", "len")) })
        .build()
        .expect("valid structure");

    let msg = Instance::new()
        .with("hdr", Instance::new().with("version", 2u64))
        .with("payload", &b"abc"[..]);
    let wire = shape.pack(&msg).expect("should pack");
    assert_eq!(to_hex(&wire), "23616263");

    let decoded = shape.unpack(&wire).expect("should unpack");
    assert_eq!(decoded.child("hdr").and_then(|h| h.uint("version")), Some(2));
    assert_eq!(decoded.child("hdr").and_then(|h| h.uint("len")), Some(3));
    assert_eq!(decoded.bytes("payload").map(|b| b.as_ref()), Some(&b"abc"[..]));
}

#[test]
fn conditional_field_presence() {
    let shape = Structure::builder("optioned")
        .slot("flags", FieldKind::Primitive(Primitive::U8))
        .slot(
            "extra",
            FieldKind::conditional(
                |frame| frame.uint("flags").map(|flags| flags & 0x01 != 0),
                FieldKind::Primitive(Primitive::U16_BE),
            ),
        )
        .slot("end", FieldKind::Primitive(Primitive::U8))
        .build()
        .expect("valid structure");

    let with_extra = shape.unpack(&[0x01, 0x12, 0x34, 0xFF]).expect("should unpack");
    assert_eq!(with_extra.uint("extra"), Some(0x1234));
    assert_eq!(with_extra.uint("end"), Some(0xFF));

    let without = shape.unpack(&[0x00, 0xFF]).expect("should unpack");
    assert_eq!(without.uint("extra"), None);
    assert_eq!(without.uint("end"), Some(0xFF));

    let msg = Instance::new()
        .with("flags", 0x01u64)
        .with("extra", 0x1234u64)
        .with("end", 0xFFu64);
    assert_eq!(to_hex(&shape.pack(&msg).expect("should pack")), "011234ff");

    let plain = Instance::new().with("flags", 0x00u64).with("end", 0xFFu64);
    assert_eq!(to_hex(&shape.pack(&plain).expect("should pack")), "00ff");
}

#[test]
fn dependent_field_computed_at_pack_time() {
    let shape = Structure::builder("acked")
        .slot("seq", FieldKind::Primitive(Primitive::U16_BE))
        .slot(
            "ack",
            FieldKind::dependent("seq", Primitive::U16_BE, |seq| match seq {
                Value::UInt(v) => Value::UInt(v + 1),
                other => other.clone(),
            }),
        )
        .build()
        .expect("valid structure");

    let msg = Instance::new().with("seq", 0x0100u64);
    let wire = shape.pack(&msg).expect("should pack");
    assert_eq!(to_hex(&wire), "01000101");

    let decoded = shape.unpack(&wire).expect("should unpack");
    assert_eq!(decoded.uint("ack"), Some(0x0101));
}

#[test]
fn substructure_pascal_strings() {
    let pascal = Arc::new(
        Structure::builder("pascal16")
            .slot("len", FieldKind::length(Primitive::U16_BE))
            .slot("value", FieldKind::payload("len"))
            .build()
            .expect("valid structure"),
    );
    let name = Structure::builder("name")
        .slot("first", FieldKind::substruct(Arc::clone(&pascal)))
        .slot("last", FieldKind::substruct(pascal))
        .build()
        .expect("valid structure");

    let msg = Instance::new()
        .with("first", Instance::new().with("value", &b"Ada"[..]))
        .with("last", Instance::new().with("value", &b"Lovelace"[..]));

    let wire = name.pack(&msg).expect("should pack");
    assert_eq!(to_hex(&wire), "000341646100084c6f76656c616365");

    let decoded = name.unpack(&wire).expect("should unpack");
    assert_eq!(
        decoded.child("last").and_then(|l| l.bytes("value")).map(|b| b.as_ref()),
        Some(&b"Lovelace"[..])
    );
}

#[test]
fn trailing_bytes_are_rejected_at_top_level() {
    let shape = Structure::builder("single")
        .slot("v", FieldKind::Primitive(Primitive::U8))
        .build()
        .expect("valid structure");

    let err = shape.unpack(&[0x01, 0x02]).unwrap_err();
    assert!(matches!(err.kind(), CodecErrorKind::LengthInconsistency { declared: 2, actual: 1 }));

    let (decoded, consumed) = shape.unpack_partial(&[0x01, 0x02]).expect("partial unpack");
    assert_eq!(decoded.uint("v"), Some(1));
    assert_eq!(consumed, 1);
}

#[test]
fn magic_mismatch_reports_offset_and_bytes() {
    let shape = magic_dispatch_shape();
    let err = shape.unpack(&[0xAA, 0x56, 0x01, 0x00, 0x2A]).unwrap_err();
    assert_eq!(
        err.kind(),
        &CodecErrorKind::MagicMismatch { expected: vec![0xAA, 0x55], found: vec![0xAA, 0x56] }
    );
    assert_eq!(err.offset(), 0);
    assert_eq!(err.path().to_string(), "magic");
}

#[test]
fn deterministic_pack() {
    let shape = magic_dispatch_shape();
    let msg = Instance::new()
        .with("frame_type", 2u64)
        .with("body", Instance::new().with("y", 7u64).with("z", 8u64));
    let first = shape.pack(&msg).expect("should pack");
    let second = shape.pack(&msg).expect("should pack");
    assert_eq!(first, second);
    assert_eq!(to_hex(&first), "aa55020708");
}
