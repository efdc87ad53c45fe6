//! Data-driven schema definitions compile to the same wire format as
//! builder-declared structures (feature `serde`).

#![cfg(feature = "serde")]

use satchel::{schema::StructureDef, FieldKind, Instance, Primitive, Structure};

#[test]
fn json_definition_matches_builder_declaration() {
    let def: StructureDef = serde_json::from_str(
        r#"{
            "name": "echo",
            "slots": [
                { "name": "frame_type", "field": { "type": "uint", "bits": 8 } },
                { "name": "len", "field": { "type": "length", "bits": 16 } },
                { "name": "payload", "field": { "type": "payload", "length": { "field": "len" } } }
            ]
        }"#,
    )
    .expect("well-formed definition");
    let from_json = Structure::try_from(def).expect("valid schema");

    let from_builder = Structure::builder("echo")
        .slot("frame_type", FieldKind::Primitive(Primitive::U8))
        .slot("len", FieldKind::length(Primitive::U16_BE))
        .slot("payload", FieldKind::payload("len"))
        .build()
        .expect("valid structure");

    let msg = Instance::new().with("frame_type", 0x10u64).with("payload", &b"hi"[..]);
    assert_eq!(
        from_json.pack(&msg).expect("packs"),
        from_builder.pack(&msg).expect("packs"),
    );
}

#[test]
fn json_dispatch_with_nested_arms() {
    let def: StructureDef = serde_json::from_str(
        r#"{
            "name": "dispatched",
            "slots": [
                { "name": "magic", "field": { "type": "magic", "bytes": [170, 85] } },
                { "name": "frame_type", "field": { "type": "dispatch", "bits": 8 } },
                { "name": "body", "field": {
                    "type": "target",
                    "dispatch": "frame_type",
                    "arms": [
                        { "key": 1, "shape": { "name": "a", "slots": [
                            { "name": "x", "field": { "type": "uint", "bits": 16 } }
                        ] } },
                        { "key": 2, "shape": { "name": "b", "slots": [
                            { "name": "y", "field": { "type": "uint", "bits": 8 } },
                            { "name": "z", "field": { "type": "uint", "bits": 8 } }
                        ] } }
                    ]
                } }
            ]
        }"#,
    )
    .expect("well-formed definition");
    let shape = Structure::try_from(def).expect("valid schema");

    let decoded = shape.unpack(&[0xAA, 0x55, 0x01, 0x00, 0x2A]).expect("unpacks");
    assert_eq!(decoded.uint("frame_type"), Some(1));
    assert_eq!(decoded.child("body").and_then(|b| b.uint("x")), Some(42));
}

#[test]
fn json_bit_record_and_count_array() {
    let def: StructureDef = serde_json::from_str(
        r#"{
            "name": "sensor",
            "slots": [
                { "name": "hdr", "field": { "type": "bits", "width": 8, "slots": [
                    { "name": "version", "bits": 3 },
                    { "name": "urgent", "flag": true },
                    { "name": "count", "bits": 4 }
                ] } },
                { "name": "readings", "field": {
                    "type": "array",
                    "element": { "name": "reading", "slots": [
                        { "name": "v", "field": { "type": "int", "bits": 16 } }
                    ] },
                    "sizing": { "count": { "provider": { "field": "hdr", "bit": "count" } } }
                } }
            ]
        }"#,
    )
    .expect("well-formed definition");
    let shape = Structure::try_from(def).expect("valid schema");

    let decoded = shape.unpack(&[0b010_0_0010, 0x00, 0x05, 0xFF, 0xFB]).expect("unpacks");
    let hdr = decoded.child("hdr").expect("bit record");
    assert_eq!(hdr.uint("version"), Some(2));
    assert_eq!(hdr.uint("count"), Some(2));
    let readings = decoded.array("readings").expect("array");
    assert_eq!(readings[0].as_struct().and_then(|r| r.int("v")), Some(5));
    assert_eq!(readings[1].as_struct().and_then(|r| r.int("v")), Some(-5));
}

#[test]
fn unsupported_width_is_rejected() {
    let def: StructureDef = serde_json::from_str(
        r#"{
            "name": "bad",
            "slots": [ { "name": "v", "field": { "type": "uint", "bits": 12 } } ]
        }"#,
    )
    .expect("well-formed definition");
    let err = Structure::try_from(def).unwrap_err();
    assert_eq!(err, satchel::DeclarationError::UnsupportedWidth { bits: 12 });
}
