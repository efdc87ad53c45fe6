//! Unpacking arbitrary bytes must never panic, for any structure in the
//! fixture zoo. Successful parses must re-pack, and the framer must accept
//! the same bytes in arbitrary chunkings without panicking.

#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use satchel::{
    ArraySizing, BitKind, BitRecord, FieldKind, Framer, IntWidth, Primitive, ProviderRef,
    Structure,
};

fn shape_zoo() -> Vec<Arc<Structure>> {
    let pair = Arc::new(
        Structure::builder("pair")
            .slot("a", FieldKind::Primitive(Primitive::U8))
            .slot("b", FieldKind::Primitive(Primitive::I16_BE))
            .build()
            .expect("valid element"),
    );
    let flags = BitRecord::new(
        IntWidth::W8,
        [("version", BitKind::Num(3)), ("urgent", BitKind::Flag), ("len", BitKind::Num(4))],
    )
    .expect("valid record");

    vec![
        Arc::new(
            Structure::builder("echo")
                .slot("magic", FieldKind::magic(&b"\xAA\x55"[..]))
                .slot("len", FieldKind::length(Primitive::U16_BE))
                .slot("payload", FieldKind::payload("len"))
                .build()
                .expect("valid structure"),
        ),
        Arc::new(
            Structure::builder("tailed")
                .slot("hdr", FieldKind::Bits(flags))
                .slot("body", FieldKind::Payload { length: Some(ProviderRef::bit("hdr", "len")) })
                .slot("tail", FieldKind::payload_greedy())
                .slot("crc", FieldKind::Primitive(Primitive::U16_BE))
                .build()
                .expect("valid structure"),
        ),
        Arc::new(
            Structure::builder("counted")
                .slot("n", FieldKind::length(Primitive::U8))
                .slot(
                    "items",
                    FieldKind::Array {
                        element: pair,
                        sizing: ArraySizing::Count(ProviderRef::slot("n")),
                    },
                )
                .build()
                .expect("valid structure"),
        ),
    ]
}

fuzz_target!(|data: &[u8]| {
    for shape in shape_zoo() {
        match shape.unpack(data) {
            Ok(frame) => {
                let repacked = shape.pack(&frame).expect("a parsed frame should re-pack");
                let reparsed = shape.unpack(&repacked).expect("a re-packed frame should re-parse");
                assert_eq!(frame, reparsed, "round trip must be stable");
            },
            Err(_) => {},
        }

        // Framable structures also take the same bytes through the framer,
        // split at a data-derived point.
        if let Ok(mut framer) = Framer::new(Arc::clone(&shape), |_| {}) {
            let cut = data.first().copied().unwrap_or(0) as usize % (data.len() + 1);
            framer.feed(&data[..cut]);
            framer.feed(&data[cut..]);
        }
    }
});
