//! Stream framer behavior: resynchronization, dispatch framing, and
//! chunk-partition independence.

use std::{cell::RefCell, sync::Arc};

use proptest::prelude::*;
use satchel::{
    CodecErrorKind, FieldKind, Framer, FramerDiagnostic, Instance, Primitive, Structure,
};

fn magic_dispatch_shape() -> Arc<Structure> {
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
    Arc::new(
        Structure::builder("dispatched")
            .slot("magic", FieldKind::magic(&b"\xAA\x55"[..]))
            .slot("frame_type", FieldKind::Dispatch(Primitive::U8))
            .slot("body", FieldKind::target("frame_type", [(1, arm_a), (2, arm_b)]))
            .build()
            .expect("valid structure"),
    )
}

/// Feed `stream` split into the given chunks; collect frames and
/// diagnostics.
fn run(
    shape: &Arc<Structure>,
    chunks: &[&[u8]],
) -> (Vec<Instance>, Vec<FramerDiagnostic>) {
    let frames = RefCell::new(Vec::new());
    let diagnostics = RefCell::new(Vec::new());
    let mut framer = Framer::new(Arc::clone(shape), |frame| frames.borrow_mut().push(frame))
        .expect("framable structure")
        .with_error_callback(|d| diagnostics.borrow_mut().push(d));
    for chunk in chunks {
        framer.feed(chunk);
    }
    drop(framer);
    (frames.into_inner(), diagnostics.into_inner())
}

#[test]
fn resync_discards_garbage_then_delivers_in_order() {
    let shape = magic_dispatch_shape();
    let stream =
        [0x00, 0x99, 0xAA, 0x55, 0x02, 0x07, 0x08, 0xAA, 0x55, 0x01, 0x00, 0x01];
    let (frames, diagnostics) = run(&shape, &[&stream]);

    assert_eq!(diagnostics, vec![FramerDiagnostic::DiscardedBytes(2)]);
    assert_eq!(frames.len(), 2);

    assert_eq!(frames[0].uint("frame_type"), Some(2));
    let body = frames[0].child("body").expect("body");
    assert_eq!(body.uint("y"), Some(7));
    assert_eq!(body.uint("z"), Some(8));

    assert_eq!(frames[1].uint("frame_type"), Some(1));
    let body = frames[1].child("body").expect("body");
    assert_eq!(body.uint("x"), Some(1));
}

#[test]
fn unknown_dispatch_reports_and_resyncs() {
    let shape = magic_dispatch_shape();
    // First frame carries an unmapped key; the framer reports it, slips one
    // byte, and recovers the following valid frame.
    let stream = [0xAA, 0x55, 0x09, 0xAA, 0x55, 0x01, 0x00, 0x2A];
    let (frames, diagnostics) = run(&shape, &[&stream]);

    assert!(
        diagnostics.iter().any(|d| matches!(
            d,
            FramerDiagnostic::FrameError(e)
                if matches!(e.kind(), CodecErrorKind::UnknownDispatch { key: 9 })
        )),
        "expected an UnknownDispatch report, got {diagnostics:?}"
    );
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].child("body").and_then(|b| b.uint("x")), Some(42));
}

#[test]
fn magic_split_across_feeds() {
    let shape = magic_dispatch_shape();
    let (frames, diagnostics) = run(
        &shape,
        &[&[0x13, 0x37, 0xAA], &[0x55, 0x02], &[0x07], &[0x08]],
    );
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].child("body").and_then(|b| b.uint("y")), Some(7));
    assert_eq!(diagnostics, vec![FramerDiagnostic::DiscardedBytes(2)]);
}

#[test]
fn non_magic_structure_slips_one_byte_on_error() {
    let arm = Arc::new(
        Structure::builder("unit")
            .slot("v", FieldKind::Primitive(Primitive::U8))
            .build()
            .expect("valid arm"),
    );
    let shape = Arc::new(
        Structure::builder("keyed")
            .slot("frame_type", FieldKind::Dispatch(Primitive::U8))
            .slot("len", FieldKind::length(Primitive::U8))
            .slot(
                "body",
                FieldKind::Target {
                    dispatch: "frame_type".into(),
                    length: Some(satchel::ProviderRef::slot("len")),
                    arms: [(1u64, arm)].into_iter().collect(),
                    fallback: None,
                },
            )
            .build()
            .expect("valid structure"),
    );
    // An unmapped key (0xFF) sizes fine but fails in the drain; the framer
    // slips one byte and the very next offset parses as a valid frame.
    let stream = [0xFF, 0x01, 0x01, 0x01, 0x41];
    let (frames, diagnostics) = run(&shape, &[&stream]);

    assert!(
        diagnostics.iter().any(|d| matches!(
            d,
            FramerDiagnostic::FrameError(e)
                if matches!(e.kind(), CodecErrorKind::UnknownDispatch { key: 0xFF })
        )),
        "expected an UnknownDispatch report, got {diagnostics:?}"
    );
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].uint("frame_type"), Some(1));
    assert_eq!(frames[0].child("body").and_then(|b| b.uint("v")), Some(1));
}

proptest! {
    /// Feeding a frame sequence in any chunk partition yields the same
    /// frames and the same diagnostics as feeding it whole.
    #[test]
    fn chunk_partition_independence(
        payload_a in proptest::collection::vec(any::<u8>(), 0..32),
        // No 0xAA bytes, so the junk cannot fake a magic prefix.
        junk in proptest::collection::vec(0u8..0xAA, 0..8),
        cuts in proptest::collection::vec(0usize..64, 0..6),
    ) {
        let echo = Arc::new(
            Structure::builder("echo")
                .slot("magic", FieldKind::magic(&b"\xAA\x55"[..]))
                .slot("len", FieldKind::length(Primitive::U16_BE))
                .slot("payload", FieldKind::payload("len"))
                .build()
                .expect("valid structure"),
        );

        // junk, one frame, another frame back-to-back.
        let mut stream = Vec::new();
        stream.extend_from_slice(&junk);
        for payload in [&payload_a[..], b"ok"] {
            stream.extend_from_slice(b"\xAA\x55");
            stream.extend_from_slice(&(payload.len() as u16).to_be_bytes());
            stream.extend_from_slice(payload);
        }

        let (whole_frames, whole_diags) = run(&echo, &[&stream]);

        let mut cut_points: Vec<usize> =
            cuts.iter().map(|c| c % (stream.len() + 1)).collect();
        cut_points.sort_unstable();
        let mut chunks: Vec<&[u8]> = Vec::new();
        let mut start = 0;
        for cut in cut_points {
            chunks.push(&stream[start..cut.max(start)]);
            start = cut.max(start);
        }
        chunks.push(&stream[start..]);

        let (chunked_frames, chunked_diags) = run(&echo, &chunks);

        prop_assert_eq!(&whole_frames, &chunked_frames);
        prop_assert_eq!(&whole_diags, &chunked_diags);
        prop_assert_eq!(whole_frames.len(), 2);
    }
}
