//! Incremental stream-to-frames state machine.
//!
//! A [`Framer`] owns a growable buffer and turns arbitrarily chunked input
//! into whole parsed frames, delivered to a callback in stream order. The
//! machine has four states:
//!
//! - `Hunt`: only when the structure's first slot is a magic constant. Scan
//!   for the magic, discarding bytes before it (reported as
//!   [`FramerDiagnostic::DiscardedBytes`]).
//! - `Sizing`: trial-walk the buffered prefix, decoding fixed slots until
//!   every length/dispatch provider needed for the total frame length has
//!   resolved. Running out of buffered bytes just means "wait for more".
//! - `Drain`: once the total is known, wait until that many bytes are
//!   buffered, unpack exactly that slice, deliver, and start over.
//! - `Fatal`: entered when the buffer exceeds the configured limit;
//!   further input is ignored.
//!
//! Per-frame errors (magic mismatch mid-frame, unknown dispatch key, length
//! inconsistency) are reported through the error callback, after which the
//! framer resynchronizes: it discards one byte and re-enters
//! `Hunt`/`Sizing`. `feed` returns only after processing everything it can,
//! so frame delivery order always matches byte order.
//!
//! Hunt-phase discards accumulate and are reported as a single
//! `DiscardedBytes` event when the magic is found, so the diagnostic stream
//! does not depend on how the input was chunked.
//!
//! Framing requires the total frame length to be determinable from a prefix,
//! which rules out greedy payloads and greedy arrays at the top level; this
//! is validated at construction. Dispatch targets and substructures without
//! a length provider are fine; they are sized by recursing into the
//! selected arm or inner structure.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::{
    errors::{CodecError, CodecErrorKind, DeclarationError, Result},
    field::{ArraySizing, Extent, FieldKind},
    structure::Structure,
    unpack::{self, unpack_structure},
    value::Instance,
};

/// Out-of-band events reported through the framer's error callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramerDiagnostic {
    /// Bytes discarded while hunting for the magic prefix or while
    /// resynchronizing after a frame error.
    DiscardedBytes(usize),
    /// A buffered frame failed to size or parse (the framer resyncs), or
    /// the buffer limit was exceeded (`FramerOverflow`; the framer is now
    /// fatal).
    FrameError(CodecError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Hunt,
    Sizing,
    Drain { total: usize },
    Fatal,
}

/// Incremental byte consumer producing whole frames.
pub struct Framer<'a> {
    shape: Arc<Structure>,
    on_frame: Box<dyn FnMut(Instance) + 'a>,
    on_error: Option<Box<dyn FnMut(FramerDiagnostic) + 'a>>,
    max_buffer: Option<usize>,
    magic: Option<Bytes>,
    buf: BytesMut,
    state: State,
    /// Hunt-phase discards not yet reported.
    pending_discard: usize,
}

impl<'a> Framer<'a> {
    /// Build a framer for `shape`, delivering each parsed frame to
    /// `on_frame`.
    ///
    /// # Errors
    ///
    /// `DeclarationError::UnsizableFrame` if the structure's total length
    /// cannot be determined from a fixed-size prefix (a greedy payload or
    /// greedy array reachable at the top level).
    pub fn new(
        shape: Arc<Structure>,
        on_frame: impl FnMut(Instance) + 'a,
    ) -> std::result::Result<Self, DeclarationError> {
        check_sizable(&shape)?;
        let magic = match shape.slots().first().map(crate::structure::Slot::kind) {
            Some(FieldKind::Magic(constant)) => Some(constant.clone()),
            _ => None,
        };
        let state = if magic.is_some() { State::Hunt } else { State::Sizing };
        Ok(Self {
            shape,
            on_frame: Box::new(on_frame),
            on_error: None,
            max_buffer: None,
            magic,
            buf: BytesMut::new(),
            state,
            pending_discard: 0,
        })
    }

    /// Install a callback for discard/error/overflow diagnostics. Without
    /// one, diagnostics are only logged.
    #[must_use]
    pub fn with_error_callback(mut self, on_error: impl FnMut(FramerDiagnostic) + 'a) -> Self {
        self.on_error = Some(Box::new(on_error));
        self
    }

    /// Cap the internal buffer. Exceeding the cap reports a
    /// `FramerOverflow` error and makes the framer fatal, guarding against
    /// a producer that withholds the sync magic forever.
    #[must_use]
    pub fn with_max_buffer(mut self, limit: usize) -> Self {
        self.max_buffer = Some(limit);
        self
    }

    /// True once the buffer limit has been exceeded; `feed` is inert.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.state == State::Fatal
    }

    /// Bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Feed a chunk of stream bytes, delivering every frame that completes.
    pub fn feed(&mut self, bytes: &[u8]) {
        if self.state == State::Fatal {
            return;
        }
        self.buf.extend_from_slice(bytes);
        loop {
            match self.state {
                State::Hunt => {
                    let Some(magic) = self.magic.clone() else {
                        self.state = State::Sizing;
                        continue;
                    };
                    match find(&self.buf, &magic) {
                        Some(at) => {
                            if at > 0 {
                                let _ = self.buf.split_to(at);
                                self.pending_discard += at;
                            }
                            self.flush_discards();
                            self.state = State::Sizing;
                        },
                        None => {
                            // The whole magic is not here; at most its last
                            // len-1 bytes can be the start of one.
                            let keep = (magic.len() - 1).min(self.buf.len());
                            let drop = self.buf.len() - keep;
                            if drop > 0 {
                                let _ = self.buf.split_to(drop);
                                self.pending_discard += drop;
                            }
                            self.check_overflow();
                            break;
                        },
                    }
                },
                State::Sizing => match frame_size(&self.shape, &self.buf) {
                    Ok(Some(total)) => self.state = State::Drain { total },
                    Ok(None) => {
                        self.check_overflow();
                        break;
                    },
                    Err(error) => {
                        tracing::warn!(%error, "frame failed to size, resynchronizing");
                        self.report(FramerDiagnostic::FrameError(error));
                        self.resync();
                    },
                },
                State::Drain { total } => {
                    if self.buf.len() < total {
                        self.check_overflow();
                        break;
                    }
                    match unpack_structure(&self.shape, &self.buf[..total], 0, true) {
                        Ok((frame, _)) => {
                            let _ = self.buf.split_to(total);
                            tracing::debug!(bytes = total, "frame delivered");
                            self.state = self.initial_state();
                            (self.on_frame)(frame);
                        },
                        Err(error) => {
                            tracing::warn!(%error, "frame failed to parse, resynchronizing");
                            self.report(FramerDiagnostic::FrameError(error));
                            self.resync();
                        },
                    }
                },
                State::Fatal => break,
            }
        }
    }

    fn initial_state(&self) -> State {
        if self.magic.is_some() {
            State::Hunt
        } else {
            State::Sizing
        }
    }

    fn resync(&mut self) {
        if !self.buf.is_empty() {
            let _ = self.buf.split_to(1);
            self.report(FramerDiagnostic::DiscardedBytes(1));
        }
        self.state = self.initial_state();
    }

    fn flush_discards(&mut self) {
        if self.pending_discard > 0 {
            let count = std::mem::take(&mut self.pending_discard);
            self.report(FramerDiagnostic::DiscardedBytes(count));
        }
    }

    fn check_overflow(&mut self) {
        let Some(limit) = self.max_buffer else { return };
        if self.buf.len() > limit {
            self.flush_discards();
            let buffered = self.buf.len();
            tracing::warn!(buffered, limit, "framer buffer overflow");
            self.report(FramerDiagnostic::FrameError(CodecError::new(
                CodecErrorKind::FramerOverflow { buffered, limit },
                0,
            )));
            self.buf = BytesMut::new();
            self.state = State::Fatal;
        }
    }

    fn report(&mut self, diagnostic: FramerDiagnostic) {
        if let FramerDiagnostic::DiscardedBytes(count) = &diagnostic {
            tracing::warn!(count, "discarded stream bytes");
        }
        if let Some(on_error) = &mut self.on_error {
            on_error(diagnostic);
        }
    }
}

impl std::fmt::Debug for Framer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framer")
            .field("shape", &self.shape.name())
            .field("state", &self.state)
            .field("buffered", &self.buf.len())
            .field("max_buffer", &self.max_buffer)
            .finish_non_exhaustive()
    }
}

/// Reject structures whose total frame length cannot be computed from a
/// prefix.
fn check_sizable(shape: &Structure) -> std::result::Result<(), DeclarationError> {
    for slot in shape.slots() {
        check_slot_sizable(slot.name(), slot.kind())?;
    }
    Ok(())
}

fn check_slot_sizable(name: &str, kind: &FieldKind) -> std::result::Result<(), DeclarationError> {
    match kind {
        FieldKind::Conditional { inner, .. } => check_slot_sizable(name, inner),
        FieldKind::Payload { length: None }
        | FieldKind::Array { sizing: ArraySizing::Greedy, .. } => {
            Err(DeclarationError::UnsizableFrame { slot: name.to_owned() })
        },
        FieldKind::Array { element, sizing: ArraySizing::Count(_) } => check_sizable(element),
        FieldKind::Substruct { shape, length: None } => check_sizable(shape),
        FieldKind::Target { length: None, arms, fallback, .. } => {
            for arm in arms.values() {
                check_sizable(arm)?;
            }
            if let Some(fallback) = fallback {
                check_sizable(fallback)?;
            }
            Ok(())
        },
        _ => Ok(()),
    }
}

/// Compute the total frame length from the buffered prefix.
///
/// Returns `Ok(None)` when more bytes are needed, `Err` when the buffered
/// prefix is already malformed (bad magic, unknown dispatch key).
fn frame_size(shape: &Structure, data: &[u8]) -> Result<Option<usize>> {
    size_structure(shape, data, 0)
}

fn size_structure(shape: &Structure, data: &[u8], base: usize) -> Result<Option<usize>> {
    let mut instance = Instance::new();
    let mut cursor = 0usize;
    for i in 0..shape.slots.len() {
        match size_slot(shape, i, &shape.slots[i].kind, data, cursor, base, &mut instance)? {
            // The cursor may run past the buffered bytes once a bounded
            // region's extent is known without its content; saturate rather
            // than overflow on hostile lengths.
            Some(consumed) => cursor = cursor.saturating_add(consumed),
            None => return Ok(None),
        }
    }
    Ok(Some(cursor))
}

fn size_slot(
    shape: &Structure,
    index: usize,
    kind: &FieldKind,
    data: &[u8],
    cursor: usize,
    base: usize,
    instance: &mut Instance,
) -> Result<Option<usize>> {
    let name = &shape.slots[index].name;
    let window = &data[cursor.min(data.len())..];
    let abs = base + cursor;
    match kind {
        FieldKind::Conditional { condition, inner } => {
            let present = condition(instance).ok_or_else(|| {
                CodecError::new(CodecErrorKind::ConditionNotEvaluable, abs).in_field(name)
            })?;
            if present {
                size_slot(shape, index, inner, data, cursor, base, instance)
            } else {
                Ok(Some(0))
            }
        },
        FieldKind::Payload { length: Some(_) }
        | FieldKind::Array { sizing: ArraySizing::Bytes(_), .. }
        | FieldKind::Substruct { length: Some(_), .. }
        | FieldKind::Target { length: Some(_), .. } => {
            let declared = unpack::provider_value(shape, index, abs, name, instance)?;
            Ok(Some(usize::try_from(declared).unwrap_or(usize::MAX)))
        },
        FieldKind::Substruct { shape: inner, length: None } => {
            size_structure(inner, window, abs).map_err(|e| e.in_field(name))
        },
        FieldKind::Target { dispatch, length: None, arms, fallback } => {
            let key = instance.uint(dispatch).ok_or_else(|| {
                CodecError::new(CodecErrorKind::UnsetField, abs).in_field(dispatch)
            })?;
            let arm = arms.get(&key).or(fallback.as_ref()).ok_or_else(|| {
                CodecError::new(CodecErrorKind::UnknownDispatch { key }, abs).in_field(name)
            })?;
            size_structure(arm, window, abs).map_err(|e| e.in_field(name))
        },
        FieldKind::Array { element, sizing: ArraySizing::Count(_) } => {
            let count = unpack::provider_value(shape, index, abs, name, instance)?;
            let mut used = 0usize;
            for _ in 0..count {
                let tail = &window[used.min(window.len())..];
                match size_structure(element, tail, abs + used).map_err(|e| e.in_field(name))? {
                    Some(consumed) if consumed > 0 => used = used.saturating_add(consumed),
                    Some(_) => {
                        return Err(CodecError::new(
                            CodecErrorKind::ArrayElementUnderflow {
                                remaining: window.len().saturating_sub(used),
                            },
                            abs + used,
                        )
                        .in_field(name))
                    },
                    None => return Ok(None),
                }
            }
            Ok(Some(used))
        },
        FieldKind::Payload { length: None }
        | FieldKind::Array { sizing: ArraySizing::Greedy, .. } => {
            // Rejected by check_sizable at construction.
            debug_assert!(false, "greedy slot reached the sizing walk");
            Ok(None)
        },
        // Fixed-width slots: decode for real so providers, dispatch keys,
        // and condition inputs are available to later sizing steps.
        fixed => {
            let Extent::Fixed(width) = fixed.extent_hint() else {
                debug_assert!(false, "non-fixed kind fell through the sizing walk");
                return Ok(None);
            };
            if window.len() < width {
                return Ok(None);
            }
            unpack::unpack_slot(shape, index, fixed, window, abs, instance).map(Some)
        },
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}
