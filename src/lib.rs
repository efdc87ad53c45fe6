//! # satchel
//!
//! Declare a binary protocol frame once and derive three things from the
//! declaration: a packer (structured value → bytes), a parser (bytes →
//! structured value), and an incremental stream framer that recovers whole
//! frames from arbitrarily chunked input.
//!
//! A frame is a [`Structure`]: an ordered list of named slots, each bound to
//! a [`FieldKind`]. Fields of variable extent declare their dependencies by
//! name (a length field governs a payload, a dispatch key selects a
//! sub-structure, a greedy tail takes whatever remains) and the engine
//! resolves those dependencies deterministically in both directions.
//!
//! ## Example
//!
//! ```
//! use satchel::{FieldKind, Instance, Primitive, Structure};
//!
//! let echo = Structure::builder("echo")
//!     .slot("frame_type", FieldKind::Primitive(Primitive::U8))
//!     .slot("len", FieldKind::length(Primitive::U16_BE))
//!     .slot("payload", FieldKind::payload("len"))
//!     .build()?;
//!
//! let msg = Instance::new()
//!     .with("frame_type", 0x10u64)
//!     .with("payload", &b"hi"[..]);
//!
//! let wire = echo.pack(&msg)?;
//! assert_eq!(wire.as_ref(), &[0x10, 0x00, 0x02, 0x68, 0x69]);
//!
//! let decoded = echo.unpack(&wire)?;
//! assert_eq!(decoded.bytes("payload").map(|b| b.as_ref()), Some(&b"hi"[..]));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Stream framing
//!
//! [`Framer`] consumes a byte stream incrementally: it hunts for the magic
//! prefix if the structure declares one, trial-decodes the fixed prefix to
//! learn the total frame length, waits for that many bytes, and delivers
//! each parsed frame to a callback. Malformed frames are reported and the
//! framer resynchronizes by discarding one byte.
//!
//! ## Scope
//!
//! The model is value-based: parsing produces owned [`Instance`] maps, not
//! zero-copy views. Pack, unpack, and `feed` are synchronous, pure
//! computations; async integration, schema versioning, and text protocols
//! are out of scope.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bits;
pub mod errors;
pub mod field;
pub mod framer;
pub mod primitive;
pub mod structure;
pub mod value;

mod pack;
mod unpack;

#[cfg(feature = "serde")]
pub mod schema;

pub use bits::{BitKind, BitRecord, BitSlot};
pub use errors::{CodecError, CodecErrorKind, DeclarationError, FieldPath, Result};
pub use field::{ArraySizing, Condition, Derive, Extent, FieldKind, LengthCodec, ProviderRef};
pub use framer::{Framer, FramerDiagnostic};
pub use primitive::{Endian, IntWidth, Primitive};
pub use structure::{Slot, Structure, StructureBuilder};
pub use value::{Instance, Value};
