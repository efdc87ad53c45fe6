//! Data-driven schema definitions (feature `serde`).
//!
//! These types mirror the declarative surface as plain data, so a frame
//! layout can ship as a JSON document and be compiled into a [`Structure`]
//! at startup. Only the closure-free subset is expressible: conditional and
//! dependent fields carry Rust callables and stay builder-only.
//!
//! ```
//! use satchel::schema::StructureDef;
//! use satchel::Structure;
//!
//! let def: StructureDef = serde_json::from_str(
//!     r#"{
//!         "name": "echo",
//!         "slots": [
//!             { "name": "frame_type", "field": { "type": "uint", "bits": 8 } },
//!             { "name": "len", "field": { "type": "length", "bits": 16 } },
//!             { "name": "payload", "field": { "type": "payload", "length": { "field": "len" } } }
//!         ]
//!     }"#,
//! )?;
//! let echo = Structure::try_from(def)?;
//! assert_eq!(echo.slots().len(), 3);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    bits::{BitKind, BitRecord},
    errors::DeclarationError,
    field::{ArraySizing, FieldKind, LengthCodec, ProviderRef},
    primitive::{Endian, IntWidth, Primitive},
    structure::Structure,
};

/// Byte order in a definition file. Defaults to big endian (network order).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndianDef {
    /// Most significant byte first.
    #[default]
    Big,
    /// Least significant byte first.
    Little,
}

impl From<EndianDef> for Endian {
    fn from(def: EndianDef) -> Self {
        match def {
            EndianDef::Big => Self::Big,
            EndianDef::Little => Self::Little,
        }
    }
}

/// Reference to a provider slot, optionally a bit sub-slot inside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRefDef {
    /// Name of the providing slot.
    pub field: String,
    /// Sub-slot name when the provider lives inside a bit record.
    #[serde(default)]
    pub bit: Option<String>,
}

impl From<ProviderRefDef> for ProviderRef {
    fn from(def: ProviderRefDef) -> Self {
        match def.bit {
            Some(bit) => Self::Bit { field: def.field, slot: bit },
            None => Self::Slot(def.field),
        }
    }
}

/// One sub-slot of a bit record definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitSlotDef {
    /// Sub-slot name.
    pub name: String,
    /// Width in bits; `1` with `flag` set decodes as a boolean.
    #[serde(default)]
    pub bits: Option<u32>,
    /// Treat the (single) bit as a boolean flag.
    #[serde(default)]
    pub flag: bool,
}

/// One dispatch arm: a key and the structure it selects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmDef {
    /// Dispatch key value.
    pub key: u64,
    /// Structure decoded when the key matches.
    pub shape: StructureDef,
}

/// How an array definition sizes its element region.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingDef {
    /// Provider counts bytes.
    Bytes {
        /// The providing slot.
        provider: ProviderRefDef,
    },
    /// Provider counts elements.
    Count {
        /// The providing slot.
        provider: ProviderRefDef,
    },
    /// Everything remaining in the enclosing region.
    Greedy,
}

/// A single field definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldDef {
    /// Unsigned integer.
    Uint {
        /// Width in bits (8..=64, whole bytes).
        bits: u32,
        /// Byte order.
        #[serde(default)]
        endian: EndianDef,
    },
    /// Signed integer.
    Int {
        /// Width in bits (8..=64, whole bytes).
        bits: u32,
        /// Byte order.
        #[serde(default)]
        endian: EndianDef,
    },
    /// IEEE 754 single.
    F32 {
        /// Byte order.
        #[serde(default)]
        endian: EndianDef,
    },
    /// IEEE 754 double.
    F64 {
        /// Byte order.
        #[serde(default)]
        endian: EndianDef,
    },
    /// Bit-packed record.
    Bits {
        /// Container width in bits.
        width: u32,
        /// Sub-slots, most significant first.
        slots: Vec<BitSlotDef>,
    },
    /// Opaque byte block of fixed size.
    FixedBytes {
        /// Size in bytes.
        size: usize,
    },
    /// Fixed, value-constrained byte sequence.
    Magic {
        /// The constant bytes.
        bytes: Vec<u8>,
    },
    /// Length provider.
    Length {
        /// Width in bits of the stored value.
        bits: u32,
        /// Byte order.
        #[serde(default)]
        endian: EndianDef,
        /// Stored length unit in bytes (the original's multiplier).
        #[serde(default)]
        multiplier: Option<u64>,
    },
    /// Variable byte payload.
    Payload {
        /// Bounding provider; absent means greedy.
        #[serde(default)]
        length: Option<ProviderRefDef>,
    },
    /// Dispatch key.
    Dispatch {
        /// Width in bits of the key.
        bits: u32,
        /// Byte order.
        #[serde(default)]
        endian: EndianDef,
    },
    /// Dispatch target.
    Target {
        /// Name of the dispatch slot.
        dispatch: String,
        /// Bounding provider; absent sizes the target by its arm.
        #[serde(default)]
        length: Option<ProviderRefDef>,
        /// Key-to-structure arms.
        arms: Vec<ArmDef>,
        /// Structure for keys with no arm.
        #[serde(default)]
        fallback: Option<StructureDef>,
    },
    /// Nested structure.
    Substruct {
        /// The nested structure.
        shape: StructureDef,
        /// Bounding provider; absent means self-delimiting.
        #[serde(default)]
        length: Option<ProviderRefDef>,
    },
    /// Repeated substructure.
    Array {
        /// Element structure.
        element: StructureDef,
        /// Region sizing.
        sizing: SizingDef,
    },
}

/// One named slot definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotDef {
    /// Slot name.
    pub name: String,
    /// The bound field.
    pub field: FieldDef,
}

/// Top-level structure definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureDef {
    /// Structure name, used in diagnostics.
    pub name: String,
    /// Slots in wire order.
    pub slots: Vec<SlotDef>,
}

impl TryFrom<StructureDef> for Structure {
    type Error = DeclarationError;

    fn try_from(def: StructureDef) -> Result<Self, Self::Error> {
        let mut builder = Structure::builder(def.name);
        for slot in def.slots {
            builder = builder.slot(slot.name, FieldKind::try_from(slot.field)?);
        }
        builder.build()
    }
}

impl TryFrom<FieldDef> for FieldKind {
    type Error = DeclarationError;

    fn try_from(def: FieldDef) -> Result<Self, Self::Error> {
        Ok(match def {
            FieldDef::Uint { bits, endian } => {
                Self::Primitive(Primitive::unsigned(width(bits)?, endian.into()))
            },
            FieldDef::Int { bits, endian } => {
                Self::Primitive(Primitive::signed(width(bits)?, endian.into()))
            },
            FieldDef::F32 { endian } => Self::Primitive(Primitive::F32 { endian: endian.into() }),
            FieldDef::F64 { endian } => Self::Primitive(Primitive::F64 { endian: endian.into() }),
            FieldDef::Bits { width: container, slots } => {
                let slots = slots.into_iter().map(|slot| {
                    let kind = if slot.flag {
                        BitKind::Flag
                    } else {
                        BitKind::Num(slot.bits.unwrap_or(1))
                    };
                    (slot.name, kind)
                });
                Self::Bits(BitRecord::new(width(container)?, slots)?)
            },
            FieldDef::FixedBytes { size } => Self::FixedBytes(size),
            FieldDef::Magic { bytes } => Self::Magic(Bytes::from(bytes)),
            FieldDef::Length { bits, endian, multiplier } => {
                let codec = Primitive::unsigned(width(bits)?, endian.into());
                match multiplier {
                    Some(unit) => Self::length_with(codec, LengthCodec::multiplier(unit)),
                    None => Self::length(codec),
                }
            },
            FieldDef::Payload { length } => Self::Payload { length: length.map(Into::into) },
            FieldDef::Dispatch { bits, endian } => {
                Self::Dispatch(Primitive::unsigned(width(bits)?, endian.into()))
            },
            FieldDef::Target { dispatch, length, arms, fallback } => {
                let arms = arms
                    .into_iter()
                    .map(|arm| Ok((arm.key, Arc::new(Structure::try_from(arm.shape)?))))
                    .collect::<Result<_, DeclarationError>>()?;
                let fallback = match fallback {
                    Some(def) => Some(Arc::new(Structure::try_from(def)?)),
                    None => None,
                };
                Self::Target { dispatch, length: length.map(Into::into), arms, fallback }
            },
            FieldDef::Substruct { shape, length } => Self::Substruct {
                shape: Arc::new(Structure::try_from(shape)?),
                length: length.map(Into::into),
            },
            FieldDef::Array { element, sizing } => Self::Array {
                element: Arc::new(Structure::try_from(element)?),
                sizing: match sizing {
                    SizingDef::Bytes { provider } => ArraySizing::Bytes(provider.into()),
                    SizingDef::Count { provider } => ArraySizing::Count(provider.into()),
                    SizingDef::Greedy => ArraySizing::Greedy,
                },
            },
        })
    }
}

fn width(bits: u32) -> Result<IntWidth, DeclarationError> {
    IntWidth::from_bits(bits).ok_or(DeclarationError::UnsupportedWidth { bits })
}
