//! Bit-packed records.
//!
//! A [`BitRecord`] is a fixed-width container whose named sub-slots are
//! packed most-significant-first into a big-endian integer and serialized as
//! `width / 8` bytes. Sub-slot widths must sum to the container width
//! exactly; the constructor rejects anything else.
//!
//! Sub-slots unpack into a nested [`Instance`]: numbers as `Value::UInt`,
//! flags as `Value::Bool`. A sub-slot can also serve as the length or count
//! provider for a later field in the enclosing structure.

use bytes::BufMut;

use crate::{
    errors::{CodecError, CodecErrorKind, DeclarationError},
    primitive::IntWidth,
    value::{Instance, Value},
};

/// Shape of one bit sub-slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitKind {
    /// Unsigned number occupying the given number of bits.
    Num(u32),
    /// Single-bit boolean flag.
    Flag,
}

impl BitKind {
    const fn bits(self) -> u32 {
        match self {
            Self::Num(bits) => bits,
            Self::Flag => 1,
        }
    }
}

/// One named sub-slot of a [`BitRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitSlot {
    name: String,
    kind: BitKind,
}

impl BitSlot {
    /// Sub-slot name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sub-slot shape.
    #[must_use]
    pub fn kind(&self) -> BitKind {
        self.kind
    }
}

/// A byte-aligned container of named bit fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitRecord {
    width: IntWidth,
    slots: Vec<BitSlot>,
}

impl BitRecord {
    /// Declare a record of the given container width.
    ///
    /// Sub-slots lay out most-significant-first in declaration order.
    ///
    /// # Errors
    ///
    /// Rejects duplicate sub-slot names, sub-slots of zero width or wider
    /// than the container, and width sums that do not equal the container
    /// width.
    pub fn new<N: Into<String>>(
        width: IntWidth,
        slots: impl IntoIterator<Item = (N, BitKind)>,
    ) -> Result<Self, DeclarationError> {
        let slots: Vec<BitSlot> = slots
            .into_iter()
            .map(|(name, kind)| BitSlot { name: name.into(), kind })
            .collect();

        let mut total = 0u32;
        for (i, slot) in slots.iter().enumerate() {
            let bits = slot.kind.bits();
            if bits == 0 || bits > width.bits() {
                return Err(DeclarationError::BitSlotWidth { slot: slot.name.clone(), bits });
            }
            if slots[..i].iter().any(|earlier| earlier.name == slot.name) {
                return Err(DeclarationError::DuplicateSlot { name: slot.name.clone() });
            }
            total += bits;
        }
        if total != width.bits() {
            return Err(DeclarationError::BitWidthMismatch {
                declared: width.bits(),
                actual: total,
            });
        }

        Ok(Self { width, slots })
    }

    /// Container width.
    #[must_use]
    pub fn width(&self) -> IntWidth {
        self.width
    }

    /// Serialized width in bytes.
    #[must_use]
    pub fn width_bytes(&self) -> usize {
        self.width.bytes()
    }

    /// Declared sub-slots, most significant first.
    #[must_use]
    pub fn slots(&self) -> &[BitSlot] {
        &self.slots
    }

    /// True if a sub-slot of that name exists.
    #[must_use]
    pub fn has_slot(&self, name: &str) -> bool {
        self.slots.iter().any(|slot| slot.name == name)
    }

    /// Compose the record from `inst` and append it to `dst`.
    ///
    /// Errors carry the failing sub-slot's name; `base` is the record's
    /// offset within the enclosing frame, used only in error reports (pass
    /// 0 when packing a record standalone).
    ///
    /// # Errors
    ///
    /// `UnsetField` for a missing sub-slot, `TypeMismatch` for a wrongly
    /// shaped one, `Range` when a value does not fit its declared bits.
    pub fn pack(
        &self,
        inst: &Instance,
        base: usize,
        dst: &mut impl BufMut,
    ) -> Result<(), CodecError> {
        let mut composed = 0u64;
        let mut shift = self.width.bits();
        for slot in &self.slots {
            let bits = slot.kind.bits();
            shift -= bits;
            let v = match slot.kind {
                BitKind::Num(_) => inst.uint(&slot.name),
                BitKind::Flag => inst.boolean(&slot.name).map(u64::from),
            }
            .ok_or_else(|| match inst.get(&slot.name) {
                None => CodecError::new(CodecErrorKind::UnsetField, base).in_field(&slot.name),
                Some(found) => CodecError::new(
                    CodecErrorKind::TypeMismatch {
                        expected: match slot.kind {
                            BitKind::Num(_) => "unsigned integer",
                            BitKind::Flag => "bool",
                        },
                        found: found.kind_name(),
                    },
                    base,
                )
                .in_field(&slot.name),
            })?;
            if bits < 64 && v >> bits != 0 {
                return Err(CodecError::new(
                    CodecErrorKind::Range { value: i128::from(v), bits },
                    base,
                )
                .in_field(&slot.name));
            }
            composed |= v << shift;
        }
        dst.put_slice(&composed.to_be_bytes()[8 - self.width_bytes()..]);
        Ok(())
    }

    /// Decompose the record from the front of `src`, returning the decoded
    /// sub-slots and the bytes consumed. `base` is used in error reports.
    ///
    /// # Errors
    ///
    /// `ShortBuffer` when `src` is narrower than the container.
    pub fn unpack(&self, src: &[u8], base: usize) -> Result<(Instance, usize), CodecError> {
        let n = self.width_bytes();
        if src.len() < n {
            return Err(CodecError::new(
                CodecErrorKind::ShortBuffer { needed: n, available: src.len() },
                base,
            ));
        }
        let mut raw = 0u64;
        for &byte in &src[..n] {
            raw = raw << 8 | u64::from(byte);
        }

        let mut inst = Instance::new();
        let mut shift = self.width.bits();
        for slot in &self.slots {
            let bits = slot.kind.bits();
            shift -= bits;
            let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
            let v = (raw >> shift) & mask;
            match slot.kind {
                BitKind::Num(_) => inst.set(slot.name.clone(), Value::UInt(v)),
                BitKind::Flag => inst.set(slot.name.clone(), Value::Bool(v == 1)),
            }
        }
        Ok((inst, n))
    }
}
