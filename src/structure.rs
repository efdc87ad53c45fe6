//! Structure descriptors: ordered named slots plus cached metadata.
//!
//! A [`Structure`] is declared once through [`StructureBuilder`] and is
//! immutable afterwards, so descriptors can be shared freely behind an
//! `Arc` (nested structures, dispatch arms, array elements all hold one).
//!
//! # Invariants enforced at build time
//!
//! - At most one greedy slot, and only fixed-width slots after it: the
//!   unpacker pins the end of a greedy region by summing the fixed suffix.
//! - Every length/count/dispatch provider is claimed by exactly one
//!   consumer, and appears before that consumer in wire order.
//! - Provider references resolve to slots of the right kind (a `Length`
//!   slot, a `Bits` sub-slot, a `Dispatch` slot), and provider codecs are
//!   unsigned.
//! - Dependent fields reference a strictly earlier source slot.
//!
//! Violations surface as [`DeclarationError`]; a structure that builds
//! successfully never fails these checks again at runtime.

use std::collections::HashMap;

use bytes::Bytes;

use crate::{
    errors::{DeclarationError, Result},
    field::{Extent, FieldKind, ProviderRef},
    pack, unpack,
    value::Instance,
};

/// One named position in a structure, bound to a field kind.
#[derive(Debug, Clone)]
pub struct Slot {
    pub(crate) name: String,
    pub(crate) kind: FieldKind,
}

impl Slot {
    /// Slot name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The field kind bound to this slot.
    #[must_use]
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }
}

/// Resolved back-reference from a consumer slot to its provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedProvider {
    /// Index of the provider slot.
    pub slot: usize,
    /// Sub-slot name when the provider is a bit inside a `Bits` slot.
    pub bit: Option<String>,
}

/// Forward link from a provider slot to the consumer it feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConsumerLink {
    /// Index of the consumer slot.
    pub consumer: usize,
    /// Sub-slot name when the provider is a bit inside a `Bits` slot.
    pub bit: Option<String>,
}

/// An immutable frame descriptor.
#[derive(Debug)]
pub struct Structure {
    name: String,
    pub(crate) slots: Vec<Slot>,
    index: HashMap<String, usize>,
    /// Per consumer slot: the provider feeding it.
    pub(crate) providers: Vec<Option<ResolvedProvider>>,
    /// Per provider slot: the consumers it feeds (a `Bits` slot may host
    /// several provider sub-slots; `Length`/`Dispatch` slots host one).
    pub(crate) consumers: Vec<Vec<ConsumerLink>>,
    /// Index of the greedy slot, if any.
    pub(crate) greedy: Option<usize>,
    /// Per slot: summed width of the fixed slots that follow it, up to the
    /// next variable slot. Used to pin the end of a greedy region.
    pub(crate) suffix: Vec<usize>,
}

impl Structure {
    /// Start declaring a structure.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> StructureBuilder {
        StructureBuilder { name: name.into(), slots: Vec::new() }
    }

    /// Structure name, used in diagnostics only.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Slots in wire order.
    #[must_use]
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Look up a slot by name.
    #[must_use]
    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.index.get(name).map(|&i| &self.slots[i])
    }

    /// True if any slot (directly or via a self-delimiting substructure
    /// classification) is greedy.
    #[must_use]
    pub fn has_greedy(&self) -> bool {
        self.greedy.is_some()
    }

    /// Pack an instance into wire bytes.
    ///
    /// Packing is pure and deterministic: derived fields (lengths,
    /// dependents) are resolved into an internal working copy; the caller's
    /// instance is not modified.
    ///
    /// # Errors
    ///
    /// `UnsetField` for a missing required slot, `Range`/`TypeMismatch` for
    /// unencodable values, `LengthInconsistency` when a length transform
    /// disagrees with the consumer's actual extent, `UnknownDispatch` for a
    /// key with no arm, `MagicMismatch` if the caller overrode a magic slot
    /// with different bytes.
    pub fn pack(&self, instance: &Instance) -> Result<Bytes> {
        pack::pack_structure(self, instance)
    }

    /// Unpack a complete frame, consuming every byte of `data`.
    ///
    /// # Errors
    ///
    /// Any [`CodecErrorKind`](crate::CodecErrorKind); trailing bytes
    /// surface as `LengthInconsistency`.
    pub fn unpack(&self, data: &[u8]) -> Result<Instance> {
        let (instance, _) = unpack::unpack_structure(self, data, 0, true)?;
        Ok(instance)
    }

    /// Unpack one frame from the front of `data`, returning it and the
    /// number of bytes consumed. Trailing bytes are left for the caller.
    pub fn unpack_partial(&self, data: &[u8]) -> Result<(Instance, usize)> {
        unpack::unpack_structure(self, data, 0, false)
    }

    pub(crate) fn slot_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

/// Accumulates `(name, kind)` pairs and validates them into a [`Structure`].
#[derive(Debug)]
pub struct StructureBuilder {
    name: String,
    slots: Vec<Slot>,
}

impl StructureBuilder {
    /// Append a slot. Wire order is declaration order.
    #[must_use]
    pub fn slot(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.slots.push(Slot { name: name.into(), kind });
        self
    }

    /// Validate the declaration and produce the immutable descriptor.
    ///
    /// # Errors
    ///
    /// See [`DeclarationError`] for the full set of schema violations.
    pub fn build(self) -> std::result::Result<Structure, DeclarationError> {
        let slots = self.slots;
        let count = slots.len();

        let mut index = HashMap::with_capacity(count);
        for (i, slot) in slots.iter().enumerate() {
            if index.insert(slot.name.clone(), i).is_some() {
                return Err(DeclarationError::DuplicateSlot { name: slot.name.clone() });
            }
            check_kind(slot)?;
        }

        let mut providers: Vec<Option<ResolvedProvider>> = vec![None; count];
        let mut consumers: Vec<Vec<ConsumerLink>> = vec![Vec::new(); count];

        for (i, slot) in slots.iter().enumerate() {
            if let Some(length_ref) = slot.kind.length_ref() {
                let resolved = resolve_length_ref(&slots, &index, i, length_ref)?;
                claim(&slots, &mut consumers, i, &resolved)?;
                providers[i] = Some(resolved);
            }
            if let FieldKind::Target { dispatch, .. } = slot.kind.effective() {
                let j = resolve_dispatch_ref(&slots, &index, i, dispatch)?;
                claim(
                    &slots,
                    &mut consumers,
                    i,
                    &ResolvedProvider { slot: j, bit: None },
                )?;
            }
            if let FieldKind::Dependent { source, .. } = &slot.kind {
                match index.get(source) {
                    Some(&j) if j < i => {},
                    _ => {
                        return Err(DeclarationError::DependentSource {
                            slot: slot.name.clone(),
                            source_slot: source.clone(),
                        })
                    },
                }
            }
        }

        // Length and dispatch slots exist only to describe a consumer; one
        // with no claim is a declaration bug, not a runtime condition.
        for (j, slot) in slots.iter().enumerate() {
            let is_provider_kind =
                matches!(slot.kind, FieldKind::Length { .. } | FieldKind::Dispatch(_));
            if is_provider_kind && consumers[j].is_empty() {
                return Err(DeclarationError::DanglingProvider { provider: slot.name.clone() });
            }
        }

        let mut greedy: Option<usize> = None;
        for (i, slot) in slots.iter().enumerate() {
            if slot.kind.extent_hint() == Extent::Greedy {
                if let Some(first) = greedy {
                    return Err(DeclarationError::DuplicateGreedy {
                        first: slots[first].name.clone(),
                        second: slot.name.clone(),
                    });
                }
                greedy = Some(i);
            }
        }
        if let Some(g) = greedy {
            for slot in &slots[g + 1..] {
                if !matches!(slot.kind.extent_hint(), Extent::Fixed(_)) {
                    return Err(DeclarationError::NonFixedAfterGreedy {
                        greedy: slots[g].name.clone(),
                        slot: slot.name.clone(),
                    });
                }
            }
        }

        let mut suffix = vec![0usize; count];
        let mut acc = 0usize;
        for i in (0..count).rev() {
            suffix[i] = acc;
            match slots[i].kind.extent_hint() {
                Extent::Fixed(w) => acc += w,
                _ => acc = 0,
            }
        }

        Ok(Structure { name: self.name, slots, index, providers, consumers, greedy, suffix })
    }
}

fn check_kind(slot: &Slot) -> std::result::Result<(), DeclarationError> {
    match slot.kind.effective() {
        FieldKind::Magic(constant) if constant.is_empty() => Err(DeclarationError::EmptyMagic),
        FieldKind::FixedBytes(0) => {
            Err(DeclarationError::ZeroWidth { slot: slot.name.clone() })
        },
        FieldKind::Length { codec, .. } | FieldKind::Dispatch(codec)
            if !codec.is_unsigned() =>
        {
            Err(DeclarationError::ProviderCodec { slot: slot.name.clone() })
        },
        // A greedy element would swallow the whole region on the first
        // iteration, leaving the declared count unmet with no error.
        FieldKind::Array { element, .. } if element.has_greedy() => {
            Err(DeclarationError::GreedyArrayElement { slot: slot.name.clone() })
        },
        _ => Ok(()),
    }
}

fn resolve_length_ref(
    slots: &[Slot],
    index: &HashMap<String, usize>,
    consumer: usize,
    reference: &ProviderRef,
) -> std::result::Result<ResolvedProvider, DeclarationError> {
    let consumer_name = slots[consumer].name.clone();
    let provider_name = reference.field_name();
    let Some(&j) = index.get(provider_name) else {
        return Err(DeclarationError::UnknownProvider {
            consumer: consumer_name,
            provider: provider_name.to_owned(),
        });
    };
    if j >= consumer {
        return Err(DeclarationError::ProviderAfterConsumer {
            consumer: consumer_name,
            provider: provider_name.to_owned(),
        });
    }
    match (&slots[j].kind, reference.bit_name()) {
        (FieldKind::Length { .. }, None) => Ok(ResolvedProvider { slot: j, bit: None }),
        (FieldKind::Bits(record), Some(bit)) => {
            if record.has_slot(bit) {
                Ok(ResolvedProvider { slot: j, bit: Some(bit.to_owned()) })
            } else {
                Err(DeclarationError::UnknownProvider {
                    consumer: consumer_name,
                    provider: format!("{provider_name}.{bit}"),
                })
            }
        },
        (_, None) => Err(DeclarationError::ProviderKind {
            consumer: consumer_name,
            provider: provider_name.to_owned(),
            expected: "length field",
        }),
        (_, Some(_)) => Err(DeclarationError::ProviderKind {
            consumer: consumer_name,
            provider: provider_name.to_owned(),
            expected: "bit record",
        }),
    }
}

fn resolve_dispatch_ref(
    slots: &[Slot],
    index: &HashMap<String, usize>,
    consumer: usize,
    dispatch: &str,
) -> std::result::Result<usize, DeclarationError> {
    let consumer_name = slots[consumer].name.clone();
    let Some(&j) = index.get(dispatch) else {
        return Err(DeclarationError::UnknownProvider {
            consumer: consumer_name,
            provider: dispatch.to_owned(),
        });
    };
    if j >= consumer {
        return Err(DeclarationError::ProviderAfterConsumer {
            consumer: consumer_name,
            provider: dispatch.to_owned(),
        });
    }
    if !matches!(slots[j].kind, FieldKind::Dispatch(_)) {
        return Err(DeclarationError::ProviderKind {
            consumer: consumer_name,
            provider: dispatch.to_owned(),
            expected: "dispatch field",
        });
    }
    Ok(j)
}

fn claim(
    slots: &[Slot],
    consumers: &mut [Vec<ConsumerLink>],
    consumer: usize,
    resolved: &ResolvedProvider,
) -> std::result::Result<(), DeclarationError> {
    let links = &mut consumers[resolved.slot];
    if let Some(existing) = links.iter().find(|link| link.bit == resolved.bit) {
        let provider = match &resolved.bit {
            Some(bit) => format!("{}.{bit}", slots[resolved.slot].name),
            None => slots[resolved.slot].name.clone(),
        };
        return Err(DeclarationError::SharedProvider {
            provider,
            first: slots[existing.consumer].name.clone(),
            second: slots[consumer].name.clone(),
        });
    }
    links.push(ConsumerLink { consumer, bit: resolved.bit.clone() });
    Ok(())
}
