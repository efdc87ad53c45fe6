//! The field kind algebra.
//!
//! Every slot in a [`Structure`](crate::Structure) is one [`FieldKind`]
//! variant. Kinds classify into three extents: *fixed* (width known without
//! looking at data), *bounded* (width supplied by an earlier provider slot
//! or discovered while parsing a self-delimiting substructure), and *greedy*
//! (everything remaining in the enclosing region). A structure may hold at
//! most one greedy slot.
//!
//! Cross-field references (length/count providers, dispatch keys, dependent
//! sources) are declared by name and resolved to slot indices when the
//! structure is built, keeping descriptors immutable and cheap to share.

use std::{collections::BTreeMap, fmt, sync::Arc};

use bytes::Bytes;

use crate::{
    bits::BitRecord,
    primitive::Primitive,
    structure::Structure,
    value::{Instance, Value},
};

/// Predicate deciding whether a conditional field is present.
///
/// Receives the partial frame decoded (or resolved) so far. Returning `None`
/// signals that the fields the predicate needs are not available, which
/// surfaces as `ConditionNotEvaluable`.
pub type Condition = Arc<dyn Fn(&Instance) -> Option<bool> + Send + Sync>;

/// Transform computing a dependent field's value from its source slot.
pub type Derive = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Paired store/load transforms between a consumer's actual extent and the
/// value a length provider keeps on the wire.
///
/// `store` maps the actual byte (or element) count to the stored value;
/// `load` maps the stored value back. The packer verifies the pair is
/// consistent (`load(store(n)) == n`) and raises `LengthInconsistency`
/// otherwise, which catches e.g. a multiplier that does not divide the
/// payload.
#[derive(Clone)]
pub struct LengthCodec {
    store: Arc<dyn Fn(u64) -> u64 + Send + Sync>,
    load: Arc<dyn Fn(u64) -> u64 + Send + Sync>,
}

impl LengthCodec {
    /// Build from explicit store/load transforms.
    pub fn new(
        store: impl Fn(u64) -> u64 + Send + Sync + 'static,
        load: impl Fn(u64) -> u64 + Send + Sync + 'static,
    ) -> Self {
        Self { store: Arc::new(store), load: Arc::new(load) }
    }

    /// Length stored in units of `unit` bytes (e.g. words instead of bytes).
    #[must_use]
    pub fn multiplier(unit: u64) -> Self {
        Self::new(move |actual| actual / unit, move |stored| stored * unit)
    }

    pub(crate) fn store(&self, actual: u64) -> u64 {
        (self.store)(actual)
    }

    pub(crate) fn load(&self, stored: u64) -> u64 {
        (self.load)(stored)
    }
}

impl fmt::Debug for LengthCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LengthCodec")
    }
}

/// Reference to the slot providing a consumer's extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderRef {
    /// A `Length` slot, by name.
    Slot(String),
    /// A named sub-slot inside a `Bits` slot.
    Bit {
        /// Name of the `Bits` slot.
        field: String,
        /// Name of the sub-slot inside it.
        slot: String,
    },
}

impl ProviderRef {
    /// Reference a `Length` slot.
    #[must_use]
    pub fn slot(name: impl Into<String>) -> Self {
        Self::Slot(name.into())
    }

    /// Reference a bit sub-slot.
    #[must_use]
    pub fn bit(field: impl Into<String>, slot: impl Into<String>) -> Self {
        Self::Bit { field: field.into(), slot: slot.into() }
    }

    /// Name of the referenced top-level slot.
    #[must_use]
    pub fn field_name(&self) -> &str {
        match self {
            Self::Slot(name) => name,
            Self::Bit { field, .. } => field,
        }
    }

    pub(crate) fn bit_name(&self) -> Option<&str> {
        match self {
            Self::Slot(_) => None,
            Self::Bit { slot, .. } => Some(slot),
        }
    }
}

/// How a field array determines its element region.
#[derive(Debug, Clone)]
pub enum ArraySizing {
    /// The provider's value is the region's byte count.
    Bytes(ProviderRef),
    /// The provider's value is the element count.
    Count(ProviderRef),
    /// The region is everything remaining in the enclosing extent.
    Greedy,
}

/// Extent classification of a field kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extent {
    /// Width known from the declaration alone.
    Fixed(usize),
    /// Width determined by a provider or by parsing a self-delimiting
    /// substructure.
    Bounded,
    /// Consumes everything remaining in the enclosing region.
    Greedy,
}

/// The tagged set of field variants a slot can bind to.
#[derive(Clone)]
pub enum FieldKind {
    /// Fixed-width scalar.
    Primitive(Primitive),
    /// Bit-packed record.
    Bits(BitRecord),
    /// Opaque byte block of a declared length.
    FixedBytes(usize),
    /// Fixed, value-constrained byte sequence. Packing emits the constant;
    /// unpacking asserts it.
    Magic(Bytes),
    /// Unsigned scalar whose value is the extent of exactly one later
    /// consumer, written automatically during pack.
    Length {
        /// Wire codec for the stored value. Must be unsigned.
        codec: Primitive,
        /// Optional store/load transforms composing with raw storage.
        transform: Option<LengthCodec>,
    },
    /// Variable byte payload, bounded by a provider or greedy.
    Payload {
        /// The provider, or `None` for a greedy tail.
        length: Option<ProviderRef>,
    },
    /// Unsigned scalar selecting the arm of exactly one later target.
    Dispatch(Primitive),
    /// Sub-structure chosen by a dispatch key.
    Target {
        /// Name of the `Dispatch` slot supplying the key.
        dispatch: String,
        /// Optional byte-length provider; `None` makes the target greedy.
        length: Option<ProviderRef>,
        /// Key-to-structure mapping.
        arms: BTreeMap<u64, Arc<Structure>>,
        /// Structure used when the key has no arm.
        fallback: Option<Arc<Structure>>,
    },
    /// Nested structure, length-bounded or self-delimiting.
    Substruct {
        /// The nested structure.
        shape: Arc<Structure>,
        /// Optional byte-length provider.
        length: Option<ProviderRef>,
    },
    /// Repeated substructure.
    Array {
        /// Element structure. Must not be greedy.
        element: Arc<Structure>,
        /// How the element region is determined.
        sizing: ArraySizing,
    },
    /// Field present only when a predicate over earlier fields holds.
    Conditional {
        /// The predicate.
        condition: Condition,
        /// Field encoded when the predicate holds.
        inner: Box<FieldKind>,
    },
    /// Field whose value is computed at pack time from an earlier slot.
    Dependent {
        /// Name of the source slot.
        source: String,
        /// Wire codec, normally the source slot's codec.
        codec: Primitive,
        /// Transform from the source value to this field's value.
        derive: Derive,
    },
}

impl FieldKind {
    /// A magic constant field.
    #[must_use]
    pub fn magic(bytes: impl Into<Bytes>) -> Self {
        Self::Magic(bytes.into())
    }

    /// A length provider with raw storage.
    #[must_use]
    pub fn length(codec: Primitive) -> Self {
        Self::Length { codec, transform: None }
    }

    /// A length provider with store/load transforms.
    #[must_use]
    pub fn length_with(codec: Primitive, transform: LengthCodec) -> Self {
        Self::Length { codec, transform: Some(transform) }
    }

    /// A payload bounded by the named length slot.
    #[must_use]
    pub fn payload(provider: impl Into<String>) -> Self {
        Self::Payload { length: Some(ProviderRef::Slot(provider.into())) }
    }

    /// A payload consuming everything remaining in the enclosing region.
    #[must_use]
    pub fn payload_greedy() -> Self {
        Self::Payload { length: None }
    }

    /// A dispatch target with no length bound and no fallback arm.
    #[must_use]
    pub fn target(
        dispatch: impl Into<String>,
        arms: impl IntoIterator<Item = (u64, Arc<Structure>)>,
    ) -> Self {
        Self::Target {
            dispatch: dispatch.into(),
            length: None,
            arms: arms.into_iter().collect(),
            fallback: None,
        }
    }

    /// A self-delimiting nested structure.
    #[must_use]
    pub fn substruct(shape: Arc<Structure>) -> Self {
        Self::Substruct { shape, length: None }
    }

    /// A conditional wrapper around `inner`.
    #[must_use]
    pub fn conditional(
        condition: impl Fn(&Instance) -> Option<bool> + Send + Sync + 'static,
        inner: FieldKind,
    ) -> Self {
        Self::Conditional { condition: Arc::new(condition), inner: Box::new(inner) }
    }

    /// A dependent field computed from `source` at pack time.
    #[must_use]
    pub fn dependent(
        source: impl Into<String>,
        codec: Primitive,
        derive: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self::Dependent { source: source.into(), codec, derive: Arc::new(derive) }
    }

    /// Classify this kind's extent.
    #[must_use]
    pub fn extent_hint(&self) -> Extent {
        match self {
            Self::Primitive(p) | Self::Dispatch(p) => Extent::Fixed(p.width()),
            Self::Length { codec, .. } | Self::Dependent { codec, .. } => {
                Extent::Fixed(codec.width())
            },
            Self::Bits(record) => Extent::Fixed(record.width_bytes()),
            Self::FixedBytes(n) => Extent::Fixed(*n),
            Self::Magic(constant) => Extent::Fixed(constant.len()),
            Self::Payload { length: Some(_) } => Extent::Bounded,
            Self::Payload { length: None } => Extent::Greedy,
            Self::Target { length: Some(_), .. } => Extent::Bounded,
            Self::Target { length: None, .. } => Extent::Greedy,
            Self::Substruct { length: Some(_), .. } => Extent::Bounded,
            Self::Substruct { length: None, shape } => {
                if shape.has_greedy() {
                    Extent::Greedy
                } else {
                    Extent::Bounded
                }
            },
            Self::Array { sizing: ArraySizing::Greedy, .. } => Extent::Greedy,
            Self::Array { .. } => Extent::Bounded,
            Self::Conditional { inner, .. } => match inner.extent_hint() {
                Extent::Greedy => Extent::Greedy,
                // Present-or-absent makes even a fixed inner variable.
                _ => Extent::Bounded,
            },
        }
    }

    /// The kind with any conditional wrappers stripped.
    pub(crate) fn effective(&self) -> &FieldKind {
        match self {
            Self::Conditional { inner, .. } => inner.effective(),
            other => other,
        }
    }

    /// Provider references this kind (or its conditional inner) declares.
    pub(crate) fn length_ref(&self) -> Option<&ProviderRef> {
        match self.effective() {
            Self::Payload { length } | Self::Target { length, .. } | Self::Substruct { length, .. } => {
                length.as_ref()
            },
            Self::Array { sizing: ArraySizing::Bytes(r) | ArraySizing::Count(r), .. } => Some(r),
            _ => None,
        }
    }

    /// True when the provider value counts elements rather than bytes.
    pub(crate) fn counts_elements(&self) -> bool {
        matches!(self.effective(), Self::Array { sizing: ArraySizing::Count(_), .. })
    }
}

impl fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(p) => f.debug_tuple("Primitive").field(p).finish(),
            Self::Bits(record) => f.debug_tuple("Bits").field(record).finish(),
            Self::FixedBytes(n) => f.debug_tuple("FixedBytes").field(n).finish(),
            Self::Magic(constant) => f.debug_tuple("Magic").field(constant).finish(),
            Self::Length { codec, transform } => f
                .debug_struct("Length")
                .field("codec", codec)
                .field("transform", transform)
                .finish(),
            Self::Payload { length } => f.debug_struct("Payload").field("length", length).finish(),
            Self::Dispatch(p) => f.debug_tuple("Dispatch").field(p).finish(),
            Self::Target { dispatch, length, arms, fallback } => f
                .debug_struct("Target")
                .field("dispatch", dispatch)
                .field("length", length)
                .field("arms", &arms.keys().collect::<Vec<_>>())
                .field("fallback", &fallback.as_ref().map(|s| s.name()))
                .finish(),
            Self::Substruct { shape, length } => f
                .debug_struct("Substruct")
                .field("shape", &shape.name())
                .field("length", length)
                .finish(),
            Self::Array { element, sizing } => f
                .debug_struct("Array")
                .field("element", &element.name())
                .field("sizing", sizing)
                .finish(),
            Self::Conditional { inner, .. } => {
                f.debug_struct("Conditional").field("inner", inner).finish_non_exhaustive()
            },
            Self::Dependent { source, codec, .. } => f
                .debug_struct("Dependent")
                .field("source", source)
                .field("codec", codec)
                .finish_non_exhaustive(),
        }
    }
}
