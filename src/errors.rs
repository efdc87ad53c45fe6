//! Error types for schema declaration and frame encoding/decoding.
//!
//! Two families exist with different lifetimes:
//!
//! - [`DeclarationError`] is raised while a [`Structure`](crate::Structure)
//!   is being built. It indicates a broken schema (duplicate greedy slots,
//!   dangling length providers, ...) and is always a programming error.
//!
//! - [`CodecError`] is raised while packing or unpacking a frame. It carries
//!   the dotted path of the field that failed and the byte offset within the
//!   top-level frame, so a malformed input can be located without knowing
//!   anything about the schema's internal slot ordering.

use std::fmt;

use thiserror::Error;

/// Convenient result alias for pack/unpack operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// One segment of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// A named slot.
    Field(String),
    /// An index into a field array.
    Index(usize),
}

/// Dotted path to a field inside a (possibly nested) frame.
///
/// Rendered as `outer.inner.array[3].field`. Paths are accumulated outward:
/// an error raised deep inside a substructure gains one segment per level as
/// it propagates, so the path at the top level is always rooted at the
/// top-level structure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    /// The empty path, referring to the frame as a whole.
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// True if the path refers to the frame as a whole.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Segments from outermost to innermost.
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    fn push_front(&mut self, segment: PathSegment) {
        self.0.insert(0, segment);
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Field(name) => {
                    if i > 0 {
                        write!(f, ".{name}")?;
                    } else {
                        write!(f, "{name}")?;
                    }
                },
                PathSegment::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}

/// Classifies what went wrong during pack or unpack.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecErrorKind {
    /// Fewer bytes were available than a field needs.
    #[error("short buffer: needed {needed} bytes, {available} available")]
    ShortBuffer {
        /// Bytes the field needs.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// An integer value does not fit the declared width on pack.
    #[error("value {value} out of range for {bits}-bit field")]
    Range {
        /// The offending value.
        value: i128,
        /// Declared field width in bits.
        bits: u32,
    },

    /// A slot held a value of the wrong shape for its field kind.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// What the field kind expects.
        expected: &'static str,
        /// What the instance actually held.
        found: &'static str,
    },

    /// Bytes on the wire did not match a declared magic constant.
    #[error("magic mismatch: expected {expected:02x?}, found {found:02x?}")]
    MagicMismatch {
        /// Declared constant.
        expected: Vec<u8>,
        /// Bytes actually seen.
        found: Vec<u8>,
    },

    /// A length provider's value disagrees with its consumer's actual extent.
    #[error("length inconsistency: declared {declared}, actual {actual}")]
    LengthInconsistency {
        /// Extent claimed by the provider (post-transform).
        declared: u64,
        /// Extent observed.
        actual: u64,
    },

    /// A required slot had no value at pack time.
    #[error("required field is unset")]
    UnsetField,

    /// A dispatch key had no arm in the mapping and no fallback was declared.
    #[error("no dispatch arm for key {key:#x}")]
    UnknownDispatch {
        /// The key read from the dispatch field.
        key: u64,
    },

    /// The enclosing region cannot cover the fixed suffix after a greedy slot.
    #[error("greedy region underflow: fixed suffix needs {needed} bytes, {available} remain")]
    GreedyUnderflow {
        /// Bytes the fixed suffix requires.
        needed: usize,
        /// Bytes remaining in the region.
        available: usize,
    },

    /// An array region ended in the middle of an element.
    #[error("trailing {remaining} bytes do not form a whole array element")]
    ArrayElementUnderflow {
        /// Bytes left over in the array region.
        remaining: usize,
    },

    /// A conditional field's predicate could not be evaluated from the
    /// fields decoded so far.
    #[error("condition not evaluable from earlier fields")]
    ConditionNotEvaluable,

    /// The framer's buffer exceeded its configured limit.
    #[error("framer buffer overflow: {buffered} bytes buffered, limit {limit}")]
    FramerOverflow {
        /// Bytes buffered when the limit was hit.
        buffered: usize,
        /// Configured limit.
        limit: usize,
    },
}

/// A pack/unpack failure, locatable within the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecError {
    kind: CodecErrorKind,
    path: FieldPath,
    offset: usize,
}

impl CodecError {
    /// Create an error at the given absolute byte offset, with an empty path.
    #[must_use]
    pub fn new(kind: CodecErrorKind, offset: usize) -> Self {
        Self { kind, path: FieldPath::root(), offset }
    }

    /// What went wrong.
    #[must_use]
    pub fn kind(&self) -> &CodecErrorKind {
        &self.kind
    }

    /// Dotted path of the field that failed.
    #[must_use]
    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    /// Byte offset within the top-level frame.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Prefix the path with an enclosing field name.
    #[must_use]
    pub(crate) fn in_field(mut self, name: &str) -> Self {
        self.path.push_front(PathSegment::Field(name.to_owned()));
        self
    }

    /// Prefix the path with an array index.
    #[must_use]
    pub(crate) fn at_index(mut self, index: usize) -> Self {
        self.path.push_front(PathSegment::Index(index));
        self
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_root() {
            write!(f, "{} (offset {})", self.kind, self.offset)
        } else {
            write!(f, "{} at `{}` (offset {})", self.kind, self.path, self.offset)
        }
    }
}

impl std::error::Error for CodecError {}

/// A schema violation detected while building a [`Structure`](crate::Structure).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeclarationError {
    /// Two slots share a name.
    #[error("duplicate slot name `{name}`")]
    DuplicateSlot {
        /// The repeated name.
        name: String,
    },

    /// More than one slot would consume "everything remaining".
    #[error("duplicate greedy slots: `{first}` and `{second}`")]
    DuplicateGreedy {
        /// First greedy slot, in wire order.
        first: String,
        /// Second greedy slot.
        second: String,
    },

    /// A length or dispatch provider has no consumer.
    #[error("provider `{provider}` has no consumer")]
    DanglingProvider {
        /// The unconsumed provider slot.
        provider: String,
    },

    /// A consumer references a provider that does not exist.
    #[error("`{consumer}` references unknown provider `{provider}`")]
    UnknownProvider {
        /// The referencing slot.
        consumer: String,
        /// The missing provider name.
        provider: String,
    },

    /// A consumer's provider appears later in wire order.
    #[error("provider `{provider}` must precede its consumer `{consumer}`")]
    ProviderAfterConsumer {
        /// The referencing slot.
        consumer: String,
        /// The out-of-order provider.
        provider: String,
    },

    /// Two consumers claim the same provider.
    #[error("provider `{provider}` is claimed by both `{first}` and `{second}`")]
    SharedProvider {
        /// The contested provider.
        provider: String,
        /// First claimant.
        first: String,
        /// Second claimant.
        second: String,
    },

    /// A provider reference points at a slot of the wrong kind.
    #[error("`{consumer}` expects `{provider}` to be a {expected}")]
    ProviderKind {
        /// The referencing slot.
        consumer: String,
        /// The referenced slot.
        provider: String,
        /// Kind the reference requires.
        expected: &'static str,
    },

    /// A length or dispatch slot uses a codec that cannot hold an
    /// unsigned count or key.
    #[error("provider slot `{slot}` must use an unsigned integer codec")]
    ProviderCodec {
        /// The offending slot.
        slot: String,
    },

    /// Bit sub-slot widths do not sum to the container width.
    #[error("bit record sub-slots cover {actual} bits, container is {declared} bits wide")]
    BitWidthMismatch {
        /// Declared container width in bits.
        declared: u32,
        /// Sum of sub-slot widths.
        actual: u32,
    },

    /// A bit sub-slot is zero bits wide or wider than its container.
    #[error("bit sub-slot `{slot}` has invalid width {bits}")]
    BitSlotWidth {
        /// The offending sub-slot.
        slot: String,
        /// Its declared width.
        bits: u32,
    },

    /// A dependent field references an unknown or later slot.
    #[error("dependent slot `{slot}` requires `{source_slot}` to exist earlier in wire order")]
    DependentSource {
        /// The dependent slot.
        slot: String,
        /// The referenced source.
        source_slot: String,
    },

    /// A variable-extent slot follows the greedy slot.
    #[error("slot `{slot}` after greedy slot `{greedy}` must be fixed-width")]
    NonFixedAfterGreedy {
        /// The greedy slot.
        greedy: String,
        /// The offending later slot.
        slot: String,
    },

    /// An array's element structure contains a greedy slot. The first
    /// element would consume the entire element region, so elements must
    /// be self-delimiting.
    #[error("array slot `{slot}` has a greedy element structure")]
    GreedyArrayElement {
        /// The array slot.
        slot: String,
    },

    /// A magic constant with no bytes.
    #[error("magic constant must not be empty")]
    EmptyMagic,

    /// A fixed byte block of zero length.
    #[error("slot `{slot}` declares a zero-width byte block")]
    ZeroWidth {
        /// The offending slot.
        slot: String,
    },

    /// The structure's total frame length cannot be computed from a prefix,
    /// which stream framing requires.
    #[error("frame length is not determinable: slot `{slot}` is greedy")]
    UnsizableFrame {
        /// The slot that makes sizing impossible.
        slot: String,
    },

    /// An integer width that is not a whole number of bytes in 8..=64.
    #[error("unsupported integer width: {bits} bits")]
    UnsupportedWidth {
        /// The requested width.
        bits: u32,
    },
}
