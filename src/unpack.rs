//! Bytes-to-value translation.
//!
//! The unpacker walks slots in wire order over a byte region with a known
//! start and end (the *enclosing extent*), maintaining a cursor. Fixed slots
//! consume their declared width; bounded slots consume exactly what their
//! provider (decoded earlier in the same walk) says; a greedy slot consumes
//! everything remaining minus the summed width of the fixed slots after it.
//!
//! Nested structures complete before the outer cursor advances. Errors gain
//! a path segment per level as they propagate, and offsets are absolute
//! within the top-level frame (`base` is threaded through the recursion).

use bytes::Bytes;

use crate::{
    errors::{CodecError, CodecErrorKind, Result},
    field::{ArraySizing, FieldKind},
    structure::Structure,
    value::{Instance, Value},
};

/// Unpack `shape` from `data`. With `exact`, every byte must be consumed;
/// otherwise trailing bytes are left for the caller and the consumed count
/// is returned alongside the instance.
pub(crate) fn unpack_structure(
    shape: &Structure,
    data: &[u8],
    base: usize,
    exact: bool,
) -> Result<(Instance, usize)> {
    let mut instance = Instance::new();
    let mut cursor = 0usize;
    for i in 0..shape.slots.len() {
        let consumed =
            unpack_slot(shape, i, &shape.slots[i].kind, &data[cursor..], base + cursor, &mut instance)?;
        cursor += consumed;
    }
    if exact && cursor != data.len() {
        return Err(CodecError::new(
            CodecErrorKind::LengthInconsistency {
                declared: data.len() as u64,
                actual: cursor as u64,
            },
            base + cursor,
        ));
    }
    Ok((instance, cursor))
}

/// Unpack the slot at `index` from the front of `window` (which extends to
/// the end of the enclosing region). Returns the bytes consumed.
pub(crate) fn unpack_slot(
    shape: &Structure,
    index: usize,
    kind: &FieldKind,
    window: &[u8],
    abs: usize,
    instance: &mut Instance,
) -> Result<usize> {
    let name = &shape.slots[index].name;
    match kind {
        FieldKind::Primitive(codec)
        | FieldKind::Dispatch(codec)
        | FieldKind::Length { codec, .. }
        | FieldKind::Dependent { codec, .. } => {
            let (value, consumed) = codec
                .unpack(window)
                .map_err(|kind| CodecError::new(kind, abs).in_field(name))?;
            instance.set(name.clone(), value);
            Ok(consumed)
        },
        FieldKind::Bits(record) => {
            let (child, consumed) =
                record.unpack(window, abs).map_err(|e| e.in_field(name))?;
            instance.set(name.clone(), Value::Struct(child));
            Ok(consumed)
        },
        FieldKind::FixedBytes(width) => {
            let bytes = take(window, *width, abs, name)?;
            instance.set(name.clone(), Value::Bytes(Bytes::copy_from_slice(bytes)));
            Ok(*width)
        },
        FieldKind::Magic(constant) => {
            let bytes = take(window, constant.len(), abs, name)?;
            if bytes != constant.as_ref() {
                return Err(CodecError::new(
                    CodecErrorKind::MagicMismatch {
                        expected: constant.to_vec(),
                        found: bytes.to_vec(),
                    },
                    abs,
                )
                .in_field(name));
            }
            // The constant is recoverable from the descriptor; it does not
            // occupy a slot in the decoded instance.
            Ok(constant.len())
        },
        FieldKind::Payload { length } => {
            let region = match length {
                Some(_) => bounded_region(shape, index, window, abs, name, instance)?,
                None => greedy_region(shape, index, window, abs)?,
            };
            instance.set(name.clone(), Value::Bytes(Bytes::copy_from_slice(region)));
            Ok(region.len())
        },
        FieldKind::Substruct { shape: inner, length } => {
            match length {
                Some(_) => {
                    let region = bounded_region(shape, index, window, abs, name, instance)?;
                    let (child, _) = unpack_structure(inner, region, abs, true)
                        .map_err(|e| e.in_field(name))?;
                    instance.set(name.clone(), Value::Struct(child));
                    Ok(region.len())
                },
                None if inner.has_greedy() => {
                    let region = greedy_region(shape, index, window, abs)?;
                    let (child, _) = unpack_structure(inner, region, abs, true)
                        .map_err(|e| e.in_field(name))?;
                    instance.set(name.clone(), Value::Struct(child));
                    Ok(region.len())
                },
                None => {
                    // Self-delimiting: the inner structure consumes what it
                    // needs out of the remaining window.
                    let (child, consumed) = unpack_structure(inner, window, abs, false)
                        .map_err(|e| e.in_field(name))?;
                    instance.set(name.clone(), Value::Struct(child));
                    Ok(consumed)
                },
            }
        },
        FieldKind::Target { dispatch, length, arms, fallback } => {
            let key = instance.uint(dispatch).ok_or_else(|| {
                CodecError::new(CodecErrorKind::UnsetField, abs).in_field(dispatch)
            })?;
            let arm = arms.get(&key).or(fallback.as_ref()).ok_or_else(|| {
                CodecError::new(CodecErrorKind::UnknownDispatch { key }, abs).in_field(name)
            })?;
            let region = match length {
                Some(_) => bounded_region(shape, index, window, abs, name, instance)?,
                None => greedy_region(shape, index, window, abs)?,
            };
            let (child, _) =
                unpack_structure(arm, region, abs, true).map_err(|e| e.in_field(name))?;
            instance.set(name.clone(), Value::Struct(child));
            Ok(region.len())
        },
        FieldKind::Array { element, sizing } => match sizing {
            ArraySizing::Bytes(_) => {
                let region = bounded_region(shape, index, window, abs, name, instance)?;
                let items = unpack_elements(element, region, abs, name)?;
                instance.set(name.clone(), Value::Array(items));
                Ok(region.len())
            },
            ArraySizing::Greedy => {
                let region = greedy_region(shape, index, window, abs)?;
                let items = unpack_elements(element, region, abs, name)?;
                instance.set(name.clone(), Value::Array(items));
                Ok(region.len())
            },
            ArraySizing::Count(_) => {
                let count = provider_value(shape, index, abs, name, instance)?;
                let mut items = Vec::new();
                let mut used = 0usize;
                for idx in 0..count {
                    let (child, consumed) =
                        unpack_structure(element, &window[used..], abs + used, false)
                            .map_err(|e| e.at_index(idx as usize).in_field(name))?;
                    if consumed == 0 {
                        return Err(CodecError::new(
                            CodecErrorKind::ArrayElementUnderflow {
                                remaining: window.len() - used,
                            },
                            abs + used,
                        )
                        .in_field(name));
                    }
                    items.push(Value::Struct(child));
                    used += consumed;
                }
                instance.set(name.clone(), Value::Array(items));
                Ok(used)
            },
        },
        FieldKind::Conditional { condition, inner } => {
            let present = condition(instance).ok_or_else(|| {
                CodecError::new(CodecErrorKind::ConditionNotEvaluable, abs).in_field(name)
            })?;
            if present {
                unpack_slot(shape, index, inner, window, abs, instance)
            } else {
                Ok(0)
            }
        },
    }
}

/// Decode one array region: whole elements until the region is exhausted.
/// An empty region is an empty array; a partial trailing element is an
/// error.
fn unpack_elements(
    element: &Structure,
    region: &[u8],
    abs: usize,
    name: &str,
) -> Result<Vec<Value>> {
    let mut items = Vec::new();
    let mut used = 0usize;
    while used < region.len() {
        let idx = items.len();
        let (child, consumed) = unpack_structure(element, &region[used..], abs + used, false)
            .map_err(|e| match e.kind() {
                CodecErrorKind::ShortBuffer { .. } => CodecError::new(
                    CodecErrorKind::ArrayElementUnderflow { remaining: region.len() - used },
                    abs + used,
                )
                .in_field(name),
                _ => e.at_index(idx).in_field(name),
            })?;
        if consumed == 0 {
            return Err(CodecError::new(
                CodecErrorKind::ArrayElementUnderflow { remaining: region.len() - used },
                abs + used,
            )
            .in_field(name));
        }
        items.push(Value::Struct(child));
        used += consumed;
    }
    Ok(items)
}

/// Resolve the post-transform value of the provider feeding `index`.
pub(crate) fn provider_value(
    shape: &Structure,
    index: usize,
    abs: usize,
    name: &str,
    instance: &Instance,
) -> Result<u64> {
    let resolved = shape.providers[index].as_ref().ok_or_else(|| {
        // Unreachable for structures that passed the builder; kept as an
        // error rather than a panic.
        CodecError::new(CodecErrorKind::UnsetField, abs).in_field(name)
    })?;
    let provider = &shape.slots[resolved.slot];
    let raw = match &resolved.bit {
        None => instance.get(&provider.name).and_then(Value::as_provider),
        Some(bit) => instance
            .child(&provider.name)
            .and_then(|child| child.get(bit))
            .and_then(Value::as_provider),
    }
    .ok_or_else(|| CodecError::new(CodecErrorKind::UnsetField, abs).in_field(&provider.name))?;

    Ok(match &provider.kind {
        FieldKind::Length { transform: Some(t), .. } => t.load(raw),
        _ => raw,
    })
}

/// The exactly-`provider_value`-bytes region for a bounded consumer.
fn bounded_region<'d>(
    shape: &Structure,
    index: usize,
    window: &'d [u8],
    abs: usize,
    name: &str,
    instance: &Instance,
) -> Result<&'d [u8]> {
    let declared = provider_value(shape, index, abs, name, instance)?;
    if declared > window.len() as u64 {
        return Err(CodecError::new(
            CodecErrorKind::ShortBuffer {
                needed: usize::try_from(declared).unwrap_or(usize::MAX),
                available: window.len(),
            },
            abs,
        )
        .in_field(name));
    }
    // declared <= window.len() here, so the cast cannot truncate.
    Ok(&window[..declared as usize])
}

/// Everything remaining minus the fixed suffix pinned after a greedy slot.
fn greedy_region<'d>(
    shape: &Structure,
    index: usize,
    window: &'d [u8],
    abs: usize,
) -> Result<&'d [u8]> {
    let suffix = shape.suffix[index];
    if window.len() < suffix {
        return Err(CodecError::new(
            CodecErrorKind::GreedyUnderflow { needed: suffix, available: window.len() },
            abs,
        )
        .in_field(&shape.slots[index].name));
    }
    Ok(&window[..window.len() - suffix])
}

fn take<'d>(window: &'d [u8], width: usize, abs: usize, name: &str) -> Result<&'d [u8]> {
    if window.len() < width {
        return Err(CodecError::new(
            CodecErrorKind::ShortBuffer { needed: width, available: window.len() },
            abs,
        )
        .in_field(name));
    }
    Ok(&window[..width])
}
