//! Two-pass value-to-bytes translation.
//!
//! Pass 1 walks slots in wire order resolving everything that is derived
//! rather than supplied: dependent fields are computed from their source
//! slot, and each length provider's consumer is tentatively packed into a
//! scratch buffer to learn its extent, which is then written (through the
//! store transform) into a working copy of the instance. The scratch bytes
//! are kept so pass 2 does not pack variable consumers twice.
//!
//! Pass 2 walks slots again, emitting each one. Given the same input
//! instance the output is byte-for-byte identical.
//!
//! Nested structures recurse through the same entry point, so providers in
//! an inner structure resolve before the outer provider that measures it.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    errors::{CodecError, CodecErrorKind, Result},
    field::{Condition, FieldKind},
    structure::Structure,
    value::{Instance, Value},
};

struct Plan {
    resolved: Instance,
    /// Pre-packed bytes per consumer slot, produced while resolving its
    /// provider.
    pre: Vec<Option<Bytes>>,
}

pub(crate) fn pack_structure(shape: &Structure, instance: &Instance) -> Result<Bytes> {
    let plan = resolve(shape, instance)?;
    let mut buf = BytesMut::new();
    for i in 0..shape.slots.len() {
        if let Some(pre) = &plan.pre[i] {
            buf.put_slice(pre);
        } else {
            emit_slot(shape, i, &shape.slots[i].kind, &plan, &mut buf)?;
        }
    }
    Ok(buf.freeze())
}

fn resolve(shape: &Structure, instance: &Instance) -> Result<Plan> {
    let mut plan = Plan {
        resolved: instance.clone(),
        pre: vec![None; shape.slots.len()],
    };

    // Dependent fields first: they may chain, and conditions or consumers
    // later in the walk are allowed to read them.
    for slot in &shape.slots {
        if let FieldKind::Dependent { source, derive, .. } = &slot.kind {
            let value = plan
                .resolved
                .get(source)
                .ok_or_else(|| CodecError::new(CodecErrorKind::UnsetField, 0).in_field(source))?
                .clone();
            plan.resolved.set(slot.name.clone(), derive(&value));
        }
    }

    for i in 0..shape.slots.len() {
        if shape.consumers[i].is_empty() {
            continue;
        }
        match &shape.slots[i].kind {
            FieldKind::Length { transform, .. } => {
                // Exactly one consumer per length slot, by construction.
                for link in &shape.consumers[i] {
                    let actual = prepack_consumer(shape, link.consumer, &mut plan)?;
                    let stored = transform.as_ref().map_or(actual, |t| t.store(actual));
                    let back = transform.as_ref().map_or(stored, |t| t.load(stored));
                    if back != actual {
                        return Err(CodecError::new(
                            CodecErrorKind::LengthInconsistency { declared: back, actual },
                            0,
                        )
                        .in_field(&shape.slots[i].name));
                    }
                    plan.resolved.set(shape.slots[i].name.clone(), Value::UInt(stored));
                }
            },
            FieldKind::Bits(_) => {
                for link in &shape.consumers[i] {
                    let Some(bit) = link.bit.clone() else { continue };
                    let actual = prepack_consumer(shape, link.consumer, &mut plan)?;
                    let name = &shape.slots[i].name;
                    let mut child = plan.resolved.child(name).cloned().unwrap_or_default();
                    child.set(bit, Value::UInt(actual));
                    plan.resolved.set(name.clone(), Value::Struct(child));
                }
            },
            // Dispatch keys are caller-supplied; arm lookup failures surface
            // when the target itself is emitted.
            _ => {},
        }
    }

    Ok(plan)
}

/// Pack the consumer at `index` into scratch, record the bytes, and return
/// the extent its provider stores (bytes, or elements for count-sized
/// arrays).
fn prepack_consumer(shape: &Structure, index: usize, plan: &mut Plan) -> Result<u64> {
    let mut scratch = BytesMut::new();
    emit_slot(shape, index, &shape.slots[index].kind, plan, &mut scratch)?;
    let metric = if shape.slots[index].kind.counts_elements() {
        element_count(shape, index, &shape.slots[index].kind, plan)?
    } else {
        scratch.len() as u64
    };
    plan.pre[index] = Some(scratch.freeze());
    Ok(metric)
}

fn element_count(shape: &Structure, index: usize, kind: &FieldKind, plan: &Plan) -> Result<u64> {
    match kind {
        FieldKind::Conditional { condition, inner } => {
            if eval_condition(condition, &plan.resolved, &shape.slots[index].name, 0)? {
                element_count(shape, index, inner, plan)
            } else {
                Ok(0)
            }
        },
        FieldKind::Array { .. } => Ok(plan
            .resolved
            .array(&shape.slots[index].name)
            .map_or(0, |items| items.len() as u64)),
        _ => Ok(0),
    }
}

fn eval_condition(
    condition: &Condition,
    frame: &Instance,
    name: &str,
    offset: usize,
) -> Result<bool> {
    condition(frame).ok_or_else(|| {
        CodecError::new(CodecErrorKind::ConditionNotEvaluable, offset).in_field(name)
    })
}

fn require<'a>(plan: &'a Plan, name: &str, offset: usize) -> Result<&'a Value> {
    plan.resolved
        .get(name)
        .ok_or_else(|| CodecError::new(CodecErrorKind::UnsetField, offset).in_field(name))
}

fn require_bytes<'a>(plan: &'a Plan, name: &str, offset: usize) -> Result<&'a Bytes> {
    match require(plan, name, offset)? {
        Value::Bytes(b) => Ok(b),
        other => Err(CodecError::new(
            CodecErrorKind::TypeMismatch { expected: "bytes", found: other.kind_name() },
            offset,
        )
        .in_field(name)),
    }
}

fn require_child<'a>(plan: &'a Plan, name: &str, offset: usize) -> Result<&'a Instance> {
    match require(plan, name, offset)? {
        Value::Struct(child) => Ok(child),
        other => Err(CodecError::new(
            CodecErrorKind::TypeMismatch { expected: "struct", found: other.kind_name() },
            offset,
        )
        .in_field(name)),
    }
}

fn emit_slot(
    shape: &Structure,
    index: usize,
    kind: &FieldKind,
    plan: &Plan,
    buf: &mut BytesMut,
) -> Result<()> {
    let name = &shape.slots[index].name;
    let offset = buf.len();
    match kind {
        FieldKind::Primitive(codec)
        | FieldKind::Dispatch(codec)
        | FieldKind::Length { codec, .. }
        | FieldKind::Dependent { codec, .. } => {
            let value = require(plan, name, offset)?;
            codec
                .pack(value, buf)
                .map_err(|kind| CodecError::new(kind, offset).in_field(name))
        },
        FieldKind::Bits(record) => {
            let child = require_child(plan, name, offset)?;
            record.pack(child, offset, buf).map_err(|e| e.in_field(name))
        },
        FieldKind::FixedBytes(width) => {
            let bytes = require_bytes(plan, name, offset)?;
            if bytes.len() != *width {
                return Err(CodecError::new(
                    CodecErrorKind::LengthInconsistency {
                        declared: *width as u64,
                        actual: bytes.len() as u64,
                    },
                    offset,
                )
                .in_field(name));
            }
            buf.put_slice(bytes);
            Ok(())
        },
        FieldKind::Magic(constant) => {
            if let Some(Value::Bytes(overridden)) = plan.resolved.get(name) {
                if overridden != constant {
                    return Err(CodecError::new(
                        CodecErrorKind::MagicMismatch {
                            expected: constant.to_vec(),
                            found: overridden.to_vec(),
                        },
                        offset,
                    )
                    .in_field(name));
                }
            }
            buf.put_slice(constant);
            Ok(())
        },
        FieldKind::Payload { .. } => {
            let bytes = require_bytes(plan, name, offset)?;
            buf.put_slice(bytes);
            Ok(())
        },
        FieldKind::Substruct { shape: inner, .. } => {
            let child = require_child(plan, name, offset)?;
            let bytes = pack_structure(inner, child).map_err(|e| e.in_field(name))?;
            buf.put_slice(&bytes);
            Ok(())
        },
        FieldKind::Target { dispatch, arms, fallback, .. } => {
            let key = match require(plan, dispatch, offset)? {
                Value::UInt(key) => *key,
                other => {
                    return Err(CodecError::new(
                        CodecErrorKind::TypeMismatch {
                            expected: "unsigned integer",
                            found: other.kind_name(),
                        },
                        offset,
                    )
                    .in_field(dispatch))
                },
            };
            let arm = arms.get(&key).or(fallback.as_ref()).ok_or_else(|| {
                CodecError::new(CodecErrorKind::UnknownDispatch { key }, offset).in_field(name)
            })?;
            let child = require_child(plan, name, offset)?;
            let bytes = pack_structure(arm, child).map_err(|e| e.in_field(name))?;
            buf.put_slice(&bytes);
            Ok(())
        },
        FieldKind::Array { element, sizing: _ } => {
            let items = match require(plan, name, offset)? {
                Value::Array(items) => items,
                other => {
                    return Err(CodecError::new(
                        CodecErrorKind::TypeMismatch { expected: "array", found: other.kind_name() },
                        offset,
                    )
                    .in_field(name))
                },
            };
            for (idx, item) in items.iter().enumerate() {
                let child = item.as_struct().ok_or_else(|| {
                    CodecError::new(
                        CodecErrorKind::TypeMismatch {
                            expected: "struct",
                            found: item.kind_name(),
                        },
                        buf.len(),
                    )
                    .at_index(idx)
                    .in_field(name)
                })?;
                let bytes = pack_structure(element, child)
                    .map_err(|e| e.at_index(idx).in_field(name))?;
                buf.put_slice(&bytes);
            }
            Ok(())
        },
        FieldKind::Conditional { condition, inner } => {
            if eval_condition(condition, &plan.resolved, name, offset)? {
                emit_slot(shape, index, inner, plan, buf)
            } else {
                Ok(())
            }
        },
    }
}
