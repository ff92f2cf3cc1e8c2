//! Native builtin functions.
//!
//! Every native receives its arguments in declaration order (the receiver
//! first for methods) and returns a cell that already owns a strong
//! reference when it is reference-typed; the trampoline releases the
//! argument references afterwards.

use std::fmt::Write;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::{
    error::{RunResult, RuntimeError},
    runtime::{Cell, CellKind, HeapId, NativePayload},
    vm::ExecutionContext,
};

/// The builtin inventory; function descriptors reference these by value so
/// a linked executable stays serializable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NativeFn {
    Print,

    ObjectCtor,
    ObjectStringify,
    ObjectHash,
    ObjectEq,

    StringCtor,
    StringStringify,
    StringHash,
    StringEq,
    StringConcat,
    StringSize,

    BoxIntCtor,
    BoxIntStringify,
    BoxFloatCtor,
    BoxFloatStringify,
    BoxBoolCtor,
    BoxBoolStringify,
    BoxHash,
    BoxEq,

    RefCtor,

    ListCtor,
    ListStringify,
    ListGet,
    ListSet,
    ListAppend,
    ListSize,

    MapCtor,
    MapStringify,
    MapGet,
    MapSet,
    MapSize,
}

fn self_id(args: &[Cell]) -> RunResult<HeapId> {
    args.first()
        .and_then(|c| c.as_obj())
        .ok_or_else(RuntimeError::null_pointer)
}

fn fmt_float(v: f64) -> String {
    let mut s = String::new();
    let _ = write!(s, "{v}");
    s
}

fn content_hash(bytes: &[u8]) -> i64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish().cast_signed()
}

impl NativeFn {
    pub fn invoke(self, ctx: &mut ExecutionContext<'_>, args: &[Cell]) -> RunResult<Cell> {
        match self {
            Self::Print => {
                let line = ctx.stringify_ref(args[0])?;
                ctx.sink.print_line(&line);
                Ok(Cell::NIL)
            }

            Self::ObjectCtor
            | Self::StringCtor
            | Self::RefCtor
            | Self::ListCtor
            | Self::MapCtor => Ok(Cell::NIL),

            Self::ObjectStringify => {
                let id = self_id(args)?;
                Ok(ctx.alloc_string(format!("object@{}", id.0)))
            }
            Self::ObjectHash => {
                let id = self_id(args)?;
                Ok(Cell::from_int(i64::from(id.0)))
            }
            Self::ObjectEq => {
                // pointer equality
                Ok(Cell::from_bool(args[0].as_obj() == args[1].as_obj()))
            }

            Self::StringStringify => {
                let id = self_id(args)?;
                let _ = id;
                ctx.heap.inc_ref(args[0]);
                Ok(args[0])
            }
            Self::StringHash => {
                let id = self_id(args)?;
                Ok(Cell::from_int(content_hash(ctx.heap.str_of(id).as_bytes())))
            }
            Self::StringEq => {
                let a = self_id(args)?;
                let eq = match args[1].as_obj() {
                    Some(b) => {
                        matches!(
                            (&ctx.heap.get(a).payload, &ctx.heap.get(b).payload),
                            (NativePayload::Str(x), NativePayload::Str(y)) if x == y
                        )
                    }
                    None => false,
                };
                Ok(Cell::from_bool(eq))
            }
            Self::StringConcat => {
                let a = self_id(args)?;
                let b = args[1].as_obj().ok_or_else(RuntimeError::null_pointer)?;
                let joined = format!("{}{}", ctx.heap.str_of(a), ctx.heap.str_of(b));
                Ok(ctx.alloc_string(joined))
            }
            Self::StringSize => {
                let id = self_id(args)?;
                Ok(Cell::from_int(ctx.heap.str_of(id).len() as i64))
            }

            Self::BoxIntCtor | Self::BoxFloatCtor | Self::BoxBoolCtor => {
                let id = self_id(args)?;
                ctx.heap.get_mut(id).cells[0] = args[1];
                Ok(Cell::NIL)
            }
            Self::BoxIntStringify => {
                let id = self_id(args)?;
                let v = ctx.heap.get(id).cells[0].as_int();
                Ok(ctx.alloc_string(v.to_string()))
            }
            Self::BoxFloatStringify => {
                let id = self_id(args)?;
                let v = ctx.heap.get(id).cells[0].as_float();
                Ok(ctx.alloc_string(fmt_float(v)))
            }
            Self::BoxBoolStringify => {
                let id = self_id(args)?;
                let v = ctx.heap.get(id).cells[0].as_bool();
                Ok(ctx.alloc_string((if v { "true" } else { "false" }).to_owned()))
            }
            Self::BoxHash => {
                let id = self_id(args)?;
                Ok(Cell::from_int(ctx.heap.get(id).cells[0].raw().cast_signed()))
            }
            Self::BoxEq => {
                let a = self_id(args)?;
                let eq = match args[1].as_obj() {
                    Some(b) => {
                        ctx.heap.get(a).class == ctx.heap.get(b).class
                            && ctx.heap.get(a).cells[0] == ctx.heap.get(b).cells[0]
                    }
                    None => false,
                };
                Ok(Cell::from_bool(eq))
            }

            Self::ListStringify => {
                let id = self_id(args)?;
                let (elems, elem_is_ref) = match &ctx.heap.get(id).payload {
                    NativePayload::List { elems, elem_is_ref } => (elems.clone(), *elem_is_ref),
                    _ => return Err(RuntimeError::new("list payload expected")),
                };
                let kind = elem_cell_kind(ctx, id);
                let mut buf = String::from("[");
                for (i, &e) in elems.iter().enumerate() {
                    if i > 0 {
                        buf.push_str(", ");
                    }
                    buf.push_str(&stringify_cell(ctx, e, kind, elem_is_ref)?);
                }
                buf.push(']');
                Ok(ctx.alloc_string(buf))
            }
            Self::ListGet => {
                let id = self_id(args)?;
                let (cell, elem_is_ref) = match &ctx.heap.get(id).payload {
                    NativePayload::List { elems, elem_is_ref } => {
                        let i = usize::try_from(args[1].as_int())
                            .map_err(|_| RuntimeError::new("list index out of range"))?;
                        let cell = elems
                            .get(i)
                            .copied()
                            .ok_or_else(|| RuntimeError::new("list index out of range"))?;
                        (cell, *elem_is_ref)
                    }
                    _ => return Err(RuntimeError::new("list payload expected")),
                };
                if elem_is_ref {
                    ctx.heap.inc_ref(cell);
                }
                Ok(cell)
            }
            Self::ListSet => {
                let id = self_id(args)?;
                let i = usize::try_from(args[1].as_int())
                    .map_err(|_| RuntimeError::new("list index out of range"))?;
                let value = args[2];
                let mut released = None;
                let is_ref = match &mut ctx.heap.get_mut(id).payload {
                    NativePayload::List { elems, elem_is_ref } => {
                        let old = elems
                            .get_mut(i)
                            .ok_or_else(|| RuntimeError::new("list index out of range"))?;
                        if *elem_is_ref {
                            released = Some(*old);
                        }
                        *old = value;
                        *elem_is_ref
                    }
                    _ => return Err(RuntimeError::new("list payload expected")),
                };
                // the stored cell must outlive the trampoline's release
                if is_ref {
                    ctx.heap.inc_ref(value);
                    if let Some(old) = released {
                        ctx.heap.dec_ref(old);
                    }
                }
                Ok(Cell::NIL)
            }
            Self::ListAppend => {
                let id = self_id(args)?;
                let value = args[1];
                let is_ref = match &mut ctx.heap.get_mut(id).payload {
                    NativePayload::List { elems, elem_is_ref } => {
                        elems.push(value);
                        *elem_is_ref
                    }
                    _ => return Err(RuntimeError::new("list payload expected")),
                };
                if is_ref {
                    ctx.heap.inc_ref(value);
                }
                Ok(Cell::NIL)
            }
            Self::ListSize => {
                let id = self_id(args)?;
                match &ctx.heap.get(id).payload {
                    NativePayload::List { elems, .. } => Ok(Cell::from_int(elems.len() as i64)),
                    _ => Err(RuntimeError::new("list payload expected")),
                }
            }

            Self::MapStringify => {
                let id = self_id(args)?;
                let (entries, key_kind, value_kind) = match &ctx.heap.get(id).payload {
                    NativePayload::Map(data) => (
                        data.entries.values().copied().collect::<Vec<_>>(),
                        data.key_kind,
                        data.value_kind,
                    ),
                    _ => return Err(RuntimeError::new("map payload expected")),
                };
                let mut buf = String::from("{");
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        buf.push_str(", ");
                    }
                    buf.push_str(&stringify_cell(ctx, *k, key_kind, key_kind == CellKind::Ref)?);
                    buf.push_str(" : ");
                    buf.push_str(&stringify_cell(
                        ctx,
                        *v,
                        value_kind,
                        value_kind == CellKind::Ref,
                    )?);
                }
                buf.push('}');
                Ok(ctx.alloc_string(buf))
            }
            Self::MapGet => {
                let id = self_id(args)?;
                let (value, value_is_ref) = match &ctx.heap.get(id).payload {
                    NativePayload::Map(data) => {
                        let key = ctx.heap.map_key(data.key_kind, args[1]);
                        let (_, value) = data
                            .entries
                            .get(&key)
                            .ok_or_else(|| RuntimeError::new("key not found in map"))?;
                        (*value, data.value_kind == CellKind::Ref)
                    }
                    _ => return Err(RuntimeError::new("map payload expected")),
                };
                if value_is_ref {
                    ctx.heap.inc_ref(value);
                }
                Ok(value)
            }
            Self::MapSet => {
                let id = self_id(args)?;
                let (key_cell, value) = (args[1], args[2]);
                let map_key = match &ctx.heap.get(id).payload {
                    NativePayload::Map(data) => ctx.heap.map_key(data.key_kind, key_cell),
                    _ => return Err(RuntimeError::new("map payload expected")),
                };
                let mut released: Vec<Cell> = Vec::new();
                let (key_is_ref, value_is_ref) = match &mut ctx.heap.get_mut(id).payload {
                    NativePayload::Map(data) => {
                        if let Some((old_key, old_value)) =
                            data.entries.insert(map_key, (key_cell, value))
                        {
                            if data.key_kind == CellKind::Ref {
                                released.push(old_key);
                            }
                            if data.value_kind == CellKind::Ref {
                                released.push(old_value);
                            }
                        }
                        (
                            data.key_kind == CellKind::Ref,
                            data.value_kind == CellKind::Ref,
                        )
                    }
                    _ => return Err(RuntimeError::new("map payload expected")),
                };
                if key_is_ref {
                    ctx.heap.inc_ref(key_cell);
                }
                if value_is_ref {
                    ctx.heap.inc_ref(value);
                }
                for old in released {
                    ctx.heap.dec_ref(old);
                }
                Ok(Cell::NIL)
            }
            Self::MapSize => {
                let id = self_id(args)?;
                match &ctx.heap.get(id).payload {
                    NativePayload::Map(data) => Ok(Cell::from_int(data.entries.len() as i64)),
                    _ => Err(RuntimeError::new("map payload expected")),
                }
            }
        }
    }
}

/// The element flavor of a list class.
fn elem_cell_kind(ctx: &ExecutionContext<'_>, id: HeapId) -> CellKind {
    match ctx.class_of(id).native {
        crate::runtime::NativeKind::List(kind) => kind,
        _ => CellKind::Ref,
    }
}

/// Displays a cell of a known flavor; reference cells go through their
/// class's `stringify`.
fn stringify_cell(
    ctx: &mut ExecutionContext<'_>,
    cell: Cell,
    kind: CellKind,
    is_ref: bool,
) -> RunResult<String> {
    if is_ref {
        if cell.as_obj().is_none() {
            return Ok("nil".to_owned());
        }
        return ctx.stringify_ref(cell);
    }
    Ok(match kind {
        CellKind::Int => cell.as_int().to_string(),
        CellKind::Float => fmt_float(cell.as_float()),
        CellKind::Bool => (if cell.as_bool() { "true" } else { "false" }).to_owned(),
        CellKind::Ref => unreachable!("handled above"),
    })
}
