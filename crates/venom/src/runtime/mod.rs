//! The runtime object model: cells, the reference-counted heap, class
//! objects, and function descriptors.

pub mod cell;
pub mod heap;
pub mod natives;

pub use cell::{Cell, CellKind, HeapId};
pub use heap::{Heap, NativePayload};
pub use natives::NativeFn;

use serde::{Deserialize, Serialize};

/// The system-wide cap on function arity.
pub const MAX_ARGS: usize = 64;

/// What a function descriptor points at: an offset into the linked
/// instruction stream, or a native builtin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FuncCode {
    Offset(u32),
    Native(NativeFn),
}

/// Runtime metadata for a callable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub code: FuncCode,
    pub num_args: u32,
    /// Bit `i` set iff argument `i` is a reference cell (bit 0 is the
    /// receiver for methods).
    pub arg_ref_bitmap: u64,
}

impl FunctionDescriptor {
    pub fn new(code: FuncCode, num_args: usize, arg_ref_bitmap: u64) -> Self {
        assert!(num_args <= MAX_ARGS, "function exceeds maximum arity");
        Self {
            code,
            num_args: u32::try_from(num_args).expect("arity fits u32"),
            arg_ref_bitmap,
        }
    }

    #[must_use]
    pub fn is_native(&self) -> bool {
        matches!(self.code, FuncCode::Native(_))
    }
}

/// The built-in storage behavior of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NativeKind {
    /// Plain cell storage (user classes, boxes, refs, module singletons).
    Plain,
    /// Immutable byte string payload.
    Str,
    /// Growable cell vector; primitive element flavors share the layout so
    /// untyped array access works uniformly.
    List(CellKind),
    /// Keyed cell storage.
    Map(CellKind, CellKind),
}

/// Runtime metadata for a class: layout, constructor, and vtable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassObject {
    pub name: String,
    pub n_cells: u32,
    /// Bit `i` set iff cell `i` holds a reference.
    pub ref_cell_bitmap: u64,
    /// Descriptor index of the constructor; module singletons have none.
    pub ctor: Option<u32>,
    /// Descriptor indices in linearized method order.
    pub vtable: Vec<u32>,
    pub native: NativeKind,
}

/// Vtable slot of `stringify` on every class (the object base lays out
/// `stringify`, `hash`, `eq` first).
pub const VTABLE_SLOT_STRINGIFY: usize = 0;
