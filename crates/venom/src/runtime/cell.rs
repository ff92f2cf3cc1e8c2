//! Cells: 64-bit untagged value slots.
//!
//! A cell does not know what it contains; the opcode that manipulates it
//! carries the flavor statically. References are heap handles; handle 0 is
//! reserved, so an all-zero cell reads as the nil reference.

use serde::{Deserialize, Serialize};

/// Handle to a heap slot. Zero is nil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeapId(pub u32);

/// The statically-known flavor of a cell, used where runtime structures
/// (list elements, map keys) must remember how to treat their cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CellKind {
    #[default]
    Int,
    Float,
    Bool,
    Ref,
}

/// A 64-bit raw value slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cell(u64);

impl Cell {
    pub const NIL: Self = Self(0);

    #[inline]
    #[must_use]
    pub fn from_int(v: i64) -> Self {
        Self(v.cast_unsigned())
    }

    #[inline]
    #[must_use]
    pub fn from_float(v: f64) -> Self {
        Self(v.to_bits())
    }

    #[inline]
    #[must_use]
    pub fn from_bool(v: bool) -> Self {
        Self(u64::from(v))
    }

    #[inline]
    #[must_use]
    pub fn from_obj(id: HeapId) -> Self {
        Self(u64::from(id.0))
    }

    #[inline]
    #[must_use]
    pub fn as_int(self) -> i64 {
        self.0.cast_signed()
    }

    #[inline]
    #[must_use]
    pub fn as_float(self) -> f64 {
        f64::from_bits(self.0)
    }

    #[inline]
    #[must_use]
    pub fn as_bool(self) -> bool {
        self.0 != 0
    }

    /// The reference in this cell, or `None` for nil.
    #[inline]
    #[must_use]
    pub fn as_obj(self) -> Option<HeapId> {
        let id = self.0 as u32;
        if id == 0 { None } else { Some(HeapId(id)) }
    }

    #[inline]
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Zero test under the given flavor (false / 0 / 0.0 / nil).
    #[inline]
    #[must_use]
    pub fn is_zero(self, kind: CellKind) -> bool {
        match kind {
            CellKind::Float => self.as_float() == 0.0,
            _ => self.0 == 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_roundtrip() {
        assert_eq!(Cell::from_int(-42).as_int(), -42);
        assert_eq!(Cell::from_int(i64::MAX).as_int(), i64::MAX);
    }

    #[test]
    fn test_float_roundtrip() {
        assert_eq!(Cell::from_float(2.5).as_float(), 2.5);
        assert!(Cell::from_float(0.0).is_zero(CellKind::Float));
        // negative zero still reads as zero under the float flavor
        assert!(Cell::from_float(-0.0).is_zero(CellKind::Float));
    }

    #[test]
    fn test_nil_reads_as_none() {
        assert_eq!(Cell::NIL.as_obj(), None);
        assert_eq!(Cell::from_obj(HeapId(3)).as_obj(), Some(HeapId(3)));
    }
}
