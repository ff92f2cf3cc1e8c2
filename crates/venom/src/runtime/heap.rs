//! The reference-counted heap.
//!
//! Objects live in slots addressed by [`HeapId`]; slot 0 is reserved so the
//! zero cell is nil. Each slot owns its cell block plus an optional native
//! payload (string bytes, list elements, map entries). Dropping the last
//! reference releases the slot, decrementing every reference it owns.
//!
//! Reference counting cannot reclaim cycles (created through ref cells or
//! `<outer>` back-pointers); such objects live until the heap is dropped.

use indexmap::IndexMap;

use crate::runtime::cell::{Cell, CellKind, HeapId};

/// Hashable key form of a map key cell: primitive keys by raw bits, string
/// keys by content, other reference keys by identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Bits(u64),
    Str(String),
    Id(u32),
}

#[derive(Debug, Default)]
pub struct MapData {
    pub key_kind: CellKind,
    pub value_kind: CellKind,
    /// Keyed entries holding the original key cell alongside the value, so
    /// releasing the map can drop both.
    pub entries: IndexMap<MapKey, (Cell, Cell), ahash::RandomState>,
}

#[derive(Debug)]
pub enum NativePayload {
    None,
    Str(String),
    List {
        elems: Vec<Cell>,
        elem_is_ref: bool,
    },
    Map(MapData),
}

#[derive(Debug)]
pub struct Slot {
    pub ref_count: u32,
    /// Index of this object's class in the executable's class table.
    pub class: u32,
    /// Bit `i` set iff `cells[i]` is a reference.
    pub ref_bitmap: u64,
    pub cells: Vec<Cell>,
    pub payload: NativePayload,
}

#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            // slot 0 is reserved for nil
            slots: vec![None],
            free: Vec::new(),
        }
    }

    pub fn alloc(
        &mut self,
        class: u32,
        n_cells: usize,
        ref_bitmap: u64,
        payload: NativePayload,
    ) -> HeapId {
        let slot = Slot {
            ref_count: 1,
            class,
            ref_bitmap,
            cells: vec![Cell::NIL; n_cells],
            payload,
        };
        match self.free.pop() {
            Some(idx) => {
                debug_assert!(self.slots[idx as usize].is_none());
                self.slots[idx as usize] = Some(slot);
                HeapId(idx)
            }
            None => {
                let idx = u32::try_from(self.slots.len()).expect("heap exceeds u32 slots");
                self.slots.push(Some(slot));
                HeapId(idx)
            }
        }
    }

    #[must_use]
    pub fn get(&self, id: HeapId) -> &Slot {
        self.slots[id.0 as usize]
            .as_ref()
            .expect("access to released heap slot")
    }

    #[must_use]
    pub fn get_mut(&mut self, id: HeapId) -> &mut Slot {
        self.slots[id.0 as usize]
            .as_mut()
            .expect("access to released heap slot")
    }

    #[must_use]
    pub fn str_of(&self, id: HeapId) -> &str {
        match &self.get(id).payload {
            NativePayload::Str(s) => s,
            _ => panic!("string payload expected"),
        }
    }

    pub fn inc_ref(&mut self, cell: Cell) {
        if let Some(id) = cell.as_obj() {
            let slot = self.get_mut(id);
            slot.ref_count += 1;
        }
    }

    /// Drops one reference; releasing a slot decrements everything the
    /// object owned, iteratively.
    pub fn dec_ref(&mut self, cell: Cell) {
        let Some(id) = cell.as_obj() else { return };
        let mut worklist = vec![id];
        while let Some(id) = worklist.pop() {
            let slot = self.get_mut(id);
            debug_assert!(slot.ref_count > 0, "double release of heap slot");
            slot.ref_count -= 1;
            if slot.ref_count > 0 {
                continue;
            }
            let released = self.slots[id.0 as usize]
                .take()
                .expect("slot present while releasing");
            self.free.push(id.0);
            for (i, cell) in released.cells.iter().enumerate() {
                if released.ref_bitmap & (1 << i) != 0
                    && let Some(child) = cell.as_obj()
                {
                    worklist.push(child);
                }
            }
            match released.payload {
                NativePayload::List { elems, elem_is_ref } => {
                    if elem_is_ref {
                        worklist.extend(elems.iter().filter_map(|c| c.as_obj()));
                    }
                }
                NativePayload::Map(data) => {
                    for (key_cell, value_cell) in data.entries.values() {
                        if data.key_kind == CellKind::Ref
                            && let Some(k) = key_cell.as_obj()
                        {
                            worklist.push(k);
                        }
                        if data.value_kind == CellKind::Ref
                            && let Some(v) = value_cell.as_obj()
                        {
                            worklist.push(v);
                        }
                    }
                }
                NativePayload::Str(_) | NativePayload::None => {}
            }
        }
    }

    #[must_use]
    pub fn ref_count(&self, id: HeapId) -> u32 {
        self.get(id).ref_count
    }

    /// Number of live objects (for tests and diagnostics).
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// The hashable key form of a map key cell.
    #[must_use]
    pub fn map_key(&self, kind: CellKind, cell: Cell) -> MapKey {
        match kind {
            CellKind::Ref => match cell.as_obj() {
                Some(id) => match &self.get(id).payload {
                    NativePayload::Str(s) => MapKey::Str(s.clone()),
                    _ => MapKey::Id(id.0),
                },
                None => MapKey::Id(0),
            },
            _ => MapKey::Bits(cell.raw()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_starts_with_one_reference() {
        let mut heap = Heap::new();
        let id = heap.alloc(0, 2, 0, NativePayload::None);
        assert_eq!(heap.ref_count(id), 1);
        assert_eq!(heap.live_objects(), 1);
    }

    #[test]
    fn test_release_decrements_owned_cells() {
        let mut heap = Heap::new();
        let inner = heap.alloc(0, 0, 0, NativePayload::None);
        let outer = heap.alloc(0, 1, 0b1, NativePayload::None);
        heap.get_mut(outer).cells[0] = Cell::from_obj(inner);
        heap.inc_ref(Cell::from_obj(inner));
        assert_eq!(heap.ref_count(inner), 2);

        heap.dec_ref(Cell::from_obj(inner));
        heap.dec_ref(Cell::from_obj(outer));
        assert_eq!(heap.live_objects(), 0);
    }

    #[test]
    fn test_slot_reuse_after_release() {
        let mut heap = Heap::new();
        let a = heap.alloc(0, 0, 0, NativePayload::None);
        heap.dec_ref(Cell::from_obj(a));
        let b = heap.alloc(0, 0, 0, NativePayload::None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_map_keys_hash_strings_by_content() {
        let mut heap = Heap::new();
        let s1 = heap.alloc(0, 0, 0, NativePayload::Str("k".to_owned()));
        let s2 = heap.alloc(0, 0, 0, NativePayload::Str("k".to_owned()));
        let k1 = heap.map_key(CellKind::Ref, Cell::from_obj(s1));
        let k2 = heap.map_key(CellKind::Ref, Cell::from_obj(s2));
        assert_eq!(k1, k2);
    }
}
