//! Open-addressed hash table with tombstone deletion
//!
//! Grounded on `original_source/clox/include/table.h` / `table.c`. Used
//! for globals, instance fields, class method tables, and — keyed on
//! `()` — the interner's string set (spec.md §4.3/§4.4). clox represents
//! a tombstone as a special `{key: NULL, value: BOOL(true)}` entry,
//! which doesn't translate to a generic `V`; we use an explicit `Slot`
//! enum instead.

use crate::heap::{GcRef, ObjString};

const MAX_LOAD_FACTOR: f64 = 0.75;

#[derive(Clone)]
enum Slot<V> {
    Empty,
    Tombstone,
    Occupied { key: GcRef<ObjString>, value: V },
}

/// A table keyed by interned strings, mapping to `V`. Identity
/// comparison on keys is enough because all `ObjString`s live behind
/// the interner (spec.md §4.3).
pub struct Table<V> {
    entries: Vec<Slot<V>>,
    count: usize,
}

impl<V: Clone> Default for Table<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            count: 0,
        }
    }
}

impl<V: Clone> Table<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, key: GcRef<ObjString>) -> Option<&V> {
        if self.entries.is_empty() {
            return None;
        }
        let index = self.find_slot(key);
        match &self.entries[index] {
            Slot::Occupied { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Returns `true` if this insert created a brand-new key (clox's
    /// `tableSet` return value, used by `DEFINE_GLOBAL` vs. re-assign).
    pub fn set(&mut self, key: GcRef<ObjString>, value: V) -> bool {
        if self.needs_growth() {
            self.grow();
        }
        let index = self.find_slot(key);
        let is_new = !matches!(self.entries[index], Slot::Occupied { .. });
        if is_new && !matches!(self.entries[index], Slot::Tombstone) {
            self.count += 1;
        }
        self.entries[index] = Slot::Occupied { key, value };
        is_new
    }

    pub fn delete(&mut self, key: GcRef<ObjString>) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let index = self.find_slot(key);
        if matches!(self.entries[index], Slot::Occupied { .. }) {
            self.entries[index] = Slot::Tombstone;
            true
        } else {
            false
        }
    }

    /// Copy every entry of `other` into `self`, used by `INHERIT` to
    /// seed a subclass's method table from its superclass.
    pub fn add_all(&mut self, other: &Table<V>) {
        for slot in &other.entries {
            if let Slot::Occupied { key, value } = slot {
                self.set(*key, value.clone());
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (GcRef<ObjString>, &V)> {
        self.entries.iter().filter_map(|slot| match slot {
            Slot::Occupied { key, value } => Some((*key, value)),
            _ => None,
        })
    }

    fn needs_growth(&self) -> bool {
        self.entries.is_empty() || (self.count + 1) as f64 > self.entries.len() as f64 * MAX_LOAD_FACTOR
    }

    fn grow(&mut self) {
        let new_capacity = if self.entries.is_empty() {
            8
        } else {
            self.entries.len() * 2
        };
        let old_entries = std::mem::replace(
            &mut self.entries,
            (0..new_capacity).map(|_| Slot::Empty).collect(),
        );
        self.count = 0;
        for slot in old_entries {
            if let Slot::Occupied { key, value } = slot {
                let index = self.find_slot(key);
                self.entries[index] = Slot::Occupied { key, value };
                self.count += 1;
            }
        }
    }

    /// Linear-probe to either the slot holding `key`, or the first
    /// empty/tombstone slot where it could be inserted, mirroring
    /// `findEntry` in `table.c`. Capacity is always a power of two, so
    /// `hash & (capacity - 1)` replaces a modulo.
    fn find_slot(&self, key: GcRef<ObjString>) -> usize {
        let capacity = self.entries.len();
        let mut index = (key.hash() as usize) & (capacity - 1);
        let mut first_tombstone: Option<usize> = None;
        loop {
            match &self.entries[index] {
                Slot::Empty => return first_tombstone.unwrap_or(index),
                Slot::Tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(index);
                    }
                }
                Slot::Occupied { key: slot_key, .. } if *slot_key == key => return index,
                Slot::Occupied { .. } => {}
            }
            index = (index + 1) & (capacity - 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;
    use crate::value::Value;

    #[test]
    fn set_reports_whether_the_key_is_new() {
        let heap = Heap::new(false);
        let key = heap.intern_string("a");
        let mut table = Table::new();
        assert!(table.set(key, Value::Number(1.0)));
        assert!(!table.set(key, Value::Number(2.0)));
        assert_eq!(table.get(key), Some(&Value::Number(2.0)));
    }

    #[test]
    fn delete_then_get_returns_none_but_keeps_probing_working() {
        let heap = Heap::new(false);
        let a = heap.intern_string("a");
        let b = heap.intern_string("b");
        let mut table = Table::new();
        table.set(a, Value::Bool(true));
        table.set(b, Value::Bool(false));
        assert!(table.delete(a));
        assert_eq!(table.get(a), None);
        assert_eq!(table.get(b), Some(&Value::Bool(false)));
        assert!(!table.delete(a));
    }

    #[test]
    fn grows_past_the_load_factor_and_keeps_all_entries() {
        let heap = Heap::new(false);
        let mut table = Table::new();
        let keys: Vec<_> = (0..100)
            .map(|i| heap.intern_string(&format!("key{i}")))
            .collect();
        for (i, key) in keys.iter().enumerate() {
            table.set(*key, Value::Number(i as f64));
        }
        assert_eq!(table.len(), 100);
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(table.get(*key), Some(&Value::Number(i as f64)));
        }
    }

    #[test]
    fn add_all_copies_every_occupied_entry() {
        let heap = Heap::new(false);
        let a = heap.intern_string("a");
        let b = heap.intern_string("b");
        let mut source = Table::new();
        source.set(a, Value::Number(1.0));
        source.set(b, Value::Number(2.0));
        let mut dest = Table::new();
        dest.add_all(&source);
        assert_eq!(dest.get(a), Some(&Value::Number(1.0)));
        assert_eq!(dest.get(b), Some(&Value::Number(2.0)));
    }

    #[test]
    fn find_interned_matches_by_content_not_identity() {
        let heap = Heap::new(false);
        let first = heap.intern_string("duplicate");
        let mut strings: Table<()> = Table::new();
        strings.set(first, ());
        let hash = first.hash();
        let found = find_interned(&strings, &|candidate| candidate.as_str() == "duplicate", hash);
        assert_eq!(found, Some(first));
    }
}

/// Find an interned string by content, used only by the heap's
/// intern table where keys double as the only values (spec.md §4.4).
/// Content comparison (not identity) is the whole point here — this is
/// how a second `"foo"` literal finds the first one's allocation.
pub fn find_interned(
    entries: &Table<()>,
    raw: &dyn Fn(GcRef<ObjString>) -> bool,
    hash: u64,
) -> Option<GcRef<ObjString>> {
    if entries.entries.is_empty() {
        return None;
    }
    let capacity = entries.entries.len();
    let mut index = (hash as usize) & (capacity - 1);
    loop {
        match &entries.entries[index] {
            Slot::Empty => return None,
            Slot::Occupied { key, .. } if key.hash() == hash && raw(*key) => return Some(*key),
            _ => {}
        }
        index = (index + 1) & (capacity - 1);
    }
}
