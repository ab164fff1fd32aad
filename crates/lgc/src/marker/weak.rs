//! Weak Tables - Fixpoint over Weak Hash Table Entries
//!
//! During marking a weak table marks only itself and its entry vector.
//! Once strong marking is done:
//!
//! 1. Each entry whose weak side is still alive keeps its other side alive
//!    (mark it, drain the stack).
//! 2. Repeat over all tables until a full pass marks nothing new. Chains of
//!    weak tables referencing each other settle this way.
//! 3. One final pass removes the entries that did not make it, leaving a
//!    [`Value::DELETED`] tombstone in the key slot.
//!
//! Tables found only while settling entries are added to the worklist as
//! they are reached.

use super::Marker;
use crate::object::pseudo::HashTable;
use crate::object::vector::{contents, VectorPtr};
use crate::value::Value;

/// Outcome of the fixpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeakStats {
    pub tables: usize,
    pub passes: usize,
    pub entries_removed: usize,
}

/// Visit one table's entries
///
/// Without `remove`, surviving entries have their unmarked sides pushed;
/// returns whether anything was pushed. With `remove`, dead entries are
/// cleared and the number removed is returned instead.
fn sweep_weak_table(marker: &mut Marker<'_>, table_ptr: VectorPtr, remove: bool) -> usize {
    let table = unsafe { &mut *(table_ptr.as_ptr() as *mut HashTable) };
    if !table.key_and_value.is_vectorlike() {
        return 0;
    }

    let kv = super::vector_of(table.key_and_value);
    let slots = unsafe { kv.as_ref() }.traced_slots();
    let base = unsafe { contents(kv) };
    let mut touched = 0;

    for i in 0..slots / 2 {
        let (key_slot, value_slot) = unsafe { (base.add(2 * i), base.add(2 * i + 1)) };
        let (key, value) = unsafe { (*key_slot, *value_slot) };
        if key == Value::UNBOUND || key == Value::DELETED {
            continue;
        }

        let key_live = marker.survives(key);
        let value_live = marker.survives(value);

        if table.weakness.entry_dies(key_live, value_live) {
            if remove {
                unsafe {
                    *key_slot = Value::DELETED;
                    *value_slot = Value::NIL;
                }
                table.count = table.count.saturating_sub(1);
                touched += 1;
            }
        } else if !remove {
            if !key_live {
                marker.push(key);
                touched += 1;
            }
            if !value_live {
                marker.push(value);
                touched += 1;
            }
        }
    }
    touched
}

/// Settle every weak table reached by `marker`
pub fn weak_fixpoint(marker: &mut Marker<'_>) -> WeakStats {
    let mut stats = WeakStats::default();

    loop {
        stats.passes += 1;
        let mut progressed = false;
        let mut i = 0;
        // Draining may reach further weak tables; walk by index
        while i < marker.weak_tables.len() {
            let table = marker.weak_tables[i];
            if sweep_weak_table(marker, table, false) > 0 {
                progressed = true;
                marker.drain();
            }
            i += 1;
        }
        if !progressed {
            break;
        }
    }

    stats.tables = marker.weak_tables.len();
    let tables = marker.weak_tables.clone();
    for table in tables {
        stats.entries_removed += sweep_weak_table(marker, table, true);
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Allocator;
    use crate::config::GcConfig;
    use crate::dump::NoDumpImage;
    use crate::marker::{vector_of, MarkStack};
    use crate::object::vector::VectorHeader;
    use crate::object::Weakness;

    fn weak_table(heap: &mut Allocator, weakness: Weakness, entries: &[(Value, Value)]) -> Value {
        let kv = heap
            .alloc_vectorlike(VectorHeader::plain(entries.len() * 2), true)
            .unwrap();
        for (i, (k, v)) in entries.iter().enumerate() {
            unsafe {
                *contents(vector_of(kv)).add(2 * i) = *k;
                *contents(vector_of(kv)).add(2 * i + 1) = *v;
            }
        }
        let t = heap.alloc_vectorlike(HashTable::header(), true).unwrap();
        let table = unsafe { &mut *(vector_of(t).as_ptr() as *mut HashTable) };
        table.key_and_value = kv;
        table.count = entries.len();
        table.weakness = weakness;
        t
    }

    fn table(t: Value) -> &'static HashTable {
        unsafe { &*(vector_of(t).as_ptr() as *const HashTable) }
    }

    #[test]
    fn test_key_weak_entry_removed_when_key_unreachable() {
        let mut heap = Allocator::new(&GcConfig::default().with_pure_size(0)).unwrap();
        let live_key = heap.alloc_float(1.0).unwrap();
        let dead_key = heap.alloc_float(2.0).unwrap();
        let value = heap.alloc_float(3.0).unwrap();
        let t = weak_table(
            &mut heap,
            Weakness::Key,
            &[(live_key, Value::fixnum(1)), (dead_key, value)],
        );

        let mut dump = NoDumpImage;
        let mut stack = MarkStack::with_capacity(8);
        let mut marker = Marker::new(&heap, &mut dump, &mut stack);
        marker.mark(t);
        marker.mark(live_key);
        let stats = weak_fixpoint(&mut marker);

        assert_eq!(stats.tables, 1);
        assert_eq!(stats.entries_removed, 1);
        assert!(!marker.survives(value));
        assert_eq!(table(t).count, 1);
    }

    #[test]
    fn test_value_kept_alive_through_surviving_key() {
        let mut heap = Allocator::new(&GcConfig::default().with_pure_size(0)).unwrap();
        let key = heap.alloc_float(1.0).unwrap();
        let value = heap.alloc_pair(Value::NIL, Value::NIL).unwrap();
        let t = weak_table(&mut heap, Weakness::Key, &[(key, value)]);

        let mut dump = NoDumpImage;
        let mut stack = MarkStack::with_capacity(8);
        let mut marker = Marker::new(&heap, &mut dump, &mut stack);
        marker.mark(t);
        marker.mark(key);
        let stats = weak_fixpoint(&mut marker);

        assert_eq!(stats.entries_removed, 0);
        assert!(marker.survives(value));
        assert!(stats.passes >= 2);
    }
}
