//! `TasksHeap`: a bounded, group-aware dispatch buffer for Waiting tasks.
//!
//! Shaped like the fixed-slot tables the source keeps per-node
//! (`container::node::tasks_table`/`workers_table`: a table keyed by a fixed
//! id space, iterated start-to-end), but held fully in memory with a
//! rotating cursor instead of backed by `sstable::EmbeddedDB`, since the
//! heap's job is to answer "what's dispatchable right now", not to persist
//! history — persistence of the underlying tasks lives in `BrokerStatus` and
//! the replicated log instead.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::errors::{BrokerError, Result};
use crate::group_mapper::{GroupMapperFunction, GROUP_ANY};
use crate::model::TaskId;

/// Sentinel: slot 0 is always empty. Valid task ids are allocated starting
/// at 1 (see `BrokerStatus`), so this can never collide with a real task.
const EMPTY_SLOT: TaskId = 0;

#[derive(Clone, Copy, Debug)]
struct Slot {
    task_id: TaskId,
    task_type: i32,
    group_id: i32,
}

impl Slot {
    const EMPTY: Slot = Slot {
        task_id: EMPTY_SLOT,
        task_type: 0,
        group_id: 0,
    };

    fn is_empty(&self) -> bool {
        self.task_id == EMPTY_SLOT
    }
}

struct Inner {
    slots: Vec<Slot>,
    insert_pos: usize,
    /// Independent rotating cursor for `take`, so repeated batched takes
    /// sweep the whole array round-robin instead of always re-scanning from
    /// the front (which would starve tasks sitting late in the array).
    take_cursor: usize,
    size: usize,
    max_fragmentation: f64,
}

pub struct TasksHeap {
    inner: Mutex<Inner>,
    mapper: Box<dyn GroupMapperFunction>,
}

impl TasksHeap {
    /// Creates a heap with room for exactly `capacity` waiting tasks.
    pub fn new(capacity: usize, mapper: Box<dyn GroupMapperFunction>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: vec![Slot::EMPTY; capacity],
                insert_pos: 0,
                take_cursor: 0,
                size: 0,
                // Never compacts unless explicitly configured (see
                // `set_max_fragmentation`).
                max_fragmentation: f64::INFINITY,
            }),
            mapper,
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().slots.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts a waiting task into the heap. Returns `BrokerError::HeapFull`
    /// if every slot is occupied.
    pub fn insert(&self, task_id: TaskId, task_type: i32, user_id: &str) -> Result<()> {
        assert_ne!(task_id, EMPTY_SLOT, "task ids must be allocated starting at 1");

        let group_id = self.mapper.group_for(task_id, task_type, user_id);

        let mut inner = self.inner.lock().unwrap();
        if inner.size >= inner.slots.len() {
            return Err(BrokerError::HeapFull);
        }

        let capacity = inner.slots.len();
        let mut pos = inner.insert_pos % capacity;
        let mut probed = 0;
        while !inner.slots[pos].is_empty() {
            pos = (pos + 1) % capacity;
            probed += 1;
            // `size < capacity` above guarantees an empty slot exists, so this
            // can never run a full lap; it's a defensive bound, not a real
            // limit.
            assert!(probed <= capacity, "no empty slot found despite size < capacity");
        }

        inner.slots[pos] = Slot {
            task_id,
            task_type,
            group_id,
        };
        inner.insert_pos = (pos + 1) % capacity;
        inner.size += 1;

        Self::maybe_compact(&mut inner);

        Ok(())
    }

    /// Claims up to `max` waiting tasks whose group is in `groups` (or
    /// `groups` contains `GROUP_ANY`) and whose type still has remaining
    /// capacity in `available_space`. `available_space` is mutated in place
    /// as slots are consumed. Returns the claimed task ids, in scan order.
    pub fn take(
        &self,
        max: usize,
        groups: &HashSet<i32>,
        available_space: &mut HashMap<i32, usize>,
    ) -> Vec<TaskId> {
        let accepts_any = groups.contains(&GROUP_ANY);
        let mut claimed = Vec::new();

        if max == 0 {
            return claimed;
        }

        let mut inner = self.inner.lock().unwrap();
        let capacity = inner.slots.len();
        if capacity == 0 {
            return claimed;
        }

        let mut cursor = inner.take_cursor % capacity;

        for _ in 0..capacity {
            if claimed.len() >= max {
                break;
            }

            let slot = inner.slots[cursor];
            if !slot.is_empty() {
                let group_ok = accepts_any || groups.contains(&slot.group_id);
                let has_space = available_space
                    .get(&slot.task_type)
                    .copied()
                    .unwrap_or(0)
                    > 0;

                if group_ok && has_space {
                    inner.slots[cursor] = Slot::EMPTY;
                    inner.size -= 1;
                    claimed.push(slot.task_id);
                    if let Some(remaining) = available_space.get_mut(&slot.task_type) {
                        *remaining -= 1;
                    }
                }
            }

            cursor = (cursor + 1) % capacity;
        }

        inner.take_cursor = cursor;

        Self::maybe_compact(&mut inner);

        claimed
    }

    /// Removes a specific task from the heap if present, without claiming
    /// it for dispatch. Used when a task leaves the Waiting state through a
    /// path other than `take` (kept for completeness; the core dispatch
    /// path only ever uses `take`).
    pub fn remove(&self, task_id: TaskId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        for slot in inner.slots.iter_mut() {
            if slot.task_id == task_id {
                *slot = Slot::EMPTY;
                inner.size -= 1;
                return true;
            }
        }
        false
    }

    /// Iterates all live entries in slot order, for diagnostics.
    pub fn scan(&self, mut visitor: impl FnMut(TaskId, i32, i32)) {
        let inner = self.inner.lock().unwrap();
        for slot in inner.slots.iter() {
            if !slot.is_empty() {
                visitor(slot.task_id, slot.task_type, slot.group_id);
            }
        }
    }

    /// Configures the fragmentation threshold: if the ratio of empty slots
    /// below `insert_pos` to live `size` exceeds `threshold`, compacts
    /// immediately and on every future insert/take that would otherwise
    /// exceed it.
    pub fn set_max_fragmentation(&self, threshold: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.max_fragmentation = threshold;
        Self::maybe_compact(&mut inner);
    }

    /// Stable-packs live entries to the left of the slot array and resets
    /// `insert_pos = size`. Called automatically once fragmentation crosses
    /// the configured threshold.
    fn maybe_compact(inner: &mut Inner) {
        let capacity = inner.slots.len();
        if capacity == 0 || inner.size == 0 {
            return;
        }

        let empty_below_insert_pos = inner.insert_pos.min(capacity) - {
            let mut live_below = 0;
            for slot in &inner.slots[..inner.insert_pos.min(capacity)] {
                if !slot.is_empty() {
                    live_below += 1;
                }
            }
            live_below
        };

        let fragmentation = empty_below_insert_pos as f64 / inner.size as f64;
        if fragmentation <= inner.max_fragmentation {
            return;
        }

        let mut packed = Vec::with_capacity(capacity);
        for slot in inner.slots.iter() {
            if !slot.is_empty() {
                packed.push(*slot);
            }
        }
        let live = packed.len();
        packed.resize(capacity, Slot::EMPTY);

        inner.slots = packed;
        inner.insert_pos = live;
        inner.take_cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group_mapper::{ConstantGroupMapper, FixedGroupMapper};

    fn any_groups() -> HashSet<i32> {
        let mut s = HashSet::new();
        s.insert(GROUP_ANY);
        s
    }

    #[test]
    fn insert_then_take_returns_the_task() {
        let heap = TasksHeap::new(4, Box::new(ConstantGroupMapper(0)));
        heap.insert(1, 10, "u1").unwrap();
        assert_eq!(heap.len(), 1);

        let mut space = HashMap::new();
        space.insert(10, 1);
        let taken = heap.take(1, &any_groups(), &mut space);
        assert_eq!(taken, vec![1]);
        assert_eq!(heap.len(), 0);
    }

    #[test]
    fn group_filter_returns_only_matching_group() {
        let mapper = FixedGroupMapper::new(0).with("u1", 42).with("u2", 43);
        let heap = TasksHeap::new(4, Box::new(mapper));
        heap.insert(1, 10, "u1").unwrap();
        heap.insert(2, 10, "u2").unwrap();

        let mut groups = HashSet::new();
        groups.insert(42);
        let mut space = HashMap::new();
        space.insert(10, 10);

        let taken = heap.take(10, &groups, &mut space);
        assert_eq!(taken, vec![1]);
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn per_type_capacity_is_respected_exactly() {
        let heap = TasksHeap::new(16, Box::new(ConstantGroupMapper(0)));
        for i in 1..=5u64 {
            heap.insert(i, 10, "u").unwrap();
        }
        for i in 6..=10u64 {
            heap.insert(i, 20, "u").unwrap();
        }

        let mut space = HashMap::new();
        space.insert(10, 2);
        space.insert(20, 3);

        let taken = heap.take(100, &any_groups(), &mut space);
        let type10 = taken.iter().filter(|&&id| id <= 5).count();
        let type20 = taken.iter().filter(|&&id| id > 5).count();
        assert_eq!(type10, 2);
        assert_eq!(type20, 3);
        assert_eq!(heap.len(), 5);
    }

    #[test]
    fn heap_full_rejects_and_keeps_size() {
        let heap = TasksHeap::new(4, Box::new(ConstantGroupMapper(0)));
        for i in 1..=4u64 {
            heap.insert(i, 1, "u").unwrap();
        }
        let err = heap.insert(5, 1, "u").unwrap_err();
        assert!(matches!(err, BrokerError::HeapFull));
        assert_eq!(heap.len(), 4);
    }

    #[test]
    fn take_never_returns_the_same_task_twice() {
        let heap = TasksHeap::new(4, Box::new(ConstantGroupMapper(0)));
        heap.insert(1, 1, "u").unwrap();

        let mut space = HashMap::new();
        space.insert(1, 10);
        let first = heap.take(10, &any_groups(), &mut space);
        let second = heap.take(10, &any_groups(), &mut space);
        assert_eq!(first, vec![1]);
        assert!(second.is_empty());
    }

    #[test]
    fn take_respects_max_even_with_more_available() {
        let heap = TasksHeap::new(8, Box::new(ConstantGroupMapper(0)));
        for i in 1..=5u64 {
            heap.insert(i, 1, "u").unwrap();
        }
        let mut space = HashMap::new();
        space.insert(1, 100);
        let taken = heap.take(2, &any_groups(), &mut space);
        assert_eq!(taken.len(), 2);
        assert_eq!(heap.len(), 3);
    }

    #[test]
    fn insert_probes_forward_when_slot_occupied_then_wraps() {
        let heap = TasksHeap::new(3, Box::new(ConstantGroupMapper(0)));
        heap.insert(1, 1, "u").unwrap();
        heap.insert(2, 1, "u").unwrap();

        let mut space = HashMap::new();
        space.insert(1, 1);
        let taken = heap.take(1, &any_groups(), &mut space);
        assert_eq!(taken, vec![1]);

        heap.insert(3, 1, "u").unwrap();
        heap.insert(4, 1, "u").unwrap();
        assert_eq!(heap.len(), 3);
    }

    #[test]
    fn remove_drops_a_specific_task() {
        let heap = TasksHeap::new(4, Box::new(ConstantGroupMapper(0)));
        heap.insert(1, 1, "u").unwrap();
        heap.insert(2, 1, "u").unwrap();
        assert!(heap.remove(1));
        assert!(!heap.remove(1));
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn scan_visits_exactly_the_live_entries() {
        let heap = TasksHeap::new(4, Box::new(ConstantGroupMapper(7)));
        heap.insert(1, 10, "u").unwrap();
        heap.insert(2, 20, "u").unwrap();

        let mut seen = Vec::new();
        heap.scan(|id, ty, group| seen.push((id, ty, group)));
        seen.sort();
        assert_eq!(seen, vec![(1, 10, 7), (2, 20, 7)]);
    }

    #[test]
    fn compaction_resets_insert_pos_to_size() {
        let heap = TasksHeap::new(6, Box::new(ConstantGroupMapper(0)));
        for i in 1..=6u64 {
            heap.insert(i, 1, "u").unwrap();
        }
        let mut space = HashMap::new();
        space.insert(1, 4);
        heap.take(4, &any_groups(), &mut space);
        assert_eq!(heap.len(), 2);

        heap.set_max_fragmentation(0.1);
        {
            let inner = heap.inner.lock().unwrap();
            assert_eq!(inner.insert_pos, inner.size);
            assert_eq!(inner.size, 2);
        }

        heap.insert(7, 1, "u").unwrap();
        assert_eq!(heap.len(), 3);
    }

    #[test]
    fn fragmentation_threshold_is_rechecked_on_every_insert_and_take_not_just_once() {
        let heap = TasksHeap::new(8, Box::new(ConstantGroupMapper(0)));
        heap.set_max_fragmentation(0.1);

        for i in 1..=6u64 {
            heap.insert(i, 1, "u").unwrap();
        }
        let mut space = HashMap::new();
        space.insert(1, 4);
        heap.take(4, &any_groups(), &mut space);

        // The configuring call above ran against an empty heap, so it alone
        // compacted nothing. Fragmentation only appeared afterwards, from
        // the `take` call; the heap must re-check the threshold on `take`
        // itself rather than only on the one `set_max_fragmentation`
        // invocation, or this would stay fragmented indefinitely.
        let inner = heap.inner.lock().unwrap();
        assert_eq!(inner.size, 2);
        assert_eq!(inner.insert_pos, inner.size);
        assert_eq!(inner.take_cursor, 0);
    }
}
