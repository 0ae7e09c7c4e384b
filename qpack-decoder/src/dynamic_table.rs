//! Dynamic table implementation.
//!
//! The dynamic table is a FIFO of field lines bounded by a byte capacity
//! (RFC 9204 Section 3.2). Every inserted entry receives a permanent
//! absolute index equal to the insert count just before insertion; eviction
//! removes entries from the oldest end but never lowers the insert count.
//!
//! The table also keeps the wait list of blocked header blocks. Entries in
//! the list are plain stream identifiers, never owning references: the
//! connection resolves them against its live header blocks and drops any
//! that have gone away.

use std::collections::VecDeque;

use thiserror::Error;
use tracing::trace;

use crate::field_line::FieldLine;

/// Failure of a dynamic table operation. Callers attribute it to the
/// encoder stream or to a header block.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    #[error("capacity {requested} exceeds maximum {maximum}")]
    CapacityExceedsMaximum { requested: u64, maximum: usize },
    #[error("entry size {size} exceeds table capacity {capacity}")]
    EntryTooLarge { size: usize, capacity: usize },
    #[error("relative index {0} out of range")]
    InvalidRelativeIndex(u64),
    #[error("entry {0} already evicted")]
    Evicted(u64),
    #[error("entry {0} not yet inserted")]
    NotYetInserted(u64),
}

/// A header block parked until the insert count reaches a threshold.
#[derive(Debug, Clone, Copy)]
struct BlockedStream {
    stream_id: u64,
    required_insert_count: u64,
}

/// The dynamic table.
#[derive(Debug)]
pub struct DynamicTable {
    entries: VecDeque<FieldLine>,
    capacity: usize,
    max_capacity: usize,
    used_bytes: usize,
    insert_count: u64,
    blocked: VecDeque<BlockedStream>,
}

impl DynamicTable {
    /// Creates an empty table. The capacity starts at zero and may be
    /// raised up to `max_capacity` by the encoder.
    pub fn new(max_capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: 0,
            max_capacity,
            used_bytes: 0,
            insert_count: 0,
            blocked: VecDeque::new(),
        }
    }

    /// Total number of entries ever inserted.
    pub fn insert_count(&self) -> u64 {
        self.insert_count
    }

    /// Number of entries evicted so far; also the absolute index of the
    /// oldest surviving entry.
    pub fn dropped_count(&self) -> u64 {
        self.insert_count - self.entries.len() as u64
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Sum of the accounted sizes of all surviving entries.
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sets a new capacity, evicting entries if necessary.
    pub fn set_capacity(&mut self, new_capacity: u64) -> Result<(), TableError> {
        let capacity = usize::try_from(new_capacity)
            .ok()
            .filter(|c| *c <= self.max_capacity)
            .ok_or(TableError::CapacityExceedsMaximum {
                requested: new_capacity,
                maximum: self.max_capacity,
            })?;

        self.evict_down_to(capacity);
        self.capacity = capacity;
        trace!(capacity, used_bytes = self.used_bytes, "dynamic table capacity set");
        Ok(())
    }

    /// Inserts a field line, evicting the oldest entries to make room.
    ///
    /// Returns the absolute index of the new entry. Nothing is inserted or
    /// evicted if the entry alone exceeds the capacity.
    pub fn insert(&mut self, field: FieldLine) -> Result<u64, TableError> {
        let size = field.size();
        if size > self.capacity {
            return Err(TableError::EntryTooLarge {
                size,
                capacity: self.capacity,
            });
        }

        self.evict_down_to(self.capacity - size);

        let absolute_index = self.insert_count;
        self.entries.push_back(field);
        self.used_bytes += size;
        self.insert_count += 1;
        trace!(
            absolute_index,
            size,
            used_bytes = self.used_bytes,
            "dynamic table entry inserted"
        );
        Ok(absolute_index)
    }

    /// Re-inserts a copy of the entry at `relative_index` (0 is the most
    /// recently inserted entry).
    pub fn duplicate(&mut self, relative_index: u64) -> Result<u64, TableError> {
        let field = self.get_relative(relative_index)?.clone();
        self.insert(field)
    }

    /// Gets an entry by index relative to the current insert count.
    pub fn get_relative(&self, relative_index: u64) -> Result<&FieldLine, TableError> {
        let absolute_index = relative_index
            .checked_add(1)
            .and_then(|r| self.insert_count.checked_sub(r))
            .ok_or(TableError::InvalidRelativeIndex(relative_index))?;
        self.lookup(absolute_index)
    }

    /// Gets an entry by absolute index.
    pub fn lookup(&self, absolute_index: u64) -> Result<&FieldLine, TableError> {
        if absolute_index >= self.insert_count {
            return Err(TableError::NotYetInserted(absolute_index));
        }
        let dropped = self.dropped_count();
        if absolute_index < dropped {
            return Err(TableError::Evicted(absolute_index));
        }
        self.entries
            .get((absolute_index - dropped) as usize)
            .ok_or(TableError::Evicted(absolute_index))
    }

    fn evict_down_to(&mut self, target: usize) {
        while self.used_bytes > target {
            let Some(entry) = self.entries.pop_front() else {
                break;
            };
            self.used_bytes -= entry.size();
            trace!(
                absolute_index = self.dropped_count() - 1,
                "dynamic table entry evicted"
            );
        }
    }

    /// Parks `stream_id` until the insert count reaches
    /// `required_insert_count`. A stream already parked is moved to the back.
    pub fn register_blocked(&mut self, stream_id: u64, required_insert_count: u64) {
        self.unregister_blocked(stream_id);
        self.blocked.push_back(BlockedStream {
            stream_id,
            required_insert_count,
        });
    }

    /// Removes `stream_id` from the wait list. Returns true if it was parked.
    pub fn unregister_blocked(&mut self, stream_id: u64) -> bool {
        let before = self.blocked.len();
        self.blocked.retain(|b| b.stream_id != stream_id);
        self.blocked.len() != before
    }

    /// Number of parked streams.
    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }

    pub fn is_blocked(&self, stream_id: u64) -> bool {
        self.blocked.iter().any(|b| b.stream_id == stream_id)
    }

    /// Removes and returns, in the order they blocked, every parked stream
    /// whose threshold the current insert count satisfies.
    pub fn take_unblocked(&mut self) -> Vec<u64> {
        let insert_count = self.insert_count;
        let mut unblocked = Vec::new();
        self.blocked.retain(|b| {
            if b.required_insert_count <= insert_count {
                unblocked.push(b.stream_id);
                false
            } else {
                true
            }
        });
        unblocked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn table(capacity: u64) -> DynamicTable {
        let mut table = DynamicTable::new(capacity as usize);
        table.set_capacity(capacity).unwrap();
        table
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut table = table(1000);
        let idx = table.insert(FieldLine::new("name", "value")).unwrap();

        assert_eq!(idx, 0);
        assert_eq!(table.insert_count(), 1);
        assert_eq!(table.used_bytes(), 41);
        assert_eq!(&table.lookup(0).unwrap().name[..], b"name");
        assert_eq!(table.lookup(1), Err(TableError::NotYetInserted(1)));
    }

    #[test]
    fn test_initial_capacity_is_zero() {
        let mut table = DynamicTable::new(4096);
        assert_eq!(table.capacity(), 0);
        assert!(matches!(
            table.insert(FieldLine::new("a", "b")),
            Err(TableError::EntryTooLarge { .. })
        ));
        assert_eq!(table.insert_count(), 0);
    }

    #[test]
    fn test_eviction() {
        let mut table = table(100);

        table.insert(FieldLine::new("a", "b")).unwrap(); // 34
        table.insert(FieldLine::new("c", "d")).unwrap(); // 68
        table.insert(FieldLine::new("e", "f")).unwrap(); // evicts "a"

        assert_eq!(table.lookup(0), Err(TableError::Evicted(0)));
        assert!(table.lookup(1).is_ok());
        assert!(table.lookup(2).is_ok());
        assert_eq!(table.dropped_count(), 1);
        assert_eq!(table.used_bytes(), 68);
    }

    #[test]
    fn test_capacity_change() {
        let mut table = DynamicTable::new(200);
        table.set_capacity(100).unwrap();
        table.insert(FieldLine::new("a", "b")).unwrap();

        table.set_capacity(200).unwrap();
        assert_eq!(table.capacity(), 200);
        assert_eq!(table.len(), 1);

        table.set_capacity(30).unwrap();
        assert_eq!(table.capacity(), 30);
        assert!(table.is_empty());
        assert_eq!(table.insert_count(), 1);
        assert_eq!(table.lookup(0), Err(TableError::Evicted(0)));

        assert_eq!(
            table.set_capacity(201),
            Err(TableError::CapacityExceedsMaximum {
                requested: 201,
                maximum: 200
            })
        );
    }

    #[test]
    fn test_oversized_entry_evicts_nothing() {
        let mut table = table(70);
        table.insert(FieldLine::new("a", "b")).unwrap();
        let big = FieldLine::new("x".repeat(20), "y".repeat(20));
        assert!(table.insert(big).is_err());
        assert_eq!(table.len(), 1);
        assert_eq!(table.insert_count(), 1);
    }

    #[test]
    fn test_duplicate() {
        let mut table = table(1000);
        table.insert(FieldLine::new("a", "1")).unwrap();
        table.insert(FieldLine::new("b", "2")).unwrap();

        assert_eq!(table.duplicate(1).unwrap(), 2);
        assert_eq!(&table.lookup(2).unwrap().name[..], b"a");
        assert_eq!(table.duplicate(3), Err(TableError::InvalidRelativeIndex(3)));
    }

    #[test]
    fn test_duplicate_of_oldest_entry_evicting_itself() {
        // Room for exactly one entry: duplicating it evicts the original.
        let mut table = table(34);
        table.insert(FieldLine::new("a", "b")).unwrap();
        assert_eq!(table.duplicate(0).unwrap(), 1);
        assert_eq!(table.lookup(0), Err(TableError::Evicted(0)));
        assert_eq!(&table.lookup(1).unwrap().value[..], b"b");
    }

    #[test]
    fn test_wait_list_order() {
        let mut table = table(1000);
        table.register_blocked(8, 2);
        table.register_blocked(4, 1);
        table.register_blocked(12, 3);
        assert_eq!(table.blocked_count(), 3);

        table.insert(FieldLine::new("a", "b")).unwrap();
        assert_eq!(table.take_unblocked(), vec![4]);

        table.insert(FieldLine::new("a", "b")).unwrap();
        table.insert(FieldLine::new("a", "b")).unwrap();
        assert_eq!(table.take_unblocked(), vec![8, 12]);
        assert_eq!(table.blocked_count(), 0);
    }

    #[test]
    fn test_unregister_blocked() {
        let mut table = table(1000);
        table.register_blocked(0, 1);
        assert!(table.is_blocked(0));
        assert!(table.unregister_blocked(0));
        assert!(!table.unregister_blocked(0));
        table.insert(FieldLine::new("a", "b")).unwrap();
        assert!(table.take_unblocked().is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        SetCapacity(u64),
        Insert(usize, usize),
        Duplicate(u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..=400).prop_map(Op::SetCapacity),
            (0usize..60, 0usize..60).prop_map(|(n, v)| Op::Insert(n, v)),
            (0u64..8).prop_map(Op::Duplicate),
        ]
    }

    proptest! {
        #[test]
        fn prop_accounting_invariants(ops in prop::collection::vec(op(), 0..64)) {
            let mut table = DynamicTable::new(400);
            let mut inserted = 0u64;
            for op in ops {
                let result = match op {
                    Op::SetCapacity(c) => table.set_capacity(c).map(|_| None),
                    Op::Insert(n, v) => table
                        .insert(FieldLine::new("n".repeat(n), "v".repeat(v)))
                        .map(Some),
                    Op::Duplicate(r) => table.duplicate(r).map(Some),
                };
                if let Ok(Some(index)) = result {
                    prop_assert_eq!(index, inserted);
                    inserted += 1;
                }

                let sum: usize = (table.dropped_count()..table.insert_count())
                    .map(|i| table.lookup(i).unwrap().size())
                    .sum();
                prop_assert_eq!(table.used_bytes(), sum);
                prop_assert!(table.used_bytes() <= table.capacity());
                prop_assert_eq!(table.insert_count(), inserted);
            }
        }
    }
}
