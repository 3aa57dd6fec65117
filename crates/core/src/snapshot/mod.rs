//! Latest-value cells shared between producer loops and the render loop.
//!
//! A cell has exactly one [`SnapshotWriter`] and any number of
//! [`SnapshotReader`]s. Publishing swaps in a new immutable record; readers
//! only ever clone the `Arc` of a complete prior value, so a reader can never
//! observe a half-written snapshot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A published value together with its position in the writer's sequence.
#[derive(Debug)]
pub struct Snapshot<T> {
    value: Arc<T>,
    sequence: u64,
}

impl<T> Snapshot<T> {
    /// Number of values published before this one.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn value(&self) -> &Arc<T> {
        &self.value
    }

    pub fn into_value(self) -> Arc<T> {
        self.value
    }
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            sequence: self.sequence,
        }
    }
}

impl<T> std::ops::Deref for Snapshot<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

#[derive(Debug)]
struct Slot<T> {
    current: Arc<T>,
    sequence: u64,
}

/// Creates a cell holding `initial` and returns its two ends.
pub fn snapshot_cell<T>(initial: T) -> (SnapshotWriter<T>, SnapshotReader<T>) {
    let shared = Arc::new(Mutex::new(Slot {
        current: Arc::new(initial),
        sequence: 0,
    }));
    (
        SnapshotWriter {
            shared: Arc::clone(&shared),
        },
        SnapshotReader { shared },
    )
}

/// Sole writing end of a snapshot cell. Not `Clone`.
#[derive(Debug)]
pub struct SnapshotWriter<T> {
    shared: Arc<Mutex<Slot<T>>>,
}

impl<T> SnapshotWriter<T> {
    /// Replaces the current value. Returns the sequence number assigned.
    pub fn publish(&self, value: T) -> u64 {
        let value = Arc::new(value);
        let mut slot = lock(&self.shared);
        slot.sequence += 1;
        slot.current = value;
        slot.sequence
    }

    pub fn reader(&self) -> SnapshotReader<T> {
        SnapshotReader {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn latest(&self) -> Snapshot<T> {
        read(&self.shared)
    }
}

/// Reading end of a snapshot cell. Cheap to clone.
#[derive(Debug)]
pub struct SnapshotReader<T> {
    shared: Arc<Mutex<Slot<T>>>,
}

impl<T> SnapshotReader<T> {
    /// Returns the most recently published value without waiting on the
    /// producer.
    pub fn latest(&self) -> Snapshot<T> {
        read(&self.shared)
    }

    /// Sequence number of the current value.
    pub fn sequence(&self) -> u64 {
        lock(&self.shared).sequence
    }
}

impl<T> Clone for SnapshotReader<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

fn read<T>(shared: &Mutex<Slot<T>>) -> Snapshot<T> {
    let slot = lock(shared);
    Snapshot {
        value: Arc::clone(&slot.current),
        sequence: slot.sequence,
    }
}

// The critical sections only swap an `Arc`, so a poisoned slot still holds a
// complete value.
fn lock<T>(shared: &Mutex<Slot<T>>) -> MutexGuard<'_, Slot<T>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_observe_latest_publish() {
        let (writer, reader) = snapshot_cell(0_u32);
        assert_eq!(*reader.latest(), 0);
        assert_eq!(reader.sequence(), 0);

        writer.publish(7);
        writer.publish(9);

        let snapshot = reader.latest();
        assert_eq!(*snapshot, 9);
        assert_eq!(snapshot.sequence(), 2);
    }

    #[test]
    fn held_snapshots_are_not_mutated_by_later_publishes() {
        let (writer, reader) = snapshot_cell(vec![1_u8, 2, 3]);
        let held = reader.latest();
        writer.publish(Vec::new());

        assert_eq!(held.as_slice(), &[1, 2, 3]);
        assert!(reader.latest().is_empty());
    }

    #[test]
    fn cloned_readers_share_one_cell() {
        let (writer, reader) = snapshot_cell("idle");
        let other = reader.clone();
        let third = writer.reader();
        writer.publish("active");

        assert_eq!(*other.latest(), "active");
        assert_eq!(*third.latest(), "active");
    }
}
