//! Fixed-capacity ring store with one writer and independent readers
//!
//! The store keeps the last `capacity` readings. Logical position `i` lives in
//! slot `i % capacity`, and only `[write_count - capacity, write_count)` is
//! readable. The writer never waits for readers: a reader that falls more than
//! one capacity behind skips forward to the oldest resident reading and is
//! told how many it lost.
//!
//! ## Usage Example
//!
//! ```rust
//! use phms::store::RingStore;
//! use phms::types::{Field, Reading, SourceType};
//!
//! let store = RingStore::new(4).unwrap();
//! let mut writer = store.take_writer().unwrap();
//! let mut reader = store.register_reader();
//!
//! let batch: Vec<Reading> = (0..3)
//!     .map(|ts| Reading::new(ts, SourceType::Max30100).with(Field::HeartRate, 70.0))
//!     .collect();
//! assert_eq!(writer.write(&batch), 3);
//!
//! let drain = reader.drain();
//! assert_eq!(drain.readings, batch);
//! assert_eq!(drain.lagged, 0);
//! assert!(reader.drain().is_empty());
//! ```
//!
//! The writer is unique and cannot be cloned:
//!
//! ```compile_fail
//! let store = phms::store::RingStore::new(4).unwrap();
//! let writer = store.take_writer().unwrap();
//! let second = writer.clone();
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures::{Stream, StreamExt, future};
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, warn};

use crate::types::Reading;
use crate::{IngestError, Result};

/// Identifier of a registered reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReaderId(u64);

impl fmt::Display for ReaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reader-{}", self.0)
    }
}

/// Where a new reader starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadFrom {
    /// Oldest resident reading: everything still in the ring is delivered
    #[default]
    Oldest,
    /// Current write count: only readings written from now on
    Latest,
    /// Explicit logical position, clamped to the write count
    Position(u64),
}

/// Result of one [`RingReader::drain`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Drain {
    /// Readings in write order
    pub readings: Vec<Reading>,

    /// Readings overwritten after this reader registered but before it got
    /// to them. An explicit [`ReadFrom::Position`] already behind the ring
    /// counts the gap as well.
    pub lagged: u64,

    /// Logical position of `readings[0]`
    pub start_position: u64,
}

impl Drain {
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Position the reader continues from.
    pub fn end_position(&self) -> u64 {
        self.start_position + self.readings.len() as u64
    }
}

struct Shared {
    capacity: usize,
    slots: RwLock<Box<[Reading]>>,
    write_count: AtomicU64,
    writer_taken: AtomicBool,
    readers: Mutex<BTreeMap<ReaderId, Arc<AtomicU64>>>,
    next_reader: AtomicU64,
}

/// Handle to a ring store. Clones share the same storage.
#[derive(Clone)]
pub struct RingStore {
    shared: Arc<Shared>,
}

impl fmt::Debug for RingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingStore")
            .field("capacity", &self.shared.capacity)
            .field("write_count", &self.write_count())
            .field("readers", &self.reader_count())
            .finish()
    }
}

impl RingStore {
    /// Create a store holding `capacity` readings.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(IngestError::config_error("RingStore::new", "capacity must be at least 1"));
        }

        let slots = vec![Reading::default(); capacity].into_boxed_slice();
        Ok(Self {
            shared: Arc::new(Shared {
                capacity,
                slots: RwLock::new(slots),
                write_count: AtomicU64::new(0),
                writer_taken: AtomicBool::new(false),
                readers: Mutex::new(BTreeMap::new()),
                next_reader: AtomicU64::new(0),
            }),
        })
    }

    /// Take the single writer. Only the first call succeeds.
    pub fn take_writer(&self) -> Result<RingWriter> {
        if self.shared.writer_taken.swap(true, Ordering::AcqRel) {
            return Err(IngestError::WriterTaken);
        }
        Ok(RingWriter { shared: Arc::clone(&self.shared) })
    }

    /// Register a reader starting at position 0.
    pub fn register_reader(&self) -> RingReader {
        self.register_reader_at(ReadFrom::Oldest)
    }

    /// Register a reader at an explicit start point.
    pub fn register_reader_at(&self, from: ReadFrom) -> RingReader {
        let mut readers = self.shared.readers.lock().unwrap_or_else(PoisonError::into_inner);

        // Under the registry lock so ids and start points are ordered together
        let write_count = self.write_count();
        let start = match from {
            ReadFrom::Oldest => write_count.saturating_sub(self.shared.capacity as u64),
            ReadFrom::Latest => write_count,
            ReadFrom::Position(position) => position.min(write_count),
        };

        let id = ReaderId(self.shared.next_reader.fetch_add(1, Ordering::Relaxed));
        let position = Arc::new(AtomicU64::new(start));
        readers.insert(id, Arc::clone(&position));
        debug!("Registered {} at position {} ({} readers)", id, start, readers.len());

        RingReader { id, shared: Arc::clone(&self.shared), position }
    }

    /// Total readings ever written.
    pub fn write_count(&self) -> u64 {
        self.shared.write_count.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of live readers.
    pub fn reader_count(&self) -> usize {
        self.shared.readers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Unread readings per live reader, including any already overwritten.
    pub fn reader_lags(&self) -> Vec<(ReaderId, u64)> {
        let write_count = self.write_count();
        let readers = self.shared.readers.lock().unwrap_or_else(PoisonError::into_inner);
        readers
            .iter()
            .map(|(id, position)| {
                (*id, write_count.saturating_sub(position.load(Ordering::Acquire)))
            })
            .collect()
    }
}

/// The single producer for a [`RingStore`].
pub struct RingWriter {
    shared: Arc<Shared>,
}

impl fmt::Debug for RingWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingWriter").field("capacity", &self.shared.capacity).finish()
    }
}

impl RingWriter {
    /// Append a batch, overwriting the oldest readings.
    ///
    /// The batch is written whole or not at all: a batch larger than the
    /// capacity writes nothing and returns 0.
    pub fn write(&mut self, readings: &[Reading]) -> usize {
        match self.try_write(readings) {
            Ok(written) => written,
            Err(e) => {
                warn!("{}", e);
                0
            }
        }
    }

    /// Like [`write`](Self::write), but reports an oversized batch.
    pub fn try_write(&mut self, readings: &[Reading]) -> Result<usize> {
        let capacity = self.shared.capacity;
        if readings.len() > capacity {
            return Err(IngestError::CapacityRejected { requested: readings.len(), capacity });
        }
        if readings.is_empty() {
            return Ok(0);
        }

        let mut slots = self.shared.slots.write().unwrap_or_else(PoisonError::into_inner);
        let write_count = self.shared.write_count.load(Ordering::Relaxed);
        let start = (write_count % capacity as u64) as usize;

        // At most two spans: up to the end of storage, then from slot 0
        let head = readings.len().min(capacity - start);
        slots[start..start + head].copy_from_slice(&readings[..head]);
        slots[..readings.len() - head].copy_from_slice(&readings[head..]);

        self.shared.write_count.store(write_count + readings.len() as u64, Ordering::Release);
        Ok(readings.len())
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn write_count(&self) -> u64 {
        self.shared.write_count.load(Ordering::Acquire)
    }
}

/// A consumer with its own cursor into a [`RingStore`].
///
/// Dropping the reader unregisters it.
pub struct RingReader {
    id: ReaderId,
    shared: Arc<Shared>,
    position: Arc<AtomicU64>,
}

impl fmt::Debug for RingReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingReader")
            .field("id", &self.id)
            .field("position", &self.position())
            .finish()
    }
}

impl RingReader {
    /// Copy out everything written since the last drain.
    ///
    /// Returns at most `capacity` readings. If the writer lapped this reader,
    /// the overwritten readings are skipped and counted in `lagged`.
    pub fn drain(&mut self) -> Drain {
        let capacity = self.shared.capacity as u64;
        let slots = self.shared.slots.read().unwrap_or_else(PoisonError::into_inner);
        let write_count = self.shared.write_count.load(Ordering::Acquire);
        let mut position = self.position.load(Ordering::Relaxed);

        let mut lagged = 0;
        if write_count - position > capacity {
            let oldest = write_count - capacity;
            lagged = oldest - position;
            position = oldest;
        }

        let count = (write_count - position) as usize;
        let mut readings = Vec::with_capacity(count);
        let start = (position % capacity) as usize;
        let head = count.min(slots.len() - start);
        readings.extend_from_slice(&slots[start..start + head]);
        readings.extend_from_slice(&slots[..count - head]);
        drop(slots);

        if lagged > 0 {
            warn!("{} lagged: {} readings overwritten before they were read", self.id, lagged);
        }

        self.position.store(write_count, Ordering::Release);
        Drain { readings, lagged, start_position: position }
    }

    /// Readings waiting for this reader, capped at the capacity.
    pub fn available_count(&self) -> usize {
        let pending = self.shared.write_count.load(Ordering::Acquire) - self.position();
        pending.min(self.shared.capacity as u64) as usize
    }

    pub fn id(&self) -> ReaderId {
        self.id
    }

    /// Logical position of the next reading this reader will see.
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    /// Poll this reader every `every`, yielding non-empty drains.
    ///
    /// Must be called inside a tokio runtime.
    pub fn into_stream(mut self, every: Duration) -> impl Stream<Item = Drain> + Send + 'static {
        let mut interval = tokio::time::interval(every.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        IntervalStream::new(interval).filter_map(move |_| {
            let drain = self.drain();
            future::ready((!drain.is_empty()).then_some(drain))
        })
    }
}

impl Drop for RingReader {
    fn drop(&mut self) {
        let mut readers = self.shared.readers.lock().unwrap_or_else(PoisonError::into_inner);
        readers.remove(&self.id);
        debug!("Unregistered {} ({} readers remain)", self.id, readers.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::readings::sequence;
    use proptest::prelude::*;

    fn timestamps(drain: &Drain) -> Vec<i64> {
        drain.readings.iter().map(|r| r.timestamp_ms).collect()
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(RingStore::new(0), Err(IngestError::Config { .. })));
    }

    #[test]
    fn writer_can_only_be_taken_once() {
        let store = RingStore::new(8).unwrap();
        let _writer = store.take_writer().unwrap();
        assert!(matches!(store.take_writer(), Err(IngestError::WriterTaken)));
        assert!(matches!(store.clone().take_writer(), Err(IngestError::WriterTaken)));
    }

    #[test]
    fn fresh_reader_sees_writes_in_order() {
        let store = RingStore::new(16).unwrap();
        let mut writer = store.take_writer().unwrap();

        assert_eq!(writer.write(&sequence(0, 5)), 5);
        assert_eq!(writer.write(&sequence(5, 6)), 6);

        let mut reader = store.register_reader();
        let drain = reader.drain();
        assert_eq!(timestamps(&drain), (0..11).collect::<Vec<_>>());
        assert_eq!(drain.lagged, 0);
        assert_eq!(drain.start_position, 0);
        assert_eq!(reader.position(), 11);
    }

    #[test]
    fn reader_joining_a_wrapped_ring_starts_without_lag() {
        let store = RingStore::new(4).unwrap();
        let mut writer = store.take_writer().unwrap();
        writer.write(&sequence(0, 4));
        writer.write(&sequence(4, 3));

        let mut reader = store.register_reader();
        assert_eq!(reader.position(), 3);
        assert_eq!(store.reader_lags(), vec![(reader.id(), 4)]);

        let drain = reader.drain();
        assert_eq!(timestamps(&drain), vec![3, 4, 5, 6]);
        assert_eq!(drain.lagged, 0);
        assert_eq!(drain.start_position, 3);
    }

    #[test]
    fn second_drain_is_empty() {
        let store = RingStore::new(4).unwrap();
        let mut writer = store.take_writer().unwrap();
        let mut reader = store.register_reader();

        writer.write(&sequence(0, 3));
        assert_eq!(reader.drain().len(), 3);

        let again = reader.drain();
        assert!(again.is_empty());
        assert_eq!(again.start_position, 3);
        assert_eq!(reader.available_count(), 0);
    }

    #[test]
    fn lapped_reader_sees_only_latest_capacity() {
        let store = RingStore::new(8).unwrap();
        let mut writer = store.take_writer().unwrap();
        let mut reader = store.register_reader();

        writer.write(&sequence(0, 8));
        writer.write(&sequence(8, 8));

        assert_eq!(reader.available_count(), 8);
        let drain = reader.drain();
        assert_eq!(timestamps(&drain), (8..16).collect::<Vec<_>>());
        assert_eq!(drain.lagged, 8);
        assert_eq!(drain.start_position, 8);
    }

    #[test]
    fn oversized_batch_writes_nothing() {
        let store = RingStore::new(4).unwrap();
        let mut writer = store.take_writer().unwrap();

        assert_eq!(writer.write(&sequence(0, 5)), 0);
        assert!(matches!(
            writer.try_write(&sequence(0, 5)),
            Err(IngestError::CapacityRejected { requested: 5, capacity: 4 })
        ));
        assert_eq!(store.write_count(), 0);
        assert_eq!(writer.write(&[]), 0);
    }

    #[test]
    fn wrapped_batch_is_read_back_in_order() {
        let store = RingStore::new(5).unwrap();
        let mut writer = store.take_writer().unwrap();
        writer.write(&sequence(0, 3));

        let mut reader = store.register_reader_at(ReadFrom::Latest);
        // Slots 3, 4, 0, 1
        writer.write(&sequence(3, 4));

        let drain = reader.drain();
        assert_eq!(timestamps(&drain), vec![3, 4, 5, 6]);
        assert_eq!(drain.start_position, 3);
    }

    #[test]
    fn explicit_start_points() {
        let store = RingStore::new(8).unwrap();
        let mut writer = store.take_writer().unwrap();
        writer.write(&sequence(0, 6));

        let mut latest = store.register_reader_at(ReadFrom::Latest);
        let mut middle = store.register_reader_at(ReadFrom::Position(4));
        let mut beyond = store.register_reader_at(ReadFrom::Position(100));

        assert!(latest.drain().is_empty());
        assert_eq!(timestamps(&middle.drain()), vec![4, 5]);
        assert_eq!(beyond.position(), 6);

        writer.write(&sequence(6, 1));
        assert_eq!(timestamps(&beyond.drain()), vec![6]);
    }

    #[test]
    fn registry_tracks_readers_and_lags() {
        let store = RingStore::new(4).unwrap();
        let mut writer = store.take_writer().unwrap();

        let first = store.register_reader();
        let mut second = store.register_reader();
        assert_eq!(store.reader_count(), 2);
        assert_ne!(first.id(), second.id());

        writer.write(&sequence(0, 3));
        second.drain();
        assert_eq!(store.reader_lags(), vec![(first.id(), 3), (second.id(), 0)]);

        drop(first);
        assert_eq!(store.reader_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reader_stream_skips_empty_polls() {
        let store = RingStore::new(16).unwrap();
        let mut writer = store.take_writer().unwrap();
        let mut stream = Box::pin(store.register_reader().into_stream(Duration::from_millis(10)));

        writer.write(&sequence(0, 2));
        let first = stream.next().await.unwrap();
        assert_eq!(timestamps(&first), vec![0, 1]);

        let writes = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(35)).await;
            writer.write(&sequence(2, 3));
            writer
        });

        let second = stream.next().await.unwrap();
        assert_eq!(timestamps(&second), vec![2, 3, 4]);
        assert_eq!(second.start_position, 2);
        writes.await.unwrap();
    }

    proptest! {
        #[test]
        fn prop_reader_sees_every_reading_or_lag(
            capacity in 1usize..32,
            steps in prop::collection::vec((0usize..40, any::<bool>()), 1..40),
        ) {
            let store = RingStore::new(capacity).unwrap();
            let mut writer = store.take_writer().unwrap();
            let mut reader = store.register_reader();

            let mut next_ts = 0i64;
            let mut expected = 0i64;
            for (size, drain_now) in steps {
                let size = size.min(capacity);
                prop_assert_eq!(writer.write(&sequence(next_ts, size)), size);
                next_ts += size as i64;

                if drain_now {
                    let drain = reader.drain();
                    prop_assert!(drain.len() <= capacity);
                    expected += drain.lagged as i64;
                    for reading in &drain.readings {
                        prop_assert_eq!(reading.timestamp_ms, expected);
                        expected += 1;
                    }
                }
            }

            let drain = reader.drain();
            expected += drain.lagged as i64;
            for reading in &drain.readings {
                prop_assert_eq!(reading.timestamp_ms, expected);
                expected += 1;
            }
            prop_assert_eq!(expected, next_ts);
        }
    }
}
