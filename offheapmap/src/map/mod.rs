mod config;
mod table;

use std::fmt;
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::codec::{EntryCodec, FixedBytes, IntIntCodec, LongLongCodec, ShortShortCodec};
use crate::error::{OffHeapMapError, Result};
use crate::holder::Copyable;
use crate::segment::{AnonAllocator, SegmentAllocator};
use crate::utils::table_size_for;

pub use config::MapConfig;
use table::{Probe, Table};

pub type IntIntMap<A = AnonAllocator> = OffHeapMap<IntIntCodec, A>;
pub type LongLongMap<A = AnonAllocator> = OffHeapMap<LongLongCodec, A>;
pub type ShortShortMap<A = AnonAllocator> = OffHeapMap<ShortShortCodec, A>;
pub type BytesBytesMap<A = AnonAllocator> = OffHeapMap<FixedBytes, A>;

/// Open-addressing hash map whose entries live in segments obtained from a
/// [`SegmentAllocator`] rather than in ordinary heap objects.
///
/// Keys and values are fixed-width and encoded by an [`EntryCodec`]. Collisions
/// are resolved with linear probing and deletions use backward shifting, so no
/// tombstones are ever left behind. The codec's all-zero key marks an empty
/// slot and is therefore stored in a separate side entry.
///
/// Callers pass holders in and out instead of receiving owned values:
/// `get` fills the supplied holder, `put` and `remove` optionally fill one
/// with the previous value.
pub struct OffHeapMap<C: EntryCodec, A: SegmentAllocator> {
    codec: C,
    allocator: A,
    load_factor: f32,
    max_segment_bytes: usize,
    table: Table<A::Segment>,
    len: usize,
    has_free_key: bool,
    free_key: C::Key,
    free_value: C::Value,
    scratch_key: C::Key,
    scratch_value: C::Value,
}

impl<C: EntryCodec, A: SegmentAllocator> OffHeapMap<C, A> {
    pub fn new(codec: C, allocator: A, expected_elements: usize, load_factor: f32) -> Result<Self> {
        Self::with_config(codec, allocator, MapConfig::new(expected_elements, load_factor))
    }

    pub fn with_config(codec: C, mut allocator: A, config: MapConfig) -> Result<Self> {
        let entry_width = codec.entry_width();
        config.validate(entry_width)?;
        let table_size = table_size_for(config.expected_elements, config.load_factor)?;
        let table = Table::allocate(
            &mut allocator,
            entry_width,
            table_size,
            config.load_factor,
            config.max_segment_bytes,
        )?;
        debug!(
            entry_width,
            capacity = table.size,
            threshold = table.threshold,
            segments = table.slots.segment_count(),
            "created off-heap map"
        );
        Ok(Self {
            free_key: codec.new_key(),
            free_value: codec.new_value(),
            scratch_key: codec.new_key(),
            scratch_value: codec.new_value(),
            codec,
            allocator,
            load_factor: config.load_factor,
            max_segment_bytes: config.max_segment_bytes,
            table,
            len: 0,
            has_free_key: false,
        })
    }

    /// Inserts or replaces the value for `key`.
    ///
    /// Returns `true` if the key was already present, in which case the old
    /// value is copied into `previous` when one is given.
    pub fn put(&mut self, key: &C::Key, value: &C::Value, previous: Option<&mut C::Value>) -> Result<bool> {
        self.codec.check_key(key)?;
        self.codec.check_value(value)?;
        if let Some(prev) = previous.as_deref() {
            self.codec.check_value(prev)?;
        }

        if self.codec.is_free_key(key) {
            if self.has_free_key {
                if let Some(prev) = previous {
                    prev.copy_from(&self.free_value);
                }
                self.free_value.copy_from(value);
                return Ok(true);
            }
            self.free_key.copy_from(key);
            self.free_value.copy_from(value);
            self.has_free_key = true;
            self.len += 1;
            if self.len > self.table.threshold {
                self.grow(|map| map.has_free_key = false)?;
            }
            return Ok(false);
        }

        match self.table.probe(&self.codec, key) {
            Probe::Found(pos) => {
                let slot = self.table.slots.slot_mut(pos);
                if let Some(prev) = previous {
                    self.codec.read_value(slot, prev);
                }
                self.codec.write(slot, key, value);
                Ok(true)
            }
            Probe::Vacant(pos) => {
                self.codec.write(self.table.slots.slot_mut(pos), key, value);
                self.len += 1;
                if self.len > self.table.threshold {
                    self.grow(|map| map.codec.clear(map.table.slots.slot_mut(pos)))?;
                }
                Ok(false)
            }
        }
    }

    /// Copies the value for `key` into `using`. Returns `false` and leaves
    /// `using` untouched when the key is absent.
    pub fn get(&self, key: &C::Key, using: &mut C::Value) -> Result<bool> {
        self.codec.check_key(key)?;
        self.codec.check_value(using)?;

        if self.codec.is_free_key(key) {
            if self.has_free_key {
                using.copy_from(&self.free_value);
            }
            return Ok(self.has_free_key);
        }

        match self.table.probe(&self.codec, key) {
            Probe::Found(pos) => {
                self.codec.read_value(self.table.slots.slot(pos), using);
                Ok(true)
            }
            Probe::Vacant(_) => Ok(false),
        }
    }

    pub fn contains_key(&self, key: &C::Key) -> Result<bool> {
        self.codec.check_key(key)?;
        if self.codec.is_free_key(key) {
            return Ok(self.has_free_key);
        }
        Ok(matches!(self.table.probe(&self.codec, key), Probe::Found(_)))
    }

    /// Removes `key`, copying its value into `removed` when one is given.
    /// Returns `true` if the key was present.
    pub fn remove(&mut self, key: &C::Key, removed: Option<&mut C::Value>) -> Result<bool> {
        self.codec.check_key(key)?;
        if let Some(out) = removed.as_deref() {
            self.codec.check_value(out)?;
        }

        if self.codec.is_free_key(key) {
            if !self.has_free_key {
                return Ok(false);
            }
            if let Some(out) = removed {
                out.copy_from(&self.free_value);
            }
            self.has_free_key = false;
            self.len -= 1;
            return Ok(true);
        }

        match self.table.probe(&self.codec, key) {
            Probe::Found(pos) => {
                if let Some(out) = removed {
                    self.codec.read_value(self.table.slots.slot(pos), out);
                }
                self.table.shift_back(&self.codec, pos, &mut self.scratch_key);
                self.len -= 1;
                Ok(true)
            }
            Probe::Vacant(_) => Ok(false),
        }
    }

    /// Number of live entries, the free-key entry included.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drops every entry. The table keeps its current capacity.
    pub fn clear(&mut self) {
        self.table.slots.zero();
        self.len = 0;
        self.has_free_key = false;
    }

    /// Number of slots in the current table.
    pub fn capacity(&self) -> usize {
        self.table.size
    }

    /// Entry count above which the next insert grows the table.
    pub fn threshold(&self) -> usize {
        self.table.threshold
    }

    pub fn load_factor(&self) -> f32 {
        self.load_factor
    }

    pub fn segment_count(&self) -> usize {
        self.table.slots.segment_count()
    }

    pub fn entry_width(&self) -> usize {
        self.codec.entry_width()
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Releases the backing segments. File-backed segments are unmapped and deleted.
    pub fn close(self) -> Result<()> {
        self.table.slots.close()
    }

    /// Replaces the table with a larger one after an insert pushed the map
    /// past its threshold. If the new table cannot be built, `undo_insert`
    /// takes the new entry back out and the old table stays in place.
    fn grow(&mut self, undo_insert: impl FnOnce(&mut Self)) -> Result<()> {
        let started = Instant::now();
        let old_capacity = self.table.size;
        let grown = match self.rebuild() {
            Ok(grown) => grown,
            Err(err) => {
                undo_insert(self);
                self.len -= 1;
                return Err(err);
            }
        };
        let old = std::mem::replace(&mut self.table, grown);
        debug!(
            old_capacity,
            new_capacity = self.table.size,
            entries = self.len,
            segments = self.table.slots.segment_count(),
            elapsed = ?started.elapsed(),
            "rehashed off-heap map"
        );
        old.slots.close()
    }

    fn rebuild(&mut self) -> Result<Table<A::Segment>> {
        let table_size = table_size_for(self.table.threshold * 2, self.load_factor)?;
        let mut grown = Table::allocate(
            &mut self.allocator,
            self.codec.entry_width(),
            table_size,
            self.load_factor,
            self.max_segment_bytes,
        )?;

        let mut replayed = 0;
        for slot in self.table.slots.iter() {
            if self.codec.is_empty(slot) {
                continue;
            }
            self.codec.read_key(slot, &mut self.scratch_key);
            self.codec.read_value(slot, &mut self.scratch_value);
            match grown.probe(&self.codec, &self.scratch_key) {
                Probe::Vacant(pos) => {
                    self.codec
                        .write(grown.slots.slot_mut(pos), &self.scratch_key, &self.scratch_value);
                }
                Probe::Found(pos) => {
                    let mut existing = self.codec.new_value();
                    self.codec.read_value(grown.slots.slot(pos), &mut existing);
                    error!(key = ?self.scratch_key, value = ?existing, "duplicate key while rehashing");
                    discard(grown);
                    return Err(OffHeapMapError::Corrupted(format!(
                        "key {:?} already holds {:?} while rehashing",
                        self.scratch_key, existing
                    )));
                }
            }
            replayed += 1;
        }

        let counted = replayed + usize::from(self.has_free_key);
        if counted != self.len {
            discard(grown);
            return Err(OffHeapMapError::Corrupted(format!(
                "rehash found {counted} entries but the map holds {}",
                self.len
            )));
        }
        Ok(grown)
    }
}

fn discard<S: crate::segment::MemorySegment>(table: Table<S>) {
    if let Err(err) = table.slots.close() {
        warn!(%err, "failed to release discarded table");
    }
}

impl<C: EntryCodec, A: SegmentAllocator> fmt::Debug for OffHeapMap<C, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffHeapMap")
            .field("len", &self.len)
            .field("capacity", &self.table.size)
            .field("threshold", &self.table.threshold)
            .field("segments", &self.table.slots.segment_count())
            .field(
                "free_entry",
                &self.has_free_key.then_some((&self.free_key, &self.free_value)),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::io;
    use std::rc::Rc;

    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    use super::*;
    use crate::holder::BytesHolder;
    use crate::segment::{AnonSegment, MemorySegment, MmapAllocator};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn int_map(expected: usize) -> IntIntMap {
        IntIntMap::new(IntIntCodec::new(), AnonAllocator, expected, 0.66).unwrap()
    }

    fn get_int<A: SegmentAllocator>(map: &IntIntMap<A>, key: i32) -> Option<i32> {
        let mut value = 0;
        map.get(&key, &mut value).unwrap().then_some(value)
    }

    /// Every occupied slot must be reachable from its home without crossing an empty slot.
    fn assert_reachable<C: EntryCodec, A: SegmentAllocator>(map: &OffHeapMap<C, A>) {
        let table = &map.table;
        let mut key = map.codec.new_key();
        let mut occupied = 0;
        for pos in 0..table.size {
            let slot = table.slots.slot(pos);
            if map.codec.is_empty(slot) {
                continue;
            }
            occupied += 1;
            map.codec.read_key(slot, &mut key);
            let mut p = table.home(map.codec.hash(&key));
            while p != pos {
                assert!(!map.codec.is_empty(table.slots.slot(p)), "gap before {pos}");
                p = (p + 1) & table.modulo;
            }
        }
        assert_eq!(occupied + usize::from(map.has_free_key), map.len());
    }

    #[test]
    fn test_single_element_map() {
        let mut map = int_map(1);
        assert_eq!((map.capacity(), map.threshold()), (2, 1));

        assert!(!map.put(&-1, &2, None).unwrap());
        assert_eq!(get_int(&map, -1), Some(2));
        assert_eq!(map.len(), 1);

        let mut removed = 0;
        assert!(map.remove(&-1, Some(&mut removed)).unwrap());
        assert_eq!(removed, 2);
        assert_eq!(map.len(), 0);
        assert!(map.is_empty());
        assert_eq!(get_int(&map, -1), None);

        for k in 0..10 {
            assert!(!map.put(&k, &(k * k), None).unwrap());
        }
        assert_eq!(map.len(), 10);
        for k in 0..10 {
            assert_eq!(get_int(&map, k), Some(k * k));
        }
        assert!(map.capacity() >= 16);
        assert_reachable(&map);
    }

    #[test]
    fn test_update_returns_previous() {
        let mut map = int_map(10);
        assert!(!map.put(&7, &70, None).unwrap());
        let mut previous = -1;
        assert!(map.put(&7, &71, Some(&mut previous)).unwrap());
        assert_eq!(previous, 70);
        assert_eq!(get_int(&map, 7), Some(71));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_absent_key_leaves_holder_untouched() {
        let mut map = int_map(10);
        map.put(&1, &10, None).unwrap();
        let mut holder = 99;
        assert!(!map.get(&2, &mut holder).unwrap());
        assert_eq!(holder, 99);
        assert!(!map.remove(&2, Some(&mut holder)).unwrap());
        assert_eq!(holder, 99);
        assert!(!map.contains_key(&2).unwrap());
        assert!(map.contains_key(&1).unwrap());
    }

    #[test]
    fn test_free_key_side_entry() {
        let mut map = int_map(10);
        assert!(!map.contains_key(&0).unwrap());
        assert!(!map.put(&0, &1, None).unwrap());
        assert_eq!(map.len(), 1);
        assert!(map.table.slots.iter().all(|slot| map.codec.is_empty(slot)));

        let mut previous = 0;
        assert!(map.put(&0, &11, Some(&mut previous)).unwrap());
        assert_eq!(previous, 1);
        assert_eq!(get_int(&map, 0), Some(11));
        assert_eq!(map.len(), 1);

        let mut removed = 0;
        assert!(map.remove(&0, Some(&mut removed)).unwrap());
        assert_eq!(removed, 11);
        assert!(!map.remove(&0, None).unwrap());
        assert_eq!(map.len(), 0);
        assert_eq!(get_int(&map, 0), None);

        assert!(!map.put(&0, &111, None).unwrap());
        assert_eq!(get_int(&map, 0), Some(111));
    }

    #[test]
    fn test_free_key_counts_towards_growth() {
        let mut map = int_map(1);
        map.put(&0, &5, None).unwrap();
        map.put(&1, &6, None).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.capacity(), 4);
        assert_eq!(get_int(&map, 0), Some(5));
        assert_eq!(get_int(&map, 1), Some(6));
        assert_reachable(&map);
    }

    #[test]
    fn test_free_key_insert_triggers_growth() {
        let mut map = int_map(1);
        map.put(&1, &10, None).unwrap();
        assert!(!map.put(&0, &5, None).unwrap());
        assert_eq!(map.len(), 2);
        assert!(map.len() <= map.threshold());
        assert_eq!(map.capacity(), 4);
        assert_eq!(get_int(&map, 0), Some(5));
        assert_eq!(get_int(&map, 1), Some(10));
        assert_reachable(&map);
    }

    #[test]
    fn test_growth_keeps_every_entry() {
        let mut map = int_map(1);
        for k in 1..=5_000 {
            map.put(&k, &(-k), None).unwrap();
            assert!(map.len() <= map.threshold());
        }
        assert_eq!(map.len(), 5_000);
        assert!(map.capacity().is_power_of_two());
        for k in 1..=5_000 {
            assert_eq!(get_int(&map, k), Some(-k), "key: {k}");
        }
        assert_reachable(&map);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut map = int_map(4);
        for k in 0..100 {
            map.put(&k, &k, None).unwrap();
        }
        let capacity = map.capacity();
        map.clear();
        assert_eq!(map.len(), 0);
        assert_eq!(map.capacity(), capacity);
        assert_eq!(get_int(&map, 0), None);
        assert_eq!(get_int(&map, 50), None);
        map.put(&50, &500, None).unwrap();
        assert_eq!(get_int(&map, 50), Some(500));
    }

    #[test]
    fn test_short_and_long_maps() {
        let mut shorts = ShortShortMap::new(ShortShortCodec::new(), AnonAllocator, 8, 0.5).unwrap();
        for k in i16::MIN..i16::MIN + 300 {
            shorts.put(&k, &k.wrapping_neg(), None).unwrap();
        }
        let mut v = 0i16;
        assert!(shorts.get(&(i16::MIN + 7), &mut v).unwrap());
        assert_eq!(v, (i16::MIN + 7).wrapping_neg());
        assert_eq!(shorts.entry_width(), 4);

        let mut longs = LongLongMap::new(LongLongCodec::new(), AnonAllocator, 8, 0.66).unwrap();
        for k in 0..300i64 {
            longs.put(&(k << 40), &k, None).unwrap();
        }
        let mut v = 0i64;
        assert!(longs.get(&(123 << 40), &mut v).unwrap());
        assert_eq!(v, 123);
        assert_eq!(longs.entry_width(), 16);
        assert_reachable(&longs);
    }

    #[test]
    fn test_bytes_map() {
        let mut map = BytesBytesMap::new(FixedBytes::new(5, 10), AnonAllocator, 10, 0.66).unwrap();
        assert_eq!(map.entry_width(), 15);

        let key = BytesHolder::from(b"abcde");
        let value = BytesHolder::from(b"abcdefghij");
        assert!(!map.put(&key, &value, None).unwrap());

        let mut out = map.codec().new_value();
        assert!(map.get(&key, &mut out).unwrap());
        assert_eq!(out.as_bytes(), b"abcdefghij");

        let mut previous = map.codec().new_value();
        let other = BytesHolder::from(b"0123456789");
        assert!(map.put(&key, &other, Some(&mut previous)).unwrap());
        assert_eq!(previous.as_bytes(), b"abcdefghij");

        assert!(map.remove(&key, Some(&mut out)).unwrap());
        assert_eq!(out.as_bytes(), b"0123456789");
        assert!(map.is_empty());
    }

    #[test]
    fn test_bytes_map_free_key() {
        let mut map = BytesBytesMap::new(FixedBytes::new(4, 2), AnonAllocator, 10, 0.66).unwrap();
        let zero = BytesHolder::new(4);
        map.put(&zero, &BytesHolder::from(b"hi"), None).unwrap();
        let mut out = BytesHolder::new(2);
        assert!(map.get(&zero, &mut out).unwrap());
        assert_eq!(out.as_bytes(), b"hi");
        assert!(format!("{map:?}").contains("free_entry: Some"));
    }

    #[test]
    fn test_length_mismatch_is_rejected_before_mutation() {
        let mut map = BytesBytesMap::new(FixedBytes::new(5, 10), AnonAllocator, 10, 0.66).unwrap();
        let short_key = BytesHolder::from(b"abc");
        let value = BytesHolder::from(b"abcdefghij");
        let err = map.put(&short_key, &value, None).err().unwrap();
        assert!(matches!(err, OffHeapMapError::LengthMismatch { actual: 3, expected: 5, .. }));

        let key = BytesHolder::from(b"abcde");
        let err = map.put(&key, &BytesHolder::from(b"abc"), None).err().unwrap();
        assert!(matches!(err, OffHeapMapError::LengthMismatch { expected: 10, .. }));

        let mut wrong_holder = BytesHolder::new(3);
        let err = map.put(&key, &value, Some(&mut wrong_holder)).err().unwrap();
        assert!(matches!(err, OffHeapMapError::LengthMismatch { .. }));
        assert!(map.is_empty());

        map.put(&key, &value, None).unwrap();
        assert!(map.get(&key, &mut wrong_holder).is_err());
        assert!(map.remove(&key, Some(&mut wrong_holder)).is_err());
        assert!(map.contains_key(&short_key).is_err());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_invalid_construction() {
        let err = IntIntMap::new(IntIntCodec::new(), AnonAllocator, 0, 0.66).err().unwrap();
        assert!(matches!(err, OffHeapMapError::InvalidExpectedElements(0)));

        for lf in [0.0, 1.0, f32::NAN] {
            let err = IntIntMap::new(IntIntCodec::new(), AnonAllocator, 10, lf).err().unwrap();
            assert!(matches!(err, OffHeapMapError::InvalidLoadFactor(_)));
        }

        let config = MapConfig::new(10, 0.66).with_max_segment_bytes(8);
        let err = IntIntMap::with_config(IntIntCodec::new(), AnonAllocator, config).err().unwrap();
        assert!(matches!(err, OffHeapMapError::InvalidEntryWidth { width: 8, max: 8 }));

        for expected in [usize::MAX, 1 << 40, 1 << 61] {
            let err = IntIntMap::new(IntIntCodec::new(), AnonAllocator, expected, 0.66).err().unwrap();
            assert!(matches!(err, OffHeapMapError::TableTooLarge { .. }), "{expected}");
        }
    }

    #[test]
    fn test_multi_segment_table() {
        // 8 int slots per segment
        let config = MapConfig::new(4, 0.66).with_max_segment_bytes(64);
        let mut map = IntIntMap::with_config(IntIntCodec::new(), AnonAllocator, config).unwrap();
        for k in 1..=1_000 {
            map.put(&k, &(k * 3), None).unwrap();
        }
        assert_eq!(map.segment_count(), map.capacity() / 8);
        for k in (1..=1_000).step_by(3) {
            assert!(map.remove(&k, None).unwrap());
        }
        assert_reachable(&map);
        for k in 1..=1_000 {
            let expected = (k % 3 != 1).then_some(k * 3);
            assert_eq!(get_int(&map, k), expected, "key: {k}");
        }
    }

    #[test]
    fn test_mmap_backed_map() {
        init_tracing();
        let dir = tempdir().unwrap();
        let dat_files = || std::fs::read_dir(dir.path()).unwrap().count();

        let allocator = MmapAllocator::with_prefix(dir.path(), "ints");
        let config = MapConfig::new(16, 0.66).with_max_segment_bytes(256);
        let mut map = IntIntMap::with_config(IntIntCodec::new(), allocator, config).unwrap();
        assert_eq!(dat_files(), map.segment_count());

        for k in -500..500 {
            map.put(&k, &(k + 1), None).unwrap();
        }
        // old tables are deleted as soon as a rehash finishes
        assert_eq!(dat_files(), map.segment_count());
        assert_eq!(get_int(&map, -500), Some(-499));
        assert_eq!(get_int(&map, 0), Some(1));
        assert_eq!(map.allocator().dir(), dir.path());

        map.close().unwrap();
        assert_eq!(dat_files(), 0);
    }

    /// Fails once `budget` allocations have been handed out.
    struct Limited {
        budget: usize,
    }

    impl SegmentAllocator for Limited {
        type Segment = AnonSegment;

        fn allocate(&mut self, capacity_bytes: usize) -> Result<AnonSegment> {
            if self.budget == 0 {
                return AnonSegment::allocate(usize::MAX);
            }
            self.budget -= 1;
            AnonSegment::allocate(capacity_bytes)
        }
    }

    #[test]
    fn test_failed_rehash_undoes_the_insert() {
        let mut map = IntIntMap::new(IntIntCodec::new(), Limited { budget: 1 }, 1, 0.66).unwrap();
        map.put(&1, &10, None).unwrap();

        let err = map.put(&2, &20, None).err().unwrap();
        assert!(matches!(err, OffHeapMapError::Allocation { .. }));
        assert_eq!(map.len(), 1);
        assert_eq!(map.capacity(), 2);
        assert_eq!(get_int(&map, 1), Some(10));
        assert_eq!(get_int(&map, 2), None);
        assert_reachable(&map);

        // updates and removals still work without growing
        assert!(map.put(&1, &11, None).unwrap());
        assert!(map.remove(&1, None).unwrap());
        assert!(map.is_empty());
    }

    #[test]
    fn test_failed_rehash_undoes_a_free_key_insert() {
        let mut map = IntIntMap::new(IntIntCodec::new(), Limited { budget: 1 }, 1, 0.66).unwrap();
        map.put(&1, &10, None).unwrap();

        let err = map.put(&0, &5, None).err().unwrap();
        assert!(matches!(err, OffHeapMapError::Allocation { .. }));
        assert_eq!(map.len(), 1);
        assert_eq!(map.capacity(), 2);
        assert!(!map.contains_key(&0).unwrap());
        assert_eq!(get_int(&map, 1), Some(10));
        assert_reachable(&map);
    }

    struct Flaky {
        inner: AnonSegment,
        fail_close: Rc<Cell<bool>>,
    }

    impl AsRef<[u8]> for Flaky {
        fn as_ref(&self) -> &[u8] {
            self.inner.as_ref()
        }
    }

    impl AsMut<[u8]> for Flaky {
        fn as_mut(&mut self) -> &mut [u8] {
            self.inner.as_mut()
        }
    }

    impl MemorySegment for Flaky {
        fn close(self) -> Result<()> {
            if self.fail_close.get() {
                return Err(io::Error::other("close failed").into());
            }
            self.inner.close()
        }
    }

    struct FlakyAllocator {
        fail_close: Rc<Cell<bool>>,
    }

    impl SegmentAllocator for FlakyAllocator {
        type Segment = Flaky;

        fn allocate(&mut self, capacity_bytes: usize) -> Result<Flaky> {
            Ok(Flaky {
                inner: AnonSegment::allocate(capacity_bytes)?,
                fail_close: self.fail_close.clone(),
            })
        }
    }

    #[test]
    fn test_release_failure_after_rehash_keeps_new_table() {
        let fail_close = Rc::new(Cell::new(false));
        let allocator = FlakyAllocator {
            fail_close: fail_close.clone(),
        };
        let mut map = IntIntMap::new(IntIntCodec::new(), allocator, 1, 0.66).unwrap();
        map.put(&1, &10, None).unwrap();

        fail_close.set(true);
        let err = map.put(&2, &20, None).err().unwrap();
        assert!(matches!(err, OffHeapMapError::Io(_)));
        fail_close.set(false);

        assert_eq!(map.capacity(), 4);
        assert_eq!(map.len(), 2);
        assert_eq!(get_int(&map, 1), Some(10));
        assert_eq!(get_int(&map, 2), Some(20));
        map.close().unwrap();
    }

    #[test]
    fn test_random_ops_match_std_hash_map() {
        init_tracing();
        let mut rng = StdRng::seed_from_u64(0x0FF_4EA9);
        let mut map = int_map(1);
        let mut expected = HashMap::new();
        let mut removal_candidate = None;

        for _ in 0..50_000 {
            let key = rng.random_range(-2_000..2_000);
            match rng.random_range(0..4) {
                0 | 1 => {
                    let value = rng.random::<i32>();
                    let mut previous = 0;
                    let had = map.put(&key, &value, Some(&mut previous)).unwrap();
                    match expected.insert(key, value) {
                        Some(old) => {
                            assert!(had);
                            assert_eq!(previous, old);
                        }
                        None => assert!(!had),
                    }
                    if rng.random_bool(0.1) {
                        removal_candidate = Some(key);
                    }
                }
                2 => {
                    let key = removal_candidate.take().unwrap_or(key);
                    let mut removed = 0;
                    let had = map.remove(&key, Some(&mut removed)).unwrap();
                    match expected.remove(&key) {
                        Some(old) => {
                            assert!(had);
                            assert_eq!(removed, old);
                        }
                        None => assert!(!had),
                    }
                }
                _ => assert_eq!(get_int(&map, key), expected.get(&key).copied(), "key: {key}"),
            }
            assert_eq!(map.len(), expected.len());
        }

        assert_reachable(&map);
        for (k, v) in &expected {
            assert_eq!(get_int(&map, *k), Some(*v));
        }
    }

    fn check_prop(hm: HashMap<Vec<u8>, Vec<u8>>) {
        let mut map = BytesBytesMap::new(FixedBytes::new(8, 4), AnonAllocator, 2, 0.66).unwrap();

        for (k, v) in hm.iter() {
            map.put(&k.as_slice().into(), &v.as_slice().into(), None).unwrap();
        }

        assert_eq!(map.len(), hm.len());

        let mut out = map.codec().new_value();
        for (k, v) in hm.iter() {
            assert!(map.get(&k.as_slice().into(), &mut out).unwrap(), "key: {k:?}");
            assert_eq!(out.as_bytes(), v.as_slice(), "key: {k:?}");
        }
        assert_reachable(&map);
    }

    #[test]
    fn it_s_a_hash_map() {
        let small_hash_map_prop = proptest::collection::hash_map(
            proptest::collection::vec(0u8..255, 8),
            proptest::collection::vec(0u8..255, 4),
            1..250,
        );

        proptest!(|(values in small_hash_map_prop)|{
            check_prop(values);
        });
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(i32, i32),
        Remove(i32),
        Get(i32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (-24i32..24, any::<i32>()).prop_map(|(k, v)| Op::Put(k, v)),
            (-24i32..24).prop_map(Op::Remove),
            (-24i32..24).prop_map(Op::Get),
        ]
    }

    proptest! {
        #[test]
        fn prop_ops_on_segmented_table(ops in proptest::collection::vec(op_strategy(), 1..400)) {
            // 4 slots per segment so probes and shifts cross boundaries constantly
            let config = MapConfig::new(1, 0.75).with_max_segment_bytes(32);
            let mut map = IntIntMap::with_config(IntIntCodec::new(), AnonAllocator, config).unwrap();
            let mut expected = HashMap::new();
            for op in ops {
                match op {
                    Op::Put(k, v) => {
                        prop_assert_eq!(map.put(&k, &v, None).unwrap(), expected.insert(k, v).is_some());
                    }
                    Op::Remove(k) => {
                        prop_assert_eq!(map.remove(&k, None).unwrap(), expected.remove(&k).is_some());
                    }
                    Op::Get(k) => {
                        prop_assert_eq!(get_int(&map, k), expected.get(&k).copied());
                    }
                }
                prop_assert_eq!(map.len(), expected.len());
            }
            assert_reachable(&map);
        }
    }
}
