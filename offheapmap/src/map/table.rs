use crate::codec::EntryCodec;
use crate::error::Result;
use crate::segment::{MemorySegment, SegmentAllocator};
use crate::slots::SegmentedSlots;
use crate::utils::threshold_for;

/// Outcome of a linear probe for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Probe {
    /// The key lives at this position.
    Found(usize),
    /// The probe reached this empty position first.
    Vacant(usize),
}

/// One open-addressed table: the slot arena plus its sizing parameters.
pub(crate) struct Table<S: MemorySegment> {
    pub(crate) slots: SegmentedSlots<S>,
    /// Number of slots, always a power of two.
    pub(crate) size: usize,
    pub(crate) modulo: usize,
    pub(crate) threshold: usize,
}

impl<S: MemorySegment> Table<S> {
    pub(crate) fn allocate<A>(
        allocator: &mut A,
        entry_width: usize,
        size: usize,
        load_factor: f32,
        max_segment_bytes: usize,
    ) -> Result<Self>
    where
        A: SegmentAllocator<Segment = S>,
    {
        debug_assert!(size.is_power_of_two());
        let slots = SegmentedSlots::allocate(allocator, size, entry_width, max_segment_bytes)?;
        Ok(Self {
            slots,
            size,
            modulo: size - 1,
            threshold: threshold_for(size, load_factor),
        })
    }

    /// Ideal bucket for a hash.
    #[inline]
    pub(crate) fn home(&self, hash: u32) -> usize {
        hash as usize & self.modulo
    }

    #[inline]
    fn next(&self, pos: usize) -> usize {
        (pos + 1) & self.modulo
    }

    /// Walks forward from the key's home until it finds the key or an empty slot.
    ///
    /// Terminates because the table always keeps at least one empty slot.
    pub(crate) fn probe<C: EntryCodec>(&self, codec: &C, key: &C::Key) -> Probe {
        let mut pos = self.home(codec.hash(key));
        loop {
            let slot = self.slots.slot(pos);
            if codec.equals_key(slot, key) {
                return Probe::Found(pos);
            }
            if codec.is_empty(slot) {
                return Probe::Vacant(pos);
            }
            pos = self.next(pos);
        }
    }

    /// Backward-shift deletion starting with a hole at `pos`.
    ///
    /// Entries after the hole that could legally sit in it are moved back one
    /// at a time, so every key stays reachable from its home without tombstones.
    /// `scratch` receives each scanned key while its home is computed.
    pub(crate) fn shift_back<C: EntryCodec>(&mut self, codec: &C, mut pos: usize, scratch: &mut C::Key) {
        loop {
            let hole = pos;
            pos = self.next(pos);
            loop {
                let slot = self.slots.slot(pos);
                if codec.is_empty(slot) {
                    codec.clear(self.slots.slot_mut(hole));
                    return;
                }
                codec.read_key(slot, scratch);
                let home = self.home(codec.hash(scratch));
                // The entry may stay only if its home lies in the circular range (hole, pos].
                let must_move = if hole <= pos {
                    hole >= home || home > pos
                } else {
                    pos < home && home <= hole
                };
                if must_move {
                    break;
                }
                pos = self.next(pos);
            }
            let (from, to) = self.slots.slot_pair(pos, hole);
            codec.copy(from, to);
        }
    }
}
