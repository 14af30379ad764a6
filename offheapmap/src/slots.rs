use crate::error::{OffHeapMapError, Result};
use crate::segment::{MemorySegment, SegmentAllocator};

/// A run of fixed-width slots spread over several bounded segments.
///
/// Slot `p` lives in segment `p / slots_per_segment` at byte offset
/// `(p % slots_per_segment) * width`. Every segment holds whole slots only,
/// so a slot never straddles two allocations.
pub struct SegmentedSlots<S: MemorySegment> {
    segments: Vec<S>,
    width: usize,
    slots_per_segment: usize,
}

impl<S: MemorySegment> SegmentedSlots<S> {
    /// Allocates zeroed room for `len` slots of `width` bytes, asking for at
    /// most `max_segment_bytes` per segment.
    pub fn allocate<A>(
        allocator: &mut A,
        len: usize,
        width: usize,
        max_segment_bytes: usize,
    ) -> Result<Self>
    where
        A: SegmentAllocator<Segment = S>,
    {
        debug_assert!(width > 0 && width <= max_segment_bytes);
        let slots_per_segment = max_segment_bytes / width;
        let segment_count = len.div_ceil(slots_per_segment);
        let mut segments = Vec::new();
        segments
            .try_reserve_exact(segment_count)
            .map_err(|source| OffHeapMapError::Allocation {
                capacity: segment_count.saturating_mul(size_of::<S>()),
                source,
            })?;
        let mut remaining = len;
        while remaining > 0 {
            let slots = remaining.min(slots_per_segment);
            match allocator.allocate(slots * width) {
                Ok(segment) => segments.push(segment),
                Err(err) => {
                    if let Err(close_err) = release_all(segments) {
                        tracing::warn!(%close_err, "failed to release partially allocated segments");
                    }
                    return Err(err);
                }
            }
            remaining -= slots;
        }
        Ok(Self {
            segments,
            width,
            slots_per_segment,
        })
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> &[S] {
        &self.segments
    }

    /// Segment index and byte offset of slot `pos`.
    #[inline]
    pub fn locate(&self, pos: usize) -> (usize, usize) {
        (
            pos / self.slots_per_segment,
            (pos % self.slots_per_segment) * self.width,
        )
    }

    #[inline]
    pub fn slot(&self, pos: usize) -> &[u8] {
        let (seg, offset) = self.locate(pos);
        &self.segments[seg].as_ref()[offset..offset + self.width]
    }

    #[inline]
    pub fn slot_mut(&mut self, pos: usize) -> &mut [u8] {
        let (seg, offset) = self.locate(pos);
        let width = self.width;
        &mut self.segments[seg].as_mut()[offset..offset + width]
    }

    /// Borrows slot `from` for reading and slot `to` for writing at once.
    pub fn slot_pair(&mut self, from: usize, to: usize) -> (&[u8], &mut [u8]) {
        assert_ne!(from, to, "slot pair must name two different slots");
        let (from_seg, from_off) = self.locate(from);
        let (to_seg, to_off) = self.locate(to);
        let width = self.width;

        if from_seg == to_seg {
            let bytes = self.segments[from_seg].as_mut();
            if from_off < to_off {
                let (head, tail) = bytes.split_at_mut(to_off);
                (&head[from_off..from_off + width], &mut tail[..width])
            } else {
                let (head, tail) = bytes.split_at_mut(from_off);
                (&tail[..width], &mut head[to_off..to_off + width])
            }
        } else if from_seg < to_seg {
            let (head, tail) = self.segments.split_at_mut(to_seg);
            (
                &head[from_seg].as_ref()[from_off..from_off + width],
                &mut tail[0].as_mut()[to_off..to_off + width],
            )
        } else {
            let (head, tail) = self.segments.split_at_mut(from_seg);
            (
                &tail[0].as_ref()[from_off..from_off + width],
                &mut head[to_seg].as_mut()[to_off..to_off + width],
            )
        }
    }

    /// Every slot in position order.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let width = self.width;
        self.segments
            .iter()
            .flat_map(move |segment| segment.as_ref().chunks_exact(width))
    }

    /// Zeroes every byte of every segment.
    pub fn zero(&mut self) {
        for segment in &mut self.segments {
            segment.as_mut().fill(0);
        }
    }

    /// Releases every segment, reporting the first failure after trying them all.
    pub fn close(self) -> Result<()> {
        release_all(self.segments)
    }
}

fn release_all<S: MemorySegment>(segments: Vec<S>) -> Result<()> {
    let mut first_err = None;
    for segment in segments {
        if let Err(err) = segment.close() {
            first_err.get_or_insert(err);
        }
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
