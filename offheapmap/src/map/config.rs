use crate::error::{OffHeapMapError, Result};
use crate::segment::MAX_SEGMENT_BYTES;

/// Construction-time settings for an [`OffHeapMap`](super::OffHeapMap).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapConfig {
    /// Number of entries the initial table should hold without growing.
    pub expected_elements: usize,

    /// Target ratio of live entries to slots, exclusive range (0, 1) (default: 0.66)
    pub load_factor: f32,

    /// Ceiling for one segment allocation (default: 2^31 - 1 bytes)
    pub max_segment_bytes: usize,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            expected_elements: 16,
            load_factor: 0.66,
            max_segment_bytes: MAX_SEGMENT_BYTES,
        }
    }
}

impl MapConfig {
    pub fn new(expected_elements: usize, load_factor: f32) -> Self {
        Self {
            expected_elements,
            load_factor,
            ..Self::default()
        }
    }

    pub fn with_expected_elements(mut self, expected_elements: usize) -> Self {
        self.expected_elements = expected_elements;
        self
    }

    pub fn with_load_factor(mut self, load_factor: f32) -> Self {
        self.load_factor = load_factor;
        self
    }

    pub fn with_max_segment_bytes(mut self, max_segment_bytes: usize) -> Self {
        self.max_segment_bytes = max_segment_bytes;
        self
    }

    /// Checks the settings against a codec's entry width.
    pub fn validate(&self, entry_width: usize) -> Result<()> {
        // written this way round so NaN is rejected too
        if !(self.load_factor > 0.0 && self.load_factor < 1.0) {
            return Err(OffHeapMapError::InvalidLoadFactor(self.load_factor));
        }
        if self.expected_elements == 0 {
            return Err(OffHeapMapError::InvalidExpectedElements(
                self.expected_elements,
            ));
        }
        if entry_width == 0 || entry_width >= self.max_segment_bytes {
            return Err(OffHeapMapError::InvalidEntryWidth {
                width: entry_width,
                max: self.max_segment_bytes,
            });
        }
        Ok(())
    }
}
