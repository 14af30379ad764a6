pub mod codec;
pub mod error;
pub mod holder;
pub mod map;
pub mod segment;
pub mod slots;
pub mod utils;

pub use codec::{EntryCodec, FixedBytes, IntIntCodec, LongLongCodec, Native, NativeKey, ShortShortCodec};
pub use error::{OffHeapMapError, Result};
pub use holder::{BytesHolder, Copyable};
pub use map::{BytesBytesMap, IntIntMap, LongLongMap, MapConfig, OffHeapMap, ShortShortMap};
pub use segment::{AnonAllocator, AnonSegment, MemorySegment, MmapAllocator, MmapSegment, SegmentAllocator};
pub use slots::SegmentedSlots;
