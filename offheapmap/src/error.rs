use std::collections::TryReserveError;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when building or operating an off-heap map
#[derive(Error, Debug)]
pub enum OffHeapMapError {
    /// Load factor outside the open interval (0, 1)
    #[error("load factor must be between 0 and 1 (exclusive), got {0}")]
    InvalidLoadFactor(f32),

    /// Expected element count must be positive
    #[error("expected element count must be positive, got {0}")]
    InvalidExpectedElements(usize),

    /// Entry width is zero or does not fit in a single segment
    #[error("entry width {width} must be non-zero and less than the max segment size {max}")]
    InvalidEntryWidth { width: usize, max: usize },

    /// The requested table would exceed the addressable slot count
    #[error("storage gets too large with expected size {expected}, load factor {load_factor}")]
    TableTooLarge { expected: usize, load_factor: f32 },

    /// A holder's length disagrees with the codec layout
    #[error("given {what} bytes {bytes:?} length {actual} is not equal to expected length {expected}")]
    LengthMismatch {
        what: &'static str,
        bytes: Vec<u8>,
        actual: usize,
        expected: usize,
    },

    /// Anonymous segment allocation failed
    #[error("unable to allocate segment of {capacity} bytes: {source}")]
    Allocation {
        capacity: usize,
        #[source]
        source: TryReserveError,
    },

    /// IO errors when mapping or resizing a backing file
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Backing file could not be created
    #[error("unable to create file {}: {source}", path.display())]
    FileCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Backing file could not be deleted
    #[error("unable to delete file {}: {source}", path.display())]
    FileDelete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The table structure is inconsistent
    #[error("hash table corrupted: {0}")]
    Corrupted(String),
}

pub type Result<T> = std::result::Result<T, OffHeapMapError>;

impl OffHeapMapError {
    pub(crate) fn length_mismatch(what: &'static str, bytes: &[u8], expected: usize) -> Self {
        OffHeapMapError::LengthMismatch {
            what,
            bytes: bytes.to_vec(),
            actual: bytes.len(),
            expected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_mismatch_names_value_and_expected_length() {
        let err = OffHeapMapError::length_mismatch("key", &[1, 2, 3], 5);
        let msg = err.to_string();
        assert!(msg.contains("[1, 2, 3]"), "{msg}");
        assert!(msg.contains("length 3"), "{msg}");
        assert!(msg.contains("expected length 5"), "{msg}");
    }

    #[test]
    fn test_file_delete_mentions_path() {
        let err = OffHeapMapError::FileDelete {
            path: PathBuf::from("/tmp/offheap_map_7.dat"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("/tmp/offheap_map_7.dat"));
    }
}
