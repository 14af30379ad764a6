use std::fmt;
use std::ops::{Deref, DerefMut};

/// A reusable value container that can be overwritten from another instance.
///
/// Every key and value passed to the map is a `Copyable`, so the map can copy
/// data in and out of caller-owned holders without allocating.
pub trait Copyable: Clone {
    fn copy_from(&mut self, from: &Self) {
        self.clone_from(from);
    }
}

macro_rules! copyable_native {
    ($($t:ty),*) => {
        $(
            impl Copyable for $t {
                #[inline]
                fn copy_from(&mut self, from: &Self) {
                    *self = *from;
                }
            }
        )*
    };
}

copyable_native!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

/// Fixed-length byte sequence used as key or value for byte-string codecs.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BytesHolder {
    bytes: Box<[u8]>,
}

impl BytesHolder {
    /// A zeroed holder of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len].into_boxed_slice(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Overwrites the content in place, panics if `bytes` has a different length.
    pub fn set(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.copy_from_slice(bytes);
        self
    }
}

impl Copyable for BytesHolder {
    fn copy_from(&mut self, from: &Self) {
        if self.bytes.len() == from.bytes.len() {
            self.bytes.copy_from_slice(&from.bytes);
        } else {
            self.bytes = from.bytes.clone();
        }
    }
}

impl From<&[u8]> for BytesHolder {
    fn from(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

impl<const N: usize> From<&[u8; N]> for BytesHolder {
    fn from(bytes: &[u8; N]) -> Self {
        Self::from(bytes.as_slice())
    }
}

impl From<Vec<u8>> for BytesHolder {
    fn from(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into_boxed_slice(),
        }
    }
}

impl Deref for BytesHolder {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.bytes
    }
}

impl DerefMut for BytesHolder {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.bytes
    }
}

impl AsRef<[u8]> for BytesHolder {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for BytesHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.bytes) {
            Ok(s) => write!(f, "BytesHolder({s:?})"),
            Err(_) => write!(f, "BytesHolder({:?})", &self.bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_copy_from() {
        let mut a = 1i64;
        a.copy_from(&-9);
        assert_eq!(a, -9);
    }

    #[test]
    fn test_bytes_holder_copy_from_reuses_buffer() {
        let mut a = BytesHolder::new(5);
        let ptr = a.as_bytes().as_ptr();
        a.copy_from(&BytesHolder::from(b"abcde"));
        assert_eq!(a.as_bytes(), b"abcde");
        assert_eq!(a.as_bytes().as_ptr(), ptr);
    }

    #[test]
    fn test_bytes_holder_copy_from_other_length() {
        let mut a = BytesHolder::new(2);
        a.copy_from(&BytesHolder::from(b"xyz"));
        assert_eq!(a.as_bytes(), b"xyz");
    }

    #[test]
    fn test_bytes_holder_set_and_debug() {
        let mut h = BytesHolder::new(3);
        h.set(b"abc");
        assert_eq!(&*h, b"abc");
        assert_eq!(format!("{h:?}"), "BytesHolder(\"abc\")");
        assert_eq!(BytesHolder::new(3), BytesHolder::from(&[0u8, 0, 0]));
    }
}
