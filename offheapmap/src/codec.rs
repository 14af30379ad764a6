use std::fmt::Debug;
use std::marker::PhantomData;
use std::mem::size_of;

use bytemuck::{Pod, Zeroable, pod_read_unaligned};

use crate::error::{OffHeapMapError, Result};
use crate::holder::{BytesHolder, Copyable};
use crate::utils::{phi_mix, phi_mix64};

/// Binary layout, hashing and comparison for one key/value shape.
///
/// A codec works on slots: byte slices exactly [`entry_width`](EntryCodec::entry_width)
/// long, with the key encoded at offset 0 and the value right after it.
/// A slot whose key bytes are all zero is empty, so the all-zero key (the
/// "free key") can never live in a slot and the map keeps it on the side.
pub trait EntryCodec {
    type Key: Copyable + Debug;
    type Value: Copyable + Debug;

    /// Bytes per entry.
    fn entry_width(&self) -> usize;

    /// A fresh key holder, used by the map for its private scratch keys.
    fn new_key(&self) -> Self::Key;

    /// A fresh value holder, used by the map for its private scratch values.
    fn new_value(&self) -> Self::Value;

    /// Rejects a key holder whose layout disagrees with the codec.
    fn check_key(&self, _key: &Self::Key) -> Result<()> {
        Ok(())
    }

    /// Rejects a value holder whose layout disagrees with the codec.
    fn check_value(&self, _value: &Self::Value) -> Result<()> {
        Ok(())
    }

    fn is_free_key(&self, key: &Self::Key) -> bool;

    fn read_key(&self, slot: &[u8], out: &mut Self::Key);

    fn read_value(&self, slot: &[u8], out: &mut Self::Value);

    /// Encodes both fields; the key goes in last.
    fn write(&self, slot: &mut [u8], key: &Self::Key, value: &Self::Value);

    fn hash(&self, key: &Self::Key) -> u32;

    fn is_empty(&self, slot: &[u8]) -> bool;

    fn clear(&self, slot: &mut [u8]) {
        slot.fill(0);
    }

    fn equals_key(&self, slot: &[u8], key: &Self::Key) -> bool;

    fn copy(&self, from: &[u8], to: &mut [u8]) {
        to.copy_from_slice(from);
    }
}

/// Integer types usable as fixed-width keys.
pub trait NativeKey: Pod + Copyable + PartialEq + Debug {
    fn mix(self) -> u32;
}

impl NativeKey for i16 {
    #[inline]
    fn mix(self) -> u32 {
        phi_mix(self as i32)
    }
}

impl NativeKey for u16 {
    #[inline]
    fn mix(self) -> u32 {
        phi_mix(self as i32)
    }
}

impl NativeKey for i32 {
    #[inline]
    fn mix(self) -> u32 {
        phi_mix(self)
    }
}

impl NativeKey for u32 {
    #[inline]
    fn mix(self) -> u32 {
        phi_mix(self as i32)
    }
}

impl NativeKey for i64 {
    #[inline]
    fn mix(self) -> u32 {
        phi_mix64(self)
    }
}

impl NativeKey for u64 {
    #[inline]
    fn mix(self) -> u32 {
        phi_mix64(self as i64)
    }
}

/// Codec for plain integer keys and `Pod` values stored in native byte order.
pub struct Native<K, V = K>(PhantomData<(K, V)>);

pub type ShortShortCodec = Native<i16>;
pub type IntIntCodec = Native<i32>;
pub type LongLongCodec = Native<i64>;

impl<K, V> Native<K, V> {
    const KEY_LEN: usize = size_of::<K>();
    const WIDTH: usize = size_of::<K>() + size_of::<V>();

    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<K, V> Default for Native<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for Native<K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V> Copy for Native<K, V> {}

impl<K, V> Debug for Native<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Native<{}, {}>",
            std::any::type_name::<K>(),
            std::any::type_name::<V>()
        )
    }
}

impl<K, V> EntryCodec for Native<K, V>
where
    K: NativeKey,
    V: Pod + Copyable + Debug,
{
    type Key = K;
    type Value = V;

    #[inline]
    fn entry_width(&self) -> usize {
        Self::WIDTH
    }

    fn new_key(&self) -> K {
        K::zeroed()
    }

    fn new_value(&self) -> V {
        V::zeroed()
    }

    #[inline]
    fn is_free_key(&self, key: &K) -> bool {
        *key == K::zeroed()
    }

    #[inline]
    fn read_key(&self, slot: &[u8], out: &mut K) {
        *out = pod_read_unaligned(&slot[..Self::KEY_LEN]);
    }

    #[inline]
    fn read_value(&self, slot: &[u8], out: &mut V) {
        *out = pod_read_unaligned(&slot[Self::KEY_LEN..Self::WIDTH]);
    }

    #[inline]
    fn write(&self, slot: &mut [u8], key: &K, value: &V) {
        slot[Self::KEY_LEN..Self::WIDTH].copy_from_slice(bytemuck::bytes_of(value));
        slot[..Self::KEY_LEN].copy_from_slice(bytemuck::bytes_of(key));
    }

    #[inline]
    fn hash(&self, key: &K) -> u32 {
        key.mix()
    }

    #[inline]
    fn is_empty(&self, slot: &[u8]) -> bool {
        pod_read_unaligned::<K>(&slot[..Self::KEY_LEN]) == K::zeroed()
    }

    #[inline]
    fn equals_key(&self, slot: &[u8], key: &K) -> bool {
        pod_read_unaligned::<K>(&slot[..Self::KEY_LEN]) == *key
    }
}

/// Codec for fixed-length byte-string keys and values, key first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBytes {
    key_len: usize,
    value_len: usize,
}

impl FixedBytes {
    pub fn new(key_len: usize, value_len: usize) -> Self {
        Self { key_len, value_len }
    }

    fn value_range(&self) -> std::ops::Range<usize> {
        self.key_len..self.key_len + self.value_len
    }
}

/// Scans eight bytes at a time, then the tail, stopping at the first non-zero.
fn all_zero(bytes: &[u8]) -> bool {
    let mut words = bytes.chunks_exact(8);
    for word in &mut words {
        if pod_read_unaligned::<u64>(word) != 0 {
            return false;
        }
    }
    words.remainder().iter().all(|b| *b == 0)
}

/// Base-31 polynomial over native-order 8-byte words, then signed tail bytes.
fn rolling_hash(bytes: &[u8]) -> u32 {
    let mut hash: i64 = 0;
    let mut words = bytes.chunks_exact(8);
    for word in &mut words {
        hash = hash
            .wrapping_mul(31)
            .wrapping_add(pod_read_unaligned::<i64>(word));
    }
    for b in words.remainder() {
        hash = hash.wrapping_mul(31).wrapping_add(*b as i8 as i64);
    }
    hash as u32
}

impl EntryCodec for FixedBytes {
    type Key = BytesHolder;
    type Value = BytesHolder;

    fn entry_width(&self) -> usize {
        self.key_len + self.value_len
    }

    fn new_key(&self) -> BytesHolder {
        BytesHolder::new(self.key_len)
    }

    fn new_value(&self) -> BytesHolder {
        BytesHolder::new(self.value_len)
    }

    fn check_key(&self, key: &BytesHolder) -> Result<()> {
        if key.len() != self.key_len {
            return Err(OffHeapMapError::length_mismatch("key", key, self.key_len));
        }
        Ok(())
    }

    fn check_value(&self, value: &BytesHolder) -> Result<()> {
        if value.len() != self.value_len {
            return Err(OffHeapMapError::length_mismatch(
                "value",
                value,
                self.value_len,
            ));
        }
        Ok(())
    }

    fn is_free_key(&self, key: &BytesHolder) -> bool {
        all_zero(key)
    }

    fn read_key(&self, slot: &[u8], out: &mut BytesHolder) {
        out.copy_from_slice(&slot[..self.key_len]);
    }

    fn read_value(&self, slot: &[u8], out: &mut BytesHolder) {
        out.copy_from_slice(&slot[self.value_range()]);
    }

    fn write(&self, slot: &mut [u8], key: &BytesHolder, value: &BytesHolder) {
        slot[self.value_range()].copy_from_slice(value);
        slot[..self.key_len].copy_from_slice(key);
    }

    fn hash(&self, key: &BytesHolder) -> u32 {
        rolling_hash(key)
    }

    fn is_empty(&self, slot: &[u8]) -> bool {
        all_zero(&slot[..self.key_len])
    }

    fn equals_key(&self, slot: &[u8], key: &BytesHolder) -> bool {
        slot[..self.key_len] == **key
    }
}
