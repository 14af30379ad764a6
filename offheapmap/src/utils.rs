use crate::error::{OffHeapMapError, Result};

/// Upper bound on the number of slots in one table. Hashes are 32 bits wide,
/// so slots past this could never be a probe's starting point.
pub const MAX_TABLE_SIZE: usize = 1 << 31;

/// Smallest table the map will build.
pub const MIN_TABLE_SIZE: usize = 2;

const PHI: i32 = 0x9E37_79B9_u32 as i32;

/// Golden-ratio multiplicative mix (fastutil's `phiMix`).
#[inline]
pub fn phi_mix(x: i32) -> u32 {
    let h = x.wrapping_mul(PHI);
    (h ^ (h >> 16)) as u32
}

/// 64-bit variant of [`phi_mix`]; the high half is folded in before truncating.
#[inline]
pub fn phi_mix64(x: i64) -> u32 {
    let h = x.wrapping_mul(PHI as i64);
    let h = h ^ (h >> 32);
    (h ^ (h >> 16)) as u32
}

/// Least power of two greater than or equal to `ceil(expected / load_factor)`, at least 2.
pub fn table_size_for(expected: usize, load_factor: f32) -> Result<usize> {
    let desired = (expected as f64 / load_factor as f64).ceil();
    if !desired.is_finite() || desired > MAX_TABLE_SIZE as f64 {
        return Err(OffHeapMapError::TableTooLarge {
            expected,
            load_factor,
        });
    }
    let desired = desired as usize;
    if desired <= MIN_TABLE_SIZE {
        return Ok(MIN_TABLE_SIZE);
    }
    Ok(desired.next_power_of_two())
}

/// Number of live entries a table of `table_size` slots holds before it must grow.
#[inline]
pub fn threshold_for(table_size: usize, load_factor: f32) -> usize {
    ((table_size as f64 * load_factor as f64) as usize).max(1)
}
