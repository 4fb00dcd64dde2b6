use std::hash::Hasher;

use crate::grid::ElevationGrid;

/// A deterministic FNV-1a 64-bit hasher.
///
/// Digests must be stable across processes and platforms, which rules out the
/// randomized `DefaultHasher`.
#[derive(Debug, Clone)]
pub struct FnvHasher {
    state: u64,
}

impl FnvHasher {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self {
            state: Self::OFFSET_BASIS,
        }
    }
}

impl Default for FnvHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }
}

/// Bit-exact digest of a grid's size and cell values.
pub fn grid_digest(grid: &ElevationGrid) -> u64 {
    f32_digest(grid.size(), grid.values())
}

pub fn f32_digest(size: u32, values: &[f32]) -> u64 {
    let mut hasher = FnvHasher::new();
    hasher.write_u32(size);
    for v in values {
        hasher.write(&v.to_bits().to_le_bytes());
    }
    hasher.finish()
}

pub fn u32_digest(size: u32, values: &[u32]) -> u64 {
    let mut hasher = FnvHasher::new();
    hasher.write_u32(size);
    for v in values {
        hasher.write(&v.to_le_bytes());
    }
    hasher.finish()
}
