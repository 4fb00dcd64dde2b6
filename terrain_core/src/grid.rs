use std::sync::Arc;

use crate::error::TerrainError;

/// Square row-major elevation raster with values normalised to `[0, 1]`.
///
/// Stages take the grid by value and hand back the next version, so only one
/// stage ever owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationGrid {
    size: u32,
    values: Vec<f32>,
}

impl ElevationGrid {
    pub fn new(size: u32, values: Vec<f32>) -> Self {
        debug_assert_eq!(values.len(), (size as usize) * (size as usize));
        Self { size, values }
    }

    pub fn filled(size: u32, value: f32) -> Self {
        let n = size as usize;
        Self::new(size, vec![value; n * n])
    }

    pub fn from_fn(size: u32, mut f: impl FnMut(u32, u32) -> f32) -> Self {
        let mut values = Vec::with_capacity((size as usize) * (size as usize));
        for y in 0..size {
            for x in 0..size {
                values.push(f(x, y));
            }
        }
        Self::new(size, values)
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn index(&self, x: u32, y: u32) -> usize {
        debug_assert!(x < self.size && y < self.size);
        (y * self.size + x) as usize
    }

    #[inline]
    pub fn sample(&self, x: u32, y: u32) -> f32 {
        self.values[self.index(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: f32) {
        let idx = self.index(x, y);
        self.values[idx] = value;
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    /// Sum of all cells, accumulated in `f64`.
    pub fn total(&self) -> f64 {
        self.values.iter().map(|&v| v as f64).sum()
    }

    pub fn min_max(&self) -> (f32, f32) {
        let mut min_v = f32::MAX;
        let mut max_v = f32::MIN;
        for &v in &self.values {
            min_v = min_v.min(v);
            max_v = max_v.max(v);
        }
        (min_v, max_v)
    }

    /// Stage-boundary check: correct shape and every value finite.
    pub fn check_invariants(&self, stage: &'static str) -> Result<(), TerrainError> {
        let expected = (self.size as usize) * (self.size as usize);
        if self.values.len() != expected {
            return Err(TerrainError::InvariantViolation {
                stage,
                detail: format!(
                    "expected {} cells for size {}, found {}",
                    expected,
                    self.size,
                    self.values.len()
                ),
            });
        }
        if let Some(idx) = self.values.iter().position(|v| !v.is_finite()) {
            return Err(TerrainError::InvariantViolation {
                stage,
                detail: format!(
                    "non-finite elevation {} at ({}, {})",
                    self.values[idx],
                    idx as u32 % self.size,
                    idx as u32 / self.size
                ),
            });
        }
        Ok(())
    }
}

/// Continuous "intended buildability" field in `[0, 1]`.
///
/// Immutable once generated; clones share the same buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct PotentialField {
    size: u32,
    values: Arc<Vec<f32>>,
}

impl PotentialField {
    pub fn new(size: u32, values: Vec<f32>) -> Self {
        debug_assert_eq!(values.len(), (size as usize) * (size as usize));
        Self {
            size,
            values: Arc::new(values),
        }
    }

    pub fn uniform(size: u32, value: f32) -> Self {
        let n = size as usize;
        Self::new(size, vec![value; n * n])
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn sample(&self, x: u32, y: u32) -> f32 {
        debug_assert!(x < self.size && y < self.size);
        self.values[(y * self.size + x) as usize]
    }

    #[inline]
    pub fn at(&self, idx: usize) -> f32 {
        self.values[idx]
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Fraction of cells strictly above `threshold`.
    pub fn coverage_above(&self, threshold: f32) -> f32 {
        if self.values.is_empty() {
            return 0.0;
        }
        let above = self.values.iter().filter(|&&v| v > threshold).count();
        above as f32 / self.values.len() as f32
    }
}

/// Offsets of the 8-neighbourhood in D8 code order: E, NE, N, NW, W, SW, S, SE.
pub fn neighbor_dirs() -> &'static [(i32, i32)] {
    &[
        (1, 0),
        (1, -1),
        (0, -1),
        (-1, -1),
        (-1, 0),
        (-1, 1),
        (0, 1),
        (1, 1),
    ]
}

/// Nearest-rank quantile of an ascending slice.
pub(crate) fn quantile<T: Copy>(sorted: &[T], q: f32) -> Option<T> {
    if sorted.is_empty() {
        return None;
    }
    let idx = ((sorted.len() - 1) as f32 * q.clamp(0.0, 1.0)).round() as usize;
    Some(sorted[idx])
}

/// Min-max rescale into `[0, 1]`; a constant field maps to zero.
pub(crate) fn normalise_in_place(values: &mut [f32]) -> (f32, f32) {
    let mut min_v = f32::MAX;
    let mut max_v = f32::MIN;
    for &v in values.iter() {
        min_v = min_v.min(v);
        max_v = max_v.max(v);
    }
    let scale = if (max_v - min_v).abs() < f32::EPSILON {
        0.0
    } else {
        1.0 / (max_v - min_v)
    };
    for v in values.iter_mut() {
        *v = ((*v - min_v) * scale).clamp(0.0, 1.0);
    }
    (min_v, max_v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_fn_is_row_major() {
        let grid = ElevationGrid::from_fn(3, |x, y| (y * 10 + x) as f32);
        assert_eq!(grid.values()[5], 12.0);
        assert_eq!(grid.sample(2, 1), 12.0);
        assert_eq!(grid.index(2, 1), 5);
    }

    #[test]
    fn invariant_check_reports_non_finite_cell() {
        let mut grid = ElevationGrid::filled(4, 0.5);
        assert!(grid.check_invariants("test").is_ok());
        grid.set(1, 2, f32::NAN);
        let err = grid.check_invariants("test").unwrap_err();
        match err {
            TerrainError::InvariantViolation { stage, detail } => {
                assert_eq!(stage, "test");
                assert!(detail.contains("(1, 2)"), "{detail}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn potential_clones_share_buffer() {
        let field = PotentialField::new(2, vec![0.1, 0.6, 0.7, 0.2]);
        let clone = field.clone();
        assert!(std::ptr::eq(field.values(), clone.values()));
        assert_eq!(field.coverage_above(0.5), 0.5);
    }

    #[test]
    fn normalise_handles_constant_field() {
        let mut values = vec![0.25; 9];
        normalise_in_place(&mut values);
        assert!(values.iter().all(|&v| v == 0.0));

        let mut ramp = vec![2.0, 4.0, 6.0];
        assert_eq!(normalise_in_place(&mut ramp), (2.0, 6.0));
        assert_eq!(ramp, vec![0.0, 0.5, 1.0]);
        assert_eq!(quantile(&ramp, 0.5), Some(0.5));
        assert_eq!(quantile::<f32>(&[], 0.5), None);
    }
}
