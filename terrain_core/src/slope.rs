use rayon::prelude::*;

use crate::config::TerrainScale;
use crate::grid::ElevationGrid;

/// Physical slope (rise over run) per cell.
#[derive(Debug, Clone, PartialEq)]
pub struct SlopeField {
    size: u32,
    values: Vec<f32>,
}

impl SlopeField {
    pub fn from_grid(grid: &ElevationGrid, scale: TerrainScale) -> Self {
        let n = grid.size() as usize;
        let mut values = vec![0.0f32; n * n];
        if n > 0 {
            values.par_chunks_mut(n).enumerate().for_each(|(y, row)| {
                for (x, cell) in row.iter_mut().enumerate() {
                    *cell = slope_at(grid, scale, x as u32, y as u32);
                }
            });
        }
        Self {
            size: grid.size(),
            values,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    #[inline]
    pub fn at(&self, idx: usize) -> f32 {
        self.values[idx]
    }

    /// Fraction of cells with slope strictly below `threshold`.
    pub fn fraction_below(&self, threshold: f32) -> f32 {
        if self.values.is_empty() {
            return 0.0;
        }
        let below = self.values.iter().filter(|&&s| s < threshold).count();
        below as f32 / self.values.len() as f32
    }
}

/// Central differences inside the grid, one-sided at the border.
pub fn slope_at(grid: &ElevationGrid, scale: TerrainScale, x: u32, y: u32) -> f32 {
    let n = grid.size();
    if n < 2 || scale.cell_size_m <= 0.0 {
        return 0.0;
    }
    let (x0, x1) = (x.saturating_sub(1), (x + 1).min(n - 1));
    let (y0, y1) = (y.saturating_sub(1), (y + 1).min(n - 1));
    let run_x = (x1 - x0) as f32 * scale.cell_size_m;
    let run_y = (y1 - y0) as f32 * scale.cell_size_m;
    let dx = (grid.sample(x1, y) - grid.sample(x0, y)) * scale.vertical_scale_m / run_x;
    let dy = (grid.sample(x, y1) - grid.sample(x, y0)) * scale.vertical_scale_m / run_y;
    (dx * dx + dy * dy).sqrt()
}

pub fn buildable_fraction(grid: &ElevationGrid, scale: TerrainScale, threshold: f32) -> f32 {
    SlopeField::from_grid(grid, scale).fraction_below(threshold)
}
