use serde::Serialize;

use crate::config::{RidgeConfig, TerrainConfig};
use crate::error::TerrainError;
use crate::grid::ElevationGrid;
use crate::metrics::{StageDetail, StageStats};
use crate::noise::{mix_seed, NoiseLayer};
use crate::pipeline::{Stage, StageContext};

const RIDGE_SEED_BASE: u32 = 0x21D6_0003;

#[derive(Debug, Clone, Serialize)]
pub struct RidgeStats {
    /// Cells with potential under the ridge threshold.
    pub ridge_zone_cells: usize,
    /// Cells that received any ridge contribution.
    pub blended_cells: usize,
    pub mean_added: f32,
}

/// Sharpens low-potential country with folded ("ridged") noise so high ground
/// forms connected crests instead of isolated bumps.
#[derive(Debug, Clone)]
pub struct RidgeEnhancer {
    size: u32,
    seed: u64,
    config: RidgeConfig,
}

impl RidgeEnhancer {
    pub const NAME: &'static str = "ridge";

    pub fn new(config: &TerrainConfig) -> Self {
        Self {
            size: config.size,
            seed: config.seed,
            config: config.ridge.clone(),
        }
    }

    /// Cross-fade weight: 1 below `fade_start`, 0 from `fade_end` up.
    fn weight(&self, potential: f32) -> f32 {
        let cfg = &self.config;
        let t = ((potential - cfg.fade_start) / (cfg.fade_end - cfg.fade_start)).clamp(0.0, 1.0);
        1.0 - t * t * (3.0 - 2.0 * t)
    }
}

/// Folded noise: 0 at the extremes, 1 where `v` crosses 0.5.
#[inline]
fn ridge(v: f32) -> f32 {
    2.0 * (0.5 - (0.5 - v).abs())
}

impl Stage for RidgeEnhancer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(
        &self,
        mut grid: ElevationGrid,
        ctx: &StageContext<'_>,
    ) -> Result<(ElevationGrid, StageStats), TerrainError> {
        let cfg = &self.config;
        let layer = NoiseLayer::with_wavelength(
            cfg.wavelength_fraction * self.size as f32,
            cfg.octaves,
            mix_seed(RIDGE_SEED_BASE, self.seed, 0),
        );

        let n = grid.size();
        let mut ridge_zone_cells = 0usize;
        let mut blended_cells = 0usize;
        let mut added = 0.0f64;
        for y in 0..n {
            for x in 0..n {
                let idx = grid.index(x, y);
                let p = ctx.potential.at(idx);
                if p < cfg.threshold {
                    ridge_zone_cells += 1;
                }
                if p >= cfg.fade_end {
                    continue;
                }
                let w = self.weight(p);
                if w <= 0.0 {
                    continue;
                }
                let contribution = cfg.strength * w * ridge(layer.sample(x as f32, y as f32));
                let cell = &mut grid.values_mut()[idx];
                let before = *cell;
                *cell = (before + contribution).clamp(0.0, 1.0);
                added += (*cell - before) as f64;
                blended_cells += 1;
            }
        }

        let mean_added = if blended_cells > 0 {
            (added / blended_cells as f64) as f32
        } else {
            0.0
        };
        tracing::debug!(
            target: "terrain::ridge",
            ridge_zone_cells,
            blended_cells,
            mean_added,
            "ridge.applied"
        );
        Ok((
            grid,
            StageStats::new(
                Self::NAME,
                StageDetail::Ridge(RidgeStats {
                    ridge_zone_cells,
                    blended_cells,
                    mean_added,
                }),
            ),
        ))
    }
}
