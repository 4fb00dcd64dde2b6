use serde::Serialize;

use crate::config::{DetailConfig, TerrainConfig};
use crate::error::TerrainError;
use crate::grid::ElevationGrid;
use crate::metrics::{StageDetail, StageStats};
use crate::noise::{mix_seed, NoiseLayer};
use crate::pipeline::{Stage, StageContext};
use crate::slope::SlopeField;

const DETAIL_SEED_BASE: u32 = 0xDE7A_0004;

#[derive(Debug, Clone, Serialize)]
pub struct DetailStats {
    /// Cells below `low_slope`; never written.
    pub flat_cells: usize,
    pub textured_cells: usize,
    pub max_abs_delta: f32,
}

/// Fine texture on steep ground only, so flat build sites stay flat.
#[derive(Debug, Clone)]
pub struct DetailInjector {
    seed: u64,
    config: DetailConfig,
}

impl DetailInjector {
    pub const NAME: &'static str = "detail";

    pub fn new(config: &TerrainConfig) -> Self {
        Self {
            seed: config.seed,
            config: config.detail.clone(),
        }
    }

    /// 0 below `low_slope`, linear up to 1 at `high_slope`.
    fn slope_factor(&self, slope: f32) -> f32 {
        let cfg = &self.config;
        if slope < cfg.low_slope {
            return 0.0;
        }
        ((slope - cfg.low_slope) / (cfg.high_slope - cfg.low_slope)).clamp(0.0, 1.0)
    }
}

impl Stage for DetailInjector {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(
        &self,
        mut grid: ElevationGrid,
        ctx: &StageContext<'_>,
    ) -> Result<(ElevationGrid, StageStats), TerrainError> {
        let cfg = &self.config;
        let slopes = SlopeField::from_grid(&grid, ctx.scale);
        let layer = NoiseLayer::with_wavelength(
            cfg.wavelength_cells,
            cfg.octaves,
            mix_seed(DETAIL_SEED_BASE, self.seed, 0),
        );

        let n = grid.size();
        let mut flat_cells = 0usize;
        let mut textured_cells = 0usize;
        let mut max_abs_delta = 0.0f32;
        for y in 0..n {
            for x in 0..n {
                let idx = grid.index(x, y);
                let factor = self.slope_factor(slopes.at(idx));
                if factor <= 0.0 {
                    flat_cells += 1;
                    continue;
                }
                let offset = cfg.amplitude * factor * (2.0 * layer.sample(x as f32, y as f32) - 1.0);
                let cell = &mut grid.values_mut()[idx];
                let before = *cell;
                *cell = (before + offset).clamp(0.0, 1.0);
                max_abs_delta = max_abs_delta.max((*cell - before).abs());
                textured_cells += 1;
            }
        }

        tracing::debug!(
            target: "terrain::detail",
            flat_cells,
            textured_cells,
            max_abs_delta,
            "detail.applied"
        );
        Ok((
            grid,
            StageStats::new(
                Self::NAME,
                StageDetail::Detail(DetailStats {
                    flat_cells,
                    textured_cells,
                    max_abs_delta,
                }),
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TerrainScale;
    use crate::grid::PotentialField;
    use crate::slope::slope_at;

    fn inject(grid: ElevationGrid, scale: TerrainScale) -> (ElevationGrid, DetailStats) {
        let config = TerrainConfig::default().with_size(grid.size());
        let potential = PotentialField::uniform(grid.size(), 0.5);
        let ctx = StageContext::detached(&potential, scale);
        let (out, stats) = DetailInjector::new(&config).run(grid, &ctx).expect("detail");
        match stats.detail {
            StageDetail::Detail(d) => (out, d),
            other => panic!("unexpected detail {other:?}"),
        }
    }

    #[test]
    fn factor_ramps_between_thresholds() {
        let injector = DetailInjector::new(&TerrainConfig::default());
        assert_eq!(injector.slope_factor(0.0), 0.0);
        assert_eq!(injector.slope_factor(0.079), 0.0);
        assert!((injector.slope_factor(0.165) - 0.5).abs() < 1e-5);
        assert_eq!(injector.slope_factor(0.25), 1.0);
        assert_eq!(injector.slope_factor(3.0), 1.0);
    }

    #[test]
    fn gentle_cells_are_untouched() {
        // Left half flat, right half a steep ramp.
        let scale = TerrainScale::new(10.0, 100.0);
        let grid = ElevationGrid::from_fn(32, |x, _| {
            if x < 16 {
                0.2
            } else {
                0.2 + (x - 15) as f32 * 0.03
            }
        });
        let (out, stats) = inject(grid.clone(), scale);
        let mut changed = 0;
        for y in 0..32 {
            for x in 0..32 {
                let before = grid.sample(x, y);
                if slope_at(&grid, scale, x, y) < 0.08 {
                    assert_eq!(out.sample(x, y).to_bits(), before.to_bits());
                } else if out.sample(x, y) != before {
                    changed += 1;
                }
            }
        }
        assert!(changed > 0);
        assert!(stats.max_abs_delta <= 0.004 + 1e-6);
        assert_eq!(stats.flat_cells + stats.textured_cells, 32 * 32);
    }

    #[test]
    fn flat_grid_passes_through() {
        let grid = ElevationGrid::filled(24, 0.5);
        let (out, stats) = inject(grid.clone(), TerrainScale::new(10.0, 100.0));
        assert_eq!(out, grid);
        assert_eq!(stats.textured_cells, 0);
    }
}
