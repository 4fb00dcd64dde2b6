use bitflags::bitflags;
use serde::Serialize;

use crate::config::{TerrainConfig, TerrainScale, VerifierConfig};
use crate::error::TerrainError;
use crate::grid::ElevationGrid;
use crate::metrics::{StageDetail, StageStats};
use crate::pipeline::{Stage, StageContext};
use crate::slope::SlopeField;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
    pub struct CellClass: u8 {
        const BUILDABLE = 0b0001;
        const NEAR_BUILDABLE = 0b0010;
        const SMOOTHED = 0b0100;
    }
}

/// Per-cell classification as seen by the verifier before any correction,
/// with `SMOOTHED` marking cells it actually changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationRaster {
    size: u32,
    cells: Vec<CellClass>,
}

impl ClassificationRaster {
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn cells(&self) -> &[CellClass] {
        &self.cells
    }

    pub fn at(&self, x: u32, y: u32) -> CellClass {
        self.cells[(y * self.size + x) as usize]
    }

    pub fn count(&self, class: CellClass) -> usize {
        self.cells.iter().filter(|c| c.contains(class)).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub excess_fraction: f32,
    /// Multiplier for `synthesis.base_amplitude` that should bring the
    /// buildable fraction back under the ceiling.
    pub suggested_amplitude_scale: f32,
    pub advice: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnreachableDiagnostics {
    pub achieved_fraction: f32,
    pub target_min: f32,
    pub near_buildable_cells: usize,
    pub passes: u32,
    pub stalled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerificationOutcome {
    WithinTarget,
    Corrected { passes: u32 },
    ConstraintUnreachable(UnreachableDiagnostics),
    AboveTarget(Recommendation),
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub initial_fraction: f32,
    pub final_fraction: f32,
    pub target_min: f32,
    pub target_max: f32,
    pub adjustments_applied: bool,
    pub passes: u32,
    /// Buildable fraction after each smoothing pass.
    pub history: Vec<f32>,
    pub near_buildable_cells: usize,
    pub smoothed_cells: usize,
    pub outcome: VerificationOutcome,
    #[serde(skip)]
    pub classification: ClassificationRaster,
}

/// Measures the buildable fraction and nudges near-buildable cells flatter
/// when it falls short.
#[derive(Debug, Clone)]
pub struct ConstraintVerifier {
    config: VerifierConfig,
}

impl ConstraintVerifier {
    pub const NAME: &'static str = "verify";

    pub fn new(config: &TerrainConfig) -> Self {
        Self {
            config: config.verifier.clone(),
        }
    }

    pub fn verify(
        &self,
        mut grid: ElevationGrid,
        scale: TerrainScale,
    ) -> (ElevationGrid, VerificationReport) {
        let cfg = &self.config;
        let slopes = SlopeField::from_grid(&grid, scale);
        let mut cells: Vec<CellClass> = slopes
            .values()
            .iter()
            .map(|&s| {
                if s < cfg.buildable_slope {
                    CellClass::BUILDABLE
                } else if s < cfg.near_buildable_ceiling {
                    CellClass::NEAR_BUILDABLE
                } else {
                    CellClass::empty()
                }
            })
            .collect();
        let near: Vec<usize> = cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.contains(CellClass::NEAR_BUILDABLE))
            .map(|(idx, _)| idx)
            .collect();

        let initial = slopes.fraction_below(cfg.buildable_slope);
        let mut fraction = initial;
        let mut history = Vec::new();
        let mut passes = 0u32;
        let mut stalled = false;

        let outcome = if initial > cfg.max_fraction {
            let recommendation = self.recommend(initial);
            tracing::warn!(
                target: "terrain::verify",
                fraction = initial,
                max = cfg.max_fraction,
                suggested_amplitude_scale = recommendation.suggested_amplitude_scale,
                "verify.above_target"
            );
            VerificationOutcome::AboveTarget(recommendation)
        } else if initial >= cfg.min_fraction {
            VerificationOutcome::WithinTarget
        } else {
            while passes < cfg.max_passes && fraction < cfg.min_fraction {
                smooth_subset(&mut grid, &near, cfg, &mut cells);
                passes += 1;
                let next = SlopeField::from_grid(&grid, scale).fraction_below(cfg.buildable_slope);
                history.push(next);
                tracing::debug!(
                    target: "terrain::verify",
                    pass = passes,
                    fraction = next,
                    "verify.smoothing_pass"
                );
                let improvement = next - fraction;
                fraction = next;
                if improvement < cfg.convergence_epsilon {
                    stalled = true;
                    break;
                }
            }
            if fraction >= cfg.min_fraction {
                VerificationOutcome::Corrected { passes }
            } else {
                tracing::warn!(
                    target: "terrain::verify",
                    fraction,
                    min = cfg.min_fraction,
                    passes,
                    stalled,
                    "verify.constraint_unreachable"
                );
                VerificationOutcome::ConstraintUnreachable(UnreachableDiagnostics {
                    achieved_fraction: fraction,
                    target_min: cfg.min_fraction,
                    near_buildable_cells: near.len(),
                    passes,
                    stalled,
                })
            }
        };

        let classification = ClassificationRaster {
            size: grid.size(),
            cells,
        };
        let smoothed_cells = classification.count(CellClass::SMOOTHED);
        tracing::info!(
            target: "terrain::verify",
            initial_fraction = initial,
            final_fraction = fraction,
            passes,
            smoothed_cells,
            "verify.completed"
        );
        let report = VerificationReport {
            initial_fraction: initial,
            final_fraction: fraction,
            target_min: cfg.min_fraction,
            target_max: cfg.max_fraction,
            adjustments_applied: smoothed_cells > 0,
            passes,
            history,
            near_buildable_cells: near.len(),
            smoothed_cells,
            outcome,
            classification,
        };
        (grid, report)
    }

    fn recommend(&self, fraction: f32) -> Recommendation {
        let cfg = &self.config;
        let excess_fraction = fraction - cfg.max_fraction;
        // Slope scales linearly with relief.
        let suggested_amplitude_scale = (fraction / cfg.max_fraction.max(f32::EPSILON)).max(1.0);
        Recommendation {
            excess_fraction,
            suggested_amplitude_scale,
            advice: format!(
                "{:.1}% of cells are buildable, above the {:.1}% ceiling; raise synthesis.base_amplitude by about {:.2}x or lower potential.target_coverage",
                fraction * 100.0,
                cfg.max_fraction * 100.0,
                suggested_amplitude_scale
            ),
        }
    }
}

/// σ = 1 Gaussian, 3×3.
const GAUSS: [[f32; 3]; 3] = [
    [0.367_879_4, 0.606_530_66, 0.367_879_4],
    [0.606_530_66, 1.0, 0.606_530_66],
    [0.367_879_4, 0.606_530_66, 0.367_879_4],
];

/// One Jacobi pass over `subset`, reading from a snapshot of the grid.
fn smooth_subset(
    grid: &mut ElevationGrid,
    subset: &[usize],
    cfg: &VerifierConfig,
    classes: &mut [CellClass],
) {
    let n = grid.size() as i32;
    let snapshot = grid.values().to_vec();
    for &idx in subset {
        let x = idx as i32 % n;
        let y = idx as i32 / n;
        let mut sum = 0.0f32;
        let mut weight = 0.0f32;
        for (ky, row) in GAUSS.iter().enumerate() {
            for (kx, &w) in row.iter().enumerate() {
                let sx = x + kx as i32 - 1;
                let sy = y + ky as i32 - 1;
                if sx < 0 || sy < 0 || sx >= n || sy >= n {
                    continue;
                }
                sum += w * snapshot[(sy * n + sx) as usize];
                weight += w;
            }
        }
        let old = snapshot[idx];
        let delta = (cfg.smoothing_strength * (sum / weight - old)).clamp(-cfg.max_delta, cfg.max_delta);
        let new = (old + delta).clamp(0.0, 1.0);
        if new.to_bits() != old.to_bits() {
            grid.values_mut()[idx] = new;
            classes[idx].insert(CellClass::SMOOTHED);
        }
    }
}

impl Stage for ConstraintVerifier {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(
        &self,
        grid: ElevationGrid,
        ctx: &StageContext<'_>,
    ) -> Result<(ElevationGrid, StageStats), TerrainError> {
        let (grid, report) = self.verify(grid, ctx.scale);
        Ok((
            grid,
            StageStats::new(Self::NAME, StageDetail::Verification(report)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale() -> TerrainScale {
        TerrainScale::new(10.0, 100.0)
    }

    /// Left `flat` columns level, the rest a ramp of `rise` per cell.
    fn split_grid(size: u32, flat: u32, rise: f32) -> ElevationGrid {
        ElevationGrid::from_fn(size, |x, _| {
            if x < flat {
                0.3
            } else {
                0.3 + (x - flat + 1) as f32 * rise
            }
        })
    }

    fn verifier(min: f32, max: f32) -> ConstraintVerifier {
        let mut config = TerrainConfig::default();
        config.verifier.min_fraction = min;
        config.verifier.max_fraction = max;
        ConstraintVerifier::new(&config)
    }

    #[test]
    fn within_target_is_untouched() {
        // 0.01 per cell = 0.1 slope on the ramp, flat cells buildable.
        let grid = split_grid(40, 24, 0.01);
        let (out, report) = verifier(0.55, 0.65).verify(grid.clone(), scale());
        assert_eq!(out, grid);
        assert!(!report.adjustments_applied);
        assert_eq!(report.outcome, VerificationOutcome::WithinTarget);
        assert_eq!(report.initial_fraction, report.final_fraction);
        assert!((0.55..=0.65).contains(&report.initial_fraction));
    }

    #[test]
    fn above_target_recommends_more_relief() {
        let grid = ElevationGrid::filled(16, 0.5);
        let (out, report) = verifier(0.4, 0.85).verify(grid.clone(), scale());
        assert_eq!(out, grid);
        assert!(!report.adjustments_applied);
        match report.outcome {
            VerificationOutcome::AboveTarget(rec) => {
                assert!((rec.excess_fraction - 0.15).abs() < 1e-6);
                assert!(rec.suggested_amplitude_scale > 1.0);
                assert!(rec.advice.contains("base_amplitude"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn smoothing_touches_only_near_buildable_cells() {
        // Ramp slope 0.07 sits in the near-buildable band.
        let grid = split_grid(40, 8, 0.007);
        let v = verifier(0.95, 1.0);
        let slopes = SlopeField::from_grid(&grid, scale());
        let (out, report) = v.verify(grid.clone(), scale());
        assert!(report.passes >= 1 && report.passes <= 3);
        assert_eq!(report.history.len(), report.passes as usize);
        for idx in 0..grid.len() {
            let s = slopes.at(idx);
            let near = (0.05..0.10).contains(&s);
            let delta = (out.values()[idx] - grid.values()[idx]).abs();
            if !near {
                assert_eq!(delta, 0.0, "cell {idx} slope {s}");
            }
            assert!(delta <= 0.002 * report.passes as f32 + 1e-6);
            let class = report.classification.cells()[idx];
            assert_eq!(class.contains(CellClass::NEAR_BUILDABLE), near);
            if class.contains(CellClass::SMOOTHED) {
                assert!(near);
            }
        }
    }

    #[test]
    fn steep_terrain_is_reported_unreachable() {
        // Nothing is near-buildable, so smoothing cannot help.
        let grid = split_grid(32, 4, 0.05);
        let (out, report) = verifier(0.9, 1.0).verify(grid.clone(), scale());
        assert_eq!(out, grid);
        assert!(!report.adjustments_applied);
        match report.outcome {
            VerificationOutcome::ConstraintUnreachable(diag) => {
                assert!(diag.stalled);
                assert_eq!(diag.near_buildable_cells, 0);
                assert!(diag.achieved_fraction < 0.9);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn class_flags_serialize() {
        let json = serde_json::to_string(&(CellClass::BUILDABLE | CellClass::SMOOTHED))
            .expect("serialize");
        assert_eq!(json, r#""BUILDABLE | SMOOTHED""#);
    }
}
