use serde::Serialize;

use crate::config::{PotentialConfig, TerrainConfig};
use crate::error::TerrainError;
use crate::grid::{normalise_in_place, quantile, PotentialField};
use crate::noise::{mix_seed, NoiseLayer};

const POTENTIAL_SEED_BASE: u32 = 0x5071_0001;
const QUANTILE_EPSILON: f32 = 1e-4;

#[derive(Debug, Clone, Serialize)]
pub struct PotentialStats {
    pub exponent: f32,
    /// Exponent before clamping into the configured range.
    pub raw_exponent: f32,
    pub exponent_clamped: bool,
    pub quantile: f32,
    pub target_coverage: f32,
    pub achieved_coverage: f32,
}

/// Builds the continuous buildability field: low-frequency fBm, min-max
/// normalised, then bent by `p = v^γ` so the share of cells above 0.5
/// matches the configured coverage.
#[derive(Debug, Clone)]
pub struct PotentialGenerator {
    size: u32,
    seed: u64,
    config: PotentialConfig,
}

impl PotentialGenerator {
    pub fn new(config: &TerrainConfig) -> Self {
        Self {
            size: config.size,
            seed: config.seed,
            config: config.potential.clone(),
        }
    }

    pub fn generate(&self) -> Result<(PotentialField, PotentialStats), TerrainError> {
        let cfg = &self.config;
        if self.size == 0 {
            return Err(TerrainError::invalid("size", "grid size must be positive"));
        }
        if !(cfg.target_coverage > 0.0 && cfg.target_coverage < 1.0) {
            return Err(TerrainError::invalid(
                "potential.target_coverage",
                format!("{} is outside (0, 1)", cfg.target_coverage),
            ));
        }

        let wavelength = cfg.wavelength_fraction * self.size as f32;
        let layer = NoiseLayer::with_wavelength(
            wavelength,
            cfg.octaves,
            mix_seed(POTENTIAL_SEED_BASE, self.seed, 0),
        );
        let mut values = layer.raster(self.size);
        normalise_in_place(&mut values);

        let mut sorted = values.clone();
        sorted.sort_by(f32::total_cmp);
        let q = quantile(&sorted, 1.0 - cfg.target_coverage)
            .unwrap_or(0.5)
            .clamp(QUANTILE_EPSILON, 1.0 - QUANTILE_EPSILON);

        let raw_exponent = 0.5f32.ln() / q.ln();
        let exponent = raw_exponent.clamp(cfg.exponent_min, cfg.exponent_max);
        let exponent_clamped = exponent != raw_exponent;
        if exponent_clamped {
            tracing::warn!(
                target: "terrain::potential",
                raw_exponent,
                exponent,
                min = cfg.exponent_min,
                max = cfg.exponent_max,
                "potential.exponent_clamped"
            );
        }

        for v in &mut values {
            *v = v.powf(exponent).clamp(0.0, 1.0);
        }
        let field = PotentialField::new(self.size, values);
        let achieved_coverage = field.coverage_above(0.5);
        tracing::info!(
            target: "terrain::potential",
            exponent,
            quantile = q,
            target = cfg.target_coverage,
            achieved = achieved_coverage,
            "potential.generated"
        );

        Ok((
            field,
            PotentialStats {
                exponent,
                raw_exponent,
                exponent_clamped,
                quantile: q,
                target_coverage: cfg.target_coverage,
                achieved_coverage,
            },
        ))
    }
}
