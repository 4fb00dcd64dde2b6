use rayon::prelude::*;
use serde::Serialize;

use crate::config::{NormalizationPolicy, SynthesisConfig, TerrainConfig};
use crate::error::TerrainError;
use crate::grid::{normalise_in_place, ElevationGrid, PotentialField};
use crate::metrics::{StageDetail, StageStats};
use crate::noise::{mix_seed, NoiseLayer};
use crate::pipeline::{Stage, StageContext};

const SYNTHESIS_SEED_BASE: u32 = 0x5EED_0002;

#[derive(Debug, Clone, Serialize)]
pub struct SynthesisStats {
    pub requested_policy: NormalizationPolicy,
    /// `Clip` or `Rescale`; what actually ran.
    pub applied_policy: NormalizationPolicy,
    pub raw_min: f32,
    pub raw_max: f32,
    pub clipped_fraction: f32,
}

/// Base terrain: one fBm field everywhere, with only its amplitude shaped by
/// the potential field. Low potential gets the full relief, high potential is
/// flattened towards 0.5.
#[derive(Debug, Clone)]
pub struct ZoneSynthesizer {
    size: u32,
    seed: u64,
    config: SynthesisConfig,
}

impl ZoneSynthesizer {
    pub const NAME: &'static str = "synthesis";

    pub fn new(config: &TerrainConfig) -> Self {
        Self {
            size: config.size,
            seed: config.seed,
            config: config.synthesis.clone(),
        }
    }

    fn layer(&self) -> NoiseLayer {
        let cfg = &self.config;
        NoiseLayer::with_wavelength(
            cfg.wavelength_fraction * self.size as f32,
            cfg.octaves,
            mix_seed(SYNTHESIS_SEED_BASE, self.seed, 0),
        )
        .lacunarity(cfg.lacunarity)
        .gain(cfg.gain)
    }

    #[inline]
    fn amplitude(&self, potential: f32) -> f32 {
        let cfg = &self.config;
        cfg.base_amplitude * (cfg.min_mult + (cfg.max_mult - cfg.min_mult) * (1.0 - potential))
    }

    /// Unnormalised elevations, row-parallel.
    fn raw_values(&self, potential: &PotentialField, mut values: Vec<f32>) -> Vec<f32> {
        let n = self.size as usize;
        values.resize(n * n, 0.0);
        let layer = self.layer();
        values
            .par_chunks_mut(n)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, cell) in row.iter_mut().enumerate() {
                    let fbm = layer.sample(x as f32, y as f32);
                    let amplitude = self.amplitude(potential.at(y * n + x));
                    *cell = 0.5 + 0.5 * amplitude * (2.0 * fbm - 1.0);
                }
            });
        values
    }

    fn normalise(&self, values: &mut [f32]) -> SynthesisStats {
        let mut raw_min = f32::MAX;
        let mut raw_max = f32::MIN;
        let mut outside = 0usize;
        for &v in values.iter() {
            raw_min = raw_min.min(v);
            raw_max = raw_max.max(v);
            if !(0.0..=1.0).contains(&v) {
                outside += 1;
            }
        }
        let clipped_fraction = if values.is_empty() {
            0.0
        } else {
            outside as f32 / values.len() as f32
        };

        let requested = self.config.normalization;
        let applied = match requested {
            NormalizationPolicy::Auto if clipped_fraction <= self.config.max_clipped_fraction => {
                NormalizationPolicy::Clip
            }
            NormalizationPolicy::Auto => NormalizationPolicy::Rescale,
            other => other,
        };
        match applied {
            NormalizationPolicy::Rescale => {
                normalise_in_place(values);
            }
            _ => {
                for v in values.iter_mut() {
                    *v = v.clamp(0.0, 1.0);
                }
            }
        }

        tracing::info!(
            target: "terrain::synthesis",
            requested = ?requested,
            applied = ?applied,
            raw_min,
            raw_max,
            clipped_fraction,
            "synthesis.normalization"
        );
        SynthesisStats {
            requested_policy: requested,
            applied_policy: applied,
            raw_min,
            raw_max,
            clipped_fraction,
        }
    }
}

impl Stage for ZoneSynthesizer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(
        &self,
        grid: ElevationGrid,
        ctx: &StageContext<'_>,
    ) -> Result<(ElevationGrid, StageStats), TerrainError> {
        if ctx.potential.size() != self.size {
            return Err(TerrainError::InvariantViolation {
                stage: Self::NAME,
                detail: format!(
                    "potential field is {} cells wide, expected {}",
                    ctx.potential.size(),
                    self.size
                ),
            });
        }
        let mut values = self.raw_values(ctx.potential, grid.into_values());
        let stats = self.normalise(&mut values);
        Ok((
            ElevationGrid::new(self.size, values),
            StageStats::new(Self::NAME, StageDetail::Synthesis(stats)),
        ))
    }
}
