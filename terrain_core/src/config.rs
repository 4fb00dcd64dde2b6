use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::TerrainError;

pub const BUILTIN_TERRAIN_CONFIG: &str = include_str!("data/terrain_config.json");

/// Every tunable of a terrain run. Passed by reference into each stage
/// constructor; nothing reads parameters from global state.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Cells per side.
    pub size: u32,
    /// Physical side length of the whole grid.
    pub world_extent_m: f32,
    /// Metres represented by a normalised elevation of 1.0.
    pub vertical_scale_m: f32,
    pub seed: u64,
    pub potential: PotentialConfig,
    pub synthesis: SynthesisConfig,
    pub ridge: RidgeConfig,
    pub erosion: ErosionConfig,
    pub hydrology: HydrologyConfig,
    pub detail: DetailConfig,
    pub verifier: VerifierConfig,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            size: 256,
            world_extent_m: 10_240.0,
            vertical_scale_m: 600.0,
            seed: 7,
            potential: PotentialConfig::default(),
            synthesis: SynthesisConfig::default(),
            ridge: RidgeConfig::default(),
            erosion: ErosionConfig::default(),
            hydrology: HydrologyConfig::default(),
            detail: DetailConfig::default(),
            verifier: VerifierConfig::default(),
        }
    }
}

/// Physical units shared by the slope-aware stages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerrainScale {
    pub cell_size_m: f32,
    pub vertical_scale_m: f32,
}

impl TerrainScale {
    pub fn new(cell_size_m: f32, vertical_scale_m: f32) -> Self {
        Self {
            cell_size_m,
            vertical_scale_m,
        }
    }

    /// Area of one cell in square kilometres.
    pub fn cell_area_km2(&self) -> f64 {
        let side_km = self.cell_size_m as f64 / 1000.0;
        side_km * side_km
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PotentialConfig {
    /// Desired fraction of cells with potential above 0.5.
    pub target_coverage: f32,
    pub octaves: u32,
    /// Base noise wavelength as a fraction of the grid side.
    pub wavelength_fraction: f32,
    pub exponent_min: f32,
    pub exponent_max: f32,
}

impl Default for PotentialConfig {
    fn default() -> Self {
        Self {
            target_coverage: 0.72,
            octaves: 3,
            wavelength_fraction: 0.5,
            exponent_min: 0.1,
            exponent_max: 4.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationPolicy {
    /// Clip when few cells fall outside `[0, 1]`, otherwise rescale.
    Auto,
    Clip,
    Rescale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub base_amplitude: f32,
    pub min_mult: f32,
    pub max_mult: f32,
    pub octaves: u32,
    pub wavelength_fraction: f32,
    pub lacunarity: f32,
    pub gain: f32,
    pub normalization: NormalizationPolicy,
    /// Largest out-of-range fraction `Auto` will still clip.
    pub max_clipped_fraction: f32,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_amplitude: 1.0,
            min_mult: 0.3,
            max_mult: 1.0,
            octaves: 6,
            wavelength_fraction: 0.35,
            lacunarity: 2.0,
            gain: 0.5,
            normalization: NormalizationPolicy::Auto,
            max_clipped_fraction: 0.02,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RidgeConfig {
    /// Potential below which a cell counts as ridge country.
    pub threshold: f32,
    pub fade_start: f32,
    pub fade_end: f32,
    pub strength: f32,
    pub octaves: u32,
    pub wavelength_fraction: f32,
}

impl Default for RidgeConfig {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            fade_start: 0.2,
            fade_end: 0.4,
            strength: 0.25,
            octaves: 4,
            wavelength_fraction: 0.12,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErosionMode {
    Sequential,
    ParallelBatches,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErosionConfig {
    pub particles: u32,
    pub batch_size: u32,
    pub mode: ErosionMode,
    pub inertia: f32,
    pub capacity_factor: f32,
    pub min_capacity: f32,
    pub erosion_rate: f32,
    pub deposition_rate: f32,
    pub evaporation_rate: f32,
    pub gravity: f32,
    pub max_steps: u32,
    pub radius: u32,
    pub initial_water: f32,
    pub min_water: f32,
    /// Distance advanced per step, in cells.
    pub step_length: f32,
    /// Upper elevation bound for deposition.
    pub ceiling: f32,
}

impl Default for ErosionConfig {
    fn default() -> Self {
        Self {
            particles: 50_000,
            batch_size: 4096,
            mode: ErosionMode::Sequential,
            inertia: 0.4,
            capacity_factor: 4.0,
            min_capacity: 1e-4,
            erosion_rate: 0.3,
            deposition_rate: 0.3,
            evaporation_rate: 0.015,
            gravity: 4.0,
            max_steps: 96,
            radius: 3,
            initial_water: 1.0,
            min_water: 0.4,
            step_length: 1.0,
            ceiling: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HydrologyConfig {
    /// Accumulation quantile a cell must reach to carry a river.
    pub river_percentile: f32,
    pub min_accumulation: u32,
    pub min_length: usize,
    pub base_width_m: f32,
    pub max_width_m: f32,
    pub dams: DamSiteConfig,
}

impl Default for HydrologyConfig {
    fn default() -> Self {
        Self {
            river_percentile: 0.99,
            min_accumulation: 32,
            min_length: 8,
            base_width_m: 4.0,
            max_width_m: 120.0,
            dams: DamSiteConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DamSiteConfig {
    pub min_accumulation: u32,
    pub probe_radius: u32,
    pub rise_band_m: f32,
    pub min_rise_m: f32,
    pub local_window: usize,
    pub min_spacing: u32,
    pub max_candidates: usize,
}

impl Default for DamSiteConfig {
    fn default() -> Self {
        Self {
            min_accumulation: 200,
            probe_radius: 8,
            rise_band_m: 5.0,
            min_rise_m: 15.0,
            local_window: 4,
            min_spacing: 12,
            max_candidates: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailConfig {
    pub amplitude: f32,
    pub wavelength_cells: f32,
    pub octaves: u32,
    pub low_slope: f32,
    pub high_slope: f32,
}

impl Default for DetailConfig {
    fn default() -> Self {
        Self {
            amplitude: 0.004,
            wavelength_cells: 6.0,
            octaves: 2,
            low_slope: 0.08,
            high_slope: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    pub buildable_slope: f32,
    pub near_buildable_ceiling: f32,
    pub min_fraction: f32,
    pub max_fraction: f32,
    pub max_passes: u32,
    pub smoothing_strength: f32,
    /// Largest change a single pass may apply to one cell.
    pub max_delta: f32,
    pub convergence_epsilon: f32,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            buildable_slope: 0.05,
            near_buildable_ceiling: 0.10,
            min_fraction: 0.40,
            max_fraction: 0.85,
            max_passes: 3,
            smoothing_strength: 0.5,
            max_delta: 0.002,
            convergence_epsilon: 0.001,
        }
    }
}

pub const MAX_VERIFIER_PASSES: u32 = 3;
/// Largest edge length whose cell indices and sub-cell coordinates stay exact.
pub const MAX_GRID_SIZE: u32 = 8192;
pub const MAX_EROSION_RADIUS: u32 = 8;

impl TerrainConfig {
    pub fn builtin() -> Self {
        serde_json::from_str(BUILTIN_TERRAIN_CONFIG).expect("builtin terrain config should parse")
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, TerrainConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| TerrainConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = TerrainConfig::from_json_str(&contents)?;
        Ok(config)
    }

    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn cell_size_m(&self) -> f32 {
        if self.size == 0 {
            return 0.0;
        }
        self.world_extent_m / self.size as f32
    }

    pub fn scale(&self) -> TerrainScale {
        TerrainScale::new(self.cell_size_m(), self.vertical_scale_m)
    }

    /// Reject out-of-range or mutually inconsistent parameters before any
    /// grid is allocated.
    pub fn validate(&self) -> Result<(), TerrainError> {
        ensure(
            self.size > 0 && self.size <= MAX_GRID_SIZE,
            "size",
            format!("{} is outside 1..={MAX_GRID_SIZE}", self.size),
        )?;
        ensure_positive(self.world_extent_m, "world_extent_m")?;
        ensure_positive(self.vertical_scale_m, "vertical_scale_m")?;

        let p = &self.potential;
        ensure(
            p.target_coverage > 0.0 && p.target_coverage < 1.0,
            "potential.target_coverage",
            format!("{} is outside (0, 1)", p.target_coverage),
        )?;
        ensure(
            (1..=4).contains(&p.octaves),
            "potential.octaves",
            format!("{} is outside 1..=4", p.octaves),
        )?;
        ensure_positive(p.wavelength_fraction, "potential.wavelength_fraction")?;
        ensure_positive(p.exponent_min, "potential.exponent_min")?;
        ensure(
            p.exponent_min <= p.exponent_max,
            "potential.exponent_max",
            format!("{} is below exponent_min {}", p.exponent_max, p.exponent_min),
        )?;

        let s = &self.synthesis;
        ensure_positive(s.base_amplitude, "synthesis.base_amplitude")?;
        ensure(
            s.min_mult >= 0.0 && s.min_mult.is_finite(),
            "synthesis.min_mult",
            format!("{} must be non-negative", s.min_mult),
        )?;
        ensure(
            s.min_mult <= s.max_mult,
            "synthesis.max_mult",
            format!("{} is below min_mult {}", s.max_mult, s.min_mult),
        )?;
        ensure(
            (5..=7).contains(&s.octaves),
            "synthesis.octaves",
            format!("{} is outside 5..=7", s.octaves),
        )?;
        ensure_positive(s.wavelength_fraction, "synthesis.wavelength_fraction")?;
        ensure(
            s.lacunarity >= 1.0,
            "synthesis.lacunarity",
            format!("{} must be at least 1", s.lacunarity),
        )?;
        ensure_unit_open_low(s.gain, "synthesis.gain")?;
        ensure_unit(s.max_clipped_fraction, "synthesis.max_clipped_fraction")?;

        let r = &self.ridge;
        ensure_unit(r.fade_start, "ridge.fade_start")?;
        ensure_unit(r.fade_end, "ridge.fade_end")?;
        ensure(
            r.fade_start < r.fade_end,
            "ridge.fade_end",
            format!("{} must exceed fade_start {}", r.fade_end, r.fade_start),
        )?;
        ensure(
            r.threshold >= r.fade_start && r.threshold <= r.fade_end,
            "ridge.threshold",
            format!(
                "{} must lie within the fade band [{}, {}]",
                r.threshold, r.fade_start, r.fade_end
            ),
        )?;
        ensure(
            r.strength >= 0.0 && r.strength <= 1.0,
            "ridge.strength",
            format!("{} is outside [0, 1]", r.strength),
        )?;
        ensure(r.octaves >= 1, "ridge.octaves", "at least one octave")?;
        ensure_positive(r.wavelength_fraction, "ridge.wavelength_fraction")?;

        let e = &self.erosion;
        ensure(e.batch_size > 0, "erosion.batch_size", "must be positive")?;
        ensure(
            e.inertia >= 0.0 && e.inertia < 1.0,
            "erosion.inertia",
            format!("{} is outside [0, 1)", e.inertia),
        )?;
        ensure_positive(e.capacity_factor, "erosion.capacity_factor")?;
        ensure(
            e.min_capacity >= 0.0,
            "erosion.min_capacity",
            "must be non-negative",
        )?;
        ensure_unit(e.erosion_rate, "erosion.erosion_rate")?;
        ensure_unit(e.deposition_rate, "erosion.deposition_rate")?;
        ensure(
            e.evaporation_rate >= 0.0 && e.evaporation_rate < 1.0,
            "erosion.evaporation_rate",
            format!("{} is outside [0, 1)", e.evaporation_rate),
        )?;
        ensure_positive(e.gravity, "erosion.gravity")?;
        ensure(e.max_steps > 0, "erosion.max_steps", "must be positive")?;
        ensure(
            (1..=MAX_EROSION_RADIUS).contains(&e.radius),
            "erosion.radius",
            format!("{} is outside 1..={}", e.radius, MAX_EROSION_RADIUS),
        )?;
        ensure_positive(e.min_water, "erosion.min_water")?;
        ensure(
            e.initial_water >= e.min_water,
            "erosion.initial_water",
            format!("{} is below min_water {}", e.initial_water, e.min_water),
        )?;
        ensure(
            e.step_length > 0.0 && e.step_length <= 2.0,
            "erosion.step_length",
            format!("{} is outside (0, 2]", e.step_length),
        )?;
        ensure(
            e.ceiling > 0.0 && e.ceiling <= 1.0,
            "erosion.ceiling",
            format!("{} is outside (0, 1]", e.ceiling),
        )?;

        let h = &self.hydrology;
        ensure(
            h.river_percentile > 0.0 && h.river_percentile < 1.0,
            "hydrology.river_percentile",
            format!("{} is outside (0, 1)", h.river_percentile),
        )?;
        ensure(
            h.min_accumulation >= 2,
            "hydrology.min_accumulation",
            "rivers need at least one upstream cell",
        )?;
        ensure(h.min_length >= 2, "hydrology.min_length", "must be at least 2")?;
        ensure_positive(h.base_width_m, "hydrology.base_width_m")?;
        ensure(
            h.max_width_m >= h.base_width_m,
            "hydrology.max_width_m",
            format!("{} is below base_width_m {}", h.max_width_m, h.base_width_m),
        )?;
        let d = &h.dams;
        ensure(
            d.probe_radius >= 1,
            "hydrology.dams.probe_radius",
            "must be at least 1",
        )?;
        ensure(
            d.rise_band_m >= 0.0,
            "hydrology.dams.rise_band_m",
            "must be non-negative",
        )?;
        ensure_positive(d.min_rise_m, "hydrology.dams.min_rise_m")?;
        ensure(
            d.local_window >= 1,
            "hydrology.dams.local_window",
            "must be at least 1",
        )?;

        let dt = &self.detail;
        ensure(
            dt.amplitude >= 0.0 && dt.amplitude <= 0.1,
            "detail.amplitude",
            format!("{} is outside [0, 0.1]", dt.amplitude),
        )?;
        ensure(
            dt.wavelength_cells >= 2.0,
            "detail.wavelength_cells",
            format!("{} is below 2", dt.wavelength_cells),
        )?;
        ensure(dt.octaves >= 1, "detail.octaves", "at least one octave")?;
        ensure(
            dt.low_slope >= 0.0 && dt.low_slope < dt.high_slope,
            "detail.high_slope",
            format!("{} must exceed low_slope {}", dt.high_slope, dt.low_slope),
        )?;

        let v = &self.verifier;
        ensure_positive(v.buildable_slope, "verifier.buildable_slope")?;
        ensure(
            v.near_buildable_ceiling > v.buildable_slope,
            "verifier.near_buildable_ceiling",
            format!(
                "{} must exceed buildable_slope {}",
                v.near_buildable_ceiling, v.buildable_slope
            ),
        )?;
        ensure_unit(v.min_fraction, "verifier.min_fraction")?;
        ensure_unit(v.max_fraction, "verifier.max_fraction")?;
        ensure(
            v.min_fraction <= v.max_fraction,
            "verifier.max_fraction",
            format!("{} is below min_fraction {}", v.max_fraction, v.min_fraction),
        )?;
        ensure(
            v.max_passes <= MAX_VERIFIER_PASSES,
            "verifier.max_passes",
            format!("{} exceeds {}", v.max_passes, MAX_VERIFIER_PASSES),
        )?;
        ensure(
            v.smoothing_strength > 0.0 && v.smoothing_strength <= 1.0,
            "verifier.smoothing_strength",
            format!("{} is outside (0, 1]", v.smoothing_strength),
        )?;
        ensure_positive(v.max_delta, "verifier.max_delta")?;
        ensure(
            v.convergence_epsilon >= 0.0,
            "verifier.convergence_epsilon",
            "must be non-negative",
        )?;
        Ok(())
    }
}

fn ensure(
    condition: bool,
    field: &'static str,
    reason: impl Into<String>,
) -> Result<(), TerrainError> {
    if condition {
        Ok(())
    } else {
        Err(TerrainError::invalid(field, reason))
    }
}

fn ensure_positive(value: f32, field: &'static str) -> Result<(), TerrainError> {
    ensure(
        value.is_finite() && value > 0.0,
        field,
        format!("{value} must be positive"),
    )
}

fn ensure_unit(value: f32, field: &'static str) -> Result<(), TerrainError> {
    ensure(
        (0.0..=1.0).contains(&value),
        field,
        format!("{value} is outside [0, 1]"),
    )
}

fn ensure_unit_open_low(value: f32, field: &'static str) -> Result<(), TerrainError> {
    ensure(
        value > 0.0 && value <= 1.0,
        field,
        format!("{value} is outside (0, 1]"),
    )
}

#[derive(Debug, Error)]
pub enum TerrainConfigError {
    #[error("failed to parse terrain config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read terrain config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Where the active configuration came from.
#[derive(Resource, Debug, Clone, Default)]
pub struct TerrainConfigMetadata {
    path: Option<PathBuf>,
}

impl TerrainConfigMetadata {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Load from `TERRAIN_CONFIG_PATH`, then the crate's data file, then the
/// compiled-in copy.
pub fn load_terrain_config_from_env() -> (TerrainConfig, TerrainConfigMetadata) {
    let override_path = env::var("TERRAIN_CONFIG_PATH").ok().map(PathBuf::from);
    let default_path =
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/data/terrain_config.json");
    let candidates: Vec<PathBuf> = match override_path {
        Some(ref path) => vec![path.clone()],
        None => vec![default_path],
    };

    for path in candidates {
        match TerrainConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "terrain::config",
                    path = %path.display(),
                    "terrain_config.loaded=file"
                );
                return (config, TerrainConfigMetadata::new(Some(path)));
            }
            Err(err) => {
                tracing::warn!(
                    target: "terrain::config",
                    path = %path.display(),
                    error = %err,
                    "terrain_config.load_failed"
                );
            }
        }
    }

    tracing::info!(target: "terrain::config", "terrain_config.loaded=builtin");
    (TerrainConfig::builtin(), TerrainConfigMetadata::new(None))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(err: TerrainError) -> &'static str {
        match err {
            TerrainError::InvalidParameter { field, .. } => field,
            other => panic!("expected InvalidParameter, got {other:?}"),
        }
    }

    #[test]
    fn builtin_config_parses_and_validates() {
        let config = TerrainConfig::builtin();
        config.validate().expect("builtin config valid");
        assert_eq!(config.size, 256);
        assert_eq!(config.erosion.mode, ErosionMode::Sequential);
        assert_eq!(config.synthesis.normalization, NormalizationPolicy::Auto);
    }

    #[test]
    fn default_config_validates() {
        TerrainConfig::default().validate().expect("defaults valid");
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = TerrainConfig::from_json_str(
            r#"{ "size": 64, "erosion": { "mode": "parallel_batches", "radius": 4 } }"#,
        )
        .expect("parse");
        assert_eq!(config.size, 64);
        assert_eq!(config.erosion.mode, ErosionMode::ParallelBatches);
        assert_eq!(config.erosion.radius, 4);
        assert_eq!(config.erosion.batch_size, 4096);
        assert_eq!(config.potential.octaves, 3);
    }

    #[test]
    fn validation_rejects_inconsistent_parameters() {
        let cases: Vec<(&'static str, Box<dyn Fn(&mut TerrainConfig)>)> = vec![
            ("size", Box::new(|c| c.size = 0)),
            ("size", Box::new(|c| c.size = MAX_GRID_SIZE + 1)),
            ("size", Box::new(|c| c.size = 70_000)),
            (
                "potential.target_coverage",
                Box::new(|c| c.potential.target_coverage = 1.0),
            ),
            (
                "potential.target_coverage",
                Box::new(|c| c.potential.target_coverage = 0.0),
            ),
            (
                "synthesis.max_mult",
                Box::new(|c| {
                    c.synthesis.min_mult = 0.9;
                    c.synthesis.max_mult = 0.5;
                }),
            ),
            ("synthesis.octaves", Box::new(|c| c.synthesis.octaves = 4)),
            ("ridge.fade_end", Box::new(|c| c.ridge.fade_end = 0.1)),
            ("erosion.radius", Box::new(|c| c.erosion.radius = 9)),
            ("erosion.radius", Box::new(|c| c.erosion.radius = 0)),
            ("erosion.inertia", Box::new(|c| c.erosion.inertia = 1.0)),
            ("erosion.batch_size", Box::new(|c| c.erosion.batch_size = 0)),
            (
                "hydrology.river_percentile",
                Box::new(|c| c.hydrology.river_percentile = 1.5),
            ),
            (
                "detail.high_slope",
                Box::new(|c| c.detail.high_slope = c.detail.low_slope),
            ),
            (
                "verifier.max_fraction",
                Box::new(|c| {
                    c.verifier.min_fraction = 0.7;
                    c.verifier.max_fraction = 0.6;
                }),
            ),
            ("verifier.max_passes", Box::new(|c| c.verifier.max_passes = 4)),
            (
                "verifier.near_buildable_ceiling",
                Box::new(|c| c.verifier.near_buildable_ceiling = 0.01),
            ),
            ("vertical_scale_m", Box::new(|c| c.vertical_scale_m = f32::NAN)),
        ];
        for (expected, mutate) in cases {
            let mut config = TerrainConfig::default();
            mutate(&mut config);
            let err = config.validate().expect_err(expected);
            assert_eq!(field_of(err), expected);
        }
    }

    #[test]
    fn default_water_evaporates_before_step_ceiling() {
        let e = TerrainConfig::builtin().erosion;
        assert_eq!(e, ErosionConfig::default());
        let steps_to_dry =
            ((e.min_water / e.initial_water).ln() / (1.0 - e.evaporation_rate).ln()).ceil();
        assert!(steps_to_dry < e.max_steps as f32, "{steps_to_dry} steps");
    }

    #[test]
    fn scale_derives_cell_size() {
        let config = TerrainConfig::default().with_size(512);
        let scale = config.scale();
        assert_eq!(scale.cell_size_m, 20.0);
        assert!((scale.cell_area_km2() - 0.0004).abs() < 1e-12);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = TerrainConfig::from_file(Path::new("/nonexistent/terrain.json")).unwrap_err();
        assert!(matches!(err, TerrainConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/terrain.json"));
    }
}
