//! Buildable-terrain synthesis core.
//!
//! Produces a square elevation grid that hits a target share of gently
//! sloped (buildable) cells while keeping connected ridgelines and dendritic
//! drainage. The work is a fixed sequence of stages run by
//! [`TerrainPipeline`]: potential field, zone-weighted synthesis, ridge
//! enhancement, particle erosion, flow/river extraction, detail injection and
//! constraint verification.

pub mod config;
pub mod detail;
pub mod erosion;
pub mod error;
pub mod grid;
pub mod hashing;
pub mod hydrology;
pub mod metrics;
mod noise;
pub mod pipeline;
pub mod plugin;
pub mod potential;
pub mod presets;
pub mod progress;
pub mod ridge;
pub mod slope;
pub mod synthesis;
pub mod verify;

pub use config::{
    load_terrain_config_from_env, DamSiteConfig, DetailConfig, ErosionConfig, ErosionMode,
    HydrologyConfig, NormalizationPolicy, PotentialConfig, RidgeConfig, SynthesisConfig,
    TerrainConfig, TerrainConfigError, TerrainConfigMetadata, TerrainScale, VerifierConfig,
};
pub use detail::{DetailInjector, DetailStats};
pub use erosion::{ErosionStats, HydraulicErosion};
pub use error::TerrainError;
pub use grid::{ElevationGrid, PotentialField};
pub use hashing::{grid_digest, u32_digest};
pub use hydrology::{
    DamSiteCandidate, FlowAccumulationGrid, FlowDirectionGrid, FlowExtractor, Hydrology,
    HydrologySummary, RiverPath, RiverTermination, SINK,
};
pub use metrics::{RunStatus, StageDetail, StageStats, TerrainReport};
pub use pipeline::{Stage, StageContext, TerrainArtifacts, TerrainPipeline};
pub use plugin::{generate_terrain, TerrainCancel, TerrainPlugin, TerrainState};
pub use potential::{PotentialGenerator, PotentialStats};
pub use presets::{
    load_terrain_presets_from_env, TerrainPreset, TerrainPresets, TerrainPresetsError,
    TerrainPresetsHandle,
};
pub use progress::{CancelToken, ProgressEvent, ProgressReporter};
pub use ridge::{RidgeEnhancer, RidgeStats};
pub use slope::{buildable_fraction, SlopeField};
pub use synthesis::{SynthesisStats, ZoneSynthesizer};
pub use verify::{
    CellClass, ClassificationRaster, ConstraintVerifier, Recommendation, UnreachableDiagnostics,
    VerificationOutcome, VerificationReport,
};
