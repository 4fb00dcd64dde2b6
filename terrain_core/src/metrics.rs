use serde::Serialize;

use crate::detail::DetailStats;
use crate::erosion::ErosionStats;
use crate::hydrology::HydrologySummary;
use crate::potential::PotentialStats;
use crate::ridge::RidgeStats;
use crate::synthesis::SynthesisStats;
use crate::verify::VerificationReport;

/// What one grid stage did, filled in by the stage and timed by the
/// orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct StageStats {
    pub stage: &'static str,
    pub elapsed_ms: f64,
    pub cells_modified: usize,
    pub detail: StageDetail,
}

impl StageStats {
    pub fn new(stage: &'static str, detail: StageDetail) -> Self {
        Self {
            stage,
            elapsed_ms: 0.0,
            cells_modified: 0,
            detail,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageDetail {
    Synthesis(SynthesisStats),
    Ridge(RidgeStats),
    Erosion(ErosionStats),
    Detail(DetailStats),
    Verification(VerificationReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Artifacts reflect the last stage that finished before cancellation.
    Cancelled { after_stage: Option<&'static str> },
}

/// Structured summary of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct TerrainReport {
    pub seed: u64,
    pub size: u32,
    pub cell_size_m: f32,
    pub status: RunStatus,
    pub potential: PotentialStats,
    pub stages: Vec<StageStats>,
    pub hydrology: Option<HydrologySummary>,
    pub buildable_fraction: f32,
    pub grid_digest: u64,
    pub accumulation_digest: Option<u64>,
    pub total_elapsed_ms: f64,
}

impl TerrainReport {
    pub fn stage(&self, name: &str) -> Option<&StageStats> {
        self.stages.iter().find(|s| s.stage == name)
    }

    pub fn erosion(&self) -> Option<&ErosionStats> {
        self.stages.iter().find_map(|s| match &s.detail {
            StageDetail::Erosion(stats) => Some(stats),
            _ => None,
        })
    }

    pub fn verification(&self) -> Option<&VerificationReport> {
        self.stages.iter().find_map(|s| match &s.detail {
            StageDetail::Verification(report) => Some(report),
            _ => None,
        })
    }

    pub fn synthesis(&self) -> Option<&SynthesisStats> {
        self.stages.iter().find_map(|s| match &s.detail {
            StageDetail::Synthesis(stats) => Some(stats),
            _ => None,
        })
    }
}

/// Number of cells whose bits differ between two equally sized buffers.
pub fn count_modified(before: &[f32], after: &[f32]) -> usize {
    before
        .iter()
        .zip(after)
        .filter(|(a, b)| a.to_bits() != b.to_bits())
        .count()
}
