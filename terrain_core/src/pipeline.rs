use std::time::Instant;

use crate::config::{TerrainConfig, TerrainScale};
use crate::detail::DetailInjector;
use crate::erosion::HydraulicErosion;
use crate::error::TerrainError;
use crate::grid::{ElevationGrid, PotentialField};
use crate::hashing::{grid_digest, u32_digest};
use crate::hydrology::{FlowExtractor, Hydrology};
use crate::metrics::{count_modified, RunStatus, StageDetail, StageStats, TerrainReport};
use crate::potential::PotentialGenerator;
use crate::progress::{CancelToken, ProgressEvent, ProgressReporter};
use crate::ridge::RidgeEnhancer;
use crate::slope::buildable_fraction;
use crate::synthesis::ZoneSynthesizer;
use crate::verify::{ClassificationRaster, ConstraintVerifier};

const POTENTIAL_STAGE: &str = "potential";

/// Shared, read-only inputs for a grid stage.
#[derive(Debug, Clone)]
pub struct StageContext<'a> {
    pub potential: &'a PotentialField,
    pub scale: TerrainScale,
    pub cancel: CancelToken,
    pub progress: ProgressReporter,
}

impl<'a> StageContext<'a> {
    /// Context with a private cancel flag and no progress listener.
    pub fn detached(potential: &'a PotentialField, scale: TerrainScale) -> Self {
        Self {
            potential,
            scale,
            cancel: CancelToken::new(),
            progress: ProgressReporter::silent(),
        }
    }
}

/// One step of the elevation pipeline. Takes the grid by value and returns
/// the next version together with what it did.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(
        &self,
        grid: ElevationGrid,
        ctx: &StageContext<'_>,
    ) -> Result<(ElevationGrid, StageStats), TerrainError>;
}

/// Everything a run produced. After cancellation the grid is the output of
/// the last stage that finished and later artifacts are absent.
#[derive(Debug, Clone)]
pub struct TerrainArtifacts {
    pub config: TerrainConfig,
    pub potential: PotentialField,
    pub grid: ElevationGrid,
    pub hydrology: Option<Hydrology>,
    pub classification: Option<ClassificationRaster>,
    pub report: TerrainReport,
}

impl TerrainArtifacts {
    pub fn is_complete(&self) -> bool {
        self.report.status == RunStatus::Completed
    }
}

/// Sequential orchestrator: potential, synthesis, ridge, erosion,
/// hydrology (read-only branch), detail, verification.
#[derive(Debug, Clone)]
pub struct TerrainPipeline {
    config: TerrainConfig,
    cancel: CancelToken,
    progress: ProgressReporter,
}

impl TerrainPipeline {
    pub fn new(config: TerrainConfig) -> Result<Self, TerrainError> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: CancelToken::new(),
            progress: ProgressReporter::silent(),
        })
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn grid_stages(&self) -> Vec<Box<dyn Stage>> {
        vec![
            Box::new(ZoneSynthesizer::new(&self.config)),
            Box::new(RidgeEnhancer::new(&self.config)),
            Box::new(HydraulicErosion::new(&self.config)),
            Box::new(DetailInjector::new(&self.config)),
            Box::new(ConstraintVerifier::new(&self.config)),
        ]
    }

    pub fn run(&self) -> Result<TerrainArtifacts, TerrainError> {
        let config = &self.config;
        let scale = config.scale();
        let started = Instant::now();
        let stages = self.grid_stages();
        // Potential and hydrology run outside the grid chain.
        let total = stages.len() + 2;
        let mut index = 0usize;

        tracing::info!(
            target: "terrain::pipeline",
            size = config.size,
            seed = config.seed,
            particles = config.erosion.particles,
            mode = ?config.erosion.mode,
            "pipeline.started"
        );

        self.cancel.check(POTENTIAL_STAGE)?;
        self.progress.emit(ProgressEvent::StageStarted {
            stage: POTENTIAL_STAGE,
            index,
            total,
        });
        let potential_started = Instant::now();
        let (potential, potential_stats) = PotentialGenerator::new(config).generate()?;
        self.finish_stage(POTENTIAL_STAGE, potential_started);
        index += 1;

        let ctx = StageContext {
            potential: &potential,
            scale,
            cancel: self.cancel.clone(),
            progress: self.progress.clone(),
        };
        let mut grid = ElevationGrid::filled(config.size, 0.0);
        let mut stats: Vec<StageStats> = Vec::with_capacity(stages.len());
        let mut hydrology: Option<Hydrology> = None;
        let mut last_completed = POTENTIAL_STAGE;
        let mut cancelled = false;

        for stage in &stages {
            let name = stage.name();
            if self.cancel.is_cancelled() {
                cancelled = true;
                self.progress.emit(ProgressEvent::Cancelled { stage: name });
                break;
            }
            self.progress.emit(ProgressEvent::StageStarted {
                stage: name,
                index,
                total,
            });
            let stage_started = Instant::now();
            let before = grid.clone();
            match stage.run(grid, &ctx) {
                Ok((next, mut stage_stats)) => {
                    if next.size() != config.size {
                        return Err(TerrainError::InvariantViolation {
                            stage: name,
                            detail: format!("grid resized to {}", next.size()),
                        });
                    }
                    next.check_invariants(name)?;
                    stage_stats.cells_modified = count_modified(before.values(), next.values());
                    stage_stats.elapsed_ms = self.finish_stage(name, stage_started);
                    tracing::info!(
                        target: "terrain::pipeline",
                        stage = name,
                        elapsed_ms = stage_stats.elapsed_ms,
                        cells_modified = stage_stats.cells_modified,
                        "pipeline.stage_completed"
                    );
                    stats.push(stage_stats);
                    grid = next;
                    last_completed = name;
                }
                Err(TerrainError::Cancelled { stage }) => {
                    grid = before;
                    cancelled = true;
                    self.progress.emit(ProgressEvent::Cancelled { stage });
                    break;
                }
                Err(err) => return Err(err),
            }
            index += 1;

            if name == HydraulicErosion::NAME {
                if self.cancel.is_cancelled() {
                    cancelled = true;
                    self.progress.emit(ProgressEvent::Cancelled {
                        stage: FlowExtractor::NAME,
                    });
                    break;
                }
                self.progress.emit(ProgressEvent::StageStarted {
                    stage: FlowExtractor::NAME,
                    index,
                    total,
                });
                let flow_started = Instant::now();
                hydrology = Some(FlowExtractor::new(config).extract(&grid));
                self.finish_stage(FlowExtractor::NAME, flow_started);
                index += 1;
            }
        }

        let status = if cancelled {
            tracing::warn!(
                target: "terrain::pipeline",
                after_stage = last_completed,
                "pipeline.cancelled"
            );
            RunStatus::Cancelled {
                after_stage: Some(last_completed),
            }
        } else {
            RunStatus::Completed
        };

        let classification = stats.iter().find_map(|s| match &s.detail {
            StageDetail::Verification(report) => Some(report.classification.clone()),
            _ => None,
        });
        let report = TerrainReport {
            seed: config.seed,
            size: config.size,
            cell_size_m: scale.cell_size_m,
            status,
            potential: potential_stats,
            stages: stats,
            hydrology: hydrology.as_ref().map(Hydrology::summary),
            buildable_fraction: buildable_fraction(&grid, scale, config.verifier.buildable_slope),
            grid_digest: grid_digest(&grid),
            accumulation_digest: hydrology
                .as_ref()
                .map(|h| u32_digest(config.size, h.accumulation.values())),
            total_elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        };
        tracing::info!(
            target: "terrain::pipeline",
            status = ?report.status,
            buildable_fraction = report.buildable_fraction,
            grid_digest = report.grid_digest,
            total_elapsed_ms = report.total_elapsed_ms,
            "pipeline.completed"
        );

        Ok(TerrainArtifacts {
            config: config.clone(),
            potential,
            grid,
            hydrology,
            classification,
            report,
        })
    }

    fn finish_stage(&self, stage: &'static str, started: Instant) -> f64 {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.progress
            .emit(ProgressEvent::StageFinished { stage, elapsed_ms });
        elapsed_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ErosionMode;
    use crate::verify::VerificationOutcome;

    fn small_config() -> TerrainConfig {
        let mut config = TerrainConfig::default().with_size(64).with_seed(11);
        config.erosion.particles = 2_000;
        config.erosion.batch_size = 500;
        config
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let mut config = small_config();
        config.erosion.radius = 0;
        let err = TerrainPipeline::new(config).expect_err("radius 0");
        assert!(matches!(
            err,
            TerrainError::InvalidParameter {
                field: "erosion.radius",
                ..
            }
        ));
    }

    #[test]
    fn full_run_reports_every_stage() {
        let artifacts = TerrainPipeline::new(small_config())
            .expect("config")
            .run()
            .expect("run");
        assert!(artifacts.is_complete());
        let names: Vec<&str> = artifacts.report.stages.iter().map(|s| s.stage).collect();
        assert_eq!(names, vec!["synthesis", "ridge", "erosion", "detail", "verify"]);
        assert!(artifacts.hydrology.is_some());
        assert!(artifacts.classification.is_some());
        assert!(artifacts.grid.check_invariants("test").is_ok());
        let erosion = artifacts.report.erosion().expect("erosion stats");
        assert_eq!(erosion.particles, 2_000);
        assert!(artifacts.report.verification().is_some());
        assert_eq!(artifacts.report.grid_digest, grid_digest(&artifacts.grid));
    }

    #[test]
    fn progress_events_bracket_each_stage() {
        let (reporter, events) = ProgressReporter::channel();
        TerrainPipeline::new(small_config())
            .expect("config")
            .with_progress(reporter)
            .run()
            .expect("run");
        let events: Vec<ProgressEvent> = events.try_iter().collect();
        let started = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::StageStarted { .. }))
            .count();
        let finished = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::StageFinished { .. }))
            .count();
        let batches = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::ErosionBatch { .. }))
            .count();
        assert_eq!(started, 7);
        assert_eq!(finished, 7);
        assert_eq!(batches, 4);
    }

    #[test]
    fn cancel_before_grid_stages_keeps_potential_only() {
        let cancel = CancelToken::new();
        let pipeline = TerrainPipeline::new(small_config())
            .expect("config")
            .with_cancel(cancel.clone());
        cancel.cancel();
        let err = pipeline.run().expect_err("cancelled");
        assert_eq!(err, TerrainError::Cancelled { stage: "potential" });
    }

    #[test]
    fn cancel_during_erosion_returns_ridge_output() {
        let mut config = small_config();
        config.erosion.mode = ErosionMode::Sequential;
        let cancel = CancelToken::new();
        // Rendezvous channel: the second batch event cannot be delivered
        // before the watcher has tripped the flag on the first one, so the
        // third batch always sees it.
        let (sender, events) = crossbeam_channel::bounded(0);
        let token = cancel.clone();
        let watcher = std::thread::spawn(move || {
            for event in events.iter() {
                if matches!(event, ProgressEvent::ErosionBatch { batch: 0, .. }) {
                    token.cancel();
                }
            }
        });
        let pipeline = TerrainPipeline::new(config.clone())
            .expect("config")
            .with_cancel(cancel)
            .with_progress(ProgressReporter::new(sender));
        let artifacts = pipeline.run().expect("partial run");
        drop(pipeline);
        watcher.join().expect("watcher");

        assert!(!artifacts.is_complete());
        assert!(artifacts.hydrology.is_none());
        assert!(artifacts.classification.is_none());
        let names: Vec<&str> = artifacts.report.stages.iter().map(|s| s.stage).collect();
        assert_eq!(names, vec!["synthesis", "ridge"]);
        assert_eq!(
            artifacts.report.status,
            RunStatus::Cancelled {
                after_stage: Some("ridge")
            }
        );

        let replay = TerrainPipeline::new(config).expect("config");
        let potential = PotentialGenerator::new(replay.config()).generate().expect("potential").0;
        let ctx = StageContext::detached(&potential, replay.config().scale());
        let grid = ElevationGrid::filled(64, 0.0);
        let (grid, _) = ZoneSynthesizer::new(replay.config()).run(grid, &ctx).expect("synthesis");
        let (grid, _) = RidgeEnhancer::new(replay.config()).run(grid, &ctx).expect("ridge");
        assert_eq!(artifacts.grid, grid);
    }

    #[test]
    fn default_run_meets_buildable_target() {
        let config = TerrainConfig::default().with_seed(7);
        assert_eq!(config.size, 256);
        let artifacts = TerrainPipeline::new(config.clone())
            .expect("config")
            .run()
            .expect("run");
        let report = artifacts.report.verification().expect("verification");
        assert!(
            matches!(
                report.outcome,
                VerificationOutcome::WithinTarget | VerificationOutcome::Corrected { .. }
            ),
            "{:?} at {}",
            report.outcome,
            report.final_fraction
        );
        assert!(report.passes <= 3);
        assert!(report.final_fraction >= config.verifier.min_fraction);
        assert!(report.final_fraction <= config.verifier.max_fraction);
    }
}
