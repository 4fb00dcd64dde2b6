use std::f32::consts::SQRT_2;

use anyhow::{bail, Result};
use terrain_core::{
    ConstraintVerifier, ElevationGrid, ErosionMode, ErosionStats, FlowAccumulationGrid,
    FlowDirectionGrid, HydraulicErosion, PotentialField, PotentialGenerator, Stage, StageContext,
    StageDetail, TerrainConfig, TerrainPresets, TerrainScale, VerificationOutcome,
};

fn erode(config: &TerrainConfig, grid: ElevationGrid) -> Result<(ElevationGrid, ErosionStats)> {
    let potential = PotentialField::uniform(grid.size(), 0.5);
    let ctx = StageContext::detached(&potential, config.scale());
    let (grid, stats) = HydraulicErosion::new(config).run(grid, &ctx)?;
    match stats.detail {
        StageDetail::Erosion(stats) => Ok((grid, stats)),
        other => bail!("unexpected stage detail {other:?}"),
    }
}

fn tolerance(stats: &ErosionStats) -> f64 {
    1e-6 * stats.total_eroded.max(stats.total_deposited).max(1.0)
}

#[test]
fn potential_hits_target_coverage() -> Result<()> {
    let mut config = TerrainConfig::default().with_size(256).with_seed(7);
    config.potential.target_coverage = 0.7;
    let (field, stats) = PotentialGenerator::new(&config).generate()?;
    let coverage = field.coverage_above(0.5);
    assert!((0.6..=0.8).contains(&coverage), "coverage {coverage}");
    assert!((stats.achieved_coverage - coverage).abs() < 1e-6);
    Ok(())
}

#[test]
fn flat_grid_survives_erosion_unchanged() -> Result<()> {
    for mode in [ErosionMode::Sequential, ErosionMode::ParallelBatches] {
        let mut config = TerrainConfig::default().with_size(64);
        config.erosion.particles = 20_000;
        config.erosion.mode = mode;
        let flat = ElevationGrid::filled(64, 0.5);
        let (grid, stats) = erode(&config, flat.clone())?;
        assert_eq!(grid, flat);
        assert_eq!(stats.net_change, 0.0);
        assert_eq!(stats.discarded_particles, 0);
        assert_eq!(stats.particles, 20_000);
        assert_eq!(stats.flat_gradient, 20_000);
    }
    Ok(())
}

#[test]
fn diagonal_ridge_fills_adjacent_valleys() -> Result<()> {
    let size = 512;
    let half_width = 20.0f32;
    let distance = |x: u32, y: u32| (x as f32 - y as f32).abs() / SQRT_2;
    let ridge = ElevationGrid::from_fn(size, |x, y| {
        let d = distance(x, y);
        if d < half_width {
            0.1 + 0.8 * (1.0 - d / half_width)
        } else {
            0.1
        }
    });

    let mut config = TerrainConfig::default().with_size(size).with_seed(5);
    config.erosion.particles = 10_000;
    let (eroded, stats) = erode(&config, ridge.clone())?;

    let valley_sum = |grid: &ElevationGrid| -> f64 {
        let mut sum = 0.0f64;
        for y in 0..size {
            for x in 0..size {
                let d = distance(x, y);
                if d >= half_width && d < half_width + 40.0 {
                    sum += grid.sample(x, y) as f64;
                }
            }
        }
        sum
    };
    assert!(
        valley_sum(&eroded) > valley_sum(&ridge),
        "valley {} -> {}",
        valley_sum(&ridge),
        valley_sum(&eroded)
    );
    assert!(stats.total_eroded > 0.0);
    assert!(stats.mass_balance_error() <= tolerance(&stats), "{stats:?}");
    let exchange =
        (stats.total_eroded - (stats.total_deposited + stats.sediment_lost)).abs();
    assert!(exchange <= tolerance(&stats), "{stats:?}");
    assert!(eroded.check_invariants("erosion").is_ok());
    Ok(())
}

#[test]
fn flat_grid_flow_is_conserved() {
    for size in [1u32, 2, 17, 64] {
        let grid = ElevationGrid::filled(size, 0.5);
        let directions = FlowDirectionGrid::from_elevation(&grid);
        let accumulation = FlowAccumulationGrid::from_directions(&grid, &directions);
        assert_eq!(directions.sink_count(), (size * size) as usize);
        assert_eq!(accumulation.sink_total(&directions), u64::from(size * size));
    }
}

#[test]
fn verifier_leaves_in_range_grid_alone() {
    let mut config = TerrainConfig::default().with_size(128);
    config.verifier.min_fraction = 0.55;
    config.verifier.max_fraction = 0.65;
    let grid = ElevationGrid::from_fn(128, |x, _| {
        if x < 77 {
            0.3
        } else {
            0.3 + (x - 76) as f32 * 0.01
        }
    });
    let (out, report) =
        ConstraintVerifier::new(&config).verify(grid.clone(), TerrainScale::new(10.0, 100.0));
    assert!(!report.adjustments_applied);
    assert_eq!(report.outcome, VerificationOutcome::WithinTarget);
    assert_eq!(report.initial_fraction, report.final_fraction);
    assert!((0.55..=0.65).contains(&report.final_fraction));
    assert_eq!(out, grid);
}

#[test]
fn builtin_presets_run_end_to_end() -> Result<()> {
    let presets = TerrainPresets::builtin();
    assert!(presets.len() >= 3);
    for id in presets.ids() {
        let mut config = presets.config_for(id)?.with_size(48);
        config.erosion.particles = 500;
        config.validate()?;
        let artifacts = terrain_core::TerrainPipeline::new(config)?.run()?;
        assert!(artifacts.is_complete(), "preset {id}");
    }
    Ok(())
}
