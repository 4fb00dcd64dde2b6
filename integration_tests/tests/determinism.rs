mod common;

use anyhow::Result;
use terrain_core::{ErosionMode, TerrainArtifacts, TerrainConfig, TerrainPipeline};

fn run(config: TerrainConfig) -> Result<TerrainArtifacts> {
    Ok(TerrainPipeline::new(config)?.run()?)
}

fn assert_same_terrain(a: &TerrainArtifacts, b: &TerrainArtifacts) {
    assert_eq!(a.report.grid_digest, b.report.grid_digest);
    assert_eq!(a.grid, b.grid);
    assert_eq!(a.report.accumulation_digest, b.report.accumulation_digest);
    let (ha, hb) = (
        a.hydrology.as_ref().expect("hydrology a"),
        b.hydrology.as_ref().expect("hydrology b"),
    );
    assert_eq!(ha.directions, hb.directions);
    assert_eq!(ha.accumulation, hb.accumulation);
    assert_eq!(ha.rivers, hb.rivers);
    assert_eq!(ha.dam_sites, hb.dam_sites);
    assert_eq!(a.classification, b.classification);
}

#[test]
fn sequential_runs_are_bit_identical() -> Result<()> {
    let config = common::test_config();
    let a = run(config.clone())?;
    let b = run(config)?;
    assert!(a.is_complete());
    assert_same_terrain(&a, &b);
    Ok(())
}

#[test]
fn parallel_runs_ignore_thread_count() -> Result<()> {
    let mut config = common::test_config();
    config.erosion.mode = ErosionMode::ParallelBatches;

    let single = rayon::ThreadPoolBuilder::new().num_threads(1).build()?;
    let many = rayon::ThreadPoolBuilder::new().num_threads(4).build()?;
    let a = single.install(|| run(config.clone()))?;
    let b = many.install(|| run(config.clone()))?;
    let c = run(config)?;
    assert_same_terrain(&a, &b);
    assert_same_terrain(&a, &c);
    Ok(())
}

#[test]
fn seed_changes_the_terrain() -> Result<()> {
    let config = common::test_config();
    let a = run(config.clone())?;
    let b = run(config.with_seed(22))?;
    assert_ne!(a.report.grid_digest, b.report.grid_digest);
    Ok(())
}

#[test]
fn report_round_trips_through_json() -> Result<()> {
    let artifacts = run(common::test_config())?;
    let json = serde_json::to_value(&artifacts.report)?;
    assert_eq!(json["status"]["status"], "completed");
    assert_eq!(json["size"], 96);
    let stages = json["stages"].as_array().expect("stages array");
    assert_eq!(stages.len(), 5);
    assert_eq!(stages[2]["detail"]["kind"], "erosion");
    assert!(json["hydrology"]["rivers"].is_u64());
    Ok(())
}
