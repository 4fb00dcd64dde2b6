use std::{
    fs,
    path::{Path, PathBuf},
    thread,
};

use clap::Parser;
use color_eyre::eyre::{eyre, Result, WrapErr};
use serde::Serialize;
use terrain_core::{
    load_terrain_config_from_env, load_terrain_presets_from_env, DamSiteCandidate, ErosionMode,
    ProgressEvent, ProgressReporter, RiverPath, TerrainConfig, TerrainPipeline, TerrainPresets,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Generate buildable terrain and report on it", long_about = None)]
struct Args {
    /// Grid edge length in cells
    #[arg(long)]
    size: Option<u32>,

    #[arg(long)]
    seed: Option<u64>,

    /// Start from a named preset (see --list-presets)
    #[arg(long, conflicts_with = "config")]
    preset: Option<String>,

    /// Start from a JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Erosion particle count
    #[arg(long)]
    particles: Option<u32>,

    /// Run erosion in parallel batches
    #[arg(long)]
    parallel: bool,

    /// Write the run report as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    /// Write river paths and dam-site candidates as JSON
    #[arg(long)]
    rivers: Option<PathBuf>,

    /// Print the available presets and exit
    #[arg(long)]
    list_presets: bool,
}

#[derive(Serialize)]
struct RiverAnnotations<'a> {
    river_threshold: u32,
    rivers: &'a [RiverPath],
    dam_sites: &'a [DamSiteCandidate],
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let presets = load_terrain_presets_from_env();
    if args.list_presets {
        print_presets(&presets);
        return Ok(());
    }

    let config = resolve_config(&args, &presets)?;
    let (reporter, events) = ProgressReporter::channel();
    let listener = thread::spawn(move || {
        for event in events.iter() {
            match event {
                ProgressEvent::StageStarted {
                    stage,
                    index,
                    total,
                } => tracing::info!(target: "terrain_cli", stage, step = index + 1, total, "stage.started"),
                ProgressEvent::ErosionBatch {
                    particles_done,
                    particles_total,
                    ..
                } => tracing::debug!(
                    target: "terrain_cli",
                    particles_done,
                    particles_total,
                    "erosion.progress"
                ),
                ProgressEvent::Cancelled { stage } => {
                    tracing::warn!(target: "terrain_cli", stage, "stage.cancelled")
                }
                ProgressEvent::StageFinished { .. } => {}
            }
        }
    });

    let pipeline = TerrainPipeline::new(config)?.with_progress(reporter);
    let artifacts = pipeline.run()?;
    drop(pipeline);
    listener
        .join()
        .map_err(|_| eyre!("progress listener panicked"))?;

    let report = &artifacts.report;
    println!(
        "terrain {}x{} seed {}: buildable {:.1}%, digest {:016x}, {:.0} ms",
        report.size,
        report.size,
        report.seed,
        report.buildable_fraction * 100.0,
        report.grid_digest,
        report.total_elapsed_ms
    );
    if let Some(summary) = &report.hydrology {
        println!(
            "rivers {} (max order {}), dam sites {}",
            summary.rivers, summary.max_strahler_order, summary.dam_sites
        );
    }

    if let Some(path) = &args.report {
        write_json(path, report)?;
    }
    if let Some(path) = &args.rivers {
        let hydrology = artifacts
            .hydrology
            .as_ref()
            .ok_or_else(|| eyre!("run ended before river extraction"))?;
        write_json(
            path,
            &RiverAnnotations {
                river_threshold: hydrology.river_threshold,
                rivers: &hydrology.rivers,
                dam_sites: &hydrology.dam_sites,
            },
        )?;
    }
    Ok(())
}

fn resolve_config(args: &Args, presets: &TerrainPresets) -> Result<TerrainConfig> {
    let mut config = if let Some(path) = &args.config {
        TerrainConfig::from_file(path)?
    } else if let Some(id) = &args.preset {
        presets.config_for(id)?
    } else {
        load_terrain_config_from_env().0
    };

    if let Some(size) = args.size {
        config = config.with_size(size);
    }
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    if let Some(particles) = args.particles {
        config.erosion.particles = particles;
    }
    if args.parallel {
        config.erosion.mode = ErosionMode::ParallelBatches;
    }
    Ok(config)
}

fn print_presets(presets: &TerrainPresets) {
    for preset in presets.iter() {
        if preset.description.is_empty() {
            println!("{:<12} {}", preset.id, preset.name);
        } else {
            println!("{:<12} {} - {}", preset.id, preset.name, preset.description);
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).wrap_err_with(|| format!("failed to write {}", path.display()))?;
    tracing::info!(target: "terrain_cli", path = %path.display(), "output.written");
    Ok(())
}
