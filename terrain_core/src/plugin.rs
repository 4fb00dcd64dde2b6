use bevy::prelude::*;

use crate::config::{load_terrain_config_from_env, TerrainConfig};
use crate::error::TerrainError;
use crate::pipeline::{TerrainArtifacts, TerrainPipeline};
use crate::presets::{load_terrain_presets_from_env, TerrainPresetsHandle};
use crate::progress::CancelToken;

/// Result of the startup generation run.
#[derive(Resource, Debug)]
pub enum TerrainState {
    Ready(Box<TerrainArtifacts>),
    Failed(TerrainError),
}

impl TerrainState {
    pub fn artifacts(&self) -> Option<&TerrainArtifacts> {
        match self {
            TerrainState::Ready(artifacts) => Some(artifacts),
            TerrainState::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&TerrainError> {
        match self {
            TerrainState::Ready(_) => None,
            TerrainState::Failed(err) => Some(err),
        }
    }
}

/// Cancel flag the startup run observes; insert one before startup to keep a
/// handle on it.
#[derive(Resource, Debug, Clone, Default)]
pub struct TerrainCancel(pub CancelToken);

/// Generates terrain once at `Startup` from the `TerrainConfig` resource,
/// loading it (and the preset table) from the environment when absent.
pub struct TerrainPlugin;

impl Plugin for TerrainPlugin {
    fn build(&self, app: &mut App) {
        if !app.world.contains_resource::<TerrainConfig>() {
            let (config, metadata) = load_terrain_config_from_env();
            app.insert_resource(config).insert_resource(metadata);
        }
        if !app.world.contains_resource::<TerrainPresetsHandle>() {
            app.insert_resource(TerrainPresetsHandle::new(load_terrain_presets_from_env()));
        }
        app.init_resource::<TerrainCancel>()
            .add_systems(Startup, generate_terrain);
    }
}

pub fn generate_terrain(world: &mut World) {
    let config = world.resource::<TerrainConfig>().clone();
    let cancel = world
        .get_resource::<TerrainCancel>()
        .map(|c| c.0.clone())
        .unwrap_or_default();

    let state = match TerrainPipeline::new(config).and_then(|p| p.with_cancel(cancel).run()) {
        Ok(artifacts) => {
            tracing::info!(
                target: "terrain::plugin",
                status = ?artifacts.report.status,
                buildable_fraction = artifacts.report.buildable_fraction,
                "terrain.generated"
            );
            TerrainState::Ready(Box::new(artifacts))
        }
        Err(err) => {
            tracing::error!(target: "terrain::plugin", error = %err, "terrain.generation_failed");
            TerrainState::Failed(err)
        }
    };
    world.insert_resource(state);
}
