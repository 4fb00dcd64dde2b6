use std::{
    collections::BTreeMap,
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bevy::prelude::Resource;
use serde::Deserialize;
use thiserror::Error;

use crate::config::TerrainConfig;

pub const BUILTIN_TERRAIN_PRESETS: &str = include_str!("data/terrain_presets.json");

/// A named starting configuration. Fields omitted from `config` keep their
/// defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct TerrainPreset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: TerrainConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct TerrainPresetsFile {
    presets: Vec<TerrainPreset>,
}

#[derive(Debug, Clone, Default)]
pub struct TerrainPresets {
    by_id: BTreeMap<String, TerrainPreset>,
}

impl TerrainPresets {
    pub fn builtin() -> Arc<Self> {
        let parsed: TerrainPresetsFile = serde_json::from_str(BUILTIN_TERRAIN_PRESETS)
            .expect("builtin terrain presets should parse");
        Arc::new(Self::from_parsed(parsed))
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let parsed: TerrainPresetsFile = serde_json::from_str(json)?;
        Ok(Self::from_parsed(parsed))
    }

    pub fn from_file(path: &Path) -> Result<Self, TerrainPresetsError> {
        let contents = fs::read_to_string(path).map_err(|source| TerrainPresetsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let presets = TerrainPresets::from_json_str(&contents)?;
        Ok(presets)
    }

    fn from_parsed(parsed: TerrainPresetsFile) -> Self {
        let by_id = parsed
            .presets
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        Self { by_id }
    }

    pub fn get(&self, id: &str) -> Option<&TerrainPreset> {
        self.by_id.get(id)
    }

    /// Preset configuration, or `UnknownPreset` listing what exists.
    pub fn config_for(&self, id: &str) -> Result<TerrainConfig, TerrainPresetsError> {
        self.get(id)
            .map(|preset| preset.config.clone())
            .ok_or_else(|| TerrainPresetsError::UnknownPreset {
                id: id.to_string(),
                available: self.ids().collect::<Vec<_>>().join(", "),
            })
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.by_id.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TerrainPreset> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum TerrainPresetsError {
    #[error("failed to parse terrain presets: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read terrain presets from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unknown terrain preset `{id}` (available: {available})")]
    UnknownPreset { id: String, available: String },
}

#[derive(Resource, Debug, Clone)]
pub struct TerrainPresetsHandle(Arc<TerrainPresets>);

impl TerrainPresetsHandle {
    pub fn new(presets: Arc<TerrainPresets>) -> Self {
        Self(presets)
    }

    pub fn get(&self) -> Arc<TerrainPresets> {
        Arc::clone(&self.0)
    }
}

/// Load from `TERRAIN_PRESETS_PATH`, falling back to the compiled-in presets.
pub fn load_terrain_presets_from_env() -> Arc<TerrainPresets> {
    if let Some(path) = env::var("TERRAIN_PRESETS_PATH").ok().map(PathBuf::from) {
        match TerrainPresets::from_file(&path) {
            Ok(presets) => {
                tracing::info!(
                    target: "terrain::config",
                    path = %path.display(),
                    count = presets.len(),
                    "terrain_presets.loaded=file"
                );
                return Arc::new(presets);
            }
            Err(err) => {
                tracing::warn!(
                    target: "terrain::config",
                    path = %path.display(),
                    error = %err,
                    "terrain_presets.load_failed"
                );
            }
        }
    }

    let presets = TerrainPresets::builtin();
    tracing::info!(
        target: "terrain::config",
        count = presets.len(),
        "terrain_presets.loaded=builtin"
    );
    presets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_presets_parse_and_validate() {
        let presets = TerrainPresets::builtin();
        assert_eq!(
            presets.ids().collect::<Vec<_>>(),
            vec!["balanced", "flatlands", "scenic"]
        );
        for preset in presets.iter() {
            preset
                .config
                .validate()
                .unwrap_or_else(|err| panic!("preset {} invalid: {err}", preset.id));
        }
    }

    #[test]
    fn preset_overrides_merge_onto_defaults() {
        let presets = TerrainPresets::builtin();
        let scenic = presets.config_for("scenic").expect("scenic preset");
        let defaults = TerrainConfig::default();
        assert_eq!(scenic.erosion.particles, 120_000);
        assert_eq!(scenic.erosion.radius, defaults.erosion.radius);
        assert_eq!(scenic.synthesis.octaves, defaults.synthesis.octaves);
        assert_eq!(presets.config_for("balanced").expect("balanced"), defaults);
    }

    #[test]
    fn unknown_preset_lists_available_ids() {
        let presets = TerrainPresets::builtin();
        let err = presets.config_for("alpine").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("alpine"));
        assert!(message.contains("balanced, flatlands, scenic"));
    }
}
