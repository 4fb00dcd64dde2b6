use std::path::PathBuf;
use std::sync::Once;

use terrain_core::{load_terrain_config_from_env, TerrainConfig};

static INIT: Once = Once::new();

pub fn ensure_test_config() {
    INIT.call_once(|| {
        let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join("test_terrain_config.json");

        debug_assert!(
            config_path.exists(),
            "missing test terrain config at {}",
            config_path.display()
        );

        std::env::set_var("TERRAIN_CONFIG_PATH", &config_path);
    });
}

/// The fixture configuration, loaded through the same path the runtime uses.
pub fn test_config() -> TerrainConfig {
    ensure_test_config();
    let (config, metadata) = load_terrain_config_from_env();
    debug_assert!(metadata.path().is_some(), "fixture config should load from file");
    config
}
