pub mod config_cmd;
pub mod providers;
pub mod run;

use std::path::Path;

use turnwright_config::{ConfigError, EngineConfig};

/// Load from an explicit path, or the default location.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    match path {
        Some(path) => {
            let mut config = EngineConfig::load_from(path)?;
            config.apply_env(|key| std::env::var(key).ok())?;
            Ok(config)
        }
        None => EngineConfig::load(),
    }
}
