use crate::error::{LayerFsError, Result};
use std::path::Path;

use crate::config::paths::*;
use crate::config::schema::*;

/// Load the configuration file.
///
/// An explicit path must exist. The discovered default location is optional;
/// when it is missing every setting takes its default.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let config_path = match explicit {
        Some(path) => path.to_path_buf(),
        None => get_config_path()?,
    };

    let config = if !config_path.exists() {
        if explicit.is_some() {
            return Err(LayerFsError::Config(format!(
                "Config file {} does not exist",
                config_path.display()
            )));
        }
        tracing::debug!(
            "No config file at {}, using defaults",
            config_path.display()
        );
        Config::default()
    } else {
        let toml_content = std::fs::read_to_string(&config_path).map_err(|e| {
            LayerFsError::Config(format!(
                "Failed to read config file {}: {}",
                config_path.display(),
                e
            ))
        })?;

        toml::from_str(&toml_content).map_err(|e| {
            LayerFsError::Config(format!(
                "Failed to parse config {}: {}",
                config_path.display(),
                e
            ))
        })?
    };

    validate_config(&config)?;
    Ok(config)
}
