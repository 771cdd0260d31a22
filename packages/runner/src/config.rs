//! Loading pipeline tunables from TOML.

use std::path::Path;

use campaign_core::{ConfigError, PipelineConfig};

/// Load the pipeline configuration from `path`, or use the defaults when no
/// path is given. Missing keys keep their defaults.
pub fn load(path: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
    let config = match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)?;
            let config = parse(&contents)?;
            tracing::info!(path = %path.display(), "Loaded pipeline configuration");
            config
        }
        None => PipelineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn parse(contents: &str) -> Result<PipelineConfig, ConfigError> {
    toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
}
