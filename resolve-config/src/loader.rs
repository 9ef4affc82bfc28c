//! TOML config file loading. Deliberately thin (spec §1 names the grammar
//! and loader as an external collaborator): read the file, deserialize,
//! validate, done.

use std::path::Path;

use crate::config::Config;
use crate::error::ConfigError;

pub fn load_from_str(text: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(text)
}

pub fn load_from_path(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}
