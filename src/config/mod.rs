use std::{fs, path::Path};

use serde::Deserialize;
use stake_core::{params::StakingParams, StakeError};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error(transparent)]
    Invalid(#[from] StakeError),
}

/// On-disk layout: a `[staking]` table whose keys mirror [`StakingParams`].
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    staking: StakingParams,
}

pub fn parse_params(contents: &str, origin: &str) -> Result<StakingParams, ConfigError> {
    let file: ConfigFile = toml::from_str(contents).map_err(|source| ConfigError::Parse {
        path: origin.to_string(),
        source,
    })?;
    file.staking.validate()?;
    Ok(file.staking)
}

/// Reads pool parameters, falling back to defaults when no file is given.
pub fn load_params(path: Option<&Path>) -> Result<StakingParams, ConfigError> {
    let Some(path) = path else {
        return Ok(StakingParams::default());
    };
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_params(&contents, &path.display().to_string())
}
