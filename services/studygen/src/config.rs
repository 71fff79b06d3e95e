//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! API keys come from the environment (see `KeySources::from_env`) and the
//! optional `keys_file`; they are never stored in the TOML itself.

use content::GenerationSettings;
use key_pool::{DispatchConfig, KeySources};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration. Every table is optional.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub keys: KeysConfig,
}

/// Key material locations
#[derive(Debug, Default, Deserialize)]
pub struct KeysConfig {
    /// File of comma- or newline-separated keys, merged as a bulk source
    #[serde(default)]
    pub keys_file: Option<PathBuf>,
    /// Resolved at load time from the environment and `keys_file`
    #[serde(skip)]
    pub sources: KeySources,
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment key sources.
    pub fn load(path: &Path) -> common::Result<Self> {
        Self::load_with(path, KeySources::from_env())
    }

    /// Load configuration, taking environment key sources from `env_sources`.
    ///
    /// Key resolution order:
    /// 1. `keys` alias, `GEMINI_API_KEYS`, `GEMINI_API_KEY`, numbered keys
    /// 2. keys_file contents, appended as another bulk list
    pub fn load_with(path: &Path, env_sources: KeySources) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        config.dispatch.validate()?;

        if !(0.0..=2.0).contains(&config.generation.temperature) {
            return Err(common::Error::Config(format!(
                "temperature must be between 0.0 and 2.0, got: {}",
                config.generation.temperature
            )));
        }

        if config.generation.max_output_tokens == 0 {
            return Err(common::Error::Config(
                "max_output_tokens must be greater than 0".into(),
            ));
        }

        if config.generation.model.trim().is_empty() {
            return Err(common::Error::Config("model must not be empty".into()));
        }

        config.keys.sources = env_sources;
        if let Some(ref keys_file) = config.keys.keys_file {
            let list = std::fs::read_to_string(keys_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read keys_file {}: {e}",
                    keys_file.display()
                ))
            })?;
            config.keys.sources.push_bulk(list);
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("studygen.toml")
    }
}
