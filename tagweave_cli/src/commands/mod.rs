pub mod config;
pub mod profiles;
pub mod search;
pub mod sources;
pub mod tags;

use tagweave_core::config::ConfigStore;
use tagweave_core::federated::ProfileStoreError;
use tagweave_core::{build_registry_enabled_only, AggregationService, AggregatorConfig, SafetyMode};
use thiserror::Error;
use tracing::debug;

use crate::cli::{split_list, Cli, ScopeArgs};

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Profile '{0}' not found")]
    ProfileNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Core library error: {0}")]
    Core(#[from] tagweave_core::AggregatorError),

    #[error("Profile store error: {0}")]
    Profiles(#[from] ProfileStoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, CommandError>;

pub fn config_store(cli: &Cli) -> ConfigStore {
    match &cli.config {
        Some(path) => ConfigStore::new(path.clone()),
        None => ConfigStore::new_default(),
    }
}

/// Configuration with the profile and `--sources` overrides applied, plus
/// the safety mode the query should run in.
pub fn scoped_config(cli: &Cli, scope: &ScopeArgs) -> Result<(AggregatorConfig, SafetyMode)> {
    let mut config = config_store(cli).load()?;

    if let Some(name) = &scope.profile {
        let store = tagweave_core::ProfileStore::new_default();
        let profile = store
            .load(name)?
            .ok_or_else(|| CommandError::ProfileNotFound(name.clone()))?;
        profile.apply_to(&mut config, Some(&store));
        debug!(profile = %name, sources = ?config.sources, "profile applied");
    }

    if let Some(raw) = &scope.sources {
        let ids = split_list(raw);
        if ids.is_empty() {
            return Err(CommandError::InvalidInput(
                "--sources needs at least one source id".to_string(),
            ));
        }
        config.sources = Some(ids);
    }

    let mode = scope.mode.unwrap_or(config.default_safety_mode);
    Ok((config, mode))
}

/// Build the service over every adapter compiled into this binary.
pub fn build_service(config: AggregatorConfig) -> Result<AggregationService> {
    let registry = build_registry_enabled_only(&config)?;
    Ok(AggregationService::new(registry, config)?)
}

