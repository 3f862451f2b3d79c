// src/lib.rs
pub mod capabilities;
pub mod config;
pub mod connectors;
pub mod discovery;
pub mod error;
pub mod federated;
pub mod retry;
pub mod utils;

use std::sync::Arc;

use serde::Serialize;

pub use crate::capabilities::{SafetyTier, SourceConfigSchema, SourceDescriptor};
pub use crate::config::{AggregatorConfig, ConfigStore, SourceSettings};
pub use crate::connectors::SourceAdapter;
pub use crate::error::{AggregatorError, SourceError};
pub use crate::federated::{
    AggregationService, Item, Page, ProfileStore, ResolvedQuerySet, SafetyMode, SafetyRating,
    SessionHandle, SessionSummary, SourceProfile, SourceStatus,
};

/// Registered adapters in registration order.
///
/// Order matters: it is the tie-break when ranking items of equal quality.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn SourceAdapter>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    #[serde(flatten)]
    pub descriptor: SourceDescriptor,
    pub config_schema: SourceConfigSchema,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter; a later registration with the same id replaces
    /// the earlier one in place.
    pub fn register(&mut self, source: Arc<dyn SourceAdapter>) {
        match self.sources.iter().position(|s| s.id() == source.id()) {
            Some(idx) => self.sources[idx] = source,
            None => self.sources.push(source),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn SourceAdapter>> {
        self.sources.iter().find(|s| s.id() == id)
    }

    /// Position of `id` in registration order.
    pub fn rank_of(&self, id: &str) -> Option<usize> {
        self.sources.iter().position(|s| s.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn SourceAdapter>> {
        self.sources.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn list_sources(&self) -> Vec<SourceInfo> {
        self.sources
            .iter()
            .map(|s| SourceInfo {
                descriptor: s.descriptor().clone(),
                config_schema: s.config_schema(),
            })
            .collect()
    }
}

/// Build a registry holding every adapter compiled in via Cargo features,
/// configured from `config.source_settings`.
///
/// Enable/disable lists are applied later by the service, so the registry
/// can still describe disabled sources.
pub fn build_registry_enabled_only(config: &AggregatorConfig) -> Result<SourceRegistry, AggregatorError> {
    #[allow(unused_variables)]
    let client = connectors::http::build_client(&config.user_agent, config.request_timeout())?;
    #[allow(unused_mut)]
    let mut registry = SourceRegistry::new();

    #[cfg(feature = "danbooru")]
    {
        let id = connectors::danbooru::SOURCE_ID;
        let source = connectors::danbooru::DanbooruSource::new(client.clone(), &config.settings_for(id))?;
        registry.register(Arc::new(source));
    }

    #[cfg(feature = "gelbooru")]
    {
        use connectors::gelbooru::{GelbooruSource, GELBOORU, RULE34, SAFEBOORU};
        for site in [GELBOORU, SAFEBOORU, RULE34] {
            let source = GelbooruSource::new(site, client.clone(), &config.settings_for(site.id))?;
            registry.register(Arc::new(source));
        }
    }

    #[cfg(feature = "moebooru")]
    {
        use connectors::moebooru::{MoebooruSource, KONACHAN, YANDERE};
        for site in [KONACHAN, YANDERE] {
            let source = MoebooruSource::new(site, client.clone(), &config.settings_for(site.id))?;
            registry.register(Arc::new(source));
        }
    }

    #[cfg(feature = "e621")]
    {
        let id = connectors::e621::SOURCE_ID;
        let source = connectors::e621::E621Source::new(client.clone(), &config.settings_for(id))?;
        registry.register(Arc::new(source));
    }

    #[cfg(feature = "zerochan")]
    {
        let id = connectors::zerochan::SOURCE_ID;
        let source = connectors::zerochan::ZerochanSource::new(client.clone(), &config.settings_for(id))?;
        registry.register(Arc::new(source));
    }

    Ok(registry)
}
