//! The aggregation service: the one object callers construct and share.

use std::sync::{Arc, RwLock};

use moka::future::Cache;
use tracing::{debug, info};

use super::session::{AggregationSession, SessionHandle, SessionSettings};
use super::types::{ResolvedQuerySet, SafetyMode};
use crate::config::AggregatorConfig;
use crate::connectors::SourceAdapter;
use crate::discovery::{hash_source_ids, NormalizedQuery, TagDiscovery};
use crate::error::{AggregatorError, Result};
use crate::retry::RequestGate;
use crate::SourceRegistry;

/// Identity of a cached session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QueryKey {
    name: String,
    context: Option<String>,
    mode: SafetyMode,
    source_hash: u64,
}

impl QueryKey {
    fn new(query: &NormalizedQuery, mode: SafetyMode, sources: &[Arc<dyn SourceAdapter>]) -> Self {
        Self {
            name: query.full.clone(),
            context: query.context.clone(),
            mode,
            source_hash: hash_source_ids(sources.iter().map(|s| s.id())),
        }
    }
}

/// Configuration-derived state, swapped as a whole on reload.
struct Runtime {
    config: AggregatorConfig,
    gate: RequestGate,
    discovery: TagDiscovery,
    sessions: Cache<QueryKey, Arc<AggregationSession>>,
}

impl Runtime {
    fn build(config: AggregatorConfig, gate: RequestGate) -> Self {
        Self {
            discovery: TagDiscovery::new(config.tag_cache_ttl()),
            sessions: Cache::builder()
                .max_capacity(config.max_sessions)
                .time_to_live(config.session_ttl())
                .build(),
            gate,
            config,
        }
    }

    /// Enabled sources admissible under `mode`, in registration order.
    fn sources_for(
        &self,
        registry: &SourceRegistry,
        mode: SafetyMode,
    ) -> Vec<Arc<dyn SourceAdapter>> {
        registry
            .iter()
            .filter(|s| self.config.is_enabled(s.id()))
            .filter(|s| s.descriptor().permitted_in(mode))
            .cloned()
            .collect()
    }
}

fn check_known_sources(registry: &SourceRegistry, config: &AggregatorConfig) -> Result<()> {
    let unknown = config
        .sources
        .iter()
        .flatten()
        .find(|id| registry.get(id).is_none());
    match unknown {
        Some(id) => Err(AggregatorError::UnknownSource(id.clone())),
        None => Ok(()),
    }
}

struct ServiceInner {
    registry: SourceRegistry,
    runtime: RwLock<Arc<Runtime>>,
}

/// Federated search over every registered source.
///
/// Owns the shared concurrency gate, the tag discovery cache and the session
/// table. Clones share all of them.
#[derive(Clone)]
pub struct AggregationService {
    inner: Arc<ServiceInner>,
}

impl AggregationService {
    /// Fails with [`AggregatorError::UnknownSource`] if `config.sources`
    /// names a source the registry does not hold.
    pub fn new(registry: SourceRegistry, config: AggregatorConfig) -> Result<Self> {
        config.validate()?;
        check_known_sources(&registry, &config)?;
        let gate = RequestGate::new(config.max_concurrency, config.retry.clone());
        Ok(Self {
            inner: Arc::new(ServiceInner {
                registry,
                runtime: RwLock::new(Arc::new(Runtime::build(config, gate))),
            }),
        })
    }

    fn runtime(&self) -> Arc<Runtime> {
        let guard = self
            .inner
            .runtime
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> AggregatorConfig {
        self.runtime().config.clone()
    }

    /// Resolve per-source tags without fetching anything.
    pub async fn discover(
        &self,
        name: &str,
        context: Option<&str>,
        mode: SafetyMode,
    ) -> Result<Arc<ResolvedQuerySet>> {
        let runtime = self.runtime();
        let sources = runtime.sources_for(&self.inner.registry, mode);
        runtime
            .discovery
            .discover(name, context, &sources, &runtime.gate)
            .await
    }

    /// Resolve tags, then fetch until `desired_count` ranked items exist or
    /// every source is exhausted.
    ///
    /// An identical query within the session TTL reuses the cached session.
    /// Source failures never fail this call; they show up in
    /// [`SessionHandle::source_status`].
    pub async fn discover_and_search(
        &self,
        entity_name: &str,
        context: Option<&str>,
        safety_mode: SafetyMode,
        desired_count: usize,
    ) -> Result<SessionHandle> {
        let query = NormalizedQuery::new(entity_name, context);
        if query.full.is_empty() {
            return Err(AggregatorError::InvalidInput(format!(
                "entity name '{}' is empty after normalisation",
                entity_name.trim()
            )));
        }

        let runtime = self.runtime();
        let sources = runtime.sources_for(&self.inner.registry, safety_mode);
        if sources.is_empty() {
            return Err(AggregatorError::Config(format!(
                "no enabled source can be queried in {} mode",
                safety_mode.as_str()
            )));
        }

        let key = QueryKey::new(&query, safety_mode, &sources);

        let session = match runtime.sessions.get(&key).await {
            Some(session) => {
                debug!(name = %key.name, mode = safety_mode.as_str(), "reusing cached session");
                session
            }
            None => {
                let resolved = runtime
                    .discovery
                    .discover(entity_name, context, &sources, &runtime.gate)
                    .await?;
                let settings = SessionSettings::from_config(&runtime.config, runtime.gate.clone());
                runtime
                    .sessions
                    .get_with(key, async {
                        info!(
                            name = %resolved.name,
                            mode = safety_mode.as_str(),
                            sources = sources.len(),
                            "new session"
                        );
                        Arc::new(AggregationSession::new(
                            resolved,
                            &sources,
                            safety_mode,
                            settings,
                        ))
                    })
                    .await
            }
        };

        session.fill(desired_count).await;
        Ok(SessionHandle::new(session))
    }

    /// Swap in a new configuration.
    ///
    /// Cached sessions and tag resolutions are dropped. The concurrency gate
    /// is rebuilt only when the ceiling changed.
    pub fn reload(&self, config: AggregatorConfig) -> Result<()> {
        config.validate()?;
        check_known_sources(&self.inner.registry, &config)?;
        let mut guard = self
            .inner
            .runtime
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let gate = if guard.config.max_concurrency == config.max_concurrency {
            guard.gate.with_policy(config.retry.clone())
        } else {
            RequestGate::new(config.max_concurrency, config.retry.clone())
        };
        guard.sessions.invalidate_all();
        guard.discovery.invalidate_all();

        info!(
            max_concurrency = config.max_concurrency,
            max_pages = config.max_pages_per_source,
            "configuration reloaded"
        );
        *guard = Arc::new(Runtime::build(config, gate));
        Ok(())
    }

    /// Drop the cached session for one query under the current source set.
    pub async fn invalidate(&self, entity_name: &str, context: Option<&str>, mode: SafetyMode) {
        let query = NormalizedQuery::new(entity_name, context);
        let runtime = self.runtime();
        let sources = runtime.sources_for(&self.inner.registry, mode);
        runtime
            .sessions
            .invalidate(&QueryKey::new(&query, mode, &sources))
            .await;
    }

    pub fn invalidate_all(&self) {
        let runtime = self.runtime();
        runtime.sessions.invalidate_all();
        runtime.discovery.invalidate_all();
    }

    /// Approximate number of cached sessions.
    pub fn cached_sessions(&self) -> u64 {
        self.runtime().sessions.entry_count()
    }
}

impl std::fmt::Debug for AggregationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregationService")
            .field("sources", &self.inner.registry.ids())
            .finish()
    }
}
