//! Tag discovery: turn a free-text entity name into the tags each source
//! actually understands.
//!
//! Every source with a tag index is asked about every query variant; the
//! returned candidates are scored, the best [`scoring::TOP_K`] above
//! [`scoring::MIN_MATCH_SCORE`] are kept, and sources with nothing usable
//! fall back to the normalised name. Results are cached with a TTL.

pub mod scoring;
pub mod variants;

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use moka::future::Cache;
use tracing::{debug, info};

use crate::connectors::SourceAdapter;
use crate::error::{AggregatorError, Result};
use crate::federated::{ResolvedQuerySet, ResolvedTags, TagCandidate, TagLookup};
use crate::retry::{RequestGate, RetryDecision};

pub use scoring::{score, ScoreBreakdown, MIN_MATCH_SCORE, TOP_K};
pub use variants::{generate_variants, NormalizedQuery, MAX_VARIANTS};

/// Candidates requested per lookup call.
const LOOKUP_LIMIT: u32 = 20;

const MAX_CACHED_RESOLUTIONS: u64 = 512;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DiscoveryKey {
    name: String,
    context: Option<String>,
    source_hash: u64,
}

/// Order-independent hash of a set of source ids.
pub(crate) fn hash_source_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> u64 {
    let mut sorted: Vec<&str> = ids.into_iter().collect();
    sorted.sort_unstable();
    sorted.dedup();
    let mut hasher = DefaultHasher::new();
    for id in sorted {
        id.hash(&mut hasher);
    }
    hasher.finish()
}

/// Tag discovery with a TTL cache of resolved query sets.
#[derive(Clone)]
pub struct TagDiscovery {
    cache: Cache<DiscoveryKey, Arc<ResolvedQuerySet>>,
}

impl TagDiscovery {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(MAX_CACHED_RESOLUTIONS)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Resolve tags for `sources`, reusing a cached resolution when one exists.
    ///
    /// Concurrent calls for the same key share a single resolution.
    pub async fn discover(
        &self,
        name: &str,
        context: Option<&str>,
        sources: &[Arc<dyn SourceAdapter>],
        gate: &RequestGate,
    ) -> Result<Arc<ResolvedQuerySet>> {
        let query = NormalizedQuery::new(name, context);
        if query.full.is_empty() {
            return Err(AggregatorError::InvalidInput(
                "entity name is empty after normalisation".into(),
            ));
        }

        let key = DiscoveryKey {
            name: query.full.clone(),
            context: query.context.clone(),
            source_hash: hash_source_ids(sources.iter().map(|s| s.id())),
        };
        if self.cache.contains_key(&key) {
            debug!(name = %query.full, "tag discovery cache hit");
        }

        let resolved = self
            .cache
            .get_with(key, async { Arc::new(resolve(&query, sources, gate).await) })
            .await;
        Ok(resolved)
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

/// Uncached resolution.
pub async fn resolve(
    query: &NormalizedQuery,
    sources: &[Arc<dyn SourceAdapter>],
    gate: &RequestGate,
) -> ResolvedQuerySet {
    let variants = variants::variants_for(query);
    let fallback = query.full.clone();

    let indexed: Vec<&Arc<dyn SourceAdapter>> = sources
        .iter()
        .filter(|s| s.descriptor().supports_tag_index)
        .collect();

    let lookups = indexed.iter().flat_map(|source| {
        variants.iter().map(move |variant| async move {
            let (lookup, attempts) = gate
                .call(
                    |l: &TagLookup| RetryDecision::from_status(&l.status),
                    |_| source.lookup_tags(variant, LOOKUP_LIMIT),
                )
                .await;
            (source.id(), variant.as_str(), lookup, attempts)
        })
    });

    let mut gathered: HashMap<&str, Vec<TagCandidate>> = HashMap::new();
    for (source_id, variant, lookup, attempts) in join_all(lookups).await {
        let Some(lookup) = lookup else { continue };
        match lookup.status.error() {
            None => gathered
                .entry(source_id)
                .or_default()
                .extend(lookup.candidates),
            Some(err) => debug!(
                source = %source_id,
                variant,
                attempts,
                error = %err,
                "tag lookup failed"
            ),
        }
    }

    let mut resolved = BTreeMap::new();
    for source in sources {
        let id = source.id();
        let candidates = gathered.remove(id).unwrap_or_default();
        let tags = select_tags(query, candidates);

        let entry = if tags.is_empty() {
            ResolvedTags {
                tags: vec![fallback.clone()],
                candidates: Vec::new(),
                used_fallback: true,
            }
        } else {
            ResolvedTags {
                tags: tags.iter().map(|c| c.tag_string.clone()).collect(),
                candidates: tags,
                used_fallback: false,
            }
        };
        debug!(source = %id, tags = ?entry.tags, fallback = entry.used_fallback, "resolved tags");
        resolved.insert(id.to_string(), entry);
    }

    info!(
        name = %query.full,
        sources = resolved.len(),
        "tag discovery complete"
    );

    ResolvedQuerySet {
        name: query.full.clone(),
        context: query.context.clone(),
        sources: resolved,
    }
}

/// Score, threshold and rank one source's candidates.
pub fn select_tags(query: &NormalizedQuery, candidates: Vec<TagCandidate>) -> Vec<TagCandidate> {
    // The same tag comes back from several variant lookups.
    let mut unique: HashMap<String, TagCandidate> = HashMap::new();
    for candidate in candidates {
        if candidate.tag_string.trim().is_empty() {
            continue;
        }
        match unique.get_mut(&candidate.tag_string) {
            Some(existing) if existing.popularity_count >= candidate.popularity_count => {}
            Some(existing) => *existing = candidate,
            None => {
                unique.insert(candidate.tag_string.clone(), candidate);
            }
        }
    }

    let targets: Vec<&str> = [
        Some(query.full.as_str()),
        Some(query.base.as_str()),
        query.swapped.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect();

    let mut scored: Vec<TagCandidate> = unique
        .into_values()
        .map(|mut candidate| {
            candidate.match_score = targets
                .iter()
                .map(|target| {
                    score(
                        &candidate.tag_string,
                        target,
                        query.context.as_deref(),
                        candidate.popularity_count,
                    )
                })
                .fold(f64::MIN, f64::max);
            candidate
        })
        .filter(|c| c.match_score >= MIN_MATCH_SCORE)
        .collect();

    scored.sort_by(|a, b| {
        b.match_score
            .partial_cmp(&a.match_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.popularity_count.cmp(&a.popularity_count))
            .then_with(|| a.tag_string.cmp(&b.tag_string))
    });
    scored.truncate(TOP_K);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(tag: &str, popularity: u64) -> TagCandidate {
        TagCandidate::new("src", tag, popularity)
    }

    #[test]
    fn test_select_prefers_qualified_tag() {
        let query = NormalizedQuery::new("Anya", Some("Spy x Family"));
        let picked = select_tags(
            &query,
            vec![
                candidate("anya_(spy_x_family)", 12_000),
                candidate("anya", 300),
                candidate("anyamaru", 2),
            ],
        );
        assert_eq!(picked[0].tag_string, "anya_(spy_x_family)");
        assert!(picked.iter().all(|c| c.match_score >= MIN_MATCH_SCORE));
        assert!(!picked.iter().any(|c| c.tag_string == "anyamaru"));
    }

    #[test]
    fn test_select_keeps_at_most_top_k() {
        let query = NormalizedQuery::new("Anya", None);
        let many = (0..20).map(|i| candidate(&format!("anya_{}", i), 1_000 + i)).collect();
        let picked = select_tags(&query, many);
        assert_eq!(picked.len(), TOP_K);
        assert_eq!(picked[0].tag_string, "anya_19");
    }

    #[test]
    fn test_duplicates_keep_highest_popularity() {
        let query = NormalizedQuery::new("Anya", None);
        let picked = select_tags(&query, vec![candidate("anya", 5), candidate("anya", 50_000)]);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].popularity_count, 50_000);
    }

    #[test]
    fn test_swapped_name_matches() {
        let query = NormalizedQuery::new("Forger Anya", None);
        let picked = select_tags(&query, vec![candidate("anya_forger", 100)]);
        assert_eq!(picked.len(), 1);
    }

    #[test]
    fn test_source_hash_is_order_independent() {
        assert_eq!(
            hash_source_ids(["danbooru", "gelbooru"]),
            hash_source_ids(["gelbooru", "danbooru"])
        );
        assert_ne!(hash_source_ids(["danbooru"]), hash_source_ids(["gelbooru"]));
    }
}
