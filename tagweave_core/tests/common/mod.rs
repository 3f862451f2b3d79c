#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tagweave_core::capabilities::{SafetyTier, SourceDescriptor};
use tagweave_core::error::SourceError;
use tagweave_core::federated::{SearchOutcome, TagCandidate, TagLookup};
use tagweave_core::retry::RetryPolicy;
use tagweave_core::{AggregatorConfig, Item, SafetyRating, SourceAdapter, SourceRegistry};

/// How a mock answers `search`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Normal,
    AlwaysTransient,
    AlwaysPermanent,
    /// Never answers
    Hang,
}

/// In-process source with a fixed catalogue, instrumented for tests.
pub struct MockSource {
    descriptor: SourceDescriptor,
    catalogue: HashMap<String, Vec<Item>>,
    tag_index: Vec<TagCandidate>,
    behavior: Behavior,
    broken_tags: HashSet<String>,
    delay: Duration,
    in_flight: Arc<AtomicU32>,
    peak: Arc<AtomicU32>,
    search_calls: AtomicU32,
    lookup_calls: AtomicU32,
    calls: Mutex<Vec<(String, u32)>>,
}

impl MockSource {
    pub fn new(id: &str) -> Self {
        Self {
            descriptor: SourceDescriptor::new(id, format!("mock {}", id)),
            catalogue: HashMap::new(),
            tag_index: Vec::new(),
            behavior: Behavior::Normal,
            broken_tags: HashSet::new(),
            delay: Duration::ZERO,
            in_flight: Arc::new(AtomicU32::new(0)),
            peak: Arc::new(AtomicU32::new(0)),
            search_calls: AtomicU32::new(0),
            lookup_calls: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// `count` safe items for `tag`, quality descending with position.
    pub fn with_items(mut self, tag: &str, count: usize) -> Self {
        let id = self.descriptor.id.clone();
        let items = (0..count)
            .map(|i| {
                Item::new(
                    id.clone(),
                    format!("{}-{}", tag, i),
                    format!("https://{}.test/{}/{}.png", id, tag, i),
                    SafetyRating::Safe,
                )
                .with_quality((count - i) as f64)
                .with_tags([tag.to_string()])
            })
            .collect();
        self.catalogue.insert(tag.to_string(), items);
        self
    }

    pub fn with_catalogue(mut self, tag: &str, items: Vec<Item>) -> Self {
        self.catalogue.insert(tag.to_string(), items);
        self
    }

    pub fn with_tag_index(mut self, tags: &[(&str, u64)]) -> Self {
        self.descriptor = self.descriptor.with_tag_index(true);
        self.tag_index = tags
            .iter()
            .map(|(tag, count)| TagCandidate::new(self.descriptor.id.clone(), *tag, *count))
            .collect();
        self
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Searches for `tag` fail permanently whatever the behavior.
    pub fn with_broken_tag(mut self, tag: &str) -> Self {
        self.broken_tags.insert(tag.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn restricted(mut self) -> Self {
        self.descriptor = self
            .descriptor
            .with_elevated_context(true)
            .with_safety_tier(SafetyTier::Restricted);
        self
    }

    /// Share in-flight counters with other mocks.
    pub fn with_counters(mut self, in_flight: Arc<AtomicU32>, peak: Arc<AtomicU32>) -> Self {
        self.in_flight = in_flight;
        self.peak = peak;
        self
    }

    pub fn search_calls(&self) -> u32 {
        self.search_calls.load(Ordering::SeqCst)
    }

    /// Every (tag, page) searched, in call order.
    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().unwrap().clone()
    }

    /// Pages searched for `tag`, sorted.
    pub fn pages_for(&self, tag: &str) -> Vec<u32> {
        let mut pages: Vec<u32> = self
            .calls()
            .into_iter()
            .filter(|(t, _)| t == tag)
            .map(|(_, page)| page)
            .collect();
        pages.sort_unstable();
        pages
    }

    pub fn lookup_calls(&self) -> u32 {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> u32 {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for MockSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn search(&self, tag: &str, page: u32, limit: u32, _allow_restricted: bool) -> SearchOutcome {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push((tag.to_string(), page));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = match self.behavior {
            _ if self.broken_tags.contains(tag) => {
                SearchOutcome::failed(SourceError::Permanent(format!("tag {} is gone", tag)))
            }
            Behavior::Normal => {
                let items = self.catalogue.get(tag).cloned().unwrap_or_default();
                let start = (page * limit) as usize;
                SearchOutcome::ok(
                    items
                        .into_iter()
                        .skip(start)
                        .take(limit as usize)
                        .collect(),
                )
            }
            Behavior::AlwaysTransient => {
                SearchOutcome::failed(SourceError::Transient("connection timed out".into()))
            }
            Behavior::AlwaysPermanent => {
                SearchOutcome::failed(SourceError::Permanent("upstream returned 404".into()))
            }
            Behavior::Hang => std::future::pending().await,
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn lookup_tags(&self, prefix: &str, limit: u32) -> TagLookup {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        if !self.descriptor.supports_tag_index {
            return TagLookup::failed(SourceError::Permanent("no tag index".into()));
        }
        TagLookup::ok(
            self.tag_index
                .iter()
                .filter(|c| c.tag_string.starts_with(prefix))
                .take(limit as usize)
                .cloned()
                .collect(),
        )
    }
}

/// Defaults with fast retries and no deadline.
pub fn test_config() -> AggregatorConfig {
    AggregatorConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            factor: 2.0,
            max_delay_ms: 2,
            jitter: false,
        },
        per_page_limit: 5,
        session_deadline_ms: None,
        ..AggregatorConfig::default()
    }
}

pub fn registry_of(sources: &[Arc<MockSource>]) -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    for source in sources {
        registry.register(Arc::clone(source) as Arc<dyn SourceAdapter>);
    }
    registry
}
