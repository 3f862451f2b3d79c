//! Federated image search across every registered source.
//!
//! This module provides:
//! - `AggregationService`: tag discovery, fetching, ranking and session caching
//! - `SessionHandle`: paged, idempotent access to one query's results
//! - `SourceProfile`: named source groups for common searches
//!
//! # Example
//!
//! ```ignore
//! use tagweave_core::{build_registry_enabled_only, AggregationService, AggregatorConfig, SafetyMode};
//!
//! let config = AggregatorConfig::default();
//! let registry = build_registry_enabled_only(&config)?;
//! let service = AggregationService::new(registry, config)?;
//! let session = service
//!     .discover_and_search("Anya", Some("Spy x Family"), SafetyMode::Safe, 40)
//!     .await?;
//! let first = session.page(0, 20).await;
//! ```

mod engine;
pub mod merge;
mod profiles;
mod service;
mod session;
mod types;

pub use merge::{dedup_and_rank, is_admitted, rank_new, Deduper};
pub use profiles::{ProfileStore, ProfileStoreError, SourceProfile};
pub use service::AggregationService;
pub use session::SessionHandle;
pub use types::{
    FetchStatus, Item, Page, ResolvedQuerySet, ResolvedTags, SafetyMode, SafetyRating,
    SearchOutcome, SessionSummary, SourceHealth, SourceStatus, TagCandidate, TagLookup,
};
