//! Core types shared by adapters, discovery and the aggregation engine.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// Normalised safety classification of a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyRating {
    Safe,
    Restricted,
    /// The source exposes no safety signal for this item
    Unknown,
}

/// What the caller has opted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyMode {
    /// Only items rated safe
    #[default]
    Safe,
    /// Safe items plus items without a rating
    AllowUnknown,
    /// Everything that passes the blocklist
    Unrestricted,
}

impl SafetyMode {
    pub fn allows_restricted(self) -> bool {
        matches!(self, SafetyMode::Unrestricted)
    }

    pub fn admits(self, rating: SafetyRating) -> bool {
        match (self, rating) {
            (_, SafetyRating::Safe) => true,
            (SafetyMode::Safe, _) => false,
            (SafetyMode::AllowUnknown, SafetyRating::Unknown) => true,
            (SafetyMode::AllowUnknown, SafetyRating::Restricted) => false,
            (SafetyMode::Unrestricted, _) => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SafetyMode::Safe => "safe",
            SafetyMode::AllowUnknown => "allow_unknown",
            SafetyMode::Unrestricted => "unrestricted",
        }
    }
}

impl std::str::FromStr for SafetyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "safe" => Ok(SafetyMode::Safe),
            "allow_unknown" | "unknown" => Ok(SafetyMode::AllowUnknown),
            "unrestricted" | "all" => Ok(SafetyMode::Unrestricted),
            other => Err(format!(
                "unknown safety mode '{}' (expected safe, allow-unknown or unrestricted)",
                other
            )),
        }
    }
}

/// One piece of content from one source, normalised.
///
/// Items are immutable once produced and are shared as `Arc<Item>` between
/// the accumulator, the ranked list and callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Source that produced the item
    pub source_id: String,

    /// Identity within the source (post id)
    pub canonical_id: String,

    /// Direct URL of the full-size content
    pub content_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,

    /// Page on the source describing the item
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_page_url: Option<String>,

    /// Artist, uploader or original source, whichever the index exposes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,

    pub tags: BTreeSet<String>,

    pub safety_rating: SafetyRating,

    /// Source-local popularity signal (score, favourites)
    pub quality_score: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl Item {
    pub fn new(
        source_id: impl Into<String>,
        canonical_id: impl Into<String>,
        content_url: impl Into<String>,
        safety_rating: SafetyRating,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            canonical_id: canonical_id.into(),
            content_url: content_url.into(),
            preview_url: None,
            origin_page_url: None,
            attribution: None,
            tags: BTreeSet::new(),
            safety_rating,
            quality_score: 0.0,
            width: None,
            height: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_quality(mut self, score: f64) -> Self {
        self.quality_score = score;
        self
    }

    pub fn with_preview(mut self, url: Option<String>) -> Self {
        self.preview_url = url;
        self
    }

    pub fn with_origin_page(mut self, url: Option<String>) -> Self {
        self.origin_page_url = url;
        self
    }

    pub fn with_attribution(mut self, attribution: Option<String>) -> Self {
        self.attribution = attribution.filter(|a| !a.trim().is_empty());
        self
    }

    pub fn with_dimensions(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

/// A tag suggested by a source's tag index, with its discovery score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagCandidate {
    pub source_id: String,
    pub tag_string: String,
    pub popularity_count: u64,
    /// Filled in by discovery; adapters leave it at zero
    #[serde(default)]
    pub match_score: f64,
}

impl TagCandidate {
    pub fn new(source_id: impl Into<String>, tag: impl Into<String>, popularity: u64) -> Self {
        Self {
            source_id: source_id.into(),
            tag_string: tag.into(),
            popularity_count: popularity,
            match_score: 0.0,
        }
    }
}

/// Tags chosen for one source, primary first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTags {
    pub tags: Vec<String>,

    /// Scored candidates that produced `tags` (empty when falling back)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<TagCandidate>,

    /// No candidate cleared the threshold, or the source has no tag index
    pub used_fallback: bool,
}

/// Per-source ordered tag lists produced by discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedQuerySet {
    /// Normalised entity name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    pub sources: BTreeMap<String, ResolvedTags>,
}

impl ResolvedQuerySet {
    pub fn tags_for(&self, source_id: &str) -> &[String] {
        self.sources
            .get(source_id)
            .map(|r| r.tags.as_slice())
            .unwrap_or(&[])
    }
}

/// Outcome classification of one adapter call.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchStatus {
    Ok,
    Transient(SourceError),
    Permanent(SourceError),
}

impl FetchStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, FetchStatus::Ok)
    }

    pub fn error(&self) -> Option<&SourceError> {
        match self {
            FetchStatus::Ok => None,
            FetchStatus::Transient(e) | FetchStatus::Permanent(e) => Some(e),
        }
    }
}

impl From<SourceError> for FetchStatus {
    fn from(err: SourceError) -> Self {
        if err.is_retryable() {
            FetchStatus::Transient(err)
        } else {
            FetchStatus::Permanent(err)
        }
    }
}

/// Result of `SourceAdapter::search`.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub items: Vec<Item>,
    pub status: FetchStatus,
}

impl SearchOutcome {
    pub fn ok(items: Vec<Item>) -> Self {
        Self {
            items,
            status: FetchStatus::Ok,
        }
    }

    pub fn failed(err: SourceError) -> Self {
        Self {
            items: Vec::new(),
            status: err.into(),
        }
    }
}

/// Result of `SourceAdapter::lookup_tags`.
#[derive(Debug, Clone)]
pub struct TagLookup {
    pub candidates: Vec<TagCandidate>,
    pub status: FetchStatus,
}

impl TagLookup {
    pub fn ok(candidates: Vec<TagCandidate>) -> Self {
        Self {
            candidates,
            status: FetchStatus::Ok,
        }
    }

    pub fn failed(err: SourceError) -> Self {
        Self {
            candidates: Vec::new(),
            status: err.into(),
        }
    }
}

/// Coarse health of one source within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Ok,
    Degraded,
    Failed,
}

/// Page-level counters behind a [`SourceStatus`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceHealth {
    pub pages_ok: u32,
    pub pages_failed: u32,
    pub pages_cancelled: u32,
    pub items: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SourceHealth {
    /// A source that never returned a page is `Failed`, whether its pages
    /// errored out or ran past the deadline.
    pub fn status(&self) -> SourceStatus {
        if self.pages_ok == 0 && self.pages_failed + self.pages_cancelled > 0 {
            SourceStatus::Failed
        } else if self.pages_failed > 0 || self.pages_cancelled > 0 {
            SourceStatus::Degraded
        } else {
            SourceStatus::Ok
        }
    }

    pub(crate) fn record_failure(&mut self, err: &SourceError) {
        self.pages_failed += 1;
        self.last_error = Some(err.to_string());
    }
}

/// One window of the ranked list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub items: Vec<Arc<Item>>,
    pub has_more: bool,
}

/// Serializable snapshot of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    pub safety_mode: SafetyMode,
    pub total_items: usize,
    pub exhausted: bool,
    pub rounds: u32,
    pub created_at: DateTime<Utc>,
    pub source_status: BTreeMap<String, SourceStatus>,
    pub health: BTreeMap<String, SourceHealth>,
    pub resolved: ResolvedQuerySet,
}

impl SessionSummary {
    /// Every source that was queried failed outright.
    pub fn all_failed(&self) -> bool {
        !self.source_status.is_empty()
            && self
                .source_status
                .values()
                .all(|s| *s == SourceStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safety_mode_admits() {
        assert!(SafetyMode::Safe.admits(SafetyRating::Safe));
        assert!(!SafetyMode::Safe.admits(SafetyRating::Unknown));
        assert!(!SafetyMode::Safe.admits(SafetyRating::Restricted));

        assert!(SafetyMode::AllowUnknown.admits(SafetyRating::Unknown));
        assert!(!SafetyMode::AllowUnknown.admits(SafetyRating::Restricted));

        assert!(SafetyMode::Unrestricted.admits(SafetyRating::Restricted));
        assert!(SafetyMode::Unrestricted.admits(SafetyRating::Unknown));
    }

    #[test]
    fn test_safety_mode_parse() {
        assert_eq!("safe".parse::<SafetyMode>(), Ok(SafetyMode::Safe));
        assert_eq!(
            "allow-unknown".parse::<SafetyMode>(),
            Ok(SafetyMode::AllowUnknown)
        );
        assert_eq!(
            "Unrestricted".parse::<SafetyMode>(),
            Ok(SafetyMode::Unrestricted)
        );
        assert!("nsfw-ish".parse::<SafetyMode>().is_err());
    }

    #[test]
    fn test_health_status() {
        let mut health = SourceHealth::default();
        assert_eq!(health.status(), SourceStatus::Ok);

        health.record_failure(&SourceError::Transient("timeout".into()));
        assert_eq!(health.status(), SourceStatus::Failed);

        health.pages_ok = 2;
        assert_eq!(health.status(), SourceStatus::Degraded);

        let cancelled = SourceHealth {
            pages_ok: 1,
            pages_cancelled: 1,
            ..Default::default()
        };
        assert_eq!(cancelled.status(), SourceStatus::Degraded);

        let timed_out = SourceHealth {
            pages_cancelled: 2,
            ..Default::default()
        };
        assert_eq!(timed_out.status(), SourceStatus::Failed);
    }

    #[test]
    fn test_fetch_status_from_error() {
        assert!(matches!(
            FetchStatus::from(SourceError::RateLimited { retry_after: None }),
            FetchStatus::Transient(_)
        ));
        assert!(matches!(
            FetchStatus::from(SourceError::MalformedResponse("x".into())),
            FetchStatus::Permanent(_)
        ));
    }

    #[test]
    fn test_item_builder() {
        let item = Item::new("danbooru", "42", "https://cdn/a.jpg", SafetyRating::Safe)
            .with_tags(["anya_(spy_x_family)", "smile"])
            .with_quality(17.0)
            .with_attribution(Some("  ".to_string()))
            .with_dimensions(Some(800), Some(600));

        assert_eq!(item.tags.len(), 2);
        assert_eq!(item.quality_score, 17.0);
        assert!(item.attribution.is_none());
        assert_eq!(item.width, Some(800));
    }
}
