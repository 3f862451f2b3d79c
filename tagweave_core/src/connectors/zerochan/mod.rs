use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::capabilities::{SafetyTier, SourceDescriptor};
use crate::config::SourceSettings;
use crate::connectors::http::{base_url, endpoint, get_text, parse_json};
use crate::connectors::SourceAdapter;
use crate::error::AggregatorError;
use crate::federated::{Item, SafetyRating, SearchOutcome};
use crate::utils::{normalize_tag, title_case_tag};

pub const SOURCE_ID: &str = "zerochan";
const DEFAULT_BASE_URL: &str = "https://www.zerochan.net/";
const MAX_LIMIT: u32 = 250;

// https://s1.zerochan.net/Anya.Forger.240.3612345.jpg
static THUMBNAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://s\d+\.zerochan\.net/(?P<name>.+)\.\d+\.(?P<id>\d+)\.(?P<ext>\w+)$").unwrap()
});

#[derive(Debug, Deserialize)]
struct ListingResponse {
    #[serde(default)]
    items: Vec<ZerochanEntry>,
}

#[derive(Debug, Deserialize)]
struct ZerochanEntry {
    id: u64,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    fav: Option<i64>,
}

/// Zerochan's JSON listing. No tag index and no per-item rating.
pub struct ZerochanSource {
    client: reqwest::Client,
    base: url::Url,
    descriptor: SourceDescriptor,
}

impl ZerochanSource {
    pub fn new(client: reqwest::Client, settings: &SourceSettings) -> Result<Self, AggregatorError> {
        Ok(Self {
            client,
            base: base_url(settings.base_url.as_deref(), DEFAULT_BASE_URL)?,
            descriptor: SourceDescriptor::new(SOURCE_ID, "Zerochan anime image board")
                .with_tag_index(false)
                .with_safety_tier(SafetyTier::Safe),
        })
    }

    fn to_item(&self, entry: ZerochanEntry) -> Option<Item> {
        let thumbnail = entry.thumbnail.filter(|t| !t.is_empty())?;
        let content_url = full_size_url(&thumbnail).unwrap_or_else(|| thumbnail.clone());
        let origin = self.base.join(&entry.id.to_string()).ok().map(|u| u.to_string());

        Some(
            Item::new(SOURCE_ID, entry.id.to_string(), content_url, SafetyRating::Unknown)
                .with_tags(entry.tags.iter().map(|t| normalize_tag(t)).filter(|t| !t.is_empty()))
                .with_quality(entry.fav.unwrap_or(0) as f64)
                .with_preview(Some(thumbnail))
                .with_origin_page(origin)
                .with_attribution(entry.source)
                .with_dimensions(entry.width, entry.height),
        )
    }
}

/// Rewrite a listing thumbnail into the full-size static URL.
fn full_size_url(thumbnail: &str) -> Option<String> {
    let caps = THUMBNAIL.captures(thumbnail)?;
    Some(format!(
        "https://static.zerochan.net/{}.full.{}.{}",
        caps.name("name")?.as_str(),
        caps.name("id")?.as_str(),
        caps.name("ext")?.as_str()
    ))
}

#[async_trait]
impl SourceAdapter for ZerochanSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn search(&self, tag: &str, page: u32, limit: u32, _allow_restricted: bool) -> SearchOutcome {
        // Zerochan addresses tags by display name: /Anya+Forger
        let path = urlencoding::encode(&title_case_tag(tag)).replace("%20", "+");
        let query = [
            ("json", String::new()),
            ("p", (page + 1).to_string()),
            ("l", limit.clamp(1, MAX_LIMIT).to_string()),
        ];
        let url = match endpoint(&self.base, &path, &query) {
            Ok(url) => url,
            Err(e) => return SearchOutcome::failed(e),
        };
        let body = match get_text(&self.client, url, SOURCE_ID).await {
            Ok(body) => body,
            Err(e) => return SearchOutcome::failed(e),
        };
        match parse_json::<ListingResponse>(&body) {
            Ok(listing) => SearchOutcome::ok(
                listing
                    .items
                    .into_iter()
                    .filter_map(|e| self.to_item(e))
                    .collect(),
            ),
            Err(e) => SearchOutcome::failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_size_url() {
        assert_eq!(
            full_size_url("https://s1.zerochan.net/Anya.Forger.240.3612345.jpg").as_deref(),
            Some("https://static.zerochan.net/Anya.Forger.full.3612345.jpg")
        );
        assert_eq!(full_size_url("https://example.com/x.jpg"), None);
    }

    #[test]
    fn test_entries_have_unknown_safety_and_normalized_tags() {
        let source = ZerochanSource::new(reqwest::Client::new(), &SourceSettings::default()).unwrap();
        let entry: ZerochanEntry = serde_json::from_str(
            r#"{"id": 3612345, "width": 1000, "height": 1400,
                "thumbnail": "https://s1.zerochan.net/Anya.Forger.240.3612345.jpg",
                "source": "", "tag": "Anya Forger", "tags": ["Anya Forger", "SPY×FAMILY"]}"#,
        )
        .unwrap();
        let item = source.to_item(entry).unwrap();
        assert_eq!(item.safety_rating, SafetyRating::Unknown);
        assert!(item.tags.contains("anya_forger"));
        assert!(item.attribution.is_none());
        assert_eq!(
            item.origin_page_url.as_deref(),
            Some("https://www.zerochan.net/3612345")
        );
    }
}
