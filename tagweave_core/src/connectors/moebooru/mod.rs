//! Moebooru boards (Konachan, yande.re): `/post.json` and `/tag.json`.

use async_trait::async_trait;
use serde::Deserialize;

use crate::capabilities::{SafetyTier, SourceDescriptor};
use crate::config::SourceSettings;
use crate::connectors::http::{base_url, endpoint, get_text, parse_json};
use crate::connectors::SourceAdapter;
use crate::error::AggregatorError;
use crate::federated::{Item, SafetyRating, SearchOutcome, TagCandidate, TagLookup};
use crate::utils::{absolutize_url, split_tag_string};

const MAX_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy)]
pub struct MoebooruSite {
    pub id: &'static str,
    pub description: &'static str,
    pub default_base_url: &'static str,
}

pub const KONACHAN: MoebooruSite = MoebooruSite {
    id: "konachan",
    description: "Konachan wallpaper board",
    default_base_url: "https://konachan.com/",
};

pub const YANDERE: MoebooruSite = MoebooruSite {
    id: "yandere",
    description: "yande.re high-resolution scan board",
    default_base_url: "https://yande.re/",
};

#[derive(Debug, Deserialize)]
struct MoebooruPost {
    id: u64,
    #[serde(default)]
    file_url: Option<String>,
    #[serde(default)]
    jpeg_url: Option<String>,
    #[serde(default)]
    preview_url: Option<String>,
    #[serde(default)]
    rating: Option<String>,
    #[serde(default)]
    tags: String,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MoebooruTag {
    name: String,
    #[serde(default)]
    count: u64,
}

pub struct MoebooruSource {
    client: reqwest::Client,
    base: url::Url,
    site: MoebooruSite,
    descriptor: SourceDescriptor,
}

impl MoebooruSource {
    pub fn new(
        site: MoebooruSite,
        client: reqwest::Client,
        settings: &SourceSettings,
    ) -> Result<Self, AggregatorError> {
        Ok(Self {
            client,
            base: base_url(settings.base_url.as_deref(), site.default_base_url)?,
            site,
            descriptor: SourceDescriptor::new(site.id, site.description)
                .with_tag_index(true)
                .with_safety_tier(SafetyTier::Mixed),
        })
    }

    fn to_item(&self, post: MoebooruPost) -> Option<Item> {
        let content_url = post
            .file_url
            .as_deref()
            .or(post.jpeg_url.as_deref())
            .and_then(|u| absolutize_url(&self.base, u))?;
        let preview = post
            .preview_url
            .as_deref()
            .and_then(|u| absolutize_url(&self.base, u));
        let origin = self
            .base
            .join(&format!("post/show/{}", post.id))
            .ok()
            .map(|u| u.to_string());

        Some(
            Item::new(self.site.id, post.id.to_string(), content_url, rating(post.rating.as_deref()))
                .with_tags(split_tag_string(&post.tags))
                .with_quality(post.score as f64)
                .with_preview(preview)
                .with_origin_page(origin)
                .with_attribution(post.source.filter(|s| !s.is_empty()).or(post.author))
                .with_dimensions(post.width, post.height),
        )
    }
}

fn rating(code: Option<&str>) -> SafetyRating {
    match code.map(|c| c.trim().to_ascii_lowercase()).as_deref() {
        Some("s" | "safe") => SafetyRating::Safe,
        Some("q" | "e" | "questionable" | "explicit") => SafetyRating::Restricted,
        _ => SafetyRating::Unknown,
    }
}

#[async_trait]
impl SourceAdapter for MoebooruSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn search(&self, tag: &str, page: u32, limit: u32, allow_restricted: bool) -> SearchOutcome {
        let tags = if allow_restricted {
            tag.to_string()
        } else {
            format!("{} rating:s", tag)
        };
        let query = [
            ("tags", tags),
            ("page", (page + 1).to_string()),
            ("limit", limit.clamp(1, MAX_LIMIT).to_string()),
        ];

        let url = match endpoint(&self.base, "post.json", &query) {
            Ok(url) => url,
            Err(e) => return SearchOutcome::failed(e),
        };
        let body = match get_text(&self.client, url, self.site.id).await {
            Ok(body) => body,
            Err(e) => return SearchOutcome::failed(e),
        };
        match parse_json::<Vec<MoebooruPost>>(&body) {
            Ok(posts) => {
                SearchOutcome::ok(posts.into_iter().filter_map(|p| self.to_item(p)).collect())
            }
            Err(e) => SearchOutcome::failed(e),
        }
    }

    async fn lookup_tags(&self, prefix: &str, limit: u32) -> TagLookup {
        let query = [
            ("name", format!("{}*", prefix)),
            ("order", "count".to_string()),
            ("limit", limit.clamp(1, MAX_LIMIT).to_string()),
        ];
        let url = match endpoint(&self.base, "tag.json", &query) {
            Ok(url) => url,
            Err(e) => return TagLookup::failed(e),
        };
        let body = match get_text(&self.client, url, self.site.id).await {
            Ok(body) => body,
            Err(e) => return TagLookup::failed(e),
        };
        match parse_json::<Vec<MoebooruTag>>(&body) {
            Ok(tags) => TagLookup::ok(
                tags.into_iter()
                    .map(|t| TagCandidate::new(self.site.id, t.name, t.count))
                    .collect(),
            ),
            Err(e) => TagLookup::failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_conversion_prefers_file_url() {
        let source =
            MoebooruSource::new(YANDERE, reqwest::Client::new(), &SourceSettings::default())
                .unwrap();
        let post: MoebooruPost = serde_json::from_str(
            r#"{"id": 77, "file_url": "https://files.yande.re/image/x.png",
                "jpeg_url": "https://files.yande.re/jpeg/x.jpg",
                "rating": "s", "tags": "anya_forger spy_x_family", "score": 12,
                "author": "uploader", "source": ""}"#,
        )
        .unwrap();
        let item = source.to_item(post).unwrap();
        assert_eq!(item.content_url, "https://files.yande.re/image/x.png");
        assert_eq!(item.safety_rating, SafetyRating::Safe);
        assert_eq!(item.attribution.as_deref(), Some("uploader"));
        assert_eq!(
            item.origin_page_url.as_deref(),
            Some("https://yande.re/post/show/77")
        );
    }

    #[test]
    fn test_rating_values() {
        assert_eq!(rating(Some("q")), SafetyRating::Restricted);
        assert_eq!(rating(None), SafetyRating::Unknown);
    }
}
