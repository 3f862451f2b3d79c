//! Gelbooru and the boards that expose its `index.php?page=dapi` API.
//!
//! The same adapter serves several sites; a [`GelbooruSite`] captures what
//! differs between them (endpoint, tag index, gating).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::capabilities::{SafetyTier, SourceConfigSchema, SourceDescriptor};
use crate::config::SourceSettings;
use crate::connectors::http::{base_url, endpoint, get_text, parse_json};
use crate::connectors::SourceAdapter;
use crate::error::{AggregatorError, SourceError};
use crate::federated::{Item, SafetyRating, SearchOutcome, TagCandidate, TagLookup};
use crate::utils::{absolutize_url, clean_html_entities, split_tag_string};

const MAX_LIMIT: u32 = 100;

/// Static facts about one dapi-compatible board.
#[derive(Debug, Clone, Copy)]
pub struct GelbooruSite {
    pub id: &'static str,
    pub description: &'static str,
    pub default_base_url: &'static str,
    pub tag_index: bool,
    pub requires_elevated_context: bool,
    pub safety_tier: SafetyTier,
    /// Metatag appended when restricted content is not allowed
    pub safe_metatag: Option<&'static str>,
}

pub const GELBOORU: GelbooruSite = GelbooruSite {
    id: "gelbooru",
    description: "Gelbooru image board",
    default_base_url: "https://gelbooru.com/",
    tag_index: true,
    requires_elevated_context: false,
    safety_tier: SafetyTier::Mixed,
    safe_metatag: Some("rating:general"),
};

pub const SAFEBOORU: GelbooruSite = GelbooruSite {
    id: "safebooru",
    description: "Safebooru, general-audience Gelbooru mirror",
    default_base_url: "https://safebooru.org/",
    tag_index: false,
    requires_elevated_context: false,
    safety_tier: SafetyTier::Safe,
    safe_metatag: None,
};

pub const RULE34: GelbooruSite = GelbooruSite {
    id: "rule34",
    description: "Rule34 adult image board",
    default_base_url: "https://api.rule34.xxx/",
    tag_index: false,
    requires_elevated_context: true,
    safety_tier: SafetyTier::Restricted,
    safe_metatag: None,
};

/// Gelbooru wraps posts in an object; its clones return a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PostEnvelope {
    Bare(Vec<GelbooruPost>),
    Wrapped {
        #[serde(default)]
        post: Vec<GelbooruPost>,
    },
}

#[derive(Debug, Deserialize)]
struct GelbooruPost {
    id: u64,
    #[serde(default)]
    file_url: Option<String>,
    #[serde(default)]
    preview_url: Option<String>,
    #[serde(default)]
    rating: Option<String>,
    #[serde(default)]
    tags: String,
    #[serde(default)]
    score: Option<i64>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    owner: Option<String>,
    /// Either a string or a number depending on the site
    #[serde(default)]
    directory: Option<Value>,
    #[serde(default)]
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TagEnvelope {
    Bare(Vec<GelbooruTag>),
    Wrapped {
        #[serde(default)]
        tag: Vec<GelbooruTag>,
    },
}

#[derive(Debug, Deserialize)]
struct GelbooruTag {
    name: String,
    #[serde(default)]
    count: u64,
}

pub struct GelbooruSource {
    client: reqwest::Client,
    base: url::Url,
    site: GelbooruSite,
    user_id: Option<String>,
    api_key: Option<String>,
    descriptor: SourceDescriptor,
}

impl GelbooruSource {
    pub fn new(
        site: GelbooruSite,
        client: reqwest::Client,
        settings: &SourceSettings,
    ) -> Result<Self, AggregatorError> {
        Ok(Self {
            client,
            base: base_url(settings.base_url.as_deref(), site.default_base_url)?,
            site,
            user_id: settings.user_id.clone(),
            api_key: settings.api_key.clone(),
            descriptor: SourceDescriptor::new(site.id, site.description)
                .with_tag_index(site.tag_index)
                .with_elevated_context(site.requires_elevated_context)
                .with_safety_tier(site.safety_tier),
        })
    }

    fn dapi_query(&self, kind: &str) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("page", "dapi".to_string()),
            ("s", kind.to_string()),
            ("q", "index".to_string()),
            ("json", "1".to_string()),
        ];
        if let (Some(user), Some(key)) = (&self.user_id, &self.api_key) {
            query.push(("user_id", user.clone()));
            query.push(("api_key", key.clone()));
        }
        query
    }

    fn content_url(&self, post: &GelbooruPost) -> Option<String> {
        if let Some(url) = post.file_url.as_deref().and_then(|u| absolutize_url(&self.base, u)) {
            return Some(url);
        }
        // Older dapi builds omit file_url but expose directory + image.
        let image = post.image.as_deref().filter(|i| !i.is_empty())?;
        let directory = match post.directory.as_ref()? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        absolutize_url(&self.base, &format!("images/{}/{}", directory, image))
    }

    fn to_item(&self, post: GelbooruPost) -> Option<Item> {
        let content_url = self.content_url(&post)?;
        let origin = self
            .base
            .join(&format!("index.php?page=post&s=view&id={}", post.id))
            .ok()
            .map(|u| u.to_string());
        let preview = post
            .preview_url
            .as_deref()
            .and_then(|u| absolutize_url(&self.base, u));
        let attribution = post
            .source
            .filter(|s| !s.trim().is_empty())
            .or(post.owner.map(|o| clean_html_entities(&o)));

        Some(
            Item::new(self.site.id, post.id.to_string(), content_url, rating(post.rating.as_deref()))
                .with_tags(split_tag_string(&post.tags))
                .with_quality(post.score.unwrap_or(0) as f64)
                .with_preview(preview)
                .with_origin_page(origin)
                .with_attribution(attribution)
                .with_dimensions(post.width, post.height),
        )
    }
}

fn rating(code: Option<&str>) -> SafetyRating {
    match code.map(|c| c.trim().to_ascii_lowercase()).as_deref() {
        Some("general" | "safe" | "g" | "s") => SafetyRating::Safe,
        Some("sensitive" | "questionable" | "explicit" | "q" | "e") => SafetyRating::Restricted,
        _ => SafetyRating::Unknown,
    }
}

#[async_trait]
impl SourceAdapter for GelbooruSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn search(&self, tag: &str, page: u32, limit: u32, allow_restricted: bool) -> SearchOutcome {
        let tags = match self.site.safe_metatag {
            Some(metatag) if !allow_restricted => format!("{} {}", tag, metatag),
            _ => tag.to_string(),
        };
        let mut query = self.dapi_query("post");
        query.push(("tags", tags));
        query.push(("pid", page.to_string()));
        query.push(("limit", limit.clamp(1, MAX_LIMIT).to_string()));

        let url = match endpoint(&self.base, "index.php", &query) {
            Ok(url) => url,
            Err(e) => return SearchOutcome::failed(e),
        };
        let body = match get_text(&self.client, url, self.site.id).await {
            Ok(body) => body,
            Err(e) => return SearchOutcome::failed(e),
        };
        // dapi clones answer an empty result set with an empty body.
        if body.trim().is_empty() {
            return SearchOutcome::ok(Vec::new());
        }

        let posts = match parse_json::<PostEnvelope>(&body) {
            Ok(PostEnvelope::Bare(posts)) | Ok(PostEnvelope::Wrapped { post: posts }) => posts,
            Err(e) => return SearchOutcome::failed(e),
        };
        SearchOutcome::ok(posts.into_iter().filter_map(|p| self.to_item(p)).collect())
    }

    async fn lookup_tags(&self, prefix: &str, limit: u32) -> TagLookup {
        if !self.site.tag_index {
            return TagLookup::failed(SourceError::Permanent(format!(
                "{} has no tag index",
                self.site.id
            )));
        }
        let mut query = self.dapi_query("tag");
        query.push(("name_pattern", format!("{}%", prefix)));
        query.push(("orderby", "count".to_string()));
        query.push(("limit", limit.clamp(1, MAX_LIMIT).to_string()));

        let url = match endpoint(&self.base, "index.php", &query) {
            Ok(url) => url,
            Err(e) => return TagLookup::failed(e),
        };
        let body = match get_text(&self.client, url, self.site.id).await {
            Ok(body) => body,
            Err(e) => return TagLookup::failed(e),
        };
        if body.trim().is_empty() {
            return TagLookup::ok(Vec::new());
        }

        match parse_json::<TagEnvelope>(&body) {
            Ok(TagEnvelope::Bare(tags)) | Ok(TagEnvelope::Wrapped { tag: tags }) => TagLookup::ok(
                tags.into_iter()
                    .map(|t| TagCandidate::new(self.site.id, clean_html_entities(&t.name), t.count))
                    .collect(),
            ),
            Err(e) => TagLookup::failed(e),
        }
    }

    fn config_schema(&self) -> SourceConfigSchema {
        SourceConfigSchema::base().with_credentials("User ID")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(site: GelbooruSite) -> GelbooruSource {
        GelbooruSource::new(site, reqwest::Client::new(), &SourceSettings::default()).unwrap()
    }

    #[test]
    fn test_rating_values() {
        assert_eq!(rating(Some("general")), SafetyRating::Safe);
        assert_eq!(rating(Some("safe")), SafetyRating::Safe);
        assert_eq!(rating(Some("questionable")), SafetyRating::Restricted);
        assert_eq!(rating(Some("")), SafetyRating::Unknown);
    }

    #[test]
    fn test_envelopes() {
        let wrapped: PostEnvelope = serde_json::from_str(
            r#"{"@attributes": {"count": 1}, "post": [{"id": 9, "file_url": "https://img/x.png", "tags": "a b"}]}"#,
        )
        .unwrap();
        assert!(matches!(wrapped, PostEnvelope::Wrapped { ref post } if post.len() == 1));

        let empty: PostEnvelope =
            serde_json::from_str(r#"{"@attributes": {"count": 0}}"#).unwrap();
        assert!(matches!(empty, PostEnvelope::Wrapped { ref post } if post.is_empty()));

        let bare: PostEnvelope =
            serde_json::from_str(r#"[{"id": 3, "directory": 12, "image": "f.jpg"}]"#).unwrap();
        assert!(matches!(bare, PostEnvelope::Bare(ref posts) if posts.len() == 1));
    }

    #[test]
    fn test_safebooru_url_rebuilt_from_directory() {
        let source = source(SAFEBOORU);
        let post: GelbooruPost = serde_json::from_str(
            r#"{"id": 3, "directory": 4021, "image": "abc.jpg", "rating": "safe", "tags": "anya_(spy_x_family)"}"#,
        )
        .unwrap();
        let item = source.to_item(post).unwrap();
        assert_eq!(item.content_url, "https://safebooru.org/images/4021/abc.jpg");
        assert_eq!(item.source_id, "safebooru");
        assert_eq!(
            item.origin_page_url.as_deref(),
            Some("https://safebooru.org/index.php?page=post&s=view&id=3")
        );
    }

    #[test]
    fn test_site_descriptors() {
        assert!(source(GELBOORU).descriptor().supports_tag_index);
        assert!(!source(SAFEBOORU).descriptor().supports_tag_index);
        assert!(source(RULE34).descriptor().requires_elevated_context);
    }
}
