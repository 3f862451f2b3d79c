use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::capabilities::{SafetyTier, SourceConfigSchema, SourceDescriptor};
use crate::config::SourceSettings;
use crate::connectors::http::{base_url, endpoint, get_text, parse_json};
use crate::connectors::SourceAdapter;
use crate::error::{AggregatorError, SourceError};
use crate::federated::{Item, SafetyRating, SearchOutcome, TagCandidate, TagLookup};
use crate::utils::split_tag_string;

pub const SOURCE_ID: &str = "danbooru";
const DEFAULT_BASE_URL: &str = "https://danbooru.donmai.us/";
const MAX_LIMIT: u32 = 200;

#[derive(Debug, Deserialize)]
struct DanbooruPost {
    id: Option<u64>,
    #[serde(default)]
    file_url: Option<String>,
    #[serde(default)]
    large_file_url: Option<String>,
    #[serde(default)]
    preview_file_url: Option<String>,
    #[serde(default)]
    rating: Option<String>,
    #[serde(default)]
    tag_string: String,
    #[serde(default)]
    tag_string_artist: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    fav_count: i64,
    #[serde(default)]
    image_width: Option<u32>,
    #[serde(default)]
    image_height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct DanbooruTag {
    name: String,
    #[serde(default)]
    post_count: u64,
}

/// Danbooru's `/posts.json` and `/tags.json`.
pub struct DanbooruSource {
    client: reqwest::Client,
    base: url::Url,
    login: Option<String>,
    api_key: Option<String>,
    descriptor: SourceDescriptor,
}

impl DanbooruSource {
    pub fn new(client: reqwest::Client, settings: &SourceSettings) -> Result<Self, AggregatorError> {
        Ok(Self {
            client,
            base: base_url(settings.base_url.as_deref(), DEFAULT_BASE_URL)?,
            login: settings.user_id.clone(),
            api_key: settings.api_key.clone(),
            descriptor: SourceDescriptor::new(SOURCE_ID, "Danbooru anime image board")
                .with_tag_index(true)
                .with_safety_tier(SafetyTier::Mixed),
        })
    }

    fn auth_params(&self, query: &mut Vec<(&str, String)>) {
        if let (Some(login), Some(key)) = (&self.login, &self.api_key) {
            query.push(("login", login.clone()));
            query.push(("api_key", key.clone()));
        }
    }

    fn to_item(&self, post: DanbooruPost) -> Option<Item> {
        let id = post.id?;
        let content_url = post
            .file_url
            .filter(|u| !u.is_empty())
            .or(post.large_file_url.filter(|u| !u.is_empty()))?;

        let attribution = if post.tag_string_artist.trim().is_empty() {
            post.source
        } else {
            Some(split_tag_string(&post.tag_string_artist).join(", "))
        };

        Some(
            Item::new(SOURCE_ID, id.to_string(), content_url, rating(post.rating.as_deref()))
                .with_tags(split_tag_string(&post.tag_string))
                .with_quality((post.score + post.fav_count / 4) as f64)
                .with_preview(post.preview_file_url)
                .with_origin_page(self.base.join(&format!("posts/{}", id)).ok().map(|u| u.to_string()))
                .with_attribution(attribution)
                .with_dimensions(post.image_width, post.image_height),
        )
    }
}

/// `g` is general; `s` (sensitive), `q` and `e` are all restricted.
fn rating(code: Option<&str>) -> SafetyRating {
    match code.map(|c| c.trim().to_ascii_lowercase()) {
        Some(c) if c == "g" || c == "general" => SafetyRating::Safe,
        Some(c) if matches!(c.as_str(), "s" | "q" | "e" | "sensitive" | "questionable" | "explicit") => {
            SafetyRating::Restricted
        }
        _ => SafetyRating::Unknown,
    }
}

#[async_trait]
impl SourceAdapter for DanbooruSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn search(&self, tag: &str, page: u32, limit: u32, allow_restricted: bool) -> SearchOutcome {
        let tags = if allow_restricted {
            tag.to_string()
        } else {
            format!("{} rating:g", tag)
        };
        let mut query = vec![
            ("tags", tags),
            ("page", (page + 1).to_string()),
            ("limit", limit.clamp(1, MAX_LIMIT).to_string()),
        ];
        self.auth_params(&mut query);

        let url = match endpoint(&self.base, "posts.json", &query) {
            Ok(url) => url,
            Err(e) => return SearchOutcome::failed(e),
        };
        let body = match get_text(&self.client, url, SOURCE_ID).await {
            Ok(body) => body,
            Err(e) => return SearchOutcome::failed(e),
        };
        let posts: Vec<DanbooruPost> = match parse_json(&body) {
            Ok(posts) => posts,
            Err(e) => return SearchOutcome::failed(e),
        };

        let total = posts.len();
        let items: Vec<Item> = posts.into_iter().filter_map(|p| self.to_item(p)).collect();
        if items.len() < total {
            debug!(
                source = SOURCE_ID,
                tag,
                skipped = total - items.len(),
                "posts without a file url skipped"
            );
        }
        SearchOutcome::ok(items)
    }

    async fn lookup_tags(&self, prefix: &str, limit: u32) -> TagLookup {
        if prefix.is_empty() {
            return TagLookup::failed(SourceError::Permanent("empty tag prefix".into()));
        }
        let mut query = vec![
            ("search[name_matches]", format!("{}*", prefix)),
            ("search[order]", "count".to_string()),
            ("search[hide_empty]", "true".to_string()),
            ("limit", limit.clamp(1, MAX_LIMIT).to_string()),
        ];
        self.auth_params(&mut query);

        let url = match endpoint(&self.base, "tags.json", &query) {
            Ok(url) => url,
            Err(e) => return TagLookup::failed(e),
        };
        let body = match get_text(&self.client, url, SOURCE_ID).await {
            Ok(body) => body,
            Err(e) => return TagLookup::failed(e),
        };
        match parse_json::<Vec<DanbooruTag>>(&body) {
            Ok(tags) => TagLookup::ok(
                tags.into_iter()
                    .map(|t| TagCandidate::new(SOURCE_ID, t.name, t.post_count))
                    .collect(),
            ),
            Err(e) => TagLookup::failed(e),
        }
    }

    fn config_schema(&self) -> SourceConfigSchema {
        SourceConfigSchema::base().with_credentials("Login")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_codes() {
        assert_eq!(rating(Some("g")), SafetyRating::Safe);
        assert_eq!(rating(Some("s")), SafetyRating::Restricted);
        assert_eq!(rating(Some("e")), SafetyRating::Restricted);
        assert_eq!(rating(Some("x")), SafetyRating::Unknown);
        assert_eq!(rating(None), SafetyRating::Unknown);
    }

    #[test]
    fn test_post_without_file_is_skipped() {
        let source =
            DanbooruSource::new(reqwest::Client::new(), &SourceSettings::default()).unwrap();
        let post: DanbooruPost =
            serde_json::from_str(r#"{"id": 1, "rating": "g", "tag_string": "anya"}"#).unwrap();
        assert!(source.to_item(post).is_none());
    }

    #[test]
    fn test_post_conversion() {
        let source =
            DanbooruSource::new(reqwest::Client::new(), &SourceSettings::default()).unwrap();
        let post: DanbooruPost = serde_json::from_str(
            r#"{
                "id": 5012345,
                "file_url": "https://cdn.donmai.us/original/ab/cd/abcd.jpg",
                "preview_file_url": "https://cdn.donmai.us/180x180/ab/cd/abcd.jpg",
                "rating": "g",
                "tag_string": "1girl anya_(spy_x_family) smile",
                "tag_string_artist": "some_artist",
                "score": 40,
                "fav_count": 80,
                "image_width": 1200,
                "image_height": 1600
            }"#,
        )
        .unwrap();

        let item = source.to_item(post).unwrap();
        assert_eq!(item.canonical_id, "5012345");
        assert_eq!(item.safety_rating, SafetyRating::Safe);
        assert!(item.tags.contains("anya_(spy_x_family)"));
        assert_eq!(item.quality_score, 60.0);
        assert_eq!(item.attribution.as_deref(), Some("some_artist"));
        assert_eq!(
            item.origin_page_url.as_deref(),
            Some("https://danbooru.donmai.us/posts/5012345")
        );
    }
}
