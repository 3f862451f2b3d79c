use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use crate::capabilities::{SafetyTier, SourceConfigSchema, SourceDescriptor};
use crate::config::SourceSettings;
use crate::connectors::http::{base_url, endpoint, get_text, parse_json};
use crate::connectors::SourceAdapter;
use crate::error::AggregatorError;
use crate::federated::{Item, SafetyRating, SearchOutcome, TagCandidate, TagLookup};

pub const SOURCE_ID: &str = "e621";
const DEFAULT_BASE_URL: &str = "https://e621.net/";
const MAX_LIMIT: u32 = 320;

#[derive(Debug, Deserialize)]
struct PostsResponse {
    posts: Vec<E621Post>,
}

#[derive(Debug, Deserialize)]
struct E621Post {
    id: u64,
    #[serde(default)]
    file: E621File,
    #[serde(default)]
    preview: E621File,
    #[serde(default)]
    rating: Option<String>,
    /// Tags grouped by category (general, artist, species, ...)
    #[serde(default)]
    tags: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    score: E621Score,
    #[serde(default)]
    fav_count: i64,
    #[serde(default)]
    sources: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct E621File {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct E621Score {
    #[serde(default)]
    total: i64,
}

/// `tags.json` returns `{"tags": []}` instead of `[]` when nothing matches.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TagsResponse {
    List(Vec<E621Tag>),
    Empty {
        #[serde(default)]
        tags: Vec<E621Tag>,
    },
}

#[derive(Debug, Deserialize)]
struct E621Tag {
    name: String,
    #[serde(default)]
    post_count: u64,
}

pub struct E621Source {
    client: reqwest::Client,
    base: url::Url,
    login: Option<String>,
    api_key: Option<String>,
    descriptor: SourceDescriptor,
}

impl E621Source {
    pub fn new(client: reqwest::Client, settings: &SourceSettings) -> Result<Self, AggregatorError> {
        Ok(Self {
            client,
            base: base_url(settings.base_url.as_deref(), DEFAULT_BASE_URL)?,
            login: settings.user_id.clone(),
            api_key: settings.api_key.clone(),
            descriptor: SourceDescriptor::new(SOURCE_ID, "e621 furry art board")
                .with_tag_index(true)
                .with_elevated_context(true)
                .with_safety_tier(SafetyTier::Restricted),
        })
    }

    fn query_with_auth(&self, mut query: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        if let (Some(login), Some(key)) = (&self.login, &self.api_key) {
            query.push(("login", login.clone()));
            query.push(("api_key", key.clone()));
        }
        query
    }

    fn to_item(&self, post: E621Post) -> Option<Item> {
        // Null when the post is hidden from anonymous users.
        let content_url = post.file.url.filter(|u| !u.is_empty())?;
        let origin = self
            .base
            .join(&format!("posts/{}", post.id))
            .ok()
            .map(|u| u.to_string());
        let attribution = post
            .tags
            .get("artist")
            .filter(|artists| !artists.is_empty())
            .map(|artists| artists.join(", "))
            .or_else(|| post.sources.first().cloned());

        Some(
            Item::new(SOURCE_ID, post.id.to_string(), content_url, rating(post.rating.as_deref()))
                .with_tags(post.tags.values().flatten().cloned())
                .with_quality((post.score.total + post.fav_count / 4) as f64)
                .with_preview(post.preview.url)
                .with_origin_page(origin)
                .with_attribution(attribution)
                .with_dimensions(post.file.width, post.file.height),
        )
    }
}

fn rating(code: Option<&str>) -> SafetyRating {
    match code.map(|c| c.trim().to_ascii_lowercase()).as_deref() {
        Some("s") => SafetyRating::Safe,
        Some("q" | "e") => SafetyRating::Restricted,
        _ => SafetyRating::Unknown,
    }
}

#[async_trait]
impl SourceAdapter for E621Source {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn search(&self, tag: &str, page: u32, limit: u32, allow_restricted: bool) -> SearchOutcome {
        let tags = if allow_restricted {
            tag.to_string()
        } else {
            format!("{} rating:s", tag)
        };
        let query = self.query_with_auth(vec![
            ("tags", tags),
            ("page", (page + 1).to_string()),
            ("limit", limit.clamp(1, MAX_LIMIT).to_string()),
        ]);

        let url = match endpoint(&self.base, "posts.json", &query) {
            Ok(url) => url,
            Err(e) => return SearchOutcome::failed(e),
        };
        let body = match get_text(&self.client, url, SOURCE_ID).await {
            Ok(body) => body,
            Err(e) => return SearchOutcome::failed(e),
        };
        match parse_json::<PostsResponse>(&body) {
            Ok(response) => SearchOutcome::ok(
                response
                    .posts
                    .into_iter()
                    .filter_map(|p| self.to_item(p))
                    .collect(),
            ),
            Err(e) => SearchOutcome::failed(e),
        }
    }

    async fn lookup_tags(&self, prefix: &str, limit: u32) -> TagLookup {
        let query = self.query_with_auth(vec![
            ("search[name_matches]", format!("{}*", prefix)),
            ("search[order]", "count".to_string()),
            ("limit", limit.clamp(1, MAX_LIMIT).to_string()),
        ]);
        let url = match endpoint(&self.base, "tags.json", &query) {
            Ok(url) => url,
            Err(e) => return TagLookup::failed(e),
        };
        let body = match get_text(&self.client, url, SOURCE_ID).await {
            Ok(body) => body,
            Err(e) => return TagLookup::failed(e),
        };
        match parse_json::<TagsResponse>(&body) {
            Ok(TagsResponse::List(tags)) | Ok(TagsResponse::Empty { tags }) => TagLookup::ok(
                tags.into_iter()
                    .map(|t| TagCandidate::new(SOURCE_ID, t.name, t.post_count))
                    .collect(),
            ),
            Err(e) => TagLookup::failed(e),
        }
    }

    fn config_schema(&self) -> SourceConfigSchema {
        SourceConfigSchema::base().with_credentials("Username")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grouped_tags_are_flattened() {
        let source = E621Source::new(reqwest::Client::new(), &SourceSettings::default()).unwrap();
        let post: E621Post = serde_json::from_str(
            r#"{"id": 10, "file": {"url": "https://static1.e621.net/data/a.png", "width": 10, "height": 20},
                "preview": {"url": "https://static1.e621.net/data/preview/a.jpg"},
                "rating": "s",
                "tags": {"general": ["smile"], "artist": ["painter"], "species": ["fox"]},
                "score": {"up": 5, "down": 0, "total": 5}, "fav_count": 8, "sources": []}"#,
        )
        .unwrap();

        let item = source.to_item(post).unwrap();
        assert_eq!(item.tags.len(), 3);
        assert!(item.tags.contains("fox"));
        assert_eq!(item.attribution.as_deref(), Some("painter"));
        assert_eq!(item.quality_score, 7.0);
        assert_eq!(item.safety_rating, SafetyRating::Safe);
    }

    #[test]
    fn test_hidden_post_skipped() {
        let source = E621Source::new(reqwest::Client::new(), &SourceSettings::default()).unwrap();
        let post: E621Post =
            serde_json::from_str(r#"{"id": 11, "file": {"url": null}, "rating": "e"}"#).unwrap();
        assert!(source.to_item(post).is_none());
    }

    #[test]
    fn test_empty_tag_response_shape() {
        let parsed: TagsResponse = serde_json::from_str(r#"{"tags": []}"#).unwrap();
        assert!(matches!(parsed, TagsResponse::Empty { ref tags } if tags.is_empty()));
    }
}
