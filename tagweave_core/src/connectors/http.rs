//! Shared HTTP plumbing for source adapters.
//!
//! Every adapter goes through [`get_text`] so that transport failures and
//! HTTP statuses are classified the same way everywhere.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::error::{AggregatorError, SourceError};

/// Build the client shared by all adapters of one service.
pub fn build_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client, AggregatorError> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(AggregatorError::Http)
}

/// GET `url` and return the body, classifying any failure.
pub(crate) async fn get_text(
    client: &reqwest::Client,
    url: url::Url,
    source_id: &str,
) -> Result<String, SourceError> {
    trace!(source = source_id, url = %url, "GET");

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| classify_transport_error(&e))?;

    if let Some(err) = classify_status(response.status(), response.headers()) {
        return Err(err);
    }

    let body = response
        .text()
        .await
        .map_err(|e| classify_transport_error(&e))?;
    trace!(source = source_id, bytes = body.len(), "response body");
    Ok(body)
}

/// Map an HTTP status to the error taxonomy; `None` for success.
pub(crate) fn classify_status(status: StatusCode, headers: &HeaderMap) -> Option<SourceError> {
    if status.is_success() {
        return None;
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        return Some(SourceError::RateLimited { retry_after });
    }
    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        return Some(SourceError::Transient(format!("upstream returned {}", status)));
    }
    Some(SourceError::Permanent(format!("upstream returned {}", status)))
}

pub(crate) fn classify_transport_error(err: &reqwest::Error) -> SourceError {
    if err.is_decode() {
        return SourceError::MalformedResponse(err.to_string());
    }
    if err.is_builder() {
        return SourceError::Permanent(err.to_string());
    }
    // Timeouts, resets and truncated bodies are all worth another attempt.
    SourceError::Transient(err.to_string())
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

pub(crate) fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, SourceError> {
    serde_json::from_str(body).map_err(|e| SourceError::MalformedResponse(e.to_string()))
}

/// Parse a base URL from configuration, falling back to the adapter default.
pub(crate) fn base_url(configured: Option<&str>, default: &str) -> Result<url::Url, AggregatorError> {
    let raw = configured.unwrap_or(default);
    url::Url::parse(raw).map_err(|e| AggregatorError::Config(format!("invalid base_url '{}': {}", raw, e)))
}

/// Join `path` onto `base` and append query pairs.
pub(crate) fn endpoint(
    base: &url::Url,
    path: &str,
    query: &[(&str, String)],
) -> Result<url::Url, SourceError> {
    let mut url = base
        .join(path)
        .map_err(|e| SourceError::Permanent(format!("cannot build request URL: {}", e)))?;
    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in query {
            pairs.append_pair(key, value);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_classify_status() {
        let empty = HeaderMap::new();
        assert_eq!(classify_status(StatusCode::OK, &empty), None);
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, &empty),
            Some(SourceError::Transient(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, &empty),
            Some(SourceError::Permanent(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, &empty),
            Some(SourceError::Permanent(_))
        ));

        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, &headers),
            Some(SourceError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            })
        );
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_endpoint_appends_query() {
        let base = url::Url::parse("https://danbooru.donmai.us/").unwrap();
        let url = endpoint(
            &base,
            "posts.json",
            &[("tags", "anya_(spy_x_family) rating:g".to_string()), ("page", "2".to_string())],
        )
        .unwrap();
        assert_eq!(url.path(), "/posts.json");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0].1, "anya_(spy_x_family) rating:g");
        assert_eq!(pairs[1], ("page".to_string(), "2".to_string()));
    }

    #[test]
    fn test_base_url_validation() {
        assert!(base_url(None, "https://yande.re/").is_ok());
        assert!(matches!(
            base_url(Some("not a url"), "https://yande.re/"),
            Err(AggregatorError::Config(_))
        ));
    }
}
