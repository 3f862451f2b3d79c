//! Engine configuration with sensible defaults.
//!
//! [`AggregatorConfig`] is plain serde data; every field has a default so a
//! partial YAML or TOML file is enough. [`ConfigStore`] finds and persists it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AggregatorError, Result};
use crate::federated::SafetyMode;
use crate::retry::RetryPolicy;
use crate::utils::normalize_tag;

// ============================================================================
// Default Values
// ============================================================================

pub const DEFAULT_MAX_CONCURRENCY: usize = 25;
pub const DEFAULT_MAX_PAGES_PER_SOURCE: u32 = 6;
pub const DEFAULT_PAGES_PER_ROUND: u32 = 2;
pub const DEFAULT_PER_PAGE_LIMIT: u32 = 40;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 900;
pub const DEFAULT_TAG_CACHE_TTL_SECS: u64 = 3_600;
pub const DEFAULT_MAX_SESSIONS: u64 = 256;
pub const DEFAULT_SESSION_DEADLINE_MS: u64 = 20_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_USER_AGENT: &str = concat!("tagweave/", env!("CARGO_PKG_VERSION"));

/// Per-source overrides: endpoint and credentials.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Allow-list of source ids; `None` means every registered source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_sources: Vec<String>,

    /// Global ceiling on in-flight upstream calls (default: 25)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Page budget per source for one session (default: 6)
    #[serde(default = "default_max_pages_per_source")]
    pub max_pages_per_source: u32,

    /// Pages fetched per source in one round (default: 2)
    #[serde(default = "default_pages_per_round")]
    pub pages_per_round: u32,

    /// Items requested per upstream page (default: 40)
    #[serde(default = "default_per_page_limit")]
    pub per_page_limit: u32,

    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    #[serde(default = "default_tag_cache_ttl_secs")]
    pub tag_cache_ttl_secs: u64,

    #[serde(default = "default_max_sessions")]
    pub max_sessions: u64,

    /// Wall-clock budget for one fill or extension; `None` disables it.
    /// Written as `0` when disabled, since TOML has no null.
    #[serde(default = "default_session_deadline_ms", with = "deadline_ms")]
    pub session_deadline_ms: Option<u64>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Tags that remove an item from every result list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocklist: Vec<String>,

    #[serde(default)]
    pub default_safety_mode: SafetyMode,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source_settings: BTreeMap<String, SourceSettings>,
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_max_pages_per_source() -> u32 {
    DEFAULT_MAX_PAGES_PER_SOURCE
}

fn default_pages_per_round() -> u32 {
    DEFAULT_PAGES_PER_ROUND
}

fn default_per_page_limit() -> u32 {
    DEFAULT_PER_PAGE_LIMIT
}

fn default_session_ttl_secs() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}

fn default_tag_cache_ttl_secs() -> u64 {
    DEFAULT_TAG_CACHE_TTL_SECS
}

fn default_max_sessions() -> u64 {
    DEFAULT_MAX_SESSIONS
}

fn default_session_deadline_ms() -> Option<u64> {
    Some(DEFAULT_SESSION_DEADLINE_MS)
}

/// `0` and null both mean "no deadline".
mod deadline_ms {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.unwrap_or(0))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.filter(|ms| *ms > 0))
    }
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            sources: None,
            disabled_sources: Vec::new(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            retry: RetryPolicy::default(),
            max_pages_per_source: DEFAULT_MAX_PAGES_PER_SOURCE,
            pages_per_round: DEFAULT_PAGES_PER_ROUND,
            per_page_limit: DEFAULT_PER_PAGE_LIMIT,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            tag_cache_ttl_secs: DEFAULT_TAG_CACHE_TTL_SECS,
            max_sessions: DEFAULT_MAX_SESSIONS,
            session_deadline_ms: Some(DEFAULT_SESSION_DEADLINE_MS),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            blocklist: Vec::new(),
            default_safety_mode: SafetyMode::Safe,
            source_settings: BTreeMap::new(),
        }
    }
}

impl AggregatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(AggregatorError::Config(
                "max_concurrency must be greater than 0".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(AggregatorError::Config(
                "retry.max_attempts must be greater than 0".into(),
            ));
        }
        if self.retry.factor.is_nan() || self.retry.factor < 1.0 {
            return Err(AggregatorError::Config(
                "retry.factor must be at least 1.0".into(),
            ));
        }
        if self.per_page_limit == 0 {
            return Err(AggregatorError::Config(
                "per_page_limit must be greater than 0".into(),
            ));
        }
        if self.max_pages_per_source == 0 || self.pages_per_round == 0 {
            return Err(AggregatorError::Config(
                "max_pages_per_source and pages_per_round must be greater than 0".into(),
            ));
        }
        if self.pages_per_round > self.max_pages_per_source {
            return Err(AggregatorError::Config(
                "pages_per_round must be <= max_pages_per_source".into(),
            ));
        }
        if self.max_sessions == 0 {
            return Err(AggregatorError::Config(
                "max_sessions must be greater than 0".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(AggregatorError::Config(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Whether `source_id` is enabled by the allow-list and not disabled.
    pub fn is_enabled(&self, source_id: &str) -> bool {
        let allowed = self
            .sources
            .as_ref()
            .map_or(true, |list| list.iter().any(|s| s == source_id));
        allowed && !self.disabled_sources.iter().any(|s| s == source_id)
    }

    pub fn settings_for(&self, source_id: &str) -> SourceSettings {
        self.source_settings
            .get(source_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Blocklist in normalised tag form.
    pub fn normalized_blocklist(&self) -> BTreeSet<String> {
        self.blocklist
            .iter()
            .map(|t| normalize_tag(t))
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn tag_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.tag_cache_ttl_secs)
    }

    pub fn session_deadline(&self) -> Option<Duration> {
        self.session_deadline_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ============================================================================
// ConfigStore
// ============================================================================

/// Location of the configuration file.
///
/// Defaults to `~/.config/tagweave/config.yaml`; a path ending in `.toml` is
/// read and written as TOML instead.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new_default() -> Self {
        Self {
            path: config_root().join("config.yaml"),
        }
    }

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load and validate; a missing file yields the defaults.
    pub fn load(&self) -> Result<AggregatorConfig> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(AggregatorConfig::default())
            }
            Err(e) => return Err(e.into()),
        };

        let config: AggregatorConfig = if self.is_toml() {
            toml::from_str(&content)?
        } else if content.trim().is_empty() {
            AggregatorConfig::default()
        } else {
            serde_yaml::from_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, config: &AggregatorConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = if self.is_toml() {
            toml::to_string_pretty(config)?
        } else {
            serde_yaml::to_string(config)?
        };
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    fn is_toml(&self) -> bool {
        self.path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new_default()
    }
}

/// `~/.config/tagweave`, or the platform equivalent.
pub fn config_root() -> PathBuf {
    let base = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|p| p.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("tagweave")
}
