//! Source profiles.
//!
//! A profile names a group of sources plus optional overrides for a search.
//! Profiles can extend each other; user profiles live next to the config
//! file and shadow built-ins with the same name.

use std::collections::HashMap;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::SafetyMode;
use crate::config::{config_root, AggregatorConfig};

/// Inheritance chains deeper than this are treated as cycles.
const MAX_EXTENDS_DEPTH: usize = 8;

// ============================================================================
// SourceProfile
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProfile {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Profile to start from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    /// Sources to query (ignored when extending)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,

    /// Safety mode used when the caller does not pick one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_mode: Option<SafetyMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages_per_source: Option<u32>,
}

impl SourceProfile {
    pub fn new(name: impl Into<String>, sources: Vec<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            extends: None,
            sources,
            add: Vec::new(),
            exclude: Vec::new(),
            safety_mode: None,
            max_pages_per_source: None,
        }
    }

    pub fn get_builtin(name: &str) -> Option<Self> {
        BUILTIN_PROFILES.iter().find(|p| p.name == name).cloned()
    }

    pub fn list_builtin() -> &'static [SourceProfile] {
        &BUILTIN_PROFILES
    }

    /// Sources after resolving `extends`, `add` and `exclude`.
    pub fn effective_sources(&self, store: Option<&ProfileStore>) -> Vec<String> {
        self.effective_sources_at(store, 0)
    }

    fn effective_sources_at(&self, store: Option<&ProfileStore>, depth: usize) -> Vec<String> {
        let base = match &self.extends {
            Some(parent) if depth < MAX_EXTENDS_DEPTH => store
                .and_then(|s| s.load(parent).ok().flatten())
                .or_else(|| Self::get_builtin(parent))
                .map(|p| p.effective_sources_at(store, depth + 1))
                .unwrap_or_default(),
            Some(_) => Vec::new(),
            None => self.sources.clone(),
        };

        let mut result: Vec<String> = base
            .into_iter()
            .filter(|s| !self.exclude.contains(s))
            .collect();
        for source in &self.add {
            if !result.contains(source) {
                result.push(source.clone());
            }
        }
        result
    }

    /// Safety mode of this profile or the nearest ancestor that sets one.
    pub fn effective_safety_mode(&self, store: Option<&ProfileStore>) -> Option<SafetyMode> {
        let mut current = self.clone();
        for _ in 0..MAX_EXTENDS_DEPTH {
            if current.safety_mode.is_some() {
                return current.safety_mode;
            }
            let parent = current.extends.as_deref()?;
            current = store
                .and_then(|s| s.load(parent).ok().flatten())
                .or_else(|| Self::get_builtin(parent))?;
        }
        None
    }

    /// Restrict `config` to this profile's sources and apply its overrides.
    pub fn apply_to(&self, config: &mut AggregatorConfig, store: Option<&ProfileStore>) {
        config.sources = Some(self.effective_sources(store));
        if let Some(mode) = self.effective_safety_mode(store) {
            config.default_safety_mode = mode;
        }
        if let Some(pages) = self.max_pages_per_source {
            config.max_pages_per_source = pages;
            config.pages_per_round = config.pages_per_round.min(pages);
        }
    }
}

// ============================================================================
// Built-in Profiles
// ============================================================================

static BUILTIN_PROFILES: Lazy<Vec<SourceProfile>> = Lazy::new(|| {
    vec![
        SourceProfile {
            description: Some("General-audience boards only".to_string()),
            ..SourceProfile::new(
                "safe",
                vec![
                    "danbooru".to_string(),
                    "gelbooru".to_string(),
                    "safebooru".to_string(),
                    "zerochan".to_string(),
                ],
            )
        },
        SourceProfile {
            description: Some("Safe boards plus mixed-content wallpaper boards".to_string()),
            extends: Some("safe".to_string()),
            add: vec!["konachan".to_string(), "yandere".to_string()],
            ..SourceProfile::new("general", Vec::new())
        },
        SourceProfile {
            description: Some("Every source, restricted content allowed".to_string()),
            extends: Some("general".to_string()),
            add: vec!["rule34".to_string(), "e621".to_string()],
            safety_mode: Some(SafetyMode::Unrestricted),
            ..SourceProfile::new("everything", Vec::new())
        },
    ]
});

// ============================================================================
// ProfileStore
// ============================================================================

/// User-defined profiles, stored as YAML at `~/.config/tagweave/profiles.yaml`.
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new_default() -> Self {
        Self {
            path: config_root().join("profiles.yaml"),
        }
    }

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// All user profiles. A missing file is an empty store; a file that
    /// does not parse is an error, so nothing overwrites it.
    pub fn load_all(&self) -> Result<HashMap<String, SourceProfile>, ProfileStoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(ProfileStoreError::Io(e.to_string())),
        };
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_yaml::from_str(&content).map_err(|e| ProfileStoreError::Parse {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// User profile first, then built-in.
    pub fn load(&self, name: &str) -> Result<Option<SourceProfile>, ProfileStoreError> {
        Ok(self
            .load_all()?
            .remove(name)
            .or_else(|| SourceProfile::get_builtin(name)))
    }

    pub fn save(&self, profile: &SourceProfile) -> Result<(), ProfileStoreError> {
        let mut profiles = self.load_all()?;
        profiles.insert(profile.name.clone(), profile.clone());
        self.write_all(&profiles)
    }

    /// Returns `Ok(false)` if no user profile had that name.
    pub fn delete(&self, name: &str) -> Result<bool, ProfileStoreError> {
        let mut profiles = self.load_all()?;
        let existed = profiles.remove(name).is_some();
        if existed {
            self.write_all(&profiles)?;
        }
        Ok(existed)
    }

    /// User and built-in profiles, sorted by name.
    pub fn list_all(&self) -> Result<Vec<SourceProfile>, ProfileStoreError> {
        let mut profiles: Vec<SourceProfile> = self.load_all()?.into_values().collect();
        for builtin in SourceProfile::list_builtin() {
            if !profiles.iter().any(|p| p.name == builtin.name) {
                profiles.push(builtin.clone());
            }
        }
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(profiles)
    }

    pub fn is_builtin(name: &str) -> bool {
        BUILTIN_PROFILES.iter().any(|p| p.name == name)
    }

    fn write_all(&self, profiles: &HashMap<String, SourceProfile>) -> Result<(), ProfileStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ProfileStoreError::Io(e.to_string()))?;
        }
        let content = serde_yaml::to_string(profiles)
            .map_err(|e| ProfileStoreError::Serialize(e.to_string()))?;
        std::fs::write(&self.path, content).map_err(|e| ProfileStoreError::Io(e.to_string()))
    }
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new_default()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileStoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Cannot parse {path}: {message}")]
    Parse { path: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_inheritance_chain() {
        let everything = SourceProfile::get_builtin("everything").unwrap();
        let sources = everything.effective_sources(None);
        for id in ["danbooru", "safebooru", "konachan", "rule34", "e621"] {
            assert!(sources.contains(&id.to_string()), "missing {}", id);
        }
        assert_eq!(
            everything.effective_safety_mode(None),
            Some(SafetyMode::Unrestricted)
        );
        assert_eq!(
            SourceProfile::get_builtin("general")
                .unwrap()
                .effective_safety_mode(None),
            None
        );
    }

    #[test]
    fn test_add_and_exclude() {
        let mut child = SourceProfile::new("mine", Vec::new());
        child.extends = Some("safe".to_string());
        child.add = vec!["yandere".to_string()];
        child.exclude = vec!["zerochan".to_string()];

        let sources = child.effective_sources(None);
        assert!(sources.contains(&"danbooru".to_string()));
        assert!(sources.contains(&"yandere".to_string()));
        assert!(!sources.contains(&"zerochan".to_string()));
    }

    #[test]
    fn test_self_extending_profile_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profiles.yaml"));
        let mut looped = SourceProfile::new("loop", Vec::new());
        looped.extends = Some("loop".to_string());
        looped.add = vec!["danbooru".to_string()];
        store.save(&looped).unwrap();

        assert_eq!(looped.effective_sources(Some(&store)), vec!["danbooru"]);
        assert_eq!(looped.effective_safety_mode(Some(&store)), None);
    }

    #[test]
    fn test_store_round_trip_and_shadowing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("nested").join("profiles.yaml"));

        let custom = SourceProfile::new("safe", vec!["zerochan".to_string()]);
        store.save(&custom).unwrap();
        assert_eq!(
            store.load("safe").unwrap().unwrap().effective_sources(Some(&store)),
            vec!["zerochan"]
        );
        assert_eq!(store.list_all().unwrap().len(), SourceProfile::list_builtin().len());

        assert!(store.delete("safe").unwrap());
        assert!(!store.delete("safe").unwrap());
        assert!(store
            .load("safe")
            .unwrap()
            .unwrap()
            .sources
            .contains(&"danbooru".to_string()));
    }

    #[test]
    fn test_unparseable_store_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.yaml");
        let original = "mine:\n  name: mine\n  sources: [danbooru]\n  max_pages_per_source: lots\n";
        std::fs::write(&path, original).unwrap();
        let store = ProfileStore::new(path.clone());

        assert!(matches!(store.load_all(), Err(ProfileStoreError::Parse { .. })));
        assert!(store.list_all().is_err());
        assert!(store.load("mine").is_err());

        let other = SourceProfile::new("other", vec!["zerochan".to_string()]);
        assert!(matches!(store.save(&other), Err(ProfileStoreError::Parse { .. })));
        assert!(store.delete("mine").is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn test_missing_or_blank_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profiles.yaml"));
        assert!(store.load_all().unwrap().is_empty());

        std::fs::write(store.path(), "\n").unwrap();
        assert!(store.load_all().unwrap().is_empty());
        assert!(store.load("general").unwrap().is_some());
    }

    #[test]
    fn test_apply_to_config() {
        let mut config = AggregatorConfig::default();
        let mut profile = SourceProfile::get_builtin("everything").unwrap();
        profile.max_pages_per_source = Some(1);
        profile.apply_to(&mut config, None);

        assert!(config.is_enabled("e621"));
        assert_eq!(config.default_safety_mode, SafetyMode::Unrestricted);
        assert_eq!(config.max_pages_per_source, 1);
        assert_eq!(config.pages_per_round, 1);
        assert!(config.validate().is_ok());
    }
}
