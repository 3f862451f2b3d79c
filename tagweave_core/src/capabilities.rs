use serde::{Deserialize, Serialize};

use crate::federated::SafetyMode;

/// What kind of content a source is expected to host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyTier {
    /// Only general-audience content
    Safe,
    /// Mixed content; per-item ratings decide
    #[default]
    Mixed,
    /// Predominantly restricted content
    Restricted,
}

/// Static description of a source adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Stable identifier used in configuration and status maps
    pub id: String,

    /// Human-readable description
    pub description: String,

    /// The source can answer `lookup_tags` prefix queries
    pub supports_tag_index: bool,

    /// The source may only be queried when restricted content is allowed
    pub requires_elevated_context: bool,

    pub safety_tier: SafetyTier,
}

impl SourceDescriptor {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            supports_tag_index: false,
            requires_elevated_context: false,
            safety_tier: SafetyTier::Mixed,
        }
    }

    pub fn with_tag_index(mut self, supported: bool) -> Self {
        self.supports_tag_index = supported;
        self
    }

    pub fn with_elevated_context(mut self, required: bool) -> Self {
        self.requires_elevated_context = required;
        self
    }

    pub fn with_safety_tier(mut self, tier: SafetyTier) -> Self {
        self.safety_tier = tier;
        self
    }

    /// Whether a session running in `mode` may schedule work on this source.
    pub fn permitted_in(&self, mode: SafetyMode) -> bool {
        if self.requires_elevated_context || self.safety_tier == SafetyTier::Restricted {
            return mode.allows_restricted();
        }
        true
    }
}

/// Settings a source accepts from the configuration file.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct SourceConfigSchema {
    pub fields: Vec<Field>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Field {
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    pub required: bool,
    pub description: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum FieldType {
    Text,
    Secret, // API keys and passwords
    Url,
}

impl SourceConfigSchema {
    /// Schema shared by every adapter: an optional base URL override.
    pub fn base() -> Self {
        Self {
            fields: vec![Field {
                name: "base_url".to_string(),
                label: "Base URL".to_string(),
                field_type: FieldType::Url,
                required: false,
                description: Some("Override the upstream endpoint (mirrors, testing)".to_string()),
            }],
        }
    }

    /// Adds optional credential fields.
    pub fn with_credentials(mut self, user_label: &str) -> Self {
        self.fields.push(Field {
            name: "user_id".to_string(),
            label: user_label.to_string(),
            field_type: FieldType::Text,
            required: false,
            description: None,
        });
        self.fields.push(Field {
            name: "api_key".to_string(),
            label: "API key".to_string(),
            field_type: FieldType::Secret,
            required: false,
            description: Some("Raises rate limits and unlocks account-gated posts".to_string()),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gating_by_mode() {
        let general = SourceDescriptor::new("general", "general index");
        assert!(general.permitted_in(SafetyMode::Safe));
        assert!(general.permitted_in(SafetyMode::Unrestricted));

        let elevated = SourceDescriptor::new("adult", "adult index").with_elevated_context(true);
        assert!(!elevated.permitted_in(SafetyMode::Safe));
        assert!(!elevated.permitted_in(SafetyMode::AllowUnknown));
        assert!(elevated.permitted_in(SafetyMode::Unrestricted));

        let restricted_tier =
            SourceDescriptor::new("tier", "tier").with_safety_tier(SafetyTier::Restricted);
        assert!(!restricted_tier.permitted_in(SafetyMode::Safe));
    }

    #[test]
    fn test_schema_fields() {
        let schema = SourceConfigSchema::base().with_credentials("Login");
        let names: Vec<&str> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["base_url", "user_id", "api_key"]);
        assert_eq!(schema.fields[2].field_type, FieldType::Secret);
    }
}
