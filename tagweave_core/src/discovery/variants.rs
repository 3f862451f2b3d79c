//! Query variants derived from a free-text entity name.

use crate::utils::{normalize_tag, split_qualifier};

pub const MAX_VARIANTS: usize = 10;

/// A normalised entity name with the pieces scoring and variant generation need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedQuery {
    /// Full normalised input, qualifier included: the fallback tag
    pub full: String,
    /// Name without any `(qualifier)`
    pub base: String,
    /// Base with its token order rotated, for multi-token names
    pub swapped: Option<String>,
    /// Normalised context, or the input's own qualifier when none was given
    pub context: Option<String>,
}

impl NormalizedQuery {
    pub fn new(name: &str, context: Option<&str>) -> Self {
        let full = normalize_tag(name);
        let (body, qualifier) = split_qualifier(&full);
        let base = body.to_string();

        let context = context
            .map(normalize_tag)
            .filter(|c| !c.is_empty())
            .or_else(|| qualifier.map(str::to_string).filter(|q| !q.is_empty()));

        let tokens = tokens(&base);
        let swapped = match tokens.split_last() {
            Some((last, rest)) if !rest.is_empty() => Some(
                std::iter::once(*last)
                    .chain(rest.iter().copied())
                    .collect::<Vec<_>>()
                    .join("_"),
            ),
            _ => None,
        };

        Self {
            full,
            base,
            swapped,
            context,
        }
    }
}

fn tokens(name: &str) -> Vec<&str> {
    name.split('_').filter(|t| !t.is_empty()).collect()
}

fn qualified(name: &str, context: &str) -> String {
    format!("{}_({})", name, context)
}

/// Ordered, de-duplicated candidate strings for tag lookup.
///
/// The first entry is always the full normalised name, which doubles as the
/// fallback tag. Output is identical for identical input.
pub fn generate_variants(name: &str, context: Option<&str>) -> Vec<String> {
    let query = NormalizedQuery::new(name, context);
    if query.full.is_empty() {
        return Vec::new();
    }
    variants_for(&query)
}

pub(crate) fn variants_for(query: &NormalizedQuery) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(MAX_VARIANTS);
    let mut push = |candidate: String| {
        if !candidate.is_empty() && !out.contains(&candidate) {
            out.push(candidate);
        }
    };

    push(query.full.clone());
    push(query.base.clone());
    if let Some(ctx) = &query.context {
        push(qualified(&query.base, ctx));
    }

    if let Some(swapped) = &query.swapped {
        push(swapped.clone());
        if let Some(ctx) = &query.context {
            push(qualified(swapped, ctx));
        }
    }

    let parts = tokens(&query.base);
    if parts.len() >= 2 {
        push(parts[0].to_string());
        if let Some(ctx) = &query.context {
            push(qualified(parts[0], ctx));
        }
        push(parts.concat());
    }

    out.truncate(MAX_VARIANTS);
    out
}
