//! Pure scoring of tag candidates against a normalised entity name.

use serde::Serialize;

use crate::utils::{normalize_tag, split_qualifier};

/// Candidates scoring below this are never kept.
pub const MIN_MATCH_SCORE: f64 = 40.0;

/// Tags kept per source.
pub const TOP_K: usize = 5;

const EXACT: f64 = 100.0;
const EXACT_BODY: f64 = 80.0;
const BOUNDARY_PREFIX: f64 = 50.0;
const RAW_PREFIX: f64 = 25.0;
const SUBSTRING: f64 = 15.0;

const CONTEXT_FULL: f64 = 30.0;
const CONTEXT_TOKEN: f64 = 15.0;
const CONTEXT_TOKEN_MIN_LEN: usize = 3;

const LENGTH_SLACK: usize = 4;
const LENGTH_PENALTY_PER_CHAR: f64 = 0.5;
const MAX_LENGTH_PENALTY: f64 = 25.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub match_component: f64,
    pub context_component: f64,
    pub popularity_component: f64,
    pub length_penalty: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.match_component + self.context_component + self.popularity_component
            - self.length_penalty
    }
}

/// `score(candidate, target, context, popularity)` as a single number.
pub fn score(candidate: &str, target: &str, context: Option<&str>, popularity: u64) -> f64 {
    breakdown(candidate, target, context, popularity).total()
}

/// Score with its components. Inputs are normalised here, so raw index
/// strings and raw user input both work.
pub fn breakdown(
    candidate: &str,
    target: &str,
    context: Option<&str>,
    popularity: u64,
) -> ScoreBreakdown {
    let candidate = normalize_tag(candidate);
    let target = normalize_tag(target);
    let context = context.map(normalize_tag).filter(|c| !c.is_empty());

    ScoreBreakdown {
        match_component: match_component(&candidate, &target),
        context_component: context
            .as_deref()
            .map(|ctx| context_component(&candidate, ctx))
            .unwrap_or(0.0),
        popularity_component: popularity_component(popularity),
        length_penalty: length_penalty(&candidate, &target, context.as_deref()),
    }
}

fn match_component(candidate: &str, target: &str) -> f64 {
    if candidate.is_empty() || target.is_empty() {
        return 0.0;
    }
    if candidate == target {
        return EXACT;
    }

    let (candidate_body, _) = split_qualifier(candidate);
    let (target_body, _) = split_qualifier(target);
    if candidate_body == target_body {
        return EXACT_BODY;
    }

    if let Some(rest) = candidate.strip_prefix(target) {
        return if rest.starts_with('_') || rest.starts_with('(') {
            BOUNDARY_PREFIX
        } else {
            RAW_PREFIX
        };
    }

    if candidate.contains(target) {
        SUBSTRING
    } else {
        0.0
    }
}

fn context_component(candidate: &str, context: &str) -> f64 {
    if candidate.contains(context) {
        return CONTEXT_FULL;
    }
    let token_hit = context
        .split('_')
        .filter(|t| t.chars().count() >= CONTEXT_TOKEN_MIN_LEN)
        .any(|t| candidate.contains(t));
    if token_hit {
        CONTEXT_TOKEN
    } else {
        0.0
    }
}

/// Monotonic in `count`.
pub fn popularity_component(count: u64) -> f64 {
    match count {
        0 => 0.0,
        1..=9 => 2.0,
        10..=99 => 5.0,
        100..=999 => 10.0,
        1_000..=9_999 => 15.0,
        _ => 20.0,
    }
}

fn length_penalty(candidate: &str, target: &str, context: Option<&str>) -> f64 {
    let allowed =
        target.chars().count() + context.map(|c| c.chars().count()).unwrap_or(0) + LENGTH_SLACK;
    let excess = candidate.chars().count().saturating_sub(allowed);
    (excess as f64 * LENGTH_PENALTY_PER_CHAR).min(MAX_LENGTH_PENALTY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_tag_beats_bare_name_with_context() {
        let qualified = score("anya_(spy_x_family)", "anya", Some("Spy x Family"), 5_000);
        let bare = score("anya", "anya", Some("Spy x Family"), 5_000);
        assert_eq!(qualified, 80.0 + 30.0 + 15.0);
        assert_eq!(bare, 100.0 + 15.0);
        assert!(qualified > bare);
    }

    #[test]
    fn test_match_tiers() {
        assert_eq!(match_component("anya", "anya"), EXACT);
        assert_eq!(match_component("anya_(cosplay)", "anya"), EXACT_BODY);
        assert_eq!(match_component("anya_forger", "anya"), BOUNDARY_PREFIX);
        assert_eq!(match_component("anyamaru", "anya"), RAW_PREFIX);
        assert_eq!(match_component("tanya", "anya"), SUBSTRING);
        assert_eq!(match_component("yor", "anya"), 0.0);
    }

    #[test]
    fn test_context_token_partial_credit() {
        assert_eq!(context_component("anya_(spy_family)", "spy_x_family"), CONTEXT_TOKEN);
        assert_eq!(context_component("anya", "spy_x_family"), 0.0);
    }

    #[test]
    fn test_popularity_is_monotonic() {
        let counts = [0, 1, 9, 10, 99, 100, 999, 1_000, 9_999, 10_000, u64::MAX];
        for pair in counts.windows(2) {
            assert!(popularity_component(pair[0]) <= popularity_component(pair[1]));
        }
    }

    #[test]
    fn test_long_tags_are_penalised_and_capped() {
        let b = breakdown("anya_forger_and_many_unrelated_words_here", "anya", None, 0);
        assert!(b.length_penalty > 0.0);
        let huge = "anya_".to_string() + &"x".repeat(500);
        assert_eq!(breakdown(&huge, "anya", None, 0).length_penalty, MAX_LENGTH_PENALTY);
    }

    #[test]
    fn test_unrelated_candidate_is_below_threshold() {
        assert!(score("yor_forger", "anya", Some("spy x family"), 100_000) < MIN_MATCH_SCORE);
    }
}
