//! Safety filtering, de-duplication and ranking of collected items.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use super::engine::Collected;
use super::types::{Item, SafetyMode};
use crate::utils::normalize_tag;

/// Whether `item` may be shown under `mode` with the given normalised blocklist.
pub fn is_admitted(item: &Item, mode: SafetyMode, blocklist: &BTreeSet<String>) -> bool {
    if !mode.admits(item.safety_rating) {
        return false;
    }
    blocklist.is_empty()
        || !item
            .tags
            .iter()
            .any(|tag| blocklist.contains(&normalize_tag(tag)))
}

/// Identities of items already admitted to a ranked list.
///
/// An item is a duplicate if an earlier admitted item has the same
/// `content_url`, or the same `(source_id, canonical_id)`.
#[derive(Debug, Default, Clone)]
pub struct Deduper {
    seen_urls: HashSet<String>,
    seen_ids: HashSet<(String, String)>,
}

impl Deduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `item`; false if it duplicates something already admitted.
    pub fn admit(&mut self, item: &Item) -> bool {
        let id = (item.source_id.clone(), item.canonical_id.clone());
        if self.seen_ids.contains(&id) {
            return false;
        }
        if !item.content_url.is_empty() && !self.seen_urls.insert(item.content_url.clone()) {
            return false;
        }
        self.seen_ids.insert(id);
        true
    }

    pub fn len(&self) -> usize {
        self.seen_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen_ids.is_empty()
    }
}

/// Filter, de-duplicate and rank items given in arrival order.
///
/// The surviving items are stably sorted by `quality_score` descending, so
/// ties keep arrival order.
pub fn dedup_and_rank<I>(items: I, mode: SafetyMode, blocklist: &BTreeSet<String>) -> Vec<Arc<Item>>
where
    I: IntoIterator<Item = Arc<Item>>,
{
    rank_new(items, mode, blocklist, &mut Deduper::new())
}

/// Like [`dedup_and_rank`], but also drops anything `seen` already holds
/// and records the survivors in it.
pub fn rank_new<I>(
    items: I,
    mode: SafetyMode,
    blocklist: &BTreeSet<String>,
    seen: &mut Deduper,
) -> Vec<Arc<Item>>
where
    I: IntoIterator<Item = Arc<Item>>,
{
    let mut ranked: Vec<Arc<Item>> = items
        .into_iter()
        .filter(|item| is_admitted(item, mode, blocklist))
        .filter(|item| seen.admit(item))
        .collect();

    ranked.sort_by(|a, b| sort_quality(b.quality_score).total_cmp(&sort_quality(a.quality_score)));
    ranked
}

/// NaN ranks below every real score.
fn sort_quality(score: f64) -> f64 {
    if score.is_nan() {
        f64::NEG_INFINITY
    } else {
        score
    }
}

/// Rank the items one round collected, in canonical arrival order.
///
/// The result is meant to be appended after everything earlier rounds
/// produced; `seen` carries their identities.
pub(crate) fn rank_round(
    collected: &[Collected],
    round: u32,
    mode: SafetyMode,
    blocklist: &BTreeSet<String>,
    seen: &mut Deduper,
) -> Vec<Arc<Item>> {
    let mut ordered: Vec<&Collected> = collected.iter().filter(|c| c.seq.round == round).collect();
    ordered.sort_by_key(|c| c.seq);
    rank_new(
        ordered.into_iter().map(|c| Arc::clone(&c.item)),
        mode,
        blocklist,
        seen,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federated::engine::SeqKey;
    use crate::federated::SafetyRating;

    fn item(source: &str, id: &str, url: &str, quality: f64) -> Arc<Item> {
        Arc::new(Item::new(source, id, url, SafetyRating::Safe).with_quality(quality))
    }

    #[test]
    fn test_duplicate_urls_across_sources_collapse() {
        let ranked = dedup_and_rank(
            vec![
                item("a", "1", "https://cdn/x.png", 5.0),
                item("b", "9", "https://cdn/x.png", 50.0),
                item("b", "10", "https://cdn/y.png", 1.0),
            ],
            SafetyMode::Safe,
            &BTreeSet::new(),
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].source_id, "a");
    }

    #[test]
    fn test_same_canonical_id_collapses() {
        let ranked = dedup_and_rank(
            vec![
                item("a", "1", "https://cdn/x.png", 1.0),
                item("a", "1", "https://cdn/x-mirror.png", 1.0),
                item("a", "2", "", 1.0),
                item("a", "2", "", 1.0),
            ],
            SafetyMode::Safe,
            &BTreeSet::new(),
        );
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn test_stable_ties_keep_arrival_order() {
        let ranked = dedup_and_rank(
            vec![
                item("a", "1", "u1", 3.0),
                item("a", "2", "u2", 7.0),
                item("a", "3", "u3", 3.0),
                item("a", "4", "u4", f64::NAN),
            ],
            SafetyMode::Safe,
            &BTreeSet::new(),
        );
        let ids: Vec<_> = ranked.iter().map(|i| i.canonical_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1", "3", "4"]);
    }

    #[test]
    fn test_unknown_safety_needs_opt_in() {
        let unknown = Arc::new(Item::new("z", "1", "u", SafetyRating::Unknown));
        let restricted = Arc::new(Item::new("z", "2", "v", SafetyRating::Restricted));
        let items = vec![unknown, restricted];

        assert!(dedup_and_rank(items.clone(), SafetyMode::Safe, &BTreeSet::new()).is_empty());
        assert_eq!(
            dedup_and_rank(items.clone(), SafetyMode::AllowUnknown, &BTreeSet::new()).len(),
            1
        );
        assert_eq!(
            dedup_and_rank(items, SafetyMode::Unrestricted, &BTreeSet::new()).len(),
            2
        );
    }

    #[test]
    fn test_blocklist_matches_normalised_tags() {
        let blocked = Arc::new(
            Item::new("a", "1", "u1", SafetyRating::Safe).with_tags(["Blood-Splatter", "smile"]),
        );
        let fine = Arc::new(Item::new("a", "2", "u2", SafetyRating::Safe).with_tags(["smile"]));
        let blocklist: BTreeSet<String> = ["blood_splatter".to_string()].into();

        let ranked = dedup_and_rank(vec![blocked, fine], SafetyMode::Unrestricted, &blocklist);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].canonical_id, "2");
    }

    #[test]
    fn test_blocked_duplicate_does_not_shadow_later_copy() {
        let first = Arc::new(
            Item::new("a", "1", "same", SafetyRating::Safe).with_tags(["gore"]),
        );
        let second = Arc::new(Item::new("b", "7", "same", SafetyRating::Safe));
        let blocklist: BTreeSet<String> = ["gore".to_string()].into();

        let ranked = dedup_and_rank(vec![first, second], SafetyMode::Safe, &blocklist);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].source_id, "b");
    }

    fn at(round: u32, page: u32, item: Arc<Item>) -> Collected {
        Collected {
            seq: SeqKey {
                round,
                source_rank: 0,
                tag_rank: 0,
                page,
                position: 0,
            },
            item,
        }
    }

    #[test]
    fn test_round_sorted_by_sequence() {
        let collected = vec![
            at(1, 1, item("a", "late", "late", 1.0)),
            at(1, 0, item("a", "early", "early", 1.0)),
        ];
        let ranked = rank_round(&collected, 1, SafetyMode::Safe, &BTreeSet::new(), &mut Deduper::new());
        assert_eq!(ranked[0].canonical_id, "early");
    }

    #[test]
    fn test_later_round_skips_earlier_items() {
        let mut seen = Deduper::new();
        let collected = vec![
            at(1, 0, item("a", "1", "u1", 1.0)),
            at(2, 2, item("b", "9", "u1", 90.0)),
            at(2, 2, item("a", "2", "u2", 50.0)),
        ];

        let first = rank_round(&collected, 1, SafetyMode::Safe, &BTreeSet::new(), &mut seen);
        assert_eq!(first.len(), 1);

        let second = rank_round(&collected, 2, SafetyMode::Safe, &BTreeSet::new(), &mut seen);
        let ids: Vec<_> = second.iter().map(|i| i.canonical_id.as_str()).collect();
        assert_eq!(ids, vec!["2"]);
        assert_eq!(seen.len(), 2);
    }
}
