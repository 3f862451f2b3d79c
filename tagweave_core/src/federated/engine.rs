//! Query orchestration.
//!
//! Work runs in rounds. A round spawns one task per (source, tag, page) for
//! the next `pages_per_round` pages of every live tag, each under its own
//! cancellation token. Tasks acquire the shared gate per attempt and report
//! into a single channel; one consumer applies reports to the fetch state,
//! decides early stops and enforces the deadline.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::types::{FetchStatus, Item, ResolvedQuerySet, SearchOutcome, SourceHealth};
use crate::connectors::SourceAdapter;
use crate::error::SourceError;
use crate::retry::{RequestGate, RetryDecision};

/// Canonical arrival position of a collected item.
///
/// Ordering by this key instead of completion time keeps rankings
/// independent of network timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct SeqKey {
    pub round: u32,
    pub source_rank: usize,
    pub tag_rank: usize,
    pub page: u32,
    pub position: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct Collected {
    pub seq: SeqKey,
    pub item: Arc<Item>,
}

/// Paging limits for one session.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FetchPlan {
    pub per_page_limit: u32,
    pub pages_per_round: u32,
    pub max_pages: u32,
    pub allow_restricted: bool,
}

#[derive(Debug)]
struct TagCursor {
    tag: String,
    empty_pages: BTreeSet<u32>,
    /// Last page still counted for this tag; later pages are ignored
    stop_after: Option<u32>,
}

impl TagCursor {
    fn new(tag: String) -> Self {
        Self {
            tag,
            empty_pages: BTreeSet::new(),
            stop_after: None,
        }
    }

    fn is_live(&self) -> bool {
        self.stop_after.is_none()
    }

    fn counts(&self, page: u32) -> bool {
        self.stop_after.map_or(true, |last| page <= last)
    }

    /// Record an empty page; returns the new stop point when it completes a
    /// run of two consecutive empty pages.
    fn record_empty(&mut self, page: u32) -> Option<u32> {
        self.empty_pages.insert(page);
        let run_end = if page > 0 && self.empty_pages.contains(&(page - 1)) {
            page
        } else if self.empty_pages.contains(&(page + 1)) {
            page + 1
        } else {
            return None;
        };
        self.stop_at(run_end)
    }

    /// Lower the stop point to `page`; returns it if it changed.
    fn stop_at(&mut self, page: u32) -> Option<u32> {
        match self.stop_after {
            Some(current) if current <= page => None,
            _ => {
                self.stop_after = Some(page);
                Some(page)
            }
        }
    }
}

struct SourceCursor {
    source: Arc<dyn SourceAdapter>,
    rank: usize,
    tags: Vec<TagCursor>,
    next_page: u32,
    exhausted: bool,
}

/// Everything a session has fetched so far, plus where to continue.
pub(crate) struct FetchState {
    round: u32,
    sources: Vec<SourceCursor>,
    collected: Vec<Collected>,
    health: BTreeMap<String, SourceHealth>,
}

impl FetchState {
    /// `sources` must be in registration order; their position is the rank.
    pub(crate) fn new(sources: &[Arc<dyn SourceAdapter>], resolved: &ResolvedQuerySet) -> Self {
        let mut health = BTreeMap::new();
        let cursors = sources
            .iter()
            .enumerate()
            .map(|(rank, source)| {
                health.insert(source.id().to_string(), SourceHealth::default());
                let tags: Vec<TagCursor> = resolved
                    .tags_for(source.id())
                    .iter()
                    .cloned()
                    .map(TagCursor::new)
                    .collect();
                SourceCursor {
                    source: Arc::clone(source),
                    rank,
                    exhausted: tags.is_empty(),
                    tags,
                    next_page: 0,
                }
            })
            .collect();

        Self {
            round: 0,
            sources: cursors,
            collected: Vec::new(),
            health,
        }
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.sources.iter().all(|s| s.exhausted)
    }

    pub(crate) fn rounds(&self) -> u32 {
        self.round
    }

    pub(crate) fn collected(&self) -> &[Collected] {
        &self.collected
    }

    pub(crate) fn health(&self) -> &BTreeMap<String, SourceHealth> {
        &self.health
    }

    /// Drop items from pages past a tag's stop point and take them off the
    /// source's item count. Returns how many were dropped.
    fn retract_after(
        &mut self,
        source_id: &str,
        source_rank: usize,
        tag_rank: usize,
        last_page: u32,
    ) -> usize {
        let before = self.collected.len();
        self.collected.retain(|c| {
            !(c.seq.source_rank == source_rank
                && c.seq.tag_rank == tag_rank
                && c.seq.page > last_page)
        });
        let dropped = before - self.collected.len();
        if let Some(health) = self.health.get_mut(source_id) {
            health.items = health.items.saturating_sub(dropped as u32);
        }
        dropped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TaskKey {
    source: usize,
    tag: usize,
    page: u32,
}

enum PageResult {
    Fetched { outcome: SearchOutcome, attempts: u32 },
    Cancelled,
}

struct PageReport {
    key: TaskKey,
    result: PageResult,
}

struct PageTask {
    source: Arc<dyn SourceAdapter>,
    tag: String,
    key: TaskKey,
    limit: u32,
    allow_restricted: bool,
}

/// Counters for one round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RoundReport {
    pub round: u32,
    pub pages_ok: u32,
    pub pages_failed: u32,
    pub pages_cancelled: u32,
    pub items_added: usize,
    pub deadline_hit: bool,
}

async fn fetch_page(
    task: PageTask,
    gate: RequestGate,
    token: CancellationToken,
    tx: mpsc::UnboundedSender<PageReport>,
) {
    let PageTask {
        source,
        tag,
        key,
        limit,
        allow_restricted,
    } = task;

    let result = tokio::select! {
        biased;
        _ = token.cancelled() => PageResult::Cancelled,
        (outcome, attempts) = gate.call(
            |o: &SearchOutcome| RetryDecision::from_status(&o.status),
            |_| source.search(&tag, key.page, limit, allow_restricted),
        ) => match outcome {
            Some(outcome) => PageResult::Fetched { outcome, attempts },
            None => PageResult::Cancelled,
        },
    };

    // The receiver only goes away if the round itself was dropped.
    let _ = tx.send(PageReport { key, result });
}

/// Run one round against `state`.
///
/// Returns when every task of the round has reported, or after the deadline
/// passes and the cancelled tasks have drained.
pub(crate) async fn run_round(
    state: &mut FetchState,
    plan: &FetchPlan,
    gate: &RequestGate,
    parent: &CancellationToken,
    deadline: Option<Instant>,
) -> RoundReport {
    state.round += 1;
    let round = state.round;
    let round_token = parent.child_token();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut tasks = JoinSet::new();
    let mut tokens: HashMap<TaskKey, CancellationToken> = HashMap::new();
    let mut report = RoundReport {
        round,
        ..RoundReport::default()
    };

    let mut window_end = vec![0u32; state.sources.len()];
    for (s_idx, cursor) in state.sources.iter().enumerate() {
        if cursor.exhausted {
            continue;
        }
        let end = cursor
            .next_page
            .saturating_add(plan.pages_per_round)
            .min(plan.max_pages);
        window_end[s_idx] = end;

        for (t_idx, tag) in cursor.tags.iter().enumerate() {
            if !tag.is_live() {
                continue;
            }
            for page in cursor.next_page..end {
                let key = TaskKey {
                    source: s_idx,
                    tag: t_idx,
                    page,
                };
                let token = round_token.child_token();
                tokens.insert(key, token.clone());
                let task = PageTask {
                    source: Arc::clone(&cursor.source),
                    tag: tag.tag.clone(),
                    key,
                    limit: plan.per_page_limit,
                    allow_restricted: plan.allow_restricted,
                };
                tasks.spawn(fetch_page(task, gate.clone(), token, tx.clone()));
            }
        }
    }
    drop(tx);
    debug!(round, tasks = tokens.len(), "round scheduled");

    let mut ok_pages = vec![0u32; state.sources.len()];
    let mut failed_pages = vec![0u32; state.sources.len()];
    let mut cancelled_pages = vec![0u32; state.sources.len()];

    let expiry = async {
        match deadline {
            Some(at) => sleep_until(at).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(expiry);

    loop {
        let message = tokio::select! {
            message = rx.recv() => message,
            _ = &mut expiry, if !report.deadline_hit => {
                report.deadline_hit = true;
                warn!(round, "session deadline reached, cancelling outstanding pages");
                round_token.cancel();
                continue;
            }
        };
        let Some(PageReport { key, result }) = message else {
            break;
        };

        let source_rank = state.sources[key.source].rank;
        let source_id = state.sources[key.source].source.id().to_string();
        if !state.sources[key.source].tags[key.tag].counts(key.page) {
            continue;
        }
        let health = state.health.entry(source_id.clone()).or_default();

        match result {
            PageResult::Cancelled => {
                health.pages_cancelled += 1;
                health.last_error = Some(SourceError::SessionDeadlineExceeded.to_string());
                cancelled_pages[key.source] += 1;
                report.pages_cancelled += 1;
            }
            PageResult::Fetched { outcome, attempts } => match outcome.status {
                FetchStatus::Ok => {
                    health.pages_ok += 1;
                    ok_pages[key.source] += 1;
                    report.pages_ok += 1;

                    let tag = &mut state.sources[key.source].tags[key.tag];
                    debug!(
                        source = %source_id,
                        tag = %tag.tag,
                        page = key.page,
                        attempts,
                        items = outcome.items.len(),
                        "page fetched"
                    );

                    if outcome.items.is_empty() {
                        if let Some(last) = tag.record_empty(key.page) {
                            debug!(source = %source_id, tag = %tag.tag, last_page = last, "tag ran dry");
                            cancel_after(&tokens, key.source, key.tag, last);
                            let dropped = state.retract_after(&source_id, source_rank, key.tag, last);
                            report.items_added = report.items_added.saturating_sub(dropped);
                        }
                    } else {
                        health.items += outcome.items.len() as u32;
                        report.items_added += outcome.items.len();
                        state
                            .collected
                            .extend(outcome.items.into_iter().enumerate().map(|(position, item)| {
                                Collected {
                                    seq: SeqKey {
                                        round,
                                        source_rank,
                                        tag_rank: key.tag,
                                        page: key.page,
                                        position,
                                    },
                                    item: Arc::new(item),
                                }
                            }));
                    }
                }
                FetchStatus::Transient(err) => {
                    health.record_failure(&err);
                    failed_pages[key.source] += 1;
                    report.pages_failed += 1;
                    warn!(
                        source = %source_id,
                        page = key.page,
                        attempts,
                        error = %err,
                        "page dropped after retries"
                    );
                }
                FetchStatus::Permanent(err) => {
                    health.record_failure(&err);
                    failed_pages[key.source] += 1;
                    report.pages_failed += 1;

                    let tag = &mut state.sources[key.source].tags[key.tag];
                    warn!(
                        source = %source_id,
                        tag = %tag.tag,
                        page = key.page,
                        code = err.code_str(),
                        error = %err,
                        "permanent failure, skipping tag"
                    );
                    if let Some(last) = tag.stop_at(key.page) {
                        cancel_after(&tokens, key.source, key.tag, last);
                        let dropped = state.retract_after(&source_id, source_rank, key.tag, last);
                        report.items_added = report.items_added.saturating_sub(dropped);
                    }
                }
            },
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            warn!(error = %err, "page task did not complete");
        }
    }

    for (s_idx, cursor) in state.sources.iter_mut().enumerate() {
        if cursor.exhausted {
            continue;
        }
        cursor.next_page = window_end[s_idx];

        let id = cursor.source.id();
        if ok_pages[s_idx] == 0 && failed_pages[s_idx] + cancelled_pages[s_idx] > 0 {
            warn!(
                source = %id,
                failed = failed_pages[s_idx],
                cancelled = cancelled_pages[s_idx],
                "no page succeeded this round, marking source exhausted"
            );
            cursor.exhausted = true;
        } else if cursor.next_page >= plan.max_pages {
            debug!(source = %id, "page budget used up");
            cursor.exhausted = true;
        } else if cursor.tags.iter().all(|t| !t.is_live()) {
            debug!(source = %id, "no live tags left");
            cursor.exhausted = true;
        }
    }

    info!(
        round,
        pages_ok = report.pages_ok,
        pages_failed = report.pages_failed,
        pages_cancelled = report.pages_cancelled,
        items = report.items_added,
        exhausted = state.is_exhausted(),
        "round complete"
    );
    report
}

fn cancel_after(
    tokens: &HashMap<TaskKey, CancellationToken>,
    source: usize,
    tag: usize,
    last_page: u32,
) {
    tokens
        .iter()
        .filter(|(key, _)| key.source == source && key.tag == tag && key.page > last_page)
        .for_each(|(_, token)| token.cancel());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::SourceDescriptor;
    use crate::federated::{ResolvedTags, SafetyRating};
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;

    /// Items on pages 0 and 3 only.
    struct Sparse(SourceDescriptor);

    #[async_trait]
    impl SourceAdapter for Sparse {
        fn descriptor(&self) -> &SourceDescriptor {
            &self.0
        }

        async fn search(&self, tag: &str, page: u32, _: u32, _: bool) -> SearchOutcome {
            let items = match page {
                0 | 3 => (0..3)
                    .map(|i| {
                        Item::new(
                            "sparse",
                            format!("{}-{}-{}", tag, page, i),
                            format!("u{}-{}", page, i),
                            SafetyRating::Safe,
                        )
                    })
                    .collect(),
                _ => Vec::new(),
            };
            SearchOutcome::ok(items)
        }
    }

    #[tokio::test]
    async fn test_items_past_stop_point_are_not_counted() {
        let source: Arc<dyn SourceAdapter> =
            Arc::new(Sparse(SourceDescriptor::new("sparse", "sparse")));
        let resolved = ResolvedQuerySet {
            name: "anya".into(),
            context: None,
            sources: [(
                "sparse".to_string(),
                ResolvedTags {
                    tags: vec!["anya".into()],
                    candidates: Vec::new(),
                    used_fallback: true,
                },
            )]
            .into(),
        };
        let mut state = FetchState::new(&[source], &resolved);
        let plan = FetchPlan {
            per_page_limit: 3,
            pages_per_round: 4,
            max_pages: 10,
            allow_restricted: false,
        };
        let gate = RequestGate::new(4, RetryPolicy::default());

        let report = run_round(&mut state, &plan, &gate, &CancellationToken::new(), None).await;

        assert_eq!(state.collected().len(), 3);
        assert!(state.collected().iter().all(|c| c.seq.page == 0));
        assert_eq!(state.health()["sparse"].items, 3);
        assert_eq!(report.items_added, 3);
        assert!(state.is_exhausted());
    }

    #[test]
    fn test_empty_run_detected_in_either_order() {
        let mut forward = TagCursor::new("t".into());
        assert_eq!(forward.record_empty(3), None);
        assert_eq!(forward.record_empty(4), Some(4));
        assert!(!forward.is_live());

        let mut backward = TagCursor::new("t".into());
        assert_eq!(backward.record_empty(4), None);
        assert_eq!(backward.record_empty(3), Some(4));
    }

    #[test]
    fn test_earlier_run_lowers_stop_point() {
        let mut tag = TagCursor::new("t".into());
        tag.record_empty(4);
        tag.record_empty(5);
        assert_eq!(tag.stop_after, Some(5));
        tag.record_empty(1);
        assert_eq!(tag.record_empty(2), Some(2));
        assert!(tag.counts(2));
        assert!(!tag.counts(3));
    }

    #[test]
    fn test_single_empty_page_at_zero() {
        let mut tag = TagCursor::new("t".into());
        assert_eq!(tag.record_empty(0), None);
        assert!(tag.is_live());
    }

    #[test]
    fn test_seq_key_orders_round_first() {
        let a = SeqKey {
            round: 1,
            source_rank: 5,
            tag_rank: 0,
            page: 1,
            position: 9,
        };
        let b = SeqKey {
            round: 2,
            source_rank: 0,
            tag_rank: 0,
            page: 0,
            position: 0,
        };
        assert!(a < b);
    }
}
