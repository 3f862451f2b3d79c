//! Sessions: accumulated results for one logical query, paged on demand.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::engine::{run_round, FetchPlan, FetchState};
use super::merge::{rank_round, Deduper};
use super::types::{Item, Page, ResolvedQuerySet, SafetyMode, SessionSummary, SourceStatus};
use crate::config::AggregatorConfig;
use crate::connectors::SourceAdapter;
use crate::retry::RequestGate;

/// Service settings a session keeps for its lifetime.
#[derive(Debug, Clone)]
pub(crate) struct SessionSettings {
    pub gate: RequestGate,
    pub per_page_limit: u32,
    pub pages_per_round: u32,
    pub max_pages: u32,
    pub deadline: Option<Duration>,
    pub blocklist: Arc<BTreeSet<String>>,
}

impl SessionSettings {
    pub(crate) fn from_config(config: &AggregatorConfig, gate: RequestGate) -> Self {
        Self {
            gate,
            per_page_limit: config.per_page_limit,
            pages_per_round: config.pages_per_round,
            max_pages: config.max_pages_per_source,
            deadline: config.session_deadline(),
            blocklist: Arc::new(config.normalized_blocklist()),
        }
    }
}

/// `ranked` only ever grows at the end, so windows already served keep
/// their items.
struct SessionState {
    fetch: FetchState,
    ranked: Arc<Vec<Arc<Item>>>,
    seen: Deduper,
}

pub(crate) struct AggregationSession {
    resolved: Arc<ResolvedQuerySet>,
    mode: SafetyMode,
    created_at: DateTime<Utc>,
    cancel: CancellationToken,
    settings: SessionSettings,
    plan: FetchPlan,
    state: Mutex<SessionState>,
}

impl AggregationSession {
    pub(crate) fn new(
        resolved: Arc<ResolvedQuerySet>,
        sources: &[Arc<dyn SourceAdapter>],
        mode: SafetyMode,
        settings: SessionSettings,
    ) -> Self {
        let plan = FetchPlan {
            per_page_limit: settings.per_page_limit,
            pages_per_round: settings.pages_per_round,
            max_pages: settings.max_pages,
            allow_restricted: mode.allows_restricted(),
        };
        Self {
            state: Mutex::new(SessionState {
                fetch: FetchState::new(sources, &resolved),
                ranked: Arc::new(Vec::new()),
                seen: Deduper::new(),
            }),
            resolved,
            mode,
            created_at: Utc::now(),
            cancel: CancellationToken::new(),
            settings,
            plan,
        }
    }

    /// Run rounds until `target` ranked items exist, the session exhausts,
    /// or the deadline for this call passes.
    async fn fill_locked(&self, state: &mut SessionState, target: usize) {
        let deadline = self.settings.deadline.map(|d| Instant::now() + d);

        while state.ranked.len() < target
            && !state.fetch.is_exhausted()
            && !self.cancel.is_cancelled()
        {
            let before = state.ranked.len();
            let report = run_round(
                &mut state.fetch,
                &self.plan,
                &self.settings.gate,
                &self.cancel,
                deadline,
            )
            .await;

            let fresh = rank_round(
                state.fetch.collected(),
                report.round,
                self.mode,
                &self.settings.blocklist,
                &mut state.seen,
            );
            Arc::make_mut(&mut state.ranked).extend(fresh);
            debug!(
                name = %self.resolved.name,
                round = report.round,
                ranked = state.ranked.len(),
                added = state.ranked.len().saturating_sub(before),
                "session extended"
            );

            if report.deadline_hit {
                break;
            }
        }
    }

    pub(crate) async fn fill(&self, target: usize) {
        let mut state = self.state.lock().await;
        self.fill_locked(&mut state, target).await;
        info!(
            name = %self.resolved.name,
            mode = self.mode.as_str(),
            items = state.ranked.len(),
            rounds = state.fetch.rounds(),
            exhausted = state.fetch.is_exhausted(),
            "session filled"
        );
    }

    pub(crate) async fn page(&self, index: usize, size: usize) -> Page {
        let start = index.saturating_mul(size);
        let end = start.saturating_add(size);

        let mut state = self.state.lock().await;
        if size > 0 {
            self.fill_locked(&mut state, end).await;
        }

        let exhausted = state.fetch.is_exhausted() || self.cancel.is_cancelled();
        Page {
            items: state.ranked.iter().skip(start).take(size).cloned().collect(),
            has_more: state.ranked.len() > end || !exhausted,
        }
    }

    pub(crate) async fn source_status(&self) -> BTreeMap<String, SourceStatus> {
        let state = self.state.lock().await;
        state
            .fetch
            .health()
            .iter()
            .map(|(id, health)| (id.clone(), health.status()))
            .collect()
    }

    pub(crate) async fn summary(&self) -> SessionSummary {
        let state = self.state.lock().await;
        let health = state.fetch.health().clone();
        SessionSummary {
            name: self.resolved.name.clone(),
            context: self.resolved.context.clone(),
            safety_mode: self.mode,
            total_items: state.ranked.len(),
            exhausted: state.fetch.is_exhausted(),
            rounds: state.fetch.rounds(),
            created_at: self.created_at,
            source_status: health
                .iter()
                .map(|(id, h)| (id.clone(), h.status()))
                .collect(),
            health,
            resolved: (*self.resolved).clone(),
        }
    }

    pub(crate) async fn ranked(&self) -> Arc<Vec<Arc<Item>>> {
        Arc::clone(&self.state.lock().await.ranked)
    }

    pub(crate) async fn is_exhausted(&self) -> bool {
        self.state.lock().await.fetch.is_exhausted()
    }
}

/// Caller's view of a session.
///
/// Cheap to clone. Paging is stable while the session lives: extensions only
/// append, so a window that was full once returns the same items again.
#[derive(Clone)]
pub struct SessionHandle {
    session: Arc<AggregationSession>,
}

impl SessionHandle {
    pub(crate) fn new(session: Arc<AggregationSession>) -> Self {
        Self { session }
    }

    /// Items `[index * size, (index + 1) * size)` of the ranked list,
    /// fetching more from the sources when the window is not yet covered.
    pub async fn page(&self, index: usize, size: usize) -> Page {
        self.session.page(index, size).await
    }

    pub async fn source_status(&self) -> BTreeMap<String, SourceStatus> {
        self.session.source_status().await
    }

    pub async fn summary(&self) -> SessionSummary {
        self.session.summary().await
    }

    /// Ranked items fetched so far.
    pub async fn items(&self) -> Arc<Vec<Arc<Item>>> {
        self.session.ranked().await
    }

    pub async fn len(&self) -> usize {
        self.session.ranked().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_exhausted(&self) -> bool {
        self.session.is_exhausted().await
    }

    pub fn resolved(&self) -> &ResolvedQuerySet {
        &self.session.resolved
    }

    pub fn safety_mode(&self) -> SafetyMode {
        self.session.mode
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.session.created_at
    }

    /// Stop outstanding work; items already collected stay available.
    pub fn cancel(&self) {
        self.session.cancel.cancel();
    }

    /// Whether two handles refer to the same cached session.
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.session, &other.session)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("name", &self.session.resolved.name)
            .field("mode", &self.session.mode)
            .field("created_at", &self.session.created_at)
            .finish()
    }
}
