//! Fetch coordination: turn query-state changes into page fetches and keep
//! only the answer to the most recently issued request.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use reel_api::{PageSource, ReelResult};
use reel_core::{Entity, Page, QueryState};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub type RequestId = u64;

/// A dispatched fetch: the query snapshot it was issued for plus its place in
/// issuance order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub id: RequestId,
    pub state: QueryState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Idle,
    Loading,
    Applied,
    Failed,
}

/// What happened when a request came back.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied { request: FetchRequest, total: u64 },
    /// A newer request had been issued; the answer was dropped untouched.
    Discarded { request: FetchRequest },
    Failed { request: FetchRequest, error: String },
}

impl Transition {
    pub fn request(&self) -> &FetchRequest {
        match self {
            Transition::Applied { request, .. } | Transition::Discarded { request } | Transition::Failed { request, .. } => request,
        }
    }
}

/// Issuance-order bookkeeping, independent of any I/O.
///
/// Ids grow monotonically; only the latest id may settle the list.
#[derive(Debug, Clone)]
pub struct RequestTracker {
    latest: RequestId,
    latest_settled: bool,
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self { latest: 0, latest_settled: true }
    }
}

impl RequestTracker {
    pub fn issue(&mut self) -> RequestId {
        self.latest += 1;
        self.latest_settled = false;
        self.latest
    }

    pub fn latest(&self) -> RequestId { self.latest }

    pub fn is_current(&self, id: RequestId) -> bool {
        id == self.latest
    }

    /// Mark `id` as answered. Returns false for stale ids, which leave the
    /// tracker untouched.
    pub fn settle(&mut self, id: RequestId) -> bool {
        if !self.is_current(id) {
            return false;
        }
        self.latest_settled = true;
        true
    }

    /// True while the most recently issued request has no answer yet.
    pub fn outstanding(&self) -> bool {
        !self.latest_settled
    }
}

struct Completion {
    request: FetchRequest,
    result: ReelResult<Page>,
    took: Duration,
}

/// Owns the request lifecycle of one list screen.
///
/// State changes dispatch a fetch on the Tokio runtime; answers are applied
/// when the owner drains them (`poll_ready`, `next_transition`), so every
/// mutation of rows/total/error happens on the owner's side. In-flight
/// network calls are never cancelled; a superseded answer just has no effect.
pub struct FetchCoordinator {
    source: Arc<dyn PageSource>,
    state: QueryState,
    tracker: RequestTracker,
    last_settled: FetchPhase,
    rows: Vec<Entity>,
    total: Option<u64>,
    error: Option<String>,
    tasks: JoinSet<Completion>,
}

impl FetchCoordinator {
    pub fn new(source: Arc<dyn PageSource>, initial: QueryState) -> Self {
        Self {
            source,
            state: initial,
            tracker: RequestTracker::default(),
            last_settled: FetchPhase::Idle,
            rows: Vec::new(),
            total: None,
            error: None,
            tasks: JoinSet::new(),
        }
    }

    pub fn state(&self) -> &QueryState { &self.state }
    pub fn rows(&self) -> &[Entity] { &self.rows }
    pub fn total(&self) -> Option<u64> { self.total }
    pub fn error(&self) -> Option<&str> { self.error.as_deref() }
    pub fn loading(&self) -> bool { self.tracker.outstanding() }
    pub fn latest_request(&self) -> RequestId { self.tracker.latest() }
    pub fn in_flight(&self) -> usize { self.tasks.len() }

    pub fn phase(&self) -> FetchPhase {
        if self.tracker.outstanding() { FetchPhase::Loading } else { self.last_settled }
    }

    /// Replace the query state. An equal state issues nothing.
    pub fn set_query_state(&mut self, next: QueryState) -> Option<RequestId> {
        if next == self.state {
            debug!(page = next.page(), "fetch: state unchanged; skipping");
            return None;
        }
        self.state = next;
        Some(self.dispatch())
    }

    /// Re-issue the current state.
    pub fn refresh(&mut self) -> RequestId {
        self.dispatch()
    }

    fn dispatch(&mut self) -> RequestId {
        let id = self.tracker.issue();
        let request = FetchRequest { id, state: self.state.clone() };
        let params = request.state.to_query_params();
        let source = Arc::clone(&self.source);
        info!(id, page = params.page, sort = ?params.sort_field, search = ?params.search_term, filters = params.filters.len(), "fetch: issued");
        counter!("fetch_issued_total", 1u64);
        self.tasks.spawn(async move {
            let t0 = Instant::now();
            let result = source.fetch_page(params).await;
            Completion { request, result, took: t0.elapsed() }
        });
        id
    }

    fn apply(&mut self, c: Completion) -> Transition {
        let Completion { request, result, took } = c;
        histogram!("fetch_ms", took.as_secs_f64() * 1000.0);
        if !self.tracker.settle(request.id) {
            counter!("fetch_discarded_total", 1u64);
            info!(id = request.id, latest = self.tracker.latest(), ok = result.is_ok(), took_ms = %took.as_millis(), "fetch: stale response discarded");
            return Transition::Discarded { request };
        }
        match result {
            Ok(page) => {
                let total = page.total;
                info!(id = request.id, rows = page.rows.len(), total, took_ms = %took.as_millis(), "fetch: applied");
                counter!("fetch_applied_total", 1u64);
                self.rows = page.rows;
                self.total = Some(total);
                self.error = None;
                self.last_settled = FetchPhase::Applied;
                Transition::Applied { request, total }
            }
            Err(e) => {
                // Rows and total keep their last good values.
                warn!(id = request.id, error = %e, took_ms = %took.as_millis(), "fetch: failed");
                counter!("fetch_failed_total", 1u64);
                let error = e.to_string();
                self.error = Some(error.clone());
                self.last_settled = FetchPhase::Failed;
                Transition::Failed { request, error }
            }
        }
    }

    /// Apply every answer that has already arrived, without waiting.
    pub fn poll_ready(&mut self) -> Vec<Transition> {
        let mut out = Vec::new();
        while let Some(res) = self.tasks.try_join_next() {
            match res {
                Ok(c) => out.push(self.apply(c)),
                Err(e) => warn!(error = %e, "fetch: task ended without a response"),
            }
        }
        out
    }

    /// Wait for the next answer. `None` once nothing is in flight.
    pub async fn next_transition(&mut self) -> Option<Transition> {
        while let Some(res) = self.tasks.join_next().await {
            match res {
                Ok(c) => return Some(self.apply(c)),
                Err(e) => warn!(error = %e, "fetch: task ended without a response"),
            }
        }
        None
    }

    /// Drain until nothing is in flight.
    pub async fn settle(&mut self) -> Vec<Transition> {
        let mut out = Vec::new();
        while let Some(t) = self.next_transition().await {
            out.push(t);
        }
        out
    }

    /// Abort in-flight fetch tasks; used on teardown.
    pub fn shutdown(&mut self) {
        if !self.tasks.is_empty() {
            debug!(in_flight = self.tasks.len(), "fetch: aborting in-flight tasks");
        }
        self.tasks.abort_all();
        self.tasks.detach_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_settles_only_latest() {
        let mut t = RequestTracker::default();
        assert!(!t.outstanding());
        let a = t.issue();
        let b = t.issue();
        assert!(t.outstanding());
        assert!(!t.settle(a));
        assert!(t.outstanding(), "stale answer must not clear loading");
        assert!(t.settle(b));
        assert!(!t.outstanding());
        assert!(!t.settle(a));
    }

    #[test]
    fn ids_are_monotonic() {
        let mut t = RequestTracker::default();
        let ids: Vec<_> = (0..5).map(|_| t.issue()).collect();
        assert!(ids.windows(2).all(|w| w[1] > w[0]));
        assert_eq!(t.latest(), 5);
    }
}
