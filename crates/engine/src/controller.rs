//! One list screen: query state, debounced search, fetch coordination,
//! reference resolution and the published read model behind a single API.

#![forbid(unsafe_code)]

use std::sync::Arc;

use reel_api::{PageSource, ReferenceSource, ResourceKind};
use reel_core::{FilterValue, PageWindow, QueryState, SortOrder};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::debounce::Debouncer;
use crate::fetch::{FetchCoordinator, RequestId, Transition};
use crate::resolver::ReferenceResolver;
use crate::view::{ListView, ViewHandle, ViewPublisher};

#[derive(Debug)]
enum ControlEvent {
    SearchSettled(String),
}

/// What a call to `next_event` processed.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// A debounced search term was applied; `request` is the fetch it issued,
    /// if the term changed the query.
    Search { term: String, request: Option<RequestId> },
    Fetch(Transition),
}

pub struct ListController {
    screen: ResourceKind,
    config: EngineConfig,
    fetch: FetchCoordinator,
    search: Debouncer<String>,
    events_tx: mpsc::UnboundedSender<ControlEvent>,
    events_rx: mpsc::UnboundedReceiver<ControlEvent>,
    refs: Option<ReferenceResolver>,
    publisher: ViewPublisher,
    mounted: bool,
}

impl ListController {
    /// Controller for `screen`, initially sorted by the screen's default
    /// field. Nothing is fetched until `mount`.
    pub fn new(screen: ResourceKind, config: EngineConfig, pages: Arc<dyn PageSource>) -> Self {
        let config = config.sanitized();
        let mut initial = QueryState::new(config.per_page);
        if let Some(field) = screen.default_sort() {
            initial = initial.sorted_by(field, SortOrder::Asc);
        }
        Self::with_state(screen, config, pages, initial)
    }

    pub fn with_state(screen: ResourceKind, config: EngineConfig, pages: Arc<dyn PageSource>, initial: QueryState) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let publisher = ViewPublisher::new(ListView { query: initial.clone(), ..ListView::default() });
        Self {
            screen,
            config,
            fetch: FetchCoordinator::new(pages, initial),
            search: Debouncer::new(),
            events_tx,
            events_rx,
            refs: None,
            publisher,
            mounted: false,
        }
    }

    /// Resolve this screen's foreign keys against sets loaded from `source`.
    pub fn with_references(mut self, source: Arc<dyn ReferenceSource>) -> Self {
        self.refs = Some(ReferenceResolver::new(source));
        self
    }

    pub fn screen(&self) -> ResourceKind { self.screen }
    pub fn config(&self) -> &EngineConfig { &self.config }
    pub fn query(&self) -> &QueryState { self.fetch.state() }
    pub fn is_mounted(&self) -> bool { self.mounted }
    pub fn references(&self) -> Option<&ReferenceResolver> { self.refs.as_ref() }
    pub fn handle(&self) -> ViewHandle { self.publisher.handle() }

    /// Issue the first fetch and load the reference sets the screen needs.
    /// Reference failures are logged; affected columns show the placeholder.
    pub async fn mount(&mut self) {
        if self.mounted {
            return;
        }
        self.mounted = true;
        // A previous unmount closed the receiver; start a fresh channel.
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.events_tx = events_tx;
        self.events_rx = events_rx;
        info!(screen = %self.screen, per_page = self.config.per_page, "list: mount");
        self.fetch.refresh();
        self.publish();
        if let Some(refs) = self.refs.as_mut() {
            let failures = refs.load_all(&self.screen.reference_kinds()).await;
            for (kind, e) in failures {
                warn!(screen = %self.screen, kind = %kind, error = %e, "list: reference set unavailable");
            }
            self.publish();
        }
    }

    /// Release everything the screen owns: the pending search timer, the
    /// event channel and in-flight fetch tasks. Idempotent.
    pub fn unmount(&mut self) {
        if !self.mounted {
            return;
        }
        self.mounted = false;
        self.search.cancel();
        self.events_rx.close();
        self.fetch.shutdown();
        info!(screen = %self.screen, "list: unmount");
    }

    fn accepting(&self, what: &str) -> bool {
        if !self.mounted {
            debug!(screen = %self.screen, event = what, "list: ignoring event while unmounted");
        }
        self.mounted
    }

    /// Clamped into `1..=last_page` once the total is known.
    pub fn on_page_change(&mut self, page: u32) -> Option<RequestId> {
        assert!(page >= 1, "page numbers start at 1");
        if !self.accepting("page") {
            return None;
        }
        let mut next = self.query().with_page(page);
        if let Some(total) = self.fetch.total() {
            next = next.clamp_to(total);
        }
        self.set_state(next)
    }

    pub fn on_sort_toggle(&mut self, field: &str) -> Option<RequestId> {
        if !self.accepting("sort") {
            return None;
        }
        let next = self.query().with_sort(field);
        self.set_state(next)
    }

    pub fn on_filter_change(&mut self, key: &str, value: FilterValue) -> Option<RequestId> {
        if !self.accepting("filter") {
            return None;
        }
        let next = self.query().with_filter(key, value);
        self.set_state(next)
    }

    pub fn on_clear_filters(&mut self) -> Option<RequestId> {
        if !self.accepting("clear_filters") {
            return None;
        }
        let next = self.query().clear_filters();
        self.set_state(next)
    }

    pub fn on_per_page_change(&mut self, per_page: u32) -> Option<RequestId> {
        if !self.accepting("per_page") {
            return None;
        }
        let next = self.query().with_per_page(per_page);
        self.set_state(next)
    }

    /// Keystroke path: the term is applied once input has been quiet for the
    /// configured debounce delay.
    pub fn on_search_input(&mut self, raw: &str) {
        if !self.accepting("search_input") {
            return;
        }
        let tx = self.events_tx.clone();
        self.search.schedule(raw.to_string(), self.config.debounce, move |term| {
            let _ = tx.send(ControlEvent::SearchSettled(term));
        });
    }

    /// Enter-key path: apply immediately and drop any pending keystrokes.
    pub fn on_search_submit(&mut self, raw: &str) -> Option<RequestId> {
        if !self.accepting("search_submit") {
            return None;
        }
        self.search.cancel();
        let next = self.query().with_search(raw);
        self.set_state(next)
    }

    pub fn refresh(&mut self) -> Option<RequestId> {
        if !self.accepting("refresh") {
            return None;
        }
        let id = self.fetch.refresh();
        self.publish();
        Some(id)
    }

    /// Drop a reference set and fetch it again, e.g. after the screen's
    /// parent selection changed.
    pub async fn reload_references(&mut self, kind: ResourceKind) -> reel_api::ReelResult<()> {
        let Some(refs) = self.refs.as_mut() else { return Ok(()) };
        let res = refs.load(kind).await;
        self.publish();
        res
    }

    fn set_state(&mut self, next: QueryState) -> Option<RequestId> {
        let id = self.fetch.set_query_state(next);
        if id.is_some() {
            self.publish();
        }
        id
    }

    fn handle_event(&mut self, ev: ControlEvent) -> Step {
        match ev {
            ControlEvent::SearchSettled(term) => {
                let next = self.query().with_search(&term);
                let request = self.set_state(next);
                debug!(term = %term, issued = request.is_some(), "list: search settled");
                Step::Search { term, request }
            }
        }
    }

    fn handle_transition(&mut self, t: Transition) -> Step {
        if let Transition::Applied { total, .. } = &t {
            self.count_missing_references();
            // The total can shrink under us (rows deleted elsewhere); never
            // leave the screen parked past the last page.
            let state = self.query();
            let clamped = state.clamp_to(*total);
            if clamped.page() != state.page() {
                warn!(page = state.page(), last = clamped.page(), total, "list: page past end; re-fetching last page");
                self.fetch.set_query_state(clamped);
            }
        }
        self.publish();
        Step::Fetch(t)
    }

    // Once per applied page, not per render.
    fn count_missing_references(&self) {
        let Some(refs) = self.refs.as_ref() else { return };
        let missing: usize = self.fetch.rows().iter().map(|row| refs.missing_references(self.screen, row)).sum();
        if missing > 0 {
            counter!("refs_miss_total", missing as u64);
            debug!(screen = %self.screen, missing, "refs: rows reference unknown entities");
        }
    }

    /// Process everything that is already waiting. Returns the steps taken.
    pub fn pump(&mut self) -> Vec<Step> {
        let mut steps = Vec::new();
        while let Ok(ev) = self.events_rx.try_recv() {
            steps.push(self.handle_event(ev));
        }
        for t in self.fetch.poll_ready() {
            steps.push(self.handle_transition(t));
        }
        steps
    }

    /// Wait for the next settled search or fetch answer. `None` once nothing
    /// is pending (no search timer, no fetch in flight).
    pub async fn next_event(&mut self) -> Option<Step> {
        enum Next {
            Event(ControlEvent),
            Fetch(Transition),
            Idle,
        }
        let search_live = self.mounted && (self.search.is_pending() || !self.events_rx.is_empty());
        let next = tokio::select! {
            biased;
            Some(ev) = self.events_rx.recv(), if search_live => Next::Event(ev),
            Some(t) = self.fetch.next_transition() => Next::Fetch(t),
            else => Next::Idle,
        };
        match next {
            Next::Event(ev) => Some(self.handle_event(ev)),
            Next::Fetch(t) => Some(self.handle_transition(t)),
            Next::Idle => None,
        }
    }

    /// Run `next_event` until the screen is quiet.
    pub async fn settle(&mut self) -> Vec<Step> {
        let mut steps = Vec::new();
        while let Some(s) = self.next_event().await {
            steps.push(s);
        }
        steps
    }

    /// Build the read model from current state.
    pub fn view(&self) -> ListView {
        let state = self.fetch.state();
        let rows = self.fetch.rows().to_vec();
        let references = match &self.refs {
            Some(r) if !self.screen.foreign_keys().is_empty() || !self.screen.derived_references().is_empty() => {
                rows.iter().map(|row| r.denormalize(self.screen, row)).collect()
            }
            _ => Vec::new(),
        };
        let total_pages = self.fetch.total().map(|t| state.total_pages(t)).unwrap_or(0);
        ListView {
            rows,
            references,
            total: self.fetch.total(),
            loading: self.fetch.loading(),
            error: self.fetch.error().map(str::to_string),
            page_window: PageWindow::compute(state.page(), total_pages, self.config.max_buttons),
            query: state.clone(),
            version: 0,
        }
    }

    fn publish(&mut self) {
        let v = self.view();
        self.publisher.publish(v);
    }
}

impl Drop for ListController {
    fn drop(&mut self) {
        self.unmount();
    }
}
