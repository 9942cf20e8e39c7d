use std::sync::{Arc, Mutex};
use std::time::Duration;

use reel_api::{MemoryBackend, PageSource, ReelResult, ResourceKind};
use reel_core::{Entity, FilterValue, Page, QueryParams};
use reel_engine::{EngineConfig, ListController, Step, Transition, PLACEHOLDER};

/// Delegating source that remembers every query it was asked.
struct Recording {
    inner: Arc<dyn PageSource>,
    calls: Mutex<Vec<QueryParams>>,
}

impl Recording {
    fn new(inner: Arc<dyn PageSource>) -> Arc<Self> {
        Arc::new(Self { inner, calls: Mutex::new(Vec::new()) })
    }

    fn calls(&self) -> Vec<QueryParams> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl PageSource for Recording {
    async fn fetch_page(&self, params: QueryParams) -> ReelResult<Page> {
        self.calls.lock().unwrap().push(params.clone());
        self.inner.fetch_page(params).await
    }
}

fn cinema_backend() -> Arc<MemoryBackend> {
    let b = MemoryBackend::new();
    b.insert(ResourceKind::Cinemas, vec![Entity::new(1).with("name", "Downtown")]);
    b.insert(ResourceKind::Halls, vec![Entity::new(10).with("name", "Hall A").with("cinema_id", 1)]);
    b.insert(
        ResourceKind::Movies,
        vec![
            Entity::new(1).with("title", "Batman"),
            Entity::new(2).with("title", "Batman Begins"),
            Entity::new(3).with("title", "Heat"),
        ],
    );
    let showtimes = (1..=25)
        .map(|i| {
            Entity::new(i)
                .with("movie_id", 1 + (i % 3))
                .with("hall_id", if i == 25 { 99 } else { 10 })
                .with("start_time", format!("2026-10-16T{:02}:00:00Z", i % 24))
                .with("format", if i % 2 == 0 { "3D" } else { "2D" })
        })
        .collect();
    b.insert(ResourceKind::Showtimes, showtimes);
    Arc::new(b)
}

fn config(per_page: u32) -> EngineConfig {
    EngineConfig::default().with_per_page(per_page)
}

#[tokio::test(start_paused = true)]
async fn rapid_search_input_issues_one_fetch_with_last_term() {
    let backend = cinema_backend();
    let rec = Recording::new(backend.pages(ResourceKind::Movies));
    let mut list = ListController::new(ResourceKind::Movies, config(10), rec.clone());
    list.mount().await;
    list.settle().await;
    assert_eq!(rec.calls().len(), 1);

    list.on_search_input("batman");
    tokio::time::sleep(Duration::from_millis(120)).await;
    list.on_search_input("batman begins");
    let steps = list.settle().await;

    let calls = rec.calls();
    assert_eq!(calls.len(), 2, "one fetch for mount, one for the settled search");
    assert_eq!(calls[1].search_term.as_deref(), Some("batman begins"));
    assert!(matches!(&steps[0], Step::Search { term, request: Some(_) } if term == "batman begins"));
    let view = list.view();
    assert_eq!(view.rows.len(), 1);
    assert_eq!(view.rows[0].id, 2);
}

#[tokio::test]
async fn result_changing_events_go_back_to_page_one() {
    let backend = cinema_backend();
    let rec = Recording::new(backend.pages(ResourceKind::Showtimes));
    let mut list = ListController::new(ResourceKind::Showtimes, config(5), rec.clone());
    list.mount().await;
    list.settle().await;
    list.on_page_change(3);
    list.settle().await;
    assert_eq!(list.query().page(), 3);

    list.on_filter_change("format", FilterValue::parse("3D"));
    list.settle().await;
    assert_eq!(list.query().page(), 1);
    assert_eq!(rec.calls().last().unwrap().page, 1);
    assert_eq!(list.view().total, Some(12));

    list.on_page_change(2);
    list.on_sort_toggle("start_time");
    list.settle().await;
    assert_eq!(list.query().page(), 1);

    // the "all" sentinel removes the filter
    list.on_filter_change("format", FilterValue::All);
    list.settle().await;
    assert!(rec.calls().last().unwrap().filters.is_empty());
    assert_eq!(list.view().total, Some(25));
}

#[tokio::test]
async fn missing_hall_renders_placeholder() {
    let backend = cinema_backend();
    let mut list = ListController::new(ResourceKind::Showtimes, config(25), backend.pages(ResourceKind::Showtimes))
        .with_references(backend.clone());
    list.mount().await;
    list.settle().await;

    let view = list.view();
    assert_eq!(view.rows.len(), 25);
    let idx = view.rows.iter().position(|r| r.id == 25).unwrap();
    let labels = &view.references[idx];
    assert_eq!(labels[1], ("hall".to_string(), PLACEHOLDER.to_string()));
    assert_eq!(labels[2], ("cinema".to_string(), PLACEHOLDER.to_string()));
    let ok = view.rows.iter().position(|r| r.id == 1).unwrap();
    assert_eq!(view.references[ok][1].1, "Hall A");
    assert_eq!(view.references[ok][2].1, "Downtown");
}

#[tokio::test]
async fn failed_refresh_shows_error_over_last_rows() {
    let backend = cinema_backend();
    let mut list = ListController::new(ResourceKind::Movies, config(10), backend.pages(ResourceKind::Movies));
    list.mount().await;
    list.settle().await;
    assert_eq!(list.view().rows.len(), 3);

    backend.fail_next(ResourceKind::Movies);
    list.refresh();
    assert!(list.view().loading);
    list.settle().await;
    let view = list.view();
    assert!(!view.loading);
    assert!(view.error.as_deref().unwrap().contains("injected failure"));
    assert_eq!(view.rows.len(), 3);
}

#[tokio::test]
async fn shrinking_total_pulls_page_back() {
    let backend = cinema_backend();
    let rec = Recording::new(backend.pages(ResourceKind::Showtimes));
    let mut list = ListController::new(ResourceKind::Showtimes, config(10), rec.clone());
    list.mount().await;
    list.settle().await;

    // known total: 25 rows -> 3 pages
    list.on_page_change(99);
    assert_eq!(list.query().page(), 3);
    list.settle().await;
    assert_eq!(list.view().rows.len(), 5);

    for id in 16..=25 {
        backend.remove_row(ResourceKind::Showtimes, id);
    }
    list.refresh();
    let steps = list.settle().await;
    assert_eq!(steps.len(), 2, "applied past-the-end page, then the clamped re-fetch");
    assert!(matches!(&steps[1], Step::Fetch(Transition::Applied { .. })));
    assert_eq!(list.query().page(), 2);
    assert_eq!(list.view().rows.len(), 5);
    assert!(rec.calls().iter().all(|p| p.page <= 3));
}

#[tokio::test]
async fn view_carries_page_window_and_publishes() {
    let backend = cinema_backend();
    let mut list = ListController::new(ResourceKind::Showtimes, config(4), backend.pages(ResourceKind::Showtimes));
    let handle = list.handle();
    let mut changes = handle.subscribe();
    list.mount().await;
    list.settle().await;
    assert!(changes.has_changed().unwrap());
    changes.borrow_and_update();

    list.on_page_change(4);
    list.settle().await;
    let view = handle.current();
    assert_eq!(view.total, Some(25));
    assert_eq!(view.page_window.pages, vec![2, 3, 4, 5, 6]);
    assert!(changes.has_changed().unwrap());
}

#[tokio::test]
async fn single_page_hides_window() {
    let backend = cinema_backend();
    let mut list = ListController::new(ResourceKind::Movies, config(10), backend.pages(ResourceKind::Movies));
    list.mount().await;
    list.settle().await;
    assert!(list.view().page_window.is_hidden());
}

#[tokio::test(start_paused = true)]
async fn unmount_drops_pending_search() {
    let backend = cinema_backend();
    let rec = Recording::new(backend.pages(ResourceKind::Movies));
    let mut list = ListController::new(ResourceKind::Movies, config(10), rec.clone());
    list.mount().await;
    list.settle().await;

    list.on_search_input("heat");
    list.unmount();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(list.pump().is_empty());
    assert!(list.settle().await.is_empty());
    assert_eq!(rec.calls().len(), 1);

    // events after teardown are ignored
    assert_eq!(list.on_page_change(2), None);
    list.on_search_input("alien");
    assert!(!list.is_mounted());
}

#[tokio::test(start_paused = true)]
async fn remounted_screen_receives_debounced_search() {
    let backend = cinema_backend();
    let rec = Recording::new(backend.pages(ResourceKind::Movies));
    let mut list = ListController::new(ResourceKind::Movies, config(10), rec.clone());
    list.mount().await;
    list.settle().await;
    list.unmount();

    list.mount().await;
    assert!(list.is_mounted());
    list.settle().await;
    list.on_search_input("heat");
    tokio::time::sleep(Duration::from_secs(1)).await;
    let steps = list.settle().await;

    assert!(matches!(&steps[0], Step::Search { term, request: Some(_) } if term == "heat"));
    assert_eq!(list.query().search_term(), "heat");
    let view = list.view();
    assert_eq!(view.rows.len(), 1);
    assert_eq!(view.rows[0].id, 3);
    assert_eq!(rec.calls().len(), 3, "two mounts and one search");
}

#[tokio::test]
async fn applied_pages_with_dangling_references_still_render() {
    let backend = cinema_backend();
    backend.insert(ResourceKind::Halls, vec![]);
    let mut list = ListController::new(ResourceKind::Showtimes, config(5), backend.pages(ResourceKind::Showtimes))
        .with_references(backend.clone());
    list.mount().await;
    list.settle().await;
    let view = list.view();
    assert_eq!(view.rows.len(), 5);
    assert!(view.references.iter().all(|labels| labels[1].1 == PLACEHOLDER && labels[2].1 == PLACEHOLDER));
}

#[tokio::test(start_paused = true)]
async fn submit_bypasses_debounce() {
    let backend = cinema_backend();
    let rec = Recording::new(backend.pages(ResourceKind::Movies));
    let mut list = ListController::new(ResourceKind::Movies, config(10), rec.clone());
    list.mount().await;
    list.settle().await;

    list.on_search_input("hea");
    assert!(list.on_search_submit("heat").is_some());
    list.settle().await;
    let calls = rec.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].search_term.as_deref(), Some("heat"));
}
