//! Reel API seam.
//!
//! Defines the collaborator traits the list engine consumes (`PageSource`,
//! `ReferenceSource`) and an in-process `MemoryBackend` implementing both.
//! A REST transport would implement the same traits; the engine never knows.

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use reel_core::{Entity, Page, QueryParams, SortOrder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

pub mod resources;

pub use resources::{ForeignKey, ResourceKind};

/// API errors, kept serialisable so they can cross a transport boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ReelError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type ReelResult<T> = Result<T, ReelError>;

/// Paged access to the rows of one list screen.
///
/// Implementations must be side-effect free from the caller's point of view
/// and must answer an out-of-range page with empty `rows` and the real `total`.
#[async_trait::async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, params: QueryParams) -> ReelResult<Page>;
}

/// Whole-collection access used to resolve foreign keys for display.
#[async_trait::async_trait]
pub trait ReferenceSource: Send + Sync {
    async fn fetch_reference_set(&self, kind: ResourceKind) -> ReelResult<Vec<Entity>>;
}

// ----------------- In-memory implementation -----------------

/// In-memory backend holding every collection. Used by tests and the CLI.
#[derive(Default)]
pub struct MemoryBackend {
    collections: RwLock<HashMap<ResourceKind, Vec<Entity>>>,
    fail_next: Mutex<HashSet<ResourceKind>>,
    latency: Option<Duration>,
    page_calls: AtomicU64,
    reference_calls: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self { Self::default() }

    /// Delay every answer, which makes overlapping requests observable.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Build from a fixture object such as `{"movies": [...], "halls": [...]}`.
    pub fn from_json(doc: &Value) -> ReelResult<Self> {
        let obj = doc.as_object().ok_or_else(|| ReelError::Validation("fixture root must be an object".into()))?;
        let me = Self::new();
        for (key, rows) in obj {
            let kind = ResourceKind::parse(key).ok_or_else(|| ReelError::Validation(format!("unknown resource: {}", key)))?;
            let rows: Vec<Entity> = serde_json::from_value(rows.clone())
                .map_err(|e| ReelError::Validation(format!("{}: {}", key, e)))?;
            me.insert(kind, rows);
        }
        Ok(me)
    }

    pub fn insert(&self, kind: ResourceKind, rows: Vec<Entity>) {
        let mut map = self.collections.write().unwrap_or_else(|e| e.into_inner());
        map.insert(kind, rows);
    }

    pub fn remove_row(&self, kind: ResourceKind, id: reel_core::EntityId) -> bool {
        let mut map = self.collections.write().unwrap_or_else(|e| e.into_inner());
        match map.get_mut(&kind) {
            Some(rows) => {
                let before = rows.len();
                rows.retain(|r| r.id != id);
                rows.len() != before
            }
            None => false,
        }
    }

    /// Make the next request touching `kind` fail with a transport error.
    pub fn fail_next(&self, kind: ResourceKind) {
        self.fail_next.lock().unwrap_or_else(|e| e.into_inner()).insert(kind);
    }

    pub fn page_calls(&self) -> u64 { self.page_calls.load(AtomicOrdering::Relaxed) }
    pub fn reference_calls(&self) -> u64 { self.reference_calls.load(AtomicOrdering::Relaxed) }

    /// A `PageSource` bound to one resource's list screen.
    pub fn pages(self: &Arc<Self>, kind: ResourceKind) -> Arc<dyn PageSource> {
        Arc::new(ResourcePages { backend: Arc::clone(self), kind })
    }

    fn take_failure(&self, kind: ResourceKind) -> bool {
        self.fail_next.lock().unwrap_or_else(|e| e.into_inner()).remove(&kind)
    }

    async fn simulate_latency(&self) {
        if let Some(d) = self.latency {
            tokio::time::sleep(d).await;
        }
    }

    fn query(&self, kind: ResourceKind, params: &QueryParams) -> ReelResult<Page> {
        let map = self.collections.read().unwrap_or_else(|e| e.into_inner());
        let rows = map.get(&kind).ok_or_else(|| ReelError::NotFound(format!("no collection: {}", kind)))?;
        let needle = params.search_term.as_deref().map(|s| s.to_lowercase());
        let mut hits: Vec<&Entity> = rows
            .iter()
            .filter(|row| {
                params.filters.iter().all(|(field, want)| {
                    if field == "id" {
                        return want.matches(&Value::from(row.id));
                    }
                    row.get(field).map(|v| want.matches(v)).unwrap_or(false)
                })
            })
            .filter(|row| match &needle {
                Some(n) => matches_search(row, n),
                None => true,
            })
            .collect();
        if let Some(field) = &params.sort_field {
            let order = params.sort_order.unwrap_or(SortOrder::Asc);
            hits.sort_by(|a, b| compare_rows(a, b, field, order));
        }
        let total = hits.len() as u64;
        let offset = params.offset().min(total) as usize;
        let rows = hits.into_iter().skip(offset).take(params.per_page as usize).cloned().collect();
        Ok(Page { rows, total })
    }
}

fn matches_search(row: &Entity, needle_lower: &str) -> bool {
    row.attrs.values().any(|v| match v {
        Value::String(s) => s.to_lowercase().contains(needle_lower),
        _ => false,
    })
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

// Missing values sort last in both directions; ties fall back to id.
fn compare_rows(a: &Entity, b: &Entity, field: &str, order: SortOrder) -> Ordering {
    let va = if field == "id" { Some(Value::from(a.id)) } else { a.get(field).filter(|v| !v.is_null()).cloned() };
    let vb = if field == "id" { Some(Value::from(b.id)) } else { b.get(field).filter(|v| !v.is_null()).cloned() };
    let primary = match (va, vb) {
        (Some(x), Some(y)) => {
            let o = compare_values(&x, &y);
            if order == SortOrder::Desc { o.reverse() } else { o }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

struct ResourcePages {
    backend: Arc<MemoryBackend>,
    kind: ResourceKind,
}

#[async_trait::async_trait]
impl PageSource for ResourcePages {
    async fn fetch_page(&self, params: QueryParams) -> ReelResult<Page> {
        let t0 = Instant::now();
        self.backend.page_calls.fetch_add(1, AtomicOrdering::Relaxed);
        debug!(kind = %self.kind, page = params.page, search = ?params.search_term, "api: fetch_page start");
        self.backend.simulate_latency().await;
        if self.backend.take_failure(self.kind) {
            counter!("api_fetch_page_failed_total", 1u64);
            return Err(ReelError::Transport(format!("{}: injected failure", self.kind)));
        }
        let page = self.backend.query(self.kind, &params)?;
        histogram!("api_fetch_page_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(kind = %self.kind, page = params.page, rows = page.rows.len(), total = page.total, took_ms = %t0.elapsed().as_millis(), "api: fetch_page ok");
        Ok(page)
    }
}

#[async_trait::async_trait]
impl ReferenceSource for MemoryBackend {
    async fn fetch_reference_set(&self, kind: ResourceKind) -> ReelResult<Vec<Entity>> {
        let t0 = Instant::now();
        self.reference_calls.fetch_add(1, AtomicOrdering::Relaxed);
        self.simulate_latency().await;
        if self.take_failure(kind) {
            return Err(ReelError::Transport(format!("{}: injected failure", kind)));
        }
        let map = self.collections.read().unwrap_or_else(|e| e.into_inner());
        let rows = map.get(&kind).cloned().ok_or_else(|| ReelError::NotFound(format!("no collection: {}", kind)))?;
        info!(kind = %kind, rows = rows.len(), took_ms = %t0.elapsed().as_millis(), "api: reference set ok");
        Ok(rows)
    }
}
