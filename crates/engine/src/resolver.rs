//! Id-indexed reference sets used to render foreign keys as names.
//!
//! Sets are loaded once (or on explicit reload) and never track changes in
//! the referenced collection. A row pointing at an id that is not in its set
//! resolves to a placeholder instead of failing.

#![forbid(unsafe_code)]

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use metrics::histogram;
use reel_api::{ForeignKey, ReelResult, ReferenceSource, ResourceKind};
use reel_core::{Entity, EntityId};
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

/// Label rendered for a reference that cannot be resolved.
pub const PLACEHOLDER: &str = "Unknown";

#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    by_id: FxHashMap<EntityId, Entity>,
}

impl ReferenceSet {
    pub fn from_rows(rows: Vec<Entity>) -> Self {
        let mut by_id = FxHashMap::default();
        by_id.reserve(rows.len());
        for e in rows {
            by_id.insert(e.id, e);
        }
        Self { by_id }
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> { self.by_id.get(&id) }
    pub fn len(&self) -> usize { self.by_id.len() }
    pub fn is_empty(&self) -> bool { self.by_id.is_empty() }
}

/// Outcome of a lookup. `Missing` carries what was asked for so callers can
/// show it next to the placeholder if they want.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolved<'a> {
    Found { kind: ResourceKind, entity: &'a Entity },
    Missing { kind: ResourceKind, id: Option<EntityId> },
}

impl<'a> Resolved<'a> {
    pub fn entity(&self) -> Option<&'a Entity> {
        match self {
            Resolved::Found { entity, .. } => Some(entity),
            Resolved::Missing { .. } => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Resolved::Missing { .. })
    }

    /// Display label: the kind's label attribute, `#id` when that attribute
    /// is empty, `PLACEHOLDER` when unresolved.
    pub fn label(&self) -> Cow<'a, str> {
        match self {
            Resolved::Found { kind, entity } => match entity.display_field(kind.label_field()) {
                Some(s) if !s.is_empty() => Cow::Owned(s),
                _ => Cow::Owned(format!("#{}", entity.id)),
            },
            Resolved::Missing { .. } => Cow::Borrowed(PLACEHOLDER),
        }
    }
}

/// A reference-set fetch started by `begin_load`, finished by `finish_load`.
/// Holding no borrow of the resolver while it runs lets a screen start a
/// reload while an older one is still in flight.
pub struct PendingLoad {
    kind: ResourceKind,
    generation: u64,
    source: Arc<dyn ReferenceSource>,
}

pub struct LoadedSet {
    kind: ResourceKind,
    generation: u64,
    result: ReelResult<Vec<Entity>>,
    took_ms: f64,
}

impl PendingLoad {
    pub fn kind(&self) -> ResourceKind { self.kind }

    pub async fn fetch(self) -> LoadedSet {
        let t0 = Instant::now();
        let result = self.source.fetch_reference_set(self.kind).await;
        LoadedSet { kind: self.kind, generation: self.generation, result, took_ms: t0.elapsed().as_secs_f64() * 1000.0 }
    }
}

pub struct ReferenceResolver {
    source: Arc<dyn ReferenceSource>,
    sets: HashMap<ResourceKind, ReferenceSet>,
    generations: HashMap<ResourceKind, u64>,
}

impl ReferenceResolver {
    pub fn new(source: Arc<dyn ReferenceSource>) -> Self {
        Self { source, sets: HashMap::new(), generations: HashMap::new() }
    }

    pub fn is_loaded(&self, kind: ResourceKind) -> bool {
        self.sets.contains_key(&kind)
    }

    pub fn set(&self, kind: ResourceKind) -> Option<&ReferenceSet> {
        self.sets.get(&kind)
    }

    pub fn begin_load(&mut self, kind: ResourceKind) -> PendingLoad {
        let g = self.generations.entry(kind).or_insert(0);
        *g += 1;
        PendingLoad { kind, generation: *g, source: Arc::clone(&self.source) }
    }

    /// Install a fetched set. A failed fetch keeps the previous set; an answer
    /// overtaken by a newer `begin_load` for the same kind is dropped.
    pub fn finish_load(&mut self, loaded: LoadedSet) -> ReelResult<()> {
        let LoadedSet { kind, generation, result, took_ms } = loaded;
        histogram!("refs_load_ms", took_ms);
        let current = self.generations.get(&kind).copied().unwrap_or(0);
        if generation != current {
            debug!(kind = %kind, generation, current, "refs: stale load dropped");
            return Ok(());
        }
        match result {
            Ok(rows) => {
                let set = ReferenceSet::from_rows(rows);
                info!(kind = %kind, rows = set.len(), took_ms = %format!("{:.0}", took_ms), "refs: load ok");
                self.sets.insert(kind, set);
                Ok(())
            }
            Err(e) => {
                warn!(kind = %kind, error = %e, kept_previous = self.sets.contains_key(&kind), "refs: load failed");
                Err(e)
            }
        }
    }

    /// Fetch `kind` and replace its set.
    pub async fn load(&mut self, kind: ResourceKind) -> ReelResult<()> {
        let pending = self.begin_load(kind);
        let loaded = pending.fetch().await;
        self.finish_load(loaded)
    }

    /// Load only when absent.
    pub async fn ensure_loaded(&mut self, kind: ResourceKind) -> ReelResult<()> {
        if self.is_loaded(kind) {
            return Ok(());
        }
        self.load(kind).await
    }

    /// Fetch every missing kind concurrently. Returns the failures; the
    /// successful sets are installed either way.
    pub async fn load_all(&mut self, kinds: &[ResourceKind]) -> Vec<(ResourceKind, reel_api::ReelError)> {
        let missing: Vec<ResourceKind> = kinds.iter().copied().filter(|k| !self.is_loaded(*k)).collect();
        let pending: Vec<PendingLoad> = missing.into_iter().map(|k| self.begin_load(k)).collect();
        let loaded = join_all(pending.into_iter().map(PendingLoad::fetch)).await;
        let mut failures = Vec::new();
        for l in loaded {
            let kind = l.kind;
            if let Err(e) = self.finish_load(l) {
                failures.push((kind, e));
            }
        }
        failures
    }

    /// Forget a set so the next `ensure_loaded` refetches it.
    pub fn invalidate(&mut self, kind: ResourceKind) {
        if self.sets.remove(&kind).is_some() {
            debug!(kind = %kind, "refs: invalidated");
        }
    }

    pub fn resolve(&self, kind: ResourceKind, id: EntityId) -> Resolved<'_> {
        match self.sets.get(&kind).and_then(|s| s.get(id)) {
            Some(entity) => Resolved::Found { kind, entity },
            None => Resolved::Missing { kind, id: Some(id) },
        }
    }

    /// Resolve one foreign-key attribute of `row`.
    pub fn resolve_field(&self, row: &Entity, fk: &ForeignKey) -> Resolved<'_> {
        match row.ref_id(fk.field) {
            Some(id) => self.resolve(fk.kind, id),
            None => Resolved::Missing { kind: fk.kind, id: None },
        }
    }

    /// Follow a path of foreign keys starting at `row`, e.g. showtime ->
    /// hall -> cinema. Any missing hop makes the whole chain missing.
    ///
    /// # Panics
    ///
    /// Panics if `path` is empty.
    pub fn resolve_chain(&self, row: &Entity, path: &[ForeignKey]) -> Resolved<'_> {
        let Some((first, rest)) = path.split_first() else {
            panic!("resolve_chain needs at least one hop");
        };
        let mut cur = self.resolve_field(row, first);
        for fk in rest {
            cur = match cur.entity() {
                Some(e) => self.resolve_field(e, fk),
                None => return Resolved::Missing { kind: path[path.len() - 1].kind, id: None },
            };
        }
        cur
    }

    /// Number of references on `row` that resolve to the placeholder.
    pub fn missing_references(&self, screen: ResourceKind, row: &Entity) -> usize {
        let direct = screen.foreign_keys().iter().filter(|fk| self.resolve_field(row, fk).is_missing()).count();
        let derived = screen.derived_references().iter().filter(|(_, path)| self.resolve_chain(row, path).is_missing()).count();
        direct + derived
    }

    /// Display labels for every reference a `screen` row carries, as
    /// `(column, label)` pairs. Columns are the foreign-key field without its
    /// `_id` suffix, followed by derived multi-hop columns.
    pub fn denormalize(&self, screen: ResourceKind, row: &Entity) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for fk in screen.foreign_keys() {
            let column = fk.field.strip_suffix("_id").unwrap_or(fk.field);
            out.push((column.to_string(), self.resolve_field(row, fk).label().into_owned()));
        }
        for (column, path) in screen.derived_references() {
            out.push((column.to_string(), self.resolve_chain(row, path).label().into_owned()));
        }
        out
    }
}
