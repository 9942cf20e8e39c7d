//! Reel core types shared by the API seam, the list engine and the CLI.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod query;
pub mod window;

pub use query::{QueryParams, QueryState};
pub use window::{compute_window, PageWindow};

/// Identifier carried by every REST entity (`id` field).
pub type EntityId = i64;

/// A row or reference record as returned by the backend.
///
/// Only `id` is typed; everything else stays as JSON attributes since the
/// engine never interprets a screen's columns beyond foreign keys and labels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    #[serde(flatten)]
    pub attrs: Map<String, Value>,
}

impl Entity {
    pub fn new(id: EntityId) -> Self {
        Self { id, attrs: Map::new() }
    }

    /// Builder-style attribute setter, handy for fixtures.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        if field == "id" {
            return None;
        }
        self.attrs.get(field)
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(|v| v.as_str())
    }

    /// Read a foreign-key attribute. Numeric strings are accepted because some
    /// endpoints serialise ids as text.
    pub fn ref_id(&self, field: &str) -> Option<EntityId> {
        match self.get(field)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Render an attribute for display; `None` when absent or null.
    pub fn display_field(&self, field: &str) -> Option<String> {
        if field == "id" {
            return Some(self.id.to_string());
        }
        match self.attrs.get(field)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// One page of rows plus the server-side total row count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Page {
    pub rows: Vec<Entity>,
    pub total: u64,
}

impl Page {
    pub fn new(rows: Vec<Entity>, total: u64) -> Self {
        Self { rows, total }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum SortOrder {
    #[default]
    #[serde(rename = "ASC")]
    Asc,
    #[serde(rename = "DESC")]
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }
}

/// Value of a list filter. `All` is the "no restriction" sentinel that select
/// boxes emit; it is never stored in a `QueryState`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Int(i64),
    Text(String),
    All,
}

impl FilterValue {
    /// Interpret raw select/input text: `""` and `"all"` mean unset.
    pub fn parse(raw: &str) -> Self {
        let t = raw.trim();
        if t.is_empty() || t.eq_ignore_ascii_case("all") {
            return FilterValue::All;
        }
        if let Ok(n) = t.parse::<i64>() {
            return FilterValue::Int(n);
        }
        match t {
            "true" => FilterValue::Bool(true),
            "false" => FilterValue::Bool(false),
            _ => FilterValue::Text(t.to_string()),
        }
    }

    pub fn is_unset(&self) -> bool {
        match self {
            FilterValue::All => true,
            FilterValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Compare against an entity attribute (exact match, numeric strings
    /// equal to their number).
    pub fn matches(&self, v: &Value) -> bool {
        match (self, v) {
            (FilterValue::All, _) => true,
            (FilterValue::Bool(b), Value::Bool(x)) => b == x,
            (FilterValue::Int(n), Value::Number(x)) => x.as_i64() == Some(*n),
            (FilterValue::Int(n), Value::String(s)) => s.trim().parse::<i64>().ok() == Some(*n),
            (FilterValue::Text(t), Value::String(s)) => t == s,
            (FilterValue::Text(t), other) => &other.to_string() == t,
            _ => false,
        }
    }
}

impl std::fmt::Display for FilterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterValue::Bool(b) => write!(f, "{}", b),
            FilterValue::Int(n) => write!(f, "{}", n),
            FilterValue::Text(s) => f.write_str(s),
            FilterValue::All => f.write_str("all"),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(raw: &str) -> Self {
        FilterValue::parse(raw)
    }
}

impl From<i64> for FilterValue {
    fn from(n: i64) -> Self {
        FilterValue::Int(n)
    }
}

impl From<bool> for FilterValue {
    fn from(b: bool) -> Self {
        FilterValue::Bool(b)
    }
}

/// Number of pages needed to show `total` rows at `per_page` rows each.
pub fn total_pages(total: u64, per_page: u32) -> u32 {
    assert!(per_page > 0, "per_page must be positive");
    let pages = total.div_ceil(per_page as u64);
    pages.min(u32::MAX as u64) as u32
}

pub mod prelude {
    pub use super::{
        compute_window, total_pages, Entity, EntityId, FilterValue, Page, PageWindow, QueryParams,
        QueryState, SortOrder,
    };
}
