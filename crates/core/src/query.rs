//! List query state and its wire projection.
//!
//! `QueryState` is a value: every user interaction produces a new one through
//! the `with_*` transitions. Transitions that change what the result set
//! contains (sort, filter, search, page size) send the user back to page 1.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{total_pages, FilterValue, SortOrder};

pub const DEFAULT_PER_PAGE: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryState {
    page: u32,
    per_page: u32,
    sort_field: Option<String>,
    sort_order: SortOrder,
    filters: BTreeMap<String, FilterValue>,
    search_term: String,
}

impl Default for QueryState {
    fn default() -> Self {
        Self::new(DEFAULT_PER_PAGE)
    }
}

impl QueryState {
    pub fn new(per_page: u32) -> Self {
        assert!(per_page > 0, "per_page must be positive");
        Self {
            page: 1,
            per_page,
            sort_field: None,
            sort_order: SortOrder::Asc,
            filters: BTreeMap::new(),
            search_term: String::new(),
        }
    }

    pub fn page(&self) -> u32 { self.page }
    pub fn per_page(&self) -> u32 { self.per_page }
    pub fn sort_field(&self) -> Option<&str> { self.sort_field.as_deref() }
    pub fn sort_order(&self) -> SortOrder { self.sort_order }
    pub fn filters(&self) -> &BTreeMap<String, FilterValue> { &self.filters }
    pub fn search_term(&self) -> &str { &self.search_term }

    /// Start sorted on `field` in `order` without going through the toggle.
    pub fn sorted_by(mut self, field: &str, order: SortOrder) -> Self {
        self.sort_field = Some(field.to_string());
        self.sort_order = order;
        self.page = 1;
        self
    }

    pub fn with_page(&self, page: u32) -> Self {
        assert!(page >= 1, "page numbers start at 1");
        Self { page, ..self.clone() }
    }

    /// Re-selecting the current field flips the order; a new field starts ASC.
    pub fn with_sort(&self, field: &str) -> Self {
        let sort_order = match self.sort_field.as_deref() {
            Some(cur) if cur == field => self.sort_order.toggled(),
            _ => SortOrder::Asc,
        };
        Self {
            page: 1,
            sort_field: Some(field.to_string()),
            sort_order,
            ..self.clone()
        }
    }

    /// Unset values (`All`, blank text) drop the key instead of storing it.
    pub fn with_filter(&self, key: &str, value: FilterValue) -> Self {
        let mut filters = self.filters.clone();
        if value.is_unset() {
            filters.remove(key);
        } else {
            filters.insert(key.to_string(), value);
        }
        Self { page: 1, filters, ..self.clone() }
    }

    pub fn with_search(&self, term: &str) -> Self {
        Self {
            page: 1,
            search_term: term.trim().to_string(),
            ..self.clone()
        }
    }

    pub fn with_per_page(&self, per_page: u32) -> Self {
        assert!(per_page > 0, "per_page must be positive");
        Self { page: 1, per_page, ..self.clone() }
    }

    pub fn clear_filters(&self) -> Self {
        Self { page: 1, filters: BTreeMap::new(), ..self.clone() }
    }

    pub fn total_pages(&self, total: u64) -> u32 {
        total_pages(total, self.per_page)
    }

    /// Pull `page` back into `1..=last_page` for a known total. An empty
    /// result set still has page 1.
    pub fn clamp_to(&self, total: u64) -> Self {
        let last = self.total_pages(total).max(1);
        if self.page <= last {
            return self.clone();
        }
        Self { page: last, ..self.clone() }
    }

    pub fn to_query_params(&self) -> QueryParams {
        QueryParams {
            page: self.page,
            per_page: self.per_page,
            sort_field: self.sort_field.clone(),
            sort_order: self.sort_field.as_ref().map(|_| self.sort_order),
            filters: self.filters.iter().filter(|(_, v)| !v.is_unset()).map(|(k, v)| (k.clone(), v.clone())).collect(),
            search_term: if self.search_term.is_empty() { None } else { Some(self.search_term.clone()) },
        }
    }
}

/// The canonical query handed to `PageSource::fetch_page`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    pub page: u32,
    pub per_page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<SortOrder>,
    pub filters: BTreeMap<String, FilterValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_term: Option<String>,
}

impl QueryParams {
    /// Row offset of the first row on this page.
    pub fn offset(&self) -> u64 {
        (self.page.saturating_sub(1) as u64) * self.per_page as u64
    }

    /// Flat key/value pairs in the shape a query string wants. Filter keys are
    /// emitted as-is next to the paging keys.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut out = vec![
            ("page".to_string(), self.page.to_string()),
            ("perPage".to_string(), self.per_page.to_string()),
        ];
        if let Some(field) = &self.sort_field {
            out.push(("sortField".to_string(), field.clone()));
            out.push(("sortOrder".to_string(), self.sort_order.unwrap_or_default().as_str().to_string()));
        }
        for (k, v) in &self.filters {
            out.push((k.clone(), v.to_string()));
        }
        if let Some(term) = &self.search_term {
            out.push(("search".to_string(), term.clone()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on_page_five() -> QueryState {
        QueryState::new(10)
            .with_filter("genre", FilterValue::Text("drama".into()))
            .with_search("heat")
            .with_page(5)
    }

    #[test]
    fn result_changing_transitions_reset_page() {
        let s = on_page_five();
        assert_eq!(s.page(), 5);
        assert_eq!(s.with_sort("title").page(), 1);
        assert_eq!(s.with_filter("rating", FilterValue::Int(5)).page(), 1);
        assert_eq!(s.with_search("alien").page(), 1);
        assert_eq!(s.with_per_page(50).page(), 1);
        assert_eq!(s.clear_filters().page(), 1);
    }

    #[test]
    fn with_page_keeps_everything_else() {
        let s = on_page_five().with_sort("title");
        let moved = s.with_page(3);
        assert_eq!(moved.page(), 3);
        assert_eq!(moved.sort_field(), s.sort_field());
        assert_eq!(moved.sort_order(), s.sort_order());
        assert_eq!(moved.filters(), s.filters());
        assert_eq!(moved.search_term(), s.search_term());
    }

    #[test]
    fn sort_toggles_on_same_field_and_resets_on_new_field() {
        let s = QueryState::default().with_sort("title");
        assert_eq!(s.sort_order(), SortOrder::Asc);
        let s = s.with_sort("title");
        assert_eq!(s.sort_order(), SortOrder::Desc);
        let s = s.with_sort("title");
        assert_eq!(s.sort_order(), SortOrder::Asc);
        let s = s.with_sort("title").with_sort("duration");
        assert_eq!(s.sort_field(), Some("duration"));
        assert_eq!(s.sort_order(), SortOrder::Asc);
    }

    #[test]
    fn all_sentinel_removes_filter_key() {
        let s = QueryState::default().with_filter("status", FilterValue::parse("paid"));
        assert!(s.filters().contains_key("status"));
        let s = s.with_filter("status", FilterValue::All);
        assert!(!s.filters().contains_key("status"));
        let s = s.with_filter("status", FilterValue::parse(""));
        assert!(s.filters().is_empty());
    }

    #[test]
    fn params_omit_unset_fields() {
        let p = QueryState::new(25).to_query_params();
        assert_eq!(p.sort_field, None);
        assert_eq!(p.sort_order, None);
        assert_eq!(p.search_term, None);
        assert!(p.filters.is_empty());
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json, serde_json::json!({"page": 1, "perPage": 25, "filters": {}}));
        assert_eq!(p.to_pairs(), vec![("page".to_string(), "1".to_string()), ("perPage".to_string(), "25".to_string())]);
    }

    #[test]
    fn params_carry_sort_filters_and_search() {
        let p = QueryState::new(10)
            .with_sort("title")
            .with_sort("title")
            .with_filter("hall_id", FilterValue::Int(3))
            .with_search("  batman begins ")
            .with_page(2)
            .to_query_params();
        assert_eq!(p.offset(), 10);
        let pairs = p.to_pairs();
        assert!(pairs.contains(&("sortField".to_string(), "title".to_string())));
        assert!(pairs.contains(&("sortOrder".to_string(), "DESC".to_string())));
        assert!(pairs.contains(&("hall_id".to_string(), "3".to_string())));
        assert!(pairs.contains(&("search".to_string(), "batman begins".to_string())));
    }

    #[test]
    fn clamp_pulls_page_into_range() {
        let s = QueryState::new(10).with_page(9);
        assert_eq!(s.clamp_to(45).page(), 5);
        assert_eq!(s.clamp_to(0).page(), 1);
        assert_eq!(s.clamp_to(1000).page(), 9);
    }

    #[test]
    #[should_panic(expected = "page numbers start at 1")]
    fn page_zero_is_a_contract_violation() {
        let _ = QueryState::default().with_page(0);
    }
}
