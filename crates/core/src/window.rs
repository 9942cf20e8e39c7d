//! Pagination button window.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Derived, identity-free view of which page buttons to draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PageWindow {
    pub start: u32,
    pub end: u32,
    pub pages: Vec<u32>,
}

impl PageWindow {
    pub fn compute(current_page: u32, total_pages: u32, max_buttons: u32) -> Self {
        let pages = compute_window(current_page, total_pages, max_buttons);
        let start = pages.first().copied().unwrap_or(0);
        let end = pages.last().copied().unwrap_or(0);
        Self { start, end, pages }
    }

    /// Controls are hidden (not disabled) when there is nothing to page.
    pub fn is_hidden(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Page numbers to render around `current_page`.
///
/// Empty when there is at most one page. Otherwise the window holds exactly
/// `min(max_buttons, total_pages)` consecutive pages, centered on the current
/// page when it is far enough from both edges. When the centered window is one
/// slot too wide (even `max_buttons`), the side farther from the current page
/// gives up the slot; on a tie the trailing side does.
///
/// A current page past the last page is treated as the last page; the total
/// can shrink under a screen before its page is re-clamped.
///
/// Panics if `current_page` or `max_buttons` is zero.
pub fn compute_window(current_page: u32, total_pages: u32, max_buttons: u32) -> Vec<u32> {
    assert!(current_page >= 1, "page numbers start at 1");
    assert!(max_buttons > 0, "max_buttons must be at least 1");
    if total_pages <= 1 {
        return Vec::new();
    }
    let total = total_pages as i64;
    let max = max_buttons as i64;
    let cur = (current_page as i64).clamp(1, total);
    let half = max / 2;

    let mut start = cur - half;
    let mut end = cur + half;
    if start < 1 {
        start = 1;
        end = max.min(total);
    } else if end > total {
        end = total;
        start = (total - max + 1).max(1);
    }
    if end - start + 1 > max {
        if cur - start < end - cur {
            start = end - max + 1;
        } else {
            end = start + max - 1;
        }
    }
    (start..=end).map(|p| p as u32).collect()
}
