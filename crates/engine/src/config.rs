//! Engine settings: page size, pager width and search debounce, with env
//! overrides.

#![forbid(unsafe_code)]

use std::time::Duration;

use tracing::warn;

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const DEFAULT_MAX_BUTTONS: u32 = 5;
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;
pub const MIN_DEBOUNCE_MS: u64 = 300;
pub const MAX_DEBOUNCE_MS: u64 = 500;

/// Per-screen engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub per_page: u32,
    pub max_buttons: u32,
    pub debounce: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PER_PAGE,
            max_buttons: DEFAULT_MAX_BUTTONS,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `REEL_PER_PAGE`, `REEL_PAGE_BUTTONS` and
    /// `REEL_SEARCH_DEBOUNCE_MS`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let d = Self::default();
        let per_page = std::env::var("REEL_PER_PAGE").ok().and_then(|s| s.parse::<u32>().ok()).unwrap_or(d.per_page);
        let max_buttons = std::env::var("REEL_PAGE_BUTTONS").ok().and_then(|s| s.parse::<u32>().ok()).unwrap_or(d.max_buttons);
        let debounce_ms = std::env::var("REEL_SEARCH_DEBOUNCE_MS").ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(DEFAULT_DEBOUNCE_MS);
        Self { per_page, max_buttons, debounce: Duration::from_millis(debounce_ms) }.sanitized()
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self.sanitized()
    }

    pub fn with_max_buttons(mut self, max_buttons: u32) -> Self {
        self.max_buttons = max_buttons;
        self.sanitized()
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self.sanitized()
    }

    /// Pull settings back into their supported ranges.
    pub fn sanitized(mut self) -> Self {
        if self.per_page == 0 {
            warn!("config: per_page 0 is invalid; using default");
            self.per_page = DEFAULT_PER_PAGE;
        }
        if self.max_buttons == 0 {
            warn!("config: max_buttons 0 is invalid; using default");
            self.max_buttons = DEFAULT_MAX_BUTTONS;
        }
        let ms = self.debounce.as_millis() as u64;
        let clamped = ms.clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS);
        if clamped != ms {
            warn!(requested_ms = ms, using_ms = clamped, "config: search debounce out of range");
            self.debounce = Duration::from_millis(clamped);
        }
        self
    }
}
