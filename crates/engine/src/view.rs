//! Published read model for renderers.

#![forbid(unsafe_code)]

use std::sync::Arc;

use arc_swap::ArcSwap;
use reel_core::{Entity, PageWindow, QueryState};
use serde::Serialize;
use tokio::sync::watch;

/// Everything a list screen needs to draw one frame.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ListView {
    pub rows: Vec<Entity>,
    /// Per row, `(column, label)` for each resolved foreign key.
    pub references: Vec<Vec<(String, String)>>,
    /// `None` until the first page has been applied.
    pub total: Option<u64>,
    pub loading: bool,
    pub error: Option<String>,
    pub page_window: PageWindow,
    pub query: QueryState,
    pub version: u64,
}

/// Writer side, owned by the controller.
pub(crate) struct ViewPublisher {
    snap: Arc<ArcSwap<ListView>>,
    version_tx: watch::Sender<u64>,
    version: u64,
}

impl ViewPublisher {
    pub(crate) fn new(initial: ListView) -> Self {
        let (version_tx, _rx) = watch::channel(0u64);
        Self { snap: Arc::new(ArcSwap::from_pointee(initial)), version_tx, version: 0 }
    }

    pub(crate) fn publish(&mut self, mut view: ListView) {
        self.version += 1;
        view.version = self.version;
        self.snap.store(Arc::new(view));
        self.version_tx.send_replace(self.version);
    }

    pub(crate) fn handle(&self) -> ViewHandle {
        ViewHandle { snap: Arc::clone(&self.snap), version_rx: self.version_tx.subscribe() }
    }
}

/// Reader side: lock-free access to the latest `ListView` plus a change
/// notification for renderers that wait instead of polling.
#[derive(Clone)]
pub struct ViewHandle {
    snap: Arc<ArcSwap<ListView>>,
    version_rx: watch::Receiver<u64>,
}

impl ViewHandle {
    pub fn current(&self) -> Arc<ListView> { self.snap.load_full() }
    pub fn subscribe(&self) -> watch::Receiver<u64> { self.version_rx.clone() }
}
