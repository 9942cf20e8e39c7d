//! Reel list engine.
//!
//! A list screen mutates an immutable `QueryState` (page, sort, filter,
//! debounced search); the `FetchCoordinator` turns each new state into one
//! page fetch and applies answers in issuance order only; the
//! `ReferenceResolver` fills in display names for foreign keys; the
//! `ListController` ties these together and publishes a `ListView`.

#![forbid(unsafe_code)]

pub mod config;
pub mod controller;
pub mod debounce;
pub mod fetch;
pub mod resolver;
pub mod view;

pub use config::EngineConfig;
pub use controller::{ListController, Step};
pub use debounce::Debouncer;
pub use fetch::{FetchCoordinator, FetchPhase, FetchRequest, RequestId, RequestTracker, Transition};
pub use resolver::{ReferenceResolver, ReferenceSet, Resolved, PLACEHOLDER};
pub use view::{ListView, ViewHandle};
