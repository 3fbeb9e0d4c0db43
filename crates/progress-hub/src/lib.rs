//! Progress hub: an in-process publish/subscribe bus for task progress
//! messages, plus an aggregator that keeps a live view of running tasks and
//! the HTTP surface that exposes it.

pub mod aggregator;
pub mod api;
pub mod bus;
pub mod config;
pub mod error;

use std::ops::Deref;
use std::sync::Arc;

use axum::extract::FromRef;

pub use aggregator::ProgressAggregator;
pub use bus::{CategoryPattern, EventBus, Subscriber, SubscriptionId};
pub use error::{HubError, Result};

// ============================================================================
// State wrappers
// ============================================================================

/// Event bus wrapper for state extraction
#[derive(Clone)]
pub struct Bus(pub Arc<EventBus>);

impl Deref for Bus {
    type Target = EventBus;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Aggregator wrapper for state extraction
#[derive(Clone)]
pub struct Aggregator(pub Arc<ProgressAggregator>);

impl Deref for Aggregator {
    type Target = ProgressAggregator;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ============================================================================
// Application state
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub bus: Arc<EventBus>,
    pub aggregator: Arc<ProgressAggregator>,
}

impl AppState {
    pub fn new(bus: Arc<EventBus>, aggregator: Arc<ProgressAggregator>) -> Self {
        Self { bus, aggregator }
    }
}

impl FromRef<AppState> for Bus {
    fn from_ref(state: &AppState) -> Self {
        Bus(state.bus.clone())
    }
}

impl FromRef<AppState> for Aggregator {
    fn from_ref(state: &AppState) -> Self {
        Aggregator(state.aggregator.clone())
    }
}
