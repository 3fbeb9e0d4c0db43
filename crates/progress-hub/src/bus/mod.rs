// Progress bus
//
// In-process publish/subscribe: producers publish progress messages, and every
// subscriber whose category pattern matches the message's topic receives it
// synchronously on the publishing thread.

mod event_bus;
mod pattern;
mod subscriber;

pub use event_bus::{EventBus, SubscriptionId};
pub use pattern::CategoryPattern;
pub use subscriber::Subscriber;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("invalid subscription pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl BusError {
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}
