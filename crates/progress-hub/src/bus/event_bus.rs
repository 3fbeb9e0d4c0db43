use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use progress_protocol::ProgressMessage;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{BusError, CategoryPattern, Subscriber};

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Binding {
    id: SubscriptionId,
    pattern: CategoryPattern,
    subscriber: Weak<dyn Subscriber>,
}

impl Binding {
    fn points_to(&self, target: *const ()) -> bool {
        self.subscriber.as_ptr().cast::<()>() == target
    }
}

/// Progress message bus.
///
/// The registry is copy-on-write: `publish` clones the current binding list
/// under a brief read lock and dispatches without holding any lock, so
/// subscription churn never blocks producers. Subscribers are held weakly; the
/// bus does not keep them alive.
pub struct EventBus {
    bindings: RwLock<Arc<Vec<Arc<Binding>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            bindings: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Register `subscriber` for every future message whose topic category
    /// matches `pattern`. Past messages are not replayed.
    pub fn subscribe<S>(&self, subscriber: &Arc<S>, pattern: &str) -> Result<SubscriptionId, BusError>
    where
        S: Subscriber + 'static,
    {
        let pattern = CategoryPattern::compile(pattern)?;
        let id = SubscriptionId(Uuid::new_v4());

        let name = subscriber.name().to_string();
        let subscriber: Arc<dyn Subscriber> = subscriber.clone();
        let binding = Arc::new(Binding {
            id,
            pattern,
            subscriber: Arc::downgrade(&subscriber),
        });

        info!(
            subscription = %id,
            subscriber = %name,
            pattern = %binding.pattern,
            "subscriber registered"
        );
        self.modify(|bindings| bindings.push(binding));

        Ok(id)
    }

    /// Remove every registration of `subscriber`. Returns false if there was none.
    pub fn unsubscribe<S>(&self, subscriber: &Arc<S>) -> bool
    where
        S: Subscriber + ?Sized,
    {
        let target = Arc::as_ptr(subscriber).cast::<()>();
        let removed = self.modify(|bindings| {
            let before = bindings.len();
            bindings.retain(|b| !b.points_to(target));
            before - bindings.len()
        });

        if removed > 0 {
            info!(subscriber = %subscriber.name(), removed, "subscriber unregistered");
        }
        removed > 0
    }

    pub fn unsubscribe_id(&self, id: SubscriptionId) -> bool {
        let removed = self.modify(|bindings| {
            let before = bindings.len();
            bindings.retain(|b| b.id != id);
            before != bindings.len()
        });

        if removed {
            info!(subscription = %id, "subscription removed");
        }
        removed
    }

    /// Deliver `message` to every matching subscriber.
    ///
    /// Returns the number of subscribers that accepted the message. Failures are
    /// logged per subscriber and never reach the publisher.
    pub fn publish(&self, message: &ProgressMessage) -> usize {
        let bindings = self.snapshot();
        let category = message.category();

        let mut delivered = 0;
        let mut saw_dead = false;

        for binding in bindings.iter() {
            if !binding.pattern.matches(category) {
                continue;
            }
            let Some(subscriber) = binding.subscriber.upgrade() else {
                saw_dead = true;
                continue;
            };

            match panic::catch_unwind(AssertUnwindSafe(|| subscriber.receive(message))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(
                        subscriber = %subscriber.name(),
                        topic = %message.topic,
                        task = %message.task_name,
                        "subscriber failed to handle message: {:#}",
                        e
                    );
                }
                Err(payload) => {
                    error!(
                        subscriber = %subscriber.name(),
                        topic = %message.topic,
                        task = %message.task_name,
                        "subscriber panicked: {}",
                        panic_message(payload.as_ref())
                    );
                }
            }
        }

        if saw_dead {
            self.prune_dropped();
        }

        debug!(
            topic = %message.topic,
            kind = message.event.kind(),
            delivered,
            "message published"
        );
        delivered
    }

    /// Number of registrations, including ones whose subscriber was dropped but
    /// not yet pruned.
    pub fn subscriber_count(&self) -> usize {
        self.snapshot().len()
    }

    fn snapshot(&self) -> Arc<Vec<Arc<Binding>>> {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn modify<R>(&self, f: impl FnOnce(&mut Vec<Arc<Binding>>) -> R) -> R {
        let mut guard = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        let mut next: Vec<Arc<Binding>> = (**guard).clone();
        let result = f(&mut next);
        *guard = Arc::new(next);
        result
    }

    fn prune_dropped(&self) {
        let pruned = self.modify(|bindings| {
            let before = bindings.len();
            bindings.retain(|b| b.subscriber.strong_count() > 0);
            before - bindings.len()
        });
        if pruned > 0 {
            debug!(pruned, "pruned dropped subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
