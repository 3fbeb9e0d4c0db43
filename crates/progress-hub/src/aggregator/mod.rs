//! Live view of running tasks.
//!
//! The aggregator subscribes to the bus, folds start/progress/end messages into
//! one [`TaskProgress`] per running task, and answers filtered snapshot queries.
//! An entry exists exactly while its task is running; completion removes it.

mod table;
pub mod transition;

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use progress_protocol::{AttributeFilter, ProgressMessage, TaskProgress};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bus::{BusError, EventBus, Subscriber};
use crate::config::AggregatorSettings;

pub use table::{Change, TaskTable};
pub use transition::{COMPLETION_EPSILON, Transition};

pub struct ProgressAggregator {
    table: TaskTable,
    settings: AggregatorSettings,
}

impl ProgressAggregator {
    pub fn new(settings: AggregatorSettings) -> Self {
        Self {
            table: TaskTable::new(),
            settings,
        }
    }

    /// Create an aggregator and subscribe it to `bus` with the configured pattern.
    pub fn register(bus: &EventBus, settings: AggregatorSettings) -> Result<Arc<Self>, BusError> {
        let pattern = settings.pattern.clone();
        let aggregator = Arc::new(Self::new(settings));
        bus.subscribe(&aggregator, &pattern)?;
        Ok(aggregator)
    }

    /// Apply one message to the task it names.
    pub fn handle(&self, message: &ProgressMessage) -> Change {
        let change = self
            .table
            .update(&message.task_name, |current| transition::next(current, message));

        match change {
            Change::Inserted => info!(
                task = %message.task_name,
                category = message.category(),
                kind = message.event.kind(),
                "task started"
            ),
            Change::Removed => info!(
                task = %message.task_name,
                kind = message.event.kind(),
                "task finished"
            ),
            Change::Replaced | Change::Unchanged => debug!(
                task = %message.task_name,
                kind = message.event.kind(),
                ?change,
                "progress applied"
            ),
        }
        change
    }

    /// Running tasks in first-start order, optionally restricted to one category
    /// and to tasks whose `info` satisfies `filter`.
    pub fn list_running(
        &self,
        category: Option<&str>,
        filter: Option<&AttributeFilter>,
    ) -> Vec<TaskProgress> {
        self.table.snapshot(|task| {
            category.is_none_or(|c| task.category == c) && filter.is_none_or(|f| f.matches(task))
        })
    }

    pub fn get(&self, task_name: &str) -> Option<TaskProgress> {
        self.table.get(task_name)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Drop entries untouched for longer than `stale_after_secs`. No-op when the
    /// setting is unset.
    pub fn reap_stale(&self, now: Instant) -> usize {
        let Some(max_age) = self.stale_after() else {
            return 0;
        };
        let evicted = self.table.evict_untouched(max_age, now);
        for name in &evicted {
            info!(task = %name, ?max_age, "removed stale task");
        }
        evicted.len()
    }

    /// Spawn the periodic stale-entry sweep if `stale_after_secs` is configured.
    ///
    /// The task holds only a weak reference and stops once the aggregator is dropped.
    pub fn spawn_reaper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let max_age = self.stale_after()?;
        let period = Duration::from_secs(self.settings.reap_interval_secs.max(1));
        let aggregator: Weak<Self> = Arc::downgrade(self);

        info!(?max_age, ?period, "stale task reaper enabled");
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(aggregator) = aggregator.upgrade() else {
                    debug!("aggregator dropped, reaper exiting");
                    break;
                };
                aggregator.reap_stale(Instant::now());
            }
        }))
    }

    fn stale_after(&self) -> Option<Duration> {
        self.settings.stale_after_secs.map(Duration::from_secs)
    }
}

impl Subscriber for ProgressAggregator {
    fn name(&self) -> &str {
        "progress-aggregator"
    }

    fn receive(&self, message: &ProgressMessage) -> anyhow::Result<()> {
        self.handle(message);
        Ok(())
    }
}
