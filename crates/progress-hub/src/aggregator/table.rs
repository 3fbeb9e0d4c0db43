use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use progress_protocol::TaskProgress;

use super::transition::Transition;

/// What an update did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Unchanged,
    Inserted,
    Replaced,
    Removed,
}

struct Slot {
    /// First-insertion order; replacing an entry keeps it.
    seq: u64,
    touched: Instant,
    progress: TaskProgress,
}

#[derive(Default)]
struct Slots {
    next_seq: u64,
    by_name: HashMap<String, Slot>,
}

/// `task name -> TaskProgress` map with atomic per-task transitions.
///
/// Every update runs the whole read-compute-write step under the write lock, so
/// racing updates for one task are serialized and readers only ever see whole
/// entries.
#[derive(Default)]
pub struct TaskTable {
    slots: RwLock<Slots>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `transition` to the current entry for `task_name`.
    pub fn update<F>(&self, task_name: &str, transition: F) -> Change
    where
        F: FnOnce(Option<&TaskProgress>) -> Transition,
    {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let current = slots.by_name.get(task_name).map(|slot| &slot.progress);

        match transition(current) {
            Transition::Keep => Change::Unchanged,
            Transition::Remove => match slots.by_name.remove(task_name) {
                Some(_) => Change::Removed,
                None => Change::Unchanged,
            },
            Transition::Replace(progress) => {
                let now = Instant::now();
                if let Some(slot) = slots.by_name.get_mut(task_name) {
                    slot.progress = progress;
                    slot.touched = now;
                    Change::Replaced
                } else {
                    let seq = slots.next_seq;
                    slots.next_seq += 1;
                    slots.by_name.insert(
                        task_name.to_string(),
                        Slot {
                            seq,
                            touched: now,
                            progress,
                        },
                    );
                    Change::Inserted
                }
            }
        }
    }

    /// Entries accepted by `keep`, in first-insertion order.
    pub fn snapshot<F>(&self, mut keep: F) -> Vec<TaskProgress>
    where
        F: FnMut(&TaskProgress) -> bool,
    {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let mut selected: Vec<&Slot> = slots
            .by_name
            .values()
            .filter(|slot| keep(&slot.progress))
            .collect();
        selected.sort_by_key(|slot| slot.seq);
        selected.into_iter().map(|slot| slot.progress.clone()).collect()
    }

    pub fn get(&self, task_name: &str) -> Option<TaskProgress> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.by_name.get(task_name).map(|slot| slot.progress.clone())
    }

    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_name
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove entries not updated within `max_age` of `now`; returns their names.
    pub fn evict_untouched(&self, max_age: Duration, now: Instant) -> Vec<String> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let mut evicted = Vec::new();
        slots.by_name.retain(|name, slot| {
            let fresh = now.saturating_duration_since(slot.touched) <= max_age;
            if !fresh {
                evicted.push(name.clone());
            }
            fresh
        });
        evicted
    }
}
