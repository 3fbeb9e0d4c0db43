//! Progress message definitions.
//!
//! Every message names one task and carries exactly one [`ProgressEvent`]. The
//! event enum is serialized with `#[serde(tag = "kind")]` and flattened into the
//! message, producing JSON like:
//! `{"kind": "activity_progress", "topic": "download.progress", "taskName": "scene-42", "progress": 0.5}`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Info, Topic};

// ============================================================================
// Events
// ============================================================================

/// What happened to the task. Closed set: the aggregator matches it exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ProgressEvent {
    /// The task began.
    ActivityStart,
    /// Overall completion fraction of the task.
    ActivityProgress { progress: f64 },
    /// Overall completion of a download, with its transfer rate.
    DownloadProgress {
        progress: f64,
        bytes_per_second: f64,
        /// Size of the whole download, used to estimate the time left.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_bytes: Option<u64>,
    },
    /// The task finished (successfully or not).
    ActivityEnd,
    SubActivityStart { subtask_name: String },
    SubActivityEnd { subtask_name: String },
    /// Progress of the current sub-task, together with the task's own fraction.
    SubActivityProgress {
        subtask_name: String,
        progress: f64,
        task_progress: f64,
    },
}

impl ProgressEvent {
    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::ActivityStart => "activity_start",
            ProgressEvent::ActivityProgress { .. } => "activity_progress",
            ProgressEvent::DownloadProgress { .. } => "download_progress",
            ProgressEvent::ActivityEnd => "activity_end",
            ProgressEvent::SubActivityStart { .. } => "sub_activity_start",
            ProgressEvent::SubActivityEnd { .. } => "sub_activity_end",
            ProgressEvent::SubActivityProgress { .. } => "sub_activity_progress",
        }
    }

    pub fn subtask_name(&self) -> Option<&str> {
        match self {
            ProgressEvent::SubActivityStart { subtask_name }
            | ProgressEvent::SubActivityEnd { subtask_name }
            | ProgressEvent::SubActivityProgress { subtask_name, .. } => Some(subtask_name),
            _ => None,
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// Immutable progress notification published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMessage {
    #[serde(flatten)]
    pub event: ProgressEvent,
    pub topic: Topic,
    /// Identifies one logical running operation.
    pub task_name: String,
    #[serde(default)]
    pub info: Info,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Informational only; never used for authorization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
}

impl ProgressMessage {
    pub fn new(topic: impl Into<Topic>, task_name: impl Into<String>, event: ProgressEvent) -> Self {
        Self {
            event,
            topic: topic.into(),
            task_name: task_name.into(),
            info: Info::new(),
            timestamp: Utc::now(),
            principal: None,
        }
    }

    pub fn start(topic: impl Into<Topic>, task_name: impl Into<String>) -> Self {
        Self::new(topic, task_name, ProgressEvent::ActivityStart)
    }

    pub fn progress(topic: impl Into<Topic>, task_name: impl Into<String>, progress: f64) -> Self {
        Self::new(topic, task_name, ProgressEvent::ActivityProgress { progress })
    }

    pub fn end(topic: impl Into<Topic>, task_name: impl Into<String>) -> Self {
        Self::new(topic, task_name, ProgressEvent::ActivityEnd)
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn with_info(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.info.insert(name.into(), value.into());
        self
    }

    pub fn category(&self) -> &str {
        self.topic.category()
    }
}
