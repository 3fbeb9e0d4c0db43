//! Shared progress message definitions for the progress hub and its producers.
//!
//! Producers (downloads, transfers, workflow steps) build [`ProgressMessage`]s and
//! publish them on the hub's bus. The hub answers queries with [`TaskProgress`]
//! records.

pub mod event;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub use event::{ProgressEvent, ProgressMessage};

// ============================================================================
// Topics
// ============================================================================

/// Well-known topic categories.
///
/// A topic's category is its first dot-separated segment, so
/// `download.progress.landsat` and `download.retry` both belong to `download`.
pub struct TopicCategory;

impl TopicCategory {
    pub const DOWNLOAD: &str = "download";
    pub const TRANSFER: &str = "transfer";
    pub const WORKFLOW: &str = "workflow";
}

/// Hierarchical topic string, e.g. `transfer.progress.s3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub fn new(topic: impl Into<String>) -> Self {
        Self(topic.into())
    }

    /// The coarse grouping subscription patterns are matched against.
    pub fn category(&self) -> &str {
        self.0.split('.').next().unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ============================================================================
// Info attributes
// ============================================================================

/// Attribute names the hub writes into `info`.
pub struct InfoKey;

impl InfoKey {
    /// Identity on whose behalf the task runs.
    pub const PRINCIPAL: &str = "Principal";
    /// Human-readable transfer rate of a download.
    pub const SPEED: &str = "Speed";
    /// Estimated time left for a download, `HH:MM:SS`.
    pub const REMAINING_TIME: &str = "RemainingTime";
}

/// Free-form attributes attached to messages and task records.
pub type Info = BTreeMap<String, Value>;

/// Render an attribute for comparison: strings by content, anything else as JSON.
pub fn attribute_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(other.to_string()),
    }
}

// ============================================================================
// Query records
// ============================================================================

/// Current progress of one running task, as returned by the read API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub task_name: String,
    pub category: String,
    pub main_progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_progress: Option<f64>,
    #[serde(default)]
    pub info: Info,
}

impl TaskProgress {
    pub fn attribute(&self, name: &str) -> Option<Cow<'_, str>> {
        self.info.get(name).map(attribute_text)
    }
}

/// `(name, value)` predicate over a task's `info`.
///
/// Sent base64-encoded as the `filter` query parameter. `value` may be any JSON
/// value; it is compared in the same text form as the task's attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeFilter {
    pub name: String,
    #[serde(deserialize_with = "attribute_text_from_json")]
    pub value: String,
}

fn attribute_text_from_json<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(attribute_text(&value).into_owned())
}

impl AttributeFilter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn principal(user_name: impl Into<String>) -> Self {
        Self::new(InfoKey::PRINCIPAL, user_name)
    }

    /// A missing attribute never matches.
    pub fn matches(&self, task: &TaskProgress) -> bool {
        task.attribute(&self.name)
            .is_some_and(|value| value == self.value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task_with(info: Info) -> TaskProgress {
        TaskProgress {
            task_name: "t".to_string(),
            category: TopicCategory::DOWNLOAD.to_string(),
            main_progress: 0.5,
            subtask_name: None,
            subtask_progress: None,
            info,
        }
    }

    #[test]
    fn test_topic_category() {
        assert_eq!(Topic::new("download.progress.landsat").category(), "download");
        assert_eq!(Topic::new("transfer").category(), "transfer");
        assert_eq!(Topic::new("").category(), "");
    }

    #[test]
    fn test_attribute_filter_matches_string_value() {
        let mut info = Info::new();
        info.insert(InfoKey::PRINCIPAL.to_string(), json!("alice"));
        let task = task_with(info);

        assert!(AttributeFilter::principal("alice").matches(&task));
        assert!(!AttributeFilter::principal("bob").matches(&task));
    }

    #[test]
    fn test_attribute_filter_missing_key() {
        let task = task_with(Info::new());
        assert!(!AttributeFilter::principal("alice").matches(&task));
    }

    #[test]
    fn test_attribute_filter_non_string_value() {
        let mut info = Info::new();
        info.insert("Tiles".to_string(), json!(42));
        let task = task_with(info);

        assert!(AttributeFilter::new("Tiles", "42").matches(&task));
    }

    #[test]
    fn test_attribute_filter_accepts_json_values() {
        let mut info = Info::new();
        info.insert("Tiles".to_string(), json!(42));
        info.insert("Cached".to_string(), json!(true));
        let task = task_with(info);

        let tiles: AttributeFilter =
            serde_json::from_value(json!({"name": "Tiles", "value": 42})).unwrap();
        assert_eq!(tiles, AttributeFilter::new("Tiles", "42"));
        assert!(tiles.matches(&task));

        let cached: AttributeFilter =
            serde_json::from_value(json!({"name": "Cached", "value": true})).unwrap();
        assert!(cached.matches(&task));

        let wrong: AttributeFilter =
            serde_json::from_value(json!({"name": "Tiles", "value": 7})).unwrap();
        assert!(!wrong.matches(&task));
    }

    #[test]
    fn test_task_progress_json_shape() {
        let task = task_with(Info::new());
        let json = serde_json::to_value(&task).unwrap();

        assert_eq!(json["taskName"], "t");
        assert_eq!(json["mainProgress"], 0.5);
        assert!(json.get("subtaskName").is_none());
        assert!(json.get("subtaskProgress").is_none());
    }
}
