//! Per-message state transitions of one task entry.
//!
//! [`next`] is a pure function of the current entry and the incoming message;
//! the table applies its result atomically.

use progress_protocol::{Info, InfoKey, ProgressEvent, ProgressMessage, TaskProgress};
use serde_json::Value;
use tracing::{debug, warn};

/// Main progress within this distance of 1.0 counts as finished.
pub const COMPLETION_EPSILON: f64 = 0.001;

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Leave the table as it is (including "no entry").
    Keep,
    Replace(TaskProgress),
    Remove,
}

pub fn next(current: Option<&TaskProgress>, message: &ProgressMessage) -> Transition {
    let task = message.task_name.as_str();

    match &message.event {
        ProgressEvent::ActivityStart => Transition::Replace(TaskProgress {
            task_name: task.to_string(),
            category: message.category().to_string(),
            main_progress: 0.0,
            subtask_name: None,
            subtask_progress: None,
            info: merged_info(None, message),
        }),

        ProgressEvent::ActivityProgress { progress } => {
            let Some(progress) = fraction(*progress, message) else {
                return Transition::Keep;
            };
            Transition::Replace(TaskProgress {
                task_name: task.to_string(),
                category: message.category().to_string(),
                main_progress: progress,
                subtask_name: None,
                subtask_progress: None,
                info: merged_info(current, message),
            })
        }

        ProgressEvent::DownloadProgress {
            progress,
            bytes_per_second,
            total_bytes,
        } => {
            let Some(progress) = fraction(*progress, message) else {
                return Transition::Keep;
            };
            let rate = Some(*bytes_per_second).filter(|bps| bps.is_finite() && *bps >= 0.0);
            let remaining = rate
                .filter(|bps| *bps > 0.0)
                .zip(*total_bytes)
                .map(|(bps, total)| total as f64 * (1.0 - progress) / bps);

            let mut info = merged_info(current, message);
            set_derived(
                &mut info,
                message,
                InfoKey::SPEED,
                rate.map(format_throughput),
            );
            set_derived(
                &mut info,
                message,
                InfoKey::REMAINING_TIME,
                remaining.map(format_hms),
            );
            Transition::Replace(TaskProgress {
                task_name: task.to_string(),
                category: message.category().to_string(),
                main_progress: progress,
                subtask_name: None,
                subtask_progress: None,
                info,
            })
        }

        ProgressEvent::ActivityEnd => match current {
            Some(_) => Transition::Remove,
            None => Transition::Keep,
        },

        ProgressEvent::SubActivityStart { subtask_name } => {
            let Some(current) = current else {
                return dropped(message);
            };
            Transition::Replace(TaskProgress {
                subtask_name: Some(subtask_name.clone()),
                subtask_progress: Some(0.0),
                info: merged_info(Some(current), message),
                ..current.clone()
            })
        }

        ProgressEvent::SubActivityEnd { subtask_name } => {
            let Some(current) = current else {
                return dropped(message);
            };
            if is_complete(current.main_progress) {
                return Transition::Remove;
            }
            Transition::Replace(TaskProgress {
                subtask_name: Some(subtask_name.clone()),
                subtask_progress: Some(1.0),
                info: merged_info(Some(current), message),
                ..current.clone()
            })
        }

        ProgressEvent::SubActivityProgress {
            subtask_name,
            progress,
            task_progress,
        } => {
            let Some(current) = current else {
                return dropped(message);
            };
            let (Some(sub), Some(main)) = (fraction(*progress, message), fraction(*task_progress, message))
            else {
                return Transition::Keep;
            };
            if sub == 1.0 && is_complete(main) {
                return Transition::Remove;
            }
            Transition::Replace(TaskProgress {
                main_progress: main,
                subtask_name: Some(subtask_name.clone()),
                subtask_progress: Some(sub),
                info: merged_info(Some(current), message),
                ..current.clone()
            })
        }
    }
}

/// Write a value computed from this message, or drop the one left over from an
/// earlier update when it can no longer be computed. Attributes the producer
/// sent explicitly win either way.
fn set_derived(info: &mut Info, message: &ProgressMessage, key: &str, value: Option<String>) {
    if message.info.contains_key(key) {
        return;
    }
    match value {
        Some(value) => {
            info.insert(key.to_string(), Value::String(value));
        }
        None => {
            info.remove(key);
        }
    }
}

fn is_complete(main_progress: f64) -> bool {
    1.0 - main_progress < COMPLETION_EPSILON
}

fn dropped(message: &ProgressMessage) -> Transition {
    debug!(
        task = %message.task_name,
        kind = message.event.kind(),
        subtask = ?message.event.subtask_name(),
        "no running task for sub-activity event, dropping"
    );
    Transition::Keep
}

/// Clamp a reported fraction into [0, 1]; non-finite values are rejected.
fn fraction(value: f64, message: &ProgressMessage) -> Option<f64> {
    if value.is_finite() {
        Some(value.clamp(0.0, 1.0))
    } else {
        warn!(
            task = %message.task_name,
            kind = message.event.kind(),
            "ignoring message with non-finite progress {}",
            value
        );
        None
    }
}

/// Previous attributes overlaid with the message's (last write wins).
fn merged_info(current: Option<&TaskProgress>, message: &ProgressMessage) -> Info {
    let mut info = current.map(|c| c.info.clone()).unwrap_or_default();
    info.extend(message.info.iter().map(|(k, v)| (k.clone(), v.clone())));
    if let Some(principal) = &message.principal {
        info.insert(InfoKey::PRINCIPAL.to_string(), Value::String(principal.clone()));
    }
    info
}

/// Format throughput (bytes per second) with SI prefixes.
pub fn format_throughput(bps: f64) -> String {
    if bps >= 1_000_000_000.0 {
        format!("{:.1} GB/s", bps / 1_000_000_000.0)
    } else if bps >= 1_000_000.0 {
        format!("{:.1} MB/s", bps / 1_000_000.0)
    } else if bps >= 1_000.0 {
        format!("{:.1} KB/s", bps / 1_000.0)
    } else {
        format!("{:.0} B/s", bps)
    }
}

/// Format seconds as `HH:MM:SS`, rounding up.
pub fn format_hms(seconds: f64) -> String {
    let secs = seconds.max(0.0).ceil() as u64;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TOPIC: &str = "download.progress";

    fn running(main: f64) -> TaskProgress {
        TaskProgress {
            task_name: "A".to_string(),
            category: "download".to_string(),
            main_progress: main,
            subtask_name: None,
            subtask_progress: None,
            info: Info::new(),
        }
    }

    fn sub(event: ProgressEvent) -> ProgressMessage {
        ProgressMessage::new(TOPIC, "A", event)
    }

    fn replaced(t: Transition) -> TaskProgress {
        match t {
            Transition::Replace(task) => task,
            other => panic!("Expected Replace, got {other:?}"),
        }
    }

    #[test]
    fn test_start_discards_stale_entry() {
        let mut stale = running(0.7);
        stale.subtask_name = Some("old".to_string());
        stale.info.insert("Old".to_string(), json!("x"));

        let msg = ProgressMessage::start(TOPIC, "A").with_principal("alice");
        let task = replaced(next(Some(&stale), &msg));

        assert_eq!(task.main_progress, 0.0);
        assert_eq!(task.subtask_name, None);
        assert!(!task.info.contains_key("Old"));
        assert_eq!(task.info[InfoKey::PRINCIPAL], json!("alice"));
    }

    #[test]
    fn test_progress_merges_info_and_clears_subtask() {
        let mut current = running(0.2);
        current.subtask_name = Some("s".to_string());
        current.subtask_progress = Some(0.4);
        current.info.insert("Mission".to_string(), json!("Landsat-8"));
        current.info.insert("Stage".to_string(), json!("queued"));

        let msg = ProgressMessage::progress(TOPIC, "A", 0.5).with_info("Stage", "fetching");
        let task = replaced(next(Some(&current), &msg));

        assert_eq!(task.main_progress, 0.5);
        assert_eq!(task.subtask_name, None);
        assert_eq!(task.subtask_progress, None);
        assert_eq!(task.info["Mission"], json!("Landsat-8"));
        assert_eq!(task.info["Stage"], json!("fetching"));
    }

    #[test]
    fn test_progress_without_entry_creates_one() {
        let task = replaced(next(None, &ProgressMessage::progress(TOPIC, "A", 0.3)));
        assert_eq!(task.main_progress, 0.3);
        assert_eq!(task.category, "download");
    }

    #[test]
    fn test_progress_is_clamped() {
        let task = replaced(next(None, &ProgressMessage::progress(TOPIC, "A", 1.7)));
        assert_eq!(task.main_progress, 1.0);
    }

    #[test]
    fn test_non_finite_progress_is_ignored() {
        let msg = ProgressMessage::progress(TOPIC, "A", f64::NAN);
        assert_eq!(next(Some(&running(0.4)), &msg), Transition::Keep);
    }

    #[test]
    fn test_download_progress_records_speed_and_eta() {
        let msg = sub(ProgressEvent::DownloadProgress {
            progress: 0.5,
            bytes_per_second: 2_000_000.0,
            total_bytes: Some(720_000_000),
        });
        let task = replaced(next(None, &msg));

        assert_eq!(task.info[InfoKey::SPEED], json!("2.0 MB/s"));
        // 360 MB left at 2 MB/s
        assert_eq!(task.info[InfoKey::REMAINING_TIME], json!("00:03:00"));
    }

    #[test]
    fn test_download_progress_without_total_has_no_eta() {
        let msg = sub(ProgressEvent::DownloadProgress {
            progress: 0.5,
            bytes_per_second: 512.0,
            total_bytes: None,
        });
        let task = replaced(next(None, &msg));

        assert_eq!(task.info[InfoKey::SPEED], json!("512 B/s"));
        assert!(!task.info.contains_key(InfoKey::REMAINING_TIME));
    }

    #[test]
    fn test_download_progress_drops_outdated_eta() {
        let first = sub(ProgressEvent::DownloadProgress {
            progress: 0.2,
            bytes_per_second: 1_000.0,
            total_bytes: Some(10_000),
        });
        let current = replaced(next(None, &first));
        assert!(current.info.contains_key(InfoKey::REMAINING_TIME));

        let stalled = sub(ProgressEvent::DownloadProgress {
            progress: 0.3,
            bytes_per_second: 0.0,
            total_bytes: Some(10_000),
        });
        let task = replaced(next(Some(&current), &stalled));
        assert_eq!(task.info[InfoKey::SPEED], json!("0 B/s"));
        assert!(!task.info.contains_key(InfoKey::REMAINING_TIME));

        let unknown_total = sub(ProgressEvent::DownloadProgress {
            progress: 0.4,
            bytes_per_second: 1_000.0,
            total_bytes: None,
        });
        let task = replaced(next(Some(&current), &unknown_total));
        assert!(!task.info.contains_key(InfoKey::REMAINING_TIME));

        let bad_rate = sub(ProgressEvent::DownloadProgress {
            progress: 0.5,
            bytes_per_second: f64::NAN,
            total_bytes: Some(10_000),
        });
        let task = replaced(next(Some(&current), &bad_rate));
        assert!(!task.info.contains_key(InfoKey::SPEED));
        assert!(!task.info.contains_key(InfoKey::REMAINING_TIME));
    }

    #[test]
    fn test_download_progress_keeps_producer_eta() {
        let msg = sub(ProgressEvent::DownloadProgress {
            progress: 0.5,
            bytes_per_second: 0.0,
            total_bytes: None,
        })
        .with_info(InfoKey::REMAINING_TIME, "about an hour");
        let task = replaced(next(None, &msg));

        assert_eq!(task.info[InfoKey::REMAINING_TIME], json!("about an hour"));
    }

    #[test]
    fn test_end_removes_or_ignores() {
        let msg = ProgressMessage::end(TOPIC, "A");
        assert_eq!(next(Some(&running(0.3)), &msg), Transition::Remove);
        assert_eq!(next(None, &msg), Transition::Keep);
    }

    #[test]
    fn test_sub_start_keeps_main_progress() {
        let msg = sub(ProgressEvent::SubActivityStart {
            subtask_name: "tile-3".to_string(),
        });
        let task = replaced(next(Some(&running(0.6)), &msg));

        assert_eq!(task.main_progress, 0.6);
        assert_eq!(task.subtask_name.as_deref(), Some("tile-3"));
        assert_eq!(task.subtask_progress, Some(0.0));
    }

    #[test]
    fn test_sub_events_without_entry_are_dropped() {
        let events = [
            ProgressEvent::SubActivityStart {
                subtask_name: "s".to_string(),
            },
            ProgressEvent::SubActivityEnd {
                subtask_name: "s".to_string(),
            },
            ProgressEvent::SubActivityProgress {
                subtask_name: "s".to_string(),
                progress: 1.0,
                task_progress: 1.0,
            },
        ];
        for event in events {
            assert_eq!(next(None, &sub(event)), Transition::Keep);
        }
    }

    #[test]
    fn test_sub_end_at_epsilon_boundary_survives() {
        let msg = sub(ProgressEvent::SubActivityEnd {
            subtask_name: "s".to_string(),
        });
        let task = replaced(next(Some(&running(0.999)), &msg));

        assert_eq!(task.main_progress, 0.999);
        assert_eq!(task.subtask_progress, Some(1.0));
    }

    #[test]
    fn test_sub_end_within_epsilon_removes() {
        let msg = sub(ProgressEvent::SubActivityEnd {
            subtask_name: "s".to_string(),
        });
        assert_eq!(next(Some(&running(0.9999)), &msg), Transition::Remove);
    }

    #[test]
    fn test_sub_progress_takes_main_progress_from_message() {
        let msg = sub(ProgressEvent::SubActivityProgress {
            subtask_name: "s".to_string(),
            progress: 0.5,
            task_progress: 0.3,
        });
        let task = replaced(next(Some(&running(0.8)), &msg));

        assert_eq!(task.main_progress, 0.3);
        assert_eq!(task.subtask_progress, Some(0.5));
    }

    #[test]
    fn test_sub_progress_completion() {
        let finished = sub(ProgressEvent::SubActivityProgress {
            subtask_name: "s".to_string(),
            progress: 1.0,
            task_progress: 0.99995,
        });
        assert_eq!(next(Some(&running(0.5)), &finished), Transition::Remove);

        let last_sub_not_done = sub(ProgressEvent::SubActivityProgress {
            subtask_name: "s".to_string(),
            progress: 0.9,
            task_progress: 1.0,
        });
        assert!(matches!(
            next(Some(&running(0.5)), &last_sub_not_done),
            Transition::Replace(_)
        ));
    }

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(0.0), "00:00:00");
        assert_eq!(format_hms(59.2), "00:01:00");
        assert_eq!(format_hms(3_725.0), "01:02:05");
    }
}
