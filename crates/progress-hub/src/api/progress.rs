use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use progress_protocol::{AttributeFilter, ProgressMessage, TaskProgress};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::api::error::ApiError;
use crate::{Aggregator, Bus};

/// Standard alphabet, padding optional.
const FILTER_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// ============================================================================
// Query Parameters
// ============================================================================

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunningQueryParams {
    /// Exact category match (e.g. "download")
    pub category: Option<String>,

    /// `userName`: shorthand for a `Principal` attribute filter
    pub user_name: Option<String>,

    /// Base64-encoded JSON `{"name": ..., "value": ...}`; overrides `userName`
    pub filter: Option<String>,
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("filter is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("filter is not a {{name, value}} object: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn decode_filter(raw: &str) -> Result<AttributeFilter, FilterError> {
    let bytes = FILTER_ENGINE.decode(raw.trim())?;
    Ok(serde_json::from_slice(&bytes)?)
}

impl RunningQueryParams {
    /// Read the parameters from a raw query string. A repeated key keeps its
    /// last value; unknown keys are ignored.
    pub fn parse(query: Option<&str>) -> Self {
        let mut params = Self::default();
        let pairs = form_urlencoded::parse(query.unwrap_or_default().as_bytes());
        for (key, value) in pairs {
            let slot = match key.as_ref() {
                "category" => &mut params.category,
                "userName" => &mut params.user_name,
                "filter" => &mut params.filter,
                _ => continue,
            };
            if let Some(previous) = slot.replace(value.into_owned()) {
                warn!(key = %key, discarded = %previous, "repeated query parameter, keeping the last value");
            }
        }
        params
    }

    /// The attribute filter this query asks for. A malformed `filter` is logged
    /// and ignored.
    pub fn attribute_filter(&self) -> Option<AttributeFilter> {
        if let Some(raw) = &self.filter {
            match decode_filter(raw) {
                Ok(filter) => return Some(filter),
                Err(e) => warn!(filter = %raw, "ignoring malformed attribute filter: {}", e),
            }
        }
        self.user_name.as_ref().map(AttributeFilter::principal)
    }
}

// ============================================================================
// Response DTOs
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    /// Whether the body was a recognizable progress message
    pub accepted: bool,
    /// Subscribers that took the message
    pub delivered: usize,
}

// ============================================================================
// HTTP Handlers
// ============================================================================

/// GET /api/progress/running
/// Running tasks, optionally filtered by category and attribute
pub async fn list_running(
    State(aggregator): State<Aggregator>,
    RawQuery(query): RawQuery,
) -> Json<Vec<TaskProgress>> {
    let params = RunningQueryParams::parse(query.as_deref());
    let filter = params.attribute_filter();
    let tasks = aggregator.list_running(params.category.as_deref(), filter.as_ref());
    Json(tasks)
}

/// GET /api/progress/running/:task_name
pub async fn get_running_task(
    State(aggregator): State<Aggregator>,
    Path(task_name): Path<String>,
) -> Result<Json<TaskProgress>, ApiError> {
    aggregator
        .get(&task_name)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("task '{}' is not running", task_name)))
}

/// POST /api/progress/events
/// Publish a progress message on behalf of an out-of-process producer
///
/// Unrecognized or malformed messages are logged and reported with
/// `accepted: false`; the producer never gets an error status.
pub async fn publish_event(
    State(bus): State<Bus>,
    body: Bytes,
) -> (StatusCode, Json<PublishResponse>) {
    let response = match serde_json::from_slice::<ProgressMessage>(&body) {
        Ok(message) => {
            let delivered = bus.publish(&message);
            debug!(task = %message.task_name, delivered, "published message from HTTP producer");
            PublishResponse {
                accepted: true,
                delivered,
            }
        }
        Err(e) => {
            warn!("ignoring unrecognized progress message: {}", e);
            PublishResponse {
                accepted: false,
                delivered: 0,
            }
        }
    };
    (StatusCode::ACCEPTED, Json(response))
}
