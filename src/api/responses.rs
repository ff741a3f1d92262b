use crate::ledger::EventKind;
use crate::presentation::StatusView;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct StatusSuccessResponse {
    #[serde(flatten)]
    pub view: StatusView,
    pub online: bool,
    pub write_in_flight: bool,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ActionSuccessResponse {
    pub recorded: EventKind,
    #[serde(flatten)]
    pub view: StatusView,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct AcceptedResponse {
    pub accepted: bool,
    pub timestamp: String,
}

/// Body of `POST /api/location`: either a fix or a platform failure code.
///
/// `age_ms` is how long ago the device acquired the fix; absent means just now.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum LocationReport {
    Fix {
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        age_ms: Option<u64>,
    },
    Failure {
        error_code: u16,
    },
}

/// Body of `GET /api/location`: the watch the device is expected to serve.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct LocationWatchResponse {
    pub watching: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_accuracy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cached_age_ms: Option<u64>,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct ConnectivityRequest {
    pub online: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ConnectivityResponse {
    pub online: bool,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HistoryResponse {
    pub events: Vec<HistoryEntry>,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthSuccessResponse {
    pub status: HealthStatus,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ApiErrorResponse {
    pub error_code: ApiErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    Offline,
    WriteInFlight,
    NotPermitted,
    OutOfRange,
    NoLocation,
    WriteFailed,
    SessionClosed,
    NotWatching,
    InvalidCoordinate,
    SensorUnavailable,
    InternalError,
}
