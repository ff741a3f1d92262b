use crate::api::ApiState;
use crate::api::responses::{
    AcceptedResponse, ActionSuccessResponse, ApiErrorCode, ApiErrorResponse, ConnectivityRequest,
    ConnectivityResponse, HealthStatus, HealthSuccessResponse, HistoryEntry, HistoryResponse,
    LocationReport, LocationWatchResponse, StatusSuccessResponse,
};
use crate::attendance::StatusKind;
use crate::attendance::action::ActionError;
use crate::attendance::session::{AttendanceSession, submit_shared};
use crate::error::AppError;
use crate::geo::Coordinate;
use crate::ledger::memory::MemoryLedger;
use crate::ledger::{EventKind, WriteError};
use crate::network::{Connectivity, NetworkMonitor};
use crate::presentation::StatusView;
use crate::runtime::SensorCommand;
use crate::sensor::feed::FeedOutcome;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{error, info};

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Debug)]
enum TimestampError {
    Format(time::error::Format),
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampError::Format(err) => write!(f, "timestamp format error: {err}"),
        }
    }
}

pub enum ApiResponse<T> {
    Success {
        status: StatusCode,
        body: T,
    },
    Error {
        status: StatusCode,
        body: ApiErrorResponse,
    },
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match self {
            ApiResponse::Success { status, body } => (status, Json(body)).into_response(),
            ApiResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn get_status(State(state): State<ApiState>) -> impl IntoResponse {
    build_status_response(&state, SystemTime::now())
}

pub async fn post_check_in(State(state): State<ApiState>) -> impl IntoResponse {
    run_action(state, EventKind::CheckIn).await
}

pub async fn post_check_out(State(state): State<ApiState>) -> impl IntoResponse {
    run_action(state, EventKind::CheckOut).await
}

pub async fn get_location_watch(State(state): State<ApiState>) -> impl IntoResponse {
    build_location_watch_response(&state, SystemTime::now())
}

pub async fn post_location(
    State(state): State<ApiState>,
    Json(report): Json<LocationReport>,
) -> impl IntoResponse {
    build_location_response(&state, report, SystemTime::now())
}

pub async fn post_location_retry(State(state): State<ApiState>) -> impl IntoResponse {
    build_retry_response(&state, SystemTime::now())
}

pub async fn put_connectivity(
    State(state): State<ApiState>,
    Json(request): Json<ConnectivityRequest>,
) -> impl IntoResponse {
    state.network.set_online(request.online);
    match format_timestamp(SystemTime::now()) {
        Ok(timestamp) => ApiResponse::Success {
            status: StatusCode::OK,
            body: ConnectivityResponse {
                online: state.network.is_online(),
                timestamp,
            },
        },
        Err(_) => internal_error("timestamp formatting failure", SystemTime::now()),
    }
}

pub async fn get_history(State(state): State<ApiState>) -> impl IntoResponse {
    build_history_response(&state, SystemTime::now())
}

pub async fn get_health(State(state): State<ApiState>) -> impl IntoResponse {
    build_health_response(&state, SystemTime::now())
}

fn view_of(session: &AttendanceSession<MemoryLedger, NetworkMonitor>) -> StatusView {
    StatusView::new(
        &session.status(),
        session.distance_meters(),
        session.reference().radius_meters(),
        session.is_write_in_flight(),
    )
}

fn build_status_response(state: &ApiState, now: SystemTime) -> ApiResponse<StatusSuccessResponse> {
    let guard = match state.session.read() {
        Ok(guard) => guard,
        Err(_) => return internal_error("state lock poisoned while reading status", now),
    };
    let view = view_of(&guard);
    let online = guard.connectivity().is_online();
    let write_in_flight = guard.is_write_in_flight();
    drop(guard);

    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::Success {
            status: StatusCode::OK,
            body: StatusSuccessResponse {
                view,
                online,
                write_in_flight,
                timestamp,
            },
        },
        Err(_) => internal_error("timestamp formatting failure", now),
    }
}

async fn run_action(state: ApiState, kind: EventKind) -> ApiResponse<ActionSuccessResponse> {
    let session = Arc::clone(&state.session);
    // Runs detached so a dropped request cannot abandon a write midway and keep the slot taken.
    let outcome = tokio::spawn(async move { submit_shared(&session, kind).await }).await;
    let now = SystemTime::now();

    match outcome {
        Ok(Ok(recorded)) => action_success(&state, recorded, now),
        Ok(Err(AppError::Action(err))) => action_rejected(&err, now),
        Ok(Err(err)) => internal_error(&format!("attendance action failed: {err}"), now),
        Err(err) => internal_error(&format!("attendance action task failed: {err}"), now),
    }
}

fn action_success(
    state: &ApiState,
    recorded: EventKind,
    now: SystemTime,
) -> ApiResponse<ActionSuccessResponse> {
    let view = match state.session.read() {
        Ok(guard) => view_of(&guard),
        Err(_) => return internal_error("state lock poisoned after attendance write", now),
    };
    info!(kind = recorded.as_str(), "Attendance action accepted");

    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::Success {
            status: StatusCode::OK,
            body: ActionSuccessResponse {
                recorded,
                view,
                timestamp,
            },
        },
        Err(_) => internal_error("timestamp formatting failure", now),
    }
}

fn action_rejected<T>(err: &ActionError, now: SystemTime) -> ApiResponse<T> {
    let (status, code) = match err {
        ActionError::Offline => (StatusCode::SERVICE_UNAVAILABLE, ApiErrorCode::Offline),
        ActionError::WriteInFlight => (StatusCode::CONFLICT, ApiErrorCode::WriteInFlight),
        ActionError::NotPermitted { .. } => (StatusCode::CONFLICT, ApiErrorCode::NotPermitted),
        ActionError::OutOfRange { .. } => (StatusCode::FORBIDDEN, ApiErrorCode::OutOfRange),
        ActionError::NoLocation => (StatusCode::CONFLICT, ApiErrorCode::NoLocation),
        ActionError::Write(WriteError::Network(_)) => {
            (StatusCode::SERVICE_UNAVAILABLE, ApiErrorCode::WriteFailed)
        }
        ActionError::Write(WriteError::Unknown(_)) => {
            (StatusCode::BAD_GATEWAY, ApiErrorCode::WriteFailed)
        }
        ActionError::SessionClosed => (StatusCode::GONE, ApiErrorCode::SessionClosed),
    };
    error_response(status, code, err.to_string(), now)
}

fn build_location_response(
    state: &ApiState,
    report: LocationReport,
    now: SystemTime,
) -> ApiResponse<AcceptedResponse> {
    let outcome = match report {
        LocationReport::Fix {
            latitude,
            longitude,
            age_ms,
        } => match Coordinate::new(latitude, longitude) {
            Ok(coordinates) => state.feed.push_fix(coordinates, captured_at(now, age_ms)),
            Err(err) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    ApiErrorCode::InvalidCoordinate,
                    err.to_string(),
                    now,
                );
            }
        },
        LocationReport::Failure { error_code } => state.feed.push_failure(error_code),
    };

    match outcome {
        FeedOutcome::Delivered => accepted(now),
        FeedOutcome::NotWatching => error_response(
            StatusCode::CONFLICT,
            ApiErrorCode::NotWatching,
            "No location watch is active".to_string(),
            now,
        ),
    }
}

fn captured_at(now: SystemTime, age_ms: Option<u64>) -> SystemTime {
    let age = Duration::from_millis(age_ms.unwrap_or(0));
    now.checked_sub(age).unwrap_or(SystemTime::UNIX_EPOCH)
}

fn build_location_watch_response(
    state: &ApiState,
    now: SystemTime,
) -> ApiResponse<LocationWatchResponse> {
    let options = state.feed.active_options();
    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::Success {
            status: StatusCode::OK,
            body: LocationWatchResponse {
                watching: options.is_some(),
                high_accuracy: options.map(|o| o.high_accuracy),
                timeout_ms: options.map(|o| o.timeout.as_millis() as u64),
                max_cached_age_ms: options.map(|o| o.max_cached_age.as_millis() as u64),
                timestamp,
            },
        },
        Err(_) => internal_error("timestamp formatting failure", now),
    }
}

fn build_retry_response(state: &ApiState, now: SystemTime) -> ApiResponse<AcceptedResponse> {
    match state.sensor_commands.send(SensorCommand::Retry) {
        Ok(()) => accepted(now),
        Err(_) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorCode::SensorUnavailable,
            AppError::SensorTaskStopped.to_string(),
            now,
        ),
    }
}

fn accepted(now: SystemTime) -> ApiResponse<AcceptedResponse> {
    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::Success {
            status: StatusCode::ACCEPTED,
            body: AcceptedResponse {
                accepted: true,
                timestamp,
            },
        },
        Err(_) => internal_error("timestamp formatting failure", now),
    }
}

fn build_history_response(state: &ApiState, now: SystemTime) -> ApiResponse<HistoryResponse> {
    let user_id = match state.session.read() {
        Ok(guard) => guard.user_id().to_string(),
        Err(_) => return internal_error("state lock poisoned while reading user", now),
    };

    let mut events = Vec::new();
    for event in state.ledger.history(&user_id) {
        let timestamp = match format_timestamp(event.server_timestamp) {
            Ok(timestamp) => timestamp,
            Err(_) => return internal_error("timestamp formatting failure", now),
        };
        events.push(HistoryEntry {
            kind: event.kind,
            latitude: event.coordinates.latitude,
            longitude: event.coordinates.longitude,
            timestamp,
        });
    }

    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::Success {
            status: StatusCode::OK,
            body: HistoryResponse { events, timestamp },
        },
        Err(_) => internal_error("timestamp formatting failure", now),
    }
}

fn build_health_response(state: &ApiState, now: SystemTime) -> ApiResponse<HealthSuccessResponse> {
    let status_kind = match state.session.read() {
        Ok(guard) => guard.status().kind(),
        Err(_) => return internal_error("state lock poisoned while reading status", now),
    };
    let status = if status_kind == StatusKind::SensorError || !state.network.is_online() {
        HealthStatus::Degraded
    } else {
        HealthStatus::Ok
    };

    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::Success {
            status: StatusCode::OK,
            body: HealthSuccessResponse { status, timestamp },
        },
        Err(_) => internal_error("timestamp formatting failure", now),
    }
}

fn format_timestamp(timestamp: SystemTime) -> Result<String, TimestampError> {
    let datetime = OffsetDateTime::from(timestamp);
    datetime.format(&Rfc3339).map_err(TimestampError::Format)
}

fn error_response<T>(
    status: StatusCode,
    error_code: ApiErrorCode,
    error_message: String,
    now: SystemTime,
) -> ApiResponse<T> {
    let timestamp = format_timestamp(now).unwrap_or_else(|err| {
        error!(error = %err, "Failed to format error timestamp");
        OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
    });
    ApiResponse::Error {
        status,
        body: ApiErrorResponse {
            error_code,
            error_message,
            timestamp,
        },
    }
}

fn internal_error<T>(message: &str, now: SystemTime) -> ApiResponse<T> {
    error!(message = message, "Internal error while handling request");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ApiErrorCode::InternalError,
        INTERNAL_ERROR_MESSAGE.to_string(),
        now,
    )
}
