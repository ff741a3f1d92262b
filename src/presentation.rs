//! Status-to-copy mapping for clients that render the check-in screen.

use crate::attendance::{AttendanceStatus, StatusKind};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewAction {
    CheckIn,
    CheckOut,
    RetryLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct StatusView {
    pub status: StatusKind,
    pub label: &'static str,
    pub title: &'static str,
    pub message: String,
    pub button_text: &'static str,
    pub button_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ViewAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_meters: Option<f64>,
    pub radius_meters: f64,
}

impl StatusView {
    pub fn new(
        status: &AttendanceStatus,
        distance_meters: Option<f64>,
        radius_meters: f64,
        write_in_flight: bool,
    ) -> Self {
        let (title, message, button_text, action) = match status {
            AttendanceStatus::Pending => (
                "Locating...",
                "Acquiring your precise location.".to_string(),
                "Please Wait...",
                None,
            ),
            AttendanceStatus::SensorError(error) => (
                "Location Error",
                error.message.clone(),
                "Retry Location",
                Some(ViewAction::RetryLocation),
            ),
            AttendanceStatus::CheckedIn => (
                "Checked In",
                "You are currently present on campus.".to_string(),
                "Check Out",
                Some(ViewAction::CheckOut),
            ),
            AttendanceStatus::InRange { .. } => (
                "You're Here!",
                "You are within the check-in zone.".to_string(),
                "Check In Now",
                Some(ViewAction::CheckIn),
            ),
            AttendanceStatus::OutOfRange { .. } => (
                "Out of Range",
                format!("Move within {radius_meters}m to check in."),
                "Too Far to Check In",
                None,
            ),
        };

        // Retry only touches the sensor, so it stays usable during a write.
        let blocked_by_write = write_in_flight && action != Some(ViewAction::RetryLocation);
        let button_text = if blocked_by_write && action.is_some() {
            "Saving..."
        } else {
            button_text
        };

        Self {
            status: status.kind(),
            label: status.kind().label(),
            title,
            message,
            button_text,
            button_enabled: action.is_some() && !blocked_by_write,
            action,
            distance_meters,
            radius_meters,
        }
    }
}
