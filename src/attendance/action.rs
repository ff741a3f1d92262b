use crate::attendance::{AttendanceStatus, StatusKind};
use crate::geo::{Coordinate, ReferencePoint};
use crate::ledger::{EventKind, WriteError};
use crate::sensor::LocationSample;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("You seem to be offline. Please check your connection to record your attendance.")]
    Offline,
    #[error("an attendance update is already in progress")]
    WriteInFlight,
    #[error("{kind} is not available while status is {status}")]
    NotPermitted { kind: EventKind, status: StatusKind },
    #[error("You are too far to check in. You must be within {radius_meters} meters.")]
    OutOfRange {
        distance_meters: f64,
        radius_meters: f64,
    },
    #[error("no location fix is available")]
    NoLocation,
    #[error("There was an error trying to record your attendance. Please try again. ({0})")]
    Write(#[from] WriteError),
    #[error("the attendance session has been closed")]
    SessionClosed,
}

impl ActionError {
    /// True when the action was turned down before any ledger call.
    pub fn is_local(&self) -> bool {
        !matches!(self, ActionError::Write(_))
    }
}

/// Decide whether `kind` may be submitted right now and with which coordinates.
///
/// Check-out only needs the `CheckedIn` status and connectivity; it travels with
/// whatever fix is known. Check-in additionally re-measures the freshest sample
/// against the radius, so a status that is one update behind cannot let it through.
pub fn authorize(
    kind: EventKind,
    status: &AttendanceStatus,
    freshest: Option<&LocationSample>,
    reference: &ReferencePoint,
    online: bool,
) -> Result<Coordinate, ActionError> {
    let required = match kind {
        EventKind::CheckIn => StatusKind::InRange,
        EventKind::CheckOut => StatusKind::CheckedIn,
    };
    if status.kind() != required {
        return Err(ActionError::NotPermitted {
            kind,
            status: status.kind(),
        });
    }
    if !online {
        return Err(ActionError::Offline);
    }

    let sample = freshest.ok_or(ActionError::NoLocation)?;
    if kind == EventKind::CheckIn {
        let distance_meters = reference.distance_from(sample.coordinates);
        if distance_meters > reference.radius_meters() {
            return Err(ActionError::OutOfRange {
                distance_meters,
                radius_meters: reference.radius_meters(),
            });
        }
    }
    Ok(sample.coordinates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn reference() -> ReferencePoint {
        ReferencePoint::new(
            Coordinate {
                latitude: 0.0,
                longitude: 0.0,
            },
            10.0,
        )
        .expect("valid reference")
    }

    fn sample(latitude: f64) -> LocationSample {
        LocationSample {
            coordinates: Coordinate {
                latitude,
                longitude: 0.0,
            },
            captured_at: SystemTime::now(),
        }
    }

    #[test]
    fn check_in_requires_in_range_status() {
        let status = AttendanceStatus::OutOfRange {
            distance_meters: 50.0,
        };
        let result = authorize(
            EventKind::CheckIn,
            &status,
            Some(&sample(0.0)),
            &reference(),
            true,
        );
        assert_eq!(
            result,
            Err(ActionError::NotPermitted {
                kind: EventKind::CheckIn,
                status: StatusKind::OutOfRange,
            })
        );
    }

    #[test]
    fn check_in_reverifies_the_freshest_sample() {
        let status = AttendanceStatus::InRange {
            distance_meters: 2.0,
        };
        // 0.001 degrees of latitude is roughly 111 m.
        let result = authorize(
            EventKind::CheckIn,
            &status,
            Some(&sample(0.001)),
            &reference(),
            true,
        );
        assert!(matches!(result, Err(ActionError::OutOfRange { .. })));
    }

    #[test]
    fn check_in_within_radius_uses_sample_coordinates() {
        let status = AttendanceStatus::InRange {
            distance_meters: 0.0,
        };
        let fix = sample(0.00001);
        let result = authorize(EventKind::CheckIn, &status, Some(&fix), &reference(), true);
        assert_eq!(result, Ok(fix.coordinates));
    }

    #[test]
    fn offline_rejects_check_out() {
        let result = authorize(
            EventKind::CheckOut,
            &AttendanceStatus::CheckedIn,
            Some(&sample(0.0)),
            &reference(),
            false,
        );
        assert_eq!(result, Err(ActionError::Offline));
        assert!(ActionError::Offline.to_string().contains("offline"));
    }

    #[test]
    fn check_out_accepts_out_of_range_coordinates() {
        let far = sample(1.0);
        let result = authorize(
            EventKind::CheckOut,
            &AttendanceStatus::CheckedIn,
            Some(&far),
            &reference(),
            true,
        );
        assert_eq!(result, Ok(far.coordinates));
    }

    #[test]
    fn check_out_is_not_permitted_unless_checked_in() {
        let result = authorize(
            EventKind::CheckOut,
            &AttendanceStatus::Pending,
            Some(&sample(0.0)),
            &reference(),
            true,
        );
        assert!(matches!(result, Err(ActionError::NotPermitted { .. })));
    }

    #[test]
    fn write_failures_are_not_local() {
        assert!(!ActionError::Write(WriteError::Unknown("boom".to_string())).is_local());
        assert!(ActionError::WriteInFlight.is_local());
    }
}
