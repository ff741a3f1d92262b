//! Attendance status derivation.
//!
//! The status is a pure projection of four inputs: the latest sensor reading,
//! whether the last-event fetch is still outstanding, the kind of the latest
//! known event, and the reference point. Rules are evaluated in order and the
//! first match wins:
//!
//! 1. sensor still loading, or last event still loading: `Pending`
//! 2. sensor failed: `SensorError`
//! 3. latest event is a check-in: `CheckedIn`, whatever the distance
//! 4. within the radius: `InRange`
//! 5. otherwise: `OutOfRange`

use crate::geo::ReferencePoint;
use crate::ledger::EventKind;
use crate::sensor::{SensorError, SensorReading};
use serde::Serialize;
use std::fmt;

pub mod action;
pub mod session;

#[derive(Debug, Clone, PartialEq)]
pub enum AttendanceStatus {
    Pending,
    SensorError(SensorError),
    CheckedIn,
    InRange { distance_meters: f64 },
    OutOfRange { distance_meters: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusKind {
    Pending,
    SensorError,
    CheckedIn,
    InRange,
    OutOfRange,
}

impl StatusKind {
    pub fn label(self) -> &'static str {
        match self {
            StatusKind::Pending => "Locating...",
            StatusKind::SensorError => "Location Error",
            StatusKind::CheckedIn => "Checked In",
            StatusKind::InRange => "In Range",
            StatusKind::OutOfRange => "Out of Range",
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl AttendanceStatus {
    pub fn kind(&self) -> StatusKind {
        match self {
            AttendanceStatus::Pending => StatusKind::Pending,
            AttendanceStatus::SensorError(_) => StatusKind::SensorError,
            AttendanceStatus::CheckedIn => StatusKind::CheckedIn,
            AttendanceStatus::InRange { .. } => StatusKind::InRange,
            AttendanceStatus::OutOfRange { .. } => StatusKind::OutOfRange,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StatusInputs<'a> {
    pub sensor: &'a SensorReading,
    pub last_event_loading: bool,
    pub last_event_kind: Option<EventKind>,
    pub reference: &'a ReferencePoint,
}

pub fn derive_status(inputs: &StatusInputs<'_>) -> AttendanceStatus {
    if inputs.last_event_loading {
        return AttendanceStatus::Pending;
    }
    let sample = match inputs.sensor {
        SensorReading::Loading => return AttendanceStatus::Pending,
        SensorReading::Error(error) => return AttendanceStatus::SensorError(error.clone()),
        SensorReading::Sample(sample) => sample,
    };
    if inputs.last_event_kind == Some(EventKind::CheckIn) {
        return AttendanceStatus::CheckedIn;
    }

    let distance_meters = inputs.reference.distance_from(sample.coordinates);
    if distance_meters <= inputs.reference.radius_meters() {
        AttendanceStatus::InRange { distance_meters }
    } else {
        AttendanceStatus::OutOfRange { distance_meters }
    }
}
