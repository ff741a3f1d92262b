//! Attendance events and the remote store that records them.

use crate::geo::Coordinate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::SystemTime;
use thiserror::Error;

pub mod memory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    CheckIn,
    CheckOut,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::CheckIn => "check-in",
            EventKind::CheckOut => "check-out",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable once written. Ordered by the store's timestamp, never the client clock.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceEvent {
    pub user_id: String,
    pub kind: EventKind,
    pub coordinates: Coordinate,
    pub server_timestamp: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("network unavailable: {0}")]
    Network(String),
    #[error("attendance write failed: {0}")]
    Unknown(String),
}

/// An empty history is `Ok(None)`, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("network unavailable: {0}")]
    Network(String),
    #[error("attendance read failed: {0}")]
    Unknown(String),
}

pub trait LedgerClient: Send + Sync {
    /// Append one event. Either the whole event is stored or nothing is.
    fn append_event(
        &self,
        user_id: &str,
        kind: EventKind,
        coordinates: Coordinate,
    ) -> impl Future<Output = Result<(), WriteError>> + Send;

    /// Chronologically latest event for the user, if any.
    fn fetch_last_event(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<AttendanceEvent>, ReadError>> + Send;
}
