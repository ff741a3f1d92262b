use crate::geo::Coordinate;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::mpsc;

pub mod adapter;
pub mod feed;
pub mod mock;

pub type WatchId = u64;

// Platform error codes, as reported by the position watch error callback.
pub const CODE_PERMISSION_DENIED: u16 = 1;
pub const CODE_POSITION_UNAVAILABLE: u16 = 2;
pub const CODE_TIMEOUT: u16 = 3;

pub const DEFAULT_ACQUISITION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationSample {
    pub coordinates: Coordinate,
    pub captured_at: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorErrorKind {
    PermissionDenied,
    PositionUnavailable,
    Timeout,
    Unsupported,
    Unknown,
}

impl SensorErrorKind {
    /// Classify a platform-reported failure code. `Unsupported` is never produced
    /// here: missing capability is signalled before a watch exists.
    pub fn from_code(code: u16) -> Self {
        match code {
            CODE_PERMISSION_DENIED => Self::PermissionDenied,
            CODE_POSITION_UNAVAILABLE => Self::PositionUnavailable,
            CODE_TIMEOUT => Self::Timeout,
            _ => Self::Unknown,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::PermissionDenied => {
                "Location permission denied. Please enable location access for this app in your device settings."
            }
            Self::PositionUnavailable => {
                "Location information is unavailable. Make sure location services are turned on."
            }
            Self::Timeout => {
                "The request to get your location timed out. Move to a spot with a clear view of the open sky and retry."
            }
            Self::Unsupported => "Geolocation is not supported by this device.",
            Self::Unknown => "An unknown error occurred while getting your location.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SensorError {
    pub kind: SensorErrorKind,
    pub message: String,
}

impl From<SensorErrorKind> for SensorError {
    fn from(kind: SensorErrorKind) -> Self {
        Self {
            kind,
            message: kind.message().to_string(),
        }
    }
}

/// Latest output of the location adapter, as consumed by the status engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorReading {
    Loading,
    Sample(LocationSample),
    Error(SensorError),
}

impl SensorReading {
    pub fn sample(&self) -> Option<&LocationSample> {
        match self {
            SensorReading::Sample(sample) => Some(sample),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub high_accuracy: bool,
    /// Upper bound on how long a single fix may take to acquire.
    pub timeout: Duration,
    /// Oldest cached fix the platform may hand back. Zero forces a fresh fix.
    pub max_cached_age: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: DEFAULT_ACQUISITION_TIMEOUT,
            max_cached_age: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WatchEvent {
    Fix {
        coordinates: Coordinate,
        captured_at: SystemTime,
    },
    Failure {
        code: u16,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchMessage {
    pub watch_id: WatchId,
    pub event: WatchEvent,
}

/// Push side of a single watch. Providers report fixes and failures through it;
/// every message is tagged with the watch it belongs to.
#[derive(Debug, Clone)]
pub struct FixSink {
    watch_id: WatchId,
    tx: mpsc::UnboundedSender<WatchMessage>,
}

impl FixSink {
    pub fn new(watch_id: WatchId, tx: mpsc::UnboundedSender<WatchMessage>) -> Self {
        Self { watch_id, tx }
    }

    pub fn watch_id(&self) -> WatchId {
        self.watch_id
    }

    /// Report a fix acquired just now. Returns false once the consuming adapter is gone.
    pub fn fix(&self, coordinates: Coordinate) -> bool {
        self.fix_captured(coordinates, SystemTime::now())
    }

    /// Report a fix with the time the platform acquired it, which may be a cached one.
    pub fn fix_captured(&self, coordinates: Coordinate, captured_at: SystemTime) -> bool {
        self.send(WatchEvent::Fix {
            coordinates,
            captured_at,
        })
    }

    pub fn fail(&self, code: u16) -> bool {
        self.send(WatchEvent::Failure { code })
    }

    fn send(&self, event: WatchEvent) -> bool {
        self.tx
            .send(WatchMessage {
                watch_id: self.watch_id,
                event,
            })
            .is_ok()
    }
}

/// Platform capability for continuous position updates.
pub trait LocationProvider {
    type Handle;

    /// Synchronous capability check; `false` means no watch can be started at all.
    fn is_available(&self) -> bool;
    fn watch(&mut self, options: &WatchOptions, sink: FixSink) -> Self::Handle;
    /// Must be idempotent for a given handle.
    fn cancel(&mut self, handle: Self::Handle);
}
