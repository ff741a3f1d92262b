//! Location provider fed by a remote device over the HTTP API.
//!
//! The device posts fixes (or platform error codes) to the service; the
//! provider forwards them into whichever watch is currently active and drops
//! them when nothing is watching.

use crate::geo::Coordinate;
use crate::sensor::{FixSink, LocationProvider, WatchId, WatchOptions};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tracing::debug;

#[derive(Debug, Default)]
struct FeedSlot {
    sink: Option<FixSink>,
    options: Option<WatchOptions>,
}

/// Producer side handed to the API layer.
#[derive(Debug, Clone, Default)]
pub struct DeviceFeed {
    slot: Arc<Mutex<FeedSlot>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    Delivered,
    NotWatching,
}

impl DeviceFeed {
    /// Forward a fix with the time the device acquired it.
    pub fn push_fix(&self, coordinates: Coordinate, captured_at: SystemTime) -> FeedOutcome {
        self.deliver(|sink| sink.fix_captured(coordinates, captured_at))
    }

    pub fn push_failure(&self, code: u16) -> FeedOutcome {
        self.deliver(|sink| sink.fail(code))
    }

    /// Options of the active watch, so a device can honour timeout and cache age.
    pub fn active_options(&self) -> Option<WatchOptions> {
        self.slot.lock().ok().and_then(|slot| slot.options)
    }

    fn deliver(&self, send: impl FnOnce(&FixSink) -> bool) -> FeedOutcome {
        let Ok(slot) = self.slot.lock() else {
            return FeedOutcome::NotWatching;
        };
        match slot.sink.as_ref() {
            Some(sink) if send(sink) => FeedOutcome::Delivered,
            _ => FeedOutcome::NotWatching,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceFeedProvider {
    feed: DeviceFeed,
}

impl DeviceFeedProvider {
    pub fn new() -> Self {
        Self {
            feed: DeviceFeed::default(),
        }
    }

    pub fn feed(&self) -> DeviceFeed {
        self.feed.clone()
    }
}

impl Default for DeviceFeedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationProvider for DeviceFeedProvider {
    type Handle = WatchId;

    fn is_available(&self) -> bool {
        true
    }

    fn watch(&mut self, options: &WatchOptions, sink: FixSink) -> Self::Handle {
        let id = sink.watch_id();
        if let Ok(mut slot) = self.feed.slot.lock() {
            slot.sink = Some(sink);
            slot.options = Some(*options);
        }
        debug!(watch_id = id, "Device feed attached");
        id
    }

    fn cancel(&mut self, handle: Self::Handle) {
        if let Ok(mut slot) = self.feed.slot.lock()
            && slot.sink.as_ref().map(FixSink::watch_id) == Some(handle)
        {
            slot.sink = None;
            slot.options = None;
            debug!(watch_id = handle, "Device feed detached");
        }
    }
}
