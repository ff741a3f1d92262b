use crate::geo::Coordinate;
use crate::sensor::{FixSink, LocationProvider, WatchId, WatchOptions};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

/// Everything the mock provider was asked to do.
#[derive(Debug, Clone, Default)]
pub struct MockProviderLog {
    pub watches_started: usize,
    pub cancelled: Vec<WatchId>,
    pub active: usize,
    pub max_concurrent: usize,
    pub watch_options: Vec<WatchOptions>,
    sinks: Vec<FixSink>,
    active_ids: Vec<WatchId>,
}

/// Scripted provider: tests push fixes and failures into the most recent watch.
#[derive(Debug, Clone)]
pub struct MockLocationProvider {
    available: bool,
    log: Arc<Mutex<MockProviderLog>>,
}

impl MockLocationProvider {
    pub fn new() -> Self {
        Self {
            available: true,
            log: Arc::new(Mutex::new(MockProviderLog::default())),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn log(&self) -> Arc<Mutex<MockProviderLog>> {
        Arc::clone(&self.log)
    }

    /// Deliver a fix to the newest active watch. Returns false if none is listening.
    pub fn emit_fix(&self, coordinates: Coordinate) -> bool {
        self.latest_sink()
            .map(|sink| sink.fix(coordinates))
            .unwrap_or(false)
    }

    pub fn emit_fix_captured(&self, coordinates: Coordinate, captured_at: SystemTime) -> bool {
        self.latest_sink()
            .map(|sink| sink.fix_captured(coordinates, captured_at))
            .unwrap_or(false)
    }

    pub fn emit_error(&self, code: u16) -> bool {
        self.latest_sink()
            .map(|sink| sink.fail(code))
            .unwrap_or(false)
    }

    /// Sink of any watch ever started, cancelled or not.
    pub fn sink_for(&self, watch_id: WatchId) -> Option<FixSink> {
        self.lock()
            .sinks
            .iter()
            .find(|sink| sink.watch_id() == watch_id)
            .cloned()
    }

    fn latest_sink(&self) -> Option<FixSink> {
        let log = self.lock();
        let id = *log.active_ids.last()?;
        log.sinks.iter().find(|sink| sink.watch_id() == id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, MockProviderLog> {
        // A poisoned mock only happens after a test already panicked.
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MockLocationProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationProvider for MockLocationProvider {
    type Handle = WatchId;

    fn is_available(&self) -> bool {
        self.available
    }

    fn watch(&mut self, options: &WatchOptions, sink: FixSink) -> Self::Handle {
        let mut log = self.lock();
        let id = sink.watch_id();
        log.watches_started += 1;
        log.watch_options.push(*options);
        log.sinks.push(sink);
        log.active_ids.push(id);
        log.active = log.active_ids.len();
        log.max_concurrent = log.max_concurrent.max(log.active);
        id
    }

    fn cancel(&mut self, handle: Self::Handle) {
        let mut log = self.lock();
        let before = log.active_ids.len();
        log.active_ids.retain(|id| *id != handle);
        if log.active_ids.len() != before {
            log.cancelled.push(handle);
        }
        log.active = log.active_ids.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{WatchEvent, WatchMessage};
    use tokio::sync::mpsc;

    #[test]
    fn cancel_is_idempotent() {
        let mut provider = MockLocationProvider::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = provider.watch(&WatchOptions::default(), FixSink::new(3, tx));

        provider.cancel(handle);
        provider.cancel(handle);

        let log = provider.log();
        let log = log.lock().expect("mock log");
        assert_eq!(log.cancelled, vec![3]);
        assert_eq!(log.active, 0);
    }

    #[test]
    fn emit_targets_newest_watch() {
        let mut provider = MockLocationProvider::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        provider.watch(&WatchOptions::default(), FixSink::new(1, tx.clone()));
        provider.watch(&WatchOptions::default(), FixSink::new(2, tx));

        assert!(provider.emit_error(2));

        assert_eq!(
            rx.try_recv().ok(),
            Some(WatchMessage {
                watch_id: 2,
                event: WatchEvent::Failure { code: 2 },
            })
        );
    }

    #[test]
    fn emit_without_watch_reports_nobody_listening() {
        let provider = MockLocationProvider::new();
        assert!(!provider.emit_fix(Coordinate {
            latitude: 1.0,
            longitude: 1.0
        }));
    }
}
