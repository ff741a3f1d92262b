use crate::geo::Coordinate;
use crate::ledger::{AttendanceEvent, EventKind, LedgerClient, ReadError, WriteError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

#[derive(Debug)]
struct StoredEvent {
    sequence: u64,
    event: AttendanceEvent,
}

#[derive(Debug, Default)]
struct LedgerInner {
    events: Vec<StoredEvent>,
    next_sequence: u64,
    last_timestamp: Option<SystemTime>,
}

/// In-process attendance store. The store assigns timestamps, so ordering never
/// depends on the caller's clock.
#[derive(Debug)]
pub struct MemoryLedger {
    inner: Mutex<LedgerInner>,
    reachable: AtomicBool,
    reject_writes: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LedgerInner::default()),
            reachable: AtomicBool::new(true),
            reject_writes: AtomicBool::new(false),
        }
    }

    /// Simulate the store being unreachable; reads and writes fail with a network error.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Make every write fail with a non-network error.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All events for one user, newest first.
    pub fn history(&self, user_id: &str) -> Vec<AttendanceEvent> {
        let inner = self.lock();
        let mut stored: Vec<&StoredEvent> = inner
            .events
            .iter()
            .filter(|stored| stored.event.user_id == user_id)
            .collect();
        stored.sort_by(|a, b| {
            b.event
                .server_timestamp
                .cmp(&a.event.server_timestamp)
                .then(b.sequence.cmp(&a.sequence))
        });
        stored.into_iter().map(|stored| stored.event.clone()).collect()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_timestamp(inner: &mut LedgerInner) -> SystemTime {
        let now = SystemTime::now();
        let timestamp = match inner.last_timestamp {
            Some(last) if now <= last => last + Duration::from_micros(1),
            _ => now,
        };
        inner.last_timestamp = Some(timestamp);
        timestamp
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerClient for MemoryLedger {
    async fn append_event(
        &self,
        user_id: &str,
        kind: EventKind,
        coordinates: Coordinate,
    ) -> Result<(), WriteError> {
        if !self.reachable.load(Ordering::SeqCst) {
            warn!(user_id, kind = kind.as_str(), "Ledger unreachable for write");
            return Err(WriteError::Network("attendance store unreachable".to_string()));
        }
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(WriteError::Unknown("write rejected by store".to_string()));
        }

        let mut inner = self.lock();
        let server_timestamp = Self::next_timestamp(&mut inner);
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.events.push(StoredEvent {
            sequence,
            event: AttendanceEvent {
                user_id: user_id.to_string(),
                kind,
                coordinates,
                server_timestamp,
            },
        });
        debug!(user_id, kind = kind.as_str(), sequence, "Attendance event stored");
        Ok(())
    }

    async fn fetch_last_event(&self, user_id: &str) -> Result<Option<AttendanceEvent>, ReadError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(ReadError::Network("attendance store unreachable".to_string()));
        }
        Ok(self.history(user_id).into_iter().next())
    }
}
