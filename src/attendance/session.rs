//! Per-user attendance session.
//!
//! The session keeps two independent memo cells, the latest sensor reading and
//! the latest known event kind, and recomputes the status whenever either one
//! changes. Ledger calls are split into a synchronous begin step, the awaited
//! call, and a synchronous completion step, so callers sharing the session
//! behind a lock never hold it across an `.await`.
//!
//! Two guards keep the local view consistent:
//! - only one write may be in flight; a second submission is turned away;
//! - every refresh and every successful write bumps a generation counter, and
//!   a refresh result is only applied if no newer generation was issued since.
//!
//! When the location adapter's reading channel is attached, a check-in is
//! measured against the adapter's latest published reading rather than the
//! one the status was derived from.

use crate::attendance::action::{ActionError, authorize};
use crate::attendance::{AttendanceStatus, StatusInputs, derive_status};
use crate::error::AppError;
use crate::geo::{Coordinate, ReferencePoint};
use crate::ledger::{AttendanceEvent, EventKind, LedgerClient, ReadError, WriteError};
use crate::network::Connectivity;
use crate::sensor::SensorReading;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Identity of the signed-in user, handed over by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: String,
}

impl SessionContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// A write that passed local checks and is now waiting on the ledger.
#[derive(Debug)]
#[must_use = "a pending action keeps the session locked for writes until completed"]
pub struct PendingAction {
    user_id: String,
    kind: EventKind,
    coordinates: Coordinate,
}

impl PendingAction {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn coordinates(&self) -> Coordinate {
        self.coordinates
    }
}

#[derive(Debug)]
pub struct RefreshTicket {
    user_id: String,
    generation: u64,
}

impl RefreshTicket {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

pub type SharedSession<L, N> = Arc<RwLock<AttendanceSession<L, N>>>;

pub struct AttendanceSession<L, N> {
    user_id: String,
    reference: ReferencePoint,
    ledger: Arc<L>,
    connectivity: N,
    sensor: SensorReading,
    live_sensor: Option<watch::Receiver<SensorReading>>,
    last_event_loading: bool,
    last_event_kind: Option<EventKind>,
    generation: u64,
    latest_refresh: Option<u64>,
    write_in_flight: bool,
    closed: bool,
    status_tx: watch::Sender<AttendanceStatus>,
}

impl<L, N> AttendanceSession<L, N>
where
    L: LedgerClient,
    N: Connectivity,
{
    /// The session starts `Pending`: nothing may be submitted until the last
    /// event has been fetched at least once.
    pub fn new(
        context: &SessionContext,
        reference: ReferencePoint,
        ledger: Arc<L>,
        connectivity: N,
    ) -> Self {
        let (status_tx, _status_rx) = watch::channel(AttendanceStatus::Pending);
        Self {
            user_id: context.user_id.clone(),
            reference,
            ledger,
            connectivity,
            sensor: SensorReading::Loading,
            live_sensor: None,
            last_event_loading: true,
            last_event_kind: None,
            generation: 0,
            latest_refresh: None,
            write_in_flight: false,
            closed: false,
            status_tx,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn reference(&self) -> &ReferencePoint {
        &self.reference
    }

    pub fn ledger(&self) -> Arc<L> {
        Arc::clone(&self.ledger)
    }

    pub fn connectivity(&self) -> &N {
        &self.connectivity
    }

    pub fn status(&self) -> AttendanceStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AttendanceStatus> {
        self.status_tx.subscribe()
    }

    pub fn sensor_reading(&self) -> &SensorReading {
        &self.sensor
    }

    /// Distance from the current sample to the reference point, if a sample exists.
    pub fn distance_meters(&self) -> Option<f64> {
        self.sensor
            .sample()
            .map(|sample| self.reference.distance_from(sample.coordinates))
    }

    pub fn is_write_in_flight(&self) -> bool {
        self.write_in_flight
    }

    pub fn is_last_event_loading(&self) -> bool {
        self.last_event_loading
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn attach_sensor(&mut self, readings: watch::Receiver<SensorReading>) {
        self.live_sensor = Some(readings);
    }

    pub fn set_sensor_reading(&mut self, reading: SensorReading) {
        if self.closed {
            return;
        }
        self.sensor = reading;
        self.recompute();
    }

    pub fn begin_refresh(&mut self) -> RefreshTicket {
        self.generation += 1;
        self.latest_refresh = Some(self.generation);
        self.last_event_loading = true;
        self.recompute();
        debug!(
            user_id = %self.user_id,
            generation = self.generation,
            "Fetching last attendance event"
        );
        RefreshTicket {
            user_id: self.user_id.clone(),
            generation: self.generation,
        }
    }

    /// Apply a fetch result. Returns true when it changed the known event kind.
    ///
    /// A failed fetch falls back to "checked out" so the status never stays
    /// pending. A result whose generation has been overtaken is dropped, but
    /// still clears the loading flag if it belongs to the newest refresh.
    pub fn apply_refresh(
        &mut self,
        ticket: RefreshTicket,
        result: Result<Option<AttendanceEvent>, ReadError>,
    ) -> bool {
        if self.closed {
            debug!(
                generation = ticket.generation,
                "Session closed, dropping fetch result"
            );
            return false;
        }

        if self.latest_refresh == Some(ticket.generation) {
            self.last_event_loading = false;
        }

        let applied = if ticket.generation == self.generation {
            self.last_event_kind = match result {
                Ok(event) => event.map(|event| event.kind),
                Err(err) => {
                    warn!(
                        user_id = %self.user_id,
                        error = %err,
                        "Failed to fetch last attendance event, assuming checked out"
                    );
                    None
                }
            };
            true
        } else {
            debug!(
                ticket = ticket.generation,
                current = self.generation,
                "Discarding stale fetch result"
            );
            false
        };

        self.recompute();
        applied
    }

    pub async fn refresh_last_event(&mut self) -> bool {
        let ticket = self.begin_refresh();
        let ledger = self.ledger();
        let result = ledger.fetch_last_event(ticket.user_id()).await;
        self.apply_refresh(ticket, result)
    }

    /// Run every local check for `kind` and reserve the single write slot.
    pub fn begin_action(&mut self, kind: EventKind) -> Result<PendingAction, ActionError> {
        if self.closed {
            return Err(ActionError::SessionClosed);
        }
        if self.write_in_flight {
            warn!(user_id = %self.user_id, kind = kind.as_str(), "Write already in flight");
            return Err(ActionError::WriteInFlight);
        }

        let status = self.status();
        let latest = self.latest_reading();
        // Check-out may travel with the last fix the status saw.
        let freshest = match kind {
            EventKind::CheckIn => latest.sample(),
            EventKind::CheckOut => latest.sample().or(self.sensor.sample()),
        };
        let coordinates = authorize(
            kind,
            &status,
            freshest,
            &self.reference,
            self.connectivity.is_online(),
        )
        .inspect_err(|err| {
            warn!(
                user_id = %self.user_id,
                kind = kind.as_str(),
                error = %err,
                "Attendance action rejected"
            );
        })?;

        self.write_in_flight = true;
        Ok(PendingAction {
            user_id: self.user_id.clone(),
            kind,
            coordinates,
        })
    }

    /// Release the write slot and, on success, flip the local state without re-fetching.
    pub fn complete_action(
        &mut self,
        pending: PendingAction,
        result: Result<(), WriteError>,
    ) -> Result<EventKind, ActionError> {
        self.write_in_flight = false;
        if let Err(err) = result {
            warn!(
                user_id = %pending.user_id,
                kind = pending.kind.as_str(),
                error = %err,
                "Attendance write failed"
            );
            return Err(ActionError::Write(err));
        }
        if self.closed {
            debug!(kind = pending.kind.as_str(), "Session closed, dropping write result");
            return Ok(pending.kind);
        }

        self.generation += 1;
        self.last_event_kind = Some(pending.kind);
        self.recompute();
        info!(
            user_id = %pending.user_id,
            kind = pending.kind.as_str(),
            generation = self.generation,
            "Attendance recorded"
        );
        Ok(pending.kind)
    }

    pub async fn submit(&mut self, kind: EventKind) -> Result<EventKind, ActionError> {
        let pending = self.begin_action(kind)?;
        let ledger = self.ledger();
        let result = ledger
            .append_event(pending.user_id(), pending.kind(), pending.coordinates())
            .await;
        self.complete_action(pending, result)
    }

    /// Tear down: later sensor readings and ledger responses are ignored.
    pub fn close(&mut self) {
        self.closed = true;
        self.write_in_flight = false;
        debug!(user_id = %self.user_id, "Attendance session closed");
    }

    fn latest_reading(&self) -> SensorReading {
        match self.live_sensor.as_ref() {
            Some(readings) => readings.borrow().clone(),
            None => self.sensor.clone(),
        }
    }

    fn recompute(&mut self) {
        let status = derive_status(&StatusInputs {
            sensor: &self.sensor,
            last_event_loading: self.last_event_loading,
            last_event_kind: self.last_event_kind,
            reference: &self.reference,
        });
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                debug!(from = ?current.kind(), to = ?status.kind(), "Attendance status changed");
                *current = status;
                true
            }
        });
    }
}

/// [`AttendanceSession::submit`] for a session shared behind a lock.
pub async fn submit_shared<L, N>(
    session: &SharedSession<L, N>,
    kind: EventKind,
) -> Result<EventKind, AppError>
where
    L: LedgerClient,
    N: Connectivity,
{
    let (ledger, pending) = {
        let mut guard = session.write().map_err(|_| AppError::StateLock)?;
        let pending = guard.begin_action(kind)?;
        (guard.ledger(), pending)
    };

    let result = ledger
        .append_event(pending.user_id(), pending.kind(), pending.coordinates())
        .await;

    let mut guard = session.write().map_err(|_| AppError::StateLock)?;
    Ok(guard.complete_action(pending, result)?)
}

/// [`AttendanceSession::refresh_last_event`] for a session shared behind a lock.
pub async fn refresh_shared<L, N>(session: &SharedSession<L, N>) -> Result<bool, AppError>
where
    L: LedgerClient,
    N: Connectivity,
{
    let (ledger, ticket) = {
        let mut guard = session.write().map_err(|_| AppError::StateLock)?;
        (guard.ledger(), guard.begin_refresh())
    };

    let result = ledger.fetch_last_event(ticket.user_id()).await;

    let mut guard = session.write().map_err(|_| AppError::StateLock)?;
    Ok(guard.apply_refresh(ticket, result))
}
