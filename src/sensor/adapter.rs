//! Lifecycle wrapper around a platform position watch.
//!
//! The adapter owns at most one platform watch at a time. Every fix or failure
//! arrives as a [`WatchMessage`] tagged with the watch that produced it, so
//! messages from a cancelled watch are dropped instead of leaking into the
//! current cycle. A failure is terminal for its watch until [`LocationAdapter::retry`].
//!
//! While watching, the adapter keeps an acquisition deadline of `options.timeout`,
//! re-armed by every accepted fix. When it passes, the watch fails with a
//! timeout just as if the platform had reported one. Fixes captured before the
//! watch started are only accepted while younger than `options.max_cached_age`.

use crate::sensor::{
    CODE_TIMEOUT, FixSink, LocationProvider, LocationSample, SensorError, SensorErrorKind,
    SensorReading, WatchEvent, WatchId, WatchMessage, WatchOptions,
};
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum AdapterState {
    Idle,
    Watching,
    Error(SensorError),
}

struct ActiveWatch<H> {
    id: WatchId,
    handle: H,
    started_at: SystemTime,
}

enum Wake {
    Message(Option<WatchMessage>),
    Deadline,
}

pub struct LocationAdapter<P: LocationProvider> {
    provider: P,
    options: WatchOptions,
    state: AdapterState,
    active: Option<ActiveWatch<P::Handle>>,
    next_watch_id: WatchId,
    events_tx: mpsc::UnboundedSender<WatchMessage>,
    events_rx: mpsc::UnboundedReceiver<WatchMessage>,
    reading_tx: watch::Sender<SensorReading>,
    deadline: Option<Instant>,
}

impl<P: LocationProvider> LocationAdapter<P> {
    pub fn new(provider: P, options: WatchOptions) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (reading_tx, _reading_rx) = watch::channel(SensorReading::Loading);
        Self {
            provider,
            options,
            state: AdapterState::Idle,
            active: None,
            next_watch_id: 1,
            events_tx,
            events_rx,
            reading_tx,
            deadline: None,
        }
    }

    pub fn state(&self) -> &AdapterState {
        &self.state
    }

    pub fn reading(&self) -> SensorReading {
        self.reading_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SensorReading> {
        self.reading_tx.subscribe()
    }

    /// Begin a new watch cycle, replacing any watch that is still active.
    pub fn start(&mut self) {
        self.cancel_active();
        self.publish(SensorReading::Loading);

        if !self.provider.is_available() {
            let error = SensorError::from(SensorErrorKind::Unsupported);
            warn!(error = %error, "Location capability unavailable");
            self.state = AdapterState::Error(error.clone());
            self.publish(SensorReading::Error(error));
            return;
        }

        let id = self.next_watch_id;
        self.next_watch_id += 1;
        let sink = FixSink::new(id, self.events_tx.clone());
        let handle = self.provider.watch(&self.options, sink);
        self.active = Some(ActiveWatch {
            id,
            handle,
            started_at: SystemTime::now(),
        });
        self.state = AdapterState::Watching;
        self.arm_deadline();
        info!(
            watch_id = id,
            high_accuracy = self.options.high_accuracy,
            timeout_ms = self.options.timeout.as_millis() as u64,
            max_cached_age_ms = self.options.max_cached_age.as_millis() as u64,
            "Location watch started"
        );
    }

    /// Cancel whatever watch exists (if any) and start a fresh one.
    pub fn retry(&mut self) {
        debug!("Retrying location watch");
        self.start();
    }

    pub fn stop(&mut self) {
        self.cancel_active();
        self.state = AdapterState::Idle;
    }

    pub fn has_active_watch(&self) -> bool {
        self.active.is_some()
    }

    /// When the active watch times out unless a fix arrives first.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Apply one provider message. Returns the new reading when it changed anything.
    pub fn handle_message(&mut self, message: WatchMessage) -> Option<SensorReading> {
        let current = self.active.as_ref().map(|watch| watch.id);
        if current != Some(message.watch_id) {
            debug!(
                watch_id = message.watch_id,
                "Dropping message from inactive watch"
            );
            return None;
        }
        if matches!(self.state, AdapterState::Error(_)) {
            debug!(
                watch_id = message.watch_id,
                "Watch failed earlier, ignoring until retry"
            );
            return None;
        }

        let reading = match message.event {
            WatchEvent::Fix {
                coordinates,
                captured_at,
            } => {
                if self.is_stale(captured_at) {
                    debug!(
                        watch_id = message.watch_id,
                        max_cached_age_ms = self.options.max_cached_age.as_millis() as u64,
                        "Dropping cached fix older than allowed"
                    );
                    return None;
                }
                self.state = AdapterState::Watching;
                self.arm_deadline();
                SensorReading::Sample(LocationSample {
                    coordinates,
                    captured_at,
                })
            }
            WatchEvent::Failure { code } => {
                let error = SensorError::from(SensorErrorKind::from_code(code));
                warn!(
                    watch_id = message.watch_id,
                    code,
                    kind = ?error.kind,
                    "Location watch failed"
                );
                self.state = AdapterState::Error(error.clone());
                self.deadline = None;
                SensorReading::Error(error)
            }
        };
        self.publish(reading.clone());
        Some(reading)
    }

    /// Apply every message already queued without waiting.
    pub fn drain(&mut self) -> Vec<SensorReading> {
        let mut readings = Vec::new();
        while let Ok(message) = self.events_rx.try_recv() {
            if let Some(reading) = self.handle_message(message) {
                readings.push(reading);
            }
        }
        readings
    }

    /// Wait for the next message or expired deadline that changes the reading.
    /// Cancel safe.
    pub async fn next_reading(&mut self) -> Option<SensorReading> {
        loop {
            let wake = match self.deadline {
                Some(deadline) => tokio::select! {
                    message = self.events_rx.recv() => Wake::Message(message),
                    () = tokio::time::sleep_until(deadline) => Wake::Deadline,
                },
                None => Wake::Message(self.events_rx.recv().await),
            };
            let reading = match wake {
                Wake::Message(Some(message)) => self.handle_message(message),
                Wake::Message(None) => return None,
                Wake::Deadline => self.expire_deadline(),
            };
            if reading.is_some() {
                return reading;
            }
        }
    }

    /// Fail the active watch with a timeout.
    fn expire_deadline(&mut self) -> Option<SensorReading> {
        self.deadline = None;
        let watch_id = self.active.as_ref()?.id;
        warn!(
            watch_id,
            timeout_ms = self.options.timeout.as_millis() as u64,
            "No location fix before the acquisition deadline"
        );
        self.handle_message(WatchMessage {
            watch_id,
            event: WatchEvent::Failure { code: CODE_TIMEOUT },
        })
    }

    fn arm_deadline(&mut self) {
        self.deadline = Some(Instant::now() + self.options.timeout);
    }

    /// A fix taken after the watch started is always fresh enough.
    fn is_stale(&self, captured_at: SystemTime) -> bool {
        let Some(active) = self.active.as_ref() else {
            return true;
        };
        if captured_at >= active.started_at {
            return false;
        }
        let age = SystemTime::now()
            .duration_since(captured_at)
            .unwrap_or(Duration::ZERO);
        age > self.options.max_cached_age
    }

    fn cancel_active(&mut self) {
        self.deadline = None;
        if let Some(active) = self.active.take() {
            debug!(watch_id = active.id, "Cancelling location watch");
            self.provider.cancel(active.handle);
        }
    }

    fn publish(&self, reading: SensorReading) {
        self.reading_tx.send_replace(reading);
    }
}

impl<P: LocationProvider> Drop for LocationAdapter<P> {
    fn drop(&mut self) {
        self.cancel_active();
    }
}
