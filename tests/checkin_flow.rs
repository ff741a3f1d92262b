use attendance_gate::attendance::action::ActionError;
use attendance_gate::attendance::session::{
    AttendanceSession, SessionContext, SharedSession, refresh_shared, submit_shared,
};
use attendance_gate::attendance::{AttendanceStatus, StatusKind};
use attendance_gate::error::AppError;
use attendance_gate::geo::{Coordinate, ReferencePoint};
use attendance_gate::ledger::memory::MemoryLedger;
use attendance_gate::ledger::{AttendanceEvent, EventKind, LedgerClient, ReadError, WriteError};
use attendance_gate::network::NetworkMonitor;
use attendance_gate::runtime::{SensorCommand, spawn_last_event_fetch, spawn_sensor_task};
use attendance_gate::sensor::adapter::LocationAdapter;
use attendance_gate::sensor::feed::{DeviceFeedProvider, FeedOutcome};
use attendance_gate::sensor::mock::MockLocationProvider;
use attendance_gate::sensor::{CODE_PERMISSION_DENIED, SensorErrorKind, WatchOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use tokio::sync::{Notify, mpsc};

const CENTER: Coordinate = Coordinate {
    latitude: 26.158299181572236,
    longitude: 32.72355294496741,
};
const RADIUS_METERS: f64 = 10.0;

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Roughly 50 m north of the reference point.
fn fifty_meters_away() -> Coordinate {
    Coordinate {
        latitude: CENTER.latitude + 50.0 / 111_195.0,
        longitude: CENTER.longitude,
    }
}

fn shared_session<L: LedgerClient>(
    ledger: Arc<L>,
    network: NetworkMonitor,
) -> Result<SharedSession<L, NetworkMonitor>, Box<dyn std::error::Error>> {
    let reference = ReferencePoint::new(CENTER, RADIUS_METERS)?;
    Ok(Arc::new(RwLock::new(AttendanceSession::new(
        &SessionContext::new("student-1"),
        reference,
        ledger,
        network,
    ))))
}

fn status_of<L: LedgerClient>(
    session: &SharedSession<L, NetworkMonitor>,
) -> Result<AttendanceStatus, AppError> {
    Ok(session.read().map_err(|_| AppError::StateLock)?.status())
}

/// Ledger whose writes park until the test opens the gate.
struct GatedLedger {
    inner: MemoryLedger,
    gate: Notify,
    writes_started: AtomicUsize,
}

impl GatedLedger {
    fn new() -> Self {
        Self {
            inner: MemoryLedger::new(),
            gate: Notify::new(),
            writes_started: AtomicUsize::new(0),
        }
    }
}

impl LedgerClient for GatedLedger {
    async fn append_event(
        &self,
        user_id: &str,
        kind: EventKind,
        coordinates: Coordinate,
    ) -> Result<(), WriteError> {
        self.writes_started.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        self.inner.append_event(user_id, kind, coordinates).await
    }

    async fn fetch_last_event(&self, user_id: &str) -> Result<Option<AttendanceEvent>, ReadError> {
        self.inner.fetch_last_event(user_id).await
    }
}

/// Drive a mock-backed sensor task until the session reaches `target`.
async fn wait_for_status<L: LedgerClient>(
    session: &SharedSession<L, NetworkMonitor>,
    target: StatusKind,
) -> TestResult {
    let mut status_rx = session.read().map_err(|_| "state lock")?.subscribe();
    tokio::time::timeout(
        Duration::from_secs(1),
        status_rx.wait_for(|status| status.kind() == target),
    )
    .await??;
    Ok(())
}

async fn emit_when_watching(provider: &MockLocationProvider, coordinates: Coordinate) -> bool {
    for _ in 0..200 {
        if provider.emit_fix(coordinates) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test]
async fn user_at_reference_checks_in() -> TestResult {
    let ledger = Arc::new(MemoryLedger::new());
    let session = shared_session(Arc::clone(&ledger), NetworkMonitor::default())?;
    let provider = MockLocationProvider::new();
    let adapter = LocationAdapter::new(provider.clone(), WatchOptions::default());
    let (commands, commands_rx) = mpsc::unbounded_channel();

    let task = spawn_sensor_task(adapter, Arc::clone(&session), commands_rx);
    spawn_last_event_fetch(Arc::clone(&session)).await?;
    assert!(emit_when_watching(&provider, CENTER).await);
    wait_for_status(&session, StatusKind::InRange).await?;

    let recorded = submit_shared(&session, EventKind::CheckIn).await?;

    assert_eq!(recorded, EventKind::CheckIn);
    assert_eq!(status_of(&session)?, AttendanceStatus::CheckedIn);
    let history = ledger.history("student-1");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].coordinates, CENTER);

    commands.send(SensorCommand::Stop)?;
    task.await?;
    Ok(())
}

#[tokio::test]
async fn user_fifty_meters_away_is_rejected_without_write() -> TestResult {
    let ledger = Arc::new(GatedLedger::new());
    let session = shared_session(Arc::clone(&ledger), NetworkMonitor::default())?;
    let provider = MockLocationProvider::new();
    let adapter = LocationAdapter::new(provider.clone(), WatchOptions::default());
    let (commands, commands_rx) = mpsc::unbounded_channel();

    let task = spawn_sensor_task(adapter, Arc::clone(&session), commands_rx);
    refresh_shared(&session).await?;
    assert!(emit_when_watching(&provider, fifty_meters_away()).await);
    wait_for_status(&session, StatusKind::OutOfRange).await?;

    let result = submit_shared(&session, EventKind::CheckIn).await;

    assert!(matches!(
        result,
        Err(AppError::Action(ActionError::NotPermitted {
            kind: EventKind::CheckIn,
            status: StatusKind::OutOfRange,
        }))
    ));
    assert_eq!(ledger.writes_started.load(Ordering::SeqCst), 0);
    match status_of(&session)? {
        AttendanceStatus::OutOfRange { distance_meters } => {
            assert!((distance_meters - 50.0).abs() < 0.5);
        }
        other => panic!("expected out of range, got {other:?}"),
    }

    commands.send(SensorCommand::Stop)?;
    task.await?;
    Ok(())
}

#[tokio::test]
async fn permission_denied_recovers_after_retry() -> TestResult {
    let session = shared_session(Arc::new(MemoryLedger::new()), NetworkMonitor::default())?;
    refresh_shared(&session).await?;
    let provider = MockLocationProvider::new();
    let mut adapter = LocationAdapter::new(provider.clone(), WatchOptions::default());

    adapter.start();
    assert!(provider.emit_error(CODE_PERMISSION_DENIED));
    let reading = adapter.next_reading().await.ok_or("adapter closed")?;
    session
        .write()
        .map_err(|_| "state lock")?
        .set_sensor_reading(reading);

    match status_of(&session)? {
        AttendanceStatus::SensorError(error) => {
            assert_eq!(error.kind, SensorErrorKind::PermissionDenied);
            assert!(error.message.contains("permission denied"));
        }
        other => panic!("expected sensor error, got {other:?}"),
    }

    adapter.retry();
    session
        .write()
        .map_err(|_| "state lock")?
        .set_sensor_reading(adapter.reading());
    assert_eq!(status_of(&session)?, AttendanceStatus::Pending);

    assert!(provider.emit_fix(CENTER));
    let reading = adapter.next_reading().await.ok_or("adapter closed")?;
    session
        .write()
        .map_err(|_| "state lock")?
        .set_sensor_reading(reading);
    assert_eq!(status_of(&session)?.kind(), StatusKind::InRange);

    let log = provider.log();
    let snapshot = log.lock().map_err(|_| "mock log")?.clone();
    assert_eq!(snapshot.watches_started, 2);
    assert_eq!(snapshot.max_concurrent, 1);
    Ok(())
}

#[tokio::test]
async fn offline_check_out_is_rejected_locally() -> TestResult {
    let ledger = Arc::new(MemoryLedger::new());
    let network = NetworkMonitor::default();
    let session = shared_session(Arc::clone(&ledger), network.clone())?;
    let provider = MockLocationProvider::new();
    let adapter = LocationAdapter::new(provider.clone(), WatchOptions::default());
    let (commands, commands_rx) = mpsc::unbounded_channel();

    let task = spawn_sensor_task(adapter, Arc::clone(&session), commands_rx);
    refresh_shared(&session).await?;
    assert!(emit_when_watching(&provider, CENTER).await);
    wait_for_status(&session, StatusKind::InRange).await?;
    submit_shared(&session, EventKind::CheckIn).await?;
    network.set_online(false);

    let result = submit_shared(&session, EventKind::CheckOut).await;

    match result {
        Err(AppError::Action(err)) => {
            assert_eq!(err, ActionError::Offline);
            assert!(err.to_string().contains("offline"));
        }
        other => panic!("expected offline rejection, got {other:?}"),
    }
    assert_eq!(status_of(&session)?, AttendanceStatus::CheckedIn);
    assert_eq!(ledger.len(), 1);

    commands.send(SensorCommand::Stop)?;
    task.await?;
    Ok(())
}

#[tokio::test]
async fn concurrent_submissions_record_one_event() -> TestResult {
    let ledger = Arc::new(GatedLedger::new());
    let session = shared_session(Arc::clone(&ledger), NetworkMonitor::default())?;
    let provider = MockLocationProvider::new();
    let mut adapter = LocationAdapter::new(provider.clone(), WatchOptions::default());
    adapter.start();
    assert!(provider.emit_fix(CENTER));
    let reading = adapter.next_reading().await.ok_or("adapter closed")?;
    session
        .write()
        .map_err(|_| "state lock")?
        .set_sensor_reading(reading);
    refresh_shared(&session).await?;

    let first = tokio::spawn({
        let session = Arc::clone(&session);
        async move { submit_shared(&session, EventKind::CheckIn).await }
    });
    while ledger.writes_started.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    let second = submit_shared(&session, EventKind::CheckIn).await;
    assert!(matches!(
        second,
        Err(AppError::Action(ActionError::WriteInFlight))
    ));

    ledger.gate.notify_one();
    let first = first.await??;

    assert_eq!(first, EventKind::CheckIn);
    assert_eq!(ledger.writes_started.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.inner.len(), 1);
    assert_eq!(status_of(&session)?, AttendanceStatus::CheckedIn);
    Ok(())
}

#[tokio::test]
async fn late_write_after_close_leaves_session_untouched() -> TestResult {
    let ledger = Arc::new(GatedLedger::new());
    let session = shared_session(Arc::clone(&ledger), NetworkMonitor::default())?;
    let provider = MockLocationProvider::new();
    let mut adapter = LocationAdapter::new(provider.clone(), WatchOptions::default());
    adapter.start();
    assert!(provider.emit_fix(CENTER));
    let reading = adapter.next_reading().await.ok_or("adapter closed")?;
    session
        .write()
        .map_err(|_| "state lock")?
        .set_sensor_reading(reading);
    refresh_shared(&session).await?;

    let pending = tokio::spawn({
        let session = Arc::clone(&session);
        async move { submit_shared(&session, EventKind::CheckIn).await }
    });
    while ledger.writes_started.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    session.write().map_err(|_| "state lock")?.close();
    ledger.gate.notify_one();
    pending.await??;

    let guard = session.read().map_err(|_| "state lock")?;
    assert!(guard.is_closed());
    assert_eq!(guard.status().kind(), StatusKind::InRange);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn silent_device_ends_in_timeout_then_recovers() -> TestResult {
    let session = shared_session(Arc::new(MemoryLedger::new()), NetworkMonitor::default())?;
    refresh_shared(&session).await?;
    let provider = DeviceFeedProvider::new();
    let feed = provider.feed();
    let options = WatchOptions {
        timeout: Duration::from_millis(200),
        ..WatchOptions::default()
    };
    let adapter = LocationAdapter::new(provider, options);
    let (commands, commands_rx) = mpsc::unbounded_channel();

    let task = spawn_sensor_task(adapter, Arc::clone(&session), commands_rx);
    wait_for_status(&session, StatusKind::SensorError).await?;

    match status_of(&session)? {
        AttendanceStatus::SensorError(error) => {
            assert_eq!(error.kind, SensorErrorKind::Timeout);
        }
        other => panic!("expected timeout, got {other:?}"),
    }

    commands.send(SensorCommand::Retry)?;
    wait_for_status(&session, StatusKind::Pending).await?;
    assert_eq!(feed.push_fix(CENTER, SystemTime::now()), FeedOutcome::Delivered);
    wait_for_status(&session, StatusKind::InRange).await?;

    commands.send(SensorCommand::Stop)?;
    task.await?;
    Ok(())
}
