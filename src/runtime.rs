//! Background tasks that feed the attendance session.

use crate::attendance::session::{SharedSession, refresh_shared};
use crate::ledger::LedgerClient;
use crate::network::Connectivity;
use crate::sensor::adapter::LocationAdapter;
use crate::sensor::{LocationProvider, SensorReading};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorCommand {
    Retry,
    Stop,
}

/// Run the location adapter on its own task. The task is the only owner of the
/// platform watch; other components steer it through `commands`. The watch is
/// cancelled when the task ends, whether by `Stop` or by every sender dropping.
pub fn spawn_sensor_task<P, L, N>(
    mut adapter: LocationAdapter<P>,
    session: SharedSession<L, N>,
    mut commands: mpsc::UnboundedReceiver<SensorCommand>,
) -> JoinHandle<()>
where
    P: LocationProvider + Send + 'static,
    P::Handle: Send,
    L: LedgerClient + 'static,
    N: Connectivity + 'static,
{
    match session.write() {
        Ok(mut guard) => guard.attach_sensor(adapter.subscribe()),
        Err(_) => warn!("State lock poisoned while attaching sensor readings"),
    }

    tokio::spawn(async move {
        adapter.start();
        forward_reading(&session, adapter.reading());

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SensorCommand::Retry) => {
                        adapter.retry();
                        forward_reading(&session, adapter.reading());
                    }
                    Some(SensorCommand::Stop) | None => break,
                },
                reading = adapter.next_reading() => match reading {
                    Some(reading) => forward_reading(&session, reading),
                    None => break,
                },
            }
        }

        adapter.stop();
        info!("Sensor task stopped");
    })
}

/// Issue the one-shot last-event fetch that releases the initial `Pending` state.
pub fn spawn_last_event_fetch<L, N>(session: SharedSession<L, N>) -> JoinHandle<()>
where
    L: LedgerClient + 'static,
    N: Connectivity + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = refresh_shared(&session).await {
            warn!(error = %err, "Last attendance fetch could not be applied");
        }
    })
}

fn forward_reading<L, N>(session: &SharedSession<L, N>, reading: SensorReading)
where
    L: LedgerClient,
    N: Connectivity,
{
    match session.write() {
        Ok(mut guard) => guard.set_sensor_reading(reading),
        Err(_) => warn!("State lock poisoned while forwarding sensor reading"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::StatusKind;
    use crate::attendance::session::{AttendanceSession, SessionContext};
    use crate::geo::{Coordinate, ReferencePoint};
    use crate::ledger::memory::MemoryLedger;
    use crate::network::NetworkMonitor;
    use crate::sensor::WatchOptions;
    use crate::sensor::mock::MockLocationProvider;
    use std::sync::{Arc, RwLock};
    use std::time::Duration;

    const CENTER: Coordinate = Coordinate {
        latitude: 26.158299181572236,
        longitude: 32.72355294496741,
    };

    #[tokio::test]
    async fn task_forwards_fixes_and_cancels_on_stop() -> Result<(), Box<dyn std::error::Error>> {
        let reference = ReferencePoint::new(CENTER, 10.0)?;
        let session = Arc::new(RwLock::new(AttendanceSession::new(
            &SessionContext::new("student-1"),
            reference,
            Arc::new(MemoryLedger::new()),
            NetworkMonitor::default(),
        )));
        let provider = MockLocationProvider::new();
        let log = provider.log();
        let adapter = LocationAdapter::new(provider.clone(), WatchOptions::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let mut status_rx = session.read().map_err(|_| "lock")?.subscribe();

        let task = spawn_sensor_task(adapter, Arc::clone(&session), rx);
        spawn_last_event_fetch(Arc::clone(&session)).await?;

        // Wait until the watch exists before feeding it.
        for _ in 0..100 {
            if provider.emit_fix(CENTER) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::timeout(
            Duration::from_secs(1),
            status_rx.wait_for(|status| status.kind() == StatusKind::InRange),
        )
        .await??;

        tx.send(SensorCommand::Stop)?;
        task.await?;

        let snapshot = log.lock().map_err(|_| "mock log")?.clone();
        assert_eq!(snapshot.active, 0);
        assert_eq!(snapshot.cancelled.len(), snapshot.watches_started);
        Ok(())
    }
}
