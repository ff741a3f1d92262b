use attendance_gate::api::{self, ApiState};
use attendance_gate::attendance::session::{AttendanceSession, SessionContext};
use attendance_gate::config;
use attendance_gate::error::AppError;
use attendance_gate::ledger::memory::MemoryLedger;
use attendance_gate::network::NetworkMonitor;
use attendance_gate::runtime::{self, SensorCommand};
use attendance_gate::sensor::adapter::LocationAdapter;
use attendance_gate::sensor::feed::DeviceFeedProvider;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

fn init_tracing(level: tracing::Level) {
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::DEFAULT_CONFIG_PATH.to_string());
    let config = config::load_from_path(&config_path)?;
    init_tracing(config.log_level());
    tracing::info!(
        config_path = %config_path,
        app = %config.app.name,
        "attendance-gate starting"
    );

    let reference = config.reference_point()?;
    tracing::info!(
        latitude = reference.point().latitude,
        longitude = reference.point().longitude,
        radius_meters = reference.radius_meters(),
        "Reference point loaded"
    );

    let ledger = Arc::new(MemoryLedger::new());
    let network = NetworkMonitor::default();
    let context = SessionContext::new(config.session.user_id.clone());
    let session = Arc::new(RwLock::new(AttendanceSession::new(
        &context,
        reference,
        Arc::clone(&ledger),
        network.clone(),
    )));

    let provider = DeviceFeedProvider::new();
    let feed = provider.feed();
    let adapter = LocationAdapter::new(provider, config.watch_options());
    let (sensor_commands, commands_rx) = mpsc::unbounded_channel();
    let sensor_task = runtime::spawn_sensor_task(adapter, Arc::clone(&session), commands_rx);
    let _last_event_fetch = runtime::spawn_last_event_fetch(Arc::clone(&session));

    let app = api::router(ApiState {
        session: Arc::clone(&session),
        ledger,
        network,
        feed,
        sensor_commands: sensor_commands.clone(),
    });
    let port = config.server_port();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the watch before closing, so no reading races the teardown.
    if sensor_commands.send(SensorCommand::Stop).is_err() {
        tracing::warn!("Sensor task already stopped");
    }
    if let Err(err) = sensor_task.await {
        tracing::warn!(error = %err, "Sensor task ended abnormally");
    }
    match session.write() {
        Ok(mut guard) => guard.close(),
        Err(_) => tracing::warn!("State lock poisoned while closing session"),
    }
    tracing::info!("attendance-gate stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
