//! Uplert sync - realtime monitoring state-synchronization client
//!
//! Maintains a long-lived connection to the monitoring backend, reconciles
//! pushed updates into a persisted local store, and throttles user-facing
//! alerts.

pub mod alerts;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod fallback;
pub mod io;
pub mod logs;
pub mod protocol;
pub mod store;
pub mod sync;
pub mod types;
pub mod watchdog;

pub use config::{load_config, Config};
pub use error::{Result, SyncError};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::alerts::{Alerter, TracingNotifier};
use crate::client::SyncClient;
use crate::store::{FileStateStore, MonitorStore};
use crate::sync::SyncEngine;

/// Run the sync service with the given configuration
pub async fn run(config: Config) -> Result<()> {
    let cancel = CancellationToken::new();

    // Build the store, hydrated from disk
    let persistence = FileStateStore::new(config.store.state_path.clone());
    let store = Arc::new(MonitorStore::new(Box::new(persistence)));

    // Build the alerting front-end
    let alerter = Arc::new(Alerter::new(
        &config.alerts,
        Box::new(TracingNotifier::new()),
    ));

    // Build the client, seeded with the persisted session
    let client = Arc::new(SyncClient::new(config.server.clone()));
    client.seed_session(store.session_id()).await;
    let inbound = client.subscribe();

    // Build the reconciliation engine
    let engine = Arc::new(SyncEngine::new(
        Arc::clone(&store),
        Arc::clone(&alerter),
        Arc::clone(&client),
        config.user_id,
    ));

    // Start background tasks
    let watchdog_handle = watchdog::spawn_watchdog_task(
        Arc::clone(&store),
        config.watchdog.clone(),
        cancel.clone(),
    );
    let reconciler_handle = tokio::spawn(Arc::clone(&engine).run(inbound, cancel.clone()));

    // Connect; failures hand over to the retry loop
    client.connect().await?;

    // Setup shutdown handler
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        cancel_for_signal.cancel();
    });

    tracing::info!("Sync service started");

    // Block until cancelled
    cancel.cancelled().await;

    // Persist the active set and pause running monitors before going away
    engine.prepare_shutdown().await;
    client.disconnect().await?;

    watchdog_handle.abort();
    reconciler_handle.abort();
    tracing::info!("Sync service stopped");

    Ok(())
}
