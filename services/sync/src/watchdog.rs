//! Freshness watchdog
//!
//! The server pushes a check result per monitor roughly once per probe
//! interval. A monitor that stays silent for longer than its interval times
//! a grace factor is marked `Unknown`. The next check result that arrives
//! clears the state again. Staleness is a data-quality signal, not a
//! failure: the sweep never raises alerts and never touches `is_active`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::WatchdogConfig;
use crate::store::MonitorStore;
use crate::types::{current_epoch_ms, MonitorState, MonitorStatus};

/// Monitors whose last check result is older than `interval * stale_factor`.
///
/// Inactive monitors are expected to be silent and never count as stale.
/// Monitors that have not delivered a first result yet have no baseline and
/// are skipped; already-`Unknown` monitors are skipped so each silence is
/// flagged once.
pub fn find_stale(
    monitors: &HashMap<String, MonitorState>,
    now_ms: u64,
    stale_factor: f64,
) -> Vec<String> {
    monitors
        .values()
        .filter(|m| m.is_active && m.status != MonitorStatus::Unknown)
        .filter(|m| {
            m.last_update_epoch_ms.is_some_and(|last| {
                let budget_ms = (m.interval_seconds as f64 * 1000.0 * stale_factor) as u64;
                now_ms.saturating_sub(last) > budget_ms
            })
        })
        .map(|m| m.id.clone())
        .collect()
}

/// Spawn the periodic staleness sweep
pub fn spawn_watchdog_task(
    store: Arc<MonitorStore>,
    config: WatchdogConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let tick = std::time::Duration::from_secs(config.tick_seconds.max(1));
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            tick_seconds = config.tick_seconds,
            stale_factor = config.stale_factor,
            "Freshness watchdog started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = cancel.cancelled() => {
                    debug!("Freshness watchdog stopped");
                    return;
                }
            }

            let now_ms = current_epoch_ms();
            let snapshot = store.snapshot();
            for id in find_stale(&snapshot, now_ms, config.stale_factor) {
                debug!(monitor_id = %id, "Monitor went stale, marking unknown");
                store.update(&id, |m| m.status = MonitorStatus::Unknown);
            }
        }
    })
}
