//! Retention janitor.
//!
//! Opt-in background task that prunes terminal runs older than the
//! retention window. Active runs are never touched.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::timeline::{RunTimeline, TimelineError, days_before};

/// Delete terminal runs created more than `retention_days` before `now`.
pub fn prune_once(
    store: &dyn RunTimeline,
    retention_days: u32,
    now: DateTime<Utc>,
) -> Result<usize, TimelineError> {
    store.prune_terminal_before(days_before(now, retention_days))
}

/// Start the janitor loop. The first sweep runs immediately.
pub fn spawn_retention_janitor(
    store: Arc<dyn RunTimeline>,
    retention_days: u32,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(retention_days, "run history janitor started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match prune_once(store.as_ref(), retention_days, Utc::now()) {
                Ok(0) => debug!("janitor: nothing to prune"),
                Ok(n) => info!("janitor: pruned {n} old runs"),
                Err(e) => error!("janitor: prune failed: {e}"),
            }
        }
        debug!("run history janitor stopped");
    })
}
