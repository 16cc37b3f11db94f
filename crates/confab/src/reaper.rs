//! Periodic reclamation of idle sessions.

use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::session::SessionService;

/// Spawn the idle reaper for the lifetime of the process.
///
/// Each tick runs one sweep; a session whose upstream teardown fails is still
/// evicted inside the sweep, so a bad session never wedges the reaper.
pub fn spawn_idle_reaper(sessions: Arc<SessionService>) -> JoinHandle<()> {
    let period = Duration::from_secs(sessions.config().sweep_interval_secs);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Idle reaper running every {:?}", period);

        loop {
            ticker.tick().await;
            let cleaned = sessions.cleanup_idle_sessions().await;
            if cleaned > 0 {
                info!("Reclaimed {} idle session(s)", cleaned);
            } else {
                debug!("Idle sweep found nothing to reclaim");
            }
        }
    })
}
