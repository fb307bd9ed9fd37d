// Background expiry sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::manager::SsoManager;

/// Shortest accepted sweep period.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Run `cleanup_expired_sessions` every `interval` until the handle is
/// aborted. The first sweep happens one interval after spawning. Several
/// workers may run this against the same store.
pub fn spawn_cleanup_task(manager: Arc<SsoManager>, interval: Duration) -> JoinHandle<()> {
    let period = interval.max(MIN_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match manager.cleanup_expired_sessions().await {
                Ok(0) => debug!("no expired sso sessions"),
                Ok(removed) => info!(removed, "expired sso sessions removed"),
                Err(e) => warn!(error = %e, "sso session sweep failed"),
            }
        }
    })
}
