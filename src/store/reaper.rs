use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;

use super::PushedRequestStore;

/// Periodically drop expired pushed requests.
///
/// Correctness never depends on this task: every lookup checks expiry on
/// its own. The caller spawns it (`tokio::spawn`).
pub async fn run(store: Arc<dyn PushedRequestStore>, period: Duration) {
    let mut sweep_tick = interval(period.max(Duration::from_secs(1)));

    // Consume the first immediate tick
    sweep_tick.tick().await;

    loop {
        sweep_tick.tick().await;
        sweep_once(store.as_ref());
    }
}

pub fn sweep_once(store: &dyn PushedRequestStore) -> usize {
    match store.sweep_expired() {
        Ok(0) => 0,
        Ok(n) => {
            log::info!("PAR reaper: purged {} expired requests", n);
            n
        }
        Err(e) => {
            log::error!("PAR reaper failed: {}", e);
            0
        }
    }
}
