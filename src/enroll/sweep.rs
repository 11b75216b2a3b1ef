//! Background reclamation of expired sessions.
//!
//! Expired sessions are already rejected on every read and apply, so the
//! sweeper is pure hygiene: it deletes dead rows (codes cascade with them)
//! on a fixed cadence and never touches live data.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error};

use super::store::EnrollmentStore;

/// Spawn the expiry sweeper loop.
pub fn spawn_sweeper(
    store: Arc<dyn EnrollmentStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = if interval.is_zero() {
            Duration::from_secs(1)
        } else {
            interval
        };
        loop {
            match store.sweep_expired().await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "swept expired enrollment sessions"),
                Err(err) => error!("enrollment expiry sweep failed: {err}"),
            }
            sleep(interval).await;
        }
    })
}
