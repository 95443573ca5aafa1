//! Scan Worker
//!
//! Runs a scanner sweep on every tick of the scan interval, and early when
//! nudged through the shared [`Notify`] (for example after a pipeline save).

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::service::scanner::Scanner;

pub struct ScanWorker {
    scanner: Arc<Scanner>,
    interval: Duration,
    notify: Arc<Notify>,
}

impl ScanWorker {
    pub fn new(scanner: Arc<Scanner>, interval: Duration, notify: Arc<Notify>) -> Self {
        Self {
            scanner,
            interval,
            notify,
        }
    }

    /// Sweeps until `cancel` fires. Returns the number of sweeps run.
    pub async fn run(self, cancel: CancellationToken) -> u64 {
        info!(interval = ?self.interval, "Scan worker started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweeps = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => debug!("scan interval elapsed"),
                _ = self.notify.notified() => debug!("scan requested"),
            }

            match self.scanner.run(&cancel).await {
                Ok(summary) => debug!(?summary, "sweep complete"),
                Err(e) => error!(error = %e, "sweep failed"),
            }
            sweeps += 1;
        }

        info!(sweeps, "Scan worker stopped");
        sweeps
    }
}
