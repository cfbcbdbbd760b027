//! Background lease renewal.
//!
//! Leases are acquired with a short TTL so a crashed deployer does not lock
//! machines for long. While a pass runs, the renewal loop re-acquires the
//! same leases on an interval shorter than the TTL until it is stopped or
//! the rollout shuts down. An in-flight renewal is abandoned as soon as
//! either happens, so stopping never waits on the lease manager.

use std::sync::Arc;
use std::time::Duration;

use fleet_id::MachineId;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::LeaseManager;
use crate::shutdown::wait_for_shutdown;

/// Shortest interval used when the configured one is zero.
const MIN_FALLBACK_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to a running lease renewal loop.
pub struct LeaseRenewal {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl LeaseRenewal {
    /// Start renewing leases on `machines` every `interval`.
    ///
    /// A zero interval falls back to half the TTL (at least one second).
    pub fn spawn(
        leases: Arc<dyn LeaseManager>,
        machines: Vec<MachineId>,
        ttl: Duration,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let interval = if interval.is_zero() {
            let fallback = (ttl / 2).max(MIN_FALLBACK_INTERVAL);
            warn!(
                ttl_secs = ttl.as_secs(),
                fallback_ms = fallback.as_millis() as u64,
                "Lease renewal interval is zero, using fallback"
            );
            fallback
        } else {
            interval
        };

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_renewal_loop(
            leases, machines, ttl, interval, stop_rx, shutdown,
        ));
        Self { stop, handle }
    }

    /// Stop renewing and wait for the loop to exit.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Lease renewal task failed");
        }
    }
}

/// Resolves when the loop should exit: stop requested, its handle dropped,
/// or the rollout shutting down.
async fn stopped(stop: &mut watch::Receiver<bool>, shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = async { let _ = stop.wait_for(|stop| *stop).await; } => {}
        _ = wait_for_shutdown(shutdown) => {}
    }
}

async fn run_renewal_loop(
    leases: Arc<dyn LeaseManager>,
    machines: Vec<MachineId>,
    ttl: Duration,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        machine_count = machines.len(),
        ttl_secs = ttl.as_secs(),
        interval_ms = interval.as_millis() as u64,
        "Starting lease renewal loop"
    );

    let mut consecutive_failures = 0u32;
    let mut interval_timer = tokio::time::interval(interval);
    // The first tick completes immediately; the leases were just acquired.
    interval_timer.tick().await;

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {}
            _ = stopped(&mut stop, &mut shutdown) => break,
        }

        let renewed = tokio::select! {
            result = leases.acquire(&machines, ttl) => result,
            _ = stopped(&mut stop, &mut shutdown) => {
                debug!("Abandoning in-flight lease renewal");
                break;
            }
        };

        match renewed {
            Ok(()) => {
                consecutive_failures = 0;
                debug!(machine_count = machines.len(), "Leases renewed");
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures <= 3 {
                    warn!(error = %e, consecutive_failures, "Lease renewal failed");
                } else {
                    error!(
                        error = %e,
                        consecutive_failures,
                        "Lease renewal failed repeatedly"
                    );
                }
            }
        }
    }

    info!("Lease renewal loop shutting down");
}
