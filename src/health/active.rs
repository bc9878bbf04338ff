//! Active health checking.
//!
//! # Responsibilities
//! - Periodically sweep every backend in the pool
//! - Probe all backends of a sweep concurrently, each with its own timeout
//! - Update backend liveness from the probe results

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::HealthCheckConfig;
use crate::load_balancer::{Backend, ServerPool};
use crate::observability::metrics;

/// Outcome of a single probe, consumed once by the sweep collector.
#[derive(Debug)]
struct ProbeResult {
    backend: Arc<Backend>,
    alive: bool,
}

/// How a sweep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Every dispatched probe reported back.
    Completed { alive: usize, dead: usize },
    /// Shutdown fired before all results arrived.
    Cancelled { collected: usize },
}

/// Shortest sweep period; a zero interval is raised to this.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub struct HealthChecker {
    pool: Arc<ServerPool>,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthChecker {
    pub fn new(pool: Arc<ServerPool>, config: &HealthCheckConfig) -> Self {
        Self::with_timing(pool, config.interval(), config.timeout())
    }

    pub fn with_timing(pool: Arc<ServerPool>, interval: Duration, probe_timeout: Duration) -> Self {
        Self {
            pool,
            interval: interval.max(MIN_INTERVAL),
            probe_timeout,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Launch a sweep on every tick until `shutdown` fires.
    ///
    /// Sweeps are spawned, not awaited: a slow sweep may overlap the next one.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            probe_timeout_secs = self.probe_timeout.as_secs(),
            backends = self.pool.size(),
            "Launching health check"
        );

        // First sweep after one full interval.
        let Some(first) = time::Instant::now().checked_add(self.interval) else {
            tracing::warn!(interval = ?self.interval, "Health check interval out of range; no sweeps scheduled");
            shutdown.cancelled().await;
            tracing::info!("Stopping health check");
            return;
        };
        let mut ticker = time::interval_at(first, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweep_id: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep_id += 1;
                    let pool = self.pool.clone();
                    let probe_timeout = self.probe_timeout;
                    let token = shutdown.child_token();
                    tokio::spawn(
                        async move {
                            sweep(&pool, probe_timeout, &token).await;
                        }
                        .instrument(tracing::debug_span!("health_sweep", id = sweep_id)),
                    );
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Stopping health check");
                    break;
                }
            }
        }
    }
}

/// Probe every backend in `pool` once and update liveness.
///
/// One task per backend fans results into a channel sized to the backend
/// count, so producers never block. Collection stops early on `shutdown`,
/// abandoning probes still in flight.
pub async fn sweep(pool: &ServerPool, probe_timeout: Duration, shutdown: &CancellationToken) -> SweepOutcome {
    let started = Instant::now();
    let backends = pool.backends();
    let expected = backends.len();

    let (tx, mut rx) = mpsc::channel::<ProbeResult>(expected.max(1));
    for backend in backends {
        let tx = tx.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            let alive = tokio::select! {
                alive = backend.probe(probe_timeout) => alive,
                _ = token.cancelled() => return,
            };
            let _ = tx.send(ProbeResult { backend, alive }).await;
        });
    }
    drop(tx);

    let mut alive_count = 0;
    let mut collected = 0;
    while collected < expected {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::info!(collected, expected, "Gracefully shutting down health check");
                metrics::record_sweep("cancelled", started);
                return SweepOutcome::Cancelled { collected };
            }
            result = rx.recv() => {
                // Senders only vanish without reporting if a probe task died.
                let Some(ProbeResult { backend, alive }) = result else { break };
                collected += 1;
                backend.set_alive(alive);
                if alive {
                    alive_count += 1;
                }
                metrics::record_backend_health(backend.url().as_str(), alive);
                let status = if alive { "up" } else { "down" };
                tracing::debug!(url = %backend.url(), status, "url status");
            }
        }
    }

    if collected < expected && shutdown.is_cancelled() {
        metrics::record_sweep("cancelled", started);
        return SweepOutcome::Cancelled { collected };
    }

    metrics::record_sweep("completed", started);
    SweepOutcome::Completed {
        alive: alive_count,
        dead: collected - alive_count,
    }
}
