//! Scheduler — runs sweeps over every registered endpoint.
//!
//! A sweep probes each endpoint in registry order, appends the result to the
//! `StatusStore`, raises alerts for endpoints that just went bad, and writes
//! one snapshot at the end. Sweeps never overlap: a request that arrives
//! while one is running is dropped, not queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use rpcwatch_core::Registry;
use rpcwatch_health::{AlertEvent, AlertSink, Probe};
use rpcwatch_state::{Sample, StatusStore};

/// Pause between two consecutive probes within a sweep.
pub const DEFAULT_PROBE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    Idle,
    Sweeping,
}

/// Outcome of one completed sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Timestamp shared by every sample of the sweep (unix seconds).
    pub ts: u64,
    pub probed: usize,
    pub failures: usize,
    pub alerts: Vec<AlertEvent>,
    /// Whether the end-of-sweep snapshot reached disk.
    pub persisted: bool,
}

/// Holds the sweep flag for as long as it lives.
struct SweepGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SweepGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    registry: Arc<Registry>,
    store: StatusStore,
    prober: Arc<dyn Probe>,
    alerts: Arc<dyn AlertSink>,
    probe_delay: Duration,
    sweeping: AtomicBool,
}

impl Scheduler {
    pub fn new(
        registry: Arc<Registry>,
        store: StatusStore,
        prober: Arc<dyn Probe>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            registry,
            store,
            prober,
            alerts,
            probe_delay: DEFAULT_PROBE_DELAY,
            sweeping: AtomicBool::new(false),
        }
    }

    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    pub fn state(&self) -> SweepState {
        if self.sweeping.load(Ordering::Acquire) {
            SweepState::Sweeping
        } else {
            SweepState::Idle
        }
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run one sweep stamped with the current time.
    ///
    /// Returns `None` when another sweep is already in progress.
    pub async fn sweep(&self) -> Option<SweepReport> {
        self.sweep_at(now_secs()).await
    }

    /// Run one sweep whose samples all carry `ts`.
    pub async fn sweep_at(&self, ts: u64) -> Option<SweepReport> {
        let Some(_guard) = SweepGuard::acquire(&self.sweeping) else {
            warn!("previous sweep still running, dropping this one");
            return None;
        };

        info!(ts, endpoints = self.registry.len(), "sweep started");
        let mut report = SweepReport {
            ts,
            probed: 0,
            failures: 0,
            alerts: Vec::new(),
            persisted: false,
        };

        for endpoint in self.registry.endpoints() {
            let status = self.prober.probe(endpoint).await;
            match status.height() {
                Some(height) => debug!(%endpoint, height, "endpoint healthy"),
                None => {
                    report.failures += 1;
                    warn!(%endpoint, target = %endpoint.target, %status, "endpoint unhealthy");
                }
            }

            let sample = Sample::new(ts, status.clone());
            if self.store.append(&endpoint.chain, &endpoint.name, sample).await {
                let event = AlertEvent {
                    endpoint: endpoint.clone(),
                    status,
                    ts,
                };
                warn!(%endpoint, "endpoint failed twice in a row, raising alert");
                self.dispatch(event.clone());
                report.alerts.push(event);
            }
            report.probed += 1;

            if !self.probe_delay.is_zero() {
                tokio::time::sleep(self.probe_delay).await;
            }
        }

        match self.store.snapshot_to_disk().await {
            Ok(()) => report.persisted = true,
            Err(e) => error!(error = %e, "failed to persist status snapshot, next sweep will retry"),
        }

        info!(
            ts,
            probed = report.probed,
            failures = report.failures,
            alerts = report.alerts.len(),
            persisted = report.persisted,
            "sweep finished"
        );
        Some(report)
    }

    /// Deliver an alert without holding up the sweep.
    fn dispatch(&self, event: AlertEvent) {
        let sink = Arc::clone(&self.alerts);
        tokio::spawn(async move {
            if let Err(e) = sink.notify(&event).await {
                warn!(endpoint = %event.endpoint, error = %e, "alert delivery failed");
            }
        });
    }

    /// Sweep once now, then once per tick until `shutdown` flips.
    ///
    /// Every sweep runs on its own task, so a tick that lands while a sweep
    /// is still going is rejected by the sweep guard instead of queueing.
    /// On shutdown, unfinished sweeps are cancelled and the store is written
    /// out one last time.
    pub async fn run(self: Arc<Self>, mut ticks: mpsc::Receiver<()>, mut shutdown: watch::Receiver<bool>) {
        info!(endpoints = self.registry.len(), "scheduler started");

        let mut in_flight = JoinSet::new();
        self.spawn_sweep(&mut in_flight);

        let mut ticks_open = true;
        loop {
            tokio::select! {
                tick = ticks.recv(), if ticks_open => match tick {
                    Some(()) => self.spawn_sweep(&mut in_flight),
                    None => {
                        warn!("tick source closed, no further sweeps will run");
                        ticks_open = false;
                    }
                },
                Some(done) = in_flight.join_next() => {
                    if let Err(e) = done {
                        error!(error = %e, "sweep task failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("scheduler shutting down");
        in_flight.shutdown().await;
        if let Err(e) = self.store.snapshot_to_disk().await {
            error!(error = %e, "failed to persist status snapshot on shutdown");
        }
    }

    fn spawn_sweep(self: &Arc<Self>, in_flight: &mut JoinSet<()>) {
        let scheduler = Arc::clone(self);
        in_flight.spawn(async move {
            scheduler.sweep().await;
        });
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
