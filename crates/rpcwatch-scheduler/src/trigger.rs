//! Cron tick source for the scheduler.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use rpcwatch_core::CronSchedule;

/// Send a tick on `tx` at every fire time of `schedule` until `shutdown`
/// flips or the receiver goes away.
///
/// Ticks are never queued: if the previous tick has not been taken off the
/// channel yet, the new one is dropped.
pub fn spawn_cron_trigger(
    schedule: CronSchedule,
    tx: mpsc::Sender<()>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(schedule = schedule.expression(), "cron trigger started");
        // Anchor on the last fire time so an early wake-up cannot fire twice.
        let mut after = Utc::now();
        loop {
            let Some(next) = schedule.next_after(after) else {
                error!(schedule = schedule.expression(), "schedule never fires again, trigger stopped");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            debug!(%next, wait_secs = wait.as_secs(), "waiting for next sweep");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {
                    debug!("cron trigger stopped");
                    return;
                }
            }

            match tx.try_send(()) {
                Ok(()) => debug!(%next, "sweep tick sent"),
                Err(TrySendError::Full(())) => debug!(%next, "previous tick still pending, tick dropped"),
                Err(TrySendError::Closed(())) => {
                    debug!("scheduler gone, cron trigger stopped");
                    return;
                }
            }
            after = next;
        }
    })
}
