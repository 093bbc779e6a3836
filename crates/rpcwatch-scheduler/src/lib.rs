//! rpcwatch-scheduler — drives sweeps over the endpoint registry.
//!
//! The scheduler probes every endpoint one after another, records each
//! result in the `StatusStore`, hands alert decisions to the `AlertSink`,
//! and persists the store once per sweep. At most one sweep runs at a time;
//! a sweep requested while another is in progress is dropped.
//!
//! # Architecture
//!
//! ```text
//! trigger (cron) ──tick──▶ Scheduler::run
//!                            └── sweep task (guarded: Idle ⇄ Sweeping)
//!                                ├── Probe::probe(endpoint)      sequential, delayed
//!                                ├── StatusStore::append()       → alert decision
//!                                ├── AlertSink::notify()         spawned, best-effort
//!                                └── StatusStore::snapshot_to_disk()
//! ```

pub mod scheduler;
pub mod trigger;

pub use scheduler::{Scheduler, SweepReport, SweepState};
pub use trigger::spawn_cron_trigger;
