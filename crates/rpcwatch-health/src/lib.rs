//! rpcwatch-health — probing RPC endpoints and delivering alerts.
//!
//! # Architecture
//!
//! ```text
//! RpcProber (impl Probe)
//!   ├── ClientCache: one reqwest::Client per target, kept for the process lifetime
//!   └── probe() → eth_blockNumber under a timeout → Status
//!
//! AlertSink
//!   ├── LarkWebhook: POST a text message to a bot webhook
//!   └── NoopSink: no webhook configured
//! ```
//!
//! Probes never return errors: a timeout becomes `Status::Timeout` and any
//! other failure becomes a short `Status::Error` label, so one broken
//! endpoint cannot abort a sweep.

pub mod notifier;
pub mod probe;

pub use notifier::{AlertEvent, AlertSink, LarkWebhook, NoopSink, NotifyError};
pub use probe::{ClientCache, Probe, ProbeError, RpcProber, error_label};

#[cfg(test)]
pub(crate) mod test_server;
