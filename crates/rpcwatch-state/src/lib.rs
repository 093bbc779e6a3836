//! rpcwatch-state — in-memory status history for rpcwatch.
//!
//! Keeps a bounded, oldest-first history of probe samples for every
//! `(chain, node)` pair, decides when a new sample should raise an alert,
//! and persists the whole store as a single JSON document.
//!
//! # Architecture
//!
//! ```text
//! StatusStore (Clone, Arc<RwLock<..>> inside)
//!   ├── chain → node → History (VecDeque<Sample>, capped at N)
//!   ├── append() → alert::should_alert() on the new tail
//!   └── snapshot_to_disk() → temp file + rename
//! ```
//!
//! The on-disk format is the same JSON the status API serves:
//! `{"eth": {"public": [{"ts": 1700000000, "status": 19000000}]}}`.

pub mod alert;
pub mod error;
pub mod history;
pub mod store;
pub mod types;

pub use alert::should_alert;
pub use error::{StateError, StateResult};
pub use history::History;
pub use store::{Snapshot, StatusStore};
pub use types::*;
