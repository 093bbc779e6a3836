//! StatusStore — the shared, bounded status history for every endpoint.
//!
//! The store lives in memory for the whole process. The scheduler is its
//! only writer; the API handlers read from it concurrently. Every read
//! clones the samples it returns under a read lock, so a reader never sees
//! a history halfway through an append.
//!
//! Persistence is a single JSON document rewritten after each sweep. Every
//! write goes to its own uniquely named temp file next to the snapshot,
//! which is fsynced and then renamed over it, so a crash or a cancelled
//! write leaves the previous snapshot in place. Loading never fails: a missing file is an empty store and a
//! corrupt one is logged and discarded.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use rpcwatch_core::Endpoint;

use crate::error::{StateError, StateResult};
use crate::history::History;
use crate::types::Sample;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Owned copy of the whole store: chain → node → samples (oldest first).
/// This is also the on-disk format.
pub type Snapshot = BTreeMap<String, BTreeMap<String, Vec<Sample>>>;

type Histories = HashMap<String, HashMap<String, History>>;

/// Thread-safe status store.
#[derive(Clone)]
pub struct StatusStore {
    histories: Arc<RwLock<Histories>>,
    max_entries: usize,
    path: Option<Arc<PathBuf>>,
}

impl StatusStore {
    /// Open a persistent store, loading any snapshot already at `path`.
    pub fn open(path: &Path, max_entries: usize) -> Self {
        let histories = match load_snapshot(path) {
            Ok(Some(snapshot)) => {
                let endpoints: usize = snapshot.values().map(BTreeMap::len).sum();
                info!(?path, endpoints, "status snapshot loaded");
                into_histories(snapshot, max_entries)
            }
            Ok(None) => {
                info!(?path, "no status snapshot found, starting fresh");
                Histories::new()
            }
            Err(e) => {
                warn!(?path, error = %e, "failed to load status snapshot, starting fresh");
                Histories::new()
            }
        };

        Self {
            histories: Arc::new(RwLock::new(histories)),
            max_entries,
            path: Some(Arc::new(path.to_path_buf())),
        }
    }

    /// Create a store that is never persisted (for testing, or when no data
    /// file is configured).
    pub fn in_memory(max_entries: usize) -> Self {
        Self {
            histories: Arc::new(RwLock::new(Histories::new())),
            max_entries,
            path: None,
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Snapshot path, if this store is persistent.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref().map(PathBuf::as_path)
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Append a sample for `chain`/`name`, creating the history on first
    /// use. Returns whether the new sample should raise an alert.
    pub async fn append(&self, chain: &str, name: &str, sample: Sample) -> bool {
        let mut histories = self.histories.write().await;
        histories
            .entry(chain.to_string())
            .or_default()
            .entry(name.to_string())
            .or_default()
            .append(sample, self.max_entries)
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// The most recent `limit` samples for one endpoint (all when `None`),
    /// oldest first. Unknown endpoints have an empty history.
    pub async fn window(&self, chain: &str, name: &str, limit: Option<usize>) -> Vec<Sample> {
        let histories = self.histories.read().await;
        histories
            .get(chain)
            .and_then(|nodes| nodes.get(name))
            .map(|history| history.window(limit))
            .unwrap_or_default()
    }

    /// Windows for several endpoints taken under one read lock, in the
    /// order the endpoints are given.
    pub async fn windows<'a>(
        &self,
        endpoints: impl IntoIterator<Item = &'a Endpoint>,
        limit: Option<usize>,
    ) -> Vec<(&'a Endpoint, Vec<Sample>)> {
        let histories = self.histories.read().await;
        endpoints
            .into_iter()
            .map(|endpoint| {
                let samples = histories
                    .get(&endpoint.chain)
                    .and_then(|nodes| nodes.get(&endpoint.name))
                    .map(|history| history.window(limit))
                    .unwrap_or_default();
                (endpoint, samples)
            })
            .collect()
    }

    /// Owned copy of every history in the store.
    pub async fn export(&self) -> Snapshot {
        let histories = self.histories.read().await;
        histories
            .iter()
            .map(|(chain, nodes)| {
                let nodes = nodes
                    .iter()
                    .map(|(name, history)| (name.clone(), history.window(None)))
                    .collect();
                (chain.clone(), nodes)
            })
            .collect()
    }

    /// Number of endpoints with a history.
    pub async fn endpoint_count(&self) -> usize {
        let histories = self.histories.read().await;
        histories.values().map(HashMap::len).sum()
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Persist the store to its snapshot path. A no-op for in-memory stores.
    pub async fn snapshot_to_disk(&self) -> StateResult<()> {
        match self.path() {
            Some(path) => self.snapshot_to(path).await,
            None => Ok(()),
        }
    }

    /// Persist the store to `path` via temp file + rename.
    ///
    /// The file work runs on the blocking pool and always completes once
    /// started, even if the calling task is cancelled.
    pub async fn snapshot_to(&self, path: &Path) -> StateResult<()> {
        let snapshot = self.export().await;
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(map_err!(Serialize))?;
        let len = bytes.len();

        let target = path.to_path_buf();
        tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
            .await
            .map_err(|e| StateError::Write(format!("snapshot task: {e}")))??;

        debug!(?path, bytes = len, "status snapshot written");
        Ok(())
    }
}

/// Write `bytes` to a fresh temp file beside `path`, fsync it, then rename
/// it over `path`. The temp file is removed on any failure.
fn write_atomic(path: &Path, bytes: &[u8]) -> StateResult<()> {
    let write_err = |e: std::io::Error| StateError::Write(format!("{}: {e}", path.display()));
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    let prefix = format!(".{name}.");

    let mut tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// Read a snapshot from disk. `Ok(None)` when the file does not exist.
pub fn load_snapshot(path: &Path) -> StateResult<Option<Snapshot>> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StateError::Read(e.to_string())),
    };
    let snapshot: Snapshot = serde_json::from_slice(&raw).map_err(map_err!(Deserialize))?;
    Ok(Some(snapshot))
}

fn into_histories(snapshot: Snapshot, max_entries: usize) -> Histories {
    snapshot
        .into_iter()
        .map(|(chain, nodes)| {
            let nodes = nodes
                .into_iter()
                .map(|(name, samples)| (name, History::from_samples(samples, max_entries)))
                .collect();
            (chain, nodes)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Status;

    fn endpoint(chain: &str, name: &str) -> Endpoint {
        Endpoint {
            chain: chain.to_string(),
            name: name.to_string(),
            target: format!("https://{chain}-{name}.example"),
        }
    }

    async fn populated(store: &StatusStore) {
        store.append("eth", "public", Sample::new(1, Status::Height(100))).await;
        store.append("eth", "public", Sample::new(2, Status::Timeout)).await;
        store.append("eth", "backup", Sample::new(1, Status::Error("HTTP 502".into()))).await;
        store.append("base", "primary", Sample::new(1, Status::Height(7))).await;
    }

    #[tokio::test]
    async fn append_creates_entries_and_bounds_them() {
        let store = StatusStore::in_memory(3);
        for ts in 0..10 {
            store.append("eth", "public", Sample::new(ts, Status::Height(ts))).await;
        }
        let window = store.window("eth", "public", None).await;
        assert_eq!(window.iter().map(|s| s.ts).collect::<Vec<_>>(), vec![7, 8, 9]);
        assert_eq!(store.endpoint_count().await, 1);
    }

    #[tokio::test]
    async fn append_reports_alert_decision() {
        let store = StatusStore::in_memory(1008);
        assert!(!store.append("eth", "a", Sample::new(1, Status::Height(1))).await);
        assert!(!store.append("eth", "a", Sample::new(2, Status::Timeout)).await);
        assert!(store.append("eth", "a", Sample::new(3, Status::Timeout)).await);
        // Histories are independent per endpoint.
        assert!(!store.append("eth", "b", Sample::new(3, Status::Timeout)).await);
    }

    #[tokio::test]
    async fn window_of_unknown_endpoint_is_empty() {
        let store = StatusStore::in_memory(10);
        assert!(store.window("eth", "nope", Some(5)).await.is_empty());
    }

    #[tokio::test]
    async fn window_sizes() {
        let n = 6;
        let store = StatusStore::in_memory(n);
        for ts in 0..n as u64 {
            store.append("eth", "public", Sample::new(ts, Status::Height(ts))).await;
        }
        for k in [0, 1, n, n + 1] {
            let window = store.window("eth", "public", Some(k)).await;
            assert_eq!(window.len(), k.min(n));
            if let Some(last) = window.last() {
                assert_eq!(last.ts, n as u64 - 1);
            }
            assert!(window.windows(2).all(|w| w[0].ts < w[1].ts));
        }
    }

    #[tokio::test]
    async fn windows_follow_requested_order() {
        let store = StatusStore::in_memory(10);
        populated(&store).await;
        let endpoints = [endpoint("eth", "backup"), endpoint("eth", "public"), endpoint("op", "new")];
        let views = store.windows(&endpoints, Some(1)).await;
        assert_eq!(views.len(), 3);
        assert_eq!(views[0].0.name, "backup");
        assert_eq!(views[1].1, vec![Sample::new(2, Status::Timeout)]);
        assert!(views[2].1.is_empty());
    }

    #[tokio::test]
    async fn snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rpc_status.json");

        let store = StatusStore::open(&path, 1008);
        populated(&store).await;
        store.snapshot_to_disk().await.unwrap();
        assert_eq!(dir_entries(dir.path()), vec!["rpc_status.json"]);

        let reopened = StatusStore::open(&path, 1008);
        assert_eq!(reopened.export().await, store.export().await);
        assert_eq!(reopened.endpoint_count().await, 3);
    }

    #[tokio::test]
    async fn snapshot_uses_wire_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let store = StatusStore::open(&path, 10);
        populated(&store).await;
        store.snapshot_to_disk().await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(
            raw["eth"]["public"],
            serde_json::json!([{"ts": 1, "status": 100}, {"ts": 2, "status": "timeout"}])
        );
    }

    #[tokio::test]
    async fn missing_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::open(&dir.path().join("absent.json"), 10);
        assert_eq!(store.endpoint_count().await, 0);
    }

    #[tokio::test]
    async fn corrupt_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        for content in [
            "{not json",
            "[]",
            r#"{"eth": {"public": [{"ts": 1, "status": null}]}}"#,
            r#"{"eth": ["public"]}"#,
        ] {
            std::fs::write(&path, content).unwrap();
            assert!(load_snapshot(&path).is_err(), "{content} should be rejected");
            let store = StatusStore::open(&path, 10);
            assert_eq!(store.endpoint_count().await, 0);
        }
    }

    #[tokio::test]
    async fn loaded_histories_are_trimmed_to_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let big = StatusStore::open(&path, 100);
        for ts in 0..50 {
            big.append("eth", "public", Sample::new(ts, Status::Height(ts))).await;
        }
        big.snapshot_to_disk().await.unwrap();

        let small = StatusStore::open(&path, 5);
        let window = small.window("eth", "public", None).await;
        assert_eq!(window.iter().map(|s| s.ts).collect::<Vec<_>>(), vec![45, 46, 47, 48, 49]);
    }

    #[tokio::test]
    async fn failed_write_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let store = StatusStore::open(&path, 10);
        populated(&store).await;
        store.snapshot_to_disk().await.unwrap();
        let before = std::fs::read(&path).unwrap();

        // A non-empty directory in the way makes the final rename fail.
        let blocked = dir.path().join("blocked");
        std::fs::create_dir(&blocked).unwrap();
        std::fs::write(blocked.join("keep"), b"x").unwrap();
        store.append("eth", "public", Sample::new(3, Status::Height(101))).await;
        assert!(matches!(store.snapshot_to(&blocked).await, Err(StateError::Write(_))));

        // The temp file is gone and nothing else was touched.
        assert_eq!(dir_entries(dir.path()), vec!["blocked", "status.json"]);
        assert_eq!(std::fs::read(&path).unwrap(), before);
        // In-memory state is still usable.
        assert_eq!(store.window("eth", "public", Some(1)).await[0].ts, 3);
    }

    #[tokio::test]
    async fn write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::open(&dir.path().join("missing/status.json"), 10);
        populated(&store).await;
        assert!(matches!(store.snapshot_to_disk().await, Err(StateError::Write(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_snapshots_publish_a_whole_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");

        // Stores of very different sizes so interleaved bytes would not parse.
        let mut stores = Vec::new();
        for size in [1u64, 400, 3, 900] {
            let store = StatusStore::open(&path, 1008);
            for ts in 0..size {
                store.append("eth", "public", Sample::new(ts, Status::Height(ts))).await;
            }
            stores.push(store);
        }
        let expected: Vec<Snapshot> = exports(&stores).await;

        for _ in 0..10 {
            let writers: Vec<_> = stores
                .iter()
                .cloned()
                .map(|store| tokio::spawn(async move { store.snapshot_to_disk().await }))
                .collect();
            // Cancel one writer mid-flight, the way shutdown cancels a sweep.
            writers[0].abort();
            for writer in writers {
                if let Ok(result) = writer.await {
                    result.unwrap();
                }
            }

            let on_disk = load_snapshot(&path).unwrap().unwrap();
            assert!(expected.contains(&on_disk));
        }

        // Let any detached write from the cancelled task land, then check again.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let on_disk = load_snapshot(&path).unwrap().unwrap();
        assert!(expected.contains(&on_disk));
        assert_eq!(dir_entries(dir.path()), vec!["status.json"]);
    }

    async fn exports(stores: &[StatusStore]) -> Vec<Snapshot> {
        let mut out = Vec::new();
        for store in stores {
            out.push(store.export().await);
        }
        out
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn in_memory_snapshot_is_a_noop() {
        let store = StatusStore::in_memory(10);
        populated(&store).await;
        assert!(store.path().is_none());
        store.snapshot_to_disk().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_reads_never_see_torn_histories() {
        let store = StatusStore::in_memory(50);
        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for ts in 0..2000u64 {
                    store.append("eth", "public", Sample::new(ts, Status::Height(ts))).await;
                    if ts % 16 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };

        let mut reads = 0;
        while !writer.is_finished() {
            let window = store.window("eth", "public", None).await;
            assert!(window.len() <= 50);
            // Every read is a contiguous, fully formed run of samples.
            assert!(window.windows(2).all(|w| w[1].ts == w[0].ts + 1));
            assert!(window.iter().all(|s| s.status == Status::Height(s.ts)));
            reads += 1;
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
        assert!(reads > 0);
        assert_eq!(store.window("eth", "public", None).await.len(), 50);
    }
}
