//! Snapshot store with a polling hot-reload watcher.
//!
//! The store holds one `Arc<ConfigSnapshot>` in a `tokio::sync::watch`
//! slot. Publishing replaces the whole `Arc`, so a reader holds either the
//! old snapshot or the new one and never a mix of the two.

use crate::loader::{self, ConfigError};
use crate::snapshot::ConfigSnapshot;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Poll rate used when none is given on the command line.
pub const DEFAULT_WATCH_FPS: u32 = 10;

/// Poll period for a watcher checking `fps` times per second.
/// A rate of 0 is treated as 1.
pub fn poll_interval_from_fps(fps: u32) -> Duration {
    Duration::from_millis(1000 / u64::from(fps.max(1)))
}

pub struct ConfigStore {
    path: PathBuf,
    tx: watch::Sender<Arc<ConfigSnapshot>>,
    watching: AtomicBool,
}

impl ConfigStore {
    /// Store for `path`, seeded with whatever [`loader::load`] makes of it.
    pub fn open(path: impl Into<PathBuf>) -> Arc<Self> {
        let path = path.into();
        let initial = loader::load(&path);
        Self::new(path, initial)
    }

    /// Store for `path` seeded with `initial` as-is.
    pub fn new(path: impl Into<PathBuf>, initial: ConfigSnapshot) -> Arc<Self> {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Arc::new(Self {
            path: path.into(),
            tx,
            watching: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Latest published snapshot.
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.tx.borrow())
    }

    /// Receiver notified on every publication.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ConfigSnapshot>> {
        self.tx.subscribe()
    }

    /// Replace the current snapshot, stamping it with the next version.
    /// Returns the version assigned.
    pub fn publish(&self, mut snapshot: ConfigSnapshot) -> u64 {
        let mut version = 0;
        self.tx.send_modify(|current| {
            version = current.version + 1;
            snapshot.version = version;
            *current = Arc::new(snapshot);
        });
        version
    }

    /// Spawn the background watcher on the current tokio runtime.
    ///
    /// Fails without spawning anything if the file does not exist or a
    /// watcher is already running for this store.
    pub fn start_watch(self: &Arc<Self>, interval: Duration) -> Result<WatchHandle, ConfigError> {
        if self
            .watching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ConfigError::AlreadyWatching);
        }

        let last_modified = match modified_time(&self.path) {
            Ok(t) => t,
            Err(e) => {
                self.watching.store(false, Ordering::Release);
                return Err(ConfigError::io(&self.path, e));
            }
        };

        let cancel = CancellationToken::new();
        let store = Arc::clone(self);
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            store.watch_loop(last_modified, interval, token).await;
            store.watching.store(false, Ordering::Release);
        });

        tracing::info!(
            path = %self.path.display(),
            interval_ms = interval.as_millis() as u64,
            "config watcher started"
        );

        Ok(WatchHandle {
            cancel,
            task: Some(task),
        })
    }

    async fn watch_loop(
        &self,
        mut last_modified: SystemTime,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut missing = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let modified = match tokio::fs::metadata(&self.path).await.and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) => {
                    if !missing {
                        tracing::warn!(
                            path = %self.path.display(),
                            error = %e,
                            "config file unavailable; keeping current snapshot"
                        );
                        missing = true;
                    }
                    continue;
                }
            };
            if missing {
                tracing::info!(path = %self.path.display(), "config file available again");
                missing = false;
            }
            if modified == last_modified {
                continue;
            }
            last_modified = modified;

            match self.reload().await {
                Ok(version) => tracing::info!(version, "config reloaded"),
                Err(e) => {
                    tracing::warn!(error = %e, "config reload failed; keeping current snapshot")
                }
            }
        }

        tracing::debug!(path = %self.path.display(), "config watcher stopped");
    }

    async fn reload(&self) -> Result<u64, ConfigError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ConfigError::io(&self.path, e))?;
        let snapshot = loader::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;
        Ok(self.publish(snapshot))
    }
}

fn modified_time(path: &Path) -> std::io::Result<SystemTime> {
    std::fs::metadata(path)?.modified()
}

/// Owner of a running watcher. Dropping it cancels the watcher; [`stop`]
/// also waits for the task to finish.
///
/// [`stop`]: WatchHandle::stop
pub struct WatchHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Cancel the watcher and wait until it has exited.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "config watcher task failed");
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facewatch_core::DistanceMetric;
    use std::fs::File;

    const FAST: Duration = Duration::from_millis(10);

    fn write_config(path: &Path, text: &str, bump_secs: u64) {
        std::fs::write(path, text).unwrap();
        // Coarse filesystem clocks can leave two writes with the same mtime.
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + bump_secs);
        File::options().write(true).open(path).unwrap().set_modified(t).unwrap();
    }

    /// Swap in a new file in one rename so the watcher never reads a
    /// half-written one.
    fn replace_config(path: &Path, text: &str, bump_secs: u64) {
        let staged = path.with_extension("staged");
        write_config(&staged, text, bump_secs);
        std::fs::rename(&staged, path).unwrap();
    }

    async fn wait_for_version(store: &ConfigStore, version: u64) -> Arc<ConfigSnapshot> {
        let mut rx = store.subscribe();
        let reached = rx.wait_for(|s| s.version >= version);
        let snapshot = tokio::time::timeout(Duration::from_secs(5), reached)
            .await
            .expect("timed out waiting for reload")
            .unwrap()
            .clone();
        snapshot
    }

    #[test]
    fn test_poll_interval_from_fps() {
        assert_eq!(poll_interval_from_fps(10), Duration::from_millis(100));
        assert_eq!(poll_interval_from_fps(DEFAULT_WATCH_FPS), Duration::from_millis(100));
        assert_eq!(poll_interval_from_fps(3), Duration::from_millis(333));
        assert_eq!(poll_interval_from_fps(0), Duration::from_secs(1));
    }

    #[test]
    fn test_publish_bumps_version() {
        let store = ConfigStore::new("unused.toml", ConfigSnapshot::default());
        assert_eq!(store.current().version, 0);

        let v = store.publish(ConfigSnapshot {
            top_k: 7,
            ..ConfigSnapshot::default()
        });
        assert_eq!(v, 1);
        assert_eq!(store.current().version, 1);
        assert_eq!(store.current().top_k, 7);
    }

    #[test]
    fn test_open_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("absent.toml"));
        assert_eq!(*store.current(), ConfigSnapshot::default());
    }

    #[tokio::test]
    async fn test_watch_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("absent.toml"));
        assert!(matches!(store.start_watch(FAST), Err(ConfigError::NotFound(_))));

        // The failed registration leaves the store free to watch later.
        write_config(store.path(), "top_k = 2", 0);
        let handle = store.start_watch(FAST).unwrap();
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_second_watch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facewatch.toml");
        write_config(&path, "", 0);
        let store = ConfigStore::open(&path);

        let handle = store.start_watch(FAST).unwrap();
        assert!(matches!(store.start_watch(FAST), Err(ConfigError::AlreadyWatching)));

        handle.stop().await;
        let again = store.start_watch(FAST).unwrap();
        again.stop().await;
    }

    #[tokio::test]
    async fn test_watcher_publishes_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facewatch.toml");
        write_config(&path, "distance_type = 0\ntop_k = 5", 0);
        let store = ConfigStore::open(&path);
        assert_eq!(store.current().top_k, 5);

        let handle = store.start_watch(FAST).unwrap();
        write_config(&path, "distance_type = 1\ntop_k = 9", 1);

        let snapshot = wait_for_version(&store, 1).await;
        assert_eq!(snapshot.top_k, 9);
        assert_eq!(snapshot.distance, DistanceMetric::L2);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_watcher_keeps_snapshot_on_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facewatch.toml");
        write_config(&path, "top_k = 5", 0);
        let store = ConfigStore::open(&path);
        let handle = store.start_watch(FAST).unwrap();

        write_config(&path, "top_k = [", 1);
        tokio::time::sleep(FAST * 10).await;
        assert_eq!(store.current().version, 0);
        assert_eq!(store.current().top_k, 5);

        std::fs::remove_file(&path).unwrap();
        tokio::time::sleep(FAST * 10).await;
        assert_eq!(store.current().top_k, 5);
        assert!(!handle.is_finished());

        write_config(&path, "top_k = 6", 2);
        let snapshot = wait_for_version(&store, 1).await;
        assert_eq!(snapshot.top_k, 6);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_ends_watcher() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facewatch.toml");
        write_config(&path, "top_k = 5", 0);
        let store = ConfigStore::open(&path);

        let handle = store.start_watch(Duration::from_secs(3600)).unwrap();
        let token = handle.cancellation_token();
        tokio::time::timeout(Duration::from_secs(5), handle.stop()).await.unwrap();
        assert!(token.is_cancelled());

        write_config(&path, "top_k = 8", 1);
        tokio::time::sleep(FAST * 5).await;
        assert_eq!(store.current().top_k, 5);
    }

    #[tokio::test]
    async fn test_changes_within_one_interval_reload_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facewatch.toml");
        write_config(&path, "top_k = 1", 0);
        let store = ConfigStore::open(&path);

        let interval = Duration::from_millis(500);
        let handle = store.start_watch(interval).unwrap();
        for k in 2..=4 {
            replace_config(&path, &format!("top_k = {k}"), k);
        }

        let snapshot = wait_for_version(&store, 1).await;
        assert_eq!(snapshot.top_k, 4);
        tokio::time::sleep(interval * 3).await;
        assert_eq!(store.current().version, 1);

        handle.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_sample_while_watcher_reloads() {
        const LAST: u64 = 25;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facewatch.toml");
        let file = |k: u64| {
            format!("top_k = {k}\ncap_index = {k}\ntargets_dir_name = \"targets-{k}\"")
        };
        write_config(&path, &file(1), 1);
        let store = ConfigStore::open(&path);
        let handle = store.start_watch(FAST).unwrap();

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::task::spawn_blocking(move || {
                    let mut last = 0;
                    loop {
                        let s = store.current();
                        assert_eq!(s.cap_index as usize, s.top_k);
                        assert_eq!(s.targets_dir_name, format!("targets-{}", s.top_k));
                        assert!(s.version >= last, "versions went backwards");
                        last = s.version;
                        if s.top_k as u64 == LAST {
                            break;
                        }
                    }
                })
            })
            .collect();

        for k in 2..=LAST {
            replace_config(&path, &file(k), k);
            let snapshot = wait_for_version(&store, k - 1).await;
            assert_eq!(snapshot.top_k as u64, k);
        }

        for reader in readers {
            tokio::time::timeout(Duration::from_secs(5), reader).await.unwrap().unwrap();
        }
        handle.stop().await;
    }

    /// Snapshot where every field is derived from `i`.
    fn numbered(i: u64) -> ConfigSnapshot {
        ConfigSnapshot {
            top_k: i as usize,
            cap_index: i as u32,
            zoom: i as f32,
            cosine_threshold: i as f32,
            norml2_threshold: i as f32 * 2.0,
            video_name: format!("clip-{i}.mp4"),
            targets_dir_name: format!("targets-{i}"),
            ..ConfigSnapshot::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_see_a_mixed_snapshot() {
        const VERSIONS: u64 = 500;
        let store = ConfigStore::new("unused.toml", numbered(0));

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::task::spawn_blocking(move || {
                    let mut last = 0;
                    loop {
                        let s = store.current();
                        let i = s.version;
                        assert_eq!(s.top_k as u64, i);
                        assert_eq!(s.cap_index as u64, i);
                        assert_eq!(s.zoom, i as f32);
                        assert_eq!(s.cosine_threshold, i as f32);
                        assert_eq!(s.norml2_threshold, i as f32 * 2.0);
                        assert_eq!(s.video_name, format!("clip-{i}.mp4"));
                        assert_eq!(s.targets_dir_name, format!("targets-{i}"));
                        assert!(i >= last, "versions went backwards");
                        last = i;
                        if i == VERSIONS {
                            break;
                        }
                    }
                })
            })
            .collect();

        let writer = {
            let store = Arc::clone(&store);
            tokio::task::spawn_blocking(move || {
                for i in 1..=VERSIONS {
                    assert_eq!(store.publish(numbered(i)), i);
                }
            })
        };

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
    }
}
