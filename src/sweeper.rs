//! Background eviction of expired workspaces.
//!
//! ```text
//!   start()            stop()                 pass/sleep abandoned
//! Stopped ──▶ Running ──────▶ Stopping ──────────────────────▶ Stopped
//! ```
//!
//! The sweeper runs one pass immediately, then one pass per interval. Each
//! pass walks both namespaces independently and removes every top-level
//! workspace whose mtime is older than that namespace's TTL. Deletion is
//! best-effort: a failure is logged and the pass moves on.
//!
//! The state channel doubles as the cancellation signal, so start and stop
//! involve no process-wide flags and a sweeper can be tested in isolation.

use crate::config::GatewayConfig;
use crate::store::{EphemeralStore, Namespace};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle of a [`RetentionSweeper`] task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweeperState {
    Stopped,
    Running,
    Stopping,
}

/// What one namespace sweep did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub namespace: Namespace,
    pub removed: usize,
    pub failed: usize,
}

/// Eviction policy for both namespaces.
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    store: EphemeralStore,
    intake_ttl: Duration,
    results_ttl: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(
        store: EphemeralStore,
        intake_ttl: Duration,
        results_ttl: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            intake_ttl,
            results_ttl,
            interval,
        }
    }

    pub fn from_config(store: EphemeralStore, config: &GatewayConfig) -> Self {
        Self::new(
            store,
            config.intake_ttl,
            config.results_ttl,
            config.sweep_interval,
        )
    }

    pub fn ttl(&self, ns: Namespace) -> Duration {
        match ns {
            Namespace::Intake => self.intake_ttl,
            Namespace::Results => self.results_ttl,
        }
    }

    /// Run one pass over both namespaces as of `now`.
    pub fn sweep_once(&self, now: SystemTime) -> [SweepReport; 2] {
        [Namespace::Intake, Namespace::Results]
            .map(|ns| sweep_namespace(&self.store, ns, self.ttl(ns), now))
    }

    /// Spawn the sweep loop on the current runtime.
    pub fn start(self) -> SweeperHandle {
        let state = Arc::new(watch::Sender::new(SweeperState::Running));
        let task_state = Arc::clone(&state);
        info!(
            "Retention sweeper started: every {}s, intake TTL {}s, results TTL {}s",
            self.interval.as_secs(),
            self.intake_ttl.as_secs(),
            self.results_ttl.as_secs()
        );
        let task = tokio::spawn(async move {
            self.run(&task_state).await;
            task_state.send_replace(SweeperState::Stopped);
            info!("Retention sweeper stopped");
        });
        SweeperHandle {
            state,
            task: Some(task),
        }
    }

    async fn run(self, state: &watch::Sender<SweeperState>) {
        let mut signal = state.subscribe();
        loop {
            let sweeper = self.clone();
            let pass = tokio::task::spawn_blocking(move || sweeper.sweep_once(SystemTime::now()));
            if let Err(e) = pass.await {
                error!("Sweep pass panicked: {e}");
            }

            let stop_requested = async {
                let _ = signal.wait_for(|s| *s != SweeperState::Running).await;
            };
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = stop_requested => {
                    debug!("Sweeper received stop signal");
                    return;
                }
            }
        }
    }
}

/// Owner of a running sweeper task.
///
/// Dropping the handle without calling [`stop`](Self::stop) also signals the
/// task to stop; it just does not wait for it.
#[derive(Debug)]
pub struct SweeperHandle {
    state: Arc<watch::Sender<SweeperState>>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    pub fn state(&self) -> SweeperState {
        *self.state.borrow()
    }

    /// Signal the loop and wait until it has stopped.
    pub async fn stop(mut self) {
        self.signal_stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Sweeper task ended abnormally: {e}");
            }
        }
    }

    fn signal_stop(&self) {
        self.state.send_if_modified(|s| {
            if *s == SweeperState::Running {
                *s = SweeperState::Stopping;
                true
            } else {
                false
            }
        });
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

/// Remove every workspace in `ns` older than `ttl` as of `now`.
pub fn sweep_namespace(
    store: &EphemeralStore,
    ns: Namespace,
    ttl: Duration,
    now: SystemTime,
) -> SweepReport {
    let mut report = SweepReport {
        namespace: ns,
        removed: 0,
        failed: 0,
    };

    let entries = match store.list_sessions(ns) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list {} workspaces: {}", ns, e);
            return report;
        }
    };

    for entry in entries {
        // mtime in the future counts as age zero
        let age = now.duration_since(entry.modified).unwrap_or_default();
        if age <= ttl {
            continue;
        }
        match evict(&entry.path) {
            Ok(()) => {
                report.removed += 1;
                debug!(
                    "Evicted {} workspace {} (age {:.2}h)",
                    ns,
                    entry.name,
                    age.as_secs_f64() / 3600.0
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                report.failed += 1;
                warn!("Could not evict {} workspace {}: {}", ns, entry.name, e);
            }
        }
    }

    if report.removed > 0 {
        info!("Sweep removed {} expired {} workspace(s)", report.removed, ns);
    }
    report
}

/// Remove a workspace. When `remove_dir_all` gives up part-way, the rest of
/// the tree is removed entry by entry so one stuck file does not pin the
/// whole workspace.
fn evict(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            debug!("remove_dir_all({}) failed: {}; removing entry by entry", path.display(), e);
            if remove_remaining(path) == 0 {
                fs::remove_dir(path)
            } else {
                Err(e)
            }
        }
        other => other,
    }
}

/// Delete everything under `dir` that can be deleted; returns how many
/// entries were left behind.
fn remove_remaining(dir: &Path) -> usize {
    let read = match fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!("Cannot read {}: {}", dir.display(), e);
            return 1;
        }
    };

    let mut left = 0;
    for entry in read.filter_map(Result::ok) {
        let path = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let removed = if is_dir {
            left += remove_remaining(&path);
            fs::remove_dir(&path)
        } else {
            fs::remove_file(&path)
        };
        match removed {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!("Could not remove {}: {}", path.display(), e);
                left += 1;
            }
        }
    }
    left
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    fn store(tmp: &TempDir) -> EphemeralStore {
        let store = EphemeralStore::new(tmp.path().join("temp"), tmp.path().join("output"));
        store.ensure_roots().unwrap();
        store
    }

    fn aged_dir(root: &Path, name: &str, now: SystemTime, age: Duration) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("payload"), b"x").unwrap();
        filetime::set_file_mtime(&dir, FileTime::from_system_time(now - age)).unwrap();
    }

    #[test]
    fn evicts_only_past_ttl() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let root = store.root(Namespace::Intake).to_path_buf();
        let now = SystemTime::now();
        aged_dir(&root, "old", now, HOUR + Duration::from_secs(1));
        aged_dir(&root, "young", now, HOUR - Duration::from_secs(1));

        let report = sweep_namespace(&store, Namespace::Intake, HOUR, now);
        assert_eq!(report.removed, 1);
        assert_eq!(report.failed, 0);
        assert!(!root.join("old").exists());
        assert!(root.join("young").exists());
    }

    #[test]
    fn namespaces_use_their_own_ttl() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let now = SystemTime::now();
        let sweeper = RetentionSweeper::new(store.clone(), HOUR, 24 * HOUR, HOUR);

        let intake = store.root(Namespace::Intake).to_path_buf();
        let results = store.root(Namespace::Results).to_path_buf();
        aged_dir(&intake, "a", now, 2 * HOUR);
        aged_dir(&results, "a", now, 2 * HOUR);
        aged_dir(&results, "b", now, 24 * HOUR + Duration::from_secs(1));
        aged_dir(&results, "c", now, 24 * HOUR - Duration::from_secs(1));

        let [i, r] = sweeper.sweep_once(now);
        assert_eq!((i.namespace, i.removed), (Namespace::Intake, 1));
        assert_eq!((r.namespace, r.removed), (Namespace::Results, 1));
        assert!(!intake.join("a").exists());
        assert!(results.join("a").exists());
        assert!(!results.join("b").exists());
        assert!(results.join("c").exists());
    }

    #[test]
    fn stray_files_and_missing_roots_are_ignored() {
        let tmp = TempDir::new().unwrap();
        let store = EphemeralStore::new(tmp.path().join("nope"), tmp.path().join("output"));
        let now = SystemTime::now();
        let report = sweep_namespace(&store, Namespace::Intake, HOUR, now);
        assert_eq!(report.removed, 0);

        fs::create_dir_all(tmp.path().join("output")).unwrap();
        let stray = tmp.path().join("output/notes.txt");
        fs::write(&stray, b"x").unwrap();
        filetime::set_file_mtime(&stray, FileTime::from_system_time(now - 48 * HOUR)).unwrap();
        sweep_namespace(&store, Namespace::Results, HOUR, now);
        assert!(stray.exists());
    }

    #[cfg(unix)]
    #[test]
    fn undeletable_entry_does_not_pin_the_rest() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let root = store.root(Namespace::Results).to_path_buf();
        let now = SystemTime::now();
        let ws = root.join("stale");
        for sub in ["a_locked", "b_free", "c_free"] {
            fs::create_dir_all(ws.join(sub)).unwrap();
            fs::write(ws.join(sub).join("sheet.xlsx"), b"PK").unwrap();
        }
        fs::set_permissions(ws.join("a_locked"), fs::Permissions::from_mode(0o555)).unwrap();
        filetime::set_file_mtime(&ws, FileTime::from_system_time(now - 48 * HOUR)).unwrap();

        let report = sweep_namespace(&store, Namespace::Results, HOUR, now);

        assert!(!ws.join("b_free").exists());
        assert!(!ws.join("c_free").exists());
        if ws.join("a_locked/sheet.xlsx").exists() {
            // unprivileged run: the locked file survives and is reported
            assert_eq!((report.removed, report.failed), (0, 1));
            fs::set_permissions(ws.join("a_locked"), fs::Permissions::from_mode(0o755)).unwrap();
        } else {
            assert_eq!((report.removed, report.failed), (1, 0));
            assert!(!ws.exists());
        }
    }

    #[test]
    fn remove_remaining_clears_a_nested_tree() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("ws");
        fs::create_dir_all(dir.join("json_output/deep")).unwrap();
        fs::write(dir.join("json_output/deep/t.json"), b"{}").unwrap();
        fs::write(dir.join("excel1.xlsx"), b"PK").unwrap();

        assert_eq!(remove_remaining(&dir), 0);
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
        assert_eq!(remove_remaining(&tmp.path().join("gone")), 0);
    }

    #[tokio::test]
    async fn start_sweeps_immediately_and_stops_promptly() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let intake = store.root(Namespace::Intake).to_path_buf();
        aged_dir(&intake, "stale", SystemTime::now(), 2 * HOUR);

        let handle = RetentionSweeper::new(store, HOUR, 24 * HOUR, Duration::from_secs(600)).start();
        assert_eq!(handle.state(), SweeperState::Running);

        let mut waited = Duration::ZERO;
        while intake.join("stale").exists() && waited < Duration::from_secs(5) {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += Duration::from_millis(20);
        }
        assert!(!intake.join("stale").exists(), "first pass runs at start");

        let started = std::time::Instant::now();
        handle.stop().await;
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn stop_reaches_stopped_state() {
        let tmp = TempDir::new().unwrap();
        let handle = RetentionSweeper::new(store(&tmp), HOUR, HOUR, HOUR).start();
        let state = Arc::clone(&handle.state);
        handle.stop().await;
        assert_eq!(*state.borrow(), SweeperState::Stopped);
    }
}
