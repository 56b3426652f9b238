//! Polling watcher: snapshot diffing on a fixed interval, a debounce window,
//! and one callback per settled burst of edits.

use crate::error::{Result, WatchError};
use crate::snapshot::{ChangeSet, Snapshot, WatchFilter};
use crate::state::WatchState;
use parking_lot::Mutex;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Poll interval floor
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub interval: Duration,
    pub debounce: Duration,
}

impl WatchOptions {
    pub fn new(include: Vec<String>, exclude: Vec<String>, interval_ms: u64, debounce_ms: u64) -> Self {
        Self {
            include,
            exclude,
            interval: Duration::from_millis(interval_ms),
            debounce: Duration::from_millis(debounce_ms),
        }
    }

    /// Interval actually used, never below [`MIN_INTERVAL`]
    pub fn effective_interval(&self) -> Duration {
        self.interval.max(MIN_INTERVAL)
    }
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self::new(
            vec!["*.lua".into(), "*.sql".into(), "*.md".into()],
            Vec::new(),
            1000,
            300,
        )
    }
}

/// Synchronous state machine behind [`PollingWatcher`]. Time is passed in
/// so the debounce logic can be driven deterministically.
#[derive(Debug)]
pub struct WatchCore {
    root: PathBuf,
    filter: WatchFilter,
    debounce: Duration,
    state: WatchState,
    snapshot: Snapshot,
    pending: ChangeSet,
    deadline: Option<Instant>,
}

impl WatchCore {
    pub fn new(root: impl Into<PathBuf>, filter: WatchFilter, debounce: Duration) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(WatchError::MissingRoot(root));
        }
        Ok(Self {
            root,
            filter,
            debounce,
            state: WatchState::Stopped,
            snapshot: Snapshot::default(),
            pending: ChangeSet::default(),
            deadline: None,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Take the baseline snapshot and start watching
    pub fn begin(&mut self) -> Result<()> {
        self.state.transition(WatchState::Watching)?;
        self.snapshot = Snapshot::capture(&self.root, &self.filter);
        debug!(root = %self.root.display(), files = self.snapshot.len(), "Watching");
        Ok(())
    }

    /// One tick. Returns the accumulated changes once the debounce window
    /// has elapsed with no further edits; the caller must then reload and
    /// call [`WatchCore::finish_reload`].
    pub fn poll(&mut self, now: Instant) -> Result<Option<ChangeSet>> {
        if !matches!(self.state, WatchState::Watching | WatchState::Debouncing) {
            return Ok(None);
        }

        let next = Snapshot::capture(&self.root, &self.filter);
        let changes = self.snapshot.diff(&next);
        self.snapshot = next;

        if !changes.is_empty() {
            debug!(changed = changes.len(), state = %self.state, "Change detected");
            if self.state == WatchState::Watching {
                self.state.transition(WatchState::ChangeDetected)?;
                self.pending = changes;
            } else {
                self.pending.merge(changes);
            }
            self.state.transition(WatchState::Debouncing)?;
            self.deadline = Some(now + self.debounce);
            return Ok(None);
        }

        match self.deadline {
            Some(deadline) if self.state == WatchState::Debouncing && now >= deadline => {
                self.deadline = None;
                self.state.transition(WatchState::Reloading)?;
                let pending = std::mem::take(&mut self.pending);
                if pending.is_empty() {
                    // edits cancelled each other out
                    self.state.transition(WatchState::Watching)?;
                    return Ok(None);
                }
                Ok(Some(pending))
            }
            _ => Ok(None),
        }
    }

    pub fn finish_reload(&mut self) -> Result<()> {
        self.state.transition(WatchState::Watching)
    }

    /// Stop from any state; pending changes are dropped
    pub fn stop(&mut self) {
        if self.state.is_running() {
            self.state = WatchState::Stopped;
        }
        self.pending = ChangeSet::default();
        self.deadline = None;
    }
}

/// Background polling watcher bound to one root
pub struct PollingWatcher {
    core: Arc<Mutex<WatchCore>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollingWatcher {
    /// Start watching `root`. `on_change` runs on the watcher task; the next
    /// poll waits for it to finish. Must be called inside a tokio runtime.
    pub fn start<F, Fut>(root: impl Into<PathBuf>, options: WatchOptions, on_change: F) -> Result<Self>
    where
        F: Fn(ChangeSet) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let filter = WatchFilter::new(&options.include, &options.exclude)?;
        let mut core = WatchCore::new(root, filter, options.debounce)?;
        core.begin()?;
        let interval = options.effective_interval();
        info!(
            root = %core.root().display(),
            interval_ms = interval.as_millis() as u64,
            debounce_ms = options.debounce.as_millis() as u64,
            "Auto reload watcher started"
        );

        let core = Arc::new(Mutex::new(core));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(core.clone(), cancel.clone(), interval, on_change));

        Ok(Self {
            core,
            cancel,
            task: Some(task),
        })
    }

    pub fn state(&self) -> WatchState {
        self.core.lock().state()
    }

    /// Stop polling and wait for the loop to exit. Once this returns no
    /// further callback fires. Safe to call more than once.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.await.map_err(|e| WatchError::Task(e.to_string()))?;
            info!("Auto reload watcher stopped");
        }
        self.core.lock().stop();
        Ok(())
    }
}

impl Drop for PollingWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_loop<F, Fut>(
    core: Arc<Mutex<WatchCore>>,
    cancel: CancellationToken,
    interval: Duration,
    on_change: F,
) where
    F: Fn(ChangeSet) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let polling = core.clone();
        let polled = tokio::task::spawn_blocking(move || polling.lock().poll(Instant::now())).await;
        let changes = match polled {
            Ok(Ok(Some(changes))) => changes,
            Ok(Ok(None)) => continue,
            Ok(Err(e)) => {
                warn!(error = %e, "Watcher poll failed");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Watcher poll task failed");
                break;
            }
        };

        if cancel.is_cancelled() {
            break;
        }
        info!(
            added = changes.added.len(),
            removed = changes.removed.len(),
            modified = changes.modified.len(),
            "Changes settled, reloading"
        );
        on_change(changes).await;

        if let Err(e) = core.lock().finish_reload() {
            warn!(error = %e, "Watcher could not resume");
            break;
        }
    }

    core.lock().stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn core(dir: &TempDir, debounce_ms: u64) -> WatchCore {
        let filter = WatchFilter::new(&["*.lua"], &[]).unwrap();
        let mut core = WatchCore::new(dir.path(), filter, Duration::from_millis(debounce_ms)).unwrap();
        core.begin().unwrap();
        core
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let filter = WatchFilter::new(&["*.lua"], &[]).unwrap();
        let err = WatchCore::new("/definitely/not/here", filter, Duration::ZERO).unwrap_err();
        assert!(matches!(err, WatchError::MissingRoot(_)));
    }

    #[test]
    fn test_quiet_tree_never_fires() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.lua"), "x").unwrap();
        let mut core = core(&dir, 0);
        let t0 = Instant::now();
        for i in 0..5 {
            assert!(core.poll(t0 + Duration::from_secs(i)).unwrap().is_none());
        }
        assert_eq!(core.state(), WatchState::Watching);
    }

    #[test]
    fn test_debounce_window_resets_on_each_change() {
        let dir = TempDir::new().unwrap();
        let mut core = core(&dir, 300);
        let t0 = Instant::now();

        fs::write(dir.path().join("a.lua"), "1").unwrap();
        assert!(core.poll(t0).unwrap().is_none());
        assert_eq!(core.state(), WatchState::Debouncing);

        fs::write(dir.path().join("b.lua"), "22").unwrap();
        assert!(core.poll(t0 + Duration::from_millis(200)).unwrap().is_none());

        // 300ms after the first change but only 100ms after the second
        assert!(core.poll(t0 + Duration::from_millis(300)).unwrap().is_none());
        assert_eq!(core.state(), WatchState::Debouncing);

        let changes = core
            .poll(t0 + Duration::from_millis(500))
            .unwrap()
            .expect("window elapsed");
        assert_eq!(changes.added.len(), 2);
        assert_eq!(core.state(), WatchState::Reloading);

        // polls during a reload are ignored
        assert!(core.poll(t0 + Duration::from_secs(5)).unwrap().is_none());
        core.finish_reload().unwrap();
        assert_eq!(core.state(), WatchState::Watching);
        assert!(core.poll(t0 + Duration::from_secs(6)).unwrap().is_none());
    }

    #[test]
    fn test_edits_during_reload_are_picked_up_afterwards() {
        let dir = TempDir::new().unwrap();
        let mut core = core(&dir, 0);
        let t0 = Instant::now();

        fs::write(dir.path().join("a.lua"), "1").unwrap();
        core.poll(t0).unwrap();
        assert!(core.poll(t0).unwrap().is_some());

        fs::write(dir.path().join("a.lua"), "changed while reloading").unwrap();
        core.finish_reload().unwrap();
        core.poll(t0).unwrap();
        let changes = core.poll(t0).unwrap().expect("second cycle");
        assert_eq!(changes.modified, vec![PathBuf::from("a.lua")]);
    }

    #[test]
    fn test_untracked_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let mut core = core(&dir, 0);
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        assert!(core.poll(Instant::now()).unwrap().is_none());
        assert_eq!(core.state(), WatchState::Watching);
    }

    #[test]
    fn test_finish_reload_outside_reload_is_invalid() {
        let dir = TempDir::new().unwrap();
        let mut core = core(&dir, 0);
        assert!(matches!(
            core.finish_reload().unwrap_err(),
            WatchError::InvalidTransition { .. }
        ));
        core.stop();
        assert_eq!(core.state(), WatchState::Stopped);
    }

    #[test]
    fn test_interval_is_clamped() {
        let options = WatchOptions::new(vec!["*.lua".into()], vec![], 5, 0);
        assert_eq!(options.effective_interval(), MIN_INTERVAL);
        let options = WatchOptions::new(vec!["*.lua".into()], vec![], 750, 0);
        assert_eq!(options.effective_interval(), Duration::from_millis(750));
    }
}
