//! The load-and-swap path and the background reload thread.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Result, RuleError};
use crate::rules::RuleParser;
use crate::store::RuleStore;

use super::source::{ChangeSink, ChangeSource, Signal, Subscription};

/// Called with every error hit by a background reload.
pub type ReloadErrorHook = Arc<dyn Fn(&RuleError) + Send + Sync>;

/// Resolve the rules path against its canonical parent directory, so paths
/// reported by the watcher compare equal to it.
pub(crate) fn resolve_rules_path(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| RuleError::InvalidPath(path.to_path_buf()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok(fs::canonicalize(dir)?.join(file_name))
}

// ── RuleLoader ──────────────────────────────────────────────────────

/// Reads the rules file, parses it and swaps the result into the store.
///
/// Clones share one load lock: the last load to read the file is the last
/// to swap.
#[derive(Debug, Clone)]
pub struct RuleLoader {
    path: PathBuf,
    parser: RuleParser,
    store: RuleStore,
    load_lock: Arc<Mutex<()>>,
}

impl RuleLoader {
    pub fn new(path: PathBuf, parser: RuleParser, store: RuleStore) -> Self {
        Self {
            path,
            parser,
            store,
            load_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    /// Load the rules file and install it, returning the new revision.
    ///
    /// A missing file loads as an empty rule set. On any other error the
    /// store is left untouched.
    pub fn load(&self) -> Result<u64> {
        let _guard = self.load_lock.lock().expect("rules load lock poisoned");
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "rules file does not exist, loading no rules");
                String::new()
            }
            Err(e) => return Err(e.into()),
        };

        let rules = self.parser.parse(&contents)?;
        let count = rules.len();
        let revision = self.store.swap(rules);
        info!(path = %self.path.display(), revision, rules = count, "loaded fault injection rules");
        Ok(revision)
    }
}

// ── ReloadWatcher ───────────────────────────────────────────────────

/// Reloads the rules whenever its [`ChangeSource`] reports the rules file
/// changed, on a dedicated thread.
///
/// [`close`](Self::close) (or dropping the watcher) cancels the
/// subscription and joins the thread; no reload runs after it returns.
#[derive(Debug)]
pub struct ReloadWatcher {
    subscription: Option<Subscription>,
    tx: Option<mpsc::Sender<Signal>>,
    closed: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ReloadWatcher {
    /// Subscribe to the directory containing `loader.path()` and start the
    /// reload thread.
    pub fn start(
        source: &dyn ChangeSource,
        loader: RuleLoader,
        on_error: Option<ReloadErrorHook>,
    ) -> Result<Self> {
        let dir = loader
            .path()
            .parent()
            .ok_or_else(|| RuleError::InvalidPath(loader.path().to_path_buf()))?
            .to_path_buf();

        let (tx, rx) = mpsc::channel(1);
        let sink = ChangeSink::new(loader.path().to_path_buf(), tx.clone());
        let subscription = source.subscribe(&dir, sink)?;

        let closed = Arc::new(AtomicBool::new(false));
        let handle = {
            let closed = Arc::clone(&closed);
            thread::Builder::new()
                .name("flaky-reload".to_string())
                .spawn(move || reload_loop(rx, loader, closed, on_error))?
        };

        Ok(Self {
            subscription: Some(subscription),
            tx: Some(tx),
            closed,
            handle: Some(handle),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Cancel the subscription and stop the reload thread. Idempotent.
    pub fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.subscription.take();
        if let Some(tx) = self.tx.take() {
            // A full queue wakes the thread anyway; it checks `closed` first.
            let _ = tx.try_send(Signal::Shutdown);
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("rules reload thread panicked");
            }
        }
    }
}

impl Drop for ReloadWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

fn reload_loop(
    mut rx: mpsc::Receiver<Signal>,
    loader: RuleLoader,
    closed: Arc<AtomicBool>,
    on_error: Option<ReloadErrorHook>,
) {
    while let Some(signal) = rx.blocking_recv() {
        if closed.load(Ordering::Acquire) {
            break;
        }
        match signal {
            Signal::Shutdown => break,
            Signal::Changed(path) => {
                debug!(path = %path.display(), "rules file changed");
                if let Err(e) = loader.load() {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to reload rules, keeping previous version"
                    );
                    if let Some(hook) = &on_error {
                        hook(&e);
                    }
                }
            }
        }
    }
    debug!(path = %loader.path().display(), "rules reload thread stopped");
}
