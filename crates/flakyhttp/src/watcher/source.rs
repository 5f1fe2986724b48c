//! Change sources: where reload triggers come from.

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};

#[cfg(target_os = "linux")]
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, trace, warn};

use crate::error::Result;

/// Messages consumed by the reload thread.
#[derive(Debug)]
pub(crate) enum Signal {
    Changed(PathBuf),
    Shutdown,
}

/// Receives changed paths from a [`ChangeSource`].
///
/// Only the rules file's own path is forwarded. The queue holds a single
/// pending reload; further events while one is pending are dropped, since a
/// reload always reads the whole file.
#[derive(Debug, Clone)]
pub struct ChangeSink {
    target: PathBuf,
    tx: mpsc::Sender<Signal>,
}

impl ChangeSink {
    pub(crate) fn new(target: PathBuf, tx: mpsc::Sender<Signal>) -> Self {
        Self { target, tx }
    }

    /// The rules file this sink reloads.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Report a changed path. Returns `true` if a reload was queued.
    pub fn notify(&self, path: &Path) -> bool {
        if path != self.target {
            return false;
        }
        match self.tx.try_send(Signal::Changed(path.to_path_buf())) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!(path = %path.display(), "reload already pending");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Keeps a subscription alive; dropping it cancels the subscription.
pub struct Subscription {
    _guard: Box<dyn Any + Send>,
}

impl Subscription {
    pub fn new<G: Send + 'static>(guard: G) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Something that can report file changes within a directory.
pub trait ChangeSource: Send + Sync {
    /// Start delivering changed paths under `dir` to `sink` until the
    /// returned [`Subscription`] is dropped.
    fn subscribe(&self, dir: &Path, sink: ChangeSink) -> Result<Subscription>;
}

/// [`ChangeSource`] backed by the platform's `notify` watcher.
///
/// Watches the directory rather than the file: atomic writers replace the
/// file by renaming over it, which only shows up at directory level.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifySource;

impl ChangeSource for NotifySource {
    fn subscribe(&self, dir: &Path, sink: ChangeSink) -> Result<Subscription> {
        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) if is_reload_trigger(&event.kind) => {
                    for path in &event.paths {
                        sink.notify(path);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "filesystem watcher error"),
            },
        )?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        info!(path = %dir.display(), "watching rules directory for changes");
        Ok(Subscription::new(watcher))
    }
}

/// Linux reports completed writes precisely, so plain modifications (which
/// may expose a half-written file) are not reload triggers there.
#[cfg(target_os = "linux")]
pub(crate) fn is_reload_trigger(kind: &EventKind) -> bool {
    matches!(
        kind,
        // written in place
        EventKind::Access(AccessKind::Close(AccessMode::Write))
            // renamed over (write to temp file, then rename)
            | EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both))
            | EventKind::Remove(_)
    )
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn is_reload_trigger(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}
