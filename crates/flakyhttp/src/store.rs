//! Revision-tracked rule storage and reload waiters.
//!
//! The current [`RuleSet`] and its revision live in a `tokio::sync::watch`
//! channel: snapshot reads borrow it briefly, swaps replace it and wake every
//! waiter at once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::WaitError;
use crate::rules::RuleSet;

/// A consistent view of the rule set and the revision it was installed at.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub rules: Arc<RuleSet>,
    pub revision: u64,
}

/// Holds the active rule set. Cloning shares the same store.
#[derive(Debug, Clone)]
pub struct RuleStore {
    tx: Arc<watch::Sender<Snapshot>>,
}

impl RuleStore {
    /// Create an empty store at revision 0.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Snapshot::default());
        Self { tx: Arc::new(tx) }
    }

    /// Current rules and revision. Never observes a partially swapped set.
    pub fn snapshot(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    pub fn revision(&self) -> u64 {
        self.tx.borrow().revision
    }

    /// Install a new rule set, bump the revision and wake all waiters.
    ///
    /// Returns the new revision.
    pub fn swap(&self, rules: RuleSet) -> u64 {
        let rules = Arc::new(rules);
        let mut revision = 0;
        self.tx.send_modify(|snapshot| {
            snapshot.revision += 1;
            snapshot.rules = rules;
            revision = snapshot.revision;
        });
        revision
    }

    /// Capture the current revision; the waiter resolves once it changes.
    pub fn waiter(&self) -> ReloadWaiter {
        let mut rx = self.tx.subscribe();
        let revision = rx.borrow_and_update().revision;
        ReloadWaiter { rx, revision }
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for the revision of a [`RuleStore`] to move past a captured value.
///
/// Create the waiter *before* changing the rules file, then await it:
///
/// ```no_run
/// # async fn example(transport: flakyhttp::FlakyTransport) -> anyhow::Result<()> {
/// let mut waiter = transport.reload_waiter();
/// std::fs::write(transport.rules_path(), "dest=10.0.0.2:80 rate=100%")?;
/// waiter.wait_timeout(std::time::Duration::from_secs(5)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ReloadWaiter {
    rx: watch::Receiver<Snapshot>,
    revision: u64,
}

impl ReloadWaiter {
    /// The revision captured when the waiter was created.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Wait until the revision differs from the captured one, then capture
    /// the new revision so the next call waits for the reload after it.
    ///
    /// Returns immediately if a reload already happened. Dropping the future
    /// cancels the wait.
    pub async fn wait(&mut self) -> Result<u64, WaitError> {
        let captured = self.revision;
        let revision = self
            .rx
            .wait_for(|snapshot| snapshot.revision != captured)
            .await
            .map_err(|_| WaitError::Closed)?
            .revision;
        self.revision = revision;
        Ok(revision)
    }

    /// [`wait`](Self::wait) bounded by a timeout.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<u64, WaitError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| WaitError::Timeout(timeout))?
    }

    /// [`wait`](Self::wait) until `cancel` completes, whichever comes first.
    pub async fn wait_or_cancel<F>(&mut self, cancel: F) -> Result<u64, WaitError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.wait() => result,
            _ = cancel => Err(WaitError::Cancelled),
        }
    }
}
