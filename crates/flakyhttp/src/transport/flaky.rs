//! The fault-injecting transport.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hyper::body::Incoming;
use hyper::{Request, Response};
use tracing::{debug, info};

use crate::decision::DecisionEngine;
use crate::error::{Result, RuleError};
use crate::rules::{RuleParser, Stage};
use crate::store::{ReloadWaiter, RuleStore};
use crate::watcher::{
    resolve_rules_path, ChangeSource, NotifySource, ReloadErrorHook, ReloadWatcher, RuleLoader,
};

use super::dial::{FlakyDialer, TcpDialer};
use super::http::{HttpConfig, HttpTransport, Target};
use super::{RequestBody, RoundTrip, TransportError};

/// HTTP transport that fails dials and requests according to a rules file,
/// reloading the file whenever it changes.
///
/// Keep the rules file in a directory of its own: the whole directory is
/// watched, and unrelated activity there costs spurious wakeups.
///
/// ```no_run
/// # fn example() -> flakyhttp::Result<()> {
/// use flakyhttp::FlakyTransport;
///
/// let _transport = FlakyTransport::new("/etc/flaky/flaky.rules", ["peeraddr=10.0.0.2:13001"])?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FlakyTransport {
    http: HttpTransport,
    engine: Arc<DecisionEngine>,
    loader: RuleLoader,
    watcher: Mutex<Option<ReloadWatcher>>,
}

impl FlakyTransport {
    /// Watch `rules_path` and scope its rules with `key=value` fixed pairs.
    pub fn new<I, S>(rules_path: impl Into<PathBuf>, fixed_pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::builder(rules_path).fixed_pairs(fixed_pairs).build()
    }

    pub fn builder(rules_path: impl Into<PathBuf>) -> FlakyTransportBuilder {
        FlakyTransportBuilder::new(rules_path.into())
    }

    /// The resolved rules file path being watched.
    pub fn rules_path(&self) -> &Path {
        self.loader.path()
    }

    /// The wrapped transport, for pool inspection and control.
    pub fn underlying(&self) -> &HttpTransport {
        &self.http
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn store(&self) -> &RuleStore {
        self.engine.store()
    }

    /// A waiter that resolves on the next successful rules reload.
    pub fn reload_waiter(&self) -> ReloadWaiter {
        self.engine.store().waiter()
    }

    /// Re-read the rules file now, returning the new revision or the error.
    pub fn reload(&self) -> Result<u64> {
        self.loader.load()
    }

    /// Stop watching the rules file. The current rules stay in effect.
    pub fn close(&self) {
        let watcher = self
            .watcher
            .lock()
            .expect("reload watcher lock poisoned")
            .take();
        if let Some(mut watcher) = watcher {
            watcher.close();
            info!(path = %self.loader.path().display(), "stopped watching rules file");
        }
    }
}

#[async_trait]
impl RoundTrip for FlakyTransport {
    async fn round_trip(
        &self,
        req: Request<RequestBody>,
    ) -> std::result::Result<Response<Incoming>, TransportError> {
        let target = Target::from_uri(req.uri())?;
        let verdict = self.engine.evaluate(Stage::Request, &target.dest);
        if verdict.redial {
            let closed = self.http.close_idle_connections_to(&target.dest);
            debug!(dest = %target.dest, closed, "redial: closed idle connections");
        }
        if verdict.fail {
            debug!(dest = %target.dest, "injecting request failure");
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "request failed by fault injection",
            )));
        }
        self.http.round_trip(req).await
    }
}

// ── Builder ─────────────────────────────────────────────────────────

/// Configures and constructs a [`FlakyTransport`].
pub struct FlakyTransportBuilder {
    rules_path: PathBuf,
    fixed_pairs: Vec<String>,
    http: HttpConfig,
    source: Option<Box<dyn ChangeSource>>,
    on_reload_error: Option<ReloadErrorHook>,
    seed: Option<u64>,
}

impl FlakyTransportBuilder {
    fn new(rules_path: PathBuf) -> Self {
        Self {
            rules_path,
            fixed_pairs: Vec::new(),
            http: HttpConfig::default(),
            source: None,
            on_reload_error: None,
            seed: None,
        }
    }

    /// Add an instance-scoped `key=value` pair.
    pub fn fixed_pair(mut self, pair: impl Into<String>) -> Self {
        self.fixed_pairs.push(pair.into());
        self
    }

    pub fn fixed_pairs<I, S>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fixed_pairs.extend(pairs.into_iter().map(Into::into));
        self
    }

    pub fn http_config(mut self, config: HttpConfig) -> Self {
        self.http = config;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.http.connect_timeout = timeout;
        self
    }

    pub fn max_idle_per_host(mut self, max: usize) -> Self {
        self.http.max_idle_per_host = max;
        self
    }

    /// Replace the filesystem watcher, e.g. with synthetic events in tests.
    pub fn change_source(mut self, source: impl ChangeSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Called for every failed background reload, in addition to logging.
    pub fn on_reload_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RuleError) + Send + Sync + 'static,
    {
        self.on_reload_error = Some(Arc::new(hook));
        self
    }

    /// Seed the rate sampler.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Subscribe to the rules directory, then load the rules once.
    ///
    /// A missing rules file is not an error; it loads as no rules.
    pub fn build(self) -> Result<FlakyTransport> {
        let parser = RuleParser::from_strs(&self.fixed_pairs)?;
        let rules_path = resolve_rules_path(&self.rules_path)?;

        let store = RuleStore::new();
        let engine = Arc::new(match self.seed {
            Some(seed) => DecisionEngine::with_seed(store.clone(), seed),
            None => DecisionEngine::new(store.clone()),
        });
        let dialer = FlakyDialer::new(
            Arc::new(TcpDialer::new(self.http.connect_timeout)),
            Arc::clone(&engine),
        );
        let http = HttpTransport::with_dialer(Arc::new(dialer), self.http.max_idle_per_host);

        let loader = RuleLoader::new(rules_path, parser, store);
        let source = self.source.unwrap_or_else(|| Box::new(NotifySource));
        let watcher = ReloadWatcher::start(source.as_ref(), loader.clone(), self.on_reload_error)?;
        loader.load()?;

        info!(
            path = %loader.path().display(),
            fixed_pairs = ?self.fixed_pairs,
            "fault injection transport ready"
        );
        Ok(FlakyTransport {
            http,
            engine,
            loader,
            watcher: Mutex::new(Some(watcher)),
        })
    }
}
