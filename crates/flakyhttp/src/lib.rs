//! Fault-injecting HTTP transport with a hot-reloadable rule file.
//!
//! This crate provides:
//! - A line-oriented rule format (`dest=... stage=... rate=...`) with
//!   instance-scoped fixed pairs
//! - A revision-tracked rule store with reload waiters
//! - Filesystem hot-reload via `notify`, behind a swappable change source
//! - A decision engine that fails dial and request stages per rule
//! - An HTTP/1 transport whose dial and round-trip steps consult the engine

pub mod config;
pub mod decision;
pub mod error;
pub mod rules;
pub mod store;
pub mod transport;
pub mod watcher;

pub use config::{build_transport, TransportConfig};
pub use decision::{DecisionEngine, Verdict};
pub use error::{ParseErrorKind, Result, RuleError, WaitError};
pub use rules::{Clause, Pair, Rule, RuleParser, RuleSet, Stage};
pub use store::{ReloadWaiter, RuleStore, Snapshot};
pub use transport::{
    Dial, FlakyDialer, FlakyTransport, FlakyTransportBuilder, HttpConfig, HttpTransport,
    RequestBody, RoundTrip, TcpDialer, TransportError,
};
pub use watcher::{
    ChangeSink, ChangeSource, NotifySource, ReloadErrorHook, ReloadWatcher, RuleLoader,
    Subscription,
};
