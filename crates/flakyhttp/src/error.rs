//! Error types for rule parsing, loading and reload waiting.

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur while constructing the transport or loading rules.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// A rule line failed to parse; the whole load is discarded.
    #[error("rules file rejected at line {line}: {kind}")]
    Parse { line: usize, kind: ParseErrorKind },

    /// A fixed pair passed at construction is not `key=value`.
    #[error("malformed pair {0:?}: expected format key=value")]
    MalformedPair(String),

    /// The rules path has no parent directory or file name to watch.
    #[error("invalid rules path: {}", .0.display())]
    InvalidPath(PathBuf),

    /// Filesystem I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Filesystem watcher error.
    #[error("Notify watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// What was wrong with a single rule line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("malformed pair {0:?}: expected format key=value")]
    MalformedPair(String),

    #[error("empty key in pair {0:?}")]
    EmptyKey(String),

    #[error("duplicate key {0:?}")]
    DuplicateKey(String),

    #[error("invalid rate {value:?}: {reason}")]
    InvalidRate { value: String, reason: String },

    /// The rate is a number but not a percentage.
    #[error("rate {0:?} is out of range: expected a percentage from 0 to 100")]
    RateOutOfRange(String),

    #[error("invalid stage {0:?}: expected dial or request")]
    InvalidStage(String),

    #[error("unknown key {0:?}")]
    UnknownKey(String),
}

/// Errors returned while waiting for a rule reload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("no rule reload within {0:?}")]
    Timeout(Duration),

    #[error("wait for rule reload was cancelled")]
    Cancelled,

    /// The owning rule store was dropped.
    #[error("rule store closed")]
    Closed,
}

/// Result alias for rule operations.
pub type Result<T> = std::result::Result<T, RuleError>;
