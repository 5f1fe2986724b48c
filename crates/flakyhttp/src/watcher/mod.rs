//! Rules file hot-reload.
//!
//! A [`ChangeSource`] reports changed paths in the rules file's directory.
//! [`ChangeSink`] keeps only events for the rules file itself and queues at
//! most one pending reload; the [`ReloadWatcher`] thread drains that queue
//! and runs the [`RuleLoader`]. Parse errors keep the previous rule set.

mod reload;
mod source;


pub use self::reload::{ReloadErrorHook, ReloadWatcher, RuleLoader};
pub use self::source::{ChangeSink, ChangeSource, NotifySource, Subscription};

pub(crate) use self::reload::resolve_rules_path;
