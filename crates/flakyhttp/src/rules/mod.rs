//! Rule file model and parser.
//!
//! A rules file holds one rule per line. Each rule is a space-separated list
//! of `key=value` pairs that must all be satisfied for a failure to be
//! injected. Rules are evaluated in file order and the first full match wins.

mod parser;
mod types;


pub use self::parser::RuleParser;
pub use self::types::{Clause, Pair, Rule, RuleSet, Stage};
