//! Value types shared by the parser, the store and the decision engine.

use std::fmt;
use std::num::{IntErrorKind, ParseIntError};
use std::str::FromStr;

use crate::error::{ParseErrorKind, RuleError};

// ── Pair ────────────────────────────────────────────────────────────

/// A raw `key=value` token, as written in the rules file or passed as a
/// fixed pair at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pair {
    pub key: String,
    pub value: String,
}

impl Pair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Split a token at its first `=`. The value may itself contain `=`.
    pub(crate) fn split(token: &str) -> Result<Self, ParseErrorKind> {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| ParseErrorKind::MalformedPair(token.to_string()))?;
        if key.is_empty() {
            return Err(ParseErrorKind::EmptyKey(token.to_string()));
        }
        Ok(Self::new(key, value))
    }
}

impl FromStr for Pair {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pair::split(s).map_err(|_| RuleError::MalformedPair(s.to_string()))
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

// ── Stage ───────────────────────────────────────────────────────────

/// Phase of an HTTP operation being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Connection establishment.
    Dial,
    /// Request/response exchange on an established connection.
    Request,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Dial => "dial",
            Stage::Request => "request",
        }
    }
}

impl FromStr for Stage {
    type Err = ParseErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dial" => Ok(Stage::Dial),
            "request" => Ok(Stage::Request),
            other => Err(ParseErrorKind::InvalidStage(other.to_string())),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Clause ──────────────────────────────────────────────────────────

/// A validated pair the decision engine knows how to evaluate.
///
/// Application tags never become clauses: they are consumed by the parser's
/// fixed pairs, and any other key is rejected before a rule is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    /// Destination must equal this host/address string.
    Dest(String),
    /// Satisfied with this percentage probability.
    Rate(u8),
    /// Drain idle connections to the destination (request stage only).
    Redial(String),
    /// Stage must equal this one.
    Stage(Stage),
}

impl Clause {
    /// The key this clause was written with. Rules are sorted by it.
    pub fn key(&self) -> &'static str {
        match self {
            Clause::Dest(_) => "dest",
            Clause::Rate(_) => "rate",
            Clause::Redial(_) => "redial",
            Clause::Stage(_) => "stage",
        }
    }

    /// Convert a raw pair into a clause, validating its value.
    ///
    /// Matcher contract: this is the single point where rule keys are
    /// recognized. Every key accepted here has a `Clause` variant the
    /// decision engine matches exhaustively, and every other key fails the
    /// load with [`ParseErrorKind::UnknownKey`].
    pub fn from_pair(pair: &Pair) -> Result<Self, ParseErrorKind> {
        match pair.key.as_str() {
            "dest" => Ok(Clause::Dest(pair.value.clone())),
            "rate" => parse_rate(&pair.value).map(Clause::Rate),
            "redial" => Ok(Clause::Redial(pair.value.clone())),
            "stage" => pair.value.parse().map(Clause::Stage),
            other => Err(ParseErrorKind::UnknownKey(other.to_string())),
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Dest(dest) => write!(f, "dest={dest}"),
            Clause::Rate(rate) => write!(f, "rate={rate}%"),
            Clause::Redial(value) => write!(f, "redial={value}"),
            Clause::Stage(stage) => write!(f, "stage={stage}"),
        }
    }
}

/// Parse a rate percentage, with or without a trailing `%`.
///
/// Integers outside 0..=100, including ones too large for `i64`, are range
/// errors; anything else that fails to parse is a syntax error.
pub(crate) fn parse_rate(value: &str) -> Result<u8, ParseErrorKind> {
    let out_of_range = || ParseErrorKind::RateOutOfRange(value.to_string());
    let digits = value.strip_suffix('%').unwrap_or(value);
    let rate: i64 = digits.parse().map_err(|e: ParseIntError| match e.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => out_of_range(),
        _ => ParseErrorKind::InvalidRate {
            value: value.to_string(),
            reason: e.to_string(),
        },
    })?;
    u8::try_from(rate)
        .ok()
        .filter(|r| *r <= 100)
        .ok_or_else(out_of_range)
}

// ── Rule / RuleSet ──────────────────────────────────────────────────

/// A conjunctive match condition: every clause must be satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rule {
    clauses: Vec<Clause>,
}

impl Rule {
    /// Build a rule, sorting clauses by key for deterministic evaluation.
    pub fn new(mut clauses: Vec<Clause>) -> Self {
        clauses.sort_by_key(Clause::key);
        Self { clauses }
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// A rule whose pairs were all consumed by fixed pairs matches everything.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{clause}")?;
        }
        Ok(())
    }
}

/// Rules in file order. Immutable once built; shared behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}
