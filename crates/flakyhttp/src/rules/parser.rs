//! Rules file parser with instance-scoped fixed pairs.

use std::collections::BTreeMap;

use crate::error::{ParseErrorKind, Result, RuleError};

use super::types::{parse_rate, Clause, Pair, Rule, RuleSet};

/// Turns rules file text into a validated [`RuleSet`].
///
/// Fixed pairs scope the rules to this instance: a rule naming a fixed key
/// with a different value is dropped, and a matching fixed pair is removed
/// from the rule before it is stored. This is how one rules file can target
/// individual nodes via tags such as `peeraddr=10.0.0.2:8080`.
#[derive(Debug, Clone, Default)]
pub struct RuleParser {
    fixed_pairs: Vec<Pair>,
}

impl RuleParser {
    pub fn new(fixed_pairs: Vec<Pair>) -> Self {
        Self { fixed_pairs }
    }

    /// Build a parser from `key=value` strings, failing on the first
    /// malformed one.
    pub fn from_strs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fixed_pairs = pairs
            .into_iter()
            .map(|p| p.as_ref().parse::<Pair>())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(fixed_pairs))
    }

    pub fn fixed_pairs(&self) -> &[Pair] {
        &self.fixed_pairs
    }

    /// Parse a whole rules file.
    ///
    /// Blank lines and `#` comments are skipped. Surrounding whitespace is
    /// trimmed, but tokens within a line are separated by single spaces; an
    /// empty token is a malformed pair. Any bad line fails the whole parse
    /// so a reload is never applied partially.
    pub fn parse(&self, input: &str) -> Result<RuleSet> {
        let mut rules = Vec::new();
        for (idx, raw) in input.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match self.parse_line(line) {
                Ok(Some(rule)) => rules.push(rule),
                Ok(None) => {}
                Err(kind) => return Err(RuleError::Parse { line: idx + 1, kind }),
            }
        }
        Ok(RuleSet::new(rules))
    }

    /// Parse one rule line. `Ok(None)` means the rule targets another
    /// instance.
    fn parse_line(&self, line: &str) -> std::result::Result<Option<Rule>, ParseErrorKind> {
        let mut by_key: BTreeMap<String, String> = BTreeMap::new();
        for token in line.split(' ') {
            let pair = Pair::split(token)?;
            // Rates are checked before fixed-pair scoping, so a bad rate in
            // another node's rule still rejects the file.
            if pair.key == "rate" {
                parse_rate(&pair.value)?;
            }
            if by_key.insert(pair.key.clone(), pair.value).is_some() {
                return Err(ParseErrorKind::DuplicateKey(pair.key));
            }
        }

        for fixed in &self.fixed_pairs {
            if let Some(value) = by_key.remove(&fixed.key) {
                if value != fixed.value {
                    return Ok(None);
                }
            }
        }

        let clauses = by_key
            .into_iter()
            .map(|(key, value)| Clause::from_pair(&Pair { key, value }))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Some(Rule::new(clauses)))
    }
}
