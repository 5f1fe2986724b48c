//! Per-operation fault decisions against the active rule set.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::rules::{Clause, Stage};
use crate::store::RuleStore;

/// Outcome of evaluating one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Verdict {
    /// A rule fully matched: fail the operation.
    pub fail: bool,
    /// A `redial` clause was reached during the request stage: idle
    /// connections to the destination should be closed.
    pub redial: bool,
}

/// Evaluates `(stage, destination)` pairs against a [`RuleStore`].
///
/// Safe to share between any number of callers. Each evaluation clones the
/// current snapshot and releases the store before sampling or matching.
#[derive(Debug)]
pub struct DecisionEngine {
    store: RuleStore,
    rng: Mutex<StdRng>,
}

impl DecisionEngine {
    pub fn new(store: RuleStore) -> Self {
        Self::with_rng(store, StdRng::from_entropy())
    }

    /// Use a fixed seed for the rate sampler.
    pub fn with_seed(store: RuleStore, seed: u64) -> Self {
        Self::with_rng(store, StdRng::seed_from_u64(seed))
    }

    fn with_rng(store: RuleStore, rng: StdRng) -> Self {
        Self {
            store,
            rng: Mutex::new(rng),
        }
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    /// Whether the operation should be failed. Ignores `redial` effects.
    pub fn should_fail(&self, stage: Stage, dest: &str) -> bool {
        self.evaluate(stage, dest).fail
    }

    /// Walk the rules in file order; the first rule whose clauses are all
    /// satisfied fails the operation.
    ///
    /// Clauses are checked in key order. A passed `rate` sample continues
    /// with the same rule, a missed one abandons it. `redial` is recorded
    /// as soon as it is reached, even if a later clause abandons the rule.
    pub fn evaluate(&self, stage: Stage, dest: &str) -> Verdict {
        let snapshot = self.store.snapshot();
        let mut verdict = Verdict::default();

        'rules: for rule in snapshot.rules.iter() {
            for clause in rule.clauses() {
                // Exhaustive over the keys `Clause::from_pair` accepts.
                match clause {
                    Clause::Dest(want) => {
                        if want != dest {
                            continue 'rules;
                        }
                    }
                    Clause::Rate(rate) => {
                        if !self.sample(*rate) {
                            continue 'rules;
                        }
                    }
                    Clause::Redial(_) => {
                        // The request stage runs on a pooled connection
                        // before any dial, so only it can force one.
                        if stage == Stage::Request {
                            verdict.redial = true;
                        }
                    }
                    Clause::Stage(want) => {
                        if *want != stage {
                            continue 'rules;
                        }
                    }
                }
            }
            trace!(%stage, dest, rule = %rule, revision = snapshot.revision, "rule matched");
            verdict.fail = true;
            break;
        }

        verdict
    }

    /// Draw from `[0, 100)`; satisfied when below `rate`.
    fn sample(&self, rate: u8) -> bool {
        let draw: u8 = self
            .rng
            .lock()
            .expect("rate sampler lock poisoned")
            .gen_range(0..100);
        draw < rate
    }
}
