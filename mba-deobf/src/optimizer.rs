//! The driver: generates candidates for every MBA-looking node of an
//! expression, verifies them and substitutes the cheapest one that passes.

use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fmt::Display;
use std::path::PathBuf;

use crate::bitwise_table::BitwiseTable;
use crate::candidate::{self, Candidate, Source};
use crate::expr::{Expr, Opcode, Operand};
use crate::heuristics::{NUM_TEST_CASES, SPECIAL_PROBABILITY, is_mba};
use crate::lin_conj::LinConjModel;
use crate::linear::LinearModel;
use crate::nonlinear::NormalForm;
use crate::oracle::{LazyOracle, Oracle};
use crate::simp_lin_conj;
use crate::simplify_boolean::SimplificationConfig;
use crate::verify::{RandomCheck, random_check};

/// Sign and zero extensions are simplified by looking at their operand.
pub fn is_extension(e: &Expr) -> bool {
    matches!(e.op, Opcode::Sext | Opcode::Zext)
}

fn no_side_effects(_: &Expr) -> bool {
    false
}

#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Timeout of a z3 proof. Zero disables proofs.
    pub smt_timeout_ms: u32,

    /// Accept candidates whose proof timed out.
    pub trust_smt_timeouts: bool,

    /// Oracle file to load candidates from.
    pub oracle_path: Option<PathBuf>,

    /// Number of random inputs a candidate is tested on.
    pub random_trials: usize,

    /// Probability of testing on 0, 1 or all ones.
    pub special_probability: f64,

    pub min_arith_ops: usize,
    pub min_bool_ops: usize,

    /// Generate nonlinear normal forms.
    pub nonlinear: bool,

    /// Largest number of variables for the nonlinear normal form.
    pub nonlinear_max_vars: usize,

    /// Seed of the random tests. Random if `None`.
    pub seed: Option<u64>,

    /// Nodes that are never replaced themselves. Their operands still are.
    pub pass_through: fn(&Expr) -> bool,

    /// Nodes that must not be replaced.
    pub has_side_effects: fn(&Expr) -> bool,

    /// Used for bitwise functions that are not in the table.
    pub boolean: SimplificationConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            smt_timeout_ms: 1000,
            trust_smt_timeouts: true,
            oracle_path: None,
            random_trials: NUM_TEST_CASES,
            special_probability: SPECIAL_PROBABILITY,
            min_arith_ops: 1,
            min_bool_ops: 1,
            nonlinear: true,
            nonlinear_max_vars: 3,
            seed: None,
            pass_through: is_extension,
            has_side_effects: no_side_effects,
            boolean: SimplificationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub generated: usize,

    /// Not cheaper than the original.
    pub discarded: usize,

    /// Failed verification.
    pub rejected: usize,

    pub accepted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    /// Nodes that looked like MBA.
    pub visited: usize,
    pub substituted: usize,
    sources: [SourceStats; Source::ALL.len()],
}

impl Stats {
    pub fn source(&self, s: Source) -> &SourceStats {
        &self.sources[s as usize]
    }

    fn source_mut(&mut self, s: Source) -> &mut SourceStats {
        &mut self.sources[s as usize]
    }
}

impl Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} of {} MBA nodes substituted", self.substituted, self.visited)?;
        for s in Source::ALL {
            let st = self.source(s);
            writeln!(
                f,
                "{s}: {} generated, {} discarded, {} rejected, {} accepted",
                st.generated, st.discarded, st.rejected, st.accepted,
            )?;
        }
        Ok(())
    }
}

/// Outcome of verifying a single candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Accept,
    Reject,
}

pub struct Optimizer<'t> {
    config: OptimizerConfig,
    table: &'t BitwiseTable,
    oracle: Option<Box<dyn Oracle>>,
    rng: StdRng,
    stats: Stats,
}

impl<'t> Optimizer<'t> {
    /// Creates an optimizer. The oracle in `config.oracle_path` is opened
    /// right away. If that fails the optimizer runs without it.
    pub fn new(config: OptimizerConfig, table: &'t BitwiseTable) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };

        let oracle = config.oracle_path.as_ref().and_then(|path| match LazyOracle::open(path) {
            Ok(o) => Some(Box::new(o) as Box<dyn Oracle>),
            Err(e) => {
                log::warn!("can not open oracle {}: {e}", path.display());
                None
            },
        });

        Self { config, table, oracle, rng, stats: Stats::default() }
    }

    /// Uses `oracle` instead of the one from the config.
    pub fn with_oracle(mut self, oracle: Box<dyn Oracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Runs every generator on `e`. Failing generators contribute nothing.
    pub fn candidates(&mut self, e: &Expr) -> Vec<Candidate> {
        let mut out = Vec::new();

        if let Some(oracle) = &mut self.oracle {
            out.extend(oracle.find_candidates(e).into_iter().map(Candidate::Oracle));
        }

        match LinearModel::new(e) {
            Ok(m) => out.push(Candidate::Linear(m)),
            Err(err) => log::debug!("no linear model: {err}"),
        }

        match LinConjModel::new(e) {
            Ok(m) => {
                if let Some(s) = simp_lin_conj::simplify(&m, self.table, &self.config.boolean) {
                    out.push(Candidate::SimplifiedLinConj(s));
                }
                out.push(Candidate::LinConj(m));
            },
            Err(err) => log::debug!("no linear conjunctions: {err}"),
        }

        if self.config.nonlinear {
            match NormalForm::new(e, self.config.nonlinear_max_vars) {
                Ok(nf) => out.push(Candidate::Nonlinear(nf)),
                Err(err) => log::debug!("no nonlinear normal form: {err}"),
            }
        }

        for c in &out {
            self.stats.source_mut(candidate::source(c)).generated += 1;
        }
        out
    }

    /// Tries to replace the root of `e`. Operands are not looked at.
    /// Returns the replacement, which has the width of `e` and a lower
    /// complexity.
    pub fn optimize(&mut self, e: &Expr) -> Option<Expr> {
        if (self.config.has_side_effects)(e) || (self.config.pass_through)(e) {
            return None;
        }

        if !is_mba(e, self.config.min_arith_ops, self.config.min_bool_ops) {
            return None;
        }

        self.stats.visited += 1;
        let complexity = e.complexity();
        let mut scored: Vec<(Expr, Source)> = Vec::new();
        for c in self.candidates(e) {
            let src = candidate::source(&c);
            match candidate::to_expr(&c, self.table) {
                Some(ce) if ce.width == e.width && ce.complexity() < complexity => scored.push((ce, src)),
                _ => self.stats.source_mut(src).discarded += 1,
            }
        }
        scored.sort_by_key(|(ce, _)| ce.complexity());

        for (ce, src) in scored {
            match self.verify(e, &ce) {
                Verdict::Accept => {
                    log::debug!("{e} => {ce} ({src})");
                    self.stats.source_mut(src).accepted += 1;
                    self.stats.substituted += 1;
                    return Some(ce);
                },
                Verdict::Reject => {
                    log::trace!("rejected {ce} ({src})");
                    self.stats.source_mut(src).rejected += 1;
                },
            }
        }

        log::debug!("no simplification for {e}");
        None
    }

    /// One pass over the tree: every node is offered to [`Self::optimize`],
    /// including the operands of nodes that were just replaced.
    /// Returns whether anything changed.
    pub fn optimize_recurse(&mut self, e: &mut Expr) -> bool {
        let mut changed = false;
        if let Some(new) = self.optimize(e) {
            *e = new;
            changed = true;
        }

        for o in std::iter::once(&mut e.l).chain(e.r.as_mut()) {
            if let Operand::Nested(child) = o {
                changed |= self.optimize_recurse(child);
            }
        }

        changed
    }

    /// Repeats [`Self::optimize_recurse`] until nothing changes or
    /// `max_passes` passes ran. Returns the number of passes that changed
    /// something.
    pub fn optimize_to_fixpoint(&mut self, e: &mut Expr, max_passes: usize) -> usize {
        let mut passes = 0;
        while passes < max_passes && self.optimize_recurse(e) {
            passes += 1;
        }
        log::debug!("{passes} passes\n{}", self.stats);
        passes
    }

    fn verify(&mut self, original: &Expr, candidate: &Expr) -> Verdict {
        let trials = self.config.random_trials;
        let p = self.config.special_probability;
        match random_check(original, candidate, trials, p, &mut self.rng) {
            RandomCheck::Passed => {},
            RandomCheck::Counterexample(v) => {
                log::trace!("counterexample {:?}", v.values());
                return Verdict::Reject;
            },
            RandomCheck::Error(err) => {
                log::trace!("evaluation failed: {err}");
                return Verdict::Reject;
            },
        }

        self.prove(original, candidate)
    }

    #[cfg(feature = "z3")]
    fn prove(&mut self, original: &Expr, candidate: &Expr) -> Verdict {
        use crate::smt::{SmtVerdict, prove_equivalent};

        if self.config.smt_timeout_ms == 0 {
            return Verdict::Accept;
        }

        match prove_equivalent(original, candidate, self.config.smt_timeout_ms) {
            Ok(SmtVerdict::Equivalent) => Verdict::Accept,
            Ok(SmtVerdict::NotEquivalent) => Verdict::Reject,
            Ok(SmtVerdict::Unknown) if self.config.trust_smt_timeouts => {
                log::debug!("trusting z3 timeout for {candidate}");
                Verdict::Accept
            },
            Ok(SmtVerdict::Unknown) => Verdict::Reject,
            Err(err) => {
                log::debug!("can not prove {candidate}: {err}");
                Verdict::Reject
            },
        }
    }

    #[cfg(not(feature = "z3"))]
    fn prove(&mut self, _original: &Expr, _candidate: &Expr) -> Verdict {
        Verdict::Accept
    }
}
