//! Randomized equivalence testing.

use rand::Rng;

use crate::emulator::{EvalError, evaluate};
use crate::expr::{Expr, Variable};
use crate::valuation::Assignment;

/// Result of [`random_check`].
#[derive(Debug, Clone)]
pub enum RandomCheck {
    /// The expressions agreed on every trial.
    Passed,

    /// The expressions differ on this input.
    Counterexample(Assignment),

    /// One of the expressions could not be evaluated.
    Error(EvalError),
}

/// Evaluates both expressions on `trials` random inputs. The inputs hit
/// 0, 1 and all ones with probability `special_probability`.
pub fn random_check<R: Rng>(
    a: &Expr,
    b: &Expr,
    trials: usize,
    special_probability: f64,
    rng: &mut R,
) -> RandomCheck {
    let mut vars: Vec<Variable> = a.vars();
    for v in b.vars() {
        if !vars.contains(&v) {
            vars.push(v);
        }
    }

    let mut v = Assignment::vars_zero(&vars);
    for _ in 0..trials {
        v.update_random(rng, special_probability);
        let (x, y) = match (evaluate(a, &mut v), evaluate(b, &mut v)) {
            (Ok(x), Ok(y)) => (x, y),
            (Err(e), _) | (_, Err(e)) => return RandomCheck::Error(e),
        };

        if x != y {
            return RandomCheck::Counterexample(v);
        }
    }

    RandomCheck::Passed
}

/// Are `a` and `b` equal on `trials` random inputs?
/// Expressions of different widths, or that fail to evaluate, are not.
pub fn probably_equivalent<R: Rng>(
    a: &Expr,
    b: &Expr,
    trials: usize,
    special_probability: f64,
    rng: &mut R,
) -> bool {
    a.width == b.width
        && matches!(random_check(a, b, trials, special_probability, rng), RandomCheck::Passed)
}
