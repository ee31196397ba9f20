//! A normal form for nonlinear MBA expressions.
//!
//! The expression is rewritten until the only boolean operation left is
//! `&`, then multiplied out into a sum of terms. Each term is a coefficient
//! times a product of factors, where a factor is a variable or a
//! conjunction of (possibly negated) variables. Like terms are merged and
//! groups of terms that are the expansion of a simple bitwise operation are
//! turned back into that operation.
//!
//! ```
//! # use mba_deobf::expr::{Expr, Width};
//! # use mba_deobf::nonlinear::NormalForm;
//! let e = Expr::from_string("(x | y) + (x & y) - y", Width::B4).unwrap();
//! let nf = NormalForm::new(&e, 3).unwrap();
//! assert_eq!(nf.to_expr().to_string(), "x");
//! ```

mod reverse;
mod rewrite;
mod term;

use thiserror::Error;

use crate::emulator::{EvalError, evaluate};
use crate::expr::{Expr, Operand, Width};
use crate::valuation::Valuation;

pub use reverse::{BoolFn, Residual};
pub use term::{Atom, Factor, Product, Term};

use rewrite::{MAX_NODES, Node};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NonlinearError {
    #[error("the expression can not be normalized")]
    NotNormalizable,

    #[error("unsupported expression: {0}")]
    Unsupported(&'static str),

    #[error("too many variables ({0})")]
    TooManyVariables(usize),

    #[error("the expression grew too large")]
    TooLarge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalForm {
    width: Width,
    constant: u64,

    /// Merged terms with non-zero coefficients, ordered by product.
    terms: Vec<Term>,

    /// Bitwise operations recovered from the terms.
    residuals: Vec<Residual>,
}

fn check_size(n: &Node) -> Result<(), NonlinearError> {
    if n.size() > MAX_NODES {
        return Err(NonlinearError::TooLarge);
    }
    Ok(())
}

impl NormalForm {
    /// Computes the normal form of an expression with at most `max_vars`
    /// variables.
    pub fn new(e: &Expr, max_vars: usize) -> Result<Self, NonlinearError> {
        let nvars = e.vars().len();
        if nvars == 0 {
            return Err(NonlinearError::Unsupported("constant expression"));
        }
        if nvars > max_vars {
            return Err(NonlinearError::TooManyVariables(nvars));
        }

        let width = e.width;
        let n = rewrite::preprocess(Node::from_expr(e));
        let mut leaves = Vec::new();
        n.leaves(&mut leaves);

        let n = rewrite::normalize(n, &mut 0)?;
        check_size(&n)?;
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("normalized: {}", n.to_operand(width));
        }

        let n = rewrite::distribute(n, &mut 0)?;
        check_size(&n)?;
        let n = rewrite::flatten(n);
        debug_assert!(rewrite::is_flat(&n));

        let terms = term::collect(n, width)?;
        let mut merged = term::merge(terms, width);
        let residuals = reverse::reverse_match(&mut merged, &leaves, width);
        let constant = merged.remove(&Product::new()).unwrap_or(0);
        let terms = merged.into_iter()
            .map(|(product, coeff)| Term { coeff, product })
            .collect();

        Ok(Self { width, constant, terms, residuals })
    }

    pub fn width(&self) -> Width {
        self.width
    }

    pub fn constant(&self) -> u64 {
        self.constant
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn residuals(&self) -> &[Residual] {
        &self.residuals
    }

    pub fn to_expr(&self) -> Expr {
        let w = self.width;
        let ops = self.residuals.iter()
            .map(Residual::to_operand)
            .chain(self.terms.iter().map(|t| t.to_operand(w)));

        let sum = Operand::sum(w, ops);
        let sum = if self.constant != 0 {
            sum + Operand::constant(self.constant, w)
        } else {
            sum
        };
        sum.into_expr().simplify()
    }

    pub fn evaluate<V: Valuation + ?Sized>(&self, v: &mut V) -> Result<u64, EvalError> {
        evaluate(&self.to_expr(), v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::valuation::Assignment;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn nf(s: &str) -> (Expr, Result<NormalForm, NonlinearError>) {
        let e = Expr::from_string(s, Width::B8).unwrap();
        let r = NormalForm::new(&e, 3);
        (e, r)
    }

    fn check_equal(e: &Expr, nf: &NormalForm) {
        let vars = e.vars();
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..64 {
            let vals = vars.iter().map(|v| (v.clone(), rng.random())).collect();
            let mut v = Assignment::from_vec(vals);
            assert_eq!(nf.evaluate(&mut v).unwrap(), e.eval(&mut v).unwrap(), "{e}");
        }
    }

    #[test]
    fn decrement_below_and() {
        let (e, r) = nf("(x - 1) & y");
        let r = r.unwrap();
        assert_eq!(r.terms().len(), 2);
        check_equal(&e, &r);
    }

    #[test]
    fn recovers_bitwise_operations() {
        for (s, expected) in [
            ("x + y - 2 * (x & y)", "x ^ y"),
            ("(x & y) + (x ^ y)", "x | y"),
            ("3 * y - 3 * (x & y)", "3 * (~x & y)"),
            ("-(x & y) - 1", "~(x & y)"),
            ("-x - 1", "~x"),
        ] {
            let (e, r) = nf(s);
            let r = r.unwrap();
            assert_eq!(r.to_expr().to_string(), expected, "{s}");
            check_equal(&e, &r);
        }
    }

    #[test]
    fn nonlinear_terms() {
        for s in [
            "(x ^ y) * (x & y)",
            "(x | y) * (x & ~y) + x * y",
            "~(x ^ z) * (y | 3) - 7",
            "(x - 1) & ~y",
        ] {
            let (e, r) = nf(s);
            check_equal(&e, &r.unwrap());
        }

        let (_, r) = nf("x * y - (y & x) + (x & y) - y * x");
        assert_eq!(r.unwrap().to_expr().to_string(), "0");
    }

    #[test]
    fn failures() {
        assert_eq!(nf("(x + y) & (x | z)").1, Err(NonlinearError::NotNormalizable));
        assert_eq!(nf("a + b + c + d").1, Err(NonlinearError::TooManyVariables(4)));
        assert!(matches!(nf("3 + 4").1, Err(NonlinearError::Unsupported(_))));
    }

    #[test]
    fn opaque_subexpressions() {
        let (e, r) = nf("((x >> 3) | y) - ((x >> 3) & y)");
        let r = r.unwrap();
        assert_eq!(r.to_expr().to_string(), "x >> 3 ^ y");
        check_equal(&e, &r);
    }
}
