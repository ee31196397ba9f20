//! Decomposition into a linear combination of conjunctions.
//!
//! Every linear MBA `f` over `n` variables can be written as
//! `f = c_0 + sum_S c_S * AND(S)` where `S` ranges over the non-empty
//! subsets of the variables. The coefficients follow from the values of `f`
//! on the `2^n` boolean inputs by inverting the lower triangular matrix
//! `A[i][j] = (i & j == j)`, which is the Möbius transform on the subset
//! lattice.

use thiserror::Error;

use crate::emulator::{EvalError, evaluate};
use crate::expr::{Expr, Operand, Variable, Width};
use crate::valuation::{Assignment, Valuation};

/// Largest number of variables that are decomposed.
pub const MAX_VARS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinConjError {
    #[error("too many variables ({0}), at most {MAX_VARS} are supported")]
    TooManyVariables(usize),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinConjModel {
    width: Width,

    /// The variables in the order they were discovered.
    vars: Vec<Variable>,

    /// `coeffs[i]` is the coefficient of the conjunction of the variables
    /// whose bits are set in `i`. `coeffs[0]` is the constant.
    coeffs: Vec<u64>,

    /// `trace[i]` is the value of the expression when variable `j`
    /// is bit `j` of `i`.
    trace: Vec<u64>,
}

impl LinConjModel {
    pub fn new(e: &Expr) -> Result<Self, LinConjError> {
        let width = e.width;

        let mut v = Assignment::zero();
        evaluate(e, &mut v)?;
        let vars: Vec<_> = v.vars().cloned().collect();
        if vars.len() > MAX_VARS {
            return Err(LinConjError::TooManyVariables(vars.len()));
        }

        let trace = (0..1usize << vars.len())
            .map(|i| {
                v.assign_bits(i);
                evaluate(e, &mut v)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let coeffs = mobius(&trace, width);
        let mut model = Self { width, vars, coeffs, trace };
        model.eliminate_variables();
        Ok(model)
    }

    pub fn width(&self) -> Width {
        self.width
    }

    pub fn vars(&self) -> &[Variable] {
        &self.vars
    }

    pub fn coeffs(&self) -> &[u64] {
        &self.coeffs
    }

    pub fn trace(&self) -> &[u64] {
        &self.trace
    }

    /// Removes every variable that has only zero coefficients,
    /// i.e. that the function does not depend on.
    pub fn eliminate_variables(&mut self) {
        let mut k = 0;
        while k < self.vars.len() {
            let bit = 1 << k;
            let unused = self.coeffs.iter()
                .enumerate()
                .all(|(i, c)| i & bit == 0 || *c == 0);

            if !unused {
                k += 1;
                continue;
            }

            log::trace!("eliminating unused variable {}", self.vars[k]);
            self.vars.remove(k);
            self.coeffs = drop_bit(&self.coeffs, k);
            self.trace = drop_bit(&self.trace, k);
        }
    }

    /// Evaluates the model. The inputs are full width values,
    /// the conjunctions are bitwise.
    pub fn evaluate<V: Valuation + ?Sized>(&self, v: &mut V) -> Result<u64, EvalError> {
        let vals = self.vars.iter()
            .map(|var| Ok(var.width.truncate(v.value(var)?)))
            .collect::<Result<Vec<_>, EvalError>>()?;

        let mut acc = 0u64;
        for (i, c) in self.coeffs.iter().enumerate() {
            if *c == 0 {
                continue;
            }
            let conj = vals.iter()
                .enumerate()
                .filter(|(j, _)| i >> j & 1 == 1)
                .fold(u64::MAX, |acc, (_, x)| acc & x);
            // The empty conjunction stands for the constant one.
            let conj = if i == 0 { 1 } else { conj };
            acc = acc.wrapping_add(c.wrapping_mul(conj));
        }
        Ok(self.width.truncate(acc))
    }

    /// The model as a sum of conjunctions.
    pub fn to_expr(&self) -> Expr {
        let ops: Vec<_> = self.vars.iter()
            .map(|v| Operand::from(v.clone()).resize(self.width, false))
            .collect();

        let terms = self.coeffs.iter()
            .enumerate()
            .skip(1)
            .filter(|(_, c)| **c != 0)
            .map(|(i, c)| {
                let conj = ops.iter()
                    .enumerate()
                    .filter(|(j, _)| i >> j & 1 == 1)
                    .map(|(_, o)| o.clone())
                    .reduce(|a, b| a & b)
                    .unwrap_or_else(|| Operand::ones(self.width));
                conj.scaled(*c)
            });

        let sum = Operand::sum(self.width, terms);
        let c = self.coeffs.first().copied().unwrap_or(0);
        let sum = if c != 0 { sum + Operand::constant(c, self.width) } else { sum };
        sum.into_expr().simplify()
    }
}

/// Solves `sum_{j & i == j} c_j = trace_i` in place by forward substitution.
fn mobius(trace: &[u64], width: Width) -> Vec<u64> {
    let mut c = trace.to_vec();
    let n = trace.len().trailing_zeros();
    for k in 0..n {
        let bit = 1 << k;
        for i in 0..c.len() {
            if i & bit != 0 {
                c[i] = c[i].wrapping_sub(c[i ^ bit]);
            }
        }
    }
    c.into_iter().map(|x| width.truncate(x)).collect()
}

/// Keeps the entries whose index has bit `k` clear, compacting the indices.
fn drop_bit(v: &[u64], k: usize) -> Vec<u64> {
    v.iter()
        .enumerate()
        .filter(|(i, _)| i >> k & 1 == 0)
        .map(|(_, x)| *x)
        .collect()
}

/// The textbook substitution `coeff[i] = trace[i] - sum_{j < i, i & j == j} coeff[j]`.
#[cfg(test)]
fn naive_coeffs(trace: &[u64], width: Width) -> Vec<u64> {
    let mut c: Vec<u64> = Vec::with_capacity(trace.len());
    for (i, t) in trace.iter().enumerate() {
        let s = (0..i)
            .filter(|j| i & j == *j)
            .fold(0u64, |acc, j| acc.wrapping_add(c[j]));
        c.push(width.truncate(t.wrapping_sub(s)));
    }
    c
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn model(s: &str) -> LinConjModel {
        LinConjModel::new(&Expr::from_string(s, Width::B8).unwrap()).unwrap()
    }

    #[test]
    fn classic_identity() {
        let m = model("(x & y) + (x | y)");
        assert_eq!(m.coeffs(), &[0, 1, 1, 0]);
        let s = m.to_expr().to_string();
        assert!(s == "x + y" || s == "y + x", "{s}");

        // x | y keeps a negative conjunction.
        let m = model("(x & y) + (x ^ y)");
        assert_eq!(m.coeffs(), &[0, 1, 1, 1u64.wrapping_neg()]);

        let m = model("(x | y) - (x & y)");
        assert_eq!(m.coeffs(), &[0, 1, 1, 2u64.wrapping_neg()]);
    }

    #[test]
    fn unused_variables_are_eliminated() {
        let m = model("x + (y ^ z) - (z ^ y)");
        assert_eq!(m.vars().len(), 1);
        assert_eq!(m.coeffs(), &[0, 1]);
        assert_eq!(m.trace(), &[0, 1]);

        let m = model("(x & y) - (y & x) + 3");
        assert!(m.vars().is_empty());
        assert_eq!(m.to_expr().to_string(), "3");
    }

    #[test]
    fn too_many_variables() {
        let s = (0..17).map(|i| format!("v{i}")).collect::<Vec<_>>().join(" & ");
        let e = Expr::from_string(&s, Width::B8).unwrap();
        assert_eq!(LinConjModel::new(&e), Err(LinConjError::TooManyVariables(17)));
    }

    #[test]
    fn conjunctions_evaluate_bitwise() {
        let m = model("(x & y) + 2 * (x & ~y) + 7");
        let e = m.to_expr();
        let x = Variable::reg("x", Width::B8);
        let y = Variable::reg("y", Width::B8);
        let mut v = Assignment::from_vec(vec![(x, 0xf0f0), (y, 0xff00)]);
        let expected = (0xf0f0 & 0xff00) + 2 * (0xf0f0 & !0xff00u64) + 7;
        assert_eq!(m.evaluate(&mut v).unwrap(), expected);
        assert_eq!(e.eval(&mut v).unwrap(), expected);
    }

    proptest! {
        #[test]
        fn decomposition_is_exact(trace in prop::collection::vec(any::<u64>(), 16)) {
            let c = mobius(&trace, Width::B8);
            prop_assert_eq!(&c, &naive_coeffs(&trace, Width::B8));
            for i in 0..trace.len() {
                let s = (0..trace.len())
                    .filter(|j| i & j == *j)
                    .fold(0u64, |acc, j| acc.wrapping_add(c[j]));
                prop_assert_eq!(s, trace[i]);
            }
        }

        #[test]
        fn elimination_keeps_the_function(
            a in any::<u64>(),
            b in any::<u64>(),
            x in any::<u64>(),
            y in any::<u64>(),
            z in any::<u64>(),
        ) {
            // `y` cancels out.
            let e = Expr::from_string("(x & y) + (x & ~y) + (y ^ z) - (z ^ y) + z", Width::B8).unwrap();
            let e = Expr::binary(
                crate::expr::Opcode::Add,
                Operand::from(e),
                Operand::constant(a, Width::B8) * Operand::constant(b, Width::B8),
            );
            let m = LinConjModel::new(&e).unwrap();
            prop_assert_eq!(m.vars().len(), 2);
            let vals = vec![
                (Variable::reg("x", Width::B8), x),
                (Variable::reg("y", Width::B8), y),
                (Variable::reg("z", Width::B8), z),
            ];
            let mut v = Assignment::from_vec(vals);
            prop_assert_eq!(m.evaluate(&mut v).unwrap(), e.eval(&mut v).unwrap());
            prop_assert_eq!(m.to_expr().eval(&mut v).unwrap(), e.eval(&mut v).unwrap());
        }

        #[test]
        fn non_affine_functions_are_rebuilt(
            idx in 0..3usize,
            x in any::<u64>(),
            y in any::<u64>(),
        ) {
            let s = ["(x & y) + (x ^ y)", "x | y", "(x | y) - (x & y)"][idx];
            let e = Expr::from_string(s, Width::B8).unwrap();
            let m = LinConjModel::new(&e).unwrap();
            prop_assert!(m.coeffs().iter().any(|&c| c != 0 && c != 1));
            let vals = vec![
                (Variable::reg("x", Width::B8), x),
                (Variable::reg("y", Width::B8), y),
            ];
            let mut v = Assignment::from_vec(vals);
            prop_assert_eq!(m.to_expr().eval(&mut v).unwrap(), e.eval(&mut v).unwrap());
        }
    }
}
