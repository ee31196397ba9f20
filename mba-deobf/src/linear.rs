//! Reconstruction of an affine function from a handful of evaluations.
//!
//! If the expression is affine in its variables, i.e.
//! `e = c + a_1 * x_1 + ... + a_n * x_n` modulo `2^w`, then evaluating it at
//! zero and at the unit vectors recovers all coefficients. Otherwise the model
//! is simply wrong and verification will reject it.

use std::collections::BTreeSet;

use crate::emulator::{EvalError, evaluate};
use crate::expr::{Expr, Operand, Variable, Width};
use crate::valuation::{Assignment, Valuation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearModel {
    /// Width of the modelled expression.
    pub width: Width,

    pub const_term: u64,

    /// Coefficients in the order the variables were discovered.
    pub coeffs: Vec<(Variable, u64)>,

    /// Variables narrower than `width` that have to be sign extended
    /// before they are multiplied by their coefficient.
    pub sign_extend: BTreeSet<Variable>,
}

impl LinearModel {
    pub fn new(e: &Expr) -> Result<Self, EvalError> {
        let width = e.width;

        // Evaluating at zero also discovers the variables.
        let mut v = Assignment::zero();
        let const_term = evaluate(e, &mut v)?;
        let vars: Vec<_> = v.vars().cloned().collect();

        let mut coeffs = Vec::with_capacity(vars.len());
        let mut sign_extend = BTreeSet::new();
        for var in vars {
            v.set_value(&var, 1);
            let coeff = width.truncate(evaluate(e, &mut v)?.wrapping_sub(const_term));

            if var.width < width {
                v.set_value(&var, var.width.mask());
                let minus_one = evaluate(e, &mut v)?;
                if width.truncate(const_term.wrapping_sub(minus_one)) == coeff {
                    sign_extend.insert(var.clone());
                }
            }

            v.set_value(&var, 0);
            coeffs.push((var, coeff));
        }

        Ok(Self { width, const_term, coeffs, sign_extend })
    }

    /// Number of variables with a non-zero coefficient.
    pub fn num_terms(&self) -> usize {
        self.coeffs.iter().filter(|(_, c)| *c != 0).count()
    }

    /// Evaluates the model.
    pub fn evaluate<V: Valuation + ?Sized>(&self, v: &mut V) -> Result<u64, EvalError> {
        let mut acc = self.const_term;
        for (var, c) in &self.coeffs {
            let x = var.width.truncate(v.value(var)?);
            let x = if self.sign_extend.contains(var) {
                var.width.sign_extend(x) as u64
            } else {
                x
            };
            acc = acc.wrapping_add(c.wrapping_mul(x));
        }
        Ok(self.width.truncate(acc))
    }

    /// The model as an expression. Trivial coefficients are cleaned up
    /// by the peephole pass.
    pub fn to_expr(&self) -> Expr {
        let terms = self.coeffs.iter()
            .filter(|(_, c)| *c != 0)
            .map(|(var, c)| {
                let signed = self.sign_extend.contains(var);
                Operand::from(var.clone()).resize(self.width, signed).scaled(*c)
            });

        let sum = Operand::sum(self.width, terms);
        let sum = if self.const_term != 0 {
            sum + Operand::constant(self.const_term, self.width)
        } else {
            sum
        };

        sum.into_expr().simplify()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn model(s: &str) -> LinearModel {
        LinearModel::new(&Expr::from_string(s, Width::B8).unwrap()).unwrap()
    }

    #[test]
    fn affine_expressions() {
        let m = model("3 * x - 2 * y + 7");
        assert_eq!(m.const_term, 7);
        assert_eq!(m.coeffs[0].1, 3);
        assert_eq!(m.coeffs[1].1, 2u64.wrapping_neg());
        assert_eq!(m.to_expr().to_string(), "3 * x + -2 * y + 7");

        let m = model("(x & y) + (x | y)");
        assert_eq!(m.to_expr().to_string(), "x + y");

        let m = model("x - x + 5");
        assert_eq!(m.num_terms(), 0);
        assert_eq!(m.to_expr().to_string(), "5");
    }

    #[test]
    fn sign_extension_is_detected() {
        let x = Operand::reg("x", Width::B1);
        let y = Operand::reg("y", Width::B1);
        let e = (x.resize(Width::B8, true) + y.resize(Width::B8, false)).into_expr();
        let m = LinearModel::new(&e).unwrap();
        let xs: Vec<_> = m.sign_extend.iter().map(|v| v.to_string()).collect();
        assert_eq!(xs, vec!["x"]);
        assert_eq!(m.to_expr().to_string(), "sext64(x) + zext64(y)");
    }

    #[test]
    fn errors_propagate() {
        let e = Expr::from_string("x / (y - y)", Width::B8).unwrap();
        assert_eq!(LinearModel::new(&e), Err(EvalError::DivisionByZero));
    }

    proptest! {
        #[test]
        fn affine_models_are_exact(
            a in any::<u64>(),
            b in any::<u64>(),
            c in any::<u64>(),
            d in any::<u64>(),
            vals in prop::collection::vec(any::<u64>(), 4),
        ) {
            let w = Width::B8;
            let names = ["x", "y", "z", "t"];
            let vars: Vec<_> = names.iter().map(|n| Operand::reg(*n, w)).collect();
            let e = (vars[0].clone().scaled(a)
                + vars[1].clone().scaled(b)
                + (vars[2].clone() - vars[3].clone()).scaled(c)
                + Operand::constant(d, w)).into_expr();
            let m = LinearModel::new(&e).unwrap();

            let assignment: Vec<_> = names.iter()
                .map(|n| Variable::reg(*n, w))
                .zip(vals)
                .collect();
            let mut v = Assignment::from_vec(assignment);
            prop_assert_eq!(m.evaluate(&mut v).unwrap(), e.eval(&mut v).unwrap());
            let r = m.to_expr();
            prop_assert_eq!(r.eval(&mut v).unwrap(), e.eval(&mut v).unwrap());
        }
    }
}
