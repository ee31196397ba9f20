//! Rewrites a [`LinConjModel`] into a short sum of bitwise functions by
//! looking at the set of values its trace takes.
//!
//! If `f(0) = c` and `f` takes the values `c + v_1, ..., c + v_k` elsewhere,
//! then `f = c + sum_i v_i * T_i`, where `T_i` is the bitwise function that is
//! one exactly where `f` is `c + v_i`. All `T_i` are zero on the all-zero
//! input, so they are in the [`BitwiseTable`] for up to three variables.
//! A few value patterns allow shorter forms.

use std::collections::BTreeSet;

use crate::bitwise_expr::BExpr;
use crate::bitwise_table::{BitwiseTable, MAX_TABLE_VARS, TemplateId};
use crate::emulator::EvalError;
use crate::expr::{Expr, Operand, Variable, Width};
use crate::lin_conj::LinConjModel;
use crate::simplify_boolean::{SimplificationConfig, simplify_from_truth_table};
use crate::valuation::Valuation;

/// Largest number of variables for which a bitwise function is
/// synthesized from its truth table.
pub const MAX_SYNTH_VARS: usize = 6;

/// A bitwise function of the model's variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BitwiseFn {
    /// From the lookup table.
    Template(TemplateId),

    /// Found by the boolean minimizer.
    Synthesized(BExpr),
}

impl BitwiseFn {
    fn to_bexpr(&self, table: &BitwiseTable) -> BExpr {
        match self {
            BitwiseFn::Template(id) => table.to_bexpr(*id),
            BitwiseFn::Synthesized(e) => e.clone(),
        }
    }
}

/// `coeff * func` or, if `negated`, `coeff * ~func`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub coeff: u64,
    pub func: BitwiseFn,
    pub negated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimplifiedLinConj {
    pub width: Width,
    pub vars: Vec<Variable>,
    pub constant: u64,
    pub terms: Vec<Term>,
}

/// Simplifies the model. Returns `None` if the value range of the trace
/// has no pattern that this knows about.
pub fn simplify(
    model: &LinConjModel,
    table: &BitwiseTable,
    cfg: &SimplificationConfig,
) -> Option<SimplifiedLinConj> {
    let n = model.vars().len();
    if n > MAX_SYNTH_VARS {
        return None;
    }

    let width = model.width();
    let trace = model.trace();
    let c0 = *trace.first()?;
    let shifted: Vec<u64> = trace.iter().map(|t| width.truncate(t.wrapping_sub(c0))).collect();
    let values: Vec<u64> = shifted.iter()
        .copied()
        .filter(|v| *v != 0)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    // Only functions with a single non-zero value are synthesized.
    if n > MAX_TABLE_VARS && values.len() > 1 {
        return None;
    }

    let bits = |pred: &dyn Fn(u64) -> bool| -> u64 {
        shifted.iter()
            .enumerate()
            .filter(|(_, v)| pred(**v))
            .fold(0, |acc, (i, _)| acc | 1 << i)
    };

    let func = |t: u64| -> Option<BitwiseFn> {
        if n <= MAX_TABLE_VARS {
            if let Some(id) = table.lookup(n, t) {
                return Some(BitwiseFn::Template(id));
            }
        }
        let rows = 1usize << n;
        let e = simplify_from_truth_table(n, (0..rows).map(|i| (t >> i) & 1 == 1), cfg);
        Some(BitwiseFn::Synthesized(e))
    };

    let term = |coeff: u64, t: u64| -> Option<Term> {
        Some(Term { coeff, func: func(t)?, negated: false })
    };

    let mut constant = c0;
    let mut terms = Vec::new();
    match *values.as_slice() {
        [] => {},

        // `f` is `c` or `2c`, so `f = -c * ~T`.
        [a] if c0 != 0 && a == c0 => {
            log::trace!("value range {{{c0}, 2 * {c0}}}");
            constant = 0;
            terms.push(Term {
                coeff: width.truncate(c0.wrapping_neg()),
                func: func(bits(&|v| v == a))?,
                negated: true,
            });
        },

        [a] => terms.push(term(a, bits(&|v| v == a))?),

        [a, b] => {
            terms.push(term(a, bits(&|v| v == a))?);
            terms.push(term(b, bits(&|v| v == b))?);
        },

        [a, b, c] => {
            // If one value is the sum of the other two, two terms suffice.
            let sum = [(a, b, c), (b, a, c), (c, a, b)]
                .into_iter()
                .find(|(x, y, z)| *x == width.truncate(y.wrapping_add(*z)));

            match sum {
                Some((x, y, z)) => {
                    terms.push(term(y, bits(&|v| v == x || v == y))?);
                    terms.push(term(z, bits(&|v| v == x || v == z))?);
                },
                None => {
                    for v in [a, b, c] {
                        terms.push(term(v, bits(&|u| u == v))?);
                    }
                },
            }
        },

        _ => {
            for &v in &values {
                terms.push(term(v, bits(&|u| u == v))?);
            }
        },
    }

    Some(SimplifiedLinConj { width, vars: model.vars().to_vec(), constant, terms })
}

impl SimplifiedLinConj {
    /// Evaluates the simplified model.
    pub fn evaluate<V: Valuation + ?Sized>(
        &self,
        table: &BitwiseTable,
        v: &mut V,
    ) -> Result<u64, EvalError> {
        let vals = self.vars.iter()
            .map(|var| Ok(var.width.truncate(v.value(var)?)))
            .collect::<Result<Vec<_>, EvalError>>()?;

        let mut acc = self.constant;
        for t in &self.terms {
            let f = t.func.to_bexpr(table).eval(&vals);
            let f = if t.negated { !f } else { f };
            acc = acc.wrapping_add(t.coeff.wrapping_mul(f));
        }
        Ok(self.width.truncate(acc))
    }

    /// Builds the expression.
    pub fn to_expr(&self, table: &BitwiseTable) -> Option<Expr> {
        let ops: Vec<_> = self.vars.iter().map(|v| Operand::from(v.clone())).collect();

        let terms = self.terms.iter()
            .map(|t| {
                let f = match &t.func {
                    BitwiseFn::Template(id) => table.instantiate(*id, &ops, self.width)?,
                    BitwiseFn::Synthesized(e) => e.to_operand(&ops, self.width)?,
                };
                let f = if t.negated { !f } else { f };
                Some(f.scaled(t.coeff))
            })
            .collect::<Option<Vec<_>>>()?;

        let sum = Operand::sum(self.width, terms);
        let sum = if self.constant != 0 {
            sum + Operand::constant(self.constant, self.width)
        } else {
            sum
        };
        Some(sum.into_expr().simplify())
    }
}
