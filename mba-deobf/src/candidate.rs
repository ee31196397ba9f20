//! Candidate replacements produced by the generators.

use std::fmt::Display;

use crate::bitwise_table::BitwiseTable;
use crate::emulator::{EvalError, evaluate};
use crate::expr::Expr;
use crate::formatter::Formatter;
use crate::lin_conj::LinConjModel;
use crate::linear::LinearModel;
use crate::nonlinear::NormalForm;
use crate::simp_lin_conj::SimplifiedLinConj;
use crate::valuation::Valuation;

/// Which generator produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Source {
    Oracle,
    Linear,
    LinConj,
    SimplifiedLinConj,
    Nonlinear,
}

impl Source {
    pub const ALL: [Source; 5] = [
        Source::Oracle,
        Source::Linear,
        Source::LinConj,
        Source::SimplifiedLinConj,
        Source::Nonlinear,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Source::Oracle => "oracle",
            Source::Linear => "linear",
            Source::LinConj => "linear conjunctions",
            Source::SimplifiedLinConj => "simplified linear conjunctions",
            Source::Nonlinear => "nonlinear normal form",
        }
    }
}

impl Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub enum Candidate {
    /// An instantiated oracle expression.
    Oracle(Expr),
    Linear(LinearModel),
    LinConj(LinConjModel),
    SimplifiedLinConj(SimplifiedLinConj),
    Nonlinear(NormalForm),
}

pub fn source(c: &Candidate) -> Source {
    match c {
        Candidate::Oracle(_) => Source::Oracle,
        Candidate::Linear(_) => Source::Linear,
        Candidate::LinConj(_) => Source::LinConj,
        Candidate::SimplifiedLinConj(_) => Source::SimplifiedLinConj,
        Candidate::Nonlinear(_) => Source::Nonlinear,
    }
}

/// The candidate as an expression, after peephole simplification.
/// `None` if a bitwise function could not be instantiated.
pub fn to_expr(c: &Candidate, table: &BitwiseTable) -> Option<Expr> {
    let e = match c {
        Candidate::Oracle(e) => e.clone(),
        Candidate::Linear(m) => m.to_expr(),
        Candidate::LinConj(m) => m.to_expr(),
        Candidate::SimplifiedLinConj(m) => m.to_expr(table)?,
        Candidate::Nonlinear(nf) => nf.to_expr(),
    };
    Some(e.simplify())
}

/// Evaluates the candidate without building its expression where the
/// model allows it.
pub fn evaluate_candidate<V: Valuation + ?Sized>(
    c: &Candidate,
    table: &BitwiseTable,
    v: &mut V,
) -> Result<u64, EvalError> {
    match c {
        Candidate::Oracle(e) => evaluate(e, v),
        Candidate::Linear(m) => m.evaluate(v),
        Candidate::LinConj(m) => m.evaluate(v),
        Candidate::SimplifiedLinConj(m) => m.evaluate(table, v),
        Candidate::Nonlinear(nf) => nf.evaluate(v),
    }
}

/// The candidate as an SMT-LIB2 term.
pub fn to_formula(c: &Candidate, table: &BitwiseTable) -> Option<String> {
    to_expr(c, table).map(|e| e.display(Formatter::SmtLib).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Width;
    use crate::simp_lin_conj;
    use crate::simplify_boolean::SimplificationConfig;
    use crate::valuation::Assignment;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    /// Candidates from every generator that is exact for `e`. The linear
    /// model is only exact for affine expressions.
    fn exact_candidates(e: &Expr, table: &BitwiseTable, affine: bool) -> Vec<Candidate> {
        let lc = LinConjModel::new(e).unwrap();
        let slc = simp_lin_conj::simplify(&lc, table, &SimplificationConfig::default()).unwrap();
        let mut c = vec![
            Candidate::Oracle(e.clone()),
            Candidate::SimplifiedLinConj(slc),
            Candidate::LinConj(lc),
            Candidate::Nonlinear(NormalForm::new(e, 3).unwrap()),
        ];
        if affine {
            c.push(Candidate::Linear(LinearModel::new(e).unwrap()));
        }
        c
    }

    #[test]
    fn every_representation_agrees() {
        let table = BitwiseTable::new();
        let mut sources = Vec::new();
        for (s, affine) in [("(x & y) + (x | y)", true), ("(x & y) + (x ^ y)", false)] {
            let e = Expr::from_string(s, Width::B8).unwrap();
            let candidates = exact_candidates(&e, &table, affine);
            check_agree(&e, &candidates, &table);
            sources.extend(candidates.iter().map(source));
        }
        assert!(Source::ALL.iter().all(|s| sources.contains(s)));
    }

    fn check_agree(e: &Expr, candidates: &[Candidate], table: &BitwiseTable) {
        let mut rng = StdRng::seed_from_u64(23);
        for c in candidates {
            let ce = to_expr(c, table).unwrap();
            assert_eq!(ce.width, e.width, "{}", source(c));
            for _ in 0..32 {
                let vals = e.vars().into_iter().map(|v| (v, rng.random())).collect();
                let mut v = Assignment::from_vec(vals);
                let expected = e.eval(&mut v).unwrap();
                assert_eq!(evaluate_candidate(c, table, &mut v).unwrap(), expected, "{}", source(c));
                assert_eq!(ce.eval(&mut v).unwrap(), expected, "{}", source(c));
            }
        }
    }

    #[test]
    fn linear_model_is_wrong_off_affine() {
        let e = Expr::from_string("(x & y) + (x ^ y)", Width::B8).unwrap();
        let c = Candidate::Linear(LinearModel::new(&e).unwrap());
        let x = e.vars()[0].clone();
        let y = e.vars()[1].clone();
        let mut v = Assignment::from_vec(vec![(x, 1), (y, 1)]);
        assert_eq!(e.eval(&mut v).unwrap(), 1);
        assert_eq!(evaluate_candidate(&c, &BitwiseTable::new(), &mut v).unwrap(), 2);
    }

    #[test]
    fn formulas() {
        let table = BitwiseTable::new();
        let e = Expr::from_string("x + 1", Width::B1).unwrap();
        let f = to_formula(&Candidate::Linear(LinearModel::new(&e).unwrap()), &table).unwrap();
        assert_eq!(f, "(bvadd x_8 (_ bv1 8))");
    }
}
