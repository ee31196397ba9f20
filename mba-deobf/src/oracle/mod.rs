//! A catalogue of expressions indexed by the fingerprint of their
//! input/output behavior.
//!
//! Stored expressions are abstract: their inputs are placeholders `p0..p4`.
//! To find candidates for a concrete expression, its variables are mapped
//! to the placeholder slots in every possible order and each resulting
//! fingerprint is looked up.

mod build;
mod corpus;
mod format;
mod lazy;
mod memory;

use itertools::Itertools;
use rand::Rng;
use std::collections::BTreeSet;

use crate::emulator::{EvalError, evaluate};
use crate::expr::{Expr, Operand, Variable, Width};
use crate::heuristics::{SPECIAL_PROBABILITY, random_value};
use crate::valuation::SlotValuation;

pub use build::{BuildError, BuildSummary, MAX_CLASS_SIZE, OracleBuildConfig, build_oracle, compile_corpus};
pub use corpus::parse_corpus_line;
pub use format::{Header, write_oracle};
pub use lazy::LazyOracle;
pub use memory::EquivalenceClasses;

/// Number of inputs of every test vector, and so the largest number of
/// variables an oracle expression can have.
pub const INPUTS_PER_VECTOR: usize = 5;

/// Default number of test vectors of a new oracle.
pub const NUM_TEST_VECTORS: usize = 128;

/// Largest number of fingerprints computed for one expression.
pub const MAX_FINGERPRINTS: usize = 50;

/// Largest number of candidates returned for one expression.
pub const MAX_CANDIDATES: usize = 10;

const FNV_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// The inputs on which fingerprints are computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestVectors(pub Vec<[u64; INPUTS_PER_VECTOR]>);

impl TestVectors {
    /// `n` random vectors biased towards 0, 1 and all ones.
    pub fn random<R: Rng>(n: usize, rng: &mut R) -> Self {
        let vectors = (0..n)
            .map(|_| std::array::from_fn(|_| random_value(rng, Width::B8, SPECIAL_PROBABILITY)))
            .collect();
        Self(vectors)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// FNV-1a over the output words.
pub fn fingerprint_of_outputs<I: IntoIterator<Item = u64>>(outputs: I) -> u64 {
    outputs.into_iter().fold(FNV_BASIS, |sum, out| (sum ^ out).wrapping_mul(FNV_PRIME))
}

/// The fingerprint of `e` where `slots[i]` receives input `i` of every
/// vector. Placeholders without a slot read the input of their index.
pub fn fingerprint(e: &Expr, vectors: &TestVectors, slots: &[Variable]) -> Result<u64, EvalError> {
    let outputs = vectors.0.iter()
        .map(|inputs| evaluate(e, &mut SlotValuation { inputs, slots }))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(fingerprint_of_outputs(outputs))
}

/// Replaces the placeholders of an abstract expression with `vars` and
/// resizes the result to `width`.
pub fn instantiate(abstract_expr: &Expr, vars: &[Variable], width: Width) -> Option<Expr> {
    let ops: Vec<Operand> = vars.iter().cloned().map(Operand::from).collect();
    let e = abstract_expr.substitute_placeholders(&ops)?;
    Some(Operand::from(e).resize(width, false).into_expr().simplify())
}

/// A source of equivalence classes.
pub trait Oracle {
    fn test_vectors(&self) -> &TestVectors;

    /// The expressions with the given fingerprint, simplest first.
    fn find_equivalence_class(&mut self, fingerprint: u64) -> Option<&[Expr]>;

    /// Concrete expressions that have the same fingerprint as `e` under
    /// some assignment of its variables to the inputs.
    fn find_candidates(&mut self, e: &Expr) -> Vec<Expr> {
        let vars = e.vars();
        if vars.len() > INPUTS_PER_VECTOR {
            return Vec::new();
        }

        let mut seen = BTreeSet::new();
        let mut candidates = Vec::new();
        let n = vars.len();
        for perm in vars.into_iter().permutations(n).take(MAX_FINGERPRINTS) {
            let fp = match fingerprint(e, self.test_vectors(), &perm) {
                Ok(fp) => fp,
                Err(err) => {
                    log::debug!("can not fingerprint {e}: {err}");
                    return candidates;
                },
            };

            if !seen.insert(fp) {
                continue;
            }

            let Some(class) = self.find_equivalence_class(fp) else {
                continue;
            };

            log::trace!("fingerprint {fp:016x} matches {} expressions", class.len());
            for a in class {
                if let Some(c) = instantiate(a, &perm, e.width) {
                    candidates.push(c);
                }
                if candidates.len() >= MAX_CANDIDATES {
                    return candidates;
                }
            }
        }

        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn fnv_reference_values() {
        assert_eq!(fingerprint_of_outputs([]), FNV_BASIS);
        assert_eq!(fingerprint_of_outputs([0]), FNV_BASIS.wrapping_mul(FNV_PRIME));
        assert_ne!(fingerprint_of_outputs([1, 2]), fingerprint_of_outputs([2, 1]));
    }

    #[test]
    fn slots_and_placeholders_agree() {
        let mut rng = StdRng::seed_from_u64(3);
        let tv = TestVectors::random(16, &mut rng);
        let w = Width::B8;

        let abs = (Operand::placeholder(0, w) ^ Operand::placeholder(1, w)).into_expr();
        let e = Expr::from_string("a ^ b", w).unwrap();
        let vars = e.vars();
        assert_eq!(fingerprint(&abs, &tv, &[]).unwrap(), fingerprint(&e, &tv, &vars).unwrap());

        let narrow = Expr::from_string("a ^ b", Width::B4).unwrap();
        assert_ne!(fingerprint(&narrow, &tv, &narrow.vars()).unwrap(), fingerprint(&abs, &tv, &[]).unwrap());
        assert!(fingerprint(&e, &tv, &[]).is_err());
    }

    #[test]
    fn instantiation_resizes() {
        let abs = Operand::placeholder(1, Width::B8) - Operand::placeholder(0, Width::B8);
        let x = Variable::reg("x", Width::B4);
        let y = Variable::reg("y", Width::B4);
        let c = instantiate(&abs.clone().into_expr(), &[x.clone(), y.clone()], Width::B4).unwrap();
        assert_eq!(c.to_string(), "low32(zext64(y) - zext64(x))");
        assert!(instantiate(&abs.into_expr(), &[x], Width::B4).is_none());
    }
}
