use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::io::{self, Write};

use super::{Oracle, TestVectors, fingerprint, write_oracle};
use crate::codec::encode_expr;
use crate::emulator::EvalError;
use crate::expr::Expr;
use crate::heuristics::{NUM_TEST_CASES, SPECIAL_PROBABILITY};
use crate::verify::probably_equivalent;

/// Equivalence classes of abstract expressions, held in memory.
#[derive(Debug, Clone)]
pub struct EquivalenceClasses {
    vectors: TestVectors,

    /// Every class is sorted by complexity.
    classes: BTreeMap<u64, Vec<Expr>>,

    rng: StdRng,
}

impl EquivalenceClasses {
    pub fn new(vectors: TestVectors) -> Self {
        Self { vectors, classes: BTreeMap::new(), rng: StdRng::from_rng(&mut rand::rng()) }
    }

    /// Empty classes over `n` random test vectors.
    pub fn random<R: Rng>(n: usize, rng: &mut R) -> Self {
        let mut classes = Self::new(TestVectors::random(n, rng));
        classes.rng = StdRng::seed_from_u64(rng.random());
        classes
    }

    /// Adds an expression over the placeholders `p0..p4`.
    /// Returns `false` if an equivalent expression is already in its class.
    pub fn add_abstract(&mut self, e: Expr) -> Result<bool, EvalError> {
        let fp = fingerprint(&e, &self.vectors, &[])?;
        let class = self.classes.entry(fp).or_default();

        let rng = &mut self.rng;
        if class.iter().any(|c| probably_equivalent(c, &e, NUM_TEST_CASES, SPECIAL_PROBABILITY, rng)) {
            return Ok(false);
        }

        let pos = class.partition_point(|c| c.complexity() <= e.complexity());
        class.insert(pos, e);
        Ok(true)
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn num_exprs(&self) -> usize {
        self.classes.values().map(Vec::len).sum()
    }

    pub fn classes(&self) -> impl Iterator<Item = (u64, &[Expr])> {
        self.classes.iter().map(|(fp, c)| (*fp, c.as_slice()))
    }

    /// Writes the classes in the format read by [`super::LazyOracle`].
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let buckets = self.classes.iter()
            .map(|(fp, c)| (*fp, c.iter().map(encode_expr).collect()))
            .collect();
        write_oracle(w, &self.vectors, &buckets)
    }
}

impl Oracle for EquivalenceClasses {
    fn test_vectors(&self) -> &TestVectors {
        &self.vectors
    }

    fn find_equivalence_class(&mut self, fingerprint: u64) -> Option<&[Expr]> {
        self.classes.get(&fingerprint).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Operand, Width};

    fn p(i: u8) -> Operand {
        Operand::placeholder(i, Width::B8)
    }

    fn classes() -> EquivalenceClasses {
        EquivalenceClasses::random(64, &mut StdRng::seed_from_u64(5))
    }

    #[test]
    fn duplicates_are_dropped() {
        let mut c = classes();
        assert!(c.add_abstract(((p(0) & p(1)) + (p(0) ^ p(1))).into_expr()).unwrap());
        assert!(!c.add_abstract(((p(0) & p(1)) + (p(0) ^ p(1))).into_expr()).unwrap());

        // Equivalent, but spelled differently.
        assert!(!c.add_abstract((p(1) | p(0)).into_expr()).unwrap());
        assert!(c.add_abstract((p(0) - p(1)).into_expr()).unwrap());
        assert!(c.add_abstract((p(1) - p(0)).into_expr()).unwrap());

        assert_eq!(c.len(), 3);
        assert_eq!(c.num_exprs(), 3);
        assert!(c.classes().all(|(_, c)| c.len() == 1));

        let w = Operand::reg("x", Width::B8);
        assert!(c.add_abstract((w + p(0)).into_expr()).is_err());
    }

    #[test]
    fn candidates_are_instantiated() {
        let mut c = classes();
        c.add_abstract((p(0) ^ p(1)).into_expr()).unwrap();
        c.add_abstract((p(0) - p(1)).into_expr()).unwrap();

        let e = Expr::from_string("(x | y) - (x & y)", Width::B8).unwrap();
        let candidates = c.find_candidates(&e);
        assert_eq!(candidates.len(), 1);
        assert!(["x ^ y", "y ^ x"].contains(&candidates[0].to_string().as_str()));

        let e = Expr::from_string("(x & ~y) - (~x & y)", Width::B8).unwrap();
        let candidates = c.find_candidates(&e);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].to_string(), "x - y");

        let e = Expr::from_string("x * y", Width::B8).unwrap();
        assert!(c.find_candidates(&e).is_empty());

        let e = Expr::from_string("a + b + c + d + e + f", Width::B8).unwrap();
        assert!(c.find_candidates(&e).is_empty());
    }

    #[test]
    fn narrow_expressions() {
        let mut c = classes();
        let lo = |i| Operand::unary(crate::expr::Opcode::Low, p(i), Width::B4);
        c.add_abstract((lo(0) + lo(1)).into_expr()).unwrap();

        let e = Expr::from_string("(x | y) + (x & y)", Width::B4).unwrap();
        let candidates = c.find_candidates(&e);
        assert_eq!(candidates.len(), 1);
        assert!(["x + y", "y + x"].contains(&candidates[0].to_string().as_str()));
        assert_eq!(candidates[0].width, Width::B4);
    }
}
