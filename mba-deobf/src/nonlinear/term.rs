//! Terms of a flattened sum and merging of like terms.

use std::collections::{BTreeMap, BTreeSet};

use crate::expr::{Operand, Width};

use super::NonlinearError;
use super::rewrite::Node;

/// An operand of a conjunction, optionally negated arithmetically.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Atom {
    pub operand: Operand,
    pub negated: bool,
}

impl Atom {
    fn to_operand(&self) -> Operand {
        if self.negated { -self.operand.clone() } else { self.operand.clone() }
    }
}

/// The conjunction of its atoms. A single atom is just a variable.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Factor(pub BTreeSet<Atom>);

impl Factor {
    pub fn var(o: Operand) -> Self {
        Self(BTreeSet::from([Atom { operand: o, negated: false }]))
    }

    pub fn conj<I: IntoIterator<Item = Operand>>(ops: I) -> Self {
        Self(ops.into_iter().map(|operand| Atom { operand, negated: false }).collect())
    }

    /// The plain variable if this is a single non-negated atom.
    pub fn as_var(&self) -> Option<&Operand> {
        match self.0.first() {
            Some(a) if self.0.len() == 1 && !a.negated => Some(&a.operand),
            _ => None,
        }
    }

    pub fn to_operand(&self, w: Width) -> Operand {
        self.0.iter()
            .map(Atom::to_operand)
            .reduce(|a, b| a & b)
            .unwrap_or_else(|| Operand::ones(w))
    }
}

/// A product of factors with multiplicities. The empty product is one.
pub type Product = BTreeMap<Factor, u32>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Term {
    pub coeff: u64,
    pub product: Product,
}

impl Term {
    pub fn to_operand(&self, w: Width) -> Operand {
        let factors = self.product.iter()
            .flat_map(|(f, &k)| std::iter::repeat_n(f, k as usize))
            .map(|f| f.to_operand(w))
            .reduce(|a, b| a * b);

        match factors {
            Some(p) => p.scaled(self.coeff),
            None => Operand::constant(self.coeff, w),
        }
    }
}

/// Splits a flattened sum into its terms.
pub fn collect(n: Node, w: Width) -> Result<Vec<Term>, NonlinearError> {
    let mut terms = Vec::new();
    collect_into(n, false, w, &mut terms)?;
    terms.reverse();
    Ok(terms)
}

fn collect_into(n: Node, negate: bool, w: Width, terms: &mut Vec<Term>) -> Result<(), NonlinearError> {
    let mut n = n;
    loop {
        let (rest, term, neg) = match n {
            Node::Add(l, r) => (*l, *r, negate),
            Node::Sub(l, r) => (*l, *r, !negate),
            n => {
                terms.push(classify(n, negate, w)?);
                return Ok(());
            },
        };

        if matches!(term, Node::Add(..) | Node::Sub(..)) {
            collect_into(term, neg, w, terms)?;
        } else {
            terms.push(classify(term, neg, w)?);
        }
        n = rest;
    }
}

fn classify(n: Node, negate: bool, w: Width) -> Result<Term, NonlinearError> {
    let mut t = Term { coeff: 1, product: Product::new() };
    product(n, w, &mut t)?;
    if negate {
        t.coeff = t.coeff.wrapping_neg();
    }
    t.coeff = w.truncate(t.coeff);
    Ok(t)
}

fn product(n: Node, w: Width, t: &mut Term) -> Result<(), NonlinearError> {
    match n {
        Node::Const(c) => t.coeff = t.coeff.wrapping_mul(c),
        Node::Leaf(o) => *t.product.entry(Factor::var(o)).or_default() += 1,
        Node::Neg(a) => {
            product(*a, w, t)?;
            t.coeff = t.coeff.wrapping_neg();
        },
        Node::Mul(l, r) => {
            product(*l, w, t)?;
            product(*r, w, t)?;
        },
        n @ Node::And(..) => {
            let mut atoms = BTreeSet::new();
            conjunction(n, false, w, &mut atoms)?;
            *t.product.entry(Factor(atoms)).or_default() += 1;
        },
        _ => return Err(NonlinearError::NotNormalizable),
    }
    Ok(())
}

fn conjunction(n: Node, negated: bool, w: Width, atoms: &mut BTreeSet<Atom>) -> Result<(), NonlinearError> {
    match n {
        Node::And(l, r) if !negated => {
            conjunction(*l, false, w, atoms)?;
            conjunction(*r, false, w, atoms)?;
        },
        Node::Neg(a) => conjunction(*a, !negated, w, atoms)?,
        Node::Const(c) => {
            let c = if negated { c.wrapping_neg() } else { c };
            atoms.insert(Atom { operand: Operand::constant(c, w), negated: false });
        },
        Node::Leaf(operand) => drop(atoms.insert(Atom { operand, negated })),
        _ => return Err(NonlinearError::NotNormalizable),
    }
    Ok(())
}

/// Adds up the coefficients of equal products and drops the ones that
/// cancel. The constant is the coefficient of the empty product.
pub fn merge(terms: Vec<Term>, w: Width) -> BTreeMap<Product, u64> {
    let mut merged: BTreeMap<Product, u64> = BTreeMap::new();
    for t in terms {
        let c = merged.entry(t.product).or_default();
        *c = w.truncate(c.wrapping_add(t.coeff));
    }
    merged.retain(|_, c| *c != 0);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::nonlinear::rewrite::{distribute, flatten};

    fn terms(s: &str) -> Result<Vec<Term>, NonlinearError> {
        let e = Expr::from_string(s, Width::B8).unwrap();
        let n = flatten(distribute(Node::from_expr(&e), &mut 0)?);
        collect(n, Width::B8)
    }

    fn x() -> Operand {
        Operand::reg("x", Width::B8)
    }

    fn y() -> Operand {
        Operand::reg("y", Width::B8)
    }

    #[test]
    fn terms_in_order() {
        let t = terms("3 * x - y * x + 2 * (x & y) - 5").unwrap();
        assert_eq!(t.len(), 4);
        assert_eq!(t[0].coeff, 3);
        assert_eq!(t[0].product, Product::from([(Factor::var(x()), 1)]));
        assert_eq!(t[1].coeff, 1u64.wrapping_neg());
        assert_eq!(t[1].product.len(), 2);
        assert_eq!(t[2].product, Product::from([(Factor::conj([x(), y()]), 1)]));
        assert_eq!(t[3].coeff, 5u64.wrapping_neg());
        assert!(t[3].product.is_empty());
    }

    #[test]
    fn like_terms_merge() {
        let t = terms("x * y + 2 * (y & x) - y * x + x * x - (x & y)").unwrap();
        let m = merge(t, Width::B8);
        assert_eq!(m.len(), 2);
        assert_eq!(m[&Product::from([(Factor::conj([x(), y()]), 1)])], 1);
        assert_eq!(m[&Product::from([(Factor::var(x()), 2)])], 1);

        let m = merge(terms("x - x + 3 - 3").unwrap(), Width::B8);
        assert!(m.is_empty());
    }

    #[test]
    fn negated_atoms() {
        let t = terms("(-x) & y").unwrap();
        let f = t[0].product.keys().next().unwrap();
        assert!(f.0.contains(&Atom { operand: x(), negated: true }));
        assert!(f.as_var().is_none());
        assert_eq!(f.to_operand(Width::B8).to_string(), "-x & y");
    }

    #[test]
    fn sums_in_conjunctions_are_rejected() {
        assert_eq!(terms("(x + y) & x").unwrap_err(), NonlinearError::NotNormalizable);
    }
}
