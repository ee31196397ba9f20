//! Matches groups of merged terms against the right hand sides of the
//! normalization rules and turns them back into bitwise operations.

use std::collections::BTreeMap;

use crate::expr::{Operand, Width};

use super::term::{Factor, Product};

/// A bitwise function of one or two variables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BoolFn {
    Xor(Operand, Operand),
    Or(Operand, Operand),

    /// `~x & y`
    AndNot(Operand, Operand),

    /// `~(x | y)`
    Nor(Operand, Operand),

    /// `~(x ^ y)`
    Xnor(Operand, Operand),

    /// `~(x & y)`
    Nand(Operand, Operand),

    /// `~x | y`
    OrNot(Operand, Operand),

    Not(Operand),
}

impl BoolFn {
    pub fn to_operand(&self) -> Operand {
        let c = Operand::clone;
        match self {
            BoolFn::Xor(x, y) => c(x) ^ c(y),
            BoolFn::Or(x, y) => c(x) | c(y),
            BoolFn::AndNot(x, y) => !c(x) & c(y),
            BoolFn::Nor(x, y) => !(c(x) | c(y)),
            BoolFn::Xnor(x, y) => !(c(x) ^ c(y)),
            BoolFn::Nand(x, y) => !(c(x) & c(y)),
            BoolFn::OrNot(x, y) => !c(x) | c(y),
            BoolFn::Not(x) => !c(x),
        }
    }
}

/// `coeff * func`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Residual {
    pub coeff: u64,
    pub func: BoolFn,
}

impl Residual {
    pub fn to_operand(&self) -> Operand {
        self.func.to_operand().scaled(self.coeff)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pattern {
    Xor,
    Or,
    AndNot { swap: bool },
    Nor,
    Xnor,
    Nand,
    OrNot { swap: bool },
}

impl Pattern {
    fn uses_constant(self) -> bool {
        matches!(self, Pattern::Nor | Pattern::Xnor | Pattern::Nand | Pattern::OrNot { .. })
    }

    fn build(self, x: Operand, y: Operand) -> BoolFn {
        match self {
            Pattern::Xor => BoolFn::Xor(x, y),
            Pattern::Or => BoolFn::Or(x, y),
            Pattern::AndNot { swap: false } => BoolFn::AndNot(x, y),
            Pattern::AndNot { swap: true } => BoolFn::AndNot(y, x),
            Pattern::Nor => BoolFn::Nor(x, y),
            Pattern::Xnor => BoolFn::Xnor(x, y),
            Pattern::Nand => BoolFn::Nand(x, y),
            Pattern::OrNot { swap: false } => BoolFn::OrNot(x, y),
            Pattern::OrNot { swap: true } => BoolFn::OrNot(y, x),
        }
    }
}

/// Finds the pattern with multiplier `k` whose coefficients of `x`, `y`,
/// `x & y` and one are exactly the given ones. Patterns with a constant
/// only match if the constant is used up completely.
fn match_pair(cx: u64, cy: u64, cxy: u64, c0: u64, w: Width) -> Option<(Pattern, u64)> {
    let neg = |v: u64| w.truncate(v.wrapping_neg());
    let dbl = |v: u64| w.truncate(v.wrapping_mul(2));

    if cxy == 0 {
        return None;
    }

    // -k * x - k * y + ... - k
    if cx == cy && cx != 0 && c0 == cx {
        let k = neg(cx);
        if cxy == k {
            return Some((Pattern::Nor, k));
        }
        if cxy == dbl(k) {
            return Some((Pattern::Xnor, k));
        }
    }

    if cx == 0 && cy == 0 && c0 == cxy {
        return Some((Pattern::Nand, neg(cxy)));
    }

    if cy == 0 && cx != 0 && c0 == cx && cxy == neg(cx) {
        return Some((Pattern::OrNot { swap: false }, cxy));
    }

    if cx == 0 && cy != 0 && c0 == cy && cxy == neg(cy) {
        return Some((Pattern::OrNot { swap: true }, cxy));
    }

    if cx == cy && cx != 0 {
        if cxy == neg(dbl(cx)) {
            return Some((Pattern::Xor, cx));
        }
        if cxy == neg(cx) {
            return Some((Pattern::Or, cx));
        }
    }

    if cx == 0 && cxy == neg(cy) {
        return Some((Pattern::AndNot { swap: false }, cy));
    }

    if cy == 0 && cxy == neg(cx) {
        return Some((Pattern::AndNot { swap: true }, cx));
    }

    None
}

/// Replaces groups of terms that are the expansion of a bitwise operation
/// of two variables, or of the negation of one variable, by that operation.
/// Variables are paired up in the order given by `vars`.
pub fn reverse_match(merged: &mut BTreeMap<Product, u64>, vars: &[Operand], w: Width) -> Vec<Residual> {
    let single = |x: &Operand| Product::from([(Factor::var(x.clone()), 1)]);
    let pair = |x: &Operand, y: &Operand| Product::from([(Factor::conj([x.clone(), y.clone()]), 1)]);
    let constant = Product::new();

    let mut residuals = Vec::new();
    for (i, x) in vars.iter().enumerate() {
        for y in &vars[i + 1..] {
            let coeff = |m: &BTreeMap<Product, u64>, p: &Product| m.get(p).copied().unwrap_or(0);
            let (px, py, pxy) = (single(x), single(y), pair(x, y));
            let cx = coeff(merged, &px);
            let cy = coeff(merged, &py);
            let cxy = coeff(merged, &pxy);
            let c0 = coeff(merged, &constant);

            let Some((pattern, k)) = match_pair(cx, cy, cxy, c0, w) else {
                continue;
            };

            log::trace!("{x} and {y} match {pattern:?} with multiplier {k}");
            merged.remove(&px);
            merged.remove(&py);
            merged.remove(&pxy);
            if pattern.uses_constant() {
                merged.remove(&constant);
            }
            residuals.push(Residual { coeff: k, func: pattern.build(x.clone(), y.clone()) });
        }
    }

    // -k * x - k = k * ~x
    for x in vars {
        let px = single(x);
        let (Some(&cx), Some(&c0)) = (merged.get(&px), merged.get(&constant)) else {
            continue;
        };
        if cx == c0 {
            merged.remove(&px);
            merged.remove(&constant);
            residuals.push(Residual { coeff: w.truncate(cx.wrapping_neg()), func: BoolFn::Not(x.clone()) });
        }
    }

    residuals
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: Width = Width::B8;

    fn neg(v: u64) -> u64 {
        v.wrapping_neg()
    }

    #[test]
    fn pair_patterns() {
        assert_eq!(match_pair(1, 1, neg(2), 0, W), Some((Pattern::Xor, 1)));
        assert_eq!(match_pair(3, 3, neg(3), 0, W), Some((Pattern::Or, 3)));
        assert_eq!(match_pair(0, 5, neg(5), 7, W), Some((Pattern::AndNot { swap: false }, 5)));
        assert_eq!(match_pair(5, 0, neg(5), 0, W), Some((Pattern::AndNot { swap: true }, 5)));
        assert_eq!(match_pair(neg(1), neg(1), 1, neg(1), W), Some((Pattern::Nor, 1)));
        assert_eq!(match_pair(neg(2), neg(2), 4, neg(2), W), Some((Pattern::Xnor, 2)));
        assert_eq!(match_pair(0, 0, neg(1), neg(1), W), Some((Pattern::Nand, 1)));
        assert_eq!(match_pair(neg(1), 0, 1, neg(1), W), Some((Pattern::OrNot { swap: false }, 1)));
    }

    #[test]
    fn constants_must_match_exactly() {
        // -x - y + (x & y) - 2 is not a nor, but -(x | y) - 2.
        assert_eq!(match_pair(neg(1), neg(1), 1, neg(2), W), Some((Pattern::Or, neg(1))));
        assert_eq!(match_pair(0, 0, neg(1), 0, W), None);
        assert_eq!(match_pair(1, 2, 3, 0, W), None);
    }
}
