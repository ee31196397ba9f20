//! Bitwise expressions ([`BExpr`]): expressions whose bit `i` depends only on
//! the bits `i` of the variables.

use std::collections::BTreeSet;

use crate::expr::{Operand, Width};

/// Represents an expression whose value bit `i` depends only on the values of
/// bits `i` of the variables. Variables are referred to by their index.
///
/// Note that the variant 'Ones' does not equal 1, but a 1 in every bit,
/// which is -1 in two's complement.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BExpr {
    Ones,
    Var(u8),
    And(Box<Self>, Box<Self>),
    Or(Box<Self>, Box<Self>),
    Xor(Box<Self>, Box<Self>),
    Not(Box<Self>),
}

impl BExpr {
    pub fn zero() -> Self {
        Self::not(Self::Ones)
    }

    pub fn and(l: Self, r: Self) -> Self {
        Self::And(l.into(), r.into())
    }

    pub fn or(l: Self, r: Self) -> Self {
        Self::Or(l.into(), r.into())
    }

    pub fn xor(l: Self, r: Self) -> Self {
        Self::Xor(l.into(), r.into())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(e: Self) -> Self {
        Self::Not(e.into())
    }

    /// Is the topmost operator a unary operator?
    /// If there is no operator (i.e. it is [`BExpr::Ones`] or [`BExpr::Var`])
    /// then this return `true`.
    pub fn is_topmost_unary(&self) -> bool {
        matches!(self, Self::Ones | Self::Var(_) | Self::Not(_))
    }

    /// Returns the indices of all variables in the expression.
    pub fn vars(&self) -> BTreeSet<u8> {
        let mut v = BTreeSet::new();
        self.vars_impl(&mut v);
        v
    }

    fn vars_impl(&self, v: &mut BTreeSet<u8>) {
        use BExpr::*;
        match self {
            Ones => {},
            Var(i) => drop(v.insert(*i)),
            And(e1, e2) | Or(e1, e2) | Xor(e1, e2) => {
                e1.vars_impl(v);
                e2.vars_impl(v);
            },
            Not(e) => e.vars_impl(v),
        }
    }

    /// Evaluates the expression on 64-bit words, where
    /// variable `i` has the value `vals[i]`. Missing variables are zero.
    pub fn eval(&self, vals: &[u64]) -> u64 {
        use BExpr::*;
        match self {
            Ones => u64::MAX,
            Var(i) => vals.get(*i as usize).copied().unwrap_or(0),
            And(l, r) => l.eval(vals) & r.eval(vals),
            Or(l, r) => l.eval(vals) | r.eval(vals),
            Xor(l, r) => l.eval(vals) ^ r.eval(vals),
            Not(e) => !e.eval(vals),
        }
    }

    /// The truth table of the expression over `n <= 6` variables.
    /// Bit `i` of the result is the value for the assignment where
    /// variable `j` is bit `j` of `i`.
    pub fn truth_table(&self, n: usize) -> u64 {
        debug_assert!(n <= 6);
        // Variable `j` as a 64-bit word is the column of bit `j` of the row index.
        let cols: Vec<u64> = (0..n)
            .map(|j| (0..1u64 << n).filter(|i| (i >> j) & 1 == 1).fold(0, |acc, i| acc | 1 << i))
            .collect();
        let rows = if n == 6 { u64::MAX } else { (1u64 << (1 << n)) - 1 };
        self.eval(&cols) & rows
    }

    /// Returns some sort of complexity measure of the expression.
    /// This is the number of operations.
    pub fn complexity(&self) -> usize {
        use BExpr::*;
        match self {
            Ones | Var(_) => 0,
            And(l, r) | Or(l, r) | Xor(l, r) => l.complexity() + r.complexity() + 1,
            Not(e) => e.complexity() + 1,
        }
    }

    /// Builds the expression over concrete operands.
    /// Variable `i` is replaced by `vars[i]` resized to `width`.
    /// Returns `None` if a variable index is out of range.
    pub fn to_operand(&self, vars: &[Operand], width: Width) -> Option<Operand> {
        use BExpr::*;
        Some(match self {
            Ones => Operand::ones(width),
            Var(i) => vars.get(*i as usize)?.clone().resize(width, false),
            And(l, r) => l.to_operand(vars, width)? & r.to_operand(vars, width)?,
            Or(l, r) => l.to_operand(vars, width)? | r.to_operand(vars, width)?,
            Xor(l, r) => l.to_operand(vars, width)? ^ r.to_operand(vars, width)?,
            Not(e) => !e.to_operand(vars, width)?,
        })
    }

    /// Parse a string to an expression.
    /// Variables are the letters `a` to `z`, `1` is [`BExpr::Ones`].
    pub fn from_string(mut s: String) -> Result<Self, String> {
        s.retain(|c| !matches!(c, ' ' | '\t' | '\n'));
        let mut it = s.chars().peekable();

        let e = Self::parse(&mut it, 0)?;
        match it.next() {
            None => Ok(e),
            Some(c) => Err(format!("Unexpected character '{c}'")),
        }
    }

    fn parse(
        it: &mut std::iter::Peekable<std::str::Chars>,
        pre: usize
    ) -> Result<Self, String> {
        use BExpr::*;

        let c = *it.peek().ok_or("Unexpected end of input")?;

        let mut e = if c == '(' {
            it.next();
            let e = Self::parse(it, 0)?;
            match it.next() {
                Some(')') => e,
                _ => return Err("Expected closing parenthesis".to_string()),
            }
        } else if c == '~' || c == '!' {
            it.next();
            let e = Self::parse(it, 15)?;
            Not(Box::new(e))
        } else if c.is_ascii_lowercase() {
            it.next();
            Var(c as u8 - b'a')
        } else if c == '1' {
            it.next();
            Ones
        } else if c == '0' {
            it.next();
            Self::zero()
        } else {
            return Err(format!("Unexpected character '{c}'"));
        };

        loop {
            let c = match it.peek() {
                None => return Ok(e),
                Some(c) => *c,
            };

            let op_pre = match c {
                '|' => 1,
                '^' => 2,
                '&' => 3,
                _ => return Ok(e),
            };

            if op_pre <= pre {
                return Ok(e);
            }

            // If the current operators precedence is higher than
            // the one whose subexpressions we are currently parsing
            // then we need to finish this operator first.
            it.next();
            let rhs = Box::new(Self::parse(it, op_pre)?);
            let lhs = Box::new(e);
            e = match c {
                '&' => And(lhs, rhs),
                '|' => Or(lhs, rhs),
                _ => Xor(lhs, rhs),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::valuation::Assignment;

    fn parse(s: &str) -> BExpr {
        BExpr::from_string(s.to_owned()).unwrap()
    }

    #[test]
    fn truth_tables() {
        assert_eq!(parse("a").truth_table(1), 0b10);
        assert_eq!(parse("a").truth_table(2), 0b1010);
        assert_eq!(parse("b").truth_table(2), 0b1100);
        assert_eq!(parse("a & b").truth_table(2), 0b1000);
        assert_eq!(parse("a ^ b").truth_table(2), 0b0110);
        assert_eq!(parse("~a").truth_table(1), 0b01);
        assert_eq!(parse("1").truth_table(3), 0xff);
        assert_eq!(parse("0").truth_table(3), 0);
        assert_eq!(parse("a | f").truth_table(6).count_ones(), 48);
    }

    #[test]
    fn parse_and_complexity() {
        let e = parse("~a & (b | c)");
        assert_eq!(e.complexity(), 3);
        assert_eq!(e.vars().into_iter().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(BExpr::from_string("a &".to_owned()).is_err());
        assert!(BExpr::from_string("a b".to_owned()).is_err());
    }

    #[test]
    fn operands_evaluate_like_words() {
        let e = parse("(a ^ ~b) | c & a");
        let vars: Vec<_> = ["x", "y", "z"].iter().map(|n| Operand::reg(*n, Width::B8)).collect();
        let o = e.to_operand(&vars, Width::B8).unwrap().into_expr();
        let vals = [0x1234_5678_9abc_def0u64, 0x0f0f_0f0f_f0f0_f0f0, 0xdead_beef_0000_ffff];
        let mut v = Assignment::from_vec(
            vars.iter()
                .zip(vals)
                .map(|(o, x)| match o {
                    Operand::Var(v) => (v.clone(), x),
                    _ => unreachable!(),
                })
                .collect(),
        );
        assert_eq!(o.eval(&mut v).unwrap(), e.eval(&vals));
        assert!(e.to_operand(&vars[..2], Width::B8).is_none());
    }
}
