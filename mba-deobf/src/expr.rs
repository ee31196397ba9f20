//! The expression IR.
//!
//! An [`Expr`] is an owned tree of fixed-width integer operations. Leaves are
//! [`Operand`]s: constants, variables or nested expressions. Every node carries
//! its destination [`Width`] and all values are truncated to that width.

use std::collections::BTreeSet;
use std::iter::Peekable;
use std::str::CharIndices;

use thiserror::Error;

use crate::Symbol;

/// Width of a value in bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Width {
    B1 = 1,
    B2 = 2,
    B4 = 4,
    B8 = 8,
}

impl Width {
    pub const ALL: [Width; 4] = [Width::B1, Width::B2, Width::B4, Width::B8];

    pub fn from_bytes(bytes: u8) -> Option<Self> {
        match bytes {
            1 => Some(Self::B1),
            2 => Some(Self::B2),
            4 => Some(Self::B4),
            8 => Some(Self::B8),
            _ => None,
        }
    }

    pub fn from_bits(bits: u32) -> Option<Self> {
        if bits % 8 != 0 {
            return None;
        }
        u8::try_from(bits / 8).ok().and_then(Self::from_bytes)
    }

    pub fn bytes(self) -> u8 {
        self as u8
    }

    pub fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }

    /// All ones at this width, i.e. `-1`.
    pub fn mask(self) -> u64 {
        match self {
            Self::B8 => u64::MAX,
            _ => (1u64 << self.bits()) - 1,
        }
    }

    pub fn truncate(self, v: u64) -> u64 {
        v & self.mask()
    }

    /// Interprets the low bits of `v` as a two's complement number.
    pub fn sign_extend(self, v: u64) -> i64 {
        let shift = 64 - self.bits();
        ((v << shift) as i64) >> shift
    }
}

/// Identity of a storage location.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum VarKind {
    /// A register-like location.
    Reg(Symbol),

    /// A stack slot at the given frame offset.
    Stack(i64),

    /// A global at the given address.
    Global(u64),

    /// Abstract input `i` of a template or an oracle expression.
    Placeholder(u8),
}

/// A variable is a storage location of a given width.
/// The same location at two different widths is two different variables.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Variable {
    pub kind: VarKind,
    pub width: Width,
}

impl Variable {
    pub fn reg<T: Into<Symbol>>(name: T, width: Width) -> Self {
        Self { kind: VarKind::Reg(name.into()), width }
    }

    pub fn placeholder(idx: u8, width: Width) -> Self {
        Self { kind: VarKind::Placeholder(idx), width }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.kind, VarKind::Placeholder(_))
    }
}

/// The operations of the IR.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Opcode {
    Mov,
    Neg,
    BNot,
    LNot,
    Sext,
    Zext,
    Low,
    High,
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    UMod,
    SMod,
    Or,
    And,
    Xor,
    Shl,
    Shr,
    Sar,
    SetEq,
    SetNe,
    SetUlt,
    SetUle,
    SetUgt,
    SetUge,
    SetSlt,
    SetSle,
    SetSgt,
    SetSge,
    SetSign,
}

impl Opcode {
    /// All opcodes. The position in this array is the serialized code.
    pub const ALL: [Opcode; 32] = [
        Opcode::Mov, Opcode::Neg, Opcode::BNot, Opcode::LNot,
        Opcode::Sext, Opcode::Zext, Opcode::Low, Opcode::High,
        Opcode::Add, Opcode::Sub, Opcode::Mul, Opcode::UDiv,
        Opcode::SDiv, Opcode::UMod, Opcode::SMod, Opcode::Or,
        Opcode::And, Opcode::Xor, Opcode::Shl, Opcode::Shr,
        Opcode::Sar, Opcode::SetEq, Opcode::SetNe, Opcode::SetUlt,
        Opcode::SetUle, Opcode::SetUgt, Opcode::SetUge, Opcode::SetSlt,
        Opcode::SetSle, Opcode::SetSgt, Opcode::SetSge, Opcode::SetSign,
    ];

    pub fn code(self) -> u8 {
        // `ALL` lists the variants in declaration order.
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    pub fn is_unary(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Mov | Neg | BNot | LNot | Sext | Zext | Low | High | SetSign
        )
    }

    /// Operations that are counted as arithmetic by the MBA heuristic.
    pub fn is_arith(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Neg | Add | Sub | Mul | UDiv | SDiv | UMod | SMod | Shl | Shr | Sar
        )
    }

    /// Operations that are counted as bitwise boolean by the MBA heuristic.
    pub fn is_bool(self) -> bool {
        use Opcode::*;
        matches!(self, BNot | Or | And | Xor)
    }

    pub fn is_set(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            SetEq | SetNe | SetUlt | SetUle | SetUgt | SetUge
            | SetSlt | SetSle | SetSgt | SetSge | SetSign
        )
    }

    pub fn is_shift(self) -> bool {
        matches!(self, Opcode::Shl | Opcode::Shr | Opcode::Sar)
    }

    /// Binary operations whose operands are interpreted as signed.
    pub fn is_signed(self) -> bool {
        use Opcode::*;
        matches!(self, SDiv | SMod | SetSlt | SetSle | SetSgt | SetSge)
    }

    pub fn is_commutative(self) -> bool {
        use Opcode::*;
        matches!(self, Add | Mul | Or | And | Xor | SetEq | SetNe)
    }

    /// Short lowercase name, used by the formatter and in logs.
    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Mov => "mov",
            Neg => "neg",
            BNot => "bnot",
            LNot => "lnot",
            Sext => "sext",
            Zext => "zext",
            Low => "low",
            High => "high",
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            UDiv => "udiv",
            SDiv => "sdiv",
            UMod => "umod",
            SMod => "smod",
            Or => "or",
            And => "and",
            Xor => "xor",
            Shl => "shl",
            Shr => "shr",
            Sar => "sar",
            SetEq => "seteq",
            SetNe => "setne",
            SetUlt => "setult",
            SetUle => "setule",
            SetUgt => "setugt",
            SetUge => "setuge",
            SetSlt => "setslt",
            SetSle => "setsle",
            SetSgt => "setsgt",
            SetSge => "setsge",
            SetSign => "setsign",
        }
    }
}

/// A leaf or a nested expression.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Operand {
    Const { value: u64, width: Width },
    Var(Variable),
    Nested(Box<Expr>),
}

/// A node of the IR. Unary operations have `r == None`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Expr {
    pub op: Opcode,
    pub l: Operand,
    pub r: Option<Operand>,
    pub width: Width,
}

impl Operand {
    /// A constant, truncated to `width`.
    pub fn constant(value: u64, width: Width) -> Self {
        Self::Const { value: width.truncate(value), width }
    }

    pub fn zero(width: Width) -> Self {
        Self::constant(0, width)
    }

    pub fn ones(width: Width) -> Self {
        Self::constant(u64::MAX, width)
    }

    pub fn reg<T: Into<Symbol>>(name: T, width: Width) -> Self {
        Self::Var(Variable::reg(name, width))
    }

    pub fn placeholder(idx: u8, width: Width) -> Self {
        Self::Var(Variable::placeholder(idx, width))
    }

    pub fn width(&self) -> Width {
        match self {
            Self::Const { width, .. } => *width,
            Self::Var(v) => v.width,
            Self::Nested(e) => e.width,
        }
    }

    pub fn as_const(&self) -> Option<u64> {
        match self {
            Self::Const { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Self::Const { .. })
    }

    /// Is this the constant `v` (after truncation to the operand's width)?
    pub fn is_const_value(&self, v: u64) -> bool {
        matches!(self, Self::Const { value, width } if *value == width.truncate(v))
    }

    pub fn as_expr(&self) -> Option<&Expr> {
        match self {
            Self::Nested(e) => Some(e),
            _ => None,
        }
    }

    /// Number of operations in the operand.
    pub fn complexity(&self) -> usize {
        match self {
            Self::Nested(e) => e.complexity(),
            _ => 0,
        }
    }

    /// Builds a unary operation on this operand.
    pub fn unary(op: Opcode, l: Operand, width: Width) -> Self {
        Self::Nested(Box::new(Expr { op, l, r: None, width }))
    }

    /// Builds a binary operation whose width is the width of `l`.
    pub fn binary(op: Opcode, l: Operand, r: Operand) -> Self {
        let width = l.width();
        Self::Nested(Box::new(Expr { op, l, r: Some(r), width }))
    }

    /// Changes the width of the operand, truncating or extending as needed.
    pub fn resize(self, width: Width, signed: bool) -> Self {
        let w = self.width();
        if w == width {
            self
        } else if let Self::Const { value, width: cw } = self {
            let v = if signed { cw.sign_extend(value) as u64 } else { value };
            Self::constant(v, width)
        } else if width < w {
            Self::unary(Opcode::Low, self, width)
        } else if signed {
            Self::unary(Opcode::Sext, self, width)
        } else {
            Self::unary(Opcode::Zext, self, width)
        }
    }

    /// `coeff * self`, leaving the cleanup of trivial coefficients to
    /// [`Expr::simplify`].
    pub fn scaled(self, coeff: u64) -> Self {
        let w = self.width();
        Self::binary(Opcode::Mul, Self::constant(coeff, w), self)
    }

    /// Sums up the given operands. The empty sum is zero.
    pub fn sum<I: IntoIterator<Item = Operand>>(width: Width, terms: I) -> Self {
        terms.into_iter()
            .reduce(|acc, t| acc + t)
            .unwrap_or_else(|| Self::zero(width))
    }

    /// Turns the operand into an expression tree.
    /// Leaves are wrapped in a [`Opcode::Mov`].
    pub fn into_expr(self) -> Expr {
        match self {
            Self::Nested(e) => *e,
            other => {
                let width = other.width();
                Expr { op: Opcode::Mov, l: other, r: None, width }
            },
        }
    }

    pub(crate) fn vars_impl(&self, v: &mut BTreeSet<Variable>) {
        match self {
            Self::Const { .. } => {},
            Self::Var(var) => drop(v.insert(var.clone())),
            Self::Nested(e) => e.vars_impl(v),
        }
    }
}

impl From<Expr> for Operand {
    fn from(e: Expr) -> Self {
        Self::Nested(Box::new(e))
    }
}

impl From<Variable> for Operand {
    fn from(v: Variable) -> Self {
        Self::Var(v)
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl std::ops::$trait for Operand {
            type Output = Operand;

            fn $method(self, rhs: Operand) -> Operand {
                Operand::binary($op, self, rhs)
            }
        }
    };
}

impl_binary_op!(Add, add, Opcode::Add);
impl_binary_op!(Sub, sub, Opcode::Sub);
impl_binary_op!(Mul, mul, Opcode::Mul);
impl_binary_op!(BitAnd, bitand, Opcode::And);
impl_binary_op!(BitOr, bitor, Opcode::Or);
impl_binary_op!(BitXor, bitxor, Opcode::Xor);

impl std::ops::Neg for Operand {
    type Output = Operand;

    fn neg(self) -> Operand {
        let w = self.width();
        Operand::unary(Opcode::Neg, self, w)
    }
}

/// Bitwise not.
impl std::ops::Not for Operand {
    type Output = Operand;

    fn not(self) -> Operand {
        let w = self.width();
        Operand::unary(Opcode::BNot, self, w)
    }
}

impl Expr {
    pub fn unary(op: Opcode, l: Operand, width: Width) -> Self {
        Self { op, l, r: None, width }
    }

    pub fn binary(op: Opcode, l: Operand, r: Operand) -> Self {
        let width = l.width();
        Self { op, l, r: Some(r), width }
    }

    /// Iterates over the one or two operands.
    pub fn operands(&self) -> impl Iterator<Item = &Operand> {
        std::iter::once(&self.l).chain(self.r.as_ref())
    }

    /// The complexity of an expression is the number of operations in it.
    /// A plain `mov` of a leaf counts as one.
    pub fn complexity(&self) -> usize {
        1 + self.operands().map(Operand::complexity).sum::<usize>()
    }

    /// Returns all variables in the expression, sorted and without duplicates.
    pub fn vars(&self) -> Vec<Variable> {
        let mut v = BTreeSet::new();
        self.vars_impl(&mut v);
        v.into_iter().collect()
    }

    pub(crate) fn vars_impl(&self, v: &mut BTreeSet<Variable>) {
        self.l.vars_impl(v);
        if let Some(r) = &self.r {
            r.vars_impl(v);
        }
    }

    /// Counts the operations that satisfy `pred`.
    pub fn count_ops(&self, pred: &impl Fn(Opcode) -> bool) -> usize {
        let here = pred(self.op) as usize;
        here + self.operands()
            .filter_map(Operand::as_expr)
            .map(|e| e.count_ops(pred))
            .sum::<usize>()
    }

    /// Replaces every placeholder `p_i` with `vars[i]`, resized to the
    /// placeholder's width. Returns `None` if some index is out of range.
    pub fn substitute_placeholders(&self, vars: &[Operand]) -> Option<Expr> {
        fn subst(o: &Operand, vars: &[Operand]) -> Option<Operand> {
            Some(match o {
                Operand::Var(Variable { kind: VarKind::Placeholder(i), width }) => {
                    vars.get(*i as usize)?.clone().resize(*width, false)
                },
                Operand::Nested(e) => Operand::from(e.substitute_placeholders(vars)?),
                other => other.clone(),
            })
        }

        Some(Expr {
            op: self.op,
            l: subst(&self.l, vars)?,
            r: match &self.r {
                Some(r) => Some(subst(r, vars)?),
                None => None,
            },
            width: self.width,
        })
    }

    /// Returns the precedence of the operator when printed in infix form.
    /// All binary operators are left associative.
    pub(crate) fn precedence(&self) -> usize {
        use Opcode::*;
        match self.op {
            Or => 1,
            Xor => 2,
            And => 3,
            Shl | Shr => 4,
            Add | Sub => 5,
            Mul | UDiv | UMod => 6,
            Neg | BNot | LNot => 15,
            _ => 16,
        }
    }

    /// Parse an expression in infix notation where every
    /// variable and constant has the given width.
    ///
    /// Supported are `| ^ & << >> + - * / %` and the unary `~ ! -`.
    /// `!` is logical not, so `!x` is `1` iff `x` is zero.
    ///
    /// ```
    /// use mba_deobf::expr::{Expr, Opcode, Width};
    ///
    /// let e = Expr::from_string("x & y + 3", Width::B4).unwrap();
    /// assert_eq!(e.op, Opcode::And);
    /// assert_eq!(e.complexity(), 2);
    /// ```
    pub fn from_string(s: &str, width: Width) -> Result<Expr, ParseError> {
        let mut p = InfixParser { it: s.char_indices().peekable(), len: s.len(), width };
        let e = p.parse(0)?;
        p.skip_ws();
        match p.it.peek() {
            None => Ok(e.into_expr()),
            Some(&(pos, c)) => Err(ParseError::new(pos, format!("unexpected character '{c}'"))),
        }
    }
}

/// A syntax error in an expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("at offset {pos}: {msg}")]
pub struct ParseError {
    pub pos: usize,
    pub msg: String,
}

impl ParseError {
    pub fn new(pos: usize, msg: impl Into<String>) -> Self {
        Self { pos, msg: msg.into() }
    }
}

struct InfixParser<'a> {
    it: Peekable<CharIndices<'a>>,
    len: usize,
    width: Width,
}

impl InfixParser<'_> {
    fn skip_ws(&mut self) {
        while self.it.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    fn pos(&mut self) -> usize {
        self.it.peek().map_or(self.len, |&(p, _)| p)
    }

    // pre 0: parse as much as possible
    // ...
    // pre 15: parse as little as possible
    fn parse(&mut self, pre: usize) -> Result<Operand, ParseError> {
        self.skip_ws();
        let pos = self.pos();
        let &(_, c) = self.it.peek()
            .ok_or_else(|| ParseError::new(pos, "unexpected end of input"))?;

        let mut e = if c == '(' {
            self.it.next();
            let e = self.parse(0)?;
            self.skip_ws();
            match self.it.next() {
                Some((_, ')')) => e,
                _ => return Err(ParseError::new(self.pos(), "expected closing parenthesis")),
            }
        } else if c == '~' {
            self.it.next();
            !self.parse(15)?
        } else if c == '!' {
            self.it.next();
            Operand::unary(Opcode::LNot, self.parse(15)?, self.width)
        } else if c == '-' {
            self.it.next();
            -self.parse(15)?
        } else if c.is_alphabetic() || c == '_' {
            let mut var = String::new();
            while let Some((_, c)) = self.it.next_if(|(_, c)| c.is_alphanumeric() || *c == '_') {
                var.push(c);
            }
            Operand::reg(var.as_str(), self.width)
        } else if c.is_ascii_digit() {
            let mut num = String::new();
            while let Some((_, c)) = self.it.next_if(|(_, c)| c.is_ascii_alphanumeric()) {
                num.push(c);
            }
            let value = parse_u64(&num)
                .ok_or_else(|| ParseError::new(pos, format!("invalid number '{num}'")))?;
            Operand::constant(value, self.width)
        } else {
            return Err(ParseError::new(pos, format!("unexpected character '{c}'")));
        };

        loop {
            self.skip_ws();
            let Some(&(pos, c)) = self.it.peek() else {
                return Ok(e);
            };

            let (op, op_pre, len) = match c {
                '|' => (Opcode::Or, 1, 1),
                '^' => (Opcode::Xor, 2, 1),
                '&' => (Opcode::And, 3, 1),
                '<' => (Opcode::Shl, 4, 2),
                '>' => (Opcode::Shr, 4, 2),
                '+' => (Opcode::Add, 5, 1),
                '-' => (Opcode::Sub, 5, 1),
                '*' => (Opcode::Mul, 6, 1),
                '/' => (Opcode::UDiv, 6, 1),
                '%' => (Opcode::UMod, 6, 1),
                ')' => return Ok(e),
                _ => return Err(ParseError::new(pos, format!("unexpected character '{c}'"))),
            };

            if op_pre <= pre {
                return Ok(e);
            }

            // If the current operators precedence is higher than
            // the one whose subexpression we are currently parsing
            // then we need to finish this operator first.
            self.it.next();
            if len == 2 && self.it.next_if(|&(_, n)| n == c).is_none() {
                return Err(ParseError::new(pos, format!("expected '{c}{c}'")));
            }
            let rhs = self.parse(op_pre)?;
            e = Operand::binary(op, e, rhs);
        }
    }
}

/// Parses a decimal or `0x` prefixed hexadecimal number.
pub(crate) fn parse_u64(s: &str) -> Option<u64> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> Operand {
        Operand::reg("x", Width::B8)
    }

    fn y() -> Operand {
        Operand::reg("y", Width::B8)
    }

    #[test]
    fn width_helpers() {
        assert_eq!(Width::B1.mask(), 0xff);
        assert_eq!(Width::B8.mask(), u64::MAX);
        assert_eq!(Width::B2.truncate(0x12345), 0x2345);
        assert_eq!(Width::B1.sign_extend(0x80), -128);
        assert_eq!(Width::B4.sign_extend(0x7fff_ffff), 0x7fff_ffff);
        assert_eq!(Width::from_bits(32), Some(Width::B4));
        assert_eq!(Width::from_bits(12), None);
    }

    #[test]
    fn opcode_codes_round_trip() {
        for (i, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(op.code() as usize, i);
            assert_eq!(Opcode::from_code(i as u8), Some(*op));
        }
        assert_eq!(Opcode::from_code(32), None);
    }

    #[test]
    fn parse_expr_test() {
        let e = Expr::from_string("1 + 2 * 3", Width::B4).unwrap();
        let c = |v| Operand::constant(v, Width::B4);
        assert_eq!(e, Expr::binary(Opcode::Add, c(1), c(2) * c(3)));

        let e = Expr::from_string("x & y + z", Width::B8).unwrap();
        assert_eq!(e, Expr::binary(
            Opcode::And, x(), y() + Operand::reg("z", Width::B8)
        ));

        let e = Expr::from_string("x & y | z ^ 1", Width::B8).unwrap();
        assert_eq!(e, Expr::binary(
            Opcode::Or,
            x() & y(),
            Operand::reg("z", Width::B8) ^ Operand::constant(1, Width::B8),
        ));

        let e = Expr::from_string("x - (y - 0x10)", Width::B8).unwrap();
        assert_eq!(e, Expr::binary(
            Opcode::Sub, x(), y() - Operand::constant(16, Width::B8)
        ));

        let e = Expr::from_string("x << 3", Width::B8).unwrap();
        assert_eq!(e.op, Opcode::Shl);

        let e = Expr::from_string("x", Width::B2).unwrap();
        assert_eq!(e, Expr::unary(Opcode::Mov, Operand::reg("x", Width::B2), Width::B2));
    }

    #[test]
    fn parse_errors() {
        assert!(Expr::from_string("x +", Width::B8).is_err());
        assert!(Expr::from_string("(x + y", Width::B8).is_err());
        assert!(Expr::from_string("x < y", Width::B8).is_err());
        let err = Expr::from_string("x $ y", Width::B8).unwrap_err();
        assert_eq!(err.pos, 2);
    }

    #[test]
    fn complexity_counts_operations() {
        let e = Expr::from_string("(x & y) + (x ^ y)", Width::B8).unwrap();
        assert_eq!(e.complexity(), 3);
        assert_eq!(x().into_expr().complexity(), 1);
        assert_eq!(e.vars().len(), 2);
    }

    #[test]
    fn resize_picks_the_right_operation() {
        let a = Operand::reg("a", Width::B4);
        let up = a.clone().resize(Width::B8, false).into_expr();
        assert_eq!(up.op, Opcode::Zext);
        let up = a.clone().resize(Width::B8, true).into_expr();
        assert_eq!(up.op, Opcode::Sext);
        let down = a.clone().resize(Width::B1, true).into_expr();
        assert_eq!(down.op, Opcode::Low);
        assert_eq!(a.clone().resize(Width::B4, false), a);

        let c = Operand::constant(0xff, Width::B1).resize(Width::B2, true);
        assert_eq!(c.as_const(), Some(0xffff));
    }

    #[test]
    fn substitute_placeholders_resizes() {
        let p = |i| Operand::placeholder(i, Width::B8);
        let e = Expr::binary(Opcode::Xor, p(0), p(1));
        let a = Operand::reg("a", Width::B4);
        let b = Operand::reg("b", Width::B8);
        let c = e.substitute_placeholders(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(c, Expr::binary(Opcode::Xor, a.resize(Width::B8, false), b));
        assert!(e.substitute_placeholders(&[x()]).is_none());
    }
}
