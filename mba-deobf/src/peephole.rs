//! Local rewrites that clean up generated candidates.
//!
//! These only ever look at a node and its direct operands and never
//! change the value or the width of an expression.

use crate::emulator::evaluate;
use crate::expr::{Expr, Opcode, Operand, Width};
use crate::valuation::Assignment;

impl Expr {
    /// Simplify the expression.
    /// This does only trivial simplifications.
    /// E.g. multiplication by one or zero, or constant folding.
    pub fn simplify(self) -> Expr {
        let width = self.width;
        let o = simplify_expr(self);
        debug_assert_eq!(o.width(), width);
        o.into_expr()
    }
}

/// Simplify an operand. See [`Expr::simplify`].
pub fn simplify_operand(o: Operand) -> Operand {
    match o {
        Operand::Nested(e) => simplify_expr(*e),
        leaf => leaf,
    }
}

fn simplify_expr(e: Expr) -> Operand {
    let Expr { op, l, r, width } = e;
    let l = simplify_operand(l);
    let r = r.map(simplify_operand);
    node(op, l, r, width)
}

/// Rewrites a single node whose operands are already simplified.
fn node(op: Opcode, l: Operand, r: Option<Operand>, w: Width) -> Operand {
    use Opcode::*;

    if l.is_const() && r.as_ref().is_none_or(Operand::is_const) {
        let e = Expr { op, l, r, width: w };
        return match evaluate(&e, &mut Assignment::empty()) {
            Ok(v) => Operand::constant(v, w),
            Err(_) => Operand::from(e),
        };
    }

    let ones = w.mask();
    let Some(r) = r else {
        return match (op, l) {
            (Mov | Zext | Sext | Low | High, l) if l.width() == w => l,
            (Neg, Operand::Nested(i)) if i.op == Neg && i.l.width() == w => i.l,
            (BNot, Operand::Nested(i)) if i.op == BNot && i.l.width() == w => i.l,
            (Neg, Operand::Nested(i)) if i.op == Sub && i.width == w => {
                let Expr { l: a, r: b, .. } = *i;
                match b {
                    Some(b) => node(Sub, b, Some(a), w),
                    None => Operand::unary(Neg, Operand::unary(Sub, a, w), w),
                }
            },
            (Low, Operand::Nested(i))
                if matches!(i.op, Zext | Sext) && i.l.width() == w => i.l,
            (op, l) => Operand::unary(op, l, w),
        };
    };

    // Only rewrite nodes whose operands agree on the width.
    if l.width() != w || (r.width() != w && !op.is_shift()) {
        return Operand::from(Expr { op, l, r: Some(r), width: w });
    }

    let is_neg = |o: &Operand| matches!(o, Operand::Nested(e) if e.op == Neg);
    let into_inner = |o: Operand| match o {
        Operand::Nested(e) => e.l,
        o => o,
    };

    match op {
        Add if l.is_const_value(0) => r,
        Add if r.is_const_value(0) => l,
        Add if is_neg(&r) => node(Sub, l, Some(into_inner(r)), w),
        Add if is_neg(&l) => node(Sub, r, Some(into_inner(l)), w),
        // Keep constants on the right of additions.
        Add if l.is_const() => node(Add, r, Some(l), w),
        Add => match (l, r.as_const()) {
            (Operand::Nested(i), Some(c2))
                if i.op == Add && i.r.as_ref().and_then(Operand::as_const).is_some() =>
            {
                let i = *i;
                let c1 = i.r.as_ref().and_then(Operand::as_const).unwrap_or(0);
                node(Add, i.l, Some(Operand::constant(c1.wrapping_add(c2), w)), w)
            },
            (l, _) => Operand::binary(Add, l, r),
        },

        Sub if r.is_const_value(0) => l,
        Sub if l.is_const_value(0) => node(Neg, r, None, w),
        Sub if l == r => Operand::zero(w),
        Sub if is_neg(&r) => node(Add, l, Some(into_inner(r)), w),

        Mul if l.is_const_value(0) || r.is_const_value(0) => Operand::zero(w),
        Mul if l.is_const_value(1) => r,
        Mul if r.is_const_value(1) => l,
        Mul if l.is_const_value(ones) => node(Neg, r, None, w),
        Mul if r.is_const_value(ones) => node(Neg, l, None, w),
        // Keep constants on the left of multiplications.
        Mul if r.is_const() => Operand::binary(Mul, r, l),

        And if l.is_const_value(0) || r.is_const_value(0) => Operand::zero(w),
        And if l.is_const_value(ones) => r,
        And if r.is_const_value(ones) => l,
        And | Or if l == r => l,

        Or if l.is_const_value(0) => r,
        Or if r.is_const_value(0) => l,
        Or if l.is_const_value(ones) || r.is_const_value(ones) => Operand::ones(w),

        Xor if l.is_const_value(0) => r,
        Xor if r.is_const_value(0) => l,
        Xor if l.is_const_value(ones) => node(BNot, r, None, w),
        Xor if r.is_const_value(ones) => node(BNot, l, None, w),
        Xor if l == r => Operand::zero(w),

        Shl | Shr | Sar if r.is_const_value(0) => l,

        _ => Operand::binary(op, l, r),
    }
}
