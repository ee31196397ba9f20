//! Concrete evaluation of expressions.
//!
//! All arithmetic is done on 64-bit words and truncated to the destination
//! width. Signed operations sign-extend each operand from its own width first.

use thiserror::Error;

use crate::expr::{Expr, Opcode, Operand, Variable, Width};
use crate::valuation::Valuation;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("unsupported {op:?}: {reason}")]
    Unsupported { op: Opcode, reason: &'static str },

    #[error("no value for variable {0:?}")]
    MissingVariable(Variable),
}

/// Evaluates `e`. The result is truncated to `e.width`.
pub fn evaluate<V: Valuation + ?Sized>(e: &Expr, v: &mut V) -> Result<u64, EvalError> {
    let (l, lw) = eval_operand(&e.l, v)?;
    let w = e.width;

    let Some(r) = &e.r else {
        return eval_unary(e.op, l, lw, w);
    };

    if e.op.is_unary() {
        return Err(EvalError::Unsupported { op: e.op, reason: "unary operation with two operands" });
    }

    let (r, rw) = eval_operand(r, v)?;
    eval_binary(e.op, l, lw, r, rw, w)
}

/// Evaluates an operand, returning its value and width.
pub fn eval_operand<V: Valuation + ?Sized>(
    o: &Operand,
    v: &mut V,
) -> Result<(u64, Width), EvalError> {
    match o {
        Operand::Const { value, width } => Ok((width.truncate(*value), *width)),
        Operand::Var(var) => Ok((var.width.truncate(v.value(var)?), var.width)),
        Operand::Nested(e) => Ok((evaluate(e, v)?, e.width)),
    }
}

fn eval_unary(op: Opcode, l: u64, lw: Width, w: Width) -> Result<u64, EvalError> {
    use Opcode::*;
    let r = match op {
        Mov => l,
        Neg => l.wrapping_neg(),
        BNot => !l,
        LNot => (l == 0) as u64,
        Sext => {
            if w < lw {
                return Err(EvalError::Unsupported { op, reason: "sign extension to a narrower width" });
            }
            lw.sign_extend(l) as u64
        },
        Zext => {
            if w < lw {
                return Err(EvalError::Unsupported { op, reason: "zero extension to a narrower width" });
            }
            l
        },
        Low => {
            if w > lw {
                return Err(EvalError::Unsupported { op, reason: "truncation to a wider width" });
            }
            l
        },
        High => {
            if w > lw {
                return Err(EvalError::Unsupported { op, reason: "truncation to a wider width" });
            }
            l >> (8 * (lw.bytes() - w.bytes()) as u32)
        },
        SetSign => (lw.sign_extend(l) < 0) as u64,
        _ => return Err(EvalError::Unsupported { op, reason: "binary operation without a second operand" }),
    };

    Ok(w.truncate(r))
}

fn eval_binary(
    op: Opcode,
    l: u64,
    lw: Width,
    r: u64,
    rw: Width,
    w: Width,
) -> Result<u64, EvalError> {
    use Opcode::*;
    let sl = lw.sign_extend(l);
    let sr = rw.sign_extend(r);
    let v = match op {
        Add => l.wrapping_add(r),
        Sub => l.wrapping_sub(r),
        Mul => l.wrapping_mul(r),
        UDiv => l.checked_div(r).ok_or(EvalError::DivisionByZero)?,
        UMod => l.checked_rem(r).ok_or(EvalError::DivisionByZero)?,
        SDiv => {
            if sr == 0 {
                return Err(EvalError::DivisionByZero);
            }
            sl.wrapping_div(sr) as u64
        },
        SMod => {
            if sr == 0 {
                return Err(EvalError::DivisionByZero);
            }
            sl.wrapping_rem(sr) as u64
        },
        Or => l | r,
        And => l & r,
        Xor => l ^ r,
        Shl => if r >= 64 { 0 } else { l << r },
        Shr => if r >= 64 { 0 } else { l >> r },
        Sar => (sl >> r.min(63)) as u64,
        SetEq => (l == r) as u64,
        SetNe => (l != r) as u64,
        SetUlt => (l < r) as u64,
        SetUle => (l <= r) as u64,
        SetUgt => (l > r) as u64,
        SetUge => (l >= r) as u64,
        SetSlt => (sl < sr) as u64,
        SetSle => (sl <= sr) as u64,
        SetSgt => (sl > sr) as u64,
        SetSge => (sl >= sr) as u64,
        _ => return Err(EvalError::Unsupported { op, reason: "unary operation with two operands" }),
    };

    Ok(w.truncate(v))
}

impl Expr {
    /// Evaluate the expression. See [`evaluate`].
    pub fn eval<V: Valuation + ?Sized>(&self, v: &mut V) -> Result<u64, EvalError> {
        evaluate(self, v)
    }
}
