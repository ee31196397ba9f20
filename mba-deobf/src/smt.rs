//! Equivalence proofs with z3.

use z3::ast::{Ast, BV, Bool};
use z3::{Config, Context, Params, SatResult, Solver};

use crate::bitvec::{BitVecBuilder, BvCmp, BvOp, BvUnOp, lower, var_name};
use crate::emulator::EvalError;
use crate::expr::{Expr, Variable};

/// Outcome of [`prove_equivalent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtVerdict {
    /// The negated equivalence is unsatisfiable.
    Equivalent,

    /// z3 found an input on which the expressions differ.
    NotEquivalent,

    /// Timeout or any other reason z3 gave up.
    Unknown,
}

/// Builds z3 bit-vector terms.
pub struct Z3Builder<'ctx> {
    ctx: &'ctx Context,
}

impl<'ctx> Z3Builder<'ctx> {
    pub fn new(ctx: &'ctx Context) -> Self {
        Self { ctx }
    }
}

impl<'ctx> BitVecBuilder for Z3Builder<'ctx> {
    type Term = BV<'ctx>;
    type Bool = Bool<'ctx>;

    fn constant(&mut self, value: u64, bits: u32) -> BV<'ctx> {
        BV::from_u64(self.ctx, value, bits)
    }

    fn var(&mut self, var: &Variable) -> BV<'ctx> {
        BV::new_const(self.ctx, var_name(var), var.width.bits())
    }

    fn unary(&mut self, op: BvUnOp, a: BV<'ctx>) -> BV<'ctx> {
        match op {
            BvUnOp::Neg => a.bvneg(),
            BvUnOp::Not => a.bvnot(),
        }
    }

    fn binary(&mut self, op: BvOp, a: BV<'ctx>, b: BV<'ctx>) -> BV<'ctx> {
        match op {
            BvOp::Add => a.bvadd(&b),
            BvOp::Sub => a.bvsub(&b),
            BvOp::Mul => a.bvmul(&b),
            BvOp::UDiv => a.bvudiv(&b),
            BvOp::SDiv => a.bvsdiv(&b),
            BvOp::URem => a.bvurem(&b),
            BvOp::SRem => a.bvsrem(&b),
            BvOp::And => a.bvand(&b),
            BvOp::Or => a.bvor(&b),
            BvOp::Xor => a.bvxor(&b),
            BvOp::Shl => a.bvshl(&b),
            BvOp::LShr => a.bvlshr(&b),
            BvOp::AShr => a.bvashr(&b),
        }
    }

    fn compare(&mut self, cmp: BvCmp, a: BV<'ctx>, b: BV<'ctx>) -> Bool<'ctx> {
        match cmp {
            BvCmp::Eq => a._eq(&b),
            BvCmp::Ult => a.bvult(&b),
            BvCmp::Ule => a.bvule(&b),
            BvCmp::Ugt => a.bvugt(&b),
            BvCmp::Uge => a.bvuge(&b),
            BvCmp::Slt => a.bvslt(&b),
            BvCmp::Sle => a.bvsle(&b),
            BvCmp::Sgt => a.bvsgt(&b),
            BvCmp::Sge => a.bvsge(&b),
        }
    }

    fn not(&mut self, b: Bool<'ctx>) -> Bool<'ctx> {
        b.not()
    }

    fn ite(&mut self, c: Bool<'ctx>, t: BV<'ctx>, e: BV<'ctx>) -> BV<'ctx> {
        c.ite(&t, &e)
    }

    fn extract(&mut self, hi: u32, lo: u32, a: BV<'ctx>) -> BV<'ctx> {
        a.extract(hi, lo)
    }

    fn zero_extend(&mut self, by: u32, a: BV<'ctx>) -> BV<'ctx> {
        a.zero_ext(by)
    }

    fn sign_extend(&mut self, by: u32, a: BV<'ctx>) -> BV<'ctx> {
        a.sign_ext(by)
    }
}

/// Asks z3 whether `a` and `b` agree on all inputs.
/// A `timeout_ms` of zero means no timeout.
pub fn prove_equivalent(a: &Expr, b: &Expr, timeout_ms: u32) -> Result<SmtVerdict, EvalError> {
    if a.width != b.width {
        return Ok(SmtVerdict::NotEquivalent);
    }

    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut builder = Z3Builder::new(&ctx);
    let ta = lower(&mut builder, a)?;
    let tb = lower(&mut builder, b)?;

    let solver = Solver::new(&ctx);
    if timeout_ms != 0 {
        let mut params = Params::new(&ctx);
        params.set_u32("timeout", timeout_ms);
        solver.set_params(&params);
    }
    solver.assert(&ta._eq(&tb).not());

    let verdict = match solver.check() {
        SatResult::Unsat => SmtVerdict::Equivalent,
        SatResult::Sat => SmtVerdict::NotEquivalent,
        SatResult::Unknown => SmtVerdict::Unknown,
    };
    log::trace!("z3 says {verdict:?} for {a} == {b}");
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Operand, Width};

    fn prove(a: &str, b: &str) -> SmtVerdict {
        let a = Expr::from_string(a, Width::B8).unwrap();
        let b = Expr::from_string(b, Width::B8).unwrap();
        prove_equivalent(&a, &b, 5000).unwrap()
    }

    #[test]
    fn linear_identities() {
        assert_eq!(prove("(x & y) + (x ^ y)", "x | y"), SmtVerdict::Equivalent);
        assert_eq!(prove("(x & y) + (x | y)", "x + y"), SmtVerdict::Equivalent);
        assert_eq!(prove("x - 1", "~(-x)"), SmtVerdict::Equivalent);
        assert_eq!(prove("x + y", "x | y"), SmtVerdict::NotEquivalent);
        assert_eq!(prove("-x", "~x + 1"), SmtVerdict::Equivalent);
        assert_eq!(prove("-x", "~x"), SmtVerdict::NotEquivalent);
    }

    #[test]
    fn division_and_shifts() {
        assert_eq!(prove("x << 70", "0"), SmtVerdict::Equivalent);
        assert_eq!(prove("x % 1", "0"), SmtVerdict::Equivalent);
        assert_eq!(prove("x / 1", "x"), SmtVerdict::Equivalent);
        assert_eq!(prove("(x >> 1) << 1", "x"), SmtVerdict::NotEquivalent);
    }

    #[test]
    fn mixed_widths() {
        let x = Operand::reg("x", Width::B1);
        let a = x.clone().resize(Width::B8, false).into_expr();
        let b = (x.resize(Width::B8, true) & Operand::constant(0xff, Width::B8)).into_expr();
        assert_eq!(prove_equivalent(&a, &b, 5000).unwrap(), SmtVerdict::Equivalent);

        let narrow = Expr::from_string("x", Width::B4).unwrap();
        assert_eq!(prove_equivalent(&narrow, &a, 0).unwrap(), SmtVerdict::NotEquivalent);
    }
}
