//! Lowering of expressions to bit-vector logic.
//!
//! The lowering is written once against [`BitVecBuilder`] and is used both to
//! print SMT-LIB2 formulas and, with the `z3` feature, to build z3 terms. It
//! follows the emulator exactly: binary operations on operands of mismatched
//! widths are computed on 64 bits and truncated afterwards.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::emulator::EvalError;
use crate::expr::{Expr, Opcode, Operand, VarKind, Variable};

/// Unary bit-vector operations.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BvUnOp {
    Neg,
    Not,
}

impl BvUnOp {
    pub fn smtlib_name(self) -> &'static str {
        match self {
            BvUnOp::Neg => "bvneg",
            BvUnOp::Not => "bvnot",
        }
    }
}

/// Binary bit-vector operations.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BvOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

impl BvOp {
    pub fn smtlib_name(self) -> &'static str {
        match self {
            BvOp::Add => "bvadd",
            BvOp::Sub => "bvsub",
            BvOp::Mul => "bvmul",
            BvOp::UDiv => "bvudiv",
            BvOp::SDiv => "bvsdiv",
            BvOp::URem => "bvurem",
            BvOp::SRem => "bvsrem",
            BvOp::And => "bvand",
            BvOp::Or => "bvor",
            BvOp::Xor => "bvxor",
            BvOp::Shl => "bvshl",
            BvOp::LShr => "bvlshr",
            BvOp::AShr => "bvashr",
        }
    }
}

/// Bit-vector predicates.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BvCmp {
    Eq,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl BvCmp {
    pub fn smtlib_name(self) -> &'static str {
        match self {
            BvCmp::Eq => "=",
            BvCmp::Ult => "bvult",
            BvCmp::Ule => "bvule",
            BvCmp::Ugt => "bvugt",
            BvCmp::Uge => "bvuge",
            BvCmp::Slt => "bvslt",
            BvCmp::Sle => "bvsle",
            BvCmp::Sgt => "bvsgt",
            BvCmp::Sge => "bvsge",
        }
    }
}

/// Something that can build bit-vector terms.
pub trait BitVecBuilder {
    type Term: Clone;
    type Bool;

    fn constant(&mut self, value: u64, bits: u32) -> Self::Term;
    fn var(&mut self, var: &Variable) -> Self::Term;
    fn unary(&mut self, op: BvUnOp, a: Self::Term) -> Self::Term;
    fn binary(&mut self, op: BvOp, a: Self::Term, b: Self::Term) -> Self::Term;
    fn compare(&mut self, cmp: BvCmp, a: Self::Term, b: Self::Term) -> Self::Bool;
    fn not(&mut self, b: Self::Bool) -> Self::Bool;
    fn ite(&mut self, c: Self::Bool, t: Self::Term, e: Self::Term) -> Self::Term;
    fn extract(&mut self, hi: u32, lo: u32, a: Self::Term) -> Self::Term;
    fn zero_extend(&mut self, by: u32, a: Self::Term) -> Self::Term;
    fn sign_extend(&mut self, by: u32, a: Self::Term) -> Self::Term;
}

/// A name for the variable that is unique among variables of all widths.
pub fn var_name(var: &Variable) -> String {
    let bits = var.width.bits();
    match &var.kind {
        VarKind::Reg(s) => format!("{s}_{bits}"),
        VarKind::Stack(off) if *off < 0 => format!("stk_m{:x}_{bits}", off.unsigned_abs()),
        VarKind::Stack(off) => format!("stk_{off:x}_{bits}"),
        VarKind::Global(addr) => format!("glb_{addr:x}_{bits}"),
        VarKind::Placeholder(i) => format!("p{i}_{bits}"),
    }
}

/// Lowers an operand to a term of `o.width()` bytes.
pub fn lower_operand<B: BitVecBuilder>(b: &mut B, o: &Operand) -> Result<B::Term, EvalError> {
    match o {
        Operand::Const { value, width } => Ok(b.constant(*value, width.bits())),
        Operand::Var(v) => Ok(b.var(v)),
        Operand::Nested(e) => lower(b, e),
    }
}

/// Lowers an expression to a term of `e.width` bytes.
pub fn lower<B: BitVecBuilder>(b: &mut B, e: &Expr) -> Result<B::Term, EvalError> {
    use Opcode::*;

    let w = e.width.bits();
    let lw = e.l.width().bits();
    let l = lower_operand(b, &e.l)?;

    let Some(r) = &e.r else {
        let unsupported = |reason| EvalError::Unsupported { op: e.op, reason };
        return Ok(match e.op {
            Mov => fit(b, l, lw, w, false),
            Neg => {
                let l = fit(b, l, lw, w, false);
                b.unary(BvUnOp::Neg, l)
            },
            BNot => {
                let l = fit(b, l, lw, w, false);
                b.unary(BvUnOp::Not, l)
            },
            LNot => {
                let zero = b.constant(0, lw);
                let c = b.compare(BvCmp::Eq, l, zero);
                bool_to_bv(b, c, w)
            },
            Sext | Zext => {
                if w < lw {
                    return Err(unsupported("extension to a narrower width"));
                }
                fit(b, l, lw, w, e.op == Sext)
            },
            Low => {
                if w > lw {
                    return Err(unsupported("truncation to a wider width"));
                }
                fit(b, l, lw, w, false)
            },
            High => {
                if w > lw {
                    return Err(unsupported("truncation to a wider width"));
                }
                b.extract(lw - 1, lw - w, l)
            },
            SetSign => {
                let zero = b.constant(0, lw);
                let c = b.compare(BvCmp::Slt, l, zero);
                bool_to_bv(b, c, w)
            },
            _ => return Err(unsupported("binary operation without a second operand")),
        });
    };

    let rw = r.width().bits();
    let rt = lower_operand(b, r)?;
    let signed = e.op.is_signed() || e.op == Sar;

    if e.op.is_set() {
        let (l, r) = if lw == rw {
            (l, rt)
        } else {
            (fit(b, l, lw, 64, signed), fit(b, rt, rw, 64, signed))
        };

        let (cmp, negate) = match e.op {
            SetEq => (BvCmp::Eq, false),
            SetNe => (BvCmp::Eq, true),
            SetUlt => (BvCmp::Ult, false),
            SetUle => (BvCmp::Ule, false),
            SetUgt => (BvCmp::Ugt, false),
            SetUge => (BvCmp::Uge, false),
            SetSlt => (BvCmp::Slt, false),
            SetSle => (BvCmp::Sle, false),
            SetSgt => (BvCmp::Sgt, false),
            _ => (BvCmp::Sge, false),
        };
        let mut c = b.compare(cmp, l, r);
        if negate {
            c = b.not(c);
        }
        return Ok(bool_to_bv(b, c, w));
    }

    let op = match e.op {
        Add => BvOp::Add,
        Sub => BvOp::Sub,
        Mul => BvOp::Mul,
        UDiv => BvOp::UDiv,
        SDiv => BvOp::SDiv,
        UMod => BvOp::URem,
        SMod => BvOp::SRem,
        Or => BvOp::Or,
        And => BvOp::And,
        Xor => BvOp::Xor,
        Shl => BvOp::Shl,
        Shr => BvOp::LShr,
        Sar => BvOp::AShr,
        op => return Err(EvalError::Unsupported { op, reason: "unary operation with two operands" }),
    };

    if lw == w && rw == w {
        return Ok(b.binary(op, l, rt));
    }

    // The shift amount is always unsigned.
    let l = fit(b, l, lw, 64, signed);
    let rt = fit(b, rt, rw, 64, signed && !e.op.is_shift());
    let v = b.binary(op, l, rt);
    Ok(fit(b, v, 64, w, false))
}

/// Changes the width of a term from `from` to `to` bits.
fn fit<B: BitVecBuilder>(b: &mut B, t: B::Term, from: u32, to: u32, signed: bool) -> B::Term {
    if from == to {
        t
    } else if to < from {
        b.extract(to - 1, 0, t)
    } else if signed {
        b.sign_extend(to - from, t)
    } else {
        b.zero_extend(to - from, t)
    }
}

fn bool_to_bv<B: BitVecBuilder>(b: &mut B, c: B::Bool, bits: u32) -> B::Term {
    let one = b.constant(1, bits);
    let zero = b.constant(0, bits);
    b.ite(c, one, zero)
}

/// Builds SMT-LIB2 terms as strings.
#[derive(Debug, Default)]
pub struct SmtLibBuilder {
    /// Declared variables and their widths in bits.
    pub vars: BTreeSet<(String, u32)>,
}

impl BitVecBuilder for SmtLibBuilder {
    type Term = String;
    type Bool = String;

    fn constant(&mut self, value: u64, bits: u32) -> String {
        format!("(_ bv{value} {bits})")
    }

    fn var(&mut self, var: &Variable) -> String {
        let name = var_name(var);
        self.vars.insert((name.clone(), var.width.bits()));
        name
    }

    fn unary(&mut self, op: BvUnOp, a: String) -> String {
        format!("({} {a})", op.smtlib_name())
    }

    fn binary(&mut self, op: BvOp, a: String, b: String) -> String {
        format!("({} {a} {b})", op.smtlib_name())
    }

    fn compare(&mut self, cmp: BvCmp, a: String, b: String) -> String {
        format!("({} {a} {b})", cmp.smtlib_name())
    }

    fn not(&mut self, b: String) -> String {
        format!("(not {b})")
    }

    fn ite(&mut self, c: String, t: String, e: String) -> String {
        format!("(ite {c} {t} {e})")
    }

    fn extract(&mut self, hi: u32, lo: u32, a: String) -> String {
        format!("((_ extract {hi} {lo}) {a})")
    }

    fn zero_extend(&mut self, by: u32, a: String) -> String {
        format!("((_ zero_extend {by}) {a})")
    }

    fn sign_extend(&mut self, by: u32, a: String) -> String {
        format!("((_ sign_extend {by}) {a})")
    }
}

/// An SMT-LIB2 script that is `unsat` iff `a` and `b` are equivalent.
pub fn smtlib_equivalence_query(a: &Expr, b: &Expr) -> Result<String, EvalError> {
    let mut builder = SmtLibBuilder::default();
    let ta = lower(&mut builder, a)?;
    let tb = lower(&mut builder, b)?;

    let mut s = String::from("(set-logic QF_BV)\n");
    for (name, bits) in &builder.vars {
        // Writing to a string never fails.
        let _ = writeln!(s, "(declare-const {name} (_ BitVec {bits}))");
    }
    let _ = writeln!(s, "(assert (not (= {ta} {tb})))");
    s.push_str("(check-sat)\n");
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Width;

    fn smt(s: &str, w: Width) -> String {
        let e = Expr::from_string(s, w).unwrap();
        lower(&mut SmtLibBuilder::default(), &e).unwrap()
    }

    #[test]
    fn same_width_operations_are_direct() {
        assert_eq!(smt("x + 1", Width::B4), "(bvadd x_32 (_ bv1 32))");
        assert_eq!(smt("~x & y", Width::B1), "(bvand (bvnot x_8) y_8)");
        assert_eq!(smt("x >> y", Width::B2), "(bvlshr x_16 y_16)");
    }

    #[test]
    fn unary_operations() {
        assert_eq!(smt("-x", Width::B1), "(bvneg x_8)");
        assert_eq!(smt("~x", Width::B1), "(bvnot x_8)");
        assert_eq!(smt("-~x", Width::B2), "(bvneg (bvnot x_16))");
    }

    #[test]
    fn mixed_widths_are_lifted() {
        let x = Operand::reg("x", Width::B4);
        let c = Operand::constant(3, Width::B1);
        let e = Expr::binary(Opcode::Shl, x, c);
        assert_eq!(
            lower(&mut SmtLibBuilder::default(), &e).unwrap(),
            "((_ extract 31 0) (bvshl ((_ zero_extend 32) x_32) ((_ zero_extend 56) (_ bv3 8))))"
        );
    }

    #[test]
    fn predicates_become_ite() {
        let x = Operand::reg("x", Width::B1);
        let e = Expr::binary(Opcode::SetNe, x, Operand::zero(Width::B1));
        assert_eq!(
            lower(&mut SmtLibBuilder::default(), &e).unwrap(),
            "(ite (not (= x_8 (_ bv0 8))) (_ bv1 8) (_ bv0 8))"
        );
    }

    #[test]
    fn query_declares_every_variable_once() {
        let a = Expr::from_string("(x & y) + (x ^ y)", Width::B8).unwrap();
        let b = Expr::from_string("x + y", Width::B8).unwrap();
        let q = smtlib_equivalence_query(&a, &b).unwrap();
        assert_eq!(q.matches("declare-const").count(), 2);
        assert!(q.contains("(declare-const x_64 (_ BitVec 64))"));
        assert!(q.ends_with("(check-sat)\n"));
    }
}
