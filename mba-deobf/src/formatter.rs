//! Formatting for expressions.

use std::fmt::Display;

use crate::{
    bitvec::{SmtLibBuilder, lower},
    bitwise_expr::BExpr,
    expr::{Expr, Opcode, Operand, VarKind, Variable, Width},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Formatter {
    /// C-like infix notation. Operations without a C operator are
    /// printed as function calls, e.g. `sdiv(x, y)` or `zext64(x)`.
    C,

    /// A single SMT-LIB2 bit-vector term.
    SmtLib,
}

impl Formatter {
    /// The infix operator for `op`, if C has one.
    pub fn infix_op(&self, op: Opcode) -> Option<&'static str> {
        use Opcode::*;
        Some(match op {
            Or => "|",
            Xor => "^",
            And => "&",
            Shl => "<<",
            Shr => ">>",
            Add => "+",
            Sub => "-",
            Mul => "*",
            UDiv => "/",
            UMod => "%",
            _ => return None,
        })
    }

    /// The prefix operator for `op`, if C has one.
    pub fn prefix_op(&self, op: Opcode) -> Option<&'static str> {
        match op {
            Opcode::Neg => Some("-"),
            Opcode::BNot => Some("~"),
            Opcode::LNot => Some("!"),
            _ => None,
        }
    }
}

/// The C type of an unsigned integer of the given width.
pub fn c_type(w: Width) -> &'static str {
    match w {
        Width::B1 => "uint8_t",
        Width::B2 => "uint16_t",
        Width::B4 => "uint32_t",
        Width::B8 => "uint64_t",
    }
}

impl Expr {
    /// Creates a wrapper struct that implements [`Display`] and uses the given
    /// `formatter` to format the expression.
    pub fn display(&self, formatter: Formatter) -> DisplayableExpr<'_> {
        DisplayableExpr { expr: self, formatter }
    }

    /// Formats the expression as a C function called `function_name`
    /// whose parameters are the variables of the expression.
    pub fn display_function<'a>(&'a self, function_name: &'a str) -> FunctionFormatter<'a> {
        FunctionFormatter { vars: self.vars(), expr: self, function_name }
    }
}

impl Operand {
    pub fn display(&self, formatter: Formatter) -> DisplayableOperand<'_> {
        DisplayableOperand { op: self, formatter }
    }
}

pub struct DisplayableExpr<'a> {
    expr: &'a Expr,
    formatter: Formatter,
}

impl Display for DisplayableExpr<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.formatter {
            Formatter::C => write_c_expr(self.expr, f),
            Formatter::SmtLib => match lower(&mut SmtLibBuilder::default(), self.expr) {
                Ok(t) => f.write_str(&t),
                Err(e) => write!(f, "(error \"{e}\")"),
            },
        }
    }
}

pub struct DisplayableOperand<'a> {
    op: &'a Operand,
    formatter: Formatter,
}

impl Display for DisplayableOperand<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.formatter, self.op) {
            (Formatter::C, o) => write_c_operand(o, f),
            (Formatter::SmtLib, Operand::Nested(e)) => e.display(Formatter::SmtLib).fmt(f),
            (Formatter::SmtLib, Operand::Const { value, width }) => {
                write!(f, "(_ bv{value} {})", width.bits())
            },
            (Formatter::SmtLib, Operand::Var(v)) => f.write_str(&crate::bitvec::var_name(v)),
        }
    }
}

/// Precedence of an operand when it appears as a child of an operator.
fn operand_precedence(o: &Operand) -> usize {
    match o {
        Operand::Const { value, width } if prints_negative(*value, *width) => 15,
        Operand::Const { .. } | Operand::Var(_) => 16,
        Operand::Nested(e) if e.op == Opcode::Mov => operand_precedence(&e.l),
        Operand::Nested(e) => e.precedence(),
    }
}

fn prints_negative(value: u64, width: Width) -> bool {
    let sign = (value >> (width.bits() - 1)) & 1 == 1;
    sign && width.truncate(value.wrapping_neg()) < 0x10000
}

fn write_const(value: u64, width: Width, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    if prints_negative(value, width) {
        write!(f, "-{}", width.truncate(value.wrapping_neg()))
    } else if value >= 0x10000 {
        write!(f, "{value:#x}")
    } else {
        write!(f, "{value}")
    }
}

fn write_c_operand(o: &Operand, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match o {
        Operand::Const { value, width } => write_const(*value, *width, f),
        Operand::Var(v) => v.fmt(f),
        Operand::Nested(e) => write_c_expr(e, f),
    }
}

/// Writes `o`, in parentheses if `wrap` says so for its precedence.
fn write_c_child(
    o: &Operand,
    wrap: bool,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    if wrap {
        f.write_str("(")?;
        write_c_operand(o, f)?;
        f.write_str(")")
    } else {
        write_c_operand(o, f)
    }
}

fn write_c_expr(e: &Expr, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    use Opcode::*;

    let fmt = Formatter::C;
    let pred = e.precedence();

    match &e.r {
        None if e.op == Mov => write_c_operand(&e.l, f),
        None => {
            if let Some(op) = fmt.prefix_op(e.op) {
                f.write_str(op)?;
                return write_c_child(&e.l, operand_precedence(&e.l) < pred, f);
            }

            match e.op {
                Sext | Zext | Low | High => write!(f, "{}{}(", e.op.name(), e.width.bits())?,
                op => write!(f, "{}(", op.name())?,
            }
            write_c_operand(&e.l, f)?;
            f.write_str(")")
        },
        Some(r) => {
            let Some(op) = fmt.infix_op(e.op) else {
                write!(f, "{}(", e.op.name())?;
                write_c_operand(&e.l, f)?;
                f.write_str(", ")?;
                write_c_operand(r, f)?;
                return f.write_str(")");
            };

            // All binary operators are left associative.
            write_c_child(&e.l, operand_precedence(&e.l) < pred, f)?;
            write!(f, " {op} ")?;
            write_c_child(r, operand_precedence(r) <= pred, f)
        },
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.display(Formatter::C).fmt(f)
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.display(Formatter::C).fmt(f)
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            VarKind::Reg(s) => write!(f, "{s}"),
            VarKind::Stack(off) if *off < 0 => write!(f, "stk_m{:x}", off.unsigned_abs()),
            VarKind::Stack(off) => write!(f, "stk_{off:x}"),
            VarKind::Global(addr) => write!(f, "glb_{addr:x}"),
            VarKind::Placeholder(i) => write!(f, "p{i}"),
        }
    }
}

pub struct FunctionFormatter<'a> {
    vars: Vec<Variable>,
    expr: &'a Expr,
    function_name: &'a str,
}

impl Display for FunctionFormatter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}(", c_type(self.expr.width), self.function_name)?;

        let mut vars = self.vars.iter();
        if let Some(v) = vars.next() {
            write!(f, "{} {v}", c_type(v.width))?;

            for v in vars {
                write!(f, ", {} {v}", c_type(v.width))?;
            }
        }

        write!(f, ") {{\n\treturn {};\n}}", self.expr)
    }
}

impl BExpr {
    /// Creates a wrapper struct that implements [`Display`].
    /// The variables are printed as `a`, `b`, `c`, ...
    pub fn display(&self) -> DisplayableBExpr<'_> {
        DisplayableBExpr { expr: self }
    }

    /// Like [`Self::display`] but wraps the output in parentheses
    /// if the expression is not a topmost unary.
    pub fn display_wrapped(&self) -> DisplayableBExprWrapped<'_> {
        DisplayableBExprWrapped { expr: self }
    }
}

pub struct DisplayableBExpr<'a> {
    expr: &'a BExpr,
}

impl DisplayableBExpr<'_> {
    fn handle_binop(
        &self,
        l: &BExpr,
        r: &BExpr,
        op: &str,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{} {op} {}", l.display_wrapped(), r.display_wrapped())
    }
}

impl Display for DisplayableBExpr<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.expr {
            BExpr::Ones => f.write_str("-1"),
            BExpr::Var(i) => match (b'a'..=b'z').nth(*i as usize) {
                Some(c) => write!(f, "{}", c as char),
                None => write!(f, "v{i}"),
            },
            BExpr::Not(e) => write!(f, "~{}", e.display_wrapped()),
            BExpr::And(l, r) => self.handle_binop(l, r, "&", f),
            BExpr::Or(l, r) => self.handle_binop(l, r, "|", f),
            BExpr::Xor(l, r) => self.handle_binop(l, r, "^", f),
        }
    }
}

pub struct DisplayableBExprWrapped<'a> {
    expr: &'a BExpr,
}

impl Display for DisplayableBExprWrapped<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.expr.is_topmost_unary() {
            self.expr.display().fmt(f)
        } else {
            write!(f, "({})", self.expr.display())
        }
    }
}

impl Display for BExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.display().fmt(f)
    }
}
