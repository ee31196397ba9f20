//! Parser for corpus lines such as
//! `ExprOp("+", ExprId("p0", 64), ExprSlice(ExprId("p1", 64), 0, 32))`.
//!
//! Placeholders are 64 bits wide. Narrower ids and slices take the low bits.

use super::INPUTS_PER_VECTOR;
use crate::expr::{Expr, Opcode, Operand, ParseError, Width, parse_u64};

/// Parses one line of a corpus into an abstract expression.
pub fn parse_corpus_line(line: &str) -> Result<Expr, ParseError> {
    let mut p = CorpusParser { s: line, pos: 0 };
    let e = p.expr()?;
    p.skip_ws();
    if p.pos != line.len() {
        return Err(p.error("trailing characters"));
    }
    Ok(e.into_expr())
}

struct CorpusParser<'a> {
    s: &'a str,
    pos: usize,
}

impl<'a> CorpusParser<'a> {
    fn error(&self, msg: impl Into<String>) -> ParseError {
        ParseError::new(self.pos, msg)
    }

    fn rest(&self) -> &'a str {
        &self.s[self.pos..]
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<(), ParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{token}'")))
        }
    }

    /// A token made of `[0-9a-zA-Z_]`.
    fn word(&mut self) -> &'a str {
        self.skip_ws();
        let rest = self.rest();
        let len = rest.find(|c: char| !c.is_ascii_alphanumeric() && c != '_').unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn number(&mut self) -> Result<u64, ParseError> {
        let start = self.pos;
        let w = self.word();
        parse_u64(w).ok_or_else(|| ParseError::new(start, format!("invalid number '{w}'")))
    }

    fn width(&mut self) -> Result<Width, ParseError> {
        let start = self.pos;
        let bits = self.number()?;
        u32::try_from(bits).ok()
            .and_then(Width::from_bits)
            .ok_or_else(|| ParseError::new(start, format!("invalid bit width {bits}")))
    }

    fn string(&mut self) -> Result<&'a str, ParseError> {
        self.expect("\"")?;
        let rest = self.rest();
        let len = rest.find('"').ok_or_else(|| self.error("unterminated string"))?;
        self.pos += len + 1;
        Ok(&rest[..len])
    }

    fn expr(&mut self) -> Result<Operand, ParseError> {
        if self.eat("~") {
            return Ok(!self.expr()?);
        }

        self.skip_ws();
        let start = self.pos;
        let name = self.word();
        self.expect("(")?;
        let e = match name {
            "ExprInt" => {
                let value = self.number()?;
                self.expect(",")?;
                Operand::constant(value, self.width()?)
            },
            "ExprId" => {
                let id_pos = self.pos;
                let id = self.string()?;
                let idx = id.strip_prefix('p')
                    .and_then(|i| i.parse::<u8>().ok())
                    .filter(|i| (*i as usize) < INPUTS_PER_VECTOR)
                    .ok_or_else(|| ParseError::new(id_pos, format!("invalid placeholder '{id}'")))?;
                self.expect(",")?;
                Operand::placeholder(idx, Width::B8).resize(self.width()?, false)
            },
            "ExprSlice" => {
                let e = self.expr()?;
                self.expect(",")?;
                let lo_pos = self.pos;
                if self.number()? != 0 {
                    return Err(ParseError::new(lo_pos, "slices must start at bit 0"));
                }
                self.expect(",")?;
                let w = self.width()?;
                if w > e.width() {
                    return Err(self.error("slice is wider than its operand"));
                }
                e.resize(w, false)
            },
            "ExprOp" => self.operation()?,
            _ => return Err(ParseError::new(start, format!("unknown node '{name}'"))),
        };
        self.expect(")")?;
        Ok(e)
    }

    fn operation(&mut self) -> Result<Operand, ParseError> {
        let op_pos = self.pos;
        let op = self.string()?;
        self.expect(",")?;
        let l = self.expr()?;
        if op == "-" && !self.eat(",") {
            return Ok(-l);
        }
        if op != "-" {
            self.expect(",")?;
        }
        let r = self.expr()?;

        let op = match op {
            "+" => Opcode::Add,
            "-" => Opcode::Sub,
            "*" => Opcode::Mul,
            "/" => Opcode::UDiv,
            "&" => Opcode::And,
            "|" => Opcode::Or,
            "^" => Opcode::Xor,
            "<<" => return Ok(Operand::binary(Opcode::Shl, l, r.resize(Width::B1, false))),
            _ => return Err(ParseError::new(op_pos, format!("unknown operator '{op}'"))),
        };

        if l.width() != r.width() {
            return Err(self.error("operands have different widths"));
        }
        Ok(Operand::binary(op, l, r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> String {
        parse_corpus_line(s).unwrap().to_string()
    }

    #[test]
    fn prefix_expressions() {
        assert_eq!(parse(r#"ExprOp("^", ExprId("p0", 64), ExprId("p1", 64))"#), "p0 ^ p1");
        assert_eq!(parse(r#"ExprOp("+", ExprId("p0",64), ExprInt(5,64))"#), "p0 + 5");
        assert_eq!(parse(r#"~ExprOp("-", ExprId("p2", 64))"#), "~-p2");
        assert_eq!(
            parse(r#"ExprOp("-", ExprOp("*", ExprInt(3, 64), ExprId("p0", 64)), ExprId("p4", 64))"#),
            "3 * p0 - p4",
        );
        assert_eq!(parse(r#"ExprSlice(ExprId("p1", 64), 0, 32)"#), "low32(p1)");
        assert_eq!(parse(r#"ExprId("p0", 8)"#), "low8(p0)");

        let e = parse_corpus_line(r#"ExprOp("<<", ExprId("p0", 64), ExprInt(3, 64))"#).unwrap();
        assert_eq!(e.op, Opcode::Shl);
        assert_eq!(e.r.unwrap().width(), Width::B1);
    }

    #[test]
    fn malformed_lines() {
        for s in [
            "",
            r#"ExprId("p5", 64)"#,
            r#"ExprId("rax", 64)"#,
            r#"ExprInt(1, 12)"#,
            r#"ExprOp("%", ExprId("p0", 64), ExprId("p1", 64))"#,
            r#"ExprOp("+", ExprId("p0", 64), ExprId("p1", 32))"#,
            r#"ExprSlice(ExprId("p0", 64), 8, 16)"#,
            r#"ExprId("p0", 64) x"#,
            r#"ExprId("p0, 64)"#,
            r#"ExprOp("+", ExprId("p0", 64)"#,
        ] {
            assert!(parse_corpus_line(s).is_err(), "{s}");
        }

        let err = parse_corpus_line(r#"ExprFoo(1)"#).unwrap_err();
        assert_eq!(err.pos, 0);
    }
}
