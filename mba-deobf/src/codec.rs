//! A versioned binary encoding of expressions.
//!
//! All integers are little endian. An expression is
//! `[opcode: u8][width in bytes: u8][l][r]`, where `r` is only present for
//! binary opcodes. An operand starts with a tag:
//! - `0`: constant, `[width: u8][value: u64]`
//! - `1`: variable, `[width: u8][kind: u8][payload]`
//! - `2`: nested expression
//!
//! The variable payload is `[len: u32][utf-8 name]` for registers, an `i64`
//! frame offset for stack slots, a `u64` address for globals and a `u8`
//! index for placeholders.
//!
//! Streams of encoded expressions are sequences of `[len: u32][bytes]`
//! records.

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::Symbol;
use crate::expr::{Expr, Opcode, Operand, VarKind, Variable, Width};

/// Version of the encoding. Stored in oracle files.
pub const FORMAT_VERSION: u32 = 1;

/// Deepest nesting accepted by the decoder.
pub const MAX_DEPTH: usize = 512;

const TAG_CONST: u8 = 0;
const TAG_VAR: u8 = 1;
const TAG_NESTED: u8 = 2;

const KIND_REG: u8 = 0;
const KIND_STACK: u8 = 1;
const KIND_GLOBAL: u8 = 2;
const KIND_PLACEHOLDER: u8 = 3;

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error(transparent)]
    Io(io::Error),

    #[error("unexpected end of data")]
    UnexpectedEof,

    #[error("invalid opcode {0}")]
    InvalidOpcode(u8),

    #[error("invalid width {0}")]
    InvalidWidth(u8),

    #[error("invalid operand tag {0}")]
    InvalidTag(u8),

    #[error("invalid variable kind {0}")]
    InvalidVarKind(u8),

    #[error("register name is not valid utf-8")]
    InvalidUtf8,

    #[error("unsupported format version {0}, expected {FORMAT_VERSION}")]
    Version(u32),

    #[error("{what} ({count}) exceeds the size of the data")]
    CountTooLarge { what: &'static str, count: u64 },

    #[error("expression is nested deeper than {MAX_DEPTH}")]
    TooDeep,

    #[error("{0} trailing bytes after the expression")]
    TrailingBytes(usize),

    #[error("oracle index is not sorted by fingerprint")]
    UnsortedIndex,

    #[error("bucket offset {0:#x} lies outside the file")]
    InvalidOffset(u64),
}

impl From<io::Error> for SerializationError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Self::UnexpectedEof
        } else {
            Self::Io(e)
        }
    }
}

/// Encodes an expression.
pub fn encode_expr(e: &Expr) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_expr_into(e, &mut buf);
    buf
}

fn encode_expr_into(e: &Expr, buf: &mut Vec<u8>) {
    buf.push(e.op.code());
    buf.push(e.width.bytes());
    encode_operand(&e.l, buf);
    if let Some(r) = &e.r {
        encode_operand(r, buf);
    }
}

fn encode_operand(o: &Operand, buf: &mut Vec<u8>) {
    match o {
        Operand::Const { value, width } => {
            buf.push(TAG_CONST);
            buf.push(width.bytes());
            buf.extend_from_slice(&value.to_le_bytes());
        },
        Operand::Var(v) => {
            buf.push(TAG_VAR);
            buf.push(v.width.bytes());
            match &v.kind {
                VarKind::Reg(name) => {
                    let name = name.as_str().as_bytes();
                    buf.push(KIND_REG);
                    buf.extend_from_slice(&(name.len() as u32).to_le_bytes());
                    buf.extend_from_slice(name);
                },
                VarKind::Stack(off) => {
                    buf.push(KIND_STACK);
                    buf.extend_from_slice(&off.to_le_bytes());
                },
                VarKind::Global(addr) => {
                    buf.push(KIND_GLOBAL);
                    buf.extend_from_slice(&addr.to_le_bytes());
                },
                VarKind::Placeholder(i) => {
                    buf.push(KIND_PLACEHOLDER);
                    buf.push(*i);
                },
            }
        },
        Operand::Nested(e) => {
            buf.push(TAG_NESTED);
            encode_expr_into(e, buf);
        },
    }
}

/// Decodes an expression that occupies all of `bytes`.
pub fn decode_expr(bytes: &[u8]) -> Result<Expr, SerializationError> {
    let mut d = Decoder { buf: bytes, pos: 0 };
    let e = d.expr(0)?;
    match bytes.len() - d.pos {
        0 => Ok(e),
        n => Err(SerializationError::TrailingBytes(n)),
    }
}

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], SerializationError> {
        let end = self.pos.checked_add(n).ok_or(SerializationError::UnexpectedEof)?;
        let s = self.buf.get(self.pos..end).ok_or(SerializationError::UnexpectedEof)?;
        self.pos = end;
        Ok(s)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], SerializationError> {
        let mut a = [0u8; N];
        a.copy_from_slice(self.take(N)?);
        Ok(a)
    }

    fn u8(&mut self) -> Result<u8, SerializationError> {
        Ok(self.take(1)?[0])
    }

    fn width(&mut self) -> Result<Width, SerializationError> {
        let b = self.u8()?;
        Width::from_bytes(b).ok_or(SerializationError::InvalidWidth(b))
    }

    fn expr(&mut self, depth: usize) -> Result<Expr, SerializationError> {
        if depth > MAX_DEPTH {
            return Err(SerializationError::TooDeep);
        }

        let code = self.u8()?;
        let op = Opcode::from_code(code).ok_or(SerializationError::InvalidOpcode(code))?;
        let width = self.width()?;
        let l = self.operand(depth)?;
        let r = if op.is_unary() { None } else { Some(self.operand(depth)?) };
        Ok(Expr { op, l, r, width })
    }

    fn operand(&mut self, depth: usize) -> Result<Operand, SerializationError> {
        match self.u8()? {
            TAG_CONST => {
                let width = self.width()?;
                let value = u64::from_le_bytes(self.array()?);
                Ok(Operand::constant(value, width))
            },
            TAG_VAR => {
                let width = self.width()?;
                let kind = match self.u8()? {
                    KIND_REG => {
                        let len = u32::from_le_bytes(self.array()?) as usize;
                        let name = std::str::from_utf8(self.take(len)?)
                            .map_err(|_| SerializationError::InvalidUtf8)?;
                        VarKind::Reg(Symbol::from(name))
                    },
                    KIND_STACK => VarKind::Stack(i64::from_le_bytes(self.array()?)),
                    KIND_GLOBAL => VarKind::Global(u64::from_le_bytes(self.array()?)),
                    KIND_PLACEHOLDER => VarKind::Placeholder(self.u8()?),
                    k => return Err(SerializationError::InvalidVarKind(k)),
                };
                Ok(Operand::Var(Variable { kind, width }))
            },
            TAG_NESTED => Ok(Operand::Nested(Box::new(self.expr(depth + 1)?))),
            t => Err(SerializationError::InvalidTag(t)),
        }
    }
}

pub(crate) fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub(crate) fn write_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub(crate) fn read_u32<R: Read>(r: &mut R) -> Result<u32, SerializationError> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

pub(crate) fn read_u64<R: Read>(r: &mut R) -> Result<u64, SerializationError> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

/// Writes a `[len: u32][bytes]` record.
pub fn write_record<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "record is too large"))?;
    write_u32(w, len)?;
    w.write_all(bytes)
}

/// Reads a `[len: u32][bytes]` record. Returns `None` at the end of the
/// stream. Lengths above `limit` are rejected before anything is allocated.
pub fn read_record<R: Read>(r: &mut R, limit: u64) -> Result<Option<Vec<u8>>, SerializationError> {
    let mut b = [0u8; 4];
    let mut filled = 0;
    while filled < b.len() {
        match r.read(&mut b[filled..])? {
            0 if filled == 0 => return Ok(None),
            0 => return Err(SerializationError::UnexpectedEof),
            n => filled += n,
        }
    }

    let len = u32::from_le_bytes(b) as u64;
    if len > limit {
        return Err(SerializationError::CountTooLarge { what: "record length", count: len });
    }

    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(Some(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Expr {
        let w = Width::B8;
        let x = Operand::reg("rax", Width::B4).resize(w, true);
        let s = Operand::Var(Variable { kind: VarKind::Stack(-0x18), width: w });
        let g = Operand::Var(Variable { kind: VarKind::Global(0x4010), width: w });
        let p = Operand::placeholder(3, w);
        ((x * Operand::constant(0xdead_beef_0000_0001, w)) ^ !(s - g) & -p).into_expr()
    }

    #[test]
    fn encoding_is_lossless() {
        let e = sample();
        let bytes = encode_expr(&e);
        assert_eq!(bytes[0], e.op.code());
        assert_eq!(decode_expr(&bytes).unwrap(), e);
    }

    #[test]
    fn truncated_data() {
        let bytes = encode_expr(&sample());
        for len in 0..bytes.len() {
            assert!(
                matches!(decode_expr(&bytes[..len]), Err(SerializationError::UnexpectedEof)),
                "prefix of length {len}",
            );
        }

        let mut long = bytes.clone();
        long.push(0);
        assert!(matches!(decode_expr(&long), Err(SerializationError::TrailingBytes(1))));
    }

    #[test]
    fn invalid_fields() {
        let e = Expr::from_string("x + 1", Width::B2).unwrap();
        let bytes = encode_expr(&e);

        let mut b = bytes.clone();
        b[0] = 0xff;
        assert!(matches!(decode_expr(&b), Err(SerializationError::InvalidOpcode(0xff))));

        let mut b = bytes.clone();
        b[1] = 3;
        assert!(matches!(decode_expr(&b), Err(SerializationError::InvalidWidth(3))));

        let mut b = bytes;
        b[2] = 7;
        assert!(matches!(decode_expr(&b), Err(SerializationError::InvalidTag(7))));
    }

    #[test]
    fn nesting_is_limited() {
        let mut o = Operand::reg("x", Width::B1);
        for _ in 0..MAX_DEPTH + 2 {
            o = -o;
        }
        let bytes = encode_expr(&o.into_expr());
        assert!(matches!(decode_expr(&bytes), Err(SerializationError::TooDeep)));
    }

    #[test]
    fn record_streams() {
        let mut buf = Vec::new();
        write_record(&mut buf, b"abc").unwrap();
        write_record(&mut buf, b"").unwrap();

        let mut r = buf.as_slice();
        assert_eq!(read_record(&mut r, 16).unwrap().unwrap(), b"abc");
        assert_eq!(read_record(&mut r, 16).unwrap().unwrap(), b"");
        assert!(read_record(&mut r, 16).unwrap().is_none());

        let mut r = &buf[..5];
        assert!(matches!(read_record(&mut r, 16), Err(SerializationError::UnexpectedEof)));

        let mut r = &buf[..2];
        assert!(matches!(read_record(&mut r, 16), Err(SerializationError::UnexpectedEof)));

        let mut r = buf.as_slice();
        assert!(matches!(
            read_record(&mut r, 2),
            Err(SerializationError::CountTooLarge { count: 3, .. }),
        ));
    }
}
