//! The oracle file format.
//!
//! ```text
//! [version: u32][vectors: u32] vectors * 5 * [input: u64]
//! [classes: u32] classes * [fingerprint: u64][offset: u64]
//! buckets
//! ```
//!
//! The index is sorted by fingerprint. Offsets are relative to the end of
//! the index. A bucket is `[count: u32]` followed by `count` records as
//! written by [`write_record`].

use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom, Write};

use super::{INPUTS_PER_VECTOR, TestVectors};
use crate::codec::{
    FORMAT_VERSION, SerializationError, decode_expr, read_record, read_u32, read_u64, write_record,
    write_u32, write_u64,
};
use crate::expr::Expr;

const VECTOR_SIZE: u64 = 8 * INPUTS_PER_VECTOR as u64;
const INDEX_ENTRY_SIZE: u64 = 16;

/// Everything in front of the buckets.
#[derive(Debug, Clone)]
pub struct Header {
    pub vectors: TestVectors,

    /// `(fingerprint, offset)`, sorted by fingerprint.
    pub index: Vec<(u64, u64)>,

    /// Absolute position of the first bucket.
    pub data_start: u64,
}

/// Writes an oracle. Every bucket holds encoded expressions.
pub fn write_oracle<W: Write>(
    w: &mut W,
    vectors: &TestVectors,
    buckets: &BTreeMap<u64, Vec<Vec<u8>>>,
) -> io::Result<()> {
    let too_large = |what| io::Error::new(io::ErrorKind::InvalidInput, format!("too many {what}"));

    write_u32(w, FORMAT_VERSION)?;
    write_u32(w, u32::try_from(vectors.len()).map_err(|_| too_large("test vectors"))?)?;
    for v in &vectors.0 {
        for x in v {
            write_u64(w, *x)?;
        }
    }

    write_u32(w, u32::try_from(buckets.len()).map_err(|_| too_large("classes"))?)?;
    let mut offset = 0u64;
    for (fp, bucket) in buckets {
        write_u64(w, *fp)?;
        write_u64(w, offset)?;
        offset += 4 + bucket.iter().map(|b| 4 + b.len() as u64).sum::<u64>();
    }

    for bucket in buckets.values() {
        write_u32(w, u32::try_from(bucket.len()).map_err(|_| too_large("expressions"))?)?;
        for b in bucket {
            write_record(w, b)?;
        }
    }

    Ok(())
}

fn check_count(what: &'static str, count: u32, elem_size: u64, size: u64) -> Result<(), SerializationError> {
    if count as u64 * elem_size > size {
        return Err(SerializationError::CountTooLarge { what, count: count as u64 });
    }
    Ok(())
}

/// Reads the header of an oracle of `size` bytes.
pub(crate) fn read_header<R: Read + Seek>(r: &mut R, size: u64) -> Result<Header, SerializationError> {
    r.seek(SeekFrom::Start(0))?;

    let version = read_u32(r)?;
    if version != FORMAT_VERSION {
        return Err(SerializationError::Version(version));
    }

    let n = read_u32(r)?;
    check_count("number of test vectors", n, VECTOR_SIZE, size)?;
    let mut vectors = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let mut v = [0u64; INPUTS_PER_VECTOR];
        for x in &mut v {
            *x = read_u64(r)?;
        }
        vectors.push(v);
    }

    let n = read_u32(r)?;
    check_count("number of classes", n, INDEX_ENTRY_SIZE, size)?;
    let mut index = Vec::with_capacity(n as usize);
    for _ in 0..n {
        index.push((read_u64(r)?, read_u64(r)?));
    }

    if !index.is_sorted_by(|a, b| a.0 < b.0) {
        return Err(SerializationError::UnsortedIndex);
    }

    let data_start = r.stream_position()?;
    Ok(Header { vectors: TestVectors(vectors), index, data_start })
}

/// Reads the bucket at the absolute position `pos`.
pub(crate) fn read_bucket<R: Read + Seek>(
    r: &mut R,
    pos: u64,
    size: u64,
) -> Result<Vec<Expr>, SerializationError> {
    if pos >= size {
        return Err(SerializationError::InvalidOffset(pos));
    }

    r.seek(SeekFrom::Start(pos))?;
    let n = read_u32(r)?;
    check_count("bucket size", n, 4, size - pos)?;

    let mut exprs = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let bytes = read_record(r, size - pos)?.ok_or(SerializationError::UnexpectedEof)?;
        exprs.push(decode_expr(&bytes)?);
    }
    Ok(exprs)
}
