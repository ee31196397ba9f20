//! Offline construction of oracle files from a textual corpus.

use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, BufRead, Read, Write};

use thiserror::Error;

use super::{NUM_TEST_VECTORS, TestVectors, corpus::parse_corpus_line, fingerprint, write_oracle};
use crate::codec::{SerializationError, decode_expr, encode_expr, read_record, write_record};
use crate::expr::ParseError;

/// Progress is logged every this many lines or records.
const PROGRESS_INTERVAL: usize = 10_000;

/// Longest record accepted in an expression stream.
const MAX_RECORD_SIZE: u64 = 1 << 24;

/// Default number of expressions kept per fingerprint.
pub const MAX_CLASS_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: ParseError,
    },

    #[error("record {record}: {source}")]
    Serialization {
        record: usize,
        #[source]
        source: SerializationError,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct OracleBuildConfig {
    /// Number of test vectors to fingerprint with.
    pub num_vectors: usize,

    /// Largest number of expressions kept per fingerprint.
    pub max_class_size: usize,
}

impl Default for OracleBuildConfig {
    fn default() -> Self {
        Self { num_vectors: NUM_TEST_VECTORS, max_class_size: MAX_CLASS_SIZE }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSummary {
    /// Expressions read.
    pub exprs: usize,

    /// Expressions that could not be fingerprinted.
    pub skipped: usize,

    pub classes: usize,

    /// Expressions written to the oracle.
    pub kept: usize,
}

/// Parses every non-empty line of a corpus and writes the expressions as
/// a stream of records. Returns the number of expressions.
pub fn compile_corpus<R: BufRead, W: Write>(input: R, output: &mut W) -> Result<usize, BuildError> {
    let mut count = 0;
    for (i, line) in input.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let e = parse_corpus_line(line).map_err(|source| BuildError::Parse { line: i + 1, source })?;
        write_record(output, &encode_expr(&e))?;
        count += 1;

        if (i + 1) % PROGRESS_INTERVAL == 0 {
            log::info!("compiled {} lines", i + 1);
        }
    }

    output.flush()?;
    Ok(count)
}

/// Fingerprints a stream of records written by [`compile_corpus`] and
/// writes an oracle that keeps the shortest distinct serializations of
/// every class.
pub fn build_oracle<R: Read, W: Write, G: Rng>(
    input: &mut R,
    output: &mut W,
    cfg: &OracleBuildConfig,
    rng: &mut G,
) -> Result<BuildSummary, BuildError> {
    let vectors = TestVectors::random(cfg.num_vectors, rng);
    let mut classes: BTreeMap<u64, BTreeSet<(usize, Vec<u8>)>> = BTreeMap::new();
    let mut summary = BuildSummary::default();

    loop {
        let record = summary.exprs;
        let bytes = match read_record(input, MAX_RECORD_SIZE) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => break,
            Err(source) => return Err(BuildError::Serialization { record, source }),
        };
        let e = decode_expr(&bytes).map_err(|source| BuildError::Serialization { record, source })?;
        summary.exprs += 1;

        let fp = match fingerprint(&e, &vectors, &[]) {
            Ok(fp) => fp,
            Err(err) => {
                log::warn!("skipping record {record} ({e}): {err}");
                summary.skipped += 1;
                continue;
            },
        };

        let class = classes.entry(fp).or_default();
        class.insert((bytes.len(), bytes));
        if class.len() > cfg.max_class_size {
            class.pop_last();
        }

        if summary.exprs % PROGRESS_INTERVAL == 0 {
            log::info!("fingerprinted {} expressions, {} classes", summary.exprs, classes.len());
        }
    }

    let buckets: BTreeMap<u64, Vec<Vec<u8>>> = classes.into_iter()
        .map(|(fp, c)| (fp, c.into_iter().map(|(_, b)| b).collect()))
        .collect();
    summary.classes = buckets.len();
    summary.kept = buckets.values().map(Vec::len).sum();

    write_oracle(output, &vectors, &buckets)?;
    output.flush()?;
    log::info!(
        "wrote {} expressions in {} classes, skipped {}",
        summary.kept,
        summary.classes,
        summary.skipped,
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Expr, Width};
    use crate::oracle::{LazyOracle, Oracle};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::io::Cursor;

    const CORPUS: &str = r#"
ExprOp("^", ExprId("p0", 64), ExprId("p1", 64))
ExprOp("-", ExprOp("|", ExprId("p0", 64), ExprId("p1", 64)), ExprOp("&", ExprId("p0", 64), ExprId("p1", 64)))

ExprOp("+", ExprId("p0", 64), ExprId("p1", 64))
ExprOp("/", ExprId("p0", 64), ExprInt(0, 64))
"#;

    fn build(corpus: &str, max_class_size: usize) -> (BuildSummary, Vec<u8>) {
        let mut stream = Vec::new();
        assert_eq!(compile_corpus(corpus.as_bytes(), &mut stream).unwrap(), 4);

        let cfg = OracleBuildConfig { num_vectors: 32, max_class_size };
        let mut out = Vec::new();
        let mut rng = StdRng::seed_from_u64(11);
        let summary = build_oracle(&mut stream.as_slice(), &mut out, &cfg, &mut rng).unwrap();
        (summary, out)
    }

    #[test_log::test]
    fn corpus_to_oracle() {
        let (summary, out) = build(CORPUS, MAX_CLASS_SIZE);

        assert_eq!(summary, BuildSummary { exprs: 4, skipped: 1, classes: 2, kept: 3 });

        let mut oracle = LazyOracle::from_reader(Cursor::new(out)).unwrap();
        assert_eq!(oracle.test_vectors().len(), 32);

        let e = Expr::from_string("(a | b) + (a & b)", Width::B8).unwrap();
        let c: Vec<String> = oracle.find_candidates(&e).iter().map(ToString::to_string).collect();
        assert_eq!(c.len(), 1);
        assert!(c[0] == "a + b" || c[0] == "b + a");

        // Shortest first.
        let e = Expr::from_string("(a & ~b) + (~a & b)", Width::B8).unwrap();
        let c = oracle.find_candidates(&e);
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].complexity(), 1);
        assert_eq!(c[1].complexity(), 3);
    }

    #[test]
    fn classes_are_capped() {
        let (summary, _) = build(CORPUS, 1);
        assert_eq!(summary.kept, 2);

        let cfg = OracleBuildConfig::default();
        assert_eq!(cfg.max_class_size, MAX_CLASS_SIZE);
        assert_eq!(cfg.num_vectors, NUM_TEST_VECTORS);
    }

    #[test]
    fn errors_carry_positions() {
        let corpus = "ExprId(\"p0\", 64)\n\nExprId(\"p9\", 64)\n";
        match compile_corpus(corpus.as_bytes(), &mut Vec::new()) {
            Err(BuildError::Parse { line, .. }) => assert_eq!(line, 3),
            r => panic!("expected a parse error, got {r:?}"),
        }

        let mut stream = Vec::new();
        write_record(&mut stream, &[0xff, 8]).unwrap();
        let r = build_oracle(
            &mut stream.as_slice(),
            &mut Vec::new(),
            &OracleBuildConfig::default(),
            &mut StdRng::seed_from_u64(1),
        );
        assert!(matches!(r, Err(BuildError::Serialization { record: 0, .. })));
    }
}
