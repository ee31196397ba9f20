use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use super::format::{Header, read_bucket, read_header};
use super::{Oracle, TestVectors};
use crate::codec::SerializationError;
use crate::expr::Expr;

/// An oracle file that only loads the classes that are looked up.
///
/// A bucket is read at most once, including buckets that turn out to be
/// corrupt, which are remembered as empty.
pub struct LazyOracle<R> {
    reader: R,
    size: u64,
    header: Header,
    cache: BTreeMap<u64, Vec<Expr>>,
}

impl LazyOracle<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SerializationError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let oracle = Self::from_reader(BufReader::new(file))?;
        log::info!(
            "opened oracle {} with {} classes and {} test vectors",
            path.display(),
            oracle.num_classes(),
            oracle.header.vectors.len(),
        );
        Ok(oracle)
    }
}

impl<R: Read + Seek> LazyOracle<R> {
    pub fn from_reader(mut reader: R) -> Result<Self, SerializationError> {
        let size = reader.seek(SeekFrom::End(0))?;
        let header = read_header(&mut reader, size)?;
        Ok(Self { reader, size, header, cache: BTreeMap::new() })
    }

    /// Number of classes in the index.
    pub fn num_classes(&self) -> usize {
        self.header.index.len()
    }

    /// Number of classes read so far.
    pub fn num_loaded(&self) -> usize {
        self.cache.len()
    }

    /// The fingerprints in the index, in ascending order.
    pub fn fingerprints(&self) -> impl Iterator<Item = u64> + '_ {
        self.header.index.iter().map(|(fp, _)| *fp)
    }

    fn load(&mut self, fingerprint: u64) -> Option<Vec<Expr>> {
        let i = self.header.index.binary_search_by_key(&fingerprint, |(fp, _)| *fp).ok()?;
        let pos = self.header.data_start.saturating_add(self.header.index[i].1);
        match read_bucket(&mut self.reader, pos, self.size) {
            Ok(exprs) => Some(exprs),
            Err(e) => {
                log::warn!("skipping corrupt class {fingerprint:016x}: {e}");
                Some(Vec::new())
            },
        }
    }
}

impl<R: Read + Seek> Oracle for LazyOracle<R> {
    fn test_vectors(&self) -> &TestVectors {
        &self.header.vectors
    }

    fn find_equivalence_class(&mut self, fingerprint: u64) -> Option<&[Expr]> {
        if !self.cache.contains_key(&fingerprint) {
            let exprs = self.load(fingerprint)?;
            self.cache.insert(fingerprint, exprs);
        }

        self.cache.get(&fingerprint)
            .filter(|c| !c.is_empty())
            .map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Operand, Width};
    use crate::oracle::EquivalenceClasses;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::io::Cursor;

    fn p(i: u8) -> Operand {
        Operand::placeholder(i, Width::B8)
    }

    fn sample() -> EquivalenceClasses {
        let mut c = EquivalenceClasses::random(32, &mut StdRng::seed_from_u64(9));
        for e in [
            p(0) ^ p(1),
            p(0) - p(1),
            p(0) + p(1) + p(2),
            !p(0) & p(1),
            p(3) * p(4),
        ] {
            c.add_abstract(e.into_expr()).unwrap();
        }
        c
    }

    #[test]
    fn round_trip() {
        let mut mem = sample();
        let mut buf = Vec::new();
        mem.write_to(&mut buf).unwrap();

        let mut lazy = LazyOracle::from_reader(Cursor::new(buf)).unwrap();
        assert_eq!(lazy.test_vectors(), mem.test_vectors());
        assert_eq!(lazy.num_classes(), mem.len());
        assert_eq!(lazy.num_loaded(), 0);

        let fps: Vec<u64> = lazy.fingerprints().collect();
        for fp in &fps {
            let expected = mem.find_equivalence_class(*fp).unwrap().to_vec();
            assert_eq!(lazy.find_equivalence_class(*fp).unwrap(), expected.as_slice());
        }
        assert_eq!(lazy.num_loaded(), fps.len());

        let missing = (0..).find(|fp| !fps.contains(fp)).unwrap();
        assert!(lazy.find_equivalence_class(missing).is_none());
        assert_eq!(lazy.num_loaded(), fps.len());

        let e = Expr::from_string("(a | b) - (a & b)", Width::B8).unwrap();
        assert_eq!(lazy.find_candidates(&e), mem.find_candidates(&e));
    }

    #[test]
    fn corrupt_buckets_are_skipped() {
        let mem = sample();
        let mut buf = Vec::new();
        mem.write_to(&mut buf).unwrap();

        // Truncate the last bucket.
        buf.truncate(buf.len() - 3);
        let mut lazy = LazyOracle::from_reader(Cursor::new(buf)).unwrap();
        let last = lazy.fingerprints().last().unwrap();
        let first = lazy.fingerprints().next().unwrap();
        assert!(lazy.find_equivalence_class(last).is_none());
        assert_eq!(lazy.num_loaded(), 1);
        assert!(lazy.find_equivalence_class(first).is_some());
    }

    #[test]
    fn missing_files() {
        assert!(matches!(
            LazyOracle::open("/nonexistent/oracle.bin"),
            Err(SerializationError::Io(_)),
        ));
        assert!(matches!(
            LazyOracle::from_reader(Cursor::new(Vec::new())),
            Err(SerializationError::UnexpectedEof),
        ));
    }
}
