//! Cheap heuristics: which expressions look like MBA,
//! and how to pick test inputs.

use rand::Rng;

use crate::expr::{Expr, Width};

/// Default probability of picking one of 0, 1 or -1 as a test input.
pub const SPECIAL_PROBABILITY: f64 = 0.2;

/// Default number of randomized equivalence trials.
pub const NUM_TEST_CASES: usize = 256;

/// A random value of the given width. With probability `special_probability`
/// the value is one of 0, 1 or all ones.
pub fn random_value<R: Rng>(rng: &mut R, width: Width, special_probability: f64) -> u64 {
    if rng.random_bool(special_probability.clamp(0.0, 1.0)) {
        match rng.random_range(0..3u8) {
            0 => 0,
            1 => 1,
            _ => width.mask(),
        }
    } else {
        width.truncate(rng.random())
    }
}

/// Does `e` mix at least `min_arith` arithmetic and `min_bool`
/// bitwise boolean operations?
pub fn is_mba(e: &Expr, min_arith: usize, min_bool: usize) -> bool {
    e.count_ops(&|op| op.is_arith()) >= min_arith
        && e.count_ops(&|op| op.is_bool()) >= min_bool
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn mba_detection() {
        let e = Expr::from_string("(x & y) + (x ^ y)", Width::B8).unwrap();
        assert!(is_mba(&e, 1, 1));
        assert!(!is_mba(&e, 2, 1));

        let e = Expr::from_string("x + y * 3", Width::B8).unwrap();
        assert!(!is_mba(&e, 1, 1));

        let e = Expr::from_string("x | y", Width::B8).unwrap();
        assert!(!is_mba(&e, 1, 1));
    }

    #[test]
    fn special_values_show_up() {
        let mut rng = StdRng::seed_from_u64(7);
        let vals: Vec<_> = (0..2000)
            .map(|_| random_value(&mut rng, Width::B4, SPECIAL_PROBABILITY))
            .collect();
        assert!(vals.contains(&0));
        assert!(vals.contains(&1));
        assert!(vals.contains(&0xffff_ffff));
        assert!(vals.iter().all(|v| *v <= 0xffff_ffff));

        let ones = (0..100)
            .map(|_| random_value(&mut rng, Width::B8, 1.0))
            .all(|v| v == 0 || v == 1 || v == u64::MAX);
        assert!(ones);
    }
}
