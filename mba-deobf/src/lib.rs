//! Simplification of Mixed Boolean-Arithmetic expressions.
//!
//! Candidates for an expression come from an oracle of known equivalences,
//! from linear and linear-conjunction reconstruction and from a nonlinear
//! normal form. They are checked on random inputs and optionally proven
//! with z3 before the [`optimizer::Optimizer`] substitutes them.

// It would be nicer to import the symbol_table crate ourselves,
// and re-export GlobalSymbol, but we don't want to run into
// version conflicts.
pub use egg::Symbol;

pub mod bitvec;
pub mod bitwise_expr;
pub mod bitwise_table;
pub mod candidate;
pub mod codec;
pub mod emulator;
pub mod expr;
pub mod formatter;
pub mod heuristics;
pub mod lin_conj;
pub mod linear;
pub mod nonlinear;
pub mod optimizer;
pub mod oracle;
pub mod peephole;
pub mod simp_lin_conj;
pub mod simplify_boolean;
#[cfg(feature = "z3")]
pub mod smt;
pub mod valuation;
pub mod verify;
