//! Basically a key-value store for variables and their values,
//! but you can specify what to do when a variable is not found.

use rand::Rng;

use crate::emulator::EvalError;
use crate::expr::{VarKind, Variable, Width};
use crate::heuristics::random_value;

/// Supplies the values of variables during evaluation.
///
/// Implementations may be stateful, e.g. assign a value the first
/// time a variable is seen and remember it.
pub trait Valuation {
    /// The value of `var`. Only the low `var.width` bytes are used.
    fn value(&mut self, var: &Variable) -> Result<u64, EvalError>;
}

/// Stores values that should be substituted into variables.
#[derive(Debug, Clone)]
pub struct Assignment {
    /// The key value pairs are stored as a Vector
    /// because there are so few variables.
    /// The order is the order in which the variables were first seen.
    vals: Vec<(Variable, u64)>,

    /// What to do when the value of a variable is
    /// requested but not found in the assignment.
    missing: MissingValue,
}

/// What should be done for a variable that is not found in the assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingValue {
    /// Fail with [`EvalError::MissingVariable`].
    Error,

    /// Assign zero and remember the variable.
    Zero,
}

impl Assignment {
    /// An empty assignment that fails when any variable is requested.
    pub fn empty() -> Self {
        Self::from_vec(Vec::new())
    }

    /// An assignment that returns zero for any variable.
    /// The variables are recorded in the order they are seen.
    pub fn zero() -> Self {
        Self { vals: Vec::new(), missing: MissingValue::Zero }
    }

    /// Initializes an assignment from a list of pairs of variables and values.
    /// If a variable is requested that is not in the list, evaluation fails.
    pub fn from_vec(vals: Vec<(Variable, u64)>) -> Self {
        let vals = vals.into_iter()
            .map(|(v, x)| { let x = v.width.truncate(x); (v, x) })
            .collect();
        Self { vals, missing: MissingValue::Error }
    }

    /// Returns an assignment that is zero for all the given variables and
    /// fails for all other variables.
    pub fn vars_zero(vars: &[Variable]) -> Self {
        Self::from_vec(vars.iter().map(|v| (v.clone(), 0)).collect())
    }

    /// Sets the value of a variable.
    pub fn set_value(&mut self, var: &Variable, value: u64) {
        let value = var.width.truncate(value);
        for (n, v) in &mut self.vals {
            if n == var {
                *v = value;
                return;
            }
        }

        self.vals.push((var.clone(), value));
    }

    /// Returns the values of all the seen variables.
    pub fn values(&self) -> &[(Variable, u64)] {
        &self.vals
    }

    /// The seen variables, in the order they were first seen.
    pub fn vars(&self) -> impl Iterator<Item = &Variable> {
        self.vals.iter().map(|(v, _)| v)
    }

    /// Sets variable `i` to bit `i` of `bits`, i.e. to 0 or 1.
    ///
    /// # Example
    /// ```
    /// use mba_deobf::valuation::{Assignment, Valuation};
    /// use mba_deobf::expr::{Variable, Width};
    ///
    /// let x = Variable::reg("x", Width::B1);
    /// let y = Variable::reg("y", Width::B1);
    ///
    /// let mut v = Assignment::vars_zero(&[x.clone(), y.clone()]);
    /// v.assign_bits(0b10);
    /// assert_eq!((v.value(&x).unwrap(), v.value(&y).unwrap()), (0, 1));
    /// ```
    pub fn assign_bits(&mut self, bits: usize) {
        for (i, (_, v)) in self.vals.iter_mut().enumerate() {
            *v = ((bits >> i) & 1) as u64;
        }
    }

    /// Updates the values of the variables to random values that hit
    /// 0, 1 and -1 with probability `special_probability`.
    pub fn update_random<R: Rng>(&mut self, rng: &mut R, special_probability: f64) {
        for (var, v) in &mut self.vals {
            *v = random_value(rng, var.width, special_probability);
        }
    }
}

impl Valuation for Assignment {
    fn value(&mut self, var: &Variable) -> Result<u64, EvalError> {
        if let Some((_, v)) = self.vals.iter().find(|(n, _)| n == var) {
            return Ok(*v);
        }

        match self.missing {
            MissingValue::Error => Err(EvalError::MissingVariable(var.clone())),
            MissingValue::Zero => {
                self.vals.push((var.clone(), 0));
                Ok(0)
            },
        }
    }
}

/// Feeds one test vector into an expression.
///
/// The variable `slots[i]` receives input `i`, and a placeholder `p_i`
/// that has no slot receives input `i` as well. Inputs are truncated to
/// the variable's width.
#[derive(Debug, Clone, Copy)]
pub struct SlotValuation<'a> {
    pub inputs: &'a [u64],
    pub slots: &'a [Variable],
}

impl Valuation for SlotValuation<'_> {
    fn value(&mut self, var: &Variable) -> Result<u64, EvalError> {
        let idx = match self.slots.iter().position(|s| s == var) {
            Some(i) => Some(i),
            None => match var.kind {
                VarKind::Placeholder(i) => Some(i as usize),
                _ => None,
            },
        };

        idx.and_then(|i| self.inputs.get(i))
            .map(|x| var.width.truncate(*x))
            .ok_or_else(|| EvalError::MissingVariable(var.clone()))
    }
}

/// Reads every variable at all ones. Mostly useful in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllOnes;

impl Valuation for AllOnes {
    fn value(&mut self, var: &Variable) -> Result<u64, EvalError> {
        Ok(var.width.mask())
    }
}
