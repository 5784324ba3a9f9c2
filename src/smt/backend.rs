//! This module contains the interface that satisfiability backends
//! implement, and the assignment type their models are reported in.

use std::{collections::BTreeMap, fmt::Debug};

use crate::{
    error::solver,
    smt::expr::{ExprRef, Sort},
};

/// A scalar value in a model.
///
/// Bitvector values are stored sign-extended into an `i64`, matching the
/// literal convention of [`crate::smt::expr::Expr`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ScalarValue {
    /// A boolean value.
    Bool(bool),

    /// A bitvector value of the provided width.
    Bits { value: i64, width: u32 },
}

impl ScalarValue {
    /// Gets the value as a signed integer; booleans read as `0` and `1`.
    #[must_use]
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Bool(value) => i64::from(*value),
            Self::Bits { value, .. } => *value,
        }
    }

    /// Checks whether the value is boolean `true`.
    #[must_use]
    pub fn is_true(&self) -> bool {
        matches!(self, Self::Bool(true))
    }

    /// Gets the default value of a sort: `false` for booleans and zero for
    /// bitvectors. The default of an array sort is the default of its
    /// element sort.
    #[must_use]
    pub fn default_of(sort: &Sort) -> Self {
        match sort {
            Sort::Bool => Self::Bool(false),
            Sort::BitVec(width) => Self::Bits {
                value: 0,
                width: *width,
            },
            Sort::Array { elem, .. } => Self::default_of(elem),
        }
    }
}

/// The value of an array variable in a model: explicit entries over a
/// default for every other index.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArrayValue {
    /// The explicitly assigned entries.
    pub entries: BTreeMap<i64, ScalarValue>,

    /// The value of every index without an entry.
    pub default: ScalarValue,
}

impl ArrayValue {
    /// Constructs an empty array value whose every index reads as the
    /// default of `elem`.
    #[must_use]
    pub fn empty(elem: &Sort) -> Self {
        Self {
            entries: BTreeMap::new(),
            default: ScalarValue::default_of(elem),
        }
    }

    /// Gets the value at the provided index.
    #[must_use]
    pub fn get(&self, index: i64) -> ScalarValue {
        self.entries.get(&index).copied().unwrap_or(self.default)
    }
}

/// A satisfying assignment reported by a backend.
///
/// Variables absent from the assignment were unconstrained; readers fall
/// back to the default of the variable's sort.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Assignment {
    /// The values of the scalar variables.
    pub scalars: BTreeMap<String, ScalarValue>,

    /// The values of the array variables.
    pub arrays: BTreeMap<String, ArrayValue>,
}

impl Assignment {
    /// Constructs an empty assignment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the value of the named scalar variable.
    #[must_use]
    pub fn scalar(&self, name: &str) -> Option<ScalarValue> {
        self.scalars.get(name).copied()
    }

    /// Sets the value of the named scalar variable.
    pub fn set_scalar(&mut self, name: impl Into<String>, value: ScalarValue) {
        self.scalars.insert(name.into(), value);
    }

    /// Sets one entry of the named array variable, creating the variable
    /// with a zeroed default when it is new.
    pub fn set_array_entry(&mut self, name: impl Into<String>, index: i64, value: ScalarValue) {
        self.arrays
            .entry(name.into())
            .or_insert_with(|| ArrayValue::empty(&Sort::BitVec(32)))
            .entries
            .insert(index, value);
    }
}

/// The outcome of one satisfiability check.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CheckStatus {
    /// The assertions are contradictory; the aimed-at outcome is infeasible.
    Unsat,

    /// The backend could not decide, for the recorded reason.
    Unknown(String),

    /// The assertions are satisfiable under the reported assignment.
    Sat(Assignment),
}

/// The interface to a satisfiability backend.
///
/// A backend receives the fully assembled assertion set (the state clauses
/// of the originating run followed by the aimed-at path condition) and
/// decides it in one shot. Backends keep no assertion state between calls.
pub trait SolverBackend: Debug {
    /// Checks the conjunction of `assertions` for satisfiability.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the backend could not be reached or produced
    /// output that could not be interpreted; an inconclusive but orderly
    /// answer is [`CheckStatus::Unknown`], not an error.
    fn check(&mut self, assertions: &[ExprRef]) -> Result<CheckStatus, solver::Error>;
}

#[cfg(test)]
mod test {
    use crate::smt::{
        backend::{ArrayValue, Assignment, ScalarValue},
        expr::Sort,
    };

    #[test]
    fn defaults_follow_the_sort() {
        assert_eq!(ScalarValue::default_of(&Sort::Bool), ScalarValue::Bool(false));
        assert_eq!(
            ScalarValue::default_of(&Sort::BitVec(64)),
            ScalarValue::Bits {
                value: 0,
                width: 64
            }
        );
    }

    #[test]
    fn array_values_fall_back_to_their_default() {
        let mut array = ArrayValue::empty(&Sort::BitVec(32));
        array.entries.insert(2, ScalarValue::Bits { value: 7, width: 32 });

        assert_eq!(array.get(2).as_i64(), 7);
        assert_eq!(array.get(3).as_i64(), 0);
    }

    #[test]
    fn missing_scalars_read_as_absent() {
        let mut assignment = Assignment::new();
        assignment.set_scalar("x", ScalarValue::Bool(true));

        assert!(assignment.scalar("x").is_some());
        assert!(assignment.scalar("y").is_none());
    }
}
