//! This module contains the solver side of the search: the expression
//! language queries are phrased in, the conversion from predicate states into
//! that language, the backends that decide the queries, and the recovery of
//! language-level inputs from a satisfying model.
//!
//! Two backends are provided. [`local::LocalSolver`] is a bounded enumerative
//! solver with no external dependencies, which is enough for the small
//! integer and heap queries branch flipping produces. [`z3::Z3Process`]
//! drives a `z3` binary over SMT-LIB when one is available.

pub mod backend;
pub mod convert;
pub mod eval;
pub mod expr;
pub mod local;
pub mod model;
pub mod z3;
