//! This module contains the symbolic image of a single concrete run.

use std::{collections::HashMap, fmt};

use uuid::Uuid;

use crate::{
    ir::InstLoc,
    predicate::{state::PredicateState, term::TermRef, Predicate},
    trace::TraceValue,
};

/// A predicate together with the instruction that produced it.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Clause {
    /// The instruction the predicate was produced for.
    pub location: InstLoc,

    /// The predicate itself.
    pub predicate: Predicate,
}

impl Clause {
    /// Constructs a new clause.
    #[must_use]
    pub fn new(location: InstLoc, predicate: Predicate) -> Self {
        Self {
            location,
            predicate,
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.location, self.predicate)
    }
}

/// The syntactic shape of the branch a path clause came from.
///
/// The shape decides how many sibling outcomes exist at the branch and
/// therefore when the branch counts as exhausted, and how a clause is
/// reverted to aim at an unseen sibling.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PathClauseKind {
    /// A two-way conditional branch.
    Condition,

    /// A lookup switch with declared case values.
    Switch,

    /// A table switch over a contiguous value range.
    TableSwitch,

    /// An implicit null check at a dereference.
    NullCheck,

    /// An implicit bounds check at an array access.
    BoundsCheck,

    /// An implicit type check at a checked cast or type test.
    TypeCheck,
}

impl fmt::Display for PathClauseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Condition => "condition",
            Self::Switch => "switch",
            Self::TableSwitch => "tableswitch",
            Self::NullCheck => "null-check",
            Self::BoundsCheck => "bounds-check",
            Self::TypeCheck => "type-check",
        };
        write!(f, "{name}")
    }
}

/// A path predicate together with where and why it was produced.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PathClause {
    /// The branching instruction the clause was produced for.
    pub location: InstLoc,

    /// The shape of the branch.
    pub kind: PathClauseKind,

    /// The predicate recording the outcome that was taken.
    pub predicate: Predicate,
}

impl PathClause {
    /// Constructs a new path clause.
    #[must_use]
    pub fn new(location: InstLoc, kind: PathClauseKind, predicate: Predicate) -> Self {
        Self {
            location,
            kind,
            predicate,
        }
    }

    /// Views the path clause as a plain clause.
    #[must_use]
    pub fn as_clause(&self) -> Clause {
        Clause::new(self.location, self.predicate.clone())
    }
}

impl fmt::Display for PathClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ({}) {}", self.location, self.kind, self.predicate)
    }
}

/// The symbolic image of one concrete run: everything the analysis knows
/// about the path the run took and the values it saw.
#[derive(Clone, Debug)]
pub struct SymbolicState {
    /// Every clause of the run in trace order, path clauses included.
    pub clauses: Vec<Clause>,

    /// The path condition of the run: the path clauses in trace order.
    pub path: Vec<PathClause>,

    /// The concrete values the run observed for symbolic terms, as far as
    /// they were recorded.
    pub concrete: HashMap<TermRef, TraceValue>,

    /// The identity of the concrete run this state was built from.
    pub run: Uuid,

    /// The exception class the run threw, when it did not complete normally.
    pub raised: Option<String>,
}

impl SymbolicState {
    /// Gets the full state of the run as a straight-line predicate state.
    #[must_use]
    pub fn as_state(&self) -> PredicateState {
        PredicateState::basic(
            self.clauses
                .iter()
                .map(|clause| clause.predicate.clone())
                .collect::<Vec<Predicate>>(),
        )
    }

    /// Gets the path condition of the run as a straight-line predicate
    /// state.
    #[must_use]
    pub fn path_state(&self) -> PredicateState {
        PredicateState::basic(
            self.path
                .iter()
                .map(|clause| clause.predicate.clone())
                .collect::<Vec<Predicate>>(),
        )
    }
}

impl fmt::Display for SymbolicState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run {}:", self.run)?;
        for clause in &self.clauses {
            writeln!(f, "  {clause}")?;
        }
        if let Some(raised) = &self.raised {
            writeln!(f, "  raised {raised}")?;
        }
        Ok(())
    }
}
