//! This module contains the predicate language that symbolic states are
//! written in.
//!
//! A [`Predicate`] relates terms; its [`PredicateKind`] records _why_ the
//! relation holds: because the program computed it (`State`), because a
//! branch chose it (`Path`), or because the analysis supplied it from the
//! outside (`Assume`, `Axiom`, `Require`).

pub mod state;
pub mod term;

use std::fmt;

use crate::{
    ir::{Const, FieldRef, TypeSig},
    predicate::term::{Term, TermRef},
};

/// The provenance of a predicate.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PredicateKind {
    /// Produced by an effect of the program itself.
    State,

    /// Produced by a control-flow decision; path predicates are the ones a
    /// solver can be asked to flip.
    Path,

    /// Supplied by the analysis as an assumption about the environment.
    Assume,

    /// Supplied by the analysis as a definitional fact.
    Axiom,

    /// Supplied by the analysis as an obligation on callers.
    Require,
}

impl fmt::Display for PredicateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::State => "@S",
            Self::Path => "@P",
            Self::Assume => "@A",
            Self::Axiom => "@X",
            Self::Require => "@R",
        };
        write!(f, "{tag}")
    }
}

/// The relation a predicate asserts.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum PredicateOp {
    /// `lhs == rhs`.
    Equality { lhs: TermRef, rhs: TermRef },

    /// `lhs != rhs`.
    Inequality { lhs: TermRef, rhs: TermRef },

    /// `cond` matched none of the declared `cases` of a switch.
    DefaultSwitch { cond: TermRef, cases: Vec<TermRef> },

    /// `array[index]` was overwritten with `value`.
    ArrayStore {
        array: TermRef,
        index: TermRef,
        value: TermRef,
    },

    /// The field was overwritten with `value`.
    FieldStore {
        object: Option<TermRef>,
        field:  FieldRef,
        value:  TermRef,
    },

    /// `result` is a fresh instance of `class`.
    NewObject { result: TermRef, class: String },

    /// `result` is a fresh array of `elem` with the provided `length`.
    NewArray {
        result: TermRef,
        elem:   TypeSig,
        length: TermRef,
    },

    /// An un-inlined call for its side effects alone.
    Call {
        result:   Option<TermRef>,
        method:   String,
        receiver: Option<TermRef>,
        args:     Vec<TermRef>,
    },
}

impl fmt::Display for PredicateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equality { lhs, rhs } => write!(f, "{lhs} == {rhs}"),
            Self::Inequality { lhs, rhs } => write!(f, "{lhs} != {rhs}"),
            Self::DefaultSwitch { cond, cases } => {
                write!(f, "{cond} !in {{")?;
                for (i, case) in cases.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{case}")?;
                }
                write!(f, "}}")
            }
            Self::ArrayStore {
                array,
                index,
                value,
            } => write!(f, "{array}[{index}] <- {value}"),
            Self::FieldStore {
                object,
                field,
                value,
            } => match object {
                Some(object) => write!(f, "{object}.{} <- {value}", field.name),
                None => write!(f, "{field} <- {value}"),
            },
            Self::NewObject { result, class } => write!(f, "{result} <- new {class}"),
            Self::NewArray {
                result,
                elem,
                length,
            } => write!(f, "{result} <- new {elem}[{length}]"),
            Self::Call {
                result,
                method,
                receiver,
                args,
            } => {
                if let Some(result) = result {
                    write!(f, "{result} <- ")?;
                }
                if let Some(receiver) = receiver {
                    write!(f, "{receiver}.")?;
                }
                write!(f, "{method}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A single assertion about the symbolic values of a run.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Predicate {
    /// Why the assertion holds.
    pub kind: PredicateKind,

    /// What the assertion relates.
    pub op: PredicateOp,
}

impl Predicate {
    /// Constructs an equality predicate of the provided kind.
    #[must_use]
    pub fn eq(kind: PredicateKind, lhs: TermRef, rhs: TermRef) -> Self {
        Self {
            kind,
            op: PredicateOp::Equality { lhs, rhs },
        }
    }

    /// Constructs an inequality predicate of the provided kind.
    #[must_use]
    pub fn neq(kind: PredicateKind, lhs: TermRef, rhs: TermRef) -> Self {
        Self {
            kind,
            op: PredicateOp::Inequality { lhs, rhs },
        }
    }

    /// Constructs the predicate for falling through to a switch default.
    #[must_use]
    pub fn default_switch(kind: PredicateKind, cond: TermRef, cases: Vec<TermRef>) -> Self {
        Self {
            kind,
            op: PredicateOp::DefaultSwitch { cond, cases },
        }
    }

    /// Constructs an array store predicate.
    #[must_use]
    pub fn array_store(kind: PredicateKind, array: TermRef, index: TermRef, value: TermRef) -> Self {
        Self {
            kind,
            op: PredicateOp::ArrayStore {
                array,
                index,
                value,
            },
        }
    }

    /// Constructs a field store predicate.
    #[must_use]
    pub fn field_store(
        kind: PredicateKind,
        object: Option<TermRef>,
        field: FieldRef,
        value: TermRef,
    ) -> Self {
        Self {
            kind,
            op: PredicateOp::FieldStore {
                object,
                field,
                value,
            },
        }
    }

    /// Constructs an object allocation predicate.
    #[must_use]
    pub fn new_object(kind: PredicateKind, result: TermRef, class: impl Into<String>) -> Self {
        Self {
            kind,
            op: PredicateOp::NewObject {
                result,
                class: class.into(),
            },
        }
    }

    /// Constructs an array allocation predicate.
    #[must_use]
    pub fn new_array(kind: PredicateKind, result: TermRef, elem: TypeSig, length: TermRef) -> Self {
        Self {
            kind,
            op: PredicateOp::NewArray {
                result,
                elem,
                length,
            },
        }
    }

    /// Constructs a call predicate for an un-inlined call.
    #[must_use]
    pub fn call(
        kind: PredicateKind,
        result: Option<TermRef>,
        method: impl Into<String>,
        receiver: Option<TermRef>,
        args: Vec<TermRef>,
    ) -> Self {
        Self {
            kind,
            op: PredicateOp::Call {
                result,
                method: method.into(),
                receiver,
                args,
            },
        }
    }

    /// Gets the logical negation of this predicate, when one exists.
    ///
    /// An equality against a boolean constant flips the constant, any other
    /// equality becomes an inequality and vice versa. Effects and switch
    /// defaults have no single negation and yield [`None`].
    #[must_use]
    pub fn inverse(&self) -> Option<Self> {
        let op = match &self.op {
            PredicateOp::Equality { lhs, rhs } => match rhs.as_ref() {
                Term::Const(Const::Bool(b)) => PredicateOp::Equality {
                    lhs: lhs.clone(),
                    rhs: Term::bool(!b),
                },
                _ => PredicateOp::Inequality {
                    lhs: lhs.clone(),
                    rhs: rhs.clone(),
                },
            },
            PredicateOp::Inequality { lhs, rhs } => PredicateOp::Equality {
                lhs: lhs.clone(),
                rhs: rhs.clone(),
            },
            _ => return None,
        };
        Some(Self {
            kind: self.kind,
            op,
        })
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.op)
    }
}
