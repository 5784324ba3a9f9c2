//! This module contains errors pertaining to the translation of instructions
//! and traces into predicate states.

use thiserror::Error;

use crate::{error::container, ir::BlockId};

/// Errors that occur while building predicate states, whether statically from
/// the control flow graph or dynamically from a recorded trace.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("No entry state exists for the catch block %bb{block}")]
    CatchEntry { block: BlockId },

    #[error("The state flowing into block %bb{block} could not be sliced at its dominator")]
    UnsliceableState { block: BlockId },

    #[error("Block %bb{block} is not reachable from the entry and has no state")]
    UnmodelledBlock { block: BlockId },

    #[error("A phi in block %bb{block} has no incoming value for predecessor %bb{pred}")]
    MissingPhiIncoming { block: BlockId, pred: BlockId },

    #[error("The trace calls {name}, which does not exist in the program")]
    UnknownCallTarget { name: String },

    #[error("The trace diverges from the method model: expected {expected} but found {found}")]
    TraceMismatch { expected: String, found: String },
}

/// A translation error with an associated position in the program.
pub type LocatedError = container::Located<Error>;

/// A container of translation errors used for aggregation of errors during
/// state construction.
pub type Errors = container::Errors<LocatedError>;

/// The result type for methods that may have translation errors.
pub type Result<T> = std::result::Result<T, LocatedError>;

/// Make it possible to attach positions to these errors.
impl container::Locatable for Error {
    type Located = LocatedError;

    fn locate(self, location: impl Into<container::SourceLoc>) -> Self::Located {
        container::Located {
            location: location.into(),
            payload:  self,
        }
    }
}
