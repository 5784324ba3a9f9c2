//! This module contains errors pertaining to the shape of the method model
//! and the graphs derived from it.

use thiserror::Error;

use crate::{error::container, ir::BlockId};

/// Errors that occur while assembling the method model or while ordering its
/// control flow graph.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Encountered two methods named {name}")]
    DuplicateMethod { name: String },

    #[error("The method {name} declares no basic blocks")]
    EmptyMethod { name: String },

    #[error("Block %bb{block} has no terminator")]
    MissingTerminator { block: BlockId },

    #[error("Block %bb{block} refers to the undeclared block %bb{target}")]
    InvalidBlockReference { block: BlockId, target: BlockId },

    #[error("No method named {name} exists in the program")]
    UnknownMethod { name: String },

    #[error("The graph contains a cycle through {at}")]
    CyclicGraph { at: String },
}

/// A model error with an associated position in the program.
pub type LocatedError = container::Located<Error>;

/// A container of model errors used for aggregation of errors during
/// assembly.
pub type Errors = container::Errors<LocatedError>;

/// The result type for methods that may have model errors.
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
