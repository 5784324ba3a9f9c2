//! This module contains errors pertaining to the satisfiability backends.

use thiserror::Error;

use crate::error::container;

/// Errors that occur while querying a solver backend or interpreting its
/// response.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("The solver process could not be reached: {message}")]
    Io { message: String },

    #[error("Unexpected solver output: `{line}`")]
    MalformedResponse { line: String },

    #[error("The solver returned a model that could not be interpreted: {detail}")]
    MalformedModel { detail: String },

    #[error("The query cannot be encoded for the solver: {detail}")]
    Unsupported { detail: String },
}

impl Error {
    /// Constructs an I/O error from anything that can describe itself.
    pub fn io(message: impl ToString) -> Self {
        Self::Io {
            message: message.to_string(),
        }
    }

    /// Constructs an unsupported-query error with the provided `detail`.
    pub fn unsupported(detail: impl Into<String>) -> Self {
        Self::Unsupported {
            detail: detail.into(),
        }
    }
}

/// A solver error with the program position whose query triggered it.
pub type LocatedError = container::Located<Error>;

/// A container of solver errors.
pub type Errors = container::Errors<LocatedError>;

/// The result type for methods that may have solver errors.
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
