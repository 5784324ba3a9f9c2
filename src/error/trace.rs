//! This module contains errors pertaining to the parsing of recorded
//! execution traces.

use thiserror::Error;

use crate::error::container;

/// Errors that occur while parsing the textual trace format emitted by
/// instrumented runs.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Unrecognised action: `{text}`")]
    InvalidAction { text: String },

    #[error("Unrecognised value literal: `{text}`")]
    InvalidValue { text: String },

    #[error("Unrecognised block reference: `{text}`")]
    InvalidBlockRef { text: String },

    #[error("The {action} action is missing its {field}")]
    MissingField { action: String, field: String },
}

/// A trace error with the trace line at which it occurred.
pub type LocatedError = container::Located<Error>;

/// A container of trace errors.
pub type Errors = container::Errors<LocatedError>;

/// The result type for methods that may have trace errors.
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
