//! This module contains the primary error type for the explorer's interface.
//! It also re-exports the more specific error types that are
//! subsystem-specific.

pub mod container;
pub mod graph;
pub mod solver;
pub mod trace;
pub mod translation;

use thiserror::Error;

/// The interface result type for the library.
///
/// # Usage
///
/// Any function considered to be part of the public interface of the library
/// should return this result type. Subsystems should return the more-specific
/// child error types as appropriate.
///
/// Note that _all_ of the library is public in order to facilitate use-cases
/// beyond the ones designed for.
pub type Result<T> = std::result::Result<T, Errors>;

/// The interface error type for the library.
///
/// All errors returned from the library interface (and hence encountered by
/// the clients of the library) should be members of this enum.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// Errors that come from assembling or ordering the method model.
    #[error(transparent)]
    Graph(#[from] graph::Error),

    /// Errors from the predicate state construction subsystem.
    #[error(transparent)]
    Translation(#[from] translation::Error),

    /// Errors from the trace parsing subsystem.
    #[error(transparent)]
    Trace(#[from] trace::Error),

    /// Errors from the satisfiability backends.
    #[error(transparent)]
    Solver(#[from] solver::Error),

    /// An unknown error, represented as a string.
    #[error("Unknown Error: {_0:?}")]
    Other(String),
}

impl Error {
    /// Constructs an unknown error with the provided `message`.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

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

/// A library error with an associated position in the program.
pub type LocatedError = container::Located<Error>;

/// A container of errors that may occur in the explorer.
pub type Errors = container::Errors<LocatedError>;

/// Allow simple conversions from located model errors by re-wrapping the
/// located error around the more general payload.
impl From<graph::LocatedError> for LocatedError {
    fn from(value: graph::LocatedError) -> Self {
        let location = value.location;
        let payload = Error::from(value.payload);
        Self { location, payload }
    }
}

/// Allow simple conversions from located model errors by re-wrapping the
/// located error around the more general payload in the errors container.
impl From<graph::LocatedError> for Errors {
    fn from(value: graph::LocatedError) -> Self {
        let re_wrapped: LocatedError = value.into();
        re_wrapped.into()
    }
}

/// Allow simple conversions from located translation errors by re-wrapping
/// the located error around the more general payload.
impl From<translation::LocatedError> for LocatedError {
    fn from(value: translation::LocatedError) -> Self {
        let location = value.location;
        let payload = Error::from(value.payload);
        Self { location, payload }
    }
}

/// Allow simple conversions from located translation errors by re-wrapping
/// the located error around the more general payload in the errors container.
impl From<translation::LocatedError> for Errors {
    fn from(value: translation::LocatedError) -> Self {
        let re_wrapped: LocatedError = value.into();
        re_wrapped.into()
    }
}

/// Allow simple conversions from located trace errors by re-wrapping the
/// located error around the more general payload.
impl From<trace::LocatedError> for LocatedError {
    fn from(value: trace::LocatedError) -> Self {
        let location = value.location;
        let payload = Error::from(value.payload);
        Self { location, payload }
    }
}

/// Allow simple conversions from located trace errors by re-wrapping the
/// located error around the more general payload in the errors container.
impl From<trace::LocatedError> for Errors {
    fn from(value: trace::LocatedError) -> Self {
        let re_wrapped: LocatedError = value.into();
        re_wrapped.into()
    }
}

/// Allow simple conversions from located solver errors by re-wrapping the
/// located error around the more general payload.
impl From<solver::LocatedError> for LocatedError {
    fn from(value: solver::LocatedError) -> Self {
        let location = value.location;
        let payload = Error::from(value.payload);
        Self { location, payload }
    }
}

/// Allow simple conversions from located solver errors by re-wrapping the
/// located error around the more general payload in the errors container.
impl From<solver::LocatedError> for Errors {
    fn from(value: solver::LocatedError) -> Self {
        let re_wrapped: LocatedError = value.into();
        re_wrapped.into()
    }
}

/// Allow conversion from the translation errors container to the general
/// errors container.
impl From<translation::Errors> for Errors {
    fn from(value: translation::Errors) -> Self {
        let errs: Vec<translation::LocatedError> = value.into();
        let new_errs: Vec<LocatedError> = errs.into_iter().map(std::convert::Into::into).collect();

        new_errs.into()
    }
}

/// Allow conversion from the trace errors container to the general errors
/// container.
impl From<trace::Errors> for Errors {
    fn from(value: trace::Errors) -> Self {
        let errs: Vec<trace::LocatedError> = value.into();
        let new_errs: Vec<LocatedError> = errs.into_iter().map(std::convert::Into::into).collect();

        new_errs.into()
    }
}
