//! Error types for avpipe-player
//!
//! Every public operation returns one of these. The variants form a closed
//! status taxonomy; [`Error::class`] groups them by how a caller is expected
//! to react.

use thiserror::Error;

/// Main error type for the pipeline core
#[derive(Error, Debug)]
pub enum Error {
    /// Parameter misuse: bad pairing, stream type none, oversized block
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Operation not available for this stream or collaborator set
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// A pool or fixed table is exhausted
    #[error("Insufficient resources: {0}")]
    InsufficientResources(String),

    /// A ring is full
    #[error("Too many entries: {0}")]
    TooMany(String),

    #[error("Unknown playback")]
    UnknownPlayback,

    #[error("Unknown stream")]
    UnknownStream,

    #[error("No event records")]
    NoEventRecords,

    /// A bounded wait expired before the operation completed
    #[error("Timed out: {0}")]
    TimedOut(String),

    /// An operation of the same kind is already in progress
    #[error("Busy: {0}")]
    Busy(String),

    /// An unreachable state was reached
    #[error("Implementation error: {0}")]
    Implementation(String),

    /// A collaborator reported a failure
    #[error("Component error: {0}")]
    Component(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(#[from] avpipe_common::Error),
}

/// Coarse grouping of [`Error`] variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    ParameterMisuse,
    ResourceExhaustion,
    TimingFailure,
    ImplementationError,
    CollaboratorFailure,
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::InvalidParameter(_)
            | Error::NotSupported(_)
            | Error::UnknownPlayback
            | Error::UnknownStream
            | Error::Busy(_)
            | Error::Config(_) => ErrorClass::ParameterMisuse,
            Error::InsufficientResources(_) | Error::TooMany(_) | Error::NoEventRecords => {
                ErrorClass::ResourceExhaustion
            }
            Error::TimedOut(_) => ErrorClass::TimingFailure,
            Error::Implementation(_) => ErrorClass::ImplementationError,
            Error::Component(_) => ErrorClass::CollaboratorFailure,
        }
    }
}

/// Convenience Result type using the player Error
pub type Result<T> = std::result::Result<T, Error>;
