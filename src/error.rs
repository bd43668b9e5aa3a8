use thiserror::Error;

use crate::derivation::{
    InvalidDerivationShape, ReadDerivationError, UnresolvedDrvHash, WriteDerivationError,
};
use crate::hash;
use crate::path::{ParseStorePathError, ReadStorePathError};

/// Errors surfaced by the derivation core. Store implementations
/// propagate their own failures through here verbatim; the core never
/// retries or swallows.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    StorePath(
        #[from]
        #[source]
        ReadStorePathError,
    ),
    #[error("{0}")]
    BadDerivation(
        #[from]
        #[source]
        ReadDerivationError,
    ),
    #[error("{0}")]
    DerivationWrite(
        #[from]
        #[source]
        WriteDerivationError,
    ),
    #[error("{0}")]
    InvalidDerivation(
        #[from]
        #[source]
        InvalidDerivationShape,
    ),
    #[error("{0}")]
    UnresolvedDrvHash(
        #[from]
        #[source]
        UnresolvedDrvHash,
    ),
    #[error("derivation '{drv_path}' has no output '{output}'")]
    UnknownOutput { drv_path: String, output: String },
    #[error("{0}")]
    BadHash(
        #[from]
        #[source]
        hash::ParseHashError,
    ),
    #[error("path '{0}' is not valid")]
    InvalidPath(String),
    #[error("I/O error: {0}")]
    IO(
        #[from]
        #[source]
        std::io::Error,
    ),
    #[error("{0}")]
    Misc(String),
}

impl From<ParseStorePathError> for Error {
    fn from(v: ParseStorePathError) -> Error {
        Error::StorePath(ReadStorePathError::BadStorePath(v))
    }
}
