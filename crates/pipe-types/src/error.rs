//! Closed status taxonomy shared by every runner component.
//!
//! Components report outcomes from a fixed set so that codes survive the
//! C ABI and the remote wire unchanged. `Ok(())` stands in for the legacy
//! SUCCESS value; everything else is an `Error` variant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Error {
    #[error("internal error")]
    Internal,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("illegal state")]
    IllegalState,
    #[error("out of memory")]
    NoMemory,
    #[error("fatal error")]
    Fatal,
}

pub type Result<T = ()> = std::result::Result<T, Error>;

/// Wire/ABI representation of a status, including success. Numeric values
/// match the graph library ABI and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Success,
    Internal,
    InvalidArgument,
    IllegalState,
    NoMemory,
    Fatal,
}

impl StatusCode {
    pub fn as_raw(self) -> i32 {
        match self {
            StatusCode::Success => 0,
            StatusCode::Internal => 1,
            StatusCode::InvalidArgument => 2,
            StatusCode::IllegalState => 3,
            StatusCode::NoMemory => 4,
            StatusCode::Fatal => 5,
        }
    }

    /// Out-of-range codes collapse to `Internal` rather than round-tripping
    /// garbage from a misbehaving library.
    pub fn from_raw(code: i32) -> Self {
        match code {
            0 => StatusCode::Success,
            1 => StatusCode::Internal,
            2 => StatusCode::InvalidArgument,
            3 => StatusCode::IllegalState,
            4 => StatusCode::NoMemory,
            5 => StatusCode::Fatal,
            _ => StatusCode::Internal,
        }
    }

    pub fn into_result(self) -> Result {
        match self {
            StatusCode::Success => Ok(()),
            StatusCode::Internal => Err(Error::Internal),
            StatusCode::InvalidArgument => Err(Error::InvalidArgument),
            StatusCode::IllegalState => Err(Error::IllegalState),
            StatusCode::NoMemory => Err(Error::NoMemory),
            StatusCode::Fatal => Err(Error::Fatal),
        }
    }
}

impl From<Result> for StatusCode {
    fn from(result: Result) -> Self {
        match result {
            Ok(()) => StatusCode::Success,
            Err(Error::Internal) => StatusCode::Internal,
            Err(Error::InvalidArgument) => StatusCode::InvalidArgument,
            Err(Error::IllegalState) => StatusCode::IllegalState,
            Err(Error::NoMemory) => StatusCode::NoMemory,
            Err(Error::Fatal) => StatusCode::Fatal,
        }
    }
}
