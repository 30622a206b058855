//! Crate-wide error type.
//!
//! Every fallible operation in this crate returns `Result<_, Error>` so `?`
//! composes naturally; callers that need a coarser signal can match down to
//! `bool`/`Option` at their own boundary.

use thiserror::Error;

/// Failure modes surfaced while building, decomposing, composing, or
/// (de)serializing a `WaveletBuffer`.
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    /// A signal's shape didn't match the buffer's configured parameters.
    #[error("signal shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch { expected: Vec<usize>, actual: Vec<usize> },

    /// Construction parameters were internally inconsistent (e.g. too many
    /// decomposition steps for the signal shape, or zero channels).
    #[error("invalid wavelet parameters: {0}")]
    InvalidParameters(String),

    /// A channel index or range fell outside `[0, signal_number)`.
    #[error("channel range out of bounds: {0}")]
    OutOfRange(String),

    /// A serialized container was malformed or used an unsupported version.
    #[error("failed to decode: {0}")]
    DecodeError(String),

    /// A value couldn't be encoded (e.g. an empty sparse matrix).
    #[error("failed to encode: {0}")]
    EncodeError(String),
}

pub type Result<T> = std::result::Result<T, Error>;
