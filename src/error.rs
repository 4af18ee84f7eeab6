//! Error types for recording and tape configuration.
//!
//! Replay never fails: out-of-range identifiers and foreign positions are
//! programming errors caught by debug assertions. What remains are policy
//! outcomes chosen in [`TapeConfig`](crate::config::TapeConfig) and calls
//! that a tape variant does not support.

use thiserror::Error;

use crate::index::Identifier;

/// Errors surfaced by a tape at the call site that detected them.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum TapeError {
    /// A local derivative was NaN or infinite under
    /// [`NonFinitePolicy::Abort`](crate::config::NonFinitePolicy::Abort).
    #[error("non-finite local derivative {value} for argument identifier {identifier}")]
    NonFiniteJacobian {
        /// Argument the derivative belongs to.
        identifier: Identifier,
        /// Offending value, converted to `f64`.
        value: f64,
    },

    /// A statement has more arguments than a statement record can describe.
    #[error("statement has {count} arguments, at most {max} are supported")]
    TooManyArguments {
        /// Number of arguments the expression reported.
        count: usize,
        /// Largest recordable argument count.
        max: usize,
    },

    /// The operation needs data this tape variant does not keep.
    #[error("{operation} is not supported by the {tape} tape")]
    Unsupported {
        /// Name of the rejected operation.
        operation: &'static str,
        /// Name of the tape variant.
        tape: &'static str,
    },

    /// An operation on the thread-local tape ran with no tape installed.
    #[error("no {tape} tape is installed on this thread")]
    NoActiveTape {
        /// Name of the tape variant that was looked up.
        tape: &'static str,
    },

    /// Configuration rejected by the builder.
    #[error("invalid tape configuration: {0}")]
    InvalidConfig(String),
}
