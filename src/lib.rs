//! Chunked Jacobian tapes for operator-overloading reverse-mode AD.
//!
//! Statements are recorded as lists of local partial derivatives into
//! growable structure-of-arrays streams and replayed backwards (adjoints) or
//! forwards (tangents). See [`tape`] for the two tape variants and
//! [`active`] for the operator-overloaded value type.

pub mod active;
pub mod adjoints;
pub mod api;
pub mod chunk;
pub mod config;
pub mod error;
pub mod expr;
pub mod float;
pub mod index;
pub mod preaccumulation;
mod recorder;
pub mod stream;
pub mod tape;

pub use active::{Active, ActiveRef, Linear32, Linear64, Reuse32, Reuse64};
pub use adjoints::AdjointVector;
pub use api::{grad, jacobian, jvp, vjp};
pub use config::{NonFinitePolicy, TapeConfig};
pub use error::TapeError;
pub use float::Float;
pub use index::{Identifier, PASSIVE};
pub use recorder::{INPUT_TAG, LOW_LEVEL_FUNCTION_TAG, MAX_ARGUMENT_SIZE};
pub use tape::{
    ActiveTape, LinearTape, LowLevelFunction, ReuseTape, TapeBehavior, TapeGuard, TapeStatistics,
};
