use std::fmt::{Debug, Display};

use num_traits::{Float as NumFloat, FloatConst, FromPrimitive};

/// Marker trait for the primal/gradient types a tape can record (`f32`, `f64`).
///
/// Bundles the numeric and utility traits needed by the recorder and the
/// replay loops. Only primitive float types implement this.
pub trait Float:
    NumFloat + FloatConst + FromPrimitive + Copy + Send + Sync + Default + Debug + Display + 'static
{
    /// Lossy conversion used for diagnostics and error payloads.
    #[inline]
    fn as_f64(self) -> f64 {
        self.to_f64().unwrap_or(f64::NAN)
    }
}

impl Float for f32 {}
impl Float for f64 {}
