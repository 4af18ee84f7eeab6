//! Recording and replay options.
//!
//! All options are fixed when a tape is created. Use
//! [`TapeConfig::builder`] to override the defaults.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::TapeError;

/// Rows per Jacobian-entry chunk.
pub const DEFAULT_JACOBIAN_CHUNK_SIZE: usize = 1 << 16;

/// Rows per statement chunk.
pub const DEFAULT_STATEMENT_CHUNK_SIZE: usize = 1 << 16;

/// What to do with a NaN or infinite local derivative.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NonFinitePolicy {
    /// Record it like any other entry.
    Keep,
    /// Drop the entry.
    #[default]
    Skip,
    /// Reject the statement with [`TapeError::NonFiniteJacobian`].
    Abort,
}

/// Tape configuration.
///
/// # Examples
///
/// ```
/// use chunktape::{NonFinitePolicy, TapeConfig};
///
/// let config = TapeConfig::builder()
///     .jacobian_chunk_size(4096)
///     .non_finite_jacobians(NonFinitePolicy::Abort)
///     .remove_duplicate_jacobians(true)
///     .build()
///     .expect("valid configuration");
///
/// assert_eq!(config.jacobian_chunk_size, 4096);
/// assert!(config.skip_zero_adjoints);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TapeConfig {
    /// Rows per chunk of the Jacobian-entry stream.
    pub jacobian_chunk_size: usize,
    /// Rows per chunk of the statement stream.
    pub statement_chunk_size: usize,
    /// Skip statements whose left-hand adjoint is zero during reverse replay.
    pub skip_zero_adjoints: bool,
    /// Handling of NaN/infinite local derivatives.
    pub non_finite_jacobians: NonFinitePolicy,
    /// Drop entries whose local derivative is exactly zero.
    pub ignore_zero_jacobians: bool,
    /// Merge entries of one statement that share an argument identifier.
    pub remove_duplicate_jacobians: bool,
    /// Record `a = b` by sharing identifiers where the index strategy allows.
    pub elide_copies: bool,
    /// Sort the reuse free list on a full reset.
    pub sort_indices_on_reset: bool,
}

impl Default for TapeConfig {
    fn default() -> Self {
        TapeConfig {
            jacobian_chunk_size: DEFAULT_JACOBIAN_CHUNK_SIZE,
            statement_chunk_size: DEFAULT_STATEMENT_CHUNK_SIZE,
            skip_zero_adjoints: true,
            non_finite_jacobians: NonFinitePolicy::Skip,
            ignore_zero_jacobians: true,
            remove_duplicate_jacobians: false,
            elide_copies: true,
            sort_indices_on_reset: true,
        }
    }
}

impl TapeConfig {
    #[inline]
    pub fn builder() -> TapeConfigBuilder {
        TapeConfigBuilder::default()
    }

    /// Check invariants that the builder enforces.
    pub fn validate(&self) -> Result<(), TapeError> {
        if self.jacobian_chunk_size == 0 {
            return Err(TapeError::InvalidConfig(
                "jacobian_chunk_size must be positive".into(),
            ));
        }
        if self.statement_chunk_size == 0 {
            return Err(TapeError::InvalidConfig(
                "statement_chunk_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`TapeConfig`].
#[derive(Clone, Debug, Default)]
pub struct TapeConfigBuilder {
    config: TapeConfig,
}

impl TapeConfigBuilder {
    /// Set both chunk sizes at once.
    pub fn chunk_size(mut self, rows: usize) -> Self {
        self.config.jacobian_chunk_size = rows;
        self.config.statement_chunk_size = rows;
        self
    }

    pub fn jacobian_chunk_size(mut self, rows: usize) -> Self {
        self.config.jacobian_chunk_size = rows;
        self
    }

    pub fn statement_chunk_size(mut self, rows: usize) -> Self {
        self.config.statement_chunk_size = rows;
        self
    }

    pub fn skip_zero_adjoints(mut self, skip: bool) -> Self {
        self.config.skip_zero_adjoints = skip;
        self
    }

    pub fn non_finite_jacobians(mut self, policy: NonFinitePolicy) -> Self {
        self.config.non_finite_jacobians = policy;
        self
    }

    pub fn ignore_zero_jacobians(mut self, ignore: bool) -> Self {
        self.config.ignore_zero_jacobians = ignore;
        self
    }

    pub fn remove_duplicate_jacobians(mut self, remove: bool) -> Self {
        self.config.remove_duplicate_jacobians = remove;
        self
    }

    pub fn elide_copies(mut self, elide: bool) -> Self {
        self.config.elide_copies = elide;
        self
    }

    pub fn sort_indices_on_reset(mut self, sort: bool) -> Self {
        self.config.sort_indices_on_reset = sort;
        self
    }

    pub fn build(self) -> Result<TapeConfig, TapeError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = TapeConfig::builder().chunk_size(0).build().unwrap_err();
        assert!(matches!(err, TapeError::InvalidConfig(_)));
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = TapeConfig::builder()
            .statement_chunk_size(8)
            .skip_zero_adjoints(false)
            .elide_copies(false)
            .build()
            .unwrap();
        assert_eq!(config.statement_chunk_size, 8);
        assert_eq!(config.jacobian_chunk_size, DEFAULT_JACOBIAN_CHUNK_SIZE);
        assert!(!config.skip_zero_adjoints);
        assert!(!config.elide_copies);
    }
}
