//! Statement recording shared by both Jacobian tapes.
//!
//! The [`Recorder`] turns one right-hand side into its filtered list of
//! Jacobian entries. Where the entries end up (and how the left-hand
//! identifier is obtained) is the tape's business.

use crate::config::{NonFinitePolicy, TapeConfig};
use crate::error::TapeError;
use crate::expr::Expression;
use crate::float::Float;
use crate::index::{Identifier, PASSIVE};

/// Argument count marking a registered input. Replayed as a no-op.
pub const INPUT_TAG: u8 = u8::MAX;

/// Argument count marking a low-level function call. The statement owns one
/// Jacobian row whose identifier column holds the function's slot.
pub const LOW_LEVEL_FUNCTION_TAG: u8 = u8::MAX - 1;

/// Largest number of Jacobian entries a single statement can carry.
pub const MAX_ARGUMENT_SIZE: usize = (u8::MAX - 2) as usize;

/// Per-tape recording state: configuration, activity flag and the scratch
/// buffer entries are collected into before they hit the streams.
#[derive(Debug)]
pub(crate) struct Recorder<F: Float> {
    config: TapeConfig,
    active: bool,
    scratch: Vec<(F, Identifier)>,
}

impl<F: Float> Recorder<F> {
    pub(crate) fn new(config: TapeConfig) -> Self {
        Recorder {
            config,
            active: true,
            scratch: Vec::with_capacity(MAX_ARGUMENT_SIZE),
        }
    }

    #[inline]
    pub(crate) fn config(&self) -> &TapeConfig {
        &self.config
    }

    #[inline]
    pub(crate) fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Whether `lhs = rhs` may be recorded by sharing identifiers.
    #[inline]
    pub(crate) fn elided_copy<E: Expression<Real = F>>(
        &self,
        rhs: &E,
        copy_needs_statement: bool,
    ) -> Option<Identifier> {
        if self.config.elide_copies && !copy_needs_statement {
            rhs.as_leaf()
        } else {
            None
        }
    }

    /// Traverse `rhs` and return the Jacobian entries that survive filtering.
    ///
    /// An empty slice means the statement has no active arguments.
    pub(crate) fn collect<E: Expression<Real = F>>(
        &mut self,
        rhs: &E,
    ) -> Result<&[(F, Identifier)], TapeError> {
        let policy = self.config.non_finite_jacobians;
        let ignore_zero = self.config.ignore_zero_jacobians;
        let scratch = &mut self.scratch;
        scratch.clear();

        let mut error = None;
        let mut sink = |jacobian: F, identifier: Identifier| {
            if error.is_some() {
                return;
            }
            match admit(jacobian, identifier, policy, ignore_zero) {
                Ok(true) => scratch.push((jacobian, identifier)),
                Ok(false) => {}
                Err(e) => error = Some(e),
            }
        };
        rhs.for_each_leaf(F::one(), &mut sink);
        rhs.flush_delayed(&mut sink);
        if let Some(e) = error {
            return Err(e);
        }

        if self.config.remove_duplicate_jacobians {
            merge_duplicates(&mut self.scratch, ignore_zero);
        }
        if self.scratch.len() > MAX_ARGUMENT_SIZE {
            return Err(TapeError::TooManyArguments {
                count: self.scratch.len(),
                max: MAX_ARGUMENT_SIZE,
            });
        }
        Ok(&self.scratch)
    }
}

/// Decide whether one Jacobian entry is recorded.
#[inline]
fn admit<F: Float>(
    jacobian: F,
    identifier: Identifier,
    policy: NonFinitePolicy,
    ignore_zero: bool,
) -> Result<bool, TapeError> {
    if identifier == PASSIVE {
        return Ok(false);
    }
    if !jacobian.is_finite() {
        match policy {
            NonFinitePolicy::Keep => {}
            NonFinitePolicy::Skip => {
                tracing::trace!(identifier, value = jacobian.as_f64(), "skipping non-finite jacobian");
                return Ok(false);
            }
            NonFinitePolicy::Abort => {
                tracing::error!(identifier, value = jacobian.as_f64(), "non-finite jacobian");
                return Err(TapeError::NonFiniteJacobian {
                    identifier,
                    value: jacobian.as_f64(),
                });
            }
        }
    }
    Ok(!(ignore_zero && jacobian == F::zero()))
}

/// Merge entries sharing an identifier, keeping first-occurrence order.
///
/// Quadratic in the entry count, which is bounded by [`MAX_ARGUMENT_SIZE`].
pub(crate) fn merge_duplicates<F: Float>(entries: &mut Vec<(F, Identifier)>, drop_zeros: bool) {
    let mut len = 0;
    for i in 0..entries.len() {
        let (jacobian, identifier) = entries[i];
        match entries[..len].iter().position(|e| e.1 == identifier) {
            Some(j) => entries[j].0 = entries[j].0 + jacobian,
            None => {
                entries[len] = (jacobian, identifier);
                len += 1;
            }
        }
    }
    entries.truncate(len);
    if drop_zeros {
        entries.retain(|e| e.0 != F::zero());
    }
}
