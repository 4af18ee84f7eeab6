//! Local Jacobian preaccumulation.
//!
//! A region of the recording with few inputs and outputs but many
//! statements can be collapsed into one statement per output whose entries
//! are the region's Jacobian. The region is replayed once per output with
//! the output seeded, the rows are read off the inputs, the region is reset
//! away and the rows are recorded in its place.
//!
//! ```
//! use chunktape::preaccumulation::Preaccumulator;
//! use chunktape::{Active, ActiveTape, LinearTape, TapeBehavior, TapeGuard};
//!
//! let mut tape = LinearTape::<f64>::new();
//! let guard = TapeGuard::new(&mut tape);
//!
//! let x = Active::<LinearTape<f64>>::new_input(2.0);
//! let region = Preaccumulator::start(&[&x]).unwrap();
//! let mut y = Active::<LinearTape<f64>>::from_expr(&x * &x);
//! for _ in 0..10 {
//!     y += &x * 0.0 + 1.0;
//! }
//! region.finish(&mut [&mut y]).unwrap();
//!
//! // one input and one preaccumulated statement remain
//! let statements = LinearTape::<f64>::with_active(|t| t.statistics().statements);
//! assert_eq!(statements, Some(2));
//!
//! y.set_gradient(1.0);
//! LinearTape::<f64>::with_active(|t| t.evaluate());
//! assert_eq!(x.gradient(), 4.0);
//! drop(guard);
//! ```

use std::fmt;

use num_traits::{Float as _, One, Zero};

use crate::active::Active;
use crate::config::NonFinitePolicy;
use crate::error::TapeError;
use crate::float::Float as _;
use crate::index::{Identifier, PASSIVE};
use crate::recorder::MAX_ARGUMENT_SIZE;
use crate::tape::{ActiveTape, TapeBehavior};

/// An open preaccumulation region.
pub struct Preaccumulator<T: TapeBehavior> {
    start: T::Position,
    inputs: Vec<Identifier>,
}

impl<T: TapeBehavior> fmt::Debug for Preaccumulator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preaccumulator")
            .field("start", &self.start)
            .field("inputs", &self.inputs)
            .finish()
    }
}

impl<T: TapeBehavior> Preaccumulator<T> {
    /// Open a region at the tape's current position.
    ///
    /// Passive and repeated identifiers are ignored.
    pub fn start_identifiers(tape: &T, inputs: &[Identifier]) -> Self {
        let mut unique = Vec::with_capacity(inputs.len());
        for &id in inputs {
            if id != PASSIVE && !unique.contains(&id) {
                unique.push(id);
            }
        }
        Preaccumulator {
            start: tape.position(),
            inputs: unique,
        }
    }

    /// Position the region started at.
    pub fn start_position(&self) -> T::Position {
        self.start
    }

    /// Identifiers the region's Jacobian is taken with respect to.
    pub fn inputs(&self) -> &[Identifier] {
        &self.inputs
    }

    /// Close the region and replace it with one statement per output.
    ///
    /// `outputs` are updated in place: the linear tape hands out new
    /// identifiers, the reuse tape keeps them, including outputs that
    /// overwrote one of the inputs. Outputs whose row is empty become
    /// passive. Adjoints of the inputs and outputs are preserved.
    ///
    /// Errors are reported before the region is touched, so a failed call
    /// leaves the recording as it was.
    pub fn finish_identifiers(
        self,
        tape: &mut T,
        outputs: &mut [Identifier],
    ) -> Result<(), TapeError> {
        if !tape.is_active() {
            return Ok(());
        }
        if self.inputs.len() > MAX_ARGUMENT_SIZE {
            return Err(TapeError::TooManyArguments {
                count: self.inputs.len(),
                max: MAX_ARGUMENT_SIZE,
            });
        }
        let end = tape.position();
        tracing::debug!(
            tape = T::NAME,
            inputs = self.inputs.len(),
            outputs = outputs.len(),
            start = ?self.start,
            ?end,
            "preaccumulating region"
        );

        let saved_inputs = take_adjoints(tape, &self.inputs);
        let saved_outputs = take_adjoints(tape, outputs);

        let mut rows = Vec::with_capacity(outputs.len());
        for &output in outputs.iter() {
            let mut row = Vec::new();
            if output != PASSIVE {
                tape.set_gradient(output, T::Real::one());
                tape.evaluate_range(self.start, end);
                for &input in &self.inputs {
                    row.push((tape.gradient(input), input));
                    tape.set_gradient(input, T::Real::zero());
                }
                tape.set_gradient(output, T::Real::zero());
            }
            rows.push(row);
        }

        if tape.config().non_finite_jacobians == NonFinitePolicy::Abort {
            let bad = rows.iter().flatten().find(|entry| !entry.0.is_finite());
            if let Some(&(value, identifier)) = bad {
                tracing::error!(identifier, value = value.as_f64(), "non-finite preaccumulated jacobian");
                restore_adjoints(tape, &self.inputs, &saved_inputs);
                restore_adjoints(tape, outputs, &saved_outputs);
                return Err(TapeError::NonFiniteJacobian {
                    identifier,
                    value: value.as_f64(),
                });
            }
        }

        tape.reset_to(self.start, false);
        // An output that keeps an input's identifier must not be written
        // before the rows reading that input. Record it into a temporary and
        // copy it over once every row is on the tape.
        let mut aliased = Vec::new();
        for (k, (output, row)) in outputs.iter_mut().zip(&rows).enumerate() {
            if *output == PASSIVE {
                continue;
            }
            if !T::LINEAR_INDICES && self.inputs.contains(output) {
                let mut temporary = PASSIVE;
                tape.store_manual(&mut temporary, row)?;
                aliased.push((k, temporary));
            } else {
                tape.store_manual(output, row)?;
            }
        }
        for (k, mut temporary) in aliased {
            tape.store_manual(&mut outputs[k], &[(T::Real::one(), temporary)])?;
            tape.free(&mut temporary);
        }

        restore_adjoints(tape, &self.inputs, &saved_inputs);
        restore_adjoints(tape, outputs, &saved_outputs);
        Ok(())
    }
}

impl<T: ActiveTape> Preaccumulator<T> {
    /// Open a region on the thread's active tape.
    pub fn start(inputs: &[&Active<T>]) -> Result<Self, TapeError> {
        let identifiers: Vec<Identifier> = inputs.iter().map(|x| x.identifier()).collect();
        T::with_active(|tape| Preaccumulator::start_identifiers(tape, &identifiers))
            .ok_or(TapeError::NoActiveTape { tape: T::NAME })
    }

    /// Close the region on the thread's active tape, see
    /// [`Preaccumulator::finish_identifiers`].
    pub fn finish(self, outputs: &mut [&mut Active<T>]) -> Result<(), TapeError> {
        let mut identifiers: Vec<Identifier> = outputs.iter().map(|y| y.identifier()).collect();
        T::with_active(|tape| self.finish_identifiers(tape, &mut identifiers))
            .ok_or(TapeError::NoActiveTape { tape: T::NAME })??;
        for (output, identifier) in outputs.iter_mut().zip(identifiers) {
            output.set_identifier(identifier);
        }
        Ok(())
    }
}

fn take_adjoints<T: TapeBehavior>(tape: &mut T, identifiers: &[Identifier]) -> Vec<T::Real> {
    identifiers
        .iter()
        .map(|&id| {
            if id == PASSIVE {
                return T::Real::zero();
            }
            let value = tape.gradient(id);
            tape.set_gradient(id, T::Real::zero());
            value
        })
        .collect()
}

fn restore_adjoints<T: TapeBehavior>(tape: &mut T, identifiers: &[Identifier], saved: &[T::Real]) {
    for (&id, &value) in identifiers.iter().zip(saved) {
        if id != PASSIVE && value != T::Real::zero() {
            let slot = tape.gradient_mut(id);
            *slot = *slot + value;
        }
    }
}
