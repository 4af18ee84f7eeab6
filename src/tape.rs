//! Jacobian tapes and the thread-local active tape.
//!
//! Both tapes record, per statement, the local partial derivatives of the
//! left-hand side with respect to its arguments and replay them in a single
//! multiply-accumulate loop. They differ in how identifiers are managed:
//!
//! - [`LinearTape`] hands out one identifier per statement and recovers it
//!   during replay by counting, so statements store only their argument
//!   count.
//! - [`ReuseTape`] recycles identifiers and stores the left-hand identifier
//!   with every statement. Recorded ranges can be erased and appended.
//!
//! Operator-overloaded [`Active`](crate::active::Active) values record onto
//! the tape installed for the current thread by a [`TapeGuard`].

use std::cell::Cell;
use std::fmt::{self, Debug, Display};
use std::marker::PhantomData;
use std::ptr;
use std::thread::LocalKey;

use crate::adjoints::AdjointVector;
use crate::error::TapeError;
use crate::expr::{Expression, JacobianList};
use crate::float::Float;
use crate::index::{Identifier, SharedIndexManager, SyncIndexManager};
use crate::recorder::{INPUT_TAG, LOW_LEVEL_FUNCTION_TAG};

mod linear;
mod reuse;

pub use linear::{LinearPosition, LinearTape};
pub use reuse::{ReusePosition, ReuseTape};

/// A recorded point in time: the stream position plus the number of
/// low-level functions pushed so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TapePosition<P> {
    pub stream: P,
    pub functions: usize,
}

/// User code embedded in the recording.
///
/// The function is called with the tape's adjoint vector when replay reaches
/// the point where it was pushed. It is responsible for its own inputs and
/// outputs; outputs are usually created with
/// [`TapeBehavior::register_input`] so that no recorded statement writes
/// to them.
pub trait LowLevelFunction<F: Float> {
    /// Propagate adjoints from the outputs to the inputs.
    fn reverse(&mut self, adjoints: &mut AdjointVector<F>);

    /// Propagate tangents from the inputs to the outputs.
    fn forward(&mut self, tangents: &mut AdjointVector<F>);

    fn name(&self) -> &str {
        "low-level function"
    }
}

/// Common interface of the Jacobian tapes.
pub trait TapeBehavior {
    type Real: Float;
    type Position: Copy + Ord + Debug;

    /// Short name used in errors and statistics.
    const NAME: &'static str;

    /// Identifiers follow the statement order and are never shared between
    /// a new left-hand side and an earlier value.
    const LINEAR_INDICES: bool;

    fn config(&self) -> &crate::config::TapeConfig;

    /// Record `lhs = rhs`.
    ///
    /// Entries are filtered according to the tape configuration. When no
    /// entry survives, `lhs` becomes passive and nothing is recorded.
    fn store<E>(&mut self, lhs: &mut Identifier, rhs: &E) -> Result<(), TapeError>
    where
        E: Expression<Real = Self::Real>;

    /// Record a statement given directly by its Jacobian entries.
    fn store_manual(
        &mut self,
        lhs: &mut Identifier,
        entries: &[(Self::Real, Identifier)],
    ) -> Result<(), TapeError> {
        self.store(
            lhs,
            &JacobianList::new(<Self::Real as num_traits::Zero>::zero(), entries),
        )
    }

    /// Give `identifier` a slot that no recorded statement refers to.
    fn register_input(&mut self, identifier: &mut Identifier);

    /// Give an output its own identifier by recording an identity statement.
    fn register_output(&mut self, identifier: &mut Identifier);

    /// Release `identifier`; it becomes passive.
    fn free(&mut self, identifier: &mut Identifier);

    fn push_low_level_function(&mut self, function: Box<dyn LowLevelFunction<Self::Real>>);

    fn position(&self) -> Self::Position;
    fn zero_position(&self) -> Self::Position;

    /// Discard everything recorded after `pos`.
    fn reset_to(&mut self, pos: Self::Position, clear_adjoints: bool);

    /// Discard the whole recording.
    fn reset(&mut self, clear_adjoints: bool);

    /// Reverse replay of the statements recorded in `[start, end)`, last
    /// statement first.
    fn evaluate_range(&mut self, start: Self::Position, end: Self::Position);

    /// Forward replay of the statements recorded in `[start, end)`.
    fn evaluate_forward_range(&mut self, start: Self::Position, end: Self::Position);

    /// Reverse replay of the whole recording.
    fn evaluate(&mut self) {
        let (start, end) = (self.zero_position(), self.position());
        self.evaluate_range(start, end);
    }

    /// Forward replay of the whole recording.
    fn evaluate_forward(&mut self) {
        let (start, end) = (self.zero_position(), self.position());
        self.evaluate_forward_range(start, end);
    }

    fn gradient(&self, identifier: Identifier) -> Self::Real;

    /// Mutable gradient slot, grown on first touch.
    fn gradient_mut(&mut self, identifier: Identifier) -> &mut Self::Real;

    fn set_gradient(&mut self, identifier: Identifier, value: Self::Real) {
        *self.gradient_mut(identifier) = value;
    }

    /// Zero all adjoints, keeping the allocation.
    fn clear_adjoints(&mut self);

    /// Release the adjoint vector.
    fn delete_adjoint_vector(&mut self);

    /// Primal values are not kept by Jacobian tapes.
    fn primal(&self, _identifier: Identifier) -> Result<Self::Real, TapeError> {
        Err(TapeError::Unsupported {
            operation: "primal",
            tape: Self::NAME,
        })
    }

    fn set_active(&mut self);
    fn set_passive(&mut self);
    fn is_active(&self) -> bool;

    fn largest_identifier(&self) -> Identifier;

    fn statistics(&self) -> TapeStatistics;
}

/// Size and memory summary of a tape.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TapeStatistics {
    pub tape: &'static str,
    pub statements: usize,
    pub jacobian_entries: usize,
    pub statement_chunks: usize,
    pub jacobian_chunks: usize,
    pub largest_identifier: Identifier,
    pub adjoint_slots: usize,
    pub free_identifiers: usize,
    /// Identifier manager lives outside the tape and is shared with other tapes.
    pub shared_identifiers: bool,
    /// Shared identifier manager is guarded for use across threads.
    pub thread_safe_identifiers: bool,
    pub low_level_functions: usize,
    pub memory_bytes: usize,
}

impl Display for TapeStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} tape", self.tape)?;
        writeln!(f, "  statements          {:>12}  ({} chunks)", self.statements, self.statement_chunks)?;
        writeln!(f, "  jacobian entries    {:>12}  ({} chunks)", self.jacobian_entries, self.jacobian_chunks)?;
        writeln!(f, "  largest identifier  {:>12}", self.largest_identifier)?;
        writeln!(f, "  free identifiers    {:>12}", self.free_identifiers)?;
        let scope = match (self.shared_identifiers, self.thread_safe_identifiers) {
            (false, _) => "per tape",
            (true, false) => "per thread",
            (true, true) => "process",
        };
        writeln!(f, "  identifier scope    {:>12}", scope)?;
        writeln!(f, "  adjoint slots       {:>12}", self.adjoint_slots)?;
        writeln!(f, "  low-level functions {:>12}", self.low_level_functions)?;
        write!(f, "  memory              {:>9.2} MB", self.memory_bytes as f64 / (1024.0 * 1024.0))
    }
}

// ── Replay kernels shared by both tapes ──

/// Mutable state touched while replaying.
pub(crate) struct Replay<'a, F: Float> {
    pub(crate) adjoints: &'a mut AdjointVector<F>,
    pub(crate) functions: &'a mut [Box<dyn LowLevelFunction<F>>],
    pub(crate) skip_zero: bool,
}

impl<F: Float> Replay<'_, F> {
    /// Reverse step for one statement whose Jacobian rows end at `*cursor`.
    #[inline]
    pub(crate) fn reverse(
        &mut self,
        lhs: Identifier,
        count: u8,
        values: &[F],
        identifiers: &[Identifier],
        cursor: &mut usize,
    ) {
        match count {
            INPUT_TAG => {}
            LOW_LEVEL_FUNCTION_TAG => {
                *cursor -= 1;
                self.functions[identifiers[*cursor] as usize].reverse(self.adjoints);
            }
            n => {
                let n = n as usize;
                let start = *cursor - n;
                *cursor = start;
                let adjoint = self.adjoints[lhs];
                if self.skip_zero && adjoint == F::zero() {
                    return;
                }
                self.adjoints[lhs] = F::zero();
                for k in (start..start + n).rev() {
                    let arg = identifiers[k];
                    self.adjoints[arg] = self.adjoints[arg] + values[k] * adjoint;
                }
            }
        }
    }

    /// Forward step for one statement whose Jacobian rows start at `*cursor`.
    #[inline]
    pub(crate) fn forward(
        &mut self,
        lhs: Identifier,
        count: u8,
        values: &[F],
        identifiers: &[Identifier],
        cursor: &mut usize,
    ) {
        match count {
            INPUT_TAG => {}
            LOW_LEVEL_FUNCTION_TAG => {
                self.functions[identifiers[*cursor] as usize].forward(self.adjoints);
                *cursor += 1;
            }
            n => {
                let start = *cursor;
                *cursor += n as usize;
                let mut tangent = F::zero();
                for k in start..*cursor {
                    tangent = tangent + values[k] * self.adjoints[identifiers[k]];
                }
                self.adjoints[lhs] = tangent;
            }
        }
    }
}

// ── Thread-local active tape ──

/// Tapes that can be installed as the current thread's active tape.
pub trait ActiveTape: TapeBehavior + Sized + 'static {
    #[doc(hidden)]
    fn cell() -> &'static LocalKey<Cell<*mut Self>>;

    /// Run `f` on the active tape, or return `None` when no tape is installed.
    ///
    /// The tape is taken out of the slot for the duration of `f`, so nested
    /// calls (for example from a value dropped inside `f`) see no tape.
    fn with_active<R>(f: impl FnOnce(&mut Self) -> R) -> Option<R> {
        Self::cell().with(|cell| {
            let tape = cell.replace(ptr::null_mut());
            if tape.is_null() {
                return None;
            }
            let _restore = Restore { cell, tape };
            // SAFETY: the pointer was installed by a `TapeGuard` that holds
            // the exclusive borrow of the tape for as long as it is
            // installed, and the slot stays empty while this reference lives.
            Some(f(unsafe { &mut *tape }))
        })
    }

    /// Whether a tape of this type is installed on the current thread.
    fn is_installed() -> bool {
        Self::cell().with(|cell| !cell.get().is_null())
    }
}

struct Restore<'a, T> {
    cell: &'a Cell<*mut T>,
    tape: *mut T,
}

impl<T> Drop for Restore<'_, T> {
    fn drop(&mut self) {
        self.cell.set(self.tape);
    }
}

/// RAII guard that installs a tape as the thread-local active tape and
/// restores the previous one on drop.
///
/// The guard holds the tape's exclusive borrow; while it lives, reach the
/// tape through [`ActiveTape::with_active`].
pub struct TapeGuard<'a, T: ActiveTape> {
    prev: *mut T,
    _tape: PhantomData<&'a mut T>,
}

impl<'a, T: ActiveTape> TapeGuard<'a, T> {
    pub fn new(tape: &'a mut T) -> Self {
        let prev = T::cell().with(|cell| cell.replace(tape as *mut T));
        TapeGuard {
            prev,
            _tape: PhantomData,
        }
    }
}

impl<T: ActiveTape> Drop for TapeGuard<'_, T> {
    fn drop(&mut self) {
        T::cell().with(|cell| cell.set(self.prev));
    }
}

macro_rules! active_tape_cells {
    ($($tape:ty => $slot:ident),* $(,)?) => {
        thread_local! {
            $(static $slot: Cell<*mut $tape> = const { Cell::new(ptr::null_mut()) };)*
        }

        $(
            impl ActiveTape for $tape {
                #[inline]
                fn cell() -> &'static LocalKey<Cell<*mut Self>> {
                    &$slot
                }
            }
        )*
    };
}

active_tape_cells! {
    LinearTape<f32> => LINEAR_F32,
    LinearTape<f64> => LINEAR_F64,
    ReuseTape<f32> => REUSE_F32,
    ReuseTape<f64> => REUSE_F64,
    ReuseTape<f32, SharedIndexManager<f32>> => SHARED_F32,
    ReuseTape<f64, SharedIndexManager<f64>> => SHARED_F64,
    ReuseTape<f32, SyncIndexManager<f32>> => SYNC_F32,
    ReuseTape<f64, SyncIndexManager<f64>> => SYNC_F64,
}
