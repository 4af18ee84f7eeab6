use crate::adjoints::AdjointVector;
use crate::config::TapeConfig;
use crate::error::TapeError;
use crate::expr::Expression;
use crate::float::Float;
use crate::index::{Identifier, IndexManager, LinearIndexManager, PASSIVE};
use crate::recorder::{Recorder, INPUT_TAG, LOW_LEVEL_FUNCTION_TAG};
use crate::stream::{ChunkedStream, Nested, Position};

use super::{LowLevelFunction, Replay, TapeBehavior, TapePosition, TapeStatistics};

type StatementStream = ChunkedStream<(u8,), LinearIndexManager>;
type JacobianStream<F> = ChunkedStream<(F, Identifier), StatementStream>;

/// Position in a [`LinearTape`].
pub type LinearPosition = TapePosition<Position<Position<Identifier>>>;

/// Jacobian tape with linear identifier management.
///
/// Statement `k` of the recording owns identifier `k`, so statements only
/// store their argument count and reverse replay recovers identifiers by
/// counting down.
///
/// # Examples
///
/// ```
/// use chunktape::expr::Leaf;
/// use chunktape::{LinearTape, TapeBehavior, PASSIVE};
///
/// let mut tape = LinearTape::<f64>::new();
/// let mut x = PASSIVE;
/// tape.register_input(&mut x);
///
/// // y = x * x * x at x = 4
/// let xv = Leaf::new(4.0, x);
/// let mut y = PASSIVE;
/// tape.store(&mut y, &(xv * xv * xv)).unwrap();
///
/// tape.set_gradient(y, 1.0);
/// tape.evaluate();
/// assert_eq!(tape.gradient(x), 48.0);
/// ```
pub struct LinearTape<F: Float> {
    jacobians: JacobianStream<F>,
    adjoints: AdjointVector<F>,
    functions: Vec<Box<dyn LowLevelFunction<F>>>,
    recorder: Recorder<F>,
}

impl<F: Float> Default for LinearTape<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Float> LinearTape<F> {
    /// Create an empty, active tape with the default configuration.
    pub fn new() -> Self {
        Self::with_config(TapeConfig::default())
    }

    /// Create an empty, active tape.
    pub fn with_config(config: TapeConfig) -> Self {
        let statements = ChunkedStream::new(config.statement_chunk_size, LinearIndexManager::new());
        LinearTape {
            jacobians: ChunkedStream::new(config.jacobian_chunk_size, statements),
            adjoints: AdjointVector::new(),
            functions: Vec::new(),
            recorder: Recorder::new(config),
        }
    }

    #[inline]
    fn statements(&self) -> &StatementStream {
        self.jacobians.nested()
    }

    #[inline]
    fn indices(&self) -> &LinearIndexManager {
        self.statements().nested()
    }

    /// Number of recorded statements, inputs and low-level calls included.
    pub fn statement_count(&self) -> usize {
        self.statements().data_size()
    }

    /// Number of recorded Jacobian entries.
    pub fn jacobian_count(&self) -> usize {
        self.jacobians.data_size()
    }

    /// Direct access to the adjoint vector.
    pub fn adjoints(&self) -> &AdjointVector<F> {
        &self.adjoints
    }

    pub fn adjoints_mut(&mut self) -> &mut AdjointVector<F> {
        &mut self.adjoints
    }

    /// Discard the recording and release all chunks but the first.
    pub fn reset_hard(&mut self) {
        tracing::debug!(tape = Self::NAME, "hard reset");
        self.jacobians.reset_hard();
        self.functions.clear();
        self.adjoints.release();
    }

    /// Append one statement. The left-hand identifier is minted after both
    /// reservations so that chunk boundaries see the count before it.
    fn push_statement(
        jacobians: &mut JacobianStream<F>,
        lhs: &mut Identifier,
        count: u8,
        entries: &[(F, Identifier)],
    ) {
        let reservation = jacobians.reserve_items(entries.len());
        jacobians.nested_mut().reserve_items(1);
        for &entry in entries {
            jacobians.push(entry);
        }
        debug_assert_eq!(jacobians.pushed_since(reservation), entries.len());

        let statements = jacobians.nested_mut();
        statements.nested_mut().assign_index(lhs);
        statements.push((count,));
    }
}

impl<F: Float> TapeBehavior for LinearTape<F> {
    type Real = F;
    type Position = LinearPosition;

    const NAME: &'static str = "linear";
    const LINEAR_INDICES: bool = LinearIndexManager::IS_LINEAR;

    #[inline]
    fn config(&self) -> &TapeConfig {
        self.recorder.config()
    }

    fn store<E>(&mut self, lhs: &mut Identifier, rhs: &E) -> Result<(), TapeError>
    where
        E: Expression<Real = F>,
    {
        if !self.recorder.is_active() {
            *lhs = PASSIVE;
            return Ok(());
        }
        if let Some(rhs) = self
            .recorder
            .elided_copy(rhs, LinearIndexManager::COPY_NEEDS_STATEMENT)
        {
            self.jacobians
                .nested_mut()
                .nested_mut()
                .copy_index(lhs, rhs);
            return Ok(());
        }

        let Self {
            jacobians,
            recorder,
            ..
        } = self;
        let entries = recorder.collect(rhs)?;
        if entries.is_empty() {
            *lhs = PASSIVE;
            return Ok(());
        }
        Self::push_statement(jacobians, lhs, entries.len() as u8, entries);
        Ok(())
    }

    fn register_input(&mut self, identifier: &mut Identifier) {
        if !self.recorder.is_active() {
            return;
        }
        Self::push_statement(&mut self.jacobians, identifier, INPUT_TAG, &[]);
        // Counting may hand out an identifier used before a reset_to.
        self.adjoints.reset_slot(*identifier);
    }

    fn register_output(&mut self, identifier: &mut Identifier) {
        if !self.recorder.is_active() || *identifier == PASSIVE {
            return;
        }
        let arg = *identifier;
        Self::push_statement(&mut self.jacobians, identifier, 1, &[(F::one(), arg)]);
    }

    #[inline]
    fn free(&mut self, identifier: &mut Identifier) {
        self.jacobians
            .nested_mut()
            .nested_mut()
            .free_index(identifier);
    }

    fn push_low_level_function(&mut self, function: Box<dyn LowLevelFunction<F>>) {
        if !self.recorder.is_active() {
            return;
        }
        tracing::debug!(tape = Self::NAME, name = function.name(), "pushing low-level function");
        let slot = self.functions.len() as Identifier;
        self.functions.push(function);
        let mut consumed = PASSIVE;
        Self::push_statement(
            &mut self.jacobians,
            &mut consumed,
            LOW_LEVEL_FUNCTION_TAG,
            &[(F::zero(), slot)],
        );
    }

    #[inline]
    fn position(&self) -> LinearPosition {
        TapePosition {
            stream: self.jacobians.position(),
            functions: self.functions.len(),
        }
    }

    #[inline]
    fn zero_position(&self) -> LinearPosition {
        TapePosition {
            stream: self.jacobians.zero_position(),
            functions: 0,
        }
    }

    fn reset_to(&mut self, pos: LinearPosition, clear_adjoints: bool) {
        let current = self.indices().count();
        tracing::debug!(tape = Self::NAME, ?pos, "reset to position");
        self.jacobians.reset_to(pos.stream);
        self.functions.truncate(pos.functions);
        if clear_adjoints {
            self.adjoints.clear_range(pos.stream.nested.nested, current);
        }
    }

    fn reset(&mut self, clear_adjoints: bool) {
        let zero = self.zero_position();
        self.reset_to(zero, clear_adjoints);
        self.jacobians.nested_mut().nested_mut().reset();
    }

    fn evaluate_range(&mut self, start: LinearPosition, end: LinearPosition) {
        debug_assert!(start <= end, "reverse range is reversed");
        tracing::debug!(tape = Self::NAME, ?start, ?end, "reverse evaluation");
        let largest = self.indices().count();
        self.adjoints.ensure(largest);

        let Self {
            jacobians,
            adjoints,
            functions,
            recorder,
        } = self;
        let mut replay = Replay {
            adjoints,
            functions,
            skip_zero: recorder.config().skip_zero_adjoints,
        };
        let statements = jacobians.nested();
        jacobians.evaluate_reverse(end.stream, start.stream, |jw| {
            let (values, identifiers) = jw.data;
            let mut cursor = jw.end;
            statements.evaluate_reverse(jw.nested_end, jw.nested_start, |sw| {
                let (counts,) = sw.data;
                let mut lhs = sw.nested_end;
                for &count in counts[sw.start..sw.end].iter().rev() {
                    replay.reverse(lhs, count, values, identifiers, &mut cursor);
                    lhs -= 1;
                }
                debug_assert_eq!(lhs, sw.nested_start);
            });
            debug_assert_eq!(cursor, jw.start);
        });
    }

    fn evaluate_forward_range(&mut self, start: LinearPosition, end: LinearPosition) {
        debug_assert!(start <= end, "forward range is reversed");
        tracing::debug!(tape = Self::NAME, ?start, ?end, "forward evaluation");
        let largest = self.indices().count();
        self.adjoints.ensure(largest);

        let Self {
            jacobians,
            adjoints,
            functions,
            ..
        } = self;
        let mut replay = Replay {
            adjoints,
            functions,
            skip_zero: false,
        };
        let statements = jacobians.nested();
        jacobians.evaluate_forward(start.stream, end.stream, |jw| {
            let (values, identifiers) = jw.data;
            let mut cursor = jw.start;
            statements.evaluate_forward(jw.nested_start, jw.nested_end, |sw| {
                let (counts,) = sw.data;
                let mut lhs = sw.nested_start;
                for &count in &counts[sw.start..sw.end] {
                    lhs += 1;
                    replay.forward(lhs, count, values, identifiers, &mut cursor);
                }
            });
            debug_assert_eq!(cursor, jw.end);
        });
    }

    #[inline]
    fn gradient(&self, identifier: Identifier) -> F {
        self.adjoints.get(identifier)
    }

    #[inline]
    fn gradient_mut(&mut self, identifier: Identifier) -> &mut F {
        self.adjoints.get_mut(identifier)
    }

    fn clear_adjoints(&mut self) {
        self.adjoints.clear();
    }

    fn delete_adjoint_vector(&mut self) {
        self.adjoints.release();
    }

    fn set_active(&mut self) {
        self.recorder.set_active(true);
    }

    fn set_passive(&mut self) {
        self.recorder.set_active(false);
    }

    #[inline]
    fn is_active(&self) -> bool {
        self.recorder.is_active()
    }

    #[inline]
    fn largest_identifier(&self) -> Identifier {
        self.indices().largest_created_index()
    }

    fn statistics(&self) -> TapeStatistics {
        let statements = self.statements();
        TapeStatistics {
            tape: Self::NAME,
            statements: statements.data_size(),
            jacobian_entries: self.jacobians.data_size(),
            statement_chunks: statements.chunk_count(),
            jacobian_chunks: self.jacobians.chunk_count(),
            largest_identifier: self.largest_identifier(),
            adjoint_slots: self.adjoints.len(),
            free_identifiers: 0,
            shared_identifiers: false,
            thread_safe_identifiers: false,
            low_level_functions: self.functions.len(),
            memory_bytes: self.jacobians.memory() + statements.memory() + self.adjoints.memory(),
        }
    }
}
