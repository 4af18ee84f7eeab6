use crate::adjoints::AdjointVector;
use crate::config::TapeConfig;
use crate::error::TapeError;
use crate::expr::Expression;
use crate::float::Float;
use crate::index::{Identifier, IndexManager, ReuseIndexManager, PASSIVE};
use crate::recorder::{Recorder, INPUT_TAG, LOW_LEVEL_FUNCTION_TAG};
use crate::stream::{ChunkedStream, Erasable, Nested, Position, Terminator};

use super::{LowLevelFunction, Replay, TapeBehavior, TapePosition, TapeStatistics};

type StatementStream = ChunkedStream<(Identifier, u8), Terminator>;
type JacobianStream<F> = ChunkedStream<(F, Identifier), StatementStream>;

/// Position in a [`ReuseTape`].
pub type ReusePosition = TapePosition<Position<Position<()>>>;

/// Jacobian tape with identifier reuse.
///
/// Identifiers released by dropped values are handed out again, which keeps
/// the adjoint vector as small as the number of simultaneously live values.
/// Every statement stores its left-hand identifier.
///
/// The index strategy `I` is [`ReuseIndexManager`] by default; use
/// [`SharedIndexManager`](crate::index::SharedIndexManager) or
/// [`SyncIndexManager`](crate::index::SyncIndexManager) to let several tapes
/// draw from one identifier space. Tapes sharing a manager must be reset
/// together.
pub struct ReuseTape<F: Float, I: IndexManager = ReuseIndexManager> {
    jacobians: JacobianStream<F>,
    indices: I,
    adjoints: AdjointVector<F>,
    functions: Vec<Box<dyn LowLevelFunction<F>>>,
    recorder: Recorder<F>,
}

/// One statement read back from the recording.
struct RecordedStatement {
    lhs: Identifier,
    count: u8,
}

impl<F: Float, I: IndexManager + Default> Default for ReuseTape<F, I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Float, I: IndexManager + Default> ReuseTape<F, I> {
    /// Create an empty, active tape with the default configuration.
    pub fn new() -> Self {
        Self::with_config(TapeConfig::default())
    }

    /// Create an empty, active tape.
    pub fn with_config(config: TapeConfig) -> Self {
        let mut indices = I::default();
        indices.set_sort_on_reset(config.sort_indices_on_reset);
        let statements = ChunkedStream::new(config.statement_chunk_size, Terminator);
        ReuseTape {
            jacobians: ChunkedStream::new(config.jacobian_chunk_size, statements),
            indices,
            adjoints: AdjointVector::new(),
            functions: Vec::new(),
            recorder: Recorder::new(config),
        }
    }
}

impl<F: Float, I: IndexManager> ReuseTape<F, I> {
    #[inline]
    fn statements(&self) -> &StatementStream {
        self.jacobians.nested()
    }

    /// The identifier strategy.
    pub fn indices(&self) -> &I {
        &self.indices
    }

    /// Number of recorded statements, inputs and low-level calls included.
    pub fn statement_count(&self) -> usize {
        self.statements().data_size()
    }

    /// Number of recorded Jacobian entries.
    pub fn jacobian_count(&self) -> usize {
        self.jacobians.data_size()
    }

    pub fn adjoints(&self) -> &AdjointVector<F> {
        &self.adjoints
    }

    pub fn adjoints_mut(&mut self) -> &mut AdjointVector<F> {
        &mut self.adjoints
    }

    /// Remove the statements recorded in `[start, end)`.
    ///
    /// Positions recorded at or after `end` are invalidated; low-level
    /// functions referenced from the erased range stay allocated until the
    /// next reset.
    pub fn erase(&mut self, start: ReusePosition, end: ReusePosition) {
        debug_assert!(start <= end, "erase range is reversed");
        tracing::debug!(tape = Self::NAME, ?start, ?end, "erasing range");
        self.jacobians.erase(start.stream, end.stream, true);
    }

    /// Record the statements of `[start, end)` again at the end of the tape.
    ///
    /// The copies keep their identifiers, so replaying the tape runs the
    /// range twice.
    pub fn append(&mut self, start: ReusePosition, end: ReusePosition) {
        debug_assert!(start <= end, "append range is reversed");
        tracing::debug!(tape = Self::NAME, ?start, ?end, "appending range");
        let (statements, entries) = self.read_range(start, end);
        let mut cursor = 0;
        for statement in statements {
            let rows = match statement.count {
                INPUT_TAG => 0,
                LOW_LEVEL_FUNCTION_TAG => 1,
                n => n as usize,
            };
            Self::push_statement(
                &mut self.jacobians,
                statement.lhs,
                statement.count,
                &entries[cursor..cursor + rows],
            );
            cursor += rows;
        }
    }

    fn read_range(
        &self,
        start: ReusePosition,
        end: ReusePosition,
    ) -> (Vec<RecordedStatement>, Vec<(F, Identifier)>) {
        let mut statements = Vec::new();
        let mut entries = Vec::new();
        let nested = self.statements();
        self.jacobians.evaluate_forward(start.stream, end.stream, |jw| {
            let (values, identifiers) = jw.data;
            entries.extend(
                values[jw.start..jw.end]
                    .iter()
                    .copied()
                    .zip(identifiers[jw.start..jw.end].iter().copied()),
            );
            nested.evaluate_forward(jw.nested_start, jw.nested_end, |sw| {
                let (lhs, counts) = sw.data;
                statements.extend(
                    (sw.start..sw.end).map(|s| RecordedStatement {
                        lhs: lhs[s],
                        count: counts[s],
                    }),
                );
            });
        });
        (statements, entries)
    }

    fn push_statement(
        jacobians: &mut JacobianStream<F>,
        lhs: Identifier,
        count: u8,
        entries: &[(F, Identifier)],
    ) {
        let reservation = jacobians.reserve_items(entries.len());
        jacobians.nested_mut().reserve_items(1);
        for &entry in entries {
            jacobians.push(entry);
        }
        debug_assert_eq!(jacobians.pushed_since(reservation), entries.len());
        jacobians.nested_mut().push((lhs, count));
    }
}

impl<F: Float, I: IndexManager> TapeBehavior for ReuseTape<F, I> {
    type Real = F;
    type Position = ReusePosition;

    const NAME: &'static str = "reuse";
    const LINEAR_INDICES: bool = I::IS_LINEAR;

    #[inline]
    fn config(&self) -> &TapeConfig {
        self.recorder.config()
    }

    fn store<E>(&mut self, lhs: &mut Identifier, rhs: &E) -> Result<(), TapeError>
    where
        E: Expression<Real = F>,
    {
        if !self.recorder.is_active() {
            self.indices.free_index(lhs);
            return Ok(());
        }
        if let Some(rhs) = self.recorder.elided_copy(rhs, I::COPY_NEEDS_STATEMENT) {
            self.indices.copy_index(lhs, rhs);
            return Ok(());
        }

        let Self {
            jacobians,
            indices,
            recorder,
            ..
        } = self;
        let entries = recorder.collect(rhs)?;
        debug_assert!(
            entries.iter().all(|e| indices.is_live(e.1)),
            "statement reads a freed identifier"
        );
        if entries.is_empty() {
            indices.free_index(lhs);
            return Ok(());
        }
        indices.assign_index(lhs);
        Self::push_statement(jacobians, *lhs, entries.len() as u8, entries);
        Ok(())
    }

    fn register_input(&mut self, identifier: &mut Identifier) {
        if !self.recorder.is_active() {
            return;
        }
        if !self.indices.assign_unused_index(identifier) {
            // Recycled slots may hold an adjoint from an earlier recording.
            self.adjoints.reset_slot(*identifier);
        }
        Self::push_statement(&mut self.jacobians, *identifier, INPUT_TAG, &[]);
    }

    fn register_output(&mut self, identifier: &mut Identifier) {
        if !self.recorder.is_active() || *identifier == PASSIVE {
            return;
        }
        let mut arg = *identifier;
        *identifier = PASSIVE;
        self.indices.assign_index(identifier);
        Self::push_statement(&mut self.jacobians, *identifier, 1, &[(F::one(), arg)]);
        self.indices.free_index(&mut arg);
    }

    #[inline]
    fn free(&mut self, identifier: &mut Identifier) {
        self.indices.free_index(identifier);
    }

    fn push_low_level_function(&mut self, function: Box<dyn LowLevelFunction<F>>) {
        if !self.recorder.is_active() {
            return;
        }
        tracing::debug!(tape = Self::NAME, name = function.name(), "pushing low-level function");
        let slot = self.functions.len() as Identifier;
        self.functions.push(function);
        Self::push_statement(
            &mut self.jacobians,
            PASSIVE,
            LOW_LEVEL_FUNCTION_TAG,
            &[(F::zero(), slot)],
        );
    }

    #[inline]
    fn position(&self) -> ReusePosition {
        TapePosition {
            stream: self.jacobians.position(),
            functions: self.functions.len(),
        }
    }

    #[inline]
    fn zero_position(&self) -> ReusePosition {
        TapePosition {
            stream: self.jacobians.zero_position(),
            functions: 0,
        }
    }

    fn reset_to(&mut self, pos: ReusePosition, clear_adjoints: bool) {
        tracing::debug!(tape = Self::NAME, ?pos, "reset to position");
        self.jacobians.reset_to(pos.stream);
        self.functions.truncate(pos.functions);
        if clear_adjoints {
            self.adjoints.clear();
        }
    }

    fn reset(&mut self, clear_adjoints: bool) {
        let zero = self.zero_position();
        self.reset_to(zero, clear_adjoints);
        self.indices.reset();
    }

    fn evaluate_range(&mut self, start: ReusePosition, end: ReusePosition) {
        debug_assert!(start <= end, "reverse range is reversed");
        tracing::debug!(tape = Self::NAME, ?start, ?end, "reverse evaluation");
        self.adjoints.ensure(self.indices.largest_created_index());

        let Self {
            jacobians,
            adjoints,
            functions,
            recorder,
            ..
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
                let (lhs, counts) = sw.data;
                for s in (sw.start..sw.end).rev() {
                    replay.reverse(lhs[s], counts[s], values, identifiers, &mut cursor);
                }
            });
            debug_assert_eq!(cursor, jw.start);
        });
    }

    fn evaluate_forward_range(&mut self, start: ReusePosition, end: ReusePosition) {
        debug_assert!(start <= end, "forward range is reversed");
        tracing::debug!(tape = Self::NAME, ?start, ?end, "forward evaluation");
        self.adjoints.ensure(self.indices.largest_created_index());

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
                let (lhs, counts) = sw.data;
                for s in sw.start..sw.end {
                    replay.forward(lhs[s], counts[s], values, identifiers, &mut cursor);
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

    fn set_gradient(&mut self, identifier: Identifier, value: F) {
        debug_assert!(
            identifier == PASSIVE || self.indices.is_live(identifier),
            "seeding freed identifier {}",
            identifier
        );
        *self.adjoints.get_mut(identifier) = value;
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
        self.indices.largest_created_index()
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
            free_identifiers: self.indices.free_count(),
            shared_identifiers: I::NEEDS_STATIC_STORAGE,
            thread_safe_identifiers: I::IS_THREAD_SAFE,
            low_level_functions: self.functions.len(),
            memory_bytes: self.jacobians.memory() + statements.memory() + self.adjoints.memory(),
        }
    }
}
