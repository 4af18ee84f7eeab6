use crate::stream::Nested;

use super::{IndexManager, Identifier, INVALID, PASSIVE};

/// Monotonic counter: every statement gets the next identifier.
///
/// Also the innermost level of the linear tape's stream hierarchy: its
/// position is the identifier count, which is what lets the replay loops
/// recover statement identifiers by counting.
#[derive(Clone, Debug, Default)]
pub struct LinearIndexManager {
    count: Identifier,
}

impl LinearIndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identifiers handed out since the last reset.
    #[inline]
    pub fn count(&self) -> Identifier {
        self.count
    }
}

impl IndexManager for LinearIndexManager {
    const IS_LINEAR: bool = true;
    const COPY_NEEDS_STATEMENT: bool = false;
    const IS_THREAD_SAFE: bool = false;
    const NEEDS_STATIC_STORAGE: bool = false;

    #[inline]
    fn assign_index(&mut self, index: &mut Identifier) -> bool {
        debug_assert!(self.count < INVALID - 1, "identifier space exhausted");
        self.count += 1;
        *index = self.count;
        true
    }

    #[inline]
    fn assign_unused_index(&mut self, index: &mut Identifier) -> bool {
        self.assign_index(index)
    }

    #[inline]
    fn copy_index(&mut self, lhs: &mut Identifier, rhs: Identifier) {
        *lhs = rhs;
    }

    #[inline]
    fn free_index(&mut self, index: &mut Identifier) {
        *index = PASSIVE;
    }

    fn reset(&mut self) {
        self.count = 0;
    }

    #[inline]
    fn largest_created_index(&self) -> Identifier {
        self.count
    }
}

impl Nested for LinearIndexManager {
    type Position = Identifier;

    #[inline]
    fn position(&self) -> Identifier {
        self.count
    }

    #[inline]
    fn zero_position(&self) -> Identifier {
        0
    }

    #[inline]
    fn reset_to(&mut self, pos: Identifier) {
        debug_assert!(pos <= self.count, "identifier position past the recording");
        self.count = pos;
    }

    #[inline]
    fn reset_hard(&mut self) {
        self.count = 0;
    }
}
