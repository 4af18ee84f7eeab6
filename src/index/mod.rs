//! Identifier management.
//!
//! An identifier ties an active variable to its slot in the adjoint vector.
//! Two strategies are provided:
//!
//! - [`LinearIndexManager`]: one fresh identifier per recorded statement, never
//!   reused before a full reset. The identifier of a statement equals its
//!   position in the recording, so it does not need to be stored.
//! - [`ReuseIndexManager`]: freed identifiers go back to a free list and are
//!   handed out again, keeping the adjoint vector bounded for long recordings.
//!   Statements must store their left-hand identifier explicitly.
//!
//! [`SharedIndexManager`] and [`SyncIndexManager`] expose a single reuse
//! manager per thread or per process so that several tapes can share one
//! identifier space. Each real type gets its own manager through
//! [`SharedIndexStorage`], so `f32` and `f64` tapes never mix identifiers.

mod linear;
mod reuse;
mod shared;

pub use linear::LinearIndexManager;
pub use reuse::ReuseIndexManager;
pub use shared::{SharedIndexManager, SharedIndexStorage, SyncIndexManager};

/// Handle of an active variable. `0` is the passive identifier.
pub type Identifier = u32;

/// Identifier of passive values; never a valid adjoint slot.
pub const PASSIVE: Identifier = 0;

/// Identifier signalling misuse (e.g. a statement slot with no variable).
pub const INVALID: Identifier = Identifier::MAX;

/// Common contract of all identifier strategies.
///
/// Every assigning call reports whether a previously unseen identifier was
/// minted, which callers use to grow per-identifier storage.
pub trait IndexManager {
    /// Identifiers are implied by the statement order.
    const IS_LINEAR: bool;
    /// Copies must be recorded as statements instead of sharing identifiers.
    const COPY_NEEDS_STATEMENT: bool;
    /// The manager may be used from several threads at once.
    const IS_THREAD_SAFE: bool;
    /// The manager's state lives in process- or thread-wide storage.
    const NEEDS_STATIC_STORAGE: bool;

    /// Give `index` an identifier for the left-hand side of a new statement.
    fn assign_index(&mut self, index: &mut Identifier) -> bool;

    /// Give `index` an identifier that no recorded statement refers to.
    fn assign_unused_index(&mut self, index: &mut Identifier) -> bool;

    /// Make `lhs` refer to the same slot as `rhs`, or prepare it for a copy
    /// statement when copies need statements.
    fn copy_index(&mut self, lhs: &mut Identifier, rhs: Identifier);

    /// Release `index` and set it to [`PASSIVE`].
    fn free_index(&mut self, index: &mut Identifier);

    /// Called when the owning tape is fully reset.
    fn reset(&mut self);

    fn largest_created_index(&self) -> Identifier;

    /// Whether freed identifiers are sorted on [`reset`](Self::reset).
    /// Ignored by strategies without a free list.
    fn set_sort_on_reset(&mut self, _sort: bool) {}

    /// Identifiers waiting on the free lists.
    fn free_count(&self) -> usize {
        0
    }

    /// Whether `index` currently belongs to a live variable.
    ///
    /// Only tracked in debug builds; release builds always answer `true`.
    fn is_live(&self, _index: Identifier) -> bool {
        true
    }
}
