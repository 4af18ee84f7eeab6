use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::thread::LocalKey;

use super::{IndexManager, Identifier, ReuseIndexManager};

/// Storage of the shared managers, one pair per real type so that tapes
/// over `f32` and `f64` keep separate identifier spaces.
pub trait SharedIndexStorage: 'static {
    #[doc(hidden)]
    fn thread_manager() -> &'static LocalKey<RefCell<ReuseIndexManager>>;
    #[doc(hidden)]
    fn process_manager() -> &'static OnceLock<Mutex<ReuseIndexManager>>;
}

macro_rules! shared_index_storage {
    ($($real:ty => $thread:ident, $process:ident),* $(,)?) => {
        thread_local! {
            $(static $thread: RefCell<ReuseIndexManager> = RefCell::new(ReuseIndexManager::default());)*
        }

        $(
            static $process: OnceLock<Mutex<ReuseIndexManager>> = OnceLock::new();

            impl SharedIndexStorage for $real {
                #[inline]
                fn thread_manager() -> &'static LocalKey<RefCell<ReuseIndexManager>> {
                    &$thread
                }

                #[inline]
                fn process_manager() -> &'static OnceLock<Mutex<ReuseIndexManager>> {
                    &$process
                }
            }
        )*
    };
}

shared_index_storage! {
    f32 => THREAD_F32, PROCESS_F32,
    f64 => THREAD_F64, PROCESS_F64,
}

/// Handle to one [`ReuseIndexManager`] per thread and real type.
///
/// All `ReuseTape<R, SharedIndexManager<R>>` tapes of the current thread
/// draw from the same identifier space, so active values recorded on one
/// tape stay valid after another tape is activated. Not usable across
/// threads.
#[derive(Clone, Copy, Debug, Default)]
pub struct SharedIndexManager<R: SharedIndexStorage> {
    _real: PhantomData<R>,
}

impl<R: SharedIndexStorage> SharedIndexManager<R> {
    #[inline]
    fn with<T>(f: impl FnOnce(&mut ReuseIndexManager) -> T) -> T {
        R::thread_manager().with(|cell| f(&mut cell.borrow_mut()))
    }
}

/// Handle to one process-wide [`ReuseIndexManager`] per real type, behind a
/// mutex.
///
/// Lets tapes on different threads hand out non-overlapping identifiers.
/// The adjoint vectors themselves are still per tape.
#[derive(Clone, Copy, Debug, Default)]
pub struct SyncIndexManager<R: SharedIndexStorage> {
    _real: PhantomData<R>,
}

impl<R: SharedIndexStorage> SyncIndexManager<R> {
    #[inline]
    fn lock() -> MutexGuard<'static, ReuseIndexManager> {
        let manager = R::process_manager().get_or_init(|| Mutex::new(ReuseIndexManager::default()));
        // A panic while holding the lock cannot leave the free lists torn:
        // every mutation is a single push/pop.
        manager.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[inline]
    fn with<T>(f: impl FnOnce(&mut ReuseIndexManager) -> T) -> T {
        f(&mut Self::lock())
    }
}

macro_rules! delegate_index_manager {
    ($handle:ident, thread_safe = $safe:expr) => {
        impl<R: SharedIndexStorage> IndexManager for $handle<R> {
            const IS_LINEAR: bool = false;
            const COPY_NEEDS_STATEMENT: bool = true;
            const IS_THREAD_SAFE: bool = $safe;
            const NEEDS_STATIC_STORAGE: bool = true;

            #[inline]
            fn assign_index(&mut self, index: &mut Identifier) -> bool {
                Self::with(|m| m.assign_index(index))
            }

            #[inline]
            fn assign_unused_index(&mut self, index: &mut Identifier) -> bool {
                Self::with(|m| m.assign_unused_index(index))
            }

            #[inline]
            fn copy_index(&mut self, lhs: &mut Identifier, rhs: Identifier) {
                Self::with(|m| m.copy_index(lhs, rhs))
            }

            #[inline]
            fn free_index(&mut self, index: &mut Identifier) {
                Self::with(|m| m.free_index(index))
            }

            fn reset(&mut self) {
                Self::with(|m| m.reset())
            }

            fn largest_created_index(&self) -> Identifier {
                Self::with(|m| m.largest_created_index())
            }

            fn set_sort_on_reset(&mut self, sort: bool) {
                Self::with(|m| m.set_sort_on_reset(sort))
            }

            fn free_count(&self) -> usize {
                Self::with(|m| m.free_count())
            }

            fn is_live(&self, index: Identifier) -> bool {
                Self::with(|m| m.is_live(index))
            }
        }
    };
}

delegate_index_manager!(SharedIndexManager, thread_safe = false);
delegate_index_manager!(SyncIndexManager, thread_safe = true);
