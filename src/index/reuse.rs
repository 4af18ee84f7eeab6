use super::{IndexManager, Identifier, INVALID, PASSIVE};

/// Free-list identifier recycling.
///
/// Freed identifiers are kept on two lists: `used` holds identifiers that
/// may still be referenced by recorded statements, `unused` holds identifiers
/// no statement on the current recording refers to. A full reset moves
/// everything from `used` to `unused`. Inputs are always drawn from `unused`
/// (or freshly minted), so seeding their adjoints can never disturb a
/// recorded statement.
#[derive(Clone, Debug)]
pub struct ReuseIndexManager {
    used: Vec<Identifier>,
    unused: Vec<Identifier>,
    largest: Identifier,
    sort_on_reset: bool,
    #[cfg(debug_assertions)]
    live: Vec<bool>,
}

impl Default for ReuseIndexManager {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ReuseIndexManager {
    /// Create an empty manager. With `sort_on_reset`, the free list is sorted
    /// on every reset so that low identifiers are handed out first.
    pub fn new(sort_on_reset: bool) -> Self {
        ReuseIndexManager {
            used: Vec::new(),
            unused: Vec::new(),
            largest: PASSIVE,
            sort_on_reset,
            #[cfg(debug_assertions)]
            live: vec![false],
        }
    }

    #[inline]
    fn mint(&mut self) -> Identifier {
        debug_assert!(self.largest < INVALID - 1, "identifier space exhausted");
        self.largest += 1;
        #[cfg(debug_assertions)]
        self.live.push(false);
        self.largest
    }

    #[inline]
    fn mark(&mut self, _index: Identifier, _live: bool) {
        #[cfg(debug_assertions)]
        {
            self.live[_index as usize] = _live;
        }
    }
}

impl IndexManager for ReuseIndexManager {
    const IS_LINEAR: bool = false;
    const COPY_NEEDS_STATEMENT: bool = true;
    const IS_THREAD_SAFE: bool = false;
    const NEEDS_STATIC_STORAGE: bool = false;

    #[inline]
    fn assign_index(&mut self, index: &mut Identifier) -> bool {
        if *index != PASSIVE {
            return false;
        }
        let (id, minted) = match self.used.pop().or_else(|| self.unused.pop()) {
            Some(id) => (id, false),
            None => (self.mint(), true),
        };
        self.mark(id, true);
        *index = id;
        minted
    }

    #[inline]
    fn assign_unused_index(&mut self, index: &mut Identifier) -> bool {
        self.free_index(index);
        let (id, minted) = match self.unused.pop() {
            Some(id) => (id, false),
            None => (self.mint(), true),
        };
        self.mark(id, true);
        *index = id;
        minted
    }

    #[inline]
    fn copy_index(&mut self, lhs: &mut Identifier, rhs: Identifier) {
        if rhs == PASSIVE {
            self.free_index(lhs);
        } else {
            self.assign_index(lhs);
        }
    }

    #[inline]
    fn free_index(&mut self, index: &mut Identifier) {
        if *index == PASSIVE {
            return;
        }
        debug_assert!(*index <= self.largest, "identifier {} was never created", *index);
        debug_assert!(self.is_live(*index), "identifier {} freed twice", *index);
        self.mark(*index, false);
        self.used.push(*index);
        *index = PASSIVE;
    }

    fn reset(&mut self) {
        self.unused.append(&mut self.used);
        if self.sort_on_reset {
            // Popped from the back, so descending order hands out small ids first.
            self.unused.sort_unstable_by(|a, b| b.cmp(a));
        }
    }

    #[inline]
    fn largest_created_index(&self) -> Identifier {
        self.largest
    }

    fn set_sort_on_reset(&mut self, sort: bool) {
        self.sort_on_reset = sort;
    }

    fn free_count(&self) -> usize {
        self.used.len() + self.unused.len()
    }

    #[cfg(debug_assertions)]
    fn is_live(&self, index: Identifier) -> bool {
        self.live.get(index as usize).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freed_identifiers_are_recycled() {
        let mut manager = ReuseIndexManager::default();
        let mut a = PASSIVE;
        let mut b = PASSIVE;
        assert!(manager.assign_index(&mut a));
        assert!(manager.assign_index(&mut b));
        assert_eq!((a, b), (1, 2));

        manager.free_index(&mut a);
        assert_eq!(a, PASSIVE);
        let mut c = PASSIVE;
        assert!(!manager.assign_index(&mut c));
        assert_eq!(c, 1);
        assert_eq!(manager.largest_created_index(), 2);
    }

    #[test]
    fn active_lhs_keeps_its_identifier() {
        let mut manager = ReuseIndexManager::default();
        let mut a = PASSIVE;
        manager.assign_index(&mut a);
        let before = a;
        assert!(!manager.assign_index(&mut a));
        assert_eq!(a, before);
    }

    #[test]
    fn inputs_avoid_recently_used_identifiers() {
        let mut manager = ReuseIndexManager::default();
        let mut a = PASSIVE;
        manager.assign_index(&mut a);
        manager.free_index(&mut a);

        let mut input = PASSIVE;
        assert!(manager.assign_unused_index(&mut input));
        assert_eq!(input, 2);

        manager.reset();
        let mut other = PASSIVE;
        assert!(!manager.assign_unused_index(&mut other));
        assert_eq!(other, 1);
    }

    #[test]
    fn reset_sorts_free_list() {
        let mut manager = ReuseIndexManager::default();
        let mut ids = [PASSIVE; 4];
        for id in &mut ids {
            manager.assign_index(id);
        }
        for id in ids.iter_mut().rev() {
            manager.free_index(id);
        }
        manager.reset();
        let mut next = PASSIVE;
        manager.assign_index(&mut next);
        assert_eq!(next, 1);
        assert_eq!(manager.free_count(), 3);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "freed twice")]
    fn double_free_is_caught() {
        let mut manager = ReuseIndexManager::default();
        let mut a = PASSIVE;
        manager.assign_index(&mut a);
        let mut alias = a;
        manager.free_index(&mut a);
        manager.free_index(&mut alias);
    }
}
