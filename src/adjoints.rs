//! Dense per-identifier gradient storage.

use std::ops::{Index, IndexMut};

use crate::float::Float;
use crate::index::Identifier;

/// Gradient values indexed by identifier.
///
/// Slot 0 (the passive identifier) always exists so that reads through a
/// passive identifier are harmless. The vector grows on demand to cover the
/// largest identifier seen; new slots start at zero.
#[derive(Clone, Debug)]
pub struct AdjointVector<F: Float> {
    data: Vec<F>,
}

impl<F: Float> Default for AdjointVector<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Float> AdjointVector<F> {
    pub fn new() -> Self {
        AdjointVector {
            data: vec![F::zero()],
        }
    }

    /// Number of slots, always `> largest identifier` after [`ensure`](Self::ensure).
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false: slot 0 is never removed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Grow so that `identifier` is a valid slot.
    #[inline]
    pub fn ensure(&mut self, identifier: Identifier) {
        let needed = identifier as usize + 1;
        if self.data.len() < needed {
            self.data.resize(needed, F::zero());
        }
    }

    /// Value at `identifier`, zero for slots that were never touched.
    #[inline]
    pub fn get(&self, identifier: Identifier) -> F {
        self.data
            .get(identifier as usize)
            .copied()
            .unwrap_or_else(F::zero)
    }

    /// Mutable slot at `identifier`, growing the vector on first touch.
    #[inline]
    pub fn get_mut(&mut self, identifier: Identifier) -> &mut F {
        self.ensure(identifier);
        &mut self.data[identifier as usize]
    }

    #[inline]
    pub fn set(&mut self, identifier: Identifier, value: F) {
        *self.get_mut(identifier) = value;
    }

    /// Zero the slot of `identifier` if it exists, without growing.
    #[inline]
    pub fn reset_slot(&mut self, identifier: Identifier) {
        if let Some(slot) = self.data.get_mut(identifier as usize) {
            *slot = F::zero();
        }
    }

    /// Zero every slot, keeping the allocation.
    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|a| *a = F::zero());
    }

    /// Zero the slots `(low, high]`, clamped to the current size.
    pub fn clear_range(&mut self, low: Identifier, high: Identifier) {
        let end = (high as usize + 1).min(self.data.len());
        let start = (low as usize + 1).min(end);
        self.data[start..end].iter_mut().for_each(|a| *a = F::zero());
    }

    /// Release all slots except the passive one.
    pub fn release(&mut self) {
        self.data.truncate(1);
        self.data.shrink_to_fit();
        self.data[0] = F::zero();
    }

    #[inline]
    pub fn as_slice(&self) -> &[F] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [F] {
        &mut self.data
    }

    /// Bytes held by the vector.
    pub fn memory(&self) -> usize {
        self.data.capacity() * std::mem::size_of::<F>()
    }
}

impl<F: Float> Index<Identifier> for AdjointVector<F> {
    type Output = F;

    #[inline]
    fn index(&self, identifier: Identifier) -> &F {
        debug_assert!(
            (identifier as usize) < self.data.len(),
            "identifier {} outside the adjoint vector (size {})",
            identifier,
            self.data.len()
        );
        &self.data[identifier as usize]
    }
}

impl<F: Float> IndexMut<Identifier> for AdjointVector<F> {
    #[inline]
    fn index_mut(&mut self, identifier: Identifier) -> &mut F {
        debug_assert!(
            (identifier as usize) < self.data.len(),
            "identifier {} outside the adjoint vector (size {})",
            identifier,
            self.data.len()
        );
        &mut self.data[identifier as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_on_first_touch() {
        let mut adjoints = AdjointVector::<f64>::new();
        assert_eq!(adjoints.len(), 1);
        assert_eq!(adjoints.get(42), 0.0);
        *adjoints.get_mut(5) += 2.0;
        assert_eq!(adjoints.len(), 6);
        assert_eq!(adjoints[5], 2.0);
    }

    #[test]
    fn clear_range_is_half_open_from_below() {
        let mut adjoints = AdjointVector::<f64>::new();
        for id in 1..=5 {
            adjoints.set(id, id as f64);
        }
        adjoints.clear_range(2, 4);
        assert_eq!(adjoints.as_slice(), &[0.0, 1.0, 2.0, 0.0, 0.0, 5.0]);
        adjoints.clear_range(3, 100);
        assert_eq!(adjoints.get(5), 0.0);
    }

    #[test]
    fn reset_slot_never_grows() {
        let mut adjoints = AdjointVector::<f64>::new();
        adjoints.set(3, 1.5);
        adjoints.reset_slot(3);
        adjoints.reset_slot(9);
        assert_eq!(adjoints.len(), 4);
        assert_eq!(adjoints.get(3), 0.0);
    }

    #[test]
    fn release_keeps_passive_slot() {
        let mut adjoints = AdjointVector::<f32>::new();
        adjoints.set(10, 1.0);
        adjoints.release();
        assert_eq!(adjoints.len(), 1);
        assert_eq!(adjoints[0], 0.0);
    }
}
