//! Fixed-capacity structure-of-arrays storage blocks.
//!
//! A [`Chunk`] holds `k` parallel columns (one per tuple element of the row
//! type) that always have the same length. Capacity is fixed at creation:
//! pushing into a full chunk is a programming error, growth is the job of
//! [`ChunkedStream`](crate::stream::ChunkedStream).

/// A row of a chunk: a tuple of 1 to 4 plain values, stored column-wise.
pub trait Row: Copy + 'static {
    /// Column storage, one `Vec` per tuple element.
    type Columns;
    /// Borrowed view of all columns, used by the replay loops for bulk access.
    type Slices<'a>: Copy
    where
        Self: 'a;

    /// Number of columns.
    const ARITY: usize;
    /// Size in bytes of one row summed over all columns.
    const ROW_BYTES: usize;

    fn columns_with_capacity(capacity: usize) -> Self::Columns;
    fn push(columns: &mut Self::Columns, row: Self);
    fn get(columns: &Self::Columns, index: usize) -> Self;
    fn truncate(columns: &mut Self::Columns, len: usize);
    fn remove_range(columns: &mut Self::Columns, start: usize, end: usize);
    fn slices(columns: &Self::Columns) -> Self::Slices<'_>;
}

macro_rules! impl_row {
    ($arity:expr; $($name:ident : $idx:tt),+) => {
        impl<$($name: Copy + 'static),+> Row for ($($name,)+) {
            type Columns = ($(Vec<$name>,)+);
            type Slices<'a> = ($(&'a [$name],)+) where Self: 'a;

            const ARITY: usize = $arity;
            const ROW_BYTES: usize = 0 $(+ std::mem::size_of::<$name>())+;

            #[inline]
            fn columns_with_capacity(capacity: usize) -> Self::Columns {
                ($(Vec::<$name>::with_capacity(capacity),)+)
            }

            #[inline]
            fn push(columns: &mut Self::Columns, row: Self) {
                $(columns.$idx.push(row.$idx);)+
            }

            #[inline]
            fn get(columns: &Self::Columns, index: usize) -> Self {
                ($(columns.$idx[index],)+)
            }

            #[inline]
            fn truncate(columns: &mut Self::Columns, len: usize) {
                $(columns.$idx.truncate(len);)+
            }

            #[inline]
            fn remove_range(columns: &mut Self::Columns, start: usize, end: usize) {
                $(columns.$idx.drain(start..end);)+
            }

            #[inline]
            fn slices(columns: &Self::Columns) -> Self::Slices<'_> {
                ($(columns.$idx.as_slice(),)+)
            }
        }
    };
}

impl_row!(1; A: 0);
impl_row!(2; A: 0, B: 1);
impl_row!(3; A: 0, B: 1, C: 2);
impl_row!(4; A: 0, B: 1, C: 2, D: 3);

/// Fixed-capacity block of rows stored column-wise.
pub struct Chunk<R: Row> {
    columns: R::Columns,
    used: usize,
    capacity: usize,
}

impl<R: Row> Chunk<R> {
    /// Allocate an empty chunk that can hold `capacity` rows.
    pub fn new(capacity: usize) -> Self {
        Chunk {
            columns: R::columns_with_capacity(capacity),
            used: 0,
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn used_size(&self) -> usize {
        self.used
    }

    #[inline]
    pub fn unused_size(&self) -> usize {
        self.capacity - self.used
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Append one row across all columns.
    #[inline]
    pub fn push(&mut self, row: R) {
        debug_assert!(
            self.used < self.capacity,
            "chunk overflow: capacity {} exhausted",
            self.capacity
        );
        R::push(&mut self.columns, row);
        self.used += 1;
    }

    #[inline]
    pub fn get(&self, index: usize) -> R {
        debug_assert!(index < self.used);
        R::get(&self.columns, index)
    }

    /// Column views over the used rows.
    #[inline]
    pub fn data(&self) -> R::Slices<'_> {
        R::slices(&self.columns)
    }

    /// Remove rows `[start, end)`, shifting the tail left.
    pub fn erase(&mut self, start: usize, end: usize) {
        debug_assert!(start <= end && end <= self.used);
        if start == end {
            return;
        }
        if end == self.used {
            R::truncate(&mut self.columns, start);
        } else {
            R::remove_range(&mut self.columns, start, end);
        }
        self.used -= end - start;
    }

    /// Drop rows past `len`.
    #[inline]
    pub fn truncate(&mut self, len: usize) {
        debug_assert!(len <= self.used);
        R::truncate(&mut self.columns, len);
        self.used = len;
    }

    /// Drop all rows, keeping the allocation.
    #[inline]
    pub fn reset(&mut self) {
        self.truncate(0);
    }

    /// Drop all rows and reallocate for `capacity` rows.
    pub fn resize(&mut self, capacity: usize) {
        self.columns = R::columns_with_capacity(capacity);
        self.capacity = capacity;
        self.used = 0;
    }

    /// Bytes reserved by this chunk.
    #[inline]
    pub fn memory(&self) -> usize {
        self.capacity * R::ROW_BYTES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_fills_all_columns() {
        let mut chunk: Chunk<(f64, u32)> = Chunk::new(4);
        chunk.push((1.5, 7));
        chunk.push((2.5, 9));
        assert_eq!(chunk.used_size(), 2);
        assert_eq!(chunk.unused_size(), 2);
        let (values, ids) = chunk.data();
        assert_eq!(values, &[1.5, 2.5]);
        assert_eq!(ids, &[7, 9]);
        assert_eq!(chunk.get(1), (2.5, 9));
    }

    #[test]
    fn erase_shifts_tail() {
        let mut chunk: Chunk<(u8,)> = Chunk::new(8);
        for i in 0..6 {
            chunk.push((i,));
        }
        chunk.erase(1, 3);
        assert_eq!(chunk.data().0, &[0, 3, 4, 5]);
        chunk.erase(2, 4);
        assert_eq!(chunk.data().0, &[0, 3]);
        assert_eq!(chunk.used_size(), 2);
    }

    #[test]
    fn resize_drops_data() {
        let mut chunk: Chunk<(u32, u8, f32)> = Chunk::new(2);
        chunk.push((1, 2, 3.0));
        chunk.resize(16);
        assert!(chunk.is_empty());
        assert_eq!(chunk.capacity(), 16);
        assert_eq!(chunk.memory(), 16 * (4 + 1 + 4));
    }
}
