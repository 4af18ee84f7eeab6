//! Growable sequences of chunks linked into a nesting hierarchy.
//!
//! Every [`ChunkedStream`] owns the stream nested below it. Whenever a new
//! chunk is opened the nested stream's current position is remembered for
//! that chunk boundary, so any recorded [`Position`] can be revisited in O(1)
//! and a range of outer rows can be mapped to the nested rows recorded during
//! the same time span without storing a per-row index.
//!
//! The Jacobian tapes use three levels:
//!
//! ```text
//! Jacobian entries  (value, identifier)
//!   └─ statements   (argument count) or (lhs identifier, argument count)
//!        └─ linear index counter, or a plain terminator
//! ```

use std::fmt::Debug;

use crate::chunk::{Chunk, Row};

/// Anything that can sit below a chunked stream in the hierarchy.
pub trait Nested {
    /// Recorded position of this level (and, recursively, all levels below).
    type Position: Copy + Ord + Debug + Default;

    fn position(&self) -> Self::Position;
    fn zero_position(&self) -> Self::Position;
    /// Discard everything recorded after `pos`.
    fn reset_to(&mut self, pos: Self::Position);
    /// Discard everything and release surplus storage.
    fn reset_hard(&mut self);
}

/// Levels that support removing a recorded sub-range.
pub trait Erasable: Nested {
    fn erase(&mut self, start: Self::Position, end: Self::Position, recursive: bool);

    /// Where a position recorded at or after `end` lands once `[start, end)`
    /// has been erased recursively.
    fn translate_erased(
        start: Self::Position,
        end: Self::Position,
        pos: Self::Position,
    ) -> Self::Position;
}

/// Bottom of a hierarchy that has no further nested data.
#[derive(Clone, Copy, Debug, Default)]
pub struct Terminator;

impl Nested for Terminator {
    type Position = ();

    #[inline]
    fn position(&self) {}
    #[inline]
    fn zero_position(&self) {}
    #[inline]
    fn reset_to(&mut self, _pos: ()) {}
    #[inline]
    fn reset_hard(&mut self) {}
}

impl Erasable for Terminator {
    #[inline]
    fn erase(&mut self, _start: (), _end: (), _recursive: bool) {}
    #[inline]
    fn translate_erased(_start: (), _end: (), _pos: ()) {}
}

/// Position inside a chunked stream together with the nested position.
///
/// Ordering is lexicographic over `(chunk, offset, nested)` and therefore
/// follows recording time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position<P> {
    pub chunk: usize,
    pub offset: usize,
    pub nested: P,
}

/// The part of one chunk that lies inside an iterated range.
///
/// `data` covers every used row of the chunk; the iterated rows are
/// `start..end`. `nested_start..nested_end` bounds the nested data recorded
/// during the lifetime of exactly those rows.
pub struct Window<'a, R: Row, P> {
    pub data: R::Slices<'a>,
    pub start: usize,
    pub end: usize,
    pub nested_start: P,
    pub nested_end: P,
}

/// Chunked storage for one level of the recording hierarchy.
pub struct ChunkedStream<R: Row, N: Nested> {
    chunks: Vec<Chunk<R>>,
    /// Nested position at the time chunk `i` was opened.
    boundaries: Vec<N::Position>,
    current: usize,
    chunk_size: usize,
    nested: N,
}

impl<R: Row, N: Nested> ChunkedStream<R, N> {
    pub fn new(chunk_size: usize, nested: N) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        let boundary = nested.zero_position();
        ChunkedStream {
            chunks: vec![Chunk::new(chunk_size)],
            boundaries: vec![boundary],
            current: 0,
            chunk_size,
            nested,
        }
    }

    #[inline]
    pub fn nested(&self) -> &N {
        &self.nested
    }

    #[inline]
    pub fn nested_mut(&mut self) -> &mut N {
        &mut self.nested
    }

    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Make room for `n` rows in the current chunk, opening (or recycling) a
    /// chunk if necessary. Returns the in-chunk offset where the reservation
    /// starts; compare with [`pushed_since`](Self::pushed_since) afterwards.
    #[inline]
    pub fn reserve_items(&mut self, n: usize) -> usize {
        if self.chunks[self.current].unused_size() < n {
            self.next_chunk(n);
        }
        self.chunks[self.current].used_size()
    }

    /// Number of rows pushed since `reservation` was returned by
    /// [`reserve_items`](Self::reserve_items).
    #[inline]
    pub fn pushed_since(&self, reservation: usize) -> usize {
        self.chunks[self.current].used_size() - reservation
    }

    fn next_chunk(&mut self, n: usize) {
        let boundary = self.nested.position();
        let capacity = self.chunk_size.max(n);
        self.current += 1;
        if self.current < self.chunks.len() {
            let chunk = &mut self.chunks[self.current];
            if chunk.capacity() < capacity {
                chunk.resize(capacity);
            } else {
                chunk.reset();
            }
            self.boundaries[self.current] = boundary;
        } else {
            tracing::trace!(
                chunk = self.current,
                capacity,
                row_bytes = R::ROW_BYTES,
                "allocating chunk"
            );
            self.chunks.push(Chunk::new(capacity));
            self.boundaries.push(boundary);
        }
    }

    /// Append a row; space must have been reserved first.
    #[inline]
    pub fn push(&mut self, row: R) {
        self.chunks[self.current].push(row);
    }

    /// Read back a recorded row.
    #[inline]
    pub fn get(&self, chunk: usize, offset: usize) -> R {
        self.chunks[chunk].get(offset)
    }

    /// Total number of recorded rows at this level.
    pub fn data_size(&self) -> usize {
        self.chunks[..=self.current]
            .iter()
            .map(Chunk::used_size)
            .sum()
    }

    /// Rows recorded in `[start, end)`.
    pub fn data_size_between(
        &self,
        start: Position<N::Position>,
        end: Position<N::Position>,
    ) -> usize {
        let mut total = 0;
        for chunk in start.chunk..=end.chunk {
            let begin = if chunk == start.chunk { start.offset } else { 0 };
            let stop = if chunk == end.chunk {
                end.offset
            } else {
                self.chunks[chunk].used_size()
            };
            total += stop - begin;
        }
        total
    }

    /// Chunks holding recorded data (the current chunk included).
    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.current + 1
    }

    /// Bytes reserved by all allocated chunks, recycled ones included.
    pub fn memory(&self) -> usize {
        self.chunks.iter().map(Chunk::memory).sum()
    }

    /// Forward iteration over `[start, end)`, one window per touched chunk.
    pub fn evaluate_forward<'a, Func>(
        &'a self,
        start: Position<N::Position>,
        end: Position<N::Position>,
        mut func: Func,
    ) where
        Func: FnMut(Window<'a, R, N::Position>),
    {
        debug_assert!(start <= end, "forward range is reversed");
        debug_assert!(end.chunk <= self.current, "position past the recorded data");
        for chunk in start.chunk..=end.chunk {
            func(self.window(chunk, start, end));
        }
    }

    /// Reverse iteration over `[end, start)`: `start` is the later position.
    pub fn evaluate_reverse<'a, Func>(
        &'a self,
        start: Position<N::Position>,
        end: Position<N::Position>,
        mut func: Func,
    ) where
        Func: FnMut(Window<'a, R, N::Position>),
    {
        debug_assert!(end <= start, "reverse range is reversed");
        debug_assert!(start.chunk <= self.current, "position past the recorded data");
        for chunk in (end.chunk..=start.chunk).rev() {
            func(self.window(chunk, end, start));
        }
    }

    #[inline]
    fn window(
        &self,
        chunk: usize,
        low: Position<N::Position>,
        high: Position<N::Position>,
    ) -> Window<'_, R, N::Position> {
        let data = &self.chunks[chunk];
        let (start, nested_start) = if chunk == low.chunk {
            (low.offset, low.nested)
        } else {
            (0, self.boundaries[chunk])
        };
        let (end, nested_end) = if chunk == high.chunk {
            (high.offset, high.nested)
        } else {
            (data.used_size(), self.boundaries[chunk + 1])
        };
        Window {
            data: data.data(),
            start,
            end,
            nested_start,
            nested_end,
        }
    }
}

impl<R: Row, N: Nested> Nested for ChunkedStream<R, N> {
    type Position = Position<N::Position>;

    #[inline]
    fn position(&self) -> Self::Position {
        Position {
            chunk: self.current,
            offset: self.chunks[self.current].used_size(),
            nested: self.nested.position(),
        }
    }

    #[inline]
    fn zero_position(&self) -> Self::Position {
        Position {
            chunk: 0,
            offset: 0,
            nested: self.nested.zero_position(),
        }
    }

    fn reset_to(&mut self, pos: Self::Position) {
        debug_assert!(pos.chunk <= self.current, "position past the recorded data");
        for chunk in &mut self.chunks[pos.chunk + 1..=self.current] {
            chunk.reset();
        }
        self.chunks[pos.chunk].truncate(pos.offset);
        self.current = pos.chunk;
        self.nested.reset_to(pos.nested);
    }

    fn reset_hard(&mut self) {
        self.chunks.truncate(1);
        self.boundaries.truncate(1);
        self.chunks[0].reset();
        self.current = 0;
        self.nested.reset_hard();
        self.boundaries[0] = self.nested.zero_position();
    }
}

impl<R: Row, N: Erasable> Erasable for ChunkedStream<R, N> {
    fn erase(&mut self, start: Self::Position, end: Self::Position, recursive: bool) {
        debug_assert!(start <= end, "erase range is reversed");
        debug_assert!(end.chunk <= self.current, "position past the recorded data");
        if recursive {
            self.nested.erase(start.nested, end.nested, true);
        }

        let removed = if start.chunk == end.chunk {
            self.chunks[start.chunk].erase(start.offset, end.offset);
            0
        } else {
            let used = self.chunks[start.chunk].used_size();
            self.chunks[start.chunk].erase(start.offset, used);
            self.chunks[end.chunk].erase(0, end.offset);
            // The rows left in the end chunk follow directly on the erased
            // nested range.
            self.boundaries[end.chunk] = if recursive {
                N::translate_erased(start.nested, end.nested, end.nested)
            } else {
                end.nested
            };
            let removed = end.chunk - start.chunk - 1;
            self.chunks.drain(start.chunk + 1..end.chunk);
            self.boundaries.drain(start.chunk + 1..end.chunk);
            self.current -= removed;
            removed
        };

        if recursive {
            let first_later = end.chunk - removed + 1;
            for boundary in &mut self.boundaries[first_later..=self.current] {
                *boundary = N::translate_erased(start.nested, end.nested, *boundary);
            }
        }
    }

    fn translate_erased(
        start: Self::Position,
        end: Self::Position,
        pos: Self::Position,
    ) -> Self::Position {
        debug_assert!(end <= pos);
        let nested = N::translate_erased(start.nested, end.nested, pos.nested);
        if start.chunk == end.chunk {
            let offset = if pos.chunk == end.chunk {
                pos.offset - (end.offset - start.offset)
            } else {
                pos.offset
            };
            Position {
                chunk: pos.chunk,
                offset,
                nested,
            }
        } else {
            let removed = end.chunk - start.chunk - 1;
            let offset = if pos.chunk == end.chunk {
                pos.offset - end.offset
            } else {
                pos.offset
            };
            Position {
                chunk: pos.chunk - removed,
                offset,
                nested,
            }
        }
    }
}
