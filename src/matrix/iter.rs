//! Tuple cursors over committed matrix storage.

use super::scalar::Scalar;
use super::typed::{Storage, TypedMatrix, ZOMBIE};

/// Resumable position inside a matrix. Holds no borrow, so an operator can keep
/// one alongside the matrix it walks and re-attach it on every call.
#[derive(Clone, Debug, Default)]
pub struct TupleCursor {
    k: usize,
    pos: usize,
}

impl TupleCursor {
    /// Cursor at the first entry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewinds to the first entry.
    pub fn reset(&mut self) {
        self.k = 0;
        self.pos = 0;
    }

    /// Yields the next live `(row, col, value)` of `m`, skipping zombies.
    pub fn next_tuple(&mut self, m: &TypedMatrix) -> Option<(u64, u64, Scalar)> {
        match m.storage() {
            Storage::Full { .. } | Storage::Bitmap { .. } => {
                let vlen = m.vlen() as usize;
                let cells = vlen * m.vdim() as usize;
                while self.pos < cells {
                    let pos = self.pos;
                    self.pos += 1;
                    if let Storage::Bitmap { b, .. } = m.storage() {
                        if !b[pos] {
                            continue;
                        }
                    }
                    let (i, j) = ((pos % vlen) as u64, (pos / vlen) as u64);
                    let (row, col) = m.to_row_col(i, j);
                    return Some((row, col, m.value_at(pos)));
                }
                None
            }
            Storage::Sparse { p, i, .. } | Storage::Hypersparse { p, i, .. } => {
                let h = match m.storage() {
                    Storage::Hypersparse { h, .. } => Some(h.as_slice()),
                    _ => None,
                };
                while self.k + 1 < p.len() {
                    if self.pos < p[self.k] {
                        self.pos = p[self.k];
                    }
                    if self.pos >= p[self.k + 1] {
                        self.k += 1;
                        continue;
                    }
                    let pos = self.pos;
                    self.pos += 1;
                    let raw = i[pos];
                    if raw & ZOMBIE != 0 {
                        continue;
                    }
                    let j = h.map_or(self.k as u64, |h| h[self.k]);
                    let (row, col) = m.to_row_col(raw, j);
                    return Some((row, col, m.value_at(pos)));
                }
                None
            }
        }
    }
}

/// Borrowing iterator returned by [`TypedMatrix::tuples`].
pub struct Tuples<'a> {
    matrix: &'a TypedMatrix,
    cursor: TupleCursor,
}

impl<'a> Tuples<'a> {
    pub(crate) fn new(matrix: &'a TypedMatrix) -> Self {
        Self {
            matrix,
            cursor: TupleCursor::new(),
        }
    }
}

impl Iterator for Tuples<'_> {
    type Item = (u64, u64, Scalar);

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.next_tuple(self.matrix)
    }
}
