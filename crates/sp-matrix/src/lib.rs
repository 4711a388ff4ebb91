#![forbid(unsafe_code)]

//! Compressed sparse row (CSR) matrix over `f64`.
//!
//! Every `CsrMatrix` is kept canonical: column indices strictly increase
//! within each row and no explicit zeros are stored. Two matrices with the
//! same logical contents therefore compare equal with `==`, and every
//! operation below can rely on sorted rows for merge-style kernels.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
}

impl ArithmeticOp {
    fn apply(self, left: f64, right: f64) -> f64 {
        match self {
            Self::Add => left + right,
            Self::Sub => left - right,
            Self::Mul => left * right,
        }
    }

    /// Mul annihilates entries missing on either side; Add/Sub keep the union.
    fn is_intersection(self) -> bool {
        matches!(self, Self::Mul)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MatrixError {
    #[error("invalid CSR structure: {0}")]
    InvalidStructure(String),
    #[error("entry ({row}, {col}) out of bounds for shape ({nrows}, {ncols})")]
    EntryOutOfBounds {
        row: usize,
        col: usize,
        nrows: usize,
        ncols: usize,
    },
    #[error("row position {position} out of bounds for {len} rows")]
    RowOutOfBounds { position: usize, len: usize },
    #[error("column position {position} out of bounds for {len} columns")]
    ColumnOutOfBounds { position: usize, len: usize },
    #[error("{op}: incompatible shapes {left:?} and {right:?}")]
    ShapeMismatch {
        op: &'static str,
        left: (usize, usize),
        right: (usize, usize),
    },
    #[error("{what}: expected length {expected}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Raw serialized layout; validated and canonicalized on the way in.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CsrParts {
    nrows: usize,
    ncols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
}

impl TryFrom<CsrParts> for CsrMatrix {
    type Error = MatrixError;

    fn try_from(parts: CsrParts) -> Result<Self, Self::Error> {
        Self::new(parts.nrows, parts.ncols, parts.indptr, parts.indices, parts.data)
    }
}

impl From<CsrMatrix> for CsrParts {
    fn from(matrix: CsrMatrix) -> Self {
        Self {
            nrows: matrix.nrows,
            ncols: matrix.ncols,
            indptr: matrix.indptr,
            indices: matrix.indices,
            data: matrix.data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CsrParts", into = "CsrParts")]
pub struct CsrMatrix {
    nrows: usize,
    ncols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
}

impl CsrMatrix {
    /// Build from raw CSR arrays. Structure is validated; unsorted columns,
    /// duplicate entries (summed) and explicit zeros (dropped) are accepted.
    pub fn new(
        nrows: usize,
        ncols: usize,
        indptr: Vec<usize>,
        indices: Vec<usize>,
        data: Vec<f64>,
    ) -> Result<Self, MatrixError> {
        let Some(expected) = nrows.checked_add(1) else {
            return Err(MatrixError::InvalidStructure(format!(
                "row count {nrows} is too large"
            )));
        };
        if indptr.len() != expected {
            return Err(MatrixError::InvalidStructure(format!(
                "indptr has {} entries, expected {expected}",
                indptr.len()
            )));
        }
        if indptr[0] != 0 {
            return Err(MatrixError::InvalidStructure(
                "indptr must start at 0".to_owned(),
            ));
        }
        if indptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(MatrixError::InvalidStructure(
                "indptr must be non-decreasing".to_owned(),
            ));
        }
        let nnz = indptr[nrows];
        if indices.len() != nnz || data.len() != nnz {
            return Err(MatrixError::InvalidStructure(format!(
                "indptr declares {nnz} entries but indices={} data={}",
                indices.len(),
                data.len()
            )));
        }
        for row in 0..nrows {
            for &col in &indices[indptr[row]..indptr[row + 1]] {
                if col >= ncols {
                    return Err(MatrixError::EntryOutOfBounds {
                        row,
                        col,
                        nrows,
                        ncols,
                    });
                }
            }
        }
        Ok(canonicalize(nrows, ncols, &indptr, &indices, &data))
    }

    /// Internal constructor for kernels that already emit canonical rows.
    fn from_canonical(
        nrows: usize,
        ncols: usize,
        indptr: Vec<usize>,
        indices: Vec<usize>,
        data: Vec<f64>,
    ) -> Self {
        debug_assert_eq!(indptr.len(), nrows + 1);
        debug_assert_eq!(indices.len(), data.len());
        Self {
            nrows,
            ncols,
            indptr,
            indices,
            data,
        }
    }

    #[must_use]
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self::from_canonical(nrows, ncols, vec![0; nrows + 1], Vec::new(), Vec::new())
    }

    #[must_use]
    pub fn identity(n: usize) -> Self {
        Self::from_canonical(n, n, (0..=n).collect(), (0..n).collect(), vec![1.0; n])
    }

    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: &[(usize, usize, f64)],
    ) -> Result<Self, MatrixError> {
        let mut counts = vec![0_usize; nrows + 1];
        for &(row, col, _) in triplets {
            if row >= nrows || col >= ncols {
                return Err(MatrixError::EntryOutOfBounds {
                    row,
                    col,
                    nrows,
                    ncols,
                });
            }
            counts[row + 1] += 1;
        }
        for row in 0..nrows {
            counts[row + 1] += counts[row];
        }
        let indptr = counts.clone();
        let mut next = counts;
        let mut indices = vec![0; triplets.len()];
        let mut data = vec![0.0; triplets.len()];
        for &(row, col, value) in triplets {
            let slot = next[row];
            indices[slot] = col;
            data[slot] = value;
            next[row] += 1;
        }
        Ok(canonicalize(nrows, ncols, &indptr, &indices, &data))
    }

    /// Row-major dense buffer of `nrows * ncols` values.
    pub fn from_row_major(nrows: usize, ncols: usize, values: &[f64]) -> Result<Self, MatrixError> {
        let expected = nrows * ncols;
        if values.len() != expected {
            return Err(MatrixError::LengthMismatch {
                what: "dense buffer",
                expected,
                actual: values.len(),
            });
        }
        let mut indptr = Vec::with_capacity(nrows + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        if ncols > 0 {
            for row in values.chunks_exact(ncols) {
                push_dense_row(row, &mut indices, &mut data);
                indptr.push(indices.len());
            }
        } else {
            indptr.resize(nrows + 1, 0);
        }
        Ok(Self::from_canonical(nrows, ncols, indptr, indices, data))
    }

    /// Dense rows, each of length `ncols`.
    pub fn from_rows(ncols: usize, rows: &[Vec<f64>]) -> Result<Self, MatrixError> {
        let mut indptr = Vec::with_capacity(rows.len() + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for row in rows {
            if row.len() != ncols {
                return Err(MatrixError::LengthMismatch {
                    what: "dense row",
                    expected: ncols,
                    actual: row.len(),
                });
            }
            push_dense_row(row, &mut indices, &mut data);
            indptr.push(indices.len());
        }
        Ok(Self::from_canonical(rows.len(), ncols, indptr, indices, data))
    }

    #[must_use]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    #[must_use]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    /// Stored (structurally non-zero) entries.
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    #[must_use]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    #[must_use]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Column indices and values stored in `row`.
    ///
    /// # Panics
    /// Panics if `row >= nrows`.
    #[must_use]
    pub fn row(&self, row: usize) -> (&[usize], &[f64]) {
        let range = self.indptr[row]..self.indptr[row + 1];
        (&self.indices[range.clone()], &self.data[range])
    }

    #[must_use]
    pub fn row_nnz(&self, row: usize) -> usize {
        self.indptr[row + 1] - self.indptr[row]
    }

    /// Value at `(row, col)`; structural zeros read as `0.0`.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        if row >= self.nrows {
            return 0.0;
        }
        let (cols, values) = self.row(row);
        cols.binary_search(&col).map_or(0.0, |pos| values[pos])
    }

    /// Stored entries as `(row, col, value)` in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.nrows).flat_map(move |row| {
            let (cols, values) = self.row(row);
            cols.iter().zip(values).map(move |(&col, &v)| (row, col, v))
        })
    }

    /// Gather rows by position; `None` yields an all-zero row.
    pub fn take_rows(&self, positions: &[Option<usize>]) -> Result<Self, MatrixError> {
        let mut nnz = 0;
        for position in positions.iter().flatten() {
            if *position >= self.nrows {
                return Err(MatrixError::RowOutOfBounds {
                    position: *position,
                    len: self.nrows,
                });
            }
            nnz += self.row_nnz(*position);
        }

        let mut indptr = Vec::with_capacity(positions.len() + 1);
        let mut indices = Vec::with_capacity(nnz);
        let mut data = Vec::with_capacity(nnz);
        indptr.push(0);
        for position in positions {
            if let Some(row) = position {
                let (cols, values) = self.row(*row);
                indices.extend_from_slice(cols);
                data.extend_from_slice(values);
            }
            indptr.push(indices.len());
        }
        Ok(Self::from_canonical(
            positions.len(),
            self.ncols,
            indptr,
            indices,
            data,
        ))
    }

    /// Contiguous row range `[start, end)`, clamped to the matrix.
    #[must_use]
    pub fn slice_rows(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.nrows);
        let start = start.min(end);
        let lo = self.indptr[start];
        let hi = self.indptr[end];
        let indptr = self.indptr[start..=end].iter().map(|p| p - lo).collect();
        Self::from_canonical(
            end - start,
            self.ncols,
            indptr,
            self.indices[lo..hi].to_vec(),
            self.data[lo..hi].to_vec(),
        )
    }

    /// Gather columns by position; `None` yields an all-zero column. A
    /// source column may appear more than once. Runs in O(nnz + ncols)
    /// plus per-row sorting when the selection reorders columns.
    pub fn take_cols(&self, positions: &[Option<usize>]) -> Result<Self, MatrixError> {
        let mut targets: Vec<Vec<usize>> = vec![Vec::new(); self.ncols];
        let mut monotonic = true;
        let mut last_source = None;
        for (new_col, position) in positions.iter().enumerate() {
            if let Some(source) = position {
                if *source >= self.ncols {
                    return Err(MatrixError::ColumnOutOfBounds {
                        position: *source,
                        len: self.ncols,
                    });
                }
                if last_source.is_some_and(|last| last >= *source) {
                    monotonic = false;
                }
                last_source = Some(*source);
                targets[*source].push(new_col);
            }
        }

        let mut indptr = Vec::with_capacity(self.nrows + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        let mut scratch: Vec<(usize, f64)> = Vec::new();
        indptr.push(0);
        for row in 0..self.nrows {
            let (cols, values) = self.row(row);
            if monotonic {
                for (&col, &value) in cols.iter().zip(values) {
                    for &new_col in &targets[col] {
                        indices.push(new_col);
                        data.push(value);
                    }
                }
            } else {
                scratch.clear();
                for (&col, &value) in cols.iter().zip(values) {
                    scratch.extend(targets[col].iter().map(|&new_col| (new_col, value)));
                }
                scratch.sort_unstable_by_key(|&(col, _)| col);
                for &(col, value) in &scratch {
                    indices.push(col);
                    data.push(value);
                }
            }
            indptr.push(indices.len());
        }
        Ok(Self::from_canonical(
            self.nrows,
            positions.len(),
            indptr,
            indices,
            data,
        ))
    }

    /// Stack blocks vertically. All blocks must share a column count.
    pub fn vstack(blocks: &[&Self]) -> Result<Self, MatrixError> {
        let Some(first) = blocks.first() else {
            return Ok(Self::zeros(0, 0));
        };
        let ncols = first.ncols;
        let mut nrows = 0;
        let mut nnz = 0;
        for block in blocks {
            if block.ncols != ncols {
                return Err(MatrixError::ShapeMismatch {
                    op: "vstack",
                    left: first.shape(),
                    right: block.shape(),
                });
            }
            nrows += block.nrows;
            nnz += block.nnz();
        }

        let mut indptr = Vec::with_capacity(nrows + 1);
        let mut indices = Vec::with_capacity(nnz);
        let mut data = Vec::with_capacity(nnz);
        indptr.push(0);
        for block in blocks {
            let offset = indices.len();
            indptr.extend(block.indptr[1..].iter().map(|p| p + offset));
            indices.extend_from_slice(&block.indices);
            data.extend_from_slice(&block.data);
        }
        Ok(Self::from_canonical(nrows, ncols, indptr, indices, data))
    }

    /// Stack blocks horizontally. All blocks must share a row count.
    pub fn hstack(blocks: &[&Self]) -> Result<Self, MatrixError> {
        let Some(first) = blocks.first() else {
            return Ok(Self::zeros(0, 0));
        };
        let nrows = first.nrows;
        for block in blocks {
            if block.nrows != nrows {
                return Err(MatrixError::ShapeMismatch {
                    op: "hstack",
                    left: first.shape(),
                    right: block.shape(),
                });
            }
        }
        let ncols = blocks.iter().map(|b| b.ncols).sum();
        let nnz = blocks.iter().map(|b| b.nnz()).sum();

        let mut indptr = Vec::with_capacity(nrows + 1);
        let mut indices = Vec::with_capacity(nnz);
        let mut data = Vec::with_capacity(nnz);
        indptr.push(0);
        for row in 0..nrows {
            let mut col_offset = 0;
            for block in blocks {
                let (cols, values) = block.row(row);
                indices.extend(cols.iter().map(|c| c + col_offset));
                data.extend_from_slice(values);
                col_offset += block.ncols;
            }
            indptr.push(indices.len());
        }
        Ok(Self::from_canonical(nrows, ncols, indptr, indices, data))
    }

    /// Elementwise operation between equally shaped matrices, by sorted
    /// row merge. Results that cancel to zero are not stored.
    pub fn binary_op(&self, other: &Self, op: ArithmeticOp) -> Result<Self, MatrixError> {
        if self.shape() != other.shape() {
            return Err(MatrixError::ShapeMismatch {
                op: "elementwise",
                left: self.shape(),
                right: other.shape(),
            });
        }
        let capacity = if op.is_intersection() {
            self.nnz().min(other.nnz())
        } else {
            self.nnz() + other.nnz()
        };
        let mut indptr = Vec::with_capacity(self.nrows + 1);
        let mut indices = Vec::with_capacity(capacity);
        let mut data = Vec::with_capacity(capacity);
        indptr.push(0);

        for row in 0..self.nrows {
            let (lc, lv) = self.row(row);
            let (rc, rv) = other.row(row);
            let (mut i, mut j) = (0, 0);
            while i < lc.len() && j < rc.len() {
                match lc[i].cmp(&rc[j]) {
                    std::cmp::Ordering::Less => {
                        if !op.is_intersection() {
                            push_nonzero(&mut indices, &mut data, lc[i], op.apply(lv[i], 0.0));
                        }
                        i += 1;
                    }
                    std::cmp::Ordering::Greater => {
                        if !op.is_intersection() {
                            push_nonzero(&mut indices, &mut data, rc[j], op.apply(0.0, rv[j]));
                        }
                        j += 1;
                    }
                    std::cmp::Ordering::Equal => {
                        push_nonzero(&mut indices, &mut data, lc[i], op.apply(lv[i], rv[j]));
                        i += 1;
                        j += 1;
                    }
                }
            }
            if !op.is_intersection() {
                for (&col, &value) in lc[i..].iter().zip(&lv[i..]) {
                    push_nonzero(&mut indices, &mut data, col, op.apply(value, 0.0));
                }
                for (&col, &value) in rc[j..].iter().zip(&rv[j..]) {
                    push_nonzero(&mut indices, &mut data, col, op.apply(0.0, value));
                }
            }
            indptr.push(indices.len());
        }
        Ok(Self::from_canonical(
            self.nrows, self.ncols, indptr, indices, data,
        ))
    }

    /// Multiply row `i` by `factors[i]`.
    pub fn scale_rows(&self, factors: &[f64]) -> Result<Self, MatrixError> {
        if factors.len() != self.nrows {
            return Err(MatrixError::LengthMismatch {
                what: "row factors",
                expected: self.nrows,
                actual: factors.len(),
            });
        }
        Ok(self.map_entries(|row, _, value| value * factors[row]))
    }

    /// Multiply column `j` by `factors[j]`.
    pub fn scale_cols(&self, factors: &[f64]) -> Result<Self, MatrixError> {
        if factors.len() != self.ncols {
            return Err(MatrixError::LengthMismatch {
                what: "column factors",
                expected: self.ncols,
                actual: factors.len(),
            });
        }
        Ok(self.map_entries(|_, col, value| value * factors[col]))
    }

    #[must_use]
    pub fn scale(&self, factor: f64) -> Self {
        self.map_entries(|_, _, value| value * factor)
    }

    fn map_entries(&self, f: impl Fn(usize, usize, f64) -> f64) -> Self {
        let mut indptr = Vec::with_capacity(self.nrows + 1);
        let mut indices = Vec::with_capacity(self.nnz());
        let mut data = Vec::with_capacity(self.nnz());
        indptr.push(0);
        for row in 0..self.nrows {
            let (cols, values) = self.row(row);
            for (&col, &value) in cols.iter().zip(values) {
                let mapped = f(row, col, value);
                if mapped != 0.0 {
                    indices.push(col);
                    data.push(mapped);
                }
            }
            indptr.push(indices.len());
        }
        Self::from_canonical(self.nrows, self.ncols, indptr, indices, data)
    }

    /// Same sparsity pattern with every stored value replaced by `1.0`.
    #[must_use]
    pub fn pattern(&self) -> Self {
        Self::from_canonical(
            self.nrows,
            self.ncols,
            self.indptr.clone(),
            self.indices.clone(),
            vec![1.0; self.nnz()],
        )
    }

    /// Set every cell of the flagged rows and columns to `value`, keeping
    /// stored entries elsewhere. Used to materialize an explicit fill for
    /// rows or columns introduced by alignment.
    pub fn fill_lines(
        &self,
        rows: &[bool],
        cols: &[bool],
        value: f64,
    ) -> Result<Self, MatrixError> {
        if rows.len() != self.nrows {
            return Err(MatrixError::LengthMismatch {
                what: "row fill mask",
                expected: self.nrows,
                actual: rows.len(),
            });
        }
        if cols.len() != self.ncols {
            return Err(MatrixError::LengthMismatch {
                what: "column fill mask",
                expected: self.ncols,
                actual: cols.len(),
            });
        }
        if value == 0.0 {
            return Ok(self.clone());
        }
        let mut indptr = Vec::with_capacity(self.nrows + 1);
        let mut indices = Vec::with_capacity(self.nnz());
        let mut data = Vec::with_capacity(self.nnz());
        indptr.push(0);
        for row in 0..self.nrows {
            let (stored_cols, stored_values) = self.row(row);
            let mut stored = stored_cols.iter().zip(stored_values).peekable();
            for col in 0..self.ncols {
                let here = stored.next_if(|(c, _)| **c == col).map(|(_, v)| *v);
                if rows[row] || cols[col] {
                    indices.push(col);
                    data.push(value);
                } else if let Some(v) = here {
                    indices.push(col);
                    data.push(v);
                }
            }
            indptr.push(indices.len());
        }
        Ok(Self::from_canonical(
            self.nrows, self.ncols, indptr, indices, data,
        ))
    }

    #[must_use]
    pub fn transpose(&self) -> Self {
        let mut counts = vec![0_usize; self.ncols + 1];
        for &col in &self.indices {
            counts[col + 1] += 1;
        }
        for col in 0..self.ncols {
            counts[col + 1] += counts[col];
        }
        let indptr = counts.clone();
        let mut next = counts;
        let mut indices = vec![0; self.nnz()];
        let mut data = vec![0.0; self.nnz()];
        // Rows are visited in order, so each output row comes out sorted.
        for (row, col, value) in self.iter() {
            let slot = next[col];
            indices[slot] = row;
            data[slot] = value;
            next[col] += 1;
        }
        Self::from_canonical(self.ncols, self.nrows, indptr, indices, data)
    }

    /// Sparse product `self * other` (Gustavson row-by-row accumulation).
    pub fn matmul(&self, other: &Self) -> Result<Self, MatrixError> {
        if self.ncols != other.nrows {
            return Err(MatrixError::ShapeMismatch {
                op: "matmul",
                left: self.shape(),
                right: other.shape(),
            });
        }
        let width = other.ncols;
        let mut accumulator = vec![0.0_f64; width];
        let mut marker = vec![usize::MAX; width];
        let mut touched: Vec<usize> = Vec::new();

        let mut indptr = Vec::with_capacity(self.nrows + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for row in 0..self.nrows {
            touched.clear();
            let (inner_cols, inner_values) = self.row(row);
            for (&k, &a) in inner_cols.iter().zip(inner_values) {
                let (out_cols, out_values) = other.row(k);
                for (&j, &b) in out_cols.iter().zip(out_values) {
                    if marker[j] != row {
                        marker[j] = row;
                        accumulator[j] = 0.0;
                        touched.push(j);
                    }
                    accumulator[j] += a * b;
                }
            }
            touched.sort_unstable();
            for &j in &touched {
                if accumulator[j] != 0.0 {
                    indices.push(j);
                    data.push(accumulator[j]);
                }
            }
            indptr.push(indices.len());
        }
        Ok(Self::from_canonical(
            self.nrows, width, indptr, indices, data,
        ))
    }

    #[must_use]
    pub fn row_sums(&self) -> Vec<f64> {
        (0..self.nrows).map(|row| self.row(row).1.iter().sum()).collect()
    }

    #[must_use]
    pub fn col_sums(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.ncols];
        for (&col, &value) in self.indices.iter().zip(&self.data) {
            sums[col] += value;
        }
        sums
    }

    /// Dense row-major copy. Only for display and export.
    #[must_use]
    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        (0..self.nrows)
            .map(|row| {
                let mut dense = vec![0.0; self.ncols];
                let (cols, values) = self.row(row);
                for (&col, &value) in cols.iter().zip(values) {
                    dense[col] = value;
                }
                dense
            })
            .collect()
    }
}

fn push_nonzero(indices: &mut Vec<usize>, data: &mut Vec<f64>, col: usize, value: f64) {
    if value != 0.0 {
        indices.push(col);
        data.push(value);
    }
}

fn push_dense_row(row: &[f64], indices: &mut Vec<usize>, data: &mut Vec<f64>) {
    for (col, &value) in row.iter().enumerate() {
        if value != 0.0 {
            indices.push(col);
            data.push(value);
        }
    }
}

fn canonicalize(
    nrows: usize,
    ncols: usize,
    indptr: &[usize],
    indices: &[usize],
    data: &[f64],
) -> CsrMatrix {
    let mut out_indptr = Vec::with_capacity(nrows + 1);
    let mut out_indices = Vec::with_capacity(indices.len());
    let mut out_data = Vec::with_capacity(data.len());
    let mut scratch: Vec<(usize, f64)> = Vec::new();
    out_indptr.push(0);
    for row in 0..nrows {
        let range = indptr[row]..indptr[row + 1];
        scratch.clear();
        scratch.extend(
            indices[range.clone()]
                .iter()
                .copied()
                .zip(data[range].iter().copied()),
        );
        scratch.sort_by_key(|&(col, _)| col);

        let mut entries = scratch.iter().peekable();
        while let Some(&(col, mut value)) = entries.next() {
            while let Some(&&(next_col, next_value)) = entries.peek() {
                if next_col != col {
                    break;
                }
                value += next_value;
                entries.next();
            }
            if value != 0.0 {
                out_indices.push(col);
                out_data.push(value);
            }
        }
        out_indptr.push(out_indices.len());
    }
    CsrMatrix::from_canonical(nrows, ncols, out_indptr, out_indices, out_data)
}
