#![forbid(unsafe_code)]

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::trace;
use serde::{Deserialize, Serialize};
use sp_groupby::GroupByError;
use sp_index::{AlignMode, Index, IndexError, IndexLabel, align, align_columns};
use sp_matrix::{ArithmeticOp, CsrMatrix, MatrixError};
use thiserror::Error;

pub mod display;
pub mod one_hot;
pub mod sample;

pub use display::DisplayOptions;
pub use one_hot::{CategoricalTable, CategorySpec, OneHotOptions, TableColumn, one_hot_encode};
pub use sample::{SampleOptions, SampleSize};
pub use sp_groupby::AggFunc;

/// Caller-facing classification of every failure this workspace reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Length, shape or broadcast mismatch.
    Shape,
    /// Unknown row or column label.
    Key,
    /// Partitions disagree on column labels.
    Schema,
    /// Invalid argument that is not a shape, key or schema problem.
    Value,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Shape => "ShapeError",
            Self::Key => "KeyError",
            Self::Schema => "SchemaError",
            Self::Value => "ValueError",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Index,
    Columns,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index => f.write_str("index"),
            Self::Columns => f.write_str("columns"),
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("index length ({index_len}) does not match matrix rows ({rows})")]
    IndexLengthMismatch { index_len: usize, rows: usize },
    #[error("column label count ({labels}) does not match matrix columns ({cols})")]
    ColumnLengthMismatch { labels: usize, cols: usize },
    #[error("broadcast vector of length {actual} along {axis} does not match axis length {expected}")]
    BroadcastLength {
        axis: Axis,
        expected: usize,
        actual: usize,
    },
    #[error("boolean mask of length {actual} does not match axis length {expected}")]
    MaskLength { expected: usize, actual: usize },
    #[error("concatenation requires identical column labels")]
    ColumnsDiffer,
    #[error("column label {0} not found")]
    ColumnNotFound(IndexLabel),
    #[error("row label {0} not found")]
    RowLabelNotFound(IndexLabel),
    #[error("row position {position} out of bounds for {len} rows")]
    PositionOutOfBounds { position: usize, len: usize },
    #[error("duplicate column label {0}")]
    DuplicateColumn(IndexLabel),
    #[error("cannot reindex on an axis with duplicate labels")]
    DuplicateIndex,
    #[error("column {0} already exists")]
    ColumnExists(IndexLabel),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Matrix(#[from] MatrixError),
    #[error(transparent)]
    GroupBy(#[from] GroupByError),
}

impl FrameError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IndexLengthMismatch { .. }
            | Self::ColumnLengthMismatch { .. }
            | Self::BroadcastLength { .. }
            | Self::MaskLength { .. }
            | Self::ColumnsDiffer
            | Self::Matrix(_)
            | Self::GroupBy(_) => ErrorKind::Shape,
            Self::ColumnNotFound(_) | Self::RowLabelNotFound(_) | Self::PositionOutOfBounds { .. } => {
                ErrorKind::Key
            }
            Self::DuplicateColumn(_)
            | Self::DuplicateIndex
            | Self::ColumnExists(_)
            | Self::InvalidArgument(_) => ErrorKind::Value,
            Self::Index(err) => match err {
                IndexError::InvalidAlignmentVectors | IndexError::StrictColumnMismatch { .. } => {
                    ErrorKind::Shape
                }
                IndexError::LabelNotFound(_) => ErrorKind::Key,
                IndexError::NonMonotonicSlice(_) => ErrorKind::Value,
            },
        }
    }
}

/// Value substituted for cells an operand lacks after alignment.
///
/// Each operand is filled on its own, so a cell whose row exists only on
/// one side and whose column exists only on the other reads `v op v`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fill {
    /// Absent cells stay structural zeros.
    #[default]
    Zero,
    /// Absent cells are materialized with this value.
    Value(f64),
}

impl Fill {
    #[must_use]
    pub fn value(self) -> f64 {
        match self {
            Self::Zero => 0.0,
            Self::Value(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignOptions {
    pub how: AlignMode,
    pub fill: Fill,
    /// Require identical column label sets instead of aligning columns.
    pub strict_columns: bool,
    /// Sort the aligned row labels.
    pub sort: bool,
}

impl Default for AlignOptions {
    fn default() -> Self {
        Self {
            how: AlignMode::Outer,
            fill: Fill::Zero,
            strict_columns: false,
            sort: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConcatOptions {
    pub require_identical_columns: bool,
}

/// Grouping key source for [`SparseFrame::groupby_agg`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy<'a> {
    /// Group by the row index labels.
    Index,
    /// Group by an external key per row.
    Keys(&'a [IndexLabel]),
}

/// Dense labeled table. Used as a construction input and as the explicit
/// densified form for display and export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseFrame {
    index: Index,
    columns: Index,
    values: Vec<Vec<f64>>,
}

impl DenseFrame {
    pub fn new(index: Index, columns: Index, values: Vec<Vec<f64>>) -> Result<Self, FrameError> {
        if values.len() != index.len() {
            return Err(FrameError::IndexLengthMismatch {
                index_len: index.len(),
                rows: values.len(),
            });
        }
        if let Some(row) = values.iter().find(|row| row.len() != columns.len()) {
            return Err(FrameError::ColumnLengthMismatch {
                labels: columns.len(),
                cols: row.len(),
            });
        }
        check_unique_columns(&columns)?;
        Ok(Self {
            index,
            columns,
            values,
        })
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn columns(&self) -> &Index {
        &self.columns
    }

    #[must_use]
    pub fn values(&self) -> &[Vec<f64>] {
        &self.values
    }

    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.index.len(), self.columns.len())
    }

    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.values.get(row).and_then(|r| r.get(col)).copied()
    }
}

fn check_unique_columns(columns: &Index) -> Result<(), FrameError> {
    if !columns.has_duplicates() {
        return Ok(());
    }
    match columns
        .duplicated_keep_first()
        .into_iter()
        .zip(columns.labels())
        .find(|(dup, _)| *dup)
    {
        Some((_, label)) => Err(FrameError::DuplicateColumn(label.clone())),
        None => Ok(()),
    }
}

fn is_identity(positions: &[Option<usize>], len: usize) -> bool {
    positions.len() == len
        && positions
            .iter()
            .enumerate()
            .all(|(i, pos)| *pos == Some(i))
}

/// Move a matrix onto aligned axes. Absent rows and columns become
/// structural zeros unless `fill` asks for a materialized value.
fn realign<'a>(
    matrix: &'a CsrMatrix,
    rows: &[Option<usize>],
    cols: &[Option<usize>],
    fill: Fill,
) -> Result<Cow<'a, CsrMatrix>, FrameError> {
    let mut out = Cow::Borrowed(matrix);
    if !is_identity(rows, matrix.nrows()) {
        out = Cow::Owned(out.take_rows(rows)?);
    }
    if !is_identity(cols, matrix.ncols()) {
        out = Cow::Owned(out.take_cols(cols)?);
    }
    if let Fill::Value(value) = fill
        && value != 0.0
    {
        let row_mask: Vec<bool> = rows.iter().map(Option::is_none).collect();
        let col_mask: Vec<bool> = cols.iter().map(Option::is_none).collect();
        if row_mask.iter().chain(&col_mask).any(|absent| *absent) {
            out = Cow::Owned(out.fill_lines(&row_mask, &col_mask, value)?);
        }
    }
    if matches!(out, Cow::Borrowed(_)) {
        trace!("realign fast path: operand already on target axes");
    }
    Ok(out)
}

/// Serialized form: labels plus the raw CSR arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FramePayload {
    index: Index,
    columns: Index,
    matrix: CsrMatrix,
}

impl TryFrom<FramePayload> for SparseFrame {
    type Error = FrameError;

    fn try_from(payload: FramePayload) -> Result<Self, Self::Error> {
        Self::new(payload.index, payload.columns, payload.matrix)
    }
}

impl From<SparseFrame> for FramePayload {
    fn from(frame: SparseFrame) -> Self {
        Self {
            index: frame.index,
            columns: frame.columns,
            matrix: Arc::unwrap_or_clone(frame.data),
        }
    }
}

/// Labeled sparse table: row index, unique column labels and a CSR value
/// matrix of matching shape. Immutable; every operation returns a new
/// frame and the matrix is shared by reference where it is unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FramePayload", into = "FramePayload")]
pub struct SparseFrame {
    index: Index,
    columns: Index,
    data: Arc<CsrMatrix>,
}

impl SparseFrame {
    pub fn new(index: Index, columns: Index, matrix: CsrMatrix) -> Result<Self, FrameError> {
        Self::from_shared(index, columns, Arc::new(matrix))
    }

    pub fn from_shared(
        index: Index,
        columns: Index,
        matrix: Arc<CsrMatrix>,
    ) -> Result<Self, FrameError> {
        if index.len() != matrix.nrows() {
            return Err(FrameError::IndexLengthMismatch {
                index_len: index.len(),
                rows: matrix.nrows(),
            });
        }
        if columns.len() != matrix.ncols() {
            return Err(FrameError::ColumnLengthMismatch {
                labels: columns.len(),
                cols: matrix.ncols(),
            });
        }
        check_unique_columns(&columns)?;
        Ok(Self {
            index,
            columns,
            data: matrix,
        })
    }

    /// Internal constructor for results whose shape is correct by construction.
    fn from_parts(index: Index, columns: Index, matrix: CsrMatrix) -> Self {
        debug_assert_eq!(index.len(), matrix.nrows());
        debug_assert_eq!(columns.len(), matrix.ncols());
        Self {
            index,
            columns,
            data: Arc::new(matrix),
        }
    }

    /// Matrix with positional labels `0..nrows` and `0..ncols`.
    #[must_use]
    pub fn from_matrix(matrix: CsrMatrix) -> Self {
        let index = Index::range(matrix.nrows());
        let columns = Index::range(matrix.ncols());
        Self::from_parts(index, columns, matrix)
    }

    /// All-zero frame with the given labels.
    pub fn zeros(index: Index, columns: Index) -> Result<Self, FrameError> {
        let matrix = CsrMatrix::zeros(index.len(), columns.len());
        Self::new(index, columns, matrix)
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::from_parts(Index::empty(), Index::empty(), CsrMatrix::zeros(0, 0))
    }

    pub fn from_dense(
        index: Index,
        columns: Index,
        rows: &[Vec<f64>],
    ) -> Result<Self, FrameError> {
        if rows.len() != index.len() {
            return Err(FrameError::IndexLengthMismatch {
                index_len: index.len(),
                rows: rows.len(),
            });
        }
        if let Some(row) = rows.iter().find(|row| row.len() != columns.len()) {
            return Err(FrameError::ColumnLengthMismatch {
                labels: columns.len(),
                cols: row.len(),
            });
        }
        let matrix = CsrMatrix::from_rows(columns.len(), rows)?;
        Self::new(index, columns, matrix)
    }

    pub fn from_row_major(
        index: Index,
        columns: Index,
        values: &[f64],
    ) -> Result<Self, FrameError> {
        let matrix = CsrMatrix::from_row_major(index.len(), columns.len(), values)?;
        Self::new(index, columns, matrix)
    }

    pub fn from_dense_frame(frame: &DenseFrame) -> Result<Self, FrameError> {
        Self::from_dense(frame.index.clone(), frame.columns.clone(), &frame.values)
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn columns(&self) -> &Index {
        &self.columns
    }

    #[must_use]
    pub fn matrix(&self) -> &CsrMatrix {
        &self.data
    }

    #[must_use]
    pub fn shared_matrix(&self) -> &Arc<CsrMatrix> {
        &self.data
    }

    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        self.data.shape()
    }

    #[must_use]
    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    #[must_use]
    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nrows() == 0
    }

    /// Stored element count.
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.data.nnz()
    }

    /// Fraction of cells that are stored. Zero for an empty frame.
    #[must_use]
    pub fn density(&self) -> f64 {
        let cells = self.nrows() * self.ncols();
        if cells == 0 {
            0.0
        } else {
            self.nnz() as f64 / cells as f64
        }
    }

    /// Same labels and values.
    #[must_use]
    pub fn equals(&self, other: &Self) -> bool {
        self == other
    }

    fn with_matrix(&self, matrix: CsrMatrix) -> Self {
        Self::from_parts(self.index.clone(), self.columns.clone(), matrix)
    }

    fn column_positions(&self, labels: &[IndexLabel]) -> Result<Vec<Option<usize>>, FrameError> {
        let positions = self.columns.get_indexer(labels);
        if let Some(missing) = positions.iter().position(Option::is_none) {
            return Err(FrameError::ColumnNotFound(labels[missing].clone()));
        }
        Ok(positions)
    }

    // === Column selection ===

    /// Columns in request order. Unknown labels fail with a key error.
    pub fn select_columns(&self, labels: &[IndexLabel]) -> Result<Self, FrameError> {
        let positions = self.column_positions(labels)?;
        let columns = Index::new(labels.to_vec());
        check_unique_columns(&columns)?;
        if is_identity(&positions, self.ncols()) {
            return Ok(self.clone());
        }
        let matrix = self.data.take_cols(&positions)?;
        Ok(Self::from_parts(self.index.clone(), columns, matrix))
    }

    pub fn column(&self, label: &IndexLabel) -> Result<Self, FrameError> {
        self.select_columns(std::slice::from_ref(label))
    }

    /// Dense values of one column, in row order.
    pub fn column_values(&self, label: &IndexLabel) -> Result<Vec<f64>, FrameError> {
        let col = self
            .columns
            .position(label)
            .ok_or_else(|| FrameError::ColumnNotFound(label.clone()))?;
        Ok((0..self.nrows()).map(|row| self.data.get(row, col)).collect())
    }

    pub fn select_column_mask(&self, mask: &[bool]) -> Result<Self, FrameError> {
        if mask.len() != self.ncols() {
            return Err(FrameError::MaskLength {
                expected: self.ncols(),
                actual: mask.len(),
            });
        }
        let keep: Vec<usize> = (0..mask.len()).filter(|&i| mask[i]).collect();
        let positions: Vec<Option<usize>> = keep.iter().copied().map(Some).collect();
        let matrix = self.data.take_cols(&positions)?;
        Ok(Self::from_parts(
            self.index.clone(),
            self.columns.take(&keep),
            matrix,
        ))
    }

    /// Drop columns; labels that are not present are ignored.
    pub fn drop_columns(&self, labels: &[IndexLabel]) -> Result<Self, FrameError> {
        let mask: Vec<bool> = self.columns.isin(labels).into_iter().map(|hit| !hit).collect();
        self.select_column_mask(&mask)
    }

    /// Relabel columns through `mapping`; unmapped labels are kept.
    pub fn rename_columns(
        &self,
        mapping: &HashMap<IndexLabel, IndexLabel>,
    ) -> Result<Self, FrameError> {
        let columns: Index = self
            .columns
            .labels()
            .iter()
            .map(|label| mapping.get(label).unwrap_or(label).clone())
            .collect();
        check_unique_columns(&columns)?;
        Ok(Self {
            index: self.index.clone(),
            columns,
            data: Arc::clone(&self.data),
        })
    }

    /// Conform columns to `labels`; new labels become all-zero columns.
    pub fn reindex_columns(&self, labels: &Index) -> Result<Self, FrameError> {
        check_unique_columns(labels)?;
        let positions = self.columns.get_indexer(labels.labels());
        let matrix = self.data.take_cols(&positions)?;
        Ok(Self::from_parts(self.index.clone(), labels.clone(), matrix))
    }

    /// Add a column from per-row values.
    pub fn assign_column(&self, label: IndexLabel, values: &[f64]) -> Result<Self, FrameError> {
        if self.columns.contains(&label) {
            return Err(FrameError::ColumnExists(label));
        }
        if values.len() != self.nrows() {
            return Err(FrameError::BroadcastLength {
                axis: Axis::Index,
                expected: self.nrows(),
                actual: values.len(),
            });
        }
        let column = CsrMatrix::from_row_major(self.nrows(), 1, values)?;
        let matrix = CsrMatrix::hstack(&[&self.data, &column])?;
        let mut labels = self.columns.labels().to_vec();
        labels.push(label);
        Ok(Self::from_parts(self.index.clone(), Index::new(labels), matrix))
    }

    /// Add a column holding `value` in every row.
    pub fn assign_scalar(&self, label: IndexLabel, value: f64) -> Result<Self, FrameError> {
        self.assign_column(label, &vec![value; self.nrows()])
    }

    // === Row selection ===

    /// Rows by position, in the given order.
    pub fn iloc(&self, positions: &[usize]) -> Result<Self, FrameError> {
        if let Some(&position) = positions.iter().find(|&&p| p >= self.nrows()) {
            return Err(FrameError::PositionOutOfBounds {
                position,
                len: self.nrows(),
            });
        }
        let rows: Vec<Option<usize>> = positions.iter().copied().map(Some).collect();
        let matrix = self.data.take_rows(&rows)?;
        Ok(Self::from_parts(
            self.index.take(positions),
            self.columns.clone(),
            matrix,
        ))
    }

    /// Rows `[start, end)`, clamped to the frame.
    #[must_use]
    pub fn iloc_range(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.nrows());
        let start = start.min(end);
        if start == 0 && end == self.nrows() {
            return self.clone();
        }
        Self::from_parts(
            self.index.slice(start, end - start),
            self.columns.clone(),
            self.data.slice_rows(start, end),
        )
    }

    #[must_use]
    pub fn head(&self, n: usize) -> Self {
        self.iloc_range(0, n)
    }

    /// Every row whose label is in `labels`, in query order; a duplicated
    /// label contributes all of its rows.
    pub fn loc(&self, labels: &[IndexLabel]) -> Result<Self, FrameError> {
        let (positions, missing) = self.index.get_indexer_non_unique(labels);
        if let Some(&first_missing) = missing.first() {
            return Err(FrameError::RowLabelNotFound(labels[first_missing].clone()));
        }
        self.iloc(&positions)
    }

    pub fn loc_label(&self, label: &IndexLabel) -> Result<Self, FrameError> {
        self.loc(std::slice::from_ref(label))
    }

    /// Inclusive label range. Open bounds extend to the frame edges.
    pub fn loc_slice(
        &self,
        start: Option<&IndexLabel>,
        end: Option<&IndexLabel>,
    ) -> Result<Self, FrameError> {
        let (lo, hi) = self.index.slice_locs(start, end)?;
        Ok(self.iloc_range(lo, hi))
    }

    pub fn mask(&self, mask: &[bool]) -> Result<Self, FrameError> {
        if mask.len() != self.nrows() {
            return Err(FrameError::MaskLength {
                expected: self.nrows(),
                actual: mask.len(),
            });
        }
        let keep: Vec<usize> = (0..mask.len()).filter(|&i| mask[i]).collect();
        self.iloc(&keep)
    }

    /// Drop rows by label; labels that are not present are ignored.
    pub fn drop_rows(&self, labels: &[IndexLabel]) -> Result<Self, FrameError> {
        let keep: Vec<bool> = self.index.isin(labels).into_iter().map(|hit| !hit).collect();
        self.mask(&keep)
    }

    /// Keep the first row of each duplicated label.
    pub fn drop_duplicate_index(&self) -> Result<Self, FrameError> {
        if !self.index.has_duplicates() {
            return Ok(self.clone());
        }
        let keep: Vec<bool> = self
            .index
            .duplicated_keep_first()
            .into_iter()
            .map(|dup| !dup)
            .collect();
        self.mask(&keep)
    }

    /// Conform rows to `labels`. Requires a duplicate-free index; new
    /// labels become all-zero rows.
    pub fn reindex(&self, labels: &Index) -> Result<Self, FrameError> {
        if self.index.has_duplicates() {
            return Err(FrameError::DuplicateIndex);
        }
        let positions = self.index.get_indexer(labels.labels());
        let matrix = self.data.take_rows(&positions)?;
        Ok(Self::from_parts(labels.clone(), self.columns.clone(), matrix))
    }

    pub fn set_index(&self, index: Index) -> Result<Self, FrameError> {
        if index.len() != self.nrows() {
            return Err(FrameError::IndexLengthMismatch {
                index_len: index.len(),
                rows: self.nrows(),
            });
        }
        Ok(Self {
            index,
            columns: self.columns.clone(),
            data: Arc::clone(&self.data),
        })
    }

    /// Replace the index with positional labels `0..nrows`.
    #[must_use]
    pub fn reset_index(&self) -> Self {
        Self {
            index: Index::range(self.nrows()),
            columns: self.columns.clone(),
            data: Arc::clone(&self.data),
        }
    }

    /// Stable sort by row label.
    pub fn sort_index(&self) -> Result<Self, FrameError> {
        if self.index.is_monotonic_increasing() {
            return Ok(self.clone());
        }
        self.iloc(&self.index.argsort())
    }

    // === Arithmetic ===

    pub fn add(&self, other: &Self) -> Result<Self, FrameError> {
        self.binary_with(other, ArithmeticOp::Add, &AlignOptions::default())
    }

    pub fn sub(&self, other: &Self) -> Result<Self, FrameError> {
        self.binary_with(other, ArithmeticOp::Sub, &AlignOptions::default())
    }

    pub fn mul(&self, other: &Self) -> Result<Self, FrameError> {
        self.binary_with(other, ArithmeticOp::Mul, &AlignOptions::default())
    }

    pub fn add_with(&self, other: &Self, options: &AlignOptions) -> Result<Self, FrameError> {
        self.binary_with(other, ArithmeticOp::Add, options)
    }

    pub fn sub_with(&self, other: &Self, options: &AlignOptions) -> Result<Self, FrameError> {
        self.binary_with(other, ArithmeticOp::Sub, options)
    }

    pub fn mul_with(&self, other: &Self, options: &AlignOptions) -> Result<Self, FrameError> {
        self.binary_with(other, ArithmeticOp::Mul, options)
    }

    /// Align both operands on rows and columns, then combine elementwise.
    pub fn binary_with(
        &self,
        other: &Self,
        op: ArithmeticOp,
        options: &AlignOptions,
    ) -> Result<Self, FrameError> {
        let col_plan = align_columns(
            &self.columns,
            &other.columns,
            options.how,
            options.strict_columns,
        )?;
        let mut row_plan = align(&self.index, &other.index, options.how);
        if options.sort {
            row_plan = row_plan.sorted();
        }

        let left = realign(
            &self.data,
            &row_plan.left_positions,
            &col_plan.left_positions,
            options.fill,
        )?;
        let right = realign(
            &other.data,
            &row_plan.right_positions,
            &col_plan.right_positions,
            options.fill,
        )?;
        let matrix = left.binary_op(&right, op)?;
        Ok(Self::from_parts(
            row_plan.union_index,
            col_plan.union_index,
            matrix,
        ))
    }

    /// Broadcast a vector along an axis: `Axis::Index` scales row `i` by
    /// `factors[i]`, `Axis::Columns` scales column `j` by `factors[j]`.
    pub fn multiply_vector(&self, factors: &[f64], axis: Axis) -> Result<Self, FrameError> {
        let expected = match axis {
            Axis::Index => self.nrows(),
            Axis::Columns => self.ncols(),
        };
        if factors.len() != expected {
            return Err(FrameError::BroadcastLength {
                axis,
                expected,
                actual: factors.len(),
            });
        }
        let matrix = match axis {
            Axis::Index => self.data.scale_rows(factors)?,
            Axis::Columns => self.data.scale_cols(factors)?,
        };
        Ok(self.with_matrix(matrix))
    }

    #[must_use]
    pub fn scale(&self, factor: f64) -> Self {
        self.with_matrix(self.data.scale(factor))
    }

    // === Concatenation ===

    /// Row-wise concatenation. Differing column sets are unioned in
    /// first-seen order with missing columns as structural zeros, unless
    /// `require_identical_columns` is set.
    pub fn concat(frames: &[&Self], options: &ConcatOptions) -> Result<Self, FrameError> {
        let Some(first) = frames.first() else {
            return Ok(Self::empty());
        };
        let identical = frames.iter().all(|f| f.columns == first.columns);
        if frames.len() == 1 {
            return Ok((*first).clone());
        }
        if !identical && options.require_identical_columns {
            return Err(FrameError::ColumnsDiffer);
        }

        let columns = if identical {
            first.columns.clone()
        } else {
            frames
                .iter()
                .skip(1)
                .fold(first.columns.clone(), |acc, f| acc.union_with(&f.columns))
        };

        let blocks: Vec<Cow<'_, CsrMatrix>> = frames
            .iter()
            .map(|frame| {
                if identical {
                    Ok(Cow::Borrowed(&*frame.data))
                } else {
                    let positions = frame.columns.get_indexer(columns.labels());
                    frame.data.take_cols(&positions).map(Cow::Owned)
                }
            })
            .collect::<Result<_, MatrixError>>()?;
        let refs: Vec<&CsrMatrix> = blocks.iter().map(|block| &**block).collect();
        let matrix = CsrMatrix::vstack(&refs)?;
        let indexes: Vec<&Index> = frames.iter().map(|f| &f.index).collect();
        Ok(Self::from_parts(Index::concat(&indexes), columns, matrix))
    }

    // === Grouping and reductions ===

    pub fn groupby_sum(&self, by: GroupBy<'_>) -> Result<Self, FrameError> {
        self.groupby_agg(by, AggFunc::Sum)
    }

    /// One output row per distinct key, keys in first-seen order.
    pub fn groupby_agg(&self, by: GroupBy<'_>, func: AggFunc) -> Result<Self, FrameError> {
        let keys = match by {
            GroupBy::Index => self.index.labels(),
            GroupBy::Keys(keys) => keys,
        };
        let grouped = sp_groupby::groupby_agg(keys, &self.data, func)?;
        Ok(Self::from_parts(
            Index::new(grouped.keys),
            self.columns.clone(),
            grouped.values,
        ))
    }

    /// `Axis::Index` reduces over rows (one value per column);
    /// `Axis::Columns` reduces over columns (one value per row).
    #[must_use]
    pub fn sum(&self, axis: Axis) -> Vec<f64> {
        match axis {
            Axis::Index => self.data.col_sums(),
            Axis::Columns => self.data.row_sums(),
        }
    }

    // === Export ===

    /// Explicit densification for display and export.
    #[must_use]
    pub fn to_dense(&self) -> DenseFrame {
        DenseFrame {
            index: self.index.clone(),
            columns: self.columns.clone(),
            values: self.data.to_dense(),
        }
    }
}
