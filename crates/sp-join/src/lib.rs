#![forbid(unsafe_code)]

use std::mem::size_of;

use bumpalo::{Bump, collections::Vec as BumpVec};
use log::debug;
use serde::{Deserialize, Serialize};
use sp_frame::{ErrorKind, Fill, FrameError, SparseFrame};
use sp_index::{AlignMode, AlignmentPlan, Index, IndexLabel, align};
use sp_matrix::{CsrMatrix, MatrixError};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    #[default]
    Outer,
}

impl From<JoinType> for AlignMode {
    fn from(how: JoinType) -> Self {
        match how {
            JoinType::Inner => Self::Inner,
            JoinType::Left => Self::Left,
            JoinType::Right => Self::Right,
            JoinType::Outer => Self::Outer,
        }
    }
}

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("column label {0} is present on both sides; suffixes do not disambiguate it")]
    SuffixCollision(IndexLabel),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Matrix(#[from] MatrixError),
}

impl JoinError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SuffixCollision(_) => ErrorKind::Value,
            Self::Frame(err) => err.kind(),
            Self::Matrix(_) => ErrorKind::Shape,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinOptions {
    pub how: JoinType,
    /// Appended to colliding column labels from the left and right side.
    /// An empty suffix keeps the label unchanged.
    pub suffixes: (String, String),
    /// Value for cells of rows that have no partner on one side.
    pub fill: Fill,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            how: JoinType::Outer,
            suffixes: (String::new(), "_right".to_owned()),
            fill: Fill::Zero,
        }
    }
}

impl JoinOptions {
    #[must_use]
    pub fn with_how(how: JoinType) -> Self {
        Self {
            how,
            ..Self::default()
        }
    }
}

pub const DEFAULT_ARENA_BUDGET_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinExecutionOptions {
    pub use_arena: bool,
    pub arena_budget_bytes: usize,
}

impl Default for JoinExecutionOptions {
    fn default() -> Self {
        Self {
            use_arena: true,
            arena_budget_bytes: DEFAULT_ARENA_BUDGET_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JoinExecutionTrace {
    used_arena: bool,
    output_rows: usize,
    estimated_bytes: usize,
}

/// Row-label join. Output columns are the left columns followed by the
/// right columns; output rows follow the alignment order for `how`.
pub fn join(
    left: &SparseFrame,
    right: &SparseFrame,
    options: &JoinOptions,
) -> Result<SparseFrame, JoinError> {
    join_with_options(left, right, options, JoinExecutionOptions::default())
}

pub fn join_with_options(
    left: &SparseFrame,
    right: &SparseFrame,
    options: &JoinOptions,
    exec_options: JoinExecutionOptions,
) -> Result<SparseFrame, JoinError> {
    let (joined, _) = join_with_trace(left, right, options, exec_options)?;
    Ok(joined)
}

fn join_with_trace(
    left: &SparseFrame,
    right: &SparseFrame,
    options: &JoinOptions,
    exec_options: JoinExecutionOptions,
) -> Result<(SparseFrame, JoinExecutionTrace), JoinError> {
    let columns = joined_columns(left.columns(), right.columns(), &options.suffixes)?;
    let plan = align(left.index(), right.index(), options.how.into());

    let output_rows = plan.len();
    let estimated_bytes = estimate_intermediate_bytes(output_rows);
    let use_arena = exec_options.use_arena && estimated_bytes <= exec_options.arena_budget_bytes;

    debug!(
        "join {:?}: {} x {} rows -> {output_rows} rows (arena={use_arena})",
        options.how,
        left.nrows(),
        right.nrows()
    );

    let matrix = if use_arena {
        join_with_arena(left, right, &plan, options.fill)?
    } else {
        join_with_global_allocator(left, right, &plan, options.fill)?
    };

    let joined = SparseFrame::new(plan.union_index, columns, matrix)?;
    Ok((
        joined,
        JoinExecutionTrace {
            used_arena: use_arena,
            output_rows,
            estimated_bytes,
        },
    ))
}

/// Bytes held per output row: both absent-row masks.
fn estimate_intermediate_bytes(output_rows: usize) -> usize {
    output_rows.saturating_mul(size_of::<bool>().saturating_mul(2))
}

fn suffixed(label: &IndexLabel, suffix: &str) -> IndexLabel {
    if suffix.is_empty() {
        label.clone()
    } else {
        IndexLabel::Utf8(format!("{label}{suffix}"))
    }
}

/// Left columns then right columns, suffixing only labels found on both sides.
fn joined_columns(
    left: &Index,
    right: &Index,
    suffixes: &(String, String),
) -> Result<Index, JoinError> {
    let left_set = left.position_map_first();
    let right_set = right.position_map_first();

    let mut labels = Vec::with_capacity(left.len() + right.len());
    labels.extend(left.labels().iter().map(|label| {
        if right_set.contains_key(label) {
            suffixed(label, &suffixes.0)
        } else {
            label.clone()
        }
    }));
    labels.extend(right.labels().iter().map(|label| {
        if left_set.contains_key(label) {
            suffixed(label, &suffixes.1)
        } else {
            label.clone()
        }
    }));

    let columns = Index::new(labels);
    if columns.has_duplicates() {
        let duplicated = columns.duplicated_keep_first();
        if let Some((_, label)) = duplicated
            .iter()
            .zip(columns.labels())
            .find(|(dup, _)| **dup)
        {
            return Err(JoinError::SuffixCollision(label.clone()));
        }
    }
    Ok(columns)
}

/// Gather both sides onto the plan's rows and place them side by side.
/// `left_absent`/`right_absent` flag rows without a partner; they are only
/// consulted for a non-zero fill.
fn assemble(
    left: &SparseFrame,
    right: &SparseFrame,
    plan: &AlignmentPlan,
    fill: Fill,
    left_absent: &[bool],
    right_absent: &[bool],
) -> Result<CsrMatrix, JoinError> {
    let mut left_block = left.matrix().take_rows(&plan.left_positions)?;
    let mut right_block = right.matrix().take_rows(&plan.right_positions)?;
    if let Fill::Value(value) = fill {
        left_block = left_block.fill_lines(left_absent, &vec![false; left.ncols()], value)?;
        right_block = right_block.fill_lines(right_absent, &vec![false; right.ncols()], value)?;
    }
    Ok(CsrMatrix::hstack(&[&left_block, &right_block])?)
}

fn join_with_global_allocator(
    left: &SparseFrame,
    right: &SparseFrame,
    plan: &AlignmentPlan,
    fill: Fill,
) -> Result<CsrMatrix, JoinError> {
    let left_absent: Vec<bool> = plan.left_positions.iter().map(Option::is_none).collect();
    let right_absent: Vec<bool> = plan.right_positions.iter().map(Option::is_none).collect();
    assemble(left, right, plan, fill, &left_absent, &right_absent)
}

fn join_with_arena(
    left: &SparseFrame,
    right: &SparseFrame,
    plan: &AlignmentPlan,
    fill: Fill,
) -> Result<CsrMatrix, JoinError> {
    let arena = Bump::new();
    let mut left_absent = BumpVec::<bool>::with_capacity_in(plan.len(), &arena);
    let mut right_absent = BumpVec::<bool>::with_capacity_in(plan.len(), &arena);
    left_absent.extend(plan.left_positions.iter().map(Option::is_none));
    right_absent.extend(plan.right_positions.iter().map(Option::is_none));
    assemble(
        left,
        right,
        plan,
        fill,
        left_absent.as_slice(),
        right_absent.as_slice(),
    )
}
