#![forbid(unsafe_code)]

//! Dense reference oracles for the sparse frame stack.
//!
//! Every oracle works on plain `Vec<Vec<f64>>` rows with naive loops, so
//! the property tests can compare sparse results against an
//! implementation that is obviously correct.

use std::collections::HashMap;

use sp_frame::{Axis, DenseFrame, FrameError, SparseFrame};
use sp_index::{Index, IndexLabel};
use sp_join::JoinType;

/// Group rows by `keys` and sum them; keys in first-seen order.
pub fn dense_groupby_sum(
    keys: &[IndexLabel],
    rows: &[Vec<f64>],
    ncols: usize,
) -> (Vec<IndexLabel>, Vec<Vec<f64>>) {
    let mut slot = HashMap::<&IndexLabel, usize>::new();
    let mut uniques = Vec::new();
    let mut sums: Vec<Vec<f64>> = Vec::new();
    for (key, row) in keys.iter().zip(rows) {
        let g = *slot.entry(key).or_insert_with(|| {
            uniques.push(key.clone());
            sums.push(vec![0.0; ncols]);
            uniques.len() - 1
        });
        for (acc, value) in sums[g].iter_mut().zip(row) {
            *acc += value;
        }
    }
    (uniques, sums)
}

/// Outer elementwise sum of two frames with unique row labels. Row order
/// is left labels then right-only labels; missing cells read as zero.
pub fn dense_outer_add(left: &DenseFrame, right: &DenseFrame) -> Result<DenseFrame, FrameError> {
    let index = left.index().union_with(right.index());
    let columns = left.columns().union_with(right.columns());
    let cell = |frame: &DenseFrame, row: &IndexLabel, col: &IndexLabel| -> f64 {
        match (frame.index().position(row), frame.columns().position(col)) {
            (Some(r), Some(c)) => frame.values()[r][c],
            _ => 0.0,
        }
    };
    let values = index
        .labels()
        .iter()
        .map(|row| {
            columns
                .labels()
                .iter()
                .map(|col| cell(left, row, col) + cell(right, row, col))
                .collect()
        })
        .collect();
    DenseFrame::new(index, columns, values)
}

/// Nested-loop join. Each left occurrence pairs with every matching right
/// occurrence in right order; unmatched occurrences keep a zero partner.
/// Column labels of the two sides must not collide.
pub fn dense_join(
    left: &DenseFrame,
    right: &DenseFrame,
    how: JoinType,
) -> Result<DenseFrame, FrameError> {
    let (lw, rw) = (left.columns().len(), right.columns().len());
    let mut labels = Vec::new();
    let mut values = Vec::new();
    let mut emit = |label: &IndexLabel, l: Option<&Vec<f64>>, r: Option<&Vec<f64>>| {
        labels.push(label.clone());
        let mut row = l.cloned().unwrap_or_else(|| vec![0.0; lw]);
        row.extend(r.cloned().unwrap_or_else(|| vec![0.0; rw]));
        values.push(row);
    };

    let matches = |label: &IndexLabel, frame: &DenseFrame| -> Vec<usize> {
        (0..frame.index().len())
            .filter(|&i| frame.index().get(i) == Some(label))
            .collect()
    };

    if how == JoinType::Right {
        for (label, r) in right.index().labels().iter().zip(right.values()) {
            let hits = matches(label, left);
            if hits.is_empty() {
                emit(label, None, Some(r));
            }
            for i in hits {
                emit(label, Some(&left.values()[i]), Some(r));
            }
        }
    } else {
        for (label, l) in left.index().labels().iter().zip(left.values()) {
            let hits = matches(label, right);
            if hits.is_empty() && how != JoinType::Inner {
                emit(label, Some(l), None);
            }
            for i in hits {
                emit(label, Some(l), Some(&right.values()[i]));
            }
        }
        if how == JoinType::Outer {
            for (label, r) in right.index().labels().iter().zip(right.values()) {
                if !left.index().contains(label) {
                    emit(label, None, Some(r));
                }
            }
        }
    }

    let columns = Index::concat(&[left.columns(), right.columns()]);
    DenseFrame::new(Index::new(labels), columns, values)
}

/// Multiply each row (`Axis::Index`) or column (`Axis::Columns`) by a factor.
#[must_use]
pub fn dense_scale(rows: &[Vec<f64>], factors: &[f64], axis: Axis) -> Vec<Vec<f64>> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            row.iter()
                .enumerate()
                .map(|(j, value)| match axis {
                    Axis::Index => value * factors[i],
                    Axis::Columns => value * factors[j],
                })
                .collect()
        })
        .collect()
}

/// Rows as `(label, values)` pairs sorted by label, then by values, for
/// comparisons that ignore row order.
#[must_use]
pub fn rows_by_label(frame: &DenseFrame) -> Vec<(IndexLabel, Vec<f64>)> {
    let mut rows: Vec<(IndexLabel, Vec<f64>)> = frame
        .index()
        .labels()
        .iter()
        .cloned()
        .zip(frame.values().iter().cloned())
        .collect();
    rows.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    });
    rows
}

/// Same labels, and every value within `tolerance`.
#[must_use]
pub fn dense_close(left: &DenseFrame, right: &DenseFrame, tolerance: f64) -> bool {
    left.index() == right.index()
        && left.columns() == right.columns()
        && left
            .values()
            .iter()
            .flatten()
            .zip(right.values().iter().flatten())
            .all(|(a, b)| (a - b).abs() <= tolerance)
}

/// Sparse frame and its dense form built from the same rows.
pub fn frame_pair(
    index: Index,
    columns: Index,
    rows: Vec<Vec<f64>>,
) -> Result<(SparseFrame, DenseFrame), FrameError> {
    let dense = DenseFrame::new(index, columns, rows)?;
    let sparse = SparseFrame::from_dense_frame(&dense)?;
    Ok((sparse, dense))
}
