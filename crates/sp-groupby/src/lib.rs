#![forbid(unsafe_code)]

//! Grouped aggregation as sparse matrix multiplication.
//!
//! Keys are factorized into dense group codes in first-seen order. The
//! group indicator (one 1.0 per input row, in the column of its group) is
//! built directly in CSR form and transposed, so a grouped sum over all
//! value columns is a single `indicatorᵀ × values` product.

use std::collections::HashMap;
use std::hash::Hash;

use log::debug;
use sp_matrix::{CsrMatrix, MatrixError};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GroupByError {
    #[error("grouping keys have length {keys} but values have {rows} rows")]
    KeyLengthMismatch { keys: usize, rows: usize },
    #[error(transparent)]
    Matrix(#[from] MatrixError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggFunc {
    #[default]
    Sum,
    /// Sum divided by the number of rows in the group.
    Mean,
    /// Stored entries per group and column.
    Count,
}

/// Dense group codes for a key sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Factorized<K> {
    /// `codes[i]` is the group of row `i`.
    pub codes: Vec<usize>,
    /// Distinct keys in first-seen order; `uniques[g]` labels group `g`.
    pub uniques: Vec<K>,
}

impl<K> Factorized<K> {
    #[must_use]
    pub fn ngroups(&self) -> usize {
        self.uniques.len()
    }

    /// Rows per group.
    #[must_use]
    pub fn group_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.uniques.len()];
        for &code in &self.codes {
            sizes[code] += 1;
        }
        sizes
    }
}

/// Assign each distinct key a code in first-seen order.
pub fn factorize<K>(keys: &[K]) -> Factorized<K>
where
    K: Hash + Eq + Clone,
{
    let mut slot = HashMap::<&K, usize>::with_capacity(keys.len());
    let mut uniques = Vec::new();
    let codes = keys
        .iter()
        .map(|key| {
            *slot.entry(key).or_insert_with(|| {
                uniques.push(key.clone());
                uniques.len() - 1
            })
        })
        .collect();
    Factorized { codes, uniques }
}

/// `N × G` indicator: row `i` holds a single 1.0 in column `codes[i]`.
pub fn indicator(codes: &[usize], ngroups: usize) -> Result<CsrMatrix, GroupByError> {
    let n = codes.len();
    Ok(CsrMatrix::new(
        n,
        ngroups,
        (0..=n).collect(),
        codes.to_vec(),
        vec![1.0; n],
    )?)
}

/// Result of a grouped aggregation: one output row per distinct key.
#[derive(Debug, Clone, PartialEq)]
pub struct Grouped<K> {
    pub keys: Vec<K>,
    pub values: CsrMatrix,
}

pub fn groupby_sum<K>(keys: &[K], values: &CsrMatrix) -> Result<Grouped<K>, GroupByError>
where
    K: Hash + Eq + Clone,
{
    groupby_agg(keys, values, AggFunc::Sum)
}

pub fn groupby_agg<K>(
    keys: &[K],
    values: &CsrMatrix,
    func: AggFunc,
) -> Result<Grouped<K>, GroupByError>
where
    K: Hash + Eq + Clone,
{
    if keys.len() != values.nrows() {
        return Err(GroupByError::KeyLengthMismatch {
            keys: keys.len(),
            rows: values.nrows(),
        });
    }

    let factorized = factorize(keys);
    let ngroups = factorized.ngroups();
    debug!(
        "groupby {func:?}: {} rows -> {ngroups} groups over {} columns",
        keys.len(),
        values.ncols()
    );

    let membership = indicator(&factorized.codes, ngroups)?.transpose();
    let aggregated = match func {
        AggFunc::Sum => membership.matmul(values)?,
        AggFunc::Count => membership.matmul(&values.pattern())?,
        AggFunc::Mean => {
            let sums = membership.matmul(values)?;
            let inverse_sizes: Vec<f64> = factorized
                .group_sizes()
                .into_iter()
                .map(|size| 1.0 / size as f64)
                .collect();
            sums.scale_rows(&inverse_sizes)?
        }
    };

    Ok(Grouped {
        keys: factorized.uniques,
        values: aggregated,
    })
}

#[cfg(test)]
mod tests {
    use super::{AggFunc, GroupByError, factorize, groupby_agg, groupby_sum, indicator};
    use sp_matrix::CsrMatrix;

    fn values() -> CsrMatrix {
        CsrMatrix::from_rows(2, &[vec![1.0, 0.0], vec![0.0, 2.0], vec![3.0, 0.0]])
            .expect("valid rows")
    }

    #[test]
    fn factorize_uses_first_seen_order() {
        let factorized = factorize(&["b", "a", "b", "c"]);
        assert_eq!(factorized.uniques, vec!["b", "a", "c"]);
        assert_eq!(factorized.codes, vec![0, 1, 0, 2]);
        assert_eq!(factorized.group_sizes(), vec![2, 1, 1]);
    }

    #[test]
    fn indicator_has_one_entry_per_row() {
        let m = indicator(&[0, 1, 1], 2).expect("codes in range");
        assert_eq!(m.shape(), (3, 2));
        assert_eq!(m.nnz(), 3);
        assert_eq!(m.to_dense(), vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn sum_combines_duplicate_keys() {
        let grouped = groupby_sum(&[1_i64, 2, 2], &values()).expect("lengths agree");
        assert_eq!(grouped.keys, vec![1, 2]);
        assert_eq!(grouped.values.to_dense(), vec![vec![1.0, 0.0], vec![3.0, 2.0]]);
    }

    #[test]
    fn keys_keep_first_occurrence_order_not_sorted() {
        let grouped = groupby_sum(&[9_i64, 1, 9], &values()).expect("lengths agree");
        assert_eq!(grouped.keys, vec![9, 1]);
        assert_eq!(grouped.values.to_dense(), vec![vec![4.0, 0.0], vec![0.0, 2.0]]);
    }

    #[test]
    fn mean_divides_by_group_size() {
        let grouped = groupby_agg(&["x", "y", "y"], &values(), AggFunc::Mean).expect("ok");
        assert_eq!(grouped.values.to_dense(), vec![vec![1.0, 0.0], vec![1.5, 1.0]]);
    }

    #[test]
    fn count_reports_stored_entries() {
        let grouped = groupby_agg(&["x", "y", "y"], &values(), AggFunc::Count).expect("ok");
        assert_eq!(grouped.values.to_dense(), vec![vec![1.0, 0.0], vec![1.0, 1.0]]);
    }

    #[test]
    fn empty_input_yields_empty_result() {
        let empty = CsrMatrix::zeros(0, 4);
        let grouped = groupby_sum::<i64>(&[], &empty).expect("empty is valid");
        assert!(grouped.keys.is_empty());
        assert_eq!(grouped.values.shape(), (0, 4));
    }

    #[test]
    fn key_length_mismatch_is_rejected() {
        let err = groupby_sum(&[1_i64, 2], &values()).expect_err("3 rows, 2 keys");
        assert_eq!(err, GroupByError::KeyLengthMismatch { keys: 2, rows: 3 });
    }

    #[test]
    fn cancelling_values_are_not_stored() {
        let m = CsrMatrix::from_rows(1, &[vec![2.0], vec![-2.0]]).expect("rows");
        let grouped = groupby_sum(&["k", "k"], &m).expect("ok");
        assert_eq!(grouped.values.nnz(), 0);
        assert_eq!(grouped.values.shape(), (1, 1));
    }
}
