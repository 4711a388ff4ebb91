#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use log::trace;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IndexLabel {
    Int64(i64),
    Utf8(String),
}

impl From<i64> for IndexLabel {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<i32> for IndexLabel {
    fn from(value: i32) -> Self {
        Self::Int64(i64::from(value))
    }
}

impl From<&str> for IndexLabel {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for IndexLabel {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl fmt::Display for IndexLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "{v}"),
        }
    }
}

/// Detected ordering of an index's labels, computed lazily.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortOrder {
    Unsorted,
    /// Non-decreasing; duplicates allowed.
    Monotonic,
    /// Strictly increasing; no duplicates.
    StrictlyIncreasing,
}

fn detect_sort_order(labels: &[IndexLabel]) -> SortOrder {
    let mut strict = true;
    for pair in labels.windows(2) {
        match pair[0].cmp(&pair[1]) {
            Ordering::Less => {}
            Ordering::Equal => strict = false,
            Ordering::Greater => return SortOrder::Unsorted,
        }
    }
    if strict {
        SortOrder::StrictlyIncreasing
    } else {
        SortOrder::Monotonic
    }
}

fn detect_duplicates(labels: &[IndexLabel]) -> bool {
    let mut seen = HashMap::<&IndexLabel, ()>::with_capacity(labels.len());
    labels.iter().any(|label| seen.insert(label, ()).is_some())
}

/// Ordered sequence of labels. Duplicates are permitted; uniqueness is a
/// property callers query, not an invariant of the type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    labels: Vec<IndexLabel>,
    #[serde(skip)]
    duplicate_cache: OnceLock<bool>,
    #[serde(skip)]
    sort_order_cache: OnceLock<SortOrder>,
}

impl PartialEq for Index {
    fn eq(&self, other: &Self) -> bool {
        self.labels == other.labels
    }
}

impl Eq for Index {}

impl FromIterator<IndexLabel> for Index {
    fn from_iter<T: IntoIterator<Item = IndexLabel>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl Index {
    #[must_use]
    pub fn new(labels: Vec<IndexLabel>) -> Self {
        Self {
            labels,
            duplicate_cache: OnceLock::new(),
            sort_order_cache: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    #[must_use]
    pub fn from_i64(values: Vec<i64>) -> Self {
        Self::new(values.into_iter().map(IndexLabel::from).collect())
    }

    #[must_use]
    pub fn from_utf8<S: Into<String>>(values: Vec<S>) -> Self {
        Self::new(values.into_iter().map(|v| IndexLabel::Utf8(v.into())).collect())
    }

    /// `0..len` as Int64 labels.
    #[must_use]
    pub fn range(len: usize) -> Self {
        Self::new((0..len).map(|i| IndexLabel::Int64(i as i64)).collect())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn labels(&self) -> &[IndexLabel] {
        &self.labels
    }

    #[must_use]
    pub fn into_labels(self) -> Vec<IndexLabel> {
        self.labels
    }

    #[must_use]
    pub fn get(&self, pos: usize) -> Option<&IndexLabel> {
        self.labels.get(pos)
    }

    #[must_use]
    pub fn first(&self) -> Option<&IndexLabel> {
        self.labels.first()
    }

    #[must_use]
    pub fn last(&self) -> Option<&IndexLabel> {
        self.labels.last()
    }

    #[must_use]
    pub fn has_duplicates(&self) -> bool {
        *self
            .duplicate_cache
            .get_or_init(|| detect_duplicates(&self.labels))
    }

    fn sort_order(&self) -> SortOrder {
        *self
            .sort_order_cache
            .get_or_init(|| detect_sort_order(&self.labels))
    }

    /// Non-decreasing label order (duplicates allowed).
    #[must_use]
    pub fn is_monotonic_increasing(&self) -> bool {
        !matches!(self.sort_order(), SortOrder::Unsorted)
    }

    /// Strictly increasing label order.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        matches!(self.sort_order(), SortOrder::StrictlyIncreasing)
    }

    /// First position of `needle`. Binary search on monotonic indexes,
    /// linear scan otherwise.
    #[must_use]
    pub fn position(&self, needle: &IndexLabel) -> Option<usize> {
        if self.is_monotonic_increasing() {
            let pos = self.labels.partition_point(|label| label < needle);
            return (self.labels.get(pos) == Some(needle)).then_some(pos);
        }
        self.labels.iter().position(|label| label == needle)
    }

    #[must_use]
    pub fn contains(&self, label: &IndexLabel) -> bool {
        self.position(label).is_some()
    }

    #[must_use]
    pub fn position_map_first(&self) -> HashMap<IndexLabel, usize> {
        let mut positions = HashMap::with_capacity(self.labels.len());
        for (idx, label) in self.labels.iter().enumerate() {
            positions.entry(label.clone()).or_insert(idx);
        }
        positions
    }

    fn position_map_first_ref(&self) -> HashMap<&IndexLabel, usize> {
        let mut positions = HashMap::with_capacity(self.labels.len());
        for (idx, label) in self.labels.iter().enumerate() {
            positions.entry(label).or_insert(idx);
        }
        positions
    }

    fn position_groups_ref(&self) -> HashMap<&IndexLabel, Vec<usize>> {
        let mut groups = HashMap::<&IndexLabel, Vec<usize>>::with_capacity(self.labels.len());
        for (idx, label) in self.labels.iter().enumerate() {
            groups.entry(label).or_default().push(idx);
        }
        groups
    }

    /// First-match position of each target label in `self`.
    #[must_use]
    pub fn get_indexer(&self, target: &[IndexLabel]) -> Vec<Option<usize>> {
        let map = self.position_map_first_ref();
        target
            .iter()
            .map(|label| map.get(label).copied())
            .collect()
    }

    /// Every position of each target label, in query order. Labels with
    /// no match are reported separately by their position in `target`.
    #[must_use]
    pub fn get_indexer_non_unique(&self, target: &[IndexLabel]) -> (Vec<usize>, Vec<usize>) {
        let groups = self.position_groups_ref();
        let mut positions = Vec::with_capacity(target.len());
        let mut missing = Vec::new();
        for (query_pos, label) in target.iter().enumerate() {
            match groups.get(label) {
                Some(hits) => positions.extend_from_slice(hits),
                None => missing.push(query_pos),
            }
        }
        (positions, missing)
    }

    #[must_use]
    pub fn isin(&self, values: &[IndexLabel]) -> Vec<bool> {
        let set: HashMap<&IndexLabel, ()> = values.iter().map(|v| (v, ())).collect();
        self.labels.iter().map(|l| set.contains_key(l)).collect()
    }

    /// Distinct labels in first-seen order.
    #[must_use]
    pub fn unique(&self) -> Self {
        let mut seen = HashMap::<&IndexLabel, ()>::new();
        self.labels
            .iter()
            .filter(|l| seen.insert(l, ()).is_none())
            .cloned()
            .collect()
    }

    /// `true` for every occurrence after the first.
    #[must_use]
    pub fn duplicated_keep_first(&self) -> Vec<bool> {
        let mut seen = HashMap::<&IndexLabel, ()>::new();
        self.labels
            .iter()
            .map(|label| seen.insert(label, ()).is_some())
            .collect()
    }

    #[must_use]
    pub fn union_with(&self, other: &Self) -> Self {
        let mut seen = HashMap::<&IndexLabel, ()>::new();
        let mut labels = Vec::with_capacity(self.labels.len() + other.labels.len());
        for label in self.labels.iter().chain(other.labels.iter()) {
            if seen.insert(label, ()).is_none() {
                labels.push(label.clone());
            }
        }
        Self::new(labels)
    }

    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        let other_set = other.position_map_first_ref();
        self.labels
            .iter()
            .filter(|l| !other_set.contains_key(l))
            .cloned()
            .collect()
    }

    /// Same labels, ignoring order and multiplicity.
    #[must_use]
    pub fn same_label_set(&self, other: &Self) -> bool {
        let left = self.position_map_first_ref();
        let right = other.position_map_first_ref();
        left.len() == right.len() && left.keys().all(|label| right.contains_key(label))
    }

    /// Stable sort permutation.
    #[must_use]
    pub fn argsort(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.labels.len()).collect();
        indices.sort_by(|&a, &b| self.labels[a].cmp(&self.labels[b]));
        indices
    }

    #[must_use]
    pub fn sort_values(&self) -> Self {
        self.argsort()
            .iter()
            .map(|&i| self.labels[i].clone())
            .collect()
    }

    #[must_use]
    pub fn take(&self, indices: &[usize]) -> Self {
        indices.iter().map(|&i| self.labels[i].clone()).collect()
    }

    #[must_use]
    pub fn slice(&self, start: usize, len: usize) -> Self {
        let end = start.saturating_add(len).min(self.labels.len());
        let start = start.min(end);
        Self::new(self.labels[start..end].to_vec())
    }

    #[must_use]
    pub fn concat(indexes: &[&Self]) -> Self {
        let total = indexes.iter().map(|index| index.len()).sum();
        let mut labels = Vec::with_capacity(total);
        for index in indexes {
            labels.extend_from_slice(&index.labels);
        }
        Self::new(labels)
    }

    /// Number of labels strictly less than `label` (monotonic indexes only).
    #[must_use]
    pub fn searchsorted_left(&self, label: &IndexLabel) -> usize {
        self.labels.partition_point(|l| l < label)
    }

    /// Number of labels less than or equal to `label` (monotonic indexes only).
    #[must_use]
    pub fn searchsorted_right(&self, label: &IndexLabel) -> usize {
        self.labels.partition_point(|l| l <= label)
    }

    /// Positional bounds `[start, end)` for an inclusive label range.
    ///
    /// Monotonic indexes accept bounds that are not present. Unsorted
    /// indexes require both bounds to be present and unique.
    pub fn slice_locs(
        &self,
        start: Option<&IndexLabel>,
        end: Option<&IndexLabel>,
    ) -> Result<(usize, usize), IndexError> {
        if self.is_monotonic_increasing() {
            let lo = start.map_or(0, |label| self.searchsorted_left(label));
            let hi = end.map_or(self.len(), |label| self.searchsorted_right(label));
            return Ok((lo, hi.max(lo)));
        }

        let unique_position = |label: &IndexLabel| -> Result<usize, IndexError> {
            let mut hits = self
                .labels
                .iter()
                .enumerate()
                .filter(|(_, l)| *l == label)
                .map(|(pos, _)| pos);
            match (hits.next(), hits.next()) {
                (Some(pos), None) => Ok(pos),
                (None, _) => Err(IndexError::LabelNotFound(label.clone())),
                (Some(_), Some(_)) => Err(IndexError::NonMonotonicSlice(label.clone())),
            }
        };

        let lo = match start {
            Some(label) => unique_position(label)?,
            None => 0,
        };
        let hi = match end {
            Some(label) => unique_position(label)? + 1,
            None => self.len(),
        };
        Ok((lo, hi.max(lo)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentPlan {
    pub union_index: Index,
    pub left_positions: Vec<Option<usize>>,
    pub right_positions: Vec<Option<usize>>,
}

impl AlignmentPlan {
    fn identity(index: &Index) -> Self {
        let positions: Vec<Option<usize>> = (0..index.len()).map(Some).collect();
        Self {
            union_index: index.clone(),
            left_positions: positions.clone(),
            right_positions: positions,
        }
    }

    /// Number of output rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.union_index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.union_index.is_empty()
    }

    /// `true` when neither side needs reordering or padding.
    #[must_use]
    pub fn is_identity(&self, left_len: usize, right_len: usize) -> bool {
        let n = self.union_index.len();
        n == left_len
            && n == right_len
            && self
                .left_positions
                .iter()
                .zip(&self.right_positions)
                .enumerate()
                .all(|(i, (l, r))| *l == Some(i) && *r == Some(i))
    }

    /// Stable reorder of the plan by output label.
    #[must_use]
    pub fn sorted(self) -> Self {
        let order = self.union_index.argsort();
        Self {
            union_index: self.union_index.take(&order),
            left_positions: order.iter().map(|&i| self.left_positions[i]).collect(),
            right_positions: order.iter().map(|&i| self.right_positions[i]).collect(),
        }
    }

    fn swapped(self) -> Self {
        Self {
            union_index: self.union_index,
            left_positions: self.right_positions,
            right_positions: self.left_positions,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("alignment vectors must have equal lengths")]
    InvalidAlignmentVectors,
    #[error(
        "column labels differ under strict alignment: {left_only} only in left, {right_only} only in right"
    )]
    StrictColumnMismatch { left_only: usize, right_only: usize },
    #[error("label {0} not found")]
    LabelNotFound(IndexLabel),
    #[error("cannot slice non-monotonic index on duplicated label {0}")]
    NonMonotonicSlice(IndexLabel),
}

/// Join mode for index alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignMode {
    /// Labels present in both sides, in left order.
    Inner,
    /// Every left label; right absent where unmatched.
    Left,
    /// Every right label; left absent where unmatched.
    Right,
    /// Left order, then right-only labels in right order.
    #[default]
    Outer,
}

/// Align two indexes.
///
/// Duplicate labels expand per occurrence: each base-side occurrence is
/// paired, in order, with every matching occurrence on the other side.
/// Unmatched occurrences appear once with an absent partner. Nothing is
/// deduplicated and output order is never sorted here; see
/// [`AlignmentPlan::sorted`].
#[must_use]
pub fn align(left: &Index, right: &Index, mode: AlignMode) -> AlignmentPlan {
    if left == right && !left.has_duplicates() && mode != AlignMode::Inner {
        trace!("align fast path: identical unique indexes ({} labels)", left.len());
        return AlignmentPlan::identity(left);
    }
    match mode {
        AlignMode::Inner => align_inner(left, right),
        AlignMode::Left => align_left(left, right),
        AlignMode::Right => align_left(right, left).swapped(),
        AlignMode::Outer => align_union(left, right),
    }
}

fn align_from_left(left: &Index, right: &Index, keep_unmatched_left: bool) -> AlignmentPlan {
    let right_groups = right.position_groups_ref();

    let mut labels = Vec::with_capacity(left.len());
    let mut left_positions = Vec::with_capacity(left.len());
    let mut right_positions = Vec::with_capacity(left.len());

    for (left_pos, label) in left.labels.iter().enumerate() {
        match right_groups.get(label) {
            Some(hits) => {
                for &right_pos in hits {
                    labels.push(label.clone());
                    left_positions.push(Some(left_pos));
                    right_positions.push(Some(right_pos));
                }
            }
            None if keep_unmatched_left => {
                labels.push(label.clone());
                left_positions.push(Some(left_pos));
                right_positions.push(None);
            }
            None => {}
        }
    }

    AlignmentPlan {
        union_index: Index::new(labels),
        left_positions,
        right_positions,
    }
}

/// Inner alignment: matched labels only, in left order.
#[must_use]
pub fn align_inner(left: &Index, right: &Index) -> AlignmentPlan {
    align_from_left(left, right, false)
}

/// Left alignment: every left occurrence preserved.
#[must_use]
pub fn align_left(left: &Index, right: &Index) -> AlignmentPlan {
    align_from_left(left, right, true)
}

/// Outer alignment: left order (with matches expanded), followed by
/// right-only labels in their original right order.
#[must_use]
pub fn align_union(left: &Index, right: &Index) -> AlignmentPlan {
    let mut plan = align_from_left(left, right, true);
    let left_set = left.position_map_first_ref();

    let mut labels = plan.union_index.into_labels();
    for (right_pos, label) in right.labels.iter().enumerate() {
        if !left_set.contains_key(label) {
            labels.push(label.clone());
            plan.left_positions.push(None);
            plan.right_positions.push(Some(right_pos));
        }
    }
    plan.union_index = Index::new(labels);
    plan
}

/// Column-axis alignment. Column labels are unique, so the plan never
/// expands. With `strict`, the label sets must match exactly and the left
/// order is kept.
pub fn align_columns(
    left: &Index,
    right: &Index,
    mode: AlignMode,
    strict: bool,
) -> Result<AlignmentPlan, IndexError> {
    if strict && !left.same_label_set(right) {
        return Err(IndexError::StrictColumnMismatch {
            left_only: left.difference(right).len(),
            right_only: right.difference(left).len(),
        });
    }
    let plan = if strict {
        align_left(left, right)
    } else {
        align(left, right, mode)
    };
    validate_alignment_plan(&plan)?;
    Ok(plan)
}

pub fn validate_alignment_plan(plan: &AlignmentPlan) -> Result<(), IndexError> {
    if plan.left_positions.len() != plan.right_positions.len()
        || plan.left_positions.len() != plan.union_index.len()
    {
        return Err(IndexError::InvalidAlignmentVectors);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        AlignMode, Index, IndexError, IndexLabel, align, align_columns, align_inner, align_left,
        align_union, validate_alignment_plan,
    };

    #[test]
    fn union_alignment_preserves_left_then_right_unseen_order() {
        let left = Index::new(vec![1_i64.into(), 2_i64.into(), 4_i64.into()]);
        let right = Index::new(vec![2_i64.into(), 3_i64.into(), 4_i64.into()]);

        let plan = align_union(&left, &right);
        assert_eq!(
            plan.union_index.labels(),
            &[
                IndexLabel::Int64(1),
                IndexLabel::Int64(2),
                IndexLabel::Int64(4),
                IndexLabel::Int64(3),
            ]
        );
        assert_eq!(plan.left_positions, vec![Some(0), Some(1), Some(2), None]);
        assert_eq!(plan.right_positions, vec![None, Some(0), Some(2), Some(1)]);
        validate_alignment_plan(&plan).expect("plan must be valid");
    }

    #[test]
    fn union_alignment_keeps_right_only_labels_in_right_order() {
        let left = Index::from_i64(vec![5]);
        let right = Index::from_i64(vec![9, 7, 5, 8]);

        let plan = align_union(&left, &right);
        assert_eq!(plan.union_index, Index::from_i64(vec![5, 9, 7, 8]));
        assert_eq!(plan.right_positions, vec![Some(2), Some(0), Some(1), Some(3)]);
    }

    #[test]
    fn duplicate_labels_expand_per_left_occurrence() {
        let left = Index::new(vec!["a".into(), "b".into(), "a".into()]);
        let right = Index::new(vec!["a".into(), "a".into(), "c".into()]);

        let plan = align(&left, &right, AlignMode::Outer);
        assert_eq!(
            plan.union_index.labels(),
            &[
                "a".into(),
                "a".into(),
                "b".into(),
                "a".into(),
                "a".into(),
                "c".into()
            ]
        );
        assert_eq!(
            plan.left_positions,
            vec![Some(0), Some(0), Some(1), Some(2), Some(2), None]
        );
        assert_eq!(
            plan.right_positions,
            vec![Some(0), Some(1), None, Some(0), Some(1), Some(2)]
        );
    }

    #[test]
    fn duplicates_in_base_side_are_not_deduplicated() {
        let left = Index::from_i64(vec![1, 2, 2]);
        let right = Index::from_i64(vec![2]);

        let plan = align_left(&left, &right);
        assert_eq!(plan.union_index, left);
        assert_eq!(plan.right_positions, vec![None, Some(0), Some(0)]);
    }

    #[test]
    fn identical_unique_indexes_take_identity_fast_path() {
        let index = Index::from_i64(vec![3, 1, 2]);
        let plan = align(&index, &index.clone(), AlignMode::Outer);
        assert!(plan.is_identity(3, 3));
    }

    #[test]
    fn align_inner_keeps_only_overlapping_labels() {
        let left = Index::new(vec![1_i64.into(), 2_i64.into(), 3_i64.into()]);
        let right = Index::new(vec![2_i64.into(), 3_i64.into(), 4_i64.into()]);

        let plan = align_inner(&left, &right);
        assert_eq!(
            plan.union_index.labels(),
            &[IndexLabel::Int64(2), IndexLabel::Int64(3)]
        );
        assert_eq!(plan.left_positions, vec![Some(1), Some(2)]);
        assert_eq!(plan.right_positions, vec![Some(0), Some(1)]);
        validate_alignment_plan(&plan).expect("valid");
    }

    #[test]
    fn align_inner_disjoint_yields_empty() {
        let left = Index::from_i64(vec![1, 2]);
        let right = Index::from_i64(vec![3, 4]);

        let plan = align_inner(&left, &right);
        assert!(plan.union_index.is_empty());
        assert!(plan.left_positions.is_empty());
    }

    #[test]
    fn align_right_preserves_all_right_labels() {
        let left = Index::new(vec!["a".into(), "b".into()]);
        let right = Index::new(vec!["b".into(), "c".into(), "d".into()]);

        let plan = align(&left, &right, AlignMode::Right);
        assert_eq!(
            plan.union_index.labels(),
            &["b".into(), "c".into(), "d".into()]
        );
        assert_eq!(plan.left_positions, vec![Some(1), None, None]);
        assert_eq!(plan.right_positions, vec![Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn sorted_plan_reorders_by_label_stably() {
        let left = Index::from_i64(vec![3, 1]);
        let right = Index::from_i64(vec![2]);
        let plan = align_union(&left, &right).sorted();
        assert_eq!(plan.union_index, Index::from_i64(vec![1, 2, 3]));
        assert_eq!(plan.left_positions, vec![Some(1), None, Some(0)]);
        assert_eq!(plan.right_positions, vec![None, Some(0), None]);
    }

    #[test]
    fn strict_column_alignment_rejects_different_label_sets() {
        let left = Index::from_utf8(vec!["x", "y"]);
        let right = Index::from_utf8(vec!["y", "z"]);
        let err = align_columns(&left, &right, AlignMode::Outer, true).expect_err("strict");
        assert_eq!(
            err,
            IndexError::StrictColumnMismatch {
                left_only: 1,
                right_only: 1
            }
        );
    }

    #[test]
    fn strict_column_alignment_reorders_right_to_left_order() {
        let left = Index::from_utf8(vec!["x", "y"]);
        let right = Index::from_utf8(vec!["y", "x"]);
        let plan = align_columns(&left, &right, AlignMode::Outer, true).expect("same set");
        assert_eq!(plan.union_index, left);
        assert_eq!(plan.right_positions, vec![Some(1), Some(0)]);
    }

    #[test]
    fn monotonic_detection_allows_duplicates() {
        let index = Index::from_i64(vec![1, 2, 2, 3]);
        assert!(index.is_monotonic_increasing());
        assert!(!index.is_sorted());
        assert!(!Index::from_i64(vec![2, 1]).is_monotonic_increasing());
        assert!(Index::empty().is_sorted());
    }

    #[test]
    fn position_uses_first_occurrence_on_monotonic_index() {
        let index = Index::from_i64(vec![1, 2, 2, 3]);
        assert_eq!(index.position(&2_i64.into()), Some(1));
        assert_eq!(index.position(&4_i64.into()), None);

        let unsorted = Index::from_i64(vec![30, 10, 20]);
        assert_eq!(unsorted.position(&20_i64.into()), Some(2));
    }

    #[test]
    fn get_indexer_non_unique_returns_multiplicities_in_query_order() {
        let index = Index::new(vec!["a".into(), "b".into(), "a".into()]);
        let (positions, missing) =
            index.get_indexer_non_unique(&["b".into(), "a".into(), "z".into()]);
        assert_eq!(positions, vec![1, 0, 2]);
        assert_eq!(missing, vec![2]);
    }

    #[test]
    fn slice_locs_on_monotonic_index_is_inclusive() {
        let index = Index::from_i64(vec![1, 3, 3, 5, 7]);
        assert_eq!(
            index.slice_locs(Some(&3_i64.into()), Some(&5_i64.into())),
            Ok((1, 4))
        );
        assert_eq!(index.slice_locs(None, Some(&4_i64.into())), Ok((0, 3)));
        assert_eq!(index.slice_locs(Some(&8_i64.into()), None), Ok((5, 5)));
    }

    #[test]
    fn slice_locs_on_unsorted_index_requires_unique_bounds() {
        let index = Index::new(vec!["c".into(), "a".into(), "b".into(), "a".into()]);
        assert_eq!(index.slice_locs(Some(&"c".into()), Some(&"b".into())), Ok((0, 3)));
        assert_eq!(
            index.slice_locs(Some(&"a".into()), None),
            Err(IndexError::NonMonotonicSlice("a".into()))
        );
        assert_eq!(
            index.slice_locs(None, Some(&"q".into())),
            Err(IndexError::LabelNotFound("q".into()))
        );
    }

    #[test]
    fn unique_preserves_first_seen_order() {
        let index = Index::new(vec![
            "b".into(),
            "a".into(),
            "b".into(),
            "c".into(),
            "a".into(),
        ]);
        assert_eq!(index.unique().labels(), &["b".into(), "a".into(), "c".into()]);
        assert_eq!(
            index.duplicated_keep_first(),
            vec![false, false, true, false, true]
        );
    }

    #[test]
    fn argsort_is_stable_for_duplicates() {
        let index = Index::new(vec!["b".into(), "a".into(), "b".into(), "a".into()]);
        assert_eq!(index.argsort(), vec![1, 3, 0, 2]);
    }

    #[test]
    fn index_equality_ignores_cache_state() {
        let with_cache = Index::new(vec!["a".into(), "a".into()]);
        assert!(with_cache.has_duplicates());
        assert_eq!(with_cache, Index::new(vec!["a".into(), "a".into()]));
    }

    #[test]
    fn mixed_label_kinds_order_ints_before_text() {
        let index = Index::new(vec!["a".into(), IndexLabel::Int64(5)]);
        assert!(!index.is_monotonic_increasing());
        assert_eq!(
            index.sort_values().labels(),
            &[IndexLabel::Int64(5), "a".into()]
        );
    }
}
