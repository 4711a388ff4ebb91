#![forbid(unsafe_code)]

//! Partitioned sparse frames.
//!
//! A [`DistributedFrame`] is an ordered list of [`SparseFrame`] partitions
//! that share one set of column labels, plus optional divisions: `n + 1`
//! boundary labels such that partition `i` holds row labels in
//! `[divisions[i], divisions[i + 1])` (the last partition is closed on the
//! right). Every operation is built as per-partition tasks handed to an
//! [`Executor`], followed by a merge step on the calling thread.

mod config;
mod executor;

use std::sync::Arc;

use log::{debug, warn};
use rayon::ThreadPoolBuildError;
use sp_frame::{
    AlignOptions, CategoricalTable, ConcatOptions, ErrorKind, FrameError, GroupBy, OneHotOptions,
    SparseFrame,
};
use sp_index::{Index, IndexLabel};
use sp_join::{JoinError, JoinOptions};
use sp_matrix::{ArithmeticOp, CsrMatrix};
use thiserror::Error;

pub use config::{
    DEFAULT_SAMPLE_SIZE_PER_PARTITION, DistConfig, NUM_THREADS_VAR, SAMPLE_SIZE_VAR,
};
pub use executor::{Executor, SyncExecutor, ThreadPoolExecutor};

#[derive(Debug, Error)]
pub enum DistError {
    #[error("partition {partition} has column labels that differ from partition 0")]
    Schema { partition: usize },
    #[error("invalid divisions: {0}")]
    InvalidDivisions(String),
    #[error("{operation} requires known divisions")]
    UnknownDivisions { operation: &'static str },
    #[error("a distributed frame needs at least one partition")]
    NoPartitions,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid value `{value}` for {var}")]
    Config { var: String, value: String },
    #[error(transparent)]
    ThreadPool(#[from] ThreadPoolBuildError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Join(#[from] JoinError),
}

impl DistError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema { .. } => ErrorKind::Schema,
            Self::InvalidDivisions(_)
            | Self::UnknownDivisions { .. }
            | Self::NoPartitions
            | Self::InvalidArgument(_)
            | Self::Config { .. }
            | Self::ThreadPool(_) => ErrorKind::Value,
            Self::Frame(err) => err.kind(),
            Self::Join(err) => err.kind(),
        }
    }
}

/// One batch from an external reader, turned into one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBatch {
    pub index: Index,
    pub columns: Index,
    pub values: CsrMatrix,
}

const IDENTICAL_COLUMNS: ConcatOptions = ConcatOptions {
    require_identical_columns: true,
};

/// Run one stage of per-partition tasks. Results come back in input
/// order, so the first failing task by position decides the error.
fn run<E, T, R, F>(exec: &E, stage: &str, inputs: &[T], task: F) -> Result<Vec<R>, DistError>
where
    E: Executor,
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> Result<R, DistError> + Sync + Send,
{
    debug!("stage {stage}: {} tasks", inputs.len());
    exec.map(inputs, task).into_iter().collect()
}

fn check_schema(partitions: &[Arc<SparseFrame>]) -> Result<Index, DistError> {
    let Some(first) = partitions.first() else {
        return Err(DistError::NoPartitions);
    };
    if let Some(partition) = partitions
        .iter()
        .position(|part| part.columns() != first.columns())
    {
        return Err(DistError::Schema { partition });
    }
    Ok(first.columns().clone())
}

/// Target partition of `label`: the number of inner boundaries `<= label`.
fn partition_of(label: &IndexLabel, divisions: &[IndexLabel]) -> usize {
    let inner = &divisions[1..divisions.len() - 1];
    inner.partition_point(|boundary| boundary <= label)
}

fn check_non_decreasing(divisions: &[IndexLabel]) -> Result<(), DistError> {
    if divisions.len() < 2 {
        return Err(DistError::InvalidDivisions(
            "at least two boundary labels are required".to_owned(),
        ));
    }
    if divisions.windows(2).any(|pair| pair[0] > pair[1]) {
        return Err(DistError::InvalidDivisions(
            "boundary labels must be non-decreasing".to_owned(),
        ));
    }
    Ok(())
}

fn validate_divisions(
    partitions: &[Arc<SparseFrame>],
    divisions: &[IndexLabel],
) -> Result<(), DistError> {
    if divisions.len() != partitions.len() + 1 {
        return Err(DistError::InvalidDivisions(format!(
            "{} partitions need {} boundary labels, got {}",
            partitions.len(),
            partitions.len() + 1,
            divisions.len()
        )));
    }
    check_non_decreasing(divisions)?;

    let last = partitions.len() - 1;
    for (i, part) in partitions.iter().enumerate() {
        let index = part.index();
        if !index.is_monotonic_increasing() {
            return Err(DistError::InvalidDivisions(format!(
                "partition {i} is not sorted by row label"
            )));
        }
        let (Some(lo), Some(hi)) = (index.first(), index.last()) else {
            continue;
        };
        let above = lo >= &divisions[i];
        let below = if i == last {
            hi <= &divisions[i + 1]
        } else {
            hi < &divisions[i + 1]
        };
        if !(above && below) {
            return Err(DistError::InvalidDivisions(format!(
                "partition {i} holds labels outside [{}, {})",
                divisions[i],
                divisions[i + 1]
            )));
        }
    }
    Ok(())
}

/// Row labels drawn from one partition for choosing sort divisions.
struct LabelSample {
    min: IndexLabel,
    max: IndexLabel,
    labels: Vec<IndexLabel>,
}

fn sample_labels(index: &Index, size: usize) -> Option<LabelSample> {
    let labels = index.labels();
    let min = labels.iter().min()?.clone();
    let max = labels.iter().max()?.clone();
    let n = labels.len();
    let labels = if n <= size {
        labels.to_vec()
    } else {
        (0..size).map(|k| labels[k * n / size].clone()).collect()
    };
    Some(LabelSample { min, max, labels })
}

/// `[min] + quantile splits + [max]`. Splits are strictly increasing and
/// greater than the minimum, so no label can fall before partition 0.
fn choose_divisions(samples: &[LabelSample], npartitions: usize) -> Option<Vec<IndexLabel>> {
    let min = samples.iter().map(|s| &s.min).min()?.clone();
    let max = samples.iter().map(|s| &s.max).max()?.clone();
    let mut pool: Vec<&IndexLabel> = samples.iter().flat_map(|s| &s.labels).collect();
    pool.sort();

    let mut divisions = vec![min];
    if !pool.is_empty() {
        for k in 1..npartitions {
            let split = pool[k * pool.len() / npartitions];
            if divisions.last().is_some_and(|last| split > last) {
                divisions.push(split.clone());
            }
        }
    }
    divisions.push(max);
    Some(divisions)
}

fn sample_divisions<E: Executor>(
    frames: &[&DistributedFrame],
    npartitions: usize,
    config: &DistConfig,
    exec: &E,
) -> Result<Option<Vec<IndexLabel>>, DistError> {
    let parts: Vec<&Arc<SparseFrame>> = frames.iter().flat_map(|f| &f.partitions).collect();
    let samples = run(exec, "sample", &parts, |_, part| {
        Ok(sample_labels(part.index(), config.sample_size_per_partition))
    })?;
    let samples: Vec<LabelSample> = samples.into_iter().flatten().collect();
    Ok(choose_divisions(&samples, npartitions))
}

/// Concatenate per-partition partial sums and sum them again so keys seen
/// in several partitions collapse to one row.
fn combine_partials(partials: &[SparseFrame]) -> Result<SparseFrame, DistError> {
    debug!("stage groupby-combine: {} partials", partials.len());
    let refs: Vec<&SparseFrame> = partials.iter().collect();
    let stacked = SparseFrame::concat(&refs, &IDENTICAL_COLUMNS)?;
    Ok(stacked.groupby_sum(GroupBy::Index)?)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistributedFrame {
    partitions: Vec<Arc<SparseFrame>>,
    divisions: Option<Vec<IndexLabel>>,
    columns: Index,
}

impl DistributedFrame {
    /// Partitions must share column labels exactly. Divisions, when given,
    /// are checked against every partition's row labels.
    pub fn from_partitions(
        partitions: Vec<SparseFrame>,
        divisions: Option<Vec<IndexLabel>>,
    ) -> Result<Self, DistError> {
        Self::from_shared(partitions.into_iter().map(Arc::new).collect(), divisions)
    }

    pub fn from_shared(
        partitions: Vec<Arc<SparseFrame>>,
        divisions: Option<Vec<IndexLabel>>,
    ) -> Result<Self, DistError> {
        let columns = check_schema(&partitions)?;
        if let Some(divisions) = &divisions {
            validate_divisions(&partitions, divisions)?;
        }
        Ok(Self {
            partitions,
            divisions,
            columns,
        })
    }

    /// Conform every partition to the first-seen union of column labels;
    /// columns a partition lacks become structural zeros.
    pub fn from_partitions_with_column_union(
        partitions: Vec<SparseFrame>,
        divisions: Option<Vec<IndexLabel>>,
    ) -> Result<Self, DistError> {
        let Some(first) = partitions.first() else {
            return Err(DistError::NoPartitions);
        };
        let columns = partitions
            .iter()
            .skip(1)
            .fold(first.columns().clone(), |acc, part| {
                acc.union_with(part.columns())
            });
        let conformed = partitions
            .into_iter()
            .map(|part| {
                if part.columns() == &columns {
                    Ok(part)
                } else {
                    part.reindex_columns(&columns)
                }
            })
            .collect::<Result<Vec<_>, FrameError>>()?;
        Self::from_partitions(conformed, divisions)
    }

    /// Split a frame into at most `npartitions` row chunks. A sorted index
    /// yields known divisions and never splits a run of equal labels.
    pub fn from_frame(frame: &SparseFrame, npartitions: usize) -> Result<Self, DistError> {
        if npartitions == 0 {
            return Err(DistError::InvalidArgument(
                "npartitions must be at least 1".to_owned(),
            ));
        }
        let n = frame.nrows();
        if n == 0 {
            return Self::from_partitions(vec![frame.clone()], None);
        }
        let chunk = n.div_ceil(npartitions);
        let index = frame.index();

        if !index.is_monotonic_increasing() {
            let parts = (0..n)
                .step_by(chunk)
                .map(|start| frame.iloc_range(start, start + chunk))
                .collect();
            return Self::from_partitions(parts, None);
        }

        let labels = index.labels();
        let mut starts = vec![0];
        let mut prev = 0;
        for k in 1..npartitions {
            let target = k * chunk;
            if target >= n {
                break;
            }
            let start = index.searchsorted_left(&labels[target]);
            if start > prev {
                starts.push(start);
                prev = start;
            }
        }
        let mut divisions: Vec<IndexLabel> = starts.iter().map(|&s| labels[s].clone()).collect();
        divisions.push(labels[n - 1].clone());
        starts.push(n);

        let parts = starts
            .windows(2)
            .map(|bounds| frame.iloc_range(bounds[0], bounds[1]))
            .collect();
        Self::from_partitions(parts, Some(divisions))
    }

    /// One partition per reader batch, in iteration order.
    pub fn from_batches<I>(batches: I) -> Result<Self, DistError>
    where
        I: IntoIterator<Item = RawBatch>,
    {
        let parts = batches
            .into_iter()
            .map(|batch| SparseFrame::new(batch.index, batch.columns, batch.values))
            .collect::<Result<Vec<_>, FrameError>>()?;
        Self::from_partitions(parts, None)
    }

    /// Encode each raw categorical partition with the same options. Use
    /// declared categories so every partition yields the same columns.
    pub fn one_hot_encode<E: Executor>(
        tables: &[CategoricalTable],
        options: &OneHotOptions,
        exec: &E,
    ) -> Result<Self, DistError> {
        let parts = run(exec, "one-hot", tables, |_, table| {
            Ok(sp_frame::one_hot_encode(table, options)?)
        })?;
        Self::from_partitions(parts, None)
    }

    #[must_use]
    pub fn npartitions(&self) -> usize {
        self.partitions.len()
    }

    #[must_use]
    pub fn divisions(&self) -> Option<&[IndexLabel]> {
        self.divisions.as_deref()
    }

    #[must_use]
    pub fn known_divisions(&self) -> bool {
        self.divisions.is_some()
    }

    #[must_use]
    pub fn columns(&self) -> &Index {
        &self.columns
    }

    #[must_use]
    pub fn partition(&self, i: usize) -> Option<&SparseFrame> {
        self.partitions.get(i).map(AsRef::as_ref)
    }

    #[must_use]
    pub fn partitions(&self) -> &[Arc<SparseFrame>] {
        &self.partitions
    }

    #[must_use]
    pub fn nrows(&self) -> usize {
        self.partitions.iter().map(|part| part.nrows()).sum()
    }

    fn empty_frame(&self) -> Result<SparseFrame, DistError> {
        Ok(SparseFrame::zeros(Index::empty(), self.columns.clone())?)
    }

    /// Collect every partition, in order, into one frame.
    pub fn compute(&self) -> Result<SparseFrame, DistError> {
        let refs: Vec<&SparseFrame> = self.partitions.iter().map(AsRef::as_ref).collect();
        Ok(SparseFrame::concat(&refs, &IDENTICAL_COLUMNS)?)
    }

    /// Apply `f` to every partition. Divisions become unknown, and the
    /// outputs must agree on column labels.
    pub fn map_partitions<E, F>(&self, exec: &E, f: F) -> Result<Self, DistError>
    where
        E: Executor,
        F: Fn(&SparseFrame) -> Result<SparseFrame, FrameError> + Sync + Send,
    {
        let parts = run(exec, "map_partitions", &self.partitions, |_, part| Ok(f(part)?))?;
        Self::from_partitions(parts, None)
    }

    /// Rows with labels in the inclusive range. Known divisions prune
    /// partitions that cannot overlap the range.
    pub fn loc_range<E: Executor>(
        &self,
        start: Option<&IndexLabel>,
        end: Option<&IndexLabel>,
        exec: &E,
    ) -> Result<Self, DistError> {
        let Some(divisions) = &self.divisions else {
            let parts = run(exec, "loc_range", &self.partitions, |_, part| {
                let mask: Vec<bool> = part
                    .index()
                    .labels()
                    .iter()
                    .map(|label| {
                        start.is_none_or(|s| label >= s) && end.is_none_or(|e| label <= e)
                    })
                    .collect();
                Ok(part.mask(&mask)?)
            })?;
            return Self::from_partitions(parts, None);
        };

        let n = self.npartitions();
        let keep: Vec<usize> = (0..n)
            .filter(|&i| {
                let (lo, hi) = (&divisions[i], &divisions[i + 1]);
                let reaches_start = start.is_none_or(|s| if i + 1 == n { s <= hi } else { s < hi });
                let reaches_end = end.is_none_or(|e| e >= lo);
                reaches_start && reaches_end
            })
            .collect();
        debug!("loc_range: {} of {n} partitions overlap the range", keep.len());

        let (Some(&first), Some(&last)) = (keep.first(), keep.last()) else {
            return Self::from_partitions(vec![self.empty_frame()?], None);
        };
        let parts = run(exec, "loc_range", &keep, |_, &i| {
            Ok(self.partitions[i].loc_slice(start, end)?)
        })?;
        Self::from_partitions(parts, Some(divisions[first..=last + 1].to_vec()))
    }

    /// Route every row to the partition its label falls in, then sort each
    /// new partition stably by label.
    fn shuffle_onto<E: Executor>(
        &self,
        divisions: &[IndexLabel],
        exec: &E,
    ) -> Result<Vec<SparseFrame>, DistError> {
        let ntargets = divisions.len() - 1;
        let pieces = run(exec, "shuffle-split", &self.partitions, |_, part| {
            let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); ntargets];
            for (row, label) in part.index().labels().iter().enumerate() {
                buckets[partition_of(label, divisions)].push(row);
            }
            buckets
                .iter()
                .map(|rows| part.iloc(rows).map_err(DistError::from))
                .collect::<Result<Vec<_>, DistError>>()
        })?;

        let targets: Vec<usize> = (0..ntargets).collect();
        run(exec, "shuffle-merge", &targets, |_, &target| {
            let refs: Vec<&SparseFrame> = pieces.iter().map(|split| &split[target]).collect();
            let merged = SparseFrame::concat(&refs, &IDENTICAL_COLUMNS)?;
            Ok(merged.sort_index()?)
        })
    }

    /// Globally sort by row label. Divisions are chosen from label samples
    /// of every partition; a frame with known divisions is already sorted.
    pub fn sort_index<E: Executor>(&self, exec: &E, config: &DistConfig) -> Result<Self, DistError> {
        if self.known_divisions() {
            return Ok(self.clone());
        }
        match sample_divisions(&[self], self.npartitions(), config, exec)? {
            Some(divisions) => {
                let parts = self.shuffle_onto(&divisions, exec)?;
                Self::from_partitions(parts, Some(divisions))
            }
            None => Self::from_partitions(vec![self.empty_frame()?], None),
        }
    }

    /// Move rows onto new divisions. Requires known divisions, and the new
    /// boundaries must cover the current label range.
    pub fn repartition<E: Executor>(
        &self,
        divisions: Vec<IndexLabel>,
        exec: &E,
    ) -> Result<Self, DistError> {
        let Some(old) = &self.divisions else {
            return Err(DistError::UnknownDivisions {
                operation: "repartition",
            });
        };
        check_non_decreasing(&divisions)?;
        let (new_lo, new_hi) = (&divisions[0], &divisions[divisions.len() - 1]);
        let (old_lo, old_hi) = (&old[0], &old[old.len() - 1]);
        if new_lo > old_lo || new_hi < old_hi {
            return Err(DistError::InvalidDivisions(format!(
                "[{new_lo}, {new_hi}] does not cover the current range [{old_lo}, {old_hi}]"
            )));
        }

        let ntargets = divisions.len() - 1;
        let targets: Vec<usize> = (0..ntargets).collect();
        let parts = run(exec, "repartition", &targets, |_, &target| {
            let (lo, hi) = (&divisions[target], &divisions[target + 1]);
            let closed = target + 1 == ntargets;
            let pieces: Vec<SparseFrame> = self
                .partitions
                .iter()
                .map(|part| {
                    let index = part.index();
                    let end = if closed {
                        index.searchsorted_right(hi)
                    } else {
                        index.searchsorted_left(hi)
                    };
                    part.iloc_range(index.searchsorted_left(lo), end)
                })
                .filter(|piece| !piece.is_empty())
                .collect();
            if pieces.is_empty() {
                return self.empty_frame();
            }
            let refs: Vec<&SparseFrame> = pieces.iter().collect();
            Ok(SparseFrame::concat(&refs, &IDENTICAL_COLUMNS)?)
        })?;
        Self::from_partitions(parts, Some(divisions))
    }

    /// Bring both frames onto one division set so matching labels meet in
    /// the same partition position.
    fn co_locate<E: Executor>(
        &self,
        other: &Self,
        exec: &E,
        config: &DistConfig,
    ) -> Result<(Self, Self), DistError> {
        match (&self.divisions, &other.divisions) {
            (Some(a), Some(b)) if a == b => Ok((self.clone(), other.clone())),
            (Some(a), Some(b)) => {
                warn!("divisions differ; repartitioning both sides onto their union");
                let mut union: Vec<IndexLabel> = a.iter().chain(b).cloned().collect();
                union.sort();
                union.dedup();
                if union.len() == 1 {
                    let only = union[0].clone();
                    union.push(only);
                }
                Ok((
                    self.repartition(union.clone(), exec)?,
                    other.repartition(union, exec)?,
                ))
            }
            _ => {
                warn!("divisions unknown; shuffling both sides onto sampled divisions");
                let npartitions = self.npartitions().max(other.npartitions());
                match sample_divisions(&[self, other], npartitions, config, exec)? {
                    Some(divisions) => {
                        let left = self.shuffle_onto(&divisions, exec)?;
                        let right = other.shuffle_onto(&divisions, exec)?;
                        Ok((
                            Self::from_partitions(left, Some(divisions.clone()))?,
                            Self::from_partitions(right, Some(divisions))?,
                        ))
                    }
                    None => Ok((
                        Self::from_partitions(vec![self.compute()?], None)?,
                        Self::from_partitions(vec![other.compute()?], None)?,
                    )),
                }
            }
        }
    }

    pub fn add<E: Executor>(
        &self,
        other: &Self,
        options: &AlignOptions,
        exec: &E,
        config: &DistConfig,
    ) -> Result<Self, DistError> {
        self.binary_with(other, ArithmeticOp::Add, options, exec, config)
    }

    /// Elementwise arithmetic on co-located partitions. Row labels in each
    /// output partition are sorted so the shared divisions stay valid.
    pub fn binary_with<E: Executor>(
        &self,
        other: &Self,
        op: ArithmeticOp,
        options: &AlignOptions,
        exec: &E,
        config: &DistConfig,
    ) -> Result<Self, DistError> {
        let (left, right) = self.co_locate(other, exec, config)?;
        let options = AlignOptions {
            sort: true,
            ..*options
        };
        let pairs: Vec<(&SparseFrame, &SparseFrame)> = left
            .partitions
            .iter()
            .zip(&right.partitions)
            .map(|(l, r)| (l.as_ref(), r.as_ref()))
            .collect();
        let parts = run(exec, "binary", &pairs, |_, (l, r)| {
            Ok(l.binary_with(r, op, &options)?)
        })?;
        Self::from_partitions(parts, left.divisions)
    }

    /// Partition-wise join on co-located frames. Frames with identical
    /// divisions are joined without a shuffle.
    pub fn join<E: Executor>(
        &self,
        other: &Self,
        options: &JoinOptions,
        exec: &E,
        config: &DistConfig,
    ) -> Result<Self, DistError> {
        let (left, right) = self.co_locate(other, exec, config)?;
        let pairs: Vec<(&SparseFrame, &SparseFrame)> = left
            .partitions
            .iter()
            .zip(&right.partitions)
            .map(|(l, r)| (l.as_ref(), r.as_ref()))
            .collect();
        let parts = run(exec, "join", &pairs, |_, (l, r)| {
            Ok(sp_join::join(l, r, options)?.sort_index()?)
        })?;
        Self::from_partitions(parts, left.divisions)
    }

    /// Sum rows sharing a row label. With known divisions equal labels
    /// never straddle partitions, so each partition is aggregated alone and
    /// divisions are kept. Otherwise partial sums are combined into a
    /// single partition.
    pub fn groupby_sum<E: Executor>(&self, exec: &E) -> Result<Self, DistError> {
        if let Some(divisions) = &self.divisions {
            let parts = run(exec, "groupby-local", &self.partitions, |_, part| {
                Ok(part.groupby_sum(GroupBy::Index)?)
            })?;
            return Self::from_partitions(parts, Some(divisions.clone()));
        }
        let partials = run(exec, "groupby-partial", &self.partitions, |_, part| {
            Ok(part.groupby_sum(GroupBy::Index)?)
        })?;
        Self::from_partitions(vec![combine_partials(&partials)?], None)
    }

    /// Two-phase grouped sum by an external key per row, in global row order.
    pub fn groupby_sum_by_keys<E: Executor>(
        &self,
        keys: &[IndexLabel],
        exec: &E,
    ) -> Result<Self, DistError> {
        let nrows = self.nrows();
        if keys.len() != nrows {
            return Err(FrameError::IndexLengthMismatch {
                index_len: keys.len(),
                rows: nrows,
            }
            .into());
        }
        let mut offsets = Vec::with_capacity(self.npartitions() + 1);
        offsets.push(0);
        for part in &self.partitions {
            offsets.push(offsets[offsets.len() - 1] + part.nrows());
        }
        let inputs: Vec<(&SparseFrame, &[IndexLabel])> = self
            .partitions
            .iter()
            .zip(offsets.windows(2))
            .map(|(part, bounds)| (part.as_ref(), &keys[bounds[0]..bounds[1]]))
            .collect();
        let partials = run(exec, "groupby-partial", &inputs, |_, (part, keys)| {
            Ok(part.groupby_sum(GroupBy::Keys(keys))?)
        })?;
        Self::from_partitions(vec![combine_partials(&partials)?], None)
    }
}
