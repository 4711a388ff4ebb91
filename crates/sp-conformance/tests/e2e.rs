#![forbid(unsafe_code)]

//! End-to-end scenarios across the whole stack: construction, alignment,
//! grouping, joins and the partitioned protocol.

use sp_dist::{DistConfig, DistributedFrame, SyncExecutor, ThreadPoolExecutor};
use sp_frame::{
    AggFunc, AlignOptions, Axis, CategoricalTable, CategorySpec, ErrorKind, Fill, GroupBy,
    OneHotOptions, SparseFrame, TableColumn,
};
use sp_index::{AlignMode, Index, IndexLabel};
use sp_join::{JoinOptions, JoinType, join};
use sp_matrix::CsrMatrix;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn scenario_frame() -> SparseFrame {
    SparseFrame::from_dense(
        Index::from_i64(vec![1, 2, 2]),
        Index::from_utf8(vec!["x", "y"]),
        &[vec![1.0, 0.0], vec![0.0, 2.0], vec![3.0, 0.0]],
    )
    .expect("valid frame")
}

// ---------------------------------------------------------------------------
// Scenario 1: grouped sum and broadcast on a small frame
// ---------------------------------------------------------------------------

#[test]
fn e2e_groupby_on_index_uses_first_occurrence_order() {
    let grouped = scenario_frame()
        .groupby_sum(GroupBy::Index)
        .expect("grouped");
    assert_eq!(grouped.index(), &Index::from_i64(vec![1, 2]));
    assert_eq!(
        grouped.to_dense().values(),
        &[vec![1.0, 0.0], vec![3.0, 2.0]]
    );
}

#[test]
fn e2e_broadcast_scales_rows_by_position() {
    let scaled = scenario_frame()
        .multiply_vector(&[10.0, 1.0, 1.0], Axis::Index)
        .expect("lengths agree");
    assert_eq!(
        scaled.to_dense().values(),
        &[vec![10.0, 0.0], vec![0.0, 2.0], vec![3.0, 0.0]]
    );
    let err = scenario_frame()
        .multiply_vector(&[1.0, 2.0], Axis::Index)
        .expect_err("two factors for three rows");
    assert_eq!(err.kind(), ErrorKind::Shape);
}

#[test]
fn e2e_derived_aggregations_share_the_indicator_product() {
    let frame = scenario_frame();
    let mean = frame.groupby_agg(GroupBy::Index, AggFunc::Mean).expect("mean");
    let count = frame.groupby_agg(GroupBy::Index, AggFunc::Count).expect("count");
    assert_eq!(mean.to_dense().values()[1], vec![1.5, 1.0]);
    assert_eq!(count.to_dense().values()[1], vec![1.0, 1.0]);
}

// ---------------------------------------------------------------------------
// Scenario 2: clickstream counts per user and day
// ---------------------------------------------------------------------------

fn click_table(users: &[&str], days: &[&str]) -> CategoricalTable {
    CategoricalTable::new(
        Index::from_utf8(users.to_vec()),
        vec![(
            "day".to_owned(),
            TableColumn::Text(days.iter().map(|d| (*d).to_owned()).collect()),
        )],
    )
    .expect("table")
}

fn week() -> OneHotOptions {
    OneHotOptions {
        categories: vec![(
            "day".to_owned(),
            CategorySpec::Declared(
                ["mon", "tue", "wed", "thu", "fri"]
                    .map(str::to_owned)
                    .to_vec(),
            ),
        )],
        ..OneHotOptions::default()
    }
}

#[test]
fn e2e_clickstream_pipeline_counts_days_per_user() {
    init_logging();
    let tables = vec![
        click_table(&["carol", "alice", "bob"], &["mon", "mon", "wed"]),
        click_table(&["alice", "carol"], &["fri", "mon"]),
        click_table(&["bob", "alice", "alice"], &["wed", "mon", "tue"]),
    ];
    let pool = ThreadPoolExecutor::new(3).expect("pool");
    let config = DistConfig::default();

    let clicks = DistributedFrame::one_hot_encode(&tables, &week(), &pool).expect("encoded");
    assert_eq!(clicks.npartitions(), 3);
    assert_eq!(clicks.nrows(), 8);

    let sorted = clicks.sort_index(&pool, &config).expect("sorted");
    assert!(sorted.known_divisions());
    let per_user = sorted.groupby_sum(&pool).expect("grouped").compute().expect("concat");

    assert_eq!(
        per_user.index(),
        &Index::from_utf8(vec!["alice", "bob", "carol"])
    );
    assert_eq!(
        per_user.to_dense().values(),
        &[
            vec![2.0, 1.0, 0.0, 0.0, 1.0],
            vec![0.0, 0.0, 2.0, 0.0, 0.0],
            vec![2.0, 0.0, 0.0, 0.0, 0.0],
        ]
    );
    let totals = per_user.sum(Axis::Columns);
    assert_eq!(totals, vec![4.0, 2.0, 2.0]);

    let unsorted_counts = clicks.groupby_sum(&SyncExecutor).expect("two-phase");
    assert_eq!(unsorted_counts.npartitions(), 1);
    assert_eq!(
        unsorted_counts
            .compute()
            .expect("concat")
            .sort_index()
            .expect("sort"),
        per_user
    );
}

#[test]
fn e2e_profile_join_after_grouping() {
    let tables = vec![click_table(&["bob", "alice"], &["tue", "tue"])];
    let counts = DistributedFrame::one_hot_encode(&tables, &week(), &SyncExecutor)
        .and_then(|d| d.groupby_sum(&SyncExecutor))
        .and_then(|d| d.compute())
        .expect("counts");

    let profiles = SparseFrame::from_dense(
        Index::from_utf8(vec!["alice", "dave"]),
        Index::from_utf8(vec!["age", "tue"]),
        &[vec![31.0, 0.0], vec![45.0, 1.0]],
    )
    .expect("profiles");

    let joined = join(
        &counts,
        &profiles,
        &JoinOptions {
            suffixes: ("_clicks".to_owned(), "_profile".to_owned()),
            ..JoinOptions::with_how(JoinType::Outer)
        },
    )
    .expect("join");
    assert_eq!(joined.index(), &Index::from_utf8(vec!["bob", "alice", "dave"]));
    assert!(joined.columns().contains(&IndexLabel::from("tue_clicks")));
    assert!(joined.columns().contains(&IndexLabel::from("tue_profile")));
    assert_eq!(joined.ncols(), 7);
    assert_eq!(
        joined.column_values(&"age".into()).expect("age column"),
        vec![0.0, 31.0, 45.0]
    );
}

// ---------------------------------------------------------------------------
// Scenario 3: alignment policies
// ---------------------------------------------------------------------------

#[test]
fn e2e_partial_overlap_add_with_fill() {
    let a = SparseFrame::from_dense(
        Index::from_i64(vec![0, 1, 2]),
        Index::from_utf8(vec!["x"]),
        &[vec![1.0], vec![1.0], vec![1.0]],
    )
    .expect("a");
    let b = SparseFrame::from_dense(
        Index::from_i64(vec![2, 3]),
        Index::from_utf8(vec!["x"]),
        &[vec![5.0], vec![5.0]],
    )
    .expect("b");

    let zero_filled = a.add(&b).expect("add");
    assert_eq!(zero_filled.index(), &Index::from_i64(vec![0, 1, 2, 3]));
    assert_eq!(
        zero_filled.to_dense().values(),
        &[vec![1.0], vec![1.0], vec![6.0], vec![5.0]]
    );

    let filled = a
        .add_with(
            &b,
            &AlignOptions {
                fill: Fill::Value(100.0),
                ..AlignOptions::default()
            },
        )
        .expect("add");
    assert_eq!(filled.to_dense().values()[0], vec![101.0]);
    assert_eq!(filled.to_dense().values()[3], vec![105.0]);

    let inner = a
        .add_with(
            &b,
            &AlignOptions {
                how: AlignMode::Inner,
                ..AlignOptions::default()
            },
        )
        .expect("add");
    assert_eq!(inner.index(), &Index::from_i64(vec![2]));
}

#[test]
fn e2e_strict_columns_reject_mismatch_before_computing() {
    let a = scenario_frame();
    let b = a.drop_columns(&["y".into()]).expect("drop");
    let err = a
        .add_with(
            &b,
            &AlignOptions {
                strict_columns: true,
                ..AlignOptions::default()
            },
        )
        .expect_err("column sets differ");
    assert_eq!(err.kind(), ErrorKind::Shape);
}

// ---------------------------------------------------------------------------
// Scenario 4: reader batches through the partitioned protocol
// ---------------------------------------------------------------------------

#[test]
fn e2e_reader_batches_sort_repartition_and_slice() {
    init_logging();
    let columns = Index::from_utf8(vec!["views", "clicks"]);
    let batches = [vec![40_i64, 3, 17], vec![8, 25], vec![1, 33, 12]]
        .into_iter()
        .map(|labels| {
            let n = labels.len();
            let triplets: Vec<(usize, usize, f64)> =
                (0..n).map(|r| (r, r % 2, labels[r] as f64)).collect();
            sp_dist::RawBatch {
                index: Index::from_i64(labels),
                columns: columns.clone(),
                values: CsrMatrix::from_triplets(n, 2, &triplets).expect("triplets"),
            }
        });
    let frame = DistributedFrame::from_batches(batches).expect("batches");
    assert!(!frame.known_divisions());

    let config = DistConfig {
        sample_size_per_partition: 2,
        ..DistConfig::default()
    };
    let sorted = frame.sort_index(&SyncExecutor, &config).expect("sorted");
    let moved = sorted
        .repartition(
            [0_i64, 10, 20, 30, 40].map(IndexLabel::Int64).to_vec(),
            &SyncExecutor,
        )
        .expect("repartitioned");
    assert_eq!(moved.npartitions(), 4);
    let sizes: Vec<usize> = moved.partitions().iter().map(|p| p.nrows()).collect();
    assert_eq!(sizes, vec![3, 2, 1, 2]);

    let (lo, hi) = (IndexLabel::Int64(10), IndexLabel::Int64(26));
    let window = moved
        .loc_range(Some(&lo), Some(&hi), &SyncExecutor)
        .expect("range")
        .compute()
        .expect("concat");
    assert_eq!(window.index(), &Index::from_i64(vec![12, 17, 25]));
    assert_eq!(window.nnz(), 3);

    let whole = moved.compute().expect("concat");
    assert!(whole.index().is_monotonic_increasing());
    assert_eq!(whole.nnz(), 8);
}
