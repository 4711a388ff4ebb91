#![forbid(unsafe_code)]

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use sp_dist::{DistError, DistributedFrame};
use sp_frame::{FrameError, SparseFrame};
use sp_index::{Index, IndexLabel};
use sp_matrix::{CsrMatrix, MatrixError};
use thiserror::Error;

pub const METADATA_FILE: &str = "_metadata.json";

#[derive(Debug, Error)]
pub enum IoError {
    #[error("csv input has no headers")]
    MissingHeaders,
    #[error("row {row}, column {column}: `{value}` is not a number")]
    InvalidNumber {
        row: usize,
        column: String,
        value: String,
    },
    #[error("partition {partition} does not match the stored metadata")]
    MetadataMismatch { partition: usize },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Matrix(#[from] MatrixError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Dist(#[from] DistError),
}

// ---------------------------------------------------------------------------
// JSON: labels plus raw CSR arrays
// ---------------------------------------------------------------------------

pub fn to_json_string(frame: &SparseFrame) -> Result<String, IoError> {
    Ok(serde_json::to_string(frame)?)
}

/// Parse a frame; the CSR arrays are validated and canonicalized.
pub fn from_json_str(input: &str) -> Result<SparseFrame, IoError> {
    Ok(serde_json::from_str(input)?)
}

pub fn write_frame_json(path: &Path, frame: &SparseFrame) -> Result<(), IoError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, frame)?;
    writer.flush()?;
    Ok(())
}

pub fn read_frame_json(path: &Path) -> Result<SparseFrame, IoError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

// ---------------------------------------------------------------------------
// CSV: dense export and import, first column is the row index
// ---------------------------------------------------------------------------

/// Integer-looking labels read back as `Int64`, everything else as text.
fn parse_label(field: &str) -> IndexLabel {
    let trimmed = field.trim();
    trimmed
        .parse::<i64>()
        .map_or_else(|_| IndexLabel::Utf8(trimmed.to_owned()), IndexLabel::Int64)
}

/// Densified table with explicit zeros. Only intended for small frames
/// and interchange with tools that lack a sparse format.
///
/// Label types are lost: a text label such as `"7"` reads back as
/// `Int64(7)`. Use [`to_json_string`] or [`write_frame_json`] when labels
/// must round-trip exactly.
pub fn write_csv_string(frame: &SparseFrame) -> Result<String, IoError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());

    let mut header = vec![String::new()];
    header.extend(frame.columns().labels().iter().map(ToString::to_string));
    writer.write_record(&header)?;

    let ncols = frame.ncols();
    let mut dense = vec![0.0; ncols];
    for (row, label) in frame.index().labels().iter().enumerate() {
        dense.fill(0.0);
        let (cols, values) = frame.matrix().row(row);
        for (&col, &value) in cols.iter().zip(values) {
            dense[col] = value;
        }
        let mut record = Vec::with_capacity(ncols + 1);
        record.push(label.to_string());
        record.extend(dense.iter().map(ToString::to_string));
        writer.write_record(&record)?;
    }

    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

/// Inverse of [`write_csv_string`]. Empty cells read as zero; only
/// non-zero cells are stored.
pub fn read_csv_str(input: &str) -> Result<SparseFrame, IoError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_reader(input.as_bytes());

    let headers = reader.headers().cloned()?;
    if headers.is_empty() {
        return Err(IoError::MissingHeaders);
    }
    let columns: Index = headers.iter().skip(1).map(parse_label).collect();
    let ncols = columns.len();

    let mut labels = Vec::new();
    let mut triplets = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        labels.push(parse_label(record.get(0).unwrap_or_default()));
        for col in 0..ncols {
            let field = record.get(col + 1).unwrap_or_default().trim();
            if field.is_empty() {
                continue;
            }
            let value: f64 = field.parse().map_err(|_| IoError::InvalidNumber {
                row,
                column: headers.get(col + 1).unwrap_or_default().to_owned(),
                value: field.to_owned(),
            })?;
            if value != 0.0 {
                triplets.push((row, col, value));
            }
        }
    }

    let matrix = CsrMatrix::from_triplets(labels.len(), ncols, &triplets)?;
    Ok(SparseFrame::new(Index::new(labels), columns, matrix)?)
}

// ---------------------------------------------------------------------------
// Partitioned directories: one JSON file per partition plus metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionedMetadata {
    pub npartitions: usize,
    pub columns: Index,
    pub divisions: Option<Vec<IndexLabel>>,
}

fn partition_file(i: usize) -> String {
    format!("part.{i}.json")
}

/// Write `part.{i}.json` for every partition and `_metadata.json` last,
/// creating `dir` if needed.
pub fn write_partitioned(dir: &Path, frame: &DistributedFrame) -> Result<(), IoError> {
    fs::create_dir_all(dir)?;
    for (i, part) in frame.partitions().iter().enumerate() {
        write_frame_json(&dir.join(partition_file(i)), part)?;
    }
    let metadata = PartitionedMetadata {
        npartitions: frame.npartitions(),
        columns: frame.columns().clone(),
        divisions: frame.divisions().map(<[_]>::to_vec),
    };
    let mut writer = BufWriter::new(File::create(dir.join(METADATA_FILE))?);
    serde_json::to_writer_pretty(&mut writer, &metadata)?;
    writer.flush()?;
    Ok(())
}

pub fn read_metadata(dir: &Path) -> Result<PartitionedMetadata, IoError> {
    let reader = BufReader::new(File::open(dir.join(METADATA_FILE))?);
    Ok(serde_json::from_reader(reader)?)
}

/// Read a directory written by [`write_partitioned`]. Divisions are
/// revalidated against the partitions that were read.
pub fn read_partitioned(dir: &Path) -> Result<DistributedFrame, IoError> {
    let metadata = read_metadata(dir)?;
    let parts = (0..metadata.npartitions)
        .map(|i| {
            let part = read_frame_json(&dir.join(partition_file(i)))?;
            if part.columns() != &metadata.columns {
                return Err(IoError::MetadataMismatch { partition: i });
            }
            Ok(part)
        })
        .collect::<Result<Vec<_>, IoError>>()?;
    Ok(DistributedFrame::from_partitions(parts, metadata.divisions)?)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use sp_dist::DistributedFrame;
    use sp_frame::SparseFrame;
    use sp_index::{Index, IndexLabel};

    use super::{
        IoError, METADATA_FILE, from_json_str, read_csv_str, read_frame_json, read_metadata,
        read_partitioned, to_json_string, write_csv_string, write_frame_json, write_partitioned,
    };

    fn sample() -> SparseFrame {
        SparseFrame::from_dense(
            Index::from_i64(vec![3, 1, 2, 2]),
            Index::new(vec!["clicks".into(), IndexLabel::Int64(7)]),
            &[
                vec![1.5, 0.0],
                vec![0.0, 0.0],
                vec![0.0, -2.0],
                vec![4.0, 1.0],
            ],
        )
        .expect("valid frame")
    }

    #[test]
    fn json_string_round_trip() {
        let text = to_json_string(&sample()).expect("serialize");
        assert!(text.contains("\"indptr\""));
        assert_eq!(from_json_str(&text).expect("parse"), sample());
    }

    #[test]
    fn json_with_inconsistent_arrays_is_rejected() {
        let text = to_json_string(&sample()).expect("serialize");
        let broken = text.replace("\"indptr\":[0,", "\"indptr\":[1,");
        let err = from_json_str(&broken).expect_err("bad indptr");
        assert!(matches!(err, IoError::Json(_)));
    }

    #[test]
    fn json_file_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("frame.json");
        write_frame_json(&path, &sample()).expect("write");
        assert_eq!(read_frame_json(&path).expect("read"), sample());
    }

    #[test]
    fn csv_shows_explicit_zeros() {
        let text = write_csv_string(&sample()).expect("csv");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], ",clicks,7");
        assert_eq!(lines[1], "3,1.5,0");
        assert_eq!(lines[2], "1,0,0");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn csv_round_trip_keeps_values_and_sparsity() {
        let text = write_csv_string(&sample()).expect("csv");
        let back = read_csv_str(&text).expect("parse");
        assert_eq!(back, sample());
        assert_eq!(back.nnz(), 4);
    }

    #[test]
    fn csv_empty_cells_are_zero_and_text_is_rejected() {
        let frame = read_csv_str("id,a,b\nx,,2\ny,1,\n").expect("parse");
        assert_eq!(frame.index(), &Index::from_utf8(vec!["x", "y"]));
        assert_eq!(frame.to_dense().values(), &[vec![0.0, 2.0], vec![1.0, 0.0]]);

        let err = read_csv_str("id,a\nx,abc\n").expect_err("not numeric");
        assert!(matches!(err, IoError::InvalidNumber { row: 0, ref column, .. } if column == "a"));
    }

    #[test]
    fn csv_drops_label_types_but_json_keeps_them() {
        let frame = SparseFrame::from_dense(
            Index::new(vec!["7".into(), "x".into()]),
            Index::new(vec!["3".into()]),
            &[vec![1.0], vec![2.0]],
        )
        .expect("valid frame");

        let via_csv = read_csv_str(&write_csv_string(&frame).expect("csv")).expect("parse");
        assert_eq!(
            via_csv.index().labels(),
            &[IndexLabel::Int64(7), IndexLabel::Utf8("x".to_owned())]
        );
        assert_eq!(via_csv.columns().labels(), &[IndexLabel::Int64(3)]);
        assert_ne!(via_csv, frame);

        let via_json = from_json_str(&to_json_string(&frame).expect("json")).expect("parse");
        assert_eq!(via_json, frame);
    }

    #[test]
    fn csv_without_headers_fails() {
        assert!(matches!(read_csv_str(""), Err(IoError::MissingHeaders)));
    }

    #[test]
    fn partitioned_directory_round_trip() {
        let sorted = sample().sort_index().expect("sort");
        let dist = DistributedFrame::from_frame(&sorted, 2).expect("split");
        let dir = tempfile::tempdir().expect("tempdir");
        write_partitioned(dir.path(), &dist).expect("write");

        assert!(dir.path().join("part.0.json").exists());
        let metadata = read_metadata(dir.path()).expect("metadata");
        assert_eq!(metadata.npartitions, dist.npartitions());
        assert_eq!(metadata.divisions.as_deref(), dist.divisions());

        let back = read_partitioned(dir.path()).expect("read");
        assert_eq!(back, dist);
    }

    #[test]
    fn partition_with_foreign_columns_is_detected() {
        let dist = DistributedFrame::from_frame(&sample(), 2).expect("split");
        let dir = tempfile::tempdir().expect("tempdir");
        write_partitioned(dir.path(), &dist).expect("write");

        let other = SparseFrame::from_dense(
            Index::from_i64(vec![9]),
            Index::from_utf8(vec!["other"]),
            &[vec![1.0]],
        )
        .expect("valid");
        write_frame_json(&dir.path().join("part.1.json"), &other).expect("overwrite");
        let err = read_partitioned(dir.path()).expect_err("mismatch");
        assert!(matches!(err, IoError::MetadataMismatch { partition: 1 }));

        fs::remove_file(dir.path().join(METADATA_FILE)).expect("remove");
        assert!(matches!(read_partitioned(dir.path()), Err(IoError::Io(_))));
    }
}
