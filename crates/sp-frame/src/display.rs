use std::fmt;

use serde::{Deserialize, Serialize};

use crate::SparseFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayOptions {
    pub max_rows: usize,
    pub max_cols: usize,
    /// Digits after the decimal point for non-integral values.
    pub precision: usize,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            max_rows: 10,
            max_cols: 20,
            precision: 4,
        }
    }
}

fn format_value(value: f64, precision: usize) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value:.precision$}")
    }
}

impl SparseFrame {
    /// One-line description of shape and storage.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "SparseFrame: {}x{} with {} stored elements",
            self.nrows(),
            self.ncols(),
            self.nnz()
        )
    }

    /// Dense text table of the leading rows and columns (zeros shown),
    /// followed by the summary line. Only the displayed cells are read.
    #[must_use]
    pub fn render_plain(&self, options: &DisplayOptions) -> String {
        let shown_rows = self.nrows().min(options.max_rows);
        let shown_cols = self.ncols().min(options.max_cols);
        let cut_rows = shown_rows < self.nrows();
        let cut_cols = shown_cols < self.ncols();

        let mut header = vec![String::new()];
        header.extend(
            self.columns().labels()[..shown_cols]
                .iter()
                .map(ToString::to_string),
        );
        if cut_cols {
            header.push("...".to_owned());
        }

        let mut table = vec![header];
        for row in 0..shown_rows {
            let label = self
                .index()
                .get(row)
                .map_or_else(String::new, ToString::to_string);
            let mut cells = vec![label];
            cells.extend(
                (0..shown_cols).map(|col| format_value(self.matrix().get(row, col), options.precision)),
            );
            if cut_cols {
                cells.push("...".to_owned());
            }
            table.push(cells);
        }
        if cut_rows {
            let width = table[0].len();
            table.push(vec!["...".to_owned(); width]);
        }

        let width = table[0].len();
        let col_widths: Vec<usize> = (0..width)
            .map(|c| table.iter().map(|cells| cells[c].len()).max().unwrap_or(0))
            .collect();

        let mut out = String::new();
        for cells in &table {
            let line: Vec<String> = cells
                .iter()
                .zip(&col_widths)
                .enumerate()
                .map(|(c, (cell, w))| {
                    if c == 0 {
                        format!("{cell:<w$}")
                    } else {
                        format!("{cell:>w$}")
                    }
                })
                .collect();
            out.push_str(line.join("  ").trim_end());
            out.push('\n');
        }
        out.push_str(&self.summary());
        out
    }
}

impl fmt::Display for SparseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_plain(&DisplayOptions::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::{DisplayOptions, format_value};
    use crate::SparseFrame;
    use sp_index::Index;
    use sp_matrix::CsrMatrix;

    #[test]
    fn summary_reports_shape_and_stored_count() {
        let frame = SparseFrame::from_matrix(CsrMatrix::zeros(10, 10_000));
        assert_eq!(frame.summary(), "SparseFrame: 10x10000 with 0 stored elements");
    }

    #[test]
    fn render_has_header_rows_and_summary() {
        let frame = SparseFrame::from_dense(
            Index::from_utf8(vec!["a", "b"]),
            Index::from_utf8(vec!["x", "y"]),
            &[vec![1.0, 0.0], vec![0.0, 2.5]],
        )
        .expect("valid");
        let text = frame.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1 + 2 + 1);
        assert_eq!(lines[0].split_whitespace().collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(
            lines[2].split_whitespace().collect::<Vec<_>>(),
            vec!["b", "0", "2.5000"]
        );
        assert_eq!(lines[3], "SparseFrame: 2x2 with 2 stored elements");
    }

    #[test]
    fn render_truncates_rows_and_columns() {
        let frame = SparseFrame::from_matrix(CsrMatrix::identity(30));
        let options = DisplayOptions {
            max_rows: 3,
            max_cols: 2,
            precision: 2,
        };
        let text = frame.render_plain(&options);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1 + 3 + 1 + 1);
        assert!(lines[0].ends_with("..."));
        assert!(lines[4].starts_with("..."));
    }

    #[test]
    fn integral_values_print_without_decimals() {
        assert_eq!(format_value(3.0, 4), "3");
        assert_eq!(format_value(-0.5, 2), "-0.50");
    }
}
