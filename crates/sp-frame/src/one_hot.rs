//! One-hot encoding of categorical columns straight into a sparse frame.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sp_groupby::factorize;
use sp_index::{Index, IndexLabel};
use sp_matrix::CsrMatrix;

use crate::{FrameError, SparseFrame, check_unique_columns};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum TableColumn {
    Text(Vec<String>),
    Numeric(Vec<f64>),
}

impl TableColumn {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(values) => values.len(),
            Self::Numeric(values) => values.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Row-oriented input table of named text or numeric columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalTable {
    index: Index,
    columns: Vec<(String, TableColumn)>,
}

impl CategoricalTable {
    pub fn new(index: Index, columns: Vec<(String, TableColumn)>) -> Result<Self, FrameError> {
        let mut seen = HashMap::<&str, ()>::new();
        for (name, column) in &columns {
            if column.len() != index.len() {
                return Err(FrameError::IndexLengthMismatch {
                    index_len: index.len(),
                    rows: column.len(),
                });
            }
            if seen.insert(name.as_str(), ()).is_some() {
                return Err(FrameError::DuplicateColumn(IndexLabel::Utf8(name.clone())));
            }
        }
        Ok(Self { index, columns })
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&TableColumn> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, column)| column)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }
}

/// How one input column becomes output columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategorySpec {
    /// One output column per declared category, in declaration order.
    /// Declared but unseen categories yield all-zero columns.
    Declared(Vec<String>),
    /// One output column per distinct value, in first-seen order.
    Observed,
    /// Numeric column copied through under its own name.
    Passthrough,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneHotOptions {
    /// Columns to encode. Empty means every table column: text columns as
    /// `Observed`, numeric columns as `Passthrough`.
    pub categories: Vec<(String, CategorySpec)>,
    /// Output block order; must name every encoded column exactly once.
    pub order: Option<Vec<String>>,
    /// Prefix output labels with the source column name.
    pub prefixes: bool,
    pub sep: String,
}

impl Default for OneHotOptions {
    fn default() -> Self {
        Self {
            categories: Vec::new(),
            order: None,
            prefixes: false,
            sep: "_".to_owned(),
        }
    }
}

fn resolve_specs(
    table: &CategoricalTable,
    options: &OneHotOptions,
) -> Result<Vec<(String, CategorySpec)>, FrameError> {
    let specs: Vec<(String, CategorySpec)> = if options.categories.is_empty() {
        table
            .columns
            .iter()
            .map(|(name, column)| {
                let spec = match column {
                    TableColumn::Text(_) => CategorySpec::Observed,
                    TableColumn::Numeric(_) => CategorySpec::Passthrough,
                };
                (name.clone(), spec)
            })
            .collect()
    } else {
        options.categories.clone()
    };

    let Some(order) = &options.order else {
        return Ok(specs);
    };
    let by_name: HashMap<&str, &CategorySpec> =
        specs.iter().map(|(name, spec)| (name.as_str(), spec)).collect();
    let distinct: HashMap<&str, ()> = order.iter().map(|name| (name.as_str(), ())).collect();
    if order.len() != specs.len() || distinct.len() != order.len() {
        return Err(FrameError::InvalidArgument(format!(
            "order must list each of the {} encoded columns exactly once",
            specs.len()
        )));
    }
    order
        .iter()
        .map(|name| {
            by_name
                .get(name.as_str())
                .map(|spec| (name.clone(), (*spec).clone()))
                .ok_or_else(|| {
                    FrameError::InvalidArgument(format!("order names unknown column `{name}`"))
                })
        })
        .collect()
}

fn text_values<'a>(name: &str, column: &'a TableColumn) -> Result<&'a [String], FrameError> {
    match column {
        TableColumn::Text(values) => Ok(values),
        TableColumn::Numeric(_) => Err(FrameError::InvalidArgument(format!(
            "column `{name}` is not categorical"
        ))),
    }
}

/// Encode categorical columns as a sparse 0/1 frame over the table index.
pub fn one_hot_encode(
    table: &CategoricalTable,
    options: &OneHotOptions,
) -> Result<SparseFrame, FrameError> {
    let specs = resolve_specs(table, options)?;
    let nrows = table.len();

    let mut labels: Vec<IndexLabel> = Vec::new();
    let mut triplets: Vec<(usize, usize, f64)> = Vec::new();
    for (name, spec) in &specs {
        let column = table
            .column(name)
            .ok_or_else(|| FrameError::ColumnNotFound(IndexLabel::Utf8(name.clone())))?;
        let offset = labels.len();

        let block: Vec<String> = match spec {
            CategorySpec::Declared(categories) => {
                let values = text_values(name, column)?;
                let mut positions = HashMap::<&str, usize>::with_capacity(categories.len());
                for (pos, category) in categories.iter().enumerate() {
                    if positions.insert(category.as_str(), pos).is_some() {
                        return Err(FrameError::InvalidArgument(format!(
                            "category `{category}` declared twice for column `{name}`"
                        )));
                    }
                }
                for (row, value) in values.iter().enumerate() {
                    let code = positions.get(value.as_str()).ok_or_else(|| {
                        FrameError::InvalidArgument(format!(
                            "value `{value}` in column `{name}` is not a declared category"
                        ))
                    })?;
                    triplets.push((row, offset + code, 1.0));
                }
                categories.clone()
            }
            CategorySpec::Observed => {
                let values = text_values(name, column)?;
                let factorized = factorize(values);
                triplets.extend(
                    factorized
                        .codes
                        .iter()
                        .enumerate()
                        .map(|(row, code)| (row, offset + code, 1.0)),
                );
                factorized.uniques
            }
            CategorySpec::Passthrough => {
                let TableColumn::Numeric(values) = column else {
                    return Err(FrameError::InvalidArgument(format!(
                        "column `{name}` is not of numerical dtype"
                    )));
                };
                triplets.extend(
                    values
                        .iter()
                        .enumerate()
                        .map(|(row, value)| (row, offset, *value)),
                );
                labels.push(IndexLabel::Utf8(name.clone()));
                continue;
            }
        };

        labels.extend(block.into_iter().map(|category| {
            if options.prefixes {
                IndexLabel::Utf8(format!("{name}{}{category}", options.sep))
            } else {
                IndexLabel::Utf8(category)
            }
        }));
    }

    let columns = Index::new(labels);
    check_unique_columns(&columns)?;
    let matrix = CsrMatrix::from_triplets(nrows, columns.len(), &triplets)?;
    SparseFrame::new(table.index().clone(), columns, matrix)
}
