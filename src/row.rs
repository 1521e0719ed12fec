//! Result rows as returned by a driver.

use std::sync::Arc;

use relq_core::{Error, Result};
use relq_postgres::{FromValue, PostgresValue, Record, TableDef};

/// One result row. Column names are shared by every row of a result.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<PostgresValue>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<PostgresValue>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[PostgresValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<PostgresValue> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|name| name == column)
    }

    /// Raw value of `column`.
    pub fn value(&self, column: &str) -> Option<&PostgresValue> {
        self.index(column).map(|index| &self.values[index])
    }

    /// Value of `column`, decoded.
    pub fn get<T: FromValue>(&self, column: &str) -> Result<T> {
        match self.value(column) {
            Some(value) => T::from_value(value.clone()),
            None => Err(Error::Mapping(format!("no column `{column}` in row"))),
        }
    }

    /// Value at position `index`, decoded.
    pub fn get_at<T: FromValue>(&self, index: usize) -> Result<T> {
        match self.values.get(index) {
            Some(value) => T::from_value(value.clone()),
            None => Err(Error::Mapping(format!("row has no column at {index}"))),
        }
    }

    /// Drops `column` from the row, returning its value.
    pub(crate) fn take(&mut self, column: &str) -> Option<PostgresValue> {
        let index = self.index(column)?;
        let mut columns = self.columns.to_vec();
        columns.remove(index);
        self.columns = columns.into();
        Some(self.values.remove(index))
    }

    /// Runs the column parsers of `table` over the matching values.
    pub(crate) fn parse_with(mut self, table: &TableDef) -> Self {
        for (name, value) in self.columns.iter().zip(self.values.iter_mut()) {
            if let Some(column) = table.find_column(name)
                && column.parser.is_some()
            {
                *value = column.parse_value(std::mem::take(value));
            }
        }
        self
    }

    /// The row as values to correlate or write with.
    pub fn to_record(&self) -> Record {
        self.columns
            .iter()
            .zip(&self.values)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

/// Everything a statement returned: `{rowCount, fields, rows}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    /// Rows returned, or affected for statements without `RETURNING`
    pub row_count: u64,
    pub fields: Arc<[String]>,
    pub rows: Vec<Vec<PostgresValue>>,
}

impl RowSet {
    pub fn new(fields: Vec<String>, rows: Vec<Vec<PostgresValue>>) -> Self {
        Self {
            row_count: rows.len() as u64,
            fields: fields.into(),
            rows,
        }
    }

    /// A result with no rows, only an affected count.
    pub fn affected(row_count: u64) -> Self {
        Self {
            row_count,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows keyed by column name.
    pub fn into_rows(self) -> Vec<Row> {
        let fields = self.fields;
        self.rows
            .into_iter()
            .map(|values| Row::new(fields.clone(), values))
            .collect()
    }
}

/// A result with rows keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub row_count: u64,
    pub fields: Arc<[String]>,
    pub rows: Vec<Row>,
}

impl From<RowSet> for QueryResult {
    fn from(set: RowSet) -> Self {
        let row_count = set.row_count;
        let fields = set.fields.clone();
        Self {
            row_count,
            fields,
            rows: set.into_rows(),
        }
    }
}
