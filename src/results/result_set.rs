use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{Record, RowValues};

/// A row materialised by a SQL or CQL driver, before it becomes a [`Record`].
///
/// Column names and the name-to-index map are shared by every row of one result set.
#[derive(Debug, Clone)]
pub struct CustomDbRow {
    /// The column names for this row (shared across all rows in a result set)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub rows: Vec<RowValues>,
    column_index: Arc<HashMap<String, usize>>,
}

impl CustomDbRow {
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, rows: Vec<RowValues>) -> Self {
        let column_index = Arc::new(index_columns(&column_names));
        Self {
            column_names,
            rows,
            column_index,
        }
    }

    /// Get the index of a column by name
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        self.column_index.get(column_name).copied()
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.get_column_index(column_name)
            .and_then(|idx| self.rows.get(idx))
    }

    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.rows.get(index)
    }

    /// Convert into a name-keyed record. Duplicate column names keep the last value.
    #[must_use]
    pub fn to_record(&self) -> Record {
        self.column_names
            .iter()
            .cloned()
            .zip(self.rows.iter().cloned())
            .collect()
    }
}

/// Rows plus the affected-row count reported by the driver.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// The rows returned by the statement
    pub results: Vec<CustomDbRow>,
    /// Rows changed by a DML statement, or rows read by a query
    pub rows_affected: usize,
    column_names: Option<Arc<Vec<String>>>,
    column_index: Option<Arc<HashMap<String, usize>>>,
}

impl ResultSet {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> ResultSet {
        ResultSet {
            results: Vec::with_capacity(capacity),
            ..ResultSet::default()
        }
    }

    /// Set the column names shared by all rows added afterwards.
    pub fn set_column_names(&mut self, column_names: Arc<Vec<String>>) {
        self.column_index = Some(Arc::new(index_columns(&column_names)));
        self.column_names = Some(column_names);
    }

    #[must_use]
    pub fn get_column_names(&self) -> Option<&Arc<Vec<String>>> {
        self.column_names.as_ref()
    }

    /// Add a row; ignored until column names are set.
    pub fn add_row_values(&mut self, row_values: Vec<RowValues>) {
        if let (Some(column_names), Some(column_index)) = (&self.column_names, &self.column_index)
        {
            self.results.push(CustomDbRow {
                column_names: Arc::clone(column_names),
                rows: row_values,
                column_index: Arc::clone(column_index),
            });
            self.rows_affected += 1;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        self.results.iter().map(CustomDbRow::to_record).collect()
    }
}

fn index_columns(names: &[String]) -> HashMap<String, usize> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_share_column_names() {
        let mut rs = ResultSet::with_capacity(2);
        rs.add_row_values(vec![RowValues::Int(0)]);
        assert!(rs.is_empty(), "rows before column names are dropped");

        rs.set_column_names(Arc::new(vec!["id".into(), "name".into()]));
        rs.add_row_values(vec![RowValues::Int(1), RowValues::Text("a".into())]);
        rs.add_row_values(vec![RowValues::Int(2), RowValues::Null]);
        assert_eq!(rs.len(), 2);
        assert_eq!(rs.results[1].get("id"), Some(&RowValues::Int(2)));
        assert!(Arc::ptr_eq(
            &rs.results[0].column_names,
            &rs.results[1].column_names
        ));

        let records = rs.into_records();
        assert_eq!(records[0].get("name"), Some(&RowValues::Text("a".into())));
    }
}
