//! Column-oriented tabular data returned by providers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use anyhow::{Result, bail};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) if v.is_finite() => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Value::Float(_) | Value::Int(_))
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn floats(name: impl Into<String>, values: impl IntoIterator<Item = Option<f64>>) -> Self {
        Self::new(
            name,
            values
                .into_iter()
                .map(|v| v.map_or(Value::Null, Value::Float))
                .collect(),
        )
    }

    pub fn dates(name: impl Into<String>, values: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self::new(name, values.into_iter().map(Value::Date).collect())
    }

    /// True when every cell is a number or null. Empty columns qualify.
    pub fn holds_only_numbers(&self) -> bool {
        self.values
            .iter()
            .all(|v| v.is_numeric() || matches!(v, Value::Null))
    }

    /// A column is numeric when it holds at least one number and nothing
    /// but numbers or nulls.
    pub fn is_numeric(&self) -> bool {
        self.values.iter().any(Value::is_numeric) && self.holds_only_numbers()
    }
}

/// Ordered rows of named, typed columns. All columns share one length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        if let Some(first) = columns.first() {
            let rows = first.values.len();
            if let Some(bad) = columns.iter().find(|c| c.values.len() != rows) {
                bail!(
                    "Column '{}' has {} rows, expected {}",
                    bad.name,
                    bad.values.len(),
                    rows
                );
            }
        }
        for (i, column) in columns.iter().enumerate() {
            if columns[..i]
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&column.name))
            {
                bail!("Duplicate column '{}'", column.name);
            }
        }
        Ok(Self { columns })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Numeric view of a column; non-numeric cells become `None`.
    pub fn float_column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        self.column(name)
            .map(|c| c.values.iter().map(Value::as_f64).collect())
    }

    pub fn row(&self, index: usize) -> Option<Vec<&Value>> {
        if index >= self.len() {
            return None;
        }
        Some(self.columns.iter().map(|c| &c.values[index]).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_rejects_ragged_columns() {
        let result = Table::new(vec![
            Column::floats("open", [Some(1.0), Some(2.0)]),
            Column::floats("close", [Some(1.5)]),
        ]);
        assert_eq!(
            result.unwrap_err().to_string(),
            "Column 'close' has 1 rows, expected 2"
        );
    }

    #[test]
    fn test_table_rejects_duplicate_columns() {
        let result = Table::new(vec![
            Column::floats("close", [Some(1.0)]),
            Column::floats("close", [Some(2.0)]),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_table_access() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let table = Table::new(vec![
            Column::dates("date", [date]),
            Column::floats("Close", [Some(10.5)]),
            Column::new("note", vec![Value::Text("ok".to_string())]),
        ])
        .unwrap();

        assert_eq!(table.len(), 1);
        assert!(table.has_column("close"));
        assert_eq!(table.float_column("close"), Some(vec![Some(10.5)]));
        assert!(table.column("Close").unwrap().is_numeric());
        assert!(!table.column("note").unwrap().is_numeric());
        assert_eq!(table.row(0).unwrap()[0].to_string(), "2024-01-02");
        assert!(table.row(1).is_none());
    }

    #[test]
    fn test_empty_table() {
        let table = Table::empty();
        assert!(table.is_empty());
        assert_eq!(table.column_names().count(), 0);
    }
}
