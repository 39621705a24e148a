//! Row and column annotation tables.

use serde::{Deserialize, Serialize};

use crate::error::ScrnaError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "lowercase")]
pub enum Column {
    String(Vec<Option<String>>),
    Integer(Vec<Option<i64>>),
    Number(Vec<Option<f64>>),
    Boolean(Vec<Option<bool>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::String(values) => values.len(),
            Column::Integer(values) => values.len(),
            Column::Number(values) => values.len(),
            Column::Boolean(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_strings(&self) -> Option<&[Option<String>]> {
        match self {
            Column::String(values) => Some(values),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    row_count: usize,
    row_names: Option<Vec<String>>,
    columns: Vec<(String, Column)>,
}

impl DataFrame {
    /// A table with `row_count` rows and no columns.
    pub fn empty(row_count: usize) -> Self {
        Self {
            row_count,
            row_names: None,
            columns: Vec::new(),
        }
    }

    pub fn new(
        row_count: usize,
        row_names: Option<Vec<String>>,
        columns: Vec<(String, Column)>,
    ) -> Result<Self, ScrnaError> {
        if let Some(names) = &row_names {
            if names.len() != row_count {
                return Err(ScrnaError::DimensionMismatch {
                    context: "data frame row names".to_string(),
                    expected: row_count,
                    found: names.len(),
                });
            }
        }
        for (idx, (name, column)) in columns.iter().enumerate() {
            if column.len() != row_count {
                return Err(ScrnaError::DimensionMismatch {
                    context: format!("data frame column {name:?}"),
                    expected: row_count,
                    found: column.len(),
                });
            }
            if columns[..idx].iter().any(|(other, _)| other == name) {
                return Err(ScrnaError::Object {
                    path: "data frame".to_string(),
                    message: format!("duplicate column name {name:?}"),
                });
            }
        }
        Ok(Self {
            row_count,
            row_names,
            columns,
        })
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn row_names(&self) -> Option<&[String]> {
        self.row_names.as_deref()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, column)| column)
    }

    pub fn columns(&self) -> &[(String, Column)] {
        &self.columns
    }
}
