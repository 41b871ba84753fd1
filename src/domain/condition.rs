//! Structured where-conditions understood by both the cache and the store.

use std::fmt;

use super::object::FULL_NAME_LIST_SEPARATOR;
use super::types::{DataRow, FieldValue};

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Equals { column: String, value: FieldValue },
    EqualsIgnoreCase { column: String, value: String },
    In { column: String, values: Vec<FieldValue> },
    IsNull { column: String },
    /// The column holds a `;`-delimited list containing `item` (case-insensitive).
    ListContains { column: String, item: String },
}

impl Clause {
    fn matches(&self, row: &DataRow) -> bool {
        let value_of = |column: &str| row.get(column).filter(|value| !value.is_null());

        match self {
            Self::Equals { column, value } => value_of(column) == Some(value),
            Self::EqualsIgnoreCase { column, value } => value_of(column)
                .and_then(FieldValue::as_str)
                .is_some_and(|actual| actual.eq_ignore_ascii_case(value)),
            Self::In { column, values } => {
                value_of(column).is_some_and(|actual| values.contains(actual))
            }
            Self::IsNull { column } => value_of(column).is_none(),
            Self::ListContains { column, item } => value_of(column)
                .and_then(FieldValue::as_str)
                .is_some_and(|list| {
                    list.split(FULL_NAME_LIST_SEPARATOR)
                        .any(|entry| entry.trim().eq_ignore_ascii_case(item))
                }),
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals { column, value } => write!(f, "[{column}] = {}", quote(value)),
            Self::EqualsIgnoreCase { column, value } => {
                write!(f, "LOWER([{column}]) = '{}'", value.to_lowercase())
            }
            Self::In { column, values } => {
                let list: Vec<String> = values.iter().map(quote).collect();
                write!(f, "[{column}] IN ({})", list.join(", "))
            }
            Self::IsNull { column } => write!(f, "[{column}] IS NULL"),
            Self::ListContains { column, item } => {
                write!(f, "';' + [{column}] + ';' LIKE '%;{item};%'")
            }
        }
    }
}

fn quote(value: &FieldValue) -> String {
    match value {
        FieldValue::Null => "NULL".to_string(),
        FieldValue::Int(_) | FieldValue::Bool(_) => value.to_key_string(),
        other => format!("'{}'", other.to_key_string().replace('\'', "''")),
    }
}

/// Conjunction of clauses; an empty condition matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereCondition {
    clauses: Vec<Clause>,
}

impl WhereCondition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_equals(mut self, column: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.clauses.push(Clause::Equals {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    pub fn where_equals_ignore_case(
        mut self,
        column: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.clauses.push(Clause::EqualsIgnoreCase {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    pub fn where_in(mut self, column: impl Into<String>, values: Vec<FieldValue>) -> Self {
        self.clauses.push(Clause::In {
            column: column.into(),
            values,
        });
        self
    }

    pub fn where_null(mut self, column: impl Into<String>) -> Self {
        self.clauses.push(Clause::IsNull {
            column: column.into(),
        });
        self
    }

    pub fn where_list_contains(mut self, column: impl Into<String>, item: impl Into<String>) -> Self {
        self.clauses.push(Clause::ListContains {
            column: column.into(),
            item: item.into(),
        });
        self
    }

    pub fn and(mut self, other: WhereCondition) -> Self {
        self.clauses.extend(other.clauses);
        self
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, row: &DataRow) -> bool {
        self.clauses.iter().all(|clause| clause.matches(row))
    }
}

impl fmt::Display for WhereCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clauses.is_empty() {
            return f.write_str("1 = 1");
        }
        let parts: Vec<String> = self.clauses.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(" AND "))
    }
}
