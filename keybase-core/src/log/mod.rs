//! Entry log backends.
//!
//! The keybase never talks to storage directly. It hands query descriptors
//! to an [`EntryLog`] and checks the shape of what comes back.

mod memory;
mod sqlite;

pub use memory::MemoryLog;
pub use sqlite::SqliteLog;

use async_trait::async_trait;

use crate::context::OpContext;
use crate::error::LogError;
use crate::query::{Select, Statement};

/// A single value read from the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Null,
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Integer(_) => "integer",
            Value::Null => "null",
        }
    }

    /// Reads an integer count, rejecting any other shape
    pub fn into_count(self) -> Result<u64, LogError> {
        match self {
            Value::Integer(n) => u64::try_from(n)
                .map_err(|_| LogError::Schema(format!("negative count {n}"))),
            other => Err(LogError::Schema(format!(
                "expected integer count, got {}",
                other.type_name()
            ))),
        }
    }
}

/// One row of a multi-value read
pub type Row = Vec<Value>;

/// Reads each row as a single text column, rejecting any other shape
pub fn single_text_column(rows: Vec<Row>) -> Result<Vec<String>, LogError> {
    rows.into_iter()
        .map(|row| {
            if row.len() != 1 {
                return Err(LogError::Schema(format!(
                    "expected 1 column per row, got {}",
                    row.len()
                )));
            }
            match row.into_iter().next() {
                Some(Value::Text(text)) => Ok(text),
                Some(other) => Err(LogError::Schema(format!(
                    "expected text column, got {}",
                    other.type_name()
                ))),
                None => Err(LogError::Schema("empty row".to_string())),
            }
        })
        .collect()
}

/// Storage holding the append-only entry log
///
/// `execute` takes `&mut self`; the keybase only reaches it through its
/// exclusive guard.
///
/// Once `close` has run, every later call fails with [`LogError::Closed`].
#[async_trait]
pub trait EntryLog: Send + Sync {
    /// Applies an insert or delete, returning the number of affected entries
    ///
    /// If `ctx` fires before the change is committed, the call fails with the
    /// context's error and the log is left exactly as it was.
    async fn execute(&mut self, ctx: &OpContext, statement: &Statement) -> Result<u64, LogError>;

    /// Reads the rows selected by `select`, in storage order
    async fn query_rows(&self, select: &Select) -> Result<Vec<Row>, LogError>;

    /// Reads the single value produced by an aggregate `select`
    async fn query_scalar(&self, select: &Select) -> Result<Value, LogError>;

    /// Releases the underlying storage handle
    async fn close(&mut self) -> Result<(), LogError>;

    /// Short backend name for logging
    fn backend(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_count() {
        assert_eq!(Value::Integer(4).into_count().unwrap(), 4);
        assert!(matches!(Value::Integer(-1).into_count(), Err(LogError::Schema(_))));
        assert!(matches!(Value::Text("4".into()).into_count(), Err(LogError::Schema(_))));
        assert!(matches!(Value::Null.into_count(), Err(LogError::Schema(_))));
    }

    #[test]
    fn test_single_text_column_accepts_one_text_value() {
        let rows = vec![vec![Value::Text("key0".into())], vec![Value::Text("key1".into())]];
        assert_eq!(single_text_column(rows).unwrap(), vec!["key0", "key1"]);
        assert!(single_text_column(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_single_text_column_rejects_extra_columns() {
        let rows = vec![vec![Value::Text("ns".into()), Value::Text("key".into())]];
        let err = single_text_column(rows).unwrap_err();
        assert!(matches!(err, LogError::Schema(msg) if msg.contains("2")));
    }

    #[test]
    fn test_single_text_column_rejects_wrong_type() {
        let rows = vec![vec![Value::Integer(3)]];
        assert!(matches!(single_text_column(rows), Err(LogError::Schema(_))));
    }
}
