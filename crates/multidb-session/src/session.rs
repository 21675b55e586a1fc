//! The session capability interface.
//!
//! A [`Session`] exposes exactly the operations the pool and its consumers
//! use: statement execution, a liveness ping, and close. Drivers implement
//! these three methods; nothing else about the underlying connection object
//! is reachable through the pool.

use async_trait::async_trait;

use crate::descriptor::HostDescriptor;
use crate::error::SessionError;

/// A single database value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

/// One result row.
pub type Row = Vec<Value>;

/// Result of executing a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// A row-returning statement: column names plus the fetched rows.
    Rows {
        /// Column names, in select order.
        columns: Vec<String>,
        /// Fetched rows.
        rows: Vec<Row>,
    },
    /// A non-returning statement: number of affected rows.
    Affected(u64),
}

impl QueryOutcome {
    /// Number of rows fetched, or `0` for a non-returning statement.
    #[must_use]
    pub fn row_count(&self) -> usize {
        match self {
            Self::Rows { rows, .. } => rows.len(),
            Self::Affected(_) => 0,
        }
    }
}

/// A live session to one host.
///
/// Implementations are single-owner: the pool guarantees a session is held
/// by at most one caller at a time, so methods take `&mut self` and need no
/// internal synchronization.
#[async_trait]
pub trait Session: Send {
    /// Execute a statement and return its outcome.
    async fn execute(&mut self, statement: &str) -> Result<QueryOutcome, SessionError>;

    /// Lightweight liveness check against the server.
    ///
    /// The pool wraps this in a bounded timeout and treats any error as
    /// "not live"; implementations should keep it cheap (a ping packet or
    /// `SELECT 1`).
    async fn ping(&mut self) -> Result<(), SessionError>;

    /// Close the underlying transport.
    ///
    /// Must be safe to call on an already-closed session.
    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Opens new sessions from a host descriptor.
///
/// The pool holds one factory for its whole lifetime and calls it whenever
/// a per-host pool needs a fresh connection. Production factories dial the
/// real server; test factories hand out in-memory sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Establish a new session to the host described by `descriptor`.
    async fn connect(&self, descriptor: &HostDescriptor) -> Result<Box<dyn Session>, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_count() {
        let rows = QueryOutcome::Rows {
            columns: vec!["id".into()],
            rows: vec![vec![Value::Int(1)], vec![Value::Int(2)]],
        };
        assert_eq!(rows.row_count(), 2);
        assert_eq!(QueryOutcome::Affected(7).row_count(), 0);
    }
}
