//! Query-builder backend contracts.
//!
//! This module defines what a query builder needs from a backend:
//!
//! - [`DatabaseConnection`] - executes compiled statements
//! - [`Driver`] - hands out connections and drives transaction boundaries
//! - [`CompiledQuery`] / [`QueryResult`] - the values crossing that boundary
//! - [`IsolationLevel`] / [`TransactionSettings`] - transaction parameters
//!
//! All operations integrate with asupersync's structured concurrency via `Cx`
//! and report through `Outcome`.

use crate::error::{ConfigError, Error};
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};
use std::fmt;
use std::future::Future;
use std::str::FromStr;

/// Transaction isolation level.
///
/// Symbolic names follow SQL (`"read committed"`); [`native_name`] gives the
/// ORM runtime's enumeration spelling (`"ReadCommitted"`).
///
/// [`native_name`]: IsolationLevel::native_name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Dirty reads, non-repeatable reads and phantoms possible.
    ReadUncommitted,

    /// Only committed changes from others are visible. PostgreSQL's default.
    #[default]
    ReadCommitted,

    /// Transactions see a consistent snapshot for repeated reads.
    RepeatableRead,

    /// Transactions appear to execute sequentially.
    Serializable,

    /// Row-versioned snapshot isolation (SQL Server).
    Snapshot,
}

impl IsolationLevel {
    /// All levels, weakest first.
    pub const ALL: [IsolationLevel; 5] = [
        IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Serializable,
        IsolationLevel::Snapshot,
    ];

    /// Get the SQL syntax for this isolation level.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
            IsolationLevel::Snapshot => "SNAPSHOT",
        }
    }

    /// Symbolic lowercase name used by query builders.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "read uncommitted",
            IsolationLevel::ReadCommitted => "read committed",
            IsolationLevel::RepeatableRead => "repeatable read",
            IsolationLevel::Serializable => "serializable",
            IsolationLevel::Snapshot => "snapshot",
        }
    }

    /// The ORM runtime's spelling of this level.
    #[must_use]
    pub const fn native_name(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "ReadUncommitted",
            IsolationLevel::ReadCommitted => "ReadCommitted",
            IsolationLevel::RepeatableRead => "RepeatableRead",
            IsolationLevel::Serializable => "Serializable",
            IsolationLevel::Snapshot => "Snapshot",
        }
    }

    /// Parse a symbolic name. Case and surrounding whitespace are ignored.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|level| level.name() == name)
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IsolationLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| {
            Error::Config(ConfigError {
                message: format!("unknown isolation level '{s}'"),
            })
        })
    }
}

/// Settings passed by the query builder when it opens a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionSettings {
    /// Requested isolation level; the runtime default when `None`.
    pub isolation_level: Option<IsolationLevel>,
}

impl TransactionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation level.
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }
}

/// Root operation of a compiled statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    /// Hand-written SQL; treated as row-returning.
    Raw,
}

impl StatementKind {
    /// INSERT, UPDATE or DELETE.
    pub const fn is_mutation(self) -> bool {
        matches!(
            self,
            StatementKind::Insert | StatementKind::Update | StatementKind::Delete
        )
    }
}

/// SQL text plus ordered parameters, as produced by a query compiler.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// SQL text with dialect placeholders
    pub sql: String,
    /// Positional parameters
    pub parameters: Vec<Value>,
    /// Root operation
    pub kind: StatementKind,
    /// Whether the statement carries a RETURNING clause
    pub returning: bool,
}

impl CompiledQuery {
    /// A compiled statement of the given kind without RETURNING.
    pub fn new(kind: StatementKind, sql: impl Into<String>, parameters: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            parameters,
            kind,
            returning: false,
        }
    }

    /// Hand-written SQL.
    pub fn raw(sql: impl Into<String>, parameters: Vec<Value>) -> Self {
        Self::new(StatementKind::Raw, sql, parameters)
    }

    /// Mark the statement as carrying a RETURNING clause.
    pub fn with_returning(mut self) -> Self {
        self.returning = true;
        self
    }

    /// A mutation that returns no rows, executed through the row-count path.
    pub const fn is_mutation_without_rows(&self) -> bool {
        self.kind.is_mutation() && !self.returning
    }
}

/// Result of executing a compiled statement.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Returned rows (empty for row-count executions)
    pub rows: Vec<Row>,
    /// Affected-row count reported by the runtime, 0 when it reported none
    pub num_affected_rows: u64,
    /// Last insert id; the raw execution paths never report one
    pub insert_id: Option<i64>,
}

impl QueryResult {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Default::default()
        }
    }

    pub fn from_affected(num_affected_rows: u64) -> Self {
        Self {
            num_affected_rows,
            ..Default::default()
        }
    }
}

/// A logical connection able to execute compiled statements.
pub trait DatabaseConnection: Send + Sync {
    /// Execute a compiled statement and return its rows and affected-row count.
    fn execute_query(
        &self,
        cx: &Cx,
        compiled: &CompiledQuery,
    ) -> impl Future<Output = Outcome<QueryResult, Error>> + Send;

    /// Execute a statement delivering results in chunks of `chunk_size` rows.
    fn stream_query(
        &self,
        cx: &Cx,
        compiled: &CompiledQuery,
        chunk_size: usize,
    ) -> impl Future<Output = Outcome<Vec<QueryResult>, Error>> + Send;
}

/// Produces connections and drives transaction boundaries on them.
///
/// The driver is the only component the query builder asks to begin,
/// commit or roll back; it forwards those calls to the connection it
/// produced.
pub trait Driver: Send + Sync {
    /// The connection type handed out by this driver.
    type Connection: DatabaseConnection;

    /// One-time initialization before the first acquire.
    fn init(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Acquire a logical connection.
    fn acquire_connection(
        &self,
        cx: &Cx,
    ) -> impl Future<Output = Outcome<Self::Connection, Error>> + Send;

    /// Begin a transaction on `conn`.
    fn begin_transaction(
        &self,
        cx: &Cx,
        conn: &mut Self::Connection,
        settings: TransactionSettings,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Commit the transaction open on `conn`.
    fn commit_transaction(
        &self,
        cx: &Cx,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Roll back the transaction open on `conn`.
    fn rollback_transaction(
        &self,
        cx: &Cx,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Give a connection back.
    fn release_connection(
        &self,
        cx: &Cx,
        conn: Self::Connection,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Tear down the driver.
    fn destroy(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;
}
