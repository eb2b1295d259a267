//! Core types and contracts for sqlbridge.
//!
//! sqlbridge lets a query builder run its SQL through an ORM client's raw
//! query paths instead of through a connection pool of its own. This crate
//! holds the pieces every other crate shares:
//!
//! - `DatabaseConnection` / `Driver` - what the query builder calls into
//! - `RawClient` - what the ORM runtime provides
//! - `CompiledQuery`, `QueryResult`, `Row`, `Value` - the data in between
//! - `Error` with stable codes, and `Cx` / `Outcome` from asupersync

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod client;
pub mod connection;
pub mod error;
pub mod row;
pub mod value;

pub use client::{
    BoxFuture, RawClient, RawOutput, RawStatement, TransactionBody, TransactionOptions,
};
pub use connection::{
    CompiledQuery, DatabaseConnection, Driver, IsolationLevel, QueryResult, StatementKind,
    TransactionSettings,
};
pub use error::{
    ConfigError, ConnectionError, Error, QueryError, Result, TransactionError,
    TransactionErrorKind, TypeError, UnsupportedError,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
