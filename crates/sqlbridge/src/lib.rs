//! sqlbridge - run query-builder SQL through an ORM client.
//!
//! An ORM runtime that owns its connection pool usually exposes two raw
//! escape hatches: run this SQL and give me rows, run this SQL and give me a
//! row count. It also exposes transactions only as "run this callback inside
//! a transaction". sqlbridge puts a query builder on top of exactly that:
//!
//! - a [`RawDriver`] hands out [`QuerySession`]s that pick the right raw path
//!   per statement and normalize row counts;
//! - `begin` / `commit` are bridged onto callback transactions by parking the
//!   callback on a [`SessionLock`];
//! - [`BridgeExtension`] attaches a [`QueryBuilder`] to a client and binds a
//!   fresh one to every callback transaction.
//!
//! # Example
//!
//! ```ignore
//! use sqlbridge::prelude::*;
//!
//! async fn example(cx: &Cx, client: Arc<dyn RawClient>) {
//!     let db = BridgeExtension::new(BridgeConfig::new()).extend(client);
//!
//!     let users = db
//!         .query_builder()
//!         .execute_raw_sql(cx, &RawSql::select("SELECT * FROM ").ident("users"))
//!         .await;
//!
//!     let request = TransactionRequest::batch([
//!         RawStatement::execute("UPDATE users SET active = $1", vec![Value::Bool(true)]),
//!         RawStatement::query("SELECT count(*) FROM users", vec![]),
//!     ]);
//!     db.transaction(cx, request, None).await;
//! }
//! ```
//!
//! Rollback is not supported: a parked callback cannot be made to fail from
//! outside, so `rollback_transaction` always reports the abort error.

pub mod extension;
pub mod json;

pub use sqlbridge_core::{
    BoxFuture, CompiledQuery, Cx, DatabaseConnection, Driver, Error, IsolationLevel, Outcome,
    QueryResult, RawClient, RawOutput, RawStatement, Result, Row, StatementKind,
    TransactionBody, TransactionErrorKind, TransactionOptions, TransactionSettings, Value,
};
pub use sqlbridge_query::{
    ControlledTransaction, DatabaseIntrospector, Dialect, DialectAdapter, IntrospectOptions,
    LogConfig, LogEvent, PostgresAdapter, PostgresIntrospector, PostgresQueryCompiler,
    QueryBuilder, QueryBuilderConfig, QueryCompiler, QueryPlugin, RawDialect, RawSql,
};
pub use sqlbridge_session::{QuerySession, RawDriver, SessionLock};

pub use extension::{
    BridgeConfig, BridgeExtension, EXTENSION_NAME, ExtendedClient, ScopeBody, TransactionRequest,
    TransactionResult, TransactionScope,
};
pub use json::{row_to_json, rows_to_json, value_to_json};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        BridgeConfig, BridgeExtension, Cx, Error, ExtendedClient, IsolationLevel, LogConfig,
        Outcome, QueryBuilder, RawClient, RawDialect, RawSql, Result, Row,
        RawStatement, TransactionOptions, TransactionRequest, TransactionResult,
        TransactionScope, TransactionSettings, Value,
    };
    pub use std::sync::Arc;
}
