//! Query builder side of sqlbridge.
//!
//! `sqlbridge-query` is the **dialect layer**. It provides the pieces a query
//! builder plugs together to run statements against one database:
//!
//! - **Dialect**: factory for driver, adapter, compiler and introspector.
//!   `RawDialect` uses PostgreSQL SQL over an ORM client's raw query paths.
//! - **SQL templates**: `RawSql` fragments compiled to `$n` placeholders.
//! - **QueryBuilder**: acquire, execute, release; plugins and query logging.
//! - **Introspection**: schemas, tables and columns from the catalog.
//!
//! Most users reach this through the `sqlbridge` facade crate.

pub mod builder;
pub mod dialect;
pub mod introspect;
pub mod plugin;
pub mod sql;

pub use builder::{ControlledTransaction, QueryBuilder, QueryBuilderConfig};
pub use dialect::{
    Dialect, DialectAdapter, MIGRATION_LOCK_ID, PostgresAdapter, PostgresQueryCompiler,
    QueryCompiler, RawDialect,
};
pub use introspect::{
    ColumnMetadata, DatabaseIntrospector, IntrospectOptions, PostgresIntrospector,
    SchemaMetadata, TableMetadata,
};
pub use plugin::{LogConfig, LogEvent, QueryPlugin};
pub use sql::{RawSql, SqlFragment, quote_ident, quote_qualified};
