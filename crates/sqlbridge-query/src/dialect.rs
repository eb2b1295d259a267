//! Dialects: the pieces a query builder needs to talk to one database.
//!
//! A [`Dialect`] is a factory for a driver, an adapter describing what the
//! database supports, a compiler turning templates into SQL text, and an
//! introspector. [`RawDialect`] pairs the PostgreSQL pieces with a
//! [`RawDriver`] over an ORM client.

use crate::builder::QueryBuilder;
use crate::introspect::{DatabaseIntrospector, PostgresIntrospector};
use crate::sql::{RawSql, SqlFragment, quote_qualified};
use sqlbridge_core::{CompiledQuery, Driver, RawClient, TransactionOptions};
use sqlbridge_session::RawDriver;
use std::fmt;
use std::fmt::Write;
use std::sync::Arc;

/// Advisory lock key serializing migrations.
pub const MIGRATION_LOCK_ID: i64 = 3_853_314_791_062_309_107;

/// Capabilities and helper statements of a database.
pub trait DialectAdapter: Send + Sync {
    /// INSERT/UPDATE/DELETE ... RETURNING
    fn supports_returning(&self) -> bool;

    /// DDL statements can run inside a transaction
    fn supports_transactional_ddl(&self) -> bool;

    /// CREATE ... IF NOT EXISTS
    fn supports_create_if_not_exists(&self) -> bool;

    /// Statement taking the migration lock inside the current transaction.
    fn migration_lock_query(&self) -> Option<CompiledQuery>;

    /// Statement releasing the migration lock, if it is not released with the
    /// transaction.
    fn migration_unlock_query(&self) -> Option<CompiledQuery> {
        None
    }
}

/// Turns a SQL template into dialect SQL text.
pub trait QueryCompiler: Send + Sync {
    fn compile(&self, query: &RawSql) -> CompiledQuery;
}

/// Factory for everything a query builder needs.
pub trait Dialect: Send + Sync + Sized + 'static {
    type Driver: Driver;
    type Adapter: DialectAdapter;
    type Compiler: QueryCompiler;
    type Introspector: DatabaseIntrospector;

    fn create_driver(&self) -> Self::Driver;

    fn create_adapter(&self) -> Self::Adapter;

    fn create_query_compiler(&self) -> Self::Compiler;

    /// Introspector issuing its catalog queries through `db`.
    fn create_introspector(&self, db: QueryBuilder<Self>) -> Self::Introspector;
}

/// PostgreSQL capabilities.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresAdapter;

impl DialectAdapter for PostgresAdapter {
    fn supports_returning(&self) -> bool {
        true
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    fn supports_create_if_not_exists(&self) -> bool {
        true
    }

    fn migration_lock_query(&self) -> Option<CompiledQuery> {
        // Transaction scoped; released on commit or rollback.
        Some(CompiledQuery::raw(
            format!("select pg_advisory_xact_lock({MIGRATION_LOCK_ID})"),
            Vec::new(),
        ))
    }
}

/// Renders templates with `$n` placeholders and double-quoted identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresQueryCompiler;

impl QueryCompiler for PostgresQueryCompiler {
    fn compile(&self, query: &RawSql) -> CompiledQuery {
        let mut sql = String::new();
        let mut parameters = Vec::with_capacity(query.param_count());

        for fragment in query.fragments() {
            match fragment {
                SqlFragment::Text(text) => sql.push_str(text),
                SqlFragment::Param(value) => {
                    parameters.push(value.clone());
                    let _ = write!(sql, "${}", parameters.len());
                }
                SqlFragment::Ident(name) => sql.push_str(&quote_qualified(name)),
            }
        }

        let compiled = CompiledQuery::new(query.kind(), sql, parameters);
        if query.has_returning() {
            compiled.with_returning()
        } else {
            compiled
        }
    }
}

/// PostgreSQL dialect executing through an ORM client's raw query paths.
#[derive(Clone)]
pub struct RawDialect {
    client: Arc<dyn RawClient>,
    driver: Option<RawDriver>,
    options: TransactionOptions,
}

impl RawDialect {
    pub fn new(client: Arc<dyn RawClient>) -> Self {
        Self {
            client,
            driver: None,
            options: TransactionOptions::default(),
        }
    }

    /// Options handed to the runtime when a session opens a transaction.
    #[must_use]
    pub fn with_options(mut self, options: TransactionOptions) -> Self {
        self.options = options;
        self
    }

    /// Use `driver` instead of creating one over the client.
    #[must_use]
    pub fn with_driver(mut self, driver: RawDriver) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn client(&self) -> &Arc<dyn RawClient> {
        &self.client
    }
}

impl Dialect for RawDialect {
    type Driver = RawDriver;
    type Adapter = PostgresAdapter;
    type Compiler = PostgresQueryCompiler;
    type Introspector = PostgresIntrospector<RawDialect>;

    fn create_driver(&self) -> RawDriver {
        self.driver.clone().unwrap_or_else(|| {
            RawDriver::with_options(Arc::clone(&self.client), self.options)
        })
    }

    fn create_adapter(&self) -> PostgresAdapter {
        PostgresAdapter
    }

    fn create_query_compiler(&self) -> PostgresQueryCompiler {
        PostgresQueryCompiler
    }

    fn create_introspector(&self, db: QueryBuilder<Self>) -> PostgresIntrospector<Self> {
        PostgresIntrospector::new(db)
    }
}

impl fmt::Debug for RawDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawDialect")
            .field("driver", &self.driver)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlbridge_core::{StatementKind, Value};

    #[test]
    fn test_compile_numbers_placeholders_in_order() {
        let query = RawSql::select("SELECT ")
            .ident("u.name")
            .text(" FROM ")
            .ident("public.users")
            .text(" AS u WHERE u.id = ")
            .param(7_i64)
            .text(" AND u.email = ")
            .param("a@b.c");

        let compiled = PostgresQueryCompiler.compile(&query);
        assert_eq!(
            compiled.sql,
            "SELECT \"u\".\"name\" FROM \"public\".\"users\" AS u WHERE u.id = $1 AND u.email = $2"
        );
        assert_eq!(
            compiled.parameters,
            vec![Value::BigInt(7), Value::Text("a@b.c".to_string())]
        );
        assert_eq!(compiled.kind, StatementKind::Select);
    }

    #[test]
    fn test_compile_keeps_kind_and_returning() {
        let update = RawSql::update("UPDATE ")
            .ident("t")
            .text(" SET a = ")
            .param(1)
            .returning()
            .text(" RETURNING a");
        let compiled = PostgresQueryCompiler.compile(&update);
        assert!(compiled.returning);
        assert!(!compiled.is_mutation_without_rows());

        let delete = PostgresQueryCompiler.compile(&RawSql::delete("DELETE FROM t"));
        assert!(delete.is_mutation_without_rows());
        assert!(delete.parameters.is_empty());
    }

    #[test]
    fn test_compile_escapes_identifier_quotes() {
        let compiled = PostgresQueryCompiler.compile(&RawSql::raw("DROP TABLE ").ident("a\"b"));
        assert_eq!(compiled.sql, "DROP TABLE \"a\"\"b\"");
    }

    #[test]
    fn test_postgres_adapter_capabilities() {
        let adapter = PostgresAdapter;
        assert!(adapter.supports_returning());
        assert!(adapter.supports_transactional_ddl());
        assert!(adapter.supports_create_if_not_exists());

        let lock = adapter.migration_lock_query().unwrap();
        assert_eq!(lock.sql, "select pg_advisory_xact_lock(3853314791062309107)");
        assert!(adapter.migration_unlock_query().is_none());
    }
}
