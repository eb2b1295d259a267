//! Schema introspection.
//!
//! Catalog queries are issued through a [`QueryBuilder`], so they run over
//! whatever driver the dialect provides, the ORM bridge included.

use crate::builder::QueryBuilder;
use crate::dialect::Dialect;
use crate::sql::RawSql;
use asupersync::{Cx, Outcome};
use sqlbridge_core::{Error, Row};
use std::future::Future;

/// Tables created by the migration runner itself.
pub const MIGRATION_TABLE: &str = "sqlbridge_migration";
pub const MIGRATION_LOCK_TABLE: &str = "sqlbridge_migration_lock";

/// A database schema (namespace).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMetadata {
    pub name: String,
}

/// A table or view and its columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    pub name: String,
    pub schema: Option<String>,
    pub is_view: bool,
    pub columns: Vec<ColumnMetadata>,
}

impl TableMetadata {
    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub name: String,
    /// Type name as the catalog reports it (e.g. `int4`, `text`)
    pub data_type: String,
    /// Schema of the type, for user-defined types
    pub data_type_schema: Option<String>,
    pub is_nullable: bool,
    /// Backed by a sequence or identity
    pub is_auto_incrementing: bool,
    pub has_default_value: bool,
    pub comment: Option<String>,
}

/// Options for [`DatabaseIntrospector::get_tables`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IntrospectOptions {
    /// Include the migration runner's own tables
    pub with_migration_tables: bool,
}

impl IntrospectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_migration_tables(mut self, include: bool) -> Self {
        self.with_migration_tables = include;
        self
    }
}

/// Reads schema metadata from a live database.
pub trait DatabaseIntrospector: Send + Sync {
    fn get_schemas(&self, cx: &Cx) -> impl Future<Output = Outcome<Vec<SchemaMetadata>, Error>> + Send;

    fn get_tables(
        &self,
        cx: &Cx,
        options: IntrospectOptions,
    ) -> impl Future<Output = Outcome<Vec<TableMetadata>, Error>> + Send;
}

const SCHEMAS_SQL: &str = "SELECT nspname FROM pg_catalog.pg_namespace \
     WHERE nspname !~ '^pg_' AND nspname <> 'information_schema' \
     ORDER BY nspname";

const COLUMNS_SQL: &str = "SELECT
        a.attname AS column_name,
        a.attnotnull AS not_null,
        a.atthasdef AS has_default,
        c.relname AS table_name,
        c.relkind AS table_type,
        ns.nspname AS table_schema,
        typ.typname AS data_type,
        dtns.nspname AS type_schema,
        col_description(a.attrelid, a.attnum) AS column_comment,
        pg_get_serial_sequence(quote_ident(ns.nspname) || '.' || quote_ident(c.relname), a.attname) AS auto_incrementing,
        a.attidentity AS identity
    FROM pg_catalog.pg_attribute AS a
    INNER JOIN pg_catalog.pg_class AS c ON a.attrelid = c.oid
    INNER JOIN pg_catalog.pg_namespace AS ns ON c.relnamespace = ns.oid
    INNER JOIN pg_catalog.pg_type AS typ ON a.atttypid = typ.oid
    INNER JOIN pg_catalog.pg_namespace AS dtns ON dtns.oid = typ.typnamespace
    WHERE c.relkind IN ('r', 'v', 'p')
        AND ns.nspname !~ '^pg_'
        AND ns.nspname <> 'information_schema'
        AND a.attnum >= 0
        AND a.attisdropped <> true";

/// PostgreSQL catalog introspection.
pub struct PostgresIntrospector<D: Dialect> {
    db: QueryBuilder<D>,
}

impl<D: Dialect> PostgresIntrospector<D> {
    pub fn new(db: QueryBuilder<D>) -> Self {
        Self { db }
    }

    fn columns_query(options: IntrospectOptions) -> RawSql {
        let query = RawSql::select(COLUMNS_SQL);
        let query = if options.with_migration_tables {
            query
        } else {
            query
                .text(" AND c.relname NOT IN (")
                .params([MIGRATION_TABLE, MIGRATION_LOCK_TABLE])
                .text(")")
        };
        query.text(" ORDER BY ns.nspname, c.relname, a.attnum")
    }
}

impl<D: Dialect> DatabaseIntrospector for PostgresIntrospector<D> {
    fn get_schemas(&self, cx: &Cx) -> impl Future<Output = Outcome<Vec<SchemaMetadata>, Error>> + Send {
        async move {
            let result = match self.db.execute_raw_sql(cx, &RawSql::select(SCHEMAS_SQL)).await {
                Outcome::Ok(result) => result,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };

            let schemas = result
                .rows
                .iter()
                .filter_map(|row| row.get_named::<String>("nspname").ok())
                .map(|name| SchemaMetadata { name })
                .collect();
            Outcome::Ok(schemas)
        }
    }

    fn get_tables(
        &self,
        cx: &Cx,
        options: IntrospectOptions,
    ) -> impl Future<Output = Outcome<Vec<TableMetadata>, Error>> + Send {
        async move {
            let query = Self::columns_query(options);
            let result = match self.db.execute_raw_sql(cx, &query).await {
                Outcome::Ok(result) => result,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            Outcome::Ok(parse_tables(&result.rows))
        }
    }
}

/// Group column rows (ordered by schema, table) into tables.
fn parse_tables(rows: &[Row]) -> Vec<TableMetadata> {
    let mut tables: Vec<TableMetadata> = Vec::new();

    for row in rows {
        let Ok(table_name) = row.get_named::<String>("table_name") else {
            continue;
        };
        let Ok(column_name) = row.get_named::<String>("column_name") else {
            continue;
        };
        let schema = row.get_named::<Option<String>>("table_schema").ok().flatten();
        let table_type = row.get_named::<String>("table_type").unwrap_or_default();

        let same_table = tables
            .last()
            .is_some_and(|t| t.name == table_name && t.schema == schema);
        if !same_table {
            tables.push(TableMetadata {
                name: table_name,
                schema,
                is_view: table_type == "v",
                columns: Vec::new(),
            });
        }

        let serial = row
            .get_named::<Option<String>>("auto_incrementing")
            .ok()
            .flatten()
            .is_some();
        let identity = row
            .get_named::<Option<String>>("identity")
            .ok()
            .flatten()
            .is_some_and(|s| !s.is_empty());

        let column = ColumnMetadata {
            name: column_name,
            data_type: row.get_named::<String>("data_type").unwrap_or_default(),
            data_type_schema: row.get_named::<Option<String>>("type_schema").ok().flatten(),
            is_nullable: !row.get_named::<bool>("not_null").unwrap_or(false),
            is_auto_incrementing: serial || identity,
            has_default_value: row.get_named::<bool>("has_default").unwrap_or(false),
            comment: row
                .get_named::<Option<String>>("column_comment")
                .ok()
                .flatten()
                .filter(|s| !s.is_empty()),
        };
        if let Some(table) = tables.last_mut() {
            table.columns.push(column);
        }
    }

    tables
}
