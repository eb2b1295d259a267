//! Query builder handle.
//!
//! [`QueryBuilder`] owns a dialect's driver, adapter and compiler and runs
//! statements through them: acquire a connection, execute, release. Clones
//! share the same driver. [`ControlledTransaction`] keeps one connection for
//! the lifetime of an explicit transaction.

use crate::dialect::{Dialect, DialectAdapter, QueryCompiler};
use crate::plugin::{LogConfig, LogEvent, QueryPlugin};
use crate::sql::RawSql;
use asupersync::{Cx, Outcome};
use sqlbridge_core::{
    CompiledQuery, ConnectionError, DatabaseConnection, Driver, Error, QueryResult,
    TransactionSettings,
};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Configuration for a [`QueryBuilder`].
pub struct QueryBuilderConfig<D> {
    pub dialect: D,
    pub plugins: Vec<Arc<dyn QueryPlugin>>,
    pub log: LogConfig,
}

impl<D: Dialect> QueryBuilderConfig<D> {
    pub fn new(dialect: D) -> Self {
        Self {
            dialect,
            plugins: Vec::new(),
            log: LogConfig::default(),
        }
    }

    #[must_use]
    pub fn plugin(mut self, plugin: Arc<dyn QueryPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    #[must_use]
    pub fn plugins(mut self, plugins: impl IntoIterator<Item = Arc<dyn QueryPlugin>>) -> Self {
        self.plugins.extend(plugins);
        self
    }

    #[must_use]
    pub fn log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }
}

struct Core<D: Dialect> {
    dialect: D,
    driver: D::Driver,
    adapter: D::Adapter,
    compiler: D::Compiler,
    initialized: AtomicBool,
    destroyed: AtomicBool,
}

/// Executes statements through a dialect's driver.
pub struct QueryBuilder<D: Dialect> {
    core: Arc<Core<D>>,
    plugins: Arc<Vec<Arc<dyn QueryPlugin>>>,
    log: LogConfig,
}

impl<D: Dialect> Clone for QueryBuilder<D> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            plugins: Arc::clone(&self.plugins),
            log: self.log.clone(),
        }
    }
}

impl<D: Dialect> QueryBuilder<D> {
    /// Build the dialect's pieces. The driver is initialized on first use.
    pub fn new(config: QueryBuilderConfig<D>) -> Self {
        let QueryBuilderConfig {
            dialect,
            plugins,
            log,
        } = config;
        let core = Core {
            driver: dialect.create_driver(),
            adapter: dialect.create_adapter(),
            compiler: dialect.create_query_compiler(),
            dialect,
            initialized: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        };
        Self {
            core: Arc::new(core),
            plugins: Arc::new(plugins),
            log,
        }
    }

    pub fn dialect(&self) -> &D {
        &self.core.dialect
    }

    pub fn driver(&self) -> &D::Driver {
        &self.core.driver
    }

    pub fn adapter(&self) -> &D::Adapter {
        &self.core.adapter
    }

    pub fn log_config(&self) -> &LogConfig {
        &self.log
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.core.initialized.load(Ordering::Acquire)
    }

    /// A handle sharing this builder's driver with `plugin` appended.
    #[must_use]
    pub fn with_plugin(&self, plugin: Arc<dyn QueryPlugin>) -> Self {
        let mut plugins = self.plugins.as_ref().clone();
        plugins.push(plugin);
        Self {
            core: Arc::clone(&self.core),
            plugins: Arc::new(plugins),
            log: self.log.clone(),
        }
    }

    /// A handle sharing this builder's driver without any plugins.
    #[must_use]
    pub fn without_plugins(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            plugins: Arc::new(Vec::new()),
            log: self.log.clone(),
        }
    }

    /// Render a template with the dialect's compiler.
    pub fn compile(&self, query: &RawSql) -> CompiledQuery {
        self.core.compiler.compile(query)
    }

    /// Execute one statement on a pooled connection.
    ///
    /// The connection is released whether or not the statement succeeds.
    pub async fn execute(&self, cx: &Cx, compiled: CompiledQuery) -> Outcome<QueryResult, Error> {
        let conn = match self.acquire(cx).await {
            Outcome::Ok(conn) => conn,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let outcome = self.run_on(cx, &conn, compiled).await;
        let released = self.core.driver.release_connection(cx, conn).await;
        finish_release(outcome, released)
    }

    /// Compile and execute a template.
    pub async fn execute_raw_sql(&self, cx: &Cx, query: &RawSql) -> Outcome<QueryResult, Error> {
        self.execute(cx, self.compile(query)).await
    }

    /// Stream a statement in chunks of `chunk_size` rows.
    pub async fn stream(
        &self,
        cx: &Cx,
        compiled: CompiledQuery,
        chunk_size: usize,
    ) -> Outcome<Vec<QueryResult>, Error> {
        let compiled = self.transform_query(compiled);
        let conn = match self.acquire(cx).await {
            Outcome::Ok(conn) => conn,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let outcome = conn.stream_query(cx, &compiled, chunk_size).await;
        let released = self.core.driver.release_connection(cx, conn).await;
        finish_release(outcome, released)
    }

    /// Acquire a connection and open a transaction on it.
    ///
    /// The connection is released again if the transaction cannot be opened.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn start_transaction(
        &self,
        cx: &Cx,
        settings: TransactionSettings,
    ) -> Outcome<ControlledTransaction<D>, Error> {
        let mut conn = match self.acquire(cx).await {
            Outcome::Ok(conn) => conn,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let failed = match self
            .core
            .driver
            .begin_transaction(cx, &mut conn, settings)
            .await
        {
            Outcome::Ok(()) => {
                return Outcome::Ok(ControlledTransaction {
                    db: self.clone(),
                    conn,
                });
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        };

        tracing::debug!("Failed to open transaction; releasing connection");
        let released = self.core.driver.release_connection(cx, conn).await;
        finish_release(failed, released)
    }

    /// The dialect's introspector, querying through this builder.
    pub fn introspection(&self) -> D::Introspector {
        self.core.dialect.create_introspector(self.clone())
    }

    /// Tear the driver down. Later calls fail with a connection error.
    pub async fn destroy(&self, cx: &Cx) -> Outcome<(), Error> {
        if self.core.destroyed.swap(true, Ordering::AcqRel) {
            return Outcome::Ok(());
        }
        if !self.core.initialized.swap(false, Ordering::AcqRel) {
            return Outcome::Ok(());
        }
        tracing::debug!("Destroying query builder driver");
        self.core.driver.destroy(cx).await
    }

    async fn ensure_initialized(&self, cx: &Cx) -> Outcome<(), Error> {
        if self.core.destroyed.load(Ordering::Acquire) {
            return Outcome::Err(Error::Connection(ConnectionError {
                message: "query builder has been destroyed".to_string(),
                source: None,
            }));
        }
        if self.is_initialized() {
            return Outcome::Ok(());
        }

        match self.core.driver.init(cx).await {
            Outcome::Ok(()) => {
                self.core.initialized.store(true, Ordering::Release);
                tracing::trace!("Query builder driver initialized");
                Outcome::Ok(())
            }
            other => other,
        }
    }

    async fn acquire(&self, cx: &Cx) -> Outcome<<D::Driver as Driver>::Connection, Error> {
        match self.ensure_initialized(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        self.core.driver.acquire_connection(cx).await
    }

    fn transform_query(&self, compiled: CompiledQuery) -> CompiledQuery {
        self.plugins
            .iter()
            .fold(compiled, |query, plugin| plugin.transform_query(query))
    }

    fn transform_result(&self, result: QueryResult) -> QueryResult {
        self.plugins
            .iter()
            .fold(result, |result, plugin| plugin.transform_result(result))
    }

    /// Transform, execute, log and transform back on a given connection.
    async fn run_on(
        &self,
        cx: &Cx,
        conn: &<D::Driver as Driver>::Connection,
        compiled: CompiledQuery,
    ) -> Outcome<QueryResult, Error> {
        let compiled = self.transform_query(compiled);
        let start = Instant::now();
        let outcome = conn.execute_query(cx, &compiled).await;
        let duration = start.elapsed();

        match outcome {
            Outcome::Ok(result) => {
                self.log.emit(&LogEvent::Query {
                    sql: &compiled.sql,
                    parameters: &compiled.parameters,
                    duration,
                });
                Outcome::Ok(self.transform_result(result))
            }
            Outcome::Err(error) => {
                self.log.emit(&LogEvent::Error {
                    sql: &compiled.sql,
                    parameters: &compiled.parameters,
                    duration,
                    error: &error,
                });
                Outcome::Err(error)
            }
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}

impl<D: Dialect + fmt::Debug> fmt::Debug for QueryBuilder<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("dialect", &self.core.dialect)
            .field("plugins", &self.plugins.len())
            .field("log", &self.log)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// A transaction holding one connection until commit or rollback.
pub struct ControlledTransaction<D: Dialect> {
    db: QueryBuilder<D>,
    conn: <D::Driver as Driver>::Connection,
}

impl<D: Dialect> ControlledTransaction<D> {
    /// Execute a statement inside the transaction.
    pub async fn execute(&self, cx: &Cx, compiled: CompiledQuery) -> Outcome<QueryResult, Error> {
        self.db.run_on(cx, &self.conn, compiled).await
    }

    pub async fn execute_raw_sql(&self, cx: &Cx, query: &RawSql) -> Outcome<QueryResult, Error> {
        self.execute(cx, self.db.compile(query)).await
    }

    /// Take the dialect's migration lock for the rest of the transaction.
    pub async fn acquire_migration_lock(&self, cx: &Cx) -> Outcome<(), Error> {
        let Some(lock) = self.db.adapter().migration_lock_query() else {
            return Outcome::Ok(());
        };
        match self.conn.execute_query(cx, &lock).await {
            Outcome::Ok(_) => Outcome::Ok(()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    pub fn connection(&self) -> &<D::Driver as Driver>::Connection {
        &self.conn
    }

    /// Commit and release the connection.
    pub async fn commit(mut self, cx: &Cx) -> Outcome<(), Error> {
        let driver = &self.db.core.driver;
        let outcome = driver.commit_transaction(cx, &mut self.conn).await;
        let released = driver.release_connection(cx, self.conn).await;
        finish_release(outcome, released)
    }

    /// Roll back and release the connection.
    pub async fn rollback(mut self, cx: &Cx) -> Outcome<(), Error> {
        let driver = &self.db.core.driver;
        let outcome = driver.rollback_transaction(cx, &mut self.conn).await;
        let released = driver.release_connection(cx, self.conn).await;
        finish_release(outcome, released)
    }
}

impl<D: Dialect> fmt::Debug for ControlledTransaction<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlledTransaction")
            .field("plugins", &self.db.plugins.len())
            .finish_non_exhaustive()
    }
}

/// Keep the statement's outcome unless it succeeded and the release did not.
fn finish_release<T>(outcome: Outcome<T, Error>, released: Outcome<(), Error>) -> Outcome<T, Error> {
    match (outcome, released) {
        (Outcome::Ok(value), Outcome::Ok(())) => Outcome::Ok(value),
        (Outcome::Ok(_), Outcome::Err(e)) => Outcome::Err(e),
        (Outcome::Ok(_), Outcome::Cancelled(r)) => Outcome::Cancelled(r),
        (Outcome::Ok(_), Outcome::Panicked(p)) => Outcome::Panicked(p),
        (failed, Outcome::Err(e)) => {
            tracing::warn!(error = %e, "Failed to release connection");
            failed
        }
        (failed, _) => failed,
    }
}
