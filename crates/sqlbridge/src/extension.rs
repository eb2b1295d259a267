//! Attaching a query builder to an ORM client.
//!
//! [`BridgeExtension::extend`] wraps a client so it exposes a
//! [`QueryBuilder`] next to the client's own API. Callback transactions
//! started through the wrapper hand the callback a [`TransactionScope`]
//! whose query builder runs on the transaction's handle, so builder
//! queries and ORM queries inside the callback share one transaction.

use asupersync::{Cx, Outcome};
use sqlbridge_core::{
    BoxFuture, Error, RawClient, RawOutput, RawStatement, TransactionBody, TransactionError,
    TransactionErrorKind, TransactionOptions,
};
use sqlbridge_query::{
    Dialect, LogConfig, QueryBuilder, QueryBuilderConfig, QueryPlugin, RawDialect,
};
use sqlbridge_session::Handoff;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Name the extension registers under.
pub const EXTENSION_NAME: &str = "sqlbridge";

/// Settings shared by every query builder an extension creates.
#[derive(Clone, Default)]
pub struct BridgeConfig {
    pub plugins: Vec<Arc<dyn QueryPlugin>>,
    pub log: LogConfig,
    /// Defaults for transactions opened through the bridge
    pub transaction: TransactionOptions,
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn plugin(mut self, plugin: Arc<dyn QueryPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    #[must_use]
    pub fn log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    #[must_use]
    pub fn transaction(mut self, options: TransactionOptions) -> Self {
        self.transaction = options;
        self
    }

    fn builder_config<D: Dialect>(&self, dialect: D) -> QueryBuilderConfig<D> {
        QueryBuilderConfig::new(dialect)
            .plugins(self.plugins.iter().cloned())
            .log(self.log.clone())
    }
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("plugins", &self.plugins.len())
            .field("log", &self.log)
            .field("transaction", &self.transaction)
            .finish()
    }
}

type DialectFactory<D> = Arc<dyn Fn(&Arc<dyn RawClient>) -> D + Send + Sync>;

/// Builds [`ExtendedClient`]s.
///
/// The client-level query builder uses the configured dialect; builders
/// inside callback transactions always use [`RawDialect`] over the
/// transaction handle.
pub struct BridgeExtension<D: Dialect = RawDialect> {
    config: BridgeConfig,
    make_dialect: DialectFactory<D>,
}

impl BridgeExtension<RawDialect> {
    /// Extension whose query builder runs through the extended client.
    pub fn new(config: BridgeConfig) -> Self {
        let options = config.transaction;
        Self {
            config,
            make_dialect: Arc::new(move |client: &Arc<dyn RawClient>| {
                RawDialect::new(Arc::clone(client)).with_options(options)
            }),
        }
    }
}

impl<D: Dialect> BridgeExtension<D> {
    /// Extension whose client-level query builder uses a dialect from
    /// `factory` instead of the raw dialect.
    pub fn with_dialect<F>(config: BridgeConfig, factory: F) -> Self
    where
        F: Fn(&Arc<dyn RawClient>) -> D + Send + Sync + 'static,
    {
        Self {
            config,
            make_dialect: Arc::new(factory),
        }
    }

    pub fn name(&self) -> &'static str {
        EXTENSION_NAME
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Wrap `client`.
    pub fn extend(&self, client: Arc<dyn RawClient>) -> ExtendedClient<D> {
        let dialect = (self.make_dialect)(&client);
        let query_builder = QueryBuilder::new(self.config.builder_config(dialect));
        tracing::debug!(extension = EXTENSION_NAME, "Client extended with query builder");
        ExtendedClient {
            client,
            query_builder,
            config: self.config.clone(),
        }
    }
}

impl<D: Dialect> fmt::Debug for BridgeExtension<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeExtension")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// What a callback transaction receives.
pub struct TransactionScope {
    client: Arc<dyn RawClient>,
    query_builder: QueryBuilder<RawDialect>,
}

impl TransactionScope {
    fn new(client: Arc<dyn RawClient>, config: &BridgeConfig) -> Self {
        let dialect = RawDialect::new(Arc::clone(&client)).with_options(config.transaction);
        Self {
            query_builder: QueryBuilder::new(config.builder_config(dialect)),
            client,
        }
    }

    /// The runtime's transaction handle.
    pub fn client(&self) -> &Arc<dyn RawClient> {
        &self.client
    }

    /// Query builder bound to the transaction handle.
    pub fn query_builder(&self) -> &QueryBuilder<RawDialect> {
        &self.query_builder
    }
}

impl fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionScope").finish_non_exhaustive()
    }
}

/// Callback run inside a runtime transaction, producing `T` on success.
pub type ScopeBody<T> =
    Box<dyn FnOnce(TransactionScope) -> BoxFuture<'static, Outcome<T, Error>> + Send>;

/// The two shapes of transaction the ORM runtime accepts.
pub enum TransactionRequest<T = ()> {
    /// Run a callback; the runtime commits when it returns `Ok`.
    Callback(ScopeBody<T>),
    /// Run statements in order inside one transaction.
    Batch(Vec<RawStatement>),
}

impl<T: Send + 'static> TransactionRequest<T> {
    pub fn callback<F, Fut>(f: F) -> Self
    where
        F: FnOnce(TransactionScope) -> Fut + Send + 'static,
        Fut: Future<Output = Outcome<T, Error>> + Send + 'static,
    {
        Self::Callback(Box::new(move |scope| Box::pin(f(scope))))
    }
}

impl TransactionRequest {
    pub fn batch(statements: impl IntoIterator<Item = RawStatement>) -> Self {
        Self::Batch(statements.into_iter().collect())
    }
}

impl<T> fmt::Debug for TransactionRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionRequest::Callback(_) => f.write_str("Callback(..)"),
            TransactionRequest::Batch(statements) => {
                f.debug_tuple("Batch").field(&statements.len()).finish()
            }
        }
    }
}

/// Result of [`ExtendedClient::transaction`].
#[derive(Debug)]
pub enum TransactionResult<T = ()> {
    /// The runtime committed; carries what the callback returned
    Completed(T),
    /// One output per batch statement
    Batch(Vec<RawOutput>),
}

/// An ORM client with a query builder attached.
pub struct ExtendedClient<D: Dialect = RawDialect> {
    client: Arc<dyn RawClient>,
    query_builder: QueryBuilder<D>,
    config: BridgeConfig,
}

impl<D: Dialect> ExtendedClient<D> {
    /// The wrapped client, for everything the bridge does not intercept.
    pub fn client(&self) -> &Arc<dyn RawClient> {
        &self.client
    }

    /// The client-level query builder.
    pub fn query_builder(&self) -> &QueryBuilder<D> {
        &self.query_builder
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Run a transaction on the runtime.
    ///
    /// Callbacks get a [`TransactionScope`] bound to the transaction handle
    /// and their value is returned once the runtime commits; batches pass
    /// through untouched. `options` falls back to the configured defaults.
    pub async fn transaction<T: Send + 'static>(
        &self,
        cx: &Cx,
        request: TransactionRequest<T>,
        options: Option<TransactionOptions>,
    ) -> Outcome<TransactionResult<T>, Error> {
        let options = options.unwrap_or(self.config.transaction);
        match request {
            TransactionRequest::Callback(callback) => {
                let value = Handoff::new();
                let body = bind_scope(callback, self.config.clone(), value.clone());
                match self.client.transaction(cx, options, body).await {
                    Outcome::Ok(()) => match value.take() {
                        Some(v) => Outcome::Ok(TransactionResult::Completed(v)),
                        None => Outcome::Err(Error::Transaction(TransactionError {
                            kind: TransactionErrorKind::NotStarted,
                            message: "Transaction committed without running its callback"
                                .to_string(),
                        })),
                    },
                    Outcome::Err(e) => Outcome::Err(e),
                    Outcome::Cancelled(r) => Outcome::Cancelled(r),
                    Outcome::Panicked(p) => Outcome::Panicked(p),
                }
            }
            TransactionRequest::Batch(statements) => {
                tracing::debug!(statements = statements.len(), "Running batch transaction");
                match self.client.transaction_batch(cx, statements, options).await {
                    Outcome::Ok(outputs) => Outcome::Ok(TransactionResult::Batch(outputs)),
                    Outcome::Err(e) => Outcome::Err(e),
                    Outcome::Cancelled(r) => Outcome::Cancelled(r),
                    Outcome::Panicked(p) => Outcome::Panicked(p),
                }
            }
        }
    }
}

/// Runtime transaction body running `callback` on a scope over the handle.
/// Its value goes out through `value`; the runtime only sees `()`.
fn bind_scope<T: Send + 'static>(
    callback: ScopeBody<T>,
    config: BridgeConfig,
    value: Handoff<T>,
) -> TransactionBody {
    Box::new(move |tx: Arc<dyn RawClient>| -> BoxFuture<'static, Outcome<(), Error>> {
        tracing::trace!("Binding query builder to transaction handle");
        let run = callback(TransactionScope::new(tx, &config));
        Box::pin(async move {
            match run.await {
                Outcome::Ok(v) => {
                    value.publish(v);
                    Outcome::Ok(())
                }
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        })
    })
}

impl<D: Dialect> fmt::Debug for ExtendedClient<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
