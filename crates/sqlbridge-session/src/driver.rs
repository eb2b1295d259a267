//! Connection factory over an ORM client.

use crate::QuerySession;
use asupersync::{Cx, Outcome};
use sqlbridge_core::{Driver, Error, RawClient, TransactionOptions, TransactionSettings};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Hands out a fresh [`QuerySession`] per acquired connection and forwards
/// transaction boundaries to it.
///
/// Nothing is pooled: the ORM runtime owns the real connections, so init,
/// release and destroy have nothing to do.
#[derive(Clone)]
pub struct RawDriver {
    client: Arc<dyn RawClient>,
    options: TransactionOptions,
}

impl RawDriver {
    pub fn new(client: Arc<dyn RawClient>) -> Self {
        Self::with_options(client, TransactionOptions::default())
    }

    /// Sessions from this driver open transactions with `options`.
    pub fn with_options(client: Arc<dyn RawClient>, options: TransactionOptions) -> Self {
        Self { client, options }
    }

    pub fn client(&self) -> &Arc<dyn RawClient> {
        &self.client
    }

    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }
}

impl Driver for RawDriver {
    type Connection = QuerySession;

    fn init(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        tracing::trace!("Raw driver init");
        async { Outcome::Ok(()) }
    }

    fn acquire_connection(
        &self,
        _cx: &Cx,
    ) -> impl Future<Output = Outcome<QuerySession, Error>> + Send {
        let session = QuerySession::with_options(Arc::clone(&self.client), self.options);
        async move { Outcome::Ok(session) }
    }

    fn begin_transaction(
        &self,
        cx: &Cx,
        conn: &mut QuerySession,
        settings: TransactionSettings,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        conn.begin_transaction(cx, settings)
    }

    fn commit_transaction(
        &self,
        cx: &Cx,
        conn: &mut QuerySession,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        conn.commit_transaction(cx)
    }

    fn rollback_transaction(
        &self,
        cx: &Cx,
        conn: &mut QuerySession,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        conn.rollback_transaction(cx)
    }

    fn release_connection(
        &self,
        _cx: &Cx,
        conn: QuerySession,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        if conn.has_transaction() {
            tracing::warn!("Releasing a connection with an open transaction");
        }
        drop(conn);
        async { Outcome::Ok(()) }
    }

    fn destroy(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        tracing::trace!("Raw driver destroy");
        async { Outcome::Ok(()) }
    }
}

impl fmt::Debug for RawDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawDriver")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
