//! Query sessions over an ORM runtime's raw execution paths.
//!
//! `sqlbridge-session` is the **transaction bridge layer**. The ORM runtime
//! only offers "run this body inside a transaction"; a query builder wants
//! `begin` now and `commit` later, from separate calls. [`QuerySession`]
//! reconciles the two:
//!
//! - `begin_transaction` opens the runtime transaction with a body that hands
//!   back the transaction handle and then parks on a [`SessionLock`].
//! - While parked, the handle is wrapped in a child session and every
//!   `execute_query` on the parent runs on it.
//! - `commit_transaction` releases the lock; the body returns and the runtime
//!   commits natively. The parked runtime future is driven to completion so
//!   its commit outcome reaches the caller.
//! - `rollback_transaction` cannot be delivered to a parked body and always
//!   fails with the abort error.
//!
//! [`RawDriver`] is the connection factory handing out one session per
//! acquired connection.

pub mod driver;
pub mod lock;

pub use driver::RawDriver;
pub use lock::{Handoff, SessionLock, Wait};

use asupersync::{Cx, Outcome};
use sqlbridge_core::{
    BoxFuture, CompiledQuery, DatabaseConnection, Error, QueryResult, RawClient,
    TransactionBody, TransactionError, TransactionErrorKind, TransactionOptions,
    TransactionSettings,
};
use std::fmt;
use std::future::{Future, poll_fn};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::Poll;

/// Runtime transaction future kept parked between begin and commit.
type ParkedTransaction = BoxFuture<'static, Outcome<(), Error>>;

struct ChildTransaction {
    session: Box<QuerySession>,
    // Mutex only to keep the session `Sync`; always reached through `&mut`.
    parked: Mutex<Option<ParkedTransaction>>,
}

impl ChildTransaction {
    fn into_parked(self) -> Option<ParkedTransaction> {
        self.parked
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A logical connection executing through a runtime handle.
///
/// The outer session wraps the ORM client itself; a child session wraps the
/// handle of an open runtime transaction. At most one child exists at a time.
pub struct QuerySession {
    client: Arc<dyn RawClient>,
    options: TransactionOptions,
    lock: SessionLock,
    child: Option<ChildTransaction>,
}

impl QuerySession {
    /// Create a session with default transaction options.
    pub fn new(client: Arc<dyn RawClient>) -> Self {
        Self::with_options(client, TransactionOptions::default())
    }

    /// Create a session whose transactions use `options` unless the begin
    /// settings override the isolation level.
    pub fn with_options(client: Arc<dyn RawClient>, options: TransactionOptions) -> Self {
        Self {
            client,
            options,
            lock: SessionLock::new(),
            child: None,
        }
    }

    /// The runtime handle this session executes on.
    pub fn client(&self) -> &Arc<dyn RawClient> {
        &self.client
    }

    /// Transaction options applied on begin.
    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    /// Whether a transaction is open on this session.
    pub fn has_transaction(&self) -> bool {
        self.child.is_some()
    }

    /// Number of nested sessions queries currently pass through.
    pub fn transaction_depth(&self) -> usize {
        self.child
            .as_ref()
            .map_or(0, |child| 1 + child.session.transaction_depth())
    }

    /// The open transaction's session, if any.
    pub fn transaction_session(&self) -> Option<&QuerySession> {
        self.child.as_ref().map(|child| child.session.as_ref())
    }

    /// Execute a compiled statement.
    ///
    /// Delegates to the open transaction if there is one. Mutations without
    /// RETURNING go through the runtime's row-count path, everything else
    /// through the row path.
    pub fn execute<'a>(
        &'a self,
        cx: &'a Cx,
        compiled: &'a CompiledQuery,
    ) -> BoxFuture<'a, Outcome<QueryResult, Error>> {
        Box::pin(async move {
            if let Some(child) = &self.child {
                return child.session.execute(cx, compiled).await;
            }

            let execute = compiled.is_mutation_without_rows();
            tracing::trace!(sql = %compiled.sql, execute, "Executing raw statement");
            let output = if execute {
                self.client
                    .execute_raw(cx, &compiled.sql, &compiled.parameters)
                    .await
            } else {
                self.client
                    .query_raw(cx, &compiled.sql, &compiled.parameters)
                    .await
            };

            match output {
                Outcome::Ok(output) => {
                    let num_affected_rows = output.affected_rows();
                    Outcome::Ok(QueryResult {
                        rows: output.into_rows(),
                        num_affected_rows,
                        insert_id: None,
                    })
                }
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        })
    }

    /// Open a transaction, or keep the one already open.
    ///
    /// Resolves once the runtime has handed out its transaction handle; the
    /// runtime's body stays parked until commit. Fails if the runtime ends the
    /// transaction before handing out a handle.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn begin_transaction(
        &mut self,
        cx: &Cx,
        settings: TransactionSettings,
    ) -> Outcome<(), Error> {
        if self.child.is_some() {
            tracing::debug!("Transaction already open; reusing it");
            return Outcome::Ok(());
        }

        let mut options = self.options;
        if settings.isolation_level.is_some() {
            options.isolation_level = settings.isolation_level;
        }

        let handoff: Handoff<QuerySession> = Handoff::new();
        let publisher = handoff.clone();
        let lock = self.lock.clone();
        let child_options = self.options;
        let body: TransactionBody = Box::new(move |tx: Arc<dyn RawClient>| {
            Box::pin(async move {
                let parked = lock.wait();
                publisher.publish(QuerySession::with_options(tx, child_options));
                parked.await;
                Outcome::Ok(())
            })
        });

        let mut parked = self.client.transaction(cx, options, body);
        let published = poll_fn(|task_cx| {
            if let Poll::Ready(session) = handoff.poll_take(task_cx) {
                return Poll::Ready(Ok(session));
            }
            match parked.as_mut().poll(task_cx) {
                Poll::Ready(outcome) => Poll::Ready(Err(outcome)),
                Poll::Pending => handoff.poll_take(task_cx).map(Ok),
            }
        })
        .await;

        let session = match published {
            Ok(session) => session,
            Err(Outcome::Ok(())) => {
                return Outcome::Err(Error::Transaction(TransactionError {
                    kind: TransactionErrorKind::NotStarted,
                    message: "Transaction ended before its handle was handed out".to_string(),
                }));
            }
            Err(Outcome::Err(e)) => {
                tracing::debug!(error = %e, "Runtime failed to open transaction");
                return Outcome::Err(e);
            }
            Err(Outcome::Cancelled(r)) => return Outcome::Cancelled(r),
            Err(Outcome::Panicked(p)) => return Outcome::Panicked(p),
        };

        tracing::debug!(
            isolation = options.native_isolation_level(),
            timeout_ms = options.timeout_ms,
            "Transaction opened"
        );
        self.child = Some(ChildTransaction {
            session: Box::new(session),
            parked: Mutex::new(Some(parked)),
        });
        Outcome::Ok(())
    }

    /// Let the parked runtime body return so the runtime commits.
    ///
    /// The transaction is cleared before anything else happens, so the session
    /// is usable again whatever the runtime reports.
    #[tracing::instrument(level = "debug", skip(self, _cx))]
    pub async fn commit_transaction(&mut self, _cx: &Cx) -> Outcome<(), Error> {
        let Some(child) = self.child.take() else {
            return Outcome::Err(Error::no_transaction("commit"));
        };

        self.lock.signal_continue();
        let Some(parked) = child.into_parked() else {
            return Outcome::Ok(());
        };

        let outcome = parked.await;
        match &outcome {
            Outcome::Ok(()) => tracing::debug!("Transaction committed"),
            Outcome::Err(e) => tracing::warn!(error = %e, "Runtime failed to commit transaction"),
            Outcome::Cancelled(_) | Outcome::Panicked(_) => {
                tracing::warn!("Transaction commit did not complete");
            }
        }
        outcome
    }

    /// Roll back the open transaction.
    ///
    /// Always fails: the parked body cannot be made to fail from outside, so
    /// the abort error is returned. The transaction is cleared regardless and
    /// the parked runtime future dropped, leaving cleanup to the runtime's own
    /// cancellation and timeout handling.
    #[tracing::instrument(level = "debug", skip(self, _cx))]
    pub async fn rollback_transaction(&mut self, _cx: &Cx) -> Outcome<(), Error> {
        let Some(child) = self.child.take() else {
            return Outcome::Err(Error::no_transaction("rollback"));
        };

        let result = self.lock.signal_abort();
        drop(child);
        match result {
            Ok(()) => Outcome::Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "Rollback is not supported by the transaction bridge");
                Outcome::Err(e)
            }
        }
    }

    /// Streaming is not provided; always fails with `Unsupported`.
    pub fn stream(
        &self,
        compiled: &CompiledQuery,
        chunk_size: usize,
    ) -> Outcome<Vec<QueryResult>, Error> {
        tracing::debug!(sql = %compiled.sql, chunk_size, "Streaming requested");
        Outcome::Err(Error::unsupported(
            "streaming is not supported by the raw query bridge",
        ))
    }
}

impl DatabaseConnection for QuerySession {
    fn execute_query(
        &self,
        cx: &Cx,
        compiled: &CompiledQuery,
    ) -> impl Future<Output = Outcome<QueryResult, Error>> + Send {
        async move { self.execute(cx, compiled).await }
    }

    fn stream_query(
        &self,
        _cx: &Cx,
        compiled: &CompiledQuery,
        chunk_size: usize,
    ) -> impl Future<Output = Outcome<Vec<QueryResult>, Error>> + Send {
        let outcome = self.stream(compiled, chunk_size);
        async move { outcome }
    }
}

impl fmt::Debug for QuerySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySession")
            .field("options", &self.options)
            .field("lock", &self.lock)
            .field("transaction_depth", &self.transaction_depth())
            .finish_non_exhaustive()
    }
}
