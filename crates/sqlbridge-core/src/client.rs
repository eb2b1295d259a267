//! The ORM runtime's raw-execution surface.
//!
//! [`RawClient`] is what this bridge borrows from the ORM client: two raw
//! execution entry points and the runtime's own transaction machinery. It is
//! object safe (boxed futures) because a transaction hands back a handle of a
//! different concrete type than the client that opened it.

use crate::connection::IsolationLevel;
use crate::error::Error;
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};
use regex::Regex;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, LazyLock};

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The body the runtime runs inside an interactive transaction.
///
/// The runtime passes the transaction-scoped handle; when the returned future
/// resolves `Ok` the runtime commits, otherwise it rolls back.
pub type TransactionBody =
    Box<dyn FnOnce(Arc<dyn RawClient>) -> BoxFuture<'static, Outcome<(), Error>> + Send>;

/// Options for the runtime's interactive transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Isolation level; the database default when `None`
    pub isolation_level: Option<IsolationLevel>,
    /// Maximum time to wait for the runtime to open the transaction
    pub max_wait_ms: u64,
    /// Maximum lifetime of the transaction before the runtime aborts it
    pub timeout_ms: u64,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            isolation_level: None,
            max_wait_ms: 2_000,
            timeout_ms: 5_000,
        }
    }
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation level.
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// Set the open timeout.
    pub fn max_wait(mut self, ms: u64) -> Self {
        self.max_wait_ms = ms;
        self
    }

    /// Set the transaction lifetime.
    pub fn timeout(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// The runtime's spelling of the isolation level, if one was requested.
    pub fn native_isolation_level(&self) -> Option<&'static str> {
        self.isolation_level.map(|level| level.native_name())
    }
}

/// One statement of a batch transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct RawStatement {
    pub sql: String,
    pub params: Vec<Value>,
    /// Run through the row-count path instead of the row path
    pub execute: bool,
}

impl RawStatement {
    /// A row-returning statement.
    pub fn query(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
            execute: false,
        }
    }

    /// A row-count statement.
    pub fn execute(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
            execute: true,
        }
    }
}

/// What the runtime hands back from a raw execution.
#[derive(Debug, Clone)]
pub enum RawOutput {
    /// Rows from the row-returning path
    Rows(Vec<Row>),
    /// Numeric count from the row-count path
    Count(i64),
    /// Count reported as text by some runtimes
    Text(String),
}

static DECIMAL_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?$").expect("valid decimal regex")
});

static RADIX_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^0(?:[xX][0-9a-fA-F]+|[oO][0-7]+|[bB][01]+)$").expect("valid radix regex")
});

impl RawOutput {
    /// Affected-row count, 0 when the output is not numeric.
    ///
    /// Text is read the way a numeric coercion reads it: surrounding
    /// whitespace ignored, empty text is 0, decimal, exponent and
    /// `0x`/`0o`/`0b` literals accepted. Fractions truncate; negative and
    /// non-finite values are 0.
    pub fn affected_rows(&self) -> u64 {
        match self {
            RawOutput::Rows(_) => 0,
            RawOutput::Count(n) => u64::try_from(*n).unwrap_or(0),
            RawOutput::Text(text) => parse_count(text),
        }
    }

    /// Rows carried by this output, empty for counts.
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            RawOutput::Rows(rows) => rows,
            RawOutput::Count(_) | RawOutput::Text(_) => Vec::new(),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn parse_count(text: &str) -> u64 {
    let text = text.trim();
    if text.is_empty() {
        return 0;
    }
    if RADIX_LITERAL.is_match(text) {
        let radix = match text.as_bytes()[1] {
            b'x' | b'X' => 16,
            b'o' | b'O' => 8,
            _ => 2,
        };
        return u64::from_str_radix(&text[2..], radix).unwrap_or(u64::MAX);
    }
    if !DECIMAL_LITERAL.is_match(text) {
        tracing::warn!(count = text, "Non-numeric row count from runtime; reporting 0");
        return 0;
    }
    match text.parse::<f64>() {
        Ok(n) if n.is_finite() && n > 0.0 => n.trunc() as u64,
        _ => {
            tracing::trace!(count = text, "Row count is not a positive finite number");
            0
        }
    }
}

/// Raw-execution capability borrowed from the ORM runtime.
pub trait RawClient: Send + Sync {
    /// Execute SQL through the row-returning path.
    fn query_raw<'a>(
        &'a self,
        cx: &'a Cx,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, Outcome<RawOutput, Error>>;

    /// Execute SQL through the row-count path.
    fn execute_raw<'a>(
        &'a self,
        cx: &'a Cx,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, Outcome<RawOutput, Error>>;

    /// Run `body` inside an interactive transaction.
    ///
    /// The returned future resolves after the runtime committed (body
    /// returned `Ok`) or rolled back. It must not borrow `self` or `cx`:
    /// callers may keep it parked across calls.
    fn transaction(
        &self,
        cx: &Cx,
        options: TransactionOptions,
        body: TransactionBody,
    ) -> BoxFuture<'static, Outcome<(), Error>>;

    /// Run a fixed list of statements in one transaction.
    fn transaction_batch<'a>(
        &'a self,
        cx: &'a Cx,
        statements: Vec<RawStatement>,
        options: TransactionOptions,
    ) -> BoxFuture<'a, Outcome<Vec<RawOutput>, Error>>;
}
