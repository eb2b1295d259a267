//! Query plugins and query logging.

use sqlbridge_core::{CompiledQuery, Error, QueryResult, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Hook applied to every statement a query builder executes.
///
/// Plugins run in registration order on the way in and on the way out.
pub trait QueryPlugin: Send + Sync {
    /// Rewrite a compiled statement before it is executed.
    fn transform_query(&self, query: CompiledQuery) -> CompiledQuery {
        query
    }

    /// Rewrite a result before it is handed back.
    fn transform_result(&self, result: QueryResult) -> QueryResult {
        result
    }
}

/// What a query builder reports after each statement.
#[derive(Debug)]
pub enum LogEvent<'a> {
    Query {
        sql: &'a str,
        parameters: &'a [Value],
        duration: Duration,
    },
    Error {
        sql: &'a str,
        parameters: &'a [Value],
        duration: Duration,
        error: &'a Error,
    },
}

type LogSink = Arc<dyn Fn(&LogEvent<'_>) + Send + Sync>;

/// Query logging configuration.
///
/// By default nothing is logged. Enabled events go to `tracing` unless a
/// custom sink is installed.
#[derive(Clone, Default)]
pub struct LogConfig {
    /// Report successful statements
    pub queries: bool,
    /// Report failed statements
    pub errors: bool,
    sink: Option<LogSink>,
}

impl LogConfig {
    /// Log nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Log queries and errors.
    pub fn all() -> Self {
        Self::default().queries(true).errors(true)
    }

    pub fn queries(mut self, enabled: bool) -> Self {
        self.queries = enabled;
        self
    }

    pub fn errors(mut self, enabled: bool) -> Self {
        self.errors = enabled;
        self
    }

    /// Send every event to `sink` instead of `tracing`. Enables both levels.
    pub fn with_sink<F>(sink: F) -> Self
    where
        F: Fn(&LogEvent<'_>) + Send + Sync + 'static,
    {
        Self {
            queries: true,
            errors: true,
            sink: Some(Arc::new(sink)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.queries || self.errors
    }

    pub(crate) fn emit(&self, event: &LogEvent<'_>) {
        let enabled = match event {
            LogEvent::Query { .. } => self.queries,
            LogEvent::Error { .. } => self.errors,
        };
        if !enabled {
            return;
        }
        if let Some(sink) = &self.sink {
            sink(event);
            return;
        }
        match event {
            LogEvent::Query {
                sql,
                parameters,
                duration,
            } => tracing::debug!(
                sql = %sql,
                params = parameters.len(),
                duration_ms = duration.as_secs_f64() * 1000.0,
                "Query executed"
            ),
            LogEvent::Error {
                sql,
                parameters,
                duration,
                error,
            } => tracing::error!(
                sql = %sql,
                params = parameters.len(),
                duration_ms = duration.as_secs_f64() * 1000.0,
                error = %error,
                "Query failed"
            ),
        }
    }
}

impl fmt::Debug for LogConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogConfig")
            .field("queries", &self.queries)
            .field("errors", &self.errors)
            .field("custom_sink", &self.sink.is_some())
            .finish()
    }
}
