//! Error types for sqlbridge operations.
//!
//! Every error carries a stable code (see [`Error::code`]) so callers that
//! already match on the ORM runtime's request-error codes can keep doing so.

use std::fmt;

/// Code for transaction API errors (no active transaction, aborted transaction).
pub const CODE_TRANSACTION: &str = "P2028";
/// Code for features this bridge does not provide.
pub const CODE_UNSUPPORTED: &str = "P6006";
/// Code for failures reaching the database through the runtime.
pub const CODE_CONNECTION: &str = "P1001";
/// Code for raw query execution failures.
pub const CODE_RAW_QUERY: &str = "P2010";
/// Code for everything else.
pub const CODE_UNKNOWN: &str = "P5000";

/// The primary error type for all sqlbridge operations.
#[derive(Debug)]
pub enum Error {
    /// The runtime could not reach the database
    Connection(ConnectionError),
    /// Raw query execution errors reported by the runtime
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Transaction state errors
    Transaction(TransactionError),
    /// Operation not provided by this bridge
    Unsupported(UnsupportedError),
    /// Configuration errors
    Config(ConfigError),
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct QueryError {
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// Commit or rollback without a matching begin
    NoActiveTransaction,
    /// The transaction was aborted; no further commands are accepted
    Aborted,
    /// The runtime finished before handing out a transaction handle
    NotStarted,
}

#[derive(Debug)]
pub struct UnsupportedError {
    pub message: String,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl Error {
    /// Commit or rollback was requested on a session with no transaction.
    ///
    /// `action` is the verb used in the message, e.g. `"commit"`.
    pub fn no_transaction(action: &str) -> Self {
        Error::Transaction(TransactionError {
            kind: TransactionErrorKind::NoActiveTransaction,
            message: format!("No transaction to {action}"),
        })
    }

    /// The transaction is aborted and cannot accept further commands.
    pub fn transaction_aborted() -> Self {
        Error::Transaction(TransactionError {
            kind: TransactionErrorKind::Aborted,
            message: "Current transaction is aborted, commands ignored until end of transaction block"
                .to_string(),
        })
    }

    /// The named operation is not provided by this bridge.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Error::Unsupported(UnsupportedError {
            message: message.into(),
        })
    }

    /// Stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Transaction(_) => CODE_TRANSACTION,
            Error::Unsupported(_) => CODE_UNSUPPORTED,
            Error::Connection(_) => CODE_CONNECTION,
            Error::Query(_) => CODE_RAW_QUERY,
            Error::Type(_) | Error::Config(_) | Error::Serde(_) | Error::Custom(_) => CODE_UNKNOWN,
        }
    }

    /// Is this a transaction state error?
    pub fn is_transaction_state(&self) -> bool {
        matches!(self, Error::Transaction(_))
    }

    /// Is this an unsupported-operation error?
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported(_))
    }

    /// Transaction error kind, if this is a transaction error.
    pub fn transaction_kind(&self) -> Option<TransactionErrorKind> {
        match self {
            Error::Transaction(t) => Some(t.kind),
            _ => None,
        }
    }

    /// Get SQLSTATE if available (e.g., "23505" for unique violation)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Query error (SQLSTATE {}): {}", sqlstate, e.message)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Transaction(e) => write!(f, "Transaction error [{}]: {}", CODE_TRANSACTION, e),
            Error::Unsupported(e) => write!(f, "Unsupported [{}]: {}", CODE_UNSUPPORTED, e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for UnsupportedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

macro_rules! impl_from_kind {
    ($($kind:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$kind> for Error {
                fn from(err: $kind) -> Self {
                    Error::$variant(err)
                }
            }
        )*
    };
}

impl_from_kind! {
    ConnectionError => Connection,
    QueryError => Query,
    TypeError => Type,
    TransactionError => Transaction,
    UnsupportedError => Unsupported,
    ConfigError => Config,
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for sqlbridge operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_errors_share_code() {
        let commit = Error::no_transaction("commit");
        let aborted = Error::transaction_aborted();

        assert_eq!(commit.code(), "P2028");
        assert_eq!(aborted.code(), "P2028");
        assert_eq!(
            commit.transaction_kind(),
            Some(TransactionErrorKind::NoActiveTransaction)
        );
        assert_eq!(aborted.transaction_kind(), Some(TransactionErrorKind::Aborted));
        assert!(commit.to_string().contains("No transaction to commit"));
        assert!(aborted.to_string().contains("Current transaction is aborted"));
    }

    #[test]
    fn test_unsupported_code() {
        let err = Error::unsupported("streaming is not supported");
        assert!(err.is_unsupported());
        assert!(!err.is_transaction_state());
        assert_eq!(err.code(), "P6006");
        assert_eq!(
            err.to_string(),
            "Unsupported [P6006]: streaming is not supported"
        );
    }

    #[test]
    fn test_sqlstate_helpers() {
        let err = Error::Query(QueryError {
            sql: Some("SELECT 1".to_string()),
            sqlstate: Some("23505".to_string()),
            message: "unique violation".to_string(),
            source: None,
        });

        assert_eq!(err.sqlstate(), Some("23505"));
        assert_eq!(err.sql(), Some("SELECT 1"));
        assert_eq!(err.code(), "P2010");
        assert!(err.transaction_kind().is_none());
    }

    #[test]
    fn test_source_is_exposed() {
        use std::error::Error as _;

        let err = Error::Connection(ConnectionError {
            message: "refused".to_string(),
            source: Some(Box::new(std::io::Error::other("econnrefused"))),
        });
        assert!(err.source().is_some());
        assert_eq!(err.code(), "P1001");
    }
}
