//! Raw SQL templates.
//!
//! A [`RawSql`] is a list of fragments: literal text, bound parameters and
//! identifiers. Nothing here parses SQL; the statement kind is declared by
//! whoever builds the template and decides which runtime path executes it.

use sqlbridge_core::{StatementKind, Value};

/// One piece of a SQL template.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlFragment {
    /// Emitted verbatim
    Text(String),
    /// Bound parameter, rendered as a placeholder
    Param(Value),
    /// Identifier, quoted per dialect. Dots separate qualified parts.
    Ident(String),
}

/// A SQL statement assembled from fragments.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSql {
    fragments: Vec<SqlFragment>,
    kind: StatementKind,
    returning: bool,
}

impl RawSql {
    /// Start an empty template of the given kind.
    pub fn new(kind: StatementKind) -> Self {
        Self {
            fragments: Vec::new(),
            kind,
            returning: false,
        }
    }

    /// Template whose result shape is unknown; always runs on the row path.
    pub fn raw(text: impl Into<String>) -> Self {
        Self::new(StatementKind::Raw).text(text)
    }

    pub fn select(text: impl Into<String>) -> Self {
        Self::new(StatementKind::Select).text(text)
    }

    pub fn insert(text: impl Into<String>) -> Self {
        Self::new(StatementKind::Insert).text(text)
    }

    pub fn update(text: impl Into<String>) -> Self {
        Self::new(StatementKind::Update).text(text)
    }

    pub fn delete(text: impl Into<String>) -> Self {
        Self::new(StatementKind::Delete).text(text)
    }

    /// Append literal SQL text.
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if !text.is_empty() {
            self.fragments.push(SqlFragment::Text(text));
        }
        self
    }

    /// Append a bound parameter.
    #[must_use]
    pub fn param(mut self, value: impl Into<Value>) -> Self {
        self.fragments.push(SqlFragment::Param(value.into()));
        self
    }

    /// Append an identifier such as `users` or `public.users`.
    #[must_use]
    pub fn ident(mut self, name: impl Into<String>) -> Self {
        self.fragments.push(SqlFragment::Ident(name.into()));
        self
    }

    /// Append a comma separated parameter list.
    #[must_use]
    pub fn params<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.fragments.push(SqlFragment::Text(", ".to_string()));
            }
            self.fragments.push(SqlFragment::Param(value.into()));
        }
        self
    }

    /// Mark the statement as producing rows (e.g. a RETURNING clause).
    #[must_use]
    pub fn returning(mut self) -> Self {
        self.returning = true;
        self
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn has_returning(&self) -> bool {
        self.returning
    }

    pub fn fragments(&self) -> &[SqlFragment] {
        &self.fragments
    }

    /// Number of bound parameters.
    pub fn param_count(&self) -> usize {
        self.fragments
            .iter()
            .filter(|f| matches!(f, SqlFragment::Param(_)))
            .count()
    }
}

/// Quote an identifier with double quotes, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote each dot separated part of a possibly qualified identifier.
pub fn quote_qualified(name: &str) -> String {
    name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}
