use thiserror::Error;

/// Top-level error for everything relq does.
#[derive(Debug, Error)]
pub enum Error {
    /// Programmer or configuration error caught before any I/O
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// Normalized database error
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// No rows returned when at least one was expected
    #[error("No rows found")]
    NotFound,

    /// A single-row operation matched more than one row
    #[error("Expected at most one row, got {count}")]
    MoreThanOneRow { count: usize },

    /// Error with transaction state
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Error mapping result data
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Error raised by a lifecycle hook
    #[error("Hook error: {0}")]
    Hook(String),
}

impl Error {
    /// True when the error is a connection failure eligible for retry.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Query(err) if err.is_connection_error())
    }

    pub fn query_error(&self) -> Option<&QueryError> {
        match self {
            Error::Query(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type for relq operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors detected while compiling a query or resolving the relation graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("value() requires exactly one selected expression, found {count}")]
    ValueWithMultipleColumns { count: usize },

    #[error("pluck() requires exactly one selected expression, found {count}")]
    PluckWithMultipleColumns { count: usize },

    #[error("unknown table `{0}`")]
    UnknownTable(String),

    #[error("table `{0}` is registered more than once")]
    DuplicateTable(String),

    #[error("unknown column `{column}` on table `{table}`")]
    UnknownColumn { table: String, column: String },

    #[error("unknown relation `{relation}` on table `{table}`")]
    UnknownRelation { table: String, relation: String },

    #[error("unresolved relations: {}", .0.join(", "))]
    UnresolvedRelation(Vec<String>),

    #[error("cyclic through chain: {}", .0.join(" -> "))]
    CyclicThrough(Vec<String>),

    #[error("relation `{relation}` on `{table}` matches {candidates} target tables named `{target}`")]
    AmbiguousRelationTarget {
        table: String,
        relation: String,
        target: String,
        candidates: usize,
    },

    #[error("upsert and orCreate require a single-row query (find, find_by or take)")]
    UpsertRequiresSingleRow,

    #[error("write to `{0}` has no values")]
    EmptyInsert(String),

    #[error("batch rows do not share the same columns: expected {expected:?}, found {found:?}")]
    MismatchedBatchColumns {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("required relation `{relation}` on `{table}` was not provided")]
    MissingRequiredRelation { table: String, relation: String },

    #[error("invalid SQL template: {0}")]
    InvalidTemplate(String),

    #[error("nested {operation} is not supported for relation `{relation}`")]
    NestedWriteUnsupported {
        relation: String,
        operation: &'static str,
    },

    #[error("{0} without a WHERE clause; call all() to affect every row")]
    UnconditionalMutation(&'static str),
}

/// Classification of a [`QueryError`] by SQLSTATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    UniqueViolation,
    ForeignKeyViolation,
    NotNullViolation,
    CheckViolation,
    SerializationFailure,
    ConnectionRefused,
    Other,
}

/// A database error normalized across drivers.
///
/// Drivers fill in whatever fields they can; everything except `message` is
/// best-effort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct QueryError {
    pub message: String,
    pub code: Option<String>,
    pub severity: Option<String>,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub datatype: Option<String>,
    pub constraint: Option<String>,
    pub position: Option<u32>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub routine: Option<String>,
}

impl QueryError {
    /// SQLSTATE used for failures to establish a connection.
    pub const CONNECTION_FAILURE: &'static str = "08001";

    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// A connection-establishment failure.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(message).with_code(Self::CONNECTION_FAILURE)
    }

    pub fn kind(&self) -> QueryErrorKind {
        match self.code.as_deref() {
            Some("23505") => QueryErrorKind::UniqueViolation,
            Some("23503") => QueryErrorKind::ForeignKeyViolation,
            Some("23502") => QueryErrorKind::NotNullViolation,
            Some("23514") => QueryErrorKind::CheckViolation,
            Some("40001") => QueryErrorKind::SerializationFailure,
            Some(code) if code.starts_with("08") => QueryErrorKind::ConnectionRefused,
            _ => QueryErrorKind::Other,
        }
    }

    pub fn is_connection_error(&self) -> bool {
        self.kind() == QueryErrorKind::ConnectionRefused
    }
}
