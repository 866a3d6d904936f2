//! Error types for DocModel operations.

use std::fmt;

/// The primary error type for all DocModel operations.
#[derive(Debug)]
pub enum Error {
    /// Schema mismatches found while compiling expressions
    Schema(SchemaError),
    /// Lazy access to a field excluded by the projection
    Access(AccessError),
    /// Terminal query operations with the wrong number of results
    Result(ResultError),
    /// Operations attempted in the wrong session state
    Session(SessionError),
    /// Write submission and acknowledgement errors
    Write(WriteError),
    /// Malformed or ambiguous query construction
    Query(QueryError),
    /// Custom error with message
    Custom(String),
}

/// A schema mismatch discovered during expression compilation.
///
/// These indicate a programming error (querying a field the class does not
/// declare, or comparing against a value the field cannot hold) and are
/// never retried.
#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    /// The document class the path was resolved against.
    pub class: &'static str,
    /// The offending dotted path.
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// A path segment does not exist on the class or any subclass
    FieldNotFound,
    /// A comparison or assignment value failed the field's validation
    BadValue,
}

/// Raised when a field excluded by the query projection is accessed on a
/// materialized instance.
///
/// Recoverable by re-querying with a fuller projection; nothing is
/// re-fetched automatically.
#[derive(Debug)]
pub struct AccessError {
    pub class: &'static str,
    pub field: String,
}

/// Raised by terminal query operations (`one`, `first`).
#[derive(Debug)]
pub struct ResultError {
    pub kind: ResultErrorKind,
    pub collection: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultErrorKind {
    /// The query matched zero documents
    NoResult,
    /// The query matched two or more documents when exactly one was required
    MultipleResults,
}

/// Raised when an operation is attempted on a session in the wrong state.
#[derive(Debug)]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    /// The session has ended; no further operations may be queued
    Ended,
}

/// A write submission failure surfaced from flush.
#[derive(Debug)]
pub struct WriteError {
    pub kind: WriteErrorKind,
    /// Queue position of the offending operation, when flushing a batch.
    pub op_index: Option<usize>,
    /// Collection the write targeted.
    pub collection: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteErrorKind {
    /// The database did not acknowledge the write
    BadResult,
    /// An update compiled with zero accumulated operators
    EmptyUpdate,
}

/// A query that is not well-formed or is ambiguous.
#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    /// The path involved, when the error concerns a specific field.
    pub path: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// The combinators were used in a way that cannot compile
    BadQuery,
    /// A plain dotted-path condition or update crossed an elem-match
    /// restricted projection
    AmbiguousProjection,
}

impl Error {
    /// A path segment does not exist on `class` or any of its subclasses.
    pub fn field_not_found(class: &'static str, path: impl Into<String>) -> Self {
        let path = path.into();
        Error::Schema(SchemaError {
            kind: SchemaErrorKind::FieldNotFound,
            class,
            message: format!("'{path}' is not a field on {class} or its subclasses"),
            path,
        })
    }

    /// A value failed the target field's validation.
    pub fn bad_value(class: &'static str, path: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::Schema(SchemaError {
            kind: SchemaErrorKind::BadValue,
            class,
            path: path.into(),
            message: detail.into(),
        })
    }

    /// A field excluded by the projection was accessed.
    pub fn field_not_retrieved(class: &'static str, field: impl Into<String>) -> Self {
        Error::Access(AccessError {
            class,
            field: field.into(),
        })
    }

    pub fn no_result(collection: impl Into<String>) -> Self {
        Error::Result(ResultError {
            kind: ResultErrorKind::NoResult,
            collection: collection.into(),
        })
    }

    pub fn multiple_results(collection: impl Into<String>) -> Self {
        Error::Result(ResultError {
            kind: ResultErrorKind::MultipleResults,
            collection: collection.into(),
        })
    }

    pub fn session_ended() -> Self {
        Error::Session(SessionError {
            kind: SessionErrorKind::Ended,
            message: "session has ended; no further operations may be queued".to_string(),
        })
    }

    pub fn bad_result(
        op_index: Option<usize>,
        collection: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Error::Write(WriteError {
            kind: WriteErrorKind::BadResult,
            op_index,
            collection: collection.into(),
            message: detail.into(),
        })
    }

    pub fn empty_update(collection: impl Into<String>) -> Self {
        Error::Write(WriteError {
            kind: WriteErrorKind::EmptyUpdate,
            op_index: None,
            collection: collection.into(),
            message: "update compiled with zero operators; an empty update document \
                      would replace the whole document"
                .to_string(),
        })
    }

    pub fn bad_query(path: Option<String>, detail: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind: QueryErrorKind::BadQuery,
            path,
            message: detail.into(),
        })
    }

    pub fn ambiguous_projection(path: impl Into<String>) -> Self {
        let path = path.into();
        Error::Query(QueryError {
            kind: QueryErrorKind::AmbiguousProjection,
            message: format!(
                "'{path}' is restricted by an $elemMatch projection; the database \
                 returns only the matched element, so a plain dotted-path operation \
                 on it is ambiguous"
            ),
            path: Some(path),
        })
    }

    /// Is this a schema mismatch (programming error, never retried)?
    pub fn is_schema_error(&self) -> bool {
        matches!(self, Error::Schema(_))
    }

    /// Is this an expected control-flow outcome of a terminal query
    /// operation (`NoResult`, `MultipleResults`)?
    pub fn is_result_error(&self) -> bool {
        matches!(self, Error::Result(_))
    }

    /// Did a projection-excluded field get accessed?
    pub fn is_field_not_retrieved(&self) -> bool {
        matches!(self, Error::Access(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Schema(e) => write!(f, "Schema error: {}", e),
            Error::Access(e) => write!(f, "Access error: {}", e),
            Error::Result(e) => write!(f, "Result error: {}", e),
            Error::Session(e) => write!(f, "Session error: {}", e),
            Error::Write(e) => write!(f, "Write error: {}", e),
            Error::Query(e) => write!(f, "Query error: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SchemaErrorKind::FieldNotFound => write!(f, "{}", self.message),
            SchemaErrorKind::BadValue => {
                write!(f, "bad value for {}.{}: {}", self.class, self.path, self.message)
            }
        }
    }
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "field '{}' on {} was not retrieved by the query projection",
            self.field, self.class
        )
    }
}

impl fmt::Display for ResultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ResultErrorKind::NoResult => {
                write!(f, "no result found in '{}'", self.collection)
            }
            ResultErrorKind::MultipleResults => {
                write!(
                    f,
                    "multiple results found in '{}' where exactly one was required",
                    self.collection
                )
            }
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op_index {
            Some(idx) => write!(
                f,
                "operation #{} on '{}': {}",
                idx, self.collection, self.message
            ),
            None => write!(f, "'{}': {}", self.collection, self.message),
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<SchemaError> for Error {
    fn from(e: SchemaError) -> Self {
        Error::Schema(e)
    }
}

impl From<AccessError> for Error {
    fn from(e: AccessError) -> Self {
        Error::Access(e)
    }
}

impl From<ResultError> for Error {
    fn from(e: ResultError) -> Self {
        Error::Result(e)
    }
}

impl From<SessionError> for Error {
    fn from(e: SessionError) -> Self {
        Error::Session(e)
    }
}

impl From<WriteError> for Error {
    fn from(e: WriteError) -> Self {
        Error::Write(e)
    }
}

impl From<QueryError> for Error {
    fn from(e: QueryError) -> Self {
        Error::Query(e)
    }
}

/// Result type alias for DocModel operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_not_found_names_class_and_path() {
        let err = Error::field_not_found("Person", "adress.city");
        assert!(err.is_schema_error());
        let msg = err.to_string();
        assert!(msg.contains("Person"), "got: {msg}");
        assert!(msg.contains("adress.city"), "got: {msg}");
    }

    #[test]
    fn bad_result_names_op_index() {
        let err = Error::bad_result(Some(3), "people", "write not acknowledged");
        let msg = err.to_string();
        assert!(msg.contains("#3"), "got: {msg}");
        assert!(msg.contains("people"), "got: {msg}");
    }

    #[test]
    fn result_errors_are_distinct_and_recoverable() {
        let none = Error::no_result("people");
        let many = Error::multiple_results("people");
        assert!(none.is_result_error());
        assert!(many.is_result_error());
        assert!(matches!(
            none,
            Error::Result(ResultError {
                kind: ResultErrorKind::NoResult,
                ..
            })
        ));
        assert!(matches!(
            many,
            Error::Result(ResultError {
                kind: ResultErrorKind::MultipleResults,
                ..
            })
        ));
    }

    #[test]
    fn ambiguous_projection_mentions_elem_match() {
        let err = Error::ambiguous_projection("tags");
        assert!(err.to_string().contains("$elemMatch"));
    }
}
