//! The database driver collaborator trait.
//!
//! The session layer never talks to a driver outside this narrow surface;
//! connection pooling, wire protocol, and server selection all live behind
//! it.

use crate::error::Result;
use crate::value::{Doc, Value};

/// Sort direction for one sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    /// Wire representation (1 ascending, -1 descending).
    pub const fn as_int(self) -> i32 {
        match self {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        }
    }
}

/// Options accompanying a find call.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Projection document (wire field -> include/exclude/elem-match).
    pub projection: Option<Doc>,
    /// Ordered sort keys (wire field, direction).
    pub sort: Vec<(String, SortOrder)>,
    /// Documents to skip before yielding.
    pub skip: Option<u64>,
    /// Maximum documents to yield.
    pub limit: Option<u64>,
}

/// Acknowledgement returned by mutating driver calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteAck {
    /// Whether the server acknowledged the write.
    pub acknowledged: bool,
    /// Documents matched by the filter.
    pub matched: u64,
    /// Documents actually modified or removed.
    pub modified: u64,
}

/// Index metadata, as reported by the driver.
#[derive(Debug, Clone)]
pub struct IndexInfo {
    pub name: String,
    /// Indexed keys (wire field -> direction).
    pub keys: Doc,
    pub unique: bool,
}

/// Synchronous driver surface consumed by the session and query layers.
///
/// Every method is a blocking network round trip; cancellation and
/// timeouts are the driver's own concern.
pub trait Connection {
    /// Find documents matching `filter`.
    fn find(&self, collection: &str, filter: &Doc, options: &FindOptions) -> Result<Vec<Doc>>;

    /// Insert one document, returning the stored identity value.
    fn insert(&self, collection: &str, doc: Doc) -> Result<Value>;

    /// Apply an update document to documents matching `filter`.
    fn update(&self, collection: &str, filter: &Doc, update: &Doc, upsert: bool)
    -> Result<WriteAck>;

    /// Remove documents matching `filter`.
    fn remove(&self, collection: &str, filter: &Doc) -> Result<WriteAck>;

    /// Index metadata for a collection.
    fn list_indexes(&self, collection: &str) -> Result<Vec<IndexInfo>>;

    /// Advisory: the caller's logical session is over and any pinned
    /// connection affinity may be released. Default is a no-op.
    fn end_request(&self) {}
}
