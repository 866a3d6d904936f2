//! DocModel Rust - document databases in Rust, designed to be intuitive
//! and type-safe.
//!
//! DocModel maps typed Rust structs to database documents and back, and
//! batches writes in a unit-of-work session:
//!
//! - Schema descriptors with eager field validation
//! - Fluent, typed query and update expression compilers
//! - A deferred-write session with FIFO flush and scoped use
//! - Timezone-correct datetime handling end to end
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! static PERSON: DocumentClass = DocumentClass {
//!     name: "Person",
//!     collection: "people",
//!     id_field: "id",
//!     fields: &[
//!         FieldDef::new("id", FieldKind::ObjectId).wire("_id"),
//!         FieldDef::new("name", FieldKind::String).required(true),
//!         FieldDef::new("age", FieldKind::Int),
//!     ],
//!     subclasses: &[],
//!     discriminator: None,
//! };
//!
//! fn example() -> Result<()> {
//!     let mut session = Session::new(MemoryConnection::new());
//!
//!     let mut ann = Instance::new(&PERSON);
//!     ann.set("name", "Ann")?;
//!     ann.set("age", 32)?;
//!
//!     // Queued, not yet written:
//!     // session.insert(&mut ann_document)?;
//!
//!     // Reads flush the queue first.
//!     let adults = session
//!         .query(&PERSON)?
//!         .filter(field("age").gte(18))
//!         .descending("age")
//!         .all()?;
//!
//!     for person in &adults {
//!         println!("{}", person.get("name")?.as_str().unwrap_or(""));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! The [`MemoryConnection`] backend evaluates the compiled wire format in
//! process and backs the integration tests; real deployments implement
//! the same [`Connection`] trait over an actual driver.

pub mod memory;

pub use docmodel_core::{
    Connection, DISCRIMINATOR_FIELD, Doc, Document, DocumentClass, Error, FieldDef, FieldKind,
    FindOptions, IndexInfo, Instance, ObjectId, Result, SortOrder, Value, WriteAck, doc,
};
pub use docmodel_query::{Cursor, FieldRef, QueryBuilder, QueryExpr, UpdateExpr, field};
pub use docmodel_session::{Session, SessionScope};
pub use memory::MemoryConnection;

/// Everything needed for typical use.
pub mod prelude {
    pub use crate::memory::MemoryConnection;
    pub use docmodel_core::{
        Connection, Doc, Document, DocumentClass, Error, FieldDef, FieldKind, Instance, ObjectId,
        Result, SortOrder, Value, doc,
    };
    pub use docmodel_query::{QueryExpr, UpdateExpr, field};
    pub use docmodel_session::{Session, SessionScope};
}
