//! Typed query and update compilation for DocModel Rust.
//!
//! `docmodel-query` is the **expression layer**. It turns dotted field
//! paths and fluent combinators into the document database's native query
//! and update operator documents.
//!
//! # Role In The Architecture
//!
//! - **Path resolution**: `path::resolve` maps application field paths to
//!   wire paths, delegating to subclasses sharing a collection.
//! - **Expression DSL**: `field(..)` comparison builders and the immutable
//!   [`QueryExpr`] tree compile to filter documents.
//! - **Updates**: [`UpdateExpr`] accumulates `$set`/`$inc`/array operator
//!   clauses and compiles to an update document.
//! - **Execution**: [`QueryBuilder`] runs a find through the `Connection`
//!   trait from `docmodel-core` and yields instances via [`Cursor`].
//!
//! Most users access these builders via `Session::query` in the
//! `docmodel-session` crate.

pub mod builder;
pub mod expr;
pub mod path;
pub mod update;

pub use builder::{Cursor, QueryBuilder};
pub use expr::{FieldRef, QueryExpr, field};
pub use path::{MATCHED_INDEX, ResolvedField, resolve, resolve_element};
pub use update::UpdateExpr;
