//! Core types and traits for DocModel Rust.
//!
//! This crate provides the foundational abstractions for type-safe
//! document mapping:
//!
//! - `Value`, `Doc`, and `ObjectId` wire values
//! - `FieldKind` / `FieldDef` / `DocumentClass` schema descriptors
//! - `Document` trait and the projection-aware `Instance` handle
//! - `Connection` trait for database drivers
//! - the error taxonomy shared by every layer

pub mod connection;
pub mod document;
pub mod error;
pub mod field;
pub mod value;

pub use connection::{Connection, FindOptions, IndexInfo, SortOrder, WriteAck};
pub use document::{Document, Instance};
pub use error::{
    AccessError, Error, QueryError, QueryErrorKind, Result, ResultError, ResultErrorKind,
    SchemaError, SchemaErrorKind, SessionError, SessionErrorKind, WriteError, WriteErrorKind,
};
pub use field::{DISCRIMINATOR_FIELD, DocumentClass, FieldDef, FieldKind};
pub use value::{Doc, ObjectId, Value};
