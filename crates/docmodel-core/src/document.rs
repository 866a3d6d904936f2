//! The `Document` trait and the dynamic `Instance` handle.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::field::DocumentClass;
use crate::value::{Doc, Value};

/// Trait for typed structs that map to a document class.
///
/// Implementations convert between the struct and a field-name-keyed
/// [`Doc`]; the class descriptor carries all schema metadata.
pub trait Document: Sized {
    /// The schema descriptor for this type.
    fn class() -> &'static DocumentClass;

    /// Convert this instance to a field-name-keyed document.
    fn to_doc(&self) -> Result<Doc>;

    /// Construct an instance from a field-name-keyed document.
    fn from_doc(doc: &Doc) -> Result<Self>;

    /// The identity value, if one has been assigned.
    fn id(&self) -> Option<Value>;

    /// Record the identity assigned at queue time or by the database.
    fn set_id(&mut self, id: Value);
}

/// Which fields a loaded instance actually carries.
#[derive(Debug, Clone)]
enum Retrieved {
    /// Loaded without a projection; every declared field is accessible.
    All,
    /// Loaded under a projection; only these field names were retrieved.
    Fields(BTreeSet<String>),
}

/// An in-memory document bound to one class.
///
/// Holds the field values, per-field dirty bits, and the projection the
/// instance was loaded under. Assignment validates eagerly against the
/// declared field kind; access to a projection-excluded field fails lazily
/// with `FieldNotRetrieved`, so partially projected loads stay cheap until
/// the missing data is actually needed.
#[derive(Debug, Clone)]
pub struct Instance {
    class: &'static DocumentClass,
    values: Doc,
    retrieved: Retrieved,
    /// Fields loaded through an `$elemMatch` projection; they hold only
    /// the matched element, so writing back through them is ambiguous.
    elem_matched: BTreeSet<String>,
    dirty: BTreeSet<String>,
}

static NULL: Value = Value::Null;

impl Instance {
    /// Create an empty instance with every field accessible.
    pub fn new(class: &'static DocumentClass) -> Self {
        Self {
            class,
            values: Doc::new(),
            retrieved: Retrieved::All,
            elem_matched: BTreeSet::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// Wrap an already-unmarshalled, field-name-keyed document.
    pub fn from_values(class: &'static DocumentClass, values: Doc) -> Self {
        Self {
            class,
            values,
            retrieved: Retrieved::All,
            elem_matched: BTreeSet::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// Wrap a document loaded under a projection; `fields` are the
    /// application-side names the projection retrieved.
    pub fn from_projected(
        class: &'static DocumentClass,
        values: Doc,
        fields: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            class,
            values,
            retrieved: Retrieved::Fields(fields.into_iter().collect()),
            elem_matched: BTreeSet::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// The class this instance is bound to.
    pub fn class(&self) -> &'static DocumentClass {
        self.class
    }

    /// Read a field.
    ///
    /// Fails with `FieldNotFound` for undeclared names and with
    /// `FieldNotRetrieved` when the field was excluded by the projection
    /// this instance was loaded under. A declared, retrieved field that the
    /// stored document simply lacks reads as `Null`.
    pub fn get(&self, field: &str) -> Result<&Value> {
        if self.class.field(field).is_none() {
            return Err(Error::field_not_found(self.class.name, field));
        }
        if let Retrieved::Fields(fields) = &self.retrieved {
            if !fields.contains(field) {
                return Err(Error::field_not_retrieved(self.class.name, field));
            }
        }
        Ok(self.values.get(field).unwrap_or(&NULL))
    }

    /// Record that `field` was loaded through an `$elemMatch` projection.
    ///
    /// The stored value is the matched element only, so assignment through
    /// the field is rejected as ambiguous.
    pub fn restrict_elem_matched(&mut self, field: impl Into<String>) {
        self.elem_matched.insert(field.into());
    }

    /// Assign a field, validating eagerly against the declared kind and
    /// marking it dirty.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<()> {
        if self.elem_matched.contains(field) {
            return Err(Error::ambiguous_projection(field));
        }
        let def = self
            .class
            .field(field)
            .ok_or_else(|| Error::field_not_found(self.class.name, field))?;
        let value = value.into();
        if !def.kind.accepts(&value) {
            return Err(Error::bad_value(
                self.class.name,
                field,
                format!("expected {}, got {}", def.kind.type_name(), value.type_name()),
            ));
        }
        self.values.insert(field.to_string(), value);
        self.dirty.insert(field.to_string());
        if let Retrieved::Fields(fields) = &mut self.retrieved {
            fields.insert(field.to_string());
        }
        Ok(())
    }

    /// The identity value, if present.
    pub fn id(&self) -> Option<&Value> {
        self.values.get(self.class.id_field)
    }

    /// Whether any field has been assigned since load.
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Names of fields assigned since load, in sorted order.
    pub fn dirty_fields(&self) -> impl Iterator<Item = &str> {
        self.dirty.iter().map(String::as_str)
    }

    /// Forget dirty state, e.g. after the instance has been flushed.
    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    /// Build a `$set` update document from the dirty fields, with values
    /// converted to their wire representation.
    pub fn dirty_ops(&self) -> Result<Doc> {
        let mut set = Doc::new();
        for field in &self.dirty {
            let def = self
                .class
                .field(field)
                .ok_or_else(|| Error::field_not_found(self.class.name, field.as_str()))?;
            let value = self.values.get(field).cloned().unwrap_or(Value::Null);
            let wire = def
                .kind
                .to_wire(value)
                .map_err(|detail| Error::bad_value(self.class.name, field.as_str(), detail))?;
            set.insert(def.wire_name, wire);
        }
        let mut ops = Doc::new();
        if !set.is_empty() {
            ops.insert("$set", set);
        }
        Ok(ops)
    }

    /// The underlying field-name-keyed values.
    pub fn values(&self) -> &Doc {
        &self.values
    }

    /// Convert into a typed document struct.
    pub fn typed<T: Document>(&self) -> Result<T> {
        T::from_doc(&self.values)
    }
}
