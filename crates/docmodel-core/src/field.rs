//! Field descriptors and document-class schema metadata.
//!
//! A [`DocumentClass`] is a plain static descriptor: field declarations,
//! the identity field, the collection name, and any delegate subclasses
//! sharing the collection. Classes are intended to live in statics, so all
//! references are `'static`.

use chrono::{FixedOffset, Utc};

use crate::error::{Error, Result};
use crate::value::{Doc, Value};

/// Wire key carrying the subclass discriminator for polymorphic classes.
pub const DISCRIMINATOR_FIELD: &str = "_type";

/// The declared type of a document field.
///
/// A tagged union over the value shapes a field can take; nested documents
/// and arrays reference their element schema so paths can descend through
/// them.
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    /// Boolean
    Bool,
    /// Integer (32- or 64-bit on the wire)
    Int,
    /// Floating point; integers are widened on the way in
    Float,
    /// UTF-8 string
    String,
    /// Timezone-aware datetime; stored as UTC
    DateTime,
    /// Document identity
    ObjectId,
    /// Schema-free; accepts any value unchanged
    Any,
    /// Embedded document with its own class
    Doc(&'static DocumentClass),
    /// Array of a single element kind
    Array(&'static FieldKind),
}

impl FieldKind {
    /// The element kind, when this is an array field.
    pub fn element(&self) -> Option<&'static FieldKind> {
        match self {
            FieldKind::Array(elem) => Some(elem),
            _ => None,
        }
    }

    /// The embedded class, when this is a nested document field.
    pub fn embedded_class(&self) -> Option<&'static DocumentClass> {
        match self {
            FieldKind::Doc(class) => Some(class),
            _ => None,
        }
    }

    /// Check whether an application-side value fits this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldKind::Any, _) => true,
            (FieldKind::Bool, Value::Bool(_)) => true,
            (FieldKind::Int, Value::Int32(_) | Value::Int64(_)) => true,
            (FieldKind::Float, Value::Double(_) | Value::Int32(_) | Value::Int64(_)) => true,
            (FieldKind::String, Value::String(_)) => true,
            (FieldKind::DateTime, Value::DateTime(_)) => true,
            (FieldKind::ObjectId, Value::ObjectId(_)) => true,
            (FieldKind::Doc(class), Value::Doc(doc)) => doc
                .iter()
                .all(|(name, v)| class.field(name).is_some_and(|f| f.kind.accepts(v))),
            (FieldKind::Array(elem), Value::Array(items)) => {
                items.iter().all(|item| elem.accepts(item))
            }
            _ => false,
        }
    }

    /// Convert an application-side value to its transport representation.
    ///
    /// Datetimes are normalized to UTC, floats absorb integers, nested
    /// documents are marshalled through their class. The error is a bare
    /// detail string; callers attach class/path context.
    pub fn to_wire(&self, value: Value) -> std::result::Result<Value, String> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (FieldKind::Any, v) => Ok(v),
            (FieldKind::Bool, v @ Value::Bool(_)) => Ok(v),
            (FieldKind::Int, v @ (Value::Int32(_) | Value::Int64(_))) => Ok(v),
            (FieldKind::Float, Value::Int32(n)) => Ok(Value::Double(f64::from(n))),
            (FieldKind::Float, Value::Int64(n)) => Ok(Value::Double(n as f64)),
            (FieldKind::Float, v @ Value::Double(_)) => Ok(v),
            (FieldKind::String, v @ Value::String(_)) => Ok(v),
            (FieldKind::DateTime, Value::DateTime(dt)) => {
                Ok(Value::DateTime(dt.with_timezone(&Utc).fixed_offset()))
            }
            (FieldKind::ObjectId, v @ Value::ObjectId(_)) => Ok(v),
            (FieldKind::Doc(class), Value::Doc(doc)) => {
                class.marshal(&doc).map(Value::Doc).map_err(|e| e.to_string())
            }
            (FieldKind::Array(elem), Value::Array(items)) => items
                .into_iter()
                .map(|item| elem.to_wire(item))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Value::Array),
            (kind, value) => Err(format!(
                "expected {}, got {}",
                kind.type_name(),
                value.type_name()
            )),
        }
    }

    /// Convert a transport value back to the application representation,
    /// localizing datetimes to `tz` when one is set.
    pub fn from_wire(
        &self,
        value: Value,
        tz: Option<FixedOffset>,
    ) -> std::result::Result<Value, String> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (FieldKind::DateTime, Value::DateTime(dt)) => Ok(Value::DateTime(match tz {
                Some(tz) => dt.with_timezone(&tz),
                None => dt,
            })),
            (FieldKind::Doc(class), Value::Doc(doc)) => class
                .unmarshal(&doc, tz)
                .map(Value::Doc)
                .map_err(|e| e.to_string()),
            (FieldKind::Array(elem), Value::Array(items)) => items
                .into_iter()
                .map(|item| elem.from_wire(item, tz))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Value::Array),
            (kind, value) => {
                if kind.accepts(&value) {
                    Ok(value)
                } else {
                    Err(format!(
                        "stored value is {}, expected {}",
                        value.type_name(),
                        kind.type_name()
                    ))
                }
            }
        }
    }

    /// Human-readable name of this kind.
    pub const fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Bool => "bool",
            FieldKind::Int => "int",
            FieldKind::Float => "float",
            FieldKind::String => "string",
            FieldKind::DateTime => "datetime",
            FieldKind::ObjectId => "objectid",
            FieldKind::Any => "any",
            FieldKind::Doc(_) => "document",
            FieldKind::Array(_) => "array",
        }
    }

    /// Whether dotted paths can descend into this kind.
    pub const fn has_subfields(&self) -> bool {
        matches!(self, FieldKind::Doc(_) | FieldKind::Any)
    }
}

/// Metadata about one declared document field.
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    /// Application-side field name
    pub name: &'static str,
    /// Wire field name (may differ, e.g. `id` stored as `_id`)
    pub wire_name: &'static str,
    /// Declared kind
    pub kind: FieldKind,
    /// Whether the field must be present when marshalling a whole document
    pub required: bool,
}

impl FieldDef {
    /// Create a field definition; wire name defaults to the field name.
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            wire_name: name,
            kind,
            required: false,
        }
    }

    /// Override the wire name.
    pub const fn wire(mut self, wire_name: &'static str) -> Self {
        self.wire_name = wire_name;
        self
    }

    /// Mark the field required.
    pub const fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }
}

/// Schema descriptor for one document class.
///
/// Invariants: field names are unique within a class, and `id_field` names
/// a declared field whose kind is comparably ordered.
#[derive(Debug)]
pub struct DocumentClass {
    /// Class name, used in error messages.
    pub name: &'static str,
    /// Collection the class stores into.
    pub collection: &'static str,
    /// Application-side name of the identity field.
    pub id_field: &'static str,
    /// Declared fields, in order.
    pub fields: &'static [FieldDef],
    /// Delegate subclasses sharing this collection.
    pub subclasses: &'static [&'static DocumentClass],
    /// Discriminator value stored under [`DISCRIMINATOR_FIELD`] for
    /// subclass instances; `None` for monomorphic classes.
    pub discriminator: Option<&'static str>,
}

impl DocumentClass {
    /// Look up a declared field by application-side name.
    pub fn field(&self, name: &str) -> Option<&'static FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a declared field by wire name.
    pub fn field_by_wire(&self, wire_name: &str) -> Option<&'static FieldDef> {
        self.fields.iter().find(|f| f.wire_name == wire_name)
    }

    /// The identity field's definition.
    pub fn id_def(&self) -> &'static FieldDef {
        self.field(self.id_field)
            .expect("id_field must name a declared field")
    }

    /// Wire name of the identity field.
    pub fn id_wire_name(&self) -> &'static str {
        self.id_def().wire_name
    }

    /// All classes a path segment may resolve against: this class followed
    /// by its delegate subclasses.
    pub fn family(&'static self) -> impl Iterator<Item = &'static DocumentClass> {
        std::iter::once(self).chain(self.subclasses.iter().copied())
    }

    /// Pick the concrete class for a raw document by its discriminator.
    ///
    /// Falls back to `self` when no discriminator is stored or no subclass
    /// matches.
    pub fn concrete_class(&'static self, doc: &Doc) -> &'static DocumentClass {
        let Some(Value::String(tag)) = doc.get(DISCRIMINATOR_FIELD) else {
            return self;
        };
        self.family()
            .find(|c| c.discriminator == Some(tag.as_str()))
            .unwrap_or(self)
    }

    /// Marshal a field-name-keyed document into its wire representation.
    ///
    /// Checks required fields, validates every value, renames to wire
    /// names, and stamps the discriminator for subclass instances.
    pub fn marshal(&'static self, doc: &Doc) -> Result<Doc> {
        let mut wire = Doc::new();
        if let Some(tag) = self.discriminator {
            wire.insert(DISCRIMINATOR_FIELD, tag);
        }
        for def in self.fields {
            match doc.get(def.name) {
                Some(value) => {
                    let converted = def
                        .kind
                        .to_wire(value.clone())
                        .map_err(|detail| Error::bad_value(self.name, def.name, detail))?;
                    wire.insert(def.wire_name, converted);
                }
                None if def.required => {
                    return Err(Error::bad_value(
                        self.name,
                        def.name,
                        "required field is missing",
                    ));
                }
                None => {}
            }
        }
        for (name, _) in doc.iter() {
            if self.field(name).is_none() {
                return Err(Error::field_not_found(self.name, name));
            }
        }
        Ok(wire)
    }

    /// Unmarshal a wire document into a field-name-keyed document,
    /// localizing datetimes to `tz`.
    ///
    /// Fields absent from the wire document are simply absent; the
    /// projection bookkeeping that distinguishes "not stored" from "not
    /// retrieved" lives on `Instance`.
    pub fn unmarshal(&'static self, wire: &Doc, tz: Option<FixedOffset>) -> Result<Doc> {
        let class = self.concrete_class(wire);
        let mut doc = Doc::new();
        for def in class.fields {
            if let Some(value) = wire.get(def.wire_name) {
                let converted = def
                    .kind
                    .from_wire(value.clone(), tz)
                    .map_err(|detail| Error::bad_value(class.name, def.name, detail))?;
                doc.insert(def.name, converted);
            }
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use chrono::TimeZone;

    static ADDRESS: DocumentClass = DocumentClass {
        name: "Address",
        collection: "people",
        id_field: "city",
        fields: &[
            FieldDef::new("city", FieldKind::String).required(true),
            FieldDef::new("zip", FieldKind::Int),
        ],
        subclasses: &[],
        discriminator: None,
    };

    static PERSON: DocumentClass = DocumentClass {
        name: "Person",
        collection: "people",
        id_field: "id",
        fields: &[
            FieldDef::new("id", FieldKind::ObjectId).wire("_id"),
            FieldDef::new("name", FieldKind::String).required(true),
            FieldDef::new("age", FieldKind::Int),
            FieldDef::new("score", FieldKind::Float),
            FieldDef::new("joined", FieldKind::DateTime),
            FieldDef::new("address", FieldKind::Doc(&ADDRESS)),
            FieldDef::new("tags", FieldKind::Array(&FieldKind::String)),
        ],
        subclasses: &[],
        discriminator: None,
    };

    #[test]
    fn accepts_widens_integers_for_float_fields() {
        assert!(FieldKind::Float.accepts(&Value::Int32(3)));
        assert!(FieldKind::Float.accepts(&Value::Double(3.5)));
        assert!(!FieldKind::Float.accepts(&Value::from("3.5")));
    }

    #[test]
    fn to_wire_normalizes_datetimes_to_utc() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let local = tz.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let wire = FieldKind::DateTime.to_wire(Value::DateTime(local)).unwrap();
        let Value::DateTime(dt) = wire else {
            panic!("expected datetime")
        };
        assert_eq!(dt.offset().local_minus_utc(), 0);
        assert_eq!(dt.timestamp(), local.timestamp());
    }

    #[test]
    fn from_wire_localizes_to_session_timezone() {
        let utc = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let tz = FixedOffset::east_opt(3 * 3600).unwrap();
        let local = FieldKind::DateTime
            .from_wire(Value::from(utc), Some(tz))
            .unwrap();
        let Value::DateTime(dt) = local else {
            panic!("expected datetime")
        };
        assert_eq!(dt.offset().local_minus_utc(), 3 * 3600);
        assert_eq!(dt.timestamp(), utc.timestamp());
    }

    #[test]
    fn marshal_renames_and_validates() {
        let wire = PERSON
            .marshal(&doc! { "name" => "Ann", "age" => 32 })
            .unwrap();
        assert_eq!(wire.get("name"), Some(&Value::from("Ann")));
        assert!(!wire.contains_key("id"));

        let err = PERSON.marshal(&doc! { "name" => "Ann", "age" => "old" });
        assert!(err.is_err());
    }

    #[test]
    fn marshal_requires_required_fields() {
        let err = PERSON.marshal(&doc! { "age" => 32 }).unwrap_err();
        assert!(err.is_schema_error());
    }

    #[test]
    fn marshal_rejects_undeclared_fields() {
        let err = PERSON
            .marshal(&doc! { "name" => "Ann", "nickname" => "A" })
            .unwrap_err();
        assert!(err.to_string().contains("nickname"));
    }

    #[test]
    fn unmarshal_maps_wire_names_back() {
        let oid = crate::ObjectId::new();
        let wire = doc! { "_id" => oid, "name" => "Ann" };
        let fields = PERSON.unmarshal(&wire, None).unwrap();
        assert_eq!(fields.get("id"), Some(&Value::ObjectId(oid)));
        assert_eq!(fields.get("name"), Some(&Value::from("Ann")));
    }

    #[test]
    fn nested_documents_marshal_recursively() {
        let wire = PERSON
            .marshal(&doc! {
                "name" => "Ann",
                "address" => doc! { "city" => "Oslo", "zip" => 1234 },
            })
            .unwrap();
        let address = wire.get("address").and_then(|v| v.as_doc()).unwrap();
        assert_eq!(address.get("city"), Some(&Value::from("Oslo")));

        let bad = PERSON.marshal(&doc! {
            "name" => "Ann",
            "address" => doc! { "zip" => 1234 },
        });
        assert!(bad.is_err(), "required nested city must be enforced");
    }

    #[test]
    fn float_field_widens_on_the_wire() {
        let wire = PERSON
            .marshal(&doc! { "name" => "Ann", "score" => 7 })
            .unwrap();
        assert_eq!(wire.get("score"), Some(&Value::Double(7.0)));
    }
}
