//! Dotted field-path resolution against a document class.
//!
//! A path like `address.city` is resolved segment by segment: each segment
//! must be declared on the current class or, for polymorphic classes, on
//! one of its delegate subclasses. Segments declared by several classes in
//! the family union their accepted kinds — a comparison value is wire-legal
//! if any candidate accepts it.

use docmodel_core::{DocumentClass, Error, FieldKind, Result, Value};

/// The positional segment (`$`), produced by `FieldRef::matched_index`.
pub const MATCHED_INDEX: &str = "$";

/// A fully resolved field path.
#[derive(Debug, Clone)]
pub struct ResolvedField {
    /// Root class the resolution started from, for error context.
    class: &'static DocumentClass,
    /// Original application-side dotted path.
    path: String,
    /// Canonical wire path (dots preserved, wire names substituted).
    wire_path: String,
    /// Accepted kinds, one per family member declaring the terminal
    /// segment.
    candidates: Vec<FieldKind>,
}

impl ResolvedField {
    /// Canonical wire name for this path.
    pub fn wire_path(&self) -> &str {
        &self.wire_path
    }

    /// The application-side path this was resolved from.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The root class the resolution started from.
    pub fn class(&self) -> &'static DocumentClass {
        self.class
    }

    /// Whether any candidate kind is an array.
    pub fn is_array(&self) -> bool {
        self.candidates
            .iter()
            .any(|k| matches!(k, FieldKind::Array(_) | FieldKind::Any))
    }

    /// The embedded class of the array element, when this path names an
    /// array of documents.
    pub fn element_class(&self) -> Option<&'static DocumentClass> {
        self.candidates
            .iter()
            .find_map(|k| k.element().and_then(FieldKind::embedded_class))
    }

    /// Convert an application-side comparison value to its transport
    /// representation, trying each candidate kind in declaration order.
    ///
    /// A scalar compared against an array field matches per element, so
    /// array candidates also try their element kind.
    pub fn wrap(&self, value: Value) -> Result<Value> {
        let mut last_err = String::new();
        for kind in &self.candidates {
            match kind.to_wire(value.clone()) {
                Ok(wire) => return Ok(wire),
                Err(detail) => last_err = detail,
            }
            if let Some(elem) = kind.element() {
                if let Ok(wire) = elem.to_wire(value.clone()) {
                    return Ok(wire);
                }
            }
        }
        Err(Error::bad_value(self.class.name, self.path.clone(), last_err))
    }

    /// Wrap each element of a value list (`$in` / `$nin` operands).
    pub fn wrap_each(&self, values: Vec<Value>) -> Result<Vec<Value>> {
        values.into_iter().map(|v| self.wrap(v)).collect()
    }

    /// Convert a single array *element* to its transport representation,
    /// for operators that append to or remove from an array field.
    pub fn wrap_element(&self, value: Value) -> Result<Value> {
        let mut last_err = format!("{} is not an array field", self.path);
        for kind in &self.candidates {
            let elem = match kind {
                FieldKind::Any => kind,
                _ => match kind.element() {
                    Some(elem) => elem,
                    None => continue,
                },
            };
            match elem.to_wire(value.clone()) {
                Ok(wire) => return Ok(wire),
                Err(detail) => last_err = detail,
            }
        }
        Err(Error::bad_value(self.class.name, self.path.clone(), last_err))
    }
}

/// What a partially resolved path may descend into next.
enum Context {
    /// Resolving against one or more classes of a family.
    Classes(Vec<&'static DocumentClass>),
    /// Inside a schema-free (`Any`) field: everything goes.
    Free,
}

/// Resolve `path` against `class`, descending through nested documents and
/// arrays and delegating to subclasses sharing the collection.
pub fn resolve(class: &'static DocumentClass, path: &str) -> Result<ResolvedField> {
    if path.is_empty() {
        return Err(Error::bad_query(None, "empty field path"));
    }

    let mut context = Context::Classes(class.family().collect());
    let mut wire_segments: Vec<String> = Vec::new();
    let mut candidates: Vec<FieldKind> = Vec::new();

    for segment in path.split('.') {
        if segment == MATCHED_INDEX {
            // Positional operator: step from the array to its element.
            if candidates.is_empty() || !candidates.iter().any(|k| matches!(k, FieldKind::Array(_)))
            {
                return Err(Error::bad_query(
                    Some(path.to_string()),
                    "the positional '$' segment must follow an array field",
                ));
            }
            candidates = candidates
                .iter()
                .filter_map(FieldKind::element)
                .copied()
                .collect();
            wire_segments.push(MATCHED_INDEX.to_string());
            context = descend(&candidates);
            continue;
        }

        match &context {
            Context::Free => {
                wire_segments.push(segment.to_string());
                candidates = vec![FieldKind::Any];
            }
            Context::Classes(classes) => {
                let defs: Vec<_> = classes.iter().filter_map(|c| c.field(segment)).collect();
                if defs.is_empty() {
                    return Err(Error::field_not_found(class.name, path));
                }
                wire_segments.push(defs[0].wire_name.to_string());
                candidates = defs.iter().map(|d| d.kind).collect();
            }
        }
        context = descend(&candidates);
    }

    Ok(ResolvedField {
        class,
        path: path.to_string(),
        wire_path: wire_segments.join("."),
        candidates,
    })
}

/// Resolve the *element* of an array path, for `$elemMatch` conditions.
///
/// Fails with `BadQuery` when the path does not name an array field.
pub fn resolve_element(class: &'static DocumentClass, path: &str) -> Result<ResolvedField> {
    let resolved = resolve(class, path)?;
    if !resolved.is_array() {
        return Err(Error::bad_query(
            Some(path.to_string()),
            format!("elem_match called on a non-array field: {path}"),
        ));
    }
    Ok(resolved)
}

/// Compute the context the next segment resolves in, given the kinds the
/// current segment may have.
fn descend(candidates: &[FieldKind]) -> Context {
    let mut classes = Vec::new();
    for kind in candidates {
        match kind {
            FieldKind::Any => return Context::Free,
            FieldKind::Doc(class) => classes.extend(class.family()),
            // Dotted paths pass through arrays to the element schema.
            FieldKind::Array(elem) => match elem {
                FieldKind::Any => return Context::Free,
                FieldKind::Doc(class) => classes.extend(class.family()),
                _ => {}
            },
            _ => {}
        }
    }
    Context::Classes(classes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmodel_core::FieldDef;

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

    static EMPLOYEE: DocumentClass = DocumentClass {
        name: "Employee",
        collection: "people",
        id_field: "id",
        fields: &[
            FieldDef::new("id", FieldKind::ObjectId).wire("_id"),
            FieldDef::new("name", FieldKind::String),
            FieldDef::new("salary", FieldKind::Int),
        ],
        subclasses: &[],
        discriminator: Some("employee"),
    };

    static PERSON: DocumentClass = DocumentClass {
        name: "Person",
        collection: "people",
        id_field: "id",
        fields: &[
            FieldDef::new("id", FieldKind::ObjectId).wire("_id"),
            FieldDef::new("name", FieldKind::String).required(true),
            FieldDef::new("age", FieldKind::Int),
            FieldDef::new("address", FieldKind::Doc(&ADDRESS)),
            FieldDef::new("addresses", FieldKind::Array(&FieldKind::Doc(&ADDRESS))),
            FieldDef::new("tags", FieldKind::Array(&FieldKind::String)),
            FieldDef::new("extra", FieldKind::Any),
        ],
        subclasses: &[&EMPLOYEE],
        discriminator: None,
    };

    #[test]
    fn resolves_top_level_field_to_wire_name() {
        let r = resolve(&PERSON, "id").unwrap();
        assert_eq!(r.wire_path(), "_id");
    }

    #[test]
    fn resolves_nested_paths() {
        let r = resolve(&PERSON, "address.city").unwrap();
        assert_eq!(r.wire_path(), "address.city");
    }

    #[test]
    fn resolves_through_arrays_of_documents() {
        let r = resolve(&PERSON, "addresses.zip").unwrap();
        assert_eq!(r.wire_path(), "addresses.zip");
        assert!(r.wrap(Value::Int32(1234)).is_ok());
    }

    #[test]
    fn resolves_subclass_fields_by_delegation() {
        let r = resolve(&PERSON, "salary").unwrap();
        assert_eq!(r.wire_path(), "salary");
        assert!(r.wrap(Value::Int32(100)).is_ok());
    }

    #[test]
    fn unknown_segment_is_field_not_found() {
        let err = resolve(&PERSON, "address.country").unwrap_err();
        assert!(err.is_schema_error());
        assert!(err.to_string().contains("address.country"));
    }

    #[test]
    fn wrap_rejects_values_no_candidate_accepts() {
        let r = resolve(&PERSON, "age").unwrap();
        let err = r.wrap(Value::from("old")).unwrap_err();
        assert!(err.is_schema_error());
    }

    #[test]
    fn positional_segment_requires_array() {
        let r = resolve(&PERSON, "addresses.$.city").unwrap();
        assert_eq!(r.wire_path(), "addresses.$.city");

        let err = resolve(&PERSON, "name.$").unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn any_fields_resolve_freely() {
        let r = resolve(&PERSON, "extra.whatever.deep").unwrap();
        assert_eq!(r.wire_path(), "extra.whatever.deep");
        assert!(r.wrap(Value::from(true)).is_ok());
    }

    #[test]
    fn resolve_element_demands_an_array() {
        assert!(resolve_element(&PERSON, "addresses").is_ok());
        let err = resolve_element(&PERSON, "name").unwrap_err();
        assert!(err.to_string().contains("non-array"));
    }

    #[test]
    fn element_class_of_document_arrays() {
        let r = resolve_element(&PERSON, "addresses").unwrap();
        assert_eq!(r.element_class().unwrap().name, "Address");
        let r = resolve_element(&PERSON, "tags").unwrap();
        assert!(r.element_class().is_none());
    }
}
