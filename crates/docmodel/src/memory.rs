//! An in-memory `Connection` backend.
//!
//! Collections are plain vectors of wire documents behind an `RwLock`.
//! The backend evaluates the same operator documents the query and
//! update compilers emit, which makes it the reference target for
//! integration tests and demos; it is not meant for production data.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

use docmodel_core::{
    Connection, Doc, Error, FindOptions, IndexInfo, ObjectId, Result, SortOrder, Value, WriteAck,
    doc,
};
use tracing::warn;

/// In-memory document store implementing the driver surface.
#[derive(Default)]
pub struct MemoryConnection {
    collections: RwLock<HashMap<String, Vec<Doc>>>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Vec<Doc>>>> {
        self.collections
            .read()
            .map_err(|_| Error::Custom("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Vec<Doc>>>> {
        self.collections
            .write()
            .map_err(|_| Error::Custom("memory store lock poisoned".to_string()))
    }
}

impl Connection for MemoryConnection {
    fn find(&self, collection: &str, filter: &Doc, options: &FindOptions) -> Result<Vec<Doc>> {
        let store = self.read()?;
        let mut matches: Vec<Doc> = store
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| matches_filter(doc, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(store);

        for (key, order) in options.sort.iter().rev() {
            matches.sort_by(|a, b| {
                let cmp = compare_at(a, key, b);
                match order {
                    SortOrder::Ascending => cmp,
                    SortOrder::Descending => cmp.reverse(),
                }
            });
        }
        if let Some(skip) = options.skip {
            matches.drain(..matches.len().min(skip as usize));
        }
        if let Some(limit) = options.limit {
            matches.truncate(limit as usize);
        }
        if let Some(projection) = &options.projection {
            matches = matches
                .into_iter()
                .map(|doc| apply_projection(&doc, projection))
                .collect();
        }
        Ok(matches)
    }

    fn insert(&self, collection: &str, mut doc: Doc) -> Result<Value> {
        if doc.get("_id").is_none() {
            doc.insert("_id", Value::ObjectId(ObjectId::new()));
        }
        let id = doc.get("_id").cloned().unwrap_or(Value::Null);
        self.write()?
            .entry(collection.to_string())
            .or_default()
            .push(doc);
        Ok(id)
    }

    fn update(
        &self,
        collection: &str,
        filter: &Doc,
        update: &Doc,
        upsert: bool,
    ) -> Result<WriteAck> {
        let mut store = self.write()?;
        let docs = store.entry(collection.to_string()).or_default();
        let mut matched = 0u64;
        for doc in docs.iter_mut() {
            if matches_filter(doc, filter) {
                matched += 1;
                apply_update(doc, update);
            }
        }
        if matched == 0 && upsert {
            let mut doc = seed_from_filter(filter);
            apply_update(&mut doc, update);
            if doc.get("_id").is_none() {
                doc.insert("_id", Value::ObjectId(ObjectId::new()));
            }
            docs.push(doc);
            matched = 1;
        }
        Ok(WriteAck {
            acknowledged: true,
            matched,
            modified: matched,
        })
    }

    fn remove(&self, collection: &str, filter: &Doc) -> Result<WriteAck> {
        let mut store = self.write()?;
        let docs = store.entry(collection.to_string()).or_default();
        let before = docs.len();
        docs.retain(|doc| !matches_filter(doc, filter));
        let removed = (before - docs.len()) as u64;
        Ok(WriteAck {
            acknowledged: true,
            matched: removed,
            modified: removed,
        })
    }

    fn list_indexes(&self, _collection: &str) -> Result<Vec<IndexInfo>> {
        // Only the implicit identity index exists in memory.
        Ok(vec![IndexInfo {
            name: "_id_".to_string(),
            keys: doc! { "_id" => 1 },
            unique: true,
        }])
    }
}

/// Whether `doc` satisfies every condition in `filter`.
fn matches_filter(doc: &Doc, filter: &Doc) -> bool {
    filter.iter().all(|(key, condition)| match key {
        "$and" => match condition {
            Value::Array(branches) => branches.iter().all(|b| match b {
                Value::Doc(branch) => matches_filter(doc, branch),
                _ => false,
            }),
            _ => false,
        },
        "$or" => match condition {
            Value::Array(branches) => branches.iter().any(|b| match b {
                Value::Doc(branch) => matches_filter(doc, branch),
                _ => false,
            }),
            _ => false,
        },
        _ => field_matches(doc, key, condition),
    })
}

fn field_matches(doc: &Doc, path: &str, condition: &Value) -> bool {
    let values = lookup(doc, path);
    match condition {
        Value::Doc(ops) if is_operator_doc(ops) => ops
            .iter()
            .all(|(op, operand)| apply_operator(op, &values, operand)),
        wanted => values.iter().any(|stored| eq_match(stored, wanted)),
    }
}

fn is_operator_doc(doc: &Doc) -> bool {
    !doc.is_empty() && doc.keys().all(|k| k.starts_with('$'))
}

/// Values reachable from `doc` along a dotted path, fanning out through
/// arrays. The positional `$` segment matches every element.
fn lookup<'a>(doc: &'a Doc, path: &str) -> Vec<&'a Value> {
    let mut current: Vec<&'a Value> = Vec::new();
    let mut first = true;
    for segment in path.split('.') {
        if first {
            first = false;
            current = match doc.get(segment) {
                Some(value) => vec![value],
                None => return Vec::new(),
            };
            continue;
        }
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Doc(nested) => {
                    if let Some(v) = nested.get(segment) {
                        next.push(v);
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        match item {
                            _ if segment == "$" => next.push(item),
                            Value::Doc(nested) => {
                                if let Some(v) = nested.get(segment) {
                                    next.push(v);
                                }
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
        if current.is_empty() {
            return current;
        }
    }
    current
}

/// Scalar equality; numeric values compare across integer widths.
fn eq_values(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Equality with array-contains semantics.
fn eq_match(stored: &Value, wanted: &Value) -> bool {
    if eq_values(stored, wanted) {
        return true;
    }
    match stored {
        Value::Array(items) => items.iter().any(|item| eq_values(item, wanted)),
        _ => false,
    }
}

/// Ordering comparisons consider the stored scalar, or any element of a
/// stored array.
fn ord_match(stored: &[&Value], wanted: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    stored.iter().any(|value| match value {
        Value::Array(items) => items.iter().any(|item| accept(item.compare(wanted))),
        scalar => accept(scalar.compare(wanted)),
    })
}

fn apply_operator(op: &str, values: &[&Value], operand: &Value) -> bool {
    match op {
        "$eq" => values.iter().any(|v| eq_match(v, operand)),
        "$ne" => !values.iter().any(|v| eq_match(v, operand)),
        "$gt" => ord_match(values, operand, |o| o == Ordering::Greater),
        "$gte" => ord_match(values, operand, |o| o != Ordering::Less),
        "$lt" => ord_match(values, operand, |o| o == Ordering::Less),
        "$lte" => ord_match(values, operand, |o| o != Ordering::Greater),
        "$in" => match operand {
            Value::Array(wanted) => wanted
                .iter()
                .any(|w| values.iter().any(|v| eq_match(v, w))),
            _ => false,
        },
        "$nin" => match operand {
            Value::Array(wanted) => !wanted
                .iter()
                .any(|w| values.iter().any(|v| eq_match(v, w))),
            _ => false,
        },
        "$exists" => {
            let exists = !values.is_empty();
            operand.as_bool().is_some_and(|flag| flag == exists)
        }
        "$regex" => {
            let Some(pattern) = operand.as_str() else {
                return false;
            };
            match regex::Regex::new(pattern) {
                Ok(re) => values
                    .iter()
                    .any(|v| v.as_str().is_some_and(|s| re.is_match(s))),
                Err(_) => {
                    warn!(pattern, "ignoring unparseable $regex pattern");
                    false
                }
            }
        }
        "$elemMatch" => {
            let Value::Doc(sub) = operand else {
                return false;
            };
            values.iter().any(|v| match v {
                Value::Array(items) => items.iter().any(|item| match item {
                    Value::Doc(element) => matches_filter(element, sub),
                    _ => false,
                }),
                _ => false,
            })
        }
        "$not" => {
            let Value::Doc(inner) = operand else {
                return false;
            };
            !inner
                .iter()
                .all(|(inner_op, inner_operand)| apply_operator(inner_op, values, inner_operand))
        }
        other => {
            warn!(operator = other, "unsupported query operator never matches");
            false
        }
    }
}

/// Apply an update document in place. A document without operator keys
/// replaces everything except the identity.
fn apply_update(doc: &mut Doc, update: &Doc) {
    if !is_operator_doc(update) {
        let id = doc.get("_id").cloned();
        *doc = update.clone();
        if doc.get("_id").is_none() {
            if let Some(id) = id {
                doc.insert("_id", id);
            }
        }
        return;
    }
    for (op, fields) in update.iter() {
        let Value::Doc(fields) = fields else { continue };
        for (path, value) in fields.iter() {
            apply_update_op(doc, op, path, value);
        }
    }
}

fn apply_update_op(doc: &mut Doc, op: &str, path: &str, value: &Value) {
    match op {
        "$set" => set_path(doc, path, value.clone()),
        "$unset" => unset_path(doc, path),
        "$inc" => {
            let current = lookup(doc, path).first().copied().cloned();
            let next = numeric_add(current.as_ref(), value);
            set_path(doc, path, next);
        }
        "$push" => mutate_array(doc, path, |items| items.push(value.clone())),
        "$pull" => mutate_array(doc, path, |items| items.retain(|item| item != value)),
        "$addToSet" => mutate_array(doc, path, |items| {
            if !items.contains(value) {
                items.push(value.clone());
            }
        }),
        "$pop" => mutate_array(doc, path, |items| {
            match value.as_i64() {
                Some(-1) => {
                    if !items.is_empty() {
                        items.remove(0);
                    }
                }
                _ => {
                    items.pop();
                }
            };
        }),
        other => warn!(operator = other, "unsupported update operator ignored"),
    }
}

fn numeric_add(current: Option<&Value>, amount: &Value) -> Value {
    match (current, amount) {
        (Some(Value::Int32(a)), Value::Int32(b)) => Value::Int32(a.wrapping_add(*b)),
        (None | Some(Value::Null), b) => b.clone(),
        (Some(a), b) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => {
                if matches!(a, Value::Double(_)) || matches!(b, Value::Double(_)) {
                    Value::Double(x + y)
                } else {
                    Value::Int64(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0))
                }
            }
            _ => a.clone(),
        },
    }
}

fn mutate_array(doc: &mut Doc, path: &str, mutate: impl FnOnce(&mut Vec<Value>)) {
    let Some(slot) = get_path_mut(doc, path) else {
        // Creating the array on first use mirrors server behavior.
        let mut items = Vec::new();
        mutate(&mut items);
        set_path(doc, path, Value::Array(items));
        return;
    };
    match slot {
        Value::Array(items) => mutate(items),
        Value::Null => {
            let mut items = Vec::new();
            mutate(&mut items);
            *slot = Value::Array(items);
        }
        _ => {}
    }
}

fn set_path(doc: &mut Doc, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = doc;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment, value);
            return;
        }
        if !matches!(current.get(segment), Some(Value::Doc(_))) {
            current.insert(segment, Value::Doc(Doc::new()));
        }
        let Some(Value::Doc(nested)) = current.get_mut(segment) else {
            return;
        };
        current = nested;
    }
}

fn unset_path(doc: &mut Doc, path: &str) {
    let Some((parent, leaf)) = path.rsplit_once('.') else {
        doc.remove(path);
        return;
    };
    if let Some(Value::Doc(nested)) = get_path_mut(doc, parent) {
        nested.remove(leaf);
    }
}

fn get_path_mut<'a>(doc: &'a mut Doc, path: &str) -> Option<&'a mut Value> {
    let mut segments = path.split('.').peekable();
    let mut current = doc;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            return current.get_mut(segment);
        }
        match current.get_mut(segment) {
            Some(Value::Doc(nested)) => current = nested,
            _ => return None,
        }
    }
    None
}

fn compare_at(a: &Doc, key: &str, b: &Doc) -> Ordering {
    let null = Value::Null;
    let left = lookup(a, key).first().copied().unwrap_or(&null);
    let right = lookup(b, key).first().copied().unwrap_or(&null);
    left.compare(right)
}

/// Build the starting document for an upserted update from the filter's
/// bare-equality conditions.
fn seed_from_filter(filter: &Doc) -> Doc {
    let mut doc = Doc::new();
    for (key, condition) in filter.iter() {
        if key.starts_with('$') || key.contains('.') {
            continue;
        }
        match condition {
            Value::Doc(ops) if is_operator_doc(ops) => {
                if let Some(value) = ops.get("$eq") {
                    doc.insert(key, value.clone());
                }
            }
            value => {
                doc.insert(key, value.clone());
            }
        }
    }
    doc
}

/// Apply a projection document: include (`1`) / exclude (`0`) top-level
/// fields and `$elemMatch` array restrictions. The identity and
/// discriminator ride along with include projections unless explicitly
/// excluded.
fn apply_projection(doc: &Doc, projection: &Doc) -> Doc {
    let mut includes: Vec<&str> = Vec::new();
    let mut excludes: Vec<&str> = Vec::new();
    let mut elem_matches: Vec<(&str, &Doc)> = Vec::new();
    for (key, value) in projection.iter() {
        match value {
            Value::Doc(spec) => {
                if let Some(Value::Doc(sub)) = spec.get("$elemMatch") {
                    elem_matches.push((top_segment(key), sub));
                }
            }
            value if value.as_i64() == Some(0) => excludes.push(top_segment(key)),
            _ => includes.push(top_segment(key)),
        }
    }

    let include_mode = !includes.is_empty() || !elem_matches.is_empty();
    let mut out = Doc::new();
    for (key, value) in doc.iter() {
        if excludes.contains(&key) {
            continue;
        }
        if let Some((_, sub)) = elem_matches.iter().find(|(path, _)| *path == key) {
            if let Value::Array(items) = value {
                let matched: Vec<Value> = items
                    .iter()
                    .filter(|item| match item {
                        Value::Doc(element) => matches_filter(element, sub),
                        _ => false,
                    })
                    .take(1)
                    .cloned()
                    .collect();
                out.insert(key, Value::Array(matched));
            }
            continue;
        }
        if include_mode && !includes.contains(&key) && key != "_id" && key != "_type" {
            continue;
        }
        out.insert(key, value.clone());
    }
    out
}

fn top_segment(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MemoryConnection {
        let conn = MemoryConnection::new();
        conn.insert(
            "people",
            doc! { "name" => "Ann", "age" => 32, "tags" => vec!["rust", "db"] },
        )
        .unwrap();
        conn.insert(
            "people",
            doc! { "name" => "Bob", "age" => 40, "tags" => vec!["db"] },
        )
        .unwrap();
        conn.insert("people", doc! { "name" => "Cal", "age" => 19 })
            .unwrap();
        conn
    }

    fn names(docs: &[Doc]) -> Vec<&str> {
        docs.iter()
            .map(|d| d.get("name").and_then(Value::as_str).unwrap())
            .collect()
    }

    #[test]
    fn insert_assigns_an_identity() {
        let conn = MemoryConnection::new();
        let id = conn.insert("people", doc! { "name" => "Ann" }).unwrap();
        assert!(matches!(id, Value::ObjectId(_)));

        let found = conn
            .find("people", &doc! { "_id" => id }, &FindOptions::default())
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn comparison_operators_match() {
        let conn = seeded();
        let found = conn
            .find(
                "people",
                &doc! { "age" => doc! { "$gte" => 20, "$lt" => 40 } },
                &FindOptions::default(),
            )
            .unwrap();
        assert_eq!(names(&found), vec!["Ann"]);
    }

    #[test]
    fn array_contains_and_elem_match() {
        let conn = seeded();
        let found = conn
            .find("people", &doc! { "tags" => "rust" }, &FindOptions::default())
            .unwrap();
        assert_eq!(names(&found), vec!["Ann"]);

        conn.insert(
            "blogs",
            doc! { "title" => "a", "comments" => vec![
                doc! { "author" => "x", "votes" => 3 },
                doc! { "author" => "y", "votes" => 9 },
            ] },
        )
        .unwrap();
        let found = conn
            .find(
                "blogs",
                &doc! { "comments" => doc! { "$elemMatch" => doc! { "votes" => doc! { "$gt" => 5 } } } },
                &FindOptions::default(),
            )
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn logical_and_not_operators() {
        let conn = seeded();
        let found = conn
            .find(
                "people",
                &doc! { "$or" => vec![
                    Value::Doc(doc! { "name" => "Ann" }),
                    Value::Doc(doc! { "age" => doc! { "$lt" => 20 } }),
                ] },
                &FindOptions::default(),
            )
            .unwrap();
        assert_eq!(names(&found), vec!["Ann", "Cal"]);

        let found = conn
            .find(
                "people",
                &doc! { "age" => doc! { "$not" => doc! { "$gt" => 30 } } },
                &FindOptions::default(),
            )
            .unwrap();
        assert_eq!(names(&found), vec!["Cal"]);
    }

    #[test]
    fn exists_distinguishes_missing_fields() {
        let conn = seeded();
        let found = conn
            .find(
                "people",
                &doc! { "tags" => doc! { "$exists" => false } },
                &FindOptions::default(),
            )
            .unwrap();
        assert_eq!(names(&found), vec!["Cal"]);
    }

    #[test]
    fn sort_skip_limit() {
        let conn = seeded();
        let options = FindOptions {
            sort: vec![("age".to_string(), SortOrder::Descending)],
            skip: Some(1),
            limit: Some(1),
            ..FindOptions::default()
        };
        let found = conn.find("people", &Doc::new(), &options).unwrap();
        assert_eq!(names(&found), vec!["Ann"]);
    }

    #[test]
    fn update_operators_apply() {
        let conn = seeded();
        let ack = conn
            .update(
                "people",
                &doc! { "name" => "Ann" },
                &doc! {
                    "$inc" => doc! { "age" => 1 },
                    "$push" => doc! { "tags" => "odm" },
                    "$unset" => doc! { "nickname" => 1 },
                },
                false,
            )
            .unwrap();
        assert!(ack.acknowledged);
        assert_eq!(ack.matched, 1);

        let found = conn
            .find("people", &doc! { "name" => "Ann" }, &FindOptions::default())
            .unwrap();
        assert_eq!(found[0].get("age"), Some(&Value::Int32(33)));
        let tags = found[0].get("tags").and_then(Value::as_array).unwrap();
        assert_eq!(tags.len(), 3);
    }

    #[test]
    fn upsert_seeds_from_the_filter() {
        let conn = MemoryConnection::new();
        let ack = conn
            .update(
                "people",
                &doc! { "name" => "Dot" },
                &doc! { "$set" => doc! { "age" => 7 } },
                true,
            )
            .unwrap();
        assert_eq!(ack.matched, 1);

        let found = conn
            .find("people", &doc! { "name" => "Dot" }, &FindOptions::default())
            .unwrap();
        assert_eq!(found[0].get("age"), Some(&Value::Int32(7)));
        assert!(found[0].get("_id").is_some());
    }

    #[test]
    fn whole_document_replace_keeps_identity() {
        let conn = MemoryConnection::new();
        let id = conn.insert("people", doc! { "name" => "Ann" }).unwrap();
        conn.update(
            "people",
            &doc! { "_id" => id.clone() },
            &doc! { "name" => "Annette", "age" => 33 },
            false,
        )
        .unwrap();
        let found = conn
            .find("people", &doc! { "_id" => id }, &FindOptions::default())
            .unwrap();
        assert_eq!(found[0].get("name"), Some(&Value::from("Annette")));
    }

    #[test]
    fn remove_filters_and_counts() {
        let conn = seeded();
        let ack = conn
            .remove("people", &doc! { "age" => doc! { "$gte" => 32 } })
            .unwrap();
        assert_eq!(ack.matched, 2);
        let rest = conn.find("people", &Doc::new(), &FindOptions::default()).unwrap();
        assert_eq!(names(&rest), vec!["Cal"]);
    }

    #[test]
    fn projection_include_and_elem_match() {
        let conn = MemoryConnection::new();
        conn.insert(
            "blogs",
            doc! { "title" => "a", "body" => "long", "comments" => vec![
                doc! { "author" => "x", "votes" => 3 },
                doc! { "author" => "y", "votes" => 9 },
            ] },
        )
        .unwrap();
        let options = FindOptions {
            projection: Some(doc! {
                "title" => 1,
                "comments" => doc! { "$elemMatch" => doc! { "votes" => doc! { "$gt" => 5 } } },
            }),
            ..FindOptions::default()
        };
        let found = conn.find("blogs", &Doc::new(), &options).unwrap();
        let doc = &found[0];
        assert!(doc.get("title").is_some());
        assert!(doc.get("body").is_none());
        assert!(doc.get("_id").is_some());
        let comments = doc.get("comments").and_then(Value::as_array).unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(
            comments[0].as_doc().and_then(|c| c.get("author")),
            Some(&Value::from("y"))
        );
    }

    #[test]
    fn regex_matches_strings() {
        let conn = seeded();
        let found = conn
            .find(
                "people",
                &doc! { "name" => doc! { "$regex" => "^A" } },
                &FindOptions::default(),
            )
            .unwrap();
        assert_eq!(names(&found), vec!["Ann"]);
    }
}
