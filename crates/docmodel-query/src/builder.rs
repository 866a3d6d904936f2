//! Query construction and lazy execution.

use chrono::FixedOffset;
use docmodel_core::{
    Connection, Doc, DocumentClass, Error, FindOptions, Instance, Result, SortOrder, Value,
};
use tracing::debug;

use crate::expr::QueryExpr;
use crate::path;

/// Builds and executes one find against a document class.
///
/// All schema work happens at execution time; the builder itself only
/// records what was asked for.
pub struct QueryBuilder<'a, C: Connection> {
    connection: &'a C,
    class: &'static DocumentClass,
    filter: Option<QueryExpr>,
    include: Vec<String>,
    exclude: Vec<String>,
    elem_matches: Vec<(String, QueryExpr)>,
    sort: Vec<(String, SortOrder)>,
    skip: Option<u64>,
    limit: Option<u64>,
    timezone: Option<FixedOffset>,
}

impl<'a, C: Connection> QueryBuilder<'a, C> {
    /// Start a query over `class` executing on `connection`.
    pub fn new(connection: &'a C, class: &'static DocumentClass) -> Self {
        Self {
            connection,
            class,
            filter: None,
            include: Vec::new(),
            exclude: Vec::new(),
            elem_matches: Vec::new(),
            sort: Vec::new(),
            skip: None,
            limit: None,
            timezone: None,
        }
    }

    /// Localize datetimes on materialized instances to `tz`.
    #[must_use]
    pub fn timezone(mut self, tz: Option<FixedOffset>) -> Self {
        self.timezone = tz;
        self
    }

    /// Add a filter condition; repeated calls conjoin.
    #[must_use]
    pub fn filter(mut self, expr: QueryExpr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    /// Retrieve only the named fields (plus the identity field).
    #[must_use]
    pub fn fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.include.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Retrieve everything except the named fields.
    #[must_use]
    pub fn exclude_fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.exclude.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Project an array field down to its first element matching
    /// `condition` (an `$elemMatch` projection).
    #[must_use]
    pub fn fields_elem_match(mut self, path: impl Into<String>, condition: QueryExpr) -> Self {
        self.elem_matches.push((path.into(), condition));
        self
    }

    /// Append a sort key.
    #[must_use]
    pub fn sort(mut self, path: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((path.into(), order));
        self
    }

    /// Sort ascending by `path`.
    #[must_use]
    pub fn ascending(self, path: impl Into<String>) -> Self {
        self.sort(path, SortOrder::Ascending)
    }

    /// Sort descending by `path`.
    #[must_use]
    pub fn descending(self, path: impl Into<String>) -> Self {
        self.sort(path, SortOrder::Descending)
    }

    /// Skip the first `n` matches.
    #[must_use]
    pub fn skip(mut self, n: u64) -> Self {
        self.skip = Some(n);
        self
    }

    /// Yield at most `n` matches.
    #[must_use]
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Compile the filter alone, for callers that only need the filter
    /// document (e.g. queue-level removes).
    pub fn compile_filter(&self) -> Result<Doc> {
        match &self.filter {
            Some(expr) => expr.compile(self.class),
            None => Ok(Doc::new()),
        }
    }

    /// Execute and return a lazy cursor over the matches.
    pub fn execute(&self) -> Result<Cursor> {
        let filter = self.compile_filter()?;

        // Paths under an elem-match projection come back as the matched
        // element only; plain dotted conditions through them are ambiguous.
        let mut restricted = Vec::with_capacity(self.elem_matches.len());
        for (path, _) in &self.elem_matches {
            restricted.push(path::resolve_element(self.class, path)?);
        }
        for resolved in &restricted {
            check_no_descent(&filter, resolved.wire_path())?;
        }

        let projection = self.compile_projection(&restricted)?;
        let mut sort = Vec::with_capacity(self.sort.len());
        for (sort_path, order) in &self.sort {
            let resolved = path::resolve(self.class, sort_path)?;
            sort.push((resolved.wire_path().to_string(), *order));
        }

        let options = FindOptions {
            projection,
            sort,
            skip: self.skip,
            limit: self.limit,
        };
        debug!(
            collection = self.class.collection,
            filter = %filter.to_json(),
            "executing query"
        );
        let raw = self.connection.find(self.class.collection, &filter, &options)?;

        let retrieved = self.retrieved_fields();
        let elem_fields = self
            .elem_matches
            .iter()
            .map(|(path, _)| top_segment(path).to_string())
            .collect();
        Ok(Cursor {
            class: self.class,
            timezone: self.timezone,
            retrieved,
            elem_fields,
            raw: raw.into_iter(),
        })
    }

    /// Execute and collect every match.
    pub fn all(&self) -> Result<Vec<Instance>> {
        self.execute()?.collect()
    }

    /// The first match, or `NoResult`.
    pub fn first(mut self) -> Result<Instance> {
        self.limit = Some(1);
        match self.execute()?.next() {
            Some(instance) => instance,
            None => Err(Error::no_result(self.class.collection)),
        }
    }

    /// Exactly one match, or `NoResult` / `MultipleResults`.
    pub fn one(mut self) -> Result<Instance> {
        // Two rows are enough to prove multiplicity.
        self.limit = Some(2);
        let mut cursor = self.execute()?;
        let Some(first) = cursor.next() else {
            return Err(Error::no_result(self.class.collection));
        };
        if cursor.next().is_some() {
            return Err(Error::multiple_results(self.class.collection));
        }
        first
    }

    fn compile_projection(
        &self,
        elem_restricted: &[path::ResolvedField],
    ) -> Result<Option<Doc>> {
        if self.include.is_empty() && self.exclude.is_empty() && elem_restricted.is_empty() {
            return Ok(None);
        }
        let mut projection = Doc::new();
        for include in &self.include {
            let resolved = path::resolve(self.class, include)?;
            projection.insert(resolved.wire_path(), Value::Int32(1));
        }
        for exclude in &self.exclude {
            let resolved = path::resolve(self.class, exclude)?;
            projection.insert(resolved.wire_path(), Value::Int32(0));
        }
        for ((_, condition), resolved) in self.elem_matches.iter().zip(elem_restricted) {
            let class = resolved.element_class().ok_or_else(|| {
                Error::bad_query(
                    Some(resolved.path().to_string()),
                    "elem_match projection requires an array of documents",
                )
            })?;
            let sub = condition.compile(class)?;
            projection.insert(
                resolved.wire_path(),
                Value::Doc(docmodel_core::doc! { "$elemMatch" => sub }),
            );
        }
        Ok(Some(projection))
    }

    /// The application-side top-level field names the projection retrieves,
    /// or `None` for an unprojected load.
    fn retrieved_fields(&self) -> Option<Vec<String>> {
        if self.include.is_empty() && self.elem_matches.is_empty() {
            if self.exclude.is_empty() {
                return None;
            }
            let excluded: Vec<&str> = self.exclude.iter().map(|p| top_segment(p)).collect();
            return Some(
                self.class
                    .fields
                    .iter()
                    .map(|f| f.name.to_string())
                    .filter(|name| !excluded.contains(&name.as_str()))
                    .collect(),
            );
        }
        let mut fields: Vec<String> = self
            .include
            .iter()
            .chain(self.elem_matches.iter().map(|(p, _)| p))
            .map(|p| top_segment(p).to_string())
            .collect();
        // The identity field always comes back with an include projection.
        let id = self.class.id_field.to_string();
        if !fields.contains(&id) {
            fields.push(id);
        }
        Some(fields)
    }
}

/// First segment of a dotted path.
fn top_segment(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

/// Reject any filter key that descends *through* an elem-match-restricted
/// wire path.
fn check_no_descent(filter: &Doc, restricted: &str) -> Result<()> {
    for (key, value) in filter.iter() {
        if key == "$and" || key == "$or" {
            if let Value::Array(branches) = value {
                for branch in branches {
                    if let Value::Doc(doc) = branch {
                        check_no_descent(doc, restricted)?;
                    }
                }
            }
            continue;
        }
        if key
            .strip_prefix(restricted)
            .is_some_and(|rest| rest.starts_with('.'))
        {
            return Err(Error::ambiguous_projection(key.clone()));
        }
    }
    Ok(())
}

/// A lazy, forward-only sequence of query results.
///
/// Raw documents are unmarshalled one at a time as the cursor is advanced;
/// a malformed stored document surfaces as an `Err` item rather than
/// poisoning the whole result set.
pub struct Cursor {
    class: &'static DocumentClass,
    timezone: Option<FixedOffset>,
    /// Top-level field names retrieved by the projection (`None`: all).
    retrieved: Option<Vec<String>>,
    /// Fields restricted to their matched element by the projection.
    elem_fields: Vec<String>,
    raw: std::vec::IntoIter<Doc>,
}

impl Cursor {
    fn materialize(&self, wire: &Doc) -> Result<Instance> {
        let class = self.class.concrete_class(wire);
        let values = self.class.unmarshal(wire, self.timezone)?;
        let mut instance = match &self.retrieved {
            Some(fields) => Instance::from_projected(class, values, fields.iter().cloned()),
            None => Instance::from_values(class, values),
        };
        for field in &self.elem_fields {
            instance.restrict_elem_matched(field.clone());
        }
        Ok(instance)
    }

    /// Collect all remaining results.
    pub fn collect(self) -> Result<Vec<Instance>> {
        let mut out = Vec::new();
        for item in self {
            out.push(item?);
        }
        Ok(out)
    }
}

impl Iterator for Cursor {
    type Item = Result<Instance>;

    fn next(&mut self) -> Option<Self::Item> {
        let wire = self.raw.next()?;
        Some(self.materialize(&wire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::field;
    use docmodel_core::{FieldDef, FieldKind, IndexInfo, WriteAck, doc};
    use serde_json::json;
    use std::cell::RefCell;

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
            FieldDef::new("addresses", FieldKind::Array(&FieldKind::Doc(&ADDRESS))),
        ],
        subclasses: &[],
        discriminator: None,
    };

    /// Serves canned documents and records what it was asked.
    struct FakeConnection {
        docs: Vec<Doc>,
        calls: RefCell<Vec<(Doc, FindOptions)>>,
    }

    impl FakeConnection {
        fn new(docs: Vec<Doc>) -> Self {
            Self {
                docs,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl Connection for FakeConnection {
        fn find(&self, _: &str, filter: &Doc, options: &FindOptions) -> Result<Vec<Doc>> {
            self.calls
                .borrow_mut()
                .push((filter.clone(), options.clone()));
            let mut docs = self.docs.clone();
            if let Some(limit) = options.limit {
                docs.truncate(limit as usize);
            }
            Ok(docs)
        }

        fn insert(&self, _: &str, _: Doc) -> Result<Value> {
            unimplemented!("read-only fake")
        }

        fn update(&self, _: &str, _: &Doc, _: &Doc, _: bool) -> Result<WriteAck> {
            unimplemented!("read-only fake")
        }

        fn remove(&self, _: &str, _: &Doc) -> Result<WriteAck> {
            unimplemented!("read-only fake")
        }

        fn list_indexes(&self, _: &str) -> Result<Vec<IndexInfo>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn repeated_filters_conjoin() {
        let conn = FakeConnection::new(vec![]);
        let _ = QueryBuilder::new(&conn, &PERSON)
            .filter(field("age").gte(18))
            .filter(field("age").lt(65))
            .all()
            .unwrap();
        let calls = conn.calls.borrow();
        assert_eq!(
            serde_json::to_value(&calls[0].0).unwrap(),
            json!({"age": {"$gte": 18, "$lt": 65}})
        );
    }

    #[test]
    fn sort_keys_resolve_to_wire_names() {
        let conn = FakeConnection::new(vec![]);
        let _ = QueryBuilder::new(&conn, &PERSON)
            .descending("age")
            .ascending("id")
            .all()
            .unwrap();
        let calls = conn.calls.borrow();
        assert_eq!(
            calls[0].1.sort,
            vec![
                ("age".to_string(), SortOrder::Descending),
                ("_id".to_string(), SortOrder::Ascending),
            ]
        );
    }

    #[test]
    fn one_demands_exactly_one() {
        let doc = doc! { "name" => "Ann" };

        let conn = FakeConnection::new(vec![]);
        let err = QueryBuilder::new(&conn, &PERSON).one().unwrap_err();
        assert!(err.is_result_error());

        let conn = FakeConnection::new(vec![doc.clone()]);
        let got = QueryBuilder::new(&conn, &PERSON).one().unwrap();
        assert_eq!(got.get("name").unwrap(), &Value::from("Ann"));

        let conn = FakeConnection::new(vec![doc.clone(), doc]);
        let err = QueryBuilder::new(&conn, &PERSON).one().unwrap_err();
        assert!(err.is_result_error());
    }

    #[test]
    fn first_limits_to_one_row() {
        let conn = FakeConnection::new(vec![doc! { "name" => "Ann" }]);
        let _ = QueryBuilder::new(&conn, &PERSON).first().unwrap();
        assert_eq!(conn.calls.borrow()[0].1.limit, Some(1));

        let conn = FakeConnection::new(vec![]);
        let err = QueryBuilder::new(&conn, &PERSON).first().unwrap_err();
        assert!(err.is_result_error());
    }

    #[test]
    fn include_projection_marks_missing_fields_unretrieved() {
        let conn = FakeConnection::new(vec![doc! { "name" => "Ann" }]);
        let results = QueryBuilder::new(&conn, &PERSON)
            .fields(["name"])
            .all()
            .unwrap();
        let inst = &results[0];
        assert!(inst.get("name").is_ok());
        assert!(inst.get("age").unwrap_err().is_field_not_retrieved());
        // Identity rides along with every include projection.
        assert!(inst.get("id").is_ok());

        let calls = conn.calls.borrow();
        assert_eq!(
            serde_json::to_value(calls[0].1.projection.as_ref().unwrap()).unwrap(),
            json!({"name": 1})
        );
    }

    #[test]
    fn elem_match_projection_compiles_and_restricts() {
        let conn = FakeConnection::new(vec![doc! {
            "name" => "Ann",
            "addresses" => vec![doc! { "city" => "Oslo" }],
        }]);
        let results = QueryBuilder::new(&conn, &PERSON)
            .fields_elem_match("addresses", field("city").eq("Oslo"))
            .all()
            .unwrap();

        let calls = conn.calls.borrow();
        assert_eq!(
            serde_json::to_value(calls[0].1.projection.as_ref().unwrap()).unwrap(),
            json!({"addresses": {"$elemMatch": {"city": "Oslo"}}})
        );

        let mut inst = results.into_iter().next().unwrap();
        let err = inst
            .set("addresses", vec![doc! { "city" => "Bergen" }])
            .unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn dotted_filter_through_elem_match_projection_is_rejected() {
        let conn = FakeConnection::new(vec![]);
        let err = QueryBuilder::new(&conn, &PERSON)
            .fields_elem_match("addresses", field("city").eq("Oslo"))
            .filter(field("addresses.zip").gt(1000))
            .all()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Query(docmodel_core::QueryError {
                kind: docmodel_core::QueryErrorKind::AmbiguousProjection,
                ..
            })
        ));
    }

    #[test]
    fn timezone_localizes_materialized_datetimes() {
        use chrono::{TimeZone, Utc};

        static EVENT: DocumentClass = DocumentClass {
            name: "Event",
            collection: "events",
            id_field: "id",
            fields: &[
                FieldDef::new("id", FieldKind::ObjectId).wire("_id"),
                FieldDef::new("at", FieldKind::DateTime),
            ],
            subclasses: &[],
            discriminator: None,
        };

        let stored = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let conn = FakeConnection::new(vec![doc! { "at" => stored }]);
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let results = QueryBuilder::new(&conn, &EVENT)
            .timezone(Some(tz))
            .all()
            .unwrap();
        let Value::DateTime(dt) = results[0].get("at").unwrap() else {
            panic!("expected datetime");
        };
        assert_eq!(dt.offset().local_minus_utc(), 2 * 3600);
        assert_eq!(dt.timestamp(), stored.timestamp());
    }
}
