//! End-to-end session scenarios against the in-memory backend.

use docmodel::prelude::*;

static PERSON: DocumentClass = DocumentClass {
    name: "Person",
    collection: "people",
    id_field: "id",
    fields: &[
        FieldDef::new("id", FieldKind::ObjectId).wire("_id"),
        FieldDef::new("name", FieldKind::String).required(true),
        FieldDef::new("age", FieldKind::Int),
    ],
    subclasses: &[],
    discriminator: None,
};

struct Person {
    id: Option<Value>,
    name: String,
    age: i64,
}

impl Person {
    fn new(name: &str, age: i64) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            age,
        }
    }
}

impl Document for Person {
    fn class() -> &'static DocumentClass {
        &PERSON
    }

    fn to_doc(&self) -> Result<Doc> {
        let mut doc = doc! { "name" => self.name.clone(), "age" => self.age };
        if let Some(id) = &self.id {
            doc.insert("id", id.clone());
        }
        Ok(doc)
    }

    fn from_doc(doc: &Doc) -> Result<Self> {
        Ok(Self {
            id: doc.get("id").cloned(),
            name: doc
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            age: doc.get("age").and_then(Value::as_i64).unwrap_or_default(),
        })
    }

    fn id(&self) -> Option<Value> {
        self.id.clone()
    }

    fn set_id(&mut self, id: Value) {
        self.id = Some(id);
    }
}

fn session() -> Session<MemoryConnection> {
    Session::new(MemoryConnection::new())
}

#[test]
fn insert_flush_query_one_roundtrip() {
    let mut session = session();
    let mut ann = Person::new("Ann", 32);
    session.insert(&mut ann).unwrap();
    session.flush().unwrap();

    let found = session
        .query(&PERSON)
        .unwrap()
        .filter(field("name").eq("Ann"))
        .one()
        .unwrap();
    assert_eq!(found.get("name").unwrap(), &Value::from("Ann"));
    assert!(
        matches!(found.get("id").unwrap(), Value::ObjectId(_)),
        "flushed document carries its identity"
    );

    let typed: Person = found.typed().unwrap();
    assert_eq!(typed.age, 32);
    assert_eq!(typed.id, ann.id);
}

#[test]
fn queued_insert_is_visible_before_flush() {
    let mut session = session();
    let mut ann = Person::new("Ann", 32);
    session.insert(&mut ann).unwrap();

    let id = ann.id().unwrap();
    let cached = session.cached(&PERSON, &id).unwrap().unwrap();
    assert_eq!(cached.get("name").unwrap(), &Value::from("Ann"));
}

#[test]
fn sort_descending_first_returns_the_oldest_match() {
    let mut session = session();
    for (name, age) in [("Ann", 32), ("Bob", 45), ("Cal", 19)] {
        let mut person = Person::new(name, age);
        session.insert(&mut person).unwrap();
    }

    let oldest = session
        .query(&PERSON)
        .unwrap()
        .filter(field("age").gt(30))
        .descending("age")
        .first()
        .unwrap();
    assert_eq!(oldest.get("name").unwrap(), &Value::from("Bob"));

    let err = session
        .query(&PERSON)
        .unwrap()
        .filter(field("age").gt(100))
        .descending("age")
        .first()
        .unwrap_err();
    assert!(err.is_result_error());
}

#[test]
fn clear_collection_leaves_nothing_behind() {
    let mut session = session();
    let mut ann = Person::new("Ann", 32);
    session.insert(&mut ann).unwrap();
    session.flush().unwrap();

    session.clear_collection(&[&PERSON]).unwrap();
    let all = session.query(&PERSON).unwrap().all().unwrap();
    assert!(all.is_empty());
}

#[test]
fn remove_before_flush_supersedes_the_insert() {
    let mut session = session();
    let mut ann = Person::new("Ann", 32);
    session.insert(&mut ann).unwrap();
    session.remove(&ann).unwrap();
    session.flush().unwrap();

    let all = session.query(&PERSON).unwrap().all().unwrap();
    assert!(all.is_empty());
}

#[test]
fn targeted_and_filtered_updates_apply() {
    let mut session = session();
    let mut ann = Person::new("Ann", 32);
    let mut bob = Person::new("Bob", 45);
    session.insert(&mut ann).unwrap();
    session.insert(&mut bob).unwrap();

    let bump = UpdateExpr::new(&PERSON).inc("age", 1).unwrap();
    session.update(&ann, &bump).unwrap();

    let rename = UpdateExpr::new(&PERSON).set("name", "Robert").unwrap();
    session
        .update_where(&field("age").gte(40), &rename)
        .unwrap();

    let ann_row = session
        .query(&PERSON)
        .unwrap()
        .filter(field("name").eq("Ann"))
        .one()
        .unwrap();
    assert_eq!(ann_row.get("age").unwrap(), &Value::Int64(33));

    let bob_row = session
        .query(&PERSON)
        .unwrap()
        .filter(field("age").eq(45))
        .one()
        .unwrap();
    assert_eq!(bob_row.get("name").unwrap(), &Value::from("Robert"));
}

#[test]
fn save_replaces_the_stored_document() {
    let mut session = session();
    let mut ann = Person::new("Ann", 32);
    session.insert(&mut ann).unwrap();
    session.flush().unwrap();

    ann.age = 33;
    session.save(&mut ann).unwrap();
    session.flush().unwrap();

    let row = session
        .query(&PERSON)
        .unwrap()
        .filter(field("name").eq("Ann"))
        .one()
        .unwrap();
    assert_eq!(row.get("age").unwrap(), &Value::Int64(33));
}

#[test]
fn scope_close_flushes_and_ends() {
    let mut session = session();
    {
        let mut scope = session.scope().unwrap();
        let mut ann = Person::new("Ann", 32);
        scope.insert(&mut ann).unwrap();
        scope.close().unwrap();
    }
    assert!(!session.is_active());
    assert!(session.flush().is_err());

    // The write reached the store even though the session has ended.
    let rows = session
        .connection()
        .find("people", &Doc::new(), &Default::default())
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[test]
fn ended_session_rejects_queueing() {
    let mut session = session();
    session.end().unwrap();
    let mut ann = Person::new("Ann", 32);
    let err = session.insert(&mut ann).unwrap_err();
    assert!(matches!(err, Error::Session(_)));
}

#[test]
fn get_indexes_reports_the_identity_index() {
    let session = session();
    let indexes = session.get_indexes(&PERSON).unwrap();
    assert_eq!(indexes.len(), 1);
    assert_eq!(indexes[0].name, "_id_");
    assert!(indexes[0].unique);
}
