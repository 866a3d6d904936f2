//! The unit-of-work session.
//!
//! A `Session` owns one database connection, a FIFO queue of pending
//! write operations, and a per-identity cache of the last-known wire
//! document for everything it has queued or flushed. Writes are deferred:
//! `insert`/`save` reserve an identity immediately and queue the
//! marshalled document; nothing touches the database until [`flush`],
//! a read, or scope exit.
//!
//! One session is one logical thread of control. There is no internal
//! locking; callers needing concurrency use one session per task.
//!
//! [`flush`]: Session::flush

use chrono::FixedOffset;
use docmodel_core::{
    Connection, Doc, Document, DocumentClass, Error, FieldKind, IndexInfo, Instance, ObjectId,
    Result, Value, WriteAck, doc,
};
use docmodel_query::{QueryBuilder, QueryExpr, UpdateExpr};
use tracing::{debug, error};

use crate::pending::{PendingKind, PendingOp, PendingQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Active,
    Ended,
}

/// Last-known wire document for one queued or flushed identity.
struct CacheEntry {
    collection: &'static str,
    identity: Value,
    wire: Doc,
}

/// Unit-of-work manager bound to one connection.
pub struct Session<C: Connection> {
    connection: C,
    state: SessionState,
    timezone: Option<FixedOffset>,
    /// Check write acknowledgements during flush.
    safe: bool,
    queue: PendingQueue,
    cache: Vec<CacheEntry>,
    scope_depth: u32,
}

impl<C: Connection> Session<C> {
    /// Create an active session over `connection`. Writes are
    /// acknowledgement-checked by default.
    pub fn new(connection: C) -> Self {
        Self {
            connection,
            state: SessionState::Active,
            timezone: None,
            safe: true,
            queue: PendingQueue::new(),
            cache: Vec::new(),
            scope_depth: 0,
        }
    }

    /// Localize datetimes materialized by this session's queries to `tz`.
    #[must_use]
    pub fn with_timezone(mut self, tz: FixedOffset) -> Self {
        self.timezone = Some(tz);
        self
    }

    /// Turn write-acknowledgement checking on or off.
    #[must_use]
    pub fn with_safe(mut self, safe: bool) -> Self {
        self.safe = safe;
        self
    }

    pub fn set_timezone(&mut self, tz: Option<FixedOffset>) {
        self.timezone = tz;
    }

    pub fn timezone(&self) -> Option<FixedOffset> {
        self.timezone
    }

    /// Whether the session still accepts operations.
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Number of queued, unflushed operations.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// The underlying connection.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Ended => Err(Error::session_ended()),
        }
    }

    /// Queue an insert for `obj`.
    ///
    /// If the object has no identity yet, one is reserved and written
    /// onto it now, so queries and other queued operations issued before
    /// flush can already refer to it.
    pub fn insert<T: Document>(&mut self, obj: &mut T) -> Result<()> {
        self.queue_write(obj, false)
    }

    /// Queue a whole-document save (replace, upserting) for `obj`.
    pub fn save<T: Document>(&mut self, obj: &mut T) -> Result<()> {
        self.queue_write(obj, true)
    }

    fn queue_write<T: Document>(&mut self, obj: &mut T, replace: bool) -> Result<()> {
        self.ensure_active()?;
        let class = T::class();
        let id = self.reserve_identity(obj, class)?;
        let mut fields = obj.to_doc()?;
        fields.insert(class.id_field, id.clone());
        let wire = class.marshal(&fields)?;

        let kind = if replace {
            PendingKind::Save {
                filter: identity_filter(class, &id)?,
                doc: wire.clone(),
            }
        } else {
            PendingKind::Insert(wire.clone())
        };
        self.cache_put(class.collection, id.clone(), wire);
        self.queue.enqueue(PendingOp {
            collection: class.collection,
            identity: Some(id),
            kind,
        });
        Ok(())
    }

    fn reserve_identity<T: Document>(
        &self,
        obj: &mut T,
        class: &'static DocumentClass,
    ) -> Result<Value> {
        if let Some(id) = obj.id() {
            return Ok(id);
        }
        if !matches!(class.id_def().kind, FieldKind::ObjectId | FieldKind::Any) {
            return Err(Error::bad_value(
                class.name,
                class.id_field,
                "identity must be assigned before queueing; only object-id \
                 identities can be reserved automatically",
            ));
        }
        let id = Value::ObjectId(ObjectId::new());
        obj.set_id(id.clone());
        Ok(id)
    }

    /// Queue a targeted update against `obj`'s identity.
    ///
    /// The update is compiled now, so an empty update or a schema
    /// mismatch fails at queue time, not at flush.
    pub fn update<T: Document>(&mut self, obj: &T, update: &UpdateExpr) -> Result<()> {
        self.ensure_active()?;
        let class = T::class();
        let id = obj.id().ok_or_else(|| {
            Error::bad_query(None, "cannot queue an update for an object without identity")
        })?;
        let filter = identity_filter(class, &id)?;
        let compiled = update.compile()?;
        self.queue.enqueue(PendingOp {
            collection: class.collection,
            identity: None,
            kind: PendingKind::Update {
                filter,
                update: compiled,
                upsert: update.is_upsert(),
            },
        });
        Ok(())
    }

    /// Queue an update against everything matching `filter`.
    pub fn update_where(&mut self, filter: &QueryExpr, update: &UpdateExpr) -> Result<()> {
        self.ensure_active()?;
        let class = update.class();
        let filter = filter.compile(class)?;
        let compiled = update.compile()?;
        self.queue.enqueue(PendingOp {
            collection: class.collection,
            identity: None,
            kind: PendingKind::Update {
                filter,
                update: compiled,
                upsert: update.is_upsert(),
            },
        });
        Ok(())
    }

    /// Queue a removal of `obj`.
    ///
    /// Removing an object that never got an identity is a no-op: nothing
    /// matching it can exist in the database. A queued remove supersedes
    /// any pending write for the same identity.
    pub fn remove<T: Document>(&mut self, obj: &T) -> Result<()> {
        self.ensure_active()?;
        let Some(id) = obj.id() else {
            return Ok(());
        };
        let class = T::class();
        let filter = identity_filter(class, &id)?;
        self.cache_remove(class.collection, &id);
        self.queue.enqueue(PendingOp {
            collection: class.collection,
            identity: Some(id),
            kind: PendingKind::Remove { filter },
        });
        Ok(())
    }

    /// Queue a removal of everything in `class`'s collection matching
    /// `filter`.
    pub fn remove_where(&mut self, class: &'static DocumentClass, filter: &QueryExpr) -> Result<()> {
        self.ensure_active()?;
        let filter = filter.compile(class)?;
        self.queue.enqueue(PendingOp {
            collection: class.collection,
            identity: None,
            kind: PendingKind::Remove { filter },
        });
        Ok(())
    }

    /// Start a query over `class`.
    ///
    /// Pending writes are flushed first so the query observes them
    /// (read-your-writes within one session).
    pub fn query(&mut self, class: &'static DocumentClass) -> Result<QueryBuilder<'_, C>> {
        self.ensure_active()?;
        self.flush()?;
        Ok(QueryBuilder::new(&self.connection, class).timezone(self.timezone))
    }

    /// Typed convenience over [`query`](Session::query).
    pub fn query_as<T: Document>(&mut self) -> Result<QueryBuilder<'_, C>> {
        self.query(T::class())
    }

    /// The session's last-known copy of the document with `id`, without
    /// touching the database. Queued inserts and saves are visible here
    /// before flush.
    pub fn cached(&self, class: &'static DocumentClass, id: &Value) -> Result<Option<Instance>> {
        self.ensure_active()?;
        let entry = self
            .cache
            .iter()
            .find(|e| e.collection == class.collection && &e.identity == id);
        match entry {
            Some(entry) => {
                let values = class.unmarshal(&entry.wire, self.timezone)?;
                Ok(Some(Instance::from_values(class, values)))
            }
            None => Ok(None),
        }
    }

    /// Submit every queued operation in FIFO order.
    ///
    /// With acknowledgement checking on, an unacknowledged write fails
    /// the flush with `BadResult` naming the offending queue position.
    /// Flush is fail-fast and non-atomic: operations executed before the
    /// failure stay applied, the failing operation is dropped, and the
    /// unexecuted tail stays queued for a later flush.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_active()?;
        if self.queue.is_empty() {
            return Ok(());
        }
        debug!(ops = self.queue.len(), "flushing session queue");
        let mut index = 0;
        while let Some(op) = self.queue.pop_front() {
            self.execute(&op, index)?;
            index += 1;
        }
        Ok(())
    }

    fn execute(&mut self, op: &PendingOp, index: usize) -> Result<()> {
        match &op.kind {
            PendingKind::Insert(wire) => {
                let assigned = self.connection.insert(op.collection, wire.clone())?;
                if self.safe && assigned.is_null() {
                    return Err(Error::bad_result(
                        Some(index),
                        op.collection,
                        "insert returned no identity",
                    ));
                }
                // The reserved identity normally comes back unchanged; a
                // server-assigned one replaces the placeholder entry.
                if op.identity.as_ref() != Some(&assigned) {
                    if let Some(placeholder) = &op.identity {
                        self.cache_remove(op.collection, placeholder);
                    }
                    self.cache_put(op.collection, assigned, wire.clone());
                }
            }
            PendingKind::Save { filter, doc } => {
                let ack = self.connection.update(op.collection, filter, doc, true)?;
                self.check_ack(&ack, index, op)?;
            }
            PendingKind::Update {
                filter,
                update,
                upsert,
            } => {
                let ack = self.connection.update(op.collection, filter, update, *upsert)?;
                self.check_ack(&ack, index, op)?;
            }
            PendingKind::Remove { filter } => {
                let ack = self.connection.remove(op.collection, filter)?;
                self.check_ack(&ack, index, op)?;
            }
        }
        Ok(())
    }

    fn check_ack(&self, ack: &WriteAck, index: usize, op: &PendingOp) -> Result<()> {
        if self.safe && !ack.acknowledged {
            return Err(Error::bad_result(
                Some(index),
                op.collection,
                format!("{} was not acknowledged", op.kind.name()),
            ));
        }
        Ok(())
    }

    /// Discard the queue without executing it. Already-flushed state is
    /// unaffected.
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.queue.clear();
        Ok(())
    }

    /// Immediately remove every document in each class's collection,
    /// bypassing the queue. Irreversible and unscoped by any filter.
    pub fn clear_collection(&mut self, classes: &[&'static DocumentClass]) -> Result<()> {
        self.ensure_active()?;
        for class in classes {
            let ack = self.connection.remove(class.collection, &Doc::new())?;
            if self.safe && !ack.acknowledged {
                return Err(Error::bad_result(
                    None,
                    class.collection,
                    "remove-all was not acknowledged",
                ));
            }
            self.cache.retain(|e| e.collection != class.collection);
        }
        Ok(())
    }

    /// Index metadata for `class`'s collection.
    pub fn get_indexes(&self, class: &'static DocumentClass) -> Result<Vec<IndexInfo>> {
        self.ensure_active()?;
        self.connection.list_indexes(class.collection)
    }

    /// Flush, end the session, and release connection affinity. Every
    /// later operation fails with `SessionEnded`.
    pub fn end(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.flush()?;
        self.state = SessionState::Ended;
        self.connection.end_request();
        Ok(())
    }

    /// Enter a session scope.
    ///
    /// Scopes nest; releasing the outermost scope flushes and ends the
    /// session. Prefer [`SessionScope::close`] over relying on `Drop`,
    /// which can only log a failed flush.
    pub fn scope(&mut self) -> Result<SessionScope<'_, C>> {
        self.ensure_active()?;
        self.scope_depth += 1;
        Ok(SessionScope {
            session: self,
            released: false,
        })
    }

    fn exit_scope(&mut self) -> Result<()> {
        self.scope_depth = self.scope_depth.saturating_sub(1);
        if self.scope_depth == 0 { self.end() } else { Ok(()) }
    }

    fn cache_put(&mut self, collection: &'static str, identity: Value, wire: Doc) {
        if let Some(entry) = self
            .cache
            .iter_mut()
            .find(|e| e.collection == collection && e.identity == identity)
        {
            entry.wire = wire;
            return;
        }
        self.cache.push(CacheEntry {
            collection,
            identity,
            wire,
        });
    }

    fn cache_remove(&mut self, collection: &'static str, identity: &Value) {
        self.cache
            .retain(|e| !(e.collection == collection && &e.identity == identity));
    }
}

/// Filter matching exactly the document with `id`, with the identity
/// converted to its wire representation.
fn identity_filter(class: &'static DocumentClass, id: &Value) -> Result<Doc> {
    let def = class.id_def();
    let wire = def
        .kind
        .to_wire(id.clone())
        .map_err(|detail| Error::bad_value(class.name, class.id_field, detail))?;
    Ok(doc! { def.wire_name => wire })
}

/// Guard for scoped session use.
///
/// Dropping the guard releases the scope; the outermost release flushes
/// and ends the session. `Drop` cannot surface a flush error, so it is
/// logged at error level instead; call [`close`](SessionScope::close) to
/// observe it.
pub struct SessionScope<'a, C: Connection> {
    session: &'a mut Session<C>,
    released: bool,
}

impl<C: Connection> SessionScope<'_, C> {
    /// Release the scope, surfacing any flush failure.
    pub fn close(mut self) -> Result<()> {
        self.released = true;
        self.session.exit_scope()
    }
}

impl<C: Connection> std::ops::Deref for SessionScope<'_, C> {
    type Target = Session<C>;

    fn deref(&self) -> &Self::Target {
        self.session
    }
}

impl<C: Connection> std::ops::DerefMut for SessionScope<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
    }
}

impl<C: Connection> Drop for SessionScope<'_, C> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.session.exit_scope() {
            error!(error = %err, "session scope exit failed");
        }
    }
}
