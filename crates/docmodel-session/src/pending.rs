//! The pending-operation queue backing a session.
//!
//! Operations are executed in strict FIFO order at flush time. Writes
//! keyed by a document identity keep at most one slot per
//! `(collection, identity)` pair: a later keyed operation on the same
//! identity supersedes the earlier one in place, keeping its queue
//! position, so flushing twice can never apply the same logical write
//! twice.

use docmodel_core::{Doc, Value};

/// What a queued operation does when flushed.
#[derive(Debug, Clone)]
pub enum PendingKind {
    /// Insert a new document.
    Insert(Doc),
    /// Replace the whole document matching the identity (upserting).
    Save { filter: Doc, doc: Doc },
    /// Apply an update document to whatever matches `filter`.
    Update {
        filter: Doc,
        update: Doc,
        upsert: bool,
    },
    /// Remove whatever matches `filter`.
    Remove { filter: Doc },
}

impl PendingKind {
    /// Short operation name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            PendingKind::Insert(_) => "insert",
            PendingKind::Save { .. } => "save",
            PendingKind::Update { .. } => "update",
            PendingKind::Remove { .. } => "remove",
        }
    }
}

/// One queued operation.
#[derive(Debug, Clone)]
pub struct PendingOp {
    /// Target collection.
    pub collection: &'static str,
    /// Identity this operation is keyed by, when it targets exactly one
    /// document. Filter-driven updates and removes are unkeyed.
    pub identity: Option<Value>,
    pub kind: PendingKind,
}

/// FIFO queue with per-identity superseding.
#[derive(Debug, Default)]
pub struct PendingQueue {
    ops: Vec<PendingOp>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Queue an operation. A keyed operation replaces any earlier keyed
    /// operation on the same `(collection, identity)`, keeping the
    /// original queue position.
    pub fn enqueue(&mut self, op: PendingOp) {
        if let Some(id) = &op.identity {
            if let Some(slot) = self
                .ops
                .iter_mut()
                .find(|o| o.collection == op.collection && o.identity.as_ref() == Some(id))
            {
                *slot = op;
                return;
            }
        }
        self.ops.push(op);
    }

    /// The operation at the head of the queue.
    pub fn front(&self) -> Option<&PendingOp> {
        self.ops.first()
    }

    /// Drop the head of the queue.
    pub fn pop_front(&mut self) -> Option<PendingOp> {
        if self.ops.is_empty() {
            None
        } else {
            Some(self.ops.remove(0))
        }
    }

    /// Discard every queued operation without executing it.
    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingOp> {
        self.ops.iter()
    }
}
