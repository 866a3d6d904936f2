//! Update-operator accumulation and compilation.

use docmodel_core::{Doc, DocumentClass, Error, Result, Value};
use tracing::warn;

use crate::path;

/// One accumulated update clause.
#[derive(Debug, Clone)]
struct Clause {
    op: &'static str,
    wire_path: String,
    value: Value,
}

/// An update document under construction, bound to a document class.
///
/// Operator methods validate the field path and value immediately and
/// accumulate clauses in call order. Repeating an operator on a field
/// replaces that clause's value in place. Applying a *different* operator
/// to a field already claimed by another one discards the earlier clause
/// and logs a warning; one update document cannot apply two operators to
/// one field.
#[derive(Debug, Clone)]
pub struct UpdateExpr {
    class: &'static DocumentClass,
    clauses: Vec<Clause>,
    upsert: bool,
}

impl UpdateExpr {
    /// Start an empty update for `class`.
    pub fn new(class: &'static DocumentClass) -> Self {
        Self {
            class,
            clauses: Vec::new(),
            upsert: false,
        }
    }

    /// The class this update is bound to.
    pub fn class(&self) -> &'static DocumentClass {
        self.class
    }

    /// Request an upsert when this update is executed.
    #[must_use]
    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    /// Whether this update requests upsert execution.
    pub fn is_upsert(&self) -> bool {
        self.upsert
    }

    /// `$set` a field to a value.
    pub fn set(self, path: &str, value: impl Into<Value>) -> Result<Self> {
        let resolved = path::resolve(self.class, path)?;
        let wire = resolved.wrap(value.into())?;
        Ok(self.push_clause("$set", resolved.wire_path(), wire))
    }

    /// `$unset` (delete) a field.
    pub fn unset(self, path: &str) -> Result<Self> {
        let resolved = path::resolve(self.class, path)?;
        Ok(self.push_clause("$unset", resolved.wire_path(), Value::Int32(1)))
    }

    /// `$inc` a numeric field by `amount`.
    pub fn inc(self, path: &str, amount: impl Into<Value>) -> Result<Self> {
        let resolved = path::resolve(self.class, path)?;
        let amount = amount.into();
        if !matches!(
            amount,
            Value::Int32(_) | Value::Int64(_) | Value::Double(_)
        ) {
            return Err(Error::bad_value(
                self.class.name,
                path,
                format!("$inc amount must be numeric, got {}", amount.type_name()),
            ));
        }
        let wire = resolved.wrap(amount)?;
        Ok(self.push_clause("$inc", resolved.wire_path(), wire))
    }

    /// `$push` an element onto an array field.
    pub fn push(self, path: &str, element: impl Into<Value>) -> Result<Self> {
        let resolved = path::resolve(self.class, path)?;
        let wire = resolved.wrap_element(element.into())?;
        Ok(self.push_clause("$push", resolved.wire_path(), wire))
    }

    /// `$pull` every occurrence of an element from an array field.
    pub fn pull(self, path: &str, element: impl Into<Value>) -> Result<Self> {
        let resolved = path::resolve(self.class, path)?;
        let wire = resolved.wrap_element(element.into())?;
        Ok(self.push_clause("$pull", resolved.wire_path(), wire))
    }

    /// `$addToSet`: append an element unless already present.
    pub fn add_to_set(self, path: &str, element: impl Into<Value>) -> Result<Self> {
        let resolved = path::resolve(self.class, path)?;
        let wire = resolved.wrap_element(element.into())?;
        Ok(self.push_clause("$addToSet", resolved.wire_path(), wire))
    }

    /// `$pop` the last element of an array field.
    pub fn pop(self, path: &str) -> Result<Self> {
        let resolved = path::resolve(self.class, path)?;
        if !resolved.is_array() {
            return Err(Error::bad_value(
                self.class.name,
                path,
                "$pop requires an array field",
            ));
        }
        Ok(self.push_clause("$pop", resolved.wire_path(), Value::Int32(1)))
    }

    fn push_clause(mut self, op: &'static str, wire_path: &str, value: Value) -> Self {
        if let Some(existing) = self
            .clauses
            .iter_mut()
            .find(|c| c.op == op && c.wire_path == wire_path)
        {
            existing.value = value;
            return self;
        }
        if let Some(idx) = self.clauses.iter().position(|c| c.wire_path == wire_path) {
            let dropped = self.clauses.remove(idx);
            warn!(
                field = wire_path,
                dropped = dropped.op,
                kept = op,
                "conflicting update operators on one field; keeping the later one"
            );
        }
        self.clauses.push(Clause {
            op,
            wire_path: wire_path.to_string(),
            value,
        });
        self
    }

    /// Whether any clause has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Compile to the wire update document, grouping clauses under their
    /// operators in first-use order.
    ///
    /// An update with zero clauses fails with `EmptyUpdate`; the wire
    /// format would interpret an empty document as a full replacement.
    pub fn compile(&self) -> Result<Doc> {
        if self.clauses.is_empty() {
            return Err(Error::empty_update(self.class.collection));
        }
        let mut out = Doc::new();
        for clause in &self.clauses {
            match out.get_mut(clause.op) {
                Some(Value::Doc(fields)) => {
                    fields.insert(clause.wire_path.clone(), clause.value.clone());
                }
                _ => {
                    let mut fields = Doc::new();
                    fields.insert(clause.wire_path.clone(), clause.value.clone());
                    out.insert(clause.op, Value::Doc(fields));
                }
            }
        }
        Ok(out)
    }
}
