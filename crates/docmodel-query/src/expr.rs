//! Immutable query expression trees and their wire-format compiler.
//!
//! Expressions are built from [`FieldRef`] comparison methods and combined
//! with `and` / `or` / `negate`. Nothing touches the schema until
//! [`QueryExpr::compile`], which resolves every path against a document
//! class, validates comparison values, and emits the filter document.

use docmodel_core::{Doc, DocumentClass, Error, Result, Value, doc};

use crate::path::{self, MATCHED_INDEX, ResolvedField};

/// A dotted reference to a document field, not yet bound to a class.
#[derive(Debug, Clone)]
pub struct FieldRef {
    path: String,
}

/// Entry point: reference a field by dotted path.
pub fn field(path: impl Into<String>) -> FieldRef {
    FieldRef { path: path.into() }
}

/// The comparison operand, distinguished by how it is wire-converted.
#[doc(hidden)]
#[derive(Debug, Clone)]
pub enum Operand {
    /// Validated and converted through the resolved field kind.
    Typed(Value),
    /// A list whose elements are each converted through the field kind.
    TypedList(Vec<Value>),
    /// Passed through untouched (`$exists` flags, `$regex` patterns).
    Raw(Value),
}

/// One condition on one field.
#[doc(hidden)]
#[derive(Debug, Clone)]
pub enum Cmp {
    /// Bare equality: `{field: value}`.
    Eq(Value),
    /// Operator comparison: `{field: {$op: operand}}`.
    Op(&'static str, Operand),
    /// `{field: {$elemMatch: <compiled sub-filter>}}`.
    ElemMatch(Box<QueryExpr>),
}

/// An immutable query expression.
///
/// Combinators return new expressions; existing ones are never mutated, so
/// partially built filters can be shared and reused.
#[derive(Debug, Clone)]
pub enum QueryExpr {
    #[doc(hidden)]
    Cmp { path: String, cmp: Cmp },
    /// Conjunction; conditions on distinct operators of one field merge
    /// into a single operator document at compile time.
    And(Vec<QueryExpr>),
    /// Disjunction, compiled to `$or`.
    Or(Vec<QueryExpr>),
    /// Negation of a single comparison.
    Not(Box<QueryExpr>),
}

impl FieldRef {
    /// Append the positional (`$`) segment, referring to the array element
    /// matched by the filter.
    #[must_use]
    pub fn matched_index(mut self) -> Self {
        self.path.push('.');
        self.path.push_str(MATCHED_INDEX);
        self
    }

    fn cmp(self, cmp: Cmp) -> QueryExpr {
        QueryExpr::Cmp {
            path: self.path,
            cmp,
        }
    }

    /// `{field: value}`
    pub fn eq(self, value: impl Into<Value>) -> QueryExpr {
        self.cmp(Cmp::Eq(value.into()))
    }

    /// `{field: {$ne: value}}`
    pub fn ne(self, value: impl Into<Value>) -> QueryExpr {
        self.cmp(Cmp::Op("$ne", Operand::Typed(value.into())))
    }

    /// `{field: {$gt: value}}`
    pub fn gt(self, value: impl Into<Value>) -> QueryExpr {
        self.cmp(Cmp::Op("$gt", Operand::Typed(value.into())))
    }

    /// `{field: {$gte: value}}`
    pub fn gte(self, value: impl Into<Value>) -> QueryExpr {
        self.cmp(Cmp::Op("$gte", Operand::Typed(value.into())))
    }

    /// `{field: {$lt: value}}`
    pub fn lt(self, value: impl Into<Value>) -> QueryExpr {
        self.cmp(Cmp::Op("$lt", Operand::Typed(value.into())))
    }

    /// `{field: {$lte: value}}`
    pub fn lte(self, value: impl Into<Value>) -> QueryExpr {
        self.cmp(Cmp::Op("$lte", Operand::Typed(value.into())))
    }

    /// `{field: {$in: [values...]}}`
    pub fn is_in<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> QueryExpr {
        self.cmp(Cmp::Op(
            "$in",
            Operand::TypedList(values.into_iter().map(Into::into).collect()),
        ))
    }

    /// `{field: {$nin: [values...]}}`
    pub fn nin<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> QueryExpr {
        self.cmp(Cmp::Op(
            "$nin",
            Operand::TypedList(values.into_iter().map(Into::into).collect()),
        ))
    }

    /// `{field: {$exists: flag}}`
    pub fn exists(self, flag: bool) -> QueryExpr {
        self.cmp(Cmp::Op("$exists", Operand::Raw(Value::Bool(flag))))
    }

    /// `{field: {$regex: pattern}}`; the pattern is used verbatim.
    pub fn regex(self, pattern: impl Into<String>) -> QueryExpr {
        self.cmp(Cmp::Op(
            "$regex",
            Operand::Raw(Value::String(pattern.into())),
        ))
    }

    /// Match string values starting with `prefix` (literal, escaped).
    pub fn starts_with(self, prefix: &str) -> QueryExpr {
        self.regex(format!("^{}", regex::escape(prefix)))
    }

    /// Match string values ending with `suffix` (literal, escaped).
    pub fn ends_with(self, suffix: &str) -> QueryExpr {
        self.regex(format!("{}$", regex::escape(suffix)))
    }

    /// `{field: {$elemMatch: {...}}}`: at least one array element satisfies
    /// `condition`, whose paths resolve against the element's class.
    pub fn elem_match(self, condition: QueryExpr) -> QueryExpr {
        self.cmp(Cmp::ElemMatch(Box::new(condition)))
    }
}

impl QueryExpr {
    /// Conjoin with another expression.
    #[must_use]
    pub fn and(self, other: QueryExpr) -> QueryExpr {
        match self {
            QueryExpr::And(mut parts) => {
                parts.push(other);
                QueryExpr::And(parts)
            }
            first => QueryExpr::And(vec![first, other]),
        }
    }

    /// Disjoin with another expression. Chained calls extend one `$or`
    /// list rather than nesting.
    #[must_use]
    pub fn or(self, other: QueryExpr) -> QueryExpr {
        match self {
            QueryExpr::Or(mut parts) => {
                parts.push(other);
                QueryExpr::Or(parts)
            }
            first => QueryExpr::Or(vec![first, other]),
        }
    }

    /// Negate this expression.
    ///
    /// Bare equality becomes `$ne`; operator comparisons are `$not`-wrapped.
    /// Only single comparisons can be negated; negating a logical
    /// combination fails at compile time with `BadQuery`.
    #[must_use]
    pub fn negate(self) -> QueryExpr {
        match self {
            // Double negation cancels.
            QueryExpr::Not(inner) => *inner,
            other => QueryExpr::Not(Box::new(other)),
        }
    }

    /// Compile to the wire filter document, resolving every path against
    /// `class`.
    pub fn compile(&self, class: &'static DocumentClass) -> Result<Doc> {
        let mut out = Doc::new();
        self.compile_into(class, &mut out)?;
        Ok(out)
    }

    fn compile_into(&self, class: &'static DocumentClass, out: &mut Doc) -> Result<()> {
        match self {
            QueryExpr::Cmp { path, cmp } => {
                let resolved = path::resolve(class, path)?;
                let condition = compile_cmp(cmp, &resolved)?;
                merge_condition(out, resolved.wire_path(), condition);
                Ok(())
            }
            QueryExpr::And(parts) => {
                for part in parts {
                    part.compile_into(class, out)?;
                }
                Ok(())
            }
            QueryExpr::Or(parts) => {
                let mut branches = Vec::with_capacity(parts.len());
                for part in parts {
                    branches.push(Value::Doc(part.compile(class)?));
                }
                // Consecutive or-conditions extend one $or list.
                match out.get_mut("$or") {
                    Some(Value::Array(existing)) => existing.extend(branches),
                    _ => {
                        out.insert("$or", Value::Array(branches));
                    }
                }
                Ok(())
            }
            QueryExpr::Not(inner) => {
                let QueryExpr::Cmp { path, cmp } = inner.as_ref() else {
                    return Err(Error::bad_query(
                        None,
                        "only a single comparison can be negated",
                    ));
                };
                let resolved = path::resolve(class, path)?;
                let condition = negate_cmp(cmp, &resolved)?;
                merge_condition(out, resolved.wire_path(), condition);
                Ok(())
            }
        }
    }
}

fn compile_cmp(cmp: &Cmp, resolved: &ResolvedField) -> Result<Value> {
    match cmp {
        Cmp::Eq(value) => resolved.wrap(value.clone()),
        Cmp::Op(op, operand) => Ok(Value::Doc(
            doc! { *op => compile_operand(operand, resolved)? },
        )),
        Cmp::ElemMatch(condition) => {
            let element = path::resolve_element(resolved.class(), resolved.path())?;
            let class = element.element_class().ok_or_else(|| {
                Error::bad_query(
                    Some(resolved.path().to_string()),
                    "elem_match requires an array of documents",
                )
            })?;
            let sub = condition.compile(class)?;
            Ok(Value::Doc(doc! { "$elemMatch" => sub }))
        }
    }
}

fn negate_cmp(cmp: &Cmp, resolved: &ResolvedField) -> Result<Value> {
    let condition = match cmp {
        Cmp::Eq(value) => {
            return Ok(Value::Doc(doc! { "$ne" => resolved.wrap(value.clone())? }));
        }
        Cmp::Op(..) | Cmp::ElemMatch(..) => compile_cmp(cmp, resolved)?,
    };
    Ok(Value::Doc(doc! { "$not" => condition }))
}

fn compile_operand(operand: &Operand, resolved: &ResolvedField) -> Result<Value> {
    match operand {
        Operand::Typed(value) => resolved.wrap(value.clone()),
        Operand::TypedList(values) => Ok(Value::Array(resolved.wrap_each(values.clone())?)),
        Operand::Raw(value) => Ok(value.clone()),
    }
}

/// Whether a condition value is an operator document (`{$op: ...}`) as
/// opposed to a bare equality value.
fn is_operator_doc(value: &Value) -> bool {
    match value {
        Value::Doc(doc) => !doc.is_empty() && doc.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

/// Merge a new condition for `key` into the filter being built.
///
/// Operator documents with disjoint operators merge into one document.
/// Anything else (two equalities, overlapping operators) is preserved via
/// an explicit `$and` list; later wins is never applied to filters.
fn merge_condition(out: &mut Doc, key: &str, condition: Value) {
    let Some(existing) = out.get_mut(key) else {
        out.insert(key, condition);
        return;
    };

    let condition = match (is_operator_doc(existing), is_operator_doc(&condition)) {
        (true, true) => {
            let Value::Doc(new_ops) = condition else {
                unreachable!()
            };
            let Value::Doc(existing_ops) = existing else {
                unreachable!()
            };
            if new_ops.keys().all(|op| !existing_ops.contains_key(op)) {
                for (op, value) in new_ops {
                    existing_ops.insert(op, value);
                }
                return;
            }
            Value::Doc(new_ops)
        }
        (false, true) => {
            // Bare equality alongside an operator doc: fold it in as $eq.
            let Value::Doc(new_ops) = condition else {
                unreachable!()
            };
            if !new_ops.contains_key("$eq") {
                let mut ops = Doc::new();
                ops.insert("$eq", std::mem::replace(existing, Value::Null));
                for (op, value) in new_ops {
                    ops.insert(op, value);
                }
                *existing = Value::Doc(ops);
                return;
            }
            Value::Doc(new_ops)
        }
        (true, false) => {
            // Operator doc first, bare equality second.
            let Value::Doc(existing_ops) = existing else {
                unreachable!()
            };
            if !existing_ops.contains_key("$eq") {
                existing_ops.insert("$eq", condition);
                return;
            }
            condition
        }
        (false, false) => condition,
    };

    // Irreconcilable conditions on one field stay separate under $and.
    let moved = std::mem::replace(existing, Value::Null);
    out.remove(key);
    let mut branches = match out.remove("$and") {
        Some(Value::Array(existing_and)) => existing_and,
        _ => Vec::new(),
    };
    branches.push(Value::Doc(doc! { key => moved }));
    branches.push(Value::Doc(doc! { key => condition }));
    out.insert("$and", Value::Array(branches));
}
