//! Dynamic document values.

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, FixedOffset, Utc};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// A 12-byte document identity, generated client-side.
///
/// Layout follows the conventional wire shape: 4 bytes of unix seconds,
/// 5 bytes of per-process nonce, 3 bytes of monotonically increasing
/// counter. Identities generated by one process sort roughly by creation
/// time, which keeps the identity field comparably ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

static OID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Computed once per process; identities generated within one second must
/// order by the counter bytes alone.
fn process_nonce() -> [u8; 5] {
    static NONCE: OnceLock<[u8; 5]> = OnceLock::new();
    *NONCE.get_or_init(|| {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        std::process::id().hash(&mut hasher);
        if let Ok(elapsed) = SystemTime::now().duration_since(UNIX_EPOCH) {
            elapsed.subsec_nanos().hash(&mut hasher);
        }
        let bits = hasher.finish().to_be_bytes();
        [bits[0], bits[1], bits[2], bits[3], bits[4]]
    })
}

impl ObjectId {
    /// Generate a fresh identity.
    pub fn new() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let nonce = process_nonce();
        let count = OID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
        let count = count.to_be_bytes();

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&nonce);
        bytes[9..].copy_from_slice(&count[1..]);
        Self(bytes)
    }

    /// Construct from raw bytes.
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// The raw 12 bytes.
    pub const fn bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// Parse a 24-character lower-hex representation.
    pub fn parse_hex(s: &str) -> Option<Self> {
        if s.len() != 24 {
            return None;
        }
        let mut bytes = [0u8; 12];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16)?;
            let lo = (chunk[1] as char).to_digit(16)?;
            bytes[i] = ((hi << 4) | lo) as u8;
        }
        Some(Self(bytes))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// A dynamically-typed document value.
///
/// This enum represents every value a document field can hold and is the
/// currency of query documents, update documents, and raw documents
/// exchanged with the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null / missing
    Null,

    /// Boolean value
    Bool(bool),

    /// 32-bit signed integer
    Int32(i32),

    /// 64-bit signed integer
    Int64(i64),

    /// 64-bit floating point
    Double(f64),

    /// UTF-8 string
    String(String),

    /// Timezone-aware datetime; normalized to UTC on the wire
    DateTime(DateTime<FixedOffset>),

    /// Document identity
    ObjectId(ObjectId),

    /// Array of values
    Array(Vec<Value>),

    /// Embedded document
    Doc(Doc),
}

impl Value {
    /// Check if this value is Null.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::ObjectId(_) => "objectid",
            Value::Array(_) => "array",
            Value::Doc(_) => "document",
        }
    }

    /// Try to get this value as a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to convert this value to an f64, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Int32(v) => Some(f64::from(*v)),
            Value::Int64(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as an embedded document.
    pub fn as_doc(&self) -> Option<&Doc> {
        match self {
            Value::Doc(d) => Some(d),
            _ => None,
        }
    }

    /// Try to get this value as an array.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Try to get this value as an identity.
    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Value::ObjectId(id) => Some(*id),
            _ => None,
        }
    }

    /// Total order across values, used for sorting and range comparisons.
    ///
    /// Values of different types order by a fixed type rank; numeric types
    /// compare numerically with each other regardless of width.
    pub fn compare(&self, other: &Value) -> Ordering {
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        }
        let rank = |v: &Value| -> u8 {
            match v {
                Value::Null => 0,
                Value::Int32(_) | Value::Int64(_) | Value::Double(_) => 1,
                Value::String(_) => 2,
                Value::Doc(_) => 3,
                Value::Array(_) => 4,
                Value::ObjectId(_) => 5,
                Value::Bool(_) => 6,
                Value::DateTime(_) => 7,
            }
        };
        match (self, other) {
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::ObjectId(a), Value::ObjectId(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.compare(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Int32(v) => serializer.serialize_i32(*v),
            Value::Int64(v) => serializer.serialize_i64(*v),
            Value::Double(v) => serializer.serialize_f64(*v),
            Value::String(v) => serializer.serialize_str(v),
            Value::DateTime(v) => serializer.serialize_str(&v.to_rfc3339()),
            Value::ObjectId(v) => v.serialize(serializer),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Doc(doc) => doc.serialize(serializer),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Value::ObjectId(v)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::DateTime(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v.fixed_offset())
    }
}

impl From<Doc> for Value {
    fn from(v: Doc) -> Self {
        Value::Doc(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// An insertion-ordered string-to-value map.
///
/// Documents preserve key order on the wire, so this is backed by a vector
/// of pairs rather than a hash map. Lookups are linear, which is the right
/// trade for the small documents this layer shuttles around.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Doc {
    entries: Vec<(String, Value)>,
}

impl Doc {
    /// Create an empty document.
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Get the value for a key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Get a mutable reference to the value for a key.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Insert a value, replacing and returning any previous value for the
    /// key while keeping its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.get_mut(&key) {
            return Some(std::mem::replace(slot, value));
        }
        self.entries.push((key, value));
        None
    }

    /// Remove and return the value for a key.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterate keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Render as a JSON string, for diagnostics and logging.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "<unserializable>".to_string())
    }
}

impl Serialize for Doc {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl IntoIterator for Doc {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(String, Value)> for Doc {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut doc = Doc::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

/// Build a [`Doc`] literal.
///
/// ```
/// use docmodel_core::doc;
///
/// let d = doc! { "name" => "Ann", "age" => 32 };
/// assert_eq!(d.get("name").and_then(|v| v.as_str()), Some("Ann"));
/// ```
#[macro_export]
macro_rules! doc {
    () => { $crate::Doc::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut d = $crate::Doc::new();
        $( d.insert($key, $crate::Value::from($value)); )+
        d
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_ids_are_unique_and_roundtrip_hex() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        assert_ne!(a, b);

        let hex = a.to_string();
        assert_eq!(hex.len(), 24);
        assert_eq!(ObjectId::parse_hex(&hex), Some(a));
        assert_eq!(ObjectId::parse_hex("not hex"), None);
    }

    #[test]
    fn object_ids_order_by_creation() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        assert!(a < b);
    }

    #[test]
    fn nonce_bytes_are_stable_within_a_process() {
        // Bytes 4..9 carry the per-process nonce; consecutive ids from one
        // process must share them so the counter decides intra-second order.
        let ids: Vec<ObjectId> = (0..8).map(|_| ObjectId::new()).collect();
        for pair in ids.windows(2) {
            assert_eq!(pair[0].bytes()[4..9], pair[1].bytes()[4..9]);
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn doc_insert_replaces_in_place() {
        let mut d = doc! { "a" => 1, "b" => 2 };
        let old = d.insert("a", 10);
        assert_eq!(old, Some(Value::Int32(1)));
        let keys: Vec<_> = d.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(d.get("a"), Some(&Value::Int32(10)));
    }

    #[test]
    fn doc_remove() {
        let mut d = doc! { "a" => 1, "b" => 2 };
        assert_eq!(d.remove("a"), Some(Value::Int32(1)));
        assert_eq!(d.remove("a"), None);
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn numeric_values_compare_across_widths() {
        assert_eq!(Value::Int32(2).compare(&Value::Int64(2)), Ordering::Equal);
        assert_eq!(Value::Int32(2).compare(&Value::Double(2.5)), Ordering::Less);
        assert_eq!(
            Value::Double(3.0).compare(&Value::Int64(2)),
            Ordering::Greater
        );
    }

    #[test]
    fn strings_compare_lexicographically() {
        assert_eq!(
            Value::from("abc").compare(&Value::from("abd")),
            Ordering::Less
        );
    }

    #[test]
    fn serializes_to_json() {
        let d = doc! {
            "name" => "Ann",
            "tags" => vec!["a", "b"],
            "nested" => doc! { "x" => 1i64 },
        };
        let json = d.to_json();
        assert_eq!(json, r#"{"name":"Ann","tags":["a","b"],"nested":{"x":1}}"#);
    }

    #[test]
    fn option_converts_to_null() {
        assert_eq!(Value::from(Option::<i32>::None), Value::Null);
        assert_eq!(Value::from(Some(5i32)), Value::Int32(5));
    }
}
