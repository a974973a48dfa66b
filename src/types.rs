//! Core types for the record store.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Stable identity of a record, assigned by the store on insert.
///
/// Identities are handed out in increasing order, so comparing two ids
/// compares their insertion order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Commit sequence of the store. Bumped once per committed transaction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Sequence(pub u64);

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl Sequence {
    pub fn next(self) -> Self {
        Sequence(self.0 + 1)
    }
}

/// Content digest (SHA-256).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A typed field value.
///
/// The derived ordering is total: values of different variants order by
/// variant, values of the same variant by their contents.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Date(NaiveDate),
    Blob(Vec<u8>),
}

impl FieldValue {
    /// Blobs are opaque and never used as sort or section keys.
    pub fn is_blob(&self) -> bool {
        matches!(self, FieldValue::Blob(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Feed a canonical, self-delimiting encoding into a hasher.
    fn digest_into(&self, hasher: &mut Sha256) {
        match self {
            FieldValue::Text(s) => {
                hasher.update([0u8]);
                hasher.update((s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            }
            FieldValue::Integer(i) => {
                hasher.update([1u8]);
                hasher.update(i.to_le_bytes());
            }
            FieldValue::Date(d) => {
                hasher.update([2u8]);
                hasher.update(i64::from(d.num_days_from_ce()).to_le_bytes());
            }
            FieldValue::Blob(b) => {
                hasher.update([3u8]);
                hasher.update((b.len() as u64).to_le_bytes());
                hasher.update(b);
            }
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Date(d) => write!(f, "{}", d),
            FieldValue::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Integer(i)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(d: NaiveDate) -> Self {
        FieldValue::Date(d)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(b: Vec<u8>) -> Self {
        FieldValue::Blob(b)
    }
}

/// Field name to value. Ordered so digests and encodings are canonical.
pub type Fields = BTreeMap<String, FieldValue>;

/// A stored entity instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Identity (assigned by store, immutable).
    pub id: RecordId,

    /// Entity kind (e.g., "Employee").
    pub kind: String,

    /// Mutable field values.
    pub fields: Fields,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_text)
    }

    /// Digest over every field, blobs included.
    ///
    /// Two records with the same digest render identically.
    pub fn digest(&self) -> Hash {
        let mut hasher = Sha256::new();
        for (name, value) in &self.fields {
            hasher.update((name.len() as u64).to_le_bytes());
            hasher.update(name.as_bytes());
            value.digest_into(&mut hasher);
        }
        Hash(hasher.finalize().into())
    }
}

/// Input for creating a new record (before an id is assigned).
#[derive(Clone, Debug, Default)]
pub struct RecordInput {
    pub kind: String,
    pub fields: Fields,
}

impl RecordInput {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Fields::new(),
        }
    }

    /// Set a field.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }
}

/// Build a partial field map for `update`.
pub fn fields<K, V, I>(pairs: I) -> Fields
where
    K: Into<String>,
    V: Into<FieldValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Store statistics.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    pub record_count: u64,
    pub sequence: Sequence,
    pub journal_size_bytes: u64,
}
