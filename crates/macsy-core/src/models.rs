//! Data models for MACSY
//!
//! Defines the core data structures: documents and their identifiers, and
//! the tags that annotate them.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{BlackboardError, Result};

/// Attribute holding the document identifier
pub const ID_FIELD: &str = "_id";
/// Attribute holding ordinary tag ids
pub const TAGS_FIELD: &str = "tags";
/// Attribute holding control tag ids
pub const CONTROL_TAGS_FIELD: &str = "control_tags";

/// Name prefixes that make a tag a control tag
pub const CONTROL_TAG_PREFIXES: [&str; 2] = ["FOR>", "POST>"];

/// Time-encoded 12 byte identifier
///
/// Layout: 4-byte big-endian seconds since the epoch, 5 process-unique
/// random bytes, 3-byte big-endian counter. Byte order is creation order at
/// second granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

static PROCESS_UNIQUE: OnceLock<[u8; 5]> = OnceLock::new();
static OID_COUNTER: OnceLock<AtomicU32> = OnceLock::new();

impl ObjectId {
    /// Generate a new id stamped with the current time
    pub fn new() -> Self {
        Self::with_timestamp(Utc::now())
    }

    /// Generate a new unique id stamped with the given time
    pub fn with_timestamp(time: DateTime<Utc>) -> Self {
        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&epoch_seconds(time).to_be_bytes());
        bytes[4..9].copy_from_slice(process_unique());
        let count = next_count().to_be_bytes();
        bytes[9..].copy_from_slice(&count[1..]);
        Self(bytes)
    }

    /// Smallest id for the given time (zero tail)
    ///
    /// Used as a range bound: every id generated at or after `time`
    /// compares greater than or equal to it.
    pub fn from_datetime(time: DateTime<Utc>) -> Self {
        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&epoch_seconds(time).to_be_bytes());
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Creation time embedded in the id
    pub fn timestamp(&self) -> DateTime<Utc> {
        let secs = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        DateTime::from_timestamp(i64::from(secs), 0).unwrap_or_default()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 24 character hex string
    pub fn parse_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| BlackboardError::invalid(format!("Invalid ObjectId '{}': {}", s, e)))?;
        Ok(Self(bytes))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = BlackboardError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_str(s)
    }
}

fn epoch_seconds(time: DateTime<Utc>) -> u32 {
    time.timestamp().clamp(0, i64::from(u32::MAX)) as u32
}

fn process_unique() -> &'static [u8; 5] {
    PROCESS_UNIQUE.get_or_init(|| {
        let mut out = [0u8; 5];
        out.copy_from_slice(&Uuid::new_v4().as_bytes()[..5]);
        out
    })
}

fn next_count() -> u32 {
    OID_COUNTER
        .get_or_init(|| {
            let seed = Uuid::new_v4();
            let b = seed.as_bytes();
            AtomicU32::new(u32::from_be_bytes([0, b[10], b[11], b[12]]))
        })
        .fetch_add(1, Ordering::Relaxed)
        & 0x00FF_FFFF
}

/// Identifier of a stored document
///
/// Standard blackboards issue integers; date-based blackboards use
/// time-encoded [`ObjectId`]s; counter records use text keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DocumentId {
    Int(i64),
    Object(ObjectId),
    Key(String),
}

impl DocumentId {
    /// Creation time, if this id encodes one
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            DocumentId::Object(oid) => Some(oid.timestamp()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            DocumentId::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Parse the JSON form: a number, a string, or `{"$oid": "<hex>"}`
    pub fn from_json(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|_| BlackboardError::invalid(format!("Invalid document id: {}", value)))
    }

    pub fn to_json(&self) -> Value {
        match self {
            DocumentId::Int(n) => Value::from(*n),
            DocumentId::Object(oid) => {
                let mut map = Map::new();
                map.insert("$oid".to_string(), Value::String(oid.to_hex()));
                Value::Object(map)
            }
            DocumentId::Key(key) => Value::String(key.clone()),
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::Int(n) => write!(f, "{}", n),
            DocumentId::Object(oid) => write!(f, "{}", oid),
            DocumentId::Key(key) => write!(f, "{}", key),
        }
    }
}

impl From<i64> for DocumentId {
    fn from(n: i64) -> Self {
        DocumentId::Int(n)
    }
}

impl From<ObjectId> for DocumentId {
    fn from(oid: ObjectId) -> Self {
        DocumentId::Object(oid)
    }
}

impl From<&str> for DocumentId {
    fn from(key: &str) -> Self {
        DocumentId::Key(key.to_string())
    }
}

impl Serialize for DocumentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DocumentIdRepr {
    Int(i64),
    Object {
        #[serde(rename = "$oid")]
        oid: String,
    },
    Key(String),
}

impl<'de> Deserialize<'de> for DocumentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match DocumentIdRepr::deserialize(deserializer)? {
            DocumentIdRepr::Int(n) => Ok(DocumentId::Int(n)),
            DocumentIdRepr::Object { oid } => ObjectId::parse_str(&oid)
                .map(DocumentId::Object)
                .map_err(serde::de::Error::custom),
            DocumentIdRepr::Key(key) => Ok(DocumentId::Key(key)),
        }
    }
}

/// A semi-structured record stored in a blackboard
///
/// Serializes as one JSON object with the id under `_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DocumentId>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// Create an empty document without an id
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty document with a specific id
    pub fn with_id(id: impl Into<DocumentId>) -> Self {
        Self {
            id: Some(id.into()),
            fields: Map::new(),
        }
    }

    /// Parse a document from a JSON object (`_id` optional)
    pub fn from_json(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(BlackboardError::invalid(format!(
                "Document must be a JSON object: {}",
                value
            )));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Builder-style attribute setter
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        (key == ID_FIELD && self.id.is_some()) || self.fields.contains_key(key)
    }

    /// Ordinary tag ids
    pub fn tags(&self) -> Vec<i64> {
        self.int_list(TAGS_FIELD)
    }

    /// Control tag ids
    pub fn control_tags(&self) -> Vec<i64> {
        self.int_list(CONTROL_TAGS_FIELD)
    }

    fn int_list(&self, key: &str) -> Vec<i64> {
        match self.fields.get(key) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_i64).collect(),
            _ => Vec::new(),
        }
    }
}

/// A label attachable to documents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub is_control: bool,
    pub is_inheritable: bool,
}

mod tag_keys {
    pub const NAME: &str = "name";
    pub const CONTROL: &str = "control";
    pub const INHERITABLE: &str = "inheritable";
}

impl Tag {
    /// Check whether a name carries a control prefix
    pub fn has_control_prefix(name: &str) -> bool {
        CONTROL_TAG_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
    }

    /// Decode a record of the tag catalog collection
    ///
    /// Flags may be stored as booleans or as 0/1 integers; a missing flag
    /// reads as unset.
    pub fn from_document(doc: &Document) -> Result<Self> {
        let id = doc
            .id
            .as_ref()
            .and_then(DocumentId::as_int)
            .ok_or_else(|| BlackboardError::invalid("Tag record without integer id"))?;
        let name = doc
            .get(tag_keys::NAME)
            .and_then(Value::as_str)
            .ok_or_else(|| BlackboardError::invalid(format!("Tag {} has no name", id)))?
            .to_string();

        Ok(Self {
            id,
            name,
            is_control: flag(doc.get(tag_keys::CONTROL)),
            is_inheritable: flag(doc.get(tag_keys::INHERITABLE)),
        })
    }

    /// Encode as a record of the tag catalog collection
    pub fn to_document(&self) -> Document {
        Document::with_id(self.id)
            .field(tag_keys::NAME, self.name.clone())
            .field(tag_keys::CONTROL, self.is_control)
            .field(tag_keys::INHERITABLE, self.is_inheritable)
    }

    pub(crate) fn name_key() -> &'static str {
        tag_keys::NAME
    }
}

fn flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    }
}

/// Reference to a tag by id or by name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagRef {
    Id(i64),
    Name(String),
}

impl fmt::Display for TagRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagRef::Id(id) => write!(f, "{}", id),
            TagRef::Name(name) => write!(f, "{}", name),
        }
    }
}

impl From<i64> for TagRef {
    fn from(id: i64) -> Self {
        TagRef::Id(id)
    }
}

impl From<&str> for TagRef {
    fn from(name: &str) -> Self {
        TagRef::Name(name.to_string())
    }
}

impl From<String> for TagRef {
    fn from(name: String) -> Self {
        TagRef::Name(name)
    }
}

impl From<&Tag> for TagRef {
    fn from(tag: &Tag) -> Self {
        TagRef::Id(tag.id)
    }
}
