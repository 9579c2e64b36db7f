//! Per-blackboard counters and settings
//!
//! Every blackboard owns a `<NAME>_COUNTER` collection. Its `next_id`
//! record holds the tag and document id sequences; the other records
//! describe the blackboard itself: its type, the hash fingerprint, the
//! array fields and the attributes that must be indexed.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BlackboardError, Result};
use crate::models::{Document, DocumentId, CONTROL_TAGS_FIELD, ID_FIELD, TAGS_FIELD};
use crate::storage::{Query, SortOrder, SqliteStore};

/// Suffix of the counter collection
pub const COUNTER_SUFFIX: &str = "_COUNTER";

/// Record keys of the counter collection
pub mod records {
    pub const NEXT_ID: &str = "next_id";
    pub const BLACKBOARD_TYPE: &str = "blackboard_type";
    pub const HASH: &str = "hash";
    pub const ARRAY_FIELDS: &str = "array_fields";
    pub const INDEXES: &str = "indexes";
}

/// Name of the counter collection of a blackboard
pub fn counter_collection(blackboard: &str) -> String {
    format!("{}{}", blackboard, COUNTER_SUFFIX)
}

/// A named id sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    Tag,
    Document,
}

impl Sequence {
    /// Attribute of the `next_id` record holding this sequence
    pub fn field(self) -> &'static str {
        match self {
            Sequence::Tag => "tag_counter",
            Sequence::Document => "doc_counter",
        }
    }
}

/// Issues tag and document ids for one blackboard
pub struct IdentityCounter {
    store: SqliteStore,
    collection: String,
}

impl IdentityCounter {
    pub(crate) fn new(store: SqliteStore, blackboard: &str) -> Self {
        Self {
            store,
            collection: counter_collection(blackboard),
        }
    }

    /// Next value the sequence will issue, without consuming it
    pub fn next_id(&self, sequence: Sequence) -> Result<i64> {
        let record = self
            .store
            .find_one(&self.collection, &Query::by_id(next_id_key()), SortOrder::Ascending)?
            .ok_or_else(|| self.missing_record())?;

        match record.get(sequence.field()) {
            None => Ok(1),
            Some(value) => value.as_i64().ok_or_else(|| {
                BlackboardError::invalid(format!(
                    "Counter '{}' in '{}' is not an integer: {}",
                    sequence.field(),
                    self.collection,
                    value
                ))
            }),
        }
    }

    /// Issue the next value of the sequence
    ///
    /// A single atomic fetch-and-add on the store: concurrent callers always
    /// receive distinct values.
    pub fn next_id_and_increment(&self, sequence: Sequence) -> Result<i64> {
        self.store
            .fetch_and_increment(&self.collection, &next_id_key(), sequence.field())
    }

    fn missing_record(&self) -> BlackboardError {
        BlackboardError::CounterNotFound {
            collection: self.collection.clone(),
            record: records::NEXT_ID.to_string(),
        }
    }
}

fn next_id_key() -> DocumentId {
    DocumentId::from(records::NEXT_ID)
}

/// Storage layout of a blackboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlackboardType {
    /// One document collection with integer ids
    Standard,
    /// One document collection per calendar year, time-encoded ids
    DateBased,
}

impl BlackboardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlackboardType::Standard => "standard",
            BlackboardType::DateBased => "date_based",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(BlackboardType::Standard),
            "date_based" => Ok(BlackboardType::DateBased),
            _ => Err(BlackboardError::invalid(format!("Unknown blackboard type: '{}'", s))),
        }
    }
}

impl fmt::Display for BlackboardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which attributes make up the content fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashSettings {
    /// Attribute the fingerprint is stored in
    pub field: String,
    /// Attributes concatenated into the fingerprint, in order
    pub components: Vec<String>,
}

impl Default for HashSettings {
    fn default() -> Self {
        Self {
            field: "hash".to_string(),
            components: vec![ID_FIELD.to_string()],
        }
    }
}

impl HashSettings {
    pub fn uses_id(&self) -> bool {
        self.components.iter().any(|c| c == ID_FIELD)
    }
}

/// Settings read from the counter collection at attach time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlackboardSettings {
    pub blackboard_type: BlackboardType,
    pub hash: HashSettings,
    /// Attributes always stored as arrays, besides the tag attributes
    pub array_fields: Vec<String>,
    /// Attributes indexed in every document collection
    pub indexes: Vec<String>,
}

impl BlackboardSettings {
    /// Read the settings of `blackboard`
    ///
    /// Fails with `BlackboardNotFound` if the blackboard has no type
    /// record. Missing hash, array-field and index records fall back to
    /// defaults.
    pub fn load(store: &SqliteStore, blackboard: &str) -> Result<Self> {
        let blackboard_type = read_blackboard_type(store, blackboard)?
            .ok_or_else(|| BlackboardError::BlackboardNotFound(blackboard.to_string()))?;

        let collection = counter_collection(blackboard);

        let hash = match read_record(store, &collection, records::HASH)? {
            None => HashSettings::default(),
            Some(record) => {
                let defaults = HashSettings::default();
                HashSettings {
                    field: record
                        .get("field")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or(defaults.field),
                    components: match record.get("components") {
                        Some(value) => string_list(value, "hash components")?,
                        None => defaults.components,
                    },
                }
            }
        };

        let array_fields = match read_record(store, &collection, records::ARRAY_FIELDS)? {
            Some(record) => match record.get("fields") {
                Some(value) => string_list(value, "array fields")?,
                None => Vec::new(),
            },
            None => Vec::new(),
        };

        let indexes = match read_record(store, &collection, records::INDEXES)? {
            Some(record) => match record.get("fields") {
                Some(value) => index_fields(value)?,
                None => Vec::new(),
            },
            None => Vec::new(),
        };

        Ok(Self {
            blackboard_type,
            hash,
            array_fields,
            indexes,
        })
    }

    /// Check whether updates merge into this attribute instead of overwriting
    pub fn is_array_field(&self, name: &str) -> bool {
        name == TAGS_FIELD || name == CONTROL_TAGS_FIELD || self.array_fields.iter().any(|f| f == name)
    }

    /// Every always-array attribute, tag attributes first
    pub fn all_array_fields(&self) -> Vec<&str> {
        let mut fields = vec![TAGS_FIELD, CONTROL_TAGS_FIELD];
        for field in &self.array_fields {
            if !fields.contains(&field.as_str()) {
                fields.push(field);
            }
        }
        fields
    }
}

/// Read the type record of `blackboard`, `None` if it does not exist
pub fn read_blackboard_type(store: &SqliteStore, blackboard: &str) -> Result<Option<BlackboardType>> {
    let record = read_record(store, &counter_collection(blackboard), records::BLACKBOARD_TYPE)?;
    match record {
        None => Ok(None),
        Some(record) => {
            let kind = record.get("type").and_then(Value::as_str).ok_or_else(|| {
                BlackboardError::invalid(format!("Blackboard '{}' has a malformed type record", blackboard))
            })?;
            BlackboardType::parse(kind).map(Some)
        }
    }
}

fn read_record(store: &SqliteStore, collection: &str, key: &str) -> Result<Option<Document>> {
    store.find_one(collection, &Query::by_id(DocumentId::from(key)), SortOrder::Ascending)
}

fn string_list(value: &Value, what: &str) -> Result<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| BlackboardError::invalid(format!("{} must be a list: {}", what, value)))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| BlackboardError::invalid(format!("{} must be strings: {}", what, item)))
        })
        .collect()
}

/// Index specs are attribute names or `{"<attribute>": <direction>}` objects
fn index_fields(value: &Value) -> Result<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| BlackboardError::invalid(format!("indexes must be a list: {}", value)))?;
    let mut fields: Vec<String> = Vec::new();
    for item in items {
        let names: Vec<&String> = match item {
            Value::String(name) => vec![name],
            Value::Object(spec) if !spec.is_empty() => spec.keys().collect(),
            other => {
                return Err(BlackboardError::invalid(format!("Invalid index spec: {}", other)))
            }
        };
        for name in names {
            if !fields.contains(name) {
                fields.push(name.clone());
            }
        }
    }
    Ok(fields)
}
