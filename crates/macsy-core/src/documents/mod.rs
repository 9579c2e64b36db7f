//! Document storage strategies
//!
//! A blackboard stores its documents either in one collection
//! ([`DocumentStore`]) or in one collection per calendar year
//! ([`ShardedDocumentStore`]). Both implement [`DocumentStorage`] and share
//! the hashing, update-building and tag-routing logic of [`DocumentCore`].
//!
//! ## Deduplication
//!
//! On insert, a content fingerprint is computed from the configured hash
//! components and looked up. A match whose component values are equal to
//! the incoming document turns the insert into an update of the match.
//! Two concurrent inserts of the same content may both miss the lookup and
//! both insert; the duplicate is not prevented, only made unlikely.

pub mod sharded;
pub mod standard;

pub use sharded::ShardedDocumentStore;
pub use standard::DocumentStore;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::api::Access;
use crate::counter::{BlackboardSettings, BlackboardType, IdentityCounter};
use crate::cursor::MergeCursor;
use crate::error::{BlackboardError, Result};
use crate::filter::{Filter, FilterTranslator};
use crate::models::{Document, DocumentId, TagRef, CONTROL_TAGS_FIELD, ID_FIELD, TAGS_FIELD};
use crate::storage::{FindOptions, Query, SqliteStore, Update};
use crate::tags::TagCatalog;

/// Tag mutation direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOp {
    Add,
    Remove,
}

/// Which end of the date range to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extremity {
    Earliest,
    Latest,
}

/// Document operations of a blackboard
pub trait DocumentStorage: Send + Sync {
    /// Storage layout implemented by this strategy
    fn kind(&self) -> BlackboardType;

    /// Matching documents in the filter's sort order, up to its limit
    fn find(&self, filter: &Filter) -> Result<MergeCursor>;

    /// Number of matching documents (the filter's limit is ignored)
    fn count(&self, filter: &Filter) -> Result<u64>;

    /// Insert a document, or update the existing document with equal content
    fn insert(&self, doc: Document) -> Result<DocumentId>;

    /// Apply changed attributes; `None` if the document does not exist
    fn update(&self, id: &DocumentId, fields: Map<String, Value>) -> Result<Option<DocumentId>>;

    /// Permanently remove a document (admin only)
    fn delete(&self, id: &DocumentId) -> Result<bool>;

    /// Add or remove tags; `None` if the document does not exist
    fn mutate_tags(&self, id: &DocumentId, tags: &[TagRef], op: TagOp) -> Result<Option<DocumentId>>;

    /// Creation date of the earliest or latest document
    fn extremal_date(&self, which: Extremity) -> Result<Option<DateTime<Utc>>>;
}

/// State and logic shared by both storage strategies
pub(crate) struct DocumentCore {
    pub(crate) store: SqliteStore,
    pub(crate) blackboard: String,
    pub(crate) tags: Arc<TagCatalog>,
    pub(crate) counter: Arc<IdentityCounter>,
    pub(crate) settings: BlackboardSettings,
    pub(crate) access: Access,
    pub(crate) batch_size: usize,
}

impl DocumentCore {
    pub(crate) fn translate(&self, filter: &Filter) -> Result<Query> {
        FilterTranslator::new(&self.tags).translate(filter)
    }

    pub(crate) fn find_options(&self, filter: &Filter) -> FindOptions {
        FindOptions {
            sort: filter.sort,
            limit: filter.limit,
            batch_size: self.batch_size,
        }
    }

    /// Create the required indexes missing from `collection`
    pub(crate) fn ensure_indexes(&self, collection: &str) -> Result<()> {
        for field in &self.settings.indexes {
            if self.store.ensure_index(collection, field)? {
                info!(collection, field = %field, "Built required index");
            }
        }
        Ok(())
    }

    pub(crate) fn require_admin(&self) -> Result<()> {
        if self.access.is_admin() {
            Ok(())
        } else {
            Err(BlackboardError::PermissionDenied(
                "Admin rights required to delete documents.",
            ))
        }
    }

    /// Give every always-array attribute at least an empty array
    pub(crate) fn ensure_array_fields(&self, doc: &mut Document) {
        for field in self.settings.all_array_fields() {
            if !doc.fields.contains_key(field) {
                doc.fields.insert(field.to_string(), Value::Array(Vec::new()));
            }
        }
    }

    pub(crate) fn hash_field(&self) -> &str {
        &self.settings.hash.field
    }

    /// Fingerprint of `doc`: the caller-supplied value, or the computed one
    pub(crate) fn hash_of(&self, doc: &Document) -> Value {
        match doc.get(self.hash_field()) {
            Some(supplied) => supplied.clone(),
            None => Value::from(content_hash(doc, &self.settings.hash.components)),
        }
    }

    /// Find a stored document with the same fingerprint in `collections`
    ///
    /// When the fingerprint was computed here, a match only counts if its
    /// component values equal those of `doc`.
    pub(crate) fn find_duplicate(&self, collections: &[&str], doc: &Document) -> Result<Option<DocumentId>> {
        let supplied = doc.contains(self.hash_field());
        let query = Query::new().eq(self.hash_field(), self.hash_of(doc));

        for collection in collections {
            for candidate in self.store.find(collection, &query, FindOptions::default()) {
                let candidate = candidate?;
                if supplied || self.same_components(doc, &candidate) {
                    debug!(collection, id = ?candidate.id, "Insert matches existing document");
                    return Ok(candidate.id);
                }
            }
        }
        Ok(None)
    }

    fn same_components(&self, a: &Document, b: &Document) -> bool {
        self.settings.hash.components.iter().all(|component| {
            if component == ID_FIELD {
                a.id == b.id
            } else {
                a.get(component) == b.get(component)
            }
        })
    }

    /// Split changed attributes into overwrites and set-union merges
    pub(crate) fn build_update(&self, fields: Map<String, Value>) -> Update {
        let mut update = Update::new();
        for (key, value) in fields {
            if key == ID_FIELD {
                continue;
            }
            update = match value {
                Value::Array(items) => update.add_to_set(key, items),
                scalar if self.settings.is_array_field(&key) => update.add_to_set(key, vec![scalar]),
                scalar => update.set(key, scalar),
            };
        }
        update
    }

    /// Update-and-fetch, then refresh the fingerprint if a component changed
    pub(crate) fn apply_update(&self, collection: &str, id: &DocumentId, update: &Update) -> Result<Option<DocumentId>> {
        let Some(doc) = self.store.update(collection, id, update)? else {
            return Ok(None);
        };

        let components = &self.settings.hash.components;
        let rehash = !update.set.contains_key(self.hash_field())
            && update.touched().any(|key| components.iter().any(|c| c == key));
        if rehash {
            let hash = Value::from(content_hash(&doc, components));
            if doc.get(self.hash_field()) != Some(&hash) {
                let refresh = Update::new().set(self.hash_field(), hash);
                self.store.update(collection, id, &refresh)?;
            }
        }
        Ok(doc.id)
    }

    /// Build the update adding or removing tags, routed by tag kind
    ///
    /// Integer references to unknown tags are treated as ordinary tags;
    /// names must resolve.
    pub(crate) fn tag_update(&self, tags: &[TagRef], op: TagOp) -> Result<Update> {
        let mut ordinary = Vec::new();
        let mut control = Vec::new();
        for reference in tags {
            let (id, is_control) = match reference {
                TagRef::Id(id) => (*id, self.tags.is_control(reference)?),
                TagRef::Name(_) => {
                    let tag = self.tags.resolve(reference)?;
                    (tag.id, tag.is_control)
                }
            };
            let target = if is_control { &mut control } else { &mut ordinary };
            let value = Value::from(id);
            if !target.contains(&value) {
                target.push(value);
            }
        }

        let mut update = Update::new();
        for (field, ids) in [(TAGS_FIELD, ordinary), (CONTROL_TAGS_FIELD, control)] {
            if ids.is_empty() {
                continue;
            }
            update = match op {
                TagOp::Add => update.add_to_set(field, ids),
                TagOp::Remove => update.pull(field, ids),
            };
        }
        Ok(update)
    }
}

/// Fingerprint of the hash components present in `doc`
///
/// Components are concatenated in order: strings as-is, the id in its
/// display form, any other value as JSON text.
pub fn content_hash(doc: &Document, components: &[String]) -> i32 {
    let mut text = String::new();
    for component in components {
        if component == ID_FIELD {
            if let Some(id) = &doc.id {
                text.push_str(&id.to_string());
            }
            continue;
        }
        match doc.get(component) {
            Some(Value::String(s)) => text.push_str(s),
            Some(other) => text.push_str(&other.to_string()),
            None => {}
        }
    }
    java_string_hashcode(&text)
}

/// 32-bit hash equal to Java's `String.hashCode`
pub fn java_string_hashcode(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}
