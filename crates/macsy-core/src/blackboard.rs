//! Blackboard facade
//!
//! A [`Blackboard`] bundles the tag catalog, the id counter and the
//! document storage strategy selected by the blackboard's type. It is
//! produced by [`crate::api::BlackboardApi`] only.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::info;

use crate::api::Access;
use crate::counter::{BlackboardSettings, BlackboardType, IdentityCounter};
use crate::cursor::MergeCursor;
use crate::documents::{
    DocumentCore, DocumentStorage, DocumentStore, Extremity, ShardedDocumentStore, TagOp,
};
use crate::error::{BlackboardError, Result};
use crate::filter::Filter;
use crate::models::{Document, DocumentId, Tag, TagRef};
use crate::storage::SqliteStore;
use crate::tags::TagCatalog;

pub struct Blackboard {
    name: String,
    kind: BlackboardType,
    tags: Arc<TagCatalog>,
    counter: Arc<IdentityCounter>,
    storage: Box<dyn DocumentStorage>,
}

impl Blackboard {
    pub(crate) fn attach(store: SqliteStore, name: &str, access: Access, batch_size: usize) -> Result<Self> {
        let settings = BlackboardSettings::load(&store, name)?;
        let kind = settings.blackboard_type;

        let counter = Arc::new(IdentityCounter::new(store.clone(), name));
        let tags = Arc::new(TagCatalog::new(store.clone(), name, Arc::clone(&counter), access));
        let core = DocumentCore {
            store,
            blackboard: name.to_string(),
            tags: Arc::clone(&tags),
            counter: Arc::clone(&counter),
            settings,
            access,
            batch_size,
        };

        let storage: Box<dyn DocumentStorage> = match kind {
            BlackboardType::Standard => Box::new(DocumentStore::attach(core)?),
            BlackboardType::DateBased => Box::new(ShardedDocumentStore::attach(core)?),
        };

        info!(blackboard = name, kind = %kind, ?access, "Attached blackboard");
        Ok(Self {
            name: name.to_string(),
            kind,
            tags,
            counter,
            storage,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn blackboard_type(&self) -> BlackboardType {
        self.kind
    }

    pub fn tag_catalog(&self) -> &TagCatalog {
        &self.tags
    }

    pub fn counter(&self) -> &IdentityCounter {
        &self.counter
    }

    pub fn storage(&self) -> &dyn DocumentStorage {
        self.storage.as_ref()
    }

    // ==================== Documents ====================

    pub fn find(&self, filter: &Filter) -> Result<MergeCursor> {
        self.storage.find(filter)
    }

    pub fn count(&self, filter: &Filter) -> Result<u64> {
        self.storage.count(filter)
    }

    pub fn insert(&self, doc: Document) -> Result<DocumentId> {
        self.storage.insert(doc)
    }

    pub fn update(&self, id: &DocumentId, fields: Map<String, Value>) -> Result<Option<DocumentId>> {
        self.storage.update(id, fields)
    }

    /// Permanently remove a document (admin only)
    pub fn delete(&self, id: &DocumentId) -> Result<bool> {
        self.storage.delete(id)
    }

    pub fn add_tag(&self, id: &DocumentId, tag: impl Into<TagRef>) -> Result<Option<DocumentId>> {
        self.storage.mutate_tags(id, &[tag.into()], TagOp::Add)
    }

    pub fn add_tags(&self, id: &DocumentId, tags: &[TagRef]) -> Result<Option<DocumentId>> {
        self.storage.mutate_tags(id, tags, TagOp::Add)
    }

    pub fn remove_tag(&self, id: &DocumentId, tag: impl Into<TagRef>) -> Result<Option<DocumentId>> {
        self.storage.mutate_tags(id, &[tag.into()], TagOp::Remove)
    }

    pub fn remove_tags(&self, id: &DocumentId, tags: &[TagRef]) -> Result<Option<DocumentId>> {
        self.storage.mutate_tags(id, tags, TagOp::Remove)
    }

    // ==================== Tags ====================

    pub fn all_tags(&self) -> Result<Vec<Tag>> {
        self.tags.all()
    }

    pub fn tag(&self, reference: impl Into<TagRef>) -> Result<Option<Tag>> {
        self.tags.get(&reference.into())
    }

    pub fn is_control_tag(&self, reference: impl Into<TagRef>) -> Result<bool> {
        self.tags.is_control(&reference.into())
    }

    pub fn is_inheritable_tag(&self, reference: impl Into<TagRef>) -> Result<bool> {
        self.tags.is_inheritable(&reference.into())
    }

    pub fn create_tag(&self, name: &str, inheritable: bool) -> Result<Tag> {
        self.tags.create(name, inheritable)
    }

    pub fn rename_tag(&self, id: i64, new_name: &str, inheritable: Option<bool>) -> Result<Tag> {
        self.tags.rename(id, new_name, inheritable)
    }

    pub fn set_tag_control(&self, id: i64, control: bool) -> Result<Tag> {
        self.tags.set_control(id, control)
    }

    /// Remove a tag from all documents and the catalog (admin only)
    pub fn delete_tag(&self, id: i64) -> Result<bool> {
        self.tags.delete(id, self.storage.as_ref())
    }

    // ==================== Dates ====================

    /// Creation date encoded in a document's id
    pub fn date_of(&self, doc: &Document) -> Result<DateTime<Utc>> {
        doc.id
            .as_ref()
            .and_then(DocumentId::timestamp)
            .ok_or_else(|| BlackboardError::invalid("Document does not have an ObjectId in the _id field"))
    }

    pub fn earliest_date(&self) -> Result<Option<DateTime<Utc>>> {
        self.storage.extremal_date(Extremity::Earliest)
    }

    pub fn latest_date(&self) -> Result<Option<DateTime<Utc>>> {
        self.storage.extremal_date(Extremity::Latest)
    }
}
