//! Single-collection document storage
//!
//! Documents of a standard blackboard live in the collection named after
//! the blackboard and carry integer ids issued by the document sequence.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::counter::{BlackboardType, Sequence};
use crate::cursor::MergeCursor;
use crate::documents::{DocumentCore, DocumentStorage, Extremity, TagOp};
use crate::error::{BlackboardError, Result};
use crate::filter::Filter;
use crate::models::{Document, DocumentId, TagRef};

pub struct DocumentStore {
    core: DocumentCore,
    collection: String,
}

impl DocumentStore {
    /// Build the required indexes of the blackboard's collection
    pub(crate) fn attach(core: DocumentCore) -> Result<Self> {
        let collection = core.blackboard.clone();
        core.ensure_indexes(&collection)?;
        Ok(Self { core, collection })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Integer ids carry no dates, so a date window cannot be honoured
    fn reject_dates(&self, filter: &Filter) -> Result<()> {
        if filter.query.is_none() && (filter.min_date.is_some() || filter.max_date.is_some()) {
            return Err(BlackboardError::invalid(format!(
                "Blackboard '{}' is not date-based; min_date/max_date are not supported",
                self.core.blackboard
            )));
        }
        Ok(())
    }

    fn issue_id(&self) -> Result<DocumentId> {
        Ok(DocumentId::Int(
            self.core.counter.next_id_and_increment(Sequence::Document)?,
        ))
    }
}

impl DocumentStorage for DocumentStore {
    fn kind(&self) -> BlackboardType {
        BlackboardType::Standard
    }

    fn find(&self, filter: &Filter) -> Result<MergeCursor> {
        self.reject_dates(filter)?;
        let query = self.core.translate(filter)?;
        let stream = self
            .core
            .store
            .find(&self.collection, &query, self.core.find_options(filter));
        MergeCursor::new(vec![stream], filter.limit)
    }

    fn count(&self, filter: &Filter) -> Result<u64> {
        self.reject_dates(filter)?;
        let query = self.core.translate(filter)?;
        self.core.store.count(&self.collection, &query)
    }

    fn insert(&self, mut doc: Document) -> Result<DocumentId> {
        self.core.ensure_array_fields(&mut doc);
        if doc.id.is_none() && self.core.settings.hash.uses_id() {
            doc.id = Some(self.issue_id()?);
        }

        if let Some(existing) = self.core.find_duplicate(&[self.collection.as_str()], &doc)? {
            if let Some(id) = self.update(&existing, doc.fields.clone())? {
                debug!(collection = %self.collection, %id, "Insert merged into existing document");
                return Ok(id);
            }
        }

        let hash = self.core.hash_of(&doc);
        let id = match doc.id.clone() {
            Some(id) => id,
            None => self.issue_id()?,
        };
        doc.id = Some(id.clone());
        doc.set(self.core.hash_field(), hash);
        self.core.store.insert(&self.collection, &doc)?;
        Ok(id)
    }

    fn update(&self, id: &DocumentId, fields: Map<String, Value>) -> Result<Option<DocumentId>> {
        let update = self.core.build_update(fields);
        self.core.apply_update(&self.collection, id, &update)
    }

    fn delete(&self, id: &DocumentId) -> Result<bool> {
        self.core.require_admin()?;
        let removed = self.core.store.delete(&self.collection, id)?;
        if removed {
            info!(collection = %self.collection, %id, "Deleted document");
        }
        Ok(removed)
    }

    fn mutate_tags(&self, id: &DocumentId, tags: &[TagRef], op: TagOp) -> Result<Option<DocumentId>> {
        let update = self.core.tag_update(tags, op)?;
        self.core.apply_update(&self.collection, id, &update)
    }

    fn extremal_date(&self, _which: Extremity) -> Result<Option<DateTime<Utc>>> {
        Err(BlackboardError::invalid(format!(
            "Blackboard '{}' is not date-based; its ids carry no dates",
            self.core.blackboard
        )))
    }
}
