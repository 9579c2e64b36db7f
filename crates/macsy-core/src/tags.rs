//! Tag catalog
//!
//! Every blackboard owns a `<NAME>_TAGS` collection of [`Tag`] records.
//! Tags are referenced either by integer id or by name; control tags are
//! recognized by a reserved name prefix at creation time.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::api::Access;
use crate::counter::{IdentityCounter, Sequence};
use crate::documents::{DocumentStorage, TagOp};
use crate::error::{BlackboardError, Result};
use crate::filter::Filter;
use crate::models::{DocumentId, Tag, TagRef};
use crate::storage::{Query, SortOrder, SqliteStore, Update};

/// Suffix of the tag catalog collection
pub const TAGS_SUFFIX: &str = "_TAGS";

/// Name of the tag catalog collection of a blackboard
pub fn tag_collection(blackboard: &str) -> String {
    format!("{}{}", blackboard, TAGS_SUFFIX)
}

/// The taxonomy of tags of one blackboard
pub struct TagCatalog {
    store: SqliteStore,
    collection: String,
    counter: Arc<IdentityCounter>,
    access: Access,
}

impl TagCatalog {
    pub(crate) fn new(store: SqliteStore, blackboard: &str, counter: Arc<IdentityCounter>, access: Access) -> Self {
        Self {
            store,
            collection: tag_collection(blackboard),
            counter,
            access,
        }
    }

    /// Look up a tag; `None` if it does not exist
    pub fn get(&self, reference: &TagRef) -> Result<Option<Tag>> {
        let query = match reference {
            TagRef::Id(id) => Query::by_id(DocumentId::Int(*id)),
            TagRef::Name(name) => Query::new().eq(Tag::name_key(), name.as_str()),
        };
        self.store
            .find_one(&self.collection, &query, SortOrder::Ascending)?
            .map(|doc| Tag::from_document(&doc))
            .transpose()
    }

    /// Look up a tag that must exist
    pub fn resolve(&self, reference: &TagRef) -> Result<Tag> {
        self.get(reference)?
            .ok_or_else(|| BlackboardError::TagNotFound(reference.clone()))
    }

    /// False if the tag is absent or not a control tag
    pub fn is_control(&self, reference: &TagRef) -> Result<bool> {
        Ok(self.get(reference)?.is_some_and(|tag| tag.is_control))
    }

    /// False if the tag is absent or not inheritable
    pub fn is_inheritable(&self, reference: &TagRef) -> Result<bool> {
        Ok(self.get(reference)?.is_some_and(|tag| tag.is_inheritable))
    }

    /// All tags ordered by id
    pub fn all(&self) -> Result<Vec<Tag>> {
        self.store
            .find_page(&self.collection, &Query::new(), SortOrder::Ascending, None, 0)?
            .iter()
            .map(Tag::from_document)
            .collect()
    }

    /// Create a tag with the next tag id
    ///
    /// The tag is a control tag iff its name carries a control prefix.
    pub fn create(&self, name: &str, inheritable: bool) -> Result<Tag> {
        if name.is_empty() {
            return Err(BlackboardError::invalid("Tag name cannot be empty"));
        }
        if let Some(existing) = self.get(&TagRef::from(name))? {
            return Err(BlackboardError::TagAlreadyExists {
                name: name.to_string(),
                id: existing.id,
            });
        }

        let tag = Tag {
            id: self.counter.next_id_and_increment(Sequence::Tag)?,
            name: name.to_string(),
            is_control: Tag::has_control_prefix(name),
            is_inheritable: inheritable,
        };
        self.store.insert(&self.collection, &tag.to_document())?;

        info!(collection = %self.collection, id = tag.id, name = %tag.name, "Created tag");
        Ok(tag)
    }

    /// Rename a tag, optionally changing its inheritable flag
    ///
    /// A tag that is already a control tag stays one; a new name with a
    /// control prefix makes it one.
    pub fn rename(&self, id: i64, new_name: &str, inheritable: Option<bool>) -> Result<Tag> {
        if new_name.is_empty() {
            return Err(BlackboardError::invalid("Tag name cannot be empty"));
        }
        let current = self.resolve(&TagRef::Id(id))?;
        if let Some(other) = self.get(&TagRef::from(new_name))? {
            if other.id != id {
                return Err(BlackboardError::TagAlreadyExists {
                    name: new_name.to_string(),
                    id: other.id,
                });
            }
        }

        let tag = Tag {
            id,
            name: new_name.to_string(),
            is_control: current.is_control || Tag::has_control_prefix(new_name),
            is_inheritable: inheritable.unwrap_or(current.is_inheritable),
        };
        self.write(&tag)?;
        Ok(tag)
    }

    /// Set the control flag directly
    ///
    /// A tag whose name carries a control prefix cannot be made ordinary.
    pub fn set_control(&self, id: i64, control: bool) -> Result<Tag> {
        let mut tag = self.resolve(&TagRef::Id(id))?;
        if !control && Tag::has_control_prefix(&tag.name) {
            return Err(BlackboardError::invalid(format!(
                "Tag '{}' is a control tag by name and cannot be made ordinary",
                tag.name
            )));
        }
        tag.is_control = control;
        self.write(&tag)?;
        Ok(tag)
    }

    /// Remove a tag from every document carrying it, then drop the record
    ///
    /// Requires admin access. Returns false if the tag did not exist.
    pub fn delete(&self, id: i64, documents: &dyn DocumentStorage) -> Result<bool> {
        if !self.access.is_admin() {
            return Err(BlackboardError::PermissionDenied(
                "Admin rights required to delete tags.",
            ));
        }
        if self.get(&TagRef::Id(id))?.is_none() {
            return Ok(false);
        }

        let filter = Filter::builder().tag(id).build()?;
        let reference = [TagRef::Id(id)];
        let mut untagged = 0usize;
        for doc in documents.find(&filter)? {
            if let Some(doc_id) = doc?.id {
                documents.mutate_tags(&doc_id, &reference, TagOp::Remove)?;
                untagged += 1;
            }
        }

        let removed = self.store.delete(&self.collection, &DocumentId::Int(id))?;
        info!(collection = %self.collection, id, untagged, "Deleted tag");
        Ok(removed)
    }

    fn write(&self, tag: &Tag) -> Result<()> {
        let record = tag.to_document();
        let update = record
            .fields
            .into_iter()
            .fold(Update::new(), |update, (key, value): (String, Value)| update.set(key, value));
        self.store
            .update(&self.collection, &DocumentId::Int(tag.id), &update)?
            .ok_or_else(|| BlackboardError::TagNotFound(TagRef::Id(tag.id)))?;
        Ok(())
    }
}
