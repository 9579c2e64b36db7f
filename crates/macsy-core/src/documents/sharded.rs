//! Year-sharded document storage
//!
//! Documents of a date-based blackboard live in one collection per
//! calendar year, named `<NAME>_<YEAR>`. Ids are time-encoded
//! [`ObjectId`]s; the year of an id's timestamp selects its shard.
//!
//! The shard set is discovered once at attach time. Queries fan out over
//! the years in range, one stream per shard in sort order, so that
//! concatenating the streams yields the global order.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::counter::BlackboardType;
use crate::cursor::MergeCursor;
use crate::documents::{DocumentCore, DocumentStorage, Extremity, TagOp};
use crate::error::{BlackboardError, Result};
use crate::filter::Filter;
use crate::models::{Document, DocumentId, ObjectId, TagRef};
use crate::storage::{Query, SortOrder};

/// Name of the shard of `blackboard` for `year`
pub fn shard_collection(blackboard: &str, year: i32) -> String {
    format!("{}_{}", blackboard, year)
}

pub struct ShardedDocumentStore {
    core: DocumentCore,
    shards: BTreeMap<i32, String>,
    min_year: i32,
    max_year: i32,
}

impl ShardedDocumentStore {
    /// Discover the year shards of the blackboard and build their
    /// required indexes
    ///
    /// Fails with `NoShards` if there are none.
    pub(crate) fn attach(core: DocumentCore) -> Result<Self> {
        let prefix = format!("{}_", core.blackboard);
        let shards: BTreeMap<i32, String> = core
            .store
            .collection_names()?
            .into_iter()
            .filter_map(|name| {
                let year = name
                    .strip_prefix(&prefix)
                    .filter(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))?
                    .parse::<i32>()
                    .ok()?;
                Some((year, name))
            })
            .collect();

        let (Some(&min_year), Some(&max_year)) = (shards.keys().next(), shards.keys().next_back()) else {
            return Err(BlackboardError::NoShards(core.blackboard.clone()));
        };

        for collection in shards.values() {
            core.ensure_indexes(collection)?;
        }

        info!(
            blackboard = %core.blackboard,
            shards = shards.len(),
            min_year,
            max_year,
            "Discovered year shards"
        );
        Ok(Self {
            core,
            shards,
            min_year,
            max_year,
        })
    }

    pub fn min_year(&self) -> i32 {
        self.min_year
    }

    pub fn max_year(&self) -> i32 {
        self.max_year
    }

    /// Years with a shard, ascending
    pub fn years(&self) -> Vec<i32> {
        self.shards.keys().copied().collect()
    }

    /// Shards covering the filter's date window, in the filter's sort order
    fn shards_in_range(&self, filter: &Filter) -> Vec<&str> {
        let from = filter
            .min_date
            .map_or(self.min_year, |date| date.year())
            .max(self.min_year);
        // the upper bound is exclusive; nothing lies before the earliest instant
        let to = match filter.max_date {
            None => self.max_year,
            Some(date) => match date.checked_sub_signed(Duration::nanoseconds(1)) {
                Some(last) => last.year().min(self.max_year),
                None => return Vec::new(),
            },
        };
        if from > to {
            return Vec::new();
        }

        let mut shards = Vec::new();
        for year in from..=to {
            match self.shards.get(&year) {
                Some(collection) => shards.push(collection.as_str()),
                None => warn!(blackboard = %self.core.blackboard, year, "No shard for year, skipping"),
            }
        }
        if !filter.sort.is_ascending() {
            shards.reverse();
        }
        shards
    }

    /// Every shard, newest first
    fn all_shards(&self) -> Vec<&str> {
        self.shards.values().rev().map(String::as_str).collect()
    }

    /// Shard owning `id`, `None` if its year has no shard
    fn shard_of(&self, id: &DocumentId) -> Result<Option<&str>> {
        let timestamp = id.timestamp().ok_or_else(|| {
            BlackboardError::invalid(format!(
                "Document id {} of date-based blackboard '{}' is not an ObjectId",
                id, self.core.blackboard
            ))
        })?;
        Ok(self.shards.get(&timestamp.year()).map(String::as_str))
    }
}

impl DocumentStorage for ShardedDocumentStore {
    fn kind(&self) -> BlackboardType {
        BlackboardType::DateBased
    }

    fn find(&self, filter: &Filter) -> Result<MergeCursor> {
        let query = self.core.translate(filter)?;
        let options = self.core.find_options(filter);
        let shards = self.shards_in_range(filter);
        debug!(blackboard = %self.core.blackboard, ?shards, "Fanning out find");

        let streams = shards
            .into_iter()
            .map(|collection| self.core.store.find(collection, &query, options))
            .collect();
        MergeCursor::new(streams, filter.limit)
    }

    fn count(&self, filter: &Filter) -> Result<u64> {
        let query = self.core.translate(filter)?;
        let mut total = 0;
        for collection in self.shards_in_range(filter) {
            total += self.core.store.count(collection, &query)?;
        }
        Ok(total)
    }

    fn insert(&self, mut doc: Document) -> Result<DocumentId> {
        self.core.ensure_array_fields(&mut doc);
        let id = match doc.id.take() {
            None => DocumentId::Object(ObjectId::new()),
            Some(id @ DocumentId::Object(_)) => id,
            Some(other) => {
                return Err(BlackboardError::invalid(format!(
                    "Documents of date-based blackboard '{}' need ObjectId ids, got {}",
                    self.core.blackboard, other
                )))
            }
        };
        doc.id = Some(id.clone());

        let year = id.timestamp().map_or(self.max_year, |t| t.year());
        let collection = self
            .shards
            .get(&year)
            .ok_or_else(|| BlackboardError::ShardNotFound {
                blackboard: self.core.blackboard.clone(),
                year,
            })?
            .clone();

        // a duplicate may live in any year
        if let Some(existing) = self.core.find_duplicate(&self.all_shards(), &doc)? {
            if let Some(merged) = self.update(&existing, doc.fields.clone())? {
                debug!(blackboard = %self.core.blackboard, id = %merged, "Insert merged into existing document");
                return Ok(merged);
            }
        }

        let hash = self.core.hash_of(&doc);
        doc.set(self.core.hash_field(), hash);
        self.core.store.insert(&collection, &doc)?;
        Ok(id)
    }

    fn update(&self, id: &DocumentId, fields: Map<String, Value>) -> Result<Option<DocumentId>> {
        let Some(collection) = self.shard_of(id)? else {
            return Ok(None);
        };
        let update = self.core.build_update(fields);
        self.core.apply_update(collection, id, &update)
    }

    fn delete(&self, id: &DocumentId) -> Result<bool> {
        self.core.require_admin()?;
        let Some(collection) = self.shard_of(id)? else {
            return Ok(false);
        };
        let removed = self.core.store.delete(collection, id)?;
        if removed {
            info!(collection, %id, "Deleted document");
        }
        Ok(removed)
    }

    fn mutate_tags(&self, id: &DocumentId, tags: &[TagRef], op: TagOp) -> Result<Option<DocumentId>> {
        let update = self.core.tag_update(tags, op)?;
        let Some(collection) = self.shard_of(id)? else {
            return Ok(None);
        };
        self.core.apply_update(collection, id, &update)
    }

    fn extremal_date(&self, which: Extremity) -> Result<Option<DateTime<Utc>>> {
        let (year, sort) = match which {
            Extremity::Earliest => (self.min_year, SortOrder::Ascending),
            Extremity::Latest => (self.max_year, SortOrder::Descending),
        };
        let Some(collection) = self.shards.get(&year) else {
            return Ok(None);
        };
        let doc = self.core.store.find_one(collection, &Query::new(), sort)?;
        Ok(doc.and_then(|doc| doc.id).and_then(|id| id.timestamp()))
    }
}
