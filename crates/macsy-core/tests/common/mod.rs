//! Shared fixtures for the integration suites.
//!
//! Blackboards are provisioned by writing their counter records directly,
//! the way a deployment seeds them, and then attached through the API.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

pub use macsy_core::counter::{counter_collection, records};
pub use macsy_core::documents::sharded::shard_collection;
pub use macsy_core::{
    Access, Blackboard, BlackboardApi, BlackboardError, BlackboardType, Document, DocumentId,
    ErrorKind, Filter, ObjectId, Query, SortOrder, SqliteStore, TagRef,
};

/// Seed the counter records of a blackboard
pub fn provision(store: &SqliteStore, name: &str, kind: BlackboardType, hash_components: Option<&[&str]>) {
    let counter = counter_collection(name);
    store
        .insert(
            &counter,
            &Document::with_id(records::NEXT_ID)
                .field("tag_counter", 1)
                .field("doc_counter", 1),
        )
        .unwrap();
    store
        .insert(
            &counter,
            &Document::with_id(records::BLACKBOARD_TYPE).field("type", kind.as_str()),
        )
        .unwrap();
    if let Some(components) = hash_components {
        store
            .insert(
                &counter,
                &Document::with_id(records::HASH)
                    .field("field", "hash")
                    .field("components", json!(components)),
            )
            .unwrap();
    }
}

/// A standard blackboard in a fresh in-memory store
pub fn standard(name: &str, access: Access, hash_components: Option<&[&str]>) -> (BlackboardApi, Blackboard) {
    let store = SqliteStore::open_in_memory().unwrap();
    provision(&store, name, BlackboardType::Standard, hash_components);
    let api = BlackboardApi::with_store(store, access);
    let blackboard = api.load_blackboard(name).unwrap();
    (api, blackboard)
}

/// A date-based blackboard with one empty shard per year
pub fn date_based(name: &str, access: Access, years: &[i32]) -> (BlackboardApi, Blackboard) {
    let store = SqliteStore::open_in_memory().unwrap();
    provision(&store, name, BlackboardType::DateBased, None);
    for &year in years {
        store.create_collection(&shard_collection(name, year)).unwrap();
    }
    let api = BlackboardApi::with_store(store, access);
    let blackboard = api.load_blackboard(name).unwrap();
    (api, blackboard)
}

/// Midnight UTC of a calendar day
pub fn day(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

/// Document with a time-encoded id created at noon of the given day
pub fn dated_doc(year: i32, month: u32, d: u32) -> Document {
    let time = day(year, month, d) + chrono::Duration::hours(12);
    Document::with_id(ObjectId::with_timestamp(time))
}

/// Collect a find result, failing the test on any error
pub fn collect(blackboard: &Blackboard, filter: &Filter) -> Vec<Document> {
    blackboard
        .find(filter)
        .unwrap()
        .collect::<macsy_core::Result<Vec<_>>>()
        .unwrap()
}

/// Years of the ids of `docs`, in order
pub fn years_of(docs: &[Document]) -> Vec<i32> {
    use chrono::Datelike;
    docs.iter()
        .map(|doc| doc.id.as_ref().and_then(DocumentId::timestamp).unwrap().year())
        .collect()
}

/// Fetch one stored document of a standard blackboard by id
pub fn stored(api: &BlackboardApi, collection: &str, id: &DocumentId) -> Option<Document> {
    api.store()
        .find_one(collection, &Query::by_id(id.clone()), SortOrder::Ascending)
        .unwrap()
}

pub fn ints(values: &[i64]) -> Value {
    json!(values)
}
