//! Date-based blackboards spread over year shards

mod common;

use chrono::Datelike;
use common::*;
use serde_json::json;

#[test]
fn test_count_and_find_across_years() {
    let (_api, article) = date_based("ARTICLE", Access::Standard, &[2015, 2016, 2017, 2018]);
    let tag = article.create_tag("Tag_1", false).unwrap();
    for year in 2015..=2018 {
        article
            .insert(dated_doc(year, 6, 1).field("tags", json!([tag.id])))
            .unwrap();
    }

    let tagged = Filter::builder().tag(tag.id).build().unwrap();
    assert_eq!(article.count(&tagged).unwrap(), 4);

    let recent = Filter::builder()
        .tag(tag.id)
        .min_date_str("2016-01-01")
        .build()
        .unwrap();
    let found = collect(&article, &recent);
    assert_eq!(years_of(&found), vec![2018, 2017, 2016]);
    assert_eq!(article.count(&recent).unwrap(), 3);
}

#[test]
fn test_ascending_limit_spans_shards() {
    let (_api, article) = date_based("ARTICLE", Access::Standard, &[2016, 2017, 2018]);
    let mut expected = Vec::new();
    for year in [2018, 2016, 2017] {
        for month in [3, 9] {
            let id = article.insert(dated_doc(year, month, 1)).unwrap();
            if year == 2016 {
                expected.push(id);
            }
        }
    }

    let filter = Filter::builder().sort(SortOrder::Ascending).limit(2).build().unwrap();
    let cursor = article.find(&filter).unwrap();
    assert_eq!(cursor.total_count().unwrap(), 2);

    let found: Vec<_> = cursor.map(|doc| doc.unwrap().id.unwrap()).collect();
    assert_eq!(found, expected);
}

#[test]
fn test_date_window_is_half_open() {
    let (_api, article) = date_based("ARTICLE", Access::Standard, &[2016, 2017]);
    article.insert(dated_doc(2016, 12, 31)).unwrap();
    let boundary = Document::with_id(ObjectId::with_timestamp(day(2017, 1, 1)));
    article.insert(boundary).unwrap();
    article.insert(dated_doc(2017, 2, 1)).unwrap();

    let filter = Filter::builder()
        .min_date(day(2016, 6, 1))
        .max_date(day(2017, 1, 1))
        .build()
        .unwrap();
    let found = collect(&article, &filter);
    assert_eq!(years_of(&found), vec![2016]);

    let filter = Filter::builder().min_date(day(2017, 1, 1)).build().unwrap();
    assert_eq!(article.count(&filter).unwrap(), 2);
}

#[test]
fn test_insert_routes_by_id_year() {
    let (api, article) = date_based("ARTICLE", Access::Standard, &[2016, 2017]);

    let id = article.insert(dated_doc(2016, 5, 5).field("T", "x")).unwrap();
    let shard = shard_collection("ARTICLE", 2016);
    assert!(stored(&api, &shard, &id).is_some());
    assert!(stored(&api, &shard_collection("ARTICLE", 2017), &id).is_none());

    let err = article.insert(dated_doc(2019, 1, 1)).err().unwrap();
    assert!(matches!(err, BlackboardError::ShardNotFound { year: 2019, .. }));

    let err = article.insert(Document::with_id(7i64)).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_duplicate_found_in_other_year() {
    let store = SqliteStore::open_in_memory().unwrap();
    provision(&store, "ARTICLE", BlackboardType::DateBased, Some(&["T"]));
    store.create_collection(&shard_collection("ARTICLE", 2016)).unwrap();
    store.create_collection(&shard_collection("ARTICLE", 2017)).unwrap();
    let api = BlackboardApi::with_store(store, Access::Standard);
    let article = api.load_blackboard("ARTICLE").unwrap();

    let original = article.insert(dated_doc(2016, 3, 3).field("T", "same")).unwrap();
    let again = article
        .insert(dated_doc(2017, 3, 3).field("T", "same").field("extra", true))
        .unwrap();

    assert_eq!(again, original);
    assert_eq!(article.count(&Filter::new()).unwrap(), 1);
    let doc = stored(&api, &shard_collection("ARTICLE", 2016), &original).unwrap();
    assert_eq!(doc.get("extra"), Some(&json!(true)));
}

#[test]
fn test_update_tag_and_delete_in_owning_shard() {
    let (api, article) = date_based("ARTICLE", Access::Admin, &[2016, 2017]);
    let tag = article.create_tag("FOR>Tag_5", false).unwrap();
    let id = article.insert(dated_doc(2017, 8, 8)).unwrap();
    let shard = shard_collection("ARTICLE", 2017);

    let changes = json!({ "T": "title" }).as_object().cloned().unwrap();
    assert_eq!(article.update(&id, changes).unwrap(), Some(id.clone()));
    article.add_tag(&id, tag.id).unwrap();

    let doc = stored(&api, &shard, &id).unwrap();
    assert_eq!(doc.get("T"), Some(&json!("title")));
    assert_eq!(doc.control_tags(), vec![tag.id]);

    let filter = Filter::builder().tag("FOR>Tag_5").build().unwrap();
    assert_eq!(article.count(&filter).unwrap(), 1);

    assert!(article.delete(&id).unwrap());
    assert!(stored(&api, &shard, &id).is_none());
    assert!(!article.delete(&id).unwrap());

    let missing = DocumentId::Object(ObjectId::with_timestamp(day(2030, 1, 1)));
    assert!(!article.delete(&missing).unwrap());
}

#[test]
fn test_dates() {
    let (_api, article) = date_based("ARTICLE", Access::Standard, &[2015, 2016, 2017]);
    assert_eq!(article.earliest_date().unwrap(), None);

    article.insert(dated_doc(2015, 4, 1)).unwrap();
    article.insert(dated_doc(2015, 9, 1)).unwrap();
    article.insert(dated_doc(2017, 2, 1)).unwrap();
    let last_id = article.insert(dated_doc(2017, 11, 30)).unwrap();

    let earliest = article.earliest_date().unwrap().unwrap();
    assert_eq!((earliest.year(), earliest.month()), (2015, 4));
    let latest = article.latest_date().unwrap().unwrap();
    assert_eq!((latest.year(), latest.month(), latest.day()), (2017, 11, 30));

    assert_eq!(article.date_of(&Document::with_id(last_id)).unwrap(), latest);
}

#[test]
fn test_sharded_blackboard_needs_shards() {
    let store = SqliteStore::open_in_memory().unwrap();
    provision(&store, "ARTICLE", BlackboardType::DateBased, None);
    let api = BlackboardApi::with_store(store, Access::Standard);

    let err = api.load_blackboard("ARTICLE").err().unwrap();
    assert!(matches!(err, BlackboardError::NoShards(_)));
}

#[test]
fn test_earliest_possible_max_date_selects_no_shards() {
    let (_api, article) = date_based("ARTICLE", Access::Standard, &[2016]);
    article.insert(dated_doc(2016, 1, 1)).unwrap();

    let filter = Filter::from_json(&json!({ "tags": [], "max_date": ["-262143-01-01"] })).unwrap();
    assert!(filter.max_date.is_some());
    assert_eq!(article.count(&filter).unwrap(), 0);
    assert!(collect(&article, &filter).is_empty());

    let filter = Filter::builder()
        .max_date(chrono::DateTime::<chrono::Utc>::MIN_UTC)
        .build()
        .unwrap();
    assert_eq!(article.count(&filter).unwrap(), 0);
    assert!(collect(&article, &filter).is_empty());
}

#[test]
fn test_raw_query_with_dates_selects_covering_shards() {
    let (_api, article) = date_based("ARTICLE", Access::Standard, &[2015, 2016, 2017]);
    for year in 2015..=2017 {
        article.insert(dated_doc(year, 6, 1).field("T", "same")).unwrap();
    }

    // the window picks the 2016 shard; inside it the raw predicate alone applies
    let filter = Filter::from_json(&json!({
        "query": { "T": "same" },
        "min_date": ["2016-07-01"],
        "max_date": ["2017-01-01"],
    }))
    .unwrap();
    let found = collect(&article, &filter);
    assert_eq!(years_of(&found), vec![2016]);
    assert_eq!(article.count(&filter).unwrap(), 1);
}

#[test]
fn test_sharded_delete_requires_admin() {
    let (api, article) = date_based("ARTICLE", Access::Standard, &[2016]);
    let id = article.insert(dated_doc(2016, 2, 2)).unwrap();

    let err = article.delete(&id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert!(stored(&api, &shard_collection("ARTICLE", 2016), &id).is_some());
}

#[test]
fn test_delete_tag_untags_every_shard() {
    let (api, article) = date_based("ARTICLE", Access::Admin, &[2015, 2016, 2017]);
    let doomed = article.create_tag("Tag_1", false).unwrap();
    let kept = article.create_tag("Tag_2", false).unwrap();

    let mut placed = Vec::new();
    for year in 2015..=2017 {
        let id = article.insert(dated_doc(year, 5, 5)).unwrap();
        article
            .add_tags(&id, &[TagRef::Id(doomed.id), TagRef::Id(kept.id)])
            .unwrap();
        placed.push((year, id));
    }

    assert!(article.delete_tag(doomed.id).unwrap());
    for (year, id) in &placed {
        let doc = stored(&api, &shard_collection("ARTICLE", *year), id).unwrap();
        assert_eq!(doc.tags(), vec![kept.id]);
    }
    let filter = Filter::builder().tag(kept.id).build().unwrap();
    assert_eq!(article.count(&filter).unwrap(), 3);
}

#[test]
fn test_required_indexes_built_on_every_shard() {
    let store = SqliteStore::open_in_memory().unwrap();
    provision(&store, "ARTICLE", BlackboardType::DateBased, None);
    store
        .insert(
            &counter_collection("ARTICLE"),
            &Document::with_id(records::INDEXES).field("fields", json!([{ "_id": 1 }, { "hash": 1 }, "T"])),
        )
        .unwrap();
    for year in [2016, 2017] {
        store.create_collection(&shard_collection("ARTICLE", year)).unwrap();
    }

    let api = BlackboardApi::with_store(store, Access::Standard);
    api.load_blackboard("ARTICLE").unwrap();
    for year in [2016, 2017] {
        let indexed = api.store().indexed_fields(&shard_collection("ARTICLE", year)).unwrap();
        assert_eq!(indexed, vec!["T", "hash"]);
    }

    // attaching again finds them in place
    api.load_blackboard("ARTICLE").unwrap();
    assert_eq!(
        api.store().indexed_fields(&shard_collection("ARTICLE", 2016)).unwrap(),
        vec!["T", "hash"]
    );
}
