//! Tag catalog behaviour seen through a blackboard

mod common;

use common::*;

#[test]
fn test_control_prefix_sets_kind() {
    let (_api, feed) = standard("FEED", Access::Standard, None);

    let control = feed.create_tag("FOR>Tag_11", false).unwrap();
    let post = feed.create_tag("POST>Tag_12", true).unwrap();
    let ordinary = feed.create_tag("Tag_13", false).unwrap();

    assert!(control.is_control);
    assert!(post.is_control);
    assert!(!ordinary.is_control);
    assert!(feed.is_control_tag("FOR>Tag_11").unwrap());
    assert!(!feed.is_control_tag(ordinary.id).unwrap());
    assert!(feed.is_inheritable_tag(post.id).unwrap());
    // absent tags are never control or inheritable
    assert!(!feed.is_control_tag(999i64).unwrap());
    assert!(!feed.is_inheritable_tag("missing").unwrap());
}

#[test]
fn test_control_tags_route_to_their_own_attribute() {
    let (api, feed) = standard("FEED", Access::Standard, None);
    let control = feed.create_tag("FOR>Tag_11", false).unwrap();
    let ordinary = feed.create_tag("Tag_12", false).unwrap();

    let tagged = feed.insert(Document::new().field("T", "a")).unwrap();
    let other = feed.insert(Document::new().field("T", "b")).unwrap();
    feed.add_tags(&tagged, &[TagRef::from("FOR>Tag_11"), TagRef::Id(ordinary.id)])
        .unwrap();
    feed.add_tag(&other, ordinary.id).unwrap();

    let doc = stored(&api, "FEED", &tagged).unwrap();
    assert_eq!(doc.control_tags(), vec![control.id]);
    assert_eq!(doc.tags(), vec![ordinary.id]);

    let filter = Filter::builder().tag("FOR>Tag_11").build().unwrap();
    let found = collect(&feed, &filter);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, Some(tagged.clone()));

    let filter = Filter::builder().tag(ordinary.id).without_tags([control.id]).build().unwrap();
    let found = collect(&feed, &filter);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, Some(other));
}

#[test]
fn test_remove_tags() {
    let (api, feed) = standard("FEED", Access::Standard, None);
    let control = feed.create_tag("FOR>Tag_11", false).unwrap();
    let ordinary = feed.create_tag("Tag_12", false).unwrap();

    let id = feed.insert(Document::new()).unwrap();
    feed.add_tags(&id, &[TagRef::Id(control.id), TagRef::Id(ordinary.id)]).unwrap();
    feed.remove_tag(&id, control.id).unwrap();

    let doc = stored(&api, "FEED", &id).unwrap();
    assert!(doc.control_tags().is_empty());
    assert_eq!(doc.tags(), vec![ordinary.id]);

    // missing documents are not an error
    assert_eq!(feed.add_tag(&DocumentId::Int(999), ordinary.id).unwrap(), None);
    // names must resolve
    let err = feed.add_tag(&id, "Unknown").err().unwrap();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_create_and_rename_conflicts() {
    let (_api, feed) = standard("FEED", Access::Standard, None);
    let first = feed.create_tag("Tag_1", false).unwrap();
    let second = feed.create_tag("Tag_2", false).unwrap();

    let err = feed.create_tag("Tag_1", true).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let err = feed.rename_tag(second.id, "Tag_1", None).err().unwrap();
    assert!(matches!(err, BlackboardError::TagAlreadyExists { id, .. } if id == first.id));

    let renamed = feed.rename_tag(second.id, "FOR>Tag_2", Some(true)).unwrap();
    assert!(renamed.is_control);
    assert!(renamed.is_inheritable);
    assert_eq!(feed.tag("FOR>Tag_2").unwrap(), Some(renamed));
    assert_eq!(feed.tag("Tag_2").unwrap(), None);
}

#[test]
fn test_delete_tag_untags_documents() {
    let (api, feed) = standard("FEED", Access::Admin, None);
    let doomed = feed.create_tag("Tag_1", false).unwrap();
    let kept = feed.create_tag("Tag_2", false).unwrap();

    let mut ids = Vec::new();
    for n in 0..5 {
        let id = feed.insert(Document::new().field("n", n)).unwrap();
        feed.add_tags(&id, &[TagRef::Id(doomed.id), TagRef::Id(kept.id)]).unwrap();
        ids.push(id);
    }

    assert!(feed.delete_tag(doomed.id).unwrap());
    assert_eq!(feed.tag(doomed.id).unwrap(), None);
    for id in &ids {
        assert_eq!(stored(&api, "FEED", id).unwrap().tags(), vec![kept.id]);
    }

    // already gone
    assert!(!feed.delete_tag(doomed.id).unwrap());
}

#[test]
fn test_delete_requires_admin() {
    let (api, feed) = standard("FEED", Access::Standard, None);
    let tag = feed.create_tag("Tag_1", false).unwrap();
    let id = feed.insert(Document::new().field("T", "a")).unwrap();
    feed.add_tag(&id, tag.id).unwrap();

    let err = feed.delete(&id).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    let err = feed.delete_tag(tag.id).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    // nothing changed
    let doc = stored(&api, "FEED", &id).unwrap();
    assert_eq!(doc.tags(), vec![tag.id]);
    assert_eq!(feed.all_tags().unwrap(), vec![tag]);

    let admin = BlackboardApi::with_store(api.store().clone(), Access::Admin)
        .load_blackboard("FEED")
        .unwrap();
    assert!(admin.delete(&id).unwrap());
    assert!(stored(&api, "FEED", &id).is_none());
}
