//! End-to-end temporal scenarios
//!
//! The canonical walkthrough: create a draft document, publish it,
//! and interrogate every point of its history.

use entitydb::{EngineConfig, GetOptions, Polarity, Store, TagValue, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn open_store(dir: &TempDir) -> Arc<Store> {
    Store::open(EngineConfig {
        data_path: dir.path().to_path_buf(),
        ..Default::default()
    })
    .unwrap()
}

fn tag(s: &str) -> TagValue {
    TagValue::parse(s).unwrap()
}

// The clock must advance between steps so as-of boundaries are distinct
fn step() -> Timestamp {
    std::thread::sleep(Duration::from_millis(2));
    let t = Timestamp::now();
    std::thread::sleep(Duration::from_millis(2));
    t
}

#[test]
fn test_create_then_get_and_history() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let entity = store
        .create(
            vec![tag("type:doc"), tag("status:draft")],
            b"hello".to_vec(),
            None,
        )
        .unwrap();

    let fetched = store.get(&entity.id, &GetOptions::default()).unwrap();
    assert!(fetched.has_tag(&tag("type:doc")));
    assert!(fetched.has_tag(&tag("status:draft")));
    assert_eq!(fetched.content, b"hello");

    let history = store.history(&entity.id, None, None).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|e| e.polarity == Polarity::Add));
}

#[test]
fn test_publish_transition_is_visible_through_time() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let entity = store
        .create(
            vec![tag("type:doc"), tag("status:draft")],
            b"hello".to_vec(),
            None,
        )
        .unwrap();
    let id = entity.id.clone();

    let between = step();
    store
        .append_tags(&id, &[tag("status:published")], &[tag("status:draft")])
        .unwrap();
    let after = step();

    // Before the transition: draft
    let draft = store.as_of(&id, between).unwrap();
    assert!(draft.has_tag(&tag("status:draft")));
    assert!(!draft.has_tag(&tag("status:published")));

    // After the transition: published, not draft
    let published = store.as_of(&id, after).unwrap();
    assert!(published.has_tag(&tag("status:published")));
    assert!(!published.has_tag(&tag("status:draft")));

    // The live view matches the latest reconstruction
    let live = store.get(&id, &GetOptions::default()).unwrap();
    assert_eq!(live.tags, published.tags);
}

#[test]
fn test_diff_between_draft_and_published() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let entity = store
        .create(vec![tag("type:doc"), tag("status:draft")], Vec::new(), None)
        .unwrap();
    let id = entity.id.clone();

    let t1 = step();
    store
        .append_tags(&id, &[tag("status:published")], &[tag("status:draft")])
        .unwrap();
    let t2 = step();

    let diff = store.diff(&id, t1, t2).unwrap();
    assert_eq!(diff.added, vec![tag("status:published")]);
    assert_eq!(diff.removed, vec![tag("status:draft")]);

    // Identical bounds diff to nothing
    let empty = store.diff(&id, t1, t1).unwrap();
    assert!(empty.added.is_empty());
    assert!(empty.removed.is_empty());
}

#[test]
fn test_as_of_edge_cases() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let before_create = step();
    let entity = store.create(vec![tag("type:doc")], Vec::new(), None).unwrap();
    let id = entity.id.clone();

    // Before the first event: not found
    assert!(store.as_of(&id, before_create).unwrap_err().is_not_found());

    // Far in the future: state at the latest event
    let future = Timestamp::from_nanos(i64::MAX);
    let latest = store.as_of(&id, future).unwrap();
    assert!(latest.has_tag(&tag("type:doc")));

    // Unknown id: not found
    let ghost = entitydb::EntityId::generate(Timestamp::now());
    assert!(store.as_of(&ghost, future).unwrap_err().is_not_found());
}

#[test]
fn test_history_is_monotonic_and_windowed() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let entity = store.create(vec![tag("type:doc")], Vec::new(), None).unwrap();
    let id = entity.id.clone();

    for n in 0..5 {
        std::thread::sleep(Duration::from_millis(1));
        store
            .append_tags(&id, &[tag(&format!("step:{}", n))], &[])
            .unwrap();
    }

    let history = store.history(&id, None, None).unwrap();
    assert_eq!(history.len(), 6);
    for pair in history.windows(2) {
        assert!(pair[0].ts <= pair[1].ts, "history must be time-ordered");
    }

    // Window selects the middle of the sequence
    let from = history[2].ts;
    let to = history[4].ts;
    let windowed = store.history(&id, Some(from), Some(to)).unwrap();
    assert_eq!(windowed.len(), 3);
    assert!(windowed.iter().all(|e| e.ts >= from && e.ts <= to));
}

#[test]
fn test_changes_since_orders_by_earliest_change() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let a = store.create(vec![tag("type:doc")], Vec::new(), None).unwrap();
    let cutoff = step();
    let b = store.create(vec![tag("type:doc")], Vec::new(), None).unwrap();
    std::thread::sleep(Duration::from_millis(2));
    store.append_tags(&a.id, &[tag("status:touched")], &[]).unwrap();

    let changes = store
        .changes_since(cutoff, None, &entitydb::CancelToken::new())
        .unwrap();
    assert_eq!(changes.len(), 2);
    // b changed first (its create), then a (its append)
    assert_eq!(changes[0].id, b.id);
    assert_eq!(changes[1].id, a.id);
    assert!(changes[1].events.iter().all(|e| e.ts > cutoff));

    // Limit applies after sorting
    let limited = store
        .changes_since(cutoff, Some(1), &entitydb::CancelToken::new())
        .unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].id, b.id);
}

#[test]
fn test_replace_content_preserves_old_version_reads() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let entity = store
        .create(vec![tag("type:doc")], b"version one".to_vec(), None)
        .unwrap();
    let id = entity.id.clone();

    let before_replace = step();
    store.replace_content(&id, b"version two".to_vec()).unwrap();
    let after_replace = step();

    assert_eq!(
        store.get(&id, &GetOptions::default()).unwrap().content,
        b"version two"
    );
    assert_eq!(
        store.as_of(&id, before_replace).unwrap().content,
        b"version one"
    );
    assert_eq!(
        store.as_of(&id, after_replace).unwrap().content,
        b"version two"
    );

    // The version transition is recorded as a tag event
    let live = store.get(&id, &GetOptions::default()).unwrap();
    assert!(live.has_tag(&tag("content:version:1")));
}

#[test]
fn test_soft_delete_keeps_history() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let entity = store
        .create(vec![tag("type:doc"), tag("status:draft")], Vec::new(), None)
        .unwrap();
    let id = entity.id.clone();

    let before = step();
    store.soft_delete(&id).unwrap();

    let live = store.get(&id, &GetOptions::default()).unwrap();
    assert!(live.has_tag(&tag("lifecycle:state:soft_deleted")));

    // Nothing was erased
    let past = store.as_of(&id, before).unwrap();
    assert!(!past.has_tag(&tag("lifecycle:state:soft_deleted")));
    assert!(past.has_tag(&tag("status:draft")));
}
