//! Dataset isolation scenarios

use entitydb::{CancelToken, EngineConfig, GetOptions, ListFilter, MatchMode, Store, TagValue};
use std::sync::Arc;
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

#[test]
fn test_scoped_and_global_listing() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    for _ in 0..100 {
        store
            .create(vec![tag("type:doc"), tag("dataset:a")], Vec::new(), None)
            .unwrap();
    }
    for _ in 0..100 {
        store
            .create(vec![tag("type:doc"), tag("dataset:b")], Vec::new(), None)
            .unwrap();
    }

    let cancel = CancelToken::new();
    let in_a = store
        .list(
            &ListFilter {
                dataset: Some("a".to_string()),
                ..Default::default()
            },
            &cancel,
        )
        .unwrap();
    assert_eq!(in_a.len(), 100);
    assert!(in_a.iter().all(|e| e.dataset() == "a"));

    let all = store.list(&ListFilter::default(), &cancel).unwrap();
    assert_eq!(all.len(), 200);
}

#[test]
fn test_dataset_defaults_and_transition() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let plain = store.create(vec![tag("type:doc")], Vec::new(), None).unwrap();
    assert_eq!(plain.dataset(), "default");
    assert_eq!(store.dataset_of(&plain.id), "default");

    // A transition is remove-old + add-new at the same timestamp
    let moved = store
        .create(vec![tag("type:doc"), tag("dataset:a")], Vec::new(), None)
        .unwrap();
    store
        .append_tags(&moved.id, &[tag("dataset:b")], &[tag("dataset:a")])
        .unwrap();
    assert_eq!(store.dataset_of(&moved.id), "b");

    let cancel = CancelToken::new();
    let in_a = store
        .list(
            &ListFilter {
                dataset: Some("a".to_string()),
                ..Default::default()
            },
            &cancel,
        )
        .unwrap();
    assert!(in_a.is_empty());
}

#[test]
fn test_legacy_hub_tag_is_read_only_fallback() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let legacy = store
        .create(vec![tag("type:doc"), tag("hub:warehouse")], Vec::new(), None)
        .unwrap();
    assert_eq!(legacy.dataset(), "warehouse");
    assert_eq!(store.dataset_of(&legacy.id), "warehouse");

    // An explicit dataset tag wins over the hub fallback
    store
        .append_tags(&legacy.id, &[tag("dataset:modern")], &[])
        .unwrap();
    assert_eq!(store.dataset_of(&legacy.id), "modern");
    let entity = store.get(&legacy.id, &GetOptions::default()).unwrap();
    assert_eq!(entity.dataset(), "modern");
    // The hub tag is preserved, never rewritten
    assert!(entity.has_tag(&tag("hub:warehouse")));
}

#[test]
fn test_get_with_dataset_scope() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let entity = store
        .create(vec![tag("dataset:a")], Vec::new(), None)
        .unwrap();

    assert!(store
        .get(
            &entity.id,
            &GetOptions {
                dataset: Some("a".to_string()),
                ..Default::default()
            },
        )
        .is_ok());
    let err = store
        .get(
            &entity.id,
            &GetOptions {
                dataset: Some("b".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_tag_filters_combine_with_datasets() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    store
        .create(
            vec![tag("type:doc"), tag("status:draft"), tag("dataset:a")],
            Vec::new(),
            None,
        )
        .unwrap();
    store
        .create(
            vec![tag("type:doc"), tag("status:final"), tag("dataset:a")],
            Vec::new(),
            None,
        )
        .unwrap();
    store
        .create(
            vec![tag("type:doc"), tag("status:draft"), tag("dataset:b")],
            Vec::new(),
            None,
        )
        .unwrap();

    let cancel = CancelToken::new();
    let drafts_in_a = store
        .list(
            &ListFilter {
                tags: vec![tag("type:doc"), tag("status:draft")],
                match_mode: MatchMode::All,
                dataset: Some("a".to_string()),
                ..Default::default()
            },
            &cancel,
        )
        .unwrap();
    assert_eq!(drafts_in_a.len(), 1);

    let any_status = store
        .list(
            &ListFilter {
                tags: vec![tag("status:draft"), tag("status:final")],
                match_mode: MatchMode::Any,
                dataset: Some("a".to_string()),
                ..Default::default()
            },
            &cancel,
        )
        .unwrap();
    assert_eq!(any_status.len(), 2);

    let wildcard = store
        .list(
            &ListFilter {
                wildcard: Some(entitydb::WildcardPattern::parse("status:*").unwrap()),
                ..Default::default()
            },
            &cancel,
        )
        .unwrap();
    assert_eq!(wildcard.len(), 3);
}

#[test]
fn test_pagination_is_stable() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    for _ in 0..10 {
        store
            .create(vec![tag("type:doc")], Vec::new(), None)
            .unwrap();
    }

    let cancel = CancelToken::new();
    let page = |offset| {
        store
            .list(
                &ListFilter {
                    tags: vec![tag("type:doc")],
                    limit: Some(4),
                    offset,
                    ..Default::default()
                },
                &cancel,
            )
            .unwrap()
    };

    let (p0, p1, p2) = (page(0), page(4), page(8));
    assert_eq!(p0.len(), 4);
    assert_eq!(p1.len(), 4);
    assert_eq!(p2.len(), 2);

    let mut seen: Vec<String> = p0
        .iter()
        .chain(&p1)
        .chain(&p2)
        .map(|e| e.id.to_string())
        .collect();
    let total = seen.len();
    seen.dedup();
    assert_eq!(total, 10, "pages must not overlap");
    assert_eq!(seen.len(), 10);
}
