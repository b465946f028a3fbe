//! Dataset routing
//!
//! Datasets are namespaces identified by a short name. Every entity
//! belongs to exactly one (the latest `dataset:` add event, with legacy
//! `hub:` as a read-only fallback, defaulting to `default`). The router
//! keeps a per-dataset projection of entity ids so scoped queries never
//! scan the full store. The `_system` dataset holds users, sessions, and
//! configuration.

use entitydb_core::{EntityId, DEFAULT_DATASET};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Default)]
struct RouterInner {
    assignment: FxHashMap<EntityId, Arc<str>>,
    members: FxHashMap<Arc<str>, BTreeSet<EntityId>>,
}

/// Tracks which dataset each entity belongs to
#[derive(Debug, Default)]
pub struct DatasetRouter {
    inner: RwLock<RouterInner>,
}

impl DatasetRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign an entity to a dataset, moving it out of its previous one
    pub fn assign(&self, id: &EntityId, dataset: &str) {
        let mut inner = self.inner.write();
        if let Some(previous) = inner.assignment.get(id).cloned() {
            if &*previous == dataset {
                return;
            }
            if let Some(set) = inner.members.get_mut(&previous) {
                set.remove(id);
                if set.is_empty() {
                    inner.members.remove(&previous);
                }
            }
        }
        let name: Arc<str> = match inner.members.get_key_value(dataset) {
            Some((existing, _)) => existing.clone(),
            None => Arc::from(dataset),
        };
        inner.assignment.insert(id.clone(), name.clone());
        inner.members.entry(name).or_default().insert(id.clone());
    }

    /// The entity's dataset; `default` when it was never assigned
    pub fn dataset_of(&self, id: &EntityId) -> Arc<str> {
        self.inner
            .read()
            .assignment
            .get(id)
            .cloned()
            .unwrap_or_else(|| Arc::from(DEFAULT_DATASET))
    }

    /// All entity ids in a dataset, sorted (creation-time order)
    pub fn ids_in(&self, dataset: &str) -> Vec<EntityId> {
        self.inner
            .read()
            .members
            .get(dataset)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Dataset names with their member counts
    pub fn datasets(&self) -> Vec<(Arc<str>, usize)> {
        self.inner
            .read()
            .members
            .iter()
            .map(|(name, set)| (name.clone(), set.len()))
            .collect()
    }

    /// Forget an entity entirely
    pub fn remove(&self, id: &EntityId) {
        let mut inner = self.inner.write();
        if let Some(name) = inner.assignment.remove(id) {
            if let Some(set) = inner.members.get_mut(&name) {
                set.remove(id);
                if set.is_empty() {
                    inner.members.remove(&name);
                }
            }
        }
    }

    /// Drop every assignment
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.assignment.clear();
        inner.members.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entitydb_core::Timestamp;

    fn id(n: i64) -> EntityId {
        EntityId::generate(Timestamp::from_nanos(n))
    }

    #[test]
    fn test_unassigned_is_default() {
        let router = DatasetRouter::new();
        assert_eq!(&*router.dataset_of(&id(1)), DEFAULT_DATASET);
    }

    #[test]
    fn test_assign_and_query() {
        let router = DatasetRouter::new();
        let a = id(1);
        let b = id(2);
        router.assign(&a, "metrics");
        router.assign(&b, "metrics");

        assert_eq!(&*router.dataset_of(&a), "metrics");
        let ids = router.ids_in("metrics");
        assert_eq!(ids.len(), 2);
        // Sorted by id, which is creation-time order
        assert_eq!(ids[0], a);
        assert!(router.ids_in("other").is_empty());
    }

    #[test]
    fn test_transition_moves_membership() {
        let router = DatasetRouter::new();
        let a = id(1);
        router.assign(&a, "old");
        router.assign(&a, "new");

        assert_eq!(&*router.dataset_of(&a), "new");
        assert!(router.ids_in("old").is_empty());
        assert_eq!(router.ids_in("new"), vec![a]);
    }

    #[test]
    fn test_remove() {
        let router = DatasetRouter::new();
        let a = id(1);
        router.assign(&a, "x");
        router.remove(&a);
        assert_eq!(&*router.dataset_of(&a), DEFAULT_DATASET);
        assert!(router.ids_in("x").is_empty());
        assert!(router.datasets().is_empty());
    }
}
