//! Read paths: get, list, query
//!
//! Predicate evaluation rewrites each required tag to its id through the
//! dictionary, consults the tag index per tag for candidate id sets, and
//! intersects (match=all) or unions (match=any) them. Wildcards iterate
//! the dictionary's sorted index; blooms short-circuit empty
//! intersections. Results materialize through the id→offset map, get
//! filtered by dataset, and — when `as_of` is present — reconstruct
//! through the temporal engine.

use crate::store::{sha256_hex, CurrentFile, Store};
use entitydb_core::{
    CancelToken, DbResult, Entity, EntityDbError, EntityId, TagValue, TaggedAtTime, Timestamp,
    WildcardPattern,
};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Options for [`Store::get`]
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Reconstruct the entity as of this time instead of returning the
    /// live state
    pub as_of: Option<Timestamp>,
    /// Require the entity to belong to this dataset
    pub dataset: Option<String>,
}

/// How multiple tag predicates combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Every tag must be present
    #[default]
    All,
    /// At least one tag must be present
    Any,
}

impl MatchMode {
    /// Parse the `match=` query parameter
    pub fn parse(s: &str) -> DbResult<Self> {
        match s {
            "all" => Ok(MatchMode::All),
            "any" => Ok(MatchMode::Any),
            other => Err(EntityDbError::malformed(format!(
                "invalid match mode '{}': expected all or any",
                other
            ))),
        }
    }
}

/// A list/query predicate
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Required tag values
    pub tags: Vec<TagValue>,
    /// How the tags combine
    pub match_mode: MatchMode,
    /// Optional `ns:prefix*` predicate
    pub wildcard: Option<WildcardPattern>,
    /// Restrict to one dataset
    pub dataset: Option<String>,
    /// Page size (None = unbounded)
    pub limit: Option<usize>,
    /// Page start
    pub offset: usize,
}

impl Store {
    /// Fetch one entity
    pub fn get(&self, id: &EntityId, opts: &GetOptions) -> DbResult<Entity> {
        if let Some(dataset) = &opts.dataset {
            if &*self.datasets.dataset_of(id) != dataset.as_str() {
                return Err(EntityDbError::not_found(format!(
                    "entity {} in dataset {}",
                    id, dataset
                )));
            }
        }
        if let Some(t) = opts.as_of {
            return self.as_of(id, t);
        }

        if let Some(cached) = self.cache.get(id) {
            return Ok((*cached).clone());
        }
        let cur = self.current();
        let entity = self
            .materialize_live(&cur, id)?
            .ok_or_else(|| EntityDbError::not_found(format!("entity {}", id)))?;
        self.cache.put(Arc::new(entity.clone()));
        Ok(entity)
    }

    /// List entities matching a filter, paginated
    pub fn list(&self, filter: &ListFilter, cancel: &CancelToken) -> DbResult<Vec<Entity>> {
        let cur = self.current();
        let candidates = self.candidate_ids(&cur, filter, cancel)?;

        let limit = filter.limit.unwrap_or(usize::MAX);
        let mut out = Vec::with_capacity(limit.min(1024));
        for (i, id) in candidates.iter().skip(filter.offset).enumerate() {
            if out.len() >= limit {
                break;
            }
            if i % 1024 == 0 {
                cancel.check()?;
            }
            if let Some(cached) = self.cache.get(id) {
                out.push((*cached).clone());
                continue;
            }
            if let Some(entity) = self.materialize_live(&cur, id)? {
                self.cache.put(Arc::new(entity.clone()));
                out.push(entity);
            }
        }
        Ok(out)
    }

    /// All interned tag values in a namespace, sorted
    pub fn tag_values(&self, namespace: &str) -> Vec<String> {
        self.dict
            .snapshot()
            .prefix_scan(&format!("{}:", namespace))
            .into_iter()
            .map(|(_, value)| value.to_string())
            .collect()
    }

    // Evaluate the predicate to a sorted candidate id list
    fn candidate_ids(
        &self,
        cur: &CurrentFile,
        filter: &ListFilter,
        cancel: &CancelToken,
    ) -> DbResult<Vec<EntityId>> {
        let snapshot = self.dict.snapshot();

        // Each required tag contributes one sorted id set
        let mut sets: Vec<Vec<EntityId>> = Vec::new();
        for tag in &filter.tags {
            cancel.check()?;
            let ids = match snapshot.lookup_id(tag.as_str()) {
                Some(tid) => self.tag_index.ids_for(tid),
                None => Vec::new(),
            };
            sets.push(ids);
        }
        if let Some(wildcard) = &filter.wildcard {
            cancel.check()?;
            let mut union = BTreeSet::new();
            for (tid, _) in snapshot.prefix_scan(wildcard.prefix()) {
                for id in self.tag_index.ids_for(tid) {
                    union.insert(id);
                }
            }
            sets.push(union.into_iter().collect());
        }

        let mut candidates: Vec<EntityId> = if sets.is_empty() {
            match &filter.dataset {
                Some(dataset) => self.datasets.ids_in(dataset),
                None => {
                    let mut all: Vec<EntityId> =
                        cur.offsets.snapshot().into_iter().map(|(id, _)| id).collect();
                    all.sort();
                    all
                }
            }
        } else {
            match filter.match_mode {
                MatchMode::All => {
                    // Intersect smallest-first; empty set short-circuits
                    sets.sort_by_key(|s| s.len());
                    if sets[0].is_empty() {
                        return Ok(Vec::new());
                    }
                    let (smallest, rest) = sets.split_first().expect("nonempty sets");
                    smallest
                        .iter()
                        .filter(|id| rest.iter().all(|s| s.binary_search(*id).is_ok()))
                        .cloned()
                        .collect()
                }
                MatchMode::Any => {
                    let mut union = BTreeSet::new();
                    for set in sets {
                        union.extend(set);
                    }
                    union.into_iter().collect()
                }
            }
        };

        if let Some(dataset) = &filter.dataset {
            candidates.retain(|id| &*self.datasets.dataset_of(id) == dataset.as_str());
        }
        Ok(candidates)
    }

    /// Materialize an entity's live state from indexes + record section
    pub(crate) fn materialize_live(
        &self,
        cur: &CurrentFile,
        id: &EntityId,
    ) -> DbResult<Option<Entity>> {
        let Some(tags) = self.live_tags(cur, id)? else {
            return Ok(None);
        };
        let content = self.load_content(cur, id, &tags)?;
        Ok(Some(Entity {
            id: id.clone(),
            tags,
            content,
        }))
    }

    fn load_content(
        &self,
        cur: &CurrentFile,
        id: &EntityId,
        tags: &[TaggedAtTime],
    ) -> DbResult<Vec<u8>> {
        if tags
            .iter()
            .any(|t| t.value.as_str() == "content:chunked:true")
        {
            return self.reassemble_chunks(cur, id, tags);
        }
        match cur.reader().read(id)? {
            Some(frame) => Ok(frame.content),
            None => Ok(Vec::new()),
        }
    }

    /// Rebuild chunked content from sibling chunk entities and verify the
    /// recorded digest
    pub(crate) fn reassemble_chunks(
        &self,
        cur: &CurrentFile,
        id: &EntityId,
        tags: &[TaggedAtTime],
    ) -> DbResult<Vec<u8>> {
        let chunks = self.chunk_entities_of(id)?;
        let mut content = Vec::new();
        for (chunk_id, _) in &chunks {
            let frame = cur.reader().read(chunk_id)?.ok_or_else(|| {
                EntityDbError::corruption(
                    format!("chunks of {}", id),
                    format!("missing chunk entity {}", chunk_id),
                )
            })?;
            content.extend_from_slice(&frame.content);
        }

        if let Some(expected) = tags
            .iter()
            .find_map(|t| t.value.as_str().strip_prefix("content:sha256:"))
        {
            let actual = sha256_hex(&content);
            if actual != expected {
                return Err(EntityDbError::corruption(
                    format!("chunks of {}", id),
                    format!("sha256 mismatch: expected {}, got {}", expected, actual),
                ));
            }
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_mode_parse() {
        assert_eq!(MatchMode::parse("all").unwrap(), MatchMode::All);
        assert_eq!(MatchMode::parse("any").unwrap(), MatchMode::Any);
        assert!(MatchMode::parse("most").is_err());
    }

    #[test]
    fn test_default_filter_shape() {
        let f = ListFilter::default();
        assert!(f.tags.is_empty());
        assert_eq!(f.match_mode, MatchMode::All);
        assert!(f.limit.is_none());
        assert_eq!(f.offset, 0);
    }
}
