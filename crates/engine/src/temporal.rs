//! The temporal query engine
//!
//! Four operations over per-entity event histories: `history`, `as_of`,
//! `changes_since`, and `diff`. All are deterministic: events sort by
//! timestamp with ties broken by arrival order (which is LSN order), a
//! remove of an absent tag is a no-op, and an add of an already-present
//! tag updates its effective timestamp without changing membership.

use crate::store::Store;
use entitydb_core::{
    CancelToken, DbResult, Entity, EntityDbError, EntityId, Polarity, TagEvent, TagId, TagValue,
    Timestamp,
};
use serde::Serialize;

/// One tag event with its value resolved through the dictionary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedEvent {
    /// Origin timestamp
    pub ts: Timestamp,
    /// Add or remove
    pub polarity: Polarity,
    /// The tag value
    pub value: TagValue,
}

/// An entity's events since some time, for `changes_since`
#[derive(Debug, Clone, Serialize)]
pub struct EntityChanges {
    /// The entity
    pub id: EntityId,
    /// Its events with `ts > since`, in timestamp order
    pub events: Vec<ResolvedEvent>,
}

/// The symmetric difference between two reconstructed states
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TagDiff {
    /// Tags present at T2 but not at T1
    pub added: Vec<TagValue>,
    /// Tags present at T1 but not at T2
    pub removed: Vec<TagValue>,
}

/// Stable-sort events by timestamp, preserving arrival order for ties
pub(crate) fn sort_by_ts(events: &[TagEvent]) -> Vec<TagEvent> {
    let mut sorted = events.to_vec();
    sorted.sort_by_key(|e| e.ts);
    sorted
}

/// Fold events with `ts <= up_to` into the tag set at that time
///
/// Returns `(tag, effective timestamp)` pairs in first-appearance order.
pub(crate) fn fold_live(events: &[TagEvent], up_to: Timestamp) -> Vec<(TagId, Timestamp)> {
    let mut live: Vec<(TagId, Timestamp)> = Vec::new();
    for event in sort_by_ts(events) {
        if event.ts > up_to {
            break;
        }
        match event.polarity {
            Polarity::Add => match live.iter_mut().find(|(t, _)| *t == event.tag) {
                Some(entry) => entry.1 = event.ts,
                None => live.push((event.tag, event.ts)),
            },
            Polarity::Remove => live.retain(|(t, _)| *t != event.tag),
        }
    }
    live
}

impl Store {
    /// The full event vector of an entity, optionally windowed
    ///
    /// Events are returned in timestamp order (strictly non-decreasing);
    /// the window bounds are inclusive.
    pub fn history(
        &self,
        id: &EntityId,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
    ) -> DbResult<Vec<ResolvedEvent>> {
        let cur = self.current();
        let Some(timeline) = self.temporal.timeline(id) else {
            return Err(EntityDbError::not_found(format!("entity {}", id)));
        };
        if !cur.offsets.contains(id) {
            return Err(EntityDbError::not_found(format!("entity {}", id)));
        }
        let events = self.full_events_with(&cur, id, &timeline)?;
        let sorted = sort_by_ts(&events);
        let from = from.unwrap_or(Timestamp::EPOCH);
        let to = to.unwrap_or(Timestamp::MAX);
        sorted
            .iter()
            .filter(|e| e.ts >= from && e.ts <= to)
            .map(|e| self.resolve_event(e))
            .collect()
    }

    /// Reconstruct the entity as it was at time `t`
    ///
    /// `t` in the future returns the state at the latest event; `t`
    /// before the first event is `not_found`. Content is the most recent
    /// replacement with `ts <= t` when the superseded frame is still in
    /// the file (compaction drops old versions, after which the live
    /// bytes serve).
    pub fn as_of(&self, id: &EntityId, t: Timestamp) -> DbResult<Entity> {
        let cur = self.current();
        let Some(timeline) = self.temporal.timeline(id) else {
            return Err(EntityDbError::not_found(format!("entity {}", id)));
        };
        if !cur.offsets.contains(id) {
            return Err(EntityDbError::not_found(format!("entity {}", id)));
        }
        let events = self.full_events_with(&cur, id, &timeline)?;
        let sorted = sort_by_ts(&events);
        match sorted.first() {
            Some(first) if first.ts > t => {
                return Err(EntityDbError::not_found(format!(
                    "entity {} at {}",
                    id, t
                )))
            }
            None => return Err(EntityDbError::not_found(format!("entity {}", id))),
            _ => {}
        }

        let live = fold_live(&sorted, t);
        let tags = self.resolve_tagged(&live)?;

        // After compaction only the live frame remains; it serves for
        // reconstructions older than its version stamp
        let content = match timeline.offset_as_of(t).or_else(|| timeline.live_offset()) {
            Some(offset) => {
                let frame = cur.reader().read_at(offset)?;
                if tags
                    .iter()
                    .any(|tag| tag.value.as_str() == "content:chunked:true")
                {
                    self.reassemble_chunks(&cur, id, &tags)?
                } else {
                    frame.content
                }
            }
            None => Vec::new(),
        };

        Ok(Entity {
            id: id.clone(),
            tags,
            content,
        })
    }

    /// Entities whose history grew after `since`
    ///
    /// Emits each entity's events with `ts > since`, sorted by the
    /// entity's earliest such event; `limit` applies after sorting.
    pub fn changes_since(
        &self,
        since: Timestamp,
        limit: Option<usize>,
        cancel: &CancelToken,
    ) -> DbResult<Vec<EntityChanges>> {
        let cur = self.current();
        let touched = self.temporal.touched_since(since);

        let mut out: Vec<(Timestamp, EntityChanges)> = Vec::with_capacity(touched.len());
        for (i, (id, _)) in touched.iter().enumerate() {
            if i % 1024 == 0 {
                cancel.check()?;
            }
            let Some(timeline) = self.temporal.timeline(id) else {
                continue;
            };
            if !cur.offsets.contains(id) {
                continue;
            }
            let events = self.full_events_with(&cur, id, &timeline)?;
            let recent: Vec<ResolvedEvent> = sort_by_ts(&events)
                .iter()
                .filter(|e| e.ts > since)
                .map(|e| self.resolve_event(e))
                .collect::<DbResult<_>>()?;
            let Some(earliest) = recent.first().map(|e| e.ts) else {
                continue;
            };
            out.push((
                earliest,
                EntityChanges {
                    id: id.clone(),
                    events: recent,
                },
            ));
        }

        out.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        let mut changes: Vec<EntityChanges> = out.into_iter().map(|(_, c)| c).collect();
        if let Some(limit) = limit {
            changes.truncate(limit);
        }
        Ok(changes)
    }

    /// The tag-set difference between times T1 and T2
    ///
    /// One pass through the sorted history: the state at T1 is captured
    /// in flight, then the window `(T1, T2]` folds on top of it.
    pub fn diff(&self, id: &EntityId, t1: Timestamp, t2: Timestamp) -> DbResult<TagDiff> {
        let cur = self.current();
        let Some(timeline) = self.temporal.timeline(id) else {
            return Err(EntityDbError::not_found(format!("entity {}", id)));
        };
        if !cur.offsets.contains(id) {
            return Err(EntityDbError::not_found(format!("entity {}", id)));
        }
        if t1 == t2 {
            return Ok(TagDiff::default());
        }
        if t1 > t2 {
            return Err(EntityDbError::malformed("diff requires t1 <= t2"));
        }

        let events = self.full_events_with(&cur, id, &timeline)?;
        let sorted = sort_by_ts(&events);

        let mut state: Vec<TagId> = Vec::new();
        let mut at_t1: Vec<TagId> = Vec::new();
        let mut captured = false;
        for event in &sorted {
            if !captured && event.ts > t1 {
                at_t1 = state.clone();
                captured = true;
            }
            if event.ts > t2 {
                break;
            }
            match event.polarity {
                Polarity::Add => {
                    if !state.contains(&event.tag) {
                        state.push(event.tag);
                    }
                }
                Polarity::Remove => state.retain(|t| *t != event.tag),
            }
        }
        if !captured {
            // Every event is at or before t1
            at_t1 = state.clone();
        }

        let snapshot = self.dict.snapshot();
        let resolve = |tid: &TagId| -> DbResult<TagValue> {
            let value = snapshot
                .lookup(*tid)
                .ok_or_else(|| EntityDbError::internal(format!("dangling tag id {}", tid.0)))?;
            TagValue::parse(&value)
        };

        let added = state
            .iter()
            .filter(|t| !at_t1.contains(*t))
            .map(resolve)
            .collect::<DbResult<_>>()?;
        let removed = at_t1
            .iter()
            .filter(|t| !state.contains(*t))
            .map(resolve)
            .collect::<DbResult<_>>()?;
        Ok(TagDiff { added, removed })
    }

    fn resolve_event(&self, event: &TagEvent) -> DbResult<ResolvedEvent> {
        let value = self
            .dict
            .lookup(event.tag)
            .ok_or_else(|| EntityDbError::internal(format!("dangling tag id {}", event.tag.0)))?;
        Ok(ResolvedEvent {
            ts: event.ts,
            polarity: event.polarity,
            value: TagValue::parse(&value)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(ts: i64, tag: u32) -> TagEvent {
        TagEvent::add(Timestamp::from_nanos(ts), TagId(tag))
    }

    fn remove(ts: i64, tag: u32) -> TagEvent {
        TagEvent::remove(Timestamp::from_nanos(ts), TagId(tag))
    }

    #[test]
    fn test_sort_is_stable_for_ties() {
        let events = vec![add(10, 1), add(10, 2), add(5, 3)];
        let sorted = sort_by_ts(&events);
        let tags: Vec<u32> = sorted.iter().map(|e| e.tag.0).collect();
        assert_eq!(tags, vec![3, 1, 2]);
    }

    #[test]
    fn test_fold_basic_add_remove() {
        let events = vec![add(1, 1), add(2, 2), remove(3, 1)];
        let live = fold_live(&events, Timestamp::MAX);
        assert_eq!(live, vec![(TagId(2), Timestamp::from_nanos(2))]);
    }

    #[test]
    fn test_fold_respects_up_to() {
        let events = vec![add(1, 1), remove(5, 1)];
        let at_3 = fold_live(&events, Timestamp::from_nanos(3));
        assert_eq!(at_3.len(), 1);
        let at_5 = fold_live(&events, Timestamp::from_nanos(5));
        assert!(at_5.is_empty());
    }

    #[test]
    fn test_fold_remove_of_absent_is_noop() {
        let events = vec![remove(1, 9), add(2, 1)];
        let live = fold_live(&events, Timestamp::MAX);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].0, TagId(1));
    }

    #[test]
    fn test_fold_readd_updates_effective_ts_only() {
        let events = vec![add(1, 1), add(2, 2), add(9, 1)];
        let live = fold_live(&events, Timestamp::MAX);
        // Membership order is first appearance; tag 1 keeps its slot
        assert_eq!(live[0].0, TagId(1));
        assert_eq!(live[0].1, Timestamp::from_nanos(9));
        assert_eq!(live[1].0, TagId(2));
    }

    #[test]
    fn test_fold_ties_apply_in_arrival_order() {
        // remove then add at the same timestamp: the add wins
        let events = vec![add(1, 1), remove(5, 1), add(5, 1)];
        let live = fold_live(&events, Timestamp::MAX);
        assert_eq!(live.len(), 1);

        // add then remove at the same timestamp: the remove wins
        let events = vec![add(1, 1), add(5, 2), remove(5, 2)];
        let live = fold_live(&events, Timestamp::MAX);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].0, TagId(1));
    }
}
