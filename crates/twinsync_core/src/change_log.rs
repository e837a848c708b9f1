//! Change log of committed writes.
//!
//! Every write a repository performs is appended to its change log with the
//! change sequence it was assigned. The log lets a reader:
//! - Find entities modified after a checkpoint
//! - Synthesize delete notifications for entities removed after a checkpoint
//!
//! Deletions are kept as tombstones, so a delete is observable even though
//! the entity itself is gone.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::entity::EntityKind;
use crate::id::Id64;

/// Type of change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    /// Entity was inserted.
    Insert,
    /// Entity was updated.
    Update,
    /// Entity was deleted.
    Delete,
}

/// A single logged change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Change sequence of the write.
    pub sequence: u64,
    /// Kind of entity written.
    pub kind: EntityKind,
    /// Entity id.
    pub id: Id64,
    /// Type of change.
    pub change_type: ChangeType,
}

impl ChangeEvent {
    /// Creates an insert event.
    pub fn insert(sequence: u64, kind: EntityKind, id: Id64) -> Self {
        Self {
            sequence,
            kind,
            id,
            change_type: ChangeType::Insert,
        }
    }

    /// Creates an update event.
    pub fn update(sequence: u64, kind: EntityKind, id: Id64) -> Self {
        Self {
            sequence,
            kind,
            id,
            change_type: ChangeType::Update,
        }
    }

    /// Creates a delete event.
    pub fn delete(sequence: u64, kind: EntityKind, id: Id64) -> Self {
        Self {
            sequence,
            kind,
            id,
            change_type: ChangeType::Delete,
        }
    }
}

/// Ordered log of change events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeLog {
    events: Vec<ChangeEvent>,
}

impl ChangeLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event. Sequences must be non-decreasing.
    pub fn record(&mut self, event: ChangeEvent) {
        debug_assert!(self
            .events
            .last()
            .map_or(true, |last| last.sequence <= event.sequence));
        self.events.push(event);
    }

    /// Returns events with sequence > cursor.
    pub fn since(&self, cursor: u64) -> Vec<ChangeEvent> {
        let start = self.events.partition_point(|e| e.sequence <= cursor);
        self.events[start..].to_vec()
    }

    /// Returns the latest recorded sequence.
    pub fn latest_sequence(&self) -> u64 {
        self.events.last().map(|e| e.sequence).unwrap_or(0)
    }

    /// Returns the number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Reduces raw events to the entities that existed at `checkpoint` and are
/// gone now.
///
/// Entities created after the checkpoint and deleted again are not reported.
pub fn net_deletions(events: &[ChangeEvent], checkpoint: u64) -> Vec<(EntityKind, Id64)> {
    let created_after: HashSet<(EntityKind, Id64)> = events
        .iter()
        .filter(|e| e.sequence > checkpoint && e.change_type == ChangeType::Insert)
        .map(|e| (e.kind, e.id))
        .collect();
    let mut seen = HashSet::new();
    events
        .iter()
        .filter(|e| e.sequence > checkpoint && e.change_type == ChangeType::Delete)
        .map(|e| (e.kind, e.id))
        .filter(|key| !created_after.contains(key))
        .filter(|key| seen.insert(*key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn since_cursor() {
        let mut log = ChangeLog::new();
        log.record(ChangeEvent::insert(1, EntityKind::Element, Id64::new(0x20)));
        log.record(ChangeEvent::update(2, EntityKind::Element, Id64::new(0x20)));
        log.record(ChangeEvent::delete(3, EntityKind::Element, Id64::new(0x20)));

        assert_eq!(log.since(0).len(), 3);
        assert_eq!(log.since(2).len(), 1);
        assert_eq!(log.since(3).len(), 0);
        assert_eq!(log.latest_sequence(), 3);
    }

    #[test]
    fn net_deletions_skip_transient_entities() {
        let events = vec![
            ChangeEvent::insert(1, EntityKind::Element, Id64::new(0x20)),
            ChangeEvent::insert(2, EntityKind::Element, Id64::new(0x21)),
            ChangeEvent::delete(3, EntityKind::Element, Id64::new(0x20)),
            ChangeEvent::insert(4, EntityKind::Element, Id64::new(0x22)),
            ChangeEvent::delete(5, EntityKind::Element, Id64::new(0x22)),
        ];
        let deleted = net_deletions(&events, 2);
        assert_eq!(deleted, vec![(EntityKind::Element, Id64::new(0x20))]);
    }
}
