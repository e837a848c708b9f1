//! Work queue of entities waiting for predecessors.

use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use twinsync_core::{ElementProps, EntityKind, Id64, ModelProps};

/// A queued source entity.
#[derive(Debug, Clone)]
pub(crate) enum DeferredPayload {
    Element(ElementProps),
    Model(ModelProps),
}

/// A source entity together with the source ids it waits on.
#[derive(Debug, Clone)]
pub(crate) struct DeferredEntity {
    pub payload: DeferredPayload,
    pub waiting_on: BTreeSet<Id64>,
}

impl DeferredEntity {
    pub fn element(element: ElementProps, waiting_on: BTreeSet<Id64>) -> Self {
        Self {
            payload: DeferredPayload::Element(element),
            waiting_on,
        }
    }

    pub fn model(model: ModelProps) -> Self {
        let waiting_on = BTreeSet::from([model.id]);
        Self {
            payload: DeferredPayload::Model(model),
            waiting_on,
        }
    }

    pub fn key(&self) -> (EntityKind, Id64) {
        match &self.payload {
            DeferredPayload::Element(e) => (EntityKind::Element, e.id),
            DeferredPayload::Model(m) => (EntityKind::Model, m.id),
        }
    }

    pub fn source_id(&self) -> Id64 {
        self.key().1
    }

    /// Queue keys this entity waits on. A model waits on its modeled element
    /// only; an element may also wait on a model.
    fn awaited_keys(&self) -> impl Iterator<Item = (EntityKind, Id64)> + '_ {
        let is_element = matches!(self.payload, DeferredPayload::Element(_));
        self.waiting_on.iter().flat_map(move |id| {
            let model = is_element.then_some((EntityKind::Model, *id));
            std::iter::once((EntityKind::Element, *id)).chain(model)
        })
    }

    /// Returns true if any awaited entity is itself queued.
    pub fn is_blocked_by(&self, queue: &DeferredQueue) -> bool {
        self.awaited_keys().any(|(kind, id)| queue.contains(kind, id))
    }
}

/// FIFO queue of deferred entities with a resolved set.
#[derive(Debug, Default)]
pub(crate) struct DeferredQueue {
    entries: VecDeque<DeferredEntity>,
    queued: HashSet<(EntityKind, Id64)>,
    resolved: HashSet<(EntityKind, Id64)>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an entity. Returns false if it was already queued, in which
    /// case its wait set is replaced.
    pub fn push(&mut self, entity: DeferredEntity) -> bool {
        let key = entity.key();
        if self.queued.insert(key) {
            self.entries.push_back(entity);
            return true;
        }
        if let Some(existing) = self.entries.iter_mut().find(|e| e.key() == key) {
            *existing = entity;
        }
        false
    }

    pub fn contains(&self, kind: EntityKind, id: Id64) -> bool {
        self.queued.contains(&(kind, id))
    }

    /// Removes and returns every queued entity in queue order.
    pub fn take_all(&mut self) -> Vec<DeferredEntity> {
        self.queued.clear();
        self.entries.drain(..).collect()
    }

    /// Empties the queue, splitting the entities into those blocked by
    /// another queued entity and those that are not.
    pub fn take_partitioned(&mut self) -> (Vec<DeferredEntity>, Vec<DeferredEntity>) {
        let blocked: Vec<bool> = self.entries.iter().map(|e| e.is_blocked_by(self)).collect();
        let mut waiting = Vec::new();
        let mut free = Vec::new();
        for (entity, is_blocked) in self.take_all().into_iter().zip(blocked) {
            if is_blocked {
                waiting.push(entity);
            } else {
                free.push(entity);
            }
        }
        (waiting, free)
    }

    /// Returns the keys of queued entities that sit on a wait cycle, in queue
    /// order. Entities that only wait on a cycle are left out.
    pub fn cycle_members(&self) -> Vec<(EntityKind, Id64)> {
        let mut graph = DiGraph::<usize, ()>::new();
        let nodes: Vec<_> = (0..self.entries.len()).map(|i| graph.add_node(i)).collect();
        let positions: HashMap<(EntityKind, Id64), usize> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.key(), i))
            .collect();
        for (i, entry) in self.entries.iter().enumerate() {
            for key in entry.awaited_keys() {
                if let Some(&j) = positions.get(&key) {
                    graph.add_edge(nodes[i], nodes[j], ());
                }
            }
        }

        let mut on_cycle = vec![false; self.entries.len()];
        for scc in tarjan_scc(&graph) {
            let cyclic = scc.len() > 1
                || scc.first().is_some_and(|node| graph.contains_edge(*node, *node));
            if cyclic {
                for node in scc {
                    on_cycle[graph[node]] = true;
                }
            }
        }
        self.entries
            .iter()
            .zip(on_cycle)
            .filter(|(_, cyclic)| *cyclic)
            .map(|(entry, _)| entry.key())
            .collect()
    }

    /// Removes one queued entity.
    pub fn remove(&mut self, key: (EntityKind, Id64)) -> Option<DeferredEntity> {
        let position = self.entries.iter().position(|e| e.key() == key)?;
        self.queued.remove(&key);
        self.entries.remove(position)
    }

    pub fn mark_resolved(&mut self, kind: EntityKind, id: Id64) {
        self.resolved.insert((kind, id));
    }

    pub fn is_resolved(&self, kind: EntityKind, id: Id64) -> bool {
        self.resolved.contains(&(kind, id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.queued.clear();
        self.resolved.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinsync_core::classes;

    fn element(id: u64) -> ElementProps {
        let mut element = ElementProps::new(classes::PHYSICAL_ELEMENT, Id64::new(0x20));
        element.id = Id64::new(id);
        element
    }

    #[test]
    fn push_deduplicates_and_replaces_wait_set() {
        let mut queue = DeferredQueue::new();
        assert!(queue.push(DeferredEntity::element(element(0x30), BTreeSet::from([Id64::new(0x31)]))));
        assert!(!queue.push(DeferredEntity::element(element(0x30), BTreeSet::from([Id64::new(0x32)]))));
        assert_eq!(queue.len(), 1);

        let taken = queue.take_all();
        assert_eq!(taken[0].waiting_on, BTreeSet::from([Id64::new(0x32)]));
        assert!(queue.is_empty());
        assert!(!queue.contains(EntityKind::Element, Id64::new(0x30)));
    }

    #[test]
    fn element_and_model_with_same_id_are_distinct() {
        let mut queue = DeferredQueue::new();
        queue.push(DeferredEntity::element(element(0x30), BTreeSet::from([Id64::new(0x31)])));
        queue.push(DeferredEntity::model(ModelProps::new(classes::PHYSICAL_MODEL, Id64::new(0x30))));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn model_waiting_on_its_own_element_is_blocked_only_by_it() {
        let mut queue = DeferredQueue::new();
        let model = DeferredEntity::model(ModelProps::new(classes::PHYSICAL_MODEL, Id64::new(0x30)));
        queue.push(model.clone());
        assert!(!model.is_blocked_by(&queue));

        queue.push(DeferredEntity::element(element(0x30), BTreeSet::from([Id64::new(0x31)])));
        assert!(model.is_blocked_by(&queue));
    }

    #[test]
    fn partition_separates_mutual_waits_from_outside_waits() {
        let mut queue = DeferredQueue::new();
        queue.push(DeferredEntity::element(element(0x30), BTreeSet::from([Id64::new(0x31)])));
        queue.push(DeferredEntity::element(element(0x31), BTreeSet::from([Id64::new(0x30)])));
        queue.push(DeferredEntity::element(element(0x32), BTreeSet::from([Id64::new(0x99)])));

        let (blocked, free) = queue.take_partitioned();
        let blocked: Vec<Id64> = blocked.iter().map(DeferredEntity::source_id).collect();
        let free: Vec<Id64> = free.iter().map(DeferredEntity::source_id).collect();
        assert_eq!(blocked, vec![Id64::new(0x30), Id64::new(0x31)]);
        assert_eq!(free, vec![Id64::new(0x32)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn cycle_members_leave_out_entities_waiting_on_a_cycle() {
        let mut queue = DeferredQueue::new();
        queue.push(DeferredEntity::element(element(0x30), BTreeSet::from([Id64::new(0x31)])));
        queue.push(DeferredEntity::element(element(0x31), BTreeSet::from([Id64::new(0x32)])));
        queue.push(DeferredEntity::element(element(0x32), BTreeSet::from([Id64::new(0x31)])));

        let members: Vec<Id64> = queue.cycle_members().into_iter().map(|(_, id)| id).collect();
        assert_eq!(members, vec![Id64::new(0x31), Id64::new(0x32)]);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn element_waiting_on_itself_is_a_cycle() {
        let mut queue = DeferredQueue::new();
        queue.push(DeferredEntity::element(element(0x30), BTreeSet::from([Id64::new(0x30)])));
        queue.push(DeferredEntity::element(element(0x33), BTreeSet::from([Id64::new(0x30)])));

        assert_eq!(queue.cycle_members(), vec![(EntityKind::Element, Id64::new(0x30))]);
    }

    #[test]
    fn remove_takes_one_entity() {
        let mut queue = DeferredQueue::new();
        queue.push(DeferredEntity::element(element(0x30), BTreeSet::from([Id64::new(0x31)])));
        queue.push(DeferredEntity::element(element(0x31), BTreeSet::from([Id64::new(0x30)])));

        let removed = queue.remove((EntityKind::Element, Id64::new(0x30))).unwrap();
        assert_eq!(removed.source_id(), Id64::new(0x30));
        assert!(!queue.contains(EntityKind::Element, Id64::new(0x30)));
        assert!(queue.remove((EntityKind::Element, Id64::new(0x30))).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn resolved_set_survives_take_all() {
        let mut queue = DeferredQueue::new();
        queue.mark_resolved(EntityKind::Element, Id64::new(0x30));
        queue.take_all();
        assert!(queue.is_resolved(EntityKind::Element, Id64::new(0x30)));
        queue.clear();
        assert!(!queue.is_resolved(EntityKind::Element, Id64::new(0x30)));
    }
}
