//! In-memory repository.
//!
//! A complete [`Repository`] kept in memory. It enforces the same
//! constraints a durable store would (referential integrity, code
//! uniqueness, class validity) so the engine can be exercised end to end.
//!
//! # Transactions
//!
//! Writes go to a working copy; [`Repository::save_changes`] publishes the
//! working copy as the committed state and
//! [`Repository::abandon_changes`] restores the last committed state.
//!
//! # Thread Safety
//!
//! State lives behind `parking_lot::RwLock`s, so a repository can be shared
//! by reference across threads.
//!
//! # Example
//!
//! ```rust
//! use twinsync_core::{classes, ElementProps, Id64, InMemoryRepository, Repository};
//!
//! let repo = InMemoryRepository::new();
//! let subject = ElementProps::new(classes::SUBJECT, Id64::REPOSITORY_MODEL)
//!     .with_parent(Id64::ROOT_SUBJECT);
//! let id = repo.insert_element(&subject).unwrap();
//! repo.save_changes("add subject").unwrap();
//! assert!(repo.element(id).unwrap().is_some());
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

use crate::change_log::{ChangeEvent, ChangeLog};
use crate::entity::{
    AspectKind, AspectProps, Code, CodeSpec, ElementProps, EntityKind, ModelProps,
    ProvenanceKind, ProvenanceRecord, RelationshipProps,
};
use crate::error::{CoreError, CoreResult};
use crate::id::{Id64, RepositoryId};
use crate::repository::Repository;
use crate::schema::{classes, ClassKind, ClassRegistry, SchemaDef};
use crate::value::{PropertyMap, PropertyValue};

/// Entire state of a repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RepositoryData {
    id: RepositoryId,
    sequence: u64,
    next_id: u64,
    registry: ClassRegistry,
    code_specs: BTreeMap<Id64, CodeSpec>,
    models: BTreeMap<Id64, ModelProps>,
    elements: BTreeMap<Id64, ElementProps>,
    aspects: BTreeMap<Id64, AspectProps>,
    relationships: BTreeMap<Id64, RelationshipProps>,
    provenance: BTreeMap<Id64, ProvenanceRecord>,
    log: ChangeLog,
}

impl RepositoryData {
    fn seeded(id: RepositoryId) -> Self {
        let mut data = Self {
            id,
            sequence: 0,
            next_id: Id64::FIRST_USER_ID,
            registry: ClassRegistry::with_bis_core(),
            code_specs: BTreeMap::new(),
            models: BTreeMap::new(),
            elements: BTreeMap::new(),
            aspects: BTreeMap::new(),
            relationships: BTreeMap::new(),
            provenance: BTreeMap::new(),
            log: ChangeLog::new(),
        };

        let mut root = ElementProps::new(classes::SUBJECT, Id64::REPOSITORY_MODEL);
        root.id = Id64::ROOT_SUBJECT;
        root.user_label = Some("Root".into());
        data.elements.insert(root.id, root);
        data.models.insert(
            Id64::REPOSITORY_MODEL,
            ModelProps::new(classes::REPOSITORY_MODEL, Id64::REPOSITORY_MODEL),
        );

        let mut dictionary = ElementProps::new(classes::DEFINITION_PARTITION, Id64::REPOSITORY_MODEL)
            .with_parent(Id64::ROOT_SUBJECT);
        dictionary.id = Id64::DICTIONARY_MODEL;
        dictionary.user_label = Some("Dictionary".into());
        data.elements.insert(dictionary.id, dictionary);
        data.models.insert(
            Id64::DICTIONARY_MODEL,
            ModelProps::new(classes::DICTIONARY_MODEL, Id64::DICTIONARY_MODEL),
        );
        data
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn allocate_id(&mut self) -> Id64 {
        let id = Id64::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Uses `requested` when valid and unused by any table, otherwise allocates.
    fn claim_id(&mut self, requested: Id64, kind: EntityKind) -> CoreResult<Id64> {
        if !requested.is_valid() {
            return Ok(self.allocate_id());
        }
        let taken = self.elements.contains_key(&requested)
            || self.code_specs.contains_key(&requested)
            || self.aspects.contains_key(&requested)
            || self.relationships.contains_key(&requested)
            || self.provenance.contains_key(&requested);
        if taken {
            return Err(CoreError::already_exists(kind, requested));
        }
        self.next_id = self.next_id.max(requested.value() + 1);
        Ok(requested)
    }

    fn check_class(&self, class_name: &str, expected: fn(ClassKind) -> bool) -> CoreResult<()> {
        match self.registry.class(class_name) {
            Some(class) if expected(class.kind) => Ok(()),
            Some(_) => Err(CoreError::constraint(format!(
                "class {class_name} cannot be used for this kind of record"
            ))),
            None => Err(CoreError::class_not_found(class_name)),
        }
    }

    /// At most one relationship per class and endpoint pair. `own` is the id
    /// of the relationship being updated.
    fn check_unique_relationship(&self, relationship: &RelationshipProps, own: Option<Id64>) -> CoreResult<()> {
        let duplicate = self.relationships.values().any(|r| {
            Some(r.id) != own
                && r.class_name == relationship.class_name
                && r.source_id == relationship.source_id
                && r.target_id == relationship.target_id
        });
        if duplicate {
            return Err(CoreError::constraint(format!(
                "duplicate {} from {} to {}",
                relationship.class_name, relationship.source_id, relationship.target_id
            )));
        }
        Ok(())
    }

    /// Navigation properties must be invalid or name an existing element.
    fn check_references(&self, class_name: &str, properties: &PropertyMap) -> CoreResult<()> {
        for name in self.registry.reference_properties(class_name)? {
            let target = properties.get(&name).and_then(PropertyValue::as_id);
            if let Some(id) = target {
                if id.is_valid() && !self.elements.contains_key(&id) {
                    return Err(CoreError::constraint(format!(
                        "property {name} refers to missing element {id}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_element(&self, element: &ElementProps, own_id: Id64) -> CoreResult<()> {
        self.check_class(&element.class_name, |k| k == ClassKind::Element)?;
        if !self.models.contains_key(&element.model) {
            return Err(CoreError::not_found(EntityKind::Model, element.model));
        }
        if let Some(parent) = element.parent {
            if parent == own_id || !self.elements.contains_key(&parent) {
                return Err(CoreError::constraint(format!(
                    "parent {parent} of element {own_id} does not exist"
                )));
            }
        }
        if !element.code.is_empty() {
            if element.code.scope.is_valid() && !self.elements.contains_key(&element.code.scope) {
                return Err(CoreError::constraint(format!(
                    "code scope {} does not exist",
                    element.code.scope
                )));
            }
            if let Some(other) = self.find_by_code(&element.code) {
                if other != own_id {
                    return Err(CoreError::constraint(format!(
                        "duplicate code {:?} (held by {other})",
                        element.code.value
                    )));
                }
            }
        }
        if let Some(guid) = element.federation_guid {
            if let Some(other) = self.find_by_guid(guid) {
                if other != own_id {
                    return Err(CoreError::constraint(format!(
                        "duplicate federation guid {guid} (held by {other})"
                    )));
                }
            }
        }
        self.check_references(&element.class_name, &element.properties)
    }

    fn find_by_code(&self, code: &Code) -> Option<Id64> {
        if code.is_empty() {
            return None;
        }
        self.elements
            .values()
            .find(|e| &e.code == code)
            .map(|e| e.id)
    }

    fn find_by_guid(&self, guid: Uuid) -> Option<Id64> {
        self.elements
            .values()
            .find(|e| e.federation_guid == Some(guid))
            .map(|e| e.id)
    }

    fn touch_element(&mut self, id: Id64) {
        let sequence = self.next_sequence();
        if let Some(element) = self.elements.get_mut(&id) {
            element.last_mod = sequence;
            self.log
                .record(ChangeEvent::update(sequence, EntityKind::Element, id));
        }
    }

    /// Collects an element, its descendants and the contents of any sub-models.
    fn collect_subtree(&self, root: Id64, out: &mut BTreeSet<Id64>) {
        if !out.insert(root) {
            return;
        }
        let children: Vec<Id64> = self
            .elements
            .values()
            .filter(|e| e.parent == Some(root) || (e.model == root && e.id != root))
            .map(|e| e.id)
            .collect();
        for child in children {
            self.collect_subtree(child, out);
        }
    }

    fn remove_elements(&mut self, doomed: &BTreeSet<Id64>) {
        let sequence = self.next_sequence();
        for id in doomed {
            if self.models.remove(id).is_some() {
                self.log.record(ChangeEvent::delete(sequence, EntityKind::Model, *id));
            }
        }
        let relationships: Vec<Id64> = self
            .relationships
            .values()
            .filter(|r| doomed.contains(&r.source_id) || doomed.contains(&r.target_id))
            .map(|r| r.id)
            .collect();
        for id in &relationships {
            self.relationships.remove(id);
            self.log
                .record(ChangeEvent::delete(sequence, EntityKind::Relationship, *id));
        }
        let relationships: BTreeSet<Id64> = relationships.into_iter().collect();
        self.aspects.retain(|_, a| !doomed.contains(&a.element));
        self.provenance.retain(|_, p| match p.kind {
            ProvenanceKind::Relationship => !relationships.contains(&p.entity),
            _ => !doomed.contains(&p.entity),
        });
        for id in doomed {
            if self.elements.remove(id).is_some() {
                self.log
                    .record(ChangeEvent::delete(sequence, EntityKind::Element, *id));
            }
        }
    }
}

fn is_system_entity(id: Id64) -> bool {
    id == Id64::ROOT_SUBJECT || id == Id64::DICTIONARY_MODEL
}

/// An in-memory [`Repository`].
#[derive(Debug)]
pub struct InMemoryRepository {
    working: RwLock<RepositoryData>,
    committed: RwLock<RepositoryData>,
}

impl InMemoryRepository {
    /// Creates a repository with a random id, holding only the root subject,
    /// the repository model and the dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(RepositoryId::new())
    }

    /// Creates a repository with a fixed id.
    #[must_use]
    pub fn with_id(id: RepositoryId) -> Self {
        let data = RepositoryData::seeded(id);
        Self {
            working: RwLock::new(data.clone()),
            committed: RwLock::new(data),
        }
    }

    /// Loads a repository from a JSON snapshot written by [`Self::save_snapshot`].
    pub fn open_snapshot(path: impl AsRef<Path>) -> CoreResult<Self> {
        let file = File::open(path.as_ref())?;
        let data: RepositoryData = serde_json::from_reader(BufReader::new(file))?;
        debug!(path = %path.as_ref().display(), repository = %data.id, "opened snapshot");
        Ok(Self {
            working: RwLock::new(data.clone()),
            committed: RwLock::new(data),
        })
    }

    /// Writes the committed state to a JSON snapshot.
    ///
    /// Unsaved changes are not included.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> CoreResult<()> {
        let file = File::create(path.as_ref())?;
        serde_json::to_writer_pretty(BufWriter::new(file), &*self.committed.read())?;
        Ok(())
    }

    /// Returns the number of elements, including the root subject and dictionary partition.
    pub fn element_count(&self) -> usize {
        self.working.read().elements.len()
    }

    /// Returns the number of models.
    pub fn model_count(&self) -> usize {
        self.working.read().models.len()
    }

    /// Returns the number of relationships.
    pub fn relationship_count(&self) -> usize {
        self.working.read().relationships.len()
    }

    /// Returns the number of aspects.
    pub fn aspect_count(&self) -> usize {
        self.working.read().aspects.len()
    }

    /// Returns all element ids in ascending order.
    pub fn element_ids(&self) -> Vec<Id64> {
        self.working.read().elements.keys().copied().collect()
    }

    fn write<R>(&self, f: impl FnOnce(&mut RepositoryData) -> CoreResult<R>) -> CoreResult<R> {
        f(&mut self.working.write())
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl Repository for InMemoryRepository {
    fn repository_id(&self) -> RepositoryId {
        self.working.read().id
    }

    fn change_sequence(&self) -> u64 {
        self.working.read().sequence
    }

    fn schemas(&self) -> CoreResult<Vec<SchemaDef>> {
        Ok(self.working.read().registry.schemas().cloned().collect())
    }

    fn import_schemas(&self, schemas: &[SchemaDef]) -> CoreResult<()> {
        self.write(|data| {
            let loaded = data.registry.import(schemas)?;
            if !loaded.is_empty() {
                let sequence = data.next_sequence();
                debug!(?loaded, sequence, "imported schemas");
            }
            Ok(())
        })
    }

    fn reference_properties(&self, class_name: &str) -> CoreResult<Vec<String>> {
        self.working.read().registry.reference_properties(class_name)
    }

    fn is_subclass_of(&self, class_name: &str, base: &str) -> CoreResult<bool> {
        self.working.read().registry.is_subclass_of(class_name, base)
    }

    fn code_specs(&self) -> CoreResult<Vec<CodeSpec>> {
        Ok(self.working.read().code_specs.values().cloned().collect())
    }

    fn code_spec(&self, id: Id64) -> CoreResult<Option<CodeSpec>> {
        Ok(self.working.read().code_specs.get(&id).cloned())
    }

    fn code_spec_by_name(&self, name: &str) -> CoreResult<Option<CodeSpec>> {
        Ok(self
            .working
            .read()
            .code_specs
            .values()
            .find(|c| c.name == name)
            .cloned())
    }

    fn insert_code_spec(&self, code_spec: &CodeSpec) -> CoreResult<Id64> {
        self.write(|data| {
            if data.code_specs.values().any(|c| c.name == code_spec.name) {
                return Err(CoreError::constraint(format!(
                    "duplicate code spec name {}",
                    code_spec.name
                )));
            }
            let id = data.claim_id(code_spec.id, EntityKind::CodeSpec)?;
            let sequence = data.next_sequence();
            data.code_specs.insert(
                id,
                CodeSpec {
                    id,
                    ..code_spec.clone()
                },
            );
            data.log
                .record(ChangeEvent::insert(sequence, EntityKind::CodeSpec, id));
            Ok(id)
        })
    }

    fn model(&self, id: Id64) -> CoreResult<Option<ModelProps>> {
        Ok(self.working.read().models.get(&id).cloned())
    }

    fn insert_model(&self, model: &ModelProps) -> CoreResult<Id64> {
        self.write(|data| {
            data.check_class(&model.class_name, |k| k == ClassKind::Model)?;
            if !data.elements.contains_key(&model.id) {
                return Err(CoreError::not_found(EntityKind::Element, model.id));
            }
            if data.models.contains_key(&model.id) {
                return Err(CoreError::already_exists(EntityKind::Model, model.id));
            }
            let sequence = data.next_sequence();
            let mut stored = model.clone();
            stored.last_mod = sequence;
            data.models.insert(model.id, stored);
            data.log
                .record(ChangeEvent::insert(sequence, EntityKind::Model, model.id));
            Ok(model.id)
        })
    }

    fn update_model(&self, model: &ModelProps) -> CoreResult<()> {
        self.write(|data| {
            data.check_class(&model.class_name, |k| k == ClassKind::Model)?;
            if !data.models.contains_key(&model.id) {
                return Err(CoreError::not_found(EntityKind::Model, model.id));
            }
            let sequence = data.next_sequence();
            let mut stored = model.clone();
            stored.last_mod = sequence;
            data.models.insert(model.id, stored);
            data.log
                .record(ChangeEvent::update(sequence, EntityKind::Model, model.id));
            Ok(())
        })
    }

    fn delete_model(&self, id: Id64) -> CoreResult<()> {
        self.write(|data| {
            if is_system_entity(id) {
                return Err(CoreError::invalid_operation(format!(
                    "model {id} cannot be deleted"
                )));
            }
            if !data.models.contains_key(&id) {
                return Err(CoreError::not_found(EntityKind::Model, id));
            }
            let mut doomed = BTreeSet::new();
            let contents: Vec<Id64> = data
                .elements
                .values()
                .filter(|e| e.model == id)
                .map(|e| e.id)
                .collect();
            for element in contents {
                data.collect_subtree(element, &mut doomed);
            }
            data.remove_elements(&doomed);
            let sequence = data.next_sequence();
            data.models.remove(&id);
            data.log
                .record(ChangeEvent::delete(sequence, EntityKind::Model, id));
            Ok(())
        })
    }

    fn element(&self, id: Id64) -> CoreResult<Option<ElementProps>> {
        Ok(self.working.read().elements.get(&id).cloned())
    }

    fn element_ids_in_model(&self, model: Id64) -> CoreResult<Vec<Id64>> {
        Ok(self
            .working
            .read()
            .elements
            .values()
            .filter(|e| e.model == model)
            .map(|e| e.id)
            .collect())
    }

    fn child_element_ids(&self, parent: Id64) -> CoreResult<Vec<Id64>> {
        Ok(self
            .working
            .read()
            .elements
            .values()
            .filter(|e| e.parent == Some(parent))
            .map(|e| e.id)
            .collect())
    }

    fn find_element_by_code(&self, code: &Code) -> CoreResult<Option<Id64>> {
        Ok(self.working.read().find_by_code(code))
    }

    fn find_element_by_federation_guid(&self, guid: Uuid) -> CoreResult<Option<Id64>> {
        Ok(self.working.read().find_by_guid(guid))
    }

    fn insert_element(&self, element: &ElementProps) -> CoreResult<Id64> {
        self.write(|data| {
            if element.id.is_valid() && data.elements.contains_key(&element.id) {
                return Err(CoreError::already_exists(EntityKind::Element, element.id));
            }
            data.validate_element(element, element.id)?;
            let id = data.claim_id(element.id, EntityKind::Element)?;
            let sequence = data.next_sequence();
            let mut stored = element.clone();
            stored.id = id;
            stored.last_mod = sequence;
            data.elements.insert(id, stored);
            data.log
                .record(ChangeEvent::insert(sequence, EntityKind::Element, id));
            Ok(id)
        })
    }

    fn update_element(&self, element: &ElementProps) -> CoreResult<()> {
        self.write(|data| {
            if !data.elements.contains_key(&element.id) {
                return Err(CoreError::not_found(EntityKind::Element, element.id));
            }
            data.validate_element(element, element.id)?;
            let sequence = data.next_sequence();
            let mut stored = element.clone();
            stored.last_mod = sequence;
            data.elements.insert(element.id, stored);
            data.log
                .record(ChangeEvent::update(sequence, EntityKind::Element, element.id));
            Ok(())
        })
    }

    fn delete_element(&self, id: Id64) -> CoreResult<()> {
        self.write(|data| {
            if is_system_entity(id) {
                return Err(CoreError::invalid_operation(format!(
                    "element {id} cannot be deleted"
                )));
            }
            if !data.elements.contains_key(&id) {
                return Err(CoreError::not_found(EntityKind::Element, id));
            }
            let mut doomed = BTreeSet::new();
            data.collect_subtree(id, &mut doomed);
            data.remove_elements(&doomed);
            Ok(())
        })
    }

    fn aspects(&self, element: Id64) -> CoreResult<Vec<AspectProps>> {
        Ok(self
            .working
            .read()
            .aspects
            .values()
            .filter(|a| a.element == element)
            .cloned()
            .collect())
    }

    fn insert_aspect(&self, aspect: &AspectProps) -> CoreResult<Id64> {
        self.write(|data| {
            data.check_class(&aspect.class_name, |k| matches!(k, ClassKind::Aspect(_)))?;
            if !data.elements.contains_key(&aspect.element) {
                return Err(CoreError::not_found(EntityKind::Element, aspect.element));
            }
            if aspect.kind == AspectKind::Unique
                && data
                    .aspects
                    .values()
                    .any(|a| a.element == aspect.element && a.class_name == aspect.class_name)
            {
                return Err(CoreError::constraint(format!(
                    "element {} already owns a {} aspect",
                    aspect.element, aspect.class_name
                )));
            }
            data.check_references(&aspect.class_name, &aspect.properties)?;
            let id = data.claim_id(aspect.id, EntityKind::Aspect)?;
            let sequence = data.next_sequence();
            let mut stored = aspect.clone();
            stored.id = id;
            stored.last_mod = sequence;
            data.aspects.insert(id, stored);
            data.log
                .record(ChangeEvent::insert(sequence, EntityKind::Aspect, id));
            data.touch_element(aspect.element);
            Ok(id)
        })
    }

    fn update_aspect(&self, aspect: &AspectProps) -> CoreResult<()> {
        self.write(|data| {
            let owner = match data.aspects.get(&aspect.id) {
                Some(existing) => existing.element,
                None => return Err(CoreError::not_found(EntityKind::Aspect, aspect.id)),
            };
            if owner != aspect.element {
                return Err(CoreError::constraint(format!(
                    "aspect {} cannot move from {owner} to {}",
                    aspect.id, aspect.element
                )));
            }
            data.check_references(&aspect.class_name, &aspect.properties)?;
            let sequence = data.next_sequence();
            let mut stored = aspect.clone();
            stored.last_mod = sequence;
            data.aspects.insert(aspect.id, stored);
            data.log
                .record(ChangeEvent::update(sequence, EntityKind::Aspect, aspect.id));
            data.touch_element(owner);
            Ok(())
        })
    }

    fn delete_aspect(&self, id: Id64) -> CoreResult<()> {
        self.write(|data| {
            let removed = data
                .aspects
                .remove(&id)
                .ok_or_else(|| CoreError::not_found(EntityKind::Aspect, id))?;
            let sequence = data.next_sequence();
            data.log
                .record(ChangeEvent::delete(sequence, EntityKind::Aspect, id));
            data.touch_element(removed.element);
            Ok(())
        })
    }

    fn relationship(&self, id: Id64) -> CoreResult<Option<RelationshipProps>> {
        Ok(self.working.read().relationships.get(&id).cloned())
    }

    fn relationships(&self, class_name: &str) -> CoreResult<Vec<RelationshipProps>> {
        let data = self.working.read();
        let mut matching = Vec::new();
        for relationship in data.relationships.values() {
            if data
                .registry
                .is_subclass_of(&relationship.class_name, class_name)?
            {
                matching.push(relationship.clone());
            }
        }
        Ok(matching)
    }

    fn find_relationship(
        &self,
        class_name: &str,
        source_id: Id64,
        target_id: Id64,
    ) -> CoreResult<Option<RelationshipProps>> {
        Ok(self
            .working
            .read()
            .relationships
            .values()
            .find(|r| {
                r.class_name == class_name && r.source_id == source_id && r.target_id == target_id
            })
            .cloned())
    }

    fn insert_relationship(&self, relationship: &RelationshipProps) -> CoreResult<Id64> {
        self.write(|data| {
            data.check_class(&relationship.class_name, |k| k == ClassKind::Relationship)?;
            for endpoint in [relationship.source_id, relationship.target_id] {
                if !data.elements.contains_key(&endpoint) {
                    return Err(CoreError::not_found(EntityKind::Element, endpoint));
                }
            }
            data.check_unique_relationship(relationship, None)?;
            let id = data.claim_id(relationship.id, EntityKind::Relationship)?;
            let sequence = data.next_sequence();
            let mut stored = relationship.clone();
            stored.id = id;
            stored.last_mod = sequence;
            data.relationships.insert(id, stored);
            data.log
                .record(ChangeEvent::insert(sequence, EntityKind::Relationship, id));
            Ok(id)
        })
    }

    fn update_relationship(&self, relationship: &RelationshipProps) -> CoreResult<()> {
        self.write(|data| {
            if !data.relationships.contains_key(&relationship.id) {
                return Err(CoreError::not_found(EntityKind::Relationship, relationship.id));
            }
            for endpoint in [relationship.source_id, relationship.target_id] {
                if !data.elements.contains_key(&endpoint) {
                    return Err(CoreError::not_found(EntityKind::Element, endpoint));
                }
            }
            data.check_unique_relationship(relationship, Some(relationship.id))?;
            let sequence = data.next_sequence();
            let mut stored = relationship.clone();
            stored.last_mod = sequence;
            data.relationships.insert(relationship.id, stored);
            data.log.record(ChangeEvent::update(
                sequence,
                EntityKind::Relationship,
                relationship.id,
            ));
            Ok(())
        })
    }

    fn delete_relationship(&self, id: Id64) -> CoreResult<()> {
        self.write(|data| {
            if data.relationships.remove(&id).is_none() {
                return Err(CoreError::not_found(EntityKind::Relationship, id));
            }
            data.provenance
                .retain(|_, p| !(p.kind == ProvenanceKind::Relationship && p.entity == id));
            let sequence = data.next_sequence();
            data.log
                .record(ChangeEvent::delete(sequence, EntityKind::Relationship, id));
            Ok(())
        })
    }

    fn provenance(&self, scope: Id64) -> CoreResult<Vec<ProvenanceRecord>> {
        Ok(self
            .working
            .read()
            .provenance
            .values()
            .filter(|p| p.scope == scope)
            .cloned()
            .collect())
    }

    fn insert_provenance(&self, record: &ProvenanceRecord) -> CoreResult<Id64> {
        self.write(|data| {
            let attached = match record.kind {
                ProvenanceKind::Relationship => data.relationships.contains_key(&record.entity),
                ProvenanceKind::Element | ProvenanceKind::Scope => {
                    data.elements.contains_key(&record.entity)
                }
            };
            if !attached {
                return Err(CoreError::constraint(format!(
                    "provenance target {} does not exist",
                    record.entity
                )));
            }
            let id = data.claim_id(record.id, EntityKind::Provenance)?;
            let sequence = data.next_sequence();
            data.provenance.insert(
                id,
                ProvenanceRecord {
                    id,
                    ..record.clone()
                },
            );
            data.log
                .record(ChangeEvent::insert(sequence, EntityKind::Provenance, id));
            Ok(id)
        })
    }

    fn update_provenance(&self, record: &ProvenanceRecord) -> CoreResult<()> {
        self.write(|data| {
            if !data.provenance.contains_key(&record.id) {
                return Err(CoreError::not_found(EntityKind::Provenance, record.id));
            }
            let sequence = data.next_sequence();
            data.provenance.insert(record.id, record.clone());
            data.log
                .record(ChangeEvent::update(sequence, EntityKind::Provenance, record.id));
            Ok(())
        })
    }

    fn delete_provenance(&self, id: Id64) -> CoreResult<()> {
        self.write(|data| {
            if data.provenance.remove(&id).is_none() {
                return Err(CoreError::not_found(EntityKind::Provenance, id));
            }
            let sequence = data.next_sequence();
            data.log
                .record(ChangeEvent::delete(sequence, EntityKind::Provenance, id));
            Ok(())
        })
    }

    fn changes_since(&self, checkpoint: u64) -> CoreResult<Vec<ChangeEvent>> {
        Ok(self.working.read().log.since(checkpoint))
    }

    fn save_changes(&self, description: &str) -> CoreResult<()> {
        let working = self.working.read();
        let mut committed = self.committed.write();
        debug!(
            description,
            from = committed.sequence,
            to = working.sequence,
            "saving changes"
        );
        *committed = working.clone();
        Ok(())
    }

    fn abandon_changes(&self) -> CoreResult<()> {
        let committed = self.committed.read();
        let mut working = self.working.write();
        debug!(
            discarded = working.sequence.saturating_sub(committed.sequence),
            "abandoning changes"
        );
        *working = committed.clone();
        Ok(())
    }

    fn has_unsaved_changes(&self) -> bool {
        self.working.read().sequence != self.committed.read().sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ClassDef, PropertyDef, BIS_CORE};

    fn partition(repo: &InMemoryRepository, label: &str) -> Id64 {
        let element = ElementProps::new(classes::PHYSICAL_PARTITION, Id64::REPOSITORY_MODEL)
            .with_parent(Id64::ROOT_SUBJECT)
            .with_label(label);
        let id = repo.insert_element(&element).unwrap();
        repo.insert_model(&ModelProps::new(classes::PHYSICAL_MODEL, id))
            .unwrap();
        id
    }

    #[test]
    fn seeded_entities() {
        let repo = InMemoryRepository::new();
        assert!(repo.element(Id64::ROOT_SUBJECT).unwrap().is_some());
        assert!(repo.model(Id64::REPOSITORY_MODEL).unwrap().is_some());
        assert!(repo.model(Id64::DICTIONARY_MODEL).unwrap().is_some());
        assert_eq!(repo.element_count(), 2);
        assert!(!repo.has_unsaved_changes());
    }

    #[test]
    fn insert_assigns_ids_and_markers() {
        let repo = InMemoryRepository::new();
        let model = partition(&repo, "Site");
        let element = ElementProps::new(classes::PHYSICAL_ELEMENT, model);
        let id = repo.insert_element(&element).unwrap();
        let stored = repo.element(id).unwrap().unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.last_mod, repo.change_sequence());
        assert!(id.value() >= Id64::FIRST_USER_ID);
    }

    #[test]
    fn preserved_id_is_honored() {
        let repo = InMemoryRepository::new();
        let model = partition(&repo, "Site");
        let mut element = ElementProps::new(classes::PHYSICAL_ELEMENT, model);
        element.id = Id64::new(0x500);
        assert_eq!(repo.insert_element(&element).unwrap(), Id64::new(0x500));
        assert!(matches!(
            repo.insert_element(&element),
            Err(CoreError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn duplicate_code_rejected() {
        let repo = InMemoryRepository::new();
        let spec = repo.insert_code_spec(&CodeSpec::new("Test:Tag")).unwrap();
        let model = partition(&repo, "Site");
        let code = Code::new(spec, model, "P-1");
        let element = ElementProps::new(classes::PHYSICAL_ELEMENT, model).with_code(code);
        repo.insert_element(&element).unwrap();
        assert!(matches!(
            repo.insert_element(&element),
            Err(CoreError::ConstraintViolation { .. })
        ));
    }

    #[test]
    fn navigation_reference_must_exist() {
        let repo = InMemoryRepository::new();
        let model = partition(&repo, "Site");
        let element = ElementProps::new(classes::PHYSICAL_ELEMENT, model)
            .with_property("category", Id64::new(0x999));
        assert!(matches!(
            repo.insert_element(&element),
            Err(CoreError::ConstraintViolation { .. })
        ));
    }

    #[test]
    fn unknown_class_rejected() {
        let repo = InMemoryRepository::new();
        let element = ElementProps::new("Nope:Thing", Id64::REPOSITORY_MODEL);
        assert!(matches!(
            repo.insert_element(&element),
            Err(CoreError::ClassNotFound { .. })
        ));
    }

    #[test]
    fn delete_cascades() {
        let repo = InMemoryRepository::new();
        let model = partition(&repo, "Site");
        let parent = repo
            .insert_element(&ElementProps::new(classes::PHYSICAL_ELEMENT, model))
            .unwrap();
        let child = repo
            .insert_element(&ElementProps::new(classes::PHYSICAL_ELEMENT, model).with_parent(parent))
            .unwrap();
        let other = repo
            .insert_element(&ElementProps::new(classes::PHYSICAL_ELEMENT, model))
            .unwrap();
        repo.insert_relationship(&RelationshipProps::new(
            classes::ELEMENT_GROUPS_MEMBERS,
            other,
            child,
        ))
        .unwrap();
        repo.insert_aspect(&AspectProps::new(
            classes::ELEMENT_MULTI_ASPECT,
            child,
            AspectKind::Multi,
        ))
        .unwrap();

        repo.delete_element(parent).unwrap();
        assert!(repo.element(child).unwrap().is_none());
        assert_eq!(repo.relationship_count(), 0);
        assert_eq!(repo.aspect_count(), 0);
        assert!(repo.element(other).unwrap().is_some());

        repo.delete_element(model).unwrap();
        assert!(repo.model(model).unwrap().is_none());
        assert!(repo.element(other).unwrap().is_none());
    }

    #[test]
    fn system_entities_cannot_be_deleted() {
        let repo = InMemoryRepository::new();
        assert!(repo.delete_element(Id64::ROOT_SUBJECT).is_err());
        assert!(repo.delete_model(Id64::DICTIONARY_MODEL).is_err());
    }

    #[test]
    fn save_and_abandon() {
        let repo = InMemoryRepository::new();
        let model = partition(&repo, "Site");
        repo.save_changes("partition").unwrap();
        assert!(!repo.has_unsaved_changes());

        let id = repo
            .insert_element(&ElementProps::new(classes::PHYSICAL_ELEMENT, model))
            .unwrap();
        assert!(repo.has_unsaved_changes());
        repo.abandon_changes().unwrap();
        assert!(repo.element(id).unwrap().is_none());
        assert!(repo.element(model).unwrap().is_some());
    }

    #[test]
    fn change_log_records_deletes() {
        let repo = InMemoryRepository::new();
        let model = partition(&repo, "Site");
        let checkpoint = repo.change_sequence();
        let id = repo
            .insert_element(&ElementProps::new(classes::PHYSICAL_ELEMENT, model))
            .unwrap();
        repo.delete_element(id).unwrap();
        let changes = repo.changes_since(checkpoint).unwrap();
        assert_eq!(changes.len(), 2);
        assert!(crate::change_log::net_deletions(&changes, checkpoint).is_empty());
    }

    #[test]
    fn relationships_by_base_class() {
        let repo = InMemoryRepository::new();
        let model = partition(&repo, "Site");
        let a = repo
            .insert_element(&ElementProps::new(classes::PHYSICAL_ELEMENT, model))
            .unwrap();
        let b = repo
            .insert_element(&ElementProps::new(classes::PHYSICAL_ELEMENT, model))
            .unwrap();
        repo.insert_relationship(&RelationshipProps::new(classes::ELEMENT_GROUPS_MEMBERS, a, b))
            .unwrap();
        assert_eq!(
            repo.relationships(classes::ELEMENT_REFERS_TO_ELEMENTS)
                .unwrap()
                .len(),
            1
        );
        assert!(repo
            .find_relationship(classes::ELEMENT_GROUPS_MEMBERS, a, b)
            .unwrap()
            .is_some());
    }

    #[test]
    fn relationship_update_cannot_duplicate_endpoints() {
        let repo = InMemoryRepository::new();
        let model = partition(&repo, "Site");
        let [a, b, c] = [(); 3].map(|_| {
            repo.insert_element(&ElementProps::new(classes::PHYSICAL_ELEMENT, model))
                .unwrap()
        });
        repo.insert_relationship(&RelationshipProps::new(classes::ELEMENT_GROUPS_MEMBERS, a, b))
            .unwrap();
        let moved = repo
            .insert_relationship(&RelationshipProps::new(classes::ELEMENT_GROUPS_MEMBERS, a, c))
            .unwrap();

        let mut relationship = repo.relationship(moved).unwrap().unwrap();
        relationship.properties.insert("priority".into(), PropertyValue::Integer(2));
        repo.update_relationship(&relationship).unwrap();

        relationship.target_id = b;
        assert!(matches!(
            repo.update_relationship(&relationship),
            Err(CoreError::ConstraintViolation { .. })
        ));
        assert_eq!(repo.relationship(moved).unwrap().unwrap().target_id, c);
    }

    #[test]
    fn runtime_schema_reference_properties() {
        let repo = InMemoryRepository::new();
        repo.import_schemas(&[SchemaDef::new("Plant", 1)
            .with_reference(BIS_CORE)
            .with_class(
                ClassDef::new("Pump", ClassKind::Element)
                    .with_base(classes::PHYSICAL_ELEMENT)
                    .with_property(PropertyDef::navigation("feeds")),
            )])
            .unwrap();
        assert_eq!(
            repo.reference_properties("Plant:Pump").unwrap(),
            vec!["category".to_string(), "feeds".to_string()]
        );
    }

    #[test]
    fn snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repo.json");
        let repo = InMemoryRepository::new();
        let model = partition(&repo, "Site");
        repo.save_changes("partition").unwrap();
        repo.save_snapshot(&path).unwrap();

        let reopened = InMemoryRepository::open_snapshot(&path).unwrap();
        assert_eq!(reopened.repository_id(), repo.repository_id());
        assert!(reopened.model(model).unwrap().is_some());
        assert_eq!(reopened.change_sequence(), repo.change_sequence());
    }
}
