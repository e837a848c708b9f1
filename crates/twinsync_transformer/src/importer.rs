//! Writes cloned entities into a target repository.
//!
//! Every import compares the incoming entity with what the target already
//! holds and writes only when the content fingerprints differ, so a re-run
//! over an unchanged source is a no-op.

use std::collections::BTreeMap;
use tracing::{debug, trace};
use twinsync_core::{
    AspectKind, AspectProps, CodeSpec, ElementProps, EntityKind, EntityProps, Id64, ModelProps,
    RelationshipProps, Repository,
};

use crate::error::{TransformError, TransformResult};

/// Insert, update and delete counts for one kind of entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounters {
    /// Entities inserted.
    pub inserted: u64,
    /// Entities updated.
    pub updated: u64,
    /// Entities deleted.
    pub deleted: u64,
}

impl KindCounters {
    /// Returns the total number of writes.
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.deleted
    }
}

/// Per-kind write counters of an importer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportStats {
    /// Code spec writes.
    pub code_specs: KindCounters,
    /// Model writes.
    pub models: KindCounters,
    /// Element writes.
    pub elements: KindCounters,
    /// Aspect writes.
    pub aspects: KindCounters,
    /// Relationship writes.
    pub relationships: KindCounters,
}

impl ImportStats {
    /// Returns the total number of writes across all kinds.
    pub fn total(&self) -> u64 {
        self.code_specs.total()
            + self.models.total()
            + self.elements.total()
            + self.aspects.total()
            + self.relationships.total()
    }
}

/// Importer configuration.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Insert entities with the id they arrive with instead of a fresh one.
    pub preserve_element_ids: bool,
}

/// Makes a target repository match cloned entities.
///
/// Entities arrive in target shape. A valid id names the target entity to
/// update; an invalid id asks for an insert, unless an existing element can
/// be matched by federation guid or code.
pub struct Importer<'a, T: Repository> {
    target: &'a T,
    options: ImportOptions,
    stats: ImportStats,
}

impl<'a, T: Repository> Importer<'a, T> {
    /// Creates an importer writing into `target`.
    pub fn new(target: &'a T, options: ImportOptions) -> Self {
        Self {
            target,
            options,
            stats: ImportStats::default(),
        }
    }

    /// Returns the target repository.
    pub fn target(&self) -> &'a T {
        self.target
    }

    /// Returns the write counters.
    pub fn stats(&self) -> &ImportStats {
        &self.stats
    }

    /// Zeroes the write counters.
    pub fn reset_stats(&mut self) {
        self.stats = ImportStats::default();
    }

    /// Maps a code spec by name, inserting it when the target lacks it.
    pub fn import_code_spec(&mut self, code_spec: &CodeSpec) -> TransformResult<Id64> {
        if let Some(existing) = self.target.code_spec_by_name(&code_spec.name)? {
            return Ok(existing.id);
        }
        let incoming = CodeSpec {
            id: Id64::INVALID,
            ..code_spec.clone()
        };
        let id = self
            .target
            .insert_code_spec(&incoming)
            .map_err(|e| TransformError::write_failure(EntityKind::CodeSpec, code_spec.id, e))?;
        self.stats.code_specs.inserted += 1;
        debug!(name = %code_spec.name, %id, "inserted code spec");
        Ok(id)
    }

    /// Inserts or updates a model. The model id must name an existing
    /// target element.
    pub fn import_model(&mut self, model: &ModelProps) -> TransformResult<Id64> {
        match self.target.model(model.id)? {
            Some(existing) => {
                if existing.fingerprint()? != model.fingerprint()? {
                    self.target
                        .update_model(model)
                        .map_err(|e| TransformError::write_failure(EntityKind::Model, model.id, e))?;
                    self.stats.models.updated += 1;
                    trace!(model = %model.id, "updated model");
                }
            }
            None => {
                self.target
                    .insert_model(model)
                    .map_err(|e| TransformError::write_failure(EntityKind::Model, model.id, e))?;
                self.stats.models.inserted += 1;
                trace!(model = %model.id, "inserted model");
            }
        }
        Ok(model.id)
    }

    /// Imports a model together with its elements, in the order given.
    ///
    /// Returns the target ids of the elements.
    pub fn import_model_contents(
        &mut self,
        model: &ModelProps,
        elements: &[ElementProps],
    ) -> TransformResult<Vec<Id64>> {
        self.import_model(model)?;
        elements
            .iter()
            .map(|element| self.import_element(element))
            .collect()
    }

    /// Inserts or updates an element and returns its target id.
    pub fn import_element(&mut self, element: &ElementProps) -> TransformResult<Id64> {
        let existing = match element.id.valid() {
            Some(id) => self.target.element(id)?,
            None => self.find_existing_element(element)?,
        };

        match existing {
            Some(current) => {
                let mut incoming = element.clone();
                incoming.id = current.id;
                if current.fingerprint()? != incoming.fingerprint()? {
                    self.target
                        .update_element(&incoming)
                        .map_err(|e| TransformError::write_failure(EntityKind::Element, current.id, e))?;
                    self.stats.elements.updated += 1;
                    trace!(element = %current.id, "updated element");
                }
                Ok(current.id)
            }
            None => {
                let mut incoming = element.clone();
                if !self.options.preserve_element_ids {
                    incoming.id = Id64::INVALID;
                }
                let id = self
                    .target
                    .insert_element(&incoming)
                    .map_err(|e| TransformError::write_failure(EntityKind::Element, element.id, e))?;
                self.stats.elements.inserted += 1;
                trace!(element = %id, class = %element.class_name, "inserted element");
                Ok(id)
            }
        }
    }

    fn find_existing_element(&self, element: &ElementProps) -> TransformResult<Option<ElementProps>> {
        if let Some(guid) = element.federation_guid {
            if let Some(id) = self.target.find_element_by_federation_guid(guid)? {
                return Ok(self.target.element(id)?);
            }
        }
        if !element.code.is_empty() && element.code.spec.is_valid() {
            if let Some(id) = self.target.find_element_by_code(&element.code)? {
                return Ok(self.target.element(id)?);
            }
        }
        Ok(None)
    }

    /// Inserts or updates the unique aspect of its class on its element.
    pub fn import_element_unique_aspect(&mut self, aspect: &AspectProps) -> TransformResult<Id64> {
        let existing = self
            .target
            .aspects(aspect.element)?
            .into_iter()
            .find(|a| a.kind == AspectKind::Unique && a.class_name == aspect.class_name);
        match existing {
            Some(current) => {
                let incoming = AspectProps {
                    id: current.id,
                    ..aspect.clone()
                };
                self.update_aspect_if_changed(&current, &incoming)?;
                Ok(current.id)
            }
            None => self.insert_aspect(aspect),
        }
    }

    /// Makes the multi aspects of `element` equal `aspects`.
    ///
    /// Aspects are matched by position within each class. Surplus target
    /// aspects, including those of classes absent from `aspects`, are
    /// deleted.
    pub fn import_element_multi_aspects(&mut self, element: Id64, aspects: &[AspectProps]) -> TransformResult<()> {
        let mut existing: BTreeMap<String, Vec<AspectProps>> = BTreeMap::new();
        for aspect in self.target.aspects(element)? {
            if aspect.kind == AspectKind::Multi {
                existing.entry(aspect.class_name.clone()).or_default().push(aspect);
            }
        }
        let mut incoming: BTreeMap<String, Vec<&AspectProps>> = BTreeMap::new();
        for aspect in aspects {
            incoming.entry(aspect.class_name.clone()).or_default().push(aspect);
        }

        for (class_name, current) in &existing {
            let wanted = incoming.get(class_name).map_or(&[][..], Vec::as_slice);
            for surplus in current.iter().skip(wanted.len()) {
                self.delete_aspect(surplus.id)?;
            }
        }
        for (class_name, wanted) in incoming {
            let current = existing.get(&class_name).map_or(&[][..], Vec::as_slice);
            for (index, aspect) in wanted.into_iter().enumerate() {
                match current.get(index) {
                    Some(existing) => {
                        let incoming = AspectProps {
                            id: existing.id,
                            element,
                            ..aspect.clone()
                        };
                        self.update_aspect_if_changed(existing, &incoming)?;
                    }
                    None => {
                        let incoming = AspectProps {
                            element,
                            ..aspect.clone()
                        };
                        self.insert_aspect(&incoming)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Deletes unique aspects of `element` whose class is not in `keep`.
    pub fn prune_unique_aspects(&mut self, element: Id64, keep: &[String]) -> TransformResult<()> {
        for aspect in self.target.aspects(element)? {
            if aspect.kind == AspectKind::Unique && !keep.contains(&aspect.class_name) {
                self.delete_aspect(aspect.id)?;
            }
        }
        Ok(())
    }

    fn insert_aspect(&mut self, aspect: &AspectProps) -> TransformResult<Id64> {
        let incoming = AspectProps {
            id: Id64::INVALID,
            ..aspect.clone()
        };
        let id = self
            .target
            .insert_aspect(&incoming)
            .map_err(|e| TransformError::write_failure(EntityKind::Aspect, aspect.element, e))?;
        self.stats.aspects.inserted += 1;
        Ok(id)
    }

    fn update_aspect_if_changed(&mut self, current: &AspectProps, incoming: &AspectProps) -> TransformResult<()> {
        if current.fingerprint()? != incoming.fingerprint()? {
            self.target
                .update_aspect(incoming)
                .map_err(|e| TransformError::write_failure(EntityKind::Aspect, current.id, e))?;
            self.stats.aspects.updated += 1;
        }
        Ok(())
    }

    fn delete_aspect(&mut self, id: Id64) -> TransformResult<()> {
        self.target
            .delete_aspect(id)
            .map_err(|e| TransformError::write_failure(EntityKind::Aspect, id, e))?;
        self.stats.aspects.deleted += 1;
        Ok(())
    }

    /// Inserts or updates a relationship and returns its target id.
    ///
    /// Without a mapped id the relationship is matched by class and
    /// endpoints.
    pub fn import_relationship(&mut self, relationship: &RelationshipProps) -> TransformResult<Id64> {
        let existing = match relationship.id.valid() {
            Some(id) => self.target.relationship(id)?,
            None => None,
        };
        let existing = match existing {
            Some(found) => Some(found),
            None => self.target.find_relationship(
                &relationship.class_name,
                relationship.source_id,
                relationship.target_id,
            )?,
        };

        match existing {
            Some(current) => {
                let incoming = RelationshipProps {
                    id: current.id,
                    ..relationship.clone()
                };
                if current.fingerprint()? != incoming.fingerprint()? {
                    self.target
                        .update_relationship(&incoming)
                        .map_err(|e| TransformError::write_failure(EntityKind::Relationship, current.id, e))?;
                    self.stats.relationships.updated += 1;
                }
                Ok(current.id)
            }
            None => {
                let mut incoming = relationship.clone();
                if !self.options.preserve_element_ids {
                    incoming.id = Id64::INVALID;
                }
                let id = self
                    .target
                    .insert_relationship(&incoming)
                    .map_err(|e| TransformError::write_failure(EntityKind::Relationship, relationship.id, e))?;
                self.stats.relationships.inserted += 1;
                trace!(relationship = %id, class = %relationship.class_name, "inserted relationship");
                Ok(id)
            }
        }
    }

    /// Deletes a target element with everything the target cascades.
    /// Returns false if it was already gone.
    pub fn delete_element(&mut self, id: Id64) -> TransformResult<bool> {
        if self.target.element(id)?.is_none() {
            return Ok(false);
        }
        self.target
            .delete_element(id)
            .map_err(|e| TransformError::write_failure(EntityKind::Element, id, e))?;
        self.stats.elements.deleted += 1;
        debug!(element = %id, "deleted element");
        Ok(true)
    }

    /// Deletes a target model and its contents. Returns false if it was
    /// already gone.
    pub fn delete_model(&mut self, id: Id64) -> TransformResult<bool> {
        if self.target.model(id)?.is_none() {
            return Ok(false);
        }
        self.target
            .delete_model(id)
            .map_err(|e| TransformError::write_failure(EntityKind::Model, id, e))?;
        self.stats.models.deleted += 1;
        debug!(model = %id, "deleted model");
        Ok(true)
    }

    /// Deletes a target relationship. Returns false if it was already gone.
    pub fn delete_relationship(&mut self, id: Id64) -> TransformResult<bool> {
        if self.target.relationship(id)?.is_none() {
            return Ok(false);
        }
        self.target
            .delete_relationship(id)
            .map_err(|e| TransformError::write_failure(EntityKind::Relationship, id, e))?;
        self.stats.relationships.deleted += 1;
        debug!(relationship = %id, "deleted relationship");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinsync_core::{classes, Code, InMemoryRepository};

    fn target_with_model() -> (InMemoryRepository, Id64) {
        let target = InMemoryRepository::new();
        let partition = target
            .insert_element(
                &ElementProps::new(classes::PHYSICAL_PARTITION, Id64::REPOSITORY_MODEL)
                    .with_parent(Id64::ROOT_SUBJECT),
            )
            .unwrap();
        target
            .insert_model(&ModelProps::new(classes::PHYSICAL_MODEL, partition))
            .unwrap();
        (target, partition)
    }

    #[test]
    fn insert_then_noop_then_update() {
        let (target, model) = target_with_model();
        let mut importer = Importer::new(&target, ImportOptions::default());
        let element = ElementProps::new(classes::PHYSICAL_ELEMENT, model).with_label("pump");

        let id = importer.import_element(&element).unwrap();
        assert_eq!(importer.stats().elements.inserted, 1);

        let mut same = element.clone();
        same.id = id;
        importer.import_element(&same).unwrap();
        assert_eq!(importer.stats().elements.updated, 0);

        let changed = same.with_label("pump 2");
        importer.import_element(&changed).unwrap();
        assert_eq!(importer.stats().elements.updated, 1);
        assert_eq!(
            target.element(id).unwrap().unwrap().user_label.as_deref(),
            Some("pump 2")
        );
    }

    #[test]
    fn model_contents_are_written_with_their_model() {
        let target = InMemoryRepository::new();
        let partition = target
            .insert_element(
                &ElementProps::new(classes::PHYSICAL_PARTITION, Id64::REPOSITORY_MODEL)
                    .with_parent(Id64::ROOT_SUBJECT),
            )
            .unwrap();
        let mut importer = Importer::new(&target, ImportOptions::default());
        let mut model = ModelProps::new(classes::PHYSICAL_MODEL, partition);
        let elements = vec![
            ElementProps::new(classes::PHYSICAL_ELEMENT, partition).with_label("pump"),
            ElementProps::new(classes::PHYSICAL_ELEMENT, partition).with_label("valve"),
        ];

        let ids = importer.import_model_contents(&model, &elements).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(target.model(partition).unwrap().is_some());
        assert_eq!(target.element_ids_in_model(partition).unwrap(), ids);
        assert_eq!(importer.stats().models.inserted, 1);
        assert_eq!(importer.stats().elements.inserted, 2);

        model.is_private = true;
        let mut relabeled = elements[1].clone().with_label("check valve");
        relabeled.id = ids[1];
        let mut unchanged = elements[0].clone();
        unchanged.id = ids[0];
        let again = importer
            .import_model_contents(&model, &[unchanged, relabeled])
            .unwrap();
        assert_eq!(again, ids);
        assert_eq!(importer.stats().models.updated, 1);
        assert_eq!(importer.stats().elements.updated, 1);
        assert_eq!(importer.stats().elements.inserted, 2);
    }

    #[test]
    fn matches_existing_by_code() {
        let (target, model) = target_with_model();
        let spec = target.insert_code_spec(&CodeSpec::new("Plant:Tag")).unwrap();
        let code = Code::new(spec, model, "P-1");
        let existing = target
            .insert_element(&ElementProps::new(classes::PHYSICAL_ELEMENT, model).with_code(code.clone()))
            .unwrap();

        let mut importer = Importer::new(&target, ImportOptions::default());
        let incoming = ElementProps::new(classes::PHYSICAL_ELEMENT, model)
            .with_code(code)
            .with_label("renamed");
        assert_eq!(importer.import_element(&incoming).unwrap(), existing);
        assert_eq!(importer.stats().elements.inserted, 0);
        assert_eq!(importer.stats().elements.updated, 1);
    }

    #[test]
    fn constraint_violation_is_write_failure() {
        let (target, _) = target_with_model();
        let mut importer = Importer::new(&target, ImportOptions::default());
        let orphan = ElementProps::new(classes::PHYSICAL_ELEMENT, Id64::new(0x777));
        let err = importer.import_element(&orphan).unwrap_err();
        assert!(err.is_write_failure());
    }

    #[test]
    fn preserve_ids_keeps_incoming_id() {
        let (target, model) = target_with_model();
        let mut importer = Importer::new(
            &target,
            ImportOptions {
                preserve_element_ids: true,
            },
        );
        let mut element = ElementProps::new(classes::PHYSICAL_ELEMENT, model);
        element.id = Id64::new(0x400);
        assert_eq!(importer.import_element(&element).unwrap(), Id64::new(0x400));
    }

    #[test]
    fn multi_aspects_positional_with_surplus_deleted() {
        let (target, model) = target_with_model();
        let element = target
            .insert_element(&ElementProps::new(classes::PHYSICAL_ELEMENT, model))
            .unwrap();
        let mut importer = Importer::new(&target, ImportOptions::default());
        let aspect = |n: i64| {
            AspectProps::new(classes::ELEMENT_MULTI_ASPECT, element, AspectKind::Multi).with_property("n", n)
        };

        importer
            .import_element_multi_aspects(element, &[aspect(1), aspect(2), aspect(3)])
            .unwrap();
        assert_eq!(importer.stats().aspects.inserted, 3);

        importer
            .import_element_multi_aspects(element, &[aspect(1), aspect(5)])
            .unwrap();
        assert_eq!(importer.stats().aspects.updated, 1);
        assert_eq!(importer.stats().aspects.deleted, 1);
        assert_eq!(target.aspects(element).unwrap().len(), 2);

        importer.import_element_multi_aspects(element, &[]).unwrap();
        assert!(target.aspects(element).unwrap().is_empty());
    }

    #[test]
    fn unique_aspect_upsert_and_prune() {
        let (target, model) = target_with_model();
        let element = target
            .insert_element(&ElementProps::new(classes::PHYSICAL_ELEMENT, model))
            .unwrap();
        let mut importer = Importer::new(&target, ImportOptions::default());
        let aspect = AspectProps::new(classes::ELEMENT_UNIQUE_ASPECT, element, AspectKind::Unique)
            .with_property("rating", 3i64);

        let first = importer.import_element_unique_aspect(&aspect).unwrap();
        let second = importer.import_element_unique_aspect(&aspect).unwrap();
        assert_eq!(first, second);
        assert_eq!(importer.stats().aspects.total(), 1);

        importer.prune_unique_aspects(element, &[]).unwrap();
        assert!(target.aspects(element).unwrap().is_empty());
    }

    #[test]
    fn relationships_keyed_by_endpoints() {
        let (target, model) = target_with_model();
        let a = target
            .insert_element(&ElementProps::new(classes::PHYSICAL_ELEMENT, model))
            .unwrap();
        let b = target
            .insert_element(&ElementProps::new(classes::PHYSICAL_ELEMENT, model))
            .unwrap();
        let mut importer = Importer::new(&target, ImportOptions::default());
        let relationship = RelationshipProps::new(classes::ELEMENT_GROUPS_MEMBERS, a, b);

        let first = importer.import_relationship(&relationship).unwrap();
        let second = importer.import_relationship(&relationship).unwrap();
        assert_eq!(first, second);
        assert_eq!(importer.stats().relationships.inserted, 1);
        assert_eq!(importer.stats().relationships.updated, 0);

        assert!(importer.delete_relationship(first).unwrap());
        assert!(!importer.delete_relationship(first).unwrap());
        assert_eq!(importer.stats().relationships.deleted, 1);
    }

    #[test]
    fn code_spec_mapped_by_name() {
        let target = InMemoryRepository::new();
        let mut importer = Importer::new(&target, ImportOptions::default());
        let mut spec = CodeSpec::new("Plant:Tag");
        spec.id = Id64::new(0x99);
        let first = importer.import_code_spec(&spec).unwrap();
        let second = importer.import_code_spec(&spec).unwrap();
        assert_eq!(first, second);
        assert_eq!(importer.stats().code_specs.inserted, 1);
    }
}
