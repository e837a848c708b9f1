//! Identity mapping between a source and a target repository.
//!
//! The [`CloneContext`] is the single authority on which target entity
//! stands for which source entity. It owns:
//! - The element map (source id to target id) and its inverse
//! - The relationship map
//! - The code spec map
//! - A per-session cache of class reference properties
//!
//! Cloning rewrites every reference field of an entity through these maps.
//! References that are not mapped yet become the invalid id and are listed
//! in [`Cloned::unresolved`] so the caller can decide what to do with them.

use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use twinsync_core::{
    AspectProps, ElementProps, Id64, ModelProps, PropertyValue, RelationshipProps, Repository,
};

use crate::error::{TransformError, TransformResult};
use crate::predecessors::{element_predecessors, set_reference, Predecessor, ReferenceField};

/// A cloned entity together with the references that could not be mapped.
#[derive(Debug, Clone, PartialEq)]
pub struct Cloned<T> {
    /// The target-shaped entity. Unmapped references hold the invalid id.
    pub props: T,
    /// Fields whose source reference is not mapped, with the source id.
    pub unresolved: Vec<(ReferenceField, Id64)>,
}

impl<T> Cloned<T> {
    /// Returns true if every reference was mapped.
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Identity and code spec mapping for one transformation session.
pub struct CloneContext<'a, S: Repository, T: Repository> {
    source: &'a S,
    target: &'a T,
    elements: BTreeMap<Id64, Id64>,
    inverse: BTreeMap<Id64, Id64>,
    relationships: BTreeMap<Id64, Id64>,
    code_specs: BTreeMap<Id64, Id64>,
    reference_properties: HashMap<String, Vec<String>>,
    disposed: bool,
}

impl<'a, S: Repository, T: Repository> CloneContext<'a, S, T> {
    /// Creates a context with the root subject and the dictionary mapped
    /// onto themselves.
    pub fn new(source: &'a S, target: &'a T) -> Self {
        let mut context = Self {
            source,
            target,
            elements: BTreeMap::new(),
            inverse: BTreeMap::new(),
            relationships: BTreeMap::new(),
            code_specs: BTreeMap::new(),
            reference_properties: HashMap::new(),
            disposed: false,
        };
        context.remap_element(Id64::ROOT_SUBJECT, Id64::ROOT_SUBJECT);
        context.remap_element(Id64::DICTIONARY_MODEL, Id64::DICTIONARY_MODEL);
        context
    }

    /// Returns true when source and target are different repositories.
    ///
    /// Provenance is only written between repositories.
    pub fn is_between_repositories(&self) -> bool {
        self.source.repository_id() != self.target.repository_id()
    }

    /// Maps a source element onto a target element, replacing any previous
    /// mapping of either id.
    pub fn remap_element(&mut self, source_id: Id64, target_id: Id64) {
        if let Some(previous) = self.elements.insert(source_id, target_id) {
            self.inverse.remove(&previous);
        }
        if let Some(previous) = self.inverse.insert(target_id, source_id) {
            if previous != source_id {
                self.elements.remove(&previous);
            }
        }
    }

    /// Forgets the mapping of a source element.
    pub fn remove_element(&mut self, source_id: Id64) -> Option<Id64> {
        let target_id = self.elements.remove(&source_id)?;
        self.inverse.remove(&target_id);
        Some(target_id)
    }

    /// Returns the target id of a source element, or the invalid id.
    pub fn find_target_element_id(&self, source_id: Id64) -> Id64 {
        self.elements
            .get(&source_id)
            .copied()
            .unwrap_or(Id64::INVALID)
    }

    /// Returns the source id of a target element, or the invalid id.
    pub fn find_source_element_id(&self, target_id: Id64) -> Id64 {
        self.inverse
            .get(&target_id)
            .copied()
            .unwrap_or(Id64::INVALID)
    }

    /// Returns the target id of a model. The repository model always maps
    /// onto the repository model.
    pub fn find_target_model_id(&self, source_id: Id64) -> Id64 {
        if source_id == Id64::REPOSITORY_MODEL {
            Id64::REPOSITORY_MODEL
        } else {
            self.find_target_element_id(source_id)
        }
    }

    /// Returns the number of mapped elements, including the seeded ones.
    pub fn mapped_element_count(&self) -> usize {
        self.elements.len()
    }

    /// Maps a source relationship onto a target relationship.
    pub fn remap_relationship(&mut self, source_id: Id64, target_id: Id64) {
        self.relationships.insert(source_id, target_id);
    }

    /// Forgets the mapping of a source relationship.
    pub fn remove_relationship(&mut self, source_id: Id64) -> Option<Id64> {
        self.relationships.remove(&source_id)
    }

    /// Returns the target id of a source relationship, or the invalid id.
    pub fn find_target_relationship_id(&self, source_id: Id64) -> Id64 {
        self.relationships
            .get(&source_id)
            .copied()
            .unwrap_or(Id64::INVALID)
    }

    /// Maps the source code spec named `source_name` onto the target code
    /// spec named `target_name`.
    ///
    /// # Errors
    ///
    /// [`TransformError::CodeSpecNotFound`] if either name is unknown.
    pub fn remap_code_spec(&mut self, source_name: &str, target_name: &str) -> TransformResult<()> {
        let source = self
            .source
            .code_spec_by_name(source_name)?
            .ok_or_else(|| TransformError::CodeSpecNotFound(source_name.to_string()))?;
        let target = self
            .target
            .code_spec_by_name(target_name)?
            .ok_or_else(|| TransformError::CodeSpecNotFound(target_name.to_string()))?;
        self.code_specs.insert(source.id, target.id);
        Ok(())
    }

    /// Maps code spec ids directly.
    pub(crate) fn remap_code_spec_id(&mut self, source_id: Id64, target_id: Id64) {
        self.code_specs.insert(source_id, target_id);
    }

    /// Returns the target id of a source code spec, or the invalid id.
    pub fn find_target_code_spec_id(&self, source_id: Id64) -> Id64 {
        self.code_specs
            .get(&source_id)
            .copied()
            .unwrap_or(Id64::INVALID)
    }

    /// Returns the navigation properties of a source class, cached for the
    /// session.
    pub fn reference_properties(&mut self, class_name: &str) -> TransformResult<Vec<String>> {
        if let Some(cached) = self.reference_properties.get(class_name) {
            return Ok(cached.clone());
        }
        let properties = self.source.reference_properties(class_name)?;
        debug!(class = class_name, ?properties, "cached reference properties");
        self.reference_properties
            .insert(class_name.to_string(), properties.clone());
        Ok(properties)
    }

    /// Lists the predecessors of a source element.
    pub fn predecessors(&mut self, element: &ElementProps) -> TransformResult<Vec<Predecessor>> {
        let properties = self.reference_properties(&element.class_name)?;
        Ok(element_predecessors(element, &properties))
    }

    /// Clones a source element into target shape.
    ///
    /// The id is the mapped target id, or invalid for an element not yet in
    /// the target. Within one repository the federation guid is dropped,
    /// since two elements may not share it.
    pub fn clone_element(&mut self, element: &ElementProps) -> TransformResult<Cloned<ElementProps>> {
        let predecessors = self.predecessors(element)?;
        let mut props = element.clone();
        props.id = self.find_target_element_id(element.id);
        props.last_mod = 0;
        props.model = self.find_target_model_id(element.model);
        props.code.spec = if element.code.spec.is_valid() {
            self.find_target_code_spec_id(element.code.spec)
        } else {
            Id64::INVALID
        };
        if !self.is_between_repositories() {
            props.federation_guid = None;
        }

        let mut unresolved = Vec::new();
        for Predecessor { field, id } in predecessors {
            let mapped = match field {
                ReferenceField::Model => self.find_target_model_id(id),
                _ => self.find_target_element_id(id),
            };
            if !mapped.is_valid() {
                unresolved.push((field.clone(), id));
            }
            set_reference(&mut props, &field, mapped);
        }
        Ok(Cloned { props, unresolved })
    }

    /// Clones a source model into target shape.
    pub fn clone_model(&self, model: &ModelProps) -> Cloned<ModelProps> {
        let mut props = model.clone();
        props.id = self.find_target_model_id(model.id);
        props.last_mod = 0;
        let unresolved = if props.id.is_valid() {
            Vec::new()
        } else {
            vec![(ReferenceField::Model, model.id)]
        };
        Cloned { props, unresolved }
    }

    /// Clones a source aspect onto the target element `owner`.
    pub fn clone_aspect(&mut self, aspect: &AspectProps, owner: Id64) -> TransformResult<Cloned<AspectProps>> {
        let properties = self.reference_properties(&aspect.class_name)?;
        let mut props = aspect.clone();
        props.id = Id64::INVALID;
        props.element = owner;
        props.last_mod = 0;

        let mut unresolved = Vec::new();
        for name in properties {
            let Some(id) = aspect
                .properties
                .get(&name)
                .and_then(PropertyValue::as_id)
                .and_then(Id64::valid)
            else {
                continue;
            };
            let mapped = self.find_target_element_id(id);
            if !mapped.is_valid() {
                unresolved.push((ReferenceField::Property(name.clone()), id));
            }
            props.properties.insert(name, PropertyValue::Id(mapped));
        }
        Ok(Cloned { props, unresolved })
    }

    /// Clones a source relationship into target shape.
    ///
    /// The id is the mapped target relationship id, or invalid.
    pub fn clone_relationship(&self, relationship: &RelationshipProps) -> Cloned<RelationshipProps> {
        let mut props = relationship.clone();
        props.id = self.find_target_relationship_id(relationship.id);
        props.last_mod = 0;
        props.source_id = self.find_target_element_id(relationship.source_id);
        props.target_id = self.find_target_element_id(relationship.target_id);

        let mut unresolved = Vec::new();
        if !props.source_id.is_valid() {
            unresolved.push((ReferenceField::Property("source".into()), relationship.source_id));
        }
        if !props.target_id.is_valid() {
            unresolved.push((ReferenceField::Property("target".into()), relationship.target_id));
        }
        Cloned { props, unresolved }
    }

    /// Releases all maps and caches. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.elements.clear();
        self.inverse.clear();
        self.relationships.clear();
        self.code_specs.clear();
        self.reference_properties.clear();
        self.disposed = true;
        debug!("clone context disposed");
    }

    /// Returns true once [`Self::dispose`] has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinsync_core::{classes, Code, CodeSpec, InMemoryRepository, RepositoryId};

    fn repos() -> (InMemoryRepository, InMemoryRepository) {
        (InMemoryRepository::new(), InMemoryRepository::new())
    }

    #[test]
    fn seeds_system_elements() {
        let (source, target) = repos();
        let context = CloneContext::new(&source, &target);
        assert_eq!(context.find_target_element_id(Id64::ROOT_SUBJECT), Id64::ROOT_SUBJECT);
        assert_eq!(
            context.find_target_element_id(Id64::DICTIONARY_MODEL),
            Id64::DICTIONARY_MODEL
        );
        assert!(context.is_between_repositories());
    }

    #[test]
    fn remap_keeps_inverse_consistent() {
        let (source, target) = repos();
        let mut context = CloneContext::new(&source, &target);
        context.remap_element(Id64::new(0x21), Id64::new(0x51));
        assert_eq!(context.find_source_element_id(Id64::new(0x51)), Id64::new(0x21));

        context.remap_element(Id64::new(0x21), Id64::new(0x52));
        assert_eq!(context.find_source_element_id(Id64::new(0x51)), Id64::INVALID);
        assert_eq!(context.find_target_element_id(Id64::new(0x21)), Id64::new(0x52));

        context.remap_element(Id64::new(0x22), Id64::new(0x52));
        assert_eq!(context.find_target_element_id(Id64::new(0x21)), Id64::INVALID);
        assert_eq!(context.find_source_element_id(Id64::new(0x52)), Id64::new(0x22));
    }

    #[test]
    fn unmapped_lookup_is_invalid() {
        let (source, target) = repos();
        let context = CloneContext::new(&source, &target);
        assert_eq!(context.find_target_element_id(Id64::new(0x99)), Id64::INVALID);
        assert_eq!(context.find_target_code_spec_id(Id64::new(0x99)), Id64::INVALID);
    }

    #[test]
    fn remap_code_spec_by_name() {
        let (source, target) = repos();
        let source_spec = source.insert_code_spec(&CodeSpec::new("Plant:Tag")).unwrap();
        let target_spec = target.insert_code_spec(&CodeSpec::new("Plant:Tag")).unwrap();
        let mut context = CloneContext::new(&source, &target);
        context.remap_code_spec("Plant:Tag", "Plant:Tag").unwrap();
        assert_eq!(context.find_target_code_spec_id(source_spec), target_spec);

        let err = context.remap_code_spec("Plant:Missing", "Plant:Tag").unwrap_err();
        assert!(matches!(err, TransformError::CodeSpecNotFound(name) if name == "Plant:Missing"));
    }

    #[test]
    fn clone_element_rewrites_references() {
        let (source, target) = repos();
        let mut context = CloneContext::new(&source, &target);
        context.remap_element(Id64::new(0x30), Id64::new(0x70));
        context.remap_element(Id64::new(0x31), Id64::new(0x71));
        context.remap_code_spec_id(Id64::new(0x20), Id64::new(0x60));

        let mut element = ElementProps::new(classes::PHYSICAL_ELEMENT, Id64::new(0x30))
            .with_code(Code::new(Id64::new(0x20), Id64::new(0x30), "E-1"))
            .with_property("category", Id64::new(0x31))
            .with_label("E");
        element.id = Id64::new(0x40);
        element.last_mod = 17;

        let cloned = context.clone_element(&element).unwrap();
        assert!(cloned.is_complete());
        assert_eq!(cloned.props.id, Id64::INVALID);
        assert_eq!(cloned.props.model, Id64::new(0x70));
        assert_eq!(cloned.props.code.scope, Id64::new(0x70));
        assert_eq!(cloned.props.code.spec, Id64::new(0x60));
        assert_eq!(cloned.props.property("category"), Some(&PropertyValue::Id(Id64::new(0x71))));
        assert_eq!(cloned.props.last_mod, 0);
    }

    #[test]
    fn clone_element_reports_unresolved() {
        let (source, target) = repos();
        let mut context = CloneContext::new(&source, &target);
        context.remap_element(Id64::new(0x30), Id64::new(0x70));
        let element = ElementProps::new(classes::PHYSICAL_ELEMENT, Id64::new(0x30))
            .with_parent(Id64::new(0x35))
            .with_property("category", Id64::new(0x36));

        let cloned = context.clone_element(&element).unwrap();
        assert_eq!(
            cloned.unresolved,
            vec![
                (ReferenceField::Parent, Id64::new(0x35)),
                (ReferenceField::Property("category".into()), Id64::new(0x36)),
            ]
        );
        assert_eq!(cloned.props.parent, None);
        assert_eq!(cloned.props.property("category"), Some(&PropertyValue::Id(Id64::INVALID)));
    }

    #[test]
    fn repository_model_always_maps_to_itself() {
        let (source, target) = repos();
        let mut context = CloneContext::new(&source, &target);
        context.remap_element(Id64::ROOT_SUBJECT, Id64::new(0x80));
        let element = ElementProps::new(classes::SUBJECT, Id64::REPOSITORY_MODEL)
            .with_parent(Id64::ROOT_SUBJECT);
        let cloned = context.clone_element(&element).unwrap();
        assert_eq!(cloned.props.model, Id64::REPOSITORY_MODEL);
        assert_eq!(cloned.props.parent, Some(Id64::new(0x80)));
    }

    #[test]
    fn same_repository_clone_drops_federation_guid() {
        let repo = InMemoryRepository::new();
        let mut context = CloneContext::new(&repo, &repo);
        assert!(!context.is_between_repositories());
        let element = ElementProps::new(classes::SUBJECT, Id64::REPOSITORY_MODEL)
            .with_federation_guid(RepositoryId::new().to_uuid());
        let cloned = context.clone_element(&element).unwrap();
        assert_eq!(cloned.props.federation_guid, None);
    }

    #[test]
    fn clone_relationship_maps_endpoints() {
        let (source, target) = repos();
        let mut context = CloneContext::new(&source, &target);
        context.remap_element(Id64::new(0x30), Id64::new(0x70));
        let relationship =
            RelationshipProps::new(classes::ELEMENT_GROUPS_MEMBERS, Id64::new(0x30), Id64::new(0x31));
        let cloned = context.clone_relationship(&relationship);
        assert_eq!(cloned.props.source_id, Id64::new(0x70));
        assert_eq!(cloned.unresolved.len(), 1);
        assert_eq!(cloned.unresolved[0].1, Id64::new(0x31));
    }

    #[test]
    fn dispose_is_idempotent() {
        let (source, target) = repos();
        let mut context = CloneContext::new(&source, &target);
        context.dispose();
        context.dispose();
        assert!(context.is_disposed());
        assert_eq!(context.find_target_element_id(Id64::ROOT_SUBJECT), Id64::INVALID);
    }
}
