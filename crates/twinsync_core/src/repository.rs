//! The repository collaborator contract.

use uuid::Uuid;

use crate::change_log::ChangeEvent;
use crate::entity::{
    AspectProps, Code, CodeSpec, ElementProps, ModelProps, ProvenanceRecord, RelationshipProps,
};
use crate::error::CoreResult;
use crate::id::{Id64, RepositoryId};
use crate::schema::SchemaDef;

/// A versioned entity store that can act as a synchronization source or
/// target.
///
/// All methods take `&self`: implementations provide their own interior
/// synchronization, so a repository can be borrowed by an exporter and an
/// importer at the same time.
///
/// Writes are visible to subsequent reads immediately but only become
/// durable on [`Repository::save_changes`]. [`Repository::abandon_changes`]
/// discards everything written since the last save.
pub trait Repository {
    /// Returns the id of this repository.
    fn repository_id(&self) -> RepositoryId;

    /// Returns the current change sequence (the last assigned modification marker).
    fn change_sequence(&self) -> u64;

    // === Schemas and metadata ===

    /// Returns all loaded schemas.
    fn schemas(&self) -> CoreResult<Vec<SchemaDef>>;

    /// Imports a batch of schemas, in any order.
    fn import_schemas(&self, schemas: &[SchemaDef]) -> CoreResult<()>;

    /// Returns the navigation (reference-typed) properties of a class,
    /// including inherited ones.
    fn reference_properties(&self, class_name: &str) -> CoreResult<Vec<String>>;

    /// Returns true if `class_name` is `base` or derives from it.
    fn is_subclass_of(&self, class_name: &str, base: &str) -> CoreResult<bool>;

    // === Code specs ===

    /// Returns all code specs.
    fn code_specs(&self) -> CoreResult<Vec<CodeSpec>>;

    /// Returns a code spec by id.
    fn code_spec(&self, id: Id64) -> CoreResult<Option<CodeSpec>>;

    /// Returns a code spec by name.
    fn code_spec_by_name(&self, name: &str) -> CoreResult<Option<CodeSpec>>;

    /// Inserts a code spec and returns its id.
    fn insert_code_spec(&self, code_spec: &CodeSpec) -> CoreResult<Id64>;

    // === Models ===

    /// Returns a model by id.
    fn model(&self, id: Id64) -> CoreResult<Option<ModelProps>>;

    /// Inserts a model for an existing modeled element.
    fn insert_model(&self, model: &ModelProps) -> CoreResult<Id64>;

    /// Updates a model.
    fn update_model(&self, model: &ModelProps) -> CoreResult<()>;

    /// Deletes a model and everything it contains.
    fn delete_model(&self, id: Id64) -> CoreResult<()>;

    // === Elements ===

    /// Returns an element by id.
    fn element(&self, id: Id64) -> CoreResult<Option<ElementProps>>;

    /// Returns the ids of all elements in a model, in ascending order.
    fn element_ids_in_model(&self, model: Id64) -> CoreResult<Vec<Id64>>;

    /// Returns the ids of the children of an element, in ascending order.
    fn child_element_ids(&self, parent: Id64) -> CoreResult<Vec<Id64>>;

    /// Finds an element by its (non-empty) code.
    fn find_element_by_code(&self, code: &Code) -> CoreResult<Option<Id64>>;

    /// Finds an element by federation guid.
    fn find_element_by_federation_guid(&self, guid: Uuid) -> CoreResult<Option<Id64>>;

    /// Inserts an element and returns its id.
    ///
    /// A valid `element.id` is honored if unused; otherwise a new id is assigned.
    fn insert_element(&self, element: &ElementProps) -> CoreResult<Id64>;

    /// Updates an element.
    fn update_element(&self, element: &ElementProps) -> CoreResult<()>;

    /// Deletes an element together with its children, sub-model, aspects,
    /// relationships and provenance.
    fn delete_element(&self, id: Id64) -> CoreResult<()>;

    // === Aspects ===

    /// Returns the aspects owned by an element.
    fn aspects(&self, element: Id64) -> CoreResult<Vec<AspectProps>>;

    /// Inserts an aspect and returns its id.
    fn insert_aspect(&self, aspect: &AspectProps) -> CoreResult<Id64>;

    /// Updates an aspect.
    fn update_aspect(&self, aspect: &AspectProps) -> CoreResult<()>;

    /// Deletes an aspect.
    fn delete_aspect(&self, id: Id64) -> CoreResult<()>;

    // === Relationships ===

    /// Returns a relationship by id.
    fn relationship(&self, id: Id64) -> CoreResult<Option<RelationshipProps>>;

    /// Returns all relationships of a class or its subclasses, in ascending id order.
    fn relationships(&self, class_name: &str) -> CoreResult<Vec<RelationshipProps>>;

    /// Finds the relationship of exactly `class_name` between two elements.
    fn find_relationship(
        &self,
        class_name: &str,
        source_id: Id64,
        target_id: Id64,
    ) -> CoreResult<Option<RelationshipProps>>;

    /// Inserts a relationship and returns its id.
    fn insert_relationship(&self, relationship: &RelationshipProps) -> CoreResult<Id64>;

    /// Updates a relationship.
    fn update_relationship(&self, relationship: &RelationshipProps) -> CoreResult<()>;

    /// Deletes a relationship and its provenance.
    fn delete_relationship(&self, id: Id64) -> CoreResult<()>;

    // === Provenance ===

    /// Returns all provenance records anchored at a scope element.
    fn provenance(&self, scope: Id64) -> CoreResult<Vec<ProvenanceRecord>>;

    /// Inserts a provenance record and returns its id.
    fn insert_provenance(&self, record: &ProvenanceRecord) -> CoreResult<Id64>;

    /// Updates a provenance record.
    fn update_provenance(&self, record: &ProvenanceRecord) -> CoreResult<()>;

    /// Deletes a provenance record.
    fn delete_provenance(&self, id: Id64) -> CoreResult<()>;

    // === Change tracking and transactions ===

    /// Returns logged changes with sequence > `checkpoint`.
    fn changes_since(&self, checkpoint: u64) -> CoreResult<Vec<ChangeEvent>>;

    /// Makes all writes since the last save durable.
    fn save_changes(&self, description: &str) -> CoreResult<()>;

    /// Discards all writes since the last save.
    fn abandon_changes(&self) -> CoreResult<()>;

    /// Returns true if there are writes that have not been saved.
    fn has_unsaved_changes(&self) -> bool;
}
