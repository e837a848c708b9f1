//! Callbacks driven by the exporter.

use twinsync_core::{AspectProps, CodeSpec, ElementProps, Id64, ModelProps, RelationshipProps, SchemaDef};

use crate::error::TransformResult;

/// Receives entities from an [`Exporter`](crate::Exporter) in dependency
/// order.
///
/// Every method has a no-op default, so an inspection pass only overrides
/// what it needs. `is_update` is `Some` in change mode (true when the entity
/// existed at the checkpoint) and `None` on full traversals.
pub trait ExportHandler {
    /// Decides whether an element and its subtree are exported.
    fn should_export_element(&mut self, _element: &ElementProps) -> bool {
        true
    }

    /// Called once per source schema.
    fn on_export_schema(&mut self, _schema: &SchemaDef) -> TransformResult<()> {
        Ok(())
    }

    /// Called once per code spec.
    fn on_export_code_spec(&mut self, _code_spec: &CodeSpec, _is_update: Option<bool>) -> TransformResult<()> {
        Ok(())
    }

    /// Called before a model's contents are exported.
    fn on_export_model(&mut self, _model: &ModelProps, _is_update: Option<bool>) -> TransformResult<()> {
        Ok(())
    }

    /// Called after a model's contents (not its sub-models) were exported.
    fn on_model_contents_exported(&mut self, _model: Id64) -> TransformResult<()> {
        Ok(())
    }

    /// Called for an element, before its aspects and children.
    fn on_export_element(&mut self, _element: &ElementProps, _is_update: Option<bool>) -> TransformResult<()> {
        Ok(())
    }

    /// Called for each unique aspect of an exported element.
    fn on_export_element_unique_aspect(
        &mut self,
        _aspect: &AspectProps,
        _is_update: Option<bool>,
    ) -> TransformResult<()> {
        Ok(())
    }

    /// Called once per exported element with all of its multi aspects,
    /// possibly none. Always the last aspect callback for the element. In
    /// change mode the batch is an update when any of its aspects existed at
    /// the checkpoint; an empty batch reports `None`.
    fn on_export_element_multi_aspects(
        &mut self,
        _element: Id64,
        _aspects: &[AspectProps],
        _is_update: Option<bool>,
    ) -> TransformResult<()> {
        Ok(())
    }

    /// Called for a relationship, after all elements.
    fn on_export_relationship(
        &mut self,
        _relationship: &RelationshipProps,
        _is_update: Option<bool>,
    ) -> TransformResult<()> {
        Ok(())
    }

    /// Called in change mode for an element deleted since the checkpoint.
    fn on_delete_element(&mut self, _id: Id64) -> TransformResult<()> {
        Ok(())
    }

    /// Called in change mode for a relationship deleted since the checkpoint.
    fn on_delete_relationship(&mut self, _id: Id64) -> TransformResult<()> {
        Ok(())
    }

    /// Called in change mode for a model deleted since the checkpoint.
    fn on_delete_model(&mut self, _id: Id64) -> TransformResult<()> {
        Ok(())
    }
}
