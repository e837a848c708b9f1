//! Dependency-ordered traversal of a source repository.
//!
//! The exporter never writes to the source. It walks:
//! 1. Schemas
//! 2. Code specs
//! 3. Models, parent model before child model
//! 4. Elements within a model, parent before children, each followed by
//!    its aspects
//! 5. Relationships, after all elements
//!
//! and hands every entity to an [`ExportHandler`].
//!
//! # Change mode
//!
//! With a checkpoint set, only entities modified after the checkpoint are
//! handed to the handler. Unchanged elements are still traversed so their
//! changed children are found, and [`Exporter::export_deletions`] reports
//! entities that existed at the checkpoint and are gone now.

use std::collections::{BTreeSet, HashSet};
use tracing::{debug, trace};
use twinsync_core::{
    classes, net_deletions, AspectKind, AspectProps, ChangeType, CoreError, ElementProps,
    EntityKind, Id64, Repository,
};

use crate::config::ExportOptions;
use crate::error::{TransformError, TransformResult};
use crate::handler::ExportHandler;

/// Counters of what an exporter traversed.
///
/// Entities are counted even when the corresponding callbacks are
/// suppressed by [`ExportOptions`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportStats {
    /// Schemas exported.
    pub schemas: u64,
    /// Code specs exported.
    pub code_specs: u64,
    /// Models exported.
    pub models: u64,
    /// Elements exported.
    pub elements: u64,
    /// Aspects exported.
    pub aspects: u64,
    /// Relationships exported.
    pub relationships: u64,
    /// Delete notifications issued.
    pub deletions: u64,
    /// Elements skipped by exclusion or by the handler's predicate.
    pub skipped_elements: u64,
}

/// Entities inserted after a checkpoint, used for the `is_update` flag.
#[derive(Debug)]
struct ChangeWindow {
    checkpoint: u64,
    inserted: HashSet<(EntityKind, Id64)>,
}

/// Walks a source repository in dependency order.
pub struct Exporter<'a, S: Repository> {
    source: &'a S,
    options: ExportOptions,
    changes: Option<ChangeWindow>,
    skipped: BTreeSet<Id64>,
    stats: ExportStats,
}

impl<'a, S: Repository> Exporter<'a, S> {
    /// Creates an exporter over `source`.
    pub fn new(source: &'a S, options: ExportOptions) -> Self {
        Self {
            source,
            options,
            changes: None,
            skipped: BTreeSet::new(),
            stats: ExportStats::default(),
        }
    }

    /// Returns the source repository.
    pub fn source(&self) -> &'a S {
        self.source
    }

    /// Returns the options.
    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Returns the traversal counters.
    pub fn stats(&self) -> &ExportStats {
        &self.stats
    }

    /// Excludes an element and everything below it from later traversals.
    pub fn exclude_element(&mut self, id: Id64) {
        self.options.excluded_elements.insert(id);
    }

    /// Returns true if the element was skipped by the last traversal, either
    /// directly or as part of a skipped subtree.
    pub fn was_skipped(&self, id: Id64) -> bool {
        self.skipped.contains(&id)
    }

    /// Forgets skipped elements and zeroes the counters.
    pub fn reset(&mut self) {
        self.skipped.clear();
        self.stats = ExportStats::default();
    }

    /// Enters change mode: only entities modified after `checkpoint` are
    /// surfaced.
    pub fn set_change_checkpoint(&mut self, checkpoint: u64) -> TransformResult<()> {
        let inserted = self
            .source
            .changes_since(checkpoint)?
            .into_iter()
            .filter(|e| e.change_type == ChangeType::Insert)
            .map(|e| (e.kind, e.id))
            .collect();
        debug!(checkpoint, "exporter entering change mode");
        self.changes = Some(ChangeWindow {
            checkpoint,
            inserted,
        });
        Ok(())
    }

    /// Leaves change mode.
    pub fn clear_change_checkpoint(&mut self) {
        self.changes = None;
    }

    /// Returns the checkpoint in effect, if any.
    pub fn change_checkpoint(&self) -> Option<u64> {
        self.changes.as_ref().map(|w| w.checkpoint)
    }

    /// Returns `None` when the entity is unchanged since the checkpoint,
    /// otherwise the `is_update` flag to pass to the handler.
    fn change_flag(&self, kind: EntityKind, id: Id64, last_mod: u64) -> Option<Option<bool>> {
        match &self.changes {
            None => Some(None),
            Some(window) if last_mod > window.checkpoint => {
                Some(Some(!window.inserted.contains(&(kind, id))))
            }
            Some(_) => None,
        }
    }

    /// Exports every schema of the source.
    pub fn export_schemas<H: ExportHandler + ?Sized>(&mut self, handler: &mut H) -> TransformResult<()> {
        for schema in self.source.schemas()? {
            trace!(schema = %schema.name, "exporting schema");
            handler.on_export_schema(&schema)?;
            self.stats.schemas += 1;
        }
        Ok(())
    }

    /// Exports every code spec of the source.
    pub fn export_code_specs<H: ExportHandler + ?Sized>(&mut self, handler: &mut H) -> TransformResult<()> {
        for code_spec in self.source.code_specs()? {
            let is_update = self
                .changes
                .as_ref()
                .map(|w| !w.inserted.contains(&(EntityKind::CodeSpec, code_spec.id)));
            handler.on_export_code_spec(&code_spec, is_update)?;
            self.stats.code_specs += 1;
        }
        Ok(())
    }

    /// Exports the whole source: schemas, code specs, the model tree from
    /// the repository model down, relationships, and in change mode the
    /// deletions.
    pub fn export_all<H: ExportHandler + ?Sized>(&mut self, handler: &mut H) -> TransformResult<()> {
        self.export_schemas(handler)?;
        self.export_code_specs(handler)?;
        self.export_model(Id64::REPOSITORY_MODEL, handler)?;
        self.export_relationships(classes::ELEMENT_REFERS_TO_ELEMENTS, handler)?;
        if self.changes.is_some() {
            self.export_deletions(handler)?;
        }
        Ok(())
    }

    /// Exports a model, its contents and then its sub-models.
    pub fn export_model<H: ExportHandler + ?Sized>(&mut self, id: Id64, handler: &mut H) -> TransformResult<()> {
        if self.skipped.contains(&id) {
            return Ok(());
        }
        let model = self
            .source
            .model(id)?
            .ok_or_else(|| CoreError::not_found(EntityKind::Model, id))?;
        if let Some(is_update) = self.change_flag(EntityKind::Model, id, model.last_mod) {
            debug!(model = %id, class = %model.class_name, "exporting model");
            handler.on_export_model(&model, is_update)?;
            self.stats.models += 1;
        }
        self.export_model_contents(id, handler)?;
        self.export_sub_models(id, handler)
    }

    /// Exports the elements of a model, top-level elements first, each
    /// followed by its subtree.
    pub fn export_model_contents<H: ExportHandler + ?Sized>(
        &mut self,
        id: Id64,
        handler: &mut H,
    ) -> TransformResult<()> {
        let ids = self.source.element_ids_in_model(id)?;
        let members: BTreeSet<Id64> = ids.iter().copied().collect();
        for element_id in ids {
            let Some(element) = self.source.element(element_id)? else {
                continue;
            };
            let top_level = element.parent.map_or(true, |parent| !members.contains(&parent));
            if top_level {
                self.export_element_props(&element, handler)?;
            }
        }
        handler.on_model_contents_exported(id)
    }

    /// Exports the models of every element directly in model `id`.
    pub fn export_sub_models<H: ExportHandler + ?Sized>(&mut self, id: Id64, handler: &mut H) -> TransformResult<()> {
        for element_id in self.source.element_ids_in_model(id)? {
            if element_id == id || self.skipped.contains(&element_id) {
                continue;
            }
            if self.source.model(element_id)?.is_some() {
                self.export_model(element_id, handler)?;
            }
        }
        Ok(())
    }

    /// Exports the models of an element's descendants (within its model),
    /// the element itself excluded.
    pub fn export_descendant_sub_models<H: ExportHandler + ?Sized>(
        &mut self,
        id: Id64,
        handler: &mut H,
    ) -> TransformResult<()> {
        for child in self.same_model_children(id)? {
            if self.skipped.contains(&child) {
                continue;
            }
            if self.source.model(child)?.is_some() {
                self.export_model(child, handler)?;
            }
            self.export_descendant_sub_models(child, handler)?;
        }
        Ok(())
    }

    /// Exports one element, its aspects and its subtree.
    pub fn export_element<H: ExportHandler + ?Sized>(&mut self, id: Id64, handler: &mut H) -> TransformResult<()> {
        let element = self
            .source
            .element(id)?
            .ok_or_else(|| CoreError::not_found(EntityKind::Element, id))?;
        self.export_element_props(&element, handler)
    }

    fn export_element_props<H: ExportHandler + ?Sized>(
        &mut self,
        element: &ElementProps,
        handler: &mut H,
    ) -> TransformResult<()> {
        if self.options.excluded_elements.contains(&element.id) || !handler.should_export_element(element) {
            trace!(element = %element.id, "skipping element subtree");
            self.stats.skipped_elements += 1;
            return self.skip_subtree(element.id);
        }
        if let Some(is_update) = self.change_flag(EntityKind::Element, element.id, element.last_mod) {
            self.stats.elements += 1;
            if self.options.visit_elements {
                handler.on_export_element(element, is_update)?;
                self.export_element_aspects(element.id, handler)?;
            }
        }
        self.export_child_elements(element.id, handler)
    }

    /// Exports the children of an element that live in the same model.
    pub fn export_child_elements<H: ExportHandler + ?Sized>(
        &mut self,
        id: Id64,
        handler: &mut H,
    ) -> TransformResult<()> {
        for child in self.same_model_children(id)? {
            self.export_element(child, handler)?;
        }
        Ok(())
    }

    fn same_model_children(&self, id: Id64) -> TransformResult<Vec<Id64>> {
        let Some(parent) = self.source.element(id)? else {
            return Ok(Vec::new());
        };
        let mut children = Vec::new();
        for child in self.source.child_element_ids(id)? {
            if let Some(element) = self.source.element(child)? {
                if element.model == parent.model && child != id {
                    children.push(child);
                }
            }
        }
        Ok(children)
    }

    fn skip_subtree(&mut self, id: Id64) -> TransformResult<()> {
        if !self.skipped.insert(id) {
            return Ok(());
        }
        for child in self.source.child_element_ids(id)? {
            self.skip_subtree(child)?;
        }
        Ok(())
    }

    /// Exports the aspects of an element: each unique aspect, then all multi
    /// aspects in one call.
    pub fn export_element_aspects<H: ExportHandler + ?Sized>(
        &mut self,
        id: Id64,
        handler: &mut H,
    ) -> TransformResult<()> {
        let changes = &self.changes;
        let exported = export_aspects_of(self.source, id, handler, |aspect| {
            changes
                .as_ref()
                .map(|w| !w.inserted.contains(&(EntityKind::Aspect, aspect.id)))
        })?;
        self.stats.aspects += exported as u64;
        Ok(())
    }

    /// Exports relationships of `class_name` and its subclasses whose
    /// endpoints were not skipped.
    pub fn export_relationships<H: ExportHandler + ?Sized>(
        &mut self,
        class_name: &str,
        handler: &mut H,
    ) -> TransformResult<()> {
        for relationship in self.source.relationships(class_name)? {
            let endpoints = [relationship.source_id, relationship.target_id];
            if endpoints
                .iter()
                .any(|id| self.skipped.contains(id) || self.options.excluded_elements.contains(id))
            {
                continue;
            }
            if let Some(is_update) =
                self.change_flag(EntityKind::Relationship, relationship.id, relationship.last_mod)
            {
                self.stats.relationships += 1;
                if self.options.visit_relationships {
                    handler.on_export_relationship(&relationship, is_update)?;
                }
            }
        }
        Ok(())
    }

    /// Issues delete notifications for entities present at the checkpoint
    /// and absent now: relationships first, then elements, then models.
    ///
    /// # Errors
    ///
    /// [`TransformError::InvalidState`] outside change mode.
    pub fn export_deletions<H: ExportHandler + ?Sized>(&mut self, handler: &mut H) -> TransformResult<()> {
        let Some(window) = &self.changes else {
            return Err(TransformError::InvalidState {
                from: "full traversal".into(),
                to: "export deletions".into(),
            });
        };
        let events = self.source.changes_since(window.checkpoint)?;
        let deleted = net_deletions(&events, window.checkpoint);
        debug!(count = deleted.len(), "exporting deletions");

        for kind in [EntityKind::Relationship, EntityKind::Element, EntityKind::Model] {
            for (_, id) in deleted.iter().filter(|(k, _)| *k == kind) {
                match kind {
                    EntityKind::Relationship => handler.on_delete_relationship(*id)?,
                    EntityKind::Element => handler.on_delete_element(*id)?,
                    _ => handler.on_delete_model(*id)?,
                }
                self.stats.deletions += 1;
            }
        }
        Ok(())
    }
}

/// Hands the aspects of `element` to the handler: unique aspects one by
/// one, then every multi aspect in a single call. Returns the number of
/// aspects exported.
pub(crate) fn export_aspects_of<S, H, F>(
    source: &S,
    element: Id64,
    handler: &mut H,
    is_update: F,
) -> TransformResult<usize>
where
    S: Repository + ?Sized,
    H: ExportHandler + ?Sized,
    F: Fn(&AspectProps) -> Option<bool>,
{
    let aspects = source.aspects(element)?;
    let (unique, multi): (Vec<AspectProps>, Vec<AspectProps>) =
        aspects.into_iter().partition(|a| a.kind == AspectKind::Unique);
    for aspect in &unique {
        handler.on_export_element_unique_aspect(aspect, is_update(aspect))?;
    }
    let batch_update = multi.iter().map(&is_update).reduce(|acc, next| match (acc, next) {
        (Some(a), Some(b)) => Some(a || b),
        (a, b) => a.or(b),
    });
    handler.on_export_element_multi_aspects(element, &multi, batch_update.flatten())?;
    Ok(unique.len() + multi.len())
}
