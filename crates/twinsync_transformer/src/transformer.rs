//! The transformer: drives an exporter over the source and writes every
//! entity it receives into the target.
//!
//! Each element is written as soon as all of its predecessors exist in the
//! target. Elements that arrive early wait in a deferred queue that is
//! drained after every model's contents and once more, with stuck entries
//! classified, before relationships are processed.

use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, trace, warn};
use twinsync_core::{
    classes, AspectProps, Code, CodeSpec, CoreError, ElementProps, EntityKind, Id64, ModelProps,
    ProvenanceKind, ProvenanceRecord, RelationshipProps, Repository, RepositoryId, SchemaDef,
};

use crate::config::{DanglingBehavior, TransformOptions};
use crate::context::CloneContext;
use crate::deferred::{DeferredEntity, DeferredPayload, DeferredQueue};
use crate::error::{TransformError, TransformResult};
use crate::exporter::{export_aspects_of, Exporter};
use crate::handler::ExportHandler;
use crate::importer::{ImportOptions, Importer};
use crate::predecessors::{Predecessor, ReferenceField};
use crate::state::{TransformState, TransformStats};

/// The root subject (whose model is the repository model) and the
/// dictionary exist in every repository. They are mapped, never written.
fn is_system_element(id: Id64) -> bool {
    id == Id64::ROOT_SUBJECT || id == Id64::DICTIONARY_MODEL
}

/// Handler state of a transformer. Kept apart from the exporter so the
/// exporter can borrow it mutably while traversing.
struct Session<'a, S: Repository, T: Repository> {
    source: &'a S,
    target: &'a T,
    options: TransformOptions,
    context: CloneContext<'a, S, T>,
    importer: Importer<'a, T>,
    queue: DeferredQueue,
    pending_schemas: Vec<SchemaDef>,
    seen_unique: Vec<String>,
    surfaced_elements: HashSet<Id64>,
    surfaced_relationships: HashSet<Id64>,
    target_models: HashSet<Id64>,
    source_presence: HashMap<Id64, bool>,
    provenance: HashMap<(ProvenanceKind, Id64), ProvenanceRecord>,
    initialized: bool,
    stats: TransformStats,
}

impl<'a, S: Repository, T: Repository> Session<'a, S, T> {
    fn new(source: &'a S, target: &'a T, options: TransformOptions) -> Self {
        let importer = Importer::new(
            target,
            ImportOptions {
                preserve_element_ids: options.preserve_element_ids,
            },
        );
        Self {
            source,
            target,
            context: CloneContext::new(source, target),
            importer,
            options,
            queue: DeferredQueue::new(),
            pending_schemas: Vec::new(),
            seen_unique: Vec::new(),
            surfaced_elements: HashSet::new(),
            surfaced_relationships: HashSet::new(),
            target_models: HashSet::new(),
            source_presence: HashMap::new(),
            provenance: HashMap::new(),
            initialized: false,
            stats: TransformStats::default(),
        }
    }

    fn is_reverse(&self) -> bool {
        self.options.is_reverse_synchronization
    }

    fn rejects_dangling(&self) -> bool {
        self.options.dangling_predecessors_behavior == DanglingBehavior::Reject
    }

    /// The repository holding this session's provenance: the target, or
    /// the source when synchronizing in reverse.
    fn provenance_store(&self) -> &dyn Repository {
        if self.is_reverse() {
            return self.source;
        }
        self.target
    }

    /// The repository every record under the scope must name.
    fn expected_repository(&self) -> RepositoryId {
        if self.is_reverse() {
            self.target.repository_id()
        } else {
            self.source.repository_id()
        }
    }

    fn tracks_provenance(&self) -> bool {
        self.context.is_between_repositories()
    }

    fn writes_provenance(&self) -> bool {
        self.tracks_provenance() && !self.options.suppresses_provenance()
    }

    /// Checks the scope and loads the identity map from provenance. Runs
    /// once per session.
    fn initialize(&mut self) -> TransformResult<()> {
        if self.initialized {
            return Ok(());
        }
        if self.tracks_provenance() {
            let scope = self.options.target_scope_element_id;
            let expected = self.expected_repository();
            let records = {
                let store = self.provenance_store();
                if store.element(scope)?.is_none() {
                    return Err(CoreError::not_found(EntityKind::Element, scope).into());
                }
                store.provenance(scope)?
            };
            if let Some(foreign) = records.iter().find(|r| r.source_repository != expected) {
                return Err(TransformError::ProvenanceScopeConflict {
                    scope,
                    existing: foreign.source_repository,
                    incoming: expected,
                });
            }

            let registered = records.iter().any(|r| r.kind == ProvenanceKind::Scope);
            self.load_identity_map(&records);
            self.index_provenance(records);

            if !registered && self.writes_provenance() {
                let record = ProvenanceRecord::scope(scope, expected);
                let id = self
                    .provenance_store()
                    .insert_provenance(&record)
                    .map_err(|e| TransformError::write_failure(EntityKind::Provenance, scope, e))?;
                self.provenance
                    .insert((ProvenanceKind::Scope, scope), ProvenanceRecord { id, ..record });
                info!(%scope, repository = %expected, "registered provenance scope");
            }
        }
        self.initialized = true;
        Ok(())
    }

    fn load_identity_map(&mut self, records: &[ProvenanceRecord]) {
        let reverse = self.is_reverse();
        for record in records {
            let Some(identifier) = record.source_id() else {
                continue;
            };
            let (source_id, target_id) = if reverse {
                (record.entity, identifier)
            } else {
                (identifier, record.entity)
            };
            match record.kind {
                ProvenanceKind::Element => self.context.remap_element(source_id, target_id),
                ProvenanceKind::Relationship => self.context.remap_relationship(source_id, target_id),
                ProvenanceKind::Scope => {}
            }
        }
        debug!(
            elements = self.context.mapped_element_count(),
            records = records.len(),
            "loaded identity map from provenance"
        );
    }

    fn index_provenance(&mut self, records: Vec<ProvenanceRecord>) {
        self.provenance = records.into_iter().map(|r| ((r.kind, r.entity), r)).collect();
    }

    /// Re-reads provenance after deletions, which cascade to records.
    fn reload_provenance(&mut self) -> TransformResult<()> {
        if !self.tracks_provenance() {
            return Ok(());
        }
        let records = self
            .provenance_store()
            .provenance(self.options.target_scope_element_id)?;
        self.index_provenance(records);
        Ok(())
    }

    /// Inserts or updates the record linking a source entity to its target
    /// counterpart. Unchanged records are not rewritten.
    fn record_provenance(
        &mut self,
        kind: ProvenanceKind,
        source_id: Id64,
        target_id: Id64,
        version: u64,
    ) -> TransformResult<()> {
        if !self.writes_provenance() {
            return Ok(());
        }
        let scope = self.options.target_scope_element_id;
        let repository = self.expected_repository();
        let (entity, identifier) = if self.is_reverse() {
            (source_id, target_id)
        } else {
            (target_id, source_id)
        };
        let record = match kind {
            ProvenanceKind::Relationship => {
                ProvenanceRecord::relationship(scope, entity, identifier, repository, version)
            }
            _ => ProvenanceRecord::element(scope, entity, identifier, repository, version),
        };

        let stored = match self.provenance.get(&(kind, entity)) {
            Some(existing) if existing.identifier == record.identifier && existing.version == record.version => {
                return Ok(());
            }
            Some(existing) => {
                let updated = ProvenanceRecord {
                    id: existing.id,
                    ..record
                };
                self.provenance_store()
                    .update_provenance(&updated)
                    .map_err(|e| TransformError::write_failure(EntityKind::Provenance, updated.id, e))?;
                updated
            }
            None => {
                let id = self
                    .provenance_store()
                    .insert_provenance(&record)
                    .map_err(|e| TransformError::write_failure(EntityKind::Provenance, entity, e))?;
                ProvenanceRecord { id, ..record }
            }
        };
        self.provenance.insert((kind, entity), stored);
        self.stats.provenance_written += 1;
        Ok(())
    }

    /// Clears per-call caches; the source or target may have changed
    /// between calls.
    fn refresh_caches(&mut self) {
        self.source_presence.clear();
        self.target_models.clear();
    }

    /// Forgets what the previous traversal surfaced.
    fn begin_run(&mut self) {
        self.surfaced_elements.clear();
        self.surfaced_relationships.clear();
        self.seen_unique.clear();
    }

    fn exists_in_source(&mut self, id: Id64) -> TransformResult<bool> {
        if let Some(present) = self.source_presence.get(&id) {
            return Ok(*present);
        }
        let present = self.source.element(id)?.is_some();
        self.source_presence.insert(id, present);
        Ok(present)
    }

    fn target_has_model(&mut self, id: Id64) -> TransformResult<bool> {
        if id == Id64::REPOSITORY_MODEL || self.target_models.contains(&id) {
            return Ok(true);
        }
        let exists = self.target.model(id)?.is_some();
        if exists {
            self.target_models.insert(id);
        }
        Ok(exists)
    }

    fn is_resolved(&mut self, predecessor: &Predecessor) -> TransformResult<bool> {
        match predecessor.field {
            ReferenceField::Model => {
                let mapped = self.context.find_target_model_id(predecessor.id);
                Ok(mapped.is_valid()
                    && (self.queue.is_resolved(EntityKind::Model, predecessor.id)
                        || self.target_has_model(mapped)?))
            }
            _ => Ok(self.context.find_target_element_id(predecessor.id).is_valid()),
        }
    }

    /// Returns the predecessors the element still waits on. Dangling ones
    /// fail the call under [`DanglingBehavior::Reject`] and are dropped
    /// otherwise.
    fn pending_predecessors(&mut self, element: &ElementProps) -> TransformResult<BTreeSet<Id64>> {
        let mut pending = BTreeSet::new();
        for predecessor in self.context.predecessors(element)? {
            if self.is_resolved(&predecessor)? {
                continue;
            }
            if self.exists_in_source(predecessor.id)? {
                pending.insert(predecessor.id);
            } else if self.rejects_dangling() {
                return Err(TransformError::UnresolvedReference {
                    entity: element.id,
                    missing: predecessor.id,
                });
            }
        }
        Ok(pending)
    }

    fn import_code_spec(&mut self, code_spec: &CodeSpec) -> TransformResult<()> {
        let target_id = self.importer.import_code_spec(code_spec)?;
        self.context.remap_code_spec_id(code_spec.id, target_id);
        Ok(())
    }

    /// Imports the code spec of an element that arrives before code specs
    /// were processed.
    fn ensure_code_spec(&mut self, source_id: Id64) -> TransformResult<()> {
        if !source_id.is_valid() || self.context.find_target_code_spec_id(source_id).is_valid() {
            return Ok(());
        }
        let code_spec = self
            .source
            .code_spec(source_id)?
            .ok_or_else(|| TransformError::CodeSpecNotFound(source_id.to_string()))?;
        self.import_code_spec(&code_spec)
    }

    /// Clones and imports an element, writing unresolved references as
    /// invalid. Returns `None` if the containing model is unavailable.
    fn write_element(&mut self, element: &ElementProps) -> TransformResult<Option<Id64>> {
        self.ensure_code_spec(element.code.spec)?;
        let cloned = self.context.clone_element(element)?;
        let mut props = cloned.props;
        for (field, id) in &cloned.unresolved {
            if *field == ReferenceField::Model {
                warn!(element = %element.id, model = %id, "containing model unavailable, element not written");
                return Ok(None);
            }
            if self.exists_in_source(*id)? {
                debug!(element = %element.id, %field, missing = %id, "unexported reference written as invalid");
            } else {
                self.stats.dangling_references += 1;
                warn!(element = %element.id, %field, missing = %id, "dangling reference written as invalid");
            }
            if *field == ReferenceField::CodeScope {
                props.code = Code::empty();
            }
        }
        if self.options.preserve_element_ids && !props.id.is_valid() {
            props.id = element.id;
        }

        let target_id = self.importer.import_element(&props)?;
        self.context.remap_element(element.id, target_id);
        self.queue.mark_resolved(EntityKind::Element, element.id);
        self.record_provenance(ProvenanceKind::Element, element.id, target_id, element.last_mod)?;
        trace!(source = %element.id, target = %target_id, "element written");
        Ok(Some(target_id))
    }

    fn write_model(&mut self, model: &ModelProps) -> TransformResult<()> {
        let cloned = self.context.clone_model(model);
        let target_id = self.importer.import_model(&cloned.props)?;
        self.target_models.insert(target_id);
        self.queue.mark_resolved(EntityKind::Model, model.id);
        Ok(())
    }

    /// Exports the aspects of an element written after the exporter passed it.
    fn import_aspects_of(&mut self, element: Id64) -> TransformResult<()> {
        let source = self.source;
        export_aspects_of(source, element, self, |_| None)?;
        Ok(())
    }

    fn clone_aspect(&mut self, aspect: &AspectProps, owner: Id64) -> TransformResult<AspectProps> {
        let cloned = self.context.clone_aspect(aspect, owner)?;
        for (field, id) in &cloned.unresolved {
            if self.exists_in_source(*id)? {
                debug!(aspect = %aspect.id, %field, missing = %id, "unwritten reference written as invalid");
            } else if self.rejects_dangling() {
                return Err(TransformError::UnresolvedReference {
                    entity: aspect.element,
                    missing: *id,
                });
            } else {
                self.stats.dangling_references += 1;
                warn!(aspect = %aspect.id, %field, missing = %id, "dangling reference written as invalid");
            }
        }
        Ok(cloned.props)
    }

    /// Writes a deferred entity if it no longer waits on anything, otherwise
    /// hands it back with its current wait set.
    fn write_deferred(&mut self, entry: DeferredEntity) -> TransformResult<Option<DeferredEntity>> {
        match entry.payload {
            DeferredPayload::Element(element) => {
                let pending = self.pending_predecessors(&element)?;
                if !pending.is_empty() {
                    return Ok(Some(DeferredEntity::element(element, pending)));
                }
                if self.write_element(&element)?.is_some() {
                    self.import_aspects_of(element.id)?;
                }
                self.stats.deferred_resolved += 1;
                Ok(None)
            }
            DeferredPayload::Model(model) => {
                if !self.context.find_target_element_id(model.id).is_valid() {
                    return Ok(Some(DeferredEntity::model(model)));
                }
                self.write_model(&model)?;
                self.stats.deferred_resolved += 1;
                Ok(None)
            }
        }
    }

    /// Writes a stuck entity with its unresolved references invalid.
    fn force_write(&mut self, entry: DeferredEntity) -> TransformResult<()> {
        match entry.payload {
            DeferredPayload::Element(element) => {
                if self.write_element(&element)?.is_some() {
                    self.import_aspects_of(element.id)?;
                    self.stats.deferred_resolved += 1;
                }
            }
            DeferredPayload::Model(model) => {
                if self.context.find_target_element_id(model.id).is_valid() {
                    self.write_model(&model)?;
                    self.stats.deferred_resolved += 1;
                } else {
                    warn!(model = %model.id, "modeled element was not exported, model not written");
                }
            }
        }
        Ok(())
    }

    /// Repeats passes over the queue until one makes no progress.
    fn drain_ready(&mut self) -> TransformResult<()> {
        loop {
            let entries = self.queue.take_all();
            if entries.is_empty() {
                return Ok(());
            }
            let before = entries.len();
            for entry in entries {
                if let Some(waiting) = self.write_deferred(entry)? {
                    self.queue.push(waiting);
                }
            }
            if self.queue.len() == before {
                return Ok(());
            }
        }
    }

    /// Drains the queue. A final drain also settles entries that can never
    /// resolve on their own.
    fn drain(&mut self, final_pass: bool) -> TransformResult<()> {
        self.drain_ready()?;
        if final_pass {
            self.settle_stuck()?;
        }
        Ok(())
    }

    /// Entries waiting only on entities outside the queue wait on elements
    /// that were filtered out; they are written with those references
    /// invalid. When every entry waits on another queued entry, one entry on
    /// a wait cycle is forced and the rest drain behind it.
    fn settle_stuck(&mut self) -> TransformResult<()> {
        while !self.queue.is_empty() {
            let (blocked, free) = self.queue.take_partitioned();
            for entry in blocked {
                self.queue.push(entry);
            }
            let forced = if free.is_empty() { self.break_cycle()? } else { free };
            for entry in forced {
                self.force_write(entry)?;
            }
            self.drain_ready()?;
        }
        Ok(())
    }

    fn break_cycle(&mut self) -> TransformResult<Vec<DeferredEntity>> {
        let members = self.queue.cycle_members();
        let entities: Vec<Id64> = members
            .iter()
            .map(|(_, id)| *id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if self.rejects_dangling() {
            return Err(TransformError::PredecessorCycle { entities });
        }

        let chosen = members
            .iter()
            .find(|(kind, _)| *kind == EntityKind::Element)
            .or_else(|| members.first())
            .and_then(|key| self.queue.remove(*key));
        let Some(chosen) = chosen else {
            return Ok(self.queue.take_all());
        };
        warn!(
            entity = %chosen.source_id(),
            cycle = ?entities,
            "breaking predecessor cycle, references written as invalid"
        );
        self.stats.cyclic_entities.push(chosen.source_id());
        Ok(vec![chosen])
    }

    fn flush_schemas(&mut self) -> TransformResult<()> {
        let batch = std::mem::take(&mut self.pending_schemas);
        if batch.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = batch.iter().map(|s| s.name.as_str()).collect();
        debug!(schemas = ?names, "importing schema batch");
        self.target
            .import_schemas(&batch)
            .map_err(|e| TransformError::SchemaImportFailure(e.to_string()))?;
        self.stats.schemas_imported += batch.len() as u64;
        Ok(())
    }

    /// Deletes provenance-tagged target entities that this run did not
    /// surface and whose source entity is gone.
    fn delete_unsurfaced(&mut self) -> TransformResult<()> {
        if !self.tracks_provenance() || self.is_reverse() {
            return Ok(());
        }
        let mut records: Vec<ProvenanceRecord> = self.provenance.values().cloned().collect();
        records.sort_by_key(|r| r.id);

        let mut deleted = 0u64;
        for record in records.iter().filter(|r| r.kind == ProvenanceKind::Relationship) {
            let Some(source_id) = record.source_id() else {
                continue;
            };
            if self.surfaced_relationships.contains(&source_id) || self.source.relationship(source_id)?.is_some() {
                continue;
            }
            if self.importer.delete_relationship(record.entity)? {
                deleted += 1;
            }
            self.context.remove_relationship(source_id);
        }
        for record in records.iter().filter(|r| r.kind == ProvenanceKind::Element) {
            let Some(source_id) = record.source_id() else {
                continue;
            };
            if is_system_element(record.entity)
                || self.surfaced_elements.contains(&source_id)
                || self.source.element(source_id)?.is_some()
            {
                continue;
            }
            if self.importer.delete_element(record.entity)? {
                deleted += 1;
            }
            self.context.remove_element(source_id);
        }
        if deleted > 0 {
            info!(deleted, "deleted target entities whose source is gone");
        }
        self.reload_provenance()
    }

    fn dispose(&mut self) {
        self.context.dispose();
        self.queue.clear();
        self.pending_schemas.clear();
        self.seen_unique.clear();
        self.surfaced_elements.clear();
        self.surfaced_relationships.clear();
        self.target_models.clear();
        self.source_presence.clear();
        self.provenance.clear();
    }
}

impl<'a, S: Repository, T: Repository> ExportHandler for Session<'a, S, T> {
    fn on_export_schema(&mut self, schema: &SchemaDef) -> TransformResult<()> {
        self.pending_schemas.push(schema.clone());
        Ok(())
    }

    fn on_export_code_spec(&mut self, code_spec: &CodeSpec, _is_update: Option<bool>) -> TransformResult<()> {
        self.import_code_spec(code_spec)
    }

    fn on_export_model(&mut self, model: &ModelProps, _is_update: Option<bool>) -> TransformResult<()> {
        if is_system_element(model.id) {
            let mapped = self.context.find_target_model_id(model.id);
            self.target_models.insert(mapped);
            return Ok(());
        }
        if self.context.find_target_element_id(model.id).is_valid() {
            return self.write_model(model);
        }
        debug!(model = %model.id, "deferring model until its modeled element is written");
        if self.queue.push(DeferredEntity::model(model.clone())) {
            self.stats.deferred += 1;
        }
        Ok(())
    }

    fn on_model_contents_exported(&mut self, _model: Id64) -> TransformResult<()> {
        self.drain(false)
    }

    fn on_export_element(&mut self, element: &ElementProps, _is_update: Option<bool>) -> TransformResult<()> {
        self.surfaced_elements.insert(element.id);
        if is_system_element(element.id) {
            return Ok(());
        }
        let pending = self.pending_predecessors(element)?;
        if pending.is_empty() {
            self.write_element(element)?;
            return Ok(());
        }
        debug!(element = %element.id, waiting_on = ?pending, "deferring element");
        if self.queue.push(DeferredEntity::element(element.clone(), pending)) {
            self.stats.deferred += 1;
        }
        Ok(())
    }

    fn on_export_element_unique_aspect(
        &mut self,
        aspect: &AspectProps,
        _is_update: Option<bool>,
    ) -> TransformResult<()> {
        let owner = self.context.find_target_element_id(aspect.element);
        if !owner.is_valid() {
            return Ok(());
        }
        let props = self.clone_aspect(aspect, owner)?;
        self.importer.import_element_unique_aspect(&props)?;
        self.seen_unique.push(aspect.class_name.clone());
        Ok(())
    }

    fn on_export_element_multi_aspects(
        &mut self,
        element: Id64,
        aspects: &[AspectProps],
        _is_update: Option<bool>,
    ) -> TransformResult<()> {
        let seen = std::mem::take(&mut self.seen_unique);
        let owner = self.context.find_target_element_id(element);
        if !owner.is_valid() {
            return Ok(());
        }
        let mut cloned = Vec::with_capacity(aspects.len());
        for aspect in aspects {
            cloned.push(self.clone_aspect(aspect, owner)?);
        }
        self.importer.import_element_multi_aspects(owner, &cloned)?;
        self.importer.prune_unique_aspects(owner, &seen)
    }

    fn on_export_relationship(
        &mut self,
        relationship: &RelationshipProps,
        _is_update: Option<bool>,
    ) -> TransformResult<()> {
        self.surfaced_relationships.insert(relationship.id);
        let cloned = self.context.clone_relationship(relationship);
        for (_, endpoint) in &cloned.unresolved {
            if self.exists_in_source(*endpoint)? {
                trace!(relationship = %relationship.id, %endpoint, "endpoint not exported, relationship skipped");
            } else if self.rejects_dangling() {
                return Err(TransformError::UnresolvedReference {
                    entity: relationship.id,
                    missing: *endpoint,
                });
            } else {
                self.stats.dangling_references += 1;
                warn!(relationship = %relationship.id, %endpoint, "dangling endpoint, relationship skipped");
            }
        }
        if !cloned.is_complete() {
            return Ok(());
        }

        let mut props = cloned.props;
        if self.options.preserve_element_ids && !props.id.is_valid() {
            props.id = relationship.id;
        }
        let target_id = self.importer.import_relationship(&props)?;
        self.context.remap_relationship(relationship.id, target_id);
        self.record_provenance(
            ProvenanceKind::Relationship,
            relationship.id,
            target_id,
            relationship.last_mod,
        )
    }

    fn on_delete_element(&mut self, id: Id64) -> TransformResult<()> {
        let target_id = self.context.find_target_element_id(id);
        if !target_id.is_valid() || is_system_element(target_id) {
            return Ok(());
        }
        self.importer.delete_element(target_id)?;
        self.context.remove_element(id);
        self.reload_provenance()
    }

    fn on_delete_relationship(&mut self, id: Id64) -> TransformResult<()> {
        let target_id = self.context.find_target_relationship_id(id);
        if !target_id.is_valid() {
            return Ok(());
        }
        self.importer.delete_relationship(target_id)?;
        self.context.remove_relationship(id);
        self.reload_provenance()
    }

    fn on_delete_model(&mut self, id: Id64) -> TransformResult<()> {
        let target_id = self.context.find_target_model_id(id);
        if !target_id.is_valid() || is_system_element(target_id) {
            return Ok(());
        }
        self.importer.delete_model(target_id)?;
        self.target_models.remove(&target_id);
        self.reload_provenance()
    }
}

/// Synchronizes a target repository from a source repository.
///
/// A transformer is a session: its identity map, deferred queue and
/// statistics persist across calls until it is disposed. Calls run one at
/// a time and move the transformer through [`TransformState`].
///
/// # Example
///
/// ```
/// use twinsync_core::{InMemoryRepository, Repository};
/// use twinsync_transformer::{TransformOptions, Transformer};
///
/// let source = InMemoryRepository::new();
/// let target = InMemoryRepository::new();
/// let mut transformer = Transformer::new(&source, &target, TransformOptions::default());
/// transformer.process_all()?;
/// target.save_changes("initial synchronization")?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Transformer<'a, S: Repository, T: Repository> {
    exporter: Exporter<'a, S>,
    session: Session<'a, S, T>,
    state: TransformState,
    disposed: bool,
}

impl<'a, S: Repository, T: Repository> Transformer<'a, S, T> {
    /// Creates a transformer from `source` into `target`.
    pub fn new(source: &'a S, target: &'a T, options: TransformOptions) -> Self {
        info!(
            source = %source.repository_id(),
            target = %target.repository_id(),
            reverse = options.is_reverse_synchronization,
            scope = %options.target_scope_element_id,
            "created transformer"
        );
        Self {
            exporter: Exporter::new(source, options.export.clone()),
            session: Session::new(source, target, options),
            state: TransformState::Idle,
            disposed: false,
        }
    }

    /// Returns the session options.
    pub fn options(&self) -> &TransformOptions {
        &self.session.options
    }

    /// Returns the current state.
    pub fn state(&self) -> TransformState {
        self.state
    }

    /// Returns the session statistics, including importer and exporter
    /// counters.
    pub fn stats(&self) -> TransformStats {
        let mut stats = self.session.stats.clone();
        stats.import = self.session.importer.stats().clone();
        stats.export = self.exporter.stats().clone();
        stats
    }

    /// Returns the identity map.
    pub fn context(&self) -> &CloneContext<'a, S, T> {
        &self.session.context
    }

    /// Returns the identity map for manual seeding, e.g. code spec renames.
    pub fn context_mut(&mut self) -> &mut CloneContext<'a, S, T> {
        &mut self.session.context
    }

    /// Excludes a source element and its subtree from every later traversal.
    pub fn exclude_element(&mut self, id: Id64) {
        self.exporter.exclude_element(id);
    }

    /// Returns the number of entities waiting in the deferred queue.
    pub fn deferred_count(&self) -> usize {
        self.session.queue.len()
    }

    /// Returns true once [`Transformer::dispose`] ran.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn set_phase(&mut self, state: TransformState) {
        trace!(from = ?self.state, to = ?state, "transformer phase");
        self.state = state;
    }

    fn run<F>(&mut self, operation: &str, body: F) -> TransformResult<()>
    where
        F: FnOnce(&mut Self) -> TransformResult<()>,
    {
        if self.disposed {
            return Err(TransformError::Disposed);
        }
        if !self.state.can_start() {
            return Err(TransformError::InvalidState {
                from: format!("{:?}", self.state),
                to: operation.into(),
            });
        }
        debug!(operation, "transformer call started");
        self.session.refresh_caches();
        let result = self.session.initialize().and_then(|()| body(self));
        match &result {
            Ok(()) => {
                self.state = TransformState::Done;
                self.session.stats.runs_completed += 1;
                info!(operation, "transformer call completed");
            }
            Err(e) => {
                self.state = TransformState::Error;
                self.session.stats.last_error = Some(e.to_string());
                warn!(operation, error = %e, "transformer call failed");
            }
        }
        result
    }

    fn begin_run(&mut self) {
        self.exporter.reset();
        self.session.begin_run();
    }

    fn schema_phase(&mut self) -> TransformResult<()> {
        self.set_phase(TransformState::ProcessingSchemas);
        self.exporter.export_schemas(&mut self.session)?;
        self.session.flush_schemas()
    }

    /// Everything after schemas, for a full or a change-mode traversal.
    fn content_phases(&mut self) -> TransformResult<()> {
        self.set_phase(TransformState::ProcessingModelsAndElements);
        self.exporter.export_code_specs(&mut self.session)?;
        self.exporter.export_model(Id64::REPOSITORY_MODEL, &mut self.session)?;
        self.set_phase(TransformState::ProcessingDeferred);
        self.session.drain(true)?;
        self.set_phase(TransformState::ProcessingRelationships);
        self.exporter
            .export_relationships(classes::ELEMENT_REFERS_TO_ELEMENTS, &mut self.session)
    }

    /// Imports all source schemas into the target as one batch.
    pub fn process_schemas(&mut self) -> TransformResult<()> {
        self.run("process schemas", Self::schema_phase)
    }

    /// Maps every source code spec by name, inserting missing ones.
    pub fn process_code_specs(&mut self) -> TransformResult<()> {
        self.run("process code specs", |t| {
            t.set_phase(TransformState::ProcessingModelsAndElements);
            t.exporter.export_code_specs(&mut t.session)
        })
    }

    /// Synchronizes the whole source, then deletes target entities whose
    /// source is gone.
    pub fn process_all(&mut self) -> TransformResult<()> {
        self.run("process all", |t| {
            t.begin_run();
            t.schema_phase()?;
            t.content_phases()?;
            t.session.delete_unsurfaced()
        })
    }

    /// Synchronizes only what changed in the source after `checkpoint`,
    /// deletions included.
    pub fn process_changes(&mut self, checkpoint: u64) -> TransformResult<()> {
        self.run("process changes", |t| {
            t.begin_run();
            t.exporter.set_change_checkpoint(checkpoint)?;
            let result = t
                .schema_phase()
                .and_then(|()| t.content_phases())
                .and_then(|()| t.exporter.export_deletions(&mut t.session));
            t.exporter.clear_change_checkpoint();
            result
        })
    }

    /// Maps `source_subject` onto `target_subject` and synchronizes the
    /// subject's child elements and their sub-models beneath it.
    ///
    /// Deferred entities are drained as far as possible; call
    /// [`Transformer::process_deferred_elements`] to settle the rest.
    pub fn process_subject(&mut self, source_subject: Id64, target_subject: Id64) -> TransformResult<()> {
        self.run("process subject", |t| {
            t.begin_run();
            t.session.context.remap_element(source_subject, target_subject);
            t.set_phase(TransformState::ProcessingModelsAndElements);
            t.exporter.export_child_elements(source_subject, &mut t.session)?;
            t.exporter
                .export_descendant_sub_models(source_subject, &mut t.session)?;
            t.set_phase(TransformState::ProcessingDeferred);
            t.session.drain(false)
        })
    }

    /// Synchronizes one model, its contents and its sub-models.
    pub fn process_model(&mut self, model: Id64) -> TransformResult<()> {
        self.run("process model", |t| {
            t.set_phase(TransformState::ProcessingModelsAndElements);
            t.exporter.export_model(model, &mut t.session)
        })
    }

    /// Synchronizes one element and its subtree.
    pub fn process_element(&mut self, element: Id64) -> TransformResult<()> {
        self.run("process element", |t| {
            t.set_phase(TransformState::ProcessingModelsAndElements);
            t.exporter.export_element(element, &mut t.session)
        })
    }

    /// Drains the deferred queue and settles entries that cannot resolve:
    /// those waiting on filtered elements are written with the reference
    /// invalid, cycles are handled by the dangling policy.
    pub fn process_deferred_elements(&mut self) -> TransformResult<()> {
        self.run("process deferred elements", |t| {
            t.set_phase(TransformState::ProcessingDeferred);
            t.session.drain(true)
        })
    }

    /// Synchronizes relationships of `class_name` and its subclasses.
    pub fn process_relationships(&mut self, class_name: &str) -> TransformResult<()> {
        self.run("process relationships", |t| {
            t.set_phase(TransformState::ProcessingRelationships);
            t.exporter.export_relationships(class_name, &mut t.session)
        })
    }

    /// Releases the identity map, queue and caches. Later calls fail with
    /// [`TransformError::Disposed`].
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.session.dispose();
        self.exporter.reset();
        self.disposed = true;
        debug!("transformer disposed");
    }
}

impl<'a, S: Repository, T: Repository> Drop for Transformer<'a, S, T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinsync_core::InMemoryRepository;

    #[test]
    fn empty_source_registers_scope_only() {
        let source = InMemoryRepository::new();
        let target = InMemoryRepository::new();
        let mut transformer = Transformer::new(&source, &target, TransformOptions::default());
        transformer.process_all().unwrap();

        assert_eq!(transformer.state(), TransformState::Done);
        assert_eq!(target.element_count(), source.element_count());
        let records = target.provenance(Id64::ROOT_SUBJECT).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, ProvenanceKind::Scope);
        assert_eq!(records[0].source_repository, source.repository_id());
    }

    #[test]
    fn disposed_transformer_rejects_calls() {
        let source = InMemoryRepository::new();
        let target = InMemoryRepository::new();
        let mut transformer = Transformer::new(&source, &target, TransformOptions::default());
        transformer.dispose();
        transformer.dispose();
        assert!(transformer.is_disposed());
        assert!(matches!(transformer.process_all(), Err(TransformError::Disposed)));
        assert!(transformer.context().is_disposed());
    }

    #[test]
    fn missing_scope_element_fails_the_call() {
        let source = InMemoryRepository::new();
        let target = InMemoryRepository::new();
        let options = TransformOptions::default().with_target_scope_element_id(Id64::new(0x999));
        let mut transformer = Transformer::new(&source, &target, options);

        let err = transformer.process_all().unwrap_err();
        assert!(matches!(err, TransformError::Repository(ref e) if e.is_not_found()));
        assert_eq!(transformer.state(), TransformState::Error);
        assert!(transformer.stats().last_error.is_some());
    }

    #[test]
    fn same_repository_writes_no_provenance() {
        let repo = InMemoryRepository::new();
        let mut transformer = Transformer::new(&repo, &repo, TransformOptions::default());
        transformer.process_schemas().unwrap();
        assert!(repo.provenance(Id64::ROOT_SUBJECT).unwrap().is_empty());
    }
}
