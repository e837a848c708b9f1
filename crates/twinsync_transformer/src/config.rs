//! Configuration for exporting and transforming.

use std::collections::BTreeSet;
use twinsync_core::Id64;

/// What to do with a predecessor that no longer exists in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DanglingBehavior {
    /// Fail the call with
    /// [`TransformError::UnresolvedReference`](crate::TransformError::UnresolvedReference).
    #[default]
    Reject,
    /// Write the reference as the invalid id and continue.
    Ignore,
}

/// Configuration for an [`Exporter`](crate::Exporter).
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Whether element and aspect callbacks are invoked.
    pub visit_elements: bool,
    /// Whether relationship callbacks are invoked.
    pub visit_relationships: bool,
    /// Elements never handed to the handler. Their subtrees and sub-models
    /// are skipped as well.
    pub excluded_elements: BTreeSet<Id64>,
}

impl ExportOptions {
    /// Creates options that visit everything.
    pub fn new() -> Self {
        Self {
            visit_elements: true,
            visit_relationships: true,
            excluded_elements: BTreeSet::new(),
        }
    }

    /// Sets whether element callbacks are invoked.
    pub fn with_visit_elements(mut self, visit: bool) -> Self {
        self.visit_elements = visit;
        self
    }

    /// Sets whether relationship callbacks are invoked.
    pub fn with_visit_relationships(mut self, visit: bool) -> Self {
        self.visit_relationships = visit;
        self
    }

    /// Excludes an element and everything below it.
    pub fn with_excluded_element(mut self, id: Id64) -> Self {
        self.excluded_elements.insert(id);
        self
    }
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for a [`Transformer`](crate::Transformer) session.
#[derive(Debug, Clone)]
pub struct TransformOptions {
    /// Policy for predecessors that no longer exist in the source.
    pub dangling_predecessors_behavior: DanglingBehavior,
    /// Element anchoring this session's provenance. Defaults to the root subject.
    pub target_scope_element_id: Id64,
    /// Whether a branch is being merged back into the repository it came from.
    pub is_reverse_synchronization: bool,
    /// Whether provenance writes are suppressed. `None` means suppressed for
    /// reverse synchronization only.
    pub no_provenance: Option<bool>,
    /// Whether inserted elements and relationships keep their source ids.
    pub preserve_element_ids: bool,
    /// Traversal options handed to the exporter.
    pub export: ExportOptions,
}

impl TransformOptions {
    /// Creates the default options.
    pub fn new() -> Self {
        Self {
            dangling_predecessors_behavior: DanglingBehavior::Reject,
            target_scope_element_id: Id64::ROOT_SUBJECT,
            is_reverse_synchronization: false,
            no_provenance: None,
            preserve_element_ids: false,
            export: ExportOptions::new(),
        }
    }

    /// Sets the dangling predecessor policy.
    pub fn with_dangling_predecessors_behavior(mut self, behavior: DanglingBehavior) -> Self {
        self.dangling_predecessors_behavior = behavior;
        self
    }

    /// Sets the scope element anchoring provenance.
    pub fn with_target_scope_element_id(mut self, scope: Id64) -> Self {
        self.target_scope_element_id = scope;
        self
    }

    /// Marks the session as a reverse synchronization.
    pub fn with_reverse_synchronization(mut self, reverse: bool) -> Self {
        self.is_reverse_synchronization = reverse;
        self
    }

    /// Overrides whether provenance is written.
    pub fn with_no_provenance(mut self, suppress: bool) -> Self {
        self.no_provenance = Some(suppress);
        self
    }

    /// Sets whether inserted entities keep their source ids.
    pub fn with_preserve_element_ids(mut self, preserve: bool) -> Self {
        self.preserve_element_ids = preserve;
        self
    }

    /// Sets the exporter options.
    pub fn with_export_options(mut self, export: ExportOptions) -> Self {
        self.export = export;
        self
    }

    /// Returns true if this session writes no provenance.
    pub fn suppresses_provenance(&self) -> bool {
        self.no_provenance
            .unwrap_or(self.is_reverse_synchronization)
    }
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_options_builder() {
        let options = TransformOptions::new()
            .with_dangling_predecessors_behavior(DanglingBehavior::Ignore)
            .with_target_scope_element_id(Id64::new(0x40))
            .with_preserve_element_ids(true);

        assert_eq!(options.dangling_predecessors_behavior, DanglingBehavior::Ignore);
        assert_eq!(options.target_scope_element_id, Id64::new(0x40));
        assert!(options.preserve_element_ids);
        assert!(!options.is_reverse_synchronization);
    }

    #[test]
    fn provenance_suppressed_for_reverse_by_default() {
        assert!(!TransformOptions::new().suppresses_provenance());
        assert!(TransformOptions::new()
            .with_reverse_synchronization(true)
            .suppresses_provenance());
        assert!(!TransformOptions::new()
            .with_reverse_synchronization(true)
            .with_no_provenance(false)
            .suppresses_provenance());
        assert!(TransformOptions::new()
            .with_no_provenance(true)
            .suppresses_provenance());
    }

    #[test]
    fn export_options_defaults_visit_everything() {
        let options = ExportOptions::default().with_excluded_element(Id64::new(0x25));
        assert!(options.visit_elements);
        assert!(options.visit_relationships);
        assert!(options.excluded_elements.contains(&Id64::new(0x25)));
    }
}
