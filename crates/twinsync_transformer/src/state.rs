//! Transformer state machine and statistics.

use twinsync_core::Id64;

use crate::exporter::ExportStats;
use crate::importer::ImportStats;

/// The current phase of a [`Transformer`](crate::Transformer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransformState {
    /// No call has run yet.
    #[default]
    Idle,
    /// Collecting and importing schemas.
    ProcessingSchemas,
    /// Exporting code specs, models and elements.
    ProcessingModelsAndElements,
    /// Draining the deferred queue.
    ProcessingDeferred,
    /// Exporting relationships and applying deletions.
    ProcessingRelationships,
    /// The last call completed.
    Done,
    /// The last call failed.
    Error,
}

impl TransformState {
    /// Returns true while a call is in flight.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TransformState::ProcessingSchemas
                | TransformState::ProcessingModelsAndElements
                | TransformState::ProcessingDeferred
                | TransformState::ProcessingRelationships
        )
    }

    /// Returns true if a new call may start.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            TransformState::Idle | TransformState::Done | TransformState::Error
        )
    }
}

/// Statistics about a transformer session.
#[derive(Debug, Clone, Default)]
pub struct TransformStats {
    /// Calls that completed.
    pub runs_completed: u64,
    /// Elements and models that had to wait for a predecessor.
    pub deferred: u64,
    /// Deferred entities written later in the session.
    pub deferred_resolved: u64,
    /// References to entities absent from the source, written as invalid.
    pub dangling_references: u64,
    /// Elements written with invalid references to break a predecessor cycle.
    pub cyclic_entities: Vec<Id64>,
    /// Schemas handed to the target in a batch.
    pub schemas_imported: u64,
    /// Provenance records inserted or updated.
    pub provenance_written: u64,
    /// Target writes.
    pub import: ImportStats,
    /// Source traversal counters.
    pub export: ExportStats,
    /// Last error message.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_states_cannot_start() {
        for state in [
            TransformState::ProcessingSchemas,
            TransformState::ProcessingModelsAndElements,
            TransformState::ProcessingDeferred,
            TransformState::ProcessingRelationships,
        ] {
            assert!(state.is_active());
            assert!(!state.can_start());
        }
    }

    #[test]
    fn settled_states_can_start() {
        for state in [TransformState::Idle, TransformState::Done, TransformState::Error] {
            assert!(!state.is_active());
            assert!(state.can_start());
        }
        assert_eq!(TransformState::default(), TransformState::Idle);
    }
}
