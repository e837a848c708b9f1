//! Transform command implementation.

use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};
use twinsync_core::{Id64, InMemoryRepository, Repository};
use twinsync_transformer::{DanglingBehavior, TransformOptions, Transformer};

/// Arguments of the transform command.
#[derive(Debug, Clone)]
pub struct TransformRequest {
    /// Source snapshot.
    pub source: PathBuf,
    /// Target snapshot, created if missing.
    pub target: PathBuf,
    /// Provenance scope element; the root subject when absent.
    pub scope: Option<Id64>,
    /// Change sequence to synchronize from; a full run when absent.
    pub since: Option<u64>,
    /// Write dangling references as invalid.
    pub ignore_dangling: bool,
    /// Merge a branch back into its origin.
    pub reverse: bool,
    /// Suppress provenance writes.
    pub no_provenance: bool,
}

impl TransformRequest {
    fn options(&self) -> TransformOptions {
        let mut options = TransformOptions::new()
            .with_target_scope_element_id(self.scope.unwrap_or(Id64::ROOT_SUBJECT))
            .with_reverse_synchronization(self.reverse);
        if self.ignore_dangling {
            options = options.with_dangling_predecessors_behavior(DanglingBehavior::Ignore);
        }
        if self.no_provenance {
            options = options.with_no_provenance(true);
        }
        options
    }
}

/// Transform result.
#[derive(Debug, Serialize)]
pub struct TransformSummary {
    /// Source snapshot path.
    pub source: String,
    /// Target snapshot path.
    pub target: String,
    /// Target change sequence after saving.
    pub target_sequence: u64,
    /// Elements inserted into the target.
    pub elements_inserted: u64,
    /// Elements updated in the target.
    pub elements_updated: u64,
    /// Elements deleted from the target.
    pub elements_deleted: u64,
    /// Relationships inserted, updated or deleted.
    pub relationships_written: u64,
    /// Entities that had to wait for a predecessor.
    pub deferred: u64,
    /// References written as invalid because their element is gone.
    pub dangling_references: u64,
    /// Elements written with invalid references to break a cycle.
    pub cyclic_entities: Vec<String>,
    /// Provenance records inserted or updated.
    pub provenance_written: u64,
}

/// Runs the transform command. On failure the target snapshot is left
/// untouched.
pub fn run(request: &TransformRequest) -> Result<TransformSummary, Box<dyn std::error::Error>> {
    let source = InMemoryRepository::open_snapshot(&request.source)?;
    let target = if request.target.exists() {
        InMemoryRepository::open_snapshot(&request.target)?
    } else {
        info!(path = %request.target.display(), "creating target snapshot");
        InMemoryRepository::new()
    };

    let options = request.options();
    let mut transformer = Transformer::new(&source, &target, options);
    let outcome = match request.since {
        Some(checkpoint) => transformer.process_changes(checkpoint),
        None => transformer.process_all(),
    };
    if let Err(e) = outcome {
        warn!(error = %e, "transform failed, discarding target changes");
        target.abandon_changes()?;
        return Err(e.into());
    }
    let stats = transformer.stats();
    drop(transformer);

    target.save_changes("transform")?;
    target.save_snapshot(&request.target)?;
    if request.reverse && stats.provenance_written > 0 {
        source.save_changes("reverse transform provenance")?;
        source.save_snapshot(&request.source)?;
    }

    let relationships = &stats.import.relationships;
    Ok(TransformSummary {
        source: request.source.display().to_string(),
        target: request.target.display().to_string(),
        target_sequence: target.change_sequence(),
        elements_inserted: stats.import.elements.inserted,
        elements_updated: stats.import.elements.updated,
        elements_deleted: stats.import.elements.deleted,
        relationships_written: relationships.total(),
        deferred: stats.deferred,
        dangling_references: stats.dangling_references,
        cyclic_entities: stats.cyclic_entities.iter().map(Id64::to_string).collect(),
        provenance_written: stats.provenance_written,
    })
}

/// Prints a summary in `format`.
pub fn print(summary: &TransformSummary, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(summary)?);
        }
        _ => {
            println!("Source: {}", summary.source);
            println!("Target: {} (sequence {})", summary.target, summary.target_sequence);
            println!();
            println!("Elements:");
            println!("  Inserted: {}", summary.elements_inserted);
            println!("  Updated:  {}", summary.elements_updated);
            println!("  Deleted:  {}", summary.elements_deleted);
            println!("Relationships written: {}", summary.relationships_written);
            println!("Provenance written:    {}", summary.provenance_written);
            if summary.deferred > 0 {
                println!("Deferred: {}", summary.deferred);
            }
            if summary.dangling_references > 0 {
                println!("Dangling references: {}", summary.dangling_references);
            }
            if !summary.cyclic_entities.is_empty() {
                println!("Cycles broken at: {}", summary.cyclic_entities.join(", "));
            }
        }
    }
    Ok(())
}
