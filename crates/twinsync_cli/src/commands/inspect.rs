//! Inspect command implementation.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use twinsync_core::{Id64, InMemoryRepository, ProvenanceKind, Repository};

/// Snapshot inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Snapshot path.
    pub path: String,
    /// Repository id.
    pub repository_id: String,
    /// Change sequence of the saved state.
    pub change_sequence: u64,
    /// Loaded schemas with their versions.
    pub schemas: Vec<String>,
    /// Number of code specs.
    pub code_spec_count: usize,
    /// Number of models.
    pub model_count: usize,
    /// Number of elements.
    pub element_count: usize,
    /// Number of aspects.
    pub aspect_count: usize,
    /// Number of relationships.
    pub relationship_count: usize,
    /// Provenance scopes (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<ScopeStats>>,
}

/// Provenance held under one scope element.
#[derive(Debug, Serialize)]
pub struct ScopeStats {
    /// Scope element id.
    pub scope: String,
    /// Repository the scope synchronizes from.
    pub source_repository: String,
    /// Element records.
    pub elements: usize,
    /// Relationship records.
    pub relationships: usize,
}

/// Collects the inspection result for a snapshot.
pub fn inspect(path: &Path, show_provenance: bool) -> Result<InspectResult, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No snapshot found at {:?}", path).into());
    }
    let repo = InMemoryRepository::open_snapshot(path)?;

    let scopes = if show_provenance {
        Some(scope_stats(&repo)?)
    } else {
        None
    };
    Ok(InspectResult {
        path: path.display().to_string(),
        repository_id: repo.repository_id().to_string(),
        change_sequence: repo.change_sequence(),
        schemas: repo
            .schemas()?
            .into_iter()
            .map(|s| format!("{} v{}", s.name, s.version))
            .collect(),
        code_spec_count: repo.code_specs()?.len(),
        model_count: repo.model_count(),
        element_count: repo.element_count(),
        aspect_count: repo.aspect_count(),
        relationship_count: repo.relationship_count(),
        scopes,
    })
}

/// Finds scopes through their registration records.
fn scope_stats(repo: &InMemoryRepository) -> Result<Vec<ScopeStats>, Box<dyn std::error::Error>> {
    let mut scopes: BTreeMap<Id64, ScopeStats> = BTreeMap::new();
    for id in repo.element_ids() {
        let records = repo.provenance(id)?;
        let Some(registration) = records.iter().find(|r| r.kind == ProvenanceKind::Scope) else {
            continue;
        };
        let count = |kind: ProvenanceKind| records.iter().filter(|r| r.kind == kind).count();
        scopes.insert(
            id,
            ScopeStats {
                scope: id.to_string(),
                source_repository: registration.source_repository.to_string(),
                elements: count(ProvenanceKind::Element),
                relationships: count(ProvenanceKind::Relationship),
            },
        );
    }
    Ok(scopes.into_values().collect())
}

/// Runs the inspect command.
pub fn run(path: &Path, show_provenance: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, show_provenance)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Snapshot: {}", result.path);
    println!("Repository: {}", result.repository_id);
    println!("Change sequence: {}", result.change_sequence);
    println!();
    println!("Schemas: {}", result.schemas.join(", "));
    println!("Contents:");
    println!("  Code specs:    {}", result.code_spec_count);
    println!("  Models:        {}", result.model_count);
    println!("  Elements:      {}", result.element_count);
    println!("  Aspects:       {}", result.aspect_count);
    println!("  Relationships: {}", result.relationship_count);

    if let Some(scopes) = &result.scopes {
        println!();
        println!("Provenance scopes:");
        if scopes.is_empty() {
            println!("  (none)");
        }
        for scope in scopes {
            println!(
                "  {} <- {}: {} elements, {} relationships",
                scope.scope, scope.source_repository, scope.elements, scope.relationships
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use twinsync_testkit::scenarios;
    use twinsync_transformer::{TransformOptions, Transformer};

    #[test]
    fn missing_snapshot_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(inspect(&dir.path().join("absent.json"), false).is_err());
    }

    #[test]
    fn counts_contents_and_scopes() {
        let dir = TempDir::new().unwrap();
        let plant = scenarios::plant(2);
        let target = InMemoryRepository::new();
        Transformer::new(&plant.repo, &target, TransformOptions::default())
            .process_all()
            .unwrap();
        target.save_changes("synchronized").unwrap();
        let path = dir.path().join("target.json");
        target.save_snapshot(&path).unwrap();

        let result = inspect(&path, true).unwrap();
        assert_eq!(result.element_count, 6);
        assert_eq!(result.relationship_count, 1);
        assert!(result.schemas.iter().any(|s| s == "Plant v1"));

        let scopes = result.scopes.unwrap();
        assert_eq!(scopes.len(), 1);
        assert_eq!(scopes[0].scope, Id64::ROOT_SUBJECT.to_string());
        assert_eq!(scopes[0].source_repository, plant.repo.repository_id().to_string());
        assert_eq!(scopes[0].elements, 4);
        assert_eq!(scopes[0].relationships, 1);
    }
}
