//! Test fixtures and repository helpers.
//!
//! Provides convenience functions for setting up repositories
//! and common synchronization scenarios. Helpers panic on failure, which is
//! what a test wants.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use twinsync_core::{
    classes, AspectKind, AspectProps, Code, CodeSpec, ElementProps, Id64, InMemoryRepository,
    ModelProps, PropertyValue, RelationshipProps, Repository,
};

/// Code spec used for partition codes.
pub const PARTITION_CODE_SPEC: &str = "BisCore:InformationPartitionElement";

/// Code spec used for category codes.
pub const CATEGORY_CODE_SPEC: &str = "BisCore:SpatialCategory";

/// Code spec used for equipment tags.
pub const TAG_CODE_SPEC: &str = "Plant:Tag";

/// A test repository with an optional snapshot directory.
pub struct TestRepository {
    /// The repository instance.
    pub repo: InMemoryRepository,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestRepository {
    /// Creates a new in-memory test repository.
    pub fn memory() -> Self {
        Self {
            repo: InMemoryRepository::new(),
            _temp_dir: None,
        }
    }

    /// Creates a test repository with a temporary directory for snapshots.
    pub fn with_snapshot_dir() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        Self {
            repo: InMemoryRepository::new(),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the snapshot path, None without a snapshot directory.
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self._temp_dir
            .as_ref()
            .map(|d| d.path().join("repository.json"))
    }

    /// Saves the committed state and opens it again as a new repository.
    pub fn reopen(&self) -> InMemoryRepository {
        let path = self
            .snapshot_path()
            .expect("Repository should have a snapshot directory");
        self.repo
            .save_snapshot(&path)
            .expect("Failed to save snapshot");
        InMemoryRepository::open_snapshot(&path).expect("Failed to open snapshot")
    }
}

impl std::ops::Deref for TestRepository {
    type Target = InMemoryRepository;

    fn deref(&self) -> &Self::Target {
        &self.repo
    }
}

/// Runs a test with a fresh source and target repository.
///
/// # Example
///
/// ```rust
/// use twinsync_testkit::with_repositories;
/// use twinsync_core::Repository;
///
/// with_repositories(|source, target| {
///     assert_ne!(source.repository_id(), target.repository_id());
/// });
/// ```
pub fn with_repositories<F, R>(f: F) -> R
where
    F: FnOnce(&InMemoryRepository, &InMemoryRepository) -> R,
{
    let source = TestRepository::memory();
    let target = TestRepository::memory();
    f(&source, &target)
}

/// Runs a test with a temporary directory for snapshot files.
pub fn with_snapshot_dir<F, R>(f: F) -> R
where
    F: FnOnce(&Path) -> R,
{
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    f(temp_dir.path())
}

/// Reads a snapshot file as untyped JSON.
pub fn read_snapshot_json(path: &Path) -> serde_json::Value {
    let text = std::fs::read_to_string(path).expect("Failed to read snapshot");
    serde_json::from_str(&text).expect("Snapshot is not valid JSON")
}

/// Returns the id of a code spec, inserting it if missing.
pub fn ensure_code_spec<R: Repository>(repo: &R, name: &str) -> Id64 {
    if let Some(existing) = repo.code_spec_by_name(name).expect("Failed to read code spec") {
        return existing.id;
    }
    repo.insert_code_spec(&CodeSpec::new(name))
        .expect("Failed to insert code spec")
}

/// Inserts a subject under the root subject.
pub fn insert_subject<R: Repository>(repo: &R, label: &str) -> Id64 {
    let spec = ensure_code_spec(repo, PARTITION_CODE_SPEC);
    repo.insert_element(
        &ElementProps::new(classes::SUBJECT, Id64::REPOSITORY_MODEL)
            .with_parent(Id64::ROOT_SUBJECT)
            .with_code(Code::new(spec, Id64::ROOT_SUBJECT, label))
            .with_label(label),
    )
    .expect("Failed to insert subject")
}

/// Inserts a physical partition under `parent` together with its model.
/// Returns the model id.
pub fn insert_physical_partition<R: Repository>(repo: &R, parent: Id64, label: &str) -> Id64 {
    let spec = ensure_code_spec(repo, PARTITION_CODE_SPEC);
    let partition = repo
        .insert_element(
            &ElementProps::new(classes::PHYSICAL_PARTITION, Id64::REPOSITORY_MODEL)
                .with_parent(parent)
                .with_code(Code::new(spec, parent, label))
                .with_label(label),
        )
        .expect("Failed to insert partition");
    repo.insert_model(&ModelProps::new(classes::PHYSICAL_MODEL, partition))
        .expect("Failed to insert model")
}

/// Inserts a spatial category into the dictionary.
pub fn insert_category<R: Repository>(repo: &R, label: &str) -> Id64 {
    let spec = ensure_code_spec(repo, CATEGORY_CODE_SPEC);
    repo.insert_element(
        &ElementProps::new(classes::SPATIAL_CATEGORY, Id64::DICTIONARY_MODEL)
            .with_code(Code::new(spec, Id64::DICTIONARY_MODEL, label))
            .with_label(label),
    )
    .expect("Failed to insert category")
}

/// Inserts a physical element. An invalid `category` leaves it unset.
pub fn insert_physical_element<R: Repository>(repo: &R, model: Id64, category: Id64, label: &str) -> Id64 {
    let mut element = ElementProps::new(classes::PHYSICAL_ELEMENT, model).with_label(label);
    if category.is_valid() {
        element = element.with_property("category", category);
    }
    repo.insert_element(&element)
        .expect("Failed to insert element")
}

/// Inserts a physical element as the child of another.
pub fn insert_child_element<R: Repository>(repo: &R, model: Id64, parent: Id64, label: &str) -> Id64 {
    repo.insert_element(
        &ElementProps::new(classes::PHYSICAL_ELEMENT, model)
            .with_parent(parent)
            .with_label(label),
    )
    .expect("Failed to insert child element")
}

/// Inserts a `Plant:Pump` tagged with a code scoped to its model.
///
/// The repository must hold [`scenarios::plant_schema`].
pub fn insert_pump<R: Repository>(repo: &R, model: Id64, category: Id64, tag: &str, flow: i64) -> Id64 {
    let spec = ensure_code_spec(repo, TAG_CODE_SPEC);
    let mut pump = ElementProps::new(scenarios::PUMP, model)
        .with_code(Code::new(spec, model, tag))
        .with_label(tag)
        .with_property("flow", flow);
    if category.is_valid() {
        pump = pump.with_property("category", category);
    }
    repo.insert_element(&pump).expect("Failed to insert pump")
}

/// Reads an element, applies `edit` and writes it back.
pub fn update_element<R: Repository>(repo: &R, id: Id64, edit: impl FnOnce(&mut ElementProps)) {
    let mut element = repo
        .element(id)
        .expect("Failed to read element")
        .expect("Element should exist");
    edit(&mut element);
    repo.update_element(&element)
        .expect("Failed to update element");
}

/// Sets one property of an element.
pub fn set_property<R: Repository>(repo: &R, id: Id64, name: &str, value: impl Into<PropertyValue>) {
    let value = value.into();
    update_element(repo, id, |element| {
        element.properties.insert(name.to_string(), value);
    });
}

/// Relates two elements with `ElementGroupsMembers`.
pub fn relate<R: Repository>(repo: &R, source: Id64, target: Id64) -> Id64 {
    repo.insert_relationship(&RelationshipProps::new(
        classes::ELEMENT_GROUPS_MEMBERS,
        source,
        target,
    ))
    .expect("Failed to insert relationship")
}

/// Adds an aspect of the given built-in multiplicity to an element.
pub fn add_aspect<R: Repository>(repo: &R, element: Id64, kind: AspectKind, value: i64) -> Id64 {
    let class_name = match kind {
        AspectKind::Unique => classes::ELEMENT_UNIQUE_ASPECT,
        AspectKind::Multi => classes::ELEMENT_MULTI_ASPECT,
    };
    repo.insert_aspect(&AspectProps::new(class_name, element, kind).with_property("value", value))
        .expect("Failed to insert aspect")
}

/// Returns the sorted labels of all user elements (system elements excluded).
pub fn element_labels(repo: &InMemoryRepository) -> Vec<String> {
    let mut labels: Vec<String> = repo
        .element_ids()
        .into_iter()
        .filter(|id| id.value() >= Id64::FIRST_USER_ID)
        .filter_map(|id| repo.element(id).expect("Failed to read element"))
        .filter_map(|e| e.user_label)
        .collect();
    labels.sort();
    labels
}

/// Finds a user element by label.
pub fn find_by_label(repo: &InMemoryRepository, label: &str) -> Option<ElementProps> {
    repo.element_ids()
        .into_iter()
        .filter_map(|id| repo.element(id).expect("Failed to read element"))
        .find(|e| e.user_label.as_deref() == Some(label))
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use twinsync_core::{ClassDef, ClassKind, PropertyDef, SchemaDef, BIS_CORE};

    /// The pump class of [`plant_schema`].
    pub const PUMP: &str = "Plant:Pump";

    /// The unique inspection aspect class of [`plant_schema`].
    pub const INSPECTION: &str = "Plant:Inspection";

    /// The multi reading aspect class of [`plant_schema`].
    pub const READING: &str = "Plant:Reading";

    /// A schema with a pump class whose `feeds` property refers to another
    /// element, plus one unique and one multi aspect class.
    pub fn plant_schema() -> SchemaDef {
        SchemaDef::new("Plant", 1)
            .with_reference(BIS_CORE)
            .with_class(
                ClassDef::new("Pump", ClassKind::Element)
                    .with_base(classes::PHYSICAL_ELEMENT)
                    .with_property(PropertyDef::navigation("feeds"))
                    .with_property(PropertyDef::primitive("flow")),
            )
            .with_class(
                ClassDef::new("Inspection", ClassKind::Aspect(AspectKind::Unique))
                    .with_base(classes::ELEMENT_UNIQUE_ASPECT)
                    .with_property(PropertyDef::primitive("grade")),
            )
            .with_class(
                ClassDef::new("Reading", ClassKind::Aspect(AspectKind::Multi))
                    .with_base(classes::ELEMENT_MULTI_ASPECT)
                    .with_property(PropertyDef::navigation("instrument"))
                    .with_property(PropertyDef::primitive("value")),
            )
    }

    /// A schema that extends [`plant_schema`] and sorts before it by name,
    /// so exporting schemas by name delivers it first.
    pub fn accessory_schema() -> SchemaDef {
        SchemaDef::new("Accessories", 1)
            .with_reference("Plant")
            .with_class(ClassDef::new("Valve", ClassKind::Element).with_base(PUMP))
    }

    /// A plant: one partition, one category and a chain of pumps.
    pub struct Plant {
        /// The repository.
        pub repo: InMemoryRepository,
        /// The physical model holding the pumps.
        pub model: Id64,
        /// The category of every pump.
        pub category: Id64,
        /// Pumps in insertion order. Pump `i` feeds pump `i - 1`.
        pub pumps: Vec<Id64>,
        /// `ElementGroupsMembers` from pump `i` to pump `i + 1`.
        pub links: Vec<Id64>,
    }

    /// Creates a saved plant with `pump_count` pumps.
    pub fn plant(pump_count: usize) -> Plant {
        let repo = InMemoryRepository::new();
        repo.import_schemas(&[plant_schema()])
            .expect("Failed to import plant schema");
        let model = insert_physical_partition(&repo, Id64::ROOT_SUBJECT, "Plant");
        let category = insert_category(&repo, "Equipment");

        let mut pumps: Vec<Id64> = Vec::with_capacity(pump_count);
        for i in 0..pump_count {
            let pump = insert_pump(&repo, model, category, &format!("P-{i}"), i as i64);
            if let Some(previous) = pumps.last() {
                set_property(&repo, pump, "feeds", *previous);
            }
            pumps.push(pump);
        }
        let links = pumps.windows(2).map(|w| relate(&repo, w[0], w[1])).collect();

        repo.save_changes("seed plant")
            .expect("Failed to save plant");
        Plant {
            repo,
            model,
            category,
            pumps,
            links,
        }
    }

    /// Two models where an element of the first refers to an element of
    /// the second, so the reference points forward in export order.
    pub struct ForwardReference {
        /// The repository.
        pub repo: InMemoryRepository,
        /// The model exported first.
        pub m1: Id64,
        /// The model exported second.
        pub m2: Id64,
        /// Pump in `m1` feeding `e2`.
        pub e1: Id64,
        /// Pump in `m2`.
        pub e2: Id64,
    }

    /// Creates the forward reference scenario.
    pub fn forward_reference() -> ForwardReference {
        let repo = InMemoryRepository::new();
        repo.import_schemas(&[plant_schema()])
            .expect("Failed to import plant schema");
        let m1 = insert_physical_partition(&repo, Id64::ROOT_SUBJECT, "M1");
        let m2 = insert_physical_partition(&repo, Id64::ROOT_SUBJECT, "M2");
        let e2 = insert_pump(&repo, m2, Id64::INVALID, "E2", 2);
        let e1 = insert_pump(&repo, m1, Id64::INVALID, "E1", 1);
        set_property(&repo, e1, "feeds", e2);
        repo.save_changes("seed forward reference")
            .expect("Failed to save");
        ForwardReference { repo, m1, m2, e1, e2 }
    }

    /// Creates two pumps feeding each other. Returns the repository and the
    /// two pump ids.
    pub fn pump_cycle() -> (InMemoryRepository, Id64, Id64) {
        let repo = InMemoryRepository::new();
        repo.import_schemas(&[plant_schema()])
            .expect("Failed to import plant schema");
        let model = insert_physical_partition(&repo, Id64::ROOT_SUBJECT, "Loop");
        let a = insert_pump(&repo, model, Id64::INVALID, "A", 1);
        let b = insert_pump(&repo, model, Id64::INVALID, "B", 2);
        set_property(&repo, b, "feeds", a);
        set_property(&repo, a, "feeds", b);
        repo.save_changes("seed cycle").expect("Failed to save");
        (repo, a, b)
    }

    /// Creates pumps `A` and `B` feeding each other plus an earlier pump `C`
    /// that feeds `A` without being on the cycle. Returns the repository and
    /// `(c, a, b)`.
    pub fn pump_cycle_with_feeder() -> (InMemoryRepository, Id64, Id64, Id64) {
        let repo = InMemoryRepository::new();
        repo.import_schemas(&[plant_schema()])
            .expect("Failed to import plant schema");
        let model = insert_physical_partition(&repo, Id64::ROOT_SUBJECT, "Loop");
        let c = insert_pump(&repo, model, Id64::INVALID, "C", 3);
        let a = insert_pump(&repo, model, Id64::INVALID, "A", 1);
        let b = insert_pump(&repo, model, Id64::INVALID, "B", 2);
        set_property(&repo, c, "feeds", a);
        set_property(&repo, b, "feeds", a);
        set_property(&repo, a, "feeds", b);
        repo.save_changes("seed cycle").expect("Failed to save");
        (repo, c, a, b)
    }

    /// Creates a pump whose `feeds` refers to a deleted pump. Returns the
    /// repository, the referring pump and the missing id.
    pub fn dangling_reference() -> (InMemoryRepository, Id64, Id64) {
        let repo = InMemoryRepository::new();
        repo.import_schemas(&[plant_schema()])
            .expect("Failed to import plant schema");
        let model = insert_physical_partition(&repo, Id64::ROOT_SUBJECT, "Site");
        let gone = insert_pump(&repo, model, Id64::INVALID, "GONE", 0);
        let pump = insert_pump(&repo, model, Id64::INVALID, "P-1", 1);
        set_property(&repo, pump, "feeds", gone);
        repo.delete_element(gone).expect("Failed to delete pump");
        repo.save_changes("seed dangling").expect("Failed to save");
        (repo, pump, gone)
    }
}
