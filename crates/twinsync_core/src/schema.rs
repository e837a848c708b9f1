//! Schema metadata.
//!
//! Schemas are data: they are loaded at run time, so nothing in the engine
//! knows about a class's properties until it asks a [`ClassRegistry`]. The
//! registry is what answers "which properties of this class refer to other
//! entities", the question predecessor discovery is built on.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::entity::AspectKind;
use crate::error::{CoreError, CoreResult};

/// Name of the built-in base schema.
pub const BIS_CORE: &str = "BisCore";

/// Well-known class names of the base schema.
pub mod classes {
    /// Base of all elements.
    pub const ELEMENT: &str = "BisCore:Element";
    /// Subject elements organize the repository hierarchy.
    pub const SUBJECT: &str = "BisCore:Subject";
    /// Base of partition elements.
    pub const INFORMATION_PARTITION: &str = "BisCore:InformationPartitionElement";
    /// Partition modeled by a physical model.
    pub const PHYSICAL_PARTITION: &str = "BisCore:PhysicalPartition";
    /// Partition modeled by a definition model.
    pub const DEFINITION_PARTITION: &str = "BisCore:DefinitionPartition";
    /// Base of definition elements.
    pub const DEFINITION_ELEMENT: &str = "BisCore:DefinitionElement";
    /// Base of categories.
    pub const CATEGORY: &str = "BisCore:Category";
    /// Category of 3d elements.
    pub const SPATIAL_CATEGORY: &str = "BisCore:SpatialCategory";
    /// Base of 3d geometric elements.
    pub const GEOMETRIC_ELEMENT_3D: &str = "BisCore:GeometricElement3d";
    /// Physical element.
    pub const PHYSICAL_ELEMENT: &str = "BisCore:PhysicalElement";
    /// Base of all models.
    pub const MODEL: &str = "BisCore:Model";
    /// The repository model.
    pub const REPOSITORY_MODEL: &str = "BisCore:RepositoryModel";
    /// Physical model.
    pub const PHYSICAL_MODEL: &str = "BisCore:PhysicalModel";
    /// Definition model.
    pub const DEFINITION_MODEL: &str = "BisCore:DefinitionModel";
    /// Dictionary model.
    pub const DICTIONARY_MODEL: &str = "BisCore:DictionaryModel";
    /// Base of unique aspects.
    pub const ELEMENT_UNIQUE_ASPECT: &str = "BisCore:ElementUniqueAspect";
    /// Base of multi aspects.
    pub const ELEMENT_MULTI_ASPECT: &str = "BisCore:ElementMultiAspect";
    /// Base of element-to-element relationships.
    pub const ELEMENT_REFERS_TO_ELEMENTS: &str = "BisCore:ElementRefersToElements";
    /// Grouping relationship.
    pub const ELEMENT_GROUPS_MEMBERS: &str = "BisCore:ElementGroupsMembers";
}

/// What records a class describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassKind {
    /// Element class.
    Element,
    /// Model class.
    Model,
    /// Aspect class.
    Aspect(AspectKind),
    /// Relationship class.
    Relationship,
}

/// Kind of a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    /// Any non-reference value.
    Primitive,
    /// Reference to another element.
    Navigation {
        /// Relationship class backing the reference, if declared.
        relationship: Option<String>,
    },
}

/// A property definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    /// Property name.
    pub name: String,
    /// Property kind.
    pub kind: PropertyKind,
}

impl PropertyDef {
    /// Creates a primitive property.
    pub fn primitive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Primitive,
        }
    }

    /// Creates a navigation property.
    pub fn navigation(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Navigation { relationship: None },
        }
    }

    /// Returns true for navigation properties.
    pub fn is_navigation(&self) -> bool {
        matches!(self.kind, PropertyKind::Navigation { .. })
    }
}

/// A class definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDef {
    /// Class name local to its schema.
    pub name: String,
    /// Fully-qualified base class name.
    #[serde(default)]
    pub base: Option<String>,
    /// What the class describes.
    pub kind: ClassKind,
    /// Properties declared directly on the class.
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
}

impl ClassDef {
    /// Creates a class definition.
    pub fn new(name: impl Into<String>, kind: ClassKind) -> Self {
        Self {
            name: name.into(),
            base: None,
            kind,
            properties: Vec::new(),
        }
    }

    /// Sets the base class.
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Adds a property.
    pub fn with_property(mut self, property: PropertyDef) -> Self {
        self.properties.push(property);
        self
    }
}

/// A schema: a named, versioned set of classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDef {
    /// Schema name.
    pub name: String,
    /// Schema version. Higher versions replace lower ones.
    pub version: u32,
    /// Names of schemas this schema depends on.
    #[serde(default)]
    pub references: Vec<String>,
    /// Classes defined by the schema.
    #[serde(default)]
    pub classes: Vec<ClassDef>,
}

impl SchemaDef {
    /// Creates an empty schema.
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            references: Vec::new(),
            classes: Vec::new(),
        }
    }

    /// Adds a schema reference.
    pub fn with_reference(mut self, schema: impl Into<String>) -> Self {
        self.references.push(schema.into());
        self
    }

    /// Adds a class.
    pub fn with_class(mut self, class: ClassDef) -> Self {
        self.classes.push(class);
        self
    }

    /// Returns the fully-qualified name of a class in this schema.
    pub fn qualify(&self, class: &str) -> String {
        format!("{}:{}", self.name, class)
    }

    /// The built-in base schema every repository starts with.
    pub fn bis_core() -> Self {
        use classes::*;
        let local = |full: &'static str| full.trim_start_matches("BisCore:");
        SchemaDef::new(BIS_CORE, 1)
            .with_class(ClassDef::new(local(ELEMENT), ClassKind::Element))
            .with_class(ClassDef::new(local(SUBJECT), ClassKind::Element).with_base(ELEMENT))
            .with_class(
                ClassDef::new(local(INFORMATION_PARTITION), ClassKind::Element).with_base(ELEMENT),
            )
            .with_class(
                ClassDef::new(local(PHYSICAL_PARTITION), ClassKind::Element)
                    .with_base(INFORMATION_PARTITION),
            )
            .with_class(
                ClassDef::new(local(DEFINITION_PARTITION), ClassKind::Element)
                    .with_base(INFORMATION_PARTITION),
            )
            .with_class(
                ClassDef::new(local(DEFINITION_ELEMENT), ClassKind::Element).with_base(ELEMENT),
            )
            .with_class(ClassDef::new(local(CATEGORY), ClassKind::Element).with_base(DEFINITION_ELEMENT))
            .with_class(ClassDef::new(local(SPATIAL_CATEGORY), ClassKind::Element).with_base(CATEGORY))
            .with_class(
                ClassDef::new(local(GEOMETRIC_ELEMENT_3D), ClassKind::Element)
                    .with_base(ELEMENT)
                    .with_property(PropertyDef::navigation("category")),
            )
            .with_class(
                ClassDef::new(local(PHYSICAL_ELEMENT), ClassKind::Element)
                    .with_base(GEOMETRIC_ELEMENT_3D),
            )
            .with_class(ClassDef::new(local(MODEL), ClassKind::Model))
            .with_class(ClassDef::new(local(REPOSITORY_MODEL), ClassKind::Model).with_base(MODEL))
            .with_class(ClassDef::new(local(PHYSICAL_MODEL), ClassKind::Model).with_base(MODEL))
            .with_class(ClassDef::new(local(DEFINITION_MODEL), ClassKind::Model).with_base(MODEL))
            .with_class(
                ClassDef::new(local(DICTIONARY_MODEL), ClassKind::Model).with_base(DEFINITION_MODEL),
            )
            .with_class(ClassDef::new(
                local(ELEMENT_UNIQUE_ASPECT),
                ClassKind::Aspect(AspectKind::Unique),
            ))
            .with_class(ClassDef::new(
                local(ELEMENT_MULTI_ASPECT),
                ClassKind::Aspect(AspectKind::Multi),
            ))
            .with_class(ClassDef::new(
                local(ELEMENT_REFERS_TO_ELEMENTS),
                ClassKind::Relationship,
            ))
            .with_class(
                ClassDef::new(local(ELEMENT_GROUPS_MEMBERS), ClassKind::Relationship)
                    .with_base(ELEMENT_REFERS_TO_ELEMENTS),
            )
    }
}

/// Index of all classes of the loaded schemas.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<SchemaDef>", into = "Vec<SchemaDef>")]
pub struct ClassRegistry {
    schemas: BTreeMap<String, SchemaDef>,
    classes: BTreeMap<String, ClassDef>,
}

impl From<Vec<SchemaDef>> for ClassRegistry {
    fn from(schemas: Vec<SchemaDef>) -> Self {
        let mut registry = ClassRegistry::default();
        for schema in schemas {
            registry.load(schema);
        }
        registry
    }
}

impl From<ClassRegistry> for Vec<SchemaDef> {
    fn from(registry: ClassRegistry) -> Self {
        registry.schemas.into_values().collect()
    }
}

impl ClassRegistry {
    /// Creates a registry holding only the base schema.
    pub fn with_bis_core() -> Self {
        let mut registry = Self::default();
        registry.load(SchemaDef::bis_core());
        registry
    }

    /// Returns all loaded schemas, ordered by name.
    pub fn schemas(&self) -> impl Iterator<Item = &SchemaDef> {
        self.schemas.values()
    }

    /// Returns a loaded schema by name.
    pub fn schema(&self, name: &str) -> Option<&SchemaDef> {
        self.schemas.get(name)
    }

    /// Returns a class by fully-qualified name.
    pub fn class(&self, full_name: &str) -> Option<&ClassDef> {
        self.classes.get(full_name)
    }

    /// Loads one schema without checking its references.
    fn load(&mut self, schema: SchemaDef) {
        if let Some(previous) = self.schemas.get(&schema.name) {
            for class in &previous.classes {
                self.classes.remove(&previous.qualify(&class.name));
            }
        }
        for class in &schema.classes {
            self.classes.insert(schema.qualify(&class.name), class.clone());
        }
        self.schemas.insert(schema.name.clone(), schema);
    }

    /// Imports a batch of schemas.
    ///
    /// Schemas may arrive in any order: the batch is loaded in reference
    /// order. Schemas already loaded at the same or a newer version are
    /// skipped. Returns the names of the schemas actually loaded.
    ///
    /// # Errors
    ///
    /// Fails without loading anything if a schema references a schema that
    /// is neither loaded nor in the batch, or if a class's base class cannot
    /// be resolved once the batch is loaded.
    pub fn import(&mut self, batch: &[SchemaDef]) -> CoreResult<Vec<String>> {
        let pending: Vec<&SchemaDef> = batch
            .iter()
            .filter(|s| {
                self.schemas
                    .get(&s.name)
                    .map_or(true, |existing| existing.version < s.version)
            })
            .collect();

        let mut staged = self.clone();
        let mut waiting: BTreeSet<&str> = pending.iter().copied().map(|s| s.name.as_str()).collect();
        let mut loaded: Vec<String> = Vec::new();
        let mut remaining = pending;
        while !remaining.is_empty() {
            let before = remaining.len();
            let mut deferred = Vec::new();
            for schema in remaining {
                let ready = schema
                    .references
                    .iter()
                    .all(|r| staged.schemas.contains_key(r) && !waiting.contains(r.as_str()));
                if ready {
                    staged.load(schema.clone());
                    waiting.remove(schema.name.as_str());
                    loaded.push(schema.name.clone());
                } else {
                    deferred.push(schema);
                }
            }
            if deferred.len() == before {
                let missing: BTreeSet<&str> = deferred
                    .iter()
                    .flat_map(|s| s.references.iter())
                    .map(String::as_str)
                    .filter(|r| !staged.schemas.contains_key(*r) && !waiting.contains(r))
                    .collect();
                let names: Vec<&str> = deferred.iter().map(|s| s.name.as_str()).collect();
                return Err(CoreError::schema_import(format!(
                    "unresolvable references {missing:?} while importing {names:?}"
                )));
            }
            remaining = deferred;
        }

        for name in &loaded {
            if let Some(schema) = staged.schemas.get(name) {
                for class in &schema.classes {
                    if let Some(base) = &class.base {
                        if staged.class(base).is_none() {
                            return Err(CoreError::schema_import(format!(
                                "base class {base} of {} is not defined",
                                schema.qualify(&class.name)
                            )));
                        }
                    }
                }
            }
        }

        *self = staged;
        Ok(loaded)
    }

    /// Returns the base chain of a class, starting with the class itself.
    pub fn lineage(&self, full_name: &str) -> CoreResult<Vec<String>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(full_name.to_string());
        while let Some(name) = current {
            if !seen.insert(name.clone()) {
                break;
            }
            let class = self
                .class(&name)
                .ok_or_else(|| CoreError::class_not_found(name.as_str()))?;
            current = class.base.clone();
            chain.push(name);
        }
        Ok(chain)
    }

    /// Returns the names of all navigation properties of a class, including
    /// inherited ones.
    pub fn reference_properties(&self, full_name: &str) -> CoreResult<Vec<String>> {
        let mut names = Vec::new();
        for class_name in self.lineage(full_name)? {
            if let Some(class) = self.class(&class_name) {
                names.extend(
                    class
                        .properties
                        .iter()
                        .filter(|p| p.is_navigation())
                        .map(|p| p.name.clone()),
                );
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Returns true if `full_name` is `base` or derives from it.
    pub fn is_subclass_of(&self, full_name: &str, base: &str) -> CoreResult<bool> {
        Ok(self.lineage(full_name)?.iter().any(|c| c == base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plant_schema() -> SchemaDef {
        SchemaDef::new("Plant", 1)
            .with_reference(BIS_CORE)
            .with_class(
                ClassDef::new("Pump", ClassKind::Element)
                    .with_base(classes::PHYSICAL_ELEMENT)
                    .with_property(PropertyDef::primitive("flow"))
                    .with_property(PropertyDef::navigation("feeds")),
            )
    }

    #[test]
    fn inherited_reference_properties() {
        let mut registry = ClassRegistry::with_bis_core();
        registry.import(&[plant_schema()]).unwrap();
        let props = registry.reference_properties("Plant:Pump").unwrap();
        assert_eq!(props, vec!["category".to_string(), "feeds".to_string()]);
        assert!(registry.is_subclass_of("Plant:Pump", classes::ELEMENT).unwrap());
    }

    #[test]
    fn unknown_class() {
        let registry = ClassRegistry::with_bis_core();
        assert!(matches!(
            registry.reference_properties("Nope:Thing"),
            Err(CoreError::ClassNotFound { .. })
        ));
    }

    #[test]
    fn out_of_order_batch() {
        let mut registry = ClassRegistry::with_bis_core();
        let piping = SchemaDef::new("Piping", 1)
            .with_reference("Plant")
            .with_class(ClassDef::new("Pipe", ClassKind::Element).with_base("Plant:Pump"));
        let loaded = registry.import(&[piping, plant_schema()]).unwrap();
        assert_eq!(loaded, vec!["Plant".to_string(), "Piping".to_string()]);
        assert!(registry.class("Piping:Pipe").is_some());
    }

    #[test]
    fn missing_reference_fails_atomically() {
        let mut registry = ClassRegistry::with_bis_core();
        let orphan = SchemaDef::new("Orphan", 1).with_reference("Missing");
        let err = registry.import(&[plant_schema(), orphan]).unwrap_err();
        assert!(matches!(err, CoreError::SchemaImport { .. }));
        assert!(registry.schema("Plant").is_none());
    }

    #[test]
    fn older_version_is_skipped() {
        let mut registry = ClassRegistry::with_bis_core();
        registry.import(&[SchemaDef::new("Plant", 2).with_reference(BIS_CORE)]).unwrap();
        let loaded = registry.import(&[plant_schema()]).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(registry.schema("Plant").unwrap().version, 2);
    }

    #[test]
    fn registry_serde_roundtrip() {
        let mut registry = ClassRegistry::with_bis_core();
        registry.import(&[plant_schema()]).unwrap();
        let json = serde_json::to_string(&registry).unwrap();
        let back: ClassRegistry = serde_json::from_str(&json).unwrap();
        assert!(back.class("Plant:Pump").is_some());
    }
}
