//! # TwinSync Core
//!
//! Data model and repository contract for TwinSync.
//!
//! This crate provides:
//! - 64-bit entity ids and repository ids
//! - Entity records (elements, models, aspects, relationships, code specs)
//! - Provenance records linking target entities to their source
//! - A schema registry with class inheritance and navigation metadata
//! - The [`Repository`] trait every source and target implements
//! - An in-memory repository with JSON snapshots
//!
//! ## Key Invariants
//!
//! - Id `0` is the invalid sentinel, never a real entity
//! - Every write is assigned a strictly increasing change sequence
//! - No two elements in one repository share a non-empty code
//! - Deletes are observable through the change log

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_log;
mod entity;
mod error;
mod id;
mod memory;
mod repository;
mod schema;
mod value;

pub use change_log::{net_deletions, ChangeEvent, ChangeLog, ChangeType};
pub use entity::{
    fingerprint, AspectKind, AspectProps, Code, CodeSpec, ElementProps, EntityKind, EntityProps,
    Fingerprint, ModelProps, ProvenanceKind, ProvenanceRecord, RelationshipProps,
};
pub use error::{CoreError, CoreResult};
pub use id::{Id64, RepositoryId};
pub use memory::InMemoryRepository;
pub use repository::Repository;
pub use schema::{
    classes, ClassDef, ClassKind, ClassRegistry, PropertyDef, PropertyKind, SchemaDef, BIS_CORE,
};
pub use value::{PropertyMap, PropertyValue};
