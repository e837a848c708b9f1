//! # TwinSync Testkit
//!
//! Test utilities for TwinSync.
//!
//! This crate provides:
//! - Repository fixtures and builders for common content
//! - Ready-made scenarios (forward references, cycles, dangling references)
//! - Property-based generators for element graphs using proptest
//!
//! ## Usage
//!
//! ```rust
//! use twinsync_testkit::prelude::*;
//!
//! with_repositories(|source, target| {
//!     let model = insert_physical_partition(source, Id64::ROOT_SUBJECT, "Site");
//!     insert_physical_element(source, model, Id64::INVALID, "pump");
//!     assert_eq!(element_labels(target).len(), 0);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::scenarios;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use twinsync_core::{Id64, InMemoryRepository, Repository};
}

pub use fixtures::*;
pub use generators::*;
