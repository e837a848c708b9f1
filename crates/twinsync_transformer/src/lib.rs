//! # twinsync_transformer
//!
//! Repository-to-repository transformation and synchronization.
//!
//! A [`Transformer`] reads a source repository through an [`Exporter`],
//! rewrites every entity through a [`CloneContext`] so that its references
//! name target entities, and writes it through an [`Importer`]. Provenance
//! records left in the target let later runs find what earlier runs wrote,
//! so repeated runs converge instead of duplicating.
//!
//! ## Ordering
//!
//! An entity is written only after everything it refers to. The exporter
//! already visits models before their contents and parents before
//! children; references it cannot order (navigation properties, forward
//! references across models) are handled by deferring the entity until its
//! predecessors exist.
//!
//! ## Example
//!
//! ```
//! use twinsync_core::{InMemoryRepository, Repository};
//! use twinsync_transformer::{DanglingBehavior, TransformOptions, Transformer};
//!
//! let source = InMemoryRepository::new();
//! let target = InMemoryRepository::new();
//! let options = TransformOptions::new()
//!     .with_dangling_predecessors_behavior(DanglingBehavior::Ignore);
//!
//! let mut transformer = Transformer::new(&source, &target, options);
//! transformer.process_all()?;
//! target.save_changes("synchronized")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod deferred;
mod error;
mod exporter;
mod handler;
mod importer;
mod predecessors;
mod state;
mod transformer;

pub use config::{DanglingBehavior, ExportOptions, TransformOptions};
pub use context::{CloneContext, Cloned};
pub use error::{TransformError, TransformResult};
pub use exporter::{ExportStats, Exporter};
pub use handler::ExportHandler;
pub use importer::{ImportOptions, ImportStats, Importer, KindCounters};
pub use predecessors::{element_predecessors, Predecessor, ReferenceField};
pub use state::{TransformState, TransformStats};
pub use transformer::Transformer;
