//! `pfnr` names, versions and reserves product files for the `pfnr` CLI and
//! for product builders that write into a shared product store.
//!
//! It provides:
//! - A filename grammar for versioned data/metadata pairs
//! - Directory scanning that derives the next version of a product
//! - Atomic reservation of both files, safe across processes and hosts
//! - Builders that reconstruct a product from an existing file or derive its
//!   location from session context
//! - An advisory per-product lock for writers

/// Builders that turn a path or session context into a [`reserve::ProductFilename`].
pub mod builder;
/// JSON engine configuration.
pub mod config;
/// Session context and product metadata inputs.
pub mod context;
/// Product filename grammar: extensions, partial marker, version suffix.
pub mod grammar;
/// Random owner ids.
pub mod id;
/// File-based advisory lock on a reserved product.
pub mod lock;
/// Output directory layout.
pub mod paths;
/// Atomic reservation of versioned product files.
pub mod reserve;
/// Version numbers and directory scanning.
pub mod version;

pub use builder::{classify, BuildError, ProductFilenameBuilder, ProductIdentity};
pub use config::EngineConfig;
pub use grammar::FilenameGrammar;
pub use reserve::{ProductFilename, Reservation, ReserveError, ReservePolicy};
pub use version::{ProductVersion, VersionScanner, VersionState};
