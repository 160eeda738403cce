//! Building [`ProductFilename`]s.
//!
//! Two ways in:
//! - **reconstruction**: [`ProductFilenameBuilder::full_product_path`] takes a
//!   file found on disk and recovers its identity. Anything that does not match
//!   the filename grammar leaves the builder invalid; nothing panics or touches
//!   the filesystem, so callers can probe arbitrary files.
//! - **construction**: [`ProductFilenameBuilder::venue_appropriate_location`]
//!   derives directory and base name for a product about to be written. These
//!   inputs are trusted and never checked against the grammar.
//!
//! Once a full path has been supplied, the other setters are ignored.

use crate::context::{ContextConfig, ProductMetadata};
use crate::grammar::FilenameGrammar;
use crate::paths::{self, OutputLayout};
use crate::reserve::{ProductFilename, ReservePolicy};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory, base name and status that identify one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductIdentity {
    /// Directory holding every version of the product.
    pub product_path: PathBuf,
    /// Name without partial marker, version or extension.
    pub product_name: String,
    /// Whether this is a partial product.
    pub partial: bool,
    /// Whether the payload is compressed.
    pub compressed: bool,
}

/// Why a builder could not produce a [`ProductFilename`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    /// The supplied file path is not a product file.
    #[error("not a product file {}: {}", path.display(), reasons.join("; "))]
    Unrecognized {
        /// The rejected path.
        path: PathBuf,
        /// Every check that failed.
        reasons: Vec<String>,
    },
    /// A required field was never set.
    #[error("{0} is not set")]
    Missing(&'static str),
    /// The product name is empty, so its files could never be scanned back.
    #[error("product name is empty")]
    EmptyName,
}

/// Accumulates product identity inputs and builds a [`ProductFilename`].
#[derive(Debug, Clone)]
pub struct ProductFilenameBuilder {
    grammar: FilenameGrammar,
    policy: ReservePolicy,
    original_file_path: Option<PathBuf>,
    invalid_reasons: Vec<String>,
    product_path: Option<PathBuf>,
    product_name: Option<String>,
    partial: bool,
    compressed: bool,
}

impl ProductFilenameBuilder {
    /// Start an empty builder for the given grammar.
    #[must_use]
    pub fn new(grammar: FilenameGrammar) -> Self {
        Self {
            grammar,
            policy: ReservePolicy::default(),
            original_file_path: None,
            invalid_reasons: Vec::new(),
            product_path: None,
            product_name: None,
            partial: false,
            compressed: false,
        }
    }

    /// Retry policy handed to the built [`ProductFilename`].
    #[must_use]
    pub fn policy(mut self, policy: ReservePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Reconstruct everything from an existing product file path.
    #[must_use]
    pub fn full_product_path(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.invalid_reasons.clear();
        self.product_path = None;
        self.product_name = None;
        self.partial = false;

        let raw = path.to_string_lossy().into_owned();
        if !self.grammar.has_product_extension(&raw) {
            self.invalid_reasons
                .push("file name does not end in a product extension".to_string());
            self.original_file_path = Some(path);
            return self;
        }

        match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => self.product_path = Some(parent.to_path_buf()),
            None => self
                .invalid_reasons
                .push("unable to find product path in input product file".to_string()),
        }
        match path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| self.grammar.parse_file_name(n))
        {
            Some(parsed) => self.product_name = Some(parsed.base_name),
            None => self
                .invalid_reasons
                .push("unable to find product name in input product file".to_string()),
        }
        self.partial = self.grammar.has_partial_extension(&raw);
        self.original_file_path = Some(path);
        self
    }

    /// Set the product directory.
    #[must_use]
    pub fn product_path(mut self, path: impl Into<PathBuf>) -> Self {
        if self.original_file_path.is_none() {
            self.product_path = Some(path.into());
        }
        self
    }

    /// Set the product base name.
    #[must_use]
    pub fn product_name(mut self, name: impl Into<String>) -> Self {
        if self.original_file_path.is_none() {
            self.product_name = Some(name.into());
        }
        self
    }

    /// Mark the product partial or complete.
    #[must_use]
    pub fn partial(mut self, partial: bool) -> Self {
        if self.original_file_path.is_none() {
            self.partial = partial;
        }
        self
    }

    /// Mark the product payload compressed.
    #[must_use]
    pub fn compressed(mut self, compressed: bool) -> Self {
        if self.original_file_path.is_none() {
            self.compressed = compressed;
        }
        self
    }

    /// Copy path, name and status from an existing identity.
    #[must_use]
    pub fn identity(self, identity: &ProductIdentity) -> Self {
        self.product_path(identity.product_path.clone())
            .product_name(identity.product_name.clone())
            .partial(identity.partial)
            .compressed(identity.compressed)
    }

    /// Derive directory and name for a new product from session context.
    #[must_use]
    pub fn venue_appropriate_location(
        self,
        ctx: &ContextConfig,
        md: &ProductMetadata,
        layout: &OutputLayout,
    ) -> Self {
        self.compressed(md.compressed)
            .partial(md.partial)
            .product_path(paths::product_directory(ctx, md, layout))
            .product_name(md.base_name())
    }

    /// Whether `build` would succeed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.invalid_reasons.is_empty()
            && self.product_path.is_some()
            && self.product_name.as_deref().is_some_and(|n| !n.is_empty())
    }

    /// Reasons a reconstructed path was rejected.
    #[must_use]
    pub fn invalid_reasons(&self) -> &[String] {
        &self.invalid_reasons
    }

    /// The path given to [`Self::full_product_path`], if any.
    #[must_use]
    pub fn original_file_path(&self) -> Option<&Path> {
        self.original_file_path.as_deref()
    }

    /// Resolve the identity without building.
    ///
    /// # Errors
    /// Returns [`BuildError::Unrecognized`] for a rejected full path and
    /// [`BuildError::Missing`] when path or name were never set, and
    /// [`BuildError::EmptyName`] for an empty name.
    pub fn to_identity(&self) -> Result<ProductIdentity, BuildError> {
        if let (Some(path), false) = (&self.original_file_path, self.invalid_reasons.is_empty()) {
            return Err(BuildError::Unrecognized {
                path: path.clone(),
                reasons: self.invalid_reasons.clone(),
            });
        }
        let product_path = self
            .product_path
            .clone()
            .ok_or(BuildError::Missing("product path"))?;
        let product_name = self
            .product_name
            .clone()
            .ok_or(BuildError::Missing("product name"))?;
        if product_name.is_empty() {
            return Err(BuildError::EmptyName);
        }
        Ok(ProductIdentity {
            product_path,
            product_name,
            partial: self.partial,
            compressed: self.compressed,
        })
    }

    /// Build an unreserved [`ProductFilename`].
    ///
    /// # Errors
    /// See [`Self::to_identity`].
    pub fn build(self) -> Result<ProductFilename, BuildError> {
        let identity = self.to_identity()?;
        Ok(ProductFilename::new(identity, self.grammar, self.policy))
    }
}

/// Identity of `path` if it is a product file, `None` otherwise.
#[must_use]
pub fn classify(grammar: &FilenameGrammar, path: &Path) -> Option<ProductIdentity> {
    ProductFilenameBuilder::new(grammar.clone())
        .full_product_path(path)
        .to_identity()
        .ok()
}
