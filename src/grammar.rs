//! Product filename grammar.
//!
//! Every product on disk is named
//! `<base_name>[<partial_marker>]-<major>[.<minor>]<extension>`, where the
//! extension is one of four mission-configured values (complete/partial data,
//! complete/partial metadata). Advisory lock files append an extra suffix and
//! are never products.
//!
//! [`FilenameGrammar`] is a plain value so that missions can swap the
//! extension table without touching the scanner or the reservation loop.

use crate::version::ProductVersion;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default complete data extension.
pub const DEFAULT_DATA_EXTENSION: &str = ".dat";
/// Default partial data extension.
pub const DEFAULT_PARTIAL_DATA_EXTENSION: &str = ".pdat";
/// Default complete metadata (EMD) extension.
pub const DEFAULT_METADATA_EXTENSION: &str = ".emd";
/// Default partial metadata extension.
pub const DEFAULT_PARTIAL_METADATA_EXTENSION: &str = ".pemd";
/// Default marker inserted between base name and version for partials.
pub const DEFAULT_PARTIAL_MARKER: &str = "_Partial";
/// Default lock file suffix.
pub const DEFAULT_LOCK_SUFFIX: &str = ".lock";

/// Which of the two product files a name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// The product data file.
    Data,
    /// The metadata sidecar.
    Metadata,
}

/// Rejected grammar configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GrammarError {
    /// An extension was empty or did not start with `.`.
    #[error("extension {name} must start with '.' and be non-empty (got {value:?})")]
    BadExtension {
        /// Configuration key of the extension.
        name: &'static str,
        /// The rejected value.
        value: String,
    },
    /// Two extensions in the table are identical.
    #[error("extension {value:?} is configured more than once")]
    DuplicateExtension {
        /// The repeated extension.
        value: String,
    },
    /// The partial marker would be confused with the version separator.
    #[error("partial marker {0:?} must be non-empty and must not contain '-' or '.'")]
    BadPartialMarker(String),
    /// The lock suffix is empty or equal to an extension.
    #[error("lock suffix {0:?} must be non-empty and distinct from every extension")]
    BadLockSuffix(String),
}

/// A product filename broken into its grammar components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    /// Product name without marker, version or extension.
    pub base_name: String,
    /// Version component.
    pub version: ProductVersion,
    /// Whether the extension is one of the partial extensions. Partial files
    /// always carry the marker.
    pub partial_extension: bool,
    /// Data or metadata.
    pub kind: FileKind,
}

/// Extension table plus markers that define product filenames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilenameGrammar {
    /// Complete data extension.
    pub data_extension: String,
    /// Partial data extension.
    pub partial_data_extension: String,
    /// Complete metadata extension.
    pub metadata_extension: String,
    /// Partial metadata extension.
    pub partial_metadata_extension: String,
    /// Marker between base name and version on partial products.
    pub partial_marker: String,
    /// Suffix appended to a product path to form its lock file.
    pub lock_suffix: String,
}

impl Default for FilenameGrammar {
    fn default() -> Self {
        Self {
            data_extension: DEFAULT_DATA_EXTENSION.to_string(),
            partial_data_extension: DEFAULT_PARTIAL_DATA_EXTENSION.to_string(),
            metadata_extension: DEFAULT_METADATA_EXTENSION.to_string(),
            partial_metadata_extension: DEFAULT_PARTIAL_METADATA_EXTENSION.to_string(),
            partial_marker: DEFAULT_PARTIAL_MARKER.to_string(),
            lock_suffix: DEFAULT_LOCK_SUFFIX.to_string(),
        }
    }
}

impl FilenameGrammar {
    /// Check that the table can be parsed unambiguously.
    ///
    /// # Errors
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), GrammarError> {
        let table = self.extension_table();
        for (name, value, _, _) in &table {
            if value.len() < 2 || !value.starts_with('.') {
                return Err(GrammarError::BadExtension {
                    name: *name,
                    value: (*value).to_string(),
                });
            }
        }
        for (i, (_, a, _, _)) in table.iter().enumerate() {
            if table.iter().skip(i + 1).any(|(_, b, _, _)| a == b) {
                return Err(GrammarError::DuplicateExtension {
                    value: (*a).to_string(),
                });
            }
        }
        if self.partial_marker.is_empty()
            || self.partial_marker.contains('-')
            || self.partial_marker.contains('.')
        {
            return Err(GrammarError::BadPartialMarker(self.partial_marker.clone()));
        }
        if self.lock_suffix.is_empty() || table.iter().any(|(_, v, _, _)| *v == self.lock_suffix)
        {
            return Err(GrammarError::BadLockSuffix(self.lock_suffix.clone()));
        }
        Ok(())
    }

    fn extension_table(&self) -> [(&'static str, &str, FileKind, bool); 4] {
        [
            ("data_extension", &self.data_extension, FileKind::Data, false),
            (
                "partial_data_extension",
                &self.partial_data_extension,
                FileKind::Data,
                true,
            ),
            (
                "metadata_extension",
                &self.metadata_extension,
                FileKind::Metadata,
                false,
            ),
            (
                "partial_metadata_extension",
                &self.partial_metadata_extension,
                FileKind::Metadata,
                true,
            ),
        ]
    }

    /// Extension for the given file kind and completeness.
    #[must_use]
    pub fn extension(&self, kind: FileKind, partial: bool) -> &str {
        match (kind, partial) {
            (FileKind::Data, false) => &self.data_extension,
            (FileKind::Data, true) => &self.partial_data_extension,
            (FileKind::Metadata, false) => &self.metadata_extension,
            (FileKind::Metadata, true) => &self.partial_metadata_extension,
        }
    }

    /// File name for one of a product's two files.
    #[must_use]
    pub fn file_name(
        &self,
        base_name: &str,
        version: ProductVersion,
        partial: bool,
        kind: FileKind,
    ) -> String {
        let marker = if partial {
            self.partial_marker.as_str()
        } else {
            ""
        };
        format!(
            "{base_name}{marker}-{version}{}",
            self.extension(kind, partial)
        )
    }

    /// Whether a file name is a lock artifact.
    #[must_use]
    pub fn is_lock_file(&self, name: &str) -> bool {
        name.ends_with(&self.lock_suffix)
    }

    /// Lock file path for a product file.
    #[must_use]
    pub fn lock_path(&self, product_file: &Path) -> PathBuf {
        let mut raw = product_file.as_os_str().to_os_string();
        raw.push(&self.lock_suffix);
        raw.into()
    }

    /// Whether `path` ends in one of the product extensions with a non-empty stem.
    #[must_use]
    pub fn has_product_extension(&self, path: &str) -> bool {
        self.split_extension(path)
            .is_some_and(|(stem, _, _)| !stem.is_empty())
    }

    /// Whether `path` ends in a partial data or partial metadata extension.
    #[must_use]
    pub fn has_partial_extension(&self, path: &str) -> bool {
        self.split_extension(path)
            .is_some_and(|(stem, _, partial)| partial && !stem.is_empty())
    }

    // Longest match first, so a configured extension that is a suffix of
    // another one never shadows it.
    fn split_extension<'a>(&self, name: &'a str) -> Option<(&'a str, FileKind, bool)> {
        let mut table = self.extension_table();
        table.sort_by_key(|(_, ext, _, _)| std::cmp::Reverse(ext.len()));
        table.iter().find_map(|(_, ext, kind, partial)| {
            name.strip_suffix(*ext).map(|stem| (stem, *kind, *partial))
        })
    }

    /// Parse a bare file name (no directory) against the grammar.
    ///
    /// Returns `None` for anything that is not a product file name, including
    /// lock files.
    #[must_use]
    pub fn parse_file_name(&self, name: &str) -> Option<ParsedName> {
        if self.is_lock_file(name) {
            return None;
        }
        let (stem, kind, partial_extension) = self.split_extension(name)?;
        let (head, version) = split_version(stem)?;
        // The marker belongs to partial files only; on a complete file it is
        // part of the base name.
        let base_name = if partial_extension {
            head.strip_suffix(self.partial_marker.as_str())?
        } else {
            head
        };
        if base_name.is_empty() {
            return None;
        }
        Some(ParsedName {
            base_name: base_name.to_string(),
            version,
            partial_extension,
            kind,
        })
    }
}

/// Split `<head>-<major>[.<minor>]` at the right-most `-` whose tail is a version.
fn split_version(stem: &str) -> Option<(&str, ProductVersion)> {
    let mut search_end = stem.len();
    while let Some(idx) = stem.get(..search_end).and_then(|s| s.rfind('-')) {
        let head = stem.get(..idx)?;
        let tail = stem.get(idx + 1..)?;
        if !head.is_empty() {
            if let Ok(version) = tail.parse::<ProductVersion>() {
                return Some((head, version));
            }
        }
        search_end = idx;
    }
    None
}
