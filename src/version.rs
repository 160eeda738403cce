//! Version numbering for product files.
//!
//! A product's version is `<major>` for a complete product and
//! `<major>.<minor>` for a partial one. Partials of the same major form a
//! lineage; a complete product closes it and the next partial opens a new
//! major.
//!
//! [`VersionScanner`] derives a [`VersionState`] from what is already on disk.
//! The state is only a guess: another producer can claim the same name between
//! the scan and the create, which is why reservation always rescans after a
//! collision.

use crate::grammar::FilenameGrammar;
use serde::{Serialize, Serializer};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// A complete (`major`) or partial (`major.minor`) product version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProductVersion {
    major: u32,
    minor: Option<u32>,
}

impl ProductVersion {
    /// Version of a complete product.
    #[must_use]
    pub const fn complete(major: u32) -> Self {
        Self { major, minor: None }
    }

    /// Version of a partial product.
    #[must_use]
    pub const fn partial(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor: Some(minor),
        }
    }

    /// Major component.
    #[must_use]
    pub const fn major(self) -> u32 {
        self.major
    }

    /// Minor component; `None` for complete products.
    #[must_use]
    pub const fn minor(self) -> Option<u32> {
        self.minor
    }

    /// Whether this version carries a minor component.
    #[must_use]
    pub const fn is_partial(self) -> bool {
        self.minor.is_some()
    }
}

impl fmt::Display for ProductVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.minor {
            Some(minor) => write!(f, "{}.{minor}", self.major),
            None => write!(f, "{}", self.major),
        }
    }
}

impl Serialize for ProductVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A string that is not `<digits>` or `<digits>.<digits>`.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid product version: {0:?}")]
pub struct ParseVersionError(String);

fn parse_component(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl FromStr for ProductVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseVersionError(s.to_string());
        match s.split_once('.') {
            Some((major, minor)) => {
                let major = parse_component(major).ok_or_else(err)?;
                let minor = parse_component(minor).ok_or_else(err)?;
                Ok(Self::partial(major, minor))
            }
            None => parse_component(s).map(Self::complete).ok_or_else(err),
        }
    }
}

/// Counters derived from one directory scan.
///
/// `next_complete_version >= highest_complete_version_seen` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionState {
    /// Highest major seen so far; becomes the next major once incremented.
    pub next_complete_version: u32,
    /// Highest minor seen in the open lineage.
    pub next_partial_version: u32,
    /// Highest major among complete products.
    pub highest_complete_version_seen: u32,
}

impl VersionState {
    /// Fold a batch of existing versions into a fresh state.
    ///
    /// Only minors of the newest major count towards the partial counter, so a
    /// closed lineage never inflates the minor of a later one.
    #[must_use]
    pub fn from_versions<I>(versions: I) -> Self
    where
        I: IntoIterator<Item = ProductVersion>,
    {
        let mut state = Self::default();
        let mut minors: Vec<(u32, u32)> = Vec::new();
        for version in versions {
            state.next_complete_version = state.next_complete_version.max(version.major);
            match version.minor {
                Some(minor) => minors.push((version.major, minor)),
                None => {
                    state.highest_complete_version_seen =
                        state.highest_complete_version_seen.max(version.major);
                }
            }
        }
        state.next_partial_version = minors
            .iter()
            .filter(|(major, _)| *major == state.next_complete_version)
            .map(|(_, minor)| *minor)
            .max()
            .unwrap_or_default();
        state
    }

    /// Advance the counters for one reservation attempt and return the
    /// version to try.
    pub fn increment(&mut self, partial: bool) -> ProductVersion {
        if !partial {
            self.next_complete_version = self.next_complete_version.saturating_add(1);
            return ProductVersion::complete(self.next_complete_version);
        }

        if self.highest_complete_version_seen == self.next_complete_version {
            // Last thing written was complete (or nothing yet): open a new lineage.
            self.next_complete_version = self.next_complete_version.saturating_add(1);
            self.next_partial_version = 1;
        } else {
            if self.next_complete_version == 0 {
                self.next_complete_version = 1;
            }
            self.next_partial_version = self.next_partial_version.saturating_add(1);
        }
        ProductVersion::partial(self.next_complete_version, self.next_partial_version)
    }
}

/// Reads a product directory and folds matching names into a [`VersionState`].
#[derive(Debug, Clone)]
pub struct VersionScanner<'a> {
    grammar: &'a FilenameGrammar,
}

impl<'a> VersionScanner<'a> {
    /// Create a scanner for the given grammar.
    #[must_use]
    pub const fn new(grammar: &'a FilenameGrammar) -> Self {
        Self { grammar }
    }

    /// Versions of every product file in `dir` whose base name is exactly `base_name`.
    ///
    /// A missing directory yields no versions. Subdirectories and names that do
    /// not parse are skipped.
    ///
    /// # Errors
    /// Returns an error if the directory exists but cannot be listed.
    pub fn existing_versions(&self, dir: &Path, base_name: &str) -> io::Result<Vec<ProductVersion>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.contains(base_name) || self.grammar.is_lock_file(name) {
                continue;
            }
            match self.grammar.parse_file_name(name) {
                Some(parsed) if parsed.base_name == base_name => versions.push(parsed.version),
                _ => tracing::trace!(file = name, "ignoring non-product entry"),
            }
        }
        Ok(versions)
    }

    /// Scan `dir` for `base_name` and return the resulting counters.
    ///
    /// # Errors
    /// Returns an error if the directory exists but cannot be listed.
    pub fn scan(&self, dir: &Path, base_name: &str) -> io::Result<VersionState> {
        let versions = self.existing_versions(dir, base_name)?;
        let state = VersionState::from_versions(versions.iter().copied());
        tracing::debug!(
            dir = %dir.display(),
            base_name,
            files = versions.len(),
            next_complete = state.next_complete_version,
            next_partial = state.next_partial_version,
            highest_complete = state.highest_complete_version_seen,
            "scanned product directory"
        );
        Ok(state)
    }

    /// Version the next reservation of `base_name` would try, without creating anything.
    ///
    /// # Errors
    /// Returns an error if the directory exists but cannot be listed.
    pub fn peek_next(&self, dir: &Path, base_name: &str, partial: bool) -> io::Result<ProductVersion> {
        Ok(self.scan(dir, base_name)?.increment(partial))
    }
}
