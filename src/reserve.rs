//! Atomic reservation of a product's data and metadata files.
//!
//! Reservation is optimistic. Each attempt rescans the product directory,
//! picks the next version and tries to create the data file with
//! create-new semantics (`O_CREAT|O_EXCL`). Losing that race only means
//! another producer claimed the version first, so the attempt is retried with
//! a fresh scan after a short backoff. The create is the only synchronization;
//! the scan is never trusted on its own.
//!
//! Once the data file exists, the metadata sidecar is created with the same
//! version. If that fails the reservation is abandoned: the zero-length data
//! file is removed (best effort) and the error is returned.
//!
//! Uniqueness depends on the filesystem honoring exclusive create. Some NFS
//! configurations do not, and on those two hosts can both "win" the same
//! version.
//!
//! Complete and partial files of the same major have different names, so a
//! complete and a partial reservation racing each other can both claim major
//! `N` (as `N` and `N.1`). Both pairs are distinct and valid, but the partial
//! lineage `N.x` is then closed from the moment it opens; the next partial
//! starts at `N+1.1`.

use crate::builder::ProductIdentity;
use crate::grammar::{FileKind, FilenameGrammar};
use crate::lock::{self, LockConfig, LockGuard};
use crate::version::{ProductVersion, VersionScanner};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MAX_RETRIES: usize = 32;
const INITIAL_BACKOFF_MS: u64 = 1;
const MAX_BACKOFF_MS: u64 = 250;

/// How hard [`ProductFilename::reserve`] tries before giving up on contention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservePolicy {
    /// Collisions tolerated before failing; the first attempt is free.
    pub max_retries: usize,
    /// Sleep after the first collision.
    pub initial_backoff_ms: u64,
    /// Upper bound for the doubling sleep.
    pub max_backoff_ms: u64,
}

impl Default for ReservePolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
        }
    }
}

/// Failure to reserve a product.
#[derive(Debug, Error)]
pub enum ReserveError {
    /// The product directory could not be created.
    #[error("cannot reserve: create product directory {}: {source}", dir.display())]
    CreateDir {
        /// Directory that could not be created.
        dir: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// The product directory could not be listed.
    #[error("cannot reserve: scan {}: {source}", dir.display())]
    Scan {
        /// Directory being scanned.
        dir: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// Creating the data file failed for a reason other than a collision.
    #[error("cannot reserve: create {}: {source}", path.display())]
    Create {
        /// Data file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// Every attempt collided with another producer.
    #[error("cannot reserve: {attempts} attempts collided for {base_name} in {}", dir.display())]
    Contention {
        /// Product directory.
        dir: PathBuf,
        /// Product base name.
        base_name: String,
        /// Create attempts made.
        attempts: usize,
    },
    /// The data file was claimed but the metadata sidecar could not be created.
    #[error(
        "cannot reserve: create metadata {}: {source} (data file {} {})",
        path.display(),
        data_file.display(),
        if *orphan_removed { "removed" } else { "left behind" }
    )]
    MetadataSidecar {
        /// Metadata file path.
        path: PathBuf,
        /// Data file that had already been created.
        data_file: PathBuf,
        /// Whether the data file was cleaned up.
        orphan_removed: bool,
        /// Underlying I/O error.
        source: io::Error,
    },
}

/// The two files claimed by a successful reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reservation {
    /// Zero-length data file now owned by the caller.
    pub data_file: PathBuf,
    /// Zero-length metadata file now owned by the caller.
    pub metadata_file: PathBuf,
    /// Version shared by both files.
    pub version: ProductVersion,
}

/// A product identity plus, once reserved, its versioned files.
#[derive(Debug, Clone)]
pub struct ProductFilename {
    identity: ProductIdentity,
    grammar: FilenameGrammar,
    policy: ReservePolicy,
    reservation: Option<Reservation>,
}

fn create_placeholder(path: &Path) -> io::Result<()> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map(drop)
}

impl ProductFilename {
    /// Wrap an identity; nothing is reserved yet.
    #[must_use]
    pub const fn new(
        identity: ProductIdentity,
        grammar: FilenameGrammar,
        policy: ReservePolicy,
    ) -> Self {
        Self {
            identity,
            grammar,
            policy,
            reservation: None,
        }
    }

    /// Claim the next free version for this product.
    ///
    /// Calling this again after a success returns the existing reservation
    /// without touching the filesystem.
    ///
    /// # Errors
    /// Returns [`ReserveError`] when the directory cannot be created or read,
    /// a create fails for any reason other than a collision, the retry budget
    /// is exhausted, or the metadata sidecar cannot be created.
    pub fn reserve(&mut self) -> Result<&Reservation, ReserveError> {
        let reservation = match self.reservation.take() {
            Some(existing) => existing,
            None => self.reserve_inner()?,
        };
        Ok(self.reservation.insert(reservation))
    }

    fn reserve_inner(&self) -> Result<Reservation, ReserveError> {
        let dir = &self.identity.product_path;
        let base_name = self.identity.product_name.as_str();
        let partial = self.identity.partial;
        let _span = tracing::debug_span!("reserve", dir = %dir.display(), base_name, partial)
            .entered();

        fs::create_dir_all(dir).map_err(|source| ReserveError::CreateDir {
            dir: dir.clone(),
            source,
        })?;

        let scanner = VersionScanner::new(&self.grammar);
        let mut attempt: usize = 0;
        let mut wait_ms = self.policy.initial_backoff_ms;

        let (version, data_file) = loop {
            let mut state = scanner
                .scan(dir, base_name)
                .map_err(|source| ReserveError::Scan {
                    dir: dir.clone(),
                    source,
                })?;
            let version = state.increment(partial);
            let data_file = dir.join(self.grammar.file_name(
                base_name,
                version,
                partial,
                FileKind::Data,
            ));

            match create_placeholder(&data_file) {
                Ok(()) => break (version, data_file),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    tracing::debug!(%version, attempt, "version already claimed, rescanning");
                    if attempt >= self.policy.max_retries {
                        tracing::warn!(attempts = attempt + 1, "giving up on contended product");
                        return Err(ReserveError::Contention {
                            dir: dir.clone(),
                            base_name: base_name.to_string(),
                            attempts: attempt + 1,
                        });
                    }
                    let jitter = rand::thread_rng().gen_range(0..=wait_ms / 2);
                    sleep(Duration::from_millis(wait_ms.saturating_add(jitter)));
                    attempt = attempt.saturating_add(1);
                    wait_ms = wait_ms.saturating_mul(2).min(self.policy.max_backoff_ms);
                }
                Err(source) => {
                    return Err(ReserveError::Create {
                        path: data_file,
                        source,
                    })
                }
            }
        };

        let metadata_file = dir.join(self.grammar.file_name(
            base_name,
            version,
            partial,
            FileKind::Metadata,
        ));
        if let Err(source) = create_placeholder(&metadata_file) {
            let orphan_removed = match fs::remove_file(&data_file) {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(
                        data_file = %data_file.display(),
                        error = %err,
                        "could not remove orphaned data file"
                    );
                    false
                }
            };
            return Err(ReserveError::MetadataSidecar {
                path: metadata_file,
                data_file,
                orphan_removed,
                source,
            });
        }

        tracing::info!(
            %version,
            data_file = %data_file.display(),
            attempts = attempt + 1,
            "reserved product"
        );
        Ok(Reservation {
            data_file,
            metadata_file,
            version,
        })
    }

    /// Take the advisory lock on the reserved data file.
    ///
    /// # Errors
    /// Fails if the product is not reserved yet or the lock cannot be taken.
    pub fn lock(&self, owner: impl Into<String>, cfg: LockConfig) -> anyhow::Result<LockGuard> {
        let data_file = self
            .data_file_path()
            .ok_or_else(|| anyhow::anyhow!("product {} is not reserved", self.product_name()))?;
        lock::acquire_lock(&self.grammar.lock_path(data_file), owner, cfg)
    }

    /// The identity this filename was built from.
    #[must_use]
    pub const fn identity(&self) -> &ProductIdentity {
        &self.identity
    }

    /// The reservation, if one has been made.
    #[must_use]
    pub const fn reservation(&self) -> Option<&Reservation> {
        self.reservation.as_ref()
    }

    /// Whether [`Self::reserve`] has succeeded.
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        self.reservation.is_some()
    }

    /// Whether this is a partial product.
    #[must_use]
    pub const fn is_partial(&self) -> bool {
        self.identity.partial
    }

    /// Whether the payload is compressed.
    #[must_use]
    pub const fn is_compressed(&self) -> bool {
        self.identity.compressed
    }

    /// Reserved data file.
    #[must_use]
    pub fn data_file_path(&self) -> Option<&Path> {
        self.reservation.as_ref().map(|r| r.data_file.as_path())
    }

    /// Reserved metadata file.
    #[must_use]
    pub fn metadata_file_path(&self) -> Option<&Path> {
        self.reservation.as_ref().map(|r| r.metadata_file.as_path())
    }

    /// Reserved version.
    #[must_use]
    pub fn version(&self) -> Option<ProductVersion> {
        self.reservation.as_ref().map(|r| r.version)
    }

    /// Reserved major version.
    #[must_use]
    pub fn major_version(&self) -> Option<u32> {
        self.version().map(ProductVersion::major)
    }

    /// Reserved minor version; `None` when unreserved or complete.
    #[must_use]
    pub fn minor_version(&self) -> Option<u32> {
        self.version().and_then(ProductVersion::minor)
    }

    /// Product directory.
    #[must_use]
    pub fn product_path(&self) -> &Path {
        &self.identity.product_path
    }

    /// Product base name.
    #[must_use]
    pub fn product_name(&self) -> &str {
        &self.identity.product_name
    }
}
