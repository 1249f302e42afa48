//! Storage repository seam.
//!
//! The on-disk time-series engine is an external collaborator. The management
//! subsystem only opens, creates, closes, and drops repositories through
//! [`RepoEngine`]; [`FsRepoEngine`] is the directory-backed implementation the
//! data node ships with.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::types::Precision;

/// File holding the repository configuration inside its root directory.
pub const REPO_META_FILE: &str = "repo.json";

/// Sentinel for storage parameters the caller leaves to the engine default.
pub const UNSET: i32 = -1;

/// Parameters a repository is created with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Vnode id owning this repository.
    pub tsdb_id: i32,
    /// Timestamp precision.
    pub precision: Precision,
    /// Upper bound on tables (sessions) in the repository.
    pub max_tables: i32,
    /// Time span covered by one data file, in days.
    pub days_per_file: i32,
    /// Minimum rows per file block, or [`UNSET`].
    pub min_rows_per_file_block: i32,
    /// Maximum rows per file block, or [`UNSET`].
    pub max_rows_per_file_block: i32,
    /// Retention in days, or [`UNSET`].
    pub keep: i32,
    /// Cache size limit in bytes, or [`UNSET`].
    pub max_cache_size: i64,
}

/// Space and ingest counters for one repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoStats {
    /// Bytes occupied on disk before compression.
    pub total_storage: u64,
    /// Bytes occupied on disk after compression.
    pub comp_storage: u64,
    /// Points written since the repository was opened.
    pub points_written: u64,
}

/// An open storage repository.
pub trait Repository: Send + Sync {
    /// Root directory of the repository.
    fn root(&self) -> &Path;

    /// Configuration the repository was created with.
    fn config(&self) -> &RepoConfig;

    /// Current space and ingest counters.
    fn stats(&self) -> RepoStats;

    /// Accounts for points accepted by the write path.
    fn record_points(&self, points: u64);
}

/// Factory and destructor for storage repositories.
pub trait RepoEngine: Send + Sync {
    /// Opens an existing repository; never creates one.
    fn open(&self, root: &Path) -> StorageResult<Box<dyn Repository>>;

    /// Creates a new repository at `root`.
    fn create(&self, root: &Path, config: &RepoConfig) -> StorageResult<Box<dyn Repository>>;

    /// Releases the handle, leaving the repository on disk.
    fn close(&self, repo: Box<dyn Repository>);

    /// Releases the handle and deletes the repository from disk.
    fn drop_repo(&self, repo: Box<dyn Repository>) -> StorageResult<()>;
}

/// A repository backed by a plain directory.
pub struct FsRepo {
    root: PathBuf,
    config: RepoConfig,
    points_written: AtomicU64,
}

impl Repository for FsRepo {
    fn root(&self) -> &Path {
        &self.root
    }

    fn config(&self) -> &RepoConfig {
        &self.config
    }

    fn stats(&self) -> RepoStats {
        let bytes = match dir_size(&self.root) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "failed to size repository");
                0
            }
        };
        RepoStats {
            total_storage: bytes,
            comp_storage: bytes,
            points_written: self.points_written.load(Ordering::Relaxed),
        }
    }

    fn record_points(&self, points: u64) {
        self.points_written.fetch_add(points, Ordering::Relaxed);
    }
}

fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}

/// Directory-backed [`RepoEngine`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FsRepoEngine;

impl FsRepoEngine {
    /// Creates a new engine.
    pub fn new() -> Self {
        Self
    }
}

impl RepoEngine for FsRepoEngine {
    fn open(&self, root: &Path) -> StorageResult<Box<dyn Repository>> {
        let meta_path = root.join(REPO_META_FILE);
        if !meta_path.is_file() {
            return Err(StorageError::RepoNotFound {
                path: root.to_path_buf(),
            });
        }
        let contents = fs::read_to_string(&meta_path)?;
        let config: RepoConfig =
            serde_json::from_str(&contents).map_err(|e| StorageError::RepoCorrupted {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;

        debug!(root = %root.display(), tsdb_id = config.tsdb_id, "opened repository");
        Ok(Box::new(FsRepo {
            root: root.to_path_buf(),
            config,
            points_written: AtomicU64::new(0),
        }))
    }

    fn create(&self, root: &Path, config: &RepoConfig) -> StorageResult<Box<dyn Repository>> {
        let meta_path = root.join(REPO_META_FILE);
        if meta_path.exists() {
            return Err(StorageError::RepoAlreadyExists {
                path: root.to_path_buf(),
            });
        }
        fs::create_dir_all(root)?;
        let contents = serde_json::to_string_pretty(config).map_err(|e| {
            StorageError::RepoCorrupted {
                path: root.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        fs::write(&meta_path, contents)?;

        info!(
            root = %root.display(),
            tsdb_id = config.tsdb_id,
            max_tables = config.max_tables,
            days_per_file = config.days_per_file,
            "created repository"
        );
        Ok(Box::new(FsRepo {
            root: root.to_path_buf(),
            config: config.clone(),
            points_written: AtomicU64::new(0),
        }))
    }

    fn close(&self, repo: Box<dyn Repository>) {
        debug!(root = %repo.root().display(), "closed repository");
    }

    fn drop_repo(&self, repo: Box<dyn Repository>) -> StorageResult<()> {
        let root = repo.root().to_path_buf();
        drop(repo);
        fs::remove_dir_all(&root)?;
        info!(root = %root.display(), "dropped repository");
        Ok(())
    }
}
