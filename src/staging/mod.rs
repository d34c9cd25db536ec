//! Staging Store
//!
//! Owns the single directory that holds in-progress uploads for the life
//! of the process. Session files are named by their session id and
//! renamed in place when committed.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};

use parking_lot::Mutex;
use uuid::Uuid;

/// Prefix of generated root directories
const ROOT_PREFIX: &str = "chunked-upload";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("Failed to create staging root {path}: {source}")]
    Initialization {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Staging root {0} does not exist")]
    NotInitialized(PathBuf),

    #[error("A file named '{0}' already exists in the staging root")]
    AlreadyExists(String),

    #[error("Invalid file name: '{0}'")]
    InvalidName(String),

    #[error("Staging I/O error: {0}")]
    Io(#[from] io::Error),
}

// ============================================================================
// Staging Store
// ============================================================================

/// A process-wide staging directory
#[derive(Debug)]
pub struct StagingStore {
    root: PathBuf,

    /// Generated roots are removed on teardown, explicit ones are kept
    owned: bool,

    /// Serializes the exists-check and rename of commits
    finalize_lock: Mutex<()>,
}

impl StagingStore {
    /// Create a uniquely named root under `parent`, or under the OS temp
    /// directory when no parent is given.
    pub fn create(parent: Option<&Path>) -> Result<Self, StagingError> {
        let parent = parent
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        let root = parent.join(format!("{}-{}", ROOT_PREFIX, Uuid::new_v4().simple()));

        fs::create_dir(&root).map_err(|source| StagingError::Initialization {
            path: root.clone(),
            source,
        })?;

        tracing::info!(root = %root.display(), "Created staging root");

        Ok(Self {
            root,
            owned: true,
            finalize_lock: Mutex::new(()),
        })
    }

    /// Use `root` as-is, creating it if missing. Files already in it stay
    /// resolvable, so sessions survive a restart.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StagingError> {
        let root = root.into();

        fs::create_dir_all(&root).map_err(|source| StagingError::Initialization {
            path: root.clone(),
            source,
        })?;

        tracing::info!(root = %root.display(), "Opened staging root");

        Ok(Self {
            root,
            owned: false,
            finalize_lock: Mutex::new(()),
        })
    }

    /// The staging directory
    pub fn root(&self) -> Result<&Path, StagingError> {
        if !self.root.is_dir() {
            return Err(StagingError::NotInitialized(self.root.clone()));
        }
        Ok(&self.root)
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Create an empty file named exactly `name`. Never overwrites.
    pub fn new_file(&self, name: &str) -> Result<PathBuf, StagingError> {
        validate_name(name)?;
        let path = self.root()?.join(name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(StagingError::AlreadyExists(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create an empty file with a generated name
    pub fn new_unique_file(&self) -> Result<PathBuf, StagingError> {
        loop {
            let name = format!("temp{}.tmp", Uuid::new_v4().simple());
            match self.new_file(&name) {
                Err(StagingError::AlreadyExists(_)) => continue,
                other => return other,
            }
        }
    }

    /// Path of the regular file `name`, if there is one
    pub fn resolve(&self, name: &str) -> Result<Option<PathBuf>, StagingError> {
        if validate_name(name).is_err() {
            return Ok(None);
        }

        let path = self.root()?.join(name);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(Some(path)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Rename `staging_path` to `final_name` within the root.
    ///
    /// The rename is the only step that makes the result visible; there is
    /// no copy fallback. An existing target is never replaced.
    pub fn finalize(&self, staging_path: &Path, final_name: &str) -> Result<PathBuf, StagingError> {
        validate_name(final_name)?;
        let target = self.root()?.join(final_name);

        let _guard = self.finalize_lock.lock();

        if fs::symlink_metadata(&target).is_ok() {
            return Err(StagingError::AlreadyExists(final_name.to_string()));
        }

        fs::rename(staging_path, &target)?;

        Ok(target)
    }

    /// Remove the root if this store generated it.
    ///
    /// Committed files live in the root and are removed with it.
    pub fn teardown(&self) -> Result<(), StagingError> {
        if !self.owned {
            return Ok(());
        }

        match fs::remove_dir_all(&self.root) {
            Ok(()) => {
                tracing::info!(root = %self.root.display(), "Removed staging root");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// A name must be exactly one normal path component
pub fn validate_name(name: &str) -> Result<(), StagingError> {
    let mut components = Path::new(name).components();

    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => Ok(()),
        _ => Err(StagingError::InvalidName(name.to_string())),
    }
}

// ============================================================================
// Tests
// ============================================================================
