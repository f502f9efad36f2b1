//! Staging area for intermediate files.
//!
//! Every object that goes through the pipeline is staged on local disk twice:
//! once as downloaded and once as transformed. Staged files are owned by a
//! single record's processing and are removed when that processing ends,
//! whichever way it ends.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// Default file name prefix for staged sources
pub const DEFAULT_PREFIX: &str = "image_listener_temp_";

/// Suffix appended to a source path to name its transformed result
pub const RESULT_SUFFIX: &str = "_inverted";

/// Errors that can occur while allocating staging paths
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("cannot create staging file in {dir}: {source}")]
    Create {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot create staging file {path}: {source}")]
    Derive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What a staged file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePurpose {
    /// The object as downloaded
    Source,

    /// The transformed object, ready for upload
    Result,
}

/// Counts staging paths handed out and given back
#[derive(Debug, Default)]
pub struct StagingLedger {
    created: AtomicUsize,
    released: AtomicUsize,
}

impl StagingLedger {
    /// Number of staging paths created so far
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Number of staging paths released so far
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Staging paths currently alive
    pub fn live(&self) -> usize {
        self.created().saturating_sub(self.released())
    }
}

/// Allocates staging paths in a directory
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
    prefix: String,
    ledger: Arc<StagingLedger>,
}

impl StagingArea {
    /// Create a staging area rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            ledger: Arc::new(StagingLedger::default()),
        }
    }

    /// Directory staged files are created in
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Shared ledger of created/released paths
    pub fn ledger(&self) -> Arc<StagingLedger> {
        Arc::clone(&self.ledger)
    }

    /// Allocate a fresh, empty, uniquely named file
    pub fn create(&self, purpose: StagePurpose) -> Result<StagedFile, StagingError> {
        let file = tempfile::Builder::new()
            .prefix(&self.prefix)
            .tempfile_in(&self.dir)
            .map_err(|source| StagingError::Create {
                dir: self.dir.clone(),
                source,
            })?;

        // Ownership of the path moves to StagedFile, which does its own cleanup
        let path = file
            .into_temp_path()
            .keep()
            .map_err(|e| StagingError::Create {
                dir: self.dir.clone(),
                source: e.error,
            })?;

        Ok(self.track(path, purpose))
    }

    /// Allocate the result file belonging to `source`: `<source><suffix>.<extension>`
    pub fn derive(
        &self,
        source: &StagedFile,
        suffix: &str,
        extension: &str,
    ) -> Result<StagedFile, StagingError> {
        let mut name = source.path().as_os_str().to_owned();
        name.push(suffix);
        name.push(".");
        name.push(extension);
        let path = PathBuf::from(name);

        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| StagingError::Derive {
                path: path.clone(),
                source,
            })?;

        Ok(self.track(path, StagePurpose::Result))
    }

    fn track(&self, path: PathBuf, purpose: StagePurpose) -> StagedFile {
        self.ledger.created.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(path = %path.display(), ?purpose, "Staging path created");

        StagedFile {
            path,
            purpose,
            ledger: Arc::clone(&self.ledger),
            released: false,
        }
    }
}

/// A staged file on local disk.
///
/// Call [`StagedFile::release`] when done with it. A staged file that is
/// dropped without being released (panic, cancelled future) is released on
/// drop.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    purpose: StagePurpose,
    ledger: Arc<StagingLedger>,
    released: bool,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn purpose(&self) -> StagePurpose {
        self.purpose
    }

    /// Remove the file. Failures are logged, never returned.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "Staging path released");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "Staging path already gone");
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "cannot remove temporary file"
                );
            }
        }

        self.ledger.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        self.release_once();
    }
}
