//! Atomic persistence of effect output.
//!
//! Output is staged in a temporary file next to the destination and
//! renamed into place only when [`PendingOutput::commit`] is called. A
//! pending output that is dropped uncommitted (because the effect or a
//! write failed) is removed, so the destination either holds a complete
//! result or is untouched.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Errors from writing output files.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// Staging or writing the temporary file failed.
    #[error("failed to write output for {path}: {source}")]
    Write {
        /// Final destination.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Renaming the staged file onto the destination failed.
    #[error("failed to move output into place at {path}: {source}")]
    Persist {
        /// Final destination.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// An output file being written; invisible at its destination until
/// committed.
#[derive(Debug)]
#[must_use = "uncommitted output is discarded on drop; call .commit() to keep it"]
pub struct PendingOutput {
    staged: NamedTempFile,
    destination: PathBuf,
}

impl PendingOutput {
    /// Stage a new output for `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::Write`] if the temporary file cannot be
    /// created in the destination's directory.
    pub fn create(destination: impl Into<PathBuf>) -> Result<Self, OutputError> {
        let destination = destination.into();
        let dir = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let staged = tempfile::Builder::new()
            .prefix(".fxlab-")
            .suffix(".partial")
            .tempfile_in(&dir)
            .map_err(|source| OutputError::Write {
                path: destination.clone(),
                source,
            })?;
        tracing::debug!(
            staged = %staged.path().display(),
            destination = %destination.display(),
            "staging output",
        );
        Ok(Self {
            staged,
            destination,
        })
    }

    /// Final destination path.
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Append bytes to the staged file.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::Write`] on I/O failure.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), OutputError> {
        self.staged
            .write_all(bytes)
            .map_err(|source| OutputError::Write {
                path: self.destination.clone(),
                source,
            })
    }

    /// Flush and atomically move the staged file onto the destination.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::Write`] if flushing fails and
    /// [`OutputError::Persist`] if the rename fails. The staged file is
    /// removed in both cases.
    pub fn commit(mut self) -> Result<PathBuf, OutputError> {
        self.staged
            .as_file_mut()
            .sync_all()
            .map_err(|source| OutputError::Write {
                path: self.destination.clone(),
                source,
            })?;
        let Self {
            staged,
            destination,
        } = self;
        staged
            .persist(&destination)
            .map_err(|err| OutputError::Persist {
                path: destination.clone(),
                source: err.error,
            })?;
        tracing::debug!(destination = %destination.display(), "output committed");
        Ok(destination)
    }
}

/// Write `bytes` to `destination` atomically.
///
/// # Errors
///
/// Returns [`OutputError`] if staging, writing, or renaming fails;
/// nothing is left at `destination` in that case.
pub fn write_atomic(destination: impl Into<PathBuf>, bytes: &[u8]) -> Result<PathBuf, OutputError> {
    let mut pending = PendingOutput::create(destination)?;
    pending.write(bytes)?;
    pending.commit()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn write_atomic_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let written = write_atomic(&path, b"payload").unwrap();
        assert_eq!(written, path);
        assert_eq!(fs::read(&path).unwrap(), b"payload");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn write_atomic_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jpg");
        fs::write(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn dropped_output_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        {
            let mut pending = PendingOutput::create(&path).unwrap();
            pending.write(b"half a result").unwrap();
            assert!(!path.exists());
        }
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_directory_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.png");
        let err = write_atomic(&path, b"x").unwrap_err();
        assert!(matches!(err, OutputError::Write { .. }));
    }
}
