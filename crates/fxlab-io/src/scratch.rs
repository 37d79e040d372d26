//! Scoped scratch files for exchanging data with external programs.
//!
//! A [`ScratchFile`] owns a uniquely named file that is removed when the
//! handle is dropped, on success and error paths alike. The file lives
//! in a caller-chosen directory or the system temporary directory.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::{Builder, NamedTempFile};

/// Prefix of every scratch file name, to make stray files attributable.
const PREFIX: &str = "fxlab-";

/// A temporary file deleted on drop.
#[derive(Debug)]
pub struct ScratchFile {
    file: NamedTempFile,
}

impl ScratchFile {
    /// Create an empty scratch file with the given extension (without the
    /// dot), e.g. `"png"`.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from creating the file.
    pub fn empty(dir: Option<&Path>, extension: &str) -> io::Result<Self> {
        let suffix = format!(".{extension}");
        let mut builder = Builder::new();
        builder.prefix(PREFIX).suffix(&suffix);
        let file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        tracing::trace!(path = %file.path().display(), "created scratch file");
        Ok(Self { file })
    }

    /// Create a scratch file holding `bytes`.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from creating or writing the file.
    pub fn with_bytes(dir: Option<&Path>, extension: &str, bytes: &[u8]) -> io::Result<Self> {
        let mut scratch = Self::empty(dir, extension)?;
        scratch.file.write_all(bytes)?;
        scratch.file.flush()?;
        Ok(scratch)
    }

    /// Filesystem path of the scratch file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Read the current contents from disk.
    ///
    /// Reads by path, so content written by another process is visible.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from reading the file.
    pub fn read(&self) -> io::Result<Vec<u8>> {
        fs::read(self.path())
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        tracing::trace!(path = %self.file.path().display(), "removing scratch file");
    }
}
