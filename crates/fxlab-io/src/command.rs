//! External programs as collaborators.
//!
//! An [`ExternalCommand`] runs a program once per request. Arguments may
//! contain the placeholders `{input}`, `{output}` and `{prompt}`; input
//! and output are scratch files that exist only for the duration of the
//! call. A prompt that no argument mentions is appended first; when an
//! argument list names neither `{input}` nor `{output}`, the paths are
//! appended after it in that order.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use serde::{Deserialize, Serialize};

use crate::scratch::ScratchFile;

/// Placeholder replaced by the input scratch path.
pub const INPUT_PLACEHOLDER: &str = "{input}";
/// Placeholder replaced by the output scratch path.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";
/// Placeholder replaced by the prompt text.
pub const PROMPT_PLACEHOLDER: &str = "{prompt}";

/// Errors from running an external program.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// A scratch file could not be created, written, or read.
    #[error("scratch file I/O failed: {0}")]
    Scratch(#[source] io::Error),

    /// The program could not be started.
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        /// Program that was run.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The program exited unsuccessfully.
    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        /// Program that was run.
        program: String,
        /// Exit status.
        status: ExitStatus,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// The program succeeded but wrote nothing.
    #[error("`{program}` produced no output")]
    EmptyOutput {
        /// Program that was run.
        program: String,
    },
}

/// A program invocation template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCommand {
    /// Executable name or path.
    pub program: String,
    /// Argument templates.
    #[serde(default)]
    pub args: Vec<String>,
    /// Directory for scratch files; the system temporary directory when
    /// unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
}

impl ExternalCommand {
    /// A command with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            scratch_dir: None,
        }
    }

    /// Set the argument templates.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Place scratch files in `dir`.
    #[must_use]
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Run the program on `input` bytes and return what it wrote to the
    /// output path.
    ///
    /// `input` is a pair of bytes and file extension, written to a
    /// scratch file; the output scratch file has extension
    /// `output_extension`. Both are removed before returning.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] if a scratch file fails, the program
    /// cannot be started or exits unsuccessfully, or it writes nothing.
    pub fn run(
        &self,
        input: Option<(&[u8], &str)>,
        prompt: Option<&str>,
        output_extension: &str,
    ) -> Result<Vec<u8>, CommandError> {
        let dir = self.scratch_dir.as_deref();
        let input_file = input
            .map(|(bytes, extension)| ScratchFile::with_bytes(dir, extension, bytes))
            .transpose()
            .map_err(CommandError::Scratch)?;
        let output_file = ScratchFile::empty(dir, output_extension).map_err(CommandError::Scratch)?;

        let args = self.expand_args(
            input_file.as_ref().map(ScratchFile::path),
            output_file.path(),
            prompt,
        );
        tracing::debug!(program = %self.program, ?args, "running external command");

        let result = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|source| CommandError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !result.status.success() {
            return Err(CommandError::Failed {
                program: self.program.clone(),
                status: result.status,
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_owned(),
            });
        }

        let bytes = output_file.read().map_err(CommandError::Scratch)?;
        if bytes.is_empty() {
            return Err(CommandError::EmptyOutput {
                program: self.program.clone(),
            });
        }
        tracing::debug!(program = %self.program, bytes = bytes.len(), "external command finished");
        Ok(bytes)
    }

    fn expand_args(&self, input: Option<&Path>, output: &Path, prompt: Option<&str>) -> Vec<OsString> {
        let mentions_paths = self
            .args
            .iter()
            .any(|arg| arg.contains(INPUT_PLACEHOLDER) || arg.contains(OUTPUT_PLACEHOLDER));

        let mut expanded: Vec<OsString> = self
            .args
            .iter()
            .map(|arg| {
                let mut arg = arg.replace(OUTPUT_PLACEHOLDER, &output.to_string_lossy());
                if let Some(input) = input {
                    arg = arg.replace(INPUT_PLACEHOLDER, &input.to_string_lossy());
                }
                if let Some(prompt) = prompt {
                    arg = arg.replace(PROMPT_PLACEHOLDER, prompt);
                }
                OsString::from(arg)
            })
            .collect();

        if let Some(prompt) = prompt
            && !self.args.iter().any(|arg| arg.contains(PROMPT_PLACEHOLDER))
        {
            expanded.push(OsString::from(prompt));
        }
        if !mentions_paths {
            if let Some(input) = input {
                expanded.push(input.as_os_str().to_owned());
            }
            expanded.push(output.as_os_str().to_owned());
        }
        expanded
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn placeholders_are_substituted() {
        let command = ExternalCommand::new("tool").with_args(["--in={input}", "{output}", "{prompt}"]);
        let args = command.expand_args(
            Some(Path::new("/tmp/a.png")),
            Path::new("/tmp/b.png"),
            Some("a cat"),
        );
        assert_eq!(args, os(&["--in=/tmp/a.png", "/tmp/b.png", "a cat"]));
    }

    #[test]
    fn paths_appended_without_placeholders() {
        let command = ExternalCommand::new("tool").with_args(["--fast"]);
        let args = command.expand_args(Some(Path::new("in")), Path::new("out"), None);
        assert_eq!(args, os(&["--fast", "in", "out"]));

        let args = command.expand_args(None, Path::new("out"), Some("a cat"));
        assert_eq!(args, os(&["--fast", "a cat", "out"]));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let command: ExternalCommand = serde_json::from_str(r#"{"program": "rembg"}"#).unwrap();
        assert_eq!(command, ExternalCommand::new("rembg"));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let command = ExternalCommand::new("fxlab-no-such-program").with_scratch_dir(dir.path());
        let err = command.run(Some((b"x", "png")), None, "png").unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn copies_through_scratch_files() {
        let dir = tempfile::tempdir().unwrap();
        let command = ExternalCommand::new("sh")
            .with_args(["-c", r#"cp "$0" "$1""#, "{input}", "{output}"])
            .with_scratch_dir(dir.path());
        let out = command.run(Some((b"hello", "bin")), None, "bin").unwrap();
        assert_eq!(out, b"hello");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn failure_reports_stderr_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let command = ExternalCommand::new("sh")
            .with_args(["-c", "echo model missing >&2; exit 3", "{input}", "{output}"])
            .with_scratch_dir(dir.path());
        let err = command.run(Some((b"x", "png")), None, "png").unwrap_err();
        match err {
            CommandError::Failed { stderr, .. } => assert_eq!(stderr, "model missing"),
            other => unreachable!("unexpected error: {other}"),
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn empty_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let command = ExternalCommand::new("true").with_scratch_dir(dir.path());
        let err = command.run(None, None, "png").unwrap_err();
        assert!(matches!(err, CommandError::EmptyOutput { .. }));
    }
}
