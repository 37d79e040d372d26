//! JSON settings file.
//!
//! Everything in the file is optional. Command-line flags override the
//! corresponding values.
//!
//! ```json
//! {
//!   "weights": "models/colorization.safetensors",
//!   "centers": "models/pts_in_hull.npy",
//!   "gate": { "low": 10.0, "high": 245.0 },
//!   "jpeg_quality": 90,
//!   "segmenter": { "program": "rembg", "args": ["i", "{input}", "{output}"] },
//!   "generator": { "program": "gen-image", "args": ["--prompt", "{prompt}", "-o", "{output}"] },
//!   "style_prefix": "studio ghibli style,"
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use fxlab_io::ExternalCommand;
use fxlab_pipeline::QualityGate;
use serde::{Deserialize, Serialize};

/// Errors from loading the settings file.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The file could not be read.
    #[error("failed to read settings {path}: {source}")]
    Read {
        /// Settings path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The file is not valid settings JSON.
    #[error("invalid settings {path}: {source}")]
    Parse {
        /// Settings path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// Values read from `--config`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Colorization network weights (safetensors).
    pub weights: Option<PathBuf>,
    /// Cluster-centre table (`.npy`).
    pub centers: Option<PathBuf>,
    /// Quality gate applied to every effect.
    pub gate: Option<QualityGate>,
    /// JPEG quality for JPEG-producing effects.
    pub jpeg_quality: Option<u8>,
    /// Background-removal program.
    pub segmenter: Option<ExternalCommand>,
    /// Image-generation program.
    pub generator: Option<ExternalCommand>,
    /// Text prepended to generation prompts.
    pub style_prefix: Option<String>,
}

impl Settings {
    /// Load `path`, or return defaults when `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_gives_defaults() {
        assert_eq!(Settings::load(None).unwrap(), Settings::default());
    }

    #[test]
    fn full_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fxlab.json");
        fs::write(
            &path,
            r#"{
                "weights": "w.safetensors",
                "centers": "c.npy",
                "gate": {"low": 5.0, "high": 250.0},
                "jpeg_quality": 80,
                "segmenter": {"program": "rembg", "args": ["i", "{input}", "{output}"]},
                "style_prefix": "ghibli,"
            }"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.weights, Some(PathBuf::from("w.safetensors")));
        assert_eq!(settings.gate, Some(QualityGate { low: 5.0, high: 250.0 }));
        assert_eq!(settings.jpeg_quality, Some(80));
        assert_eq!(settings.segmenter.unwrap().program, "rembg");
        assert!(settings.generator.is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fxlab.json");
        fs::write(&path, r#"{"jpeg_qualty": 80}"#).unwrap();
        assert!(matches!(
            Settings::load(Some(&path)),
            Err(SettingsError::Parse { .. })
        ));
    }

    #[test]
    fn unreadable_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(Some(&dir.path().join("absent.json"))).unwrap_err();
        assert!(matches!(err, SettingsError::Read { .. }));
    }
}
