//! Effect diagnostics: timing and size metrics for each step.
//!
//! Every pipeline run collects an [`EffectDiagnostics`] alongside its
//! result. Durations are serialized as fractional seconds (`f64`) for
//! JSON compatibility, since `std::time::Duration` does not implement
//! serde traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::OutputFormat;

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from one effect invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectDiagnostics {
    /// Effect (recipe) name.
    pub effect: String,
    /// Decoding of the input bytes.
    pub decode: DecodeMetrics,
    /// One entry per stage, in order.
    pub stages: Vec<StageDiagnostics>,
    /// Quality-gate measurement, when the recipe has a gate.
    pub quality: Option<QualityMetrics>,
    /// Encoding of the result; absent until the pipeline finishes.
    pub encode: Option<EncodeMetrics>,
    /// Wall-clock duration of the whole invocation (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

/// Input size and decode cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeMetrics {
    /// Size of the encoded input.
    pub input_bytes: usize,
    /// Decoded width in pixels.
    pub width: u32,
    /// Decoded height in pixels.
    pub height: u32,
    /// Channels after decoding, before the alpha policy is applied.
    pub channels: u8,
    /// Decode time (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

/// Cost and output layout of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Stage identifier.
    pub stage: String,
    /// Channels of the stage output.
    pub channels: u8,
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

/// Result of the quality gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Measured mean intensity.
    pub mean: f64,
    /// Lower bound of the accepted band.
    pub low: f64,
    /// Upper bound of the accepted band.
    pub high: f64,
}

/// Output size and encode cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeMetrics {
    /// Target format.
    pub format: OutputFormat,
    /// Size of the encoded output.
    pub output_bytes: usize,
    /// Encode time (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl EffectDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Effect Diagnostics: {}\n{}", self.effect, "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} ({} channel(s), {} bytes in)",
            self.decode.width, self.decode.height, self.decode.channels, self.decode.input_bytes,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!("{:<20} {:>10} {:>10}  {}", "Step", "Duration", "% Total", "Details"));
        lines.push("-".repeat(72));

        let total_ms = duration_ms(self.total_duration);
        let mut row = |name: &str, duration: Duration, details: String| {
            let ms = duration_ms(duration);
            let pct = if total_ms > 0.0 { ms / total_ms * 100.0 } else { 0.0 };
            lines.push(format!("{name:<20} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        };

        row(
            "decode",
            self.decode.duration,
            format!("{}x{}", self.decode.width, self.decode.height),
        );
        for stage in &self.stages {
            row(&stage.stage, stage.duration, format!("{} channel(s)", stage.channels));
        }
        if let Some(encode) = &self.encode {
            row(
                "encode",
                encode.duration,
                format!("{} -> {} bytes", encode.format, encode.output_bytes),
            );
        }

        if let Some(quality) = &self.quality {
            lines.push(String::new());
            lines.push(format!(
                "Quality gate: mean {:.2} in [{}, {}]",
                quality.mean, quality.low, quality.high
            ));
        }

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> EffectDiagnostics {
        EffectDiagnostics {
            effect: "oil-painting".into(),
            decode: DecodeMetrics {
                input_bytes: 1000,
                width: 100,
                height: 80,
                channels: 3,
                duration: Duration::from_millis(4),
            },
            stages: vec![
                StageDiagnostics {
                    stage: "equalize".into(),
                    channels: 3,
                    duration: Duration::from_millis(10),
                },
                StageDiagnostics {
                    stage: "median-smooth".into(),
                    channels: 3,
                    duration: Duration::from_millis(6),
                },
            ],
            quality: Some(QualityMetrics {
                mean: 120.5,
                low: 10.0,
                high: 245.0,
            }),
            encode: Some(EncodeMetrics {
                format: OutputFormat::Jpeg { quality: 95 },
                output_bytes: 4321,
                duration: Duration::from_millis(5),
            }),
            total_duration: Duration::from_millis(25),
        }
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let ms = duration_ms(Duration::from_millis(1234));
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn report_lists_every_step() {
        let report = sample().report();
        assert!(report.contains("Effect Diagnostics: oil-painting"));
        assert!(report.contains("equalize"));
        assert!(report.contains("median-smooth"));
        assert!(report.contains("JPEG (quality 95) -> 4321 bytes"));
        assert!(report.contains("Quality gate: mean 120.50"));
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!((json["total_duration"].as_f64().unwrap() - 0.025).abs() < 1e-9);
        assert_eq!(json["encode"]["format"]["format"], "jpeg");
        let back: EffectDiagnostics = serde_json::from_value(json).unwrap();
        assert_eq!(back.stages.len(), 2);
        assert_eq!(back.encode.unwrap().output_bytes, 4321);
    }

    #[test]
    fn negative_duration_rejected() {
        let mut json = serde_json::to_value(sample()).unwrap();
        json["total_duration"] = serde_json::json!(-1.0);
        assert!(serde_json::from_value::<EffectDiagnostics>(json).is_err());
    }
}
