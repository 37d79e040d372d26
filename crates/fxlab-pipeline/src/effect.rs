//! Effect variants and the recipes that describe them.
//!
//! An [`EffectRecipe`] is plain data: an ordered list of stages, the
//! output encoding, what to do with an alpha channel, and an optional
//! [`QualityGate`]. Each [`EffectVariant`] maps to a built-in recipe,
//! adjusted by caller-supplied [`EffectOverrides`]. Custom recipes can be
//! deserialized from JSON and run the same way.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::clahe::ClaheConfig;
use crate::codec::{DEFAULT_JPEG_QUALITY, OutputFormat};
use crate::denoise::DenoiseConfig;
use crate::detail::DetailConfig;
use crate::dodge::DodgeConfig;
use crate::edge::EdgeMaskConfig;
use crate::error::QualityGateError;
use crate::saturation::SaturationConfig;
use crate::sharpen::{KernelSharpenConfig, UnsharpConfig};
use crate::smooth::{BilateralConfig, MedianConfig};
use crate::stage::StageKind;
use crate::types::RasterBuffer;

/// JPEG quality of the compress effect when none is requested.
pub const DEFAULT_COMPRESS_QUALITY: u8 = 60;

/// The built-in effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EffectVariant {
    /// Smoothed colors with black edge lines.
    Cartoon,
    /// Grayscale color-dodge sketch.
    PencilSketch,
    /// Predicted color for a grayscale photograph.
    Colorization,
    /// Vivid, posterized painting look.
    OilPainting,
    /// Gentle contrast, sharpness, and saturation lift.
    PhotoEnhance,
    /// Re-encode as JPEG.
    Compress,
}

impl EffectVariant {
    /// Every variant, in presentation order.
    pub const ALL: [Self; 6] = [
        Self::Cartoon,
        Self::PencilSketch,
        Self::Colorization,
        Self::OilPainting,
        Self::PhotoEnhance,
        Self::Compress,
    ];

    /// Kebab-case identifier.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cartoon => "cartoon",
            Self::PencilSketch => "pencil-sketch",
            Self::Colorization => "colorization",
            Self::OilPainting => "oil-painting",
            Self::PhotoEnhance => "photo-enhance",
            Self::Compress => "compress",
        }
    }

    /// The recipe for this variant with `overrides` applied.
    ///
    /// Overrides that do not concern the variant are ignored: blur sigma
    /// and sharpen strength only affect the pencil sketch, and JPEG
    /// quality only affects variants that encode JPEG. A gate override
    /// applies to every variant.
    #[must_use]
    pub fn recipe(self, overrides: &EffectOverrides) -> EffectRecipe {
        let mut recipe = match self {
            Self::Cartoon => EffectRecipe::new(
                self.name(),
                vec![
                    StageKind::Bilateral(BilateralConfig::default()),
                    StageKind::EdgeMask(EdgeMaskConfig::default()),
                    StageKind::Equalize(ClaheConfig::with_clip_limit(3.0)),
                ],
                OutputFormat::Png,
            ),
            Self::PencilSketch => {
                let mut stages = vec![StageKind::PencilSketch(DodgeConfig {
                    blur_sigma: overrides.blur_sigma.unwrap_or(DodgeConfig::default().blur_sigma),
                })];
                if let Some(strength) = overrides.sharpen {
                    stages.push(StageKind::KernelSharpen(KernelSharpenConfig { strength }));
                }
                stages.push(StageKind::ToRgb);
                EffectRecipe::new(self.name(), stages, OutputFormat::Png)
            }
            Self::Colorization => EffectRecipe::new(
                self.name(),
                vec![
                    StageKind::Denoise(DenoiseConfig::default()),
                    StageKind::Equalize(ClaheConfig::with_clip_limit(3.0)),
                    StageKind::Colorize,
                    StageKind::DetailEnhance(DetailConfig::default()),
                ],
                OutputFormat::Png,
            )
            .with_gate(QualityGate::default()),
            Self::OilPainting => EffectRecipe::new(
                self.name(),
                vec![
                    StageKind::Equalize(ClaheConfig::with_clip_limit(3.0)),
                    StageKind::SaturationBoost(SaturationConfig { offset: 25 }),
                    StageKind::UnsharpMask(UnsharpConfig {
                        sigma: 2.0,
                        alpha: 1.6,
                        beta: 0.6,
                    }),
                    StageKind::MedianSmooth(MedianConfig { kernel: 7 }),
                ],
                OutputFormat::Jpeg {
                    quality: DEFAULT_JPEG_QUALITY,
                },
            ),
            Self::PhotoEnhance => EffectRecipe::new(
                self.name(),
                vec![
                    StageKind::Equalize(ClaheConfig::with_clip_limit(0.9)),
                    StageKind::UnsharpMask(UnsharpConfig {
                        sigma: 3.1,
                        alpha: 1.7,
                        beta: 0.7,
                    }),
                    StageKind::SaturationBoost(SaturationConfig { offset: 23 }),
                ],
                OutputFormat::Png,
            )
            .with_alpha(AlphaPolicy::Preserve),
            Self::Compress => EffectRecipe::new(
                self.name(),
                Vec::new(),
                OutputFormat::Jpeg {
                    quality: DEFAULT_COMPRESS_QUALITY,
                },
            ),
        };

        if let (Some(quality), OutputFormat::Jpeg { .. }) = (overrides.jpeg_quality, recipe.output) {
            recipe.output = OutputFormat::Jpeg { quality };
        }
        if let Some(gate) = overrides.gate {
            recipe.gate = Some(gate);
        }
        recipe
    }
}

impl fmt::Display for EffectVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown effect name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown effect `{0}`")]
pub struct UnknownEffect(pub String);

impl FromStr for EffectVariant {
    type Err = UnknownEffect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.name() == s)
            .ok_or_else(|| UnknownEffect(s.to_owned()))
    }
}

/// What happens to an alpha channel present in the decoded input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlphaPolicy {
    /// Remove alpha before the first stage; stages see opaque color.
    #[default]
    Drop,
    /// Carry alpha through the stages and into PNG output.
    Preserve,
}

/// Accepted band for the mean intensity of a result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityGate {
    /// Lowest accepted mean on the 8-bit scale.
    pub low: f64,
    /// Highest accepted mean on the 8-bit scale.
    pub high: f64,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            low: 10.0,
            high: 245.0,
        }
    }
}

impl QualityGate {
    /// Measure `buffer` and accept or reject it.
    ///
    /// Returns the measured mean when it lies inside `[low, high]`.
    ///
    /// # Errors
    ///
    /// Returns [`QualityGateError`] when the mean is outside the band.
    pub fn check(&self, buffer: &RasterBuffer) -> Result<f64, QualityGateError> {
        let mean = buffer.mean_intensity();
        if mean < self.low || mean > self.high {
            return Err(QualityGateError {
                mean,
                low: self.low,
                high: self.high,
            });
        }
        Ok(mean)
    }
}

/// A complete, data-only description of an effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectRecipe {
    /// Name reported in errors and diagnostics.
    pub name: String,
    /// Stages in application order.
    pub stages: Vec<StageKind>,
    /// Output encoding.
    pub output: OutputFormat,
    /// Alpha handling.
    #[serde(default)]
    pub alpha: AlphaPolicy,
    /// Post-processing sanity check, if any.
    #[serde(default)]
    pub gate: Option<QualityGate>,
}

impl EffectRecipe {
    /// A recipe that drops alpha and has no quality gate.
    #[must_use]
    pub fn new(name: impl Into<String>, stages: Vec<StageKind>, output: OutputFormat) -> Self {
        Self {
            name: name.into(),
            stages,
            output,
            alpha: AlphaPolicy::Drop,
            gate: None,
        }
    }

    /// Set the alpha policy.
    #[must_use]
    pub const fn with_alpha(mut self, alpha: AlphaPolicy) -> Self {
        self.alpha = alpha;
        self
    }

    /// Reject results whose mean intensity falls outside `gate`.
    #[must_use]
    pub const fn with_gate(mut self, gate: QualityGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Whether any stage needs the colorization engine.
    #[must_use]
    pub fn needs_engine(&self) -> bool {
        self.stages.iter().any(|s| matches!(s, StageKind::Colorize))
    }
}

/// Caller-supplied adjustments to a built-in recipe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectOverrides {
    /// Pencil sketch blur sigma.
    pub blur_sigma: Option<f32>,
    /// Pencil sketch sharpen strength; `None` skips sharpening.
    pub sharpen: Option<i32>,
    /// JPEG quality for JPEG-encoding variants.
    pub jpeg_quality: Option<u8>,
    /// Quality gate bounds; enables the gate on any variant.
    pub gate: Option<QualityGate>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::stage::Stage;

    fn stage_names(recipe: &EffectRecipe) -> Vec<&'static str> {
        recipe.stages.iter().map(Stage::name).collect()
    }

    #[test]
    fn names_round_trip_through_from_str() {
        for variant in EffectVariant::ALL {
            assert_eq!(variant.name().parse::<EffectVariant>().unwrap(), variant);
            assert_eq!(variant.to_string(), variant.name());
        }
        assert_eq!(
            "sepia".parse::<EffectVariant>().unwrap_err(),
            UnknownEffect("sepia".into())
        );
    }

    #[test]
    fn serde_names_match_display_names() {
        for variant in EffectVariant::ALL {
            let json = serde_json::to_string(&variant).unwrap();
            assert_eq!(json, format!("\"{}\"", variant.name()));
        }
    }

    #[test]
    fn built_in_stage_orders() {
        let none = EffectOverrides::default();
        assert_eq!(
            stage_names(&EffectVariant::Cartoon.recipe(&none)),
            ["bilateral", "edge-mask", "equalize"]
        );
        assert_eq!(
            stage_names(&EffectVariant::Colorization.recipe(&none)),
            ["denoise", "equalize", "colorize", "detail-enhance"]
        );
        assert_eq!(
            stage_names(&EffectVariant::OilPainting.recipe(&none)),
            ["equalize", "saturation-boost", "unsharp-mask", "median-smooth"]
        );
        assert_eq!(
            stage_names(&EffectVariant::PhotoEnhance.recipe(&none)),
            ["equalize", "unsharp-mask", "saturation-boost"]
        );
        assert!(EffectVariant::Compress.recipe(&none).stages.is_empty());
    }

    #[test]
    fn outputs_and_policies() {
        let none = EffectOverrides::default();
        assert_eq!(
            EffectVariant::Compress.recipe(&none).output,
            OutputFormat::Jpeg { quality: 60 }
        );
        assert_eq!(
            EffectVariant::OilPainting.recipe(&none).output,
            OutputFormat::Jpeg { quality: 95 }
        );
        assert_eq!(EffectVariant::Cartoon.recipe(&none).output, OutputFormat::Png);
        assert_eq!(
            EffectVariant::PhotoEnhance.recipe(&none).alpha,
            AlphaPolicy::Preserve
        );
        assert_eq!(EffectVariant::Cartoon.recipe(&none).alpha, AlphaPolicy::Drop);
    }

    #[test]
    fn only_colorization_is_gated_by_default() {
        let none = EffectOverrides::default();
        for variant in EffectVariant::ALL {
            let recipe = variant.recipe(&none);
            assert_eq!(recipe.gate.is_some(), variant == EffectVariant::Colorization);
            assert_eq!(recipe.needs_engine(), variant == EffectVariant::Colorization);
        }
    }

    #[test]
    fn pencil_overrides() {
        let overrides = EffectOverrides {
            blur_sigma: Some(9.0),
            sharpen: Some(7),
            ..EffectOverrides::default()
        };
        let recipe = EffectVariant::PencilSketch.recipe(&overrides);
        assert_eq!(
            recipe.stages,
            vec![
                StageKind::PencilSketch(DodgeConfig { blur_sigma: 9.0 }),
                StageKind::KernelSharpen(KernelSharpenConfig { strength: 7 }),
                StageKind::ToRgb,
            ]
        );
        let plain = EffectVariant::PencilSketch.recipe(&EffectOverrides::default());
        assert_eq!(stage_names(&plain), ["pencil-sketch", "to-rgb"]);
    }

    #[test]
    fn jpeg_quality_only_touches_jpeg_outputs() {
        let overrides = EffectOverrides {
            jpeg_quality: Some(40),
            ..EffectOverrides::default()
        };
        assert_eq!(
            EffectVariant::Compress.recipe(&overrides).output,
            OutputFormat::Jpeg { quality: 40 }
        );
        assert_eq!(
            EffectVariant::Cartoon.recipe(&overrides).output,
            OutputFormat::Png
        );
    }

    #[test]
    fn gate_override_applies_anywhere() {
        let gate = QualityGate {
            low: 1.0,
            high: 254.0,
        };
        let overrides = EffectOverrides {
            gate: Some(gate),
            ..EffectOverrides::default()
        };
        assert_eq!(EffectVariant::Compress.recipe(&overrides).gate, Some(gate));
        assert_eq!(EffectVariant::Colorization.recipe(&overrides).gate, Some(gate));
    }

    #[test]
    fn gate_accepts_band_and_rejects_extremes() {
        let gate = QualityGate::default();
        let black = RasterBuffer::filled(4, 4, 3, crate::ColorSpace::Rgb, 0u8).unwrap();
        let white = RasterBuffer::filled(4, 4, 3, crate::ColorSpace::Rgb, 255u8).unwrap();
        let gray = RasterBuffer::filled(4, 4, 3, crate::ColorSpace::Rgb, 128u8).unwrap();
        let err = gate.check(&black).unwrap_err();
        assert!(err.mean.abs() < f64::EPSILON);
        assert!(gate.check(&white).is_err());
        assert!((gate.check(&gray).unwrap() - 128.0).abs() < f64::EPSILON);
    }

    #[test]
    fn recipe_json_round_trip() {
        let recipe = EffectVariant::OilPainting.recipe(&EffectOverrides::default());
        let json = serde_json::to_string_pretty(&recipe).unwrap();
        let back: EffectRecipe = serde_json::from_str(&json).unwrap();
        assert_eq!(back, recipe);
    }

    #[test]
    fn custom_recipe_from_minimal_json() {
        let recipe: EffectRecipe = serde_json::from_str(
            r#"{
                "name": "punchy",
                "stages": [
                    {"stage": "equalize", "clip_limit": 2.0},
                    {"stage": "saturation-boost", "offset": 40}
                ],
                "output": {"format": "jpeg", "quality": 80}
            }"#,
        )
        .unwrap();
        assert_eq!(recipe.alpha, AlphaPolicy::Drop);
        assert_eq!(recipe.gate, None);
        assert_eq!(recipe.stages.len(), 2);
        assert_eq!(recipe.output, OutputFormat::Jpeg { quality: 80 });
    }
}
