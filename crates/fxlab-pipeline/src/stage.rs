//! Stages: named, configured transforms that effects are composed of.
//!
//! This module defines the [`Stage`] trait and the [`StageKind`] enum
//! that implements it for every transform in the library. An effect is
//! declared as an ordered list of `StageKind` values, so a new effect is
//! new data, not new control flow.
//!
//! # Strategy pattern
//!
//! `StageKind` is serde-tagged (`{"stage": "unsharp-mask", "sigma": 2.0,
//! ...}`), which lets recipes be stored as JSON and selected at runtime.
//! Each variant carries the immutable configuration of its stage.

use serde::{Deserialize, Serialize};

use crate::clahe::{ClaheConfig, equalize_luminance};
use crate::color;
use crate::denoise::{DenoiseConfig, denoise_colored};
use crate::detail::{DetailConfig, detail_enhance};
use crate::dodge::{DodgeConfig, pencil_sketch};
use crate::edge::{EdgeMaskConfig, apply_mask, edge_mask};
use crate::error::{InferenceError, StageFailure};
use crate::inference::ColorizationEngine;
use crate::saturation::{SaturationConfig, boost_saturation};
use crate::sharpen::{KernelSharpenConfig, UnsharpConfig, kernel_sharpen, unsharp_mask};
use crate::smooth::{BilateralConfig, MedianConfig, bilateral, median_smooth};
use crate::types::{ColorSpace, RasterBuffer};

/// Read-only inputs shared by every stage of one invocation.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    source: &'a RasterBuffer,
    engine: Option<&'a ColorizationEngine>,
}

impl<'a> StageContext<'a> {
    /// Context for an invocation whose decoded input is `source`.
    #[must_use]
    pub const fn new(source: &'a RasterBuffer) -> Self {
        Self {
            source,
            engine: None,
        }
    }

    /// Make a colorization engine available to [`StageKind::Colorize`].
    #[must_use]
    pub const fn with_engine(mut self, engine: Option<&'a ColorizationEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// The decoded input, before any stage ran.
    #[must_use]
    pub const fn source(&self) -> &'a RasterBuffer {
        self.source
    }

    /// The colorization engine, if one was supplied.
    #[must_use]
    pub const fn engine(&self) -> Option<&'a ColorizationEngine> {
        self.engine
    }
}

/// Trait for pipeline stages.
///
/// Input: the buffer produced by the previous stage.
/// Output: a new buffer with the same width and height.
pub trait Stage {
    /// Stable identifier used in logs, diagnostics, and errors.
    fn name(&self) -> &'static str;

    /// Transform `input`.
    ///
    /// # Errors
    ///
    /// Returns [`StageFailure`] when the input or configuration violates
    /// a precondition of the stage.
    fn apply(
        &self,
        input: RasterBuffer,
        context: &StageContext<'_>,
    ) -> Result<RasterBuffer, StageFailure>;
}

/// Every stage the library provides, with its configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "kebab-case")]
pub enum StageKind {
    /// Non-local-means denoising in LAB.
    Denoise(DenoiseConfig),
    /// CLAHE on LAB lightness.
    Equalize(ClaheConfig),
    /// Repeated bilateral smoothing.
    Bilateral(BilateralConfig),
    /// Black out edges found in the decoded source image.
    EdgeMask(EdgeMaskConfig),
    /// Color-dodge the grayscale image with its blurred inversion.
    /// Produces a single-channel buffer.
    PencilSketch(DodgeConfig),
    /// Cross-kernel sharpening of dark strokes.
    KernelSharpen(KernelSharpenConfig),
    /// Add a constant to HSV saturation.
    SaturationBoost(SaturationConfig),
    /// `alpha * original - beta * blurred`.
    UnsharpMask(UnsharpConfig),
    /// Per-channel median filter.
    MedianSmooth(MedianConfig),
    /// Replace chrominance with the network prediction.
    Colorize,
    /// Amplify luminance detail with a domain-transform filter.
    DetailEnhance(DetailConfig),
    /// Broadcast a gray buffer to three equal RGB channels.
    ToRgb,
    /// Remove the alpha channel, if any.
    DropAlpha,
}

impl Stage for StageKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Denoise(_) => "denoise",
            Self::Equalize(_) => "equalize",
            Self::Bilateral(_) => "bilateral",
            Self::EdgeMask(_) => "edge-mask",
            Self::PencilSketch(_) => "pencil-sketch",
            Self::KernelSharpen(_) => "kernel-sharpen",
            Self::SaturationBoost(_) => "saturation-boost",
            Self::UnsharpMask(_) => "unsharp-mask",
            Self::MedianSmooth(_) => "median-smooth",
            Self::Colorize => "colorize",
            Self::DetailEnhance(_) => "detail-enhance",
            Self::ToRgb => "to-rgb",
            Self::DropAlpha => "drop-alpha",
        }
    }

    fn apply(
        &self,
        input: RasterBuffer,
        context: &StageContext<'_>,
    ) -> Result<RasterBuffer, StageFailure> {
        let output = match self {
            Self::Denoise(config) => denoise_colored(&input, config)?,
            Self::Equalize(config) => equalize_luminance(&input, config)?,
            Self::Bilateral(config) => bilateral(&input, config)?,
            Self::EdgeMask(config) => apply_mask(&input, &edge_mask(context.source(), config)?)?,
            Self::PencilSketch(config) => pencil_sketch(&input, config)?,
            Self::KernelSharpen(config) => kernel_sharpen(&input, config)?,
            Self::SaturationBoost(config) => boost_saturation(&input, config)?,
            Self::UnsharpMask(config) => unsharp_mask(&input, config)?,
            Self::MedianSmooth(config) => median_smooth(&input, config)?,
            Self::Colorize => context
                .engine()
                .ok_or(InferenceError::EngineUnavailable)?
                .colorize(&input)?,
            Self::DetailEnhance(config) => detail_enhance(&input, config)?,
            Self::ToRgb => match input.space() {
                ColorSpace::Rgb => input,
                _ => color::convert(&input, ColorSpace::Rgb)?,
            },
            Self::DropAlpha => input.split_alpha().0,
        };
        Ok(output)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn image() -> RasterBuffer {
        let data = (0..12 * 12)
            .flat_map(|i| {
                let v = if i % 12 < 6 { 60 } else { 200 };
                [v, v / 2, 255 - v]
            })
            .collect();
        RasterBuffer::from_raw(12, 12, 3, ColorSpace::Rgb, data).unwrap()
    }

    #[test]
    fn every_stage_keeps_geometry() {
        let img = image();
        let context = StageContext::new(&img);
        let stages = [
            StageKind::Denoise(DenoiseConfig {
                search_window: 5,
                ..DenoiseConfig::default()
            }),
            StageKind::Equalize(ClaheConfig::default()),
            StageKind::Bilateral(BilateralConfig::default()),
            StageKind::EdgeMask(EdgeMaskConfig::default()),
            StageKind::SaturationBoost(SaturationConfig::default()),
            StageKind::UnsharpMask(UnsharpConfig::default()),
            StageKind::MedianSmooth(MedianConfig::default()),
            StageKind::DetailEnhance(DetailConfig::default()),
            StageKind::PencilSketch(DodgeConfig::default()),
            StageKind::KernelSharpen(KernelSharpenConfig { strength: 5 }),
            StageKind::ToRgb,
            StageKind::DropAlpha,
        ];
        for stage in &stages {
            let out = stage.apply(img.clone(), &context).unwrap();
            assert_eq!(out.dimensions(), img.dimensions(), "{}", stage.name());
        }
    }

    #[test]
    fn pencil_then_to_rgb_is_three_equal_channels() {
        let img = image();
        let context = StageContext::new(&img);
        let gray = StageKind::PencilSketch(DodgeConfig::default())
            .apply(img.clone(), &context)
            .unwrap();
        assert_eq!(gray.channels(), 1);
        let rgb = StageKind::ToRgb.apply(gray, &context).unwrap();
        assert_eq!(rgb.channels(), 3);
        assert!(rgb.as_raw().chunks_exact(3).all(|px| px[0] == px[1] && px[1] == px[2]));
    }

    #[test]
    fn edge_mask_reads_the_source_not_the_input() {
        let source = image();
        let context = StageContext::new(&source);
        let flat = RasterBuffer::filled(12, 12, 3, ColorSpace::Rgb, 150u8).unwrap();
        let config = EdgeMaskConfig {
            median_kernel: 1,
            ..EdgeMaskConfig::default()
        };
        let out = StageKind::EdgeMask(config).apply(flat.clone(), &context).unwrap();
        assert_ne!(out, flat, "edges of the source should be blacked out");
        assert!(out.as_raw().iter().all(|&v| v == 0 || v == 150));
    }

    #[test]
    fn colorize_without_engine_is_an_inference_failure() {
        let img = image();
        let err = StageKind::Colorize
            .apply(img.clone(), &StageContext::new(&img))
            .unwrap_err();
        assert!(matches!(
            err,
            StageFailure::Inference(InferenceError::EngineUnavailable)
        ));
    }

    #[test]
    fn invalid_config_is_a_stage_failure() {
        let img = image();
        let err = StageKind::MedianSmooth(MedianConfig { kernel: 4 })
            .apply(img.clone(), &StageContext::new(&img))
            .unwrap_err();
        assert!(matches!(err, StageFailure::Stage(_)));
    }

    #[test]
    fn unbounded_unsharp_sigma_is_a_stage_failure() {
        let img = image();
        let stage: StageKind =
            serde_json::from_str(r#"{"stage": "unsharp-mask", "sigma": 1e30}"#).unwrap();
        let err = stage.apply(img.clone(), &StageContext::new(&img)).unwrap_err();
        assert!(matches!(
            err,
            StageFailure::Stage(crate::error::StageError::InvalidConfig(_))
        ));
    }

    #[test]
    fn drop_alpha_removes_fourth_channel() {
        let img = RasterBuffer::filled(2, 2, 4, ColorSpace::Rgb, 9u8).unwrap();
        let out = StageKind::DropAlpha.apply(img.clone(), &StageContext::new(&img)).unwrap();
        assert_eq!(out.channels(), 3);
    }

    #[test]
    fn stages_use_tagged_json() {
        let stage = StageKind::UnsharpMask(UnsharpConfig {
            sigma: 3.1,
            alpha: 1.7,
            beta: 0.7,
        });
        let json = serde_json::to_value(&stage).unwrap();
        assert_eq!(json["stage"], "unsharp-mask");
        let back: StageKind = serde_json::from_value(json).unwrap();
        assert_eq!(back, stage);

        let parsed: StageKind =
            serde_json::from_str(r#"{"stage": "equalize", "clip_limit": 0.9}"#).unwrap();
        assert_eq!(parsed, StageKind::Equalize(ClaheConfig::with_clip_limit(0.9)));
        let unit: StageKind = serde_json::from_str(r#"{"stage": "colorize"}"#).unwrap();
        assert_eq!(unit, StageKind::Colorize);
    }
}
