//! Chrominance prediction for the colorization effect.
//!
//! - [`weights`] reads the model files.
//! - [`network`] declares the architecture and evaluates it.
//! - [`engine`] adapts images to the network and holds the shared
//!   process-wide instance.

pub mod engine;
pub mod network;
pub mod weights;

pub use engine::{ColorizationEngine, INPUT_SIZE, LIGHTNESS_CENTER, global, install, resize_bilinear};
pub use network::{AB_CLASSES, ConvParams, LayerSpec, Network, NetworkSpec, Op};
pub use weights::{Tensor, WeightFile, load_centres, read_npy};
