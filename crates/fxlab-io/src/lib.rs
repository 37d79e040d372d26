//! fxlab-io: Filesystem and collaborator glue.
//!
//! Scoped scratch files, atomic output persistence, and the contracts
//! for the segmentation and generation collaborators together with
//! adapters that run them as external programs. Image processing
//! itself lives in `fxlab-pipeline`.

pub mod command;
pub mod generate;
pub mod output;
pub mod scratch;
pub mod segment;

pub use command::{CommandError, ExternalCommand};
pub use generate::{CommandGenerator, GenerationError, Generator, generate_image, prepare_prompt};
pub use output::{OutputError, PendingOutput, write_atomic};
pub use scratch::ScratchFile;
pub use segment::{CommandSegmenter, SegmentationError, Segmenter, remove_background};
