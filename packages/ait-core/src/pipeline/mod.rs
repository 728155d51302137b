//! Generation pipeline: provider calls, audio post-processing, and
//! writing results back into session state.

pub mod audio;
pub mod generation;

pub use generation::{AudioSink, GenerationPipeline};
