//! Palette pipeline: download two images, ask a generative model for a shared
//! palette, render a swatch and compose a self-contained HTML report.

pub mod acquire;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod swatch;
pub mod synthesize;

pub use acquire::{AcquiredImage, Acquirer};
pub use config::{EnvSource, FetchConfig, SynthesisConfig};
pub use error::{
    ComposeError, FetchError, ModelError, PipelineError, RenderError, StorageError, SynthesisError,
};
pub use model::{select_model, DryrunModel, GeminiModel, PaletteModel};
pub use pipeline::{error_chain_text, Notice, Pipeline, RunOutcome, RunRequest};
pub use report::ReportTemplate;
pub use swatch::EncodedSwatch;
pub use synthesize::{Synthesis, Synthesizer};
