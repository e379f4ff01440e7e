use std::io;
use std::path::PathBuf;

use swatchbook_contracts::palette::PaletteError;
use swatchbook_contracts::sources::SourceError;
use thiserror::Error;

/// One variant per pipeline stage; the wrapped error carries the cause.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid {which} source")]
    InvalidSource {
        which: &'static str,
        #[source]
        source: SourceError,
    },
    #[error("download of {which} failed")]
    DownloadFailed {
        which: &'static str,
        #[source]
        source: FetchError,
    },
    #[error("palette synthesis failed")]
    SynthesisFailed(#[from] SynthesisError),
    #[error("swatch rendering failed")]
    RenderFailed(#[from] RenderError),
    #[error("report composition failed")]
    ComposeFailed(#[from] ComposeError),
    #[error("local storage failed")]
    StorageFailed(#[from] StorageError),
    #[error("HTTP client setup failed")]
    ClientSetup(#[source] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("GET {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("reading the body of {url} failed")]
    Body {
        url: String,
        #[source]
        source: io::Error,
    },
    #[error("{} already exists; refusing to overwrite it", .path.display())]
    DestinationExists { path: PathBuf },
    #[error("failed writing {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} is not a readable image", .path.display())]
    NotAnImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Failures of the model capability itself, kept apart from failures to
/// interpret what it replied.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("no API key for {provider} (set GEMINI_API_KEY or GOOGLE_API_KEY)")]
    MissingApiKey { provider: String },
    #[error("{provider} is unreachable")]
    Unreachable {
        provider: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} request failed ({status}): {body}")]
    Rejected {
        provider: String,
        status: u16,
        body: String,
    },
    #[error("{provider} returned an unreadable payload: {detail}")]
    InvalidPayload { provider: String, detail: String },
    #[error("{provider} could not read an attached image: {detail}")]
    InvalidInput { provider: String, detail: String },
    #[error("{provider} returned no text")]
    EmptyReply { provider: String },
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("failed to load image {}", .path.display())]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to prepare image {} for upload", .path.display())]
    ImageEncode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("model call failed")]
    Model(#[from] ModelError),
    #[error(transparent)]
    Reply(#[from] PaletteError),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("palette has no colors")]
    EmptyPalette,
    #[error("'{0}' is not a hex color")]
    InvalidHex(String),
    #[error("swatch size {width}x{height} is too small")]
    InvalidSize { width: u32, height: u32 },
    #[error("PNG encode failed")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("template {} is unreadable", .path.display())]
    TemplateUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed reading {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed writing {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
