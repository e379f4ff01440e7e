use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

pub const ALLOWED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("invalid file extension for '{0}' (expected one of jpg, jpeg, png, gif)")]
    InvalidExtension(String),
}

/// A remote image paired with the local file it will be downloaded to.
///
/// Only constructible through [`ImageSource::new`], so every instance has
/// already passed [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSource {
    url: String,
    local_path: PathBuf,
}

impl ImageSource {
    pub fn new(url: impl Into<String>, local_path: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let url = url.into().trim().to_string();
        let local_path = local_path.into();
        validate(&url, &local_path.to_string_lossy())?;
        Ok(Self { url, local_path })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }
}

pub fn validate(url: &str, filename: &str) -> Result<(), SourceError> {
    if !is_valid_url(url) {
        return Err(SourceError::InvalidUrl(url.to_string()));
    }
    if !has_valid_extension(filename) {
        return Err(SourceError::InvalidExtension(filename.to_string()));
    }
    Ok(())
}

/// True when the string parses with both a scheme and a network location.
pub fn is_valid_url(raw: &str) -> bool {
    let Ok(parsed) = Url::parse(raw.trim()) else {
        return false;
    };
    !parsed.scheme().is_empty()
        && parsed
            .host_str()
            .map(|host| !host.trim().is_empty())
            .unwrap_or(false)
}

pub fn has_valid_extension(filename: &str) -> bool {
    let ext = Path::new(filename.trim())
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    ALLOWED_EXTENSIONS.contains(&ext.as_str())
}

/// Last path segment of a URL when it already carries an allowed extension.
pub fn filename_from_url(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    let segment = parsed
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()?
        .to_string();
    has_valid_extension(&segment).then_some(segment)
}
