use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::{ImageError, ImageReader};
use reqwest::blocking::Client as HttpClient;
use swatchbook_contracts::sources::ImageSource;

use crate::config::FetchConfig;
use crate::error::FetchError;

pub const DOWNLOAD_CHUNK_SIZE: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredImage {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub bytes: u64,
}

pub struct Acquirer {
    http: HttpClient,
}

impl Acquirer {
    pub fn new(config: &FetchConfig) -> Result<Self, reqwest::Error> {
        let http = HttpClient::builder()
            .user_agent(config.user_agent.clone())
            .timeout(None::<Duration>)
            .build()?;
        Ok(Self { http })
    }

    /// Streams `url` into `destination` chunk by chunk.
    ///
    /// On failure the destination may hold a partial file; it must not be
    /// read as an image.
    pub fn fetch(&self, url: &str, destination: &Path) -> Result<PathBuf, FetchError> {
        self.download(url, destination, &mut |_: &Path| {})
            .map(|_| destination.to_path_buf())
    }

    /// Download plus a header decode, so an HTML error page served with a 200
    /// never reaches the model.
    ///
    /// `on_created` fires once the destination file has been created by this
    /// call, before any byte is written. Paths it never reports were not
    /// touched.
    pub fn acquire(
        &self,
        source: &ImageSource,
        on_created: &mut dyn FnMut(&Path),
    ) -> Result<AcquiredImage, FetchError> {
        let path = source.local_path().to_path_buf();
        let bytes = self.download(source.url(), &path, on_created)?;
        let (width, height) = probe_image(&path)?;
        Ok(AcquiredImage {
            path,
            width,
            height,
            bytes,
        })
    }

    fn download(
        &self,
        url: &str,
        destination: &Path,
        on_created: &mut dyn FnMut(&Path),
    ) -> Result<u64, FetchError> {
        let mut response = self
            .http
            .get(url)
            .send()
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let write_err = |source| FetchError::Write {
            path: destination.to_path_buf(),
            source,
        };
        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(write_err)?;
            }
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(destination)
            .map_err(|source| match source.kind() {
                ErrorKind::AlreadyExists => FetchError::DestinationExists {
                    path: destination.to_path_buf(),
                },
                _ => write_err(source),
            })?;
        on_created(destination);
        let mut chunk = vec![0u8; DOWNLOAD_CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let read = match response.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(FetchError::Body {
                        url: url.to_string(),
                        source,
                    })
                }
            };
            file.write_all(&chunk[..read]).map_err(write_err)?;
            total += read as u64;
        }
        file.flush().map_err(write_err)?;
        Ok(total)
    }
}

/// Reads just enough of the file to learn its format and dimensions.
pub fn probe_image(path: &Path) -> Result<(u32, u32), FetchError> {
    let not_an_image = |source| FetchError::NotAnImage {
        path: path.to_path_buf(),
        source,
    };
    ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|err| not_an_image(ImageError::IoError(err)))?
        .into_dimensions()
        .map_err(not_an_image)
}
