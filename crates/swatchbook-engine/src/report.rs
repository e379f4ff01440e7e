use std::cmp::Reverse;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;
use swatchbook_contracts::palette::Palette;
use tempfile::NamedTempFile;

use crate::error::{ComposeError, StorageError};
use crate::swatch::EncodedSwatch;

const DEFAULT_TEMPLATE: &str = include_str!("../resources/report_template.html");

pub const IMAGE1_TOKEN: &str = "{{IMAGE1_SRC}}";
pub const IMAGE2_TOKEN: &str = "{{IMAGE2_SRC}}";
pub const SWATCH_TOKEN: &str = "{{SWATCH_SRC}}";
pub const STRATEGY_TOKEN: &str = "{{STRATEGY}}";
pub const COLOR_DETAILS_MARKER: &str = "<!-- COLOR_DETAILS -->";

pub const ALL_TOKENS: [&str; 5] = [
    IMAGE1_TOKEN,
    IMAGE2_TOKEN,
    SWATCH_TOKEN,
    STRATEGY_TOKEN,
    COLOR_DETAILS_MARKER,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportTemplate {
    html: String,
    origin: Option<PathBuf>,
}

impl Default for ReportTemplate {
    fn default() -> Self {
        Self::from_html(DEFAULT_TEMPLATE)
    }
}

impl ReportTemplate {
    /// The built-in template unless an override file is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ComposeError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let html = fs::read_to_string(path).map_err(|source| ComposeError::TemplateUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            html,
            origin: Some(path.to_path_buf()),
        })
    }

    pub fn from_html(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            origin: None,
        }
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    /// Tokens absent from the template. Their fields are left out of the
    /// report rather than failing it.
    pub fn missing_tokens(&self) -> Vec<&'static str> {
        ALL_TOKENS
            .into_iter()
            .filter(|token| !self.html.contains(token))
            .collect()
    }

    pub fn compose(
        &self,
        image1: &[u8],
        image2: &[u8],
        swatch: &EncodedSwatch,
        palette: &Palette,
    ) -> String {
        let image1_src = image_data_uri(image1);
        let image2_src = image_data_uri(image2);
        let swatch_src = swatch.data_uri();
        let strategy = escape_html(palette.strategy());
        let details = color_details(palette);
        substitute(
            &self.html,
            &[
                (IMAGE1_TOKEN, image1_src.as_str()),
                (IMAGE2_TOKEN, image2_src.as_str()),
                (SWATCH_TOKEN, swatch_src.as_str()),
                (STRATEGY_TOKEN, strategy.as_str()),
                (COLOR_DETAILS_MARKER, details.as_str()),
            ],
        )
    }
}

/// Literal substitution in a single left-to-right pass.
///
/// Inserted values are never rescanned, so the result does not depend on the
/// order of `replacements` even when a value happens to contain a token.
pub fn substitute(template: &str, replacements: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        let next = replacements
            .iter()
            .filter(|(token, _)| !token.is_empty())
            .filter_map(|(token, value)| rest.find(token).map(|idx| (idx, *token, *value)))
            .min_by_key(|(idx, token, _)| (*idx, Reverse(token.len())));
        let Some((idx, token, value)) = next else {
            out.push_str(rest);
            return out;
        };
        out.push_str(&rest[..idx]);
        out.push_str(value);
        rest = &rest[idx + token.len()..];
    }
}

pub fn image_data_uri(bytes: &[u8]) -> String {
    let mime = match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Gif) => "image/gif",
        Ok(ImageFormat::WebP) => "image/webp",
        _ => "image/jpeg",
    };
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}

pub fn color_details(palette: &Palette) -> String {
    let mut out = String::new();
    for color in palette.colors() {
        let hex = escape_html(color.hex());
        out.push_str(&format!(
            "<div class=\"color-card\">\
             <div class=\"color-chip\" style=\"background-color: {hex};\"></div>\
             <div class=\"color-info\">\
             <h3>{hex}</h3>\
             <p><strong>Source:</strong> {source}</p>\
             <p><strong>Description:</strong> {description}</p>\
             <p><strong>Usage:</strong> {usage}</p>\
             </div></div>\n",
            source = color.source().label(),
            description = escape_html(color.description()),
            usage = escape_html(color.usage()),
        ));
    }
    out
}

pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Writes through a sibling temp file and renames it into place, so a failed
/// write never leaves a partial report at `path`.
pub fn write_report(path: &Path, html: &str) -> Result<(), StorageError> {
    let write_err = |source| StorageError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(write_err)?;
    let mut staged = NamedTempFile::new_in(&dir).map_err(write_err)?;
    staged.write_all(html.as_bytes()).map_err(write_err)?;
    staged.flush().map_err(write_err)?;
    staged
        .persist(path)
        .map_err(|err| write_err(err.error))?;
    Ok(())
}
