use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageError, ImageReader, Rgb, RgbImage};
use swatchbook_contracts::palette::{palette_instruction, parse_palette_reply, Palette};

use crate::config::SynthesisConfig;
use crate::error::SynthesisError;
use crate::model::{ModelImage, ModelRequest, PaletteModel};

const UPLOAD_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Clone)]
pub struct Synthesis {
    pub palette: Palette,
    pub model: String,
    /// Reply text exactly as the model returned it.
    pub raw_reply: String,
}

pub struct Synthesizer<'a> {
    model: &'a dyn PaletteModel,
    config: &'a SynthesisConfig,
}

impl<'a> Synthesizer<'a> {
    pub fn new(model: &'a dyn PaletteModel, config: &'a SynthesisConfig) -> Self {
        Self { model, config }
    }

    /// One model call for both images; the reply is parsed and validated here
    /// so later stages only ever see a typed palette.
    pub fn synthesize(&self, image1: &Path, image2: &Path) -> Result<Synthesis, SynthesisError> {
        let images = vec![
            prepare_upload(image1, self.config.max_image_dim)?,
            prepare_upload(image2, self.config.max_image_dim)?,
        ];
        let request = ModelRequest {
            instruction: palette_instruction(),
            images,
        };
        let reply = self.model.generate(&request)?;
        let palette = parse_palette_reply(&reply.text)?;
        Ok(Synthesis {
            palette,
            model: reply.model,
            raw_reply: reply.text,
        })
    }
}

/// Decodes, flattens alpha onto white, bounds the longest edge and re-encodes
/// as JPEG.
pub fn prepare_upload(path: &Path, max_dim: u32) -> Result<ModelImage, SynthesisError> {
    let load_err = |source| SynthesisError::ImageLoad {
        path: path.to_path_buf(),
        source,
    };
    let decoded = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|err| load_err(ImageError::IoError(err)))?
        .decode()
        .map_err(load_err)?;

    let rgba = decoded.to_rgba8();
    let flattened = RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let pixel = rgba.get_pixel(x, y);
        let alpha = u16::from(pixel[3]);
        let blend =
            |channel: u8| -> u8 { (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8 };
        Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])])
    });
    let mut prepared = DynamicImage::ImageRgb8(flattened);
    let dim = max_dim.max(64);
    if prepared.width() > dim || prepared.height() > dim {
        prepared = prepared.resize(dim, dim, FilterType::Triangle);
    }

    let mut bytes = Vec::new();
    prepared
        .to_rgb8()
        .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, UPLOAD_JPEG_QUALITY))
        .map_err(|source| SynthesisError::ImageEncode {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(ModelImage {
        mime_type: "image/jpeg".to_string(),
        bytes,
    })
}
