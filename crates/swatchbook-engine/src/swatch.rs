use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use swatchbook_contracts::palette::Palette;

use crate::error::RenderError;

pub const SWATCH_WIDTH: u32 = 500;
pub const SWATCH_HEIGHT: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSwatch {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl EncodedSwatch {
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.png)
    }

    pub fn data_uri(&self) -> String {
        format!("data:image/png;base64,{}", self.to_base64())
    }
}

pub fn render(palette: &Palette) -> Result<EncodedSwatch, RenderError> {
    render_with_size(palette, SWATCH_WIDTH, SWATCH_HEIGHT)
}

/// One vertical band per color, in palette order.
pub fn render_with_size(palette: &Palette, width: u32, height: u32) -> Result<EncodedSwatch, RenderError> {
    let colors = palette.colors();
    if colors.is_empty() {
        return Err(RenderError::EmptyPalette);
    }
    if height == 0 || width < colors.len() as u32 {
        return Err(RenderError::InvalidSize { width, height });
    }
    let fills = colors
        .iter()
        .map(|color| parse_hex_color(color.hex()))
        .collect::<Result<Vec<_>, _>>()?;

    let mut canvas = RgbImage::new(width, height);
    for ((x_start, band_width), fill) in band_spans(width, fills.len()).into_iter().zip(fills) {
        for x in x_start..x_start + band_width {
            for y in 0..height {
                canvas.put_pixel(x, y, fill);
            }
        }
    }

    let mut png = Vec::new();
    canvas.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(EncodedSwatch { png, width, height })
}

/// `(x_start, band_width)` per band. Every band gets `width / count`; the
/// last one also takes the remainder so the spans cover `width` exactly.
pub fn band_spans(width: u32, count: usize) -> Vec<(u32, u32)> {
    if count == 0 {
        return Vec::new();
    }
    let count = count as u32;
    let band = width / count;
    (0..count)
        .map(|idx| {
            let x_start = idx * band;
            let band_width = if idx + 1 == count { width - x_start } else { band };
            (x_start, band_width)
        })
        .collect()
}

pub fn parse_hex_color(raw: &str) -> Result<Rgb<u8>, RenderError> {
    let invalid = || RenderError::InvalidHex(raw.to_string());
    let digits = raw.trim().strip_prefix('#').ok_or_else(invalid)?;
    if !digits.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let expanded: String = match digits.len() {
        6 => digits.to_string(),
        3 => digits.chars().flat_map(|ch| [ch, ch]).collect(),
        _ => return Err(invalid()),
    };
    let channel = |idx: usize| u8::from_str_radix(&expanded[idx..idx + 2], 16).map_err(|_| invalid());
    Ok(Rgb([channel(0)?, channel(2)?, channel(4)?]))
}
