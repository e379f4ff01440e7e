use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Colors requested from the model: two per source image plus one blend.
pub const PALETTE_SIZE: usize = 5;
pub const COLORS_PER_IMAGE: usize = 2;
pub const BLENDED_COLORS: usize = 1;

#[derive(Debug, Error)]
pub enum PaletteError {
    #[error("no JSON found in model response")]
    NoJson,
    #[error("model response JSON did not parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("model response JSON has the wrong shape: {0}")]
    Schema(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum ColorSource {
    Image1,
    Image2,
    Blended,
}

impl ColorSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image1 => "image1",
            Self::Image2 => "image2",
            Self::Blended => "blended",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Image1 => "Image 1",
            Self::Image2 => "Image 2",
            Self::Blended => "Blended",
        }
    }

    /// Accepts the spellings models tend to produce (`Image 1`, `image_2`,
    /// `blend`, `both`).
    pub fn parse(raw: &str) -> Option<Self> {
        let compact: String = raw
            .chars()
            .filter(|ch| !matches!(ch, ' ' | '_' | '-'))
            .collect::<String>()
            .to_ascii_lowercase();
        match compact.as_str() {
            "image1" | "img1" | "first" | "firstimage" => Some(Self::Image1),
            "image2" | "img2" | "second" | "secondimage" => Some(Self::Image2),
            "blended" | "blend" | "both" | "mixed" => Some(Self::Blended),
            _ => None,
        }
    }
}

impl TryFrom<String> for ColorSource {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unknown color source '{value}'"))
    }
}

impl fmt::Display for ColorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaletteColor {
    hex: String,
    source: ColorSource,
    description: String,
    usage: String,
}

impl PaletteColor {
    pub fn new(
        hex: &str,
        source: ColorSource,
        description: impl Into<String>,
        usage: impl Into<String>,
    ) -> Result<Self, PaletteError> {
        let hex = normalize_hex(hex)
            .ok_or_else(|| PaletteError::Schema(format!("'{hex}' is not a #RRGGBB color")))?;
        Ok(Self {
            hex,
            source,
            description: description.into(),
            usage: usage.into(),
        })
    }

    /// Upper-case `#RRGGBB`.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    pub fn source(&self) -> ColorSource {
        self.source
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn usage(&self) -> &str {
        &self.usage
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Palette {
    strategy: String,
    colors: Vec<PaletteColor>,
}

impl Palette {
    pub fn new(strategy: impl Into<String>, colors: Vec<PaletteColor>) -> Result<Self, PaletteError> {
        if colors.is_empty() {
            return Err(PaletteError::Schema("colors is empty".to_string()));
        }
        Ok(Self {
            strategy: strategy.into(),
            colors,
        })
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn colors(&self) -> &[PaletteColor] {
        &self.colors
    }

    /// Deviations from the requested 2/2/1 layout. These never fail a run.
    pub fn composition_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.colors.len() != PALETTE_SIZE {
            warnings.push(format!(
                "expected {PALETTE_SIZE} colors, model returned {}",
                self.colors.len()
            ));
        }
        let count = |source: ColorSource| {
            self.colors
                .iter()
                .filter(|color| color.source == source)
                .count()
        };
        let (first, second, blended) = (
            count(ColorSource::Image1),
            count(ColorSource::Image2),
            count(ColorSource::Blended),
        );
        if (first, second, blended) != (COLORS_PER_IMAGE, COLORS_PER_IMAGE, BLENDED_COLORS) {
            warnings.push(format!(
                "expected {COLORS_PER_IMAGE}/{COLORS_PER_IMAGE}/{BLENDED_COLORS} image1/image2/blended colors, got {first}/{second}/{blended}"
            ));
        }
        warnings
    }
}

pub fn palette_instruction() -> String {
    format!(
        "You are a color consultant for designers. Study the two attached images \
         (the first attachment is image 1, the second is image 2) and build one \
         cohesive palette of {PALETTE_SIZE} colors that ties their color stories together.\n\
         Pick exactly {COLORS_PER_IMAGE} colors taken from image 1, {COLORS_PER_IMAGE} colors \
         taken from image 2, and {BLENDED_COLORS} blended color that bridges both images.\n\
         Respond with a single JSON object and nothing else, using this shape:\n\
         {{\n  \"strategy\": \"one or two sentences explaining how the palette connects the images\",\n  \
         \"colors\": [\n    {{\"hex\": \"#RRGGBB\", \"source\": \"image1\" | \"image2\" | \"blended\", \
         \"description\": \"short name and character of the color\", \
         \"usage\": \"where a designer should use it\"}}\n  ]\n}}\n\
         Every hex value must be a 6-digit hex color prefixed with '#'."
    )
}

/// The span from the first `{` to the last `}` inclusive.
///
/// Nesting is not checked; the reply may wrap the object in prose or a
/// markdown fence.
pub fn extract_json_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

pub fn parse_palette_reply(text: &str) -> Result<Palette, PaletteError> {
    let span = extract_json_span(text).ok_or(PaletteError::NoJson)?;
    let parsed: Value = serde_json::from_str(span)?;
    palette_from_value(&parsed)
}

pub fn palette_from_value(value: &Value) -> Result<Palette, PaletteError> {
    let root = value
        .as_object()
        .ok_or_else(|| PaletteError::Schema("top-level value is not an object".to_string()))?;
    let strategy = match root.get("strategy") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.trim().to_string(),
        Some(_) => return Err(PaletteError::Schema("strategy is not a string".to_string())),
    };
    let rows = root
        .get("colors")
        .and_then(Value::as_array)
        .ok_or_else(|| PaletteError::Schema("colors is missing or not an array".to_string()))?;

    let mut colors = Vec::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        let obj = row
            .as_object()
            .ok_or_else(|| PaletteError::Schema(format!("colors[{idx}] is not an object")))?;
        let source_raw = required_str(obj, idx, "source")?;
        let source = ColorSource::parse(source_raw).ok_or_else(|| {
            PaletteError::Schema(format!("colors[{idx}].source '{source_raw}' is not image1, image2 or blended"))
        })?;
        let hex = required_str(obj, idx, "hex")?;
        let color = PaletteColor::new(
            hex,
            source,
            required_str(obj, idx, "description")?.trim(),
            required_str(obj, idx, "usage")?.trim(),
        )
        .map_err(|err| match err {
            PaletteError::Schema(message) => PaletteError::Schema(format!("colors[{idx}]: {message}")),
            other => other,
        })?;
        colors.push(color);
    }
    Palette::new(strategy, colors)
}

fn required_str<'a>(obj: &'a Map<String, Value>, idx: usize, key: &str) -> Result<&'a str, PaletteError> {
    obj.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| PaletteError::Schema(format!("colors[{idx}].{key} is missing or not a string")))
}

fn normalize_hex(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
    if !digits.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return None;
    }
    let expanded = match digits.len() {
        6 => digits.to_string(),
        3 => digits.chars().flat_map(|ch| [ch, ch]).collect(),
        _ => return None,
    };
    Some(format!("#{}", expanded.to_ascii_uppercase()))
}
