use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, RgbImage};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use crate::config::SynthesisConfig;
use crate::error::ModelError;

pub const DRYRUN_MODEL: &str = "dryrun";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRequest {
    pub instruction: String,
    pub images: Vec<ModelImage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelReply {
    /// Verbatim reply text; no structure is guaranteed.
    pub text: String,
    pub model: String,
}

/// The external generative model: images plus an instruction in, free text out.
pub trait PaletteModel: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &ModelRequest) -> Result<ModelReply, ModelError>;
}

/// `dryrun` picks the offline model; any other name is a Gemini model id.
pub fn select_model(config: &SynthesisConfig) -> Result<Box<dyn PaletteModel>, reqwest::Error> {
    if config.model.trim() == DRYRUN_MODEL {
        return Ok(Box::new(DryrunModel));
    }
    Ok(Box::new(GeminiModel::new(config.clone())?))
}

const GEMINI_PROVIDER: &str = "gemini";
const API_KEY_HEADER: &str = "x-goog-api-key";

pub struct GeminiModel {
    config: SynthesisConfig,
    http: HttpClient,
}

impl GeminiModel {
    pub fn new(config: SynthesisConfig) -> Result<Self, reqwest::Error> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, http })
    }

    fn endpoint(&self) -> String {
        let trimmed = self.config.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!(
            "{}/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            model_path
        )
    }

    fn build_payload(&self, request: &ModelRequest) -> Value {
        let mut parts: Vec<Value> = request
            .images
            .iter()
            .map(|image| {
                json!({
                    "inlineData": {
                        "mimeType": image.mime_type,
                        "data": BASE64.encode(&image.bytes),
                    }
                })
            })
            .collect();
        parts.push(json!({ "text": request.instruction }));
        json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
            "generationConfig": {
                "temperature": self.config.temperature,
                "topP": self.config.top_p,
                "topK": self.config.top_k,
                "maxOutputTokens": self.config.max_output_tokens,
            },
        })
    }

    fn extract_text(payload: &Value) -> String {
        let mut texts = Vec::new();
        let candidates = payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for candidate in candidates {
            let parts = candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    if !text.trim().is_empty() {
                        texts.push(text.to_string());
                    }
                }
            }
        }
        texts.join("\n")
    }
}

impl PaletteModel for GeminiModel {
    fn name(&self) -> &str {
        GEMINI_PROVIDER
    }

    fn generate(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        let provider = self.name().to_string();
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(ModelError::MissingApiKey { provider });
        };
        let response = self
            .http
            .post(self.endpoint())
            .header(API_KEY_HEADER, api_key)
            .json(&self.build_payload(request))
            .send()
            .map_err(|source| ModelError::Unreachable {
                provider: provider.clone(),
                source,
            })?;

        let status = response.status();
        let body = response.text().map_err(|source| ModelError::Unreachable {
            provider: provider.clone(),
            source,
        })?;
        if !status.is_success() {
            return Err(ModelError::Rejected {
                provider,
                status: status.as_u16(),
                body: truncate_text(&body, 512),
            });
        }
        let payload: Value = serde_json::from_str(&body).map_err(|err| ModelError::InvalidPayload {
            provider: provider.clone(),
            detail: err.to_string(),
        })?;
        let text = Self::extract_text(&payload);
        if text.trim().is_empty() {
            return Err(ModelError::EmptyReply { provider });
        }
        Ok(ModelReply {
            text,
            model: self.config.model.clone(),
        })
    }
}

/// Offline stand-in that reads colors straight from the pixels.
///
/// Takes the mean of the left and right half of each image plus the blend of
/// both image means, and answers in the same prose-and-fence style a real
/// model tends to use.
pub struct DryrunModel;

impl PaletteModel for DryrunModel {
    fn name(&self) -> &str {
        DRYRUN_MODEL
    }

    fn generate(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        let mut decoded = Vec::with_capacity(request.images.len());
        for (idx, image) in request.images.iter().enumerate() {
            let rgb = image::load_from_memory(&image.bytes)
                .map(DynamicImage::into_rgb8)
                .map_err(|err| ModelError::InvalidInput {
                    provider: DRYRUN_MODEL.to_string(),
                    detail: format!("image {}: {err}", idx + 1),
                })?;
            decoded.push(rgb);
        }
        let [first, second] = decoded.as_slice() else {
            return Err(ModelError::InvalidInput {
                provider: DRYRUN_MODEL.to_string(),
                detail: format!("expected 2 images, got {}", decoded.len()),
            });
        };

        let (first_left, first_right) = half_means(first);
        let (second_left, second_right) = half_means(second);
        let blend = average(&[mean_rgb(first, 0, first.width()), mean_rgb(second, 0, second.width())]);
        let color = |rgb: [u8; 3], source: &str, description: &str, usage: &str| {
            json!({
                "hex": to_hex(rgb),
                "source": source,
                "description": description,
                "usage": usage,
            })
        };
        let palette = json!({
            "strategy": "Mean tones of each image's left and right halves, bridged by the average of both images.",
            "colors": [
                color(first_left, "image1", "Left half of image 1", "Primary background"),
                color(first_right, "image1", "Right half of image 1", "Secondary surfaces"),
                color(second_left, "image2", "Left half of image 2", "Headings"),
                color(second_right, "image2", "Right half of image 2", "Borders and dividers"),
                color(blend, "blended", "Average of both images", "Accents and calls to action"),
            ],
        });
        let body = serde_json::to_string_pretty(&palette).map_err(|err| ModelError::InvalidPayload {
            provider: DRYRUN_MODEL.to_string(),
            detail: err.to_string(),
        })?;
        Ok(ModelReply {
            text: format!("Here is a palette drawn from both images:\n```json\n{body}\n```\n"),
            model: DRYRUN_MODEL.to_string(),
        })
    }
}

fn half_means(image: &RgbImage) -> ([u8; 3], [u8; 3]) {
    let width = image.width();
    let mid = (width / 2).max(1).min(width);
    let right_start = if mid >= width { 0 } else { mid };
    (mean_rgb(image, 0, mid), mean_rgb(image, right_start, width))
}

fn mean_rgb(image: &RgbImage, x_start: u32, x_end: u32) -> [u8; 3] {
    let mut sums = [0u64; 3];
    let mut count = 0u64;
    for (x, _, pixel) in image.enumerate_pixels() {
        if x < x_start || x >= x_end {
            continue;
        }
        for (sum, channel) in sums.iter_mut().zip(pixel.0) {
            *sum += u64::from(channel);
        }
        count += 1;
    }
    if count == 0 {
        return [0, 0, 0];
    }
    sums.map(|sum| (sum / count) as u8)
}

fn average(colors: &[[u8; 3]]) -> [u8; 3] {
    if colors.is_empty() {
        return [0, 0, 0];
    }
    let mut out = [0u8; 3];
    for (channel, slot) in out.iter_mut().enumerate() {
        let total: u32 = colors.iter().map(|rgb| u32::from(rgb[channel])).sum();
        *slot = (total / colors.len() as u32) as u8;
    }
    out
}

fn to_hex(rgb: [u8; 3]) -> String {
    format!("#{:02X}{:02X}{:02X}", rgb[0], rgb[1], rgb[2])
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb};
    use swatchbook_contracts::palette::{parse_palette_reply, ColorSource};

    use super::*;
    use crate::pipeline::error_chain_text;

    fn png_bytes(image: &RgbImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image.clone())
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn two_tone(width: u32, left: [u8; 3], right: [u8; 3]) -> RgbImage {
        RgbImage::from_fn(width, 4, |x, _| if x < width / 2 { Rgb(left) } else { Rgb(right) })
    }

    fn request_with(images: Vec<Vec<u8>>) -> ModelRequest {
        ModelRequest {
            instruction: "palette please".to_string(),
            images: images
                .into_iter()
                .map(|bytes| ModelImage {
                    mime_type: "image/png".to_string(),
                    bytes,
                })
                .collect(),
        }
    }

    fn test_config() -> SynthesisConfig {
        SynthesisConfig {
            api_key: Some("test-key".to_string()),
            api_base: "http://127.0.0.1:1/v1beta/".to_string(),
            ..SynthesisConfig::default()
        }
    }

    #[test]
    fn gemini_payload_puts_images_before_instruction() -> anyhow::Result<()> {
        let model = GeminiModel::new(test_config())?;
        let request = request_with(vec![b"one".to_vec(), b"two".to_vec()]);
        let payload = model.build_payload(&request);
        let parts = payload["contents"][0]["parts"].as_array().cloned().unwrap_or_default();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["inlineData"]["data"], json!(BASE64.encode(b"one")));
        assert_eq!(parts[1]["inlineData"]["mimeType"], json!("image/png"));
        assert_eq!(parts[2]["text"], json!("palette please"));
        assert_eq!(payload["generationConfig"]["topK"], json!(40));
        assert_eq!(payload["generationConfig"]["maxOutputTokens"], json!(8192));
        Ok(())
    }

    #[test]
    fn gemini_endpoint_normalizes_model_path() -> anyhow::Result<()> {
        let model = GeminiModel::new(test_config())?;
        assert_eq!(
            model.endpoint(),
            "http://127.0.0.1:1/v1beta/models/gemini-1.5-flash:generateContent"
        );
        let prefixed = GeminiModel::new(SynthesisConfig {
            model: "models/gemini-2.0-flash".to_string(),
            ..test_config()
        })?;
        assert!(prefixed.endpoint().ends_with("/v1beta/models/gemini-2.0-flash:generateContent"));
        Ok(())
    }

    #[test]
    fn gemini_text_joins_all_candidate_parts() {
        let payload = json!({
            "candidates": [
                {"content": {"parts": [{"text": "Sure! "}, {"text": "{\"a\": 1}"}]}},
                {"content": {"parts": [{"inlineData": {"data": "xx"}}, {"text": "  "}]}}
            ]
        });
        assert_eq!(GeminiModel::extract_text(&payload), "Sure! \n{\"a\": 1}");
        assert_eq!(GeminiModel::extract_text(&json!({"promptFeedback": {}})), "");
    }

    #[test]
    fn gemini_without_key_fails_before_network() -> anyhow::Result<()> {
        let model = GeminiModel::new(SynthesisConfig::default())?;
        let err = model
            .generate(&request_with(vec![b"x".to_vec(), b"y".to_vec()]))
            .unwrap_err();
        assert!(matches!(err, ModelError::MissingApiKey { .. }));
        Ok(())
    }

    #[test]
    fn dryrun_reply_is_prose_wrapped_and_parses() -> anyhow::Result<()> {
        let first = png_bytes(&two_tone(8, [255, 0, 0], [0, 0, 255]));
        let second = png_bytes(&two_tone(8, [0, 255, 0], [255, 255, 255]));
        let reply = DryrunModel.generate(&request_with(vec![first, second]))?;
        assert!(reply.text.starts_with("Here is a palette"));
        assert!(reply.text.contains("```json"));

        let palette = parse_palette_reply(&reply.text)?;
        let hexes: Vec<&str> = palette.colors().iter().map(|color| color.hex()).collect();
        assert_eq!(hexes, vec!["#FF0000", "#0000FF", "#00FF00", "#FFFFFF", "#7F7F7F"]);
        assert_eq!(palette.colors()[4].source(), ColorSource::Blended);
        assert!(palette.composition_warnings().is_empty());
        Ok(())
    }

    #[test]
    fn dryrun_rejects_undecodable_or_missing_images() {
        let bad = DryrunModel
            .generate(&request_with(vec![b"nope".to_vec(), b"nope".to_vec()]))
            .unwrap_err();
        assert!(matches!(bad, ModelError::InvalidInput { .. }));

        let single = png_bytes(&two_tone(2, [1, 2, 3], [4, 5, 6]));
        let missing = DryrunModel.generate(&request_with(vec![single])).unwrap_err();
        assert!(missing.to_string().contains("expected 2 images, got 1"));
    }

    #[test]
    fn select_model_picks_dryrun_by_name_only() -> anyhow::Result<()> {
        let dryrun = SynthesisConfig {
            model: " dryrun ".to_string(),
            ..test_config()
        };
        assert_eq!(select_model(&dryrun)?.name(), "dryrun");
        assert_eq!(select_model(&test_config())?.name(), "gemini");
        Ok(())
    }

    #[test]
    fn unreachable_gemini_error_never_shows_the_key() -> anyhow::Result<()> {
        let model = GeminiModel::new(SynthesisConfig {
            api_key: Some("SECRET-KEY-123".to_string()),
            ..test_config()
        })?;
        let err = model
            .generate(&request_with(vec![b"x".to_vec(), b"y".to_vec()]))
            .unwrap_err();
        assert!(matches!(err, ModelError::Unreachable { .. }));
        let chain = error_chain_text(&err);
        assert!(chain.starts_with("gemini is unreachable"), "{chain}");
        assert!(!chain.contains("SECRET-KEY-123"), "{chain}");
        Ok(())
    }
}
