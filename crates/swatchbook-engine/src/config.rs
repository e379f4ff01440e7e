use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MAX_IMAGE_DIM: u32 = 1024;

/// Environment lookups layered over an optional `.env` file.
///
/// Process variables win over file entries. Values are trimmed and empty
/// values count as unset.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    vars: HashMap<String, String>,
}

impl EnvSource {
    pub fn from_process() -> Self {
        Self::load(None)
    }

    pub fn load(dotenv: Option<&Path>) -> Self {
        let mut vars = dotenv.map(parse_dotenv).unwrap_or_default();
        vars.extend(std::env::vars());
        Self { vars }
    }

    pub fn from_pairs<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            vars: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    pub fn first(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.get(key))
    }
}

/// `KEY=VALUE` lines; `#` comments, an `export ` prefix and matching quotes are
/// tolerated. A missing file yields an empty map.
pub fn parse_dotenv(path: &Path) -> HashMap<String, String> {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    let mut vars = HashMap::new();
    for raw_line in content.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(stripped) = line.strip_prefix("export ") {
            line = stripped.trim();
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let mut value = value.trim().to_string();
        if value.len() >= 2 {
            let bytes = value.as_bytes();
            if (bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
                || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'')
            {
                value = value[1..value.len() - 1].to_string();
            }
        }
        vars.insert(key.to_string(), value);
    }
    vars
}

/// Everything the palette model call needs, passed in explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub api_base: String,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub request_timeout: Duration,
    /// Longest edge of an image after downscaling for upload.
    pub max_image_dim: u32,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            temperature: 1.0,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 8192,
            request_timeout: Duration::from_secs(90),
            max_image_dim: DEFAULT_MAX_IMAGE_DIM,
        }
    }
}

impl SynthesisConfig {
    pub fn from_env(env: &EnvSource) -> Self {
        let defaults = Self::default();
        Self {
            model: env.get("SWATCHBOOK_MODEL").unwrap_or(defaults.model),
            api_key: env.first(&["GEMINI_API_KEY", "GOOGLE_API_KEY"]),
            api_base: env
                .get("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.api_base),
            temperature: env_f64(env, "SWATCHBOOK_TEMPERATURE", defaults.temperature, 0.0, 2.0),
            top_p: env_f64(env, "SWATCHBOOK_TOP_P", defaults.top_p, 0.0, 1.0),
            request_timeout: Duration::from_secs_f64(env_f64(
                env,
                "SWATCHBOOK_REQUEST_TIMEOUT",
                defaults.request_timeout.as_secs_f64(),
                5.0,
                600.0,
            )),
            ..defaults
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("swatchbook/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

fn env_f64(env: &EnvSource, key: &str, default: f64, min: f64, max: f64) -> f64 {
    env.get(key)
        .and_then(|raw| raw.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .map(|value| value.clamp(min, max))
        .unwrap_or(default)
}
