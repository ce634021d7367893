use std::{fmt, path::Path, str::FromStr, time::Duration};

pub const DEFAULT_MODEL_NAME: &str = "google/medgemma-4b-it";
pub const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";
pub const DEFAULT_INFERENCE_ENDPOINT: &str = "https://router.huggingface.co/v1/chat/completions";
pub const DEFAULT_MAX_NEW_TOKENS: u32 = 500;
pub const DEFAULT_TEMPERATURE: f32 = 0.1;

/// Prefix of the token shipped in the `.env` template.
pub const TOKEN_PLACEHOLDER_PREFIX: &str = "hf_xxx";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("HF_TOKEN is not configured")]
    MissingToken,
    #[error("HF_TOKEN still holds the placeholder value")]
    PlaceholderToken,
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("failed to read {path}: {source}")]
    EnvFile {
        path: String,
        #[source]
        source: dotenvy::Error,
    },
}

impl ConfigError {
    /// Lines telling the operator how to fix the configuration.
    pub fn remediation(&self) -> Vec<String> {
        match self {
            ConfigError::MissingToken | ConfigError::PlaceholderToken => vec![
                "Go to https://huggingface.co/settings/tokens".to_string(),
                "Create a new token and update the .env file".to_string(),
            ],
            ConfigError::Invalid { key, .. } => vec![format!("Fix {key} in the .env file")],
            ConfigError::EnvFile { .. } => {
                vec!["Check that the .env file is readable KEY=VALUE text".to_string()]
            }
        }
    }
}

/// Where the model is placed by the serving backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Device {
    Auto,
    Cpu,
    Cuda(u32),
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Device::Auto),
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|idx| idx.parse().ok())
                .map(Device::Cuda)
                .ok_or_else(|| "expected auto, cpu, cuda or cuda:<index>".to_string()),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Auto => f.write_str("auto"),
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda(idx) => write!(f, "cuda:{idx}"),
        }
    }
}

/// Numeric precision the model weights are served in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Dtype {
    #[default]
    BFloat16,
    Float16,
    Float32,
}

impl Dtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dtype::BFloat16 => "bfloat16",
            Dtype::Float16 => "float16",
            Dtype::Float32 => "float32",
        }
    }

    /// Unknown names fall back to bfloat16.
    pub fn parse_or_default(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "bfloat16" => Dtype::BFloat16,
            "float16" => Dtype::Float16,
            "float32" => Dtype::Float32,
            other => {
                log::warn!("Unknown TORCH_DTYPE {other:?}, using bfloat16");
                Dtype::BFloat16
            }
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings of one inference session, read once at startup.
#[derive(Clone)]
pub struct SessionConfig {
    pub hf_token: String,
    pub model_name: String,
    pub device: Device,
    pub dtype: Dtype,
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub debug: bool,
    pub hub_endpoint: String,
    pub inference_endpoint: String,
    pub request_timeout: Option<Duration>,
}

// keep the token out of debug output
impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("hf_token", &"<redacted>")
            .field("model_name", &self.model_name)
            .field("device", &self.device)
            .field("dtype", &self.dtype)
            .field("max_new_tokens", &self.max_new_tokens)
            .field("temperature", &self.temperature)
            .field("debug", &self.debug)
            .field("hub_endpoint", &self.hub_endpoint)
            .field("inference_endpoint", &self.inference_endpoint)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// `DEBUG` is on unless set to something other than `true`.
pub fn debug_enabled(value: Option<&str>) -> bool {
    value.is_none_or(|value| value.trim().eq_ignore_ascii_case("true"))
}

impl SessionConfig {
    /// Builds the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key-value source.
    ///
    /// The credential is validated first so that nothing else is parsed
    /// for a session that cannot authenticate.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let hf_token = match lookup("HF_TOKEN") {
            Some(token) if token.trim().is_empty() => return Err(ConfigError::MissingToken),
            Some(token) if token.trim().starts_with(TOKEN_PLACEHOLDER_PREFIX) => {
                return Err(ConfigError::PlaceholderToken);
            }
            Some(token) => token.trim().to_string(),
            None => return Err(ConfigError::MissingToken),
        };

        let device = match lookup("DEVICE") {
            Some(value) => value.parse().map_err(|reason| ConfigError::Invalid {
                key: "DEVICE",
                value,
                reason,
            })?,
            None => Device::Auto,
        };

        let dtype = lookup("TORCH_DTYPE")
            .map(|value| Dtype::parse_or_default(&value))
            .unwrap_or_default();

        let max_new_tokens = parse_or(&lookup, "MAX_NEW_TOKENS", DEFAULT_MAX_NEW_TOKENS)?;
        let temperature = parse_or(&lookup, "TEMPERATURE", DEFAULT_TEMPERATURE)?;
        let request_timeout = match lookup("REQUEST_TIMEOUT_SECS") {
            Some(value) if !value.trim().is_empty() => Some(Duration::from_secs(
                value.trim().parse().map_err(|e: std::num::ParseIntError| {
                    ConfigError::Invalid {
                        key: "REQUEST_TIMEOUT_SECS",
                        value: value.clone(),
                        reason: e.to_string(),
                    }
                })?,
            )),
            _ => None,
        };

        Ok(Self {
            hf_token,
            model_name: lookup("MODEL_NAME").unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string()),
            device,
            dtype,
            max_new_tokens,
            temperature,
            debug: debug_enabled(lookup("DEBUG").as_deref()),
            hub_endpoint: lookup("HUB_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_HUB_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
            inference_endpoint: lookup("INFERENCE_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_INFERENCE_ENDPOINT.to_string()),
            request_timeout,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

/// Merges a `.env` file into the process environment.
///
/// Variables already set in the environment take precedence. Returns
/// `false` when the file does not exist.
pub fn load_env_file(path: &Path) -> Result<bool, ConfigError> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(true),
        Err(e) if e.not_found() => Ok(false),
        Err(source) => Err(ConfigError::EnvFile {
            path: path.display().to_string(),
            source,
        }),
    }
}
