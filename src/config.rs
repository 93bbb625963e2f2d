//! Configuration types for the streaming speech pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// HTTP/SSE server settings.
    pub server: ServerConfig,
    /// Language model settings.
    pub llm: LlmConfig,
    /// Text-to-speech settings.
    pub tts: TtsConfig,
    /// Client playback settings.
    pub playback: PlaybackConfig,
    /// Per-conversation request limits.
    pub rate_limit: RateLimitConfig,
}

/// HTTP/SSE server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port (0 = auto-assign).
    pub port: u16,
    /// Directory for daily-rolling log files (None = stderr only).
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8787,
            log_dir: None,
        }
    }
}

/// Language model (token source) configuration.
///
/// Any server implementing the OpenAI chat completions API works here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the OpenAI-compatible API.
    pub api_url: String,
    /// Model name to request.
    pub api_model: String,
    /// API key (empty for local servers).
    pub api_key: String,
    /// Environment variable consulted when `api_key` is empty.
    pub api_key_env: Option<String>,
    /// System prompt prepended to every turn.
    pub system_prompt: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens to generate per response.
    pub max_tokens: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com".to_owned(),
            api_model: "gpt-4o-mini".to_owned(),
            api_key: String::new(),
            api_key_env: Some("OPENAI_API_KEY".to_owned()),
            system_prompt: "You are a warm, concise coach. Speak in short sentences.".to_owned(),
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

impl LlmConfig {
    /// The API key, falling back to `api_key_env` when unset.
    pub fn resolved_api_key(&self) -> String {
        resolve_key(&self.api_key, self.api_key_env.as_deref())
    }
}

/// TTS vendor selection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsBackend {
    /// OpenAI-compatible `/v1/audio/speech` (estimated word timings).
    #[default]
    OpenAi,
    /// ElevenLabs with-timestamps endpoints (actual word timings, progressive streaming).
    ElevenLabs,
}

/// Text-to-speech configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Whether audio is produced at all.
    pub enabled: bool,
    /// Which vendor to use.
    pub backend: TtsBackend,
    /// Voice name or vendor voice ID.
    pub voice: String,
    /// Speech speed multiplier (0.25–4.0).
    pub speed: f32,
    /// Synthesize sentence-by-sentence while the LLM is still generating.
    ///
    /// When false the full reply is synthesized once after generation.
    pub streaming: bool,
    /// Use progressive sub-sentence delivery when the vendor supports it.
    pub sub_chunk_streaming: bool,
    /// Capacity of the chunk channel between the processor and the transport.
    pub chunk_buffer: usize,
    /// OpenAI-compatible vendor settings.
    pub openai: OpenAiTtsConfig,
    /// ElevenLabs vendor settings.
    pub elevenlabs: ElevenLabsConfig,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: TtsBackend::default(),
            voice: "nova".to_owned(),
            speed: 1.0,
            streaming: true,
            sub_chunk_streaming: true,
            chunk_buffer: 16,
            openai: OpenAiTtsConfig::default(),
            elevenlabs: ElevenLabsConfig::default(),
        }
    }
}

/// OpenAI-compatible speech endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiTtsConfig {
    /// Base URL (without `/v1`).
    pub base_url: String,
    /// Model (`tts-1`, `tts-1-hd`, `gpt-4o-mini-tts`, …).
    pub model: String,
    /// API key.
    pub api_key: String,
    /// Environment variable consulted when `api_key` is empty.
    pub api_key_env: Option<String>,
    /// `mp3`, `wav`, `opus`, `aac`, `flac` or `pcm`.
    pub response_format: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for OpenAiTtsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_owned(),
            model: "tts-1".to_owned(),
            api_key: String::new(),
            api_key_env: Some("OPENAI_API_KEY".to_owned()),
            response_format: "mp3".to_owned(),
            timeout_secs: 30,
        }
    }
}

impl OpenAiTtsConfig {
    /// The API key, falling back to `api_key_env` when unset.
    pub fn resolved_api_key(&self) -> String {
        resolve_key(&self.api_key, self.api_key_env.as_deref())
    }
}

/// ElevenLabs settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevenLabsConfig {
    /// API base URL.
    pub base_url: String,
    /// Model ID.
    pub model: String,
    /// API key.
    pub api_key: String,
    /// Environment variable consulted when `api_key` is empty.
    pub api_key_env: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.elevenlabs.io".to_owned(),
            model: "eleven_flash_v2_5".to_owned(),
            api_key: String::new(),
            api_key_env: Some("ELEVENLABS_API_KEY".to_owned()),
            timeout_secs: 30,
        }
    }
}

impl ElevenLabsConfig {
    /// The API key, falling back to `api_key_env` when unset.
    pub fn resolved_api_key(&self) -> String {
        resolve_key(&self.api_key, self.api_key_env.as_deref())
    }
}

/// Client playback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Output device name (None = system default).
    pub output_device: Option<String>,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            output_device: None,
            sample_rate: 24_000,
        }
    }
}

/// Per-conversation request limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum streamed turns per conversation per minute (0 = unlimited).
    pub max_turns_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_turns_per_minute: 12,
        }
    }
}

fn resolve_key(key: &str, env: Option<&str>) -> String {
    if !key.is_empty() {
        return key.to_owned();
    }
    env.and_then(|name| std::env::var(name).ok())
        .unwrap_or_default()
}

impl SpeechConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::SpeechError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::SpeechError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/ember/config.toml`.
    pub fn default_config_path() -> PathBuf {
        match dirs::config_dir() {
            Some(dir) => dir.join("ember").join("config.toml"),
            None => PathBuf::from("/tmp/ember-config/config.toml"),
        }
    }

    /// Load from `path` if it exists, otherwise return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load_or_default(path: &std::path::Path) -> crate::error::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }
}
