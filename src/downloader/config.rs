// Configuration passed explicitly into each pipeline component

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::errors::ConfigError;

/// Last client version known to work; used only when the page omits one
pub const FALLBACK_CLIENT_VERSION: &str = "2.20241107.11.00";

/// Upper bound for a single backoff sleep
pub const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Complete downloader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub transfer: TransferConfig,
    pub encoder: EncoderConfig,
    /// Root directory for downloaded and converted files
    pub output_dir: PathBuf,
    /// Client version assumed when the page does not declare one
    pub fallback_client_version: String,
    /// Retry with the next lower representation when the chosen one keeps failing
    pub allow_fallback: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            transfer: TransferConfig::default(),
            encoder: EncoderConfig::default(),
            output_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            fallback_client_version: FALLBACK_CLIENT_VERSION.to_string(),
            allow_fallback: true,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate().map_err(|reason| ConfigError::Invalid {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(config)
    }

    /// Reject values that deserialize but cannot drive the pipeline
    pub fn validate(&self) -> Result<(), String> {
        let base = self.transfer.backoff_base;
        if !base.is_finite() || base <= 0.0 {
            return Err(format!("transfer.backoff_base must be positive, got {}", base));
        }
        Ok(())
    }
}

/// Network configuration for page, script and media requests
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Origin root; relative script paths and watch URLs are built against it
    pub origin: String,

    /// SOCKS5/HTTP proxy URL (e.g., "socks5://127.0.0.1:1080")
    pub proxy: Option<String>,

    /// Timeout in seconds for page and script requests
    pub timeout: Option<u32>,

    /// Immediate retries for page and script requests
    pub page_retries: u32,

    pub user_agent: String,

    pub accept_language: String,

    /// Skip certificate validation for page and script requests only
    pub accept_invalid_certs: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            origin: "https://www.youtube.com".to_string(),
            proxy: None,
            timeout: Some(30),
            page_retries: 3,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36".to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            accept_invalid_certs: true,
        }
    }
}

impl NetworkConfig {
    /// Origin without a trailing slash
    pub fn origin_root(&self) -> &str {
        self.origin.trim_end_matches('/')
    }

    /// Referer value sent with page requests
    pub fn referer(&self) -> String {
        format!("{}/", self.origin_root())
    }
}

/// Segmented transfer retry and buffering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Total attempts per task, including the first
    pub max_attempts: u32,

    /// Exponential base: the n-th retry waits `backoff_unit * backoff_base^n`
    pub backoff_base: f64,

    /// Unit of the backoff delay in milliseconds
    pub backoff_unit_ms: u64,

    /// Write buffer size; data reaches disk in chunks of this size
    pub chunk_size: usize,

    /// Per-request timeout in seconds for media requests (none by default)
    pub timeout: Option<u32>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: 2.0,
            backoff_unit_ms: 1000,
            chunk_size: 1024 * 1024,
            timeout: None,
        }
    }
}

impl TransferConfig {
    /// Delay before returning to `Requesting` after the given attempt
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_base.powi(attempt as i32);
        let secs = self.backoff_unit_ms as f64 * factor / 1000.0;
        // f64::max maps NaN to zero
        Duration::from_secs_f64(secs.max(0.0).min(MAX_BACKOFF.as_secs_f64()))
    }
}

/// What the encoder boundary produces once both streams are on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostProcess {
    /// Convert the raw audio to MP3, keep the video file as downloaded
    #[default]
    AudioMp3,
    /// Mux video with the audio re-encoded to AAC into an MP4
    MergeAac,
    /// Leave raw files untouched
    None,
}

/// External encoder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Explicit ffmpeg path; discovered when unset
    pub ffmpeg_path: Option<PathBuf>,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub max_attempts: u32,
    /// First retry waits this long; each further retry doubles it
    pub retry_delay_ms: u64,
    /// Timeout in seconds for a single encoder run
    pub timeout: u64,
    pub mode: PostProcess,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            audio_codec: "libmp3lame".to_string(),
            audio_bitrate: "192k".to_string(),
            max_attempts: 3,
            retry_delay_ms: 1000,
            timeout: 3600,
            mode: PostProcess::AudioMp3,
        }
    }
}
