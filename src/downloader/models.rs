// Common data models for the download pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use url::Url;

use super::errors::SelectionError;

/// Client version token as found (or not found) on the page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientVersion {
    /// Version declared by the page
    Discovered(String),
    /// Last-known-good version substituted because the page declared none
    Fallback(String),
}

impl ClientVersion {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Discovered(v) | Self::Fallback(v) => v,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovered(v) => write!(f, "{}", v),
            Self::Fallback(v) => write!(f, "{} (fallback)", v),
        }
    }
}

/// Reference to the player script of one page generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerScriptRef {
    pub url: Url,
    pub client_version: ClientVersion,
}

impl PlayerScriptRef {
    /// Key under which the derived operation sequence is cached.
    ///
    /// A fallback version is namespaced and bound to the script URL so it never
    /// shares an entry with a discovered version.
    pub fn cache_key(&self) -> String {
        match &self.client_version {
            ClientVersion::Discovered(v) => v.clone(),
            ClientVersion::Fallback(v) => format!("fallback:{}@{}", v, self.url),
        }
    }
}

/// Elementary stream kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    /// Classify by MIME major type
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        if mime_type.starts_with("video/") {
            Some(Self::Video)
        } else if mime_type.starts_with("audio/") {
            Some(Self::Audio)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

/// Field through which a ciphered token was delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherField {
    SignatureCipher,
    /// Legacy key name
    Cipher,
}

impl CipherField {
    pub fn key(&self) -> &'static str {
        match self {
            Self::SignatureCipher => "signatureCipher",
            Self::Cipher => "cipher",
        }
    }
}

/// How a representation's bytes can be reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSource {
    /// Ready-to-fetch URL
    Direct(Url),
    /// Token that must be deciphered and appended to `base_url`
    Ciphered {
        field: CipherField,
        token: String,
        /// Query parameter that receives the deciphered token
        signature_param: String,
        base_url: String,
    },
}

impl StreamSource {
    pub fn requires_decipher(&self) -> bool {
        matches!(self, Self::Ciphered { .. })
    }
}

/// One offered representation
#[derive(Debug, Clone, PartialEq)]
pub struct FormatDescriptor {
    /// Format ID (itag)
    pub id: String,
    /// MIME type without parameters (e.g., "video/mp4")
    pub mime_type: String,
    /// Codec string from the MIME parameters (e.g., "avc1.640028")
    pub codecs: String,
    /// Quality label (e.g., "1080p60"); audio usually has none
    pub quality_label: Option<String>,
    /// Average bitrate in bits per second
    pub bitrate: u64,
    pub kind: MediaKind,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    /// Declared byte length, when the origin publishes it
    pub content_length: Option<u64>,
    pub source: StreamSource,
}

impl FormatDescriptor {
    /// Resolution string (e.g., "1280x720")
    pub fn resolution(&self) -> Option<String> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(format!("{}x{}", w, h)),
            _ => None,
        }
    }

    /// File extension derived from the MIME subtype
    pub fn extension(&self) -> &str {
        match self.mime_type.split_once('/') {
            Some((_, "mp4")) if self.kind == MediaKind::Audio => "m4a",
            Some((_, subtype)) if !subtype.is_empty() => subtype,
            _ => "bin",
        }
    }

    /// Check if format is H.264 (avc1)
    pub fn is_h264(&self) -> bool {
        self.codecs.starts_with("avc1")
    }

    /// Check if format is VP9
    pub fn is_vp9(&self) -> bool {
        self.codecs.starts_with("vp9") || self.codecs.starts_with("vp09")
    }

    /// Check if format is AV1
    pub fn is_av1(&self) -> bool {
        self.codecs.starts_with("av01")
    }

    /// Check if audio is AAC (mp4a)
    pub fn is_aac(&self) -> bool {
        self.codecs.starts_with("mp4a")
    }
}

/// One video and one audio representation chosen together
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSelection {
    video: FormatDescriptor,
    audio: FormatDescriptor,
}

impl StreamSelection {
    pub fn new(video: FormatDescriptor, audio: FormatDescriptor) -> Result<Self, SelectionError> {
        if video.kind != MediaKind::Video {
            return Err(SelectionError::KindMismatch {
                id: video.id,
                expected: "video",
            });
        }
        if audio.kind != MediaKind::Audio {
            return Err(SelectionError::KindMismatch {
                id: audio.id,
                expected: "audio",
            });
        }
        Ok(Self { video, audio })
    }

    pub fn video(&self) -> &FormatDescriptor {
        &self.video
    }

    pub fn audio(&self) -> &FormatDescriptor {
        &self.audio
    }

    /// Replace the video with another video representation
    pub fn with_video(self, video: FormatDescriptor) -> Result<Self, SelectionError> {
        Self::new(video, self.audio)
    }
}

/// Metadata shown to the user and used for file naming
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoDetails {
    pub id: String,
    pub title: String,
    pub author: String,
    pub length_seconds: u64,
}

/// Segmented transfer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Idle,
    Requesting,
    Streaming,
    Retrying,
    Complete,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Transfer of one representation to one destination file
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub source_url: Url,
    pub destination: PathBuf,
    pub total_bytes: Option<u64>,
    pub downloaded_bytes: u64,
    pub attempt: u32,
    pub max_attempts: u32,
    pub(crate) state: TaskState,
}

impl DownloadTask {
    pub fn new(
        source_url: Url,
        destination: impl Into<PathBuf>,
        total_bytes: Option<u64>,
        max_attempts: u32,
    ) -> Self {
        Self {
            source_url,
            destination: destination.into(),
            total_bytes,
            downloaded_bytes: 0,
            attempt: 0,
            max_attempts: max_attempts.max(1),
            state: TaskState::Idle,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == TaskState::Complete
    }

    /// Completion ratio in percent, when the total is known
    pub fn percent(&self) -> Option<f32> {
        self.total_bytes
            .filter(|t| *t > 0)
            .map(|t| (self.downloaded_bytes as f64 / t as f64 * 100.0).min(100.0) as f32)
    }
}
