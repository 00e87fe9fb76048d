// Error types for the download pipeline
//
// One enum per pipeline stage. `DownloadError` wraps them all and reports
// which stage failed together with the underlying cause.

use std::path::PathBuf;
use thiserror::Error;

/// Page or player script could not be retrieved
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure (DNS, TLS, connection reset, timeout)
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Server answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// Input is not a recognisable media URL or identifier
    #[error("invalid media URL: {0}")]
    InvalidUrl(String),

    /// HTTP client could not be constructed (bad proxy URL, TLS backend)
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Required element missing from the page
#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("player script reference not found in page")]
    ScriptPathMissing,

    #[error("player script reference is not a valid URL: {0}")]
    InvalidScriptUrl(String),

    #[error("player response not found in page")]
    PlayerResponseMissing,

    #[error("player response is not valid JSON: {0}")]
    MalformedPlayerResponse(#[source] serde_json::Error),

    #[error("player response has no adaptive formats")]
    StreamingDataMissing,
}

/// Cipher derivation or application failure
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("transform function not found in player script")]
    TransformNotFound,

    #[error("body of transform function `{0}` is not terminated")]
    UnterminatedBody(String),

    /// A statement in the transform body matched none of the known idioms
    #[error("unrecognized cipher shape: `{0}`")]
    UnknownShape(String),

    #[error("helper object `{0}` referenced by transform not found")]
    HelperMissing(String),

    #[error("transform function `{0}` produced no operations")]
    EmptySequence(String),

    /// Swap index beyond the token; the derived sequence does not fit this token
    #[error("swap index {index} out of range for token of length {len}")]
    SwapOutOfRange { index: usize, len: usize },

    #[error("cipher token is missing from {0}")]
    MissingToken(&'static str),

    #[error("ciphered base URL is invalid: {0}")]
    InvalidBaseUrl(String),
}

/// Invalid stream choice
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("video index {index} out of range (0..{len})")]
    VideoIndex { index: usize, len: usize },

    #[error("audio index {index} out of range (0..{len})")]
    AudioIndex { index: usize, len: usize },

    #[error("no video representations offered")]
    NoVideo,

    #[error("no audio representations offered")]
    NoAudio,

    #[error("format {id} is not a {expected} representation")]
    KindMismatch { id: String, expected: &'static str },
}

/// Segment transfer failure
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned HTTP {0}")]
    Status(u16),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stream ended before the declared length was reached
    #[error("short read: {received} of {expected} bytes")]
    ShortRead { expected: u64, received: u64 },

    #[error("source URL has no host: {0}")]
    NoHost(String),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<TransferError>,
    },

    #[error("transfer cancelled")]
    Cancelled,
}

/// External encoder failure
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("encoder binary not found: {0}")]
    NotFound(String),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("encoder exited with status {code:?}: {stderr}")]
    ExitStatus { code: Option<i32>, stderr: String },

    #[error("encoder timed out after {0}s")]
    Timeout(u64),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<EncodingError>,
    },
}

/// Configuration could not be loaded
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration in {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// Top-level error: which stage failed and why
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("page fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("page parsing failed: {0}")]
    Locator(#[from] LocatorError),

    #[error("cipher failed: {0}")]
    Cipher(#[from] CipherError),

    #[error("stream selection failed: {0}")]
    Selection(#[from] SelectionError),

    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("encoding failed: {0}")]
    Encoding(#[from] EncodingError),

    #[error("configuration failed: {0}")]
    Config(#[from] ConfigError),
}

impl DownloadError {
    /// Short name of the stage that failed
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "page fetch",
            Self::Locator(_) => "page parsing",
            Self::Cipher(_) => "cipher",
            Self::Selection(_) => "stream selection",
            Self::Transfer(_) => "transfer",
            Self::Encoding(_) => "encoding",
            Self::Config(_) => "configuration",
        }
    }

    /// Whether re-prompting the caller can recover from this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Selection(SelectionError::VideoIndex { .. } | SelectionError::AudioIndex { .. })
        )
    }
}
