// ConversionInvoker - ffmpeg boundary for finished downloads

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::config::EncoderConfig;
use super::errors::EncodingError;
use super::traits::MediaEncoder;
use super::utils::run_output_with_timeout;

/// Where the encoder binary was found
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub path: Option<String>,
    pub version: Option<String>,
    pub is_available: bool,
}

/// Locate ffmpeg: explicit path, then common install locations, then PATH
pub fn detect_ffmpeg(explicit: Option<&Path>) -> ToolInfo {
    let found = match explicit {
        Some(path) => path.exists().then(|| path.to_string_lossy().to_string()),
        None => {
            let common_paths = [
                "/opt/homebrew/bin/ffmpeg",
                "/usr/local/bin/ffmpeg",
                "/usr/bin/ffmpeg",
            ];
            common_paths
                .iter()
                .find(|p| Path::new(p).exists())
                .map(|p| p.to_string())
                .or_else(|| get_version("ffmpeg").map(|_| "ffmpeg".to_string()))
        }
    };

    let version = found.as_deref().and_then(get_version);
    ToolInfo {
        name: "ffmpeg".to_string(),
        is_available: found.is_some(),
        path: found,
        version,
    }
}

/// First line of `ffmpeg -version`
fn get_version(program: &str) -> Option<String> {
    match Command::new(program).arg("-version").output() {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(|line| line.trim().to_string()),
        _ => None,
    }
}

/// Runs ffmpeg with explicit input, output and codec arguments
pub struct ConversionInvoker {
    program: String,
    config: EncoderConfig,
}

impl ConversionInvoker {
    pub fn new(config: &EncoderConfig) -> Result<Self, EncodingError> {
        let tool = detect_ffmpeg(config.ffmpeg_path.as_deref());
        let program = tool.path.ok_or_else(|| {
            EncodingError::NotFound(
                config
                    .ffmpeg_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "ffmpeg".to_string()),
            )
        })?;
        info!(program = %program, version = ?tool.version, "using encoder");
        Ok(Self::with_program(program, config))
    }

    /// Use `program` as is, without discovery
    pub fn with_program(program: impl Into<String>, config: &EncoderConfig) -> Self {
        Self {
            program: program.into(),
            config: config.clone(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// `-i in -vn -c:a <codec> -b:a <bitrate> -y out`
    pub fn audio_args(&self, input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-i".to_string(),
            input.display().to_string(),
            "-vn".to_string(),
            "-c:a".to_string(),
            self.config.audio_codec.clone(),
            "-b:a".to_string(),
            self.config.audio_bitrate.clone(),
            "-y".to_string(),
            output.display().to_string(),
        ]
    }

    /// Video stream copied, audio re-encoded to AAC
    pub fn merge_args(&self, video: &Path, audio: &Path, output: &Path) -> Vec<String> {
        vec![
            "-i".to_string(),
            video.display().to_string(),
            "-i".to_string(),
            audio.display().to_string(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            self.config.audio_bitrate.clone(),
            "-y".to_string(),
            output.display().to_string(),
        ]
    }

    /// Best available H.264 encoder: NVIDIA, then AMD, then software
    pub async fn detect_video_encoder(&self) -> &'static str {
        let args = vec!["-hide_banner".to_string(), "-encoders".to_string()];
        let listing = match run_output_with_timeout(&self.program, &args, 30).await {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout).to_string(),
            _ => return "libx264",
        };

        ["h264_nvenc", "h264_amf"]
            .into_iter()
            .find(|encoder| listing.contains(encoder))
            .unwrap_or("libx264")
    }

    /// Run once per attempt until exit status zero or attempts run out
    async fn run_with_retries(&self, args: &[String]) -> Result<(), EncodingError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            debug!(program = %self.program, ?args, attempt, "running encoder");
            let result = run_output_with_timeout(&self.program, args, self.config.timeout)
                .await
                .and_then(|output| {
                    if output.status.success() {
                        Ok(())
                    } else {
                        Err(EncodingError::ExitStatus {
                            code: output.status.code(),
                            stderr: last_lines(&String::from_utf8_lossy(&output.stderr), 5),
                        })
                    }
                });

            match result {
                Ok(()) => return Ok(()),
                Err(e @ EncodingError::Spawn { .. }) => return Err(e),
                Err(e) => {
                    if attempt < max_attempts {
                        let delay = Duration::from_millis(
                            self.config.retry_delay_ms.saturating_mul(1 << (attempt - 1).min(16)),
                        );
                        warn!(
                            attempt,
                            max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "encoder run failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(EncodingError::Exhausted {
            attempts: max_attempts,
            last: Box::new(last_error.unwrap_or(EncodingError::Timeout(self.config.timeout))),
        })
    }
}

/// Trailing lines of encoder stderr; the banner before them is noise
fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(count)..].join("\n")
}

#[async_trait]
impl MediaEncoder for ConversionInvoker {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn convert_audio(&self, input: &Path, output: &Path) -> Result<(), EncodingError> {
        info!(input = %input.display(), output = %output.display(), "converting audio");
        self.run_with_retries(&self.audio_args(input, output)).await
    }

    async fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), EncodingError> {
        info!(
            video = %video.display(),
            audio = %audio.display(),
            output = %output.display(),
            "merging streams"
        );
        self.run_with_retries(&self.merge_args(video, audio, output)).await
    }
}

/// Final file name for a converted or merged result
pub fn final_path(dir: &Path, title: &str, suffix: &str, extension: &str) -> PathBuf {
    dir.join(format!("{}_{}.{}", title, suffix, extension))
}
