// StreamSelector - ranks offered representations and builds the selection
//
// Handles:
// - Ranking (video by height, fps, bitrate; audio by bitrate)
// - Index-based choice with bounds checking
// - Policy-based choice (height cap, H.264 and AAC preference)
// - Next lower representation for the transfer fallback
// - Display labels with codec and size

use serde::{Deserialize, Serialize};

use super::errors::SelectionError;
use super::format_catalog::FormatCatalog;
use super::models::{FormatDescriptor, StreamSelection};

/// One listed representation for display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatOption {
    /// Index to pass back to `select`
    pub index: usize,

    /// Display label (e.g., "1080p60 (1920x1080)" or "160 kbps")
    pub label: String,

    /// Codec info (e.g., "H.264" or "Opus")
    pub codec_info: String,

    /// Size from the declared content length (e.g., "150 MB")
    pub estimated_size: Option<String>,

    /// Whether the default policy would pick this one
    pub is_recommended: bool,
}

/// Programmatic choice of streams
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionPolicy {
    /// Never pick a video taller than this
    pub max_height: Option<u32>,
    /// Prefer H.264 unless another codec is much taller
    pub prefer_h264: bool,
    /// Prefer AAC audio
    pub prefer_aac: bool,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            max_height: None,
            prefer_h264: true,
            prefer_aac: true,
        }
    }
}

/// Ranked video and audio lists of one catalog
#[derive(Debug, Clone)]
pub struct StreamSelector {
    videos: Vec<FormatDescriptor>,
    audios: Vec<FormatDescriptor>,
}

impl StreamSelector {
    pub fn new(catalog: &FormatCatalog) -> Self {
        let mut videos: Vec<FormatDescriptor> =
            catalog.videos().into_iter().cloned().collect();
        let mut audios: Vec<FormatDescriptor> =
            catalog.audios().into_iter().cloned().collect();

        videos.sort_by_key(|f| {
            std::cmp::Reverse((f.height.unwrap_or(0), f.fps.unwrap_or(0), f.bitrate))
        });
        audios.sort_by_key(|f| std::cmp::Reverse(f.bitrate));

        Self { videos, audios }
    }

    /// Videos, best first
    pub fn videos(&self) -> &[FormatDescriptor] {
        &self.videos
    }

    /// Audios, best first
    pub fn audios(&self) -> &[FormatDescriptor] {
        &self.audios
    }

    /// Build a selection from one index per kind
    pub fn select(
        &self,
        video_index: usize,
        audio_index: usize,
    ) -> Result<StreamSelection, SelectionError> {
        if self.videos.is_empty() {
            return Err(SelectionError::NoVideo);
        }
        if self.audios.is_empty() {
            return Err(SelectionError::NoAudio);
        }

        let video = self
            .videos
            .get(video_index)
            .ok_or(SelectionError::VideoIndex {
                index: video_index,
                len: self.videos.len(),
            })?;
        let audio = self
            .audios
            .get(audio_index)
            .ok_or(SelectionError::AudioIndex {
                index: audio_index,
                len: self.audios.len(),
            })?;

        StreamSelection::new(video.clone(), audio.clone())
    }

    /// Build a selection without user input
    pub fn select_with_policy(
        &self,
        policy: &SelectionPolicy,
    ) -> Result<StreamSelection, SelectionError> {
        let video = self
            .find_best_video(policy)
            .ok_or(SelectionError::NoVideo)?;
        let audio = self
            .find_best_audio(policy)
            .ok_or(SelectionError::NoAudio)?;
        StreamSelection::new(video.clone(), audio.clone())
    }

    /// The video ranked right below `current`
    pub fn next_lower_video(&self, current: &FormatDescriptor) -> Option<&FormatDescriptor> {
        let position = self.videos.iter().position(|f| f.id == current.id)?;
        self.videos.get(position + 1)
    }

    /// The audio ranked right below `current`
    pub fn next_lower_audio(&self, current: &FormatDescriptor) -> Option<&FormatDescriptor> {
        let position = self.audios.iter().position(|f| f.id == current.id)?;
        self.audios.get(position + 1)
    }

    /// Find best video format (highest resolution with H.264 preference)
    fn find_best_video(&self, policy: &SelectionPolicy) -> Option<&FormatDescriptor> {
        let capped: Vec<&FormatDescriptor> = match policy.max_height {
            Some(max) => self
                .videos
                .iter()
                .filter(|f| f.height.map_or(true, |h| h <= max))
                .collect(),
            None => self.videos.iter().collect(),
        };
        // Nothing fits under the cap: take the smallest offered
        let candidates: Vec<&FormatDescriptor> = if capped.is_empty() {
            self.videos.last().into_iter().collect()
        } else {
            capped
        };

        let best_any = candidates.first().copied()?;
        if !policy.prefer_h264 {
            return Some(best_any);
        }

        match candidates.iter().copied().find(|f| f.is_h264()) {
            Some(h264) => {
                // A much taller VP9/AV1 (e.g., 4K vs 1080p) beats compatibility
                let h264_height = h264.height.unwrap_or(0);
                let any_height = best_any.height.unwrap_or(0);
                if any_height > h264_height * 3 / 2 {
                    Some(best_any)
                } else {
                    Some(h264)
                }
            }
            None => Some(best_any),
        }
    }

    /// Find best audio format (prefer AAC for compatibility)
    fn find_best_audio(&self, policy: &SelectionPolicy) -> Option<&FormatDescriptor> {
        if policy.prefer_aac {
            if let Some(aac) = self.audios.iter().find(|f| f.is_aac()) {
                return Some(aac);
            }
        }
        self.audios.first()
    }

    /// Listing of the ranked videos
    pub fn video_options(&self) -> Vec<FormatOption> {
        let recommended = self
            .find_best_video(&SelectionPolicy::default())
            .map(|f| f.id.clone());

        self.videos
            .iter()
            .enumerate()
            .map(|(index, f)| {
                let quality = f
                    .quality_label
                    .clone()
                    .or_else(|| f.height.map(|h| format!("{}p", h)))
                    .unwrap_or_else(|| "unknown".to_string());
                let label = match (f.resolution(), f.fps) {
                    (Some(res), Some(fps)) => format!("{} ({} at {} fps)", quality, res, fps),
                    (Some(res), None) => format!("{} ({})", quality, res),
                    _ => quality,
                };
                FormatOption {
                    index,
                    label,
                    codec_info: codec_label(f),
                    estimated_size: format_size(f.content_length),
                    is_recommended: recommended.as_deref() == Some(f.id.as_str()),
                }
            })
            .collect()
    }

    /// Listing of the ranked audios
    pub fn audio_options(&self) -> Vec<FormatOption> {
        let recommended = self
            .find_best_audio(&SelectionPolicy::default())
            .map(|f| f.id.clone());

        self.audios
            .iter()
            .enumerate()
            .map(|(index, f)| FormatOption {
                index,
                label: format!("{} kbps", f.bitrate / 1000),
                codec_info: codec_label(f),
                estimated_size: format_size(f.content_length),
                is_recommended: recommended.as_deref() == Some(f.id.as_str()),
            })
            .collect()
    }
}

/// Format file size for display
pub fn format_size(bytes: Option<u64>) -> Option<String> {
    bytes.map(|b| {
        let mb = b as f64 / 1_048_576.0;
        if mb >= 1024.0 {
            format!("{:.1} GB", mb / 1024.0)
        } else {
            format!("{:.0} MB", mb)
        }
    })
}

/// Get human-readable codec label
pub fn codec_label(format: &FormatDescriptor) -> String {
    if format.is_h264() {
        "H.264".to_string()
    } else if format.is_vp9() {
        "VP9".to_string()
    } else if format.is_av1() {
        "AV1".to_string()
    } else if format.is_aac() {
        "AAC".to_string()
    } else if format.codecs.starts_with("opus") {
        "Opus".to_string()
    } else if format.codecs.is_empty() {
        "Unknown".to_string()
    } else {
        format
            .codecs
            .split('.')
            .next()
            .unwrap_or(&format.codecs)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::{MediaKind, StreamSource};
    use url::Url;

    fn make_video_format(id: &str, height: u32, fps: u32, codecs: &str) -> FormatDescriptor {
        FormatDescriptor {
            id: id.to_string(),
            mime_type: "video/mp4".to_string(),
            codecs: codecs.to_string(),
            quality_label: Some(format!("{}p", height)),
            bitrate: height as u64 * 1000,
            kind: MediaKind::Video,
            width: Some(height * 16 / 9),
            height: Some(height),
            fps: Some(fps),
            content_length: Some(height as u64 * 100_000),
            source: StreamSource::Direct(Url::parse("https://e.com/v").unwrap()),
        }
    }

    fn make_audio_format(id: &str, bitrate: u64, codecs: &str) -> FormatDescriptor {
        FormatDescriptor {
            id: id.to_string(),
            mime_type: "audio/webm".to_string(),
            codecs: codecs.to_string(),
            quality_label: None,
            bitrate,
            kind: MediaKind::Audio,
            width: None,
            height: None,
            fps: None,
            content_length: None,
            source: StreamSource::Direct(Url::parse("https://e.com/a").unwrap()),
        }
    }

    fn selector(videos: Vec<FormatDescriptor>, audios: Vec<FormatDescriptor>) -> StreamSelector {
        let mut all = videos;
        all.extend(audios);
        StreamSelector::new(&FormatCatalog::from_formats(all))
    }

    #[test]
    fn test_ranking() {
        let s = selector(
            vec![
                make_video_format("a", 720, 30, "avc1.4d401f"),
                make_video_format("b", 1080, 30, "vp9"),
                make_video_format("c", 1080, 60, "vp9"),
            ],
            vec![
                make_audio_format("x", 70_000, "opus"),
                make_audio_format("y", 160_000, "opus"),
            ],
        );
        let ids: Vec<&str> = s.videos().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
        assert_eq!(s.audios()[0].id, "y");
    }

    #[test]
    fn test_select_rejects_out_of_range() {
        let s = selector(
            vec![make_video_format("a", 720, 30, "avc1")],
            vec![make_audio_format("x", 128_000, "opus")],
        );
        assert!(s.select(0, 0).is_ok());
        assert_eq!(
            s.select(1, 0).unwrap_err(),
            SelectionError::VideoIndex { index: 1, len: 1 }
        );
        assert_eq!(
            s.select(0, 5).unwrap_err(),
            SelectionError::AudioIndex { index: 5, len: 1 }
        );
    }

    #[test]
    fn test_select_requires_both_kinds() {
        let s = selector(vec![make_video_format("a", 720, 30, "avc1")], vec![]);
        assert_eq!(s.select(0, 0).unwrap_err(), SelectionError::NoAudio);
        assert_eq!(
            s.select_with_policy(&SelectionPolicy::default()).unwrap_err(),
            SelectionError::NoAudio
        );
    }

    #[test]
    fn test_h264_preference() {
        let s = selector(
            vec![
                make_video_format("vp9", 1080, 60, "vp9"),
                make_video_format("avc", 1080, 30, "avc1.640028"),
            ],
            vec![
                make_audio_format("opus", 160_000, "opus"),
                make_audio_format("aac", 128_000, "mp4a.40.2"),
            ],
        );
        let selection = s.select_with_policy(&SelectionPolicy::default()).unwrap();
        assert_eq!(selection.video().id, "avc");
        assert_eq!(selection.audio().id, "aac");

        let s = selector(
            vec![
                make_video_format("vp9", 2160, 30, "vp9"),
                make_video_format("avc", 1080, 30, "avc1.640028"),
            ],
            vec![make_audio_format("aac", 128_000, "mp4a.40.2")],
        );
        let selection = s.select_with_policy(&SelectionPolicy::default()).unwrap();
        assert_eq!(selection.video().id, "vp9");
        assert_eq!(selection.audio().id, "aac");
    }

    #[test]
    fn test_height_cap_and_fallback_order() {
        let s = selector(
            vec![
                make_video_format("hd", 1080, 30, "avc1"),
                make_video_format("sd", 480, 30, "avc1"),
                make_video_format("mid", 720, 30, "avc1"),
            ],
            vec![make_audio_format("x", 128_000, "opus")],
        );
        let policy = SelectionPolicy {
            max_height: Some(720),
            ..SelectionPolicy::default()
        };
        let selection = s.select_with_policy(&policy).unwrap();
        assert_eq!(selection.video().id, "mid");

        let lower = s.next_lower_video(selection.video()).unwrap();
        assert_eq!(lower.id, "sd");
        assert!(s.next_lower_video(lower).is_none());

        let tiny = SelectionPolicy {
            max_height: Some(144),
            ..SelectionPolicy::default()
        };
        assert_eq!(s.select_with_policy(&tiny).unwrap().video().id, "sd");
    }

    #[test]
    fn test_options_labels() {
        let s = selector(
            vec![make_video_format("a", 1080, 60, "avc1.640028")],
            vec![make_audio_format("x", 160_000, "opus")],
        );
        let videos = s.video_options();
        assert_eq!(videos[0].label, "1080p (1920x1080 at 60 fps)");
        assert_eq!(videos[0].codec_info, "H.264");
        assert_eq!(videos[0].estimated_size.as_deref(), Some("103 MB"));
        assert!(videos[0].is_recommended);

        let audios = s.audio_options();
        assert_eq!(audios[0].label, "160 kbps");
        assert_eq!(audios[0].codec_info, "Opus");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(Some(5 * 1_048_576)), Some("5 MB".to_string()));
        assert_eq!(format_size(Some(3 * 1_073_741_824 / 2)), Some("1.5 GB".to_string()));
        assert_eq!(format_size(None), None);
    }
}
