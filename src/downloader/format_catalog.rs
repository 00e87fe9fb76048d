// FormatCatalog - offered representations parsed from the player response

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};
use url::{form_urlencoded, Url};

use super::errors::{CipherError, LocatorError};
use super::models::{CipherField, FormatDescriptor, MediaKind, StreamSource};

/// Adaptive format entry as the origin serializes it
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFormat {
    itag: u32,
    mime_type: Option<String>,
    #[serde(default)]
    bitrate: u64,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    quality_label: Option<String>,
    content_length: Option<String>,
    url: Option<String>,
    signature_cipher: Option<String>,
    cipher: Option<String>,
}

/// Key under which duplicates collapse
#[derive(Debug, PartialEq, Eq, Hash)]
enum DedupKey {
    Video {
        resolution: Option<String>,
        fps: Option<u32>,
    },
    Audio {
        bitrate: u64,
    },
}

impl DedupKey {
    fn of(format: &FormatDescriptor) -> Self {
        match format.kind {
            MediaKind::Video => DedupKey::Video {
                resolution: format.resolution(),
                fps: format.fps,
            },
            MediaKind::Audio => DedupKey::Audio {
                bitrate: format.bitrate,
            },
        }
    }
}

/// Split `video/mp4; codecs="avc1.640028"` into MIME type and codecs
pub fn parse_mime(raw: &str) -> (String, String) {
    let mut parts = raw.splitn(2, ';');
    let mime = parts.next().unwrap_or_default().trim().to_string();
    let codecs = parts
        .next()
        .and_then(|params| params.trim().strip_prefix("codecs="))
        .map(|c| c.trim_matches('"').to_string())
        .unwrap_or_default();
    (mime, codecs)
}

/// Decode a form-encoded `s=..&sp=..&url=..` cipher field
pub fn parse_cipher(field: CipherField, raw: &str) -> Result<StreamSource, CipherError> {
    let mut token = None;
    let mut signature_param = None;
    let mut base_url = None;

    for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
        match key.as_ref() {
            "s" => token = Some(value.into_owned()),
            "sp" => signature_param = Some(value.into_owned()),
            "url" => base_url = Some(value.into_owned()),
            _ => {}
        }
    }

    Ok(StreamSource::Ciphered {
        field,
        token: token.ok_or(CipherError::MissingToken(field.key()))?,
        signature_param: signature_param.unwrap_or_else(|| "signature".to_string()),
        base_url: base_url.ok_or(CipherError::InvalidBaseUrl(format!(
            "{} has no url component",
            field.key()
        )))?,
    })
}

impl RawFormat {
    fn into_descriptor(self) -> Option<FormatDescriptor> {
        let (mime_type, codecs) = parse_mime(self.mime_type.as_deref()?);
        let kind = MediaKind::from_mime(&mime_type)?;

        let source = if let Some(url) = self.url.as_deref() {
            match Url::parse(url) {
                Ok(url) => StreamSource::Direct(url),
                Err(e) => {
                    warn!(itag = self.itag, error = %e, "skipping format with invalid url");
                    return None;
                }
            }
        } else {
            let (field, raw) = match (&self.signature_cipher, &self.cipher) {
                (Some(raw), _) => (CipherField::SignatureCipher, raw),
                (None, Some(raw)) => (CipherField::Cipher, raw),
                (None, None) => {
                    debug!(itag = self.itag, "format has no url or cipher");
                    return None;
                }
            };
            match parse_cipher(field, raw) {
                Ok(source) => source,
                Err(e) => {
                    warn!(itag = self.itag, error = %e, "skipping format with malformed cipher");
                    return None;
                }
            }
        };

        Some(FormatDescriptor {
            id: self.itag.to_string(),
            mime_type,
            codecs,
            quality_label: self.quality_label,
            bitrate: self.bitrate,
            kind,
            width: self.width,
            height: self.height,
            fps: self.fps,
            content_length: self.content_length.and_then(|c| c.parse().ok()),
            source,
        })
    }
}

/// Classified, de-duplicated representation lists
#[derive(Debug, Clone, Default)]
pub struct FormatCatalog {
    formats: Vec<FormatDescriptor>,
}

impl FormatCatalog {
    /// Build from the player response's `streamingData.adaptiveFormats`
    pub fn from_player_response(player_response: &Value) -> Result<Self, LocatorError> {
        let entries = player_response
            .pointer("/streamingData/adaptiveFormats")
            .and_then(Value::as_array)
            .ok_or(LocatorError::StreamingDataMissing)?;

        let parsed = Self::parse_entries(entries);
        let catalog = Self::from_formats(parsed);
        debug!(
            offered = entries.len(),
            videos = catalog.videos().len(),
            audios = catalog.audios().len(),
            "parsed format catalog"
        );
        Ok(catalog)
    }

    /// Parse entries without de-duplication; unusable entries are skipped
    pub fn parse_entries(entries: &[Value]) -> Vec<FormatDescriptor> {
        entries
            .iter()
            .filter_map(|entry| match RawFormat::deserialize(entry) {
                Ok(raw) => raw.into_descriptor(),
                Err(e) => {
                    debug!(error = %e, "skipping unparseable format entry");
                    None
                }
            })
            .collect()
    }

    /// Collapse duplicates, keeping the last-seen descriptor of each key
    pub fn from_formats(formats: Vec<FormatDescriptor>) -> Self {
        let mut seen = HashSet::new();
        let mut kept: Vec<FormatDescriptor> = formats
            .into_iter()
            .rev()
            .filter(|f| seen.insert(DedupKey::of(f)))
            .collect();
        kept.reverse();
        Self { formats: kept }
    }

    pub fn all(&self) -> &[FormatDescriptor] {
        &self.formats
    }

    pub fn videos(&self) -> Vec<&FormatDescriptor> {
        self.of_kind(MediaKind::Video)
    }

    pub fn audios(&self) -> Vec<&FormatDescriptor> {
        self.of_kind(MediaKind::Audio)
    }

    fn of_kind(&self, kind: MediaKind) -> Vec<&FormatDescriptor> {
        self.formats.iter().filter(|f| f.kind == kind).collect()
    }

    pub fn find(&self, id: &str) -> Option<&FormatDescriptor> {
        self.formats.iter().find(|f| f.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(formats: Value) -> Value {
        json!({"streamingData": {"adaptiveFormats": formats}})
    }

    #[test]
    fn test_later_duplicate_wins() {
        let value = response(json!([
            {"itag": 136, "mimeType": "video/mp4; codecs=\"avc1.4d401f\"", "width": 1280, "height": 720, "fps": 30, "bitrate": 1000, "url": "https://r1.example.com/a"},
            {"itag": 247, "mimeType": "video/webm; codecs=\"vp9\"", "width": 1280, "height": 720, "fps": 30, "bitrate": 900, "url": "https://r1.example.com/b"},
            {"itag": 140, "mimeType": "audio/mp4; codecs=\"mp4a.40.2\"", "bitrate": 130000, "url": "https://r1.example.com/c"}
        ]));

        let catalog = FormatCatalog::from_player_response(&value).unwrap();
        let videos = catalog.videos();
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].id, "247");
        assert_eq!(videos[0].codecs, "vp9");
        assert_eq!(catalog.audios().len(), 1);
    }

    #[test]
    fn test_dedup_keeps_order_of_last_occurrences() {
        let value = response(json!([
            {"itag": 1, "mimeType": "video/mp4", "width": 1920, "height": 1080, "fps": 30, "url": "https://e.com/1"},
            {"itag": 2, "mimeType": "video/mp4", "width": 1280, "height": 720, "fps": 30, "url": "https://e.com/2"},
            {"itag": 3, "mimeType": "video/mp4", "width": 1920, "height": 1080, "fps": 30, "url": "https://e.com/3"},
            {"itag": 4, "mimeType": "video/mp4", "width": 1920, "height": 1080, "fps": 60, "url": "https://e.com/4"}
        ]));
        let catalog = FormatCatalog::from_player_response(&value).unwrap();
        let ids: Vec<&str> = catalog.all().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "4"]);
    }

    #[test]
    fn test_audio_dedup_by_bitrate() {
        let value = response(json!([
            {"itag": 140, "mimeType": "audio/mp4; codecs=\"mp4a.40.2\"", "bitrate": 128000, "url": "https://e.com/a"},
            {"itag": 251, "mimeType": "audio/webm; codecs=\"opus\"", "bitrate": 128000, "url": "https://e.com/b"},
            {"itag": 250, "mimeType": "audio/webm; codecs=\"opus\"", "bitrate": 70000, "url": "https://e.com/c"}
        ]));
        let catalog = FormatCatalog::from_player_response(&value).unwrap();
        let ids: Vec<&str> = catalog.audios().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["251", "250"]);
    }

    #[test]
    fn test_ciphered_entry_requires_decipher() {
        let value = response(json!([
            {"itag": 251, "mimeType": "audio/webm; codecs=\"opus\"", "bitrate": 160000, "contentLength": "3456789",
             "signatureCipher": "s=AOq0QJ8w%3D%3D&sp=sig&url=https%3A%2F%2Fr2.example.com%2Fvideoplayback%3Fitag%3D251"}
        ]));
        let catalog = FormatCatalog::from_player_response(&value).unwrap();
        let audio = catalog.find("251").unwrap();
        assert_eq!(audio.content_length, Some(3_456_789));
        assert!(audio.source.requires_decipher());
        match &audio.source {
            StreamSource::Ciphered {
                field,
                token,
                signature_param,
                base_url,
            } => {
                assert_eq!(*field, CipherField::SignatureCipher);
                assert_eq!(token, "AOq0QJ8w==");
                assert_eq!(signature_param, "sig");
                assert_eq!(base_url, "https://r2.example.com/videoplayback?itag=251");
            }
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_legacy_cipher_key_and_default_param() {
        let source = parse_cipher(CipherField::Cipher, "s=abc&url=https%3A%2F%2Fe.com%2Fv").unwrap();
        assert!(matches!(
            source,
            StreamSource::Ciphered { ref signature_param, field: CipherField::Cipher, .. } if signature_param == "signature"
        ));
        assert!(matches!(
            parse_cipher(CipherField::Cipher, "url=https%3A%2F%2Fe.com%2Fv"),
            Err(CipherError::MissingToken("cipher"))
        ));
    }

    #[test]
    fn test_unknown_major_type_and_missing_data() {
        let value = response(json!([
            {"itag": 1, "mimeType": "text/vtt", "url": "https://e.com/t"},
            {"itag": 2, "mimeType": "video/mp4"}
        ]));
        assert!(FormatCatalog::from_player_response(&value).unwrap().is_empty());
        assert!(matches!(
            FormatCatalog::from_player_response(&json!({"videoDetails": {}})),
            Err(LocatorError::StreamingDataMissing)
        ));
    }

    #[test]
    fn test_parse_mime() {
        assert_eq!(
            parse_mime("video/mp4; codecs=\"avc1.640028\""),
            ("video/mp4".to_string(), "avc1.640028".to_string())
        );
        assert_eq!(parse_mime("audio/webm"), ("audio/webm".to_string(), String::new()));
    }
}
