// PageFetcher - retrieves the watch page, its player response and the player script

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::config::NetworkConfig;
use super::errors::{FetchError, LocatorError};
use super::models::{PlayerScriptRef, VideoDetails};
use super::utils;

/// Validated 11-character media identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaId(String);

impl MediaId {
    /// Accepts a bare id or a watch, short-link, shorts, embed or live URL
    pub fn parse(input: &str) -> Result<Self, FetchError> {
        let input = input.trim();
        if Self::is_valid_id(input) {
            return Ok(Self(input.to_string()));
        }

        let with_scheme = if input.contains("://") {
            input.to_string()
        } else {
            format!("https://{}", input)
        };
        let url = Url::parse(&with_scheme).map_err(|_| FetchError::InvalidUrl(input.to_string()))?;
        let host = url.host_str().unwrap_or_default();

        let candidate = if host.ends_with("youtu.be") {
            url.path_segments().and_then(|mut s| s.next()).map(str::to_string)
        } else if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "v") {
            Some(v.into_owned())
        } else {
            let segments: Vec<&str> = url.path_segments().map(|s| s.collect()).unwrap_or_default();
            match segments.as_slice() {
                ["shorts" | "embed" | "live", id, ..] => Some(id.to_string()),
                _ => None,
            }
        };

        match candidate {
            Some(id) if Self::is_valid_id(&id) => Ok(Self(id)),
            None if url.query_pairs().any(|(k, _)| k == "list") => Err(FetchError::InvalidUrl(
                format!("{} (playlist URLs are not supported)", input),
            )),
            _ => Err(FetchError::InvalidUrl(input.to_string())),
        }
    }

    fn is_valid_id(s: &str) -> bool {
        s.len() == 11
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Fetched watch page with its embedded player response
#[derive(Debug, Clone)]
pub struct WatchPage {
    pub html: String,
    pub player_response: Value,
}

impl WatchPage {
    pub fn details(&self) -> VideoDetails {
        let details = &self.player_response["videoDetails"];
        VideoDetails {
            id: details["videoId"].as_str().unwrap_or_default().to_string(),
            title: details["title"].as_str().unwrap_or("video").to_string(),
            author: details["author"].as_str().unwrap_or("Unknown_Uploader").to_string(),
            length_seconds: details["lengthSeconds"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .or_else(|| details["lengthSeconds"].as_u64())
                .unwrap_or(0),
        }
    }
}

/// Extract the JSON object assigned to `ytInitialPlayerResponse`
pub fn extract_player_response(html: &str) -> Result<Value, LocatorError> {
    lazy_static! {
        static ref ASSIGN_RE: Regex = Regex::new(r"ytInitialPlayerResponse\s*=\s*").unwrap();
    }

    let mut last_error = LocatorError::PlayerResponseMissing;
    for m in ASSIGN_RE.find_iter(html) {
        let rest = &html[m.end()..];
        // Streaming reader stops at the end of the first value, so trailing
        // script text and braces inside strings are not an issue.
        match serde_json::Deserializer::from_str(rest).into_iter::<Value>().next() {
            Some(Ok(value)) if value.is_object() => return Ok(value),
            Some(Ok(_)) => continue,
            Some(Err(e)) => last_error = LocatorError::MalformedPlayerResponse(e),
            None => {}
        }
    }
    Err(last_error)
}

/// Fetches pages and scripts with browser-like headers and immediate retries
pub struct PageFetcher {
    client: reqwest::Client,
    network: NetworkConfig,
}

impl PageFetcher {
    pub fn new(network: &NetworkConfig) -> Result<Self, FetchError> {
        let client = utils::build_client(network, network.accept_invalid_certs, network.timeout)
            .map_err(FetchError::Client)?;
        Ok(Self {
            client,
            network: network.clone(),
        })
    }

    /// Watch page URL for the id on the configured origin
    pub fn watch_url(&self, id: &MediaId) -> String {
        format!("{}/watch?v={}", self.network.origin_root(), id.as_str())
    }

    /// Fetch the watch page and pull out its player response
    pub async fn fetch_page(&self, id: &MediaId) -> Result<WatchPage, super::DownloadError> {
        let url = self.watch_url(id);
        info!(url = %url, "fetching watch page");
        let html = self.fetch_text(&url).await?;
        let player_response = extract_player_response(&html)?;
        Ok(WatchPage {
            html,
            player_response,
        })
    }

    /// Fetch the player script text
    pub async fn fetch_script(&self, script: &PlayerScriptRef) -> Result<String, FetchError> {
        info!(url = %script.url, "fetching player script");
        self.fetch_text(script.url.as_str()).await
    }

    /// GET with a bounded number of immediate retries
    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let attempts = self.network.page_retries + 1;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.fetch_once(url).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    warn!(url = %url, attempt, max_attempts = attempts, error = %e, "page request failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::InvalidUrl(url.to_string())))
    }

    async fn fetch_once(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let text = response.text().await.map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })?;
        debug!(url = %url, bytes = text.len(), "page request succeeded");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{headers, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn network_for(server: &MockServer, retries: u32) -> NetworkConfig {
        NetworkConfig {
            origin: server.uri(),
            page_retries: retries,
            timeout: Some(5),
            ..NetworkConfig::default()
        }
    }

    #[test]
    fn test_media_id_forms() {
        let expected = MediaId("dQw4w9WgXcQ".to_string());
        for input in [
            "dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "www.youtube.com/watch?v=dQw4w9WgXcQ&t=42",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL123",
        ] {
            assert_eq!(MediaId::parse(input).unwrap(), expected, "input: {}", input);
        }
    }

    #[test]
    fn test_media_id_rejects_playlist_and_garbage() {
        assert!(matches!(
            MediaId::parse("https://www.youtube.com/playlist?list=PL123"),
            Err(FetchError::InvalidUrl(msg)) if msg.contains("playlist")
        ));
        assert!(MediaId::parse("https://www.youtube.com/watch?v=short").is_err());
        assert!(MediaId::parse("").is_err());
    }

    #[test]
    fn test_extract_player_response_with_trailing_script() {
        let html = r#"<script>var ytInitialPlayerResponse = {"videoDetails":{"title":"a};b","lengthSeconds":"61"},"streamingData":{}};var meta = {};</script>"#;
        let value = extract_player_response(html).unwrap();
        assert_eq!(value["videoDetails"]["title"], "a};b");
    }

    #[test]
    fn test_extract_player_response_missing() {
        assert!(matches!(
            extract_player_response("<html></html>"),
            Err(LocatorError::PlayerResponseMissing)
        ));
        assert!(matches!(
            extract_player_response("ytInitialPlayerResponse = {broken"),
            Err(LocatorError::MalformedPlayerResponse(_))
        ));
    }

    #[test]
    fn test_details_from_player_response() {
        let page = WatchPage {
            html: String::new(),
            player_response: serde_json::json!({
                "videoDetails": {"videoId": "dQw4w9WgXcQ", "title": "Song", "author": "Band", "lengthSeconds": "212"}
            }),
        };
        let details = page.details();
        assert_eq!(details.title, "Song");
        assert_eq!(details.author, "Band");
        assert_eq!(details.length_seconds, 212);
    }

    #[tokio::test]
    async fn test_fetch_page_sends_browser_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/watch"))
            .and(query_param("v", "dQw4w9WgXcQ"))
            .and(headers("accept-language", vec!["en-US", "en;q=0.9"]))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<script>var ytInitialPlayerResponse = {"videoDetails":{"title":"T"}};</script>"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = PageFetcher::new(&network_for(&server, 0)).unwrap();
        let id = MediaId::parse("dQw4w9WgXcQ").unwrap();
        let page = fetcher.fetch_page(&id).await.unwrap();
        assert_eq!(page.details().title, "T");
    }

    #[tokio::test]
    async fn test_fetch_text_retries_immediately_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let fetcher = PageFetcher::new(&network_for(&server, 2)).unwrap();
        let err = fetcher
            .fetch_text(&format!("{}/broken", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
    }
}
