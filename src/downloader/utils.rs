// Helper functions shared by the pipeline stages

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, ORIGIN, REFERER, USER_AGENT};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;
use url::Url;

use super::config::NetworkConfig;
use super::errors::EncodingError;

/// Build an HTTP client honouring the proxy and timeout settings.
///
/// `relaxed_tls` disables certificate validation and must only be set for
/// page and script requests.
pub fn build_client(
    network: &NetworkConfig,
    relaxed_tls: bool,
    timeout_secs: Option<u32>,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .default_headers(browser_headers(network))
        .danger_accept_invalid_certs(relaxed_tls);

    if let Some(secs) = timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs as u64));
    }

    if let Some(proxy_url) = network.proxy.as_deref() {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
    }

    builder.build()
}

/// Browser-like identification headers. Without them the origin serves a
/// page that lacks the player response.
pub fn browser_headers(network: &NetworkConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let origin = network.origin_root().to_string();
    let referer = network.referer();

    let pairs = [
        (USER_AGENT, network.user_agent.as_str()),
        (ACCEPT_LANGUAGE, network.accept_language.as_str()),
        (REFERER, referer.as_str()),
        (ORIGIN, origin.as_str()),
    ];

    for (name, value) in pairs {
        match HeaderValue::from_str(value) {
            Ok(v) => {
                headers.insert(name, v);
            }
            Err(_) => tracing::warn!(header = %name, "skipping invalid header value"),
        }
    }

    headers
}

/// Authority of a URL as sent in the `Host` header ("host" or "host:port")
pub fn host_header(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Replace characters that are unsafe in file names with underscores
pub fn sanitize_filename(name: &str) -> String {
    lazy_static! {
        static ref UNSAFE_RE: Regex = Regex::new(r"[^a-zA-Z0-9_\-\.]").unwrap();
    }

    let trimmed = name.trim().replace(' ', "_");
    let sanitized = UNSAFE_RE.replace_all(&trimmed, "_").to_string();
    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        "untitled".to_string()
    } else {
        sanitized
    }
}

/// Run command with timeout, capturing stdout and stderr
pub async fn run_output_with_timeout(
    program: &str,
    args: &[String],
    timeout_secs: u64,
) -> Result<std::process::Output, EncodingError> {
    let mut child = TokioCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| EncodingError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });

    match timeout(Duration::from_secs(timeout_secs), child.wait()).await {
        Ok(status_res) => {
            let status = status_res.map_err(|source| EncodingError::Spawn {
                program: program.to_string(),
                source,
            })?;
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            Ok(std::process::Output {
                status,
                stdout,
                stderr,
            })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(EncodingError::Timeout(timeout_secs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("My Video: Part 1/2"), "My_Video__Part_1_2");
        assert_eq!(sanitize_filename("clip-01.final"), "clip-01.final");
        assert_eq!(sanitize_filename("  "), "untitled");
        assert_eq!(sanitize_filename(".."), "untitled");
    }

    #[test]
    fn test_host_header_includes_port() {
        let url = Url::parse("https://rr3---sn-abc.googlevideo.com/videoplayback?x=1").unwrap();
        assert_eq!(host_header(&url).as_deref(), Some("rr3---sn-abc.googlevideo.com"));

        let url = Url::parse("http://127.0.0.1:8443/videoplayback").unwrap();
        assert_eq!(host_header(&url).as_deref(), Some("127.0.0.1:8443"));
    }

    #[test]
    fn test_browser_headers_present() {
        let headers = browser_headers(&NetworkConfig::default());
        assert!(headers.contains_key(USER_AGENT));
        assert_eq!(headers[ORIGIN], "https://www.youtube.com");
        assert_eq!(headers[REFERER], "https://www.youtube.com/");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let result = run_output_with_timeout("definitely-not-a-real-binary-4f2a", &[], 5).await;
        assert!(matches!(result, Err(EncodingError::Spawn { .. })));
    }
}
