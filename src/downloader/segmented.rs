// SegmentedDownloader - chunked, resumable, retrying transfer of one representation
//
// State machine per task:
//   Idle -> Requesting -> Streaming -> Complete
//                     \-> Retrying -> Requesting ... -> Failed
//
// Partial files are never deleted. A later run resumes them with a Range
// request, or restarts from zero when the server ignores the range.

use reqwest::header::{CONTENT_RANGE, HOST, RANGE};
use reqwest::StatusCode;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use super::config::{NetworkConfig, TransferConfig};
use super::errors::{FetchError, TransferError};
use super::models::{DownloadTask, TaskState};
use super::traits::ProgressEmitter;
use super::utils;

pub struct SegmentedDownloader {
    client: reqwest::Client,
    config: TransferConfig,
    emitter: Arc<dyn ProgressEmitter>,
}

impl SegmentedDownloader {
    /// Media requests always validate certificates
    pub fn new(
        network: &NetworkConfig,
        config: &TransferConfig,
        emitter: Arc<dyn ProgressEmitter>,
    ) -> Result<Self, FetchError> {
        let client = utils::build_client(network, false, config.timeout).map_err(FetchError::Client)?;
        Ok(Self {
            client,
            config: config.clone(),
            emitter,
        })
    }

    /// Fresh task bounded by the configured attempt count
    pub fn new_task(
        &self,
        source_url: Url,
        destination: impl Into<PathBuf>,
        total_bytes: Option<u64>,
    ) -> DownloadTask {
        DownloadTask::new(source_url, destination, total_bytes, self.config.max_attempts)
    }

    /// Drive the task to `Complete` or `Failed`
    pub async fn run(&self, task: &mut DownloadTask) -> Result<(), TransferError> {
        self.run_with_cancel(task, &CancellationToken::new()).await
    }

    /// Like `run`, but stops between chunks once `cancel` fires.
    ///
    /// A cancelled task goes back to `Idle` with its partial file in place.
    pub async fn run_with_cancel(
        &self,
        task: &mut DownloadTask,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        match task.state {
            TaskState::Complete => {
                debug!(path = %task.destination.display(), "task already complete");
                return Ok(());
            }
            TaskState::Failed => task.attempt = 0,
            _ => {}
        }

        loop {
            if cancel.is_cancelled() {
                return self.cancelled(task);
            }

            self.transition(task, TaskState::Requesting);
            let outcome = self.attempt(task, cancel).await;

            let err = match outcome {
                Ok(()) => {
                    self.transition(task, TaskState::Complete);
                    info!(
                        path = %task.destination.display(),
                        bytes = task.downloaded_bytes,
                        "transfer complete"
                    );
                    return Ok(());
                }
                Err(TransferError::Cancelled) => return self.cancelled(task),
                Err(e) => e,
            };

            self.transition(task, TaskState::Retrying);
            task.attempt += 1;

            if task.attempt >= task.max_attempts {
                self.transition(task, TaskState::Failed);
                error!(
                    url = %task.source_url,
                    attempts = task.attempt,
                    error = %err,
                    "transfer failed"
                );
                return Err(TransferError::Exhausted {
                    attempts: task.attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.config.backoff_delay(task.attempt);
            warn!(
                attempt = task.attempt,
                max_attempts = task.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transfer attempt failed, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return self.cancelled(task),
            }
        }
    }

    fn transition(&self, task: &mut DownloadTask, state: TaskState) {
        debug!(from = ?task.state, to = ?state, path = %task.destination.display(), "task state");
        task.state = state;
        self.emitter.on_state(task);
    }

    fn cancelled(&self, task: &mut DownloadTask) -> Result<(), TransferError> {
        info!(
            path = %task.destination.display(),
            bytes = task.downloaded_bytes,
            "transfer cancelled, partial file kept"
        );
        self.transition(task, TaskState::Idle);
        Err(TransferError::Cancelled)
    }

    /// One request plus streaming of its body
    async fn attempt(
        &self,
        task: &mut DownloadTask,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let path = task.destination.clone();
        let io_err = |source: std::io::Error| TransferError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let existing = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(io_err(e)),
        };
        task.downloaded_bytes = existing;

        if matches!(task.total_bytes, Some(total) if total > 0 && existing >= total) {
            debug!(path = %path.display(), bytes = existing, "destination already holds every byte");
            return Ok(());
        }

        let host = utils::host_header(&task.source_url)
            .ok_or_else(|| TransferError::NoHost(task.source_url.to_string()))?;

        let mut existing = existing;
        let (mut response, append, range_total) = loop {
            let mut request = self.client.get(task.source_url.clone()).header(HOST, host.as_str());
            if existing > 0 {
                request = request.header(RANGE, format!("bytes={}-", existing));
            }

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                response = request.send() => response?,
            };

            let status = response.status();
            let range_total = response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(content_range_total);

            match status {
                StatusCode::PARTIAL_CONTENT if existing > 0 => break (response, true, range_total),
                StatusCode::RANGE_NOT_SATISFIABLE if existing > 0 && range_total == Some(existing) => {
                    task.total_bytes.get_or_insert(existing);
                    return Ok(());
                }
                StatusCode::RANGE_NOT_SATISFIABLE if existing > 0 => {
                    // Partial file does not belong to this resource
                    warn!(
                        path = %path.display(),
                        bytes = existing,
                        total = ?range_total,
                        "partial file exceeds source, restarting from zero"
                    );
                    tokio::fs::File::create(&path).await.map_err(io_err)?;
                    existing = 0;
                    task.downloaded_bytes = 0;
                }
                s if s.is_success() => {
                    if existing > 0 {
                        debug!(path = %path.display(), "server ignored range, restarting from zero");
                    }
                    task.downloaded_bytes = 0;
                    break (response, false, range_total);
                }
                s => return Err(TransferError::Status(s.as_u16())),
            }
        };

        if task.total_bytes.is_none() {
            task.total_bytes = if append {
                range_total
            } else {
                response.content_length()
            };
        }

        self.transition(task, TaskState::Streaming);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .await
            .map_err(io_err)?;
        let mut writer = BufWriter::with_capacity(self.config.chunk_size, file);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                chunk = response.chunk() => Some(chunk),
            };

            let chunk = match next {
                None => {
                    writer.flush().await.map_err(io_err)?;
                    return Err(TransferError::Cancelled);
                }
                Some(Ok(Some(chunk))) => chunk,
                Some(Ok(None)) => break,
                Some(Err(e)) => {
                    // Keep what arrived so the retry can resume from it
                    writer.flush().await.map_err(io_err)?;
                    return Err(TransferError::Transport(e));
                }
            };

            writer.write_all(&chunk).await.map_err(io_err)?;
            task.downloaded_bytes += chunk.len() as u64;
            self.emitter.on_progress(task);
        }

        writer.flush().await.map_err(io_err)?;

        match task.total_bytes {
            Some(expected) if task.downloaded_bytes < expected => Err(TransferError::ShortRead {
                expected,
                received: task.downloaded_bytes,
            }),
            _ => Ok(()),
        }
    }
}

/// Total size from `bytes 0-99/1000` or `bytes */1000`
fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct Recorder {
        states: Mutex<Vec<TaskState>>,
    }

    impl ProgressEmitter for Recorder {
        fn on_state(&self, task: &DownloadTask) {
            self.states.lock().unwrap().push(task.state());
        }
    }

    fn fast_config(max_attempts: u32) -> TransferConfig {
        TransferConfig {
            max_attempts,
            backoff_unit_ms: 1,
            ..TransferConfig::default()
        }
    }

    fn downloader(config: TransferConfig) -> (SegmentedDownloader, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let downloader =
            SegmentedDownloader::new(&NetworkConfig::default(), &config, recorder.clone()).unwrap();
        (downloader, recorder)
    }

    fn media_url(server: &MockServer) -> Url {
        Url::parse(&format!("{}/videoplayback", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn test_permanent_failure_makes_exactly_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/videoplayback"))
            .respond_with(ResponseTemplate::new(403))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (downloader, recorder) = downloader(fast_config(3));
        let mut task = downloader.new_task(media_url(&server), dir.path().join("v.mp4"), None);

        let err = downloader.run(&mut task).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::Exhausted { attempts: 3, ref last } if matches!(**last, TransferError::Status(403))
        ));
        assert_eq!(task.state(), TaskState::Failed);
        assert_eq!(
            *recorder.states.lock().unwrap(),
            vec![
                TaskState::Requesting,
                TaskState::Retrying,
                TaskState::Requesting,
                TaskState::Retrying,
                TaskState::Requesting,
                TaskState::Retrying,
                TaskState::Failed,
            ]
        );
    }

    #[tokio::test]
    async fn test_short_read_retries_instead_of_completing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 600]))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (downloader, recorder) = downloader(fast_config(2));
        let mut task = downloader.new_task(media_url(&server), dir.path().join("a.webm"), Some(1000));

        let err = downloader.run(&mut task).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::Exhausted { ref last, .. }
                if matches!(**last, TransferError::ShortRead { expected: 1000, received: 600 })
        ));

        let states = recorder.states.lock().unwrap();
        assert_eq!(
            &states[..3],
            &[TaskState::Requesting, TaskState::Streaming, TaskState::Retrying]
        );
        assert!(!states.contains(&TaskState::Complete));
        // Partial data stays on disk
        assert_eq!(std::fs::metadata(&task.destination).unwrap().len(), 600);
    }

    #[tokio::test]
    async fn test_complete_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0123456789".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (downloader, _) = downloader(fast_config(3));
        let mut task = downloader.new_task(media_url(&server), dir.path().join("v.mp4"), None);

        downloader.run(&mut task).await.unwrap();
        assert!(task.is_complete());
        assert_eq!(task.total_bytes, Some(10));
        let before = std::fs::read(&task.destination).unwrap();

        downloader.run(&mut task).await.unwrap();
        assert_eq!(task.downloaded_bytes, 10);
        assert_eq!(std::fs::read(&task.destination).unwrap(), before);
    }

    #[tokio::test]
    async fn test_host_header_matches_url_authority() {
        let server = MockServer::start().await;
        let authority = format!("127.0.0.1:{}", server.address().port());
        Mock::given(method("GET"))
            .and(header("host", authority.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (downloader, _) = downloader(fast_config(1));
        let url = Url::parse(&format!("http://{}/videoplayback?sig=1", authority)).unwrap();
        let mut task = downloader.new_task(url, dir.path().join("h.bin"), None);
        downloader.run(&mut task).await.unwrap();
    }

    #[tokio::test]
    async fn test_resumes_with_range_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("range", "bytes=6-"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("content-range", "bytes 6-10/11")
                    .set_body_bytes(b"world".to_vec()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("resume.webm");
        std::fs::write(&dest, b"hello ").unwrap();

        let (downloader, _) = downloader(fast_config(1));
        let mut task = downloader.new_task(media_url(&server), &dest, None);
        downloader.run(&mut task).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"hello world");
        assert_eq!(task.total_bytes, Some(11));
        assert_eq!(task.downloaded_bytes, 11);
    }

    #[tokio::test]
    async fn test_ignored_range_restarts_from_zero() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fresh".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("stale.bin");
        std::fs::write(&dest, b"stale-prefix").unwrap();

        let (downloader, _) = downloader(fast_config(1));
        let mut task = downloader.new_task(media_url(&server), &dest, None);
        downloader.run(&mut task).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn test_cancel_returns_task_to_idle() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"slow".to_vec())
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (downloader, _) = downloader(fast_config(3));
        let mut task = downloader.new_task(media_url(&server), dir.path().join("c.bin"), None);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = downloader.run_with_cancel(&mut task, &cancel).await.unwrap_err();
        assert!(matches!(err, TransferError::Cancelled));
        assert_eq!(task.state(), TaskState::Idle);
        assert_eq!(task.attempt, 0);
    }

    #[tokio::test]
    async fn test_unsatisfiable_range_at_full_length_is_complete() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("range", "bytes=6-"))
            .respond_with(ResponseTemplate::new(416).insert_header("content-range", "bytes */6"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("done.m4a");
        std::fs::write(&dest, b"abcdef").unwrap();

        let (downloader, recorder) = downloader(fast_config(3));
        let mut task = downloader.new_task(media_url(&server), &dest, None);
        downloader.run(&mut task).await.unwrap();

        assert!(task.is_complete());
        assert_eq!(task.total_bytes, Some(6));
        assert_eq!(std::fs::read(&dest).unwrap(), b"abcdef");
        assert!(!recorder.states.lock().unwrap().contains(&TaskState::Retrying));
    }

    #[tokio::test]
    async fn test_oversized_partial_file_is_truncated_and_restarted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("range", "bytes=10-"))
            .respond_with(ResponseTemplate::new(416).insert_header("content-range", "bytes */5"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fresh".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("stale.webm");
        std::fs::write(&dest, b"stalestale").unwrap();

        let (downloader, recorder) = downloader(fast_config(1));
        let mut task = downloader.new_task(media_url(&server), &dest, None);
        downloader.run(&mut task).await.unwrap();

        assert!(task.is_complete());
        assert_eq!(std::fs::read(&dest).unwrap(), b"fresh");
        assert_eq!(task.downloaded_bytes, 5);
        assert!(!recorder.states.lock().unwrap().contains(&TaskState::Failed));
    }

    #[test]
    fn test_content_range_total() {
        assert_eq!(content_range_total("bytes 6-10/11"), Some(11));
        assert_eq!(content_range_total("bytes */4096"), Some(4096));
        assert_eq!(content_range_total("bytes 0-1/*"), None);
    }
}
