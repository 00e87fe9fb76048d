// Orchestrator - page to files pipeline with fallback logic

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use url::Url;

use super::cipher::{CipherAnalyzer, CipherCache, OperationSequence, SignatureTransformer};
use super::config::{Config, PostProcess};
use super::encoder::{final_path, ConversionInvoker};
use super::errors::{CipherError, DownloadError, EncodingError, TransferError};
use super::format_catalog::FormatCatalog;
use super::format_selector::StreamSelector;
use super::locator::ScriptLocator;
use super::models::{
    FormatDescriptor, MediaKind, PlayerScriptRef, StreamSelection, StreamSource, VideoDetails,
};
use super::page::{MediaId, PageFetcher};
use super::segmented::SegmentedDownloader;
use super::traits::{MediaEncoder, ProgressEmitter};
use super::utils::sanitize_filename;

/// Everything learned from one watch page
#[derive(Debug, Clone)]
pub struct ResolvedMedia {
    pub details: VideoDetails,
    pub script: PlayerScriptRef,
    pub catalog: FormatCatalog,
    /// Present when at least one representation is ciphered
    pub operations: Option<Arc<OperationSequence>>,
}

impl ResolvedMedia {
    /// Fetchable URL of a representation, deciphering when required
    pub fn resolve_url(&self, format: &FormatDescriptor) -> Result<Url, CipherError> {
        resolve_url(self.operations.as_deref(), format)
    }
}

/// Append the deciphered token to the base URL under its parameter name
pub fn resolve_url(
    operations: Option<&OperationSequence>,
    format: &FormatDescriptor,
) -> Result<Url, CipherError> {
    match &format.source {
        StreamSource::Direct(url) => Ok(url.clone()),
        StreamSource::Ciphered {
            token,
            signature_param,
            base_url,
            ..
        } => {
            let operations = operations.ok_or(CipherError::TransformNotFound)?;
            let signature = SignatureTransformer::apply(operations, token)?;
            let mut url = Url::parse(base_url)
                .map_err(|_| CipherError::InvalidBaseUrl(base_url.clone()))?;
            url.query_pairs_mut().append_pair(signature_param, &signature);
            Ok(url)
        }
    }
}

/// Files produced by one download
#[derive(Debug)]
pub struct DownloadOutcome {
    /// Representations actually transferred (after any fallback)
    pub selection: StreamSelection,
    pub video_path: PathBuf,
    pub audio_path: PathBuf,
    /// Converted or merged file, when post-processing succeeded
    pub final_path: Option<PathBuf>,
    /// Post-processing failure; the raw files above are still valid
    pub encoding_error: Option<EncodingError>,
}

pub struct Downloader {
    config: Config,
    fetcher: PageFetcher,
    locator: ScriptLocator,
    analyzer: CipherAnalyzer,
    cache: Arc<CipherCache>,
    transfer: SegmentedDownloader,
    encoder: Option<Arc<dyn MediaEncoder>>,
    emitter: Arc<dyn ProgressEmitter>,
}

impl Downloader {
    /// Build the pipeline. A missing ffmpeg is not fatal here; it is
    /// reported when post-processing is attempted.
    pub fn new(
        config: Config,
        cache: Arc<CipherCache>,
        emitter: Arc<dyn ProgressEmitter>,
    ) -> Result<Self, DownloadError> {
        let encoder: Option<Arc<dyn MediaEncoder>> = match config.encoder.mode {
            PostProcess::None => None,
            _ => match ConversionInvoker::new(&config.encoder) {
                Ok(invoker) => Some(Arc::new(invoker)),
                Err(e) => {
                    warn!(error = %e, "encoder unavailable, post-processing will fail");
                    None
                }
            },
        };

        Ok(Self {
            fetcher: PageFetcher::new(&config.network)?,
            locator: ScriptLocator::new(&config),
            analyzer: CipherAnalyzer::new(),
            transfer: SegmentedDownloader::new(&config.network, &config.transfer, emitter.clone())?,
            config,
            cache,
            encoder,
            emitter,
        })
    }

    /// Replace the discovered encoder
    pub fn with_encoder(mut self, encoder: Arc<dyn MediaEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fetch the page, locate the script, derive the cipher if needed and
    /// parse the catalog
    pub async fn resolve(&self, input: &str) -> Result<ResolvedMedia, DownloadError> {
        let id = MediaId::parse(input)?;
        self.emitter.status(&format!("Fetching page for {}", id.as_str()));

        let page = self.fetcher.fetch_page(&id).await?;
        let script = self.locator.locate(&page.html)?;
        let catalog = FormatCatalog::from_player_response(&page.player_response)?;
        let details = page.details();

        let operations = if catalog.all().iter().any(|f| f.source.requires_decipher()) {
            let key = script.cache_key();
            let sequence = self
                .cache
                .get_or_derive(&key, || async {
                    let text = self.fetcher.fetch_script(&script).await?;
                    self.analyzer.derive(&text).map_err(DownloadError::from)
                })
                .await?;
            info!(version = %script.client_version, operations = %sequence, "cipher ready");
            Some(sequence)
        } else {
            None
        };

        info!(
            title = %details.title,
            author = %details.author,
            videos = catalog.videos().len(),
            audios = catalog.audios().len(),
            "resolved media"
        );

        Ok(ResolvedMedia {
            details,
            script,
            catalog,
            operations,
        })
    }

    /// Transfer both streams of the selection concurrently, then post-process
    pub async fn download(
        &self,
        media: &ResolvedMedia,
        selector: &StreamSelector,
        selection: StreamSelection,
    ) -> Result<DownloadOutcome, DownloadError> {
        let folder = self
            .config
            .output_dir
            .join(sanitize_filename(&media.details.author));
        let title = sanitize_filename(&media.details.title);

        self.emitter.status(&format!(
            "Downloading video {} and audio {}",
            selection.video().id,
            selection.audio().id
        ));

        let (video, audio) = tokio::join!(
            self.fetch_with_fallback(media, selector, selection.video().clone(), &folder, &title),
            self.fetch_with_fallback(media, selector, selection.audio().clone(), &folder, &title),
        );
        let (video, video_path) = video?;
        let (audio, audio_path) = audio?;
        let selection = StreamSelection::new(video, audio)?;

        let (final_path, encoding_error) =
            match self.post_process(&selection, &video_path, &audio_path, &folder, &title).await {
                Ok(path) => (path, None),
                Err(e) => {
                    error!(error = %e, "post-processing failed, raw files kept");
                    self.emitter.status(&format!("Encoding failed: {}", e));
                    (None, Some(e))
                }
            };

        Ok(DownloadOutcome {
            selection,
            video_path,
            audio_path,
            final_path,
            encoding_error,
        })
    }

    /// Raw destination for a representation, keyed by its id so a partial
    /// file is only ever resumed by the representation that wrote it
    pub fn raw_path(folder: &Path, title: &str, format: &FormatDescriptor) -> PathBuf {
        let role = match format.kind {
            MediaKind::Video => "video",
            MediaKind::Audio => "raw_audio",
        };
        folder.join(format!("{}_{}_{}.{}", title, role, format.id, format.extension()))
    }

    /// Run the transfer, dropping to the next lower representation of the
    /// same kind when retries are exhausted
    async fn fetch_with_fallback(
        &self,
        media: &ResolvedMedia,
        selector: &StreamSelector,
        first: FormatDescriptor,
        folder: &Path,
        title: &str,
    ) -> Result<(FormatDescriptor, PathBuf), DownloadError> {
        let mut current = first;

        loop {
            let url = media.resolve_url(&current)?;
            let path = Self::raw_path(folder, title, &current);
            let mut task = self.transfer.new_task(url, &path, current.content_length);

            match self.transfer.run(&mut task).await {
                Ok(()) => return Ok((current, path)),
                Err(e @ TransferError::Exhausted { .. }) if self.config.allow_fallback => {
                    let lower = match current.kind {
                        MediaKind::Video => selector.next_lower_video(&current),
                        MediaKind::Audio => selector.next_lower_audio(&current),
                    };
                    match lower {
                        Some(lower) => {
                            warn!(
                                kind = current.kind.as_str(),
                                failed = %current.id,
                                next = %lower.id,
                                error = %e,
                                "falling back to lower representation"
                            );
                            self.emitter.status(&format!(
                                "{} {} failed, trying {}",
                                current.kind.as_str(),
                                current.id,
                                lower.id
                            ));
                            current = lower.clone();
                        }
                        None => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn post_process(
        &self,
        selection: &StreamSelection,
        video_path: &Path,
        audio_path: &Path,
        folder: &Path,
        title: &str,
    ) -> Result<Option<PathBuf>, EncodingError> {
        let mode = self.config.encoder.mode;
        if mode == PostProcess::None {
            return Ok(None);
        }

        let encoder = self
            .encoder
            .as_ref()
            .ok_or_else(|| EncodingError::NotFound("ffmpeg".to_string()))?;

        let output = match mode {
            PostProcess::AudioMp3 => {
                let output = final_path(folder, title, "audio", "mp3");
                self.emitter.status(&format!("Converting audio with {}", encoder.name()));
                encoder.convert_audio(audio_path, &output).await?;
                output
            }
            PostProcess::MergeAac => {
                let video = selection.video();
                let quality = video
                    .quality_label
                    .clone()
                    .or_else(|| video.resolution())
                    .unwrap_or_else(|| video.id.clone());
                let output = final_path(folder, title, &sanitize_filename(&quality), "mp4");
                self.emitter.status(&format!("Merging streams with {}", encoder.name()));
                encoder.merge(video_path, audio_path, &output).await?;
                output
            }
            PostProcess::None => return Ok(None),
        };

        info!(path = %output.display(), "post-processing complete");
        Ok(Some(output))
    }
}
