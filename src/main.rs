use clap::{Parser, ValueEnum};
use kdam::{tqdm, Bar, BarExt};
use requestty::Question;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::{error, metadata::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

use ytdirect::downloader::encoder::detect_ffmpeg;
use ytdirect::downloader::{
    CipherCache, Config, ConversionInvoker, DownloadError, DownloadTask, Downloader, FormatOption,
    PostProcess, ProgressEmitter, SelectionError, SelectionPolicy, StreamSelection, StreamSelector, TaskState,
};

/// Download a video and its audio track without external extractors
#[derive(Parser)]
#[command(name = "ytdirect", version, about)]
struct Cli {
    /// Watch URL or bare video ID
    #[arg(required_unless_present = "probe_encoder")]
    url: Option<String>,

    /// Index of the video representation (as listed)
    #[arg(long)]
    video: Option<usize>,

    /// Index of the audio representation (as listed)
    #[arg(long)]
    audio: Option<usize>,

    /// List representations and exit
    #[arg(long)]
    list: bool,

    /// Pick representations automatically
    #[arg(long)]
    best: bool,

    /// Height cap for automatic selection
    #[arg(long)]
    max_height: Option<u32>,

    /// Output directory (default: the user's download folder)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Post-processing after download
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Print the ffmpeg version and the preferred H.264 encoder, then exit
    #[arg(long)]
    probe_encoder: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Mp3,
    Merge,
    None,
}

impl From<ModeArg> for PostProcess {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Mp3 => PostProcess::AudioMp3,
            ModeArg::Merge => PostProcess::MergeAac,
            ModeArg::None => PostProcess::None,
        }
    }
}

/// One progress bar per task, keyed by destination
#[derive(Default)]
struct ConsoleEmitter {
    bars: Mutex<HashMap<PathBuf, Bar>>,
}

impl ConsoleEmitter {
    fn name(task: &DownloadTask) -> String {
        task.destination
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    fn with_bar(&self, task: &DownloadTask, update: impl FnOnce(&mut Bar)) {
        let Ok(mut bars) = self.bars.lock() else {
            return;
        };
        let position = bars.len() as u16;
        let bar = bars.entry(task.destination.clone()).or_insert_with(|| {
            tqdm!(
                total = task.total_bytes.unwrap_or(0) as usize,
                desc = Self::name(task),
                position = position,
                unit = "B".to_owned(),
                unit_scale = true,
                unit_divisor = 1024,
                dynamic_ncols = true
            )
        });
        if bar.total == 0 {
            if let Some(total) = task.total_bytes {
                bar.total = total as usize;
            }
        }
        update(bar);
    }
}

impl ProgressEmitter for ConsoleEmitter {
    fn on_state(&self, task: &DownloadTask) {
        match task.state() {
            TaskState::Retrying => self.with_bar(task, |bar| {
                bar.set_description(format!(
                    "{} (retry {}/{})",
                    Self::name(task),
                    task.attempt + 1,
                    task.max_attempts
                ));
            }),
            TaskState::Complete | TaskState::Failed => self.with_bar(task, |bar| {
                let _ = bar.update_to(task.downloaded_bytes as usize);
                let _ = bar.refresh();
            }),
            _ => {}
        }
    }

    fn on_progress(&self, task: &DownloadTask) {
        self.with_bar(task, |bar| {
            let _ = bar.update_to(task.downloaded_bytes as usize);
        });
    }

    fn status(&self, message: &str) {
        eprintln!("{}", message);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn print_options(title: &str, options: &[FormatOption]) {
    println!("{}:", title);
    for option in options {
        println!("  [{}] {}", option.index, option_line(option));
    }
}

fn option_line(option: &FormatOption) -> String {
    format!(
        "{} {}{}{}",
        option.label,
        option.codec_info,
        option
            .estimated_size
            .as_deref()
            .map(|s| format!(" ~{}", s))
            .unwrap_or_default(),
        if option.is_recommended { " (recommended)" } else { "" }
    )
}

/// Ask for one representation; `None` when the prompt is aborted
fn prompt_select(name: &str, options: &[FormatOption]) -> Option<usize> {
    let default = options.iter().position(|o| o.is_recommended).unwrap_or(0);
    let question = Question::select(name)
        .message(format!("Select {} stream", name))
        .should_loop(false)
        .choices(options.iter().map(option_line))
        .default(default)
        .build();

    match requestty::prompt_one(question) {
        Ok(answer) => answer.as_list_item().map(|item| item.index),
        Err(e) => {
            warn!(error = %e, "selection prompt aborted");
            None
        }
    }
}

/// Resolve the user's choice, prompting for whatever the flags leave open
fn choose(cli: &Cli, selector: &StreamSelector) -> Result<Option<StreamSelection>, DownloadError> {
    if cli.best {
        let policy = SelectionPolicy {
            max_height: cli.max_height,
            ..SelectionPolicy::default()
        };
        return Ok(Some(selector.select_with_policy(&policy)?));
    }
    if selector.videos().is_empty() {
        return Err(SelectionError::NoVideo.into());
    }
    if selector.audios().is_empty() {
        return Err(SelectionError::NoAudio.into());
    }

    let video_options = selector.video_options();
    let audio_options = selector.audio_options();
    let (mut video, mut audio) = (cli.video, cli.audio);
    loop {
        let Some(v) = video.or_else(|| prompt_select("video", &video_options)) else {
            return Ok(None);
        };
        let Some(a) = audio.or_else(|| prompt_select("audio", &audio_options)) else {
            return Ok(None);
        };

        match selector.select(v, a) {
            Ok(selection) => return Ok(Some(selection)),
            Err(e) => {
                let err = DownloadError::from(e);
                if !err.is_recoverable() {
                    return Err(err);
                }
                warn!(error = %err, "invalid choice");
                match err {
                    DownloadError::Selection(SelectionError::VideoIndex { .. }) => video = None,
                    _ => audio = None,
                }
            }
        }
    }
}

async fn probe_encoder(config: &Config) -> Result<(), DownloadError> {
    let tool = detect_ffmpeg(config.encoder.ffmpeg_path.as_deref());
    let invoker = ConversionInvoker::new(&config.encoder)?;
    println!(
        "ffmpeg: {} ({})",
        tool.version.as_deref().unwrap_or("unknown version"),
        invoker.program()
    );
    println!("H.264 encoder: {}", invoker.detect_video_encoder().await);
    Ok(())
}

async fn run(cli: Cli) -> Result<(), DownloadError> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(output) = &cli.output {
        config.output_dir = output.clone();
    }
    if let Some(mode) = cli.mode {
        config.encoder.mode = mode.into();
    }

    if cli.probe_encoder {
        return probe_encoder(&config).await;
    }
    let Some(url) = cli.url.as_deref() else {
        return Ok(());
    };

    let downloader = Downloader::new(config, Arc::new(CipherCache::new()), Arc::new(ConsoleEmitter::default()))?;
    let media = downloader.resolve(url).await?;
    println!("{} - {}", media.details.author, media.details.title);

    let selector = StreamSelector::new(&media.catalog);
    print_options("Video", &selector.video_options());
    print_options("Audio", &selector.audio_options());
    if cli.list {
        return Ok(());
    }

    let Some(selection) = choose(&cli, &selector)? else {
        return Ok(());
    };

    let outcome = downloader.download(&media, &selector, selection).await?;
    println!("Video: {}", outcome.video_path.display());
    println!("Audio: {}", outcome.audio_path.display());
    if let Some(path) = &outcome.final_path {
        println!("Output: {}", path.display());
    }
    if let Some(e) = &outcome.encoding_error {
        println!("Post-processing failed ({}); raw files are kept", e);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(stage = e.stage(), "{}", e);
            ExitCode::FAILURE
        }
    }
}
