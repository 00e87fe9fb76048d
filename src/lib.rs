//! Direct stream downloader: derives the player's signature cipher from its
//! script, picks a video and an audio representation, transfers both with
//! resumable retrying requests and hands them to ffmpeg.

pub mod downloader;

pub use downloader::{Config, DownloadError, Downloader, StreamSelector};
