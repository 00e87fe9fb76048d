// Downloader module - page fetch, cipher derivation, stream selection,
// segmented transfer and encoder hand-off

pub mod cipher;
pub mod config;
pub mod encoder;
pub mod errors;
pub mod format_catalog;
pub mod format_selector;
pub mod locator;
pub mod models;
pub mod orchestrator;
pub mod page;
pub mod segmented;
pub mod traits;
pub mod utils;

pub use cipher::{CipherAnalyzer, CipherCache, Operation, OperationSequence, SignatureTransformer};
pub use config::{Config, EncoderConfig, NetworkConfig, PostProcess, TransferConfig};
pub use encoder::ConversionInvoker;
pub use errors::{
    CipherError, ConfigError, DownloadError, EncodingError, FetchError, LocatorError,
    SelectionError, TransferError,
};
pub use format_catalog::FormatCatalog;
pub use format_selector::{FormatOption, SelectionPolicy, StreamSelector};
pub use models::{
    ClientVersion, DownloadTask, FormatDescriptor, MediaKind, PlayerScriptRef, StreamSelection,
    StreamSource, TaskState, VideoDetails,
};
pub use orchestrator::{DownloadOutcome, Downloader, ResolvedMedia};
pub use page::MediaId;
pub use segmented::SegmentedDownloader;
pub use traits::{MediaEncoder, ProgressEmitter, SilentEmitter};
