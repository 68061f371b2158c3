// Downloader module: the format resolver core plus the probe and fetch
// collaborators that wrap the external tools

pub mod errors;
pub mod fetcher;
pub mod models;
pub mod prober;
pub mod resolver;
pub mod tools;
pub mod utils;

pub use errors::DownloadError;
pub use fetcher::{FetchConfig, FetchRequest, Fetcher, NullSink, ProgressSink, YtDlpFetcher};
pub use models::{
    DownloadOption, DownloadOutcome, DownloadProgress, MediaInfo, OutputKind, SortKey, Stream,
    StreamClass,
};
pub use prober::{ProbeCache, ProbeConfig, StreamProber, YtDlpProber};
pub use resolver::resolve;
pub use tools::{ToolInfo, ToolKind, ToolManager};
pub use utils::Workspace;
