// streampick: probe a media URL, resolve the selectable quality/format
// options, and fetch the picked one through yt-dlp and ffmpeg.

pub mod downloader;

pub use downloader::{
    resolve, DownloadError, DownloadOption, DownloadOutcome, MediaInfo, OutputKind, Stream,
};
