// Error types for the probe and fetch collaborators
//
// The format resolver itself never fails; an empty option list is a normal
// outcome. Everything here describes subprocess and parsing failures.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    /// Network timeout while the extractor talked to the media host
    #[error("network timeout: the media host is not responding")]
    NetworkTimeout,

    /// The media host refused or throttled the request
    #[error("request blocked by the media host: {0}")]
    Blocked(String),

    /// yt-dlp or ffmpeg not found on this system
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// URL the extractor does not accept
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to parse extractor JSON output
    #[error("parse error: {0}")]
    Parse(String),

    /// Subprocess could not be started or exited abnormally
    #[error("execution error: {0}")]
    Execution(String),

    /// Subprocess exceeded its allotted time
    #[error("timed out after {0}s")]
    TimedOut(u64),

    /// The finished file could not be located on disk
    #[error("downloaded file not found: {0}")]
    FileMissing(String),
}

impl DownloadError {
    /// Classify a failure from the extractor's stderr text.
    pub fn classify(stderr: &str) -> Self {
        let lower = stderr.to_lowercase();

        if lower.contains("timeout") || lower.contains("timed out") {
            return Self::NetworkTimeout;
        }

        if lower.contains("429")
            || lower.contains("403")
            || lower.contains("forbidden")
            || lower.contains("rate-limit")
            || lower.contains("bot")
            || lower.contains("blocked")
        {
            return Self::Blocked(first_line(stderr));
        }

        if lower.contains("unsupported url") || lower.contains("invalid url") {
            return Self::InvalidUrl(first_line(stderr));
        }

        if lower.contains("command not found")
            || lower.contains("no such file")
            || lower.contains("not found in path")
        {
            return Self::ToolNotFound(first_line(stderr));
        }

        if lower.contains("json") || lower.contains("parse") {
            return Self::Parse(first_line(stderr));
        }

        Self::Execution(first_line(stderr))
    }
}

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("unknown error")
        .to_string()
}
