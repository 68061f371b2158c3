// Stream probing via the yt-dlp binary
//
// Asks yt-dlp to dump the stream inventory of a URL as JSON and maps it
// into `MediaInfo`. Probing never transfers media; it only negotiates the
// available encodings. Playlist URLs dump one JSON document per line.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::errors::DownloadError;
use super::models::{MediaInfo, Stream};
use super::tools::{find_tool, ToolKind};
use super::utils::run_output_with_timeout;

/// Configuration for a probe call
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// SOCKS5/HTTP proxy URL
    pub proxy: Option<String>,
    /// Path to a cookies.txt file
    pub cookies_path: Option<String>,
    /// Socket and overall timeout in seconds
    pub timeout_seconds: u64,
    /// Transfer retries passed through to the extractor
    pub retries: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            cookies_path: None,
            timeout_seconds: 30,
            retries: 3,
        }
    }
}

impl ProbeConfig {
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_cookies_path(mut self, path: Option<String>) -> Self {
        self.cookies_path = path;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }
}

/// Trait for stream probers
#[async_trait]
pub trait StreamProber: Send + Sync {
    /// Name of the prober (for logging)
    fn name(&self) -> &'static str;

    /// Probe a single item, ignoring any playlist context around it
    async fn probe(&self, url: &str, config: &ProbeConfig) -> Result<MediaInfo, DownloadError>;

    /// Probe every entry of a playlist URL
    async fn probe_playlist(
        &self,
        url: &str,
        config: &ProbeConfig,
    ) -> Result<Vec<MediaInfo>, DownloadError>;
}

/// Prober backed by the yt-dlp CLI
pub struct YtDlpProber {
    ytdlp_path: String,
}

impl YtDlpProber {
    pub fn new() -> Self {
        Self {
            ytdlp_path: find_tool(ToolKind::YtDlp),
        }
    }

    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            ytdlp_path: path.into(),
        }
    }

    fn build_args(url: &str, config: &ProbeConfig, playlist: bool) -> Vec<String> {
        let mut args = vec![
            "--dump-json".to_string(),
            if playlist {
                "--yes-playlist".to_string()
            } else {
                "--no-playlist".to_string()
            },
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            config.timeout_seconds.to_string(),
            "--retries".to_string(),
            config.retries.to_string(),
        ];

        if let Some(path) = &config.cookies_path {
            args.push("--cookies".to_string());
            args.push(path.clone());
        }
        if let Some(proxy) = &config.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args.push(url.to_string());
        args
    }

    async fn run(
        &self,
        url: &str,
        config: &ProbeConfig,
        playlist: bool,
    ) -> Result<Vec<u8>, DownloadError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(DownloadError::InvalidUrl(url.to_string()));
        }

        let args = Self::build_args(url, config, playlist);
        debug!(tool = %self.ytdlp_path, %url, playlist, "probing");

        // Playlists dump one document per entry; give them room.
        let overall_timeout = if playlist {
            config.timeout_seconds * 10
        } else {
            config.timeout_seconds * 2
        };
        let output = run_output_with_timeout(&self.ytdlp_path, args, overall_timeout).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(%url, "probe failed: {}", stderr.trim());
            return Err(DownloadError::classify(&stderr));
        }

        Ok(output.stdout)
    }
}

impl Default for YtDlpProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamProber for YtDlpProber {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn probe(&self, url: &str, config: &ProbeConfig) -> Result<MediaInfo, DownloadError> {
        let stdout = self.run(url, config, false).await?;
        parse_probe_output(&stdout, url)
    }

    async fn probe_playlist(
        &self,
        url: &str,
        config: &ProbeConfig,
    ) -> Result<Vec<MediaInfo>, DownloadError> {
        let stdout = self.run(url, config, true).await?;
        parse_playlist_output(&stdout, url)
    }
}

/// Parse a single-item probe dump
pub fn parse_probe_output(stdout: &[u8], url: &str) -> Result<MediaInfo, DownloadError> {
    let text = String::from_utf8_lossy(stdout);
    let json: serde_json::Value = serde_json::from_str(text.trim())
        .map_err(|e| DownloadError::Parse(format!("invalid probe JSON: {}", e)))?;
    parse_media_info(&json, url)
}

/// Parse a playlist probe dump: one JSON document per line. Lines that do
/// not parse are skipped with a warning so one broken entry cannot sink
/// the whole playlist.
pub fn parse_playlist_output(stdout: &[u8], url: &str) -> Result<Vec<MediaInfo>, DownloadError> {
    let text = String::from_utf8_lossy(stdout);
    let mut items = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(json) => items.push(parse_media_info(&json, url)?),
            Err(e) => warn!("skipping unparseable playlist entry: {}", e),
        }
    }

    if items.is_empty() {
        return Err(DownloadError::Parse(
            "playlist probe produced no entries".to_string(),
        ));
    }
    Ok(items)
}

fn parse_media_info(json: &serde_json::Value, url: &str) -> Result<MediaInfo, DownloadError> {
    let streams = parse_streams(json)?;

    Ok(MediaInfo {
        title: json["title"].as_str().unwrap_or("Unknown").to_string(),
        uploader: json["uploader"].as_str().map(|s| s.to_string()),
        thumbnail: json["thumbnail"].as_str().map(|s| s.to_string()),
        duration_seconds: json["duration"].as_f64().map(|d| d as u64),
        source_url: json["webpage_url"]
            .as_str()
            .unwrap_or(url)
            .to_string(),
        streams,
    })
}

fn parse_streams(json: &serde_json::Value) -> Result<Vec<Stream>, DownloadError> {
    let formats = json["formats"]
        .as_array()
        .ok_or_else(|| DownloadError::Parse("no formats array in probe JSON".to_string()))?;

    let mut streams = Vec::new();
    for f in formats {
        let id = f["format_id"].as_str().unwrap_or("").to_string();
        if id.is_empty() {
            continue;
        }

        streams.push(Stream {
            id,
            container: f["ext"].as_str().unwrap_or("").to_string(),
            video_codec: f["vcodec"].as_str().map(|s| s.to_string()),
            audio_codec: f["acodec"].as_str().map(|s| s.to_string()),
            resolution: f["resolution"].as_str().map(|s| s.to_string()),
            height: f["height"].as_u64().map(|h| h as u32),
            fps: f["fps"].as_f64().map(|v| v as f32),
            abr: f["abr"].as_f64().map(|v| v as f32),
            tbr: f["tbr"].as_f64().map(|v| v as f32),
            filesize: f["filesize"].as_u64(),
            filesize_approx: f["filesize_approx"].as_u64(),
        });
    }

    Ok(streams)
}

/// Single-entry cache for the most recent probe result. Probing a new URL
/// evicts the previous entry; the cached value is immutable.
#[derive(Debug, Default)]
pub struct ProbeCache {
    entry: Option<MediaInfo>,
}

impl ProbeCache {
    pub fn new() -> Self {
        Self { entry: None }
    }

    pub fn get(&self, url: &str) -> Option<&MediaInfo> {
        self.entry.as_ref().filter(|info| info.source_url == url)
    }

    pub fn store(&mut self, info: MediaInfo) -> &MediaInfo {
        self.entry.insert(info)
    }

    pub fn clear(&mut self) {
        self.entry = None;
    }
}
