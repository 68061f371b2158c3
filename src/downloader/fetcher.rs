// Fetching and post-processing via the yt-dlp binary
//
// Takes one resolved download option, hands its selector to yt-dlp
// verbatim, and applies the post-processing the output kind calls for:
// merging into mp4 for video, ffmpeg audio extraction to mp3 for audio.
// Progress lines from the subprocess are parsed and forwarded to a sink;
// the final file location comes back as an explicit `DownloadOutcome`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::SystemTime;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tracing::{debug, info, warn};

use super::errors::DownloadError;
use super::models::{
    DownloadOption, DownloadOutcome, DownloadProgress, MediaInfo, OutputKind,
};
use super::tools::{find_tool, ToolKind};
use super::utils::sanitize_filename;

/// Configuration for fetch calls
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// SOCKS5/HTTP proxy URL
    pub proxy: Option<String>,
    /// Path to a cookies.txt file
    pub cookies_path: Option<String>,
    /// Explicit ffmpeg location handed to yt-dlp for merging/extraction
    pub ffmpeg_path: Option<String>,
    /// Socket timeout in seconds (the transfer itself is not bounded)
    pub socket_timeout_seconds: u64,
    /// Transfer retries passed through to the downloader
    pub retries: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            cookies_path: None,
            ffmpeg_path: None,
            socket_timeout_seconds: 30,
            retries: 3,
        }
    }
}

impl FetchConfig {
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_cookies_path(mut self, path: Option<String>) -> Self {
        self.cookies_path = path;
        self
    }

    pub fn with_ffmpeg_path(mut self, path: Option<String>) -> Self {
        self.ffmpeg_path = path;
        self
    }
}

/// One fetch job, assembled from a probe result plus the picked option
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub source_url: String,
    /// Selector taken from the option, passed to yt-dlp unchanged
    pub selector: String,
    pub kind: OutputKind,
    pub expected_container: String,
    /// Sanitized filename prefix derived from the media title
    pub title_prefix: String,
    pub output_dir: PathBuf,
}

impl FetchRequest {
    pub fn for_option(
        info: &MediaInfo,
        option: &DownloadOption,
        kind: OutputKind,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source_url: info.source_url.clone(),
            selector: option.selector.clone(),
            kind,
            expected_container: option.expected_container.clone(),
            title_prefix: sanitize_filename(&info.title),
            output_dir: output_dir.into(),
        }
    }
}

/// Receives progress updates while a fetch runs
pub trait ProgressSink: Send + Sync {
    fn emit(&self, progress: DownloadProgress);
}

/// Sink that swallows all updates
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _progress: DownloadProgress) {}
}

/// Trait for fetch backends
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Name of the backend (for logging)
    fn name(&self) -> &'static str;

    /// Retrieve and post-process one selection, reporting progress
    async fn fetch(
        &self,
        request: &FetchRequest,
        progress: &dyn ProgressSink,
    ) -> Result<DownloadOutcome, DownloadError>;
}

/// Fetcher backed by the yt-dlp CLI (which drives ffmpeg itself)
pub struct YtDlpFetcher {
    ytdlp_path: String,
    config: FetchConfig,
}

impl YtDlpFetcher {
    pub fn new(config: FetchConfig) -> Self {
        Self {
            ytdlp_path: find_tool(ToolKind::YtDlp),
            config,
        }
    }

    pub fn with_path(path: impl Into<String>, config: FetchConfig) -> Self {
        Self {
            ytdlp_path: path.into(),
            config,
        }
    }

    fn build_args(&self, request: &FetchRequest) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            request.selector.clone(),
            "--newline".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            self.config.socket_timeout_seconds.to_string(),
            "--retries".to_string(),
            self.config.retries.to_string(),
            "-P".to_string(),
            request.output_dir.display().to_string(),
            "-o".to_string(),
            format!("{}_%(format_id)s.%(ext)s", request.title_prefix),
        ];

        match request.kind {
            OutputKind::VideoContainer => {
                args.push("--merge-output-format".to_string());
                args.push(OutputKind::VideoContainer.canonical_container().to_string());
            }
            OutputKind::AudioOnly => {
                args.push("-x".to_string());
                args.push("--audio-format".to_string());
                args.push(OutputKind::AudioOnly.canonical_container().to_string());
                args.push("--audio-quality".to_string());
                args.push("320K".to_string());
            }
        }

        if let Some(ffmpeg) = &self.config.ffmpeg_path {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.clone());
        }
        if let Some(path) = &self.config.cookies_path {
            args.push("--cookies".to_string());
            args.push(path.clone());
        }
        if let Some(proxy) = &self.config.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args.push(request.source_url.clone());
        args
    }
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new(FetchConfig::default())
    }
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        progress: &dyn ProgressSink,
    ) -> Result<DownloadOutcome, DownloadError> {
        std::fs::create_dir_all(&request.output_dir).map_err(|e| {
            DownloadError::Execution(format!(
                "cannot create {}: {}",
                request.output_dir.display(),
                e
            ))
        })?;

        let args = self.build_args(request);
        debug!(tool = %self.ytdlp_path, selector = %request.selector, "starting fetch");

        let mut child = TokioCommand::new(&self.ytdlp_path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    DownloadError::ToolNotFound(self.ytdlp_path.clone())
                } else {
                    DownloadError::Execution(format!("failed to start yt-dlp: {}", e))
                }
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::Execution("no stdout from yt-dlp".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::Execution("no stderr from yt-dlp".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).to_string()
        });

        // Follow stdout line by line: progress for the sink, destination
        // lines for the final path.
        let mut provisional_path: Option<PathBuf> = None;
        let mut final_path: Option<PathBuf> = None;
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(update) = parse_progress_line(&line) {
                progress.emit(update);
            }
            match parse_destination_line(&line) {
                Some(Destination::Provisional(path)) => provisional_path = Some(path),
                Some(Destination::Final(path)) => final_path = Some(path),
                None => {}
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| DownloadError::Execution(format!("process error: {}", e)))?;
        let stderr_output = stderr_task.await.unwrap_or_default();

        if !status.success() {
            warn!(selector = %request.selector, "fetch failed: {}", stderr_output.trim());
            return Err(DownloadError::classify(&stderr_output));
        }

        let file_path = final_path
            .or(provisional_path)
            .filter(|p| p.exists())
            .or_else(|| {
                find_newest_output(
                    &request.output_dir,
                    &request.title_prefix,
                    &request.expected_container,
                )
            })
            .ok_or_else(|| {
                DownloadError::FileMissing(format!(
                    "{}_*.{} under {}",
                    request.title_prefix,
                    request.expected_container,
                    request.output_dir.display()
                ))
            })?;

        let file_size = std::fs::metadata(&file_path).ok().map(|m| m.len());
        info!(path = %file_path.display(), "fetch finished");
        progress.emit(DownloadProgress {
            percent: 100.0,
            status: "done".to_string(),
        });

        Ok(DownloadOutcome {
            file_path,
            file_size,
        })
    }
}

enum Destination {
    /// "Destination:" line; post-processing may still replace the file
    Provisional(PathBuf),
    /// Merger/extraction output, the path the finished file keeps
    Final(PathBuf),
}

lazy_static! {
    static ref PROGRESS_RE: Regex = Regex::new(
        r"\[download\]\s+(\d+\.?\d*)%\s+of\s+~?\s*(\d+\.?\d*\s*\w+)\s+at\s+(\d+\.?\d*\s*\w+/s)(?:\s+ETA\s+(\S+))?(?:\s+\(frag\s+(\d+)/(\d+)\))?"
    )
    .unwrap();
    static ref DEST_RE: Regex = Regex::new(r"\[download\]\s+Destination:\s+(.+)").unwrap();
    static ref MERGE_RE: Regex =
        Regex::new(r#"\[Merger\]\s+Merging formats into\s+"(.+)""#).unwrap();
    static ref EXTRACT_RE: Regex =
        Regex::new(r"\[ExtractAudio\]\s+Destination:\s+(.+)").unwrap();
    static ref ALREADY_RE: Regex = Regex::new(r"has already been downloaded").unwrap();
}

/// Parse one yt-dlp progress line like:
/// `[download]   6.2% of ~ 343.72MiB at  420.30KiB/s ETA 12:32 (frag 29/454)`
fn parse_progress_line(line: &str) -> Option<DownloadProgress> {
    if let Some(caps) = PROGRESS_RE.captures(line) {
        let percent: f32 = caps.get(1)?.as_str().parse().ok()?;
        let size = caps.get(2).map(|m| m.as_str()).unwrap_or("?");
        let speed = caps.get(3).map(|m| m.as_str()).unwrap_or("?");
        let eta = caps.get(4).map(|m| m.as_str()).unwrap_or("");

        let status = if eta.is_empty() {
            format!("downloading {:.1}% of {} at {}", percent, size, speed)
        } else {
            format!(
                "downloading {:.1}% of {} at {} (ETA {})",
                percent, size, speed, eta
            )
        };
        return Some(DownloadProgress { percent, status });
    }

    if let Some(caps) = DEST_RE.captures(line) {
        let filename = caps.get(1).map(|m| m.as_str()).unwrap_or("file");
        let short_name: String = filename
            .split('/')
            .next_back()
            .unwrap_or(filename)
            .chars()
            .take(50)
            .collect();
        return Some(DownloadProgress {
            percent: 0.0,
            status: format!("starting {}", short_name),
        });
    }

    if MERGE_RE.is_match(line) {
        return Some(DownloadProgress {
            percent: 99.0,
            status: "merging video and audio".to_string(),
        });
    }

    if EXTRACT_RE.is_match(line) {
        return Some(DownloadProgress {
            percent: 99.0,
            status: "converting audio".to_string(),
        });
    }

    if ALREADY_RE.is_match(line) {
        return Some(DownloadProgress {
            percent: 100.0,
            status: "file already downloaded".to_string(),
        });
    }

    None
}

fn parse_destination_line(line: &str) -> Option<Destination> {
    if let Some(caps) = MERGE_RE.captures(line) {
        return Some(Destination::Final(PathBuf::from(caps.get(1)?.as_str())));
    }
    if let Some(caps) = EXTRACT_RE.captures(line) {
        return Some(Destination::Final(PathBuf::from(caps.get(1)?.as_str())));
    }
    if let Some(caps) = DEST_RE.captures(line) {
        return Some(Destination::Provisional(PathBuf::from(
            caps.get(1)?.as_str().trim(),
        )));
    }
    None
}

/// Last-resort path discovery: the newest file in the output directory
/// matching the request's filename prefix and container.
fn find_newest_output(dir: &Path, prefix: &str, container: &str) -> Option<PathBuf> {
    let suffix = format!(".{}", container);
    let mut candidates: Vec<(SystemTime, PathBuf)> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with(prefix) && name.ends_with(&suffix))
                .unwrap_or(false)
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((modified, entry.path()))
        })
        .collect();

    candidates.sort_by_key(|(modified, _)| *modified);
    candidates.pop().map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::SortKey;

    fn request(kind: OutputKind) -> FetchRequest {
        FetchRequest {
            source_url: "https://example.com/watch?v=abc".to_string(),
            selector: "137+bestaudio".to_string(),
            kind,
            expected_container: kind.canonical_container().to_string(),
            title_prefix: "My Video".to_string(),
            output_dir: PathBuf::from("/tmp/out"),
        }
    }

    #[test]
    fn progress_line_with_eta_parses() {
        let update = parse_progress_line(
            "[download]  12.5% of ~ 310.04MiB at  374.36KiB/s ETA 11:59 (frag 56/454)",
        )
        .expect("progress update");
        assert!((update.percent - 12.5).abs() < f32::EPSILON);
        assert!(update.status.contains("310.04MiB"));
        assert!(update.status.contains("ETA 11:59"));
    }

    #[test]
    fn merger_line_is_final_destination() {
        let line = r#"[Merger] Merging formats into "/tmp/out/My Video_137+140.mp4""#;
        match parse_destination_line(line) {
            Some(Destination::Final(path)) => {
                assert_eq!(path, PathBuf::from("/tmp/out/My Video_137+140.mp4"));
            }
            _ => panic!("expected final destination"),
        }
        assert_eq!(parse_progress_line(line).map(|p| p.percent), Some(99.0));
    }

    #[test]
    fn extract_audio_line_is_final_destination() {
        let line = "[ExtractAudio] Destination: /tmp/out/My Video_140.mp3";
        match parse_destination_line(line) {
            Some(Destination::Final(path)) => {
                assert_eq!(path, PathBuf::from("/tmp/out/My Video_140.mp3"));
            }
            _ => panic!("expected final destination"),
        }
    }

    #[test]
    fn download_destination_is_provisional() {
        let line = "[download] Destination: /tmp/out/My Video_137.f137.mp4";
        assert!(matches!(
            parse_destination_line(line),
            Some(Destination::Provisional(_))
        ));
    }

    #[test]
    fn unrelated_lines_parse_to_nothing() {
        assert!(parse_progress_line("[youtube] abc: Downloading webpage").is_none());
        assert!(parse_destination_line("[info] Writing video metadata").is_none());
    }

    #[test]
    fn video_args_request_merge_container() {
        let fetcher = YtDlpFetcher::with_path("yt-dlp", FetchConfig::default());
        let args = fetcher.build_args(&request(OutputKind::VideoContainer));

        assert!(args.contains(&"--merge-output-format".to_string()));
        assert!(args.contains(&"mp4".to_string()));
        assert!(!args.contains(&"-x".to_string()));
        assert_eq!(args[1], "137+bestaudio");
        assert_eq!(args.last().unwrap(), "https://example.com/watch?v=abc");
    }

    #[test]
    fn audio_args_request_extraction() {
        let fetcher = YtDlpFetcher::with_path("yt-dlp", FetchConfig::default());
        let args = fetcher.build_args(&request(OutputKind::AudioOnly));

        assert!(args.contains(&"-x".to_string()));
        assert!(args.contains(&"--audio-format".to_string()));
        assert!(args.contains(&"mp3".to_string()));
        assert!(!args.contains(&"--merge-output-format".to_string()));
    }

    #[test]
    fn network_options_propagate_to_args() {
        let config = FetchConfig::default()
            .with_proxy(Some("socks5://127.0.0.1:1080".to_string()))
            .with_cookies_path(Some("/tmp/cookies.txt".to_string()))
            .with_ffmpeg_path(Some("/opt/ffmpeg/bin".to_string()));
        let fetcher = YtDlpFetcher::with_path("yt-dlp", config);
        let args = fetcher.build_args(&request(OutputKind::VideoContainer));

        assert!(args.contains(&"--proxy".to_string()));
        assert!(args.contains(&"socks5://127.0.0.1:1080".to_string()));
        assert!(args.contains(&"--cookies".to_string()));
        assert!(args.contains(&"--ffmpeg-location".to_string()));
    }

    #[test]
    fn request_for_option_sanitizes_title() {
        let info = MediaInfo {
            title: "What? A/B Test: Part 1".to_string(),
            uploader: None,
            thumbnail: None,
            duration_seconds: None,
            source_url: "https://example.com/v".to_string(),
            streams: Vec::new(),
        };
        let option = DownloadOption {
            label: "1280x720 mp4 avc1 (Merged)".to_string(),
            selector: "136+bestaudio".to_string(),
            requires_merge: true,
            expected_container: "mp4".to_string(),
            estimated_size: None,
            sort_key: SortKey(720, 0, 0),
        };

        let request =
            FetchRequest::for_option(&info, &option, OutputKind::VideoContainer, "/tmp/out");

        assert_eq!(request.title_prefix, "What AB Test Part 1");
        assert_eq!(request.selector, "136+bestaudio");
        assert_eq!(request.expected_container, "mp4");
    }

    #[tokio::test]
    async fn fetch_with_missing_tool_reports_tool_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let mut req = request(OutputKind::VideoContainer);
        req.output_dir = tmp.path().to_path_buf();

        let fetcher =
            YtDlpFetcher::with_path("definitely-not-a-real-binary", FetchConfig::default());
        let err = fetcher.fetch(&req, &NullSink).await.unwrap_err();
        assert!(matches!(err, DownloadError::ToolNotFound(_)));
    }

    #[test]
    fn fallback_scan_picks_newest_matching_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        std::fs::write(dir.join("My Video_137.mp4"), b"old").unwrap();
        std::fs::write(dir.join("My Video_22.mp4"), b"new").unwrap();
        std::fs::write(dir.join("Other_1.mp4"), b"x").unwrap();
        std::fs::write(dir.join("My Video_140.mp3"), b"x").unwrap();

        // Bump mtime of the file that should win.
        let newest = dir.join("My Video_22.mp4");
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        let file = std::fs::File::options().write(true).open(&newest).unwrap();
        file.set_modified(later).unwrap();

        let found = find_newest_output(dir, "My Video", "mp4").unwrap();
        assert_eq!(found, newest);

        assert!(find_newest_output(dir, "Missing", "mp4").is_none());
    }
}
