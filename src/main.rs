// streampick CLI - the thin shell around the downloader library:
// print the resolved options, take a pick, show progress, report the file.

use std::path::PathBuf;
use std::sync::Mutex;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use streampick::downloader::{
    resolve, DownloadOption, DownloadProgress, FetchConfig, FetchRequest, Fetcher, MediaInfo,
    OutputKind, ProbeCache, ProbeConfig, ProgressSink, StreamProber, ToolManager, Workspace,
    YtDlpFetcher, YtDlpProber,
};

/// Files past this size are awkward to hand off directly; warn about them.
const SIZE_WARN_LIMIT_MB: u64 = 500;

#[derive(Parser)]
#[command(
    name = "streampick",
    version,
    about = "Probe media URLs, pick a quality/format option, download via yt-dlp and ffmpeg"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe a URL and list the selectable download options
    Probe {
        url: String,
        /// Probe every entry of a playlist URL
        #[arg(long)]
        playlist: bool,
        #[command(flatten)]
        network: NetworkArgs,
    },
    /// Download one option for a URL
    Download {
        url: String,
        /// Extract audio instead of downloading video
        #[arg(long)]
        audio: bool,
        /// Which option to download: 1-based index or exact label (default: 1)
        #[arg(long)]
        pick: Option<String>,
        /// Output directory (default: a streampick folder under Downloads)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Download every entry of a playlist URL
        #[arg(long)]
        playlist: bool,
        /// Wipe the output directory before downloading
        #[arg(long)]
        clean: bool,
        #[command(flatten)]
        network: NetworkArgs,
    },
    /// Show the status of the external tools (yt-dlp, ffmpeg)
    Tools,
}

#[derive(Args)]
struct NetworkArgs {
    /// Proxy URL (e.g. socks5://127.0.0.1:1080)
    #[arg(long)]
    proxy: Option<String>,
    /// Path to a cookies.txt file
    #[arg(long)]
    cookies: Option<String>,
}

impl NetworkArgs {
    fn probe_config(&self) -> ProbeConfig {
        ProbeConfig::default()
            .with_proxy(self.proxy.clone())
            .with_cookies_path(self.cookies.clone())
    }

    fn fetch_config(&self) -> FetchConfig {
        FetchConfig::default()
            .with_proxy(self.proxy.clone())
            .with_cookies_path(self.cookies.clone())
    }
}

/// Probe state for one CLI run; repeated lookups of the same URL hit the
/// cache instead of the network.
struct Session {
    prober: YtDlpProber,
    cache: ProbeCache,
}

impl Session {
    fn new() -> Self {
        Self {
            prober: YtDlpProber::new(),
            cache: ProbeCache::new(),
        }
    }

    async fn media_info(&mut self, url: &str, config: &ProbeConfig) -> Result<MediaInfo, String> {
        if let Some(info) = self.cache.get(url) {
            return Ok(info.clone());
        }
        let info = self
            .prober
            .probe(url, config)
            .await
            .map_err(|e| e.to_string())?;
        Ok(self.cache.store(info).clone())
    }
}

/// Prints progress lines, throttled to whole-percent steps
struct ConsoleProgress {
    last_step: Mutex<f32>,
}

impl ConsoleProgress {
    fn new() -> Self {
        Self {
            last_step: Mutex::new(-1.0),
        }
    }
}

impl ProgressSink for ConsoleProgress {
    fn emit(&self, progress: DownloadProgress) {
        if let Ok(mut last) = self.last_step.lock() {
            let step = progress.percent.floor();
            if step > *last || progress.percent == 0.0 {
                *last = step;
                println!("  {}", progress.status);
            }
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "streampick=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Probe {
            url,
            playlist,
            network,
        } => cmd_probe(&url, playlist, &network).await,
        Command::Download {
            url,
            audio,
            pick,
            out,
            playlist,
            clean,
            network,
        } => cmd_download(&url, audio, pick.as_deref(), out, playlist, clean, &network).await,
        Command::Tools => cmd_tools(),
    };

    if let Err(message) = result {
        eprintln!("Error: {}", message);
        std::process::exit(1);
    }
}

async fn cmd_probe(url: &str, playlist: bool, network: &NetworkArgs) -> Result<(), String> {
    let mut session = Session::new();
    let config = network.probe_config();

    let items = if playlist {
        session
            .prober
            .probe_playlist(url, &config)
            .await
            .map_err(|e| e.to_string())?
    } else {
        vec![session.media_info(url, &config).await?]
    };

    for info in &items {
        print_media_header(info);
        for (kind, heading) in [
            (OutputKind::VideoContainer, "Video (mp4)"),
            (OutputKind::AudioOnly, "Audio (mp3)"),
        ] {
            println!("{}:", heading);
            let options = resolve(&info.streams, kind);
            if options.is_empty() {
                println!("  (no matching streams)");
                continue;
            }
            for (index, option) in options.iter().enumerate() {
                print_option_row(index, option);
            }
        }
        println!();
    }

    Ok(())
}

async fn cmd_download(
    url: &str,
    audio: bool,
    pick: Option<&str>,
    out: Option<PathBuf>,
    playlist: bool,
    clean: bool,
    network: &NetworkArgs,
) -> Result<(), String> {
    let kind = if audio {
        OutputKind::AudioOnly
    } else {
        OutputKind::VideoContainer
    };

    let workspace = match out {
        Some(dir) => Workspace::new(dir),
        None => Workspace::default_location(),
    };
    if clean {
        workspace.clean().map_err(|e| e.to_string())?;
    } else {
        workspace.ensure().map_err(|e| e.to_string())?;
    }

    let mut session = Session::new();
    let probe_config = network.probe_config();
    let items = if playlist {
        session
            .prober
            .probe_playlist(url, &probe_config)
            .await
            .map_err(|e| e.to_string())?
    } else {
        vec![session.media_info(url, &probe_config).await?]
    };

    let fetcher = YtDlpFetcher::new(network.fetch_config());
    let mut saved = Vec::new();

    for info in &items {
        let options = resolve(&info.streams, kind);
        if options.is_empty() {
            // A normal outcome, not a failure: there is just nothing to offer.
            println!(
                "No downloadable formats of this output type for \"{}\".",
                info.title
            );
            continue;
        }

        let option = pick_option(&options, pick)?;
        println!("Downloading \"{}\" as {}", info.title, option.label);

        let request = FetchRequest::for_option(info, option, kind, workspace.path());
        let progress = ConsoleProgress::new();
        let outcome = fetcher
            .fetch(&request, &progress)
            .await
            .map_err(|e| e.to_string())?;

        let size_mb = outcome.file_size.map(|b| b / 1_048_576).unwrap_or(0);
        println!("Saved: {} ({} MB)", outcome.file_path.display(), size_mb);
        if size_mb > SIZE_WARN_LIMIT_MB {
            println!(
                "Note: file exceeds {} MB; moving it off this machine may be slow.",
                SIZE_WARN_LIMIT_MB
            );
        }
        saved.push(outcome.file_path);
    }

    if playlist {
        println!("Finished: {} of {} entries saved.", saved.len(), items.len());
    }

    Ok(())
}

fn cmd_tools() -> Result<(), String> {
    for tool in ToolManager::new().get_all_tools() {
        let status = if tool.is_available { "ok" } else { "missing" };
        println!(
            "{:<8} {:<8} {}  {}",
            tool.name,
            status,
            tool.version.as_deref().unwrap_or("-"),
            tool.path.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

fn print_media_header(info: &MediaInfo) {
    println!("Title:    {}", info.title);
    if let Some(uploader) = &info.uploader {
        println!("Uploader: {}", uploader);
    }
    if let Some(duration) = info.display_duration() {
        println!("Duration: {}", duration);
    }
    println!();
}

fn print_option_row(index: usize, option: &DownloadOption) {
    match &option.estimated_size {
        Some(size) => println!("  {:>2}. {}  ({})", index + 1, option.label, size),
        None => println!("  {:>2}. {}", index + 1, option.label),
    }
}

/// Resolve the user's pick: a 1-based index, an exact label, or the
/// leading recommended entry when nothing was given.
fn pick_option<'a>(
    options: &'a [DownloadOption],
    pick: Option<&str>,
) -> Result<&'a DownloadOption, String> {
    let pick = match pick {
        None => return options.first().ok_or_else(|| "no options".to_string()),
        Some(p) => p,
    };

    if let Ok(number) = pick.parse::<usize>() {
        if number == 0 {
            return Err("option numbers start at 1".to_string());
        }
        return options
            .get(number - 1)
            .ok_or_else(|| format!("no option #{} (only {} available)", number, options.len()));
    }

    options
        .iter()
        .find(|o| o.label == pick)
        .ok_or_else(|| format!("no option labeled \"{}\"", pick))
}

#[cfg(test)]
mod tests {
    use super::*;
    use streampick::downloader::SortKey;

    fn option(label: &str, selector: &str) -> DownloadOption {
        DownloadOption {
            label: label.to_string(),
            selector: selector.to_string(),
            requires_merge: false,
            expected_container: "mp4".to_string(),
            estimated_size: None,
            sort_key: SortKey(0, 0, 0),
        }
    }

    #[test]
    fn pick_defaults_to_first_option() {
        let options = vec![option("a", "1"), option("b", "2")];
        assert_eq!(pick_option(&options, None).unwrap().selector, "1");
    }

    #[test]
    fn pick_accepts_one_based_index() {
        let options = vec![option("a", "1"), option("b", "2")];
        assert_eq!(pick_option(&options, Some("2")).unwrap().selector, "2");
        assert!(pick_option(&options, Some("0")).is_err());
        assert!(pick_option(&options, Some("3")).is_err());
    }

    #[test]
    fn pick_accepts_exact_label() {
        let options = vec![option("1080p mp4", "137"), option("720p mp4", "136")];
        assert_eq!(
            pick_option(&options, Some("720p mp4")).unwrap().selector,
            "136"
        );
        assert!(pick_option(&options, Some("480p mp4")).is_err());
    }
}
