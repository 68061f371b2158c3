// Common data models for the downloader

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One encoding of the source media, as reported by the prober.
///
/// Codec fields follow yt-dlp conventions: a missing value or the literal
/// `"none"` means the stream does not carry that track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    /// Stream ID, unique within one probe result (e.g. "137", "251")
    pub id: String,
    /// Container / file extension (mp4, webm, m4a)
    pub container: String,
    /// Video codec (avc1, vp9, av01, "none")
    pub video_codec: Option<String>,
    /// Audio codec (mp4a, opus, "none")
    pub audio_codec: Option<String>,
    /// Resolution string (e.g. "1920x1080")
    pub resolution: Option<String>,
    /// Video height in pixels
    pub height: Option<u32>,
    /// Frames per second
    pub fps: Option<f32>,
    /// Audio bitrate in kbps
    pub abr: Option<f32>,
    /// Total bitrate in kbps
    pub tbr: Option<f32>,
    /// File size in bytes
    pub filesize: Option<u64>,
    /// Approximate file size (when exact is unknown)
    pub filesize_approx: Option<u64>,
}

impl Stream {
    /// Get effective file size (exact or approximate)
    pub fn effective_size(&self) -> Option<u64> {
        self.filesize.or(self.filesize_approx)
    }

    pub fn is_video_bearing(&self) -> bool {
        matches!(&self.video_codec, Some(c) if c != "none" && !c.is_empty())
    }

    pub fn is_audio_bearing(&self) -> bool {
        matches!(&self.audio_codec, Some(c) if c != "none" && !c.is_empty())
    }

    pub fn classify(&self) -> StreamClass {
        match (self.is_video_bearing(), self.is_audio_bearing()) {
            (true, true) => StreamClass::Muxed,
            (true, false) => StreamClass::VideoOnly,
            (false, true) => StreamClass::AudioOnly,
            (false, false) => StreamClass::Unusable,
        }
    }

    /// Resolution for display: the probed string, or the height as "720p"
    pub fn display_resolution(&self) -> Option<String> {
        self.resolution
            .clone()
            .or_else(|| self.height.map(|h| format!("{}p", h)))
    }

    /// Codec name without the profile suffix ("avc1.4d401f" -> "avc1")
    pub fn short_video_codec(&self) -> Option<String> {
        Self::short_codec(self.video_codec.as_deref())
    }

    pub fn short_audio_codec(&self) -> Option<String> {
        Self::short_codec(self.audio_codec.as_deref())
    }

    fn short_codec(codec: Option<&str>) -> Option<String> {
        match codec {
            Some(c) if c != "none" && !c.is_empty() => {
                Some(c.split('.').next().unwrap_or(c).to_string())
            }
            _ => None,
        }
    }
}

/// Track layout of a stream. Every stream lands in exactly one class;
/// `Unusable` streams carry neither track and are dropped up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamClass {
    Muxed,
    VideoOnly,
    AudioOnly,
    Unusable,
}

/// Metadata for one playable item, immutable once probed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub title: String,
    pub uploader: Option<String>,
    pub thumbnail: Option<String>,
    pub duration_seconds: Option<u64>,
    pub source_url: String,
    pub streams: Vec<Stream>,
}

impl MediaInfo {
    /// Duration formatted as "m:ss" for display
    pub fn display_duration(&self) -> Option<String> {
        self.duration_seconds
            .map(|secs| format!("{}:{:02}", secs / 60, secs % 60))
    }
}

/// Requested shape of the finished file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputKind {
    /// Muxed video in the canonical video container
    VideoContainer,
    /// Extracted audio in the canonical audio container
    AudioOnly,
}

impl OutputKind {
    /// Container the finished file uses after any post-processing
    pub fn canonical_container(&self) -> &'static str {
        match self {
            Self::VideoContainer => "mp4",
            Self::AudioOnly => "mp3",
        }
    }
}

/// Ranking key for one stream. Compared descending: larger keys rank first.
/// Fractional rates are scaled to integers so keys order totally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SortKey(pub u64, pub u64, pub u64);

impl SortKey {
    /// Video ranking: height, then frame rate, then total bitrate
    pub fn video(stream: &Stream) -> Self {
        Self(
            u64::from(stream.height.unwrap_or(0)),
            scale(stream.fps),
            scale(stream.tbr),
        )
    }

    /// Audio ranking: audio bitrate alone
    pub fn audio(stream: &Stream) -> Self {
        Self(scale(stream.abr), 0, 0)
    }
}

fn scale(rate: Option<f32>) -> u64 {
    rate.map(|r| (r.max(0.0) * 1000.0) as u64).unwrap_or(0)
}

/// One user-selectable download entry produced by the resolver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadOption {
    /// Display label, unique within one resolver result
    pub label: String,
    /// Instruction the fetcher accepts verbatim (stream id or merge directive)
    pub selector: String,
    /// Whether the fetcher has to combine two streams into one container
    pub requires_merge: bool,
    /// Container of the finished file after any post-processing
    pub expected_container: String,
    /// Estimated finished size for display (merge estimates include audio)
    pub estimated_size: Option<String>,
    /// Ranking key, not shown to the user
    pub sort_key: SortKey,
}

/// Progress update emitted while a fetch runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub percent: f32,
    pub status: String,
}

/// Result of a finished fetch. The final path is threaded back explicitly
/// instead of being parked in shared state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadOutcome {
    pub file_path: PathBuf,
    pub file_size: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(vcodec: Option<&str>, acodec: Option<&str>) -> Stream {
        Stream {
            id: "1".to_string(),
            container: "mp4".to_string(),
            video_codec: vcodec.map(|s| s.to_string()),
            audio_codec: acodec.map(|s| s.to_string()),
            resolution: None,
            height: None,
            fps: None,
            abr: None,
            tbr: None,
            filesize: None,
            filesize_approx: None,
        }
    }

    #[test]
    fn classification_covers_all_track_layouts() {
        assert_eq!(
            stream(Some("avc1"), Some("mp4a")).classify(),
            StreamClass::Muxed
        );
        assert_eq!(
            stream(Some("vp9"), Some("none")).classify(),
            StreamClass::VideoOnly
        );
        assert_eq!(
            stream(Some("none"), Some("opus")).classify(),
            StreamClass::AudioOnly
        );
        assert_eq!(stream(None, None).classify(), StreamClass::Unusable);
        assert_eq!(
            stream(Some("none"), Some("none")).classify(),
            StreamClass::Unusable
        );
    }

    #[test]
    fn effective_size_prefers_exact() {
        let mut s = stream(Some("avc1"), None);
        s.filesize = Some(100);
        s.filesize_approx = Some(200);
        assert_eq!(s.effective_size(), Some(100));
        s.filesize = None;
        assert_eq!(s.effective_size(), Some(200));
    }

    #[test]
    fn video_sort_key_orders_by_height_then_fps_then_bitrate() {
        let mut a = stream(Some("avc1"), None);
        let mut b = stream(Some("avc1"), None);
        a.height = Some(1080);
        b.height = Some(720);
        assert!(SortKey::video(&a) > SortKey::video(&b));

        b.height = Some(1080);
        a.fps = Some(30.0);
        b.fps = Some(60.0);
        assert!(SortKey::video(&b) > SortKey::video(&a));

        b.fps = Some(30.0);
        a.tbr = Some(4500.0);
        b.tbr = Some(2500.0);
        assert!(SortKey::video(&a) > SortKey::video(&b));
    }

    #[test]
    fn short_codec_trims_profile_suffix() {
        let mut s = stream(Some("avc1.4d401f"), Some("mp4a.40.2"));
        assert_eq!(s.short_video_codec().as_deref(), Some("avc1"));
        assert_eq!(s.short_audio_codec().as_deref(), Some("mp4a"));
        s.video_codec = Some("none".to_string());
        assert_eq!(s.short_video_codec(), None);
    }
}
