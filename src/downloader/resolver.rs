// Format resolution - turns a probed stream list into selectable options
//
// Takes the raw formats reported by the prober and one output kind, and
// produces the ranked, deduplicated option list the user picks from.
// Handles:
// - Stream classification (muxed / video-only / audio-only)
// - Ranking by resolution, frame rate and bitrate
// - A leading synthetic best-quality entry per kind
// - Dedup of merge candidates by height
// - Unique display labels
//
// Pure and synchronous: same streams in, same options out, no I/O.

use std::collections::{HashMap, HashSet};

use super::models::{DownloadOption, OutputKind, SortKey, Stream, StreamClass};
use super::utils::format_size;

/// Containers offered as direct (no merge) video downloads. The first entry
/// is the canonical video container; merge options are restricted to it.
pub const DIRECT_VIDEO_CONTAINERS: [&str; 2] = ["mp4", "webm"];

/// Selector for the synthetic best-quality video entry
const BEST_VIDEO_SELECTOR: &str = "bestvideo+bestaudio/best";

/// Resolve the selectable download options for one output kind.
///
/// Returns an empty list when no stream qualifies for the requested kind;
/// callers treat that as "nothing to offer", not as a failure.
pub fn resolve(streams: &[Stream], kind: OutputKind) -> Vec<DownloadOption> {
    let usable: Vec<&Stream> = streams
        .iter()
        .filter(|s| s.classify() != StreamClass::Unusable)
        .collect();

    let mut options = match kind {
        OutputKind::VideoContainer => resolve_video(&usable),
        OutputKind::AudioOnly => resolve_audio(&usable),
    };

    disambiguate_labels(&mut options);
    options
}

fn resolve_video(usable: &[&Stream]) -> Vec<DownloadOption> {
    let canonical = OutputKind::VideoContainer.canonical_container();

    let mut ranked: Vec<&Stream> = usable.to_vec();
    // Stable sort keeps probe order on ties, so output order is reproducible.
    ranked.sort_by(|a, b| SortKey::video(b).cmp(&SortKey::video(a)));

    let best = match ranked.iter().find(|s| s.is_video_bearing()) {
        Some(s) => *s,
        None => return Vec::new(),
    };

    let best_audio_size = ranked
        .iter()
        .filter(|s| s.classify() == StreamClass::AudioOnly)
        .max_by_key(|s| SortKey::audio(s))
        .and_then(|s| s.effective_size());

    let mut options = Vec::new();

    // The synthetic best-quality entry always leads. Muxed streams back this
    // selector even when no split video track exists.
    let best_size = if best.is_audio_bearing() {
        best.effective_size()
    } else {
        merged_size(best, best_audio_size)
    };
    options.push(DownloadOption {
        label: match best.display_resolution() {
            Some(res) => format!("Best quality {} (Recommended)", res),
            None => "Best quality (Recommended)".to_string(),
        },
        selector: BEST_VIDEO_SELECTOR.to_string(),
        requires_merge: true,
        expected_container: canonical.to_string(),
        estimated_size: format_size(best_size),
        sort_key: SortKey::video(best),
    });

    // One merge entry per distinct height among canonical-container video
    // tracks. On equal heights the first ranked stream wins and the rest
    // are dropped, not demoted to direct entries.
    let mut seen_heights: HashSet<Option<u32>> = HashSet::new();
    for s in ranked
        .iter()
        .filter(|s| s.classify() == StreamClass::VideoOnly && s.container == canonical)
    {
        if !seen_heights.insert(s.height) {
            continue;
        }
        options.push(DownloadOption {
            label: format!("{} (Merged)", video_label(s)),
            selector: format!("{}+bestaudio", s.id),
            requires_merge: true,
            expected_container: canonical.to_string(),
            estimated_size: format_size(merged_size(s, best_audio_size)),
            sort_key: SortKey::video(s),
        });
    }

    // Remaining video-only tracks in an accepted container download as-is.
    for s in ranked.iter().filter(|s| {
        s.classify() == StreamClass::VideoOnly
            && s.container != canonical
            && DIRECT_VIDEO_CONTAINERS.contains(&s.container.as_str())
    }) {
        options.push(DownloadOption {
            label: video_label(s),
            selector: s.id.clone(),
            requires_merge: false,
            expected_container: s.container.clone(),
            estimated_size: format_size(s.effective_size()),
            sort_key: SortKey::video(s),
        });
    }

    options
}

fn resolve_audio(usable: &[&Stream]) -> Vec<DownloadOption> {
    let canonical = OutputKind::AudioOnly.canonical_container();

    let mut ranked: Vec<&Stream> = usable.to_vec();
    ranked.sort_by(|a, b| SortKey::audio(b).cmp(&SortKey::audio(a)));

    // Best audio-bearing stream regardless of container; muxed streams
    // qualify here even though they get no direct entry of their own.
    let best = match ranked.iter().find(|s| s.is_audio_bearing()) {
        Some(s) => *s,
        None => return Vec::new(),
    };

    let mut options = vec![DownloadOption {
        label: format!("{} (Recommended)", audio_label(best)),
        selector: best.id.clone(),
        requires_merge: false,
        expected_container: canonical.to_string(),
        estimated_size: format_size(best.effective_size()),
        sort_key: SortKey::audio(best),
    }];

    // Muxed streams are skipped: extracting their audio would run the same
    // post-processing as the recommended entry and read as a duplicate.
    for s in ranked
        .iter()
        .filter(|s| s.classify() == StreamClass::AudioOnly)
    {
        options.push(DownloadOption {
            label: audio_label(s),
            selector: s.id.clone(),
            requires_merge: false,
            expected_container: canonical.to_string(),
            estimated_size: format_size(s.effective_size()),
            sort_key: SortKey::audio(s),
        });
    }

    options
}

/// "1920x1080 mp4 avc1", dropping whatever is unknown
fn video_label(stream: &Stream) -> String {
    let mut parts = Vec::new();
    if let Some(res) = stream.display_resolution() {
        parts.push(res);
    }
    parts.push(stream.container.clone());
    if let Some(codec) = stream.short_video_codec() {
        parts.push(codec);
    }
    parts.join(" ")
}

/// "opus 160kbps", or just the codec when the bitrate is unknown
fn audio_label(stream: &Stream) -> String {
    let codec = stream
        .short_audio_codec()
        .unwrap_or_else(|| "audio".to_string());
    match stream.abr {
        Some(abr) => format!("{} {:.0}kbps", codec, abr),
        None => codec,
    }
}

/// The presentation layer round-trips selections through the label, so
/// labels must be unique. Colliding labels get the selector appended;
/// selectors differ between options, so one pass settles it.
fn disambiguate_labels(options: &mut [DownloadOption]) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for option in options.iter() {
        *counts.entry(option.label.as_str()).or_insert(0) += 1;
    }
    let duplicated: HashSet<String> = counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(label, _)| label.to_string())
        .collect();

    for option in options.iter_mut() {
        if duplicated.contains(&option.label) {
            option.label = format!("{} [{}]", option.label, option.selector);
        }
    }

    debug_assert!(
        {
            let mut seen = HashSet::new();
            options.iter().all(|o| seen.insert(o.label.as_str()))
        },
        "option labels still collide after selector suffixing"
    );
}

fn merged_size(video: &Stream, best_audio_size: Option<u64>) -> Option<u64> {
    match (video.effective_size(), best_audio_size) {
        (Some(v), Some(a)) => Some(v + a),
        (Some(v), None) => Some(v),
        (None, other) => other,
    }
}
