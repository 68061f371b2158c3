// External tool discovery: yt-dlp does the extraction and transfer,
// ffmpeg does the merging and re-encoding.

use std::process::Command;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToolKind {
    YtDlp,
    Ffmpeg,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::YtDlp => "yt-dlp",
            ToolKind::Ffmpeg => "ffmpeg",
        }
    }

    /// Env var that overrides discovery for this tool
    fn env_override(&self) -> &'static str {
        match self {
            ToolKind::YtDlp => "STREAMPICK_YTDLP",
            ToolKind::Ffmpeg => "STREAMPICK_FFMPEG",
        }
    }

    fn version_arg(&self) -> &'static str {
        match self {
            ToolKind::YtDlp => "--version",
            ToolKind::Ffmpeg => "-version",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub kind: ToolKind,
    pub version: Option<String>,
    pub path: Option<String>,
    pub is_available: bool,
}

pub struct ToolManager;

impl ToolManager {
    pub fn new() -> Self {
        Self
    }

    pub fn get_tool_info(&self, kind: ToolKind) -> ToolInfo {
        let (path, version) = self.detect_tool(kind);

        ToolInfo {
            name: kind.as_str().to_string(),
            kind,
            version,
            is_available: path.is_some(),
            path,
        }
    }

    pub fn get_all_tools(&self) -> Vec<ToolInfo> {
        vec![
            self.get_tool_info(ToolKind::YtDlp),
            self.get_tool_info(ToolKind::Ffmpeg),
        ]
    }

    fn detect_tool(&self, kind: ToolKind) -> (Option<String>, Option<String>) {
        let binary_name = kind.as_str();

        // 1. Explicit override wins
        if let Ok(path) = std::env::var(kind.env_override()) {
            if !path.trim().is_empty() {
                let version = self.get_version(&path, kind);
                return (Some(path), version);
            }
        }

        // 2. Common install locations
        let common_paths = [
            format!("/opt/homebrew/bin/{}", binary_name),
            format!("/usr/local/bin/{}", binary_name),
            format!("/usr/bin/{}", binary_name),
        ];

        for path in common_paths {
            if std::path::Path::new(&path).exists() {
                let version = self.get_version(&path, kind);
                return (Some(path), version);
            }
        }

        // 3. PATH lookup
        if let Ok(output) = Command::new("which").arg(binary_name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    let version = self.get_version(&path, kind);
                    return (Some(path), version);
                }
            }
        }

        (None, None)
    }

    fn get_version(&self, path: &str, kind: ToolKind) -> Option<String> {
        match Command::new(path).arg(kind.version_arg()).output() {
            Ok(output) if output.status.success() => {
                let out = String::from_utf8_lossy(&output.stdout);
                // ffmpeg prints a banner; the version is the first line
                out.lines().next().map(|l| l.trim().to_string())
            }
            _ => None,
        }
    }
}

impl Default for ToolManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolved invocation path for a tool: the discovered location, or the
/// bare name so PATH resolution gets a last chance at spawn time.
pub fn find_tool(kind: ToolKind) -> String {
    ToolManager::new()
        .get_tool_info(kind)
        .path
        .unwrap_or_else(|| kind.as_str().to_string())
}
