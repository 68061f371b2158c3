// Helper functions shared by the probe and fetch implementations

use std::path::{Path, PathBuf};
use std::process::Stdio;

use lazy_static::lazy_static;
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::{timeout, Duration};

use super::errors::DownloadError;

/// Run command with timeout (shared utility)
pub async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    timeout_secs: u64,
) -> Result<std::process::Output, DownloadError> {
    let mut child = TokioCommand::new(program)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DownloadError::ToolNotFound(program.to_string())
            } else {
                DownloadError::Execution(format!("failed to start {}: {}", program, e))
            }
        })?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| DownloadError::Execution(format!("no stdout from {}", program)))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| DownloadError::Execution(format!("no stderr from {}", program)))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe
            .read_to_end(&mut buf)
            .await
            .map_err(|e| DownloadError::Execution(format!("failed to read stdout: {}", e)))?;
        Ok::<Vec<u8>, DownloadError>(buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe
            .read_to_end(&mut buf)
            .await
            .map_err(|e| DownloadError::Execution(format!("failed to read stderr: {}", e)))?;
        Ok::<Vec<u8>, DownloadError>(buf)
    });

    let waited = timeout(Duration::from_secs(timeout_secs), child.wait()).await;
    match waited {
        Ok(status_res) => {
            let status = status_res
                .map_err(|e| DownloadError::Execution(format!("failed to wait for {}: {}", program, e)))?;
            let stdout = stdout_task
                .await
                .map_err(|e| DownloadError::Execution(format!("stdout task failed: {}", e)))??;
            let stderr = stderr_task
                .await
                .map_err(|e| DownloadError::Execution(format!("stderr task failed: {}", e)))??;
            Ok(std::process::Output {
                status,
                stdout,
                stderr,
            })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(DownloadError::TimedOut(timeout_secs))
        }
    }
}

lazy_static! {
    static ref UNSAFE_FILENAME_RE: Regex = Regex::new(r#"[\\/:*?"<>|]"#).unwrap();
}

/// Strip characters that are unsafe in filenames on any supported platform.
/// An empty or fully-stripped title falls back to "download".
pub fn sanitize_filename(name: &str) -> String {
    let cleaned = UNSAFE_FILENAME_RE.replace_all(name, "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "download".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Format a byte count for display ("150 MB", "1.2 GB")
pub fn format_size(bytes: Option<u64>) -> Option<String> {
    bytes.map(|b| {
        let mb = b as f64 / 1_048_576.0;
        if mb >= 1024.0 {
            format!("{:.1} GB", mb / 1024.0)
        } else {
            format!("{:.0} MB", mb)
        }
    })
}

/// Scratch directory that finished downloads land in before the caller
/// moves or serves them. Recreated empty by `clean`.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Workspace inside the user's download directory, or the current
    /// directory when the platform reports none.
    pub fn default_location() -> Self {
        let base = dirs::download_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join("streampick"))
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Create the directory if it does not exist yet
    pub fn ensure(&self) -> Result<(), DownloadError> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| DownloadError::Execution(format!("cannot create {}: {}", self.root.display(), e)))
    }

    /// Wipe the directory and recreate it empty
    pub fn clean(&self) -> Result<(), DownloadError> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)
                .map_err(|e| DownloadError::Execution(format!("cannot clean {}: {}", self.root.display(), e)))?;
        }
        self.ensure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_reserved_characters() {
        assert_eq!(
            sanitize_filename(r#"a/b\c:d*e?f"g<h>i|j"#),
            "abcdefghij"
        );
        assert_eq!(sanitize_filename("  My Video  "), "My Video");
    }

    #[test]
    fn sanitize_falls_back_when_nothing_survives() {
        assert_eq!(sanitize_filename(""), "download");
        assert_eq!(sanitize_filename(r#"///"#), "download");
    }

    #[test]
    fn format_size_picks_unit() {
        assert_eq!(format_size(Some(50_000_000)).as_deref(), Some("48 MB"));
        assert_eq!(
            format_size(Some(2 * 1024 * 1024 * 1024)).as_deref(),
            Some("2.0 GB")
        );
        assert_eq!(format_size(None), None);
    }

    #[test]
    fn workspace_clean_recreates_empty_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(tmp.path().join("scratch"));
        ws.ensure().unwrap();
        std::fs::write(ws.path().join("leftover.mp4"), b"x").unwrap();

        ws.clean().unwrap();

        assert!(ws.path().exists());
        assert_eq!(std::fs::read_dir(ws.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn run_with_timeout_kills_slow_commands() {
        let err = run_output_with_timeout("sleep", vec!["5".to_string()], 1)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::TimedOut(1)));
    }

    #[tokio::test]
    async fn run_with_timeout_reports_missing_tools() {
        let err = run_output_with_timeout("definitely-not-a-real-binary", Vec::new(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::ToolNotFound(_)));
    }
}
