// Helper functions shared by the pipeline stages

use regex::Regex;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::{timeout, Duration};

use super::errors::{PipelineError, PipelineResult};

/// Run a command to completion, capturing both output channels.
///
/// Non-zero exit is not an error here; callers inspect `status`.
pub async fn run_output_with_timeout(
    program: &str,
    args: &[String],
    timeout_secs: u64,
) -> PipelineResult<std::process::Output> {
    tracing::debug!(target: "transcoder::process", program, ?args, "spawning");

    let mut child = TokioCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PipelineError::ProcessSpawnFailure(format!("{}: {}", program, e)))?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| PipelineError::Io(format!("Failed to capture stdout from {}", program)))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| PipelineError::Io(format!("Failed to capture stderr from {}", program)))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    match timeout(Duration::from_secs(timeout_secs), child.wait()).await {
        Ok(status) => {
            let status = status?;
            let stdout = stdout_task
                .await
                .map_err(|e| PipelineError::Io(format!("stdout task failed: {}", e)))??;
            let stderr = stderr_task
                .await
                .map_err(|e| PipelineError::Io(format!("stderr task failed: {}", e)))??;
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
            Err(PipelineError::Io(format!(
                "{} timed out after {}s",
                program, timeout_secs
            )))
        }
    }
}

/// Make a title safe for use in a filename
pub fn sanitize_title(title: &str) -> String {
    lazy_static::lazy_static! {
        static ref UNSAFE_RE: Regex = Regex::new(r"[^a-zA-Z0-9_]+").unwrap();
    }
    let cleaned = UNSAFE_RE.replace_all(title, "_").to_string();
    if cleaned.trim_matches('_').is_empty() {
        "video".to_string()
    } else {
        cleaned
    }
}

/// Format a byte count for display
pub fn format_size(bytes: u64) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = MB * 1024.0;
    const TB: f64 = GB * 1024.0;
    let b = bytes as f64;
    if b < MB {
        format!("{} B", bytes)
    } else if b < GB {
        format!("{:.2} MB", b / MB)
    } else if b < TB {
        format!("{:.2} GB", b / GB)
    } else {
        format!("{:.2} TB", b / TB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("Daft Punk - One More Time!"), "Daft_Punk_One_More_Time_");
        assert_eq!(sanitize_title("already_safe_123"), "already_safe_123");
        assert_eq!(sanitize_title("???"), "video");
        assert_eq!(sanitize_title(""), "video");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_output_captures_both_channels() {
        let args = vec!["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()];
        let output = run_output_with_timeout("sh", &args, 5).await.unwrap();
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "out");
        assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_output_times_out() {
        let args = vec!["-c".to_string(), "sleep 5".to_string()];
        let result = run_output_with_timeout("sh", &args, 1).await;
        assert!(matches!(result, Err(PipelineError::Io(msg)) if msg.contains("timed out")));
    }

    #[tokio::test]
    async fn test_run_output_missing_program() {
        let result = run_output_with_timeout("definitely-not-a-real-binary-xyz", &[], 1).await;
        assert!(matches!(result, Err(PipelineError::ProcessSpawnFailure(_))));
    }
}
