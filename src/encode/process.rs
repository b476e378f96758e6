use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{RecorderError, Result};

/// Lines of encoder stderr kept in [`RecorderError::EncodingFailed`]
pub const STDERR_TAIL_LINES: usize = 20;

/// Outcome of a successful encoder run
#[derive(Debug, Clone)]
pub struct EncoderRun {
    pub status: ExitStatus,
    pub elapsed: Duration,
}

/// Run the encoder to completion and check its exit status.
///
/// The child is killed if the returned future is dropped before it exits.
pub async fn run_encoder(program: &Path, args: &[String]) -> Result<EncoderRun> {
    info!("Running encoder: {} {}", program.display(), args.join(" "));

    let start = Instant::now();
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| RecorderError::EncoderUnavailable {
            program: program.to_path_buf(),
            source,
        })?;
    let elapsed = start.elapsed();

    if !output.status.success() {
        let stderr = stderr_tail(&String::from_utf8_lossy(&output.stderr));
        return Err(RecorderError::EncodingFailed {
            status: output.status,
            stderr,
        });
    }

    debug!("Encoder finished in {:?}", elapsed);
    Ok(EncoderRun {
        status: output.status,
        elapsed,
    })
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let text: String = (0..50).map(|i| format!("line {}\n", i)).collect();
        let tail = stderr_tail(&text);
        assert_eq!(tail.lines().count(), STDERR_TAIL_LINES);
        assert!(tail.ends_with("line 49"));
        assert!(tail.starts_with("line 30"));
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let result = run_encoder(Path::new("framereel-no-such-encoder"), &[]).await;
        assert!(matches!(result, Err(RecorderError::EncoderUnavailable { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_run() {
        let run = run_encoder(Path::new("true"), &[]).await.unwrap();
        assert!(run.status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_carries_stderr() {
        let args = vec!["-c".to_string(), "echo 'no such codec' >&2; exit 3".to_string()];
        match run_encoder(Path::new("sh"), &args).await {
            Err(RecorderError::EncodingFailed { status, stderr }) => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr, "no such codec");
            }
            other => panic!("expected EncodingFailed, got {:?}", other),
        }
    }
}
