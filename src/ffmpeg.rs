use std::ffi::OsStr;
use std::io::Read;
use std::process::{Command, Stdio};

use thiserror::Error;

/// Stderr lines kept for error reporting.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum FfmpegError {
    #[error("ffmpeg not found on PATH")]
    NotFound,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ffmpeg exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

/// Run one ffmpeg invocation to completion, capturing stderr for error
/// reporting. All file-level operations (gap fillers, concatenation,
/// mixing, muxing) go through here.
pub fn run<I, S>(args: I) -> Result<(), FfmpegError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut child = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "warning", "-y"])
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FfmpegError::NotFound
            } else {
                FfmpegError::Io(e)
            }
        })?;

    let mut stderr = String::new();
    if let Some(mut pipe) = child.stderr.take() {
        let _ = pipe.read_to_string(&mut stderr);
    }
    let status = child.wait()?;

    if !stderr.trim().is_empty() {
        tracing::debug!(output = %stderr.trim(), "ffmpeg stderr");
    }
    if !status.success() {
        let mut tail: Vec<&str> = stderr.lines().rev().take(STDERR_TAIL_LINES).collect();
        tail.reverse();
        return Err(FfmpegError::Failed {
            status: status.to_string(),
            stderr: tail.join("\n").trim().to_string(),
        });
    }
    Ok(())
}

/// Seconds with millisecond precision, the way ffmpeg durations and
/// offsets are written on the command line.
pub fn format_secs(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}
