use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("input {0} does not exist")]
    Missing(PathBuf),
    #[error("unsupported input type: {0} (expected a directory or .tar.gz archive)")]
    UnsupportedType(PathBuf),
    #[error("{tool} not found on PATH")]
    ToolNotFound { tool: &'static str },
    #[error("{tool} failed with {status}: {stderr}")]
    ToolFailed {
        tool: &'static str,
        status: String,
        stderr: String,
    },
    #[error("no rtpdump files found under {0}")]
    NoSegments(PathBuf),
}

/// Stage the recording input into a readable working directory. A
/// directory is used as-is; a `.tar.gz`/`.tgz` archive is unpacked into
/// `scratch` by the external `tar` binary; an `s3://` uri is first
/// fetched with the external `aws` cli. Returns the directory that holds
/// the rtpdump/sdp pairs.
pub fn stage_input(
    input_file: Option<&Path>,
    input_s3: Option<&str>,
    scratch: &Path,
) -> Result<PathBuf, StageError> {
    let local: PathBuf = match (input_file, input_s3) {
        (Some(path), None) => path.to_path_buf(),
        (None, Some(uri)) => fetch_s3(uri, scratch)?,
        // The cli layer enforces exactly one input flag.
        _ => unreachable!("input flags validated by the cli"),
    };

    if !local.exists() {
        return Err(StageError::Missing(local));
    }
    if local.is_dir() {
        return locate_segments_dir(&local);
    }

    let name = local.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if !(name.ends_with(".tar.gz") || name.ends_with(".tgz")) {
        return Err(StageError::UnsupportedType(local));
    }

    let unpacked = scratch.join("input");
    std::fs::create_dir_all(&unpacked)?;
    tracing::info!(archive = %local.display(), "unpacking recording archive");
    run_tool(
        "tar",
        Command::new("tar")
            .arg("-xzf")
            .arg(&local)
            .arg("-C")
            .arg(&unpacked),
    )?;
    locate_segments_dir(&unpacked)
}

fn fetch_s3(uri: &str, scratch: &Path) -> Result<PathBuf, StageError> {
    let name = uri.rsplit('/').next().filter(|n| !n.is_empty()).unwrap_or("recording.tar.gz");
    let dest = scratch.join(name);
    tracing::info!(uri = %uri, "downloading recording from s3");
    run_tool(
        "aws",
        Command::new("aws").args(["s3", "cp", uri]).arg(&dest),
    )?;
    Ok(dest)
}

fn run_tool(tool: &'static str, command: &mut Command) -> Result<(), StageError> {
    let output = command.output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StageError::ToolNotFound { tool }
        } else {
            StageError::Io(e)
        }
    })?;
    if !output.status.success() {
        return Err(StageError::ToolFailed {
            tool,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// Find the directory holding the rtpdump files: archives may nest the
/// segments under a top-level folder.
fn locate_segments_dir(root: &Path) -> Result<PathBuf, StageError> {
    let mut queue = vec![root.to_path_buf()];
    while let Some(dir) = queue.pop() {
        let mut subdirs = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "rtpdump") {
                return Ok(dir);
            }
            if path.is_dir() {
                subdirs.push(path);
            }
        }
        queue.extend(subdirs);
    }
    Err(StageError::NoSegments(root.to_path_buf()))
}
