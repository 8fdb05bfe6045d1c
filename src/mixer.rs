use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::ffmpeg::{self, FfmpegError};
use crate::metadata::{parse_output_filename, TrackInfo};
use crate::timeline::sync;

pub const MIXED_OUTPUT_FILENAME: &str = "mixed_audio.webm";

#[derive(Debug, Error)]
pub enum MixError {
    #[error("no audio files matched the filter criteria")]
    NoInputs,
    #[error("ffmpeg error: {0}")]
    Ffmpeg(#[from] FfmpegError),
}

/// One extracted audio file and its start offset relative to the
/// earliest track in the mix.
#[derive(Debug, Clone)]
pub struct MixInput {
    pub path: PathBuf,
    pub offset_ms: u64,
}

/// Match extracted per-track audio files back to their tracks and derive
/// per-file start offsets against the earliest track. Identity is
/// recovered through the filename shim only to pair file with track;
/// all timing comes from the structured metadata. Files with no matching
/// track are mixed at offset zero with a warning.
pub fn discover_inputs(files: &[PathBuf], tracks: &[TrackInfo]) -> Vec<MixInput> {
    let matched: Vec<(&PathBuf, Option<&TrackInfo>)> = files
        .iter()
        .map(|path| {
            let track = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_output_filename)
                .and_then(|(kind, user, session, track_id)| {
                    tracks.iter().find(|t| {
                        t.kind == kind
                            && t.user_id == user
                            && t.session_id == session
                            && t.track_id == track_id
                    })
                });
            (path, track)
        })
        .collect();

    let known: Vec<&TrackInfo> = matched.iter().filter_map(|(_, t)| *t).collect();
    let reference = sync::earliest(&known);

    matched
        .into_iter()
        .map(|(path, track)| {
            let offset_ms = match (track, reference) {
                (Some(track), Some(reference)) => sync::offset_ms(track, reference).max(0) as u64,
                _ => {
                    tracing::warn!(
                        file = %path.display(),
                        "no track metadata for file, mixing at zero offset"
                    );
                    0
                }
            };
            MixInput {
                path: path.clone(),
                offset_ms,
            }
        })
        .collect()
}

/// Overlay all inputs into one Opus mixdown, each shifted by its offset.
pub fn mix(inputs: &[MixInput], output: &Path) -> Result<(), MixError> {
    if inputs.is_empty() {
        return Err(MixError::NoInputs);
    }
    tracing::info!(inputs = inputs.len(), output = %output.display(), "mixing audio");
    ffmpeg::run(mix_args(inputs, output))?;
    Ok(())
}

/// ffmpeg arguments: per-input `adelay` for the start offset, then one
/// `amix` across all delayed streams, re-encoded to Opus.
pub fn mix_args(inputs: &[MixInput], output: &Path) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    for input in inputs {
        args.extend(["-i".to_string(), input.path.display().to_string()]);
    }

    let mut filter = String::new();
    for (i, input) in inputs.iter().enumerate() {
        filter.push_str(&format!(
            "[{i}:a]adelay={ms}|{ms}[a{i}];",
            ms = input.offset_ms
        ));
    }
    for i in 0..inputs.len() {
        filter.push_str(&format!("[a{i}]"));
    }
    filter.push_str(&format!(
        "amix=inputs={}:duration=longest:normalize=0[mix]",
        inputs.len()
    ));

    args.extend(["-filter_complex".to_string(), filter]);
    args.extend(["-map".to_string(), "[mix]".to_string()]);
    args.extend(["-c:a".to_string(), "libopus".to_string()]);
    args.push(output.display().to_string());
    args
}
