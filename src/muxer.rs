use std::path::Path;

use thiserror::Error;

use crate::ffmpeg::{self, format_secs, FfmpegError};

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("ffmpeg error: {0}")]
    Ffmpeg(#[from] FfmpegError),
}

/// Interleave one audio and one video file into a single container,
/// shifting the later-starting stream by `audio_offset_ms` (audio start
/// minus video start, from the sync calculator).
pub fn mux_pair(
    audio: &Path,
    video: &Path,
    audio_offset_ms: i64,
    output: &Path,
) -> Result<(), MuxError> {
    tracing::info!(
        audio = %audio.display(),
        video = %video.display(),
        offset_ms = audio_offset_ms,
        output = %output.display(),
        "muxing pair"
    );
    ffmpeg::run(mux_args(audio, video, audio_offset_ms, output))?;
    Ok(())
}

/// `-itsoffset` applies to the input that follows it, so the
/// later-starting stream is listed with its shift and the other plain.
pub fn mux_args(audio: &Path, video: &Path, audio_offset_ms: i64, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    if audio_offset_ms >= 0 {
        args.extend(["-i".to_string(), video.display().to_string()]);
        args.extend([
            "-itsoffset".to_string(),
            format_secs(audio_offset_ms as u64),
        ]);
        args.extend(["-i".to_string(), audio.display().to_string()]);
        args.extend(["-map".to_string(), "0:v".to_string()]);
        args.extend(["-map".to_string(), "1:a".to_string()]);
    } else {
        args.extend(["-i".to_string(), audio.display().to_string()]);
        args.extend([
            "-itsoffset".to_string(),
            format_secs(audio_offset_ms.unsigned_abs()),
        ]);
        args.extend(["-i".to_string(), video.display().to_string()]);
        args.extend(["-map".to_string(), "1:v".to_string()]);
        args.extend(["-map".to_string(), "0:a".to_string()]);
    }
    args.extend(["-c".to_string(), "copy".to_string()]);
    args.push(output.display().to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_mux_args_audio_starts_later() {
        let args = mux_args(
            &PathBuf::from("a.webm"),
            &PathBuf::from("v.webm"),
            750,
            &PathBuf::from("muxed.webm"),
        );
        let joined = args.join(" ");
        // The offset precedes the audio input
        assert!(joined.contains("-i v.webm -itsoffset 0.750 -i a.webm"));
        assert!(joined.contains("-map 0:v"));
        assert!(joined.contains("-map 1:a"));
        assert!(joined.contains("-c copy"));
    }

    #[test]
    fn test_mux_args_video_starts_later() {
        let args = mux_args(
            &PathBuf::from("a.webm"),
            &PathBuf::from("v.webm"),
            -250,
            &PathBuf::from("muxed.webm"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-i a.webm -itsoffset 0.250 -i v.webm"));
        assert!(joined.contains("-map 1:v"));
        assert!(joined.contains("-map 0:a"));
    }
}
