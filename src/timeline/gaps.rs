use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::ffmpeg::{self, format_secs, FfmpegError};
use crate::metadata::{Codec, SegmentMetadata, TrackInfo, TrackKind};

/// Synthesized video fillers use a fixed geometry; the capture's own
/// resolution is not recorded in the metadata.
const FILLER_RESOLUTION: &str = "640x480";
const FILLER_FRAME_RATE: u32 = 30;

#[derive(Debug, Error)]
pub enum GapError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ffmpeg error: {0}")]
    Ffmpeg(#[from] FfmpegError),
    #[error("track has no segment files")]
    NoSegments,
    #[error("segment file count {files} does not match metadata segment count {segments}")]
    SegmentMismatch { files: usize, segments: usize },
}

/// Timing gap between two adjacent segments, clamped at zero.
pub fn gap_between(current: &SegmentMetadata, next: &SegmentMetadata) -> u64 {
    next.first_unix_ms.saturating_sub(current.last_unix_ms)
}

/// Splice a track's per-segment container files into one continuous
/// per-track file. With `fill_gaps`, inter-segment timing gaps are
/// bridged with synthesized silence (audio) or black frames (video);
/// filler files live in `scratch` and are removed after a successful
/// concatenation.
pub fn concatenate_track(
    track: &TrackInfo,
    segment_files: &[PathBuf],
    fill_gaps: bool,
    scratch: &Path,
    output: &Path,
) -> Result<(), GapError> {
    if segment_files.is_empty() {
        return Err(GapError::NoSegments);
    }
    if segment_files.len() != track.segments.len() {
        return Err(GapError::SegmentMismatch {
            files: segment_files.len(),
            segments: track.segments.len(),
        });
    }

    if segment_files.len() == 1 {
        // Nothing to bridge; the single segment becomes the track file.
        move_file(&segment_files[0], output)?;
        return Ok(());
    }

    let codec = track.segments[0].codec;
    let mut parts: Vec<PathBuf> = Vec::new();
    let mut fillers: Vec<PathBuf> = Vec::new();

    for (i, file) in segment_files.iter().enumerate() {
        if i > 0 && fill_gaps {
            let gap_ms = gap_between(&track.segments[i - 1], &track.segments[i]);
            if gap_ms > 0 {
                let ext = if codec == Codec::H264 { "mp4" } else { "webm" };
                let filler = scratch.join(format!("{}_gap{}.{ext}", track.label(), i));
                synthesize_filler(track.kind, codec, gap_ms, &filler)?;
                tracing::info!(
                    track = %track.label(),
                    gap_ms = gap_ms,
                    "filling inter-segment gap"
                );
                parts.push(filler.clone());
                fillers.push(filler);
            }
        }
        parts.push(file.clone());
    }

    let list_path = scratch.join(format!("{}_concat.txt", track.label()));
    std::fs::write(&list_path, concat_list(&parts))?;
    ffmpeg::run([
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        list_path.display().to_string(),
        "-c".to_string(),
        "copy".to_string(),
        output.display().to_string(),
    ])?;

    let _ = std::fs::remove_file(&list_path);
    for filler in fillers {
        let _ = std::fs::remove_file(filler);
    }
    Ok(())
}

/// ffmpeg arguments generating one filler file of `gap_ms` duration.
pub fn filler_args(kind: TrackKind, codec: Codec, gap_ms: u64, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec!["-f".into(), "lavfi".into(), "-i".into()];
    match kind {
        TrackKind::Audio => {
            args.push("anullsrc=channel_layout=stereo:sample_rate=48000".into());
            args.extend(["-t".into(), format_secs(gap_ms)]);
            args.extend(["-c:a".into(), "libopus".into()]);
        }
        TrackKind::Video => {
            args.push(format!(
                "color=black:size={FILLER_RESOLUTION}:rate={FILLER_FRAME_RATE}"
            ));
            args.extend(["-t".into(), format_secs(gap_ms)]);
            let encoder = match codec {
                Codec::Vp9 => "libvpx-vp9",
                Codec::H264 => "libx264",
                Codec::Av1 => "libaom-av1",
                _ => "libvpx",
            };
            args.extend(["-c:v".into(), encoder.into()]);
        }
    }
    let muxer = if codec == Codec::H264 { "mp4" } else { "webm" };
    args.extend(["-f".into(), muxer.into()]);
    args.push(output.display().to_string());
    args
}

fn synthesize_filler(
    kind: TrackKind,
    codec: Codec,
    gap_ms: u64,
    output: &Path,
) -> Result<(), FfmpegError> {
    ffmpeg::run(filler_args(kind, codec, gap_ms, output))
}

/// Concat-demuxer list file contents. Single quotes inside paths follow
/// the demuxer's `'\''` escape.
fn concat_list(parts: &[PathBuf]) -> String {
    let mut out = String::new();
    for part in parts {
        let escaped = part.display().to_string().replace('\'', "'\\''");
        out.push_str(&format!("file '{escaped}'\n"));
    }
    out
}

fn move_file(from: &Path, to: &Path) -> Result<(), std::io::Error> {
    if std::fs::rename(from, to).is_err() {
        // Scratch and output may sit on different filesystems.
        std::fs::copy(from, to)?;
        std::fs::remove_file(from)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::sync::tests::track_starting_at;

    fn segment_at(first_unix_ms: u64, last_unix_ms: u64) -> SegmentMetadata {
        let mut track = track_starting_at("x", first_unix_ms);
        let mut seg = track.segments.remove(0);
        seg.last_unix_ms = last_unix_ms;
        seg
    }

    #[test]
    fn test_gap_between_clamps_at_zero() {
        let a = segment_at(1_000_000, 1_010_000);
        let b = segment_at(1_012_500, 1_020_000);
        assert_eq!(gap_between(&a, &b), 2500);
        // Overlapping segments have no gap
        assert_eq!(gap_between(&b, &a), 0);
    }

    #[test]
    fn test_concat_list_escaping() {
        let list = concat_list(&[
            PathBuf::from("/tmp/a.webm"),
            PathBuf::from("/tmp/it's.webm"),
        ]);
        assert_eq!(list, "file '/tmp/a.webm'\nfile '/tmp/it'\\''s.webm'\n");
    }

    #[test]
    fn test_filler_args_audio() {
        let args = filler_args(
            TrackKind::Audio,
            Codec::Opus,
            2500,
            Path::new("/tmp/gap.webm"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("anullsrc=channel_layout=stereo:sample_rate=48000"));
        assert!(joined.contains("-t 2.500"));
        assert!(joined.contains("-c:a libopus"));
        assert!(joined.contains("-f webm"));
    }

    #[test]
    fn test_filler_args_video_codecs() {
        let vp9 = filler_args(TrackKind::Video, Codec::Vp9, 100, Path::new("g.webm"));
        assert!(vp9.join(" ").contains("-c:v libvpx-vp9"));
        assert!(vp9.join(" ").contains("color=black:size=640x480:rate=30"));

        let h264 = filler_args(TrackKind::Video, Codec::H264, 100, Path::new("g.mp4"));
        assert!(h264.join(" ").contains("-c:v libx264"));
        assert!(h264.join(" ").contains("-f mp4"));
    }

    #[test]
    fn test_single_segment_is_renamed_regardless_of_fill_mode() {
        for fill_gaps in [false, true] {
            let dir = tempfile::tempdir().unwrap();
            let seg_file = dir.path().join("seg0.webm");
            std::fs::write(&seg_file, b"segment-bytes").unwrap();
            let output = dir.path().join("audio_x_s1_t0.webm");

            let track = track_starting_at("x", 1_000_000);
            concatenate_track(&track, &[seg_file], fill_gaps, dir.path(), &output).unwrap();

            // Identical output whether or not gap filling was requested
            assert_eq!(std::fs::read(&output).unwrap(), b"segment-bytes");
        }
    }

    #[test]
    fn test_segment_file_count_must_match_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let track = track_starting_at("x", 1_000_000);
        let err = concatenate_track(
            &track,
            &[dir.path().join("a.webm"), dir.path().join("b.webm")],
            false,
            dir.path(),
            &dir.path().join("out.webm"),
        )
        .err()
        .unwrap();
        assert!(matches!(err, GapError::SegmentMismatch { files: 2, segments: 1 }));
    }
}
