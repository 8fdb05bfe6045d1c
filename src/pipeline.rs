use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;

use crate::encoder::recorder::RecordError;
use crate::encoder::{record_segment, sdp, Encoder, EncoderError, FfmpegEncoder};
use crate::metadata::{
    filter_media_class, filter_tracks, MediaClass, RecordingMetadata, SegmentMetadata, TrackInfo,
    TrackKind,
};
use crate::mixer::{self, MixError, MIXED_OUTPUT_FILENAME};
use crate::muxer::{self, MuxError};
use crate::timeline::gaps::GapError;
use crate::timeline::{concatenate_track, sync};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no tracks matched the filter criteria")]
    NoMatchingTracks,
    #[error("no audio files were extracted - check filter criteria")]
    NoAudioExtracted,
    #[error("no video files were extracted - check filter criteria")]
    NoVideoExtracted,
    #[error(transparent)]
    Mix(#[from] MixError),
}

/// Why one track of a batch failed. The batch itself keeps going.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error(transparent)]
    Gap(#[from] GapError),
    #[error(transparent)]
    Mux(#[from] MuxError),
}

#[derive(Debug)]
pub struct TrackOutput {
    pub track: TrackInfo,
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct TrackFailure {
    pub label: String,
    pub error: TrackError,
}

/// Outcome of one batch stage: every selected unit lands either in
/// `outputs` or in `failures`, so callers and tests can inspect exactly
/// what failed instead of scraping logs.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outputs: Vec<TrackOutput>,
    pub failures: Vec<TrackFailure>,
}

impl BatchReport {
    fn log_summary(&self, stage: &str) {
        tracing::info!(
            stage = stage,
            produced = self.outputs.len(),
            failed = self.failures.len(),
            "stage complete"
        );
    }
}

pub struct RunOptions {
    pub user_id: String,
    pub session_id: String,
    pub track_id: String,
    pub media: MediaClass,
    pub output_dir: PathBuf,
}

type EncoderFactory =
    Box<dyn Fn(&SegmentMetadata, TrackKind, &Path) -> Result<Box<dyn Encoder>, EncoderError>>;

/// Sequences parsing, filtering, conversion, gap filling, mixing and
/// muxing into the user-facing operations. Per-track work runs with
/// continue-on-error semantics; configuration and empty-result problems
/// abort the whole command.
pub struct Pipeline {
    metadata: RecordingMetadata,
    options: RunOptions,
    scratch: TempDir,
    encoder_factory: EncoderFactory,
}

impl Pipeline {
    pub fn new(metadata: RecordingMetadata, options: RunOptions) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(&options.output_dir)?;
        // Scratch lives next to the outputs so renames stay on one
        // filesystem; the TempDir cleans itself up on drop.
        let scratch = TempDir::with_prefix_in(".rawrec-", &options.output_dir)?;
        Ok(Self {
            metadata,
            options,
            scratch,
            encoder_factory: Box::new(|segment, kind, output| {
                Ok(Box::new(FfmpegEncoder::start(segment, kind, output)?))
            }),
        })
    }

    #[cfg(test)]
    pub fn with_encoder_factory(mut self, factory: EncoderFactory) -> Self {
        self.encoder_factory = factory;
        self
    }

    fn selected_tracks(&self, kind: TrackKind, media: MediaClass) -> Vec<TrackInfo> {
        let tracks = filter_tracks(
            &self.metadata.tracks,
            &self.options.user_id,
            &self.options.session_id,
            &self.options.track_id,
        );
        let tracks = filter_media_class(&tracks, media);
        tracks.into_iter().filter(|t| t.kind == kind).collect()
    }

    /// Convert every selected track of `kind` into one continuous
    /// per-track container file in the output directory.
    pub fn extract(
        &self,
        kind: TrackKind,
        media: MediaClass,
        fill_gaps: bool,
    ) -> Result<BatchReport, PipelineError> {
        let tracks = self.selected_tracks(kind, media);
        if tracks.is_empty() {
            return Err(PipelineError::NoMatchingTracks);
        }

        let mut report = BatchReport::default();
        for mut track in tracks {
            match self.convert_track(&track, fill_gaps) {
                Ok(path) => {
                    track.concatenated_path = Some(path.clone());
                    report.outputs.push(TrackOutput { track, path });
                }
                Err(error) => {
                    tracing::error!(
                        track = %track.label(),
                        error = %error,
                        "track conversion failed, continuing"
                    );
                    report.failures.push(TrackFailure {
                        label: track.label(),
                        error,
                    });
                }
            }
        }
        report.log_summary(&format!("extract-{kind}"));
        Ok(report)
    }

    fn convert_track(&self, track: &TrackInfo, fill_gaps: bool) -> Result<PathBuf, TrackError> {
        let track_scratch = self.scratch.path().join(track.label());
        std::fs::create_dir_all(&track_scratch)?;

        let mut segment_files = Vec::with_capacity(track.segments.len());
        for (i, segment) in track.segments.iter().enumerate() {
            let (ext, _) = sdp::container_for(segment.codec);
            let seg_file = track_scratch.join(format!("seg{i}.{ext}"));
            let encoder = (self.encoder_factory)(segment, track.kind, &seg_file)?;
            record_segment(segment, track.kind, encoder)?;
            segment_files.push(seg_file);
        }

        let output = self.options.output_dir.join(track.output_filename());
        concatenate_track(track, &segment_files, fill_gaps, &track_scratch, &output)?;
        tracing::info!(
            track = %track.label(),
            segments = track.segments.len(),
            output = %output.display(),
            "track extracted"
        );
        Ok(output)
    }

    /// Extract all matching audio tracks and mix them into one file,
    /// each shifted by its start offset against the earliest track.
    pub fn mix_audio(&self, fill_gaps: bool) -> Result<PathBuf, PipelineError> {
        let report = self.extract(TrackKind::Audio, self.options.media, fill_gaps)?;
        if report.outputs.is_empty() {
            return Err(PipelineError::NoAudioExtracted);
        }

        let files: Vec<PathBuf> = report.outputs.iter().map(|o| o.path.clone()).collect();
        let tracks: Vec<TrackInfo> = report.outputs.iter().map(|o| o.track.clone()).collect();
        let inputs = mixer::discover_inputs(&files, &tracks);

        let output = self.options.output_dir.join(MIXED_OUTPUT_FILENAME);
        mixer::mix(&inputs, &output)?;
        tracing::info!(
            inputs = inputs.len(),
            failed_tracks = report.failures.len(),
            output = %output.display(),
            "audio mixdown complete"
        );
        Ok(output)
    }

    /// Extract matching audio and video tracks, then mux each
    /// corresponding pair into one container. Pair failures are
    /// reported, not fatal.
    pub fn mux_av(&self) -> Result<BatchReport, PipelineError> {
        let audio = self.extract(TrackKind::Audio, self.options.media, true)?;
        if audio.outputs.is_empty() {
            return Err(PipelineError::NoAudioExtracted);
        }
        let video = self.extract(TrackKind::Video, self.options.media, true)?;
        if video.outputs.is_empty() {
            return Err(PipelineError::NoVideoExtracted);
        }

        let mut report = BatchReport::default();
        for (audio_out, video_out) in pair_outputs(&audio.outputs, &video.outputs) {
            let offset = sync::offset_ms(&audio_out.track, &video_out.track);
            let ext = video_out
                .path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("webm");
            let output = self.options.output_dir.join(format!(
                "muxed_{}_{}_{}.{ext}",
                video_out.track.user_id, video_out.track.session_id, video_out.track.track_id
            ));
            match muxer::mux_pair(&audio_out.path, &video_out.path, offset, &output) {
                Ok(()) => report.outputs.push(TrackOutput {
                    track: video_out.track.clone(),
                    path: output,
                }),
                Err(error) => {
                    tracing::error!(
                        audio = %audio_out.track.label(),
                        video = %video_out.track.label(),
                        error = %error,
                        "mux failed for pair, continuing"
                    );
                    report.failures.push(TrackFailure {
                        label: video_out.track.label(),
                        error: error.into(),
                    });
                }
            }
        }
        report.log_summary("mux-av");
        Ok(report)
    }

    /// extract-audio, extract-video, then mux every pair. Extracted
    /// per-track files are kept alongside the muxed outputs.
    pub fn process_all(&self) -> Result<BatchReport, PipelineError> {
        self.mux_av()
    }
}

/// Match audio and video outputs of the same (user, session), in track-id
/// order. Unpaired leftovers are logged and dropped.
fn pair_outputs<'a>(
    audio: &'a [TrackOutput],
    video: &'a [TrackOutput],
) -> Vec<(&'a TrackOutput, &'a TrackOutput)> {
    let mut by_session: BTreeMap<(&str, &str), (Vec<&TrackOutput>, Vec<&TrackOutput>)> =
        BTreeMap::new();
    for out in audio {
        by_session
            .entry((&out.track.user_id, &out.track.session_id))
            .or_default()
            .0
            .push(out);
    }
    for out in video {
        by_session
            .entry((&out.track.user_id, &out.track.session_id))
            .or_default()
            .1
            .push(out);
    }

    let mut pairs = Vec::new();
    for ((user, session), (mut audios, mut videos)) in by_session {
        audios.sort_by(|a, b| a.track.track_id.cmp(&b.track.track_id));
        videos.sort_by(|a, b| a.track.track_id.cmp(&b.track.track_id));
        let paired = audios.len().min(videos.len());
        if audios.len() != videos.len() {
            tracing::warn!(
                user = user,
                session = session,
                audio = audios.len(),
                video = videos.len(),
                "unbalanced audio/video track counts, pairing the first matching ones"
            );
        }
        for i in 0..paired {
            pairs.push((audios[i], videos[i]));
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::dump::testutil::dump_bytes;
    use crate::rtp::packet::testutil::rtp_bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const OPUS_SDP: &str =
        "m=audio 5004 RTP/AVP 111\r\na=rtpmap:111 opus/48000/2\r\n";

    /// Captures pushed packets and writes their sequence numbers to the
    /// output file on close, so tests can assert ordering end to end.
    struct FakeEncoder {
        output: PathBuf,
        sequences: Vec<u16>,
    }

    impl Encoder for FakeEncoder {
        fn push_rtp_buf(&mut self, buf: &[u8]) -> Result<(), EncoderError> {
            let seq = u16::from_be_bytes([buf[2], buf[3]]);
            self.sequences.push(seq);
            Ok(())
        }

        fn close(self: Box<Self>) -> Result<(), EncoderError> {
            assert!(self.sequences.windows(2).all(|w| w[0] < w[1]));
            std::fs::write(
                &self.output,
                format!("{} packets", self.sequences.len()),
            )?;
            Ok(())
        }
    }

    fn write_segment(dir: &Path, stem: &str, start_ms: u64, ssrc: u32) {
        let entries: Vec<(u32, Vec<u8>, bool)> = (0u32..5)
            .map(|i| {
                (
                    i * 20,
                    rtp_bytes(i as u16, i * 960, ssrc, &[0x48, 0xAA]),
                    false,
                )
            })
            .collect();
        std::fs::write(
            dir.join(format!("{stem}.rtpdump")),
            dump_bytes(start_ms, &entries),
        )
        .unwrap();
        std::fs::write(dir.join(format!("{stem}.sdp")), OPUS_SDP).unwrap();
    }

    fn pipeline_for(input: &Path, output: &Path) -> Pipeline {
        let metadata = crate::metadata::parse_directory(input).unwrap();
        Pipeline::new(
            metadata,
            RunOptions {
                user_id: "*".to_string(),
                session_id: "*".to_string(),
                track_id: "*".to_string(),
                media: MediaClass::User,
                output_dir: output.to_path_buf(),
            },
        )
        .unwrap()
        .with_encoder_factory(Box::new(|_, _, out| {
            Ok(Box::new(FakeEncoder {
                output: out.to_path_buf(),
                sequences: Vec::new(),
            }))
        }))
    }

    #[test]
    fn test_extract_produces_one_file_per_matching_track() {
        let input = tempfile::tempdir().unwrap();
        write_segment(input.path(), "audio_user123_s1_t0", 1_000_000, 1);
        write_segment(input.path(), "audio_user123_s2_t0", 2_000_000, 2);
        write_segment(input.path(), "audio_other_s1_t0", 1_500_000, 3);

        let output = tempfile::tempdir().unwrap();
        let metadata = crate::metadata::parse_directory(input.path()).unwrap();
        let pipeline = Pipeline::new(
            metadata,
            RunOptions {
                user_id: "user123".to_string(),
                session_id: "*".to_string(),
                track_id: "*".to_string(),
                media: MediaClass::User,
                output_dir: output.path().to_path_buf(),
            },
        )
        .unwrap()
        .with_encoder_factory(Box::new(|_, _, out| {
            Ok(Box::new(FakeEncoder {
                output: out.to_path_buf(),
                sequences: Vec::new(),
            }))
        }));

        let report = pipeline
            .extract(TrackKind::Audio, MediaClass::User, true)
            .unwrap();
        assert_eq!(report.outputs.len(), 2);
        assert!(report.failures.is_empty());
        for out in &report.outputs {
            assert!(out.path.exists());
            assert!(out
                .path
                .file_name()
                .unwrap()
                .to_str()
                .unwrap()
                .contains("user123"));
        }
    }

    #[test]
    fn test_extract_continues_past_failing_track() {
        let input = tempfile::tempdir().unwrap();
        write_segment(input.path(), "audio_alice_s1_t0", 1_000_000, 1);
        write_segment(input.path(), "audio_bob_s1_t0", 1_000_000, 2);

        let output = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_factory = Arc::clone(&calls);

        let metadata = crate::metadata::parse_directory(input.path()).unwrap();
        let pipeline = Pipeline::new(
            metadata,
            RunOptions {
                user_id: "*".to_string(),
                session_id: "*".to_string(),
                track_id: "*".to_string(),
                media: MediaClass::User,
                output_dir: output.path().to_path_buf(),
            },
        )
        .unwrap()
        .with_encoder_factory(Box::new(move |segment, _, out| {
            calls_in_factory.fetch_add(1, Ordering::SeqCst);
            if segment.ssrc == 1 {
                // First track's encoder refuses to start
                return Err(EncoderError::ExitedEarly("exit status: 1".to_string()));
            }
            Ok(Box::new(FakeEncoder {
                output: out.to_path_buf(),
                sequences: Vec::new(),
            }))
        }));

        let report = pipeline
            .extract(TrackKind::Audio, MediaClass::User, true)
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.outputs.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].label, "audio_alice_s1_t0");
    }

    #[test]
    fn test_extract_with_no_matching_tracks_is_fatal() {
        let input = tempfile::tempdir().unwrap();
        write_segment(input.path(), "audio_alice_s1_t0", 1_000_000, 1);
        let output = tempfile::tempdir().unwrap();

        let metadata = crate::metadata::parse_directory(input.path()).unwrap();
        let pipeline = Pipeline::new(
            metadata,
            RunOptions {
                user_id: "nobody".to_string(),
                session_id: "*".to_string(),
                track_id: "*".to_string(),
                media: MediaClass::User,
                output_dir: output.path().to_path_buf(),
            },
        )
        .unwrap();

        let err = pipeline
            .extract(TrackKind::Audio, MediaClass::User, true)
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::NoMatchingTracks));
    }

    #[test]
    fn test_pair_outputs_by_session_and_track_order() {
        let input = tempfile::tempdir().unwrap();
        write_segment(input.path(), "audio_alice_s1_t0", 1_000_000, 1);
        let output = tempfile::tempdir().unwrap();
        let pipeline = pipeline_for(input.path(), output.path());
        let report = pipeline
            .extract(TrackKind::Audio, MediaClass::User, true)
            .unwrap();

        let audio = &report.outputs;
        let mut video_track = audio[0].track.clone();
        video_track.kind = TrackKind::Video;
        let video = vec![TrackOutput {
            track: video_track,
            path: PathBuf::from("video_alice_s1_t0.webm"),
        }];

        let pairs = pair_outputs(audio, &video);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0.track.kind, TrackKind::Audio);
        assert_eq!(pairs[0].1.track.kind, TrackKind::Video);

        // No video for a different session
        let mut other_session = video;
        other_session[0].track.session_id = "s9".to_string();
        assert!(pair_outputs(audio, &other_session).is_empty());
    }
}
