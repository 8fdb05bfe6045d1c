use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

pub mod filter;
pub mod parser;

pub use filter::{filter_media_class, filter_tracks, MediaClass};
pub use parser::parse_directory;

/// Media class of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Opus,
    Vp8,
    Vp9,
    H264,
    Av1,
}

impl Codec {
    /// Encoding name as it appears in an SDP rtpmap attribute.
    pub fn from_rtpmap_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "opus" => Some(Codec::Opus),
            "vp8" => Some(Codec::Vp8),
            "vp9" => Some(Codec::Vp9),
            "h264" => Some(Codec::H264),
            "av1" | "av1x" => Some(Codec::Av1),
            _ => None,
        }
    }

    pub fn rtpmap_name(&self) -> &'static str {
        match self {
            Codec::Opus => "opus",
            Codec::Vp8 => "VP8",
            Codec::Vp9 => "VP9",
            Codec::H264 => "H264",
            Codec::Av1 => "AV1",
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Codec::Opus)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rtpmap_name())
    }
}

/// First RTCP sender report seen in a dump: maps the RTP clock onto wall time.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SenderReportTime {
    pub ntp_unix_ms: u64,
    pub rtp_timestamp: u32,
}

/// One contiguous capture interval of a track, backed by one rtpdump/sdp pair.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentMetadata {
    pub base_filename: String,
    #[serde(skip)]
    pub dump_path: PathBuf,
    #[serde(skip)]
    pub sdp_path: PathBuf,
    pub ssrc: u32,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub channels: u8,
    pub codec: Codec,
    pub packet_count: u64,
    pub first_rtp_timestamp: u32,
    pub last_rtp_timestamp: u32,
    /// Wall-clock time of the first/last RTP packet, unix epoch milliseconds.
    pub first_unix_ms: u64,
    pub last_unix_ms: u64,
    pub sender_report: Option<SenderReportTime>,
    /// RTP-clock duration vs wall-clock duration, parts per million.
    pub clock_drift_ppm: f64,
}

impl SegmentMetadata {
    pub fn wallclock_duration_ms(&self) -> u64 {
        self.last_unix_ms.saturating_sub(self.first_unix_ms)
    }
}

/// One media track for one user/session. Segments are ordered by their
/// first-packet wall-clock timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TrackInfo {
    pub user_id: String,
    pub session_id: String,
    pub track_id: String,
    pub kind: TrackKind,
    pub is_screenshare: bool,
    pub segments: Vec<SegmentMetadata>,
    #[serde(skip)]
    pub concatenated_path: Option<PathBuf>,
}

impl TrackInfo {
    /// Wall-clock timestamp of the very first packet across all segments.
    pub fn first_unix_ms(&self) -> Option<u64> {
        self.segments.first().map(|s| s.first_unix_ms)
    }

    pub fn last_unix_ms(&self) -> Option<u64> {
        self.segments.last().map(|s| s.last_unix_ms)
    }

    /// Stable identity string used in log fields and output filenames.
    pub fn label(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.kind, self.user_id, self.session_id, self.track_id
        )
    }

    /// Final per-track output filename, e.g. `audio_alice_s1_t0.webm`.
    /// H264 is the one codec that goes into MP4 instead of WebM.
    pub fn output_filename(&self) -> String {
        let ext = match self.segments.first().map(|s| s.codec) {
            Some(Codec::H264) => "mp4",
            _ => "webm",
        };
        format!("{}.{ext}", self.label())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordingMetadata {
    pub tracks: Vec<TrackInfo>,
}

impl RecordingMetadata {
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Compatibility shim: recover (kind, user, session, track) from a
/// filename that follows the output convention. Structured `TrackInfo`
/// is the source of truth everywhere in the pipeline; this exists only
/// for matching files already sitting in an output directory.
pub fn parse_output_filename(name: &str) -> Option<(TrackKind, String, String, String)> {
    let stem = name.strip_suffix(".webm").or_else(|| name.strip_suffix(".mp4"))?;
    let mut parts = stem.splitn(4, '_');
    let kind = match parts.next()? {
        "audio" => TrackKind::Audio,
        "video" => TrackKind::Video,
        _ => return None,
    };
    let user = parts.next()?.to_string();
    let session = parts.next()?.to_string();
    let track = parts.next()?.to_string();
    Some((kind, user, session, track))
}
