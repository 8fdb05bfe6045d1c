use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::rtp::{parse_sender_report, DumpReader, RtpPacket};

use super::{Codec, RecordingMetadata, SegmentMetadata, SenderReportTime, TrackInfo, TrackKind};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Scan a working directory of `<kind>_<user>_<session>_<track>[...]`
/// rtpdump/sdp pairs and build the recording metadata. Pairs that cannot
/// be parsed are logged and skipped; only filesystem-level failures are
/// errors.
pub fn parse_directory<P: AsRef<Path>>(dir: P) -> Result<RecordingMetadata, ParseError> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(ParseError::NotADirectory(dir.to_path_buf()));
    }

    let mut dumps: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "rtpdump"))
        .collect();
    dumps.sort();

    let mut groups: BTreeMap<(String, String, String, TrackKind), TrackInfo> = BTreeMap::new();

    for dump_path in dumps {
        let Some(stem) = dump_path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(identity) = SegmentIdentity::from_stem(stem) else {
            tracing::warn!(file = %dump_path.display(), "filename does not match the segment convention, skipping");
            continue;
        };

        let sdp_path = dump_path.with_extension("sdp");
        if !sdp_path.is_file() {
            tracing::warn!(file = %dump_path.display(), "no matching .sdp file, skipping");
            continue;
        }

        let segment = match read_segment(&dump_path, &sdp_path, stem) {
            Ok(seg) => seg,
            Err(e) => {
                tracing::warn!(file = %dump_path.display(), error = %e, "skipping unreadable segment");
                continue;
            }
        };

        if segment.codec.is_audio() != (identity.kind == TrackKind::Audio) {
            tracing::warn!(
                file = %dump_path.display(),
                codec = %segment.codec,
                kind = %identity.kind,
                "codec does not match the track kind, skipping"
            );
            continue;
        }

        let key = (
            identity.user_id.clone(),
            identity.session_id.clone(),
            identity.track_id.clone(),
            identity.kind,
        );
        groups
            .entry(key)
            .or_insert_with(|| TrackInfo {
                user_id: identity.user_id,
                session_id: identity.session_id,
                track_id: identity.track_id,
                kind: identity.kind,
                is_screenshare: identity.is_screenshare,
                segments: Vec::new(),
                concatenated_path: None,
            })
            .segments
            .push(segment);
    }

    let mut tracks: Vec<TrackInfo> = groups.into_values().collect();
    for track in &mut tracks {
        track.segments.sort_by_key(|s| s.first_unix_ms);
    }

    tracing::info!(tracks = tracks.len(), "parsed recording metadata");
    Ok(RecordingMetadata { tracks })
}

struct SegmentIdentity {
    kind: TrackKind,
    user_id: String,
    session_id: String,
    track_id: String,
    is_screenshare: bool,
}

impl SegmentIdentity {
    /// `<kind>_<userId>_<sessionId>_<trackId>[_<discriminator>...]`.
    /// Components past the track id distinguish segments of the same
    /// track and are not part of its identity; a `screen` component
    /// anywhere after the session id marks a screen share.
    fn from_stem(stem: &str) -> Option<Self> {
        let parts: Vec<&str> = stem.split('_').collect();
        if parts.len() < 4 {
            return None;
        }
        let kind = match parts[0] {
            "audio" => TrackKind::Audio,
            "video" => TrackKind::Video,
            _ => return None,
        };
        let is_screenshare = parts[3..].iter().any(|p| *p == "screen");
        Some(Self {
            kind,
            user_id: parts[1].to_string(),
            session_id: parts[2].to_string(),
            track_id: parts[3].to_string(),
            is_screenshare,
        })
    }
}

#[derive(Debug, Error)]
enum SegmentError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dump error: {0}")]
    Dump(#[from] crate::rtp::DumpError),
    #[error("sdp has no rtpmap with a supported codec")]
    NoCodec,
    #[error("dump contains no RTP packets")]
    Empty,
}

/// Everything the SDP declares about the captured stream.
struct SdpInfo {
    codec: Codec,
    payload_type: u8,
    clock_rate: u32,
    channels: u8,
    ssrc: Option<u32>,
}

fn read_segment(
    dump_path: &Path,
    sdp_path: &Path,
    stem: &str,
) -> Result<SegmentMetadata, SegmentError> {
    let sdp_text = std::fs::read_to_string(sdp_path)?;
    let sdp = parse_sdp(&sdp_text).ok_or(SegmentError::NoCodec)?;
    let timing = scan_dump(dump_path)?;

    if let Some(declared) = sdp.ssrc {
        if declared != timing.ssrc {
            tracing::debug!(
                file = %dump_path.display(),
                sdp_ssrc = declared,
                dump_ssrc = timing.ssrc,
                "sdp and dump disagree on ssrc, using the dump"
            );
        }
    }

    let wall_ms = timing.last_unix_ms.saturating_sub(timing.first_unix_ms);
    let rtp_ms = (timing.last_rtp_timestamp.wrapping_sub(timing.first_rtp_timestamp) as u64)
        * 1000
        / sdp.clock_rate as u64;
    let clock_drift_ppm = if wall_ms > 0 {
        (rtp_ms as f64 - wall_ms as f64) / wall_ms as f64 * 1_000_000.0
    } else {
        0.0
    };

    Ok(SegmentMetadata {
        base_filename: stem.to_string(),
        dump_path: dump_path.to_path_buf(),
        sdp_path: sdp_path.to_path_buf(),
        ssrc: timing.ssrc,
        payload_type: sdp.payload_type,
        clock_rate: sdp.clock_rate,
        channels: sdp.channels,
        codec: sdp.codec,
        packet_count: timing.packet_count,
        first_rtp_timestamp: timing.first_rtp_timestamp,
        last_rtp_timestamp: timing.last_rtp_timestamp,
        first_unix_ms: timing.first_unix_ms,
        last_unix_ms: timing.last_unix_ms,
        sender_report: timing.sender_report,
        clock_drift_ppm,
    })
}

/// Pick the first rtpmap that names a codec this tool can convert.
fn parse_sdp(text: &str) -> Option<SdpInfo> {
    let mut ssrc = None;
    let mut best: Option<(Codec, u8, u32, u8)> = None;

    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("a=rtpmap:") {
            // a=rtpmap:<pt> <encoding>/<clock>[/<channels>]
            let mut fields = rest.splitn(2, ' ');
            let pt: u8 = fields.next()?.trim().parse().ok()?;
            let enc = fields.next()?.trim();
            let mut enc_parts = enc.split('/');
            let name = enc_parts.next()?;
            let clock: u32 = enc_parts.next().and_then(|c| c.parse().ok())?;
            let channels: u8 = enc_parts.next().and_then(|c| c.parse().ok()).unwrap_or(1);
            if best.is_none() {
                if let Some(codec) = Codec::from_rtpmap_name(name) {
                    best = Some((codec, pt, clock, channels));
                }
            }
        } else if let Some(rest) = line.strip_prefix("a=ssrc:") {
            if ssrc.is_none() {
                ssrc = rest.split_whitespace().next().and_then(|s| s.parse().ok());
            }
        }
    }

    best.map(|(codec, payload_type, clock_rate, channels)| SdpInfo {
        codec,
        payload_type,
        clock_rate,
        channels,
        ssrc,
    })
}

struct DumpTiming {
    ssrc: u32,
    packet_count: u64,
    first_rtp_timestamp: u32,
    last_rtp_timestamp: u32,
    first_unix_ms: u64,
    last_unix_ms: u64,
    sender_report: Option<SenderReportTime>,
}

/// Cheap pass over the dump collecting the timing facts the pipeline
/// needs; packets are parsed but payloads are not interpreted.
fn scan_dump(path: &Path) -> Result<DumpTiming, SegmentError> {
    let mut reader = DumpReader::open(path)?;
    let start_ms = reader.header().start_unix_ms;

    let mut first: Option<(u32, u32)> = None; // (rtp timestamp, offset_ms)
    let mut last: Option<(u32, u32)> = None;
    let mut ssrc = None;
    let mut packet_count = 0u64;
    let mut sender_report = None;

    while let Some(entry) = reader.next_entry()? {
        if entry.is_rtcp {
            if sender_report.is_none() {
                if let Some(sr) = parse_sender_report(&entry.payload) {
                    sender_report = Some(SenderReportTime {
                        ntp_unix_ms: sr.ntp_unix_ms,
                        rtp_timestamp: sr.rtp_timestamp,
                    });
                }
            }
            continue;
        }
        let Ok(pkt) = RtpPacket::unmarshal(&entry.payload) else {
            continue;
        };
        record_packet(&pkt, entry.offset_ms, &mut first, &mut last, &mut ssrc);
        packet_count += 1;
    }

    let (Some((first_ts, first_off)), Some((last_ts, last_off))) = (first, last) else {
        return Err(SegmentError::Empty);
    };

    Ok(DumpTiming {
        ssrc: ssrc.unwrap_or(0),
        packet_count,
        first_rtp_timestamp: first_ts,
        last_rtp_timestamp: last_ts,
        first_unix_ms: start_ms + first_off as u64,
        last_unix_ms: start_ms + last_off as u64,
        sender_report,
    })
}

fn record_packet(
    pkt: &RtpPacket,
    offset_ms: u32,
    first: &mut Option<(u32, u32)>,
    last: &mut Option<(u32, u32)>,
    ssrc: &mut Option<u32>,
) {
    if first.is_none() {
        *first = Some((pkt.timestamp, offset_ms));
        *ssrc = Some(pkt.ssrc);
    }
    *last = Some((pkt.timestamp, offset_ms));
}
