use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use thiserror::Error;

use crate::metadata::{Codec, TrackKind};

use super::dump::{DumpError, DumpReader};
use super::opus;
use super::packet::{RtpPacket, SequenceTracker};

/// Pending-packet windows bounding out-of-order tolerance and memory.
pub const AUDIO_LATENESS_WINDOW: usize = 200;
pub const VIDEO_LATENESS_WINDOW: usize = 1000;

/// Upper bound on a single synthesized DTX gap. A delta beyond this is
/// treated as a broken timestamp rather than silence to reconstruct.
const MAX_GAP_TICKS: u32 = 10 * 60 * 1000 * opus::TICKS_PER_MS;

#[derive(Debug, Error)]
pub enum ReassembleError {
    #[error("dump error: {0}")]
    Dump(#[from] DumpError),
    #[error("codec {codec} cannot appear on a {kind} track")]
    KindMismatch { codec: Codec, kind: TrackKind },
}

/// One released unit. Synthesized samples are DTX fillers created to
/// keep playback timing correct; they never masquerade as captured
/// packets in logs or stats.
#[derive(Debug, Clone)]
pub struct Sample {
    pub packet: RtpPacket,
    pub synthesized: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReassemblyStats {
    pub released: u64,
    pub synthesized: u64,
    pub skipped: u64,
}

/// Release-side state, kept explicit rather than captured in closures:
/// `last_released` drives gap detection, `inserted_count` keeps the
/// sequence numbering consistent after fillers were spliced in.
#[derive(Debug, Default)]
struct ReleaseState {
    last_released: Option<RtpPacket>,
    inserted_count: u16,
}

/// Pull-based reassembler over one rtpdump file: reorders packets inside
/// a bounded lateness window and, for Opus, synthesizes DTX fillers for
/// timing gaps. Produces a lazy, finite, non-restartable sequence of
/// samples in non-decreasing timestamp order.
pub struct Reassembler<R: Read> {
    dump: DumpReader<R>,
    codec: Codec,
    window: usize,
    pending: BTreeMap<u64, RtpPacket>,
    sequence: SequenceTracker,
    state: ReleaseState,
    ready: VecDeque<Sample>,
    stats: ReassemblyStats,
    eof: bool,
}

impl Reassembler<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(
        path: P,
        codec: Codec,
        kind: TrackKind,
    ) -> Result<Self, ReassembleError> {
        Self::new(DumpReader::open(path)?, codec, kind)
    }
}

impl<R: Read> Reassembler<R> {
    pub fn new(
        dump: DumpReader<R>,
        codec: Codec,
        kind: TrackKind,
    ) -> Result<Self, ReassembleError> {
        let window = match kind {
            TrackKind::Audio => {
                if codec != Codec::Opus {
                    return Err(ReassembleError::KindMismatch { codec, kind });
                }
                AUDIO_LATENESS_WINDOW
            }
            TrackKind::Video => {
                if codec.is_audio() {
                    return Err(ReassembleError::KindMismatch { codec, kind });
                }
                VIDEO_LATENESS_WINDOW
            }
        };
        Ok(Self {
            dump,
            codec,
            window,
            pending: BTreeMap::new(),
            sequence: SequenceTracker::new(),
            state: ReleaseState::default(),
            ready: VecDeque::new(),
            stats: ReassemblyStats::default(),
            eof: false,
        })
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    /// Next sample in release order, or `None` once the file is drained.
    pub fn next_sample(&mut self) -> Result<Option<Sample>, ReassembleError> {
        loop {
            if let Some(sample) = self.ready.pop_front() {
                return Ok(Some(sample));
            }
            if self.eof {
                match self.pending.pop_first() {
                    Some((_, pkt)) => self.release(pkt),
                    None => return Ok(None),
                }
                continue;
            }

            match self.dump.next_entry()? {
                None => self.eof = true,
                Some(entry) if entry.is_rtcp => {}
                Some(entry) => match RtpPacket::unmarshal(&entry.payload) {
                    Ok(pkt) => {
                        let key = self.sequence.extend(pkt.sequence);
                        self.pending.insert(key, pkt);
                        while self.pending.len() > self.window {
                            // Window full: the earliest pending packet can
                            // no longer be preempted by a late arrival.
                            let (_, pkt) = self.pending.pop_first().expect("window > 0");
                            self.release(pkt);
                        }
                    }
                    Err(e) => {
                        self.stats.skipped += 1;
                        tracing::warn!(
                            offset_ms = entry.offset_ms,
                            error = %e,
                            "skipping malformed RTP packet"
                        );
                    }
                },
            }
        }
    }

    fn release(&mut self, mut pkt: RtpPacket) {
        if self.codec == Codec::Opus {
            self.synthesize_gap(&pkt);
        }
        pkt.sequence = pkt.sequence.wrapping_add(self.state.inserted_count);
        self.state.last_released = Some(pkt.clone());
        self.stats.released += 1;
        self.ready.push_back(Sample {
            packet: pkt,
            synthesized: false,
        });
    }

    /// If the timestamp delta to the previous released packet exceeds one
    /// frame duration, splice in TOC-only fillers so the decoder keeps
    /// wall-clock pace through the DTX gap.
    fn synthesize_gap(&mut self, next: &RtpPacket) {
        let Some(last) = &self.state.last_released else {
            return;
        };
        let Some(expected) = opus::packet_duration_ticks(&last.payload) else {
            return;
        };
        let delta = next.timestamp.wrapping_sub(last.timestamp);
        if expected == 0 || delta <= expected {
            return;
        }
        if delta > MAX_GAP_TICKS {
            tracing::warn!(
                delta_ticks = delta,
                last_seq = last.sequence,
                "timestamp jump too large, not synthesizing fillers"
            );
            return;
        }

        let missing = (delta / expected).saturating_sub(1) as u16;
        let payload = bytes::Bytes::from(opus::filler_payload(&last.payload));
        for i in 1..=missing {
            let filler = RtpPacket {
                marker: false,
                payload_type: last.payload_type,
                sequence: last.sequence.wrapping_add(i),
                timestamp: last.timestamp.wrapping_add(expected * i as u32),
                ssrc: last.ssrc,
                payload: payload.clone(),
            };
            self.ready.push_back(Sample {
                packet: filler,
                synthesized: true,
            });
        }
        if missing > 0 {
            self.stats.synthesized += missing as u64;
            self.state.inserted_count = self.state.inserted_count.wrapping_add(missing);
            tracing::debug!(
                missing = missing,
                after_seq = last.sequence,
                "synthesized DTX fillers"
            );
        }
    }
}
