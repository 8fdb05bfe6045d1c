use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

const RTP_VERSION: u8 = 2;
const RTP_HEADER_LEN: usize = 12;
const RTCP_PT_SENDER_REPORT: u8 = 200;
const RTCP_PT_BYE: u8 = 203;

/// Seconds between the NTP epoch (1900) and the unix epoch (1970).
const NTP_UNIX_OFFSET_SECS: u64 = 2_208_988_800;

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("packet too short: {0} bytes")]
    TooShort(usize),
    #[error("unsupported RTP version {0}")]
    BadVersion(u8),
    #[error("header extends past end of packet")]
    BadHeader,
}

/// One RTP packet as captured on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Bytes,
}

impl RtpPacket {
    /// Parse an RTP packet per RFC 3550: CSRCs and the header extension
    /// are skipped, trailing padding is stripped.
    pub fn unmarshal(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < RTP_HEADER_LEN {
            return Err(PacketError::TooShort(data.len()));
        }
        let mut buf = data;

        let b0 = buf.get_u8();
        let version = b0 >> 6;
        if version != RTP_VERSION {
            return Err(PacketError::BadVersion(version));
        }
        let has_padding = b0 & 0x20 != 0;
        let has_extension = b0 & 0x10 != 0;
        let csrc_count = (b0 & 0x0F) as usize;

        let b1 = buf.get_u8();
        let marker = b1 & 0x80 != 0;
        let payload_type = b1 & 0x7F;

        let sequence = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        if buf.remaining() < csrc_count * 4 {
            return Err(PacketError::BadHeader);
        }
        buf.advance(csrc_count * 4);

        if has_extension {
            if buf.remaining() < 4 {
                return Err(PacketError::BadHeader);
            }
            buf.advance(2); // profile-defined id
            let ext_words = buf.get_u16() as usize;
            if buf.remaining() < ext_words * 4 {
                return Err(PacketError::BadHeader);
            }
            buf.advance(ext_words * 4);
        }

        let mut payload = buf.to_vec();
        if has_padding {
            let pad = *payload.last().ok_or(PacketError::BadHeader)? as usize;
            if pad == 0 || pad > payload.len() {
                return Err(PacketError::BadHeader);
            }
            payload.truncate(payload.len() - pad);
        }

        Ok(Self {
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            payload: Bytes::from(payload),
        })
    }

    /// Serialize with a plain 12-byte header (no CSRCs, extension or
    /// padding). The reassembler rewrites sequence numbers, so packets
    /// are always re-serialized before hitting the encoder transport.
    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(RTP_HEADER_LEN + self.payload.len());
        buf.put_u8(RTP_VERSION << 6);
        buf.put_u8((self.payload_type & 0x7F) | if self.marker { 0x80 } else { 0 });
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        buf.put_slice(&self.payload);
        buf.to_vec()
    }
}

/// Rollover-aware extension of 16-bit sequence numbers into a 64-bit
/// ordering key: of the candidate cycles, the one closest to the highest
/// sequence seen so far wins.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    highest: Option<u64>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, seq: u16) -> u64 {
        let extended = match self.highest {
            None => seq as u64,
            Some(highest) => {
                let cycle = highest >> 16;
                let mut best = (cycle << 16) | seq as u64;
                if cycle > 0 {
                    let cand = ((cycle - 1) << 16) | seq as u64;
                    if cand.abs_diff(highest) < best.abs_diff(highest) {
                        best = cand;
                    }
                }
                let cand = ((cycle + 1) << 16) | seq as u64;
                if cand.abs_diff(highest) < best.abs_diff(highest) {
                    best = cand;
                }
                best
            }
        };
        if self.highest.map_or(true, |h| extended > h) {
            self.highest = Some(extended);
        }
        extended
    }
}

/// NTP timestamp and RTP timestamp taken from an RTCP sender report.
#[derive(Debug, Clone, Copy)]
pub struct SenderReport {
    pub ssrc: u32,
    pub ntp_unix_ms: u64,
    pub rtp_timestamp: u32,
}

/// Find the first sender report in an RTCP compound packet, if any.
pub fn parse_sender_report(data: &[u8]) -> Option<SenderReport> {
    let mut buf = data;
    while buf.remaining() >= 8 {
        let b0 = buf.get_u8();
        if b0 >> 6 != RTP_VERSION {
            return None;
        }
        let pt = buf.get_u8();
        let words = buf.get_u16() as usize;
        let body_len = words * 4;
        if buf.remaining() < body_len {
            return None;
        }
        if pt == RTCP_PT_SENDER_REPORT && body_len >= 20 {
            let ssrc = buf.get_u32();
            let ntp_secs = buf.get_u32() as u64;
            let ntp_frac = buf.get_u32() as u64;
            let rtp_timestamp = buf.get_u32();
            let unix_secs = ntp_secs.saturating_sub(NTP_UNIX_OFFSET_SECS);
            let frac_ms = (ntp_frac * 1000) >> 32;
            return Some(SenderReport {
                ssrc,
                ntp_unix_ms: unix_secs * 1000 + frac_ms,
                rtp_timestamp,
            });
        }
        buf.advance(body_len);
    }
    None
}

/// Build an RTCP BYE packet for one source. Sent to the encoder's RTCP
/// port as the end-of-stream signal.
pub fn rtcp_bye(ssrc: u32) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u8(RTP_VERSION << 6 | 0x01); // one source
    buf.put_u8(RTCP_PT_BYE);
    buf.put_u16(1); // length in words minus one
    buf.put_u32(ssrc);
    buf.to_vec()
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Minimal RTP packet bytes for tests.
    pub fn rtp_bytes(seq: u16, timestamp: u32, ssrc: u32, payload: &[u8]) -> Vec<u8> {
        RtpPacket {
            marker: false,
            payload_type: 111,
            sequence: seq,
            timestamp,
            ssrc,
            payload: Bytes::copy_from_slice(payload),
        }
        .marshal()
    }

    /// RTCP sender report bytes with the given NTP seconds (unix-relative)
    /// and RTP timestamp.
    pub fn sender_report_bytes(ssrc: u32, unix_secs: u64, rtp_timestamp: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(RTP_VERSION << 6);
        out.push(RTCP_PT_SENDER_REPORT);
        out.extend_from_slice(&6u16.to_be_bytes()); // 24-byte body
        out.extend_from_slice(&ssrc.to_be_bytes());
        out.extend_from_slice(&((unix_secs + NTP_UNIX_OFFSET_SECS) as u32).to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&rtp_timestamp.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // packet count
        out.extend_from_slice(&0u32.to_be_bytes()); // octet count
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmarshal_marshal_roundtrip() {
        let pkt = RtpPacket {
            marker: true,
            payload_type: 96,
            sequence: 4242,
            timestamp: 160_000,
            ssrc: 0xdeadbeef,
            payload: Bytes::from_static(&[0xF8, 1, 2, 3]),
        };
        let parsed = RtpPacket::unmarshal(&pkt.marshal()).unwrap();
        assert_eq!(parsed, pkt);
    }

    #[test]
    fn test_unmarshal_with_csrc_and_padding() {
        let mut data = Vec::new();
        data.push(0xA1); // V=2, padding, one CSRC
        data.push(111);
        data.extend_from_slice(&7u16.to_be_bytes());
        data.extend_from_slice(&1000u32.to_be_bytes());
        data.extend_from_slice(&42u32.to_be_bytes());
        data.extend_from_slice(&9u32.to_be_bytes()); // CSRC
        data.extend_from_slice(&[10, 11, 12]); // payload
        data.extend_from_slice(&[0, 0, 3]); // three padding bytes

        let pkt = RtpPacket::unmarshal(&data).unwrap();
        assert_eq!(pkt.sequence, 7);
        assert_eq!(pkt.payload.as_ref(), &[10, 11, 12]);
    }

    #[test]
    fn test_unmarshal_rejects_garbage() {
        assert!(matches!(
            RtpPacket::unmarshal(&[0u8; 4]),
            Err(PacketError::TooShort(4))
        ));
        let mut data = testutil::rtp_bytes(1, 1, 1, &[0]);
        data[0] = 0x40; // version 1
        assert!(matches!(
            RtpPacket::unmarshal(&data),
            Err(PacketError::BadVersion(1))
        ));
    }

    #[test]
    fn test_sequence_rollover() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(tracker.extend(65534), 65534);
        assert_eq!(tracker.extend(65535), 65535);
        assert_eq!(tracker.extend(0), 65536);
        assert_eq!(tracker.extend(1), 65537);
        // A straggler from before the rollover keeps its old cycle
        assert_eq!(tracker.extend(65533), 65533);
        assert_eq!(tracker.extend(2), 65538);
    }

    #[test]
    fn test_sender_report_parse() {
        let data = testutil::sender_report_bytes(77, 1_700_000_000, 48_000);
        let sr = parse_sender_report(&data).unwrap();
        assert_eq!(sr.ssrc, 77);
        assert_eq!(sr.ntp_unix_ms, 1_700_000_000_000);
        assert_eq!(sr.rtp_timestamp, 48_000);
    }

    #[test]
    fn test_rtcp_bye_layout() {
        let bye = rtcp_bye(0x01020304);
        assert_eq!(bye, vec![0x81, 203, 0, 1, 1, 2, 3, 4]);
    }
}
