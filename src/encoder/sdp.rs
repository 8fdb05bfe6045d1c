use crate::metadata::{Codec, SegmentMetadata, TrackKind};

/// SDP handed to the encoder process so it can interpret the RTP stream
/// arriving on the loopback port. Mirrors what the capture declared,
/// re-homed onto 127.0.0.1.
pub fn for_segment(segment: &SegmentMetadata, kind: TrackKind, port: u16) -> String {
    let media = match kind {
        TrackKind::Audio => "audio",
        TrackKind::Video => "video",
    };
    let mut rtpmap = format!(
        "{}/{}",
        segment.codec.rtpmap_name(),
        segment.clock_rate
    );
    if kind == TrackKind::Audio && segment.channels > 1 {
        rtpmap = format!("{}/{}", rtpmap, segment.channels);
    }

    format!(
        "v=0\r\n\
         o=- 0 0 IN IP4 127.0.0.1\r\n\
         s={}\r\n\
         c=IN IP4 127.0.0.1\r\n\
         t=0 0\r\n\
         m={} {} RTP/AVP {}\r\n\
         a=rtpmap:{} {}\r\n\
         a=recvonly\r\n",
        segment.base_filename, media, port, segment.payload_type, segment.payload_type, rtpmap
    )
}

/// Container format for a codec: MP4 for H264, WebM for everything else.
pub fn container_for(codec: Codec) -> (&'static str, &'static str) {
    match codec {
        Codec::H264 => ("mp4", "mp4"),
        _ => ("webm", "webm"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn segment(codec: Codec, channels: u8) -> SegmentMetadata {
        SegmentMetadata {
            base_filename: "audio_alice_s1_t0".to_string(),
            dump_path: PathBuf::new(),
            sdp_path: PathBuf::new(),
            ssrc: 42,
            payload_type: 111,
            clock_rate: if codec == Codec::Opus { 48000 } else { 90000 },
            channels,
            codec,
            packet_count: 0,
            first_rtp_timestamp: 0,
            last_rtp_timestamp: 0,
            first_unix_ms: 0,
            last_unix_ms: 0,
            sender_report: None,
            clock_drift_ppm: 0.0,
        }
    }

    #[test]
    fn test_audio_sdp() {
        let sdp = for_segment(&segment(Codec::Opus, 2), TrackKind::Audio, 40000);
        assert!(sdp.contains("m=audio 40000 RTP/AVP 111\r\n"));
        assert!(sdp.contains("a=rtpmap:111 opus/48000/2\r\n"));
        assert!(sdp.contains("c=IN IP4 127.0.0.1"));
    }

    #[test]
    fn test_video_sdp_has_no_channel_count() {
        let mut seg = segment(Codec::Vp8, 1);
        seg.payload_type = 96;
        let sdp = for_segment(&seg, TrackKind::Video, 41000);
        assert!(sdp.contains("m=video 41000 RTP/AVP 96\r\n"));
        assert!(sdp.contains("a=rtpmap:96 VP8/90000\r\n"));
    }

    #[test]
    fn test_container_choice() {
        assert_eq!(container_for(Codec::H264).0, "mp4");
        assert_eq!(container_for(Codec::Opus).0, "webm");
        assert_eq!(container_for(Codec::Av1).0, "webm");
    }
}
