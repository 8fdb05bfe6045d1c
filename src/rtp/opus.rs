//! Frame-duration decoding from the Opus TOC byte (RFC 6716 section 3.1).
//! Pure functions; the reassembler uses these to size DTX gaps.

/// Opus always runs on a 48 kHz RTP clock.
pub const TICKS_PER_MS: u32 = 48;

/// RTP ticks covered by a single frame of the given TOC configuration.
pub fn config_frame_ticks(config: u8) -> u32 {
    debug_assert!(config < 32);
    match config {
        // SILK-only modes: 10, 20, 40 or 60 ms
        0..=11 => [480, 960, 1920, 2880][(config % 4) as usize],
        // Hybrid modes: 10 or 20 ms
        12..=15 => [480, 960][(config % 2) as usize],
        // CELT-only modes: 2.5, 5, 10 or 20 ms
        _ => [120, 240, 480, 960][(config % 4) as usize],
    }
}

/// Number of frames carried by the packet, from the TOC frame-count code.
/// Code 3 packets carry the count in the following byte.
fn frame_count(payload: &[u8]) -> Option<u32> {
    match payload[0] & 0x03 {
        0 => Some(1),
        1 | 2 => Some(2),
        _ => {
            let count = (*payload.get(1)? & 0x3F) as u32;
            (count > 0).then_some(count)
        }
    }
}

/// Total duration of one Opus packet in RTP ticks, or `None` for an
/// empty or malformed payload.
pub fn packet_duration_ticks(payload: &[u8]) -> Option<u32> {
    if payload.is_empty() {
        return None;
    }
    let config = payload[0] >> 3;
    Some(config_frame_ticks(config) * frame_count(payload)?)
}

/// TOC-only payload used for synthesized DTX fillers: the previous
/// packet's TOC with the frame-count code cleared to "one frame".
pub fn filler_payload(last_payload: &[u8]) -> Vec<u8> {
    vec![last_payload.first().map_or(0x78, |toc| toc & 0xFC)]
}
