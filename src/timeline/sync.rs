use crate::metadata::TrackInfo;

/// Millisecond offset of `track`'s timeline relative to `reference`,
/// from their first-packet absolute timestamps. Positive means `track`
/// started later. Missing timing metadata degrades to 0 with a warning
/// rather than aborting the run.
pub fn offset_ms(track: &TrackInfo, reference: &TrackInfo) -> i64 {
    match (track.first_unix_ms(), reference.first_unix_ms()) {
        (Some(a), Some(b)) => a as i64 - b as i64,
        _ => {
            tracing::warn!(
                track = %track.label(),
                reference = %reference.label(),
                "missing timing metadata, falling back to zero offset"
            );
            0
        }
    }
}

/// The canonical reference: the track whose first packet is earliest.
pub fn earliest<'a>(tracks: &[&'a TrackInfo]) -> Option<&'a TrackInfo> {
    tracks
        .iter()
        .filter(|t| t.first_unix_ms().is_some())
        .min_by_key(|t| t.first_unix_ms())
        .copied()
}
