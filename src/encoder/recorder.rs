use thiserror::Error;

use crate::metadata::{SegmentMetadata, TrackKind};
use crate::rtp::{ReassembleError, Reassembler, ReassemblyStats};

use super::{Encoder, EncoderError};

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("reassembly failed: {0}")]
    Reassemble(#[from] ReassembleError),
    #[error("encoder failed: {0}")]
    Encoder(#[from] EncoderError),
}

/// Convert one captured segment into a container file: drive the
/// reassembler to completion, forward every released packet to the
/// encoder, and close the encoder on every exit path.
pub fn record_segment(
    segment: &SegmentMetadata,
    kind: TrackKind,
    mut encoder: Box<dyn Encoder>,
) -> Result<ReassemblyStats, RecordError> {
    let mut reassembler = match Reassembler::open(&segment.dump_path, segment.codec, kind) {
        Ok(r) => r,
        Err(e) => {
            let _ = encoder.close();
            return Err(e.into());
        }
    };

    let feed_result = feed(&mut reassembler, encoder.as_mut());
    let stats = reassembler.stats();
    let close_result = encoder.close();

    feed_result?;
    close_result?;

    tracing::info!(
        segment = %segment.base_filename,
        released = stats.released,
        synthesized = stats.synthesized,
        skipped = stats.skipped,
        "segment converted"
    );
    Ok(stats)
}

fn feed(
    reassembler: &mut Reassembler<std::io::BufReader<std::fs::File>>,
    encoder: &mut dyn Encoder,
) -> Result<(), RecordError> {
    while let Some(sample) = reassembler.next_sample()? {
        if sample.synthesized {
            tracing::trace!(
                seq = sample.packet.sequence,
                timestamp = sample.packet.timestamp,
                "forwarding synthesized filler"
            );
        }
        encoder.on_rtp(&sample.packet)?;
    }
    Ok(())
}
