use thiserror::Error;

use crate::rtp::RtpPacket;

pub mod ffmpeg;
pub mod recorder;
pub mod sdp;

pub use ffmpeg::FfmpegEncoder;
pub use recorder::record_segment;

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoder process not found on PATH")]
    NotFound,
    #[error("encoder exited early with {0}")]
    ExitedEarly(String),
    #[error("encoder did not exit within {0} seconds, killed")]
    ShutdownTimeout(u64),
}

/// Capability boundary to the external encoding process: accepts ordered
/// RTP packets, emits a finished container file, and supports
/// graceful-then-forced shutdown. Tests substitute a fake to assert on
/// packet ordering and timing without running a real encoder.
pub trait Encoder {
    /// Serialize and push one packet.
    fn on_rtp(&mut self, packet: &RtpPacket) -> Result<(), EncoderError> {
        self.push_rtp_buf(&packet.marshal())
    }

    /// Push an already-serialized RTP packet.
    fn push_rtp_buf(&mut self, buf: &[u8]) -> Result<(), EncoderError>;

    /// Signal end-of-stream, wait for the container to be finalized
    /// within a bounded time, and force-terminate otherwise. Must be
    /// safe to call on error paths.
    fn close(self: Box<Self>) -> Result<(), EncoderError>;
}
