use std::net::{SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::metadata::{SegmentMetadata, TrackKind};
use crate::rtp::rtcp_bye;

use super::{sdp, Encoder, EncoderError};

/// Bound on the graceful-shutdown wait before the process is killed.
const SHUTDOWN_TIMEOUT_SECS: u64 = 10;
/// Time for ffmpeg to open the SDP and bind its sockets before packets
/// start flowing.
const STARTUP_DELAY: Duration = Duration::from_millis(500);
/// Packets sent between pacing pauses. The stream is pushed much faster
/// than real time; the pause keeps the kernel receive buffer from
/// overflowing under the burst.
const PACING_BATCH: u64 = 50;
const PACING_PAUSE: Duration = Duration::from_millis(2);

/// External ffmpeg process stream-copying one RTP stream from a loopback
/// UDP port into a container file, driven by a generated SDP.
pub struct FfmpegEncoder {
    child: Option<Child>,
    socket: UdpSocket,
    rtp_dest: SocketAddr,
    rtcp_dest: SocketAddr,
    ssrc: u32,
    sent: u64,
    output: PathBuf,
    // Keeps the generated sdp file alive for the lifetime of the process.
    _sdp_dir: tempfile::TempDir,
}

impl FfmpegEncoder {
    pub fn start(
        segment: &SegmentMetadata,
        kind: TrackKind,
        output: &Path,
    ) -> Result<Self, EncoderError> {
        let port = free_loopback_port()?;

        let sdp_dir = tempfile::tempdir()?;
        let sdp_path = sdp_dir.path().join("stream.sdp");
        std::fs::write(&sdp_path, sdp::for_segment(segment, kind, port))?;

        let (_, muxer) = sdp::container_for(segment.codec);
        let mut child = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "warning"])
            .args(["-protocol_whitelist", "file,udp,rtp"])
            .arg("-i")
            .arg(&sdp_path)
            .args(["-c", "copy", "-f", muxer, "-y"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    EncoderError::NotFound
                } else {
                    EncoderError::Io(e)
                }
            })?;

        thread::sleep(STARTUP_DELAY);
        if let Some(status) = child.try_wait()? {
            return Err(EncoderError::ExitedEarly(status.to_string()));
        }

        let socket = UdpSocket::bind(("127.0.0.1", 0))?;
        tracing::debug!(
            port = port,
            output = %output.display(),
            codec = %segment.codec,
            "encoder started"
        );

        Ok(Self {
            child: Some(child),
            socket,
            rtp_dest: SocketAddr::from(([127, 0, 0, 1], port)),
            rtcp_dest: SocketAddr::from(([127, 0, 0, 1], port + 1)),
            ssrc: segment.ssrc,
            sent: 0,
            output: output.to_path_buf(),
            _sdp_dir: sdp_dir,
        })
    }

    fn wait_for_exit(&mut self) -> Result<(), EncoderError> {
        let deadline = Instant::now() + Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);
        loop {
            let status = match self.child.as_mut() {
                None => return Ok(()),
                Some(child) => child.try_wait()?,
            };
            if let Some(status) = status {
                self.child = None;
                tracing::debug!(
                    status = %status,
                    packets = self.sent,
                    output = %self.output.display(),
                    "encoder exited"
                );
                return Ok(());
            }
            if Instant::now() >= deadline {
                if let Some(mut child) = self.child.take() {
                    let _ = child.kill();
                    let _ = child.wait();
                }
                return Err(EncoderError::ShutdownTimeout(SHUTDOWN_TIMEOUT_SECS));
            }
            thread::sleep(Duration::from_millis(100));
        }
    }
}

impl Encoder for FfmpegEncoder {
    fn push_rtp_buf(&mut self, buf: &[u8]) -> Result<(), EncoderError> {
        self.socket.send_to(buf, self.rtp_dest)?;
        self.sent += 1;
        if self.sent % PACING_BATCH == 0 {
            thread::sleep(PACING_PAUSE);
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<(), EncoderError> {
        // End-of-stream signal, then a bounded wait for the muxer to
        // finalize the container.
        let _ = self.socket.send_to(&rtcp_bye(self.ssrc), self.rtcp_dest);
        self.wait_for_exit()
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Pick a currently-free even loopback UDP port (RTCP lives on port+1).
/// The port is unbound again before ffmpeg claims it; a lost race
/// surfaces as a failed encoder start and the track is reported in the
/// batch outcome.
fn free_loopback_port() -> Result<u16, EncoderError> {
    for _ in 0..16 {
        let socket = UdpSocket::bind(("127.0.0.1", 0))?;
        let port = socket.local_addr()?.port();
        if port % 2 == 0 && port < u16::MAX {
            return Ok(port);
        }
    }
    Err(EncoderError::Io(std::io::Error::other(
        "no even loopback port available",
    )))
}
