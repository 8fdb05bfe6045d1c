pub mod dump;
pub mod opus;
pub mod packet;
pub mod reassembler;

pub use dump::{DumpEntry, DumpError, DumpHeader, DumpReader};
pub use packet::{parse_sender_report, rtcp_bye, RtpPacket, SequenceTracker};
pub use reassembler::{Reassembler, ReassembleError, ReassemblyStats, Sample};
