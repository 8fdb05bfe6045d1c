use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use thiserror::Error;

/// Preamble every rtptools dump starts with, e.g. `#!rtpplay1.0 10.0.0.1/5004\n`.
const PREAMBLE_MAGIC: &[u8] = b"#!rtpplay1.0 ";
const FILE_HEADER_LEN: usize = 16;
const ENTRY_HEADER_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("not an rtpdump file (bad preamble)")]
    BadPreamble,
    #[error("truncated file header")]
    TruncatedHeader,
    #[error("entry length {0} is shorter than the entry header")]
    BadEntryLength(u16),
}

/// The 16-byte binary header following the ASCII preamble.
#[derive(Debug, Clone, Copy)]
pub struct DumpHeader {
    /// Wall-clock start of the capture, unix epoch milliseconds.
    pub start_unix_ms: u64,
    pub source: u32,
    pub port: u16,
}

/// One record of the dump. `is_rtcp` entries carry an RTCP compound
/// packet; everything else is a single RTP packet.
#[derive(Debug, Clone)]
pub struct DumpEntry {
    /// Milliseconds since `DumpHeader::start_unix_ms`.
    pub offset_ms: u32,
    pub payload: Vec<u8>,
    pub is_rtcp: bool,
}

pub struct DumpReader<R: Read> {
    reader: R,
    header: DumpHeader,
    entries_read: u64,
}

impl DumpReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DumpError> {
        let file = File::open(path.as_ref())?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read> DumpReader<R> {
    pub fn new(mut reader: R) -> Result<Self, DumpError> {
        let mut magic = [0u8; PREAMBLE_MAGIC.len()];
        reader.read_exact(&mut magic).map_err(|_| DumpError::BadPreamble)?;
        if magic != *PREAMBLE_MAGIC {
            return Err(DumpError::BadPreamble);
        }
        // Rest of the preamble line is `address/port`, terminated by newline.
        let mut byte = [0u8; 1];
        loop {
            reader.read_exact(&mut byte).map_err(|_| DumpError::BadPreamble)?;
            if byte[0] == b'\n' {
                break;
            }
        }

        let mut raw = [0u8; FILE_HEADER_LEN];
        reader
            .read_exact(&mut raw)
            .map_err(|_| DumpError::TruncatedHeader)?;
        let secs = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as u64;
        let usecs = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]) as u64;
        let source = u32::from_be_bytes([raw[8], raw[9], raw[10], raw[11]]);
        let port = u16::from_be_bytes([raw[12], raw[13]]);

        Ok(Self {
            reader,
            header: DumpHeader {
                start_unix_ms: secs * 1000 + usecs / 1000,
                source,
                port,
            },
            entries_read: 0,
        })
    }

    pub fn header(&self) -> DumpHeader {
        self.header
    }

    /// Read the next entry. A cleanly ended file yields `None`; a file
    /// truncated mid-entry logs a warning and also yields `None`.
    pub fn next_entry(&mut self) -> Result<Option<DumpEntry>, DumpError> {
        let mut raw = [0u8; ENTRY_HEADER_LEN];
        match self.reader.read_exact(&mut raw) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let length = u16::from_be_bytes([raw[0], raw[1]]);
        let packet_len = u16::from_be_bytes([raw[2], raw[3]]);
        let offset_ms = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]);

        if (length as usize) < ENTRY_HEADER_LEN {
            return Err(DumpError::BadEntryLength(length));
        }

        let mut payload = vec![0u8; length as usize - ENTRY_HEADER_LEN];
        if let Err(e) = self.reader.read_exact(&mut payload) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                tracing::warn!(
                    entries = self.entries_read,
                    "dump truncated mid-entry, stopping"
                );
                return Ok(None);
            }
            return Err(e.into());
        }

        self.entries_read += 1;
        Ok(Some(DumpEntry {
            offset_ms,
            payload,
            // rtptools stores 0 as the RTP length for RTCP records
            is_rtcp: packet_len == 0,
        }))
    }
}
