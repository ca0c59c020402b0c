//! Journal frame layout.
//!
//! ```text
//! | magic (4) | version (2) | kind (1) | len (4) | payload (len) | crc32 (4) |
//! ```
//!
//! Integers are little-endian. The CRC covers every byte before it.

use crate::error::{StoreError, StoreResult};
use roomline_storage::StorageBackend;

/// Marks the start of every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"RLNJ";

/// Frame format version.
pub const FRAME_VERSION: u16 = 1;

/// Bytes before the payload.
pub const HEADER_LEN: usize = 11;

/// Bytes after the payload.
pub const TRAILER_LEN: usize = 4;

/// What a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// One committed store transaction.
    Commit = 1,
}

impl FrameKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Commit),
            _ => None,
        }
    }
}

/// Builds a complete frame around `payload`.
pub fn encode(kind: FrameKind, payload: &[u8]) -> StoreResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| StoreError::journal_corruption(0, "frame payload exceeds 4 GiB"))?;
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
    buf.extend_from_slice(&FRAME_MAGIC);
    buf.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    buf.push(kind as u8);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    let crc = crc32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

/// Reads frames front to back.
///
/// A frame cut short by the end of the log ends iteration and leaves
/// [`valid_len`](Self::valid_len) at its start. A complete frame with a bad
/// magic, version, kind or checksum is an error.
pub struct FrameReader<'a> {
    backend: &'a dyn StorageBackend,
    size: u64,
    offset: u64,
    done: bool,
}

impl<'a> FrameReader<'a> {
    /// Starts reading at offset 0.
    pub fn new(backend: &'a dyn StorageBackend) -> StoreResult<Self> {
        Ok(Self {
            size: backend.size()?,
            backend,
            offset: 0,
            done: false,
        })
    }

    /// End of the last complete frame read so far.
    pub fn valid_len(&self) -> u64 {
        self.offset
    }

    /// Total bytes in the log.
    pub fn log_len(&self) -> u64 {
        self.size
    }

    fn next_frame(&mut self) -> StoreResult<Option<(FrameKind, Vec<u8>)>> {
        let start = self.offset;
        if self.size - start < HEADER_LEN as u64 {
            return Ok(None);
        }
        let header = self.backend.read_at(start, HEADER_LEN)?;
        if header[0..4] != FRAME_MAGIC {
            return Err(StoreError::journal_corruption(start, "bad frame magic"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != FRAME_VERSION {
            return Err(StoreError::journal_corruption(
                start,
                format!("unsupported frame version {version}"),
            ));
        }
        let kind = FrameKind::from_byte(header[6]).ok_or_else(|| {
            StoreError::journal_corruption(start, format!("unknown frame kind {}", header[6]))
        })?;
        let len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

        let total = (HEADER_LEN + len + TRAILER_LEN) as u64;
        if self.size - start < total {
            return Ok(None);
        }
        let body = self.backend.read_at(start + HEADER_LEN as u64, len + TRAILER_LEN)?;
        let (payload, trailer) = body.split_at(len);
        let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);

        let mut covered = header;
        covered.extend_from_slice(payload);
        let actual = crc32(&covered);
        if actual != expected {
            return Err(StoreError::ChecksumMismatch {
                offset: start,
                expected,
                actual,
            });
        }

        self.offset = start + total;
        Ok(Some((kind, payload.to_vec())))
    }
}

impl Iterator for FrameReader<'_> {
    type Item = StoreResult<(FrameKind, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// CRC-32 (IEEE, reflected).
pub fn crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut n = 0;
        while n < 256 {
            let mut c = n as u32;
            let mut k = 0;
            while k < 8 {
                c = if c & 1 == 1 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
                k += 1;
            }
            table[n] = c;
            n += 1;
        }
        table
    };

    !data.iter().fold(!0u32, |crc, &b| {
        TABLE[((crc ^ u32::from(b)) & 0xFF) as usize] ^ (crc >> 8)
    })
}
