//! Binary format definitions for HearthStore segments and the directory block
//!
//! A segment is a plain sequence of records:
//! RecordHeader (24 bytes) + payload_bytes
//!
//! The directory block is a single self-checking blob:
//! DirectoryHeader (20 bytes) + count * DirectoryEntry (28 bytes) + crc32c (4 bytes)

use crate::error::{StoreError, StoreResult};
use crate::ResourceId;

/// Magic bytes identifying a record: "HRTH"
pub const RECORD_MAGIC: [u8; 4] = [0x48, 0x52, 0x54, 0x48];

/// Magic bytes identifying the directory block: "HDIR"
pub const DIRECTORY_MAGIC: [u8; 4] = [0x48, 0x44, 0x49, 0x52];

/// Directory block format version
pub const DIRECTORY_VERSION: u16 = 1;

/// Record header size in bytes
pub const RECORD_HEADER_SIZE: usize = 24;

/// Directory block header size in bytes
pub const DIRECTORY_HEADER_SIZE: usize = 20;

/// Size of one serialized directory entry
pub const DIRECTORY_ENTRY_SIZE: usize = 28;

/// Fixed-size header preceding every record payload.
/// Size: 24 bytes
///
/// Layout:
///   [0..4]   magic:       [u8;4] - "HRTH"
///   [4..8]   payload_len: u32 LE
///   [8..16]  id:          u64 LE
///   [16..20] checksum:    u32 LE - CRC32C of (id bytes + payload)
///   [20..24] reserved:    [u8;4]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Magic bytes for record identification
    pub magic: [u8; 4],
    /// Payload length in bytes (excluding this header)
    pub payload_len: u32,
    /// Resource the payload belongs to
    pub id: ResourceId,
    /// CRC32C over id and payload
    pub checksum: u32,
}

impl RecordHeader {
    /// Build the header for `payload` belonging to `id`.
    pub fn for_payload(id: ResourceId, payload: &[u8]) -> Self {
        Self {
            magic: RECORD_MAGIC,
            payload_len: payload.len() as u32,
            id,
            checksum: record_checksum(id, payload),
        }
    }

    /// Serialize header to bytes for writing
    pub fn to_bytes(&self) -> [u8; RECORD_HEADER_SIZE] {
        let mut buf = [0u8; RECORD_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..8].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[8..16].copy_from_slice(&self.id.to_le_bytes());
        buf[16..20].copy_from_slice(&self.checksum.to_le_bytes());
        // bytes 20..24 are reserved, already zero
        buf
    }

    /// Parse header from bytes
    pub fn from_bytes(buf: &[u8; RECORD_HEADER_SIZE]) -> Self {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        Self {
            magic,
            payload_len: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            id: read_u64(&buf[8..16]),
            checksum: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
        }
    }

    /// Total on-disk size of the record this header starts.
    pub fn record_len(&self) -> u64 {
        RECORD_HEADER_SIZE as u64 + self.payload_len as u64
    }
}

/// CRC32C over the id bytes followed by the payload.
pub fn record_checksum(id: ResourceId, payload: &[u8]) -> u32 {
    let crc = crc32c::crc32c(&id.to_le_bytes());
    crc32c::crc32c_append(crc, payload)
}

/// Encode a complete record (header + payload).
pub fn encode_record(id: ResourceId, payload: &[u8]) -> Vec<u8> {
    let header = RecordHeader::for_payload(id, payload);
    let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Decode and verify a complete record read from `segment` at `offset`.
///
/// Returns the id stored in the header and the payload.
pub fn decode_record(data: &[u8], segment: u64, offset: u64) -> StoreResult<(ResourceId, Vec<u8>)> {
    if data.len() < RECORD_HEADER_SIZE {
        return Err(StoreError::TornRecord {
            segment,
            offset,
            expected_size: RECORD_HEADER_SIZE as u64,
            available_bytes: data.len() as u64,
        });
    }

    let mut hdr_buf = [0u8; RECORD_HEADER_SIZE];
    hdr_buf.copy_from_slice(&data[..RECORD_HEADER_SIZE]);
    let header = RecordHeader::from_bytes(&hdr_buf);

    if header.magic != RECORD_MAGIC {
        return Err(StoreError::NoMagicFound {
            location: format!("segment {}", segment),
            offset,
            found_bytes: header.magic,
        });
    }

    if (data.len() as u64) < header.record_len() {
        return Err(StoreError::TornRecord {
            segment,
            offset,
            expected_size: header.record_len(),
            available_bytes: data.len() as u64,
        });
    }

    let payload = &data[RECORD_HEADER_SIZE..header.record_len() as usize];
    let computed = record_checksum(header.id, payload);
    if computed != header.checksum {
        return Err(StoreError::ChecksumMismatch {
            segment,
            offset,
            expected: header.checksum,
            actual: computed,
        });
    }

    Ok((header.id, payload.to_vec()))
}

/// Location of the latest record of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    /// Segment sequence number holding the record
    pub segment: u64,
    /// Byte offset of the record header inside the segment
    pub offset: u64,
    /// Full record length (header + payload)
    pub length: u32,
}

impl DirEntry {
    /// First byte past the end of the record.
    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }
}

/// Serialize a directory block.
///
/// Layout:
///   [0..4]   magic:          "HDIR"
///   [4..6]   version:        u16 LE
///   [6..8]   reserved:       u16
///   [8..16]  active_segment: u64 LE
///   [16..20] count:          u32 LE
///   then `count` entries of (id u64, segment u64, offset u64, length u32)
///   then crc32c u32 LE over everything before it
pub fn encode_directory<'a, I>(active_segment: u64, entries: I) -> Vec<u8>
where
    I: ExactSizeIterator<Item = (ResourceId, &'a DirEntry)>,
{
    let count = entries.len();
    let mut buf = Vec::with_capacity(DIRECTORY_HEADER_SIZE + count * DIRECTORY_ENTRY_SIZE + 4);
    buf.extend_from_slice(&DIRECTORY_MAGIC);
    buf.extend_from_slice(&DIRECTORY_VERSION.to_le_bytes());
    buf.extend_from_slice(&[0u8; 2]);
    buf.extend_from_slice(&active_segment.to_le_bytes());
    buf.extend_from_slice(&(count as u32).to_le_bytes());
    for (id, entry) in entries {
        buf.extend_from_slice(&id.to_le_bytes());
        buf.extend_from_slice(&entry.segment.to_le_bytes());
        buf.extend_from_slice(&entry.offset.to_le_bytes());
        buf.extend_from_slice(&entry.length.to_le_bytes());
    }
    let checksum = crc32c::crc32c(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf
}

/// Parse a directory block into its active segment and entries.
pub fn decode_directory(data: &[u8]) -> StoreResult<(u64, Vec<(ResourceId, DirEntry)>)> {
    if data.len() < DIRECTORY_HEADER_SIZE + 4 {
        return Err(StoreError::consistency(format!(
            "directory block too short: {} bytes",
            data.len()
        )));
    }

    let mut magic = [0u8; 4];
    magic.copy_from_slice(&data[0..4]);
    if magic != DIRECTORY_MAGIC {
        return Err(StoreError::consistency(format!(
            "directory block has bad magic {:02x?}",
            magic
        )));
    }

    let body_len = data.len() - 4;
    let stored = u32::from_le_bytes([data[body_len], data[body_len + 1], data[body_len + 2], data[body_len + 3]]);
    let computed = crc32c::crc32c(&data[..body_len]);
    if stored != computed {
        return Err(StoreError::consistency(format!(
            "directory checksum mismatch: expected 0x{:08x}, got 0x{:08x}",
            stored, computed
        )));
    }

    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != DIRECTORY_VERSION {
        return Err(StoreError::consistency(format!("unsupported directory version {}", version)));
    }

    let active_segment = read_u64(&data[8..16]);
    let count = u32::from_le_bytes([data[16], data[17], data[18], data[19]]) as usize;
    if DIRECTORY_HEADER_SIZE + count * DIRECTORY_ENTRY_SIZE != body_len {
        return Err(StoreError::consistency(format!(
            "directory announces {} entries but holds {} bytes",
            count, body_len
        )));
    }

    let mut entries = Vec::with_capacity(count);
    for chunk in data[DIRECTORY_HEADER_SIZE..body_len].chunks_exact(DIRECTORY_ENTRY_SIZE) {
        let id = read_u64(&chunk[0..8]);
        let entry = DirEntry {
            segment: read_u64(&chunk[8..16]),
            offset: read_u64(&chunk[16..24]),
            length: u32::from_le_bytes([chunk[24], chunk[25], chunk[26], chunk[27]]),
        };
        entries.push((id, entry));
    }

    Ok((active_segment, entries))
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
