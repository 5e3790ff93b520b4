//! History tree file header
//!
//! ## Layout (little-endian, zero-padded to `TREE_HEADER_SIZE`)
//!
//! ```text
//! offset  size  field
//!      0     4  magic
//!      4     4  file version
//!      8     4  provider version
//!     12     4  block size
//!     16     4  max children
//!     20     4  node count
//!     24     4  root sequence number
//!     28     8  tree start time
//!     36     8  tree end time
//!     44    16  tree id (UUID)
//!     60     8  attribute section length
//!     68     4  CRC32 of bytes 0..68
//! ```
//!
//! The header is written last, when the tree is closed. A file whose
//! builder never finished has a zeroed header and is refused on reopen.

use super::{truncated, FormatError};
use crate::config::TREE_HEADER_SIZE;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use statehist_core::{Error, Result, Timestamp};
use std::io::Cursor;
use uuid::Uuid;

/// Magic number at offset 0.
pub const HEADER_MAGIC: u32 = 0x05FF_A900;

/// Version of the node and header layout written by this crate.
pub const FILE_VERSION: u32 = 1;

/// Bytes covered by the header checksum.
const CHECKED_LEN: usize = 68;

/// Decoded file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeHeader {
    /// Layout version
    pub file_version: u32,
    /// Analysis version that produced the file
    pub provider_version: u32,
    /// Node block size
    pub block_size: u32,
    /// Core node fan-out
    pub max_children: u32,
    /// Number of node blocks
    pub node_count: u32,
    /// Sequence number of the root node
    pub root_seq: u32,
    /// Earliest covered timestamp
    pub start_time: Timestamp,
    /// Latest covered timestamp
    pub end_time: Timestamp,
    /// Identity of this tree file
    pub tree_id: Uuid,
    /// Bytes of attribute data following the node blocks
    pub attribute_len: u64,
}

impl TreeHeader {
    /// Encode into a full `TREE_HEADER_SIZE` buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(TREE_HEADER_SIZE);
        self.write_fields(&mut buf)?;
        let crc = crc32fast::hash(&buf);
        buf.write_u32::<LittleEndian>(crc)?;
        buf.resize(TREE_HEADER_SIZE, 0);
        Ok(buf)
    }

    fn write_fields(&self, buf: &mut Vec<u8>) -> std::io::Result<()> {
        buf.write_u32::<LittleEndian>(HEADER_MAGIC)?;
        buf.write_u32::<LittleEndian>(self.file_version)?;
        buf.write_u32::<LittleEndian>(self.provider_version)?;
        buf.write_u32::<LittleEndian>(self.block_size)?;
        buf.write_u32::<LittleEndian>(self.max_children)?;
        buf.write_u32::<LittleEndian>(self.node_count)?;
        buf.write_u32::<LittleEndian>(self.root_seq)?;
        buf.write_i64::<LittleEndian>(self.start_time)?;
        buf.write_i64::<LittleEndian>(self.end_time)?;
        buf.extend_from_slice(self.tree_id.as_bytes());
        buf.write_u64::<LittleEndian>(self.attribute_len)?;
        Ok(())
    }

    /// Decode and validate a header.
    ///
    /// A wrong magic number or file version is a [`Error::VersionMismatch`];
    /// a bad checksum is [`Error::Corruption`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CHECKED_LEN + 4 {
            return Err(FormatError::Truncated("tree header").into());
        }
        let mut cur = Cursor::new(bytes);
        let eof = truncated("tree header");

        let magic = cur.read_u32::<LittleEndian>().map_err(&eof)?;
        if magic != HEADER_MAGIC {
            return Err(Error::VersionMismatch {
                field: "magic number",
                expected: HEADER_MAGIC,
                found: magic,
            });
        }

        let stored = u32::from_le_bytes([
            bytes[CHECKED_LEN],
            bytes[CHECKED_LEN + 1],
            bytes[CHECKED_LEN + 2],
            bytes[CHECKED_LEN + 3],
        ]);
        let computed = crc32fast::hash(&bytes[..CHECKED_LEN]);
        if stored != computed {
            return Err(FormatError::ChecksumMismatch {
                what: "tree header",
                stored,
                computed,
            }
            .into());
        }

        let file_version = cur.read_u32::<LittleEndian>().map_err(&eof)?;
        if file_version != FILE_VERSION {
            return Err(Error::VersionMismatch {
                field: "file version",
                expected: FILE_VERSION,
                found: file_version,
            });
        }

        let provider_version = cur.read_u32::<LittleEndian>().map_err(&eof)?;
        let block_size = cur.read_u32::<LittleEndian>().map_err(&eof)?;
        let max_children = cur.read_u32::<LittleEndian>().map_err(&eof)?;
        let node_count = cur.read_u32::<LittleEndian>().map_err(&eof)?;
        let root_seq = cur.read_u32::<LittleEndian>().map_err(&eof)?;
        let start_time = cur.read_i64::<LittleEndian>().map_err(&eof)?;
        let end_time = cur.read_i64::<LittleEndian>().map_err(&eof)?;
        let mut id = [0u8; 16];
        std::io::Read::read_exact(&mut cur, &mut id).map_err(&eof)?;
        let attribute_len = cur.read_u64::<LittleEndian>().map_err(&eof)?;

        if node_count == 0 || root_seq >= node_count {
            return Err(FormatError::Invalid(format!(
                "root {} outside {} nodes",
                root_seq, node_count
            ))
            .into());
        }
        if end_time < start_time {
            return Err(FormatError::Invalid(format!(
                "tree end {} precedes start {}",
                end_time, start_time
            ))
            .into());
        }

        Ok(Self {
            file_version,
            provider_version,
            block_size,
            max_children,
            node_count,
            root_seq,
            start_time,
            end_time,
            tree_id: Uuid::from_bytes(id),
            attribute_len,
        })
    }
}
