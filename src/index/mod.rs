//! The index: the one structure every other block is found through.
//!
//! # Layout (little-endian)
//!
//! Header (20 bytes): identifier `INDX` (4), entry count (8), CRC64 of the
//! entry bytes (8).  Entries (14 bytes each): block kind (4), data kind (2),
//! byte offset (8).
//!
//! Entries with a block kind this build does not know are kept verbatim so an
//! append session writes them back untouched.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Seek, SeekFrom};

use crate::crc64::crc64;
use crate::error::{ImageError, Result};
use crate::types::{BlockType, DataType};

pub const INDEX_HEADER_SIZE: usize = 20;
pub const INDEX_ENTRY_SIZE:  usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub block_type: u32,
    pub data_type:  u16,
    pub offset:     u64,
}

impl IndexEntry {
    pub fn new(block_type: BlockType, data_type: DataType, offset: u64) -> Self {
        Self { block_type: block_type as u32, data_type: data_type.to_u16(), offset }
    }

    pub fn kind(&self) -> Option<BlockType> {
        BlockType::from_u32(self.block_type)
    }

    pub fn data_kind(&self) -> Option<DataType> {
        DataType::from_u16(self.data_type)
    }

    fn matches(&self, block_type: BlockType, data_type: DataType) -> bool {
        self.block_type == block_type as u32 && self.data_type == data_type.to_u16()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    pub entries: Vec<IndexEntry>,
}

impl Index {
    pub fn push(&mut self, entry: IndexEntry) {
        self.entries.push(entry);
    }

    /// Point the entry of this kind at `offset`, keeping its position in the
    /// index; append a new entry when none exists.
    pub fn replace(&mut self, block_type: BlockType, data_type: DataType, offset: u64) {
        match self.entries.iter_mut().find(|e| e.matches(block_type, data_type)) {
            Some(e) => e.offset = offset,
            None    => self.entries.push(IndexEntry::new(block_type, data_type, offset)),
        }
    }

    pub fn remove(&mut self, block_type: BlockType, data_type: DataType) {
        self.entries.retain(|e| !e.matches(block_type, data_type));
    }

    pub fn find(&self, block_type: BlockType, data_type: DataType) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| e.matches(block_type, data_type))
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter()
    }

    /// Offsets of every user-data block.
    pub fn data_blocks(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries
            .iter()
            .filter(|e| e.matches(BlockType::DataBlock, DataType::UserData))
            .map(|e| e.offset)
    }

    fn entries_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * INDEX_ENTRY_SIZE);
        for e in &self.entries {
            let _ = out.write_u32::<LittleEndian>(e.block_type);
            let _ = out.write_u16::<LittleEndian>(e.data_type);
            let _ = out.write_u64::<LittleEndian>(e.offset);
        }
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let body = self.entries_bytes();
        let mut out = Vec::with_capacity(INDEX_HEADER_SIZE + body.len());
        let _ = out.write_u32::<LittleEndian>(BlockType::Index as u32);
        let _ = out.write_u64::<LittleEndian>(self.entries.len() as u64);
        let _ = out.write_u64::<LittleEndian>(crc64(&body));
        out.extend_from_slice(&body);
        out
    }

    /// Read the index at `offset`.  A wrong identifier or CRC is fatal: the
    /// rest of the image cannot be interpreted without it.
    pub fn read_at<R: Read + Seek>(reader: &mut R, offset: u64) -> Result<Self> {
        reader.seek(SeekFrom::Start(offset))?;
        let mut head = [0u8; INDEX_HEADER_SIZE];
        reader.read_exact(&mut head)?;
        let mut r = &head[..];
        let identifier = r.read_u32::<LittleEndian>()?;
        let count      = r.read_u64::<LittleEndian>()?;
        let expected   = r.read_u64::<LittleEndian>()?;
        if identifier != BlockType::Index as u32 {
            return Err(ImageError::format(format!("no index found at offset {offset}")));
        }

        let end = reader.seek(SeekFrom::End(0))?;
        let body_len = count
            .checked_mul(INDEX_ENTRY_SIZE as u64)
            .filter(|len| end.saturating_sub(offset.saturating_add(INDEX_HEADER_SIZE as u64)) >= *len)
            .ok_or_else(|| ImageError::format(format!("index claims {count} entries past end of image")))?;
        reader.seek(SeekFrom::Start(offset + INDEX_HEADER_SIZE as u64))?;
        let mut body = vec![0u8; body_len as usize];
        reader.read_exact(&mut body)?;

        let computed = crc64(&body);
        if computed != expected {
            return Err(ImageError::integrity("index", expected, computed));
        }

        let mut entries = Vec::with_capacity(count as usize);
        let mut r = &body[..];
        for _ in 0..count {
            entries.push(IndexEntry {
                block_type: r.read_u32::<LittleEndian>()?,
                data_type:  r.read_u16::<LittleEndian>()?,
                offset:     r.read_u64::<LittleEndian>()?,
            });
        }
        Ok(Self { entries })
    }
}
