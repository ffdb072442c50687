//! Deduplication table: sector address → packed block locator.
//!
//! A locator keeps the sector's position inside its block in the low `shift`
//! bits and the block's byte offset in the remaining high bits.  Zero means
//! the sector was never written.
//!
//! The table lives in one of two places, fixed when the image is created:
//!   - in memory, as a flat `Vec<u64>`, serialised LZMA-compressed on close;
//!   - on disk, as an uncompressed region reserved right after its header
//!     and updated in place, with a bounded entry cache in front of it.
//!
//! # Header layout (53 bytes, little-endian)
//! identifier `DDT*` (4), data kind (2), compression (2), shift (1),
//! declared sector size (4), entries (8), compressed length (8), length (8),
//! compressed CRC64 (8), CRC64 (8).
//!
//! The declared sector size is kept here because blocks only record the size
//! of what they hold, which for a disc that opens with audio is 2352.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::block::{check_extent, read_payload};
use crate::codec::{get_codec, CompressionType};
use crate::crc64::{crc64, Crc64};
use crate::error::{ImageError, Result};
use crate::types::{BlockType, DataType};

pub const DDT_HEADER_SIZE: usize = 53;
/// The on-disk entry cache is dropped wholesale once it reaches this size.
pub const MAX_DDT_ENTRY_CACHE: usize = 16_000_000;
const ZERO_CHUNK: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdtHeader {
    pub identifier:  u32,
    pub data_type:   u16,
    pub compression: u16,
    pub shift:       u8,
    pub sector_size: u32,
    pub entries:     u64,
    pub cmp_length:  u64,
    pub length:      u64,
    pub cmp_crc64:   u64,
    pub crc64:       u64,
}

impl DdtHeader {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DDT_HEADER_SIZE);
        let _ = out.write_u32::<LittleEndian>(self.identifier);
        let _ = out.write_u16::<LittleEndian>(self.data_type);
        let _ = out.write_u16::<LittleEndian>(self.compression);
        out.push(self.shift);
        let _ = out.write_u32::<LittleEndian>(self.sector_size);
        let _ = out.write_u64::<LittleEndian>(self.entries);
        let _ = out.write_u64::<LittleEndian>(self.cmp_length);
        let _ = out.write_u64::<LittleEndian>(self.length);
        let _ = out.write_u64::<LittleEndian>(self.cmp_crc64);
        let _ = out.write_u64::<LittleEndian>(self.crc64);
        out
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < DDT_HEADER_SIZE {
            return Err(ImageError::truncated("DDT header", DDT_HEADER_SIZE, buf.len()));
        }
        let mut r = buf;
        let header = Self {
            identifier:  r.read_u32::<LittleEndian>()?,
            data_type:   r.read_u16::<LittleEndian>()?,
            compression: r.read_u16::<LittleEndian>()?,
            shift:       r.read_u8()?,
            sector_size: r.read_u32::<LittleEndian>()?,
            entries:     r.read_u64::<LittleEndian>()?,
            cmp_length:  r.read_u64::<LittleEndian>()?,
            length:      r.read_u64::<LittleEndian>()?,
            cmp_crc64:   r.read_u64::<LittleEndian>()?,
            crc64:       r.read_u64::<LittleEndian>()?,
        };
        if header.identifier != BlockType::DeduplicationTable as u32 {
            return Err(ImageError::format(format!(
                "expected deduplication table, found identifier {:08x}",
                header.identifier
            )));
        }
        if header.shift >= 64 {
            return Err(ImageError::format(format!("DDT shift {} out of range", header.shift)));
        }
        Ok(header)
    }

    pub fn read_at<R: Read + Seek>(reader: &mut R, offset: u64) -> Result<Self> {
        reader.seek(SeekFrom::Start(offset))?;
        let mut buf = [0u8; DDT_HEADER_SIZE];
        reader.read_exact(&mut buf)?;
        Self::from_bytes(&buf)
    }
}

// ── Locators ─────────────────────────────────────────────────────────────────

/// Pack a block offset and an intra-block sector index.
pub fn pack_locator(block_offset: u64, index: u64, shift: u8) -> Result<u64> {
    let shift = u32::from(shift);
    if index >= 1u64 << shift {
        return Err(ImageError::format(format!(
            "sector index {index} does not fit a block of {} sectors",
            1u64 << shift
        )));
    }
    if shift > 0 && block_offset >> (64 - shift) != 0 {
        return Err(ImageError::format(format!(
            "block offset {block_offset} cannot be addressed with shift {shift}"
        )));
    }
    Ok((block_offset << shift) | index)
}

/// Split a locator into (block offset, intra-block index).
pub fn unpack_locator(locator: u64, shift: u8) -> (u64, u64) {
    let mask = (1u64 << shift) - 1;
    (locator >> shift, locator & mask)
}

// ── Table ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Storage {
    InMemory(Vec<u64>),
    OnDisk {
        /// Offset of the DDT header; entries start right after it.
        header_offset: u64,
        cache:         HashMap<u64, u64>,
    },
}

#[derive(Debug)]
pub struct DeduplicationTable {
    shift:       u8,
    sector_size: u32,
    entries:     u64,
    storage:     Storage,
}

impl DeduplicationTable {
    pub fn in_memory(entries: u64, shift: u8, sector_size: u32) -> Self {
        Self { shift, sector_size, entries, storage: Storage::InMemory(vec![0; entries as usize]) }
    }

    /// Write an uncompressed DDT header at `at` and reserve a zero-filled
    /// region for every entry after it.
    pub fn create_on_disk<W: Write + Seek>(
        writer:      &mut W,
        at:          u64,
        entries:     u64,
        shift:       u8,
        sector_size: u32,
    ) -> Result<Self> {
        let length = entries * 8;
        let header = DdtHeader {
            identifier:  BlockType::DeduplicationTable as u32,
            data_type:   DataType::UserData.to_u16(),
            compression: CompressionType::None as u16,
            shift,
            sector_size,
            entries,
            cmp_length:  length,
            length,
            cmp_crc64:   0,
            crc64:       0,
        };
        writer.seek(SeekFrom::Start(at))?;
        writer.write_all(&header.to_bytes())?;
        let zeros = vec![0u8; ZERO_CHUNK];
        let mut left = length;
        while left > 0 {
            let n = left.min(ZERO_CHUNK as u64) as usize;
            writer.write_all(&zeros[..n])?;
            left -= n as u64;
        }
        Ok(Self::on_disk(at, entries, shift, sector_size))
    }

    pub fn on_disk(header_offset: u64, entries: u64, shift: u8, sector_size: u32) -> Self {
        Self { shift, sector_size, entries, storage: Storage::OnDisk { header_offset, cache: HashMap::new() } }
    }

    /// Load the table whose header sits at `offset`.
    ///
    /// Compression `None` marks an on-disk table that is addressed in place;
    /// its region must match the CRC stamped by [`seal`](Self::seal).  An
    /// LZMA table is read fully into memory after both CRCs are checked.
    pub fn load<R: Read + Seek>(reader: &mut R, offset: u64) -> Result<Self> {
        let header = DdtHeader::read_at(reader, offset)?;
        let body = offset + DDT_HEADER_SIZE as u64;
        match CompressionType::from_u16(header.compression) {
            Some(CompressionType::None) => {
                let length = header
                    .entries
                    .checked_mul(8)
                    .ok_or_else(|| ImageError::format(format!("DDT of {} entries", header.entries)))?;
                check_extent(reader, body, length, "deduplication table")?;
                let computed = Self::region_crc(reader, offset, header.entries)?;
                if computed != header.crc64 {
                    return Err(ImageError::integrity("deduplication table", header.crc64, computed));
                }
                Ok(Self::on_disk(offset, header.entries, header.shift, header.sector_size))
            }
            Some(CompressionType::Lzma) => {
                let payload = read_payload(reader, body, header.cmp_length, "deduplication table")?;
                Self::from_block(&header, &payload)
            }
            _ => Err(ImageError::UnsupportedCompression(header.compression)),
        }
    }

    pub fn from_block(header: &DdtHeader, payload: &[u8]) -> Result<Self> {
        let computed = crc64(payload);
        if computed != header.cmp_crc64 {
            return Err(ImageError::integrity("deduplication table", header.cmp_crc64, computed));
        }
        let compression = CompressionType::from_u16(header.compression)
            .ok_or(ImageError::UnsupportedCompression(header.compression))?;
        let raw = get_codec(compression, 0).decompress(payload)?;
        if raw.len() as u64 != header.length || header.length != header.entries * 8 {
            return Err(ImageError::format(format!(
                "deduplication table decompressed to {} bytes, expected {}",
                raw.len(),
                header.entries * 8
            )));
        }
        let computed = crc64(&raw);
        if computed != header.crc64 {
            return Err(ImageError::integrity("deduplication table data", header.crc64, computed));
        }
        let table = raw
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect();
        Ok(Self {
            shift:       header.shift,
            sector_size: header.sector_size,
            entries:     header.entries,
            storage:     Storage::InMemory(table),
        })
    }

    pub fn shift(&self) -> u8 {
        self.shift
    }

    /// Sector size the image was created with.
    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self.storage, Storage::InMemory(_))
    }

    /// Header offset of an on-disk table.
    pub fn header_offset(&self) -> Option<u64> {
        match self.storage {
            Storage::OnDisk { header_offset, .. } => Some(header_offset),
            Storage::InMemory(_)                  => None,
        }
    }

    fn check(&self, address: u64) -> Result<()> {
        if address >= self.entries {
            return Err(ImageError::OutOfRange { address, sectors: self.entries });
        }
        Ok(())
    }

    pub fn get<R: Read + Seek>(&mut self, reader: &mut R, address: u64) -> Result<u64> {
        self.check(address)?;
        match &mut self.storage {
            Storage::InMemory(table) => Ok(table[address as usize]),
            Storage::OnDisk { header_offset, cache } => {
                if let Some(&locator) = cache.get(&address) {
                    return Ok(locator);
                }
                reader.seek(SeekFrom::Start(*header_offset + DDT_HEADER_SIZE as u64 + address * 8))?;
                let locator = reader.read_u64::<LittleEndian>()?;
                if cache.len() >= MAX_DDT_ENTRY_CACHE {
                    debug!("DDT entry cache full, clearing {} entries", cache.len());
                    cache.clear();
                }
                cache.insert(address, locator);
                Ok(locator)
            }
        }
    }

    pub fn set<W: Write + Seek>(&mut self, writer: &mut W, address: u64, locator: u64) -> Result<()> {
        self.check(address)?;
        match &mut self.storage {
            Storage::InMemory(table) => table[address as usize] = locator,
            Storage::OnDisk { header_offset, cache } => {
                writer.seek(SeekFrom::Start(*header_offset + DDT_HEADER_SIZE as u64 + address * 8))?;
                writer.write_u64::<LittleEndian>(locator)?;
                if cache.len() >= MAX_DDT_ENTRY_CACHE {
                    cache.clear();
                }
                cache.insert(address, locator);
            }
        }
        Ok(())
    }

    /// Serialise an in-memory table as an LZMA-compressed DDT block.
    /// Returns `None` for an on-disk table.
    pub fn to_block(&self, dictionary: u32) -> Result<Option<(DdtHeader, Vec<u8>)>> {
        let table = match &self.storage {
            Storage::InMemory(table) => table,
            Storage::OnDisk { .. }   => return Ok(None),
        };
        let mut raw = Vec::with_capacity(table.len() * 8);
        for entry in table {
            raw.extend_from_slice(&entry.to_le_bytes());
        }
        let payload = get_codec(CompressionType::Lzma, dictionary).compress(&raw)?;
        let header = DdtHeader {
            identifier:  BlockType::DeduplicationTable as u32,
            data_type:   DataType::UserData.to_u16(),
            compression: CompressionType::Lzma as u16,
            shift:       self.shift,
            sector_size: self.sector_size,
            entries:     self.entries,
            cmp_length:  payload.len() as u64,
            length:      raw.len() as u64,
            cmp_crc64:   crc64(&payload),
            crc64:       crc64(&raw),
        };
        Ok(Some((header, payload)))
    }

    /// Compute the CRC64 over an on-disk table's region.
    pub fn region_crc<R: Read + Seek>(reader: &mut R, header_offset: u64, entries: u64) -> Result<u64> {
        reader.seek(SeekFrom::Start(header_offset + DDT_HEADER_SIZE as u64))?;
        let mut crc = Crc64::new();
        let mut buf = vec![0u8; ZERO_CHUNK];
        let mut left = entries * 8;
        while left > 0 {
            let n = left.min(ZERO_CHUNK as u64) as usize;
            reader.read_exact(&mut buf[..n])?;
            crc.update(&buf[..n]);
            left -= n as u64;
        }
        Ok(crc.finish())
    }

    /// Stamp an on-disk table's header with the CRC of its current region.
    /// Does nothing for an in-memory table.
    pub fn seal<S: Read + Write + Seek>(&self, stream: &mut S) -> Result<()> {
        let header_offset = match self.header_offset() {
            Some(o) => o,
            None    => return Ok(()),
        };
        let crc = Self::region_crc(stream, header_offset, self.entries)?;
        let mut header = DdtHeader::read_at(stream, header_offset)?;
        header.cmp_crc64 = crc;
        header.crc64     = crc;
        stream.seek(SeekFrom::Start(header_offset))?;
        stream.write_all(&header.to_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn locator_packing() {
        let loc = pack_locator(104, 3, 2).unwrap();
        assert_eq!(loc, (104 << 2) | 3);
        assert_eq!(unpack_locator(loc, 2), (104, 3));
        assert!(pack_locator(104, 4, 2).is_err());
        assert!(pack_locator(u64::MAX >> 4, 0, 12).is_err());
        assert_eq!(unpack_locator(pack_locator(4096, 4095, 12).unwrap(), 12), (4096, 4095));
    }

    #[test]
    fn in_memory_table_survives_serialisation() {
        let mut ddt = DeduplicationTable::in_memory(100, 4, 2048);
        let mut sink = Cursor::new(Vec::new());
        for a in 0..100u64 {
            ddt.set(&mut sink, a, pack_locator(1000 + a * 10, a % 16, 4).unwrap()).unwrap();
        }
        let (header, payload) = ddt.to_block(1 << 20).unwrap().unwrap();
        let header = DdtHeader::from_bytes(&header.to_bytes()).unwrap();
        let mut back = DeduplicationTable::from_block(&header, &payload).unwrap();
        assert!(back.is_in_memory());
        assert_eq!(back.sector_size(), 2048);
        for a in 0..100u64 {
            assert_eq!(back.get(&mut sink, a).unwrap(), ddt.get(&mut sink, a).unwrap());
        }
        assert!(matches!(back.get(&mut sink, 100), Err(ImageError::OutOfRange { .. })));
    }

    #[test]
    fn on_disk_table_is_addressed_in_place() {
        let mut stream = Cursor::new(vec![0u8; 64]);
        let mut ddt = DeduplicationTable::create_on_disk(&mut stream, 64, 50, 3, 2352).unwrap();
        assert_eq!(stream.get_ref().len(), 64 + DDT_HEADER_SIZE + 50 * 8);
        ddt.set(&mut stream, 7, 0xabcd).unwrap();
        ddt.seal(&mut stream).unwrap();
        let header = DdtHeader::read_at(&mut stream, 64).unwrap();
        assert_eq!(header.crc64, DeduplicationTable::region_crc(&mut stream, 64, 50).unwrap());

        let mut reopened = DeduplicationTable::load(&mut stream, 64).unwrap();
        assert!(!reopened.is_in_memory());
        assert_eq!(reopened.sector_size(), 2352);
        assert_eq!(reopened.get(&mut stream, 7).unwrap(), 0xabcd);
        assert_eq!(reopened.get(&mut stream, 8).unwrap(), 0);
    }

    #[test]
    fn on_disk_region_must_match_its_crc() {
        let mut stream = Cursor::new(Vec::new());
        let mut ddt = DeduplicationTable::create_on_disk(&mut stream, 0, 16, 2, 512).unwrap();
        ddt.set(&mut stream, 3, 0x44).unwrap();
        ddt.seal(&mut stream).unwrap();
        assert!(DeduplicationTable::load(&mut stream, 0).is_ok());

        // A write after sealing leaves the stamped CRC stale.
        ddt.set(&mut stream, 5, 0x99).unwrap();
        assert!(matches!(
            DeduplicationTable::load(&mut stream, 0),
            Err(ImageError::Integrity { .. })
        ));

        // A region cut short is a format error, not a short read.
        ddt.seal(&mut stream).unwrap();
        let mut bytes = stream.into_inner();
        bytes.truncate(DDT_HEADER_SIZE + 10 * 8);
        assert!(matches!(
            DeduplicationTable::load(&mut Cursor::new(bytes), 0),
            Err(ImageError::Format(_))
        ));
    }

    #[test]
    fn oversized_compressed_length_is_refused() {
        let mut ddt = DeduplicationTable::in_memory(8, 1, 512);
        let mut sink = Cursor::new(Vec::new());
        ddt.set(&mut sink, 1, 0x20).unwrap();
        let (mut header, payload) = ddt.to_block(1 << 16).unwrap().unwrap();
        header.cmp_length = u64::MAX / 2;
        let mut bytes = header.to_bytes();
        bytes.extend_from_slice(&payload);
        assert!(matches!(
            DeduplicationTable::load(&mut Cursor::new(bytes), 0),
            Err(ImageError::Format(_))
        ));
    }

    #[test]
    fn unknown_compression_is_rejected_at_load() {
        let header = DdtHeader {
            identifier:  BlockType::DeduplicationTable as u32,
            data_type:   1,
            compression: 7,
            shift:       2,
            sector_size: 512,
            entries:     1,
            cmp_length:  0,
            length:      8,
            cmp_crc64:   0,
            crc64:       0,
        };
        let mut stream = Cursor::new(header.to_bytes());
        assert!(matches!(
            DeduplicationTable::load(&mut stream, 0),
            Err(ImageError::UnsupportedCompression(7))
        ));
    }
}
