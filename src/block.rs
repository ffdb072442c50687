//! Data block header and the compress/decompress pipeline around it.
//!
//! # Layout (36 bytes, little-endian)
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0      | 4    | identifier `DBLK` |
//! | 4      | 2    | data kind |
//! | 6      | 2    | compression id |
//! | 8      | 4    | sector size |
//! | 12     | 4    | compressed length |
//! | 16     | 8    | CRC64 of the compressed payload |
//! | 24     | 4    | uncompressed length |
//! | 28     | 8    | CRC64 of the uncompressed data |
//!
//! The compressed payload follows immediately.  Blocks are immutable once
//! written.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::codec::{get_codec, CompressionType};
use crate::crc64::crc64;
use crate::error::{ImageError, Result};
use crate::types::{BlockType, DataType};

pub const BLOCK_HEADER_SIZE: usize = 36;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub identifier:  u32,
    pub data_type:   u16,
    pub compression: u16,
    pub sector_size: u32,
    pub cmp_length:  u32,
    pub cmp_crc64:   u64,
    pub length:      u32,
    pub crc64:       u64,
}

impl BlockHeader {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BLOCK_HEADER_SIZE);
        let _ = out.write_u32::<LittleEndian>(self.identifier);
        let _ = out.write_u16::<LittleEndian>(self.data_type);
        let _ = out.write_u16::<LittleEndian>(self.compression);
        let _ = out.write_u32::<LittleEndian>(self.sector_size);
        let _ = out.write_u32::<LittleEndian>(self.cmp_length);
        let _ = out.write_u64::<LittleEndian>(self.cmp_crc64);
        let _ = out.write_u32::<LittleEndian>(self.length);
        let _ = out.write_u64::<LittleEndian>(self.crc64);
        out
    }

    /// Decode, failing unless the identifier is `DBLK`.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < BLOCK_HEADER_SIZE {
            return Err(ImageError::truncated("block header", BLOCK_HEADER_SIZE, buf.len()));
        }
        let mut r = buf;
        let header = Self {
            identifier:  r.read_u32::<LittleEndian>()?,
            data_type:   r.read_u16::<LittleEndian>()?,
            compression: r.read_u16::<LittleEndian>()?,
            sector_size: r.read_u32::<LittleEndian>()?,
            cmp_length:  r.read_u32::<LittleEndian>()?,
            cmp_crc64:   r.read_u64::<LittleEndian>()?,
            length:      r.read_u32::<LittleEndian>()?,
            crc64:       r.read_u64::<LittleEndian>()?,
        };
        if header.identifier != BlockType::DataBlock as u32 {
            return Err(ImageError::format(format!(
                "expected data block, found identifier {:08x}",
                header.identifier
            )));
        }
        Ok(header)
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        reader.read_exact(&mut buf)?;
        Self::from_bytes(&buf)
    }

    pub fn data_type(&self) -> Option<DataType> {
        DataType::from_u16(self.data_type)
    }

    /// Total bytes the block occupies in the container.
    pub fn stored_size(&self) -> u64 {
        BLOCK_HEADER_SIZE as u64 + u64::from(self.cmp_length)
    }
}

/// Compress `data` into a block.
///
/// When compression does not shrink the payload the block is stored with
/// compression `None` instead, so a block never grows past its raw size.
pub fn encode_block(
    data_type:   DataType,
    sector_size: u32,
    data:        &[u8],
    compression: CompressionType,
    dictionary:  u32,
) -> Result<(BlockHeader, Vec<u8>)> {
    let length = u32::try_from(data.len())
        .map_err(|_| ImageError::format(format!("block of {} bytes is too large", data.len())))?;

    let (compression, payload) = match compression {
        CompressionType::None => (CompressionType::None, data.to_vec()),
        c => {
            let packed = get_codec(c, dictionary).compress(data)?;
            if packed.len() >= data.len() {
                (CompressionType::None, data.to_vec())
            } else {
                (c, packed)
            }
        }
    };

    let header = BlockHeader {
        identifier:  BlockType::DataBlock as u32,
        data_type:   data_type.to_u16(),
        compression: compression as u16,
        sector_size,
        cmp_length:  payload.len() as u32,
        cmp_crc64:   crc64(&payload),
        length,
        crc64:       crc64(data),
    };
    Ok((header, payload))
}

/// Check the compressed CRC, decompress, check length and CRC of the result.
///
/// A decompressed length other than the header's is an I/O error; the data
/// is never silently truncated or padded to fit.
pub fn decode_block(header: &BlockHeader, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() != header.cmp_length as usize {
        return Err(ImageError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("block payload has {} bytes, header says {}", payload.len(), header.cmp_length),
        )));
    }
    let computed = crc64(payload);
    if computed != header.cmp_crc64 {
        return Err(ImageError::integrity("compressed block", header.cmp_crc64, computed));
    }

    let compression = CompressionType::from_u16(header.compression)
        .ok_or(ImageError::UnsupportedCompression(header.compression))?;
    // The dictionary size travels inside the LZMA payload itself.
    let codec = get_codec(compression, 0);
    let mut data = codec.decompress(payload)?;

    let length = header.length as usize;
    if data.len() != codec.decoded_len(length) {
        return Err(ImageError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "block decompressed to {} bytes, expected {}",
                data.len(),
                codec.decoded_len(length)
            ),
        )));
    }
    data.truncate(length);

    let computed = crc64(&data);
    if computed != header.crc64 {
        return Err(ImageError::integrity("block data", header.crc64, computed));
    }
    Ok(data)
}

/// Fail unless `len` bytes starting at `start` lie inside the stream.
pub fn check_extent<R: Seek>(reader: &mut R, start: u64, len: u64, what: &str) -> Result<()> {
    let end = reader.seek(SeekFrom::End(0))?;
    if end.saturating_sub(start) < len {
        return Err(ImageError::format(format!(
            "{what} at offset {start} claims {len} bytes, image ends at {end}"
        )));
    }
    Ok(())
}

/// Read an on-disk length's worth of payload, bounded by the stream end.
pub fn read_payload<R: Read + Seek>(reader: &mut R, start: u64, len: u64, what: &str) -> Result<Vec<u8>> {
    check_extent(reader, start, len, what)?;
    reader.seek(SeekFrom::Start(start))?;
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

/// Header and still-compressed payload of the block at `offset`.
pub fn read_raw_block_at<R: Read + Seek>(reader: &mut R, offset: u64) -> Result<(BlockHeader, Vec<u8>)> {
    reader.seek(SeekFrom::Start(offset))?;
    let header = BlockHeader::read(&mut *reader)?;
    let start = offset + BLOCK_HEADER_SIZE as u64;
    let payload = read_payload(reader, start, u64::from(header.cmp_length), "data block")?;
    Ok((header, payload))
}

/// Header and decoded contents of the block at `offset`.
pub fn read_block_at<R: Read + Seek>(reader: &mut R, offset: u64) -> Result<(BlockHeader, Vec<u8>)> {
    let (header, payload) = read_raw_block_at(reader, offset)?;
    let data = decode_block(&header, &payload)?;
    Ok((header, data))
}
