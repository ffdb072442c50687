//! Descriptive side blocks: media/drive metadata, geometry and the list of
//! hardware that produced the dump.
//!
//! # Metadata block
//! A 112-byte fixed header (`META`, total block size, media sequence, last
//! media sequence, then twelve offset/length pairs) followed by a string
//! arena.  Strings are UTF-16LE with a terminating NUL; lengths include the
//! NUL and offsets are relative to the start of the block.  A zero length
//! means the field is absent.
//!
//! # Geometry block
//! `GEOM`, cylinders, heads, sectors per track; four `u32`.
//!
//! # Dump-hardware block
//! Header (18 bytes): `DMP*`, entry count (2), body length (4), CRC64 (8).
//! Each entry is nine `u32` (eight string lengths and an extent count),
//! then the NUL-terminated UTF-8 strings, then `(start, end)` pairs of `u64`.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek, SeekFrom};

use crate::crc64::crc64;
use crate::error::{ImageError, Result};
use crate::types::BlockType;

pub const METADATA_HEADER_SIZE:      usize = 112;
pub const GEOMETRY_BLOCK_SIZE:       usize = 16;
pub const DUMP_HARDWARE_HEADER_SIZE: usize = 18;
const DUMP_ENTRY_FIXED:              usize = 36;
const METADATA_STRINGS:              usize = 12;

// ── Metadata ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageMetadata {
    pub media_sequence:          i32,
    pub last_media_sequence:     i32,
    pub creator:                 Option<String>,
    pub comments:                Option<String>,
    pub media_title:             Option<String>,
    pub media_manufacturer:      Option<String>,
    pub media_model:             Option<String>,
    pub media_serial_number:     Option<String>,
    pub media_barcode:           Option<String>,
    pub media_part_number:       Option<String>,
    pub drive_manufacturer:      Option<String>,
    pub drive_model:             Option<String>,
    pub drive_serial_number:     Option<String>,
    pub drive_firmware_revision: Option<String>,
}

impl ImageMetadata {
    fn strings(&self) -> [&Option<String>; METADATA_STRINGS] {
        [
            &self.creator,
            &self.comments,
            &self.media_title,
            &self.media_manufacturer,
            &self.media_model,
            &self.media_serial_number,
            &self.media_barcode,
            &self.media_part_number,
            &self.drive_manufacturer,
            &self.drive_model,
            &self.drive_serial_number,
            &self.drive_firmware_revision,
        ]
    }

    fn strings_mut(&mut self) -> [&mut Option<String>; METADATA_STRINGS] {
        [
            &mut self.creator,
            &mut self.comments,
            &mut self.media_title,
            &mut self.media_manufacturer,
            &mut self.media_model,
            &mut self.media_serial_number,
            &mut self.media_barcode,
            &mut self.media_part_number,
            &mut self.drive_manufacturer,
            &mut self.drive_model,
            &mut self.drive_serial_number,
            &mut self.drive_firmware_revision,
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.media_sequence == 0
            && self.last_media_sequence == 0
            && self.strings().iter().all(|s| s.is_none())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut arena = Vec::new();
        let mut pairs = Vec::with_capacity(METADATA_STRINGS);
        for s in self.strings() {
            match s {
                Some(text) => {
                    let offset = (METADATA_HEADER_SIZE + arena.len()) as u32;
                    for unit in text.encode_utf16().chain(std::iter::once(0)) {
                        arena.extend_from_slice(&unit.to_le_bytes());
                    }
                    let length = (METADATA_HEADER_SIZE + arena.len()) as u32 - offset;
                    pairs.push((offset, length));
                }
                None => pairs.push((0, 0)),
            }
        }

        let mut out = Vec::with_capacity(METADATA_HEADER_SIZE + arena.len());
        let _ = out.write_u32::<LittleEndian>(BlockType::MetadataBlock as u32);
        let _ = out.write_u32::<LittleEndian>((METADATA_HEADER_SIZE + arena.len()) as u32);
        let _ = out.write_i32::<LittleEndian>(self.media_sequence);
        let _ = out.write_i32::<LittleEndian>(self.last_media_sequence);
        for (offset, length) in pairs {
            let _ = out.write_u32::<LittleEndian>(offset);
            let _ = out.write_u32::<LittleEndian>(length);
        }
        out.extend_from_slice(&arena);
        out
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < METADATA_HEADER_SIZE {
            return Err(ImageError::truncated("metadata block", METADATA_HEADER_SIZE, buf.len()));
        }
        let mut r = buf;
        let identifier = r.read_u32::<LittleEndian>()?;
        if identifier != BlockType::MetadataBlock as u32 {
            return Err(ImageError::format("expected metadata block"));
        }
        let block_size = r.read_u32::<LittleEndian>()? as usize;
        if block_size > buf.len() {
            return Err(ImageError::truncated("metadata block", block_size, buf.len()));
        }
        let block = &buf[..block_size];

        let mut meta = ImageMetadata {
            media_sequence:      r.read_i32::<LittleEndian>()?,
            last_media_sequence: r.read_i32::<LittleEndian>()?,
            ..Default::default()
        };
        for slot in meta.strings_mut() {
            let offset = r.read_u32::<LittleEndian>()? as usize;
            let length = r.read_u32::<LittleEndian>()? as usize;
            if length == 0 {
                continue;
            }
            let bytes = offset
                .checked_add(length)
                .and_then(|end| block.get(offset..end))
                .ok_or_else(|| ImageError::format(format!("metadata string at {offset}+{length} outside block")))?;
            *slot = Some(decode_utf16z(bytes));
        }
        Ok(meta)
    }

    pub fn read_at<R: Read + Seek>(reader: &mut R, offset: u64) -> Result<Self> {
        reader.seek(SeekFrom::Start(offset))?;
        let mut head = vec![0u8; METADATA_HEADER_SIZE];
        reader.read_exact(&mut head)?;
        let block_size = u32::from_le_bytes([head[4], head[5], head[6], head[7]]) as usize;
        if block_size > METADATA_HEADER_SIZE {
            head.resize(block_size, 0);
            reader.read_exact(&mut head[METADATA_HEADER_SIZE..])?;
        }
        Self::from_bytes(&head)
    }
}

fn decode_utf16z(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|u| *u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

// ── Geometry ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Geometry {
    pub cylinders:         u32,
    pub heads:             u32,
    pub sectors_per_track: u32,
}

impl Geometry {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(GEOMETRY_BLOCK_SIZE);
        let _ = out.write_u32::<LittleEndian>(BlockType::GeometryBlock as u32);
        let _ = out.write_u32::<LittleEndian>(self.cylinders);
        let _ = out.write_u32::<LittleEndian>(self.heads);
        let _ = out.write_u32::<LittleEndian>(self.sectors_per_track);
        out
    }

    pub fn read_at<R: Read + Seek>(reader: &mut R, offset: u64) -> Result<Self> {
        reader.seek(SeekFrom::Start(offset))?;
        if reader.read_u32::<LittleEndian>()? != BlockType::GeometryBlock as u32 {
            return Err(ImageError::format("expected geometry block"));
        }
        Ok(Self {
            cylinders:         reader.read_u32::<LittleEndian>()?,
            heads:             reader.read_u32::<LittleEndian>()?,
            sectors_per_track: reader.read_u32::<LittleEndian>()?,
        })
    }
}

// ── Dump hardware ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DumpHardware {
    pub manufacturer:     Option<String>,
    pub model:            Option<String>,
    pub revision:         Option<String>,
    pub firmware:         Option<String>,
    pub serial:           Option<String>,
    pub software_name:    Option<String>,
    pub software_version: Option<String>,
    pub software_os:      Option<String>,
    /// Inclusive sector ranges this drive read.
    pub extents:          Vec<(u64, u64)>,
}

impl DumpHardware {
    fn strings(&self) -> [&Option<String>; 8] {
        [
            &self.manufacturer,
            &self.model,
            &self.revision,
            &self.firmware,
            &self.serial,
            &self.software_name,
            &self.software_version,
            &self.software_os,
        ]
    }
}

fn utf8z(s: &Option<String>) -> Vec<u8> {
    match s {
        Some(text) => {
            let mut v = text.as_bytes().to_vec();
            v.push(0);
            v
        }
        None => Vec::new(),
    }
}

pub fn encode_dump_hardware(list: &[DumpHardware]) -> Vec<u8> {
    let mut body = Vec::new();
    for dump in list {
        let strings: Vec<Vec<u8>> = dump.strings().iter().map(|s| utf8z(s)).collect();
        for s in &strings {
            let _ = body.write_u32::<LittleEndian>(s.len() as u32);
        }
        let _ = body.write_u32::<LittleEndian>(dump.extents.len() as u32);
        for s in &strings {
            body.extend_from_slice(s);
        }
        for &(start, end) in &dump.extents {
            let _ = body.write_u64::<LittleEndian>(start);
            let _ = body.write_u64::<LittleEndian>(end);
        }
    }
    let mut out = Vec::with_capacity(DUMP_HARDWARE_HEADER_SIZE + body.len());
    let _ = out.write_u32::<LittleEndian>(BlockType::DumpHardwareBlock as u32);
    let _ = out.write_u16::<LittleEndian>(list.len() as u16);
    let _ = out.write_u32::<LittleEndian>(body.len() as u32);
    let _ = out.write_u64::<LittleEndian>(crc64(&body));
    out.extend_from_slice(&body);
    out
}

fn take<'a>(r: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if n > r.len() {
        return Err(ImageError::truncated("dump hardware entry", n, r.len()));
    }
    let (head, rest) = r.split_at(n);
    *r = rest;
    Ok(head)
}

pub fn read_dump_hardware<R: Read + Seek>(reader: &mut R, offset: u64) -> Result<Vec<DumpHardware>> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut head = [0u8; DUMP_HARDWARE_HEADER_SIZE];
    reader.read_exact(&mut head)?;
    let mut r = &head[..];
    let identifier = r.read_u32::<LittleEndian>()?;
    let count      = r.read_u16::<LittleEndian>()?;
    let length     = r.read_u32::<LittleEndian>()?;
    let expected   = r.read_u64::<LittleEndian>()?;
    if identifier != BlockType::DumpHardwareBlock as u32 {
        return Err(ImageError::format("expected dump hardware block"));
    }
    let mut body = vec![0u8; length as usize];
    reader.read_exact(&mut body)?;
    let computed = crc64(&body);
    if computed != expected {
        return Err(ImageError::integrity("dump hardware block", expected, computed));
    }

    let mut list = Vec::with_capacity(count as usize);
    let mut r = &body[..];
    for _ in 0..count {
        let mut fixed = take(&mut r, DUMP_ENTRY_FIXED)?;
        let mut lengths = [0usize; 8];
        for l in lengths.iter_mut() {
            *l = fixed.read_u32::<LittleEndian>()? as usize;
        }
        let extents = fixed.read_u32::<LittleEndian>()? as usize;

        let mut strings: Vec<Option<String>> = Vec::with_capacity(8);
        for len in lengths {
            let bytes = take(&mut r, len)?;
            strings.push((len > 0).then(|| {
                let text = bytes.strip_suffix(&[0]).unwrap_or(bytes);
                String::from_utf8_lossy(text).into_owned()
            }));
        }
        let mut dump = DumpHardware::default();
        let mut it = strings.into_iter();
        for slot in [
            &mut dump.manufacturer,
            &mut dump.model,
            &mut dump.revision,
            &mut dump.firmware,
            &mut dump.serial,
            &mut dump.software_name,
            &mut dump.software_version,
            &mut dump.software_os,
        ] {
            *slot = it.next().flatten();
        }
        let mut ext = take(&mut r, extents * 16)?;
        for _ in 0..extents {
            let start = ext.read_u64::<LittleEndian>()?;
            let end   = ext.read_u64::<LittleEndian>()?;
            dump.extents.push((start, end));
        }
        list.push(dump);
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn metadata_strings_live_in_the_arena() {
        let meta = ImageMetadata {
            media_sequence: 1,
            last_media_sequence: 2,
            creator: Some("Natalia".into()),
            media_title: Some("Disc «Ω»".into()),
            drive_model: Some("PX-760A".into()),
            ..Default::default()
        };
        let bytes = meta.to_bytes();
        // "Natalia" + NUL in UTF-16 starts right after the fixed header.
        assert_eq!(u32::from_le_bytes(bytes[16..20].try_into().unwrap()), METADATA_HEADER_SIZE as u32);
        assert_eq!(u32::from_le_bytes(bytes[20..24].try_into().unwrap()), 16);
        assert_eq!(ImageMetadata::from_bytes(&bytes).unwrap(), meta);
        assert_eq!(ImageMetadata::read_at(&mut Cursor::new(bytes), 0).unwrap(), meta);
        assert!(ImageMetadata::default().is_empty());
    }

    #[test]
    fn metadata_rejects_strings_outside_block() {
        let mut bytes = ImageMetadata { creator: Some("x".into()), ..Default::default() }.to_bytes();
        bytes[16..20].copy_from_slice(&5000u32.to_le_bytes());
        assert!(ImageMetadata::from_bytes(&bytes).is_err());
    }

    #[test]
    fn geometry_reads_back() {
        let g = Geometry { cylinders: 1024, heads: 16, sectors_per_track: 63 };
        assert_eq!(Geometry::read_at(&mut Cursor::new(g.to_bytes()), 0).unwrap(), g);
    }

    #[test]
    fn dump_hardware_reads_back() {
        let list = vec![
            DumpHardware {
                manufacturer: Some("PLEXTOR".into()),
                model: Some("DVDR PX-716A".into()),
                firmware: Some("1.11".into()),
                software_name: Some("dicformat".into()),
                extents: vec![(0, 9999), (10_500, 20_000)],
                ..Default::default()
            },
            DumpHardware { serial: Some("ABC".into()), ..Default::default() },
        ];
        let bytes = encode_dump_hardware(&list);
        assert_eq!(read_dump_hardware(&mut Cursor::new(bytes), 0).unwrap(), list);
    }

    #[test]
    fn damaged_dump_hardware_is_detected() {
        let mut bytes = encode_dump_hardware(&[DumpHardware { model: Some("m".into()), ..Default::default() }]);
        let n = bytes.len();
        bytes[n - 1] ^= 0x40;
        assert!(matches!(
            read_dump_hardware(&mut Cursor::new(bytes), 0),
            Err(ImageError::Integrity { .. })
        ));
    }
}
