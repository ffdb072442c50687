//! Image header: the only structure at a fixed position (offset 0).
//!
//! # Layout (104 bytes, little-endian)
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0      | 8    | identifier `DICMFRMT` |
//! | 8      | 64   | application name, UTF-16LE, NUL padded |
//! | 72     | 1    | image major version |
//! | 73     | 1    | image minor version |
//! | 74     | 1    | application major version |
//! | 75     | 1    | application minor version |
//! | 76     | 4    | media type |
//! | 80     | 8    | index offset |
//! | 88     | 8    | creation time (FILETIME ticks) |
//! | 96     | 8    | last written time (FILETIME ticks) |
//!
//! The header is written as a placeholder when an image is created and
//! rewritten last on close, once the index offset is known.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use std::io::{Read, Write};

use crate::error::{ImageError, Result};
use crate::types::MediaType;

pub const MAGIC: &[u8; 8] = b"DICMFRMT";
pub const HEADER_SIZE: usize = 104;
pub const APPLICATION_FIELD: usize = 64;
pub const FORMAT_MAJOR: u8 = 1;
pub const FORMAT_MINOR: u8 = 0;
pub const APPLICATION_NAME: &str = "dicformat";

/// Seconds between 1601-01-01 (FILETIME epoch) and 1970-01-01.
const FILETIME_EPOCH_DELTA: i64 = 11_644_473_600;
const TICKS_PER_SECOND: i64 = 10_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DicHeader {
    pub application:       String,
    pub image_major:       u8,
    pub image_minor:       u8,
    pub application_major: u8,
    pub application_minor: u8,
    pub media_type:        u32,
    pub index_offset:      u64,
    pub creation_time:     i64,
    pub last_written_time: i64,
}

impl DicHeader {
    pub fn new(media_type: MediaType) -> Self {
        let now = to_filetime(Utc::now());
        Self {
            application:       APPLICATION_NAME.to_string(),
            image_major:       FORMAT_MAJOR,
            image_minor:       FORMAT_MINOR,
            application_major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
            application_minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
            media_type:        media_type as u32,
            index_offset:      0,
            creation_time:     now,
            last_written_time: now,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE);
        out.extend_from_slice(MAGIC);

        let mut app = [0u8; APPLICATION_FIELD];
        for (i, unit) in self.application.encode_utf16().take(APPLICATION_FIELD / 2).enumerate() {
            app[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
        out.extend_from_slice(&app);

        out.push(self.image_major);
        out.push(self.image_minor);
        out.push(self.application_major);
        out.push(self.application_minor);
        // Writes into a Vec cannot fail.
        let _ = out.write_u32::<LittleEndian>(self.media_type);
        let _ = out.write_u64::<LittleEndian>(self.index_offset);
        let _ = out.write_i64::<LittleEndian>(self.creation_time);
        let _ = out.write_i64::<LittleEndian>(self.last_written_time);
        out
    }

    /// Decode and validate.  Rejects a bad identifier and any major version
    /// newer than [`FORMAT_MAJOR`]; older or equal versions are accepted.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(ImageError::truncated("header", HEADER_SIZE, buf.len()));
        }
        if &buf[0..8] != MAGIC {
            return Err(ImageError::InvalidMagic);
        }

        let units: Vec<u16> = buf[8..8 + APPLICATION_FIELD]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .take_while(|u| *u != 0)
            .collect();
        let application = String::from_utf16_lossy(&units);

        let mut r = &buf[72..HEADER_SIZE];
        let image_major       = r.read_u8()?;
        let image_minor       = r.read_u8()?;
        let application_major = r.read_u8()?;
        let application_minor = r.read_u8()?;
        if image_major > FORMAT_MAJOR {
            return Err(ImageError::UnsupportedVersion { major: image_major, minor: image_minor });
        }

        Ok(Self {
            application,
            image_major,
            image_minor,
            application_major,
            application_minor,
            media_type:        r.read_u32::<LittleEndian>()?,
            index_offset:      r.read_u64::<LittleEndian>()?,
            creation_time:     r.read_i64::<LittleEndian>()?,
            last_written_time: r.read_i64::<LittleEndian>()?,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut buf)?;
        Self::from_bytes(&buf)
    }

    pub fn creation(&self) -> DateTime<Utc> {
        from_filetime(self.creation_time)
    }

    pub fn last_written(&self) -> DateTime<Utc> {
        from_filetime(self.last_written_time)
    }

    pub fn touch(&mut self) {
        self.last_written_time = to_filetime(Utc::now());
    }
}

pub fn to_filetime(t: DateTime<Utc>) -> i64 {
    (t.timestamp() + FILETIME_EPOCH_DELTA) * TICKS_PER_SECOND
        + i64::from(t.timestamp_subsec_nanos() / 100)
}

pub fn from_filetime(ticks: i64) -> DateTime<Utc> {
    let secs  = ticks.div_euclid(TICKS_PER_SECOND) - FILETIME_EPOCH_DELTA;
    let nanos = (ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    Utc.timestamp_opt(secs, nanos).single().unwrap_or_default()
}
