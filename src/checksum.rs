//! Checksum block: the whole-image digests stored at close.
//!
//! Header (17 bytes): identifier `CKSM` (4), body length (4), entry count
//! (1), CRC64 of the body (8).  Each entry is algorithm (1), digest length
//! (4), digest bytes.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek, SeekFrom};

use crate::crc64::crc64;
use crate::error::{ImageError, Result};
use crate::types::{BlockType, ChecksumAlgorithm};

pub const CHECKSUM_HEADER_SIZE: usize = 17;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumEntry {
    pub algorithm: ChecksumAlgorithm,
    pub digest:    Vec<u8>,
}

impl ChecksumEntry {
    pub fn new(algorithm: ChecksumAlgorithm, digest: Vec<u8>) -> Self {
        Self { algorithm, digest }
    }

    /// Display form: hex for cryptographic digests, the text itself for SpamSum.
    pub fn display(&self) -> String {
        match self.algorithm {
            ChecksumAlgorithm::SpamSum => String::from_utf8_lossy(&self.digest).into_owned(),
            _                          => hex::encode(&self.digest),
        }
    }
}

pub fn encode_checksums(entries: &[ChecksumEntry]) -> Vec<u8> {
    let mut body = Vec::new();
    for e in entries {
        body.push(e.algorithm as u8);
        let _ = body.write_u32::<LittleEndian>(e.digest.len() as u32);
        body.extend_from_slice(&e.digest);
    }
    let mut out = Vec::with_capacity(CHECKSUM_HEADER_SIZE + body.len());
    let _ = out.write_u32::<LittleEndian>(BlockType::ChecksumBlock as u32);
    let _ = out.write_u32::<LittleEndian>(body.len() as u32);
    out.push(entries.len() as u8);
    let _ = out.write_u64::<LittleEndian>(crc64(&body));
    out.extend_from_slice(&body);
    out
}

pub fn read_checksums<R: Read + Seek>(reader: &mut R, offset: u64) -> Result<Vec<ChecksumEntry>> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut head = [0u8; CHECKSUM_HEADER_SIZE];
    reader.read_exact(&mut head)?;
    let mut r = &head[..];
    let identifier = r.read_u32::<LittleEndian>()?;
    let length     = r.read_u32::<LittleEndian>()?;
    let count      = r.read_u8()?;
    let expected   = r.read_u64::<LittleEndian>()?;
    if identifier != BlockType::ChecksumBlock as u32 {
        return Err(ImageError::format(format!("expected checksum block at {offset}")));
    }

    let mut body = vec![0u8; length as usize];
    reader.read_exact(&mut body)?;
    let computed = crc64(&body);
    if computed != expected {
        return Err(ImageError::integrity("checksum block", expected, computed));
    }

    let mut entries = Vec::with_capacity(count as usize);
    let mut r = &body[..];
    for _ in 0..count {
        let algorithm = r.read_u8()?;
        let len = r.read_u32::<LittleEndian>()? as usize;
        if len > r.len() {
            return Err(ImageError::truncated("checksum entry", len, r.len()));
        }
        let (digest, rest) = r.split_at(len);
        r = rest;
        // Algorithms this build does not know are skipped.
        if let Some(algorithm) = ChecksumAlgorithm::from_u8(algorithm) {
            entries.push(ChecksumEntry::new(algorithm, digest.to_vec()));
        }
    }
    Ok(entries)
}
