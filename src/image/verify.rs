use log::{debug, warn};
use std::io::{Read, Seek};

use super::DicImage;
use crate::block::{read_payload, read_raw_block_at};
use crate::checksum::read_checksums;
use crate::codec::CompressionType;
use crate::crc64::crc64;
use crate::ddt::{DdtHeader, DeduplicationTable, DDT_HEADER_SIZE};
use crate::error::{ImageError, Result};
use crate::index::IndexEntry;
use crate::metadata::read_dump_hardware;
use crate::tracks::read_tracks;
use crate::types::BlockType;

impl<S: Read + Seek> DicImage<S> {
    /// Check the CRC64 of every indexed structure.
    ///
    /// Returns `None` while a write session is open, since blocks and the
    /// index are not final yet.
    pub fn verify_media_image(&mut self) -> Result<Option<bool>> {
        if self.is_writing() {
            return Ok(None);
        }
        let entries = self.index.entries.clone();
        let mut sound = true;
        for entry in &entries {
            if let Err(e) = self.verify_entry(entry) {
                warn!("{:?} at offset {} failed verification: {e}", entry.kind(), entry.offset);
                sound = false;
            }
        }
        debug!("verified {} index entries, image is {}", entries.len(), if sound { "sound" } else { "damaged" });
        Ok(Some(sound))
    }

    fn verify_entry(&mut self, entry: &IndexEntry) -> Result<()> {
        match entry.kind() {
            Some(BlockType::DataBlock) => {
                let (header, payload) = read_raw_block_at(&mut self.stream, entry.offset)?;
                let computed = crc64(&payload);
                if computed != header.cmp_crc64 {
                    return Err(ImageError::integrity("data block", header.cmp_crc64, computed));
                }
            }
            Some(BlockType::DeduplicationTable) => {
                let header = DdtHeader::read_at(&mut self.stream, entry.offset)?;
                let (expected, computed) = if header.compression == CompressionType::None as u16 {
                    let crc = DeduplicationTable::region_crc(&mut self.stream, entry.offset, header.entries)?;
                    (header.crc64, crc)
                } else {
                    let start = entry.offset + DDT_HEADER_SIZE as u64;
                    let payload = read_payload(&mut self.stream, start, header.cmp_length, "deduplication table")?;
                    (header.cmp_crc64, crc64(&payload))
                };
                if expected != computed {
                    return Err(ImageError::integrity("deduplication table", expected, computed));
                }
            }
            Some(BlockType::TracksBlock) => {
                read_tracks(&mut self.stream, entry.offset, self.sector_size)?;
            }
            Some(BlockType::ChecksumBlock) => {
                read_checksums(&mut self.stream, entry.offset)?;
            }
            Some(BlockType::DumpHardwareBlock) => {
                read_dump_hardware(&mut self.stream, entry.offset)?;
            }
            _ => {}
        }
        Ok(())
    }
}
