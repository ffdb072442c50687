use log::trace;
use std::io::{Read, Seek};

use super::{CachedBlock, DicImage, State};
use crate::assembler::{assemble_long, swap_audio_samples, tag_layout, SideArray};
use crate::block::read_block_at;
use crate::ddt::unpack_locator;
use crate::error::{ImageError, Result};
use crate::types::{DataType, MediaTagType, SectorTagType, TrackType};

fn slice_sector(data: &[u8], sector_size: u32, position: u64, offset: u64) -> Result<Vec<u8>> {
    let size = sector_size as usize;
    let start = position as usize * size;
    data.get(start..start + size)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| ImageError::format(format!("sector {position} lies outside the block at {offset}")))
}

impl<S: Read + Seek> DicImage<S> {
    /// Track type (optical media only) and user-data size of a sector.
    fn user_layout(&self, address: u64) -> Result<(Option<TrackType>, usize)> {
        if self.media_type.is_optical() {
            let track = self.track_at(address)?;
            Ok((Some(track.track_type), track.bytes_per_sector as usize))
        } else {
            Ok((None, self.sector_size as usize))
        }
    }

    fn sector_in_block(&mut self, offset: u64, position: u64) -> Result<Vec<u8>> {
        if let State::Writing(session) = &self.state {
            if let Some(open) = session.open_block.as_ref().filter(|b| b.offset == offset) {
                return slice_sector(&open.data, open.sector_size, position, offset);
            }
        }
        if let Some(cached) = self.block_cache.get(&offset) {
            return slice_sector(&cached.data, cached.sector_size, position, offset);
        }

        trace!("block cache miss at {offset}");
        let (header, data) = read_block_at(&mut self.stream, offset)?;
        if header.data_type() != Some(DataType::UserData) {
            return Err(ImageError::format(format!("block at {offset} does not hold user data")));
        }
        let sector = slice_sector(&data, header.sector_size, position, offset)?;
        self.block_cache.put(offset, CachedBlock { sector_size: header.sector_size, data });
        Ok(sector)
    }

    /// User data of one sector.  A sector never written reads as zeroes.
    pub fn read_sector(&mut self, address: u64) -> Result<Vec<u8>> {
        self.check_range(address, 1)?;
        let (track_type, size) = self.user_layout(address)?;

        let locator = self.ddt.get(&mut self.stream, address)?;
        if locator == 0 {
            return Ok(vec![0u8; size]);
        }
        let (offset, position) = unpack_locator(locator, self.ddt.shift());
        let mut data = self.sector_in_block(offset, position)?;
        if track_type == Some(TrackType::Audio) && self.media_type.audio_is_byte_swapped() {
            swap_audio_samples(&mut data);
        }
        Ok(data)
    }

    /// Consecutive sectors.  On optical media the run must stay inside one
    /// track.
    pub fn read_sectors(&mut self, address: u64, count: u64) -> Result<Vec<u8>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        self.check_range(address, count)?;
        if self.media_type.is_optical() {
            self.track_span(address, count)?;
        }
        let mut out = Vec::new();
        for a in address..address + count {
            out.extend_from_slice(&self.read_sector(a)?);
        }
        Ok(out)
    }

    /// The whole sector as it sits on the medium.
    ///
    /// CD data sectors are rebuilt from the prefix and suffix arrays; when
    /// those were never stored the user data is returned alone.  Sectors on
    /// block media and audio or plain data tracks have no extra pieces.
    pub fn read_sector_long(&mut self, address: u64) -> Result<Vec<u8>> {
        self.check_range(address, 1)?;
        if !self.media_type.is_optical() {
            return self.read_sector(address);
        }
        let track_type = self.track_at(address)?.track_type;
        let user = self.read_sector(address)?;
        Ok(match track_type {
            TrackType::Audio | TrackType::Data => user,
            t => assemble_long(
                t,
                self.side.record(SideArray::Prefix, address),
                &user,
                self.side.record(SideArray::Suffix, address),
            ),
        })
    }

    pub fn read_sectors_long(&mut self, address: u64, count: u64) -> Result<Vec<u8>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        self.check_range(address, count)?;
        if self.media_type.is_optical() {
            self.track_span(address, count)?;
        }
        let mut out = Vec::new();
        for a in address..address + count {
            out.extend_from_slice(&self.read_sector_long(a)?);
        }
        Ok(out)
    }

    /// One sector tag.  Track flags and ISRC are answered for the track that
    /// holds `address`.
    pub fn read_sector_tag(&mut self, address: u64, tag: SectorTagType) -> Result<Vec<u8>> {
        self.check_range(address, 1)?;
        if !self.media_type.is_optical() {
            return Err(ImageError::TagNotApplicable { tag, track_type: TrackType::Data });
        }
        let track = self.track_at(address)?;
        let (sequence, track_type) = (track.sequence, track.track_type);
        match tag {
            SectorTagType::CdTrackFlags => self
                .track_flags
                .get(&sequence)
                .map(|f| vec![*f])
                .ok_or_else(|| ImageError::TagNotPresent(format!("flags of track {sequence}"))),
            SectorTagType::CdTrackIsrc => self
                .track_isrc
                .get(&sequence)
                .map(|isrc| isrc.as_bytes().to_vec())
                .ok_or_else(|| ImageError::TagNotPresent(format!("ISRC of track {sequence}"))),
            _ => {
                let layout = tag_layout(track_type, tag)?;
                self.side
                    .read_tag(&layout, address)
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| ImageError::TagNotPresent(format!("{tag:?}")))
            }
        }
    }

    pub fn read_sectors_tag(&mut self, address: u64, count: u64, tag: SectorTagType) -> Result<Vec<u8>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        self.check_range(address, count)?;
        if self.media_type.is_optical() {
            self.track_span(address, count)?;
        }
        let mut out = Vec::new();
        for a in address..address + count {
            out.extend_from_slice(&self.read_sector_tag(a, tag)?);
        }
        Ok(out)
    }

    pub fn read_media_tag(&self, tag: MediaTagType) -> Result<Vec<u8>> {
        self.media_tags
            .get(&tag)
            .cloned()
            .ok_or_else(|| ImageError::TagNotPresent(format!("{tag:?}")))
    }
}
