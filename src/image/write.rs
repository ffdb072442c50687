use log::{debug, info};
use std::borrow::Cow;
use std::io::{Read, Seek, SeekFrom, Write};

use super::{DicImage, OpenBlock, State, WriteSession};
use crate::assembler::{split_long, swap_audio_samples, tag_layout, SideArray};
use crate::block::encode_block;
use crate::checksum::encode_checksums;
use crate::codec::CompressionType;
use crate::ddt::pack_locator;
use crate::digest::DigestTracker;
use crate::error::{ImageError, Result};
use crate::index::{Index, IndexEntry};
use crate::metadata::{encode_dump_hardware, DumpHardware, Geometry, ImageMetadata};
use crate::tracks::{encode_tracks, validate_tracks, Track, ISRC_LENGTH};
use crate::types::{BlockType, DataType, MediaTagType, SectorTagType, TrackType};

/// Write `bytes` at the end of the image and return where they landed.
fn append_raw<W: Write + Seek>(session: &mut WriteSession, stream: &mut W, bytes: &[u8]) -> Result<u64> {
    let offset = session.next_offset;
    stream.seek(SeekFrom::Start(offset))?;
    stream.write_all(bytes)?;
    session.next_offset += bytes.len() as u64;
    Ok(offset)
}

fn append_block<W: Write + Seek>(
    session:     &mut WriteSession,
    stream:      &mut W,
    data_type:   DataType,
    sector_size: u32,
    data:        &[u8],
) -> Result<u64> {
    let compression = if session.compress { CompressionType::Lzma } else { CompressionType::None };
    let (header, payload) = encode_block(data_type, sector_size, data, compression, session.dictionary)?;
    let mut bytes = header.to_bytes();
    bytes.extend_from_slice(&payload);
    append_raw(session, stream, &bytes)
}

/// Compress and write the open block, if any, and index it.
fn flush_open_block<W: Write + Seek>(session: &mut WriteSession, stream: &mut W, index: &mut Index) -> Result<()> {
    let block = match session.open_block.take() {
        Some(b) if b.sectors > 0 => b,
        _ => return Ok(()),
    };
    let (header, payload) =
        encode_block(DataType::UserData, block.sector_size, &block.data, block.compression, session.dictionary)?;
    stream.seek(SeekFrom::Start(block.offset))?;
    header.write(&mut *stream)?;
    stream.write_all(&payload)?;
    index.push(IndexEntry::new(BlockType::DataBlock, DataType::UserData, block.offset));
    session.next_offset = block.offset + header.stored_size();
    debug!(
        "flushed block at {}: {} sectors of {} bytes, {} -> {} bytes ({})",
        block.offset,
        block.sectors,
        block.sector_size,
        header.length,
        header.cmp_length,
        CompressionType::from_u16(header.compression).map_or("?", CompressionType::name),
    );
    Ok(())
}

impl<S: Read + Write + Seek> DicImage<S> {
    fn require_tracks(&self) -> Result<()> {
        if self.media_type.is_optical() && self.tracks.is_empty() {
            return Err(ImageError::write_state("optical media need tracks before sectors are written"));
        }
        Ok(())
    }

    /// User-data size expected at `address`, and its track type on optical
    /// media.
    fn expected_user_size(&self, address: u64) -> Result<(Option<TrackType>, usize)> {
        self.require_tracks()?;
        if self.media_type.is_optical() {
            let track = self.track_at(address)?;
            Ok((Some(track.track_type), track.bytes_per_sector as usize))
        } else {
            Ok((None, self.sector_size as usize))
        }
    }

    /// Write the user data of one sector.
    ///
    /// Content already stored in this session is referenced instead of
    /// written again.  Writing an address twice repoints it; the old copy
    /// stays in its block.
    pub fn write_sector(&mut self, address: u64, data: &[u8]) -> Result<()> {
        self.session_mut()?;
        self.check_range(address, 1)?;
        let (track_type, size) = self.expected_user_size(address)?;
        if data.len() != size {
            return Err(ImageError::write_state(format!(
                "sector {address} needs {size} bytes, got {}",
                data.len()
            )));
        }
        self.store_sector(address, data, track_type == Some(TrackType::Audio))
    }

    fn store_sector(&mut self, address: u64, data: &[u8], audio: bool) -> Result<()> {
        let Self { state, ddt, stream, index, media_type, .. } = self;
        let session = match state {
            State::Writing(session) => session,
            _ => return Err(ImageError::write_state("image is not open for writing")),
        };

        let stored: Cow<'_, [u8]> = if audio && media_type.audio_is_byte_swapped() {
            let mut swapped = data.to_vec();
            swap_audio_samples(&mut swapped);
            Cow::Owned(swapped)
        } else {
            Cow::Borrowed(data)
        };

        let key = session.dedup.key(&stored);
        if let Some(locator) = key.as_ref().and_then(|k| session.dedup.lookup(k)) {
            ddt.set(stream, address, locator)?;
            session.digests.observe(address, data);
            session.sectors_written = true;
            session.modified = true;
            return Ok(());
        }

        let compression = match (session.compress, audio) {
            (false, _)    => CompressionType::None,
            (true, true)  => CompressionType::Flac,
            (true, false) => CompressionType::Lzma,
        };
        let sector_size = stored.len() as u32;
        let shift = ddt.shift();
        let must_flush = session.open_block.as_ref().map_or(false, |b| {
            b.sector_size != sector_size || b.compression != compression || b.sectors >= 1u64 << shift
        });
        if must_flush {
            flush_open_block(session, stream, index)?;
        }

        let next_offset = session.next_offset;
        let block = session.open_block.get_or_insert_with(|| OpenBlock {
            offset: next_offset,
            sector_size,
            compression,
            sectors: 0,
            data: Vec::new(),
        });
        let locator = pack_locator(block.offset, block.sectors, shift)?;
        ddt.set(stream, address, locator)?;
        block.data.extend_from_slice(&stored);
        block.sectors += 1;

        if let Some(k) = key {
            session.dedup.record(k, locator);
        }
        session.digests.observe(address, data);
        session.sectors_written = true;
        session.modified = true;
        Ok(())
    }

    /// Write consecutive sectors.  On optical media the run must stay inside
    /// one track.
    pub fn write_sectors(&mut self, address: u64, data: &[u8]) -> Result<()> {
        self.session_mut()?;
        if data.is_empty() {
            return Ok(());
        }
        self.check_range(address, 1)?;
        let (_, size) = self.expected_user_size(address)?;
        if data.len() % size != 0 {
            return Err(ImageError::write_state(format!(
                "{} bytes is not a whole number of {size}-byte sectors",
                data.len()
            )));
        }
        let count = (data.len() / size) as u64;
        self.check_range(address, count)?;
        if self.media_type.is_optical() {
            self.track_span(address, count)?;
        }
        for (i, sector) in data.chunks_exact(size).enumerate() {
            self.write_sector(address + i as u64, sector)?;
        }
        Ok(())
    }

    /// Write a whole raw sector.  CD data sectors are split into prefix,
    /// user data and suffix; block media take user data only.
    pub fn write_sector_long(&mut self, address: u64, data: &[u8]) -> Result<()> {
        self.session_mut()?;
        self.check_range(address, 1)?;
        if !self.media_type.is_optical() {
            return self.write_sector(address, data);
        }
        self.require_tracks()?;
        let track = self.track_at(address)?;
        let (track_type, raw) = (track.track_type, track.raw_bytes_per_sector as usize);
        if data.len() != raw {
            return Err(ImageError::write_state(format!(
                "long sector {address} needs {raw} bytes, got {}",
                data.len()
            )));
        }

        let parts = split_long(track_type, data);
        self.write_sector(address, parts.user)?;
        if let Some(prefix) = parts.prefix {
            self.side.put(SideArray::Prefix, address, prefix);
        }
        if let Some(suffix) = parts.suffix {
            self.side.put(SideArray::Suffix, address, suffix);
        }
        Ok(())
    }

    pub fn write_sectors_long(&mut self, address: u64, data: &[u8]) -> Result<()> {
        self.session_mut()?;
        if data.is_empty() {
            return Ok(());
        }
        self.check_range(address, 1)?;
        let size = if self.media_type.is_optical() {
            self.require_tracks()?;
            self.track_at(address)?.raw_bytes_per_sector as usize
        } else {
            self.sector_size as usize
        };
        if data.len() % size != 0 {
            return Err(ImageError::write_state(format!(
                "{} bytes is not a whole number of {size}-byte long sectors",
                data.len()
            )));
        }
        let count = (data.len() / size) as u64;
        self.check_range(address, count)?;
        if self.media_type.is_optical() {
            self.track_span(address, count)?;
        }
        for (i, sector) in data.chunks_exact(size).enumerate() {
            self.write_sector_long(address + i as u64, sector)?;
        }
        Ok(())
    }

    /// Store one sector tag.  Flags and ISRC apply to the whole track that
    /// holds `address`.
    pub fn write_sector_tag(&mut self, address: u64, tag: SectorTagType, data: &[u8]) -> Result<()> {
        self.session_mut()?;
        self.check_range(address, 1)?;
        if !self.media_type.is_optical() {
            return Err(ImageError::TagNotApplicable { tag, track_type: TrackType::Data });
        }
        self.require_tracks()?;
        let track = self.track_at(address)?;
        let (sequence, track_type) = (track.sequence, track.track_type);

        match tag {
            SectorTagType::CdTrackFlags => {
                let [flags] = data else {
                    return Err(ImageError::write_state("track flags are a single byte"));
                };
                self.track_flags.insert(sequence, *flags);
                self.session_mut()?.tracks_dirty = true;
            }
            SectorTagType::CdTrackIsrc => {
                let code: Vec<u8> = data.iter().copied().take_while(|b| *b != 0).collect();
                if code.len() > ISRC_LENGTH || !code.is_ascii() {
                    return Err(ImageError::write_state(format!(
                        "ISRC must be at most {ISRC_LENGTH} ASCII bytes"
                    )));
                }
                self.track_isrc.insert(sequence, String::from_utf8_lossy(&code).into_owned());
                self.session_mut()?.tracks_dirty = true;
            }
            _ => {
                let layout = tag_layout(track_type, tag)?;
                if data.len() != layout.size {
                    return Err(ImageError::write_state(format!(
                        "{tag:?} needs {} bytes, got {}",
                        layout.size,
                        data.len()
                    )));
                }
                self.side.write_tag(&layout, address, data);
            }
        }
        self.session_mut()?.modified = true;
        Ok(())
    }

    pub fn write_media_tag(&mut self, tag: MediaTagType, data: &[u8]) -> Result<()> {
        let session = self.session_mut()?;
        session.dirty_tags.insert(tag);
        session.modified = true;
        self.media_tags.insert(tag, data.to_vec());
        Ok(())
    }

    /// Replace the track layout.  Tracks must cover every sector exactly once.
    pub fn set_tracks(&mut self, tracks: Vec<Track>) -> Result<()> {
        self.session_mut()?;
        if !self.media_type.is_optical() {
            return Err(ImageError::Unsupported(format!("{:?} media have no tracks", self.media_type)));
        }
        validate_tracks(&tracks, self.ddt.entries()).map_err(ImageError::WriteState)?;
        let session = self.session_mut()?;
        session.tracks_dirty = true;
        session.modified = true;
        self.tracks = tracks;
        Ok(())
    }

    pub fn set_geometry(&mut self, geometry: Geometry) -> Result<()> {
        let session = self.session_mut()?;
        session.geometry_dirty = true;
        session.modified = true;
        self.geometry = Some(geometry);
        Ok(())
    }

    pub fn set_metadata(&mut self, metadata: ImageMetadata) -> Result<()> {
        let session = self.session_mut()?;
        session.metadata_dirty = true;
        session.modified = true;
        self.metadata = metadata;
        Ok(())
    }

    pub fn set_dump_hardware(&mut self, dump_hardware: Vec<DumpHardware>) -> Result<()> {
        let session = self.session_mut()?;
        session.dump_dirty = true;
        session.modified = true;
        self.dump_hardware = dump_hardware;
        Ok(())
    }

    /// Finish the write session.
    ///
    /// Flushes the open block, writes every changed side block, the DDT and
    /// a new index, and finally rewrites the header.  An append session that
    /// changed nothing only rewrites the header.
    pub fn close(&mut self) -> Result<()> {
        let mut session = match std::mem::replace(&mut self.state, State::Closed) {
            State::Writing(session) => session,
            other => {
                self.state = other;
                return Err(ImageError::write_state("image is not open for writing"));
            }
        };

        flush_open_block(&mut session, &mut self.stream, &mut self.index)?;

        if session.appending && !session.modified {
            self.write_header()?;
            info!("append session closed without changes");
            return Ok(());
        }

        for tag in &session.dirty_tags.clone() {
            if let Some(data) = self.media_tags.get(tag) {
                let offset = append_block(&mut session, &mut self.stream, DataType::MediaTag(*tag), 0, data)?;
                self.index.replace(BlockType::DataBlock, DataType::MediaTag(*tag), offset);
            }
        }

        for array in SideArray::ALL {
            if !self.side.is_dirty(array) {
                continue;
            }
            if let Some(bytes) = self.side.get(array) {
                let offset = append_block(&mut session, &mut self.stream, array.data_type(), array.width() as u32, bytes)?;
                self.index.replace(BlockType::DataBlock, array.data_type(), offset);
            }
        }

        if session.geometry_dirty {
            if let Some(geometry) = self.geometry {
                let offset = append_raw(&mut session, &mut self.stream, &geometry.to_bytes())?;
                self.index.replace(BlockType::GeometryBlock, DataType::NoData, offset);
            }
        }

        if session.metadata_dirty {
            if self.metadata.is_empty() {
                self.index.remove(BlockType::MetadataBlock, DataType::NoData);
            } else {
                let offset = append_raw(&mut session, &mut self.stream, &self.metadata.to_bytes())?;
                self.index.replace(BlockType::MetadataBlock, DataType::NoData, offset);
            }
        }

        if session.dump_dirty {
            if self.dump_hardware.is_empty() {
                self.index.remove(BlockType::DumpHardwareBlock, DataType::NoData);
            } else {
                let bytes = encode_dump_hardware(&self.dump_hardware);
                let offset = append_raw(&mut session, &mut self.stream, &bytes)?;
                self.index.replace(BlockType::DumpHardwareBlock, DataType::NoData, offset);
            }
        }

        if session.tracks_dirty && !self.tracks.is_empty() {
            let bytes = encode_tracks(&self.tracks, &self.track_flags, &self.track_isrc);
            let offset = append_raw(&mut session, &mut self.stream, &bytes)?;
            self.index.replace(BlockType::TracksBlock, DataType::NoData, offset);
        }

        if session.appending {
            if session.sectors_written && !self.checksums.is_empty() {
                debug!("sectors changed, dropping stored whole-image digests");
                self.index.remove(BlockType::ChecksumBlock, DataType::NoData);
                self.checksums.clear();
            }
        } else {
            let digests = std::mem::replace(&mut session.digests, DigestTracker::disabled());
            let sums = digests.finish();
            if !sums.is_empty() {
                let offset = append_raw(&mut session, &mut self.stream, &encode_checksums(&sums))?;
                self.index.replace(BlockType::ChecksumBlock, DataType::NoData, offset);
            }
            self.checksums = sums;
        }

        match self.ddt.to_block(session.dictionary)? {
            Some((header, payload)) => {
                let mut bytes = header.to_bytes();
                bytes.extend_from_slice(&payload);
                let offset = append_raw(&mut session, &mut self.stream, &bytes)?;
                self.index.replace(BlockType::DeduplicationTable, DataType::UserData, offset);
            }
            None => self.ddt.seal(&mut self.stream)?,
        }

        let index_offset = append_raw(&mut session, &mut self.stream, &self.index.to_bytes())?;
        self.header.index_offset = index_offset;
        self.write_header()?;

        info!(
            "closed image: {} index entries, {} data blocks, {} deduplicated sectors, index at {index_offset}",
            self.index.entries.len(),
            self.index.data_blocks().count(),
            session.dedup.hits()
        );
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        self.header.touch();
        self.stream.seek(SeekFrom::Start(0))?;
        self.header.write(&mut self.stream)?;
        self.stream.flush()?;
        Ok(())
    }
}
