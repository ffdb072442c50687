//! [`DicImage`]: the container state machine.
//!
//! ```no_run
//! use dicformat::image::DicImage;
//! use dicformat::options::CreateOptions;
//! use dicformat::types::MediaType;
//!
//! // Write
//! let mut img = DicImage::create_file("disk.dicf", MediaType::GenericHdd, 1024, 512, &CreateOptions::default())?;
//! img.write_sector(0, &[0x55; 512])?;
//! img.close()?;
//!
//! // Read
//! let mut img = DicImage::open_file("disk.dicf")?;
//! assert_eq!(img.read_sector(0)?, vec![0x55; 512]);
//! # Ok::<(), dicformat::error::ImageError>(())
//! ```
//!
//! An image is created (or reopened for append) in the writing state and
//! becomes closed after [`DicImage::close`].  An image opened with
//! [`DicImage::open`] is read-only.  Reads work in every state; writes only
//! while writing.

mod read;
mod verify;
mod write;

use chrono::SecondsFormat;
use log::{debug, info, warn};
use lru::LruCache;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::Path;

use crate::assembler::{SideArray, SideArrays};
use crate::block::read_block_at;
use crate::checksum::{read_checksums, ChecksumEntry};
use crate::codec::CompressionType;
use crate::ddt::{DeduplicationTable, DDT_HEADER_SIZE};
use crate::dedup::ContentDeduplicator;
use crate::digest::DigestTracker;
use crate::error::{ImageError, Result};
use crate::header::{DicHeader, HEADER_SIZE};
use crate::index::{Index, IndexEntry};
use crate::metadata::{read_dump_hardware, DumpHardware, Geometry, ImageMetadata};
use crate::options::CreateOptions;
use crate::tracks::{self, read_tracks, validate_tracks, Partition, Session, Track};
use crate::types::{BlockType, DataType, MediaTagType, MediaType, TrackSubchannelType, TrackType};

/// Decoded blocks kept in memory, in bytes.
pub const BLOCK_CACHE_BYTES: u64 = 256 * 1024 * 1024;

struct CachedBlock {
    sector_size: u32,
    data:        Vec<u8>,
}

/// The block currently being filled.  Its offset is reserved when it opens,
/// so locators can point into it before it reaches the stream.
struct OpenBlock {
    offset:      u64,
    sector_size: u32,
    compression: CompressionType,
    sectors:     u64,
    data:        Vec<u8>,
}

struct WriteSession {
    appending:       bool,
    compress:        bool,
    dictionary:      u32,
    dedup:           ContentDeduplicator,
    digests:         DigestTracker,
    open_block:      Option<OpenBlock>,
    /// Where the next block lands: always the end of the stream.
    next_offset:     u64,
    modified:        bool,
    sectors_written: bool,
    dirty_tags:      BTreeSet<MediaTagType>,
    tracks_dirty:    bool,
    geometry_dirty:  bool,
    metadata_dirty:  bool,
    dump_dirty:      bool,
}

impl WriteSession {
    fn new(options: &CreateOptions, appending: bool, next_offset: u64) -> Self {
        let digests = if appending {
            DigestTracker::disabled()
        } else {
            DigestTracker::new(options.md5, options.sha1, options.sha256, options.spamsum)
        };
        Self {
            appending,
            compress: options.compress,
            dictionary: options.dictionary,
            dedup: ContentDeduplicator::new(options.deduplicate),
            digests,
            open_block: None,
            next_offset,
            modified: !appending,
            sectors_written: false,
            dirty_tags: BTreeSet::new(),
            tracks_dirty: false,
            geometry_dirty: false,
            metadata_dirty: false,
            dump_dirty: false,
        }
    }
}

enum State {
    ReadOnly,
    Writing(Box<WriteSession>),
    Closed,
}

/// Summary of an image, as printed by `dicf info`.
#[derive(Debug, Clone, Serialize)]
pub struct ImageInfo {
    pub application:         String,
    pub application_version: String,
    pub image_version:       String,
    pub media_type:          MediaType,
    pub sectors:             u64,
    pub sector_size:         u32,
    pub sectors_per_block:   u64,
    pub ddt_in_memory:       bool,
    pub data_blocks:         usize,
    pub created:             String,
    pub last_written:        String,
    pub tracks:              usize,
    pub sessions:            usize,
    pub media_tags:          Vec<MediaTagType>,
    pub side_arrays:         Vec<String>,
    pub geometry:            Option<Geometry>,
    pub metadata:            ImageMetadata,
    pub dump_hardware:       Vec<DumpHardware>,
    pub checksums:           Vec<(String, String)>,
}

pub struct DicImage<S> {
    stream:        S,
    header:        DicHeader,
    index:         Index,
    state:         State,
    media_type:    MediaType,
    sector_size:   u32,
    ddt:           DeduplicationTable,
    tracks:        Vec<Track>,
    track_flags:   BTreeMap<u8, u8>,
    track_isrc:    BTreeMap<u8, String>,
    side:          SideArrays,
    media_tags:    BTreeMap<MediaTagType, Vec<u8>>,
    geometry:      Option<Geometry>,
    metadata:      ImageMetadata,
    dump_hardware: Vec<DumpHardware>,
    checksums:     Vec<ChecksumEntry>,
    block_cache:   LruCache<u64, CachedBlock>,
}

fn block_cache(sector_size: u32, shift: u8) -> LruCache<u64, CachedBlock> {
    let block_bytes = (u64::from(sector_size.max(1)) << shift).max(1);
    let capacity = (BLOCK_CACHE_BYTES / block_bytes).max(1) as usize;
    LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN))
}

/// True when `source` starts with a header this build can read.
pub fn identify<R: Read + Seek>(source: &mut R) -> bool {
    if source.seek(SeekFrom::Start(0)).is_err() {
        return false;
    }
    DicHeader::read(&mut *source).is_ok()
}

impl<S: Read + Write + Seek> DicImage<S> {
    /// Start a new image on `stream`, which is overwritten from offset 0.
    pub fn create(
        mut stream:  S,
        media_type:  MediaType,
        sectors:     u64,
        sector_size: u32,
        options:     &CreateOptions,
    ) -> Result<Self> {
        let shift = options.shift()?;
        if sectors == 0 {
            return Err(ImageError::write_state("image must have at least one sector"));
        }
        if sector_size == 0 {
            return Err(ImageError::write_state("sector size must not be zero"));
        }

        let header = DicHeader::new(media_type);
        stream.seek(SeekFrom::Start(0))?;
        header.write(&mut stream)?;

        let mut index = Index::default();
        let mut next_offset = HEADER_SIZE as u64;
        let ddt_bytes = sectors.saturating_mul(8);
        let ddt = if ddt_bytes > options.max_ddt_size {
            let ddt = DeduplicationTable::create_on_disk(&mut stream, next_offset, sectors, shift, sector_size)?;
            index.push(IndexEntry::new(BlockType::DeduplicationTable, DataType::UserData, next_offset));
            next_offset += DDT_HEADER_SIZE as u64 + ddt_bytes;
            ddt
        } else {
            DeduplicationTable::in_memory(sectors, shift, sector_size)
        };
        info!(
            "creating {media_type:?} image: {sectors} sectors of {sector_size} bytes, {} sectors per block, {} DDT",
            1u64 << shift,
            if ddt.is_in_memory() { "in-memory" } else { "on-disk" }
        );

        Ok(Self {
            stream,
            header,
            index,
            state: State::Writing(Box::new(WriteSession::new(options, false, next_offset))),
            media_type,
            sector_size,
            ddt,
            tracks: Vec::new(),
            track_flags: BTreeMap::new(),
            track_isrc: BTreeMap::new(),
            side: SideArrays::new(sectors),
            media_tags: BTreeMap::new(),
            geometry: None,
            metadata: ImageMetadata::default(),
            dump_hardware: Vec::new(),
            checksums: Vec::new(),
            block_cache: block_cache(sector_size, shift),
        })
    }

    /// Reopen a closed image to write more into it.
    ///
    /// The media type and sector count must match the existing image.  The
    /// existing block size and DDT storage are kept whatever `options` say;
    /// no whole-image digests are computed in an append session.
    pub fn append(stream: S, media_type: MediaType, sectors: u64, options: &CreateOptions) -> Result<Self> {
        options.validate()?;
        let mut image = Self::load(stream)?;
        if image.media_type != media_type {
            return Err(ImageError::write_state(format!(
                "cannot append {media_type:?} to a {:?} image",
                image.media_type
            )));
        }
        if image.ddt.entries() != sectors {
            return Err(ImageError::write_state(format!(
                "cannot append {sectors} sectors to an image of {}",
                image.ddt.entries()
            )));
        }
        let end = image.stream.seek(SeekFrom::End(0))?;
        image.state = State::Writing(Box::new(WriteSession::new(options, true, end)));
        info!("appending to image, new blocks start at {end}");
        Ok(image)
    }
}

impl<S: Read + Seek> DicImage<S> {
    /// Open an image for reading.
    pub fn open(stream: S) -> Result<Self> {
        Self::load(stream)
    }

    fn load(mut stream: S) -> Result<Self> {
        stream.seek(SeekFrom::Start(0))?;
        let header = DicHeader::read(&mut stream)?;
        let media_type = MediaType::from_u32(header.media_type)
            .ok_or_else(|| ImageError::format(format!("unknown media type {}", header.media_type)))?;
        let index = Index::read_at(&mut stream, header.index_offset)?;

        let ddt_offset = index
            .find(BlockType::DeduplicationTable, DataType::UserData)
            .map(|e| e.offset)
            .ok_or_else(|| ImageError::format("image has no deduplication table"))?;
        let ddt = DeduplicationTable::load(&mut stream, ddt_offset)?;

        let sector_size = ddt.sector_size();
        if sector_size == 0 {
            return Err(ImageError::format("deduplication table declares a zero sector size"));
        }

        let mut image = Self {
            stream,
            block_cache: block_cache(sector_size, ddt.shift()),
            side: SideArrays::new(ddt.entries()),
            header,
            index,
            state: State::ReadOnly,
            media_type,
            sector_size,
            ddt,
            tracks: Vec::new(),
            track_flags: BTreeMap::new(),
            track_isrc: BTreeMap::new(),
            media_tags: BTreeMap::new(),
            geometry: None,
            metadata: ImageMetadata::default(),
            dump_hardware: Vec::new(),
            checksums: Vec::new(),
        };

        let entries = image.index.entries.clone();
        for entry in &entries {
            match entry.kind() {
                Some(BlockType::TracksBlock) => image.load_entry(entry)?,
                Some(BlockType::DeduplicationTable) | Some(BlockType::Index) => {}
                Some(kind) => {
                    if let Err(e) = image.load_entry(entry) {
                        warn!("discarding {kind:?} at offset {}: {e}", entry.offset);
                    }
                }
                None => debug!(
                    "skipping unknown index entry {:08x}/{} at offset {}",
                    entry.block_type, entry.data_type, entry.offset
                ),
            }
        }
        image.finish_tracks()?;

        info!(
            "opened {:?} image: {} sectors, {} data blocks, {} tracks",
            image.media_type,
            image.ddt.entries(),
            image.index.data_blocks().count(),
            image.tracks.len()
        );
        Ok(image)
    }

    fn load_entry(&mut self, entry: &IndexEntry) -> Result<()> {
        match entry.kind() {
            Some(BlockType::DataBlock) => match entry.data_kind() {
                Some(DataType::UserData) | Some(DataType::NoData) => {}
                Some(DataType::MediaTag(tag)) => {
                    let (_, data) = read_block_at(&mut self.stream, entry.offset)?;
                    self.media_tags.insert(tag, data);
                }
                Some(other) => {
                    if let Some(array) = SideArray::from_data_type(other) {
                        let (_, data) = read_block_at(&mut self.stream, entry.offset)?;
                        self.side.load(array, data)?;
                    }
                }
                None => debug!("skipping data block of unknown kind {} at {}", entry.data_type, entry.offset),
            },
            Some(BlockType::GeometryBlock) => {
                self.geometry = Some(Geometry::read_at(&mut self.stream, entry.offset)?);
            }
            Some(BlockType::MetadataBlock) => {
                self.metadata = ImageMetadata::read_at(&mut self.stream, entry.offset)?;
            }
            Some(BlockType::TracksBlock) => {
                let table = read_tracks(&mut self.stream, entry.offset, self.sector_size)?;
                self.tracks      = table.tracks;
                self.track_flags = table.flags;
                self.track_isrc  = table.isrc;
            }
            Some(BlockType::ChecksumBlock) => {
                self.checksums = read_checksums(&mut self.stream, entry.offset)?;
            }
            Some(BlockType::DumpHardwareBlock) => {
                self.dump_hardware = read_dump_hardware(&mut self.stream, entry.offset)?;
            }
            Some(BlockType::DeduplicationTable) | Some(BlockType::Index) | None => {}
        }
        Ok(())
    }

    /// Check stored tracks, or synthesise one data track for optical media
    /// that carries none.
    fn finish_tracks(&mut self) -> Result<()> {
        let sectors = self.ddt.entries();
        if self.tracks.is_empty() {
            if self.media_type.is_optical() && sectors > 0 {
                self.tracks.push(Track::new(1, 1, TrackType::Data, 0, sectors - 1, self.sector_size));
            }
        } else {
            validate_tracks(&self.tracks, sectors).map_err(ImageError::Format)?;
        }
        if self.side.is_present(SideArray::Subchannel) {
            for t in &mut self.tracks {
                t.subchannel_type = TrackSubchannelType::RawInterleaved;
            }
        }
        Ok(())
    }
}

impl DicImage<File> {
    pub fn create_file<P: AsRef<Path>>(
        path:        P,
        media_type:  MediaType,
        sectors:     u64,
        sector_size: u32,
        options:     &CreateOptions,
    ) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(path)?;
        Self::create(file, media_type, sectors, sector_size, options)
    }

    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(File::open(path)?)
    }

    pub fn append_file<P: AsRef<Path>>(path: P, media_type: MediaType, sectors: u64, options: &CreateOptions) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::append(file, media_type, sectors, options)
    }
}

impl<S> DicImage<S> {
    pub fn into_inner(self) -> S {
        self.stream
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn sectors(&self) -> u64 {
        self.ddt.entries()
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    /// Sectors per block, as a power of two.
    pub fn shift(&self) -> u8 {
        self.ddt.shift()
    }

    pub fn header(&self) -> &DicHeader {
        &self.header
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn is_writing(&self) -> bool {
        matches!(self.state, State::Writing(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn sessions(&self) -> Vec<Session> {
        tracks::sessions(&self.tracks)
    }

    pub fn partitions(&self) -> Vec<Partition> {
        tracks::partitions(&self.tracks)
    }

    pub fn geometry(&self) -> Option<Geometry> {
        self.geometry
    }

    pub fn metadata(&self) -> &ImageMetadata {
        &self.metadata
    }

    pub fn dump_hardware(&self) -> &[DumpHardware] {
        &self.dump_hardware
    }

    /// Whole-image digests stored in the image.
    pub fn checksums(&self) -> &[ChecksumEntry] {
        &self.checksums
    }

    pub fn media_tag_types(&self) -> impl Iterator<Item = MediaTagType> + '_ {
        self.media_tags.keys().copied()
    }

    /// Sectors that the current write session stored by reference to
    /// content it had already seen.
    pub fn deduplicated_sectors(&self) -> u64 {
        match &self.state {
            State::Writing(session) => session.dedup.hits(),
            _                       => 0,
        }
    }

    pub fn info(&self) -> ImageInfo {
        ImageInfo {
            application:         self.header.application.clone(),
            application_version: format!("{}.{}", self.header.application_major, self.header.application_minor),
            image_version:       format!("{}.{}", self.header.image_major, self.header.image_minor),
            media_type:          self.media_type,
            sectors:             self.ddt.entries(),
            sector_size:         self.sector_size,
            sectors_per_block:   1u64 << self.ddt.shift(),
            ddt_in_memory:       self.ddt.is_in_memory(),
            data_blocks:         self.index.data_blocks().count(),
            created:             self.header.creation().to_rfc3339_opts(SecondsFormat::Secs, true),
            last_written:        self.header.last_written().to_rfc3339_opts(SecondsFormat::Secs, true),
            tracks:              self.tracks.len(),
            sessions:            self.sessions().len(),
            media_tags:          self.media_tags.keys().copied().collect(),
            side_arrays:         SideArray::ALL
                .iter()
                .filter(|a| self.side.is_present(**a))
                .map(|a| format!("{a:?}").to_lowercase())
                .collect(),
            geometry:            self.geometry,
            metadata:            self.metadata.clone(),
            dump_hardware:       self.dump_hardware.clone(),
            checksums:           self
                .checksums
                .iter()
                .map(|c| (c.algorithm.name().to_string(), c.display()))
                .collect(),
        }
    }

    fn session_mut(&mut self) -> Result<&mut WriteSession> {
        match &mut self.state {
            State::Writing(session) => Ok(&mut **session),
            State::ReadOnly         => Err(ImageError::write_state("image is open read-only")),
            State::Closed           => Err(ImageError::write_state("image is closed")),
        }
    }

    fn track_at(&self, address: u64) -> Result<&Track> {
        tracks::track_for(&self.tracks, address)
            .ok_or_else(|| ImageError::format(format!("no track contains sector {address}")))
    }

    fn check_range(&self, address: u64, count: u64) -> Result<()> {
        let sectors = self.ddt.entries();
        match address.checked_add(count) {
            Some(end) if address < sectors && end <= sectors => Ok(()),
            _ => Err(ImageError::OutOfRange { address: address.saturating_add(count.max(1) - 1), sectors }),
        }
    }

    /// The track holding every sector of `address..address + count`.
    fn track_span(&self, address: u64, count: u64) -> Result<&Track> {
        let track = self.track_at(address)?;
        if address + count - 1 > track.end_sector {
            return Err(ImageError::CrossesTrack { address, count, track: track.sequence });
        }
        Ok(track)
    }
}
