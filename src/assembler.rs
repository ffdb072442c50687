//! Long-sector assembly for optical media.
//!
//! A raw CD sector is stored in up to four pieces: the user data in the data
//! blocks, and three whole-image side arrays indexed by absolute sector
//! address.  The prefix array holds 16 bytes per sector (sync + header), the
//! suffix array 288 bytes (EDC, zero fill, ECC P, ECC Q) and the subchannel
//! array 96 bytes.
//!
//! Where each sector tag lives inside those arrays depends only on the track
//! type and is fixed by the format.

use crate::error::{ImageError, Result};
use crate::types::{DataType, SectorTagType, TrackType};
use crate::tracks::CD_RAW_SECTOR_SIZE;

pub const PREFIX_SIZE:     usize = 16;
pub const SUFFIX_SIZE:     usize = 288;
pub const SUBCHANNEL_SIZE: usize = 96;
pub const MODE1_USER_SIZE: usize = 2048;
pub const MODE2_USER_SIZE: usize = 2336;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SideArray {
    Prefix,
    Suffix,
    Subchannel,
}

impl SideArray {
    pub const ALL: [SideArray; 3] = [SideArray::Prefix, SideArray::Suffix, SideArray::Subchannel];

    /// Bytes per sector.
    pub fn width(self) -> usize {
        match self {
            SideArray::Prefix     => PREFIX_SIZE,
            SideArray::Suffix     => SUFFIX_SIZE,
            SideArray::Subchannel => SUBCHANNEL_SIZE,
        }
    }

    pub fn data_type(self) -> DataType {
        match self {
            SideArray::Prefix     => DataType::CdSectorPrefix,
            SideArray::Suffix     => DataType::CdSectorSuffix,
            SideArray::Subchannel => DataType::CdSectorSubchannel,
        }
    }

    pub fn from_data_type(data_type: DataType) -> Option<Self> {
        match data_type {
            DataType::CdSectorPrefix     => Some(SideArray::Prefix),
            DataType::CdSectorSuffix     => Some(SideArray::Suffix),
            DataType::CdSectorSubchannel => Some(SideArray::Subchannel),
            _                            => None,
        }
    }
}

/// Position of one tag inside a side array: `skip` bytes follow the tag
/// before the next sector's record starts at `offset` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagLayout {
    pub source: SideArray,
    pub offset: usize,
    pub size:   usize,
    pub skip:   usize,
}

impl TagLayout {
    const fn new(source: SideArray, offset: usize, size: usize, skip: usize) -> Self {
        Self { source, offset, size, skip }
    }

    pub fn stride(&self) -> usize {
        self.offset + self.size + self.skip
    }

    /// Byte range of this tag for `address` inside its array.
    pub fn range(&self, address: u64) -> std::ops::Range<usize> {
        let start = address as usize * self.stride() + self.offset;
        start..start + self.size
    }
}

/// Where `tag` lives for a sector on a `track_type` track.
pub fn tag_layout(track_type: TrackType, tag: SectorTagType) -> Result<TagLayout> {
    use SectorTagType::*;
    use SideArray::*;
    let layout = match (track_type, tag) {
        (_, CdSectorSubchannel) => TagLayout::new(Subchannel, 0, 96, 0),

        (TrackType::CdMode1, CdSectorSync)   => TagLayout::new(Prefix, 0, 12, 4),
        (TrackType::CdMode1, CdSectorHeader) => TagLayout::new(Prefix, 12, 4, 0),
        (TrackType::CdMode1, CdSectorEcc)    => TagLayout::new(Suffix, 12, 276, 0),
        (TrackType::CdMode1, CdSectorEccP)   => TagLayout::new(Suffix, 12, 172, 104),
        (TrackType::CdMode1, CdSectorEccQ)   => TagLayout::new(Suffix, 184, 104, 0),
        (TrackType::CdMode1, CdSectorEdc)    => TagLayout::new(Suffix, 0, 4, 284),

        (t, CdSectorSync)   if t.is_mode2() => TagLayout::new(Prefix, 0, 12, 4),
        (t, CdSectorHeader) if t.is_mode2() => TagLayout::new(Prefix, 12, 4, 0),

        _ => return Err(ImageError::TagNotApplicable { tag, track_type }),
    };
    Ok(layout)
}

/// Bytes of user data per sector.  `Data` tracks use the image sector size.
pub fn user_data_size(track_type: TrackType, sector_size: u32) -> usize {
    match track_type {
        TrackType::Audio   => CD_RAW_SECTOR_SIZE as usize,
        TrackType::Data    => sector_size as usize,
        TrackType::CdMode1 => MODE1_USER_SIZE,
        _                  => MODE2_USER_SIZE,
    }
}

/// Size of a long sector for a track type.
pub fn long_sector_size(track_type: TrackType, sector_size: u32) -> usize {
    match track_type {
        TrackType::Data => sector_size as usize,
        _               => CD_RAW_SECTOR_SIZE as usize,
    }
}

/// A long sector cut into the pieces the image stores separately.
#[derive(Debug, PartialEq, Eq)]
pub struct LongSectorParts<'a> {
    pub prefix: Option<&'a [u8]>,
    pub user:   &'a [u8],
    pub suffix: Option<&'a [u8]>,
}

pub fn split_long(track_type: TrackType, data: &[u8]) -> LongSectorParts<'_> {
    match track_type {
        TrackType::CdMode1 => LongSectorParts {
            prefix: Some(&data[..PREFIX_SIZE]),
            user:   &data[PREFIX_SIZE..PREFIX_SIZE + MODE1_USER_SIZE],
            suffix: Some(&data[PREFIX_SIZE + MODE1_USER_SIZE..]),
        },
        t if t.is_mode2() => LongSectorParts {
            prefix: Some(&data[..PREFIX_SIZE]),
            user:   &data[PREFIX_SIZE..],
            suffix: None,
        },
        _ => LongSectorParts { prefix: None, user: data, suffix: None },
    }
}

/// Rebuild a long sector.  Missing prefix or suffix pieces leave the result
/// as plain user data.
pub fn assemble_long(track_type: TrackType, prefix: Option<&[u8]>, user: &[u8], suffix: Option<&[u8]>) -> Vec<u8> {
    match (track_type, prefix, suffix) {
        (TrackType::CdMode1, Some(p), Some(s)) => [p, user, s].concat(),
        (t, Some(p), _) if t.is_mode2()        => [p, user].concat(),
        _                                      => user.to_vec(),
    }
}

/// Swap every 16-bit sample in place.
pub fn swap_audio_samples(data: &mut [u8]) {
    for pair in data.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}

/// The three whole-image side arrays, allocated on first use.
#[derive(Debug)]
pub struct SideArrays {
    sectors:    u64,
    prefix:     Option<Vec<u8>>,
    suffix:     Option<Vec<u8>>,
    subchannel: Option<Vec<u8>>,
    dirty:      [bool; 3],
}

impl SideArrays {
    pub fn new(sectors: u64) -> Self {
        Self { sectors, prefix: None, suffix: None, subchannel: None, dirty: [false; 3] }
    }

    fn slot(&self, array: SideArray) -> &Option<Vec<u8>> {
        match array {
            SideArray::Prefix     => &self.prefix,
            SideArray::Suffix     => &self.suffix,
            SideArray::Subchannel => &self.subchannel,
        }
    }

    fn slot_mut(&mut self, array: SideArray) -> &mut Option<Vec<u8>> {
        match array {
            SideArray::Prefix     => &mut self.prefix,
            SideArray::Suffix     => &mut self.suffix,
            SideArray::Subchannel => &mut self.subchannel,
        }
    }

    pub fn get(&self, array: SideArray) -> Option<&[u8]> {
        self.slot(array).as_deref()
    }

    pub fn is_present(&self, array: SideArray) -> bool {
        self.slot(array).is_some()
    }

    /// Arrays changed in this session.
    pub fn is_dirty(&self, array: SideArray) -> bool {
        self.dirty[array as usize]
    }

    /// Install an array loaded from the image.  Its length must be exactly
    /// one record per sector.
    pub fn load(&mut self, array: SideArray, bytes: Vec<u8>) -> Result<()> {
        let expected = self.sectors as usize * array.width();
        if bytes.len() != expected {
            return Err(ImageError::format(format!(
                "{array:?} array has {} bytes, expected {expected}",
                bytes.len()
            )));
        }
        *self.slot_mut(array) = Some(bytes);
        Ok(())
    }

    fn array_mut(&mut self, array: SideArray) -> &mut Vec<u8> {
        let len = self.sectors as usize * array.width();
        self.dirty[array as usize] = true;
        self.slot_mut(array).get_or_insert_with(|| vec![0u8; len])
    }

    /// Store one sector's whole record in `array`.
    pub fn put(&mut self, array: SideArray, address: u64, record: &[u8]) {
        let width = array.width();
        let start = address as usize * width;
        self.array_mut(array)[start..start + width].copy_from_slice(record);
    }

    /// One sector's whole record, if the array exists.
    pub fn record(&self, array: SideArray, address: u64) -> Option<&[u8]> {
        let width = array.width();
        let start = address as usize * width;
        self.get(array).map(|a| &a[start..start + width])
    }

    pub fn write_tag(&mut self, layout: &TagLayout, address: u64, data: &[u8]) {
        let range = layout.range(address);
        self.array_mut(layout.source)[range].copy_from_slice(data);
    }

    pub fn read_tag(&self, layout: &TagLayout, address: u64) -> Option<&[u8]> {
        self.get(layout.source).map(|a| &a[layout.range(address)])
    }
}
