//! Disc-image plugin contract.
//!
//! Every image format a front end can read implements [`MediaImage`]; formats
//! that can also be written implement [`WritableMediaImage`].  Front ends
//! (the `dicf` binary, converters) work against these traits only, so a
//! sibling format can be dropped in without touching them.
//!
//! # Contract
//! - Addresses are absolute, 0-based sector numbers.
//! - `read_sector` returns user data only; `read_sector_long` returns the
//!   sector as it sits on the medium when the format keeps that much.
//! - Multi-sector calls on optical media never cross a track boundary.
//! - `verify_media_image` is tri-state: `Some(true)` sound, `Some(false)`
//!   damaged, `None` when the format cannot tell (for instance while a
//!   write session is still open).
//! - Write calls are rejected before anything is written when the image
//!   is not in a writable state.

use std::io::{Read, Seek, Write};

use crate::error::Result;
use crate::image::{self, DicImage, ImageInfo};
use crate::metadata::{DumpHardware, Geometry, ImageMetadata};
use crate::tracks::{Partition, Session, Track};
use crate::types::{MediaTagType, SectorTagType};

pub trait MediaImage {
    /// Cheap check of whether `source` holds this format.
    fn identify<R: Read + Seek>(source: &mut R) -> bool
    where
        Self: Sized;

    fn info(&self) -> ImageInfo;
    fn read_sector(&mut self, address: u64) -> Result<Vec<u8>>;
    fn read_sectors(&mut self, address: u64, count: u64) -> Result<Vec<u8>>;
    fn read_sector_long(&mut self, address: u64) -> Result<Vec<u8>>;
    fn read_sectors_long(&mut self, address: u64, count: u64) -> Result<Vec<u8>>;
    fn read_sector_tag(&mut self, address: u64, tag: SectorTagType) -> Result<Vec<u8>>;
    fn read_sectors_tag(&mut self, address: u64, count: u64, tag: SectorTagType) -> Result<Vec<u8>>;
    fn read_media_tag(&self, tag: MediaTagType) -> Result<Vec<u8>>;
    fn tracks(&self) -> Vec<Track>;
    fn sessions(&self) -> Vec<Session>;
    fn partitions(&self) -> Vec<Partition>;
    fn verify_media_image(&mut self) -> Result<Option<bool>>;
}

pub trait WritableMediaImage: MediaImage {
    fn write_sector(&mut self, address: u64, data: &[u8]) -> Result<()>;
    fn write_sectors(&mut self, address: u64, data: &[u8]) -> Result<()>;
    fn write_sector_long(&mut self, address: u64, data: &[u8]) -> Result<()>;
    fn write_sectors_long(&mut self, address: u64, data: &[u8]) -> Result<()>;
    fn write_sector_tag(&mut self, address: u64, tag: SectorTagType, data: &[u8]) -> Result<()>;
    fn write_media_tag(&mut self, tag: MediaTagType, data: &[u8]) -> Result<()>;
    fn set_tracks(&mut self, tracks: Vec<Track>) -> Result<()>;
    fn set_geometry(&mut self, geometry: Geometry) -> Result<()>;
    fn set_metadata(&mut self, metadata: ImageMetadata) -> Result<()>;
    fn set_dump_hardware(&mut self, dump_hardware: Vec<DumpHardware>) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

impl<S: Read + Seek> MediaImage for DicImage<S> {
    fn identify<R: Read + Seek>(source: &mut R) -> bool {
        image::identify(source)
    }

    fn info(&self) -> ImageInfo {
        DicImage::info(self)
    }

    fn read_sector(&mut self, address: u64) -> Result<Vec<u8>> {
        DicImage::read_sector(self, address)
    }

    fn read_sectors(&mut self, address: u64, count: u64) -> Result<Vec<u8>> {
        DicImage::read_sectors(self, address, count)
    }

    fn read_sector_long(&mut self, address: u64) -> Result<Vec<u8>> {
        DicImage::read_sector_long(self, address)
    }

    fn read_sectors_long(&mut self, address: u64, count: u64) -> Result<Vec<u8>> {
        DicImage::read_sectors_long(self, address, count)
    }

    fn read_sector_tag(&mut self, address: u64, tag: SectorTagType) -> Result<Vec<u8>> {
        DicImage::read_sector_tag(self, address, tag)
    }

    fn read_sectors_tag(&mut self, address: u64, count: u64, tag: SectorTagType) -> Result<Vec<u8>> {
        DicImage::read_sectors_tag(self, address, count, tag)
    }

    fn read_media_tag(&self, tag: MediaTagType) -> Result<Vec<u8>> {
        DicImage::read_media_tag(self, tag)
    }

    fn tracks(&self) -> Vec<Track> {
        DicImage::tracks(self).to_vec()
    }

    fn sessions(&self) -> Vec<Session> {
        DicImage::sessions(self)
    }

    fn partitions(&self) -> Vec<Partition> {
        DicImage::partitions(self)
    }

    fn verify_media_image(&mut self) -> Result<Option<bool>> {
        DicImage::verify_media_image(self)
    }
}

impl<S: Read + Write + Seek> WritableMediaImage for DicImage<S> {
    fn write_sector(&mut self, address: u64, data: &[u8]) -> Result<()> {
        DicImage::write_sector(self, address, data)
    }

    fn write_sectors(&mut self, address: u64, data: &[u8]) -> Result<()> {
        DicImage::write_sectors(self, address, data)
    }

    fn write_sector_long(&mut self, address: u64, data: &[u8]) -> Result<()> {
        DicImage::write_sector_long(self, address, data)
    }

    fn write_sectors_long(&mut self, address: u64, data: &[u8]) -> Result<()> {
        DicImage::write_sectors_long(self, address, data)
    }

    fn write_sector_tag(&mut self, address: u64, tag: SectorTagType, data: &[u8]) -> Result<()> {
        DicImage::write_sector_tag(self, address, tag, data)
    }

    fn write_media_tag(&mut self, tag: MediaTagType, data: &[u8]) -> Result<()> {
        DicImage::write_media_tag(self, tag, data)
    }

    fn set_tracks(&mut self, tracks: Vec<Track>) -> Result<()> {
        DicImage::set_tracks(self, tracks)
    }

    fn set_geometry(&mut self, geometry: Geometry) -> Result<()> {
        DicImage::set_geometry(self, geometry)
    }

    fn set_metadata(&mut self, metadata: ImageMetadata) -> Result<()> {
        DicImage::set_metadata(self, metadata)
    }

    fn set_dump_hardware(&mut self, dump_hardware: Vec<DumpHardware>) -> Result<()> {
        DicImage::set_dump_hardware(self, dump_hardware)
    }

    fn close(&mut self) -> Result<()> {
        DicImage::close(self)
    }
}

/// Copy every user-data sector of `source` into `target`, one sector at a
/// time, then close the target.
pub fn copy_user_data<M: MediaImage + ?Sized, W: WritableMediaImage + ?Sized>(
    source: &mut M,
    target: &mut W,
    sectors: u64,
) -> Result<()> {
    for address in 0..sectors {
        let data = source.read_sector(address)?;
        target.write_sector(address, &data)?;
    }
    target.close()
}
