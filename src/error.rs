use std::io;
use thiserror::Error;

use crate::codec::CodecError;
use crate::types::{SectorTagType, TrackType};

/// Every failure an image operation can report.
///
/// Open-time failures on mandatory structures (`InvalidMagic`,
/// `UnsupportedVersion`, `Format`, `Integrity` on the index/DDT/tracks) abort
/// the open.  Range and tag errors abort only the call that raised them.
/// `WriteState` is always raised before the stream is touched.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Invalid magic number")]
    InvalidMagic,
    #[error("Unsupported image version: {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },
    #[error("Format error: {0}")]
    Format(String),
    #[error("CRC64 mismatch in {what}: expected {expected:016x}, computed {computed:016x}")]
    Integrity { what: String, expected: u64, computed: u64 },
    #[error("Sector address {address} out of range (image has {sectors} sectors)")]
    OutOfRange { address: u64, sectors: u64 },
    #[error("Request for {count} sectors at {address} crosses the end of track {track}")]
    CrossesTrack { address: u64, count: u64, track: u8 },
    #[error("Unsupported compression id {0}")]
    UnsupportedCompression(u16),
    #[error("Tag {tag:?} not applicable to {track_type:?} track")]
    TagNotApplicable { tag: SectorTagType, track_type: TrackType },
    #[error("Tag {0} not present in image")]
    TagNotPresent(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Write rejected: {0}")]
    WriteState(String),
    #[error("Invalid option: {0}")]
    InvalidOption(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ImageError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        ImageError::Format(msg.into())
    }

    pub(crate) fn write_state(msg: impl Into<String>) -> Self {
        ImageError::WriteState(msg.into())
    }

    pub(crate) fn integrity(what: impl Into<String>, expected: u64, computed: u64) -> Self {
        ImageError::Integrity { what: what.into(), expected, computed }
    }

    /// Short fixed-layout record: the stream ended before the record did.
    pub(crate) fn truncated(what: &str, need: usize, have: usize) -> Self {
        ImageError::Format(format!("{what} truncated: need {need} bytes, have {have}"))
    }
}

pub type Result<T> = std::result::Result<T, ImageError>;
