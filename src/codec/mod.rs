//! Block codecs.
//!
//! Two classes of content are compressed differently:
//!   - everything that is not Red Book audio goes through [`LzmaCodec`];
//!   - sectors of audio tracks (2352 bytes, 588 stereo 16-bit samples) go
//!     through [`FlacCodec`], which is lossless and bit-exact.
//!
//! [`NoneCodec`] stores the payload verbatim.  It is chosen when compression
//! is disabled, and as a fallback when a codec does not shrink the data.
//!
//! # LZMA side parameters
//! An LZMA payload is a `.lzma` (LZMA-alone) stream: the 5-byte properties
//! record (lc/lp/pb byte followed by the little-endian dictionary size), an
//! unknown-size marker, then the range-coded data with an end marker.  The
//! decoder replays the properties from the stored bytes; nothing about them
//! lives in the block header.
//!
//! Encoding goes through liblzma (`xz2`) so matches are searched over the
//! configured window; decoding stays pure Rust (`lzma-rs`).

use std::io::{self, Cursor, Write};
use thiserror::Error;
use xz2::stream::{LzmaOptions, Stream};
use xz2::write::XzEncoder;

use flacenc::component::BitRepr;
use flacenc::error::Verify;

/// Length of the LZMA properties record that prefixes every LZMA payload.
pub const LZMA_PROPERTIES_LENGTH: usize = 5;
/// Default LZMA dictionary size (32 MiB).
pub const DEFAULT_DICTIONARY_SIZE: u32 = 1 << 25;
/// Smallest window liblzma accepts.
pub const MIN_DICTIONARY_SIZE: u32 = 1 << 12;
const LZMA_PRESET: u32 = 6;

/// Red Book audio: 2352 bytes = 588 samples × 2 channels × 16 bits.
pub const SAMPLES_PER_SECTOR: usize = 588;
const FLAC_CHANNELS:        usize = 2;
const FLAC_BITS:            usize = 16;
const FLAC_SAMPLE_RATE:     usize = 44_100;
const FLAC_MIN_BLOCK:       usize = 16;
const FLAC_MAX_BLOCK:       usize = 4608;
const BYTES_PER_FRAME:      usize = FLAC_CHANNELS * FLAC_BITS / 8;

// ── Compression ids ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CompressionType {
    None = 0,
    Lzma = 1,
    Flac = 2,
}

impl CompressionType {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Lzma),
            2 => Some(CompressionType::Flac),
            _ => None,
        }
    }

    /// Human-readable name, for diagnostics only.
    pub fn name(self) -> &'static str {
        match self {
            CompressionType::None => "none",
            CompressionType::Lzma => "lzma",
            CompressionType::Flac => "flac",
        }
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn compression(&self) -> CompressionType;
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Number of bytes `decompress` yields for a block whose logical length
    /// is `length`.  Codecs that pad their input report the padded size.
    fn decoded_len(&self, length: usize) -> usize {
        length
    }
}

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn compression(&self) -> CompressionType { CompressionType::None }
    fn compress(&self, data: &[u8])   -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
}

// ── LZMA ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LzmaProperties {
    pub lc:              u8,
    pub lp:              u8,
    pub pb:              u8,
    pub dictionary_size: u32,
}

impl LzmaProperties {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < LZMA_PROPERTIES_LENGTH {
            return None;
        }
        let mut props = payload[0];
        let lc = props % 9;
        props /= 9;
        let lp = props % 5;
        let pb = props / 5;
        if pb > 4 {
            return None;
        }
        let dictionary_size = u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]);
        Some(Self { lc, lp, pb, dictionary_size })
    }
}

pub struct LzmaCodec {
    pub dictionary_size: u32,
}

impl LzmaCodec {
    /// Encoder window for an input of `len` bytes: the configured size, cut
    /// down to the input since nothing can match further back than that.
    fn window_for(&self, len: usize) -> u32 {
        let input = u32::try_from(len).unwrap_or(u32::MAX).max(MIN_DICTIONARY_SIZE);
        self.dictionary_size.clamp(MIN_DICTIONARY_SIZE, input)
    }
}

impl Codec for LzmaCodec {
    fn compression(&self) -> CompressionType { CompressionType::Lzma }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut options = LzmaOptions::new_preset(LZMA_PRESET)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        options.dict_size(self.window_for(data.len()));
        let stream = Stream::new_lzma_encoder(&options)
            .map_err(|e| CodecError::Compression(e.to_string()))?;

        let mut encoder = XzEncoder::new_stream(Vec::with_capacity(data.len() / 2), stream);
        encoder
            .write_all(data)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        let out = encoder
            .finish()
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        if out.len() < LZMA_PROPERTIES_LENGTH {
            return Err(CodecError::Compression("LZMA stream without properties".into()));
        }
        Ok(out)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        if LzmaProperties::parse(data).is_none() {
            return Err(CodecError::Decompression("invalid LZMA properties".into()));
        }
        let mut out = Vec::new();
        lzma_rs::lzma_decompress(&mut Cursor::new(data), &mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

// ── FLAC ─────────────────────────────────────────────────────────────────────

/// Lossless audio codec for Red Book sectors.
///
/// The encoder works on fixed-size sample blocks.  Input is zero-padded up
/// to a whole number of blocks; [`Codec::decoded_len`] reports the padded
/// size so the block layer can validate and trim.
pub struct FlacCodec;

impl FlacCodec {
    fn block_size(samples: usize) -> usize {
        samples.clamp(FLAC_MIN_BLOCK, FLAC_MAX_BLOCK)
    }

    fn padded_samples(samples: usize) -> usize {
        let block = Self::block_size(samples);
        samples.div_ceil(block) * block
    }
}

impl Codec for FlacCodec {
    fn compression(&self) -> CompressionType { CompressionType::Flac }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        if data.is_empty() || data.len() % BYTES_PER_FRAME != 0 {
            return Err(CodecError::Compression(format!(
                "audio payload of {} bytes is not whole stereo 16-bit frames",
                data.len()
            )));
        }
        let frames  = data.len() / BYTES_PER_FRAME;
        let padded  = Self::padded_samples(frames);
        let mut samples: Vec<i32> = data
            .chunks_exact(2)
            .map(|c| i32::from(i16::from_le_bytes([c[0], c[1]])))
            .collect();
        samples.resize(padded * FLAC_CHANNELS, 0);

        let mut config = flacenc::config::Encoder::default();
        config.block_size = Self::block_size(frames);
        let config = config
            .into_verified()
            .map_err(|(_, e)| CodecError::Compression(format!("{e:?}")))?;
        let source = flacenc::source::MemSource::from_samples(
            &samples, FLAC_CHANNELS, FLAC_BITS, FLAC_SAMPLE_RATE,
        );
        let stream = flacenc::encode_with_fixed_block_size(&config, source, config.block_size)
            .map_err(|e| CodecError::Compression(format!("{e:?}")))?;

        let mut sink = flacenc::bitsink::ByteSink::new();
        stream
            .write(&mut sink)
            .map_err(|e| CodecError::Compression(format!("{e:?}")))?;
        Ok(sink.as_slice().to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut reader = claxon::FlacReader::new(Cursor::new(data))
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        let mut out = Vec::new();
        for sample in reader.samples() {
            let s = sample.map_err(|e| CodecError::Decompression(e.to_string()))?;
            out.extend_from_slice(&(s as i16).to_le_bytes());
        }
        Ok(out)
    }

    fn decoded_len(&self, length: usize) -> usize {
        Self::padded_samples(length / BYTES_PER_FRAME) * BYTES_PER_FRAME
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a compression id to its codec.
pub fn get_codec(compression: CompressionType, dictionary_size: u32) -> Box<dyn Codec> {
    match compression {
        CompressionType::None => Box::new(NoneCodec),
        CompressionType::Lzma => Box::new(LzmaCodec { dictionary_size }),
        CompressionType::Flac => Box::new(FlacCodec),
    }
}
