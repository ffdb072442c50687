//! Optical track layout and the `TRKS` block.
//!
//! Header (14 bytes): identifier `TRKS` (4), entry count (2), CRC64 of the
//! entries (8).  Entry (41 bytes): sequence (1), track type (1), start (8),
//! end (8), pregap (8), session (1), ISRC (13 ASCII bytes, NUL padded),
//! flags (1).  Start and end are inclusive absolute sector addresses.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};

use crate::assembler::{long_sector_size, user_data_size};
use crate::crc64::crc64;
use crate::error::{ImageError, Result};
use crate::types::{BlockType, TrackSubchannelType, TrackType};

pub const TRACKS_HEADER_SIZE: usize = 14;
pub const TRACK_ENTRY_SIZE:   usize = 41;
pub const ISRC_LENGTH:        usize = 13;
/// Raw CD sector: sync, header, user data, EDC/ECC.
pub const CD_RAW_SECTOR_SIZE: u32 = 2352;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Track {
    pub sequence:             u8,
    pub session:              u8,
    pub track_type:           TrackType,
    pub start_sector:         u64,
    pub end_sector:           u64,
    pub pregap:               u64,
    pub bytes_per_sector:     u32,
    pub raw_bytes_per_sector: u32,
    pub subchannel_type:      TrackSubchannelType,
}

impl Track {
    /// A track with sector sizes derived from its type.  `Data` tracks take
    /// `data_sector_size`.
    pub fn new(sequence: u8, session: u8, track_type: TrackType, start_sector: u64, end_sector: u64, data_sector_size: u32) -> Self {
        Self {
            sequence,
            session,
            track_type,
            start_sector,
            end_sector,
            pregap: 0,
            bytes_per_sector:     user_data_size(track_type, data_sector_size) as u32,
            raw_bytes_per_sector: long_sector_size(track_type, data_sector_size) as u32,
            subchannel_type: TrackSubchannelType::None,
        }
    }

    pub fn contains(&self, address: u64) -> bool {
        (self.start_sector..=self.end_sector).contains(&address)
    }

    pub fn sectors(&self) -> u64 {
        self.end_sector - self.start_sector + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub sequence:     u8,
    pub start_track:  u8,
    pub end_track:    u8,
    pub start_sector: u64,
    pub end_sector:   u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub sequence:     u8,
    pub name:         String,
    pub kind:         &'static str,
    pub start_sector: u64,
    pub length:       u64,
    /// Byte offset of the partition in user-data terms.
    pub offset:       u64,
    pub size:         u64,
}

/// Tracks must be non-empty, ascending, contiguous from sector 0 and end on
/// the last declared sector.  Sequence numbers must be unique.
pub fn validate_tracks(tracks: &[Track], sectors: u64) -> std::result::Result<(), String> {
    if tracks.is_empty() {
        return Err("no tracks".into());
    }
    let mut next = 0u64;
    let mut seen = [false; 256];
    for t in tracks {
        if t.end_sector < t.start_sector {
            return Err(format!("track {} ends before it starts", t.sequence));
        }
        if t.start_sector != next {
            return Err(format!("track {} starts at {}, expected {next}", t.sequence, t.start_sector));
        }
        if std::mem::replace(&mut seen[t.sequence as usize], true) {
            return Err(format!("track {} declared twice", t.sequence));
        }
        next = t.end_sector + 1;
    }
    if next != sectors {
        return Err(format!("tracks cover {next} sectors, image has {sectors}"));
    }
    Ok(())
}

pub fn track_for(tracks: &[Track], address: u64) -> Option<&Track> {
    tracks.iter().find(|t| t.contains(address))
}

pub fn sessions(tracks: &[Track]) -> Vec<Session> {
    let mut by_session: BTreeMap<u8, Session> = BTreeMap::new();
    for t in tracks {
        by_session
            .entry(t.session)
            .and_modify(|s| {
                s.start_track  = s.start_track.min(t.sequence);
                s.end_track    = s.end_track.max(t.sequence);
                s.start_sector = s.start_sector.min(t.start_sector);
                s.end_sector   = s.end_sector.max(t.end_sector);
            })
            .or_insert(Session {
                sequence:     t.session,
                start_track:  t.sequence,
                end_track:    t.sequence,
                start_sector: t.start_sector,
                end_sector:   t.end_sector,
            });
    }
    by_session.into_values().collect()
}

/// One partition per track.
pub fn partitions(tracks: &[Track]) -> Vec<Partition> {
    let mut offset = 0u64;
    tracks
        .iter()
        .map(|t| {
            let size = t.sectors() * u64::from(t.bytes_per_sector);
            let p = Partition {
                sequence:     t.sequence,
                name:         format!("Track {}", t.sequence),
                kind:         t.track_type.name(),
                start_sector: t.start_sector,
                length:       t.sectors(),
                offset,
                size,
            };
            offset += size;
            p
        })
        .collect()
}

/// Encode tracks with their per-track flags and ISRC.
pub fn encode_tracks(tracks: &[Track], flags: &BTreeMap<u8, u8>, isrc: &BTreeMap<u8, String>) -> Vec<u8> {
    let mut body = Vec::with_capacity(tracks.len() * TRACK_ENTRY_SIZE);
    for t in tracks {
        body.push(t.sequence);
        body.push(t.track_type as u8);
        let _ = body.write_i64::<LittleEndian>(t.start_sector as i64);
        let _ = body.write_i64::<LittleEndian>(t.end_sector as i64);
        let _ = body.write_i64::<LittleEndian>(t.pregap as i64);
        body.push(t.session);
        let mut code = [0u8; ISRC_LENGTH];
        if let Some(s) = isrc.get(&t.sequence) {
            for (dst, src) in code.iter_mut().zip(s.bytes()) {
                *dst = src;
            }
        }
        body.extend_from_slice(&code);
        body.push(flags.get(&t.sequence).copied().unwrap_or(0));
    }
    let mut out = Vec::with_capacity(TRACKS_HEADER_SIZE + body.len());
    let _ = out.write_u32::<LittleEndian>(BlockType::TracksBlock as u32);
    let _ = out.write_u16::<LittleEndian>(tracks.len() as u16);
    let _ = out.write_u64::<LittleEndian>(crc64(&body));
    out.extend_from_slice(&body);
    out
}

/// Decoded `TRKS` block.  Sector sizes of `Data` tracks take
/// `data_sector_size`; the subchannel type is left for the caller to fill in.
#[derive(Debug, Default)]
pub struct TrackTable {
    pub tracks: Vec<Track>,
    pub flags:  BTreeMap<u8, u8>,
    pub isrc:   BTreeMap<u8, String>,
}

pub fn read_tracks<R: Read + Seek>(reader: &mut R, offset: u64, data_sector_size: u32) -> Result<TrackTable> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut head = [0u8; TRACKS_HEADER_SIZE];
    reader.read_exact(&mut head)?;
    let mut r = &head[..];
    let identifier = r.read_u32::<LittleEndian>()?;
    let count      = r.read_u16::<LittleEndian>()? as usize;
    let expected   = r.read_u64::<LittleEndian>()?;
    if identifier != BlockType::TracksBlock as u32 {
        return Err(ImageError::format(format!("expected tracks block at {offset}")));
    }
    let mut body = vec![0u8; count * TRACK_ENTRY_SIZE];
    reader.read_exact(&mut body)?;
    let computed = crc64(&body);
    if computed != expected {
        return Err(ImageError::integrity("tracks block", expected, computed));
    }

    let mut table = TrackTable::default();
    for mut e in body.chunks_exact(TRACK_ENTRY_SIZE) {
        let sequence = e.read_u8()?;
        let kind     = e.read_u8()?;
        let start    = e.read_i64::<LittleEndian>()?;
        let end      = e.read_i64::<LittleEndian>()?;
        let pregap   = e.read_i64::<LittleEndian>()?;
        let session  = e.read_u8()?;
        let (code, rest) = e.split_at(ISRC_LENGTH);
        let flags = rest[0];

        let track_type = TrackType::from_u8(kind)
            .ok_or_else(|| ImageError::format(format!("track {sequence} has unknown type {kind}")))?;
        if start < 0 || end < start {
            return Err(ImageError::format(format!("track {sequence} spans {start}..{end}")));
        }
        let mut track = Track::new(sequence, session, track_type, start as u64, end as u64, data_sector_size);
        track.pregap = pregap.max(0) as u64;
        table.tracks.push(track);

        let text: Vec<u8> = code.iter().copied().take_while(|b| *b != 0).collect();
        if !text.is_empty() {
            table.isrc.insert(sequence, String::from_utf8_lossy(&text).into_owned());
        }
        if flags != 0 {
            table.flags.insert(sequence, flags);
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn layout() -> Vec<Track> {
        vec![
            Track::new(1, 1, TrackType::CdMode1, 0, 99, 2048),
            Track::new(2, 1, TrackType::Audio, 100, 149, 2048),
            Track::new(3, 2, TrackType::CdMode2Form1, 150, 199, 2048),
        ]
    }

    #[test]
    fn sizes_follow_track_type() {
        let t = layout();
        assert_eq!((t[0].bytes_per_sector, t[0].raw_bytes_per_sector), (2048, 2352));
        assert_eq!((t[1].bytes_per_sector, t[1].raw_bytes_per_sector), (2352, 2352));
        assert_eq!((t[2].bytes_per_sector, t[2].raw_bytes_per_sector), (2336, 2352));
        assert_eq!(Track::new(1, 1, TrackType::Data, 0, 1, 512).bytes_per_sector, 512);
    }

    #[test]
    fn layout_must_cover_every_sector() {
        let mut t = layout();
        assert!(validate_tracks(&t, 200).is_ok());
        assert!(validate_tracks(&t, 201).is_err());
        t[1].start_sector = 101;
        assert!(validate_tracks(&t, 200).is_err());
        assert!(validate_tracks(&[], 0).is_err());
        let mut dup = layout();
        dup[2].sequence = 1;
        assert!(validate_tracks(&dup, 200).is_err());
    }

    #[test]
    fn sessions_and_partitions_derive_from_tracks() {
        let t = layout();
        let s = sessions(&t);
        assert_eq!(s.len(), 2);
        assert_eq!((s[0].start_track, s[0].end_track, s[0].end_sector), (1, 2, 149));
        assert_eq!((s[1].start_track, s[1].start_sector), (3, 150));

        let p = partitions(&t);
        assert_eq!(p.len(), 3);
        assert_eq!(p[1].offset, 100 * 2048);
        assert_eq!(p[2].size, 50 * 2336);
        assert_eq!(track_for(&t, 120).map(|t| t.sequence), Some(2));
        assert!(track_for(&t, 200).is_none());
    }

    #[test]
    fn block_keeps_flags_and_isrc() {
        let t = layout();
        let flags = BTreeMap::from([(2u8, 0x02u8)]);
        let isrc = BTreeMap::from([(2u8, "USRC17607839".to_string())]);
        let bytes = encode_tracks(&t, &flags, &isrc);
        assert_eq!(bytes.len(), TRACKS_HEADER_SIZE + 3 * TRACK_ENTRY_SIZE);

        let table = read_tracks(&mut Cursor::new(bytes.clone()), 0, 2048).unwrap();
        assert_eq!(table.tracks, t);
        assert_eq!(table.flags, flags);
        assert_eq!(table.isrc, isrc);

        let mut bad = bytes;
        bad[TRACKS_HEADER_SIZE + 3] ^= 1;
        assert!(matches!(
            read_tracks(&mut Cursor::new(bad), 0, 2048),
            Err(ImageError::Integrity { .. })
        ));
    }
}
