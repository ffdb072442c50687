use dicformat::block::{read_block_at, read_raw_block_at};
use dicformat::codec::CompressionType;
use dicformat::ddt::DDT_HEADER_SIZE;
use dicformat::header::HEADER_SIZE;
use dicformat::metadata::{DumpHardware, Geometry, ImageMetadata};
use dicformat::types::{BlockType, ChecksumAlgorithm, DataType, TrackSubchannelType};
use dicformat::{
    identify, CreateOptions, DicImage, ImageError, MediaTagType, MediaType, SectorTagType, Track, TrackType,
};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use tempfile::NamedTempFile;

type MemImage = DicImage<Cursor<Vec<u8>>>;

fn options(sectors_per_block: u32) -> CreateOptions {
    CreateOptions { sectors_per_block, ..CreateOptions::default() }
}

fn pattern(address: u64, size: usize) -> Vec<u8> {
    (0..size).map(|i| (address as usize * 31 + i * 7 + 1) as u8).collect()
}

fn hdd(sectors: u64, o: &CreateOptions) -> MemImage {
    DicImage::create(Cursor::new(Vec::new()), MediaType::GenericHdd, sectors, 512, o).unwrap()
}

fn bytes_of(img: MemImage) -> Vec<u8> {
    img.into_inner().into_inner()
}

fn reopen(bytes: Vec<u8>) -> MemImage {
    DicImage::open(Cursor::new(bytes)).unwrap()
}

/// One CD sector of a 440 Hz stereo tone, phase-continuous across sectors.
fn tone(address: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(2352);
    for n in 0..588u64 {
        let t = (address * 588 + n) as f64 / 44_100.0;
        let s = ((t * 440.0 * std::f64::consts::TAU).sin() * 8000.0) as i16;
        out.extend_from_slice(&s.to_le_bytes());
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// A raw CD sector with recognisable bytes in every region.
fn raw_sector(address: u64) -> Vec<u8> {
    let mut raw = pattern(address, 2352);
    raw[0] = 0x00;
    raw[1..11].fill(0xff);
    raw[11] = 0x00;
    raw
}

#[test]
fn test_ten_sectors_make_three_blocks() {
    let file = NamedTempFile::new().unwrap();
    {
        let mut img =
            DicImage::create_file(file.path(), MediaType::GenericHdd, 10, 2048, &options(4)).unwrap();
        for a in 0..10 {
            img.write_sector(a, &pattern(a, 2048)).unwrap();
        }
        img.close().unwrap();
    }

    let mut img = DicImage::open_file(file.path()).unwrap();
    assert_eq!(img.index().data_blocks().count(), 3);
    assert_eq!(img.sector_size(), 2048);
    assert_eq!(img.shift(), 2);
    for a in 0..10 {
        assert_eq!(img.read_sector(a).unwrap(), pattern(a, 2048));
    }
    assert_eq!(img.read_sectors(2, 3).unwrap(), [pattern(2, 2048), pattern(3, 2048), pattern(4, 2048)].concat());
    assert_eq!(img.verify_media_image().unwrap(), Some(true));
}

#[test]
fn test_roundtrip_with_holes() {
    let mut img = hdd(64, &options(8));
    for a in (0..64).step_by(3) {
        img.write_sector(a, &pattern(a, 512)).unwrap();
    }
    img.write_sectors(40, &[pattern(100, 512), pattern(101, 512)].concat()).unwrap();

    let check = |img: &mut MemImage| {
        for a in 0..64 {
            let expected = match a {
                40 => pattern(100, 512),
                41 => pattern(101, 512),
                a if a % 3 == 0 => pattern(a, 512),
                _ => vec![0u8; 512],
            };
            assert_eq!(img.read_sector(a).unwrap(), expected, "sector {a}");
        }
    };
    check(&mut img);
    img.close().unwrap();
    check(&mut img);

    let mut img = reopen(bytes_of(img));
    assert!(!img.is_writing());
    check(&mut img);
}

#[test]
fn test_deduplication_economy() {
    let same = vec![0xa5u8; 512];
    let blocks = |deduplicate: bool| {
        let o = CreateOptions { sectors_per_block: 1, deduplicate, ..CreateOptions::default() };
        let mut img = hdd(8, &o);
        for a in 0..8 {
            img.write_sector(a, &same).unwrap();
        }
        let hits = img.deduplicated_sectors();
        img.close().unwrap();
        let mut img = reopen(bytes_of(img));
        for a in 0..8 {
            assert_eq!(img.read_sector(a).unwrap(), same);
        }
        (img.index().data_blocks().count(), hits)
    };
    assert_eq!(blocks(true), (1, 7));
    assert_eq!(blocks(false), (8, 0));
}

#[test]
fn test_zero_sectors_are_shared_without_dedup() {
    let o = CreateOptions { sectors_per_block: 1, deduplicate: false, ..CreateOptions::default() };
    let mut img = hdd(4, &o);
    for a in 0..4 {
        img.write_sector(a, &[0u8; 512]).unwrap();
    }
    img.close().unwrap();
    assert_eq!(img.index().data_blocks().count(), 1);
}

#[test]
fn test_corrupted_block_is_detected() {
    let o = CreateOptions { compress: false, ..options(4) };
    let mut img = hdd(8, &o);
    for a in 0..8 {
        img.write_sector(a, &pattern(a, 512)).unwrap();
    }
    img.write_media_tag(MediaTagType::AtaIdentify, &pattern(9, 512)).unwrap();
    img.close().unwrap();
    let first = img.index().data_blocks().next().unwrap();
    let tag = img.index().find(BlockType::DataBlock, DataType::MediaTag(MediaTagType::AtaIdentify)).unwrap().offset;

    let mut bytes = bytes_of(img);
    bytes[first as usize + 36 + 600] ^= 0x40;
    bytes[tag as usize + 36 + 3] ^= 0x01;

    let mut img = reopen(bytes);
    assert_eq!(img.verify_media_image().unwrap(), Some(false));
    assert!(matches!(img.read_sector(1), Err(ImageError::Integrity { .. })));
    assert_eq!(img.read_sector(5).unwrap(), pattern(5, 512));
    assert!(matches!(img.read_media_tag(MediaTagType::AtaIdentify), Err(ImageError::TagNotPresent(_))));
}

#[test]
fn test_media_tags_roundtrip() {
    let mut img = hdd(4, &CreateOptions::default());
    img.write_media_tag(MediaTagType::AtaIdentify, &[0x40; 512]).unwrap();
    img.write_media_tag(MediaTagType::AtaIdentify, &[0x41; 512]).unwrap();
    img.write_media_tag(MediaTagType::UsbDescriptors, b"\x12\x01\x00\x02").unwrap();
    assert_eq!(img.read_media_tag(MediaTagType::AtaIdentify).unwrap(), vec![0x41; 512]);
    img.close().unwrap();

    let img = reopen(bytes_of(img));
    assert_eq!(img.read_media_tag(MediaTagType::AtaIdentify).unwrap(), vec![0x41; 512]);
    assert_eq!(img.read_media_tag(MediaTagType::UsbDescriptors).unwrap(), b"\x12\x01\x00\x02");
    assert!(matches!(img.read_media_tag(MediaTagType::CdMcn), Err(ImageError::TagNotPresent(_))));
    assert_eq!(img.media_tag_types().count(), 2);
}

#[test]
fn test_append_without_changes_is_idempotent() {
    let file = NamedTempFile::new().unwrap();
    let o = CreateOptions { md5: true, ..options(4) };
    {
        let mut img = DicImage::create_file(file.path(), MediaType::GenericHdd, 16, 512, &o).unwrap();
        for a in 0..16 {
            img.write_sector(a, &pattern(a, 512)).unwrap();
        }
        img.close().unwrap();
    }
    let before = std::fs::read(file.path()).unwrap();

    let mut img = DicImage::append_file(file.path(), MediaType::GenericHdd, 16, &o).unwrap();
    assert!(img.is_writing());
    img.close().unwrap();
    drop(img);

    let after = std::fs::read(file.path()).unwrap();
    assert_eq!(after.len(), before.len());
    assert_eq!(&after[104..], &before[104..]);
    assert_eq!(&after[80..88], &before[80..88]);

    let img = DicImage::open_file(file.path()).unwrap();
    assert_eq!(img.checksums().len(), 1);
}

#[test]
fn test_append_that_writes_drops_checksums() {
    let o = CreateOptions { sha256: true, ..options(4) };
    let mut img = hdd(8, &o);
    for a in 0..8 {
        img.write_sector(a, &pattern(a, 512)).unwrap();
    }
    img.close().unwrap();
    assert_eq!(img.checksums().len(), 1);
    let bytes = bytes_of(img);

    assert!(matches!(
        DicImage::append(Cursor::new(bytes.clone()), MediaType::FlashDrive, 8, &o),
        Err(ImageError::WriteState(_))
    ));
    assert!(matches!(
        DicImage::append(Cursor::new(bytes.clone()), MediaType::GenericHdd, 9, &o),
        Err(ImageError::WriteState(_))
    ));

    let mut img = DicImage::append(Cursor::new(bytes), MediaType::GenericHdd, 8, &o).unwrap();
    img.write_sector(3, &[0xee; 512]).unwrap();
    img.close().unwrap();

    let mut img = reopen(bytes_of(img));
    assert!(img.checksums().is_empty());
    assert!(img.index().find(BlockType::ChecksumBlock, DataType::NoData).is_none());
    assert_eq!(img.read_sector(3).unwrap(), vec![0xee; 512]);
    for a in (0..8).filter(|a| *a != 3) {
        assert_eq!(img.read_sector(a).unwrap(), pattern(a, 512));
    }
    assert_eq!(img.verify_media_image().unwrap(), Some(true));
}

#[test]
fn test_sequential_writes_store_digests() {
    let o = CreateOptions { md5: true, sha1: true, sha256: true, spamsum: true, ..options(4) };
    let mut img = hdd(12, &o);
    let mut all = Vec::new();
    for a in 0..12 {
        let data = pattern(a, 512);
        img.write_sector(a, &data).unwrap();
        all.extend_from_slice(&data);
    }
    img.close().unwrap();

    let img = reopen(bytes_of(img));
    let sums = img.checksums();
    assert_eq!(sums.len(), 4);
    let md5 = sums.iter().find(|c| c.algorithm == ChecksumAlgorithm::Md5).unwrap();
    assert_eq!(md5.digest, md5::compute(&all).0.to_vec());
    let sha256 = sums.iter().find(|c| c.algorithm == ChecksumAlgorithm::Sha256).unwrap();
    assert_eq!(sha256.digest, Sha256::digest(&all).to_vec());
    let sha1 = sums.iter().find(|c| c.algorithm == ChecksumAlgorithm::Sha1).unwrap();
    assert_eq!(sha1.digest.len(), 20);
    let spamsum = sums.iter().find(|c| c.algorithm == ChecksumAlgorithm::SpamSum).unwrap();
    assert!(spamsum.display().contains(':'));
}

#[test]
fn test_rewind_disables_digests() {
    let o = CreateOptions { md5: true, sha256: true, ..options(4) };
    let mut img = hdd(4, &o);
    for a in 0..3 {
        img.write_sector(a, &pattern(a, 512)).unwrap();
    }
    img.write_sector(1, &[0x11; 512]).unwrap();
    img.write_sector(3, &pattern(3, 512)).unwrap();
    img.close().unwrap();
    assert!(img.checksums().is_empty());

    let mut img = reopen(bytes_of(img));
    assert!(img.checksums().is_empty());
    assert_eq!(img.read_sector(0).unwrap(), pattern(0, 512));
    assert_eq!(img.read_sector(1).unwrap(), vec![0x11; 512]);
    assert_eq!(img.read_sector(2).unwrap(), pattern(2, 512));
    assert_eq!(img.read_sector(3).unwrap(), pattern(3, 512));
}

#[test]
fn test_block_holds_at_most_two_to_the_shift_sectors() {
    let o = CreateOptions { compress: false, deduplicate: false, ..CreateOptions::default() };
    let mut img = hdd(4097, &o);
    assert_eq!(img.shift(), 12);
    for a in 0..4097 {
        img.write_sector(a, &[(a % 251) as u8 + 1; 512]).unwrap();
    }
    img.close().unwrap();
    assert_eq!(img.index().data_blocks().count(), 2);

    let mut stream = Cursor::new(bytes_of(img));
    let second = DicImage::open(&mut stream).unwrap().index().data_blocks().nth(1).unwrap();
    let (header, _) = read_block_at(&mut stream, second).unwrap();
    assert_eq!(header.length, 512);
    assert_eq!(header.compression, CompressionType::None as u16);
}

fn cd_tracks() -> Vec<Track> {
    vec![
        Track::new(1, 1, TrackType::CdMode1, 0, 9, 2352),
        Track::new(2, 1, TrackType::Audio, 10, 19, 2352),
        Track::new(3, 1, TrackType::CdMode2Form1, 20, 29, 2352),
    ]
}

fn write_cd(o: &CreateOptions) -> MemImage {
    let mut img = DicImage::create(Cursor::new(Vec::new()), MediaType::CdRom, 30, 2352, o).unwrap();
    img.set_tracks(cd_tracks()).unwrap();
    for a in 0..10 {
        img.write_sector_long(a, &raw_sector(a)).unwrap();
    }
    for a in 10..20 {
        img.write_sector(a, &tone(a)).unwrap();
    }
    img.write_sectors_long(20, &(20..30).flat_map(raw_sector).collect::<Vec<u8>>()).unwrap();
    for a in 0..30 {
        img.write_sector_tag(a, SectorTagType::CdSectorSubchannel, &[a as u8; 96]).unwrap();
    }
    img.write_sector_tag(12, SectorTagType::CdTrackFlags, &[0x02]).unwrap();
    img.write_sector_tag(0, SectorTagType::CdTrackFlags, &[0x04]).unwrap();
    img.write_sector_tag(15, SectorTagType::CdTrackIsrc, b"USRC17607839").unwrap();
    img
}

fn check_cd(img: &mut MemImage) {
    for a in 0..10 {
        let raw = raw_sector(a);
        assert_eq!(img.read_sector(a).unwrap(), raw[16..2064].to_vec());
        assert_eq!(img.read_sector_long(a).unwrap(), raw);
        assert_eq!(img.read_sector_tag(a, SectorTagType::CdSectorSync).unwrap(), raw[0..12].to_vec());
        assert_eq!(img.read_sector_tag(a, SectorTagType::CdSectorHeader).unwrap(), raw[12..16].to_vec());
        assert_eq!(img.read_sector_tag(a, SectorTagType::CdSectorEdc).unwrap(), raw[2064..2068].to_vec());
        assert_eq!(img.read_sector_tag(a, SectorTagType::CdSectorEccP).unwrap(), raw[2076..2248].to_vec());
        assert_eq!(img.read_sector_tag(a, SectorTagType::CdSectorEccQ).unwrap(), raw[2248..2352].to_vec());
        assert_eq!(img.read_sector_tag(a, SectorTagType::CdSectorEcc).unwrap(), raw[2076..2352].to_vec());
    }
    for a in 10..20 {
        assert_eq!(img.read_sector(a).unwrap(), tone(a));
        assert_eq!(img.read_sector_long(a).unwrap(), tone(a));
    }
    for a in 20..30 {
        let raw = raw_sector(a);
        assert_eq!(img.read_sector(a).unwrap(), raw[16..].to_vec());
        assert_eq!(img.read_sector_long(a).unwrap(), raw);
        assert_eq!(img.read_sector_tag(a, SectorTagType::CdSectorHeader).unwrap(), raw[12..16].to_vec());
    }
    for a in 0..30 {
        assert_eq!(img.read_sector_tag(a, SectorTagType::CdSectorSubchannel).unwrap(), vec![a as u8; 96]);
    }
    assert_eq!(
        img.read_sectors_tag(20, 2, SectorTagType::CdSectorSync).unwrap(),
        [raw_sector(20)[..12].to_vec(), raw_sector(21)[..12].to_vec()].concat()
    );

    assert_eq!(img.read_sector_tag(3, SectorTagType::CdTrackFlags).unwrap(), vec![0x04]);
    assert_eq!(img.read_sector_tag(19, SectorTagType::CdTrackFlags).unwrap(), vec![0x02]);
    assert_eq!(img.read_sector_tag(10, SectorTagType::CdTrackIsrc).unwrap(), b"USRC17607839".to_vec());
    assert!(matches!(img.read_sector_tag(25, SectorTagType::CdTrackIsrc), Err(ImageError::TagNotPresent(_))));
    assert!(matches!(
        img.read_sector_tag(21, SectorTagType::CdSectorSubHeader),
        Err(ImageError::TagNotApplicable { track_type: TrackType::CdMode2Form1, .. })
    ));
    assert!(matches!(
        img.read_sector_tag(11, SectorTagType::CdSectorSync),
        Err(ImageError::TagNotApplicable { track_type: TrackType::Audio, .. })
    ));
    assert!(matches!(img.read_sectors(8, 4), Err(ImageError::CrossesTrack { track: 1, .. })));
    assert!(matches!(img.read_sectors_long(18, 3), Err(ImageError::CrossesTrack { track: 2, .. })));
}

#[test]
fn test_cd_with_mixed_tracks() {
    let mut img = write_cd(&CreateOptions::default());
    check_cd(&mut img);
    img.close().unwrap();

    let mut img = reopen(bytes_of(img));
    check_cd(&mut img);
    assert_eq!(img.tracks().len(), 3);
    assert!(img.tracks().iter().all(|t| t.subchannel_type == TrackSubchannelType::RawInterleaved));

    let sessions = img.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!((sessions[0].start_sector, sessions[0].end_sector), (0, 29));
    assert_eq!((sessions[0].start_track, sessions[0].end_track), (1, 3));
    let partitions = img.partitions();
    assert_eq!(partitions.len(), 3);
    assert_eq!(partitions[1].start_sector, 10);
    assert_eq!(partitions[1].length, 10);

    let info = img.info();
    assert_eq!(info.tracks, 3);
    assert_eq!(info.side_arrays, vec!["prefix", "suffix", "subchannel"]);
    assert_eq!(img.verify_media_image().unwrap(), Some(true));
}

#[test]
fn test_cd_audio_goes_through_flac() {
    let mut img = write_cd(&CreateOptions::default());
    img.close().unwrap();
    let mut stream = Cursor::new(bytes_of(img));
    let offsets: Vec<u64> = DicImage::open(&mut stream).unwrap().index().data_blocks().collect();
    let compressions: Vec<(u32, u16)> = offsets
        .iter()
        .map(|o| {
            let (h, _) = read_raw_block_at(&mut stream, *o).unwrap();
            (h.sector_size, h.compression)
        })
        .collect();
    assert_eq!(compressions.len(), 3);
    assert_eq!(compressions[0].0, 2048);
    assert_eq!(compressions[1], (2352, CompressionType::Flac as u16));
    assert_eq!(compressions[2].0, 2336);
}

#[test]
fn test_gdrom_audio_is_stored_swapped() {
    let o = CreateOptions { compress: false, ..CreateOptions::default() };
    let mut img = DicImage::create(Cursor::new(Vec::new()), MediaType::GdRom, 4, 2352, &o).unwrap();
    img.set_tracks(vec![Track::new(1, 1, TrackType::Audio, 0, 3, 2352)]).unwrap();
    let samples = tone(1);
    img.write_sector(0, &samples).unwrap();
    assert_eq!(img.read_sector(0).unwrap(), samples);
    img.close().unwrap();

    let mut stream = Cursor::new(bytes_of(img));
    let mut reopened = DicImage::open(&mut stream).unwrap();
    assert_eq!(reopened.read_sector(0).unwrap(), samples);
    let offset = reopened.index().data_blocks().next().unwrap();
    drop(reopened);

    let (_, stored) = read_block_at(&mut stream, offset).unwrap();
    let swapped: Vec<u8> = samples.chunks_exact(2).flat_map(|p| [p[1], p[0]]).collect();
    assert_eq!(stored, swapped);
}

#[test]
fn test_on_disk_ddt() {
    let o = CreateOptions { max_ddt_size: 0, ..options(4) };
    let mut img = hdd(32, &o);
    assert!(!img.info().ddt_in_memory);
    for a in 0..20 {
        img.write_sector(a, &pattern(a, 512)).unwrap();
    }
    assert_eq!(img.read_sector(7).unwrap(), pattern(7, 512));
    img.close().unwrap();

    let bytes = bytes_of(img);
    let mut img = reopen(bytes.clone());
    assert!(!img.info().ddt_in_memory);
    for a in 0..32 {
        let expected = if a < 20 { pattern(a, 512) } else { vec![0; 512] };
        assert_eq!(img.read_sector(a).unwrap(), expected);
    }
    assert_eq!(img.verify_media_image().unwrap(), Some(true));

    // The table is mandatory, so a damaged region stops the open.
    let mut damaged = bytes;
    damaged[HEADER_SIZE + DDT_HEADER_SIZE + 3 * 8] ^= 0x01;
    assert!(matches!(DicImage::open(Cursor::new(damaged)), Err(ImageError::Integrity { .. })));
}

#[test]
fn test_data_track_after_audio_keeps_declared_size() {
    let tracks = vec![
        Track::new(1, 1, TrackType::Audio, 0, 3, 2048),
        Track::new(2, 1, TrackType::Data, 4, 7, 2048),
    ];
    let mut img = DicImage::create(Cursor::new(Vec::new()), MediaType::CdRom, 8, 2048, &options(4)).unwrap();
    img.set_tracks(tracks).unwrap();
    for a in 0..4 {
        img.write_sector(a, &tone(a)).unwrap();
    }
    img.write_sector(4, &pattern(4, 2048)).unwrap();
    img.close().unwrap();

    let mut img = reopen(bytes_of(img));
    assert_eq!(img.sector_size(), 2048);
    assert_eq!(img.tracks()[0].bytes_per_sector, 2352);
    assert_eq!(img.tracks()[1].bytes_per_sector, 2048);
    assert_eq!(img.read_sector(4).unwrap(), pattern(4, 2048));
    assert_eq!(img.read_sector(5).unwrap(), vec![0u8; 2048]);
    assert_eq!(img.read_sector(2).unwrap(), tone(2));

    let mut img = DicImage::append(Cursor::new(bytes_of(img)), MediaType::CdRom, 8, &options(4)).unwrap();
    img.write_sector(6, &pattern(6, 2048)).unwrap();
    img.close().unwrap();
    let mut img = reopen(bytes_of(img));
    assert_eq!(img.read_sector(6).unwrap(), pattern(6, 2048));
    assert_eq!(img.read_sector(7).unwrap(), vec![0u8; 2048]);
}

#[test]
fn test_write_state_violations() {
    let mut img = hdd(4, &CreateOptions::default());
    img.write_sector(0, &[1; 512]).unwrap();
    assert_eq!(img.verify_media_image().unwrap(), None);
    assert!(matches!(img.write_sector(1, &[1; 511]), Err(ImageError::WriteState(_))));
    assert!(matches!(img.write_sectors(1, &[1; 700]), Err(ImageError::WriteState(_))));
    img.close().unwrap();
    assert!(img.is_closed());
    assert_eq!(img.read_sector(0).unwrap(), vec![1; 512]);

    let mut img = reopen(bytes_of(img));
    assert!(matches!(img.write_sector(0, &[2; 512]), Err(ImageError::WriteState(_))));
    assert!(matches!(img.write_media_tag(MediaTagType::AtaIdentify, &[0]), Err(ImageError::WriteState(_))));
    assert!(matches!(img.close(), Err(ImageError::WriteState(_))));
    assert_eq!(img.read_sector(0).unwrap(), vec![1; 512]);

    let mut cd = DicImage::create(Cursor::new(Vec::new()), MediaType::CdRom, 10, 2352, &CreateOptions::default())
        .unwrap();
    assert!(matches!(cd.write_sector(0, &[0; 2048]), Err(ImageError::WriteState(_))));
    assert!(matches!(
        cd.set_tracks(vec![Track::new(1, 1, TrackType::CdMode1, 0, 5, 2352)]),
        Err(ImageError::WriteState(_))
    ));
    cd.set_tracks(vec![Track::new(1, 1, TrackType::CdMode1, 0, 9, 2352)]).unwrap();
    assert!(matches!(cd.write_sector(0, &[0; 2352]), Err(ImageError::WriteState(_))));
    assert!(matches!(cd.write_sector_long(0, &[0; 2048]), Err(ImageError::WriteState(_))));
    assert!(matches!(cd.write_sector_tag(0, SectorTagType::CdTrackFlags, &[1, 2]), Err(ImageError::WriteState(_))));
    assert!(matches!(
        cd.write_sector_tag(0, SectorTagType::CdTrackIsrc, b"THIS-IS-TOO-LONG"),
        Err(ImageError::WriteState(_))
    ));
    assert!(matches!(
        cd.write_sector_tag(0, SectorTagType::CdSectorSync, &[0; 11]),
        Err(ImageError::WriteState(_))
    ));
    cd.write_sector(0, &[0x33; 2048]).unwrap();
    cd.close().unwrap();
}

#[test]
fn test_out_of_range() {
    let mut img = hdd(4, &CreateOptions::default());
    assert!(matches!(img.read_sector(4), Err(ImageError::OutOfRange { address: 4, sectors: 4 })));
    assert!(matches!(img.read_sectors(2, 3), Err(ImageError::OutOfRange { .. })));
    assert!(matches!(img.write_sector(9, &[0; 512]), Err(ImageError::OutOfRange { .. })));
    assert!(img.read_sectors(2, 0).unwrap().is_empty());
    assert_eq!(img.read_sectors(2, 2).unwrap(), vec![0; 1024]);
}

#[test]
fn test_metadata_geometry_and_dump_hardware_survive_reopen() {
    let mut img = hdd(100, &CreateOptions::default());
    let geometry = Geometry { cylinders: 5, heads: 4, sectors_per_track: 5 };
    let metadata = ImageMetadata {
        media_sequence: 1,
        last_media_sequence: 2,
        creator: Some("Natalia Portillo".to_string()),
        comments: Some("dumped twice, ñ ok".to_string()),
        drive_model: Some("ST-225".to_string()),
        ..ImageMetadata::default()
    };
    let dump = DumpHardware {
        manufacturer: Some("Seagate".to_string()),
        software_name: Some("dicf".to_string()),
        extents: vec![(0, 49), (50, 99)],
        ..DumpHardware::default()
    };
    img.set_geometry(geometry).unwrap();
    img.set_metadata(metadata.clone()).unwrap();
    img.set_dump_hardware(vec![dump.clone()]).unwrap();
    img.write_sector(0, &[7; 512]).unwrap();
    img.close().unwrap();

    let img = reopen(bytes_of(img));
    assert_eq!(img.geometry(), Some(geometry));
    assert_eq!(img.metadata(), &metadata);
    assert_eq!(img.dump_hardware(), &[dump][..]);
    let info = img.info();
    assert_eq!(info.media_type, MediaType::GenericHdd);
    assert_eq!(info.sectors, 100);
    assert_eq!(info.application, "dicformat");
    assert!(serde_json::to_string(&info).unwrap().contains("Natalia Portillo"));

    let bytes = bytes_of(img);
    let mut img = DicImage::append(Cursor::new(bytes), MediaType::GenericHdd, 100, &CreateOptions::default()).unwrap();
    img.set_metadata(ImageMetadata::default()).unwrap();
    img.close().unwrap();
    let img = reopen(bytes_of(img));
    assert!(img.metadata().is_empty());
    assert_eq!(img.geometry(), Some(geometry));
}

#[test]
fn test_bad_headers_are_rejected() {
    let mut img = hdd(4, &CreateOptions::default());
    img.write_sector(0, &[1; 512]).unwrap();
    img.close().unwrap();
    let good = bytes_of(img);
    assert!(identify(&mut Cursor::new(good.clone())));

    let mut newer = good.clone();
    newer[72] = 2;
    assert!(matches!(
        DicImage::open(Cursor::new(newer)),
        Err(ImageError::UnsupportedVersion { major: 2, .. })
    ));

    let mut magic = good.clone();
    magic[0] = b'X';
    assert!(matches!(DicImage::open(Cursor::new(magic)), Err(ImageError::InvalidMagic)));

    let mut index = good;
    let index_offset = u64::from_le_bytes(index[80..88].try_into().unwrap()) as usize;
    index[index_offset + 24] ^= 0xff;
    assert!(matches!(DicImage::open(Cursor::new(index)), Err(ImageError::Integrity { .. })));
}

#[test]
fn test_unclosed_image_cannot_be_opened() {
    let mut img = hdd(4, &CreateOptions::default());
    img.write_sector(0, &[1; 512]).unwrap();
    let bytes = bytes_of(img);
    assert!(matches!(DicImage::open(Cursor::new(bytes)), Err(ImageError::Format(_))));
}
