//! Enumerations shared by the on-disk records and the public API.
//!
//! Every discriminant here is written to disk.  Values are permanent: a
//! retired variant keeps its number and new variants take fresh ones.

use serde::{Deserialize, Serialize};

// ── Block kinds ──────────────────────────────────────────────────────────────

/// Four-character identifier that opens every typed structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BlockType {
    /// `DBLK`
    DataBlock         = 0x4B4C_4244,
    /// `DDT*`
    DeduplicationTable = 0x2A54_4444,
    /// `INDX`
    Index             = 0x5844_4E49,
    /// `GEOM`
    GeometryBlock     = 0x4D4F_4547,
    /// `META`
    MetadataBlock     = 0x4154_454D,
    /// `TRKS`
    TracksBlock       = 0x534B_5254,
    /// `CKSM`
    ChecksumBlock     = 0x4D53_4B43,
    /// `DMP*`
    DumpHardwareBlock = 0x2A50_4D44,
}

impl BlockType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0x4B4C_4244 => Some(BlockType::DataBlock),
            0x2A54_4444 => Some(BlockType::DeduplicationTable),
            0x5844_4E49 => Some(BlockType::Index),
            0x4D4F_4547 => Some(BlockType::GeometryBlock),
            0x4154_454D => Some(BlockType::MetadataBlock),
            0x534B_5254 => Some(BlockType::TracksBlock),
            0x4D53_4B43 => Some(BlockType::ChecksumBlock),
            0x2A50_4D44 => Some(BlockType::DumpHardwareBlock),
            _ => None,
        }
    }
}

// ── Data kinds ───────────────────────────────────────────────────────────────

/// Opaque media-level blobs kept alongside the sectors.
///
/// Discriminants share the data-kind number space with [`DataType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u16)]
pub enum MediaTagType {
    CdPartialToc             = 2,
    CdSessionInfo            = 3,
    CdFullToc                = 4,
    CdPma                    = 5,
    CdAtip                   = 6,
    CdTextLeadIn             = 7,
    DvdPfi                   = 8,
    DvdCmi                   = 9,
    DvdDiscKey               = 10,
    DvdBca                   = 11,
    DvdDmi                   = 12,
    DvdMediaIdentifier       = 13,
    DvdMediaKeyBlock         = 14,
    DvdRamDds                = 15,
    DvdRamMediumStatus       = 16,
    DvdRamSpareArea          = 17,
    DvdRRmd                  = 18,
    DvdRPrerecordedInfo      = 19,
    DvdRMediaIdentifier      = 20,
    DvdRPfi                  = 21,
    DvdAdip                  = 22,
    HdDvdCpi                 = 23,
    HdDvdMediumStatus        = 24,
    DvdDlLayerCapacity       = 25,
    DvdDlMiddleZoneAddress   = 26,
    DvdDlJumpIntervalSize    = 27,
    DvdDlManualLayerJumpLba  = 28,
    BdDi                     = 29,
    BdBca                    = 30,
    BdDds                    = 31,
    BdCartridgeStatus        = 32,
    BdSpareArea              = 33,
    AacsVolumeIdentifier     = 34,
    AacsSerialNumber         = 35,
    AacsMediaIdentifier      = 36,
    AacsMediaKeyBlock        = 37,
    AacsDataKeys             = 38,
    AacsLbaExtents           = 39,
    CprmMediaKeyBlock        = 40,
    HybridRecognizedLayers   = 41,
    MmcWriteProtection       = 42,
    MmcDiscInformation       = 43,
    MmcTrackResourcesInformation = 44,
    MmcPowResourcesInformation = 45,
    ScsiInquiry              = 46,
    ScsiModePage2A           = 47,
    AtaIdentify              = 48,
    AtapiIdentify            = 49,
    PcmciaCis                = 50,
    SdCid                    = 51,
    SdCsd                    = 52,
    SdScr                    = 53,
    SdOcr                    = 54,
    MmcCid                   = 55,
    MmcCsd                   = 56,
    MmcOcr                   = 57,
    MmcExtendedCsd           = 58,
    XboxSecuritySector       = 59,
    FloppyLeadOut            = 60,
    DvdDiscControlBlock      = 61,
    CdFirstTrackPregap       = 62,
    CdLeadOut                = 63,
    ScsiModeSense6           = 64,
    ScsiModeSense10          = 65,
    UsbDescriptors           = 66,
    XboxDmi                  = 67,
    XboxPfi                  = 68,
    CdMcn                    = 75,
}

impl MediaTagType {
    pub const ALL: &'static [MediaTagType] = &[
        MediaTagType::CdPartialToc, MediaTagType::CdSessionInfo, MediaTagType::CdFullToc,
        MediaTagType::CdPma, MediaTagType::CdAtip, MediaTagType::CdTextLeadIn,
        MediaTagType::DvdPfi, MediaTagType::DvdCmi, MediaTagType::DvdDiscKey,
        MediaTagType::DvdBca, MediaTagType::DvdDmi, MediaTagType::DvdMediaIdentifier,
        MediaTagType::DvdMediaKeyBlock, MediaTagType::DvdRamDds, MediaTagType::DvdRamMediumStatus,
        MediaTagType::DvdRamSpareArea, MediaTagType::DvdRRmd, MediaTagType::DvdRPrerecordedInfo,
        MediaTagType::DvdRMediaIdentifier, MediaTagType::DvdRPfi, MediaTagType::DvdAdip,
        MediaTagType::HdDvdCpi, MediaTagType::HdDvdMediumStatus, MediaTagType::DvdDlLayerCapacity,
        MediaTagType::DvdDlMiddleZoneAddress, MediaTagType::DvdDlJumpIntervalSize,
        MediaTagType::DvdDlManualLayerJumpLba, MediaTagType::BdDi, MediaTagType::BdBca,
        MediaTagType::BdDds, MediaTagType::BdCartridgeStatus, MediaTagType::BdSpareArea,
        MediaTagType::AacsVolumeIdentifier, MediaTagType::AacsSerialNumber,
        MediaTagType::AacsMediaIdentifier, MediaTagType::AacsMediaKeyBlock,
        MediaTagType::AacsDataKeys, MediaTagType::AacsLbaExtents, MediaTagType::CprmMediaKeyBlock,
        MediaTagType::HybridRecognizedLayers, MediaTagType::MmcWriteProtection,
        MediaTagType::MmcDiscInformation, MediaTagType::MmcTrackResourcesInformation,
        MediaTagType::MmcPowResourcesInformation, MediaTagType::ScsiInquiry,
        MediaTagType::ScsiModePage2A, MediaTagType::AtaIdentify, MediaTagType::AtapiIdentify,
        MediaTagType::PcmciaCis, MediaTagType::SdCid, MediaTagType::SdCsd, MediaTagType::SdScr,
        MediaTagType::SdOcr, MediaTagType::MmcCid, MediaTagType::MmcCsd, MediaTagType::MmcOcr,
        MediaTagType::MmcExtendedCsd, MediaTagType::XboxSecuritySector,
        MediaTagType::FloppyLeadOut, MediaTagType::DvdDiscControlBlock,
        MediaTagType::CdFirstTrackPregap, MediaTagType::CdLeadOut, MediaTagType::ScsiModeSense6,
        MediaTagType::ScsiModeSense10, MediaTagType::UsbDescriptors, MediaTagType::XboxDmi,
        MediaTagType::XboxPfi, MediaTagType::CdMcn,
    ];

    pub fn from_u16(v: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| *t as u16 == v)
    }
}

/// What a data block or DDT holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    NoData,
    UserData,
    MediaTag(MediaTagType),
    CdSectorPrefix,
    CdSectorSuffix,
    CdSectorSubchannel,
}

impl DataType {
    pub fn to_u16(self) -> u16 {
        match self {
            DataType::NoData             => 0,
            DataType::UserData           => 1,
            DataType::MediaTag(t)        => t as u16,
            DataType::CdSectorPrefix     => 69,
            DataType::CdSectorSuffix     => 70,
            DataType::CdSectorSubchannel => 71,
        }
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0  => Some(DataType::NoData),
            1  => Some(DataType::UserData),
            69 => Some(DataType::CdSectorPrefix),
            70 => Some(DataType::CdSectorSuffix),
            71 => Some(DataType::CdSectorSubchannel),
            _  => MediaTagType::from_u16(v).map(DataType::MediaTag),
        }
    }
}

// ── Media ────────────────────────────────────────────────────────────────────

/// Broad class of a medium; decides whether tracks and long sectors apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaClass {
    OpticalDisc,
    BlockMedia,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum MediaType {
    Unknown       = 0,
    GenericHdd    = 1,
    FlashDrive    = 2,
    CompactFlash  = 3,
    SecureDigital = 4,
    MultiMediaCard = 5,
    Floppy        = 6,
    Cd            = 10,
    CdDa          = 11,
    CdRom         = 12,
    CdR           = 13,
    CdRw          = 14,
    CdRomXa       = 15,
    CdI           = 16,
    GdRom         = 20,
    GdR           = 21,
    DvdRom        = 30,
    DvdR          = 31,
    DvdRw         = 32,
    DvdRam        = 33,
    HdDvdRom      = 40,
    BdRom         = 50,
    BdR           = 51,
    BdRe          = 52,
}

impl MediaType {
    pub fn from_u32(v: u32) -> Option<Self> {
        use MediaType::*;
        let t = match v {
            0 => Unknown, 1 => GenericHdd, 2 => FlashDrive, 3 => CompactFlash,
            4 => SecureDigital, 5 => MultiMediaCard, 6 => Floppy,
            10 => Cd, 11 => CdDa, 12 => CdRom, 13 => CdR, 14 => CdRw, 15 => CdRomXa, 16 => CdI,
            20 => GdRom, 21 => GdR,
            30 => DvdRom, 31 => DvdR, 32 => DvdRw, 33 => DvdRam,
            40 => HdDvdRom,
            50 => BdRom, 51 => BdR, 52 => BdRe,
            _ => return None,
        };
        Some(t)
    }

    pub fn class(self) -> MediaClass {
        if self as u32 >= 10 { MediaClass::OpticalDisc } else { MediaClass::BlockMedia }
    }

    pub fn is_optical(self) -> bool {
        self.class() == MediaClass::OpticalDisc
    }

    /// GD-ROM dumps carry audio with big-endian samples.
    pub fn audio_is_byte_swapped(self) -> bool {
        matches!(self, MediaType::GdRom | MediaType::GdR)
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        use MediaType::*;
        let t = match s.to_lowercase().as_str() {
            "unknown"  => Unknown,
            "hdd"      => GenericHdd,
            "flash"    => FlashDrive,
            "cf"       => CompactFlash,
            "sd"       => SecureDigital,
            "mmc"      => MultiMediaCard,
            "floppy"   => Floppy,
            "cd"       => Cd,
            "cdda"     => CdDa,
            "cdrom"    => CdRom,
            "cdr"      => CdR,
            "cdrw"     => CdRw,
            "cdromxa"  => CdRomXa,
            "cdi"      => CdI,
            "gdrom"    => GdRom,
            "gdr"      => GdR,
            "dvdrom"   => DvdRom,
            "dvdr"     => DvdR,
            "dvdrw"    => DvdRw,
            "dvdram"   => DvdRam,
            "hddvdrom" => HdDvdRom,
            "bdrom"    => BdRom,
            "bdr"      => BdR,
            "bdre"     => BdRe,
            _          => return None,
        };
        Some(t)
    }
}

// ── Tracks and sector tags ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TrackType {
    Audio           = 0,
    Data            = 1,
    CdMode1         = 2,
    CdMode2Formless = 3,
    CdMode2Form1    = 4,
    CdMode2Form2    = 5,
}

impl TrackType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(TrackType::Audio),
            1 => Some(TrackType::Data),
            2 => Some(TrackType::CdMode1),
            3 => Some(TrackType::CdMode2Formless),
            4 => Some(TrackType::CdMode2Form1),
            5 => Some(TrackType::CdMode2Form2),
            _ => None,
        }
    }

    pub fn is_mode2(self) -> bool {
        matches!(self, TrackType::CdMode2Formless | TrackType::CdMode2Form1 | TrackType::CdMode2Form2)
    }

    pub fn name(self) -> &'static str {
        match self {
            TrackType::Audio           => "audio",
            TrackType::Data            => "data",
            TrackType::CdMode1         => "mode1",
            TrackType::CdMode2Formless => "mode2",
            TrackType::CdMode2Form1    => "mode2-form1",
            TrackType::CdMode2Form2    => "mode2-form2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackSubchannelType {
    None,
    RawInterleaved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum SectorTagType {
    AppleSectorTag     = 0,
    CdSectorSync       = 1,
    CdSectorHeader     = 2,
    CdSectorSubHeader  = 3,
    CdSectorEdc        = 4,
    CdSectorEccP       = 5,
    CdSectorEccQ       = 6,
    CdSectorEcc        = 7,
    CdSectorSubchannel = 8,
    CdTrackIsrc        = 9,
    CdTrackText        = 10,
    CdTrackFlags       = 11,
    DvdCmi             = 12,
    FloppyAddressMark  = 13,
}

// ── Checksums ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChecksumAlgorithm {
    Md5     = 1,
    Sha1    = 2,
    Sha256  = 3,
    SpamSum = 4,
}

impl ChecksumAlgorithm {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(ChecksumAlgorithm::Md5),
            2 => Some(ChecksumAlgorithm::Sha1),
            3 => Some(ChecksumAlgorithm::Sha256),
            4 => Some(ChecksumAlgorithm::SpamSum),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5     => "md5",
            ChecksumAlgorithm::Sha1    => "sha1",
            ChecksumAlgorithm::Sha256  => "sha256",
            ChecksumAlgorithm::SpamSum => "spamsum",
        }
    }
}
