pub mod assembler;
pub mod block;
pub mod checksum;
pub mod codec;
pub mod crc64;
pub mod ddt;
pub mod dedup;
pub mod digest;
pub mod error;
pub mod header;
pub mod image;
pub mod index;
pub mod metadata;
pub mod options;
pub mod plugin;
pub mod tracks;
pub mod types;

pub use error::{ImageError, Result};
pub use header::DicHeader;
pub use image::{identify, DicImage, ImageInfo};
pub use options::CreateOptions;
pub use plugin::{MediaImage, WritableMediaImage};
pub use tracks::Track;
pub use types::{MediaTagType, MediaType, SectorTagType, TrackType};
