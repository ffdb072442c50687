//! CRC64 used by every integrity field in the container.

use crc64fast_nvme::Digest;

pub fn crc64(data: &[u8]) -> u64 {
    let mut digest = Digest::new();
    digest.write(data);
    digest.sum64()
}

/// Incremental form for data that arrives in pieces (on-disk DDT regions).
pub struct Crc64 {
    digest: Digest,
}

impl Crc64 {
    pub fn new() -> Self {
        Self { digest: Digest::new() }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.digest.write(data);
    }

    pub fn finish(&self) -> u64 {
        self.digest.sum64()
    }
}

impl Default for Crc64 {
    fn default() -> Self {
        Self::new()
    }
}
