//! Whole-image digests over user data written in address order.
//!
//! Every write at an address above the highest one seen so far feeds all
//! enabled accumulators.  A write at or below it (an overwrite or an
//! out-of-order write) after the first write drops every accumulator for
//! the rest of the session; nothing is stored for that session.

pub mod spamsum;

use log::info;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::checksum::ChecksumEntry;
use crate::types::ChecksumAlgorithm;
use spamsum::SpamSum;

pub struct DigestTracker {
    md5:         Option<md5::Context>,
    sha1:        Option<Sha1>,
    sha256:      Option<Sha256>,
    spamsum:     Option<SpamSum>,
    highest:     Option<u64>,
    invalidated: bool,
}

impl DigestTracker {
    pub fn new(use_md5: bool, use_sha1: bool, use_sha256: bool, use_spamsum: bool) -> Self {
        Self {
            md5:         use_md5.then(md5::Context::new),
            sha1:        use_sha1.then(Sha1::new),
            sha256:      use_sha256.then(Sha256::new),
            spamsum:     use_spamsum.then(SpamSum::new),
            highest:     None,
            invalidated: false,
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, false, false, false)
    }

    /// True while at least one accumulator is still live.
    pub fn is_active(&self) -> bool {
        self.md5.is_some() || self.sha1.is_some() || self.sha256.is_some() || self.spamsum.is_some()
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    pub fn observe(&mut self, address: u64, data: &[u8]) {
        if let Some(highest) = self.highest {
            if address <= highest {
                self.invalidate(address);
                return;
            }
        }
        self.highest = Some(address);

        if let Some(ctx) = self.md5.as_mut() {
            ctx.consume(data);
        }
        if let Some(ctx) = self.sha1.as_mut() {
            ctx.update(data);
        }
        if let Some(ctx) = self.sha256.as_mut() {
            ctx.update(data);
        }
        if let Some(ctx) = self.spamsum.as_mut() {
            ctx.update(data);
        }
    }

    fn invalidate(&mut self, address: u64) {
        if self.invalidated {
            return;
        }
        if self.is_active() {
            info!("rewind to sector {address}, whole-image digests disabled for this session");
        }
        self.md5         = None;
        self.sha1        = None;
        self.sha256      = None;
        self.spamsum     = None;
        self.invalidated = true;
    }

    /// Final digests, or nothing when invalidated or nothing was written.
    pub fn finish(self) -> Vec<ChecksumEntry> {
        if self.invalidated || self.highest.is_none() {
            return Vec::new();
        }
        let mut out = Vec::new();
        if let Some(ctx) = self.md5 {
            out.push(ChecksumEntry::new(ChecksumAlgorithm::Md5, ctx.compute().0.to_vec()));
        }
        if let Some(ctx) = self.sha1 {
            out.push(ChecksumEntry::new(ChecksumAlgorithm::Sha1, ctx.finalize().to_vec()));
        }
        if let Some(ctx) = self.sha256 {
            out.push(ChecksumEntry::new(ChecksumAlgorithm::Sha256, ctx.finalize().to_vec()));
        }
        if let Some(ctx) = self.spamsum {
            out.push(ChecksumEntry::new(ChecksumAlgorithm::SpamSum, ctx.finalize().into_bytes()));
        }
        out
    }
}
