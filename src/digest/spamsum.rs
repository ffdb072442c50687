//! SpamSum context-triggered piecewise hash (the ssdeep algorithm).
//!
//! Follows Tridgell's spamsum as refined in ssdeep's `fuzzy_hash_buf`: the
//! 7-byte Adler-style rolling trigger, FNV-style piece hashes, and up to 31
//! block sizes tracked at once so the result needs a single pass.
//!
//! Produces `blocksize:hash1:hash2`.  Two inputs that share long runs of
//! content produce similar strings, which is what makes it useful for
//! provenance checks that a cryptographic digest cannot answer.

const ROLLING_WINDOW:  usize = 7;
const MIN_BLOCKSIZE:   u64   = 3;
const HASH_PRIME:      u32   = 0x0100_0193;
const HASH_INIT:       u32   = 0x2802_1967;
const NUM_BLOCKHASHES: usize = 31;
const SPAMSUM_LENGTH:  usize = 64;
const B64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

#[derive(Clone, Default)]
struct RollState {
    window: [u8; ROLLING_WINDOW],
    h1:     u32,
    h2:     u32,
    h3:     u32,
    n:      usize,
}

impl RollState {
    fn roll(&mut self, c: u8) {
        let c32 = u32::from(c);
        self.h2 = self.h2.wrapping_sub(self.h1);
        self.h2 = self.h2.wrapping_add(ROLLING_WINDOW as u32 * c32);
        self.h1 = self.h1.wrapping_add(c32);
        self.h1 = self.h1.wrapping_sub(u32::from(self.window[self.n]));
        self.window[self.n] = c;
        self.n = (self.n + 1) % ROLLING_WINDOW;
        self.h3 = (self.h3 << 5) ^ c32;
    }

    fn sum(&self) -> u32 {
        self.h1.wrapping_add(self.h2).wrapping_add(self.h3)
    }
}

#[derive(Clone)]
struct BlockHash {
    h:          u32,
    half_h:     u32,
    digest:     [u8; SPAMSUM_LENGTH],
    half_digest: u8,
    len:        usize,
}

impl BlockHash {
    fn new() -> Self {
        Self { h: HASH_INIT, half_h: HASH_INIT, digest: [0; SPAMSUM_LENGTH], half_digest: 0, len: 0 }
    }
}

fn sum_hash(c: u8, h: u32) -> u32 {
    h.wrapping_mul(HASH_PRIME) ^ u32::from(c)
}

fn block_size(index: usize) -> u64 {
    MIN_BLOCKSIZE << index
}

#[derive(Clone)]
pub struct SpamSum {
    roll:       RollState,
    bh:         Vec<BlockHash>,
    start:      usize,
    total_size: u64,
}

impl Default for SpamSum {
    fn default() -> Self {
        Self::new()
    }
}

impl SpamSum {
    pub fn new() -> Self {
        Self { roll: RollState::default(), bh: vec![BlockHash::new()], start: 0, total_size: 0 }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.total_size += data.len() as u64;
        for &c in data {
            self.step(c);
        }
    }

    fn try_fork(&mut self) {
        if self.bh.len() >= NUM_BLOCKHASHES {
            return;
        }
        let last = &self.bh[self.bh.len() - 1];
        let mut next = BlockHash::new();
        next.h = last.h;
        next.half_h = last.half_h;
        self.bh.push(next);
    }

    fn try_reduce(&mut self) {
        if self.bh.len() - self.start < 2 {
            return;
        }
        if block_size(self.start) * SPAMSUM_LENGTH as u64 >= self.total_size {
            return;
        }
        if self.bh[self.start + 1].len < SPAMSUM_LENGTH / 2 {
            return;
        }
        self.start += 1;
    }

    fn step(&mut self, c: u8) {
        self.roll.roll(c);
        let h = u64::from(self.roll.sum());

        for b in &mut self.bh[self.start..] {
            b.h = sum_hash(c, b.h);
            b.half_h = sum_hash(c, b.half_h);
        }

        let mut i = self.start;
        while i < self.bh.len() {
            let bs = block_size(i);
            if h % bs != bs - 1 {
                break;
            }
            if self.bh[i].len == 0 {
                self.try_fork();
            }
            let b = &mut self.bh[i];
            b.digest[b.len] = B64[(b.h % 64) as usize];
            b.half_digest = B64[(b.half_h % 64) as usize];
            if b.len < SPAMSUM_LENGTH - 1 {
                b.len += 1;
                b.digest[b.len] = 0;
                b.h = HASH_INIT;
                if b.len < SPAMSUM_LENGTH / 2 {
                    b.half_h = HASH_INIT;
                    b.half_digest = 0;
                }
            } else {
                self.try_reduce();
            }
            i += 1;
        }
    }

    /// Render the digest string.  The context stays usable afterwards.
    pub fn finalize(&self) -> String {
        let h = self.roll.sum();
        let mut bi = self.start;
        while block_size(bi) * (SPAMSUM_LENGTH as u64) < self.total_size {
            bi += 1;
            if bi >= NUM_BLOCKHASHES {
                bi = NUM_BLOCKHASHES - 1;
                break;
            }
        }
        while bi >= self.bh.len() {
            bi -= 1;
        }
        while bi > self.start && self.bh[bi].len < SPAMSUM_LENGTH / 2 {
            bi -= 1;
        }

        let mut out = format!("{}:", block_size(bi)).into_bytes();
        let b = &self.bh[bi];
        out.extend_from_slice(&b.digest[..b.len]);
        if h != 0 {
            out.push(B64[(b.h % 64) as usize]);
        } else if b.digest[b.len] != 0 {
            out.push(b.digest[b.len]);
        }
        out.push(b':');

        if bi < self.bh.len() - 1 {
            let b = &self.bh[bi + 1];
            let n = b.len.min(SPAMSUM_LENGTH / 2 - 1);
            out.extend_from_slice(&b.digest[..n]);
            if h != 0 {
                out.push(B64[(b.half_h % 64) as usize]);
            } else if b.half_digest != 0 {
                out.push(b.half_digest);
            }
        } else if h != 0 {
            out.push(B64[(self.bh[bi].h % 64) as usize]);
        }

        String::from_utf8_lossy(&out).into_owned()
    }
}
