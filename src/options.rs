//! Image creation options.
//!
//! Options arrive either as a typed [`CreateOptions`] (possibly deserialised
//! from JSON) or as the string key/value pairs a front end collects.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::codec::DEFAULT_DICTIONARY_SIZE;
use crate::error::{ImageError, Result};

pub const DEFAULT_SECTORS_PER_BLOCK: u32 = 4096;
pub const DEFAULT_MAX_DDT_SIZE:      u64 = 256 * 1024 * 1024;
/// Largest accepted block: 2^20 sectors.
pub const MAX_SECTORS_PER_BLOCK:     u32 = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateOptions {
    /// Rounded down to a power of two.
    pub sectors_per_block: u32,
    /// LZMA dictionary size in bytes.
    pub dictionary:        u32,
    /// A DDT larger than this many bytes is kept on disk.
    pub max_ddt_size:      u64,
    pub md5:               bool,
    pub sha1:              bool,
    pub sha256:            bool,
    pub spamsum:           bool,
    pub deduplicate:       bool,
    pub compress:          bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            sectors_per_block: DEFAULT_SECTORS_PER_BLOCK,
            dictionary:        DEFAULT_DICTIONARY_SIZE,
            max_ddt_size:      DEFAULT_MAX_DDT_SIZE,
            md5:               false,
            sha1:              false,
            sha256:            false,
            spamsum:           false,
            deduplicate:       true,
            compress:          true,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ImageError::InvalidOption(format!("{key}: cannot parse {value:?}")))
}

impl CreateOptions {
    /// Parse the string option surface on top of the defaults.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        let mut opts = Self::default();
        opts.apply(map)?;
        Ok(opts)
    }

    /// Override fields from string key/value pairs.  `max_ddt_size` is given
    /// in MiB and `nocompress` inverts `compress`.  Unknown keys are
    /// rejected.
    pub fn apply(&mut self, map: &HashMap<String, String>) -> Result<()> {
        for (key, value) in map {
            match key.as_str() {
                "sectors_per_block" => self.sectors_per_block = parse(key, value)?,
                "dictionary"        => self.dictionary        = parse(key, value)?,
                "max_ddt_size"      => {
                    let mib: u64 = parse(key, value)?;
                    self.max_ddt_size = mib
                        .checked_mul(1024 * 1024)
                        .ok_or_else(|| ImageError::InvalidOption(format!("max_ddt_size: {mib} MiB overflows")))?;
                }
                "md5"         => self.md5         = parse(key, value)?,
                "sha1"        => self.sha1        = parse(key, value)?,
                "sha256"      => self.sha256      = parse(key, value)?,
                "spamsum"     => self.spamsum     = parse(key, value)?,
                "deduplicate" => self.deduplicate = parse(key, value)?,
                "nocompress"  => self.compress    = !parse::<bool>(key, value)?,
                other => return Err(ImageError::InvalidOption(format!("unknown option {other:?}"))),
            }
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.sectors_per_block == 0 || self.sectors_per_block > MAX_SECTORS_PER_BLOCK {
            return Err(ImageError::InvalidOption(format!(
                "sectors_per_block must be between 1 and {MAX_SECTORS_PER_BLOCK}, got {}",
                self.sectors_per_block
            )));
        }
        if self.dictionary == 0 {
            return Err(ImageError::InvalidOption("dictionary must not be zero".into()));
        }
        Ok(())
    }

    /// log2 of the sectors per block, rounding down.
    pub fn shift(&self) -> Result<u8> {
        self.validate()?;
        Ok(self.sectors_per_block.ilog2() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn shift_rounds_down() {
        let mut o = CreateOptions::default();
        assert_eq!(o.shift().unwrap(), 12);
        o.sectors_per_block = 4;
        assert_eq!(o.shift().unwrap(), 2);
        o.sectors_per_block = 5000;
        assert_eq!(o.shift().unwrap(), 12);
        o.sectors_per_block = 1;
        assert_eq!(o.shift().unwrap(), 0);
        o.sectors_per_block = 0;
        assert!(o.shift().is_err());
        o.sectors_per_block = MAX_SECTORS_PER_BLOCK + 1;
        assert!(o.shift().is_err());
    }

    #[test]
    fn string_options() {
        let o = CreateOptions::from_map(&map(&[
            ("sectors_per_block", "64"),
            ("max_ddt_size", "1"),
            ("md5", "true"),
            ("deduplicate", "false"),
            ("nocompress", "true"),
        ]))
        .unwrap();
        assert_eq!(o.sectors_per_block, 64);
        assert_eq!(o.max_ddt_size, 1024 * 1024);
        assert!(o.md5 && !o.sha1 && !o.deduplicate && !o.compress);

        assert!(CreateOptions::from_map(&map(&[("colour", "red")])).is_err());
        assert!(CreateOptions::from_map(&map(&[("md5", "maybe")])).is_err());
        assert!(CreateOptions::from_map(&map(&[("sectors_per_block", "0")])).is_err());
    }

    #[test]
    fn apply_keeps_unmentioned_fields() {
        let mut o = CreateOptions { sha1: true, ..CreateOptions::default() };
        o.apply(&map(&[("spamsum", "true")])).unwrap();
        assert!(o.sha1 && o.spamsum);
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let o: CreateOptions = serde_json::from_str(r#"{"sha256": true}"#).unwrap();
        assert!(o.sha256);
        assert_eq!(o.sectors_per_block, DEFAULT_SECTORS_PER_BLOCK);
        assert!(o.deduplicate && o.compress);
    }
}
