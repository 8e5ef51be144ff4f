//! Bloom filter — probabilistic membership over `i64` timestamp keys.
//!
//! Each SSTable embeds one filter built from every indexed timestamp.
//! During point lookups the engine consults the filter first: a negative
//! answer skips the SSTable entirely, avoiding index binary search and
//! disk I/O. The filter never produces false negatives; the false-positive
//! rate is below 1% at the default budget of 10 bits per expected key.
//!
//! Probes use seeded 64-bit mix hashing: the `k`-th probe position is
//! `mix(key ^ seed_k) mod bit_count`, with one fixed odd seed per hash
//! function so probe positions are independent.
//!
//! # Serialized form
//!
//! `[u32 num_hash_functions][u64 bit_count][ceil(bit_count/8) bytes]`

#[cfg(test)]
mod tests;

use crate::encoding::{Decode, Encode, EncodingError};

/// Default number of bits budgeted per expected key.
pub const DEFAULT_BITS_PER_KEY: usize = 10;

/// Default number of hash functions.
pub const DEFAULT_NUM_HASHES: u32 = 3;

/// Per-probe seeds. Arbitrary odd constants; part of the on-disk format
/// contract and must never change.
const HASH_SEEDS: [u64; 8] = [
    0x9E37_79B9_7F4A_7C15,
    0xC2B2_AE3D_27D4_EB4F,
    0x1656_67B1_9E37_79F9,
    0x2545_F491_4F6C_DD1D,
    0x27D4_EB2F_1656_67C5,
    0x9E37_79B1_85EB_CA87,
    0xC2B2_AE35_8F4A_7C55,
    0x1656_67B5_27D4_EB33,
];

/// A bloom filter over `i64` keys backed by a packed bit vector.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    /// Packed filter bits, little-endian bit order within each byte.
    bits: Vec<u8>,

    /// Number of usable bits in the filter.
    bit_count: u64,

    /// Number of hash functions (probes per key).
    num_hashes: u32,
}

impl BloomFilter {
    /// Creates a filter sized for `expected_keys` at the default budget
    /// of [`DEFAULT_BITS_PER_KEY`] bits per key and
    /// [`DEFAULT_NUM_HASHES`] probes.
    pub fn new(expected_keys: usize) -> Self {
        Self::with_params(expected_keys, DEFAULT_BITS_PER_KEY, DEFAULT_NUM_HASHES)
    }

    /// Creates a filter with an explicit bit budget and probe count.
    ///
    /// The bit count is clamped to at least 64 so that tiny key sets
    /// still get a usable filter; the probe count is clamped to the
    /// number of available seeds.
    pub fn with_params(expected_keys: usize, bits_per_key: usize, num_hashes: u32) -> Self {
        let bit_count = ((expected_keys.max(1) * bits_per_key.max(1)) as u64).max(64);
        let num_hashes = num_hashes.clamp(1, HASH_SEEDS.len() as u32);
        let byte_len = bit_count.div_ceil(8) as usize;
        Self {
            bits: vec![0u8; byte_len],
            bit_count,
            num_hashes,
        }
    }

    /// Adds a key, setting one bit per hash function.
    pub fn add(&mut self, key: i64) {
        for i in 0..self.num_hashes {
            let idx = self.probe(key, i);
            self.bits[(idx / 8) as usize] |= 1 << (idx % 8);
        }
    }

    /// Returns true iff every probe bit for `key` is set.
    ///
    /// A `false` answer is definitive; a `true` answer may be a false
    /// positive. An empty filter answers `false` for everything.
    pub fn might_contain(&self, key: i64) -> bool {
        for i in 0..self.num_hashes {
            let idx = self.probe(key, i);
            if self.bits[(idx / 8) as usize] & (1 << (idx % 8)) == 0 {
                return false;
            }
        }
        true
    }

    /// Number of usable bits.
    pub fn bit_count(&self) -> u64 {
        self.bit_count
    }

    /// Number of hash functions.
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Serialized size in bytes.
    pub fn serialized_size(&self) -> usize {
        4 + 8 + self.bits.len()
    }

    /// Probe position of the `i`-th hash function for `key`.
    fn probe(&self, key: i64, i: u32) -> u64 {
        mix64((key as u64) ^ HASH_SEEDS[i as usize]) % self.bit_count
    }
}

/// Finalizer from splitmix64 — a full-avalanche 64-bit mix.
#[inline]
fn mix64(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

// ------------------------------------------------------------------------------------------------
// Wire format: [u32 k][u64 bit_count][bit payload]
// ------------------------------------------------------------------------------------------------

impl Encode for BloomFilter {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.num_hashes.encode_to(buf)?;
        self.bit_count.encode_to(buf)?;
        buf.extend_from_slice(&self.bits);
        Ok(())
    }
}

impl Decode for BloomFilter {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (num_hashes, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (bit_count, n) = u64::decode_from(&buf[offset..])?;
        offset += n;

        if num_hashes == 0 || num_hashes > HASH_SEEDS.len() as u32 {
            return Err(EncodingError::Custom(format!(
                "bloom filter hash count {num_hashes} out of range"
            )));
        }
        if bit_count == 0 || bit_count > (crate::encoding::MAX_BYTE_LEN as u64) * 8 {
            return Err(EncodingError::Custom(format!(
                "bloom filter bit count {bit_count} out of range"
            )));
        }

        let byte_len = bit_count.div_ceil(8) as usize;
        if buf.len() < offset + byte_len {
            return Err(EncodingError::UnexpectedEof {
                needed: offset + byte_len,
                available: buf.len(),
            });
        }
        let bits = buf[offset..offset + byte_len].to_vec();
        offset += byte_len;

        Ok((
            Self {
                bits,
                bit_count,
                num_hashes,
            },
            offset,
        ))
    }
}
