//! Salt generation for crypt(3) settings.
//!
//! Salts are built by drawing 32-bit values from a [`RandomSource`] and
//! rendering each one in crypt's radix-64 alphabet until enough characters
//! have accumulated. The default source reseeds from the wall clock and the
//! process group before every salt; this is a classic PRNG, not a CSPRNG.

use crate::constants;
use crate::core::error::SaltError;
use crate::core::scheme::{HashScheme, SaltLength};
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::Zeroizing;

pub trait RandomSource: Send {
    /// Restart the sequence before a new salt is drawn.
    fn reseed(&mut self);

    fn next_u32(&mut self) -> u32;

    /// Uniform value in `low..=high`.
    fn next_in_range(&mut self, low: usize, high: usize) -> usize;
}

/// Production source: reseeded from `time ^ pgid` on every [`reseed`].
///
/// [`reseed`]: RandomSource::reseed
pub struct ClockSeededRandom {
    rng: StdRng,
}

impl ClockSeededRandom {
    pub fn new() -> Self {
        Self {
            rng: StdRng::seed_from_u64(clock_seed()),
        }
    }
}

impl Default for ClockSeededRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for ClockSeededRandom {
    fn reseed(&mut self) {
        self.rng = StdRng::seed_from_u64(clock_seed());
    }

    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_in_range(&mut self, low: usize, high: usize) -> usize {
        self.rng.gen_range(low..=high)
    }
}

fn clock_seed() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let pgid = nix::unistd::getpgrp().as_raw() as u64;
    now.as_secs() ^ u64::from(now.subsec_micros()) ^ pgid
}

/// Deterministic source. Every reseed rewinds to the same seed, so each
/// salt generated for a given scheme is identical.
pub struct FixedSeedRandom {
    seed: u64,
    rng: StdRng,
}

impl FixedSeedRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl RandomSource for FixedSeedRandom {
    fn reseed(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
    }

    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_in_range(&mut self, low: usize, high: usize) -> usize {
        self.rng.gen_range(low..=high)
    }
}

pub struct SaltGenerator<R = ClockSeededRandom> {
    rng: R,
}

impl<R: RandomSource> SaltGenerator<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Reseed, pick a length for `scheme`, and draw a salt of that length.
    pub fn generate(&mut self, scheme: HashScheme) -> Result<Zeroizing<String>, SaltError> {
        self.rng.reseed();
        let len = match scheme.salt_length() {
            SaltLength::Fixed(n) => n,
            SaltLength::Variable { min, max } => self.rng.next_in_range(min, max),
        };
        self.generate_len(len)
    }

    /// Draw exactly `len` salt characters from the current sequence.
    pub fn generate_len(&mut self, len: usize) -> Result<Zeroizing<String>, SaltError> {
        if !(constants::MIN_SALT_LEN..=constants::MAX_SALT_LEN).contains(&len) {
            return Err(SaltError::Length(len));
        }
        // room for one extra draw so the buffer never reallocates
        let mut salt = Zeroizing::new(String::with_capacity(len + 6));
        loop {
            push_radix64(&mut salt, self.rng.next_u32());
            if salt.len() >= len {
                break;
            }
        }
        salt.truncate(len);
        Ok(salt)
    }
}

/// Append `value` in crypt's radix-64 encoding, least significant digit
/// first. Zero contributes nothing.
pub fn push_radix64(out: &mut String, mut value: u32) {
    while value != 0 {
        out.push(constants::SALT_ALPHABET[(value & 0x3f) as usize] as char);
        value >>= 6;
    }
}
