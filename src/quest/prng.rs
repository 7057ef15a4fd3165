//! Seeded, reproducible shuffling
//!
//! A string seed is hashed with 32-bit FNV-1a to initialise a Mulberry32
//! generator, which then drives a Fisher-Yates shuffle. The same seed yields the
//! same permutation on every platform. Not suitable for anything
//! security-sensitive.

use std::fmt;

use rand::RngCore;

use super::bloom::BloomLevel;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;
const MULBERRY_INCREMENT: u32 = 0x6d2b_79f5;

/// 32-bit FNV-1a over the UTF-8 bytes of `input`
pub fn fnv1a_32(input: &str) -> u32 {
    input.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Mulberry32 generator
#[derive(Debug, Clone)]
pub struct Mulberry32 {
    state: u32,
}

impl Mulberry32 {
    pub fn new(state: u32) -> Self {
        Self { state }
    }

    pub fn from_seed_str(seed: &str) -> Self {
        Self::new(fnv1a_32(seed))
    }

    /// Uniform float in [0, 1)
    pub fn next_unit(&mut self) -> f64 {
        f64::from(self.next_u32()) / 4_294_967_296.0
    }
}

impl RngCore for Mulberry32 {
    fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_add(MULBERRY_INCREMENT);
        let mut t = self.state;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        t ^ (t >> 14)
    }

    fn next_u64(&mut self) -> u64 {
        let high = u64::from(self.next_u32());
        let low = u64::from(self.next_u32());
        (high << 32) | low
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// Return a seeded permutation of `items`
pub fn shuffle<T: Clone>(seed: &str, items: &[T]) -> Vec<T> {
    let mut out = items.to_vec();
    shuffle_in_place(seed, &mut out);
    out
}

/// Fisher-Yates over `items` driven by Mulberry32(FNV-1a(seed))
pub fn shuffle_in_place<T>(seed: &str, items: &mut [T]) {
    let mut rng = Mulberry32::from_seed_str(seed);
    for i in (1..items.len()).rev() {
        let j = (rng.next_unit() * (i as f64 + 1.0)) as usize;
        items.swap(i, j.min(i));
    }
}

/// What a seeded sequence is used for; keeps unrelated draws from sharing a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedPurpose {
    MissionOrder,
    Blasts,
    Review,
    Restart,
}

impl SeedPurpose {
    fn tag(self) -> &'static str {
        match self {
            Self::MissionOrder => "order",
            Self::Blasts => "blasts",
            Self::Review => "review",
            Self::Restart => "restart",
        }
    }
}

/// Components of a seed string: `deck:level:missionIndex:purpose[:salt]`
#[derive(Debug, Clone)]
pub struct SeedKey<'a> {
    pub deck_id: &'a str,
    pub level: BloomLevel,
    pub mission_index: usize,
    pub purpose: SeedPurpose,
    pub salt: Option<&'a str>,
}

impl<'a> SeedKey<'a> {
    pub fn new(deck_id: &'a str, level: BloomLevel, mission_index: usize, purpose: SeedPurpose) -> Self {
        Self {
            deck_id,
            level,
            mission_index,
            purpose,
            salt: None,
        }
    }

    pub fn with_salt(mut self, salt: Option<&'a str>) -> Self {
        self.salt = salt.filter(|s| !s.is_empty());
        self
    }
}

impl fmt::Display for SeedKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.deck_id,
            self.level,
            self.mission_index,
            self.purpose.tag()
        )?;
        if let Some(salt) = self.salt {
            write!(f, ":{}", salt)?;
        }
        Ok(())
    }
}
