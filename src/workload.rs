//! Deterministic target selection.
//!
//! Every run draws from one owned pseudo-random stream seeded from the run's
//! seed. Each shot takes a single draw in `[0, random_limit)` and reduces it
//! as `draw % target_count`. Fixing the generator, seed, limit, target count
//! and shot count fixes the whole index sequence, across runs and across any
//! implementation that uses the same generator and seeding.
//!
//! Two generators are available:
//! - `chacha20`: `ChaCha20Rng::seed_from_u64(seed)`, one `u64` per draw,
//!   reduced with `% random_limit`.
//! - `mt19937`: the Mersenne Twister keyed the way CPython's
//!   `random.seed(int)` keys it, with draws taken like
//!   `random.randrange(random_limit)`. Seed 123456789 replays the request
//!   sequence of the hand-driven load scripts.
//!
//! When `target_count` does not divide `random_limit` the lower indices are
//! picked slightly more often. That skew is part of the load shape and is
//! kept as is.

use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{LoadflameError, LoadflameResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Generator {
    #[default]
    Chacha20,
    Mt19937,
}

/// The fixed, non-empty list of endpoints a run may hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ammunition {
    targets: Vec<String>,
}

impl Ammunition {
    pub fn new(targets: Vec<String>) -> LoadflameResult<Self> {
        if targets.is_empty() {
            return Err(LoadflameError::InvalidArgument(
                "target list must not be empty".to_string(),
            ));
        }
        Ok(Self { targets })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.targets.get(index).map(String::as_str)
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }
}

/// Owned pseudo-random stream. Never shared between selectors.
#[derive(Debug, Clone)]
pub struct ShotStream {
    source: Source,
}

#[derive(Debug, Clone)]
enum Source {
    ChaCha(ChaCha20Rng),
    Mt(Box<Mt19937>),
}

impl ShotStream {
    pub fn seeded(generator: Generator, seed: u64) -> Self {
        let source = match generator {
            Generator::Chacha20 => Source::ChaCha(ChaCha20Rng::seed_from_u64(seed)),
            Generator::Mt19937 => Source::Mt(Box::new(Mt19937::keyed(seed))),
        };
        Self { source }
    }

    /// One raw draw in `[0, limit)`, or `None` when `limit` is zero.
    pub fn draw(&mut self, limit: u64) -> Option<u64> {
        if limit == 0 {
            return None;
        }
        Some(match &mut self.source {
            Source::ChaCha(rng) => rng.next_u64() % limit,
            Source::Mt(mt) => mt.below(limit),
        })
    }
}

const MT_N: usize = 624;
const MT_M: usize = 397;

/// MT19937 (32-bit) with `init_by_array` keying.
#[derive(Clone)]
struct Mt19937 {
    state: [u32; MT_N],
    index: usize,
}

impl std::fmt::Debug for Mt19937 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mt19937").field("index", &self.index).finish()
    }
}

impl Mt19937 {
    /// Keys the generator with the seed's 32-bit words, least significant
    /// first, high zero words dropped (at least one word is kept).
    fn keyed(seed: u64) -> Self {
        let low = seed as u32;
        let high = (seed >> 32) as u32;
        if high == 0 {
            Self::with_key(&[low])
        } else {
            Self::with_key(&[low, high])
        }
    }

    fn with_key(key: &[u32]) -> Self {
        let mut mt = Self::with_seed(19_650_218);
        let state = &mut mt.state;
        let (mut i, mut j) = (1usize, 0usize);
        for _ in 0..MT_N.max(key.len()) {
            let prev = state[i - 1] ^ (state[i - 1] >> 30);
            state[i] = (state[i] ^ prev.wrapping_mul(1_664_525))
                .wrapping_add(key[j])
                .wrapping_add(j as u32);
            i += 1;
            j += 1;
            if i >= MT_N {
                state[0] = state[MT_N - 1];
                i = 1;
            }
            if j >= key.len() {
                j = 0;
            }
        }
        for _ in 0..MT_N - 1 {
            let prev = state[i - 1] ^ (state[i - 1] >> 30);
            state[i] = (state[i] ^ prev.wrapping_mul(1_566_083_941)).wrapping_sub(i as u32);
            i += 1;
            if i >= MT_N {
                state[0] = state[MT_N - 1];
                i = 1;
            }
        }
        state[0] = 0x8000_0000;
        mt
    }

    fn with_seed(seed: u32) -> Self {
        let mut state = [0u32; MT_N];
        state[0] = seed;
        for i in 1..MT_N {
            let prev = state[i - 1] ^ (state[i - 1] >> 30);
            state[i] = 1_812_433_253u32.wrapping_mul(prev).wrapping_add(i as u32);
        }
        Self {
            state,
            index: MT_N,
        }
    }

    fn twist(&mut self) {
        for k in 0..MT_N {
            let y = (self.state[k] & 0x8000_0000) | (self.state[(k + 1) % MT_N] & 0x7fff_ffff);
            let mag = if y & 1 == 1 { 0x9908_b0df } else { 0 };
            self.state[k] = self.state[(k + MT_M) % MT_N] ^ (y >> 1) ^ mag;
        }
        self.index = 0;
    }

    fn next_u32(&mut self) -> u32 {
        if self.index >= MT_N {
            self.twist();
        }
        let mut y = self.state[self.index];
        self.index += 1;
        y ^= y >> 11;
        y ^= (y << 7) & 0x9d2c_5680;
        y ^= (y << 15) & 0xefc6_0000;
        y ^ (y >> 18)
    }

    /// `bits` random bits, 1..=64, assembled low word first.
    fn bits(&mut self, bits: u32) -> u64 {
        if bits <= 32 {
            return u64::from(self.next_u32() >> (32 - bits));
        }
        let low = u64::from(self.next_u32());
        let high = u64::from(self.next_u32() >> (64 - bits));
        low | (high << 32)
    }

    /// Uniform draw in `[0, limit)` by rejection on `bit_length(limit)` bits.
    fn below(&mut self, limit: u64) -> u64 {
        let bits = u64::BITS - limit.leading_zeros();
        loop {
            let r = self.bits(bits);
            if r < limit {
                return r;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkloadSelector {
    stream: ShotStream,
    random_limit: u64,
    target_count: usize,
}

impl WorkloadSelector {
    pub fn new(
        generator: Generator,
        seed: u64,
        random_limit: u64,
        target_count: usize,
    ) -> LoadflameResult<Self> {
        if target_count == 0 {
            return Err(LoadflameError::InvalidArgument(
                "target list must not be empty".to_string(),
            ));
        }
        if random_limit < target_count as u64 {
            return Err(LoadflameError::InvalidArgument(format!(
                "random limit {random_limit} is smaller than the target count {target_count}"
            )));
        }
        Ok(Self {
            stream: ShotStream::seeded(generator, seed),
            random_limit,
            target_count,
        })
    }

    pub fn next_index(&mut self) -> usize {
        // `new` guarantees a non-zero limit.
        let draw = self.stream.draw(self.random_limit).unwrap_or(0);
        (draw % self.target_count as u64) as usize
    }
}

impl Iterator for WorkloadSelector {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        Some(self.next_index())
    }
}

/// The full, precomputed index sequence for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadPlan {
    pub generator: Generator,
    pub seed: u64,
    pub random_limit: u64,
    pub indices: Vec<usize>,
}

impl WorkloadPlan {
    pub fn generate(
        generator: Generator,
        seed: u64,
        random_limit: u64,
        ammo: &Ammunition,
        shot_count: usize,
    ) -> LoadflameResult<Self> {
        let selector = WorkloadSelector::new(generator, seed, random_limit, ammo.len())?;
        Ok(Self {
            generator,
            seed,
            random_limit,
            indices: selector.take(shot_count).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// `(target_index, target)` pairs in firing order.
    pub fn targets<'a>(
        &'a self,
        ammo: &'a Ammunition,
    ) -> impl Iterator<Item = (usize, &'a str)> + 'a {
        self.indices
            .iter()
            .filter_map(move |&idx| ammo.get(idx).map(|target| (idx, target)))
    }
}
