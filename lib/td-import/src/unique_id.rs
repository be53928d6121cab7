//! Idempotency tokens for import requests.
//!
//! Every import request carries a 128-bit token, hex-encoded, that the import API uses to deduplicate resubmissions of
//! the same payload. Reusing a token when retrying a failed request is what makes retries safe.

use std::sync::Mutex;

use chrono::Utc;
use rand::{rngs::StdRng, Rng as _, RngCore, SeedableRng as _};

const RANDOM_TIME_BITS: u32 = 12;
const RANDOM_TIME_MASK: u64 = (1 << RANDOM_TIME_BITS) - 1;

/// Generates unique identifiers for import requests.
///
/// Identifiers are 32-character lowercase hexadecimal strings. The upper 64 bits are derived from the current time,
/// with microsecond resolution, and 12 random bits. The lower 64 bits are drawn entirely at random. Uniqueness is
/// probabilistic: there is no counter, and identifiers from two processes can only collide if they were generated in
/// the same microsecond and drew the same 76 random bits.
///
/// The generator owns its random number generator, which is only locked for the duration of a draw. This makes the
/// generator safe to share between threads and tasks.
pub struct UniqueIdGenerator {
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl UniqueIdGenerator {
    /// Creates a new `UniqueIdGenerator` seeded from the operating system's entropy source.
    pub fn from_entropy() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    /// Creates a new `UniqueIdGenerator` from a fixed seed.
    ///
    /// Two generators created from the same seed draw the same sequence of random bits, which makes the random portion
    /// of their identifiers reproducible.
    pub fn from_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    /// Creates a new `UniqueIdGenerator` from the given random number generator.
    pub fn from_rng<R>(rng: R) -> Self
    where
        R: RngCore + Send + 'static,
    {
        Self {
            rng: Mutex::new(Box::new(rng)),
        }
    }

    /// Generates a new identifier.
    pub fn generate(&self) -> String {
        let micros = Utc::now().timestamp_micros() as u64;
        let (time_jitter, low) = self.draw();

        let high = (micros << RANDOM_TIME_BITS) | (time_jitter & RANDOM_TIME_MASK);
        encode_hex((u128::from(high) << 64) | u128::from(low))
    }

    fn draw(&self) -> (u64, u64) {
        // A poisoned lock only means another thread panicked mid-draw, which leaves no invariant of the RNG broken.
        let mut rng = match self.rng.lock() {
            Ok(rng) => rng,
            Err(poisoned) => poisoned.into_inner(),
        };

        (rng.random(), rng.random())
    }
}

impl Default for UniqueIdGenerator {
    fn default() -> Self {
        Self::from_entropy()
    }
}

fn encode_hex(id: u128) -> String {
    format!("{:032x}", id)
}
