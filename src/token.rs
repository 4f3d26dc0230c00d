//! Publish token minting.
//!
//! Tokens are random strings over a 52-letter alphabet. Their length starts
//! at a configured value and grows by one whenever a single mint attempt
//! runs into [`TokenMinter::collision_limit`] consecutive collisions with
//! existing tokens, so the token space widens as it fills. The length is
//! owned by the minter and never shrinks.

use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const TOKEN_ALPHABET: &[u8; 52] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

pub const DEFAULT_TOKEN_LENGTH: usize = 6;
pub const DEFAULT_COLLISION_LIMIT: usize = 5;

#[derive(Debug)]
pub struct TokenMinter {
    length: AtomicUsize,
    collision_limit: usize,
}

impl Default for TokenMinter {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_LENGTH, DEFAULT_COLLISION_LIMIT)
    }
}

impl TokenMinter {
    pub fn new(initial_length: usize, collision_limit: usize) -> Self {
        Self {
            length: AtomicUsize::new(initial_length.max(1)),
            collision_limit: collision_limit.max(1),
        }
    }

    /// Length currently used for new tokens.
    pub fn length(&self) -> usize {
        self.length.load(Ordering::Acquire)
    }

    pub fn collision_limit(&self) -> usize {
        self.collision_limit
    }

    /// Draw a random token of `length` letters.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R, length: usize) -> String {
        (0..length)
            .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
            .collect()
    }

    /// Mint a token, retrying until `reserve` accepts one.
    ///
    /// `reserve` returns `Ok(true)` once the token is recorded, `Ok(false)`
    /// when it collides with an existing one. Any error aborts minting and is
    /// returned unchanged.
    pub fn mint<E>(&self, mut reserve: impl FnMut(&str) -> Result<bool, E>) -> Result<String, E> {
        let mut rng = rand::thread_rng();
        let mut collisions = 0;

        loop {
            let length = self.length();
            let token = Self::generate(&mut rng, length);
            if reserve(&token)? {
                return Ok(token);
            }

            collisions += 1;
            tracing::debug!(length, collisions, "token collision");
            if collisions >= self.collision_limit {
                self.grow_from(length);
                collisions = 0;
            }
        }
    }

    /// Grow past `observed`, unless a concurrent minter already did.
    fn grow_from(&self, observed: usize) {
        if self
            .length
            .compare_exchange(observed, observed + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::info!(length = observed + 1, "token length increased");
        }
    }
}
