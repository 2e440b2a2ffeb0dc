//! Session code generation
//!
//! Codes are short, upper-case, and drawn from an alphabet without the
//! easily confused `0/O` and `1/I` pairs so they can be read aloud or typed
//! from a projector screen.
//!
//! Uniqueness is not guaranteed here; a backend may reject a duplicate and the
//! caller decides what to do with that.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Symbols a session code may contain
pub const CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Code lengths any app type may use
pub const CODE_LENGTH_RANGE: std::ops::RangeInclusive<usize> = 6..=8;

/// Source of session codes.
///
/// Seedable so tests get reproducible codes; scripted codes are handed out
/// first (in order) before falling back to random draws.
#[derive(Debug, Clone)]
pub struct CodeGenerator {
    rng: StdRng,
    scripted: VecDeque<String>,
}

impl CodeGenerator {
    /// Generator seeded from OS entropy
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
            scripted: VecDeque::new(),
        }
    }

    /// Deterministic generator for tests
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            scripted: VecDeque::new(),
        }
    }

    /// Replay `codes` before drawing randomly.
    ///
    /// Scripted codes are normalized but not checked against the alphabet.
    /// Each is handed out only to a `generate` call asking for its length.
    pub fn scripted(codes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut generator = Self::seeded(0);
        generator.scripted = codes
            .into_iter()
            .map(|c| normalize_code(&c.into()))
            .collect();
        generator
    }

    /// Produce a code of exactly `length` symbols.
    ///
    /// The first queued scripted code of that length wins; scripted codes of
    /// other lengths stay queued.
    pub fn generate(&mut self, length: usize) -> String {
        let scripted = self
            .scripted
            .iter()
            .position(|code| code.chars().count() == length)
            .and_then(|pos| self.scripted.remove(pos));
        if let Some(code) = scripted {
            return code;
        }
        (0..length)
            .map(|_| CODE_ALPHABET[self.rng.random_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::from_entropy()
    }
}

/// One-off code from the thread-local RNG
pub fn generate_code(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Canonical form of user-typed input: trimmed and upper-cased.
pub fn normalize_code(input: &str) -> String {
    input.trim().to_ascii_uppercase()
}

/// Whether `code` has the expected length and only alphabet symbols.
pub fn is_valid_code(code: &str, length: usize) -> bool {
    code.len() == length && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}
