//! Storage name generation.
//!
//! Tokens come from a linear congruential recurrence (constants from
//! Numerical Recipes). They make collisions unlikely but do not rule them out;
//! the job store checks each derived name against its live jobs and asks for
//! another token when one is taken.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

const MULTIPLIER: u32 = 1_664_525;
const INCREMENT: u32 = 1_013_904_223;
const TOKEN_MODULUS: u32 = 1_000_000_000;

/// Width of every token returned by [`NameGenerator::next_token`].
pub const TOKEN_WIDTH: usize = 9;

/// Produces fixed-width decimal tokens used to build storage names.
#[derive(Debug)]
pub struct NameGenerator {
    state: Mutex<u32>,
}

impl NameGenerator {
    /// Create a generator seeded from the wall clock and the process id.
    pub fn new() -> Self {
        Self::with_seed(process_seed())
    }

    /// Create a generator with a fixed seed.
    ///
    /// A zero seed is replaced by a clock-derived one on first use.
    pub fn with_seed(seed: u32) -> Self {
        Self {
            state: Mutex::new(seed),
        }
    }

    /// Advance the generator and return a zero-padded 9 digit token.
    pub fn next_token(&self) -> String {
        // The state is a plain integer; a poisoned lock still holds a usable value.
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut r = *state;
        if r == 0 {
            r = process_seed();
        }
        r = r.wrapping_mul(MULTIPLIER).wrapping_add(INCREMENT);
        *state = r;
        drop(state);

        format!("{:0width$}", r % TOKEN_MODULUS, width = TOKEN_WIDTH)
    }

    /// Derive a storage name for a client-supplied file name.
    pub fn storage_name(&self, original_name: &str) -> String {
        format!("{}{}", self.next_token(), original_name)
    }
}

impl Default for NameGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn process_seed() -> u32 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let seed = nanos.wrapping_add(u64::from(std::process::id())) as u32;
    if seed == 0 { 1 } else { seed }
}
