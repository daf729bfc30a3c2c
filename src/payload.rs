//! Payloads the suite sends through subjects.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use tracing::{debug, warn};

pub const SHORT_MESSAGE: &str = "Hello World";

/// Looks like format directives to a subject that passes input to printf.
pub const PRINTF_MESSAGE: &str = "Hello Printf! %s %s %% %d %f %2.f";

pub const MULTILINE_MESSAGE: &str = "
And when Ruby went over the hill,
Go came in for the kill.
It seemed so fast,
But oh at long last,
We all got tired of err != nil.

By Ryan McDermott

Source: https://www.freecodecamp.org/news/
programming-language-limericks-a8fb3416e0e4/
	";

/// Messages per many-short case.
pub const NUM_SHORT: usize = 10;

/// Bytes 1 through 20.
pub fn binary_message() -> Vec<u8> {
    (1..=20).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    /// Printable ASCII, 32 through 126
    Printable,
    /// Any byte value
    Binary,
}

/// Seeded source of random payloads, so a run can be repeated exactly.
pub struct PayloadGenerator {
    rng: StdRng,
}

impl PayloadGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// `rows` rows of `cols` random bytes, each row followed by a newline.
    ///
    /// A binary row may itself contain newline bytes. Zero rows or columns
    /// yields an empty payload.
    pub fn random_block(&mut self, rows: usize, cols: usize, charset: Charset) -> Vec<u8> {
        if rows == 0 || cols == 0 {
            return Vec::new();
        }

        let mut block = Vec::with_capacity(rows * (cols + 1));
        for _ in 0..rows {
            for _ in 0..cols {
                let byte = match charset {
                    Charset::Printable => self.rng.gen_range(32..=126u8),
                    Charset::Binary => self.rng.gen::<u8>(),
                };
                block.push(byte);
            }
            block.push(b'\n');
        }
        block
    }
}

/// `"Testing connection i\n"` for each `i`, one record per connection.
pub fn connection_records(indices: impl IntoIterator<Item = usize>) -> Vec<Vec<u8>> {
    indices
        .into_iter()
        .map(|i| format!("Testing connection {}\n", i).into_bytes())
        .collect()
}

/// `"Hello World i"` followed by `terminator`, for `i` in `0..NUM_SHORT`.
pub fn many_short(terminator: &str) -> Vec<Vec<u8>> {
    (0..NUM_SHORT)
        .map(|i| format!("{} {}{}", SHORT_MESSAGE, i, terminator).into_bytes())
        .collect()
}

/// Reads the bulk corpus. A missing or unreadable corpus yields `None`.
pub fn load_corpus(path: &Path) -> Option<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) if !bytes.is_empty() => {
            debug!("Loaded corpus {} ({} bytes)", path.display(), bytes.len());
            Some(bytes)
        }
        Ok(_) => {
            warn!("Corpus {} is empty", path.display());
            None
        }
        Err(e) => {
            warn!("Unable to read corpus {}: {}", path.display(), e);
            None
        }
    }
}
