//! Byte-exact comparison of what was sent against what was observed.
//!
//! Failure reports stay readable for arbitrary payloads: every message is
//! escaped so control and non-UTF-8 bytes are visible, clipped to a fixed
//! number of lines and columns, and tagged with a short digest of its full
//! contents.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::{HarnessError, HarnessResult};

/// Bytes of the SHA-256 digest shown in a report.
pub const MAX_HASH_BYTES: usize = 4;
/// Lines of a message shown in a report.
pub const MAX_LINES_PER_MESSAGE: usize = 10;
/// Characters of a single line shown in a report.
pub const MAX_CHARS_PER_LINE: usize = 55;

/// Bytes shown on either side of the first differing position.
const DIFF_WINDOW: usize = 8;

/// A byte payload as it appears in a failure report.
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    bytes: &'a [u8],
}

impl<'a> Message<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Quoted, escaped copy of the message. Newlines stay literal so the
    /// rendering keeps the message's line structure.
    pub fn quoted(&self) -> String {
        let mut out = String::with_capacity(self.bytes.len() + 2);
        out.push('"');
        for &byte in self.bytes {
            if byte == b'\n' {
                out.push('\n');
            } else {
                out.extend(std::ascii::escape_default(byte).map(char::from));
            }
        }
        out.push('"');
        out
    }

    /// Leading bytes of the message's SHA-256, in hex.
    pub fn digest(&self) -> String {
        let hash = Sha256::digest(self.bytes);
        hash[..MAX_HASH_BYTES]
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    pub fn line_count(&self) -> usize {
        self.bytes.iter().filter(|&&b| b == b'\n').count() + 1
    }

    /// The quoted message clipped to the report limits.
    pub fn shortened(&self) -> String {
        let quoted = self.quoted();
        let lines: Vec<&str> = quoted.split('\n').collect();
        let mut out = String::new();

        for (i, line) in lines.iter().enumerate() {
            if i >= MAX_LINES_PER_MESSAGE {
                out.push_str(&format!("(... {} more lines)\n", lines.len() - i));
                break;
            }

            if line.chars().count() > MAX_CHARS_PER_LINE {
                out.extend(line.chars().take(MAX_CHARS_PER_LINE));
                out.push_str("  (...)");
            } else {
                out.push_str(line);
            }
            out.push('\n');
        }

        out
    }

    /// Quoted form of the last `k` bytes.
    pub fn tail(&self, k: usize) -> String {
        let start = self.bytes.len().saturating_sub(k);
        Message::new(&self.bytes[start..]).quoted()
    }
}

impl fmt::Display for Message<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({} lines, {} bytes, hash: {})\n\n{}",
            self.line_count(),
            self.bytes.len(),
            self.digest(),
            self.shortened()
        )
    }
}

/// How an observed payload relates to the expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Identical,
    /// Nothing at all was observed.
    NothingReceived,
    /// The observation is a strict, non-empty prefix of what was sent.
    TruncatedPrefix,
    /// What was sent is a strict prefix of the observation.
    TrailingExtra,
    /// The payloads first differ at this byte offset.
    DiffersAt(usize),
}

pub fn relation(expected: &[u8], actual: &[u8]) -> Relation {
    if expected == actual {
        Relation::Identical
    } else if actual.is_empty() {
        Relation::NothingReceived
    } else if expected.starts_with(actual) {
        Relation::TruncatedPrefix
    } else if actual.starts_with(expected) {
        Relation::TrailingExtra
    } else {
        let position = expected
            .iter()
            .zip(actual)
            .position(|(a, b)| a != b)
            .unwrap_or(expected.len().min(actual.len()));
        Relation::DiffersAt(position)
    }
}

fn describe(expected: &[u8], actual: &[u8]) -> String {
    match relation(expected, actual) {
        Relation::Identical => "The messages are identical.".to_string(),
        Relation::NothingReceived => "Nothing was received.".to_string(),
        Relation::TruncatedPrefix => format!(
            "The received message is a truncated prefix of the sent message \
             ({} of {} bytes; it ends with {}).",
            actual.len(),
            expected.len(),
            Message::new(actual).tail(DIFF_WINDOW)
        ),
        Relation::TrailingExtra => format!(
            "The sent message is a prefix of the received message \
             ({} unexpected trailing bytes).",
            actual.len() - expected.len()
        ),
        Relation::DiffersAt(position) => {
            let window = |bytes: &[u8]| {
                let start = position.saturating_sub(DIFF_WINDOW);
                let end = (position + DIFF_WINDOW).min(bytes.len());
                Message::new(&bytes[start..end]).quoted()
            };
            format!(
                "The messages differ for the first time at byte {}:\n  sent:     {}\n  received: {}",
                position,
                window(expected),
                window(actual)
            )
        }
    }
}

/// Full failure report for a mismatch.
pub fn mismatch_report(expected: &[u8], actual: &[u8]) -> String {
    format!(
        "\n-----------    Sent     ------------\n{}\n\
         -----------  Received   ------------\n{}\n\
         {}\n",
        Message::new(expected),
        Message::new(actual),
        describe(expected, actual)
    )
}

/// Passes only when `actual` is byte-for-byte equal to `expected`.
pub fn compare(expected: &[u8], actual: &[u8]) -> HarnessResult<()> {
    if expected == actual {
        return Ok(());
    }
    Err(HarnessError::Mismatch(mismatch_report(expected, actual)))
}
