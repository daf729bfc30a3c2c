use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Failures surfaced by the harness components.
///
/// A bounded read or write running out of time is not represented here; it is
/// reported as [`crate::timed_io::Outcome::TimedOut`] and only becomes a
/// failure if the data gathered so far does not verify.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("failed to start subject {path}: {source}")]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind reference listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {0:?} waiting for a connection")]
    ConnectTimeout(Duration),

    #[error("failed to connect to subject at {addr}: {source}")]
    Dial {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to accept subject connection: {0}")]
    Accept(#[source] std::io::Error),

    #[error("failed to {op}: {source}")]
    Stream {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("message sent does not match message received\n{0}")]
    Mismatch(String),

    #[error("failed to stop subject: {0}")]
    ProcessStop(String),
}

impl HarnessError {
    pub(crate) fn stream(op: &'static str, source: std::io::Error) -> Self {
        HarnessError::Stream { op, source }
    }

    /// Whether this failure originates on the harness side rather than in the subject.
    pub fn is_reference_fault(&self) -> bool {
        matches!(self, HarnessError::Bind { .. })
    }
}

pub type HarnessResult<T> = std::result::Result<T, HarnessError>;
