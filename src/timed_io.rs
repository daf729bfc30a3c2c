//! Bounded-wait reads and writes over any byte stream.
//!
//! A subject never closes its end of a conversation on its own, so end of
//! stream cannot mark "all output has arrived". A read therefore runs until a
//! quiet window of `timeout` passes with nothing new, and that timeout is a
//! normal way for a read to finish. Whether what arrived is correct is decided
//! later by the verifier.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, trace};

/// Size of a single read attempt.
const READ_CHUNK: usize = 2048;

/// Largest slice handed to a single write attempt.
const WRITE_CHUNK: usize = 64 * 1024;

/// A bounded read stops collecting once this much has arrived.
pub const DEFAULT_READ_LIMIT: usize = 16 * 1024 * 1024;

/// Default margin taken off socket deadlines.
pub const DEFAULT_EPSILON: Duration = Duration::from_millis(3);

/// Result of one read or write attempt.
#[derive(Debug)]
pub enum Attempt {
    Data(usize),
    EndOfStream,
    TimedOut,
    Error(io::Error),
}

/// Result of a whole bounded read or write.
#[derive(Debug)]
pub enum Outcome {
    /// Every byte was written, or the read limit was reached.
    Complete,
    EndOfStream,
    TimedOut,
    Error(io::Error),
}

impl Outcome {
    /// Whether the operation stopped on something other than an I/O failure.
    pub fn is_benign(&self) -> bool {
        !matches!(self, Outcome::Error(_))
    }
}

/// Reports whether a stream type carries a native per-operation deadline.
///
/// Sockets do; process pipes and in-memory pipes are raced against a timer
/// from a detached task instead.
pub trait DeadlineSupport {
    fn has_native_deadline(&self) -> bool;
}

impl DeadlineSupport for TcpStream {
    fn has_native_deadline(&self) -> bool {
        true
    }
}

impl DeadlineSupport for OwnedReadHalf {
    fn has_native_deadline(&self) -> bool {
        true
    }
}

impl DeadlineSupport for OwnedWriteHalf {
    fn has_native_deadline(&self) -> bool {
        true
    }
}

impl DeadlineSupport for ChildStdin {
    fn has_native_deadline(&self) -> bool {
        false
    }
}

impl DeadlineSupport for ChildStdout {
    fn has_native_deadline(&self) -> bool {
        false
    }
}

impl DeadlineSupport for ChildStderr {
    fn has_native_deadline(&self) -> bool {
        false
    }
}

impl DeadlineSupport for DuplexStream {
    fn has_native_deadline(&self) -> bool {
        false
    }
}

/// How a [`TimedStream`] bounds each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Attach a deadline of `timeout - epsilon` to the operation itself.
    Deadline { epsilon: Duration },
    /// Run the operation on its own task and race it against a timer.
    Detached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Read,
    Write,
}

/// An operation that finished on a detached task, handing the stream back.
struct Landed<S> {
    stream: S,
    op: Op,
    bytes: Vec<u8>,
    result: io::Result<usize>,
}

/// A byte stream paired with the timeout bounding each operation on it.
///
/// With the detached strategy a timed-out operation keeps running in the
/// background and holds the stream. It is not cancelled. The next operation
/// first waits for it to land. Late read data is delivered to the next read,
/// even if a write lands in between. A late write result is dropped and the
/// new write starts fresh with the caller's data.
pub struct TimedStream<S> {
    inner: Option<S>,
    timeout: Duration,
    strategy: Strategy,
    read_limit: usize,
    in_flight: Option<JoinHandle<Landed<S>>>,
    /// A late read that landed while a write was waiting for the stream
    late_read: Option<(Vec<u8>, io::Result<usize>)>,
}

impl<S> TimedStream<S>
where
    S: DeadlineSupport + Send + Unpin + 'static,
{
    pub fn new(stream: S, timeout: Duration) -> Self {
        Self::with_epsilon(stream, timeout, DEFAULT_EPSILON)
    }

    pub fn with_epsilon(stream: S, timeout: Duration, epsilon: Duration) -> Self {
        let strategy = if stream.has_native_deadline() {
            Strategy::Deadline { epsilon }
        } else {
            Strategy::Detached
        };

        Self {
            inner: Some(stream),
            timeout,
            strategy,
            read_limit: DEFAULT_READ_LIMIT,
            in_flight: None,
            late_read: None,
        }
    }

    pub fn with_read_limit(mut self, read_limit: usize) -> Self {
        self.read_limit = read_limit;
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// The underlying stream, unless a detached operation is still holding it.
    pub fn get_ref(&self) -> Option<&S> {
        self.inner.as_ref()
    }

    /// Releases the underlying stream. Any abandoned operation is left running.
    pub fn into_inner(self) -> Option<S> {
        self.inner
    }

    fn deadline(&self) -> Instant {
        match self.strategy {
            Strategy::Deadline { epsilon } => Instant::now() + self.timeout.saturating_sub(epsilon),
            Strategy::Detached => Instant::now() + self.timeout,
        }
    }

    /// Waits for the detached operation of kind `op`, launching it once any
    /// abandoned operation has handed the stream back.
    ///
    /// An abandoned read that lands is returned to a read, or parked in
    /// `late_read` for the next read when a write is waiting. An abandoned
    /// write is always stale: its result is dropped and `launch` still runs.
    async fn race_detached<F>(&mut self, op: Op, launch: F) -> Result<Landed<S>, Attempt>
    where
        F: FnOnce(S) -> JoinHandle<Landed<S>>,
    {
        let deadline = self.deadline();
        let mut launch = Some(launch);

        loop {
            let (mut handle, launched) = match self.in_flight.take() {
                Some(handle) => (handle, false),
                None => match (self.inner.take(), launch.take()) {
                    (Some(stream), Some(launch)) => (launch(stream), true),
                    _ => return Err(Attempt::Error(stream_lost())),
                },
            };

            tokio::select! {
                joined = &mut handle => match joined {
                    Ok(landed) if launched => return Ok(landed),
                    Ok(landed) if landed.op == Op::Read && op == Op::Read => return Ok(landed),
                    Ok(landed) if landed.op == Op::Read => {
                        trace!("parking late read ({:?})", landed.result);
                        self.late_read = Some((landed.bytes, landed.result));
                        self.inner = Some(landed.stream);
                    }
                    Ok(landed) => {
                        debug!("dropping late write result ({:?})", landed.result);
                        self.inner = Some(landed.stream);
                    }
                    Err(e) => return Err(Attempt::Error(io::Error::other(e))),
                },
                _ = sleep_until(deadline) => {
                    self.in_flight = Some(handle);
                    return Err(Attempt::TimedOut);
                }
            }
        }
    }
}

impl<S> TimedStream<S>
where
    S: AsyncRead + DeadlineSupport + Send + Unpin + 'static,
{
    /// Makes one bounded read attempt, appending whatever arrives to `buf`.
    pub async fn read_attempt(&mut self, buf: &mut Vec<u8>) -> Attempt {
        match self.strategy {
            Strategy::Deadline { .. } => {
                let deadline = self.deadline();
                let Some(stream) = self.inner.as_mut() else {
                    return Attempt::Error(stream_lost());
                };

                let mut chunk = [0u8; READ_CHUNK];
                match timeout_at(deadline, stream.read(&mut chunk)).await {
                    Ok(Ok(0)) => Attempt::EndOfStream,
                    Ok(Ok(n)) => {
                        buf.extend_from_slice(&chunk[..n]);
                        Attempt::Data(n)
                    }
                    Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => Attempt::TimedOut,
                    Ok(Err(e)) => Attempt::Error(e),
                    Err(_) => Attempt::TimedOut,
                }
            }
            Strategy::Detached => {
                if let Some((bytes, result)) = self.late_read.take() {
                    return landed_read(buf, bytes, result);
                }

                let landed = self
                    .race_detached(Op::Read, |mut stream| {
                        tokio::spawn(async move {
                            let mut bytes = vec![0u8; READ_CHUNK];
                            let result = stream.read(&mut bytes).await;
                            bytes.truncate(*result.as_ref().unwrap_or(&0));
                            Landed {
                                stream,
                                op: Op::Read,
                                bytes,
                                result,
                            }
                        })
                    })
                    .await;

                match landed {
                    Ok(landed) => {
                        self.inner = Some(landed.stream);
                        landed_read(buf, landed.bytes, landed.result)
                    }
                    Err(attempt) => attempt,
                }
            }
        }
    }

    /// Reads until the stream goes quiet for a full timeout, ends, fails, or
    /// the read limit is reached.
    pub async fn bounded_read(&mut self) -> (Vec<u8>, Outcome) {
        let mut buf = Vec::new();

        loop {
            match self.read_attempt(&mut buf).await {
                Attempt::Data(n) => {
                    trace!("read {} bytes", n);
                    if buf.len() >= self.read_limit {
                        debug!("read limit of {} bytes reached", self.read_limit);
                        return (buf, Outcome::Complete);
                    }
                }
                Attempt::EndOfStream => {
                    debug!("read got end of stream after {} bytes", buf.len());
                    return (buf, Outcome::EndOfStream);
                }
                Attempt::TimedOut => {
                    debug!("read went quiet after {} bytes", buf.len());
                    return (buf, Outcome::TimedOut);
                }
                Attempt::Error(e) => return (buf, Outcome::Error(e)),
            }
        }
    }
}

impl<S> TimedStream<S>
where
    S: AsyncWrite + DeadlineSupport + Send + Unpin + 'static,
{
    /// Makes one bounded write attempt with a prefix of `data`.
    pub async fn write_attempt(&mut self, data: &[u8]) -> Attempt {
        let data = &data[..data.len().min(WRITE_CHUNK)];

        match self.strategy {
            Strategy::Deadline { .. } => {
                let deadline = self.deadline();
                let Some(stream) = self.inner.as_mut() else {
                    return Attempt::Error(stream_lost());
                };

                match timeout_at(deadline, stream.write(data)).await {
                    Ok(Ok(0)) => Attempt::EndOfStream,
                    Ok(Ok(n)) => Attempt::Data(n),
                    Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => Attempt::TimedOut,
                    Ok(Err(e)) => Attempt::Error(e),
                    Err(_) => Attempt::TimedOut,
                }
            }
            Strategy::Detached => {
                let bytes = data.to_vec();
                let landed = self
                    .race_detached(Op::Write, move |mut stream| {
                        tokio::spawn(async move {
                            let result = stream.write(&bytes).await;
                            Landed {
                                stream,
                                op: Op::Write,
                                bytes: Vec::new(),
                                result,
                            }
                        })
                    })
                    .await;

                match landed {
                    Ok(landed) => {
                        self.inner = Some(landed.stream);
                        match landed.result {
                            Ok(0) => Attempt::EndOfStream,
                            Ok(n) => Attempt::Data(n),
                            Err(e) => Attempt::Error(e),
                        }
                    }
                    Err(attempt) => attempt,
                }
            }
        }
    }

    /// Writes `data` in bounded attempts until all of it is written or an
    /// attempt does not make progress.
    pub async fn bounded_write(&mut self, data: &[u8]) -> (usize, Outcome) {
        let mut written = 0;

        while written < data.len() {
            match self.write_attempt(&data[written..]).await {
                Attempt::Data(n) => {
                    trace!("wrote {} bytes", n);
                    written += n;
                }
                Attempt::EndOfStream => return (written, Outcome::EndOfStream),
                Attempt::TimedOut => {
                    debug!("write timed out after {} of {} bytes", written, data.len());
                    return (written, Outcome::TimedOut);
                }
                Attempt::Error(e) => return (written, Outcome::Error(e)),
            }
        }

        (written, Outcome::Complete)
    }

    /// Shuts down the write side within one timeout.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        let Some(stream) = self.inner.as_mut() else {
            return Err(stream_lost());
        };

        match tokio::time::timeout(self.timeout, stream.shutdown()).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "shutdown timed out")),
        }
    }
}

fn landed_read(buf: &mut Vec<u8>, bytes: Vec<u8>, result: io::Result<usize>) -> Attempt {
    match result {
        Ok(0) => Attempt::EndOfStream,
        Ok(n) => {
            buf.extend_from_slice(&bytes);
            Attempt::Data(n)
        }
        Err(e) => Attempt::Error(e),
    }
}

fn stream_lost() -> io::Error {
    io::Error::new(
        io::ErrorKind::BrokenPipe,
        "stream is no longer available",
    )
}
