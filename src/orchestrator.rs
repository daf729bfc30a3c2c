//! Test scenarios driven against a running subject.
//!
//! A [`ServerSession`] covers a server subject: the harness dials it and
//! observes what the subject prints on stdout. A [`ClientSession`] covers a
//! client subject: the harness feeds its stdin and observes what arrives on
//! the reference server's accepted connection.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::broker::{self, Connection, ReferenceServer};
use crate::config::Timeouts;
use crate::error::{HarnessError, HarnessResult};
use crate::subject::{StdoutRouting, Subject, SubjectConfig};
use crate::timed_io::{DeadlineSupport, Outcome, TimedStream};
use crate::verifier;

/// Record separator assumed by multi-connection payloads.
pub const RECORD_DELIMITER: u8 = b'\n';

/// Verdict for one test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Pass,
    Fail(String),
    Skip(String),
}

impl TestOutcome {
    /// Harness-side faults skip the case; every other error fails it.
    pub fn from_result(result: HarnessResult<()>) -> Self {
        match result {
            Ok(()) => TestOutcome::Pass,
            Err(e) if e.is_reference_fault() => TestOutcome::Skip(e.to_string()),
            Err(e) => TestOutcome::Fail(e.to_string()),
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, TestOutcome::Pass)
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, TestOutcome::Fail(_))
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Pass => write!(f, "PASS"),
            TestOutcome::Fail(reason) => write!(f, "FAIL: {}", reason),
            TestOutcome::Skip(reason) => write!(f, "SKIP: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind {
    Server,
    Client,
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectKind::Server => write!(f, "server"),
            SubjectKind::Client => write!(f, "client"),
        }
    }
}

/// State shared by every case run against one kind of subject.
///
/// When the basic connectivity case fails, the remaining cases for that
/// subject would all fail or hang, so they are failed without running.
#[derive(Debug)]
pub struct TestContext {
    kind: SubjectKind,
    unreachable: AtomicBool,
}

impl TestContext {
    pub fn new(kind: SubjectKind) -> Self {
        Self {
            kind,
            unreachable: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> SubjectKind {
        self.kind
    }

    pub fn mark_unreachable(&self) {
        warn!("No connection could be established with the {}; dependent cases will fail", self.kind);
        self.unreachable.store(true, Ordering::SeqCst);
    }

    pub fn is_unreachable(&self) -> bool {
        self.unreachable.load(Ordering::SeqCst)
    }

    /// The outcome to report instead of running a dependent case, if any.
    pub fn gate(&self) -> Option<TestOutcome> {
        self.is_unreachable().then(|| {
            TestOutcome::Fail(format!(
                "Cannot establish connection to {}. Aborting test...",
                self.kind
            ))
        })
    }
}

/// Sorts the records of `text` into a canonical order.
///
/// Each record keeps its trailing delimiter; a final record without one is
/// kept as is.
pub fn canonical_records(text: &[u8], delimiter: u8) -> Vec<u8> {
    let mut records: Vec<&[u8]> = text.split_inclusive(|&b| b == delimiter).collect();
    records.sort_unstable();
    records.concat()
}

/// Compares two record multisets, ignoring the order records arrived in.
pub fn compare_unordered(expected: &[u8], observed: &[u8]) -> HarnessResult<()> {
    verifier::compare(
        &canonical_records(expected, RECORD_DELIMITER),
        &canonical_records(observed, RECORD_DELIMITER),
    )
}

/// Writes `message`, absorbing a timeout into a short write.
pub async fn send<W>(writer: &mut TimedStream<W>, message: &[u8]) -> HarnessResult<usize>
where
    W: AsyncWrite + DeadlineSupport + Send + Unpin + 'static,
{
    debug!("Writing message ({} bytes)", message.len());
    let (written, outcome) = writer.bounded_write(message).await;
    match outcome {
        Outcome::Error(e) => Err(HarnessError::stream("write message", e)),
        Outcome::Complete => Ok(written),
        other => {
            debug!("Write stopped early ({:?}) after {} of {} bytes", other, written, message.len());
            Ok(written)
        }
    }
}

/// Collects whatever the observation channel produces before it goes quiet.
pub async fn observe<R>(reader: &mut TimedStream<R>) -> HarnessResult<Vec<u8>>
where
    R: AsyncRead + DeadlineSupport + Send + Unpin + 'static,
{
    let (bytes, outcome) = reader.bounded_read().await;
    match outcome {
        Outcome::Error(e) => Err(HarnessError::stream("read output", e)),
        other => {
            debug!("Observed {} bytes ({:?})", bytes.len(), other);
            Ok(bytes)
        }
    }
}

/// Sends one message and checks that the observation channel reproduces it exactly.
pub async fn write_then_observe<W, R>(
    writer: &mut TimedStream<W>,
    reader: &mut TimedStream<R>,
    message: &[u8],
) -> HarnessResult<()>
where
    W: AsyncWrite + DeadlineSupport + Send + Unpin + 'static,
    R: AsyncRead + DeadlineSupport + Send + Unpin + 'static,
{
    send(writer, message).await?;
    let observed = observe(reader).await?;
    verifier::compare(message, &observed)
}

fn missing_channel(op: &'static str, what: &str) -> HarnessError {
    HarnessError::stream(op, std::io::Error::other(format!("{} is not available", what)))
}

/// What to do with a server subject once it is up.
#[derive(Debug, Clone)]
pub enum ServerScenario {
    /// Establish one connection and nothing else
    Connect,
    Single(Vec<u8>),
    /// One fresh connection per message, opened one after another
    Sequential(Vec<Vec<u8>>),
    /// One connection per message, all opened at once
    Concurrent(Vec<Vec<u8>>),
    /// Every message over the same connection, pausing between writes
    OneConnection(Vec<Vec<u8>>),
}

/// What to do with a client subject once it has connected.
#[derive(Debug, Clone)]
pub enum ClientScenario {
    Connect,
    Single(Vec<u8>),
    /// Each message checked on its own, all over the same connection
    Repeated(Vec<Vec<u8>>),
}

/// A running server subject and the address it is reached on.
pub struct ServerSession {
    subject: Subject,
    addr: SocketAddr,
    timeouts: Timeouts,
}

impl ServerSession {
    /// Starts `<executable> <port>` and waits the settle delay.
    pub async fn launch(executable: &Path, ip: IpAddr, port: u16, timeouts: Timeouts) -> HarnessResult<Self> {
        let config = SubjectConfig::new(executable)
            .arg(port.to_string())
            .stdout(StdoutRouting::Capture)
            .timeouts(timeouts);

        let mut subject = Subject::new(config);
        subject.start().await?;

        Ok(Self {
            subject,
            addr: SocketAddr::new(ip, port),
            timeouts,
        })
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub async fn connect(&self) -> HarnessResult<Connection> {
        broker::dial(self.addr, self.subject.id(), &self.timeouts).await
    }

    async fn aggregate_output(&mut self) -> HarnessResult<Vec<u8>> {
        let output = self
            .subject
            .output_mut()
            .ok_or_else(|| missing_channel("read output", "subject stdout"))?;
        observe(output).await
    }

    pub async fn single_message(&mut self, message: &[u8]) -> HarnessResult<()> {
        let mut connection = self.connect().await?;
        let output = self
            .subject
            .output_mut()
            .ok_or_else(|| missing_channel("read output", "subject stdout"))?;
        write_then_observe(connection.writer_mut(), output, message).await
    }

    /// Opens, writes and closes one connection per message in turn, then reads once.
    pub async fn sequential_messages(&mut self, messages: &[Vec<u8>]) -> HarnessResult<()> {
        for (i, message) in messages.iter().enumerate() {
            debug!("Sequential connection {} of {}", i + 1, messages.len());
            let mut connection = self.connect().await?;
            send(connection.writer_mut(), message).await?;
            connection.close().await?;
        }

        let observed = self.aggregate_output().await?;
        compare_unordered(&messages.concat(), &observed)
    }

    /// Opens one connection per message from independent tasks, waits for
    /// every writer to finish, then reads once.
    pub async fn concurrent_messages(&mut self, messages: &[Vec<u8>]) -> HarnessResult<()> {
        let mut writers = JoinSet::new();
        for message in messages.iter().cloned() {
            let (addr, subject, timeouts) = (self.addr, self.subject.id(), self.timeouts);
            writers.spawn(async move {
                let mut connection = broker::dial(addr, subject, &timeouts).await?;
                send(connection.writer_mut(), &message).await?;
                connection.close().await
            });
        }

        debug!("Waiting for {} writers to close", messages.len());
        let mut first_error = None;
        while let Some(joined) = writers.join_next().await {
            let result = joined
                .map_err(|e| HarnessError::stream("join writer", std::io::Error::other(e)))
                .and_then(|result| result);
            if let Err(e) = result {
                warn!("Concurrent writer failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let observed = self.aggregate_output().await?;
        compare_unordered(&messages.concat(), &observed)
    }

    /// Writes every message over one connection, pausing two read timeouts
    /// between writes, then compares the whole output in order.
    pub async fn one_connection_messages(&mut self, messages: &[Vec<u8>]) -> HarnessResult<()> {
        let mut connection = self.connect().await?;
        for message in messages {
            send(connection.writer_mut(), message).await?;
            sleep(self.timeouts.read * 2).await;
        }

        let observed = self.aggregate_output().await?;
        drop(connection);
        verifier::compare(&messages.concat(), &observed)
    }

    pub async fn run(&mut self, scenario: &ServerScenario) -> HarnessResult<()> {
        match scenario {
            ServerScenario::Connect => self.connect().await?.close().await,
            ServerScenario::Single(message) => self.single_message(message).await,
            ServerScenario::Sequential(messages) => self.sequential_messages(messages).await,
            ServerScenario::Concurrent(messages) => self.concurrent_messages(messages).await,
            ServerScenario::OneConnection(messages) => self.one_connection_messages(messages).await,
        }
    }

    pub async fn stop(mut self) -> HarnessResult<()> {
        self.subject.stop().await.map(|_| ())
    }
}

/// A running client subject connected to the harness's reference server.
pub struct ClientSession {
    subject: Subject,
    reference: ReferenceServer,
}

impl ClientSession {
    /// Binds the reference server, starts `<executable> <ip> <port>` and
    /// waits for it to connect.
    pub async fn launch(executable: &Path, ip: IpAddr, port: u16, timeouts: Timeouts) -> HarnessResult<Self> {
        let mut reference = ReferenceServer::bind(SocketAddr::new(ip, port), timeouts)?;

        let config = SubjectConfig::new(executable)
            .arg(ip.to_string())
            .arg(port.to_string())
            .stdout(StdoutRouting::Diagnostics)
            .timeouts(timeouts);
        let mut subject = Subject::new(config);

        if let Err(e) = subject.start().await {
            let _ = reference.close().await;
            return Err(e);
        }

        if let Err(e) = reference.accept_within(subject.id()).await {
            let _ = subject.stop().await;
            let _ = reference.close().await;
            return Err(e);
        }

        Ok(Self { subject, reference })
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub async fn single_message(&mut self, message: &[u8]) -> HarnessResult<()> {
        let input = self
            .subject
            .input_mut()
            .ok_or_else(|| missing_channel("write message", "subject stdin"))?;
        let connection = self
            .reference
            .connection_mut()
            .ok_or_else(|| missing_channel("read output", "reference connection"))?;
        write_then_observe(input, connection.reader_mut(), message).await
    }

    pub async fn run(&mut self, scenario: &ClientScenario) -> HarnessResult<()> {
        match scenario {
            ClientScenario::Connect => Ok(()),
            ClientScenario::Single(message) => self.single_message(message).await,
            ClientScenario::Repeated(messages) => {
                for message in messages {
                    self.single_message(message).await?;
                }
                Ok(())
            }
        }
    }

    /// Releases the reference server and stops the subject; both always run.
    pub async fn stop(mut self) -> HarnessResult<()> {
        let closed = self.reference.close().await;
        let stopped = self.subject.stop().await.map(|_| ());
        stopped.and(closed)
    }
}

/// Runs one scenario against a fresh server subject.
pub async fn run_server_case(
    executable: &Path,
    ip: IpAddr,
    port: u16,
    timeouts: Timeouts,
    scenario: &ServerScenario,
) -> TestOutcome {
    let mut session = match ServerSession::launch(executable, ip, port, timeouts).await {
        Ok(session) => session,
        Err(e) => return TestOutcome::from_result(Err(e)),
    };

    let result = session.run(scenario).await;
    let stopped = session.stop().await;
    let outcome = TestOutcome::from_result(result.and(stopped));
    debug!("server case finished: {}", outcome);
    outcome
}

/// Runs one scenario against a fresh client subject.
pub async fn run_client_case(
    executable: &Path,
    ip: IpAddr,
    port: u16,
    timeouts: Timeouts,
    scenario: &ClientScenario,
) -> TestOutcome {
    let mut session = match ClientSession::launch(executable, ip, port, timeouts).await {
        Ok(session) => session,
        Err(e) => return TestOutcome::from_result(Err(e)),
    };

    let result = session.run(scenario).await;
    let stopped = session.stop().await;
    let outcome = TestOutcome::from_result(result.and(stopped));
    debug!("client case finished: {}", outcome);
    outcome
}
