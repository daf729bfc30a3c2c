use crate::config::Timeouts;
use crate::error::{HarnessError, HarnessResult};
use crate::timed_io::TimedStream;
use futures::StreamExt;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncRead;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::{sleep, timeout};
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where a subject's stdout goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdoutRouting {
    /// Keep stdout open for bounded reads; it is the observation channel.
    Capture,
    /// Drain stdout into the diagnostic log alongside stderr.
    Diagnostics,
}

/// Configuration for launching a subject executable
#[derive(Debug, Clone)]
pub struct SubjectConfig {
    /// Executable under test
    pub executable: PathBuf,
    /// Arguments for the executable
    pub args: Vec<String>,
    /// What to do with stdout
    pub stdout: StdoutRouting,
    /// Bounds for I/O on the subject's pipes, settle and stop
    pub timeouts: Timeouts,
}

impl SubjectConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            stdout: StdoutRouting::Capture,
            timeouts: Timeouts::default(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn stdout(mut self, routing: StdoutRouting) -> Self {
        self.stdout = routing;
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

/// Lifecycle of a subject. A stopped subject is never started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectState {
    NotStarted,
    Running,
    Stopped,
}

/// Append-only record of everything a subject wrote to its diagnostic streams.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }

    /// Snapshot of the lines drained so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|lines| lines.clone()).unwrap_or_default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines
            .lock()
            .map(|lines| lines.iter().any(|line| line.contains(needle)))
            .unwrap_or(false)
    }
}

/// An external executable under test.
///
/// The subject's stdin and (when captured) stdout are kept open for bounded
/// writes and reads for as long as it runs. Stderr is drained continuously so
/// the subject never blocks on a full pipe.
pub struct Subject {
    /// Identifies the subject in logs and on connections
    id: Uuid,
    config: SubjectConfig,
    state: SubjectState,
    pid: Option<Pid>,
    child: Option<Child>,
    input: Option<TimedStream<ChildStdin>>,
    output: Option<TimedStream<ChildStdout>>,
    diagnostics: DiagnosticLog,
}

impl Subject {
    /// Creates a subject in the `NotStarted` state.
    ///
    /// # Arguments
    /// * `config` - Executable, arguments and stdout routing
    ///
    /// # Returns
    /// * `Self` - The subject, not yet spawned
    pub fn new(config: SubjectConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            state: SubjectState::NotStarted,
            pid: None,
            child: None,
            input: None,
            output: None,
            diagnostics: DiagnosticLog::new(),
        }
    }

    /// Spawns the executable and waits the settle delay.
    ///
    /// The settle delay is a heuristic: after it the subject is assumed to be
    /// bound and ready, with no guarantee that it is.
    ///
    /// # Returns
    /// * `HarnessResult<()>` - `Launch` if the subject could not be spawned or
    ///   was already started once; the subject stays `NotStarted` on spawn failure
    pub async fn start(&mut self) -> HarnessResult<()> {
        if self.state != SubjectState::NotStarted {
            return Err(self.launch_error(std::io::Error::other(format!(
                "subject is {:?} and cannot be started again",
                self.state
            ))));
        }

        info!(
            subject = %self.id,
            "Spawning subject: {} {:?}",
            self.config.executable.display(),
            self.config.args
        );

        let mut command = Command::new(&self.config.executable);
        command.args(&self.config.args);

        // Own process group so teardown reaches anything the subject forks
        command.process_group(0);
        command.kill_on_drop(true);
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| self.launch_error(e))?;

        let pid = match child.id().map(i32::try_from) {
            Some(Ok(pid)) => Pid::from_raw(pid),
            _ => {
                let _ = child.start_kill();
                return Err(self.launch_error(std::io::Error::other("failed to get process ID")));
            }
        };

        let timeouts = self.config.timeouts;
        self.input = child
            .stdin
            .take()
            .map(|stdin| TimedStream::with_epsilon(stdin, timeouts.write, timeouts.epsilon));

        if let Some(stdout) = child.stdout.take() {
            match self.config.stdout {
                StdoutRouting::Capture => {
                    self.output = Some(TimedStream::with_epsilon(
                        stdout,
                        timeouts.read,
                        timeouts.epsilon,
                    ));
                }
                StdoutRouting::Diagnostics => {
                    spawn_drain(stdout, "stdout", self.id, self.diagnostics.clone());
                }
            }
        }

        if let Some(stderr) = child.stderr.take() {
            spawn_drain(stderr, "stderr", self.id, self.diagnostics.clone());
        }

        self.pid = Some(pid);
        self.child = Some(child);
        self.state = SubjectState::Running;
        info!(subject = %self.id, "Subject spawned with PID: {}", pid);

        sleep(timeouts.settle).await;
        Ok(())
    }

    /// Kills the subject's process group and reaps it.
    ///
    /// # Returns
    /// * `HarnessResult<ExitStatus>` - `ProcessStop` if the subject is not
    ///   running, cannot be signalled, or is not reaped within the stop timeout
    pub async fn stop(&mut self) -> HarnessResult<ExitStatus> {
        if self.state != SubjectState::Running {
            return Err(HarnessError::ProcessStop(format!(
                "attempted to stop subject {} that is not running ({:?})",
                self.id, self.state
            )));
        }

        let (Some(pid), Some(mut child)) = (self.pid, self.child.take()) else {
            return Err(HarnessError::ProcessStop("subject has no process handle".to_string()));
        };

        debug!(subject = %self.id, "Stopping subject {}", pid);
        match killpg(pid, Signal::SIGKILL) {
            // Already gone; it still has to be reaped
            Ok(()) | Err(nix::Error::ESRCH) => {}
            Err(e) => {
                self.child = Some(child);
                return Err(HarnessError::ProcessStop(format!("failed to kill subject: {}", e)));
            }
        }

        let status = match timeout(self.config.timeouts.stop, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                self.state = SubjectState::Stopped;
                return Err(HarnessError::ProcessStop(format!("failed to reap subject: {}", e)));
            }
            Err(_) => {
                self.state = SubjectState::Stopped;
                return Err(HarnessError::ProcessStop(format!(
                    "subject was not reaped within {:?}",
                    self.config.timeouts.stop
                )));
            }
        };

        self.state = SubjectState::Stopped;
        self.input = None;
        self.output = None;
        info!(subject = %self.id, "Subject stopped: {:?}", status);
        Ok(status)
    }

    fn launch_error(&self, source: std::io::Error) -> HarnessError {
        HarnessError::Launch {
            path: self.config.executable.clone(),
            source,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SubjectState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SubjectState::Running
    }

    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// The subject's stdin, bounded by the write timeout.
    pub fn input_mut(&mut self) -> Option<&mut TimedStream<ChildStdin>> {
        self.input.as_mut()
    }

    /// The subject's stdout when captured, bounded by the read timeout.
    pub fn output_mut(&mut self) -> Option<&mut TimedStream<ChildStdout>> {
        self.output.as_mut()
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.diagnostics
    }
}

impl Drop for Subject {
    fn drop(&mut self) {
        if self.state != SubjectState::Running {
            return;
        }
        if let Some(pid) = self.pid {
            warn!(subject = %self.id, "Subject dropped while running (PID: {}), killing", pid);
            match killpg(pid, Signal::SIGKILL) {
                Ok(()) | Err(nix::Error::ESRCH) => {}
                Err(e) => warn!("Failed to kill subject process group {}: {}", pid, e),
            }
        }
    }
}

/// Forwards each line of `reader` to the log and to tracing until the pipe closes.
fn spawn_drain<R>(reader: R, stream: &'static str, subject: Uuid, log: DiagnosticLog)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let codec = AnyDelimiterCodec::new(b"\n".to_vec(), b"\n".to_vec());
        let mut lines = FramedRead::new(reader, codec);

        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => {
                    let line = String::from_utf8_lossy(&line).into_owned();
                    info!(target: "wirecheck::subject", %subject, stream, "{}", line);
                    log.append(line);
                }
                Err(e) => {
                    warn!(%subject, stream, "Diagnostic drain stopped: {}", e);
                    break;
                }
            }
        }
        debug!(%subject, stream, "Diagnostic stream closed");
    });
}
