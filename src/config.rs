use clap::{Parser, ValueEnum};
use eyre::eyre;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use super::Result;

/// Port used when none is given on the command line.
pub const DEFAULT_PORT: u16 = 31600;

/// Seed for payload generation, so random cases repeat across runs.
pub const DEFAULT_SEED: u64 = 316316316;

/// Conformance harness for TCP client and server executables
#[derive(Parser, Debug)]
#[command(name = "wirecheck")]
#[command(about = "Checks that TCP client/server executables deliver byte payloads intact")]
#[command(version)]
pub struct Cli {
    /// Directory containing the `server` and `client` executables under test
    #[arg(long, env = "SOLUTION_DIR")]
    pub solution_dir: PathBuf,

    /// Which subject(s) to exercise
    #[arg(long, value_enum, default_value = "both")]
    pub role: RoleSelection,

    /// Port for single-port cases
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address subjects connect to / are reached on
    #[arg(long, default_value = "127.0.0.1")]
    pub ip: String,

    /// Large text corpus used by the bulk delivery case
    #[arg(long, default_value = "mobydick.txt")]
    pub corpus: PathBuf,

    /// Seed for random payloads
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Margin subtracted from socket deadlines (ms)
    #[arg(long, default_value = "3")]
    pub epsilon_ms: u64,

    /// How long to wait for a client subject to connect (ms)
    #[arg(long, default_value = "3000")]
    pub accept_timeout_ms: u64,

    /// Quiescence window for reads (ms)
    #[arg(long, default_value = "35")]
    pub read_timeout_ms: u64,

    /// Bound on each write attempt (ms)
    #[arg(long, default_value = "35")]
    pub write_timeout_ms: u64,

    /// Wait after spawning a subject before talking to it (ms)
    #[arg(long, default_value = "100")]
    pub settle_ms: u64,

    /// Bound on reaping a killed subject (ms)
    #[arg(long, default_value = "5000")]
    pub stop_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleSelection {
    Server,
    Client,
    Both,
}

impl RoleSelection {
    pub fn includes_server(self) -> bool {
        matches!(self, RoleSelection::Server | RoleSelection::Both)
    }

    pub fn includes_client(self) -> bool {
        matches!(self, RoleSelection::Client | RoleSelection::Both)
    }
}

/// Every bound the harness places on a blocking operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Subtracted from a socket deadline so it fires strictly before the caller's timer.
    pub epsilon: Duration,
    pub accept: Duration,
    pub read: Duration,
    pub write: Duration,
    /// Heuristic post-spawn wait; not a readiness guarantee.
    pub settle: Duration,
    pub stop: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            epsilon: Duration::from_millis(3),
            accept: Duration::from_secs(3),
            read: Duration::from_millis(35),
            write: Duration::from_millis(35),
            settle: Duration::from_millis(100),
            stop: Duration::from_secs(5),
        }
    }
}

/// Validated harness configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server_executable: PathBuf,
    pub client_executable: PathBuf,
    pub role: RoleSelection,
    pub ip: IpAddr,
    pub port: u16,
    pub corpus: PathBuf,
    pub seed: u64,
    pub timeouts: Timeouts,
}

impl Config {
    /// Parse command line arguments into configuration
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let ip: IpAddr = cli
            .ip
            .parse()
            .map_err(|e| eyre!("Invalid subject address '{}': {}", cli.ip, e))?;

        if cli.epsilon_ms >= cli.read_timeout_ms || cli.epsilon_ms >= cli.write_timeout_ms {
            return Err(eyre!(
                "Deadline epsilon ({}ms) must be smaller than the read and write timeouts",
                cli.epsilon_ms
            ));
        }

        Ok(Config {
            server_executable: cli.solution_dir.join("server"),
            client_executable: cli.solution_dir.join("client"),
            role: cli.role,
            ip,
            port: cli.port,
            corpus: cli.corpus,
            seed: cli.seed,
            timeouts: Timeouts {
                epsilon: Duration::from_millis(cli.epsilon_ms),
                accept: Duration::from_millis(cli.accept_timeout_ms),
                read: Duration::from_millis(cli.read_timeout_ms),
                write: Duration::from_millis(cli.write_timeout_ms),
                settle: Duration::from_millis(cli.settle_ms),
                stop: Duration::from_millis(cli.stop_timeout_ms),
            },
        })
    }
}
