//! Black-box conformance harness for TCP client/server executables.
//!
//! A server subject is started as `<server> <port>`, dialed by the harness,
//! and must print every byte it receives on stdout. A client subject is
//! started as `<client> <ip> <port>`, connects to the harness's reference
//! server, and must forward every byte of its stdin over the connection.

pub type Result<T> = color_eyre::eyre::Result<T>;

pub mod broker;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod payload;
pub mod subject;
pub mod suite;
pub mod timed_io;
pub mod verifier;

pub use config::{Cli, Config, RoleSelection, Timeouts};
pub use error::{HarnessError, HarnessResult};
pub use orchestrator::{ClientScenario, ServerScenario, TestOutcome};
pub use suite::{Suite, SuiteReport};
