//! The catalogue of cases run against the configured subjects.

use std::fmt;
use std::net::SocketAddr;

use tracing::{error, info, warn};

use crate::broker::port_is_free;
use crate::config::Config;
use crate::orchestrator::{
    run_client_case, run_server_case, ClientScenario, ServerScenario, SubjectKind, TestContext,
    TestOutcome,
};
use crate::payload::{self, Charset, PayloadGenerator};

/// Random payloads generated per random case family.
pub const NUM_RANDOM: usize = 10;

/// Ports checked by the multi-port connectivity case: 10316, 11316, ... 20316.
pub fn port_connect_ports() -> impl Iterator<Item = u16> {
    (10..=20).map(|i| i * 1000 + 316)
}

/// Verdict for one named case.
#[derive(Debug, Clone)]
pub struct CaseReport {
    pub name: String,
    pub outcome: TestOutcome,
}

/// Verdicts for every case in a run.
#[derive(Debug, Default)]
pub struct SuiteReport {
    pub cases: Vec<CaseReport>,
}

impl SuiteReport {
    fn record(&mut self, name: impl Into<String>, outcome: TestOutcome) {
        let name = name.into();
        match &outcome {
            TestOutcome::Pass => info!("{} ... ok", name),
            TestOutcome::Skip(reason) => warn!("{} ... skipped: {}", name, reason),
            TestOutcome::Fail(reason) => error!("{} ... FAILED\n{}", name, reason),
        }
        self.cases.push(CaseReport { name, outcome });
    }

    pub fn passed(&self) -> usize {
        self.cases.iter().filter(|c| c.outcome.is_pass()).count()
    }

    pub fn failed(&self) -> usize {
        self.cases.iter().filter(|c| c.outcome.is_fail()).count()
    }

    pub fn skipped(&self) -> usize {
        self.cases
            .iter()
            .filter(|c| matches!(c.outcome, TestOutcome::Skip(_)))
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn outcome(&self, name: &str) -> Option<&TestOutcome> {
        self.cases.iter().find(|c| c.name == name).map(|c| &c.outcome)
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} passed; {} failed; {} skipped",
            self.passed(),
            self.failed(),
            self.skipped()
        )
    }
}

/// Payload cases shared by both subject kinds: name and bytes.
fn message_cases(generator: &mut PayloadGenerator, corpus: Option<&[u8]>) -> Vec<(String, Option<Vec<u8>>)> {
    let mut cases = vec![
        (
            "short_newline".to_string(),
            Some(format!("{}\n", payload::SHORT_MESSAGE).into_bytes()),
        ),
        (
            "short_no_newline".to_string(),
            Some(payload::SHORT_MESSAGE.as_bytes().to_vec()),
        ),
        (
            "short_printf".to_string(),
            Some(payload::PRINTF_MESSAGE.as_bytes().to_vec()),
        ),
        (
            "multiline".to_string(),
            Some(payload::MULTILINE_MESSAGE.as_bytes().to_vec()),
        ),
        ("corpus".to_string(), corpus.map(<[u8]>::to_vec)),
        ("binary".to_string(), Some(payload::binary_message())),
    ];

    let families = [
        ("short_random_printable", 1, 63, Charset::Printable),
        ("long_random_printable", 64, 512, Charset::Printable),
        ("short_random_binary", 1, 63, Charset::Binary),
        ("long_random_binary", 64, 512, Charset::Binary),
    ];
    for (family, rows, cols, charset) in families {
        for i in 1..=NUM_RANDOM {
            cases.push((
                format!("{}/{}", family, i),
                Some(generator.random_block(rows, cols, charset)),
            ));
        }
    }

    cases
}

pub struct Suite {
    config: Config,
    generator: PayloadGenerator,
    corpus: Option<Vec<u8>>,
}

impl Suite {
    pub fn new(config: Config) -> Self {
        let generator = PayloadGenerator::new(config.seed);
        let corpus = payload::load_corpus(&config.corpus);
        Self {
            config,
            generator,
            corpus,
        }
    }

    pub async fn run(&mut self) -> SuiteReport {
        let mut report = SuiteReport::default();

        let addr = SocketAddr::new(self.config.ip, self.config.port);
        if !port_is_free(addr) {
            warn!("{} is already in use; cases on it are likely to fail", addr);
        }

        if self.config.role.includes_server() {
            self.run_server_cases(&mut report).await;
        }
        if self.config.role.includes_client() {
            self.run_client_cases(&mut report).await;
        }

        info!("suite finished: {}", report);
        report
    }

    async fn server_case(&self, port: u16, scenario: &ServerScenario) -> TestOutcome {
        run_server_case(
            &self.config.server_executable,
            self.config.ip,
            port,
            self.config.timeouts,
            scenario,
        )
        .await
    }

    async fn client_case(&self, scenario: &ClientScenario) -> TestOutcome {
        run_client_case(
            &self.config.client_executable,
            self.config.ip,
            self.config.port,
            self.config.timeouts,
            scenario,
        )
        .await
    }

    async fn run_server_cases(&mut self, report: &mut SuiteReport) {
        let context = TestContext::new(SubjectKind::Server);
        let port = self.config.port;

        let outcome = self.server_case(port, &ServerScenario::Connect).await;
        if outcome.is_fail() {
            context.mark_unreachable();
        }
        report.record("server/basic_connect", outcome);

        for p in port_connect_ports() {
            let outcome = self.server_case(p, &ServerScenario::Connect).await;
            report.record(format!("server/port_connect/{}", p), outcome);
        }

        let mut scenarios = vec![
            (
                "server/sequential_connect".to_string(),
                Some(ServerScenario::Sequential(payload::connection_records(1..10))),
            ),
            (
                "server/concurrent_connect".to_string(),
                Some(ServerScenario::Concurrent(payload::connection_records(0..10))),
            ),
            (
                "server/many_short".to_string(),
                Some(ServerScenario::OneConnection(payload::many_short("\n"))),
            ),
        ];
        for (name, message) in message_cases(&mut self.generator, self.corpus.as_deref()) {
            scenarios.push((format!("server/{}", name), message.map(ServerScenario::Single)));
        }

        for (name, scenario) in scenarios {
            let outcome = match (context.gate(), scenario) {
                (Some(gated), _) => gated,
                (None, None) => TestOutcome::Skip(format!(
                    "unable to locate corpus {}",
                    self.config.corpus.display()
                )),
                (None, Some(scenario)) => self.server_case(port, &scenario).await,
            };
            report.record(name, outcome);
        }
    }

    async fn run_client_cases(&mut self, report: &mut SuiteReport) {
        let context = TestContext::new(SubjectKind::Client);

        let outcome = self.client_case(&ClientScenario::Connect).await;
        if outcome.is_fail() {
            context.mark_unreachable();
        }
        report.record("client/basic_connect", outcome);

        let mut scenarios = vec![(
            "client/many_short".to_string(),
            Some(ClientScenario::Repeated(payload::many_short("\n\n"))),
        )];
        for (name, message) in message_cases(&mut self.generator, self.corpus.as_deref()) {
            scenarios.push((format!("client/{}", name), message.map(ClientScenario::Single)));
        }

        for (name, scenario) in scenarios {
            let outcome = match (context.gate(), scenario) {
                (Some(gated), _) => gated,
                (None, None) => TestOutcome::Skip(format!(
                    "unable to locate corpus {}",
                    self.config.corpus.display()
                )),
                (None, Some(scenario)) => self.client_case(&scenario).await,
            };
            report.record(name, outcome);
        }
    }
}
