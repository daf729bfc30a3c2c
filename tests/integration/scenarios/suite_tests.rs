use crate::integration::infrastructure::{test_timeouts, PortAllocator, SubjectFixtures};
use anyhow::Result;
use wirecheck::suite::NUM_RANDOM;
use wirecheck::{Config, RoleSelection, Suite, TestOutcome};

fn suite_config(fixtures: &SubjectFixtures, role: RoleSelection, port: u16) -> Result<Config> {
    let solution = fixtures.reference_solution()?;
    Ok(Config {
        server_executable: solution.join("server"),
        client_executable: solution.join("client"),
        role,
        ip: PortAllocator::localhost(),
        port,
        corpus: fixtures.path().join("corpus.txt"),
        seed: 316316316,
        timeouts: test_timeouts(),
    })
}

/// An unreachable server fails basic connectivity and every dependent case
#[tokio::test]
async fn test_unreachable_server_gates_dependent_cases() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let fixtures = SubjectFixtures::new()?;
    let port = PortAllocator::next()?;
    let mut config = suite_config(&fixtures, RoleSelection::Server, port)?;
    config.server_executable = fixtures.path().join("no-such-server");

    let report = Suite::new(config).run().await;

    assert!(!report.is_success());
    assert_eq!(report.passed(), 0);
    assert!(report.outcome("server/basic_connect").is_some_and(TestOutcome::is_fail));
    match report.outcome("server/multiline") {
        Some(TestOutcome::Fail(reason)) => assert!(reason.contains("Cannot establish connection")),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(report.outcome("client/basic_connect").is_none());
    Ok(())
}

/// The reference client passes every client case; the missing corpus is skipped
#[tokio::test]
async fn test_reference_client_passes_client_suite() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let fixtures = SubjectFixtures::new()?;
    let port = PortAllocator::next()?;
    let config = suite_config(&fixtures, RoleSelection::Client, port)?;

    let report = Suite::new(config).run().await;

    assert!(report.is_success(), "{}", report);
    assert_eq!(report.skipped(), 1);
    assert!(matches!(report.outcome("client/corpus"), Some(TestOutcome::Skip(_))));
    // basic_connect, many_short, six fixed messages and four random families
    assert_eq!(report.cases.len(), 2 + 6 + 4 * NUM_RANDOM);
    Ok(())
}

#[tokio::test]
async fn test_corpus_case_runs_when_corpus_exists() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let fixtures = SubjectFixtures::new()?;
    let port = PortAllocator::next()?;
    let config = suite_config(&fixtures, RoleSelection::Client, port)?;
    std::fs::write(&config.corpus, "Call me Ishmael.\n".repeat(2000))?;

    let report = Suite::new(config).run().await;
    assert_eq!(report.outcome("client/corpus"), Some(&TestOutcome::Pass));
    assert_eq!(report.skipped(), 0);
    Ok(())
}

/// A reference listener that cannot bind is a harness fault: cases skip, none fail
#[tokio::test]
async fn test_taken_reference_port_skips_client_cases() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let fixtures = SubjectFixtures::new()?;
    let port = PortAllocator::next()?;
    let _taken = std::net::TcpListener::bind((PortAllocator::localhost(), port))?;
    let config = suite_config(&fixtures, RoleSelection::Client, port)?;

    let report = Suite::new(config).run().await;

    assert!(matches!(report.outcome("client/basic_connect"), Some(TestOutcome::Skip(_))));
    assert!(matches!(report.outcome("client/short_newline"), Some(TestOutcome::Skip(_))));
    assert_eq!(report.failed(), 0, "{}", report);
    assert_eq!(report.skipped(), report.cases.len());
    assert!(report.is_success());
    Ok(())
}
