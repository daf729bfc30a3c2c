use crate::integration::infrastructure::{test_timeouts, PortAllocator, SubjectFixtures};
use anyhow::Result;
use std::path::Path;
use wirecheck::orchestrator::{run_client_case, ClientSession};
use wirecheck::payload::{self, Charset, PayloadGenerator};
use wirecheck::{ClientScenario, HarnessError, TestOutcome};

async fn run_client(executable: &Path, scenario: ClientScenario) -> Result<TestOutcome> {
    let port = PortAllocator::next()?;
    Ok(run_client_case(executable, PortAllocator::localhost(), port, test_timeouts(), &scenario).await)
}

#[tokio::test]
async fn test_reference_client_connects() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let outcome = run_client(&SubjectFixtures::reference_client(), ClientScenario::Connect).await?;
    assert_eq!(outcome, TestOutcome::Pass);
    Ok(())
}

#[tokio::test]
async fn test_reference_client_forwards_short_message() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let outcome = run_client(
        &SubjectFixtures::reference_client(),
        ClientScenario::Single(b"Hello World\n".to_vec()),
    )
    .await?;
    assert_eq!(outcome, TestOutcome::Pass);
    Ok(())
}

#[tokio::test]
async fn test_reference_client_forwards_random_block() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut generator = PayloadGenerator::new(11);
    let block = generator.random_block(64, 512, Charset::Binary);
    let outcome = run_client(&SubjectFixtures::reference_client(), ClientScenario::Single(block)).await?;
    assert_eq!(outcome, TestOutcome::Pass);
    Ok(())
}

/// Test a payload larger than the stdin pipe buffer
#[tokio::test]
async fn test_reference_client_large_payload() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut generator = PayloadGenerator::new(12);
    let block = generator.random_block(400, 511, Charset::Printable);
    let outcome = run_client(&SubjectFixtures::reference_client(), ClientScenario::Single(block)).await?;
    assert_eq!(outcome, TestOutcome::Pass);
    Ok(())
}

/// Each message is checked on its own over one connection
#[tokio::test]
async fn test_reference_client_repeated_messages() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let outcome = run_client(
        &SubjectFixtures::reference_client(),
        ClientScenario::Repeated(payload::many_short("\n\n")),
    )
    .await?;
    assert_eq!(outcome, TestOutcome::Pass);
    Ok(())
}

#[tokio::test]
async fn test_client_that_never_connects() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let fixtures = SubjectFixtures::new()?;
    let client = fixtures.script("client", "sleep 30")?;
    let port = PortAllocator::next()?;

    let err = ClientSession::launch(&client, PortAllocator::localhost(), port, test_timeouts())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, HarnessError::ConnectTimeout(_)), "unexpected error: {}", err);
    Ok(())
}

#[tokio::test]
async fn test_missing_client_executable() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let fixtures = SubjectFixtures::new()?;
    let missing = fixtures.path().join("client");
    let port = PortAllocator::next()?;

    let err = ClientSession::launch(&missing, PortAllocator::localhost(), port, test_timeouts())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, HarnessError::Launch { .. }), "unexpected error: {}", err);

    let outcome = run_client(&missing, ClientScenario::Connect).await?;
    assert!(outcome.is_fail());
    Ok(())
}

/// A client whose stdout is noisy still passes; stdout is only diagnostics
#[tokio::test]
async fn test_client_stdout_goes_to_diagnostics() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let fixtures = SubjectFixtures::new()?;
    let reference = SubjectFixtures::reference_client();
    let client = fixtures.script(
        "client",
        &format!("echo connecting to \"$1\"\nexec {} \"$1\" \"$2\"", reference.display()),
    )?;
    let port = PortAllocator::next()?;

    let mut session = ClientSession::launch(&client, PortAllocator::localhost(), port, test_timeouts()).await?;
    session.single_message(b"Hello World\n").await?;
    assert!(session.subject().diagnostics().contains("connecting to 127.0.0.1"));
    session.stop().await?;
    Ok(())
}
