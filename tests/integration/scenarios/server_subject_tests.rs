use crate::integration::infrastructure::{test_timeouts, PortAllocator, SubjectFixtures};
use anyhow::Result;
use wirecheck::orchestrator::{run_server_case, ServerSession};
use wirecheck::payload::{self, Charset, PayloadGenerator};
use wirecheck::{HarnessError, ServerScenario, TestOutcome};

async fn run_reference(scenario: ServerScenario) -> Result<TestOutcome> {
    let port = PortAllocator::next()?;
    Ok(run_server_case(
        &SubjectFixtures::reference_server(),
        PortAllocator::localhost(),
        port,
        test_timeouts(),
        &scenario,
    )
    .await)
}

/// Test that a well-behaved server passes the basic connectivity check
#[tokio::test]
async fn test_reference_server_accepts_connection() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let outcome = run_reference(ServerScenario::Connect).await?;
    assert_eq!(outcome, TestOutcome::Pass);
    Ok(())
}

#[tokio::test]
async fn test_reference_server_prints_short_message() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let outcome = run_reference(ServerScenario::Single(b"Hello World\n".to_vec())).await?;
    assert_eq!(outcome, TestOutcome::Pass);
    Ok(())
}

#[tokio::test]
async fn test_reference_server_prints_binary_message() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let outcome = run_reference(ServerScenario::Single(payload::binary_message())).await?;
    assert_eq!(outcome, TestOutcome::Pass);
    Ok(())
}

#[tokio::test]
async fn test_reference_server_random_block() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut generator = PayloadGenerator::new(7);
    let block = generator.random_block(64, 512, Charset::Binary);
    let outcome = run_reference(ServerScenario::Single(block)).await?;
    assert_eq!(outcome, TestOutcome::Pass);
    Ok(())
}

/// Test a payload far larger than one read chunk
#[tokio::test]
async fn test_reference_server_large_payload() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut generator = PayloadGenerator::new(8);
    let block = generator.random_block(400, 511, Charset::Printable);
    assert_eq!(block.len(), 400 * 512);

    let outcome = run_reference(ServerScenario::Single(block)).await?;
    assert_eq!(outcome, TestOutcome::Pass);
    Ok(())
}

#[tokio::test]
async fn test_reference_server_sequential_connections() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let records = payload::connection_records(1..10);
    let outcome = run_reference(ServerScenario::Sequential(records)).await?;
    assert_eq!(outcome, TestOutcome::Pass);
    Ok(())
}

/// Records from concurrent connections may arrive in any order
#[tokio::test]
async fn test_reference_server_concurrent_connections() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let records = payload::connection_records(0..10);
    let outcome = run_reference(ServerScenario::Concurrent(records)).await?;
    assert_eq!(outcome, TestOutcome::Pass);
    Ok(())
}

/// Duplicate records must be counted, not collapsed
#[tokio::test]
async fn test_same_message_over_two_connections() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let message = b"Testing connection 4\n".to_vec();
    let outcome = run_reference(ServerScenario::Sequential(vec![message.clone(), message])).await?;
    assert_eq!(outcome, TestOutcome::Pass);
    Ok(())
}

#[tokio::test]
async fn test_reference_server_many_short_messages() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let outcome = run_reference(ServerScenario::OneConnection(payload::many_short("\n"))).await?;
    assert_eq!(outcome, TestOutcome::Pass);
    Ok(())
}

/// Test that a server which never listens fails with a dial error
#[tokio::test]
async fn test_server_that_never_listens() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let fixtures = SubjectFixtures::new()?;
    let server = fixtures.script("server", "sleep 30")?;
    let port = PortAllocator::next()?;

    let mut session = ServerSession::launch(&server, PortAllocator::localhost(), port, test_timeouts()).await?;
    let err = session.run(&ServerScenario::Connect).await.err().unwrap();
    assert!(matches!(err, HarnessError::Dial { .. }), "unexpected error: {}", err);
    session.stop().await?;

    let outcome = run_server_case(&server, PortAllocator::localhost(), port, test_timeouts(), &ServerScenario::Connect).await;
    assert!(outcome.is_fail());
    Ok(())
}

/// Test that a server which drops bytes is reported as a mismatch
#[tokio::test]
async fn test_server_that_truncates_output() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let fixtures = SubjectFixtures::new()?;
    let reference = SubjectFixtures::reference_server();
    let server = fixtures.script(
        "server",
        &format!("{} \"$1\" | head -c 5", reference.display()),
    )?;
    let port = PortAllocator::next()?;

    let mut session = ServerSession::launch(&server, PortAllocator::localhost(), port, test_timeouts()).await?;
    let err = session.single_message(b"Hello World\n").await.err().unwrap();
    assert!(matches!(err, HarnessError::Mismatch(_)), "unexpected error: {}", err);
    assert!(err.to_string().contains("Hello"));
    session.stop().await?;
    Ok(())
}
