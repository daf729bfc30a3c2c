use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wirecheck::{Cli, Config, Result, Suite};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_cli(cli)?;

    info!(
        "wirecheck starting: server {}, client {}, {}:{}",
        config.server_executable.display(),
        config.client_executable.display(),
        config.ip,
        config.port
    );

    let report = Suite::new(config).run().await;

    if report.is_success() {
        info!("All cases passed ({})", report);
        Ok(())
    } else {
        for case in report.cases.iter().filter(|c| c.outcome.is_fail()) {
            error!("failed: {}", case.name);
        }
        error!("{}", report);
        std::process::exit(1);
    }
}
