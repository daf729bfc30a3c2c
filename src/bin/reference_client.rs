//! Known-good client: sends all of stdin to a server, then exits.

use std::net::{IpAddr, SocketAddr};

use clap::Parser;
use tokio::io::{self, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wirecheck::Result;

#[derive(Parser, Debug)]
#[command(name = "reference-client")]
#[command(about = "Sends stdin to a TCP server")]
struct Args {
    /// Server address
    ip: IpAddr,
    /// Server port
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let addr = SocketAddr::new(args.ip, args.port);
    let mut stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    info!("connected to {}", addr);

    let sent = io::copy(&mut io::stdin(), &mut stream).await?;
    stream.shutdown().await?;
    info!("sent {} bytes", sent);
    Ok(())
}
