//! Known-good server: prints every byte received on any connection to stdout.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use clap::Parser;
use tokio::io::{self, AsyncReadExt, AsyncWriteExt, Stdout};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wirecheck::Result;

#[derive(Parser, Debug)]
#[command(name = "reference-server")]
#[command(about = "Prints everything received over TCP to stdout")]
struct Args {
    /// Port to listen on
    port: u16,
}

async fn relay(mut stream: TcpStream, stdout: Arc<Mutex<Stdout>>) -> io::Result<()> {
    let mut buf = vec![0u8; 4096];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        // Chunks from concurrent connections may interleave, never tear
        let mut out = stdout.lock().await;
        out.write_all(&buf[..n]).await?;
        out.flush().await?;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    // Logs go to stderr; stdout carries payload only
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), args.port);
    let listener = TcpListener::bind(addr).await?;
    info!("listening on {}", addr);

    let stdout = Arc::new(Mutex::new(io::stdout()));
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };
        debug!("connection from {}", peer);

        let stdout = Arc::clone(&stdout);
        tokio::spawn(async move {
            if let Err(e) = relay(stream, stdout).await {
                warn!("connection from {} failed: {}", peer, e);
            }
        });
    }
}
