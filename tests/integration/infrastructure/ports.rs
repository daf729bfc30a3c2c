use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};

use anyhow::{anyhow, Result};
use wirecheck::broker::port_is_free;

/// Ports handed out across every test in this binary; tests run in parallel.
static NEXT_PORT: AtomicU16 = AtomicU16::new(41000);

const LAST_PORT: u16 = 48999;

/// Hands out loopback ports that nothing is listening on.
pub struct PortAllocator;

impl PortAllocator {
    pub fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    /// Next free port, skipping any that are already taken
    pub fn next() -> Result<u16> {
        loop {
            let port = NEXT_PORT.fetch_add(1, Ordering::SeqCst);
            if port > LAST_PORT {
                return Err(anyhow!("Ran out of test ports"));
            }
            if port_is_free(SocketAddr::new(Self::localhost(), port)) {
                return Ok(port);
            }
        }
    }
}
