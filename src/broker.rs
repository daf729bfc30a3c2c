use crate::config::Timeouts;
use crate::error::{HarnessError, HarnessResult};
use crate::timed_io::TimedStream;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Listen backlog for reference listeners
const LISTEN_BACKLOG: i32 = 128;

/// Which side of the link the harness played when the connection was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Accepted on a reference listener from a client subject
    Accepted,
    /// Dialed by the harness to a server subject
    Dialed,
}

/// One established TCP link between the harness and a subject.
///
/// The read half is bounded by the read timeout and the write half by the
/// write timeout. Neither the broker nor the connection decides when to
/// close; the owning test case does.
pub struct Connection {
    subject: Uuid,
    role: PeerRole,
    peer_addr: SocketAddr,
    reader: TimedStream<OwnedReadHalf>,
    writer: TimedStream<OwnedWriteHalf>,
}

impl Connection {
    fn new(stream: TcpStream, subject: Uuid, role: PeerRole, timeouts: &Timeouts) -> HarnessResult<Self> {
        let peer_addr = stream
            .peer_addr()
            .map_err(|e| HarnessError::stream("read peer address", e))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            subject,
            role,
            peer_addr,
            reader: TimedStream::with_epsilon(read_half, timeouts.read, timeouts.epsilon),
            writer: TimedStream::with_epsilon(write_half, timeouts.write, timeouts.epsilon),
        })
    }

    pub fn subject(&self) -> Uuid {
        self.subject
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn reader_mut(&mut self) -> &mut TimedStream<OwnedReadHalf> {
        &mut self.reader
    }

    pub fn writer_mut(&mut self) -> &mut TimedStream<OwnedWriteHalf> {
        &mut self.writer
    }

    /// Shuts down the write side and releases the socket.
    pub async fn close(mut self) -> HarnessResult<()> {
        debug!(subject = %self.subject, "Closing connection to {}", self.peer_addr);
        match self.writer.shutdown().await {
            Ok(()) => Ok(()),
            // The subject already hung up; the socket is closed either way
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(HarnessError::stream("close connection", e)),
        }
    }
}

/// Harness-side listener for client subjects.
///
/// Bound before the subject starts so the subject's connect can only race
/// the accept timeout, never the bind.
pub struct ReferenceServer {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    connection: Option<Connection>,
    timeouts: Timeouts,
}

impl ReferenceServer {
    /// Binds a listening socket on `addr`.
    ///
    /// # Arguments
    /// * `addr` - Address the client subject will be told to connect to
    /// * `timeouts` - Bounds for accepting and for I/O on the accepted connection
    ///
    /// # Returns
    /// * `HarnessResult<Self>` - `Bind` if the socket cannot be bound
    pub fn bind(addr: SocketAddr, timeouts: Timeouts) -> HarnessResult<Self> {
        let bind_error = |source: std::io::Error| HarnessError::Bind { addr, source };

        let domain = match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(bind_error)?;

        // Cases reuse one port back to back; old connections may still be in TIME_WAIT
        socket.set_reuse_address(true).map_err(bind_error)?;
        socket.bind(&addr.into()).map_err(bind_error)?;
        socket.listen(LISTEN_BACKLOG).map_err(bind_error)?;
        socket.set_nonblocking(true).map_err(bind_error)?;

        let std_listener: StdTcpListener = socket.into();
        let local_addr = std_listener.local_addr().map_err(bind_error)?;
        let listener = TcpListener::from_std(std_listener).map_err(bind_error)?;

        info!("Reference server listening on {}", local_addr);
        Ok(Self {
            listener: Some(listener),
            local_addr,
            connection: None,
            timeouts,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Races `accept` against the accept timeout.
    ///
    /// # Arguments
    /// * `subject` - Subject the accepted connection is attributed to
    ///
    /// # Returns
    /// * `HarnessResult<()>` - `ConnectTimeout` if the timer wins, `Accept` if the
    ///   listener fails; on success the connection is held by the server
    pub async fn accept_within(&mut self, subject: Uuid) -> HarnessResult<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| HarnessError::Accept(std::io::Error::other("listener is closed")))?;

        let accept_timeout = self.timeouts.accept;
        let stream = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(%subject, "Accepted subject connection from {}", peer);
                    stream
                }
                Err(e) => return Err(HarnessError::Accept(e)),
            },
            _ = sleep(accept_timeout) => {
                warn!(%subject, "Timed out waiting for subject connection");
                return Err(HarnessError::ConnectTimeout(accept_timeout));
            }
        };

        self.connection = Some(Connection::new(stream, subject, PeerRole::Accepted, &self.timeouts)?);
        Ok(())
    }

    pub fn connection_mut(&mut self) -> Option<&mut Connection> {
        self.connection.as_mut()
    }

    /// Closes the accepted connection and the listener, reporting every failure.
    pub async fn close(&mut self) -> HarnessResult<()> {
        let mut errors = Vec::new();

        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                errors.push(e.to_string());
            }
        }
        if self.listener.take().is_some() {
            debug!("Reference server on {} closed", self.local_addr);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::stream(
                "close reference server",
                std::io::Error::other(errors.join("\n")),
            ))
        }
    }
}

/// Connects to a server subject.
///
/// # Arguments
/// * `addr` - Where the subject was told to listen
/// * `subject` - Subject the connection is attributed to
/// * `timeouts` - The accept timeout bounds the dial; read/write bound the connection
///
/// # Returns
/// * `HarnessResult<Connection>` - `Dial` if the connection is refused or fails,
///   `ConnectTimeout` if it does not complete in time
pub async fn dial(addr: SocketAddr, subject: Uuid, timeouts: &Timeouts) -> HarnessResult<Connection> {
    debug!(%subject, "Dialing subject at {}", addr);
    let stream = match timeout(timeouts.accept, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(HarnessError::Dial { addr, source }),
        Err(_) => return Err(HarnessError::ConnectTimeout(timeouts.accept)),
    };
    Connection::new(stream, subject, PeerRole::Dialed, timeouts)
}

/// Whether nothing is currently listening on `addr`.
pub fn port_is_free(addr: SocketAddr) -> bool {
    StdTcpListener::bind(addr).is_ok()
}
