//! TCP listener for the ping server.
//!
//! Owns the listening socket, accepts connections, and spawns one task per
//! accepted connection. There is no connection limit and no worker pool:
//! every accept gets its own task, whatever the current load.
//!
//! Sessions share nothing with each other or with the accept loop. The
//! listener only keeps their join handles so finished tasks can be reaped
//! and open ones handed back at shutdown.

use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::protocols::ping::{self, EmptyCommand};

/// Depth of the pending-connection queue.
pub const BACKLOG: i32 = 5;

/// Where the listener binds. Consumed once by [`Listener::bind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    host: String,
    port: u16,
}

impl ListenerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolve to a single socket address, preferring IPv4.
    fn resolve(&self) -> Result<SocketAddr, BindError> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|source| BindError::Resolve {
                host: self.host.clone(),
                port: self.port,
                source,
            })?
            .collect();

        addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| BindError::NoAddress {
                host: self.host.clone(),
                port: self.port,
            })
    }
}

/// Startup failure: the server cannot accept connections.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("{host}:{port} did not resolve to any address")]
    NoAddress { host: String, port: u16 },

    #[error("failed to bind {addr}: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// The bound, listening socket.
pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
    empty_command: EmptyCommand,
}

impl Listener {
    /// Bind and start listening.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(config: &ListenerConfig) -> Result<Self, BindError> {
        debug!(host = config.host(), port = config.port(), "Resolving listen address");
        let addr = config.resolve()?;
        let bind_err = |source| BindError::Io { addr, source };

        let std_listener = create_listener(addr).map_err(bind_err)?;
        let listener = TcpListener::from_std(std_listener).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        info!(addr = %local_addr, backlog = BACKLOG, "Server listening");

        Ok(Self {
            listener,
            local_addr,
            empty_command: EmptyCommand::default(),
        })
    }

    /// Set how sessions answer input that is blank after trimming.
    pub fn empty_command(mut self, policy: EmptyCommand) -> Self {
        self.empty_command = policy;
        self
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` completes.
    ///
    /// Each connection is handed to its own task and never awaited here.
    /// On shutdown the listening socket is closed and the still-running
    /// sessions are returned; they keep serving their clients.
    pub async fn run<F>(self, shutdown: F) -> Sessions
    where
        F: Future<Output = ()>,
    {
        let mut sessions = Sessions::new(self.empty_command);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(open_sessions = sessions.len(), "Shutting down server");
                    break;
                }
                accepted = self.listener.accept() => sessions.accepted(accepted),
                Some(()) = sessions.reap_next() => {}
            }
        }

        sessions
    }
}

/// Session tasks spawned by the listener.
///
/// Dropping this aborts the sessions it still holds; call [`Sessions::wait`]
/// to let them finish.
pub struct Sessions {
    tasks: JoinSet<()>,
    empty_command: EmptyCommand,
}

impl Sessions {
    fn new(empty_command: EmptyCommand) -> Self {
        Self {
            tasks: JoinSet::new(),
            empty_command,
        }
    }

    /// Start a session for an accepted connection. A failed accept is
    /// logged and spawns nothing.
    fn accepted(&mut self, result: io::Result<(TcpStream, SocketAddr)>) {
        match result {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                }
                self.tasks
                    .spawn(ping::handle_connection(stream, peer, self.empty_command));
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
            }
        }
    }

    /// Wait for the next session to end and reap it. `None` when there are
    /// no sessions left.
    async fn reap_next(&mut self) -> Option<()> {
        let finished = self.tasks.join_next().await?;
        if let Err(e) = finished {
            if e.is_panic() {
                error!(error = %e, "Session task panicked");
            }
        }
        Some(())
    }

    /// Number of sessions not yet reaped.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait until every session has closed its connection.
    pub async fn wait(mut self) {
        while self.reap_next().await.is_some() {}
    }
}

/// Create a TCP listener with SO_REUSEADDR so a restart can rebind while the
/// previous instance's sockets linger. SO_REUSEPORT stays off: a second live
/// listener on the same port must fail.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}
