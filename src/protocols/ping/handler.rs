//! Ping protocol session handler.

use std::io;
use std::net::SocketAddr;
use std::str::Utf8Error;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, info_span, trace, Instrument};

use super::parser::{dispatch, EmptyCommand, Reply};

/// Maximum bytes consumed by a single read; each read is one command.
pub const READ_BUFFER_SIZE: usize = 1024;

/// A failure of the connection itself. Ends the session.
///
/// The display text is what the client sees after `-ERR `.
#[derive(Debug, Error)]
pub enum SessionFault {
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error("invalid UTF-8 in command: {0}")]
    Decode(#[from] Utf8Error),
}

/// Outcome of one read/reply round.
enum Step {
    Continue,
    Disconnected,
}

/// One client connection, owned for its whole lifetime.
///
/// Dropping the session closes the stream, so every exit from [`Session::run`]
/// closes the connection exactly once.
pub struct Session<S> {
    stream: S,
    peer: SocketAddr,
    empty: EmptyCommand,
    buffer: [u8; READ_BUFFER_SIZE],
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: SocketAddr, empty: EmptyCommand) -> Self {
        Self {
            stream,
            peer,
            empty,
            buffer: [0; READ_BUFFER_SIZE],
        }
    }

    /// Serve commands until the peer disconnects or the connection faults.
    pub async fn run(mut self) {
        loop {
            match self.step().await {
                Ok(Step::Continue) => {}
                Ok(Step::Disconnected) => {
                    trace!("Connection closed by client");
                    break;
                }
                Err(fault) => {
                    debug!(error = %fault, "Session fault");
                    // Best effort: the stream may already be unusable.
                    let reply = Reply::Fault(fault.to_string()).encode();
                    if let Err(e) = self.stream.write_all(&reply).await {
                        trace!(error = %e, "Fault reply not delivered");
                    }
                    break;
                }
            }
        }
    }

    async fn step(&mut self) -> Result<Step, SessionFault> {
        let n = self
            .stream
            .read(&mut self.buffer)
            .await
            .map_err(SessionFault::Read)?;
        if n == 0 {
            return Ok(Step::Disconnected);
        }

        let input = std::str::from_utf8(&self.buffer[..n])?;
        trace!(command = input.trim(), "Processing command");

        if let Some(reply) = dispatch(input, self.empty) {
            self.stream
                .write_all(&reply.encode())
                .await
                .map_err(SessionFault::Write)?;
        }

        Ok(Step::Continue)
    }
}

impl<S> Drop for Session<S> {
    fn drop(&mut self) {
        info!(peer = %self.peer, "Disconnected");
    }
}

/// Handle a ping protocol connection.
pub async fn handle_connection<S>(stream: S, peer: SocketAddr, empty: EmptyCommand)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    info!(peer = %peer, "Connected");

    Session::new(stream, peer, empty)
        .run()
        .instrument(info_span!("session", peer = %peer))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let stream = Builder::new()
            .read(b"PING\r\n")
            .write(b"+PONG\r\n")
            .build();

        handle_connection(stream, peer(), EmptyCommand::Reject).await;
    }

    #[tokio::test]
    async fn test_sequential_commands_answered_in_order() {
        let stream = Builder::new()
            .read(b"PING\r\n")
            .write(b"+PONG\r\n")
            .read(b"hello\r\n")
            .write(b"-ERR Unknown command\r\n")
            .read(b"ping\n")
            .write(b"+PONG\r\n")
            .build();

        handle_connection(stream, peer(), EmptyCommand::Reject).await;
    }

    #[tokio::test]
    async fn test_immediate_disconnect_sends_nothing() {
        let stream = Builder::new().build();

        handle_connection(stream, peer(), EmptyCommand::Reject).await;
    }

    #[tokio::test]
    async fn test_blank_line_rejected() {
        let stream = Builder::new()
            .read(b"\r\n")
            .write(b"-ERR Unknown command\r\n")
            .read(b"PING\r\n")
            .write(b"+PONG\r\n")
            .build();

        handle_connection(stream, peer(), EmptyCommand::Reject).await;
    }

    #[tokio::test]
    async fn test_blank_line_ignored() {
        let stream = Builder::new()
            .read(b"\r\n")
            .read(b"PING\r\n")
            .write(b"+PONG\r\n")
            .build();

        handle_connection(stream, peer(), EmptyCommand::Ignore).await;
    }

    #[tokio::test]
    async fn test_read_fault_reports_and_closes() {
        let stream = Builder::new()
            .read(b"PING\r\n")
            .write(b"+PONG\r\n")
            .read_error(io::Error::new(io::ErrorKind::Other, "boom"))
            .write(b"-ERR read failed: boom\r\n")
            .build();

        handle_connection(stream, peer(), EmptyCommand::Reject).await;
    }

    #[tokio::test]
    async fn test_invalid_utf8_reports_and_closes() {
        let stream = Builder::new()
            .read(&[0xff, b'\r', b'\n'])
            .write(b"-ERR invalid UTF-8 in command: invalid utf-8 sequence of 1 bytes from index 0\r\n")
            .build();

        handle_connection(stream, peer(), EmptyCommand::Reject).await;
    }

    #[tokio::test]
    async fn test_write_fault_reported_to_client() {
        let stream = Builder::new()
            .read(b"PING\r\n")
            .write_error(io::Error::new(io::ErrorKind::Other, "gone"))
            .write(b"-ERR write failed: gone\r\n")
            .build();

        handle_connection(stream, peer(), EmptyCommand::Reject).await;
    }

    #[tokio::test]
    async fn test_undeliverable_fault_reply_is_swallowed() {
        let stream = Builder::new()
            .read(b"PING\r\n")
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "still gone"))
            .build();

        handle_connection(stream, peer(), EmptyCommand::Reject).await;
    }

    #[test]
    fn test_fault_text() {
        let fault = SessionFault::Read(io::Error::new(io::ErrorKind::Other, "boom"));
        assert_eq!(fault.to_string(), "read failed: boom");

        let fault = SessionFault::Write(io::Error::new(io::ErrorKind::Other, "gone"));
        assert_eq!(fault.to_string(), "write failed: gone");
    }
}
