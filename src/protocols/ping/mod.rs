//! Ping protocol implementation.
//!
//! A minimal line-oriented protocol for liveness checks:
//! - Client sends: `PING` (any case, surrounding whitespace ignored)
//! - Server responds: `+PONG\r\n`
//!
//! Anything else is answered with `-ERR Unknown command\r\n` and the
//! connection stays open. The reply never echoes the unrecognized input.
//!
//! ## Framing
//!
//! There is no length prefix and no line framing: every read of up to
//! [`handler::READ_BUFFER_SIZE`] bytes is one command. A zero-length read means the
//! client went away.
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  PING\r\n
//! Response: +PONG\r\n
//!
//! Request:  GET foo\r\n
//! Response: -ERR Unknown command\r\n
//!
//! (connection read/write fails)
//! Response: -ERR <fault description>\r\n   then close
//! ```

pub mod handler;
pub mod parser;

pub use handler::handle_connection;
pub use parser::EmptyCommand;
