//! Ping protocol parser.

use bytes::{BufMut, Bytes, BytesMut};
use clap::ValueEnum;
use serde::Deserialize;

/// Parsed ping command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Liveness probe.
    Ping,
    /// Anything else, including blank input.
    Unknown,
}

impl Command {
    /// Classify already-trimmed command text (case-insensitive).
    pub fn parse(text: &str) -> Command {
        if text.eq_ignore_ascii_case("PING") {
            Command::Ping
        } else {
            Command::Unknown
        }
    }
}

/// What to do with input that is non-empty on the wire but blank after trimming.
///
/// A zero-length read is always a disconnect; this only covers reads such as a
/// lone `\r\n`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EmptyCommand {
    /// Answer with the unknown-command error.
    #[default]
    Reject,
    /// Send nothing and keep reading.
    Ignore,
}

/// A protocol reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+PONG\r\n`
    Pong,
    /// `-ERR Unknown command\r\n`
    UnknownCommand,
    /// `-ERR <description>\r\n`, sent when the connection itself fails.
    Fault(String),
}

impl Reply {
    /// Wire encoding of the reply.
    pub fn encode(&self) -> Bytes {
        match self {
            Reply::Pong => Bytes::from_static(b"+PONG\r\n"),
            Reply::UnknownCommand => Bytes::from_static(b"-ERR Unknown command\r\n"),
            Reply::Fault(description) => {
                let mut buf = BytesMut::with_capacity(7 + description.len());
                buf.put_slice(b"-ERR ");
                buf.put_slice(description.as_bytes());
                buf.put_slice(b"\r\n");
                buf.freeze()
            }
        }
    }
}

/// Map one read's worth of decoded input to its reply.
///
/// Returns `None` when the policy says blank input gets no answer.
pub fn dispatch(input: &str, empty: EmptyCommand) -> Option<Reply> {
    let text = input.trim();

    if text.is_empty() && empty == EmptyCommand::Ignore {
        return None;
    }

    match Command::parse(text) {
        Command::Ping => Some(Reply::Pong),
        Command::Unknown => Some(Reply::UnknownCommand),
    }
}
