//! Protocol implementations.
//!
//! - `ping`: `PING` liveness probe answered with `+PONG`
//!
//! New verbs belong in a protocol's parser; the listener only hands
//! accepted connections to a handler.

pub mod ping;
