//! Parley Harness
//!
//! An in-process mock chat server for exercising the session, the history
//! recorder and the client root over a real loopback TCP connection.
//!
//! The server keeps accounts, tokens and groups in memory, answers requests
//! in the Parley wire format and exposes controls for tests: pushing events,
//! swallowing a request kind so its caller times out, delaying `PING`
//! replies, and closing connections from the server side.

pub mod directory;
pub mod server;

pub use directory::{Audience, Directory, LoginChange, Outcome};
pub use server::{MockServer, DELAY_MS_KEY};
