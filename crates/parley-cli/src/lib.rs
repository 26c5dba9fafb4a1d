//! Parley CLI library
//!
//! Argument parsing, configuration loading and one handler per command. Each
//! invocation connects, logs in when the command needs an account, does its
//! work and disconnects.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use error::{CliError, Result};
