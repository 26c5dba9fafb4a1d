//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Server host, overriding the configuration
    #[arg(long)]
    pub host: Option<String>,

    /// Server port, overriding the configuration
    #[arg(long)]
    pub port: Option<u16>,

    /// Data directory for local history
    #[arg(short, long)]
    pub data_dir: Option<String>,

    /// Account to log in as
    #[arg(short, long)]
    pub user: Option<String>,

    /// Password for the account
    #[arg(short, long)]
    pub password: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that the server answers
    Ping {
        /// Text the server should echo back
        #[arg(short, long)]
        echo: Option<String>,
    },
    /// Create a new account
    Register {
        /// Display name for the new account
        #[arg(long)]
        display_name: Option<String>,
    },
    /// List users who are online
    Users,
    /// List the groups you belong to
    Groups,
    /// Send a text message and exit
    Send {
        /// Recipient username
        #[arg(short, long, conflicts_with = "group")]
        to: Option<String>,
        /// Recipient group id
        #[arg(short, long)]
        group: Option<i64>,
        /// Message content
        message: String,
    },
    /// Print incoming events until interrupted
    Listen {
        /// Stop after this many seconds
        #[arg(short, long)]
        seconds: Option<u64>,
    },
    /// Show locally stored history
    History {
        /// Peer username
        #[arg(short, long, conflicts_with = "group")]
        with: Option<String>,
        /// Group id
        #[arg(short, long)]
        group: Option<i64>,
    },
    /// Delete local history older than a number of days
    Purge {
        #[arg(long)]
        days: u32,
    },
}
