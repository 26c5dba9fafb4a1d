//! Parley CLI Configuration Management
//!
//! Configuration comes from a TOML file shaped like [`ParleyConfig`], with
//! command line arguments layered on top. Missing sections take their
//! defaults. Local history lives under the platform data directory unless a
//! directory is given.

use std::path::{Path, PathBuf};

use parley_core::ParleyConfig;

use crate::cli::Cli;
use crate::error::{CliError, Result};

/// Name of the per-platform data directory
pub const APP_DIR_NAME: &str = "parley";

/// Default history location, `<platform data dir>/parley`
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(APP_DIR_NAME))
}

/// Parse configuration from TOML text
pub fn parse_config(text: &str) -> Result<ParleyConfig> {
    let config: ParleyConfig = toml::from_str(text)?;
    config
        .validate()
        .map_err(|e| CliError::Config(e.to_string()))?;
    Ok(config)
}

/// Load configuration from a TOML file
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<ParleyConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| CliError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    parse_config(&text)
}

/// Load the file given on the command line, or defaults, then apply overrides
pub fn load_configuration(cli: &Cli) -> Result<ParleyConfig> {
    let mut config = match &cli.config {
        Some(path) => load_from_file(path)?,
        None => ParleyConfig::default(),
    };
    apply_overrides(&mut config, cli);
    config
        .validate()
        .map_err(|e| CliError::Config(e.to_string()))?;
    Ok(config)
}

fn apply_overrides(config: &mut ParleyConfig, cli: &Cli) {
    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(data_dir) = &cli.data_dir {
        config.history.data_dir = Some(PathBuf::from(data_dir));
    }
    if config.history.data_dir.is_none() {
        config.history.data_dir = default_data_dir();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_parse_partial_config() {
        let config = parse_config(
            r#"
            log_level = "debug"

            [server]
            host = "chat.example.org"
            port = 7000

            [history]
            retention_days = 14
            "#,
        )
        .unwrap();

        assert_eq!(config.server.address(), "chat.example.org:7000");
        assert_eq!(config.history.retention_days, Some(14));
        assert_eq!(config.session, parley_core::SessionConfig::default());
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = parse_config("[session]\nrequest_timeout_ms = 0\n").unwrap_err();
        assert!(matches!(err, CliError::Config(_)));

        let err = parse_config("[server\n").unwrap_err();
        assert!(matches!(err, CliError::TomlParsing(_)));
    }

    #[test]
    fn test_overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[server]\nhost = \"file-host\"\nport = 1234").unwrap();

        let history = dir.path().join("history");
        let cli = Cli::parse_from([
            "parley",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "4321",
            "--data-dir",
            history.to_str().unwrap(),
            "users",
        ]);
        let config = load_configuration(&cli).unwrap();

        assert_eq!(config.server.host, "file-host");
        assert_eq!(config.server.port, 4321);
        assert_eq!(config.history.data_dir.as_deref(), Some(history.as_path()));
    }
}
