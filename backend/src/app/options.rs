//! Command line options

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::BackendError;
use crate::storage::layout::StorageLayout;
use crate::workers::poller;

/// What the binary was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print version information
    Version,

    /// Print a fresh credential identity
    GenerateKey,

    /// Encrypt a credential with the configured identity
    Encrypt(String),

    /// Deploy an application
    Deploy(String),

    /// Print the CI status of an application
    CiStatus(String),

    /// Run the background workers until a shutdown signal
    Serve,
}

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub command: Command,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,

    /// Poller worker options
    pub poller: poller::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            command: Command::Serve,
            layout: StorageLayout::default(),
            max_shutdown_delay: Duration::from_secs(30),
            poller: poller::Options::default(),
        }
    }
}

impl AppOptions {
    /// Parse `--key=value` and `--flag` arguments, program name excluded
    pub fn from_args<I>(args: I) -> Result<Self, BackendError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut cli_args: HashMap<String, String> = HashMap::new();
        for arg in args {
            if let Some((key, value)) = arg.split_once('=') {
                let clean_key = key.trim_start_matches('-');
                cli_args.insert(clean_key.to_string(), value.to_string());
            } else if arg.starts_with("--") {
                let clean_key = arg.trim_start_matches('-');
                cli_args.insert(clean_key.to_string(), "true".to_string());
            } else {
                return Err(BackendError::InvalidParameter(format!(
                    "unexpected argument: {}",
                    arg
                )));
            }
        }

        let mut options = AppOptions::default();
        if let Some(dir) = cli_args.get("storage") {
            options.layout = StorageLayout::new(PathBuf::from(dir));
        }

        let value = |key: &str| -> Result<Option<String>, BackendError> {
            match cli_args.get(key) {
                None => Ok(None),
                Some(v) if v.is_empty() || v == "true" => Err(BackendError::InvalidParameter(
                    format!("--{} requires a value", key),
                )),
                Some(v) => Ok(Some(v.clone())),
            }
        };

        options.command = if cli_args.contains_key("version") {
            Command::Version
        } else if cli_args.contains_key("generate-key") {
            Command::GenerateKey
        } else if let Some(plaintext) = value("encrypt")? {
            Command::Encrypt(plaintext)
        } else if let Some(app) = value("deploy")? {
            Command::Deploy(app)
        } else if let Some(app) = value("ci-status")? {
            Command::CiStatus(app)
        } else {
            Command::Serve
        };

        Ok(options)
    }
}
