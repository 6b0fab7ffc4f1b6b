//! infraflow backend - Entry Point
//!
//! Keeps infrastructure templates in git, validates them and rolls them
//! out to target servers over SSH.

use std::env;
use std::process::ExitCode;

use colored::Colorize;
use age::secrecy::ExposeSecret;
use tracing::{error, info};

use infraflow::app::options::{AppOptions, Command};
use infraflow::app::run::{load_settings, run};
use infraflow::authn::cipher::CredentialCipher;
use infraflow::logs::{init_logging, LogOptions};
use infraflow::utils::version_info;

#[tokio::main]
async fn main() -> ExitCode {
    let options = match AppOptions::from_args(env::args().skip(1)) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    // Commands that need no storage
    match &options.command {
        Command::Version => {
            return match serde_json::to_string_pretty(&version_info()) {
                Ok(json) => {
                    println!("{}", json);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{} {}", "error:".red().bold(), e);
                    ExitCode::FAILURE
                }
            };
        }
        Command::GenerateKey => {
            let cipher = CredentialCipher::generate();
            println!("{}", cipher.identity_string().expose_secret());
            return ExitCode::SUCCESS;
        }
        _ => {}
    }

    if let Err(e) = options.layout.setup().await {
        eprintln!("{} unable to prepare storage: {}", "error:".red().bold(), e);
        return ExitCode::FAILURE;
    }

    let settings = match load_settings(&options.layout).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} unable to read settings file: {}", "error:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging; one-shot commands keep stdout for their result
    let serving = options.command == Command::Serve;
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        stdout: serving,
        log_dir: Some(options.layout.logs_dir().path().to_path_buf()),
        json_format: settings.json_logs,
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    info!("Running infraflow {} ({:?})", version_info().version, options.command);
    match run(options, settings, await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Command failed: {e}");
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (Ok(mut sigterm), Ok(mut sigint)) = (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) else {
            error!("Unable to install signal handlers, falling back to Ctrl+C");
            let _ = tokio::signal::ctrl_c().await;
            return;
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
