//! Main application run loop

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::{AppOptions, Command};
use crate::app::state::{load_cipher, AppState};
use crate::errors::BackendError;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::poller::{self, PollTask};

/// Read the settings file, writing the defaults when there is none
pub async fn load_settings(layout: &StorageLayout) -> Result<Settings, BackendError> {
    let file = layout.settings_file();
    if file.exists().await {
        return file.read_json::<Settings>().await;
    }
    let settings = Settings::default();
    file.write_json(&settings).await?;
    info!("Wrote default settings to {}", file.path().display());
    Ok(settings)
}

/// Run a command against an initialized storage layout
pub async fn run(
    options: AppOptions,
    settings: Settings,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), BackendError> {
    match &options.command {
        Command::Encrypt(plaintext) => {
            let cipher = load_cipher(&options.layout, &settings).await?;
            println!("{}", cipher.encrypt(plaintext)?);
            Ok(())
        }
        Command::Deploy(application) => {
            let state = AppState::init(&options.layout, settings).await?;
            let report = state.orchestrator.deploy(application).await?;
            print_json(&report)
        }
        Command::CiStatus(application) => {
            let state = AppState::init(&options.layout, settings).await?;
            let status = state.ci_status.status(application).await?;
            print_json(&status)
        }
        Command::Serve => serve(options, settings, shutdown_signal).await,
        Command::Version | Command::GenerateKey => Err(BackendError::InvalidParameter(
            format!("{:?} does not need the storage layout", options.command),
        )),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), BackendError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run the background workers until `shutdown_signal` resolves
async fn serve(
    options: AppOptions,
    settings: Settings,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), BackendError> {
    info!("Initializing infraflow backend...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.max_shutdown_delay);

    let monitor_enabled = settings.monitor.enabled;
    let poller_options = poller::Options {
        interval: Duration::from_secs(settings.monitor.interval_secs),
        ..options.poller.clone()
    };
    let sync_enabled = settings.sync.enabled;
    let sync_options = poller::Options {
        interval: Duration::from_secs(settings.sync.interval_secs),
        ..options.poller.clone()
    };

    let state = match AppState::init(&options.layout, settings).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to start backend: {}", e);
            return Err(e);
        }
    };

    if monitor_enabled {
        shutdown_manager.poller_worker_handle = Some(init_poller_worker(
            poller_options,
            state.monitor.clone(),
            shutdown_tx.subscribe(),
        ));
    } else {
        warn!("Server monitor is disabled");
    }

    if sync_enabled {
        shutdown_manager.sync_worker_handle = Some(init_poller_worker(
            sync_options,
            state.sync.clone(),
            shutdown_tx.subscribe(),
        ));
    } else {
        warn!("Auto-sync is disabled");
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

fn init_poller_worker<T: PollTask + 'static>(
    options: poller::Options,
    task: Arc<T>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    info!("Initializing {} worker...", task.name());

    tokio::spawn(async move {
        poller::run(
            &options,
            task,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    })
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    max_shutdown_delay: Duration,
    poller_worker_handle: Option<JoinHandle<()>>,
    sync_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: broadcast::Sender<()>, max_shutdown_delay: Duration) -> Self {
        Self {
            shutdown_tx,
            max_shutdown_delay,
            poller_worker_handle: None,
            sync_worker_handle: None,
        }
    }

    async fn shutdown(&mut self) -> Result<(), BackendError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(self.max_shutdown_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, abandoning workers",
                    self.max_shutdown_delay
                );
                Err(BackendError::Timeout("graceful shutdown".to_string()))
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), BackendError> {
        info!("Shutting down infraflow backend...");

        for handle in [self.poller_worker_handle.take(), self.sync_worker_handle.take()]
            .into_iter()
            .flatten()
        {
            handle
                .await
                .map_err(|e| BackendError::Internal(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
