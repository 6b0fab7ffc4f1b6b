//! Polling worker running a periodic task until shutdown

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::monitor::ResourceMonitor;
use crate::sync::SyncChecker;

/// Poller worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Polling interval
    pub interval: Duration,

    /// Initial delay before first poll
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            initial_delay: Duration::from_secs(1),
        }
    }
}

/// One pass of periodic work
#[async_trait]
pub trait PollTask: Send + Sync {
    /// Name used in log lines
    fn name(&self) -> &'static str;

    async fn poll(&self);
}

#[async_trait]
impl PollTask for ResourceMonitor {
    fn name(&self) -> &'static str {
        "server monitor"
    }

    async fn poll(&self) {
        self.refresh_all().await;
    }
}

#[async_trait]
impl PollTask for SyncChecker {
    fn name(&self) -> &'static str {
        "auto-sync"
    }

    async fn poll(&self) {
        self.sync_auto_apps().await;
    }
}

/// Run the poller worker until `shutdown_signal` resolves
pub async fn run<T, S, F>(
    options: &Options,
    task: Arc<T>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    T: PollTask + ?Sized,
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Poller worker for {} starting...", task.name());

    let mut delay = options.initial_delay;
    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Poller worker for {} shutting down...", task.name());
                return;
            }
            _ = sleep_fn(delay) => {}
        }
        delay = options.interval;

        debug!("Running {} pass...", task.name());
        task.poll().await;
    }
}
