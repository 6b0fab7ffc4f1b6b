//! Application status notifications

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::application::Application;

/// Sink for application status changes
#[async_trait]
pub trait StatusNotifier: Send + Sync {
    /// Publish a snapshot of the application; never fails the caller
    async fn publish(&self, application: &Application);
}

/// Fans snapshots out to every live subscriber
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Application>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Application> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl StatusNotifier for BroadcastNotifier {
    async fn publish(&self, application: &Application) {
        match self.tx.send(application.clone()) {
            Ok(n) => debug!("Published status of {} to {} subscribers", application.name, n),
            Err(_) => debug!("No subscribers for status of {}", application.name),
        }
    }
}

/// Discards every snapshot
pub struct NoopNotifier;

#[async_trait]
impl StatusNotifier for NoopNotifier {
    async fn publish(&self, _application: &Application) {}
}
