//! ResourceMonitor and poller against a scripted remote shell

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use infraflow::errors::BackendError;
use infraflow::models::server::{ServerProfile, ServerStatus};
use infraflow::monitor::ResourceMonitor;
use infraflow::ssh::client::{RemoteOutput, RemoteShell, SshTarget};
use infraflow::storage::registry::ServerRegistry;
use infraflow::workers::poller;

use crate::support::cipher;

/// Answers like a Linux host; `down` hosts refuse every connection
struct ScriptedShell;

#[async_trait]
impl RemoteShell for ScriptedShell {
    async fn exec(
        &self,
        target: &SshTarget,
        command: &str,
        _stdin: Option<Vec<u8>>,
        _timeout: Duration,
    ) -> Result<RemoteOutput, BackendError> {
        if target.host == "down" {
            return Err(BackendError::Transport("connection refused".to_string()));
        }
        let stdout = if command.starts_with("top") {
            "12.5\n"
        } else if command.starts_with("free") {
            "Mem:           4096        1024        2000         12        1000        2900\n"
        } else {
            ""
        };
        Ok(RemoteOutput {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }
}

async fn monitor() -> (Arc<ServerRegistry>, Arc<ResourceMonitor>) {
    let servers = Arc::new(ServerRegistry::in_memory("server"));
    servers
        .upsert(ServerProfile::new("prod", "10.0.0.5", 22, "ops", ""))
        .await
        .unwrap();
    servers
        .upsert(ServerProfile::new("old", "down", 22, "ops", ""))
        .await
        .unwrap();
    let monitor = Arc::new(ResourceMonitor::new(
        servers.clone(),
        Arc::new(ScriptedShell),
        cipher(),
        Duration::from_secs(5),
    ));
    (servers, monitor)
}

#[tokio::test]
async fn test_refresh_all_records_status_and_load() {
    let (servers, monitor) = monitor().await;

    monitor.refresh_all().await;

    let prod = servers.get("prod").await.unwrap();
    assert_eq!(prod.status, ServerStatus::Successful);
    assert_eq!(prod.cpu, "12.5%");
    assert_eq!(prod.ram, "1024/4096 MB");

    let old = servers.get("old").await.unwrap();
    assert_eq!(old.status, ServerStatus::Error);
    assert_eq!(old.ram, "-");

    let snapshot = monitor.snapshot("prod").await.unwrap();
    assert_eq!(snapshot.total_ram_mb, 4096);
    assert_eq!(snapshot.used_ram_mb, 1024);
    assert!(monitor.snapshot("old").await.is_none());
    assert!(monitor.snapshot("missing").await.is_none());
}

#[tokio::test]
async fn test_poller_refreshes_until_shutdown() {
    let (servers, monitor) = monitor().await;
    let (tx, mut rx) = tokio::sync::broadcast::channel::<()>(1);

    let options = poller::Options {
        interval: Duration::from_millis(10),
        initial_delay: Duration::from_millis(0),
    };
    let handle = tokio::spawn(async move {
        poller::run(
            &options,
            monitor,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = rx.recv().await;
            }),
        )
        .await;
    });

    for _ in 0..100 {
        if servers.get("prod").await.unwrap().status == ServerStatus::Successful {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        servers.get("prod").await.unwrap().status,
        ServerStatus::Successful
    );
}
