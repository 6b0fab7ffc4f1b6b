//! Target server reachability and load tracking

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::authn::cipher::CredentialCipher;
use crate::errors::BackendError;
use crate::models::server::{ServerProfile, ServerStatus};
use crate::ssh::client::{RemoteShell, SshTarget};
use crate::storage::registry::ServerRegistry;
use crate::validate::resources::CapacitySnapshot;

const CPU_COMMAND: &str = r#"top -bn1 | grep "%Cpu" | awk '{print $2+$4}'"#;
const MEMORY_COMMAND: &str = "free -m | grep Mem";
const UNKNOWN: &str = "-";

/// Keeps the status and load of every server profile up to date
pub struct ResourceMonitor {
    servers: Arc<ServerRegistry>,
    shell: Arc<dyn RemoteShell>,
    cipher: Arc<CredentialCipher>,
    timeout: Duration,
}

impl ResourceMonitor {
    pub fn new(
        servers: Arc<ServerRegistry>,
        shell: Arc<dyn RemoteShell>,
        cipher: Arc<CredentialCipher>,
        timeout: Duration,
    ) -> Self {
        Self {
            servers,
            shell,
            cipher,
            timeout,
        }
    }

    /// Check a server with a no-op command and record the outcome
    pub async fn check_connection(&self, name: &str) -> Result<ServerStatus, BackendError> {
        let server = self.servers.get(name).await?;
        let status = match self.run(&server, "true").await {
            Ok(_) => ServerStatus::Successful,
            Err(e) => {
                warn!("Server {} is not reachable: {}", name, e);
                ServerStatus::Error
            }
        };
        self.servers.update(name, |s| s.status = status).await?;
        Ok(status)
    }

    /// Sample CPU and memory of a reachable server
    ///
    /// Both readings are reset to `-` when sampling fails.
    pub async fn refresh_load(&self, name: &str) -> Result<(), BackendError> {
        let server = self.servers.get(name).await?;
        if !server.is_reachable() {
            debug!("Skipping load refresh of unreachable server {}", name);
            return Ok(());
        }

        let sample = async {
            let cpu = self.run(&server, CPU_COMMAND).await?;
            let memory = self.run(&server, MEMORY_COMMAND).await?;
            let cpu = parse_cpu_sample(&cpu)
                .ok_or_else(|| BackendError::Transport(format!("unexpected cpu sample '{}'", cpu.trim())))?;
            let (used, total) = parse_free_output(&memory).ok_or_else(|| {
                BackendError::Transport(format!("unexpected memory sample '{}'", memory.trim()))
            })?;
            Ok::<_, BackendError>((format!("{}%", cpu), format_ram(used, total)))
        }
        .await;

        let (cpu, ram) = match sample {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Failed to sample load of {}: {}", name, e);
                (UNKNOWN.to_string(), UNKNOWN.to_string())
            }
        };
        self.servers
            .update(name, |s| {
                s.cpu = cpu;
                s.ram = ram;
            })
            .await?;
        Ok(())
    }

    /// Check and sample every registered server
    pub async fn refresh_all(&self) {
        let servers = self.servers.list().await;
        let refreshes = servers.iter().map(|server| self.refresh(&server.name));
        futures::future::join_all(refreshes).await;
        info!("Refreshed {} servers", servers.len());
    }

    async fn refresh(&self, name: &str) {
        if let Err(e) = self.check_connection(name).await {
            warn!("Status check of {} failed: {}", name, e);
            return;
        }
        if let Err(e) = self.refresh_load(name).await {
            warn!("Load refresh of {} failed: {}", name, e);
        }
    }

    /// Capacity of a reachable server with a known load
    pub async fn snapshot(&self, name: &str) -> Option<CapacitySnapshot> {
        let server = self.servers.get(name).await.ok()?;
        snapshot_of(&server)
    }

    async fn run(&self, server: &ServerProfile, command: &str) -> Result<String, BackendError> {
        let target = SshTarget::from_profile(server, &self.cipher)?;
        let output = self.shell.exec(&target, command, None, self.timeout).await?;
        if !output.success() {
            return Err(BackendError::Transport(format!(
                "'{}' exited with {}: {}",
                command,
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

/// Capacity derived from the recorded readings of a server
pub fn snapshot_of(server: &ServerProfile) -> Option<CapacitySnapshot> {
    if !server.is_reachable() {
        return None;
    }
    let (used, total) = parse_ram_reading(&server.ram)?;
    let cpu = server.cpu.trim().trim_end_matches('%').trim().parse::<f64>().ok()?;
    Some(CapacitySnapshot {
        total_ram_mb: total,
        used_ram_mb: used,
        free_cpu_percent: 100.0 - cpu,
    })
}

pub fn format_ram(used: i64, total: i64) -> String {
    format!("{}/{} MB", used, total)
}

/// Parse a `"<used>/<total> MB"` reading
pub fn parse_ram_reading(reading: &str) -> Option<(i64, i64)> {
    let (used, total) = reading.split_once('/')?;
    let digits = |s: &str| s.chars().filter(char::is_ascii_digit).collect::<String>();
    Some((digits(used).parse().ok()?, digits(total).parse().ok()?))
}

/// Parse the `Mem:` line of `free -m` into (used, total)
pub fn parse_free_output(output: &str) -> Option<(i64, i64)> {
    let line = output.lines().find(|l| l.trim_start().starts_with("Mem"))?;
    let mut fields = line.split_whitespace().skip(1);
    let total = fields.next()?.parse().ok()?;
    let used = fields.next()?.parse().ok()?;
    Some((used, total))
}

fn parse_cpu_sample(output: &str) -> Option<String> {
    let value = output.trim().replace(',', ".");
    value.parse::<f64>().ok()?;
    Some(value)
}
