//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::authn::cipher::CredentialCipher;
use crate::deploy::orchestrator::DeploymentOrchestrator;
use crate::errors::BackendError;
use crate::git::store::GitContentStore;
use crate::http::ci_status::CiStatusClient;
use crate::monitor::ResourceMonitor;
use crate::notify::BroadcastNotifier;
use crate::save::FileSaveService;
use crate::ssh::client::{RemoteShell, SshClient};
use crate::storage::layout::StorageLayout;
use crate::storage::registry::Registries;
use crate::storage::settings::Settings;
use crate::sync::SyncChecker;
use crate::validate::sandbox::{DockerSandbox, Sandbox};
use crate::validate::TemplateValidator;

/// Capacity of the status notification channel
const NOTIFY_CAPACITY: usize = 64;

/// Every long-lived component of the backend
pub struct AppState {
    pub settings: Settings,
    pub registries: Registries,
    pub cipher: Arc<CredentialCipher>,
    pub notifier: Arc<BroadcastNotifier>,
    pub store: Arc<GitContentStore>,
    pub monitor: Arc<ResourceMonitor>,
    pub validator: Arc<TemplateValidator>,
    pub save: Arc<FileSaveService>,
    pub orchestrator: Arc<DeploymentOrchestrator>,
    pub ci_status: Arc<CiStatusClient>,
    pub sync: Arc<SyncChecker>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(layout: &StorageLayout, settings: Settings) -> Result<Self, BackendError> {
        info!("Initializing application state...");

        let cipher = Arc::new(load_cipher(layout, &settings).await?);
        let registries = Registries::open(layout).await?;
        let shell: Arc<dyn RemoteShell> = Arc::new(SshClient::new(settings.ssh.clone()));
        let sandbox: Arc<dyn Sandbox> =
            Arc::new(DockerSandbox::new(&settings.validator.docker_binary));

        Self::with_components(settings, registries, cipher, shell, sandbox)
    }

    /// Wire the components around the given collaborators
    pub fn with_components(
        settings: Settings,
        registries: Registries,
        cipher: Arc<CredentialCipher>,
        shell: Arc<dyn RemoteShell>,
        sandbox: Arc<dyn Sandbox>,
    ) -> Result<Self, BackendError> {
        let notifier = Arc::new(BroadcastNotifier::new(NOTIFY_CAPACITY));
        let store = Arc::new(GitContentStore::new(&settings.git, cipher.clone()));
        let monitor = Arc::new(ResourceMonitor::new(
            registries.servers.clone(),
            shell.clone(),
            cipher.clone(),
            Duration::from_secs(settings.ssh.command_timeout_secs),
        ));
        let validator = Arc::new(TemplateValidator::new(
            sandbox,
            monitor.clone(),
            settings.validator.clone(),
        ));
        let save = Arc::new(FileSaveService::new(store.clone(), validator.clone()));
        let orchestrator = Arc::new(DeploymentOrchestrator::new(
            registries.clone(),
            store.clone(),
            shell,
            cipher.clone(),
            notifier.clone(),
            settings.ssh.clone(),
            &settings.ci,
        ));
        let sync = Arc::new(SyncChecker::new(
            registries.clone(),
            store.clone(),
            notifier.clone(),
        ));
        let ci_status = Arc::new(CiStatusClient::new(
            settings.ci.clone(),
            registries.applications.clone(),
            registries.repositories.clone(),
            cipher.clone(),
        )?);

        Ok(Self {
            settings,
            registries,
            cipher,
            notifier,
            store,
            monitor,
            validator,
            save,
            orchestrator,
            ci_status,
            sync,
        })
    }
}

/// The inline identity from the settings, else the identity file
pub async fn load_cipher(
    layout: &StorageLayout,
    settings: &Settings,
) -> Result<CredentialCipher, BackendError> {
    match &settings.encryption_identity {
        Some(identity) => CredentialCipher::from_identity(identity),
        None => CredentialCipher::load_or_create(&layout.identity_file()).await,
    }
}
