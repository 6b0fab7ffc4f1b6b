//! Named entity registries
//!
//! A registry is an in-memory map keyed by entity name, optionally mirrored
//! to a JSON file after every mutation. Single operations are atomic; a
//! sequence of operations is not.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::errors::BackendError;
use crate::filesys::file::File;
use crate::models::application::Application;
use crate::models::repository::RepositoryConnection;
use crate::models::server::ServerProfile;
use crate::storage::layout::StorageLayout;

/// An entity addressable by a unique name
pub trait Keyed {
    fn key(&self) -> &str;
}

/// Concurrent name-to-entity map with optional JSON persistence
pub struct Registry<T> {
    kind: &'static str,
    entries: RwLock<HashMap<String, T>>,
    file: Option<File>,
}

pub type RepositoryRegistry = Registry<RepositoryConnection>;
pub type ServerRegistry = Registry<ServerProfile>;
pub type ApplicationRegistry = Registry<Application>;

impl<T> Registry<T>
where
    T: Keyed + Clone + Serialize + DeserializeOwned,
{
    /// Create an in-memory registry
    pub fn in_memory(kind: &'static str) -> Self {
        Self {
            kind,
            entries: RwLock::new(HashMap::new()),
            file: None,
        }
    }

    /// Create a registry backed by a JSON file
    pub fn persistent(kind: &'static str, file: File) -> Self {
        Self {
            kind,
            entries: RwLock::new(HashMap::new()),
            file: Some(file),
        }
    }

    /// Load entries from the backing file, if any
    pub async fn load(&self) -> Result<usize, BackendError> {
        let Some(file) = &self.file else {
            return Ok(0);
        };
        if !file.exists().await {
            return Ok(0);
        }

        let items: Vec<T> = file.read_json().await?;
        let mut entries = self.entries.write().await;
        entries.clear();
        for item in items {
            entries.insert(item.key().to_string(), item);
        }
        debug!("Loaded {} {} entries", entries.len(), self.kind);
        Ok(entries.len())
    }

    /// Get an entity by name
    pub async fn get(&self, name: &str) -> Result<T, BackendError> {
        self.entries
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("{} '{}'", self.kind, name)))
    }

    /// List all entities sorted by name
    pub async fn list(&self) -> Vec<T> {
        let mut items: Vec<T> = self.entries.read().await.values().cloned().collect();
        items.sort_by(|a, b| a.key().cmp(b.key()));
        items
    }

    /// Insert or replace an entity
    pub async fn upsert(&self, item: T) -> Result<(), BackendError> {
        let mut entries = self.entries.write().await;
        entries.insert(item.key().to_string(), item);
        self.persist(&entries).await
    }

    /// Mutate an entity in place and return the updated copy
    pub async fn update<F>(&self, name: &str, f: F) -> Result<T, BackendError>
    where
        F: FnOnce(&mut T),
    {
        let mut entries = self.entries.write().await;
        let item = entries
            .get_mut(name)
            .ok_or_else(|| BackendError::NotFound(format!("{} '{}'", self.kind, name)))?;
        f(item);
        let updated = item.clone();
        self.persist(&entries).await?;
        Ok(updated)
    }

    /// Remove an entity by name
    pub async fn remove(&self, name: &str) -> Result<T, BackendError> {
        let mut entries = self.entries.write().await;
        let removed = entries
            .remove(name)
            .ok_or_else(|| BackendError::NotFound(format!("{} '{}'", self.kind, name)))?;
        self.persist(&entries).await?;
        Ok(removed)
    }

    async fn persist(&self, entries: &HashMap<String, T>) -> Result<(), BackendError> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let mut items: Vec<&T> = entries.values().collect();
        items.sort_by(|a, b| a.key().cmp(b.key()));
        file.write_json(&items).await
    }
}

/// The three registries the backend resolves names against
#[derive(Clone)]
pub struct Registries {
    pub applications: Arc<ApplicationRegistry>,
    pub repositories: Arc<RepositoryRegistry>,
    pub servers: Arc<ServerRegistry>,
}

impl Registries {
    /// Registries without persistence
    pub fn in_memory() -> Self {
        Self {
            applications: Arc::new(Registry::in_memory("application")),
            repositories: Arc::new(Registry::in_memory("repository")),
            servers: Arc::new(Registry::in_memory("server")),
        }
    }

    /// Open and load the registries of a storage layout
    pub async fn open(layout: &StorageLayout) -> Result<Self, BackendError> {
        let registries = Self {
            applications: Arc::new(Registry::persistent(
                "application",
                layout.applications_file(),
            )),
            repositories: Arc::new(Registry::persistent(
                "repository",
                layout.repositories_file(),
            )),
            servers: Arc::new(Registry::persistent("server", layout.servers_file())),
        };
        let applications = registries.applications.load().await?;
        let repositories = registries.repositories.load().await?;
        let servers = registries.servers.load().await?;
        info!(
            "Loaded {} applications, {} repositories, {} servers",
            applications, repositories, servers
        );
        Ok(registries)
    }
}
