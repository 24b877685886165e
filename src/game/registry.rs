//! Process-wide registry of lobbies
//!
//! A single mutex guards the map. Critical sections only clone, insert or
//! remove handles; they never talk to a lobby task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::lobby::{spawn_lobby, LobbyHandle, LobbySettings, LobbySummary};
use super::world::LobbyStatus;

/// Errors returned by registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("lobby {0} already exists")]
    AlreadyExists(Uuid),

    #[error("lobby limit of {0} reached")]
    AtCapacity(usize),

    #[error("server is shutting down")]
    ShuttingDown,
}

#[derive(Debug)]
pub struct LobbyRegistry {
    /// Settings applied when a caller does not bring its own
    settings: LobbySettings,
    max_lobbies: usize,
    /// How long a FINISHED lobby stays listed
    retention: Duration,
    lobbies: Mutex<HashMap<Uuid, LobbyHandle>>,
    /// Set once by `shutdown_all`; no lobby is created after it
    closing: AtomicBool,
}

impl LobbyRegistry {
    pub fn new(settings: LobbySettings, max_lobbies: usize, retention: Duration) -> Arc<Self> {
        Arc::new(Self {
            settings,
            max_lobbies,
            retention,
            lobbies: Mutex::new(HashMap::new()),
            closing: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &LobbySettings {
        &self.settings
    }

    /// Create a PENDING lobby. A fresh id is generated when none is given.
    pub fn create(
        self: &Arc<Self>,
        id: Option<Uuid>,
        name: String,
        settings: LobbySettings,
    ) -> Result<LobbyHandle, RegistryError> {
        self.insert(id.unwrap_or_else(Uuid::new_v4), name, settings, false)
    }

    /// Create a lobby that is replaced by a fresh one under the same id and
    /// name once it finishes and its retention expires.
    pub fn seed(self: &Arc<Self>, id: Uuid, name: String) -> Result<LobbyHandle, RegistryError> {
        self.insert(id, name, self.settings.clone(), true)
    }

    fn insert(
        self: &Arc<Self>,
        id: Uuid,
        name: String,
        settings: LobbySettings,
        reopen: bool,
    ) -> Result<LobbyHandle, RegistryError> {
        let handle = {
            let mut lobbies = self.lobbies.lock();
            if self.is_closing() {
                return Err(RegistryError::ShuttingDown);
            }
            if lobbies.contains_key(&id) {
                return Err(RegistryError::AlreadyExists(id));
            }
            if lobbies.len() >= self.max_lobbies {
                return Err(RegistryError::AtCapacity(self.max_lobbies));
            }
            let handle = spawn_lobby(id, name.clone(), settings.clone());
            lobbies.insert(id, handle.clone());
            handle
        };

        info!(lobby_id = %id, name = %name, reopen, "lobby created");
        self.spawn_retention_watcher(&handle, name, settings, reopen);
        Ok(handle)
    }

    pub fn get(&self, id: &Uuid) -> Option<LobbyHandle> {
        self.lobbies.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &Uuid) -> Option<LobbyHandle> {
        self.lobbies.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.lobbies.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lobbies.lock().is_empty()
    }

    /// Summaries of every lobby, ordered by name then id
    pub fn list(&self) -> Vec<LobbySummary> {
        let handles: Vec<LobbyHandle> = self.lobbies.lock().values().cloned().collect();
        let mut summaries: Vec<LobbySummary> = handles.iter().map(|h| h.summary()).collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        summaries
    }

    /// Players plus spectators across all lobbies
    pub fn connected_clients(&self) -> usize {
        self.list().iter().map(LobbySummary::connected).sum()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Stop every lobby, closing its connections, and refuse new ones.
    /// Resolves once all lobby tasks have exited.
    pub async fn shutdown_all(&self) {
        let handles: Vec<LobbyHandle> = {
            let lobbies = self.lobbies.lock();
            self.closing.store(true, Ordering::Release);
            lobbies.values().cloned().collect()
        };
        info!(lobbies = handles.len(), "shutting down lobbies");
        join_all(handles.iter().map(|handle| handle.shutdown())).await;
    }

    /// Remove the lobby `retention` after it reaches FINISHED
    fn spawn_retention_watcher(
        self: &Arc<Self>,
        handle: &LobbyHandle,
        name: String,
        settings: LobbySettings,
        reopen: bool,
    ) {
        let registry: Weak<Self> = Arc::downgrade(self);
        let id = handle.id();
        let mut summary = handle.watch();
        let retention = self.retention;

        tokio::spawn(async move {
            loop {
                if summary.borrow_and_update().status == LobbyStatus::Finished {
                    break;
                }
                // Sender gone: the task exited, either finished or shut down.
                if summary.changed().await.is_err() {
                    break;
                }
            }

            tokio::time::sleep(retention).await;

            let Some(registry) = registry.upgrade() else {
                return;
            };
            if registry.is_closing() {
                return;
            }
            if registry.remove(&id).is_none() {
                return;
            }
            info!(lobby_id = %id, "finished lobby retired");

            if reopen {
                if let Err(e) = registry.insert(id, name, settings, true) {
                    warn!(lobby_id = %id, error = %e, "failed to reopen lobby");
                }
            }
        });
    }
}
