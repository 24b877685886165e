//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::{LobbyRegistry, RegistryError};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub lobbies: Arc<LobbyRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // Initialize lobby registry
        let lobbies = LobbyRegistry::new(
            config.lobby_settings(),
            config.max_lobbies,
            config.finished_retention,
        );

        Self { config, lobbies }
    }

    /// Create the configured boot lobbies; the first one gets the well-known id
    pub fn seed_lobbies(&self) -> Result<(), RegistryError> {
        for (index, name) in self.config.seed_lobbies.iter().enumerate() {
            if index == 0 {
                self.lobbies
                    .seed(self.config.default_lobby_id, name.clone())?;
            } else {
                self.lobbies.seed(uuid::Uuid::new_v4(), name.clone())?;
            }
        }
        Ok(())
    }
}
