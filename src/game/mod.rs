//! Game simulation modules

pub mod actions;
pub mod combat;
pub mod lobby;
pub mod physics;
pub mod registry;
pub mod scheduler;
pub mod simulation;
pub mod snapshot;
pub mod world;

pub use lobby::{
    spawn_lobby, Admission, AdmissionError, CloseReason, ConnId, LobbyHandle, LobbySettings,
    LobbySummary, StartError,
};
pub use registry::{LobbyRegistry, RegistryError};
pub use world::{GameRules, LobbyStatus};

/// Side length of the square arena, in cells
pub const GRID_SIZE: i32 = 30;
