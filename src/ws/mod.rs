//! WebSocket transport: wire codec and per-connection sessions

pub mod handler;
pub mod protocol;
